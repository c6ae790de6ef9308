use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use object_store::ObjectStore;
use sip_uploader::Uploader;

use crate::exit_codes;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Directory to scan for `.zip` submission packages.
    #[arg(long)]
    pub dir: PathBuf,

    /// S3 bucket to upload into. Omit to run against an in-memory store,
    /// useful for a dry run or for exercising the pipeline in tests.
    #[arg(long)]
    pub bucket: Option<String>,

    /// Delete each package from `dir` after it uploads successfully.
    #[arg(long)]
    pub delete_on_success: bool,
}

pub async fn run(args: UploadArgs) -> anyhow::Result<i32> {
    let store: Arc<dyn ObjectStore> = match &args.bucket {
        Some(bucket) => Arc::new(
            object_store::aws::AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .build()?,
        ),
        None => {
            tracing::warn!("no --bucket given, uploading to an in-memory store");
            Arc::new(object_store::memory::InMemory::new())
        }
    };

    let summary = Uploader::new(store)
        .upload_directory(&args.dir, args.delete_on_success)
        .await?;

    println!(
        "uploaded {} package(s), {} failed",
        summary.completed(),
        summary.failed
    );
    Ok(if summary.failed > 0 {
        exit_codes::RUNTIME_ERROR
    } else {
        exit_codes::OK
    })
}
