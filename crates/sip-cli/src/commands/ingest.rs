use std::path::PathBuf;

use clap::Args;
use sip_client::{Credentials, IngestSession};

use crate::exit_codes;

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Named profile to read host/tenant/credentials from, falling back to
    /// the `PRESERVICA_*` environment variables for any field not stored.
    #[arg(long, default_value = "default")]
    pub profile: String,

    /// The submission package to stream to the repository.
    #[arg(long)]
    pub package: PathBuf,

    /// The destination structural object's ref.
    #[arg(long = "target-ref")]
    pub target_ref: String,
}

pub async fn run(args: IngestArgs) -> anyhow::Result<i32> {
    let config_path = sip_config::Config::default_path()?;
    let credentials = sip_config::resolve_profile(&config_path, &args.profile)?;

    let session = IngestSession::connect(
        Credentials {
            host: credentials.host,
            tenant: credentials.tenant,
            username: credentials.username,
            password: credentials.password,
        },
        None,
    )
    .await?;

    let result = session.upload(&args.package, &args.target_ref).await;
    session.close().await?;

    match result {
        Ok(elapsed) => {
            println!("uploaded {} in {:.1}s", args.package.display(), elapsed.as_secs_f64());
            Ok(exit_codes::OK)
        }
        Err(e) => {
            eprintln!("upload failed: {e}");
            Ok(exit_codes::RUNTIME_ERROR)
        }
    }
}
