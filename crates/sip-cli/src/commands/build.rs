use std::path::PathBuf;

use clap::Args;
use sip_builder::PackageBuilder;

use crate::exit_codes;

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Where to write the submission package (created fresh, or reopened
    /// for append if it already exists).
    #[arg(long)]
    pub output: PathBuf,

    /// The destination folder's ref in the target repository, stamped as
    /// the root StructuralObject's parent and the protocol's `globalAIP`.
    #[arg(long = "parent-ref")]
    pub parent_ref: String,

    /// Title for the root StructuralObject / InformationObject.
    #[arg(long)]
    pub title: String,

    /// Representation type for a multi-file build.
    #[arg(long, default_value = "Preservation")]
    pub representation_type: String,

    /// Files to bundle as bitstreams. A single file produces an
    /// IO -> CO -> Representation -> Generation -> Bitstream chain via
    /// `add_asset_tree`; more than one produces a single manifestation.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

pub fn run(args: BuildArgs) -> anyhow::Result<i32> {
    let mut builder = PackageBuilder::open(&args.output, args.parent_ref.clone(), None)?;
    let root = builder.add_structobj(args.title.clone(), Some(args.parent_ref.clone()), None)?;

    if args.files.len() == 1 {
        builder.add_asset_tree(root, &args.files[0], None)?;
    } else {
        let io = builder.add_infobj(args.title.clone(), root, None)?;
        builder.add_manifestation(io, &args.files, &args.representation_type, None)?;
    }

    let protocol = builder.serialise()?;
    println!(
        "wrote {} ({} files, {} bytes, sipRef stamped in protocol as localAIP={})",
        args.output.display(),
        protocol.files,
        protocol.size,
        protocol.local_aip,
    );
    Ok(exit_codes::OK)
}
