use clap::{Parser, Subcommand};

mod commands;
mod exit_codes;

use commands::{build, config, ingest, upload};

#[derive(Parser)]
#[command(name = "sip", version, about = "Build, upload and ingest Preservica submission packages")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build a submission package from one or more files.
    Build(build::BuildArgs),
    /// Bulk-upload serialized packages to an object store.
    Upload(upload::UploadArgs),
    /// Stream one package to the preservation service and close the session.
    Ingest(ingest::IngestArgs),
    /// Manage stored credential profiles.
    Config(config::ConfigArgs),
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            exit_codes::CONFIG_ERROR
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Build(args) => build::run(args),
        Command::Upload(args) => upload::run(args).await,
        Command::Ingest(args) => ingest::run(args).await,
        Command::Config(args) => config::run(args),
    }
}
