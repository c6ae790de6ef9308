use clap::{Args, Subcommand};
use sip_config::{Config, Profile};

use crate::exit_codes;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// List the profiles stored in `~/.preservica/config.json`.
    List,
    /// Write (or overwrite) one profile's credentials.
    Set {
        profile: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Remove a profile.
    Remove { profile: String },
}

pub fn run(args: ConfigArgs) -> anyhow::Result<i32> {
    let path = Config::default_path()?;

    match args.cmd {
        ConfigCommand::List => {
            let config = Config::load(&path)?;
            for name in config.profile_names() {
                println!("{name}");
            }
        }
        ConfigCommand::Set {
            profile,
            host,
            tenant,
            username,
            password,
        } => {
            let mut config = Config::load(&path)?;
            config.set_profile(
                profile,
                Profile {
                    host: Some(host),
                    tenant: Some(tenant),
                    username: Some(username),
                    password: Some(password),
                },
            );
            config.save(&path)?;
        }
        ConfigCommand::Remove { profile } => {
            let mut config = Config::load(&path)?;
            config.remove_profile(&profile);
            config.save(&path)?;
        }
    }
    Ok(exit_codes::OK)
}
