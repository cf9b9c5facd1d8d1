use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Bold smart-lock daemon
#[derive(Debug, Parser)]
#[command(name = "bold", version, about)]
pub struct Cli {
    /// Directory holding configuration.yaml and .storage/
    #[arg(short, long, default_value = ".")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Set up every entry and keep polling until interrupted (default)
    Run,

    /// Add an account through the login flow
    Login {
        /// Account email, prompted when missing
        #[arg(long)]
        email: Option<String>,
    },

    /// Print the state of every entity
    Status,

    /// Lock (deactivate) a device
    Lock { entity_id: String },

    /// Unlock (activate) a device
    Unlock { entity_id: String },

    /// Press an activation button
    Press { entity_id: String },

    /// Delete an entry with its entities and devices
    Remove { entry_id: String },
}

impl Cli {
    pub fn into_parts(self) -> (PathBuf, Command) {
        (self.config, self.command.unwrap_or(Command::Run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_run() {
        let (config, command) = Cli::parse_from(["bold"]).into_parts();
        assert!(matches!(command, Command::Run));
        assert_eq!(config, PathBuf::from("."));
    }

    #[test]
    fn test_unlock_with_config_dir() {
        let cli = Cli::parse_from(["bold", "-c", "/etc/bold", "unlock", "lock.front_door"]);
        let (config, command) = cli.into_parts();
        assert_eq!(config, PathBuf::from("/etc/bold"));
        match command {
            Command::Unlock { entity_id } => assert_eq!(entity_id, "lock.front_door"),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
