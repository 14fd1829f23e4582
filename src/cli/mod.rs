//! Command-line interface.

use clap::{Parser, Subcommand};

use crate::app::App;
use crate::config::Config;
use crate::phone::CanonicalPhone;
use crate::records::Lookup;

#[derive(Parser, Debug)]
#[command(name = "pharmacy-agent")]
#[command(about = "Conversational pharmacy lookup and registration service", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the WebSocket gateway (default)
    Serve {
        /// Address to bind (overrides SERVER_HOST)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides SERVER_PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Look up one pharmacy by phone and print it as JSON
    Lookup {
        /// Phone number in any common format
        phone: String,
    },

    /// Print the resolved configuration
    Config {
        /// Show only keys with this prefix (e.g., "records", "session")
        #[arg(short, long)]
        filter: Option<String>,
    },
}

impl Default for Command {
    fn default() -> Self {
        Command::Serve {
            host: None,
            port: None,
        }
    }
}

/// Print configuration values, secrets redacted.
pub fn run_config_command(config: &Config, filter: Option<&str>) -> anyhow::Result<()> {
    let all = config.list();
    let max_key_len = all.iter().map(|(k, _)| k.len()).max().unwrap_or(0);

    println!("Configuration:");
    println!();
    for (key, value) in all {
        if filter.is_some_and(|f| !key.starts_with(f)) {
            continue;
        }
        println!("  {:width$}  {}", key, value, width = max_key_len);
    }
    Ok(())
}

/// Look up a phone through the cache and print the record.
pub async fn run_lookup(app: &App, phone: &str) -> anyhow::Result<()> {
    let key = CanonicalPhone::parse(phone)?;
    match app.cache.get_or_fetch(&key).await? {
        Lookup::Found(record) => {
            println!("{}", serde_json::to_string_pretty(record.as_ref())?);
        }
        Lookup::NotFound => {
            println!("No pharmacy found for {} (key {})", phone, key);
        }
    }
    Ok(())
}
