use clap::Parser;
use tracing_subscriber::EnvFilter;

use pharmacy_agent::App;
use pharmacy_agent::cli::{self, Cli, Command};
use pharmacy_agent::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let mut config = Config::from_env()?;
    init_tracing(config.json_logs);

    match cli.command.unwrap_or_default() {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            tracing::info!(
                environment = %config.environment,
                "Starting pharmacy agent v{}",
                env!("CARGO_PKG_VERSION")
            );
            let app = App::from_config(config)?;
            app.serve(shutdown_signal()).await?;
        }
        Command::Lookup { phone } => {
            let app = App::from_config(config)?;
            cli::run_lookup(&app, &phone).await?;
        }
        Command::Config { filter } => cli::run_config_command(&config, filter.as_deref())?,
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pharmacy_agent=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
