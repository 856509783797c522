use clap::Parser;
use server::agent::Agent;
use server::config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "postgres-monitor-agent")]
struct Args {
    /// Test that the agent is set up correctly and ship one report
    #[arg(long)]
    test: bool,

    /// Test that postgres logs reach the agent
    #[arg(long = "test-logs")]
    test_logs: bool,

    /// Load a local .env file before reading configuration
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.dev {
        if let Err(err) = dotenvy::dotenv() {
            eprintln!("Error loading .env file: {err}");
            std::process::exit(1);
        }
    }

    init_logging();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    if args.test || args.test_logs {
        config.set_test_mode();
    }

    let agent = Agent::new(config);

    if args.test {
        agent.test().await;
    } else if args.test_logs {
        agent.test_logs().await;
    } else {
        agent.run().await;
        shutdown_signal().await;
        info!("shutting down");
    }

    Ok(())
}

/// Filter on LOG_LEVEL with RUST_LOG taking precedence when set.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        EnvFilter::new(level)
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(%err, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let terminate = async {
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    error!(%err, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}
