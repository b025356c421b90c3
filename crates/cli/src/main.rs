use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use belay_core::OperationRequest;
use belay_dispatch::{Dispatcher, OPERATIONS};
use belay_kubehub::DynClient;
use clap::{Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "belayctl", version, about = "Belay CLI: declarative cluster operations")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Path to kubeconfig (default: ~/.kube/config)
    #[arg(long = "kubeconfig", env = "KUBECONFIG", global = true)]
    kubeconfig: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch a single named operation with a JSON argument object
    Op {
        /// Operation name, e.g. createNamespace or wait
        name: String,
        /// JSON argument object
        #[arg(long = "args", default_value = "{}")]
        args: String,
    },
    /// List the operations this binary serves
    Ops,
}

fn init_tracing() {
    let env = std::env::var("BELAY_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("BELAY_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid BELAY_METRICS_ADDR; expected host:port");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Ops => {
            for op in OPERATIONS {
                println!("{op}");
            }
            Ok(())
        }
        Commands::Op { name, args } => {
            let args: serde_json::Value =
                serde_json::from_str(&args).map_err(|e| anyhow::anyhow!("parsing --args: {e}"))?;

            let client = DynClient::from_kubeconfig(cli.kubeconfig.as_deref()).await?;
            let kubeconfig = client.kubeconfig_path().to_path_buf();
            let dispatcher = Dispatcher::new(Arc::new(client), Some(kubeconfig));

            // Ctrl-C cancels the in-flight operation (waits return promptly
            // as canceled instead of running to their deadline).
            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupt received; canceling in-flight operation");
                    on_interrupt.cancel();
                }
            });

            let req = OperationRequest::new(name, args);
            let result = dispatcher.dispatch(&req, &cancel).await?;

            match cli.output {
                Output::Json => println!("{}", serde_json::to_string_pretty(&result)?),
                Output::Human => {
                    if result.success {
                        println!("{}", result.message);
                    } else {
                        eprintln!("error: {}", result.message);
                    }
                    if let Some(outputs) = &result.outputs {
                        for (k, v) in outputs {
                            println!("{k} = {v}");
                        }
                    }
                }
            }
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
