use std::path::PathBuf;

use clap::Parser;
use kvwatch::client::Action;
use kvwatch::{Client, ClientConfig, Response};
use tokio::signal::ctrl_c;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct App {
    /// Comma separated store endpoints, e.g. http://127.0.0.1:2379,http://127.0.0.1:22379
    #[clap(long, global = true, env = "KVWATCH_ENDPOINTS")]
    endpoints: Option<String>,

    /// TOML file with client settings.
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Per-request timeout in milliseconds.
    #[clap(long, global = true)]
    timeout_ms: Option<u64>,

    #[clap(long, global = true, default_value = "warn", env = "KVWATCH_LOG")]
    log_level: tracing_subscriber::filter::LevelFilter,

    #[clap(long, global = true, value_enum, default_value = "text")]
    output: Output,

    #[clap(subcommand)]
    subcmd: Action,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Output {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = App::parse();
    kvwatch::logging::init(app.log_level)?;

    let mut config = ClientConfig::load(app.config.as_deref())?;
    if let Some(endpoints) = app.endpoints {
        config.endpoints = vec![endpoints];
    }
    if let Some(timeout_ms) = app.timeout_ms {
        config.request_timeout_ms = timeout_ms;
    }
    let client = Client::connect(config)?;
    let output = app.output;

    match app.subcmd {
        Action::Get { key } => {
            let response = client.get(&key).await?;
            let value = response.value.clone().unwrap_or_default();
            emit(output, &response, Some(format!("got value={value} for key={key}")));
        }
        Action::Set {
            key,
            value,
            prev_index,
        } => {
            let response = match prev_index {
                Some(index) => client.compare_and_set(&key, value, index).await?,
                None => client.set(&key, value).await?,
            };
            emit(output, &response, None);
        }
        Action::Delete { key, prev_index } => {
            let response = match prev_index {
                Some(index) => client.compare_and_delete(&key, index).await?,
                None => client.delete(&key).await?,
            };
            emit(output, &response, None);
        }
        Action::Watch { key, after_index } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                match ctrl_c().await {
                    Ok(_) => {
                        info!("Received shutdown signal");
                        on_signal.cancel();
                    }
                    Err(e) => error!("Error receiving Ctrl-C: {e}"),
                };
            });

            client
                .watch(&key, after_index)
                .run(
                    |change| {
                        let text = match &change.value {
                            Some(value) => format!("got value={value} while watching key={key}"),
                            None => format!("key={key} removed ({}) while watching", change.action),
                        };
                        emit(output, change, Some(text));
                    },
                    cancel,
                )
                .await?;
        }
    }

    Ok(())
}

fn emit(output: Output, response: &Response, text: Option<String>) {
    match output {
        Output::Text => {
            if let Some(text) = text {
                println!("{text}");
            }
        }
        Output::Json => match serde_json::to_string(response) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Unable to encode response: {e}"),
        },
    }
}
