use std::sync::Arc;

use anyhow::anyhow;
use dotenvy::dotenv;
use tracing::info;

mod config;
mod feedback;
mod handlers;
mod llm;
mod utils;

use config::Config;
use feedback::FeedbackService;
use handlers::http::AppState;
use handlers::uploads::UploadStore;
use llm::HostedGateway;
use utils::http::build_http_client;
use utils::logging::init_logging;

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Chat,
    Serve { bind: Option<String> },
    Help,
}

fn usage() -> &'static str {
    "Usage: photo_feedback_assistant [chat]\n       photo_feedback_assistant serve [--bind <addr:port>]"
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    match args.get(1).map(|value| value.as_str()) {
        None | Some("chat") => {
            if let Some(extra) = args.get(2) {
                return Err(anyhow!("Unexpected argument: {extra}\n{}", usage()));
            }
            Ok(Command::Chat)
        }
        Some("serve") => {
            let mut bind = None;
            let mut index = 2;
            while index < args.len() {
                match args[index].as_str() {
                    "--bind" => {
                        index += 1;
                        let value = args
                            .get(index)
                            .ok_or_else(|| anyhow!("Missing value for --bind"))?;
                        bind = Some(value.clone());
                    }
                    "--help" | "-h" => return Ok(Command::Help),
                    other => {
                        return Err(anyhow!("Unknown serve argument: {other}\n{}", usage()));
                    }
                }
                index += 1;
            }
            Ok(Command::Serve { bind })
        }
        Some("--help") | Some("-h") | Some("help") => Ok(Command::Help),
        Some(other) => Err(anyhow!("Unknown command: {other}\n{}", usage())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    let command = parse_command(&args)?;
    if command == Command::Help {
        println!("{}", usage());
        return Ok(());
    }

    let config = Arc::new(Config::load()?);
    let serving = matches!(command, Command::Serve { .. });
    let _guards = init_logging(&config, serving);
    config.log_startup_warnings();

    let client = build_http_client(&config)?;
    let gateway = Arc::new(HostedGateway::from_config(&config, client));
    let service = Arc::new(FeedbackService::new(gateway, &config));
    info!(
        "Starting photo feedback assistant (chat_model={}, image_backend={}, image_model={})",
        config.chat_model,
        config.image_backend.as_str(),
        config.image_model()
    );

    match command {
        Command::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| config.bind_addr.clone());
            let state = AppState {
                service,
                uploads: UploadStore::from_config(&config),
            };
            handlers::http::serve(state, &bind).await
        }
        Command::Chat => handlers::console::run_stdio(&service).await,
        Command::Help => Ok(()),
    }
}
