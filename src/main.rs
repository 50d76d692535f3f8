use std::env;
use std::io;
use std::process::ExitCode;

use bank_eng::csv::{read_operations, write_accounts};
use bank_eng::replay::Replay;
use bank_eng::{Engine, EngineConfig};
use tokio_stream::wrappers::ReceiverStream;
use tracing::level_filters::LevelFilter;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::WARN.into()))
        .with_writer(std::io::stderr)
        .init();

    let mut args = env::args().skip(1);
    let Some(path) = args.next() else {
        error!("usage: bank-eng <operations.csv> [config.json]");
        return ExitCode::from(2);
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    let config = match args.next() {
        Some(config_path) => match EngineConfig::from_path(&config_path) {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => EngineConfig::default(),
    };

    let operations = match read_operations(path.clone()) {
        Ok(operations) => operations,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut replay = Replay::new(Engine::with_config(config));
    let (op_sender, op_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in operations {
            match result {
                Ok(op) => {
                    if op_sender.send(op).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    replay.run(ReceiverStream::new(op_receiver)).await;

    let accounts = replay.accounts();
    let rows = accounts.iter().map(|(name, view)| (name.as_str(), view));
    if let Err(e) = write_accounts(io::stdout().lock(), rows) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
