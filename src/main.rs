use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use fds_engine::Config;
use fds_engine::bootstrap;
use fds_engine::csv::{ReplyWriter, read_attempts};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

/// Evaluate a csv file of login, logout, transfer and risk report attempts.
#[derive(Debug, Parser)]
#[command(name = "fds-engine", version)]
struct Cli {
    /// Attempts file, one attempt per row.
    attempts: PathBuf,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    config.logging.init();

    if cli.attempts.extension().is_none_or(|ext| ext != "csv") {
        warn!(path = %cli.attempts.display(), "input file seems to not be a csv file");
    }

    let attempts = match read_attempts(&cli.attempts) {
        Ok(attempts) => attempts,
        Err(e) => {
            error!(path = %cli.attempts.display(), "{e}");
            return ExitCode::FAILURE;
        }
    };

    let app = bootstrap::build(&config);
    let (attempt_sender, attempt_receiver) = tokio::sync::mpsc::channel(16);

    tokio::spawn(async move {
        for result in attempts {
            match result {
                Ok(attempt) => {
                    if attempt_sender.send(attempt).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("{e}");
                }
            }
        }
    });

    let mut writer = ReplyWriter::new(io::stdout());
    app.engine
        .run(ReceiverStream::new(attempt_receiver), |attempt, reply| {
            if let Err(e) = writer.write(attempt, &reply) {
                error!("{e}");
            }
        })
        .await;

    let flushed = writer.flush();
    app.shutdown().await;

    if let Err(e) = flushed {
        error!(error = %e, "failed to flush replies");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
