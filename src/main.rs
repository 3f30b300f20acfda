use std::process::ExitCode;

use color_eyre::Result;
use padlink::config::Settings;
use padlink::engine::{run_engine, spawn_signal_listener, SetupError};
use padlink::usb::RusbBackend;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    setup()?;

    // Malformed config ends the process through color-eyre with code 1
    let settings = Settings::load().await?;

    let backend = match RusbBackend::new(settings.usb.clone()) {
        Ok(backend) => backend,
        Err(e) => return Ok(fail(SetupError::from(e))),
    };

    let cancel = CancellationToken::new();
    let _signals = spawn_signal_listener(cancel.clone());

    match run_engine(Box::new(backend), settings, cancel.clone()).await {
        Ok(summary) => {
            info!(
                "Stopped by {:?} after {} events ({} rumbles, {} sessions), ran {}s",
                summary.exit_reason,
                summary.stats.events,
                summary.stats.rumbles,
                summary.stats.sessions_opened,
                (summary.finished_at - summary.started_at).num_seconds()
            );
            match summary.to_toml() {
                Ok(rendered) => debug!("Run summary:\n{}", rendered),
                Err(e) => warn!("Cannot render run summary: {}", e),
            }
            cancel.cancel();
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Ok(fail(e)),
    }
}

fn fail(err: SetupError) -> ExitCode {
    error!("{}", err);
    ExitCode::from(err.exit_code())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}
