//! Interrupt wiring for the event loop's cancellation token

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancels `token` on Ctrl-C, or SIGTERM on Unix.
///
/// The listener stays installed after the first signal so repeats are
/// reported while shutdown is in progress. It exits early only when the
/// token is cancelled by someone else before any signal arrived.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut signals = match Signals::install() {
            Ok(signals) => signals,
            Err(e) => {
                error!("Cannot listen for signals: {}", e);
                return;
            }
        };

        let mut relayed = false;
        loop {
            tokio::select! {
                name = signals.next() => {
                    relayed |= relay_signal(&token, name);
                }
                _ = token.cancelled(), if !relayed => return,
            }
        }
    })
}

/// Cancels on the first signal; returns whether this call did the cancel
fn relay_signal(token: &CancellationToken, name: &str) -> bool {
    if token.is_cancelled() {
        warn!("Received {} again, shutdown already in progress", name);
        return false;
    }
    info!("Received {}, shutting down", name);
    token.cancel();
    true
}

#[cfg(unix)]
struct Signals {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    async fn next(&mut self) -> &'static str {
        tokio::select! {
            _ = self.sigterm.recv() => "SIGTERM",
            _ = self.sigint.recv() => "SIGINT",
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn install() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) -> &'static str {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        "Ctrl-C"
    }
}
