use std::io::BufRead;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Reads one line on a detached thread so a pending read never holds up
/// runtime shutdown. The receiver errors when the reader hits EOF or fails.
pub fn spawn_console_reader<R>(mut reader: R) -> oneshot::Receiver<()>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("console-stop".into())
        .spawn(move || {
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(n) if n > 0 => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to read from console: {}", e),
            }
        });
    if let Err(e) = spawned {
        warn!("Failed to start console reader: {}", e);
    }
    rx
}

/// Resolves on Ctrl-C, or when `console` delivers a line.
pub async fn wait_for_stop(shutdown: CancellationToken, console: oneshot::Receiver<()>) {
    let console = async {
        // Closed or unreadable stdin: only Ctrl-C can stop us
        if console.await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = ctrl_c => info!("Ctrl-C received, stopping..."),
        _ = console => info!("Stop requested from console, stopping..."),
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
}
