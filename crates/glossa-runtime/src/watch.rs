//! File-change debouncing.
//!
//! The bus delivers raw `File` events from whatever watcher the host
//! runs. This task filters them to the channel's watched extensions and
//! applies a trailing-edge debounce: the first matching event opens a
//! window, further matches push the deadline out, and one `HostRestart`
//! is published per quiet period.

use crate::bus::{BusEvent, EventBus};
use glossa_types::WorkerConfig;
use std::path::Path;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the debounce loop until `cancel` fires.
pub(crate) async fn run(bus: EventBus, config: WorkerConfig, cancel: CancellationToken) {
    let mut rx = bus.subscribe();
    let window = config.debounce_window();

    loop {
        // Idle: wait for the first matching change.
        match recv_event(&mut rx, &cancel).await {
            Recv::Event(path) if matches(&config, &path) => {}
            Recv::Event(_) | Recv::Skip => continue,
            Recv::Stop => return,
        }

        // Window open: extend on every further match, fire on quiet.
        let mut deadline = tokio::time::Instant::now() + window;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep_until(deadline) => {
                    info!(language = config.language(), "script change settled, requesting host restart");
                    bus.publish(BusEvent::HostRestart);
                    break;
                }
                event = rx.recv() => match event {
                    Ok(BusEvent::File { path }) if matches(&config, &path) => {
                        debug!(path = %path.display(), "script change during debounce window");
                        deadline = tokio::time::Instant::now() + window;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "file watcher lagged behind the bus");
                        deadline = tokio::time::Instant::now() + window;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
    }
}

enum Recv {
    Event(std::path::PathBuf),
    Skip,
    Stop,
}

async fn recv_event(rx: &mut broadcast::Receiver<BusEvent>, cancel: &CancellationToken) -> Recv {
    tokio::select! {
        () = cancel.cancelled() => Recv::Stop,
        event = rx.recv() => match event {
            Ok(BusEvent::File { path }) => Recv::Event(path),
            Ok(_) => Recv::Skip,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(missed = n, "file watcher lagged behind the bus");
                Recv::Skip
            }
            Err(broadcast::error::RecvError::Closed) => Recv::Stop,
        },
    }
}

fn matches(config: &WorkerConfig, path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| config.watches_extension(&format!(".{ext}")))
}
