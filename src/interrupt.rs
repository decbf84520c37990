use super::Result;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{select_all, StreamExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::SignalStream;
use tracing::info;

// SIGINT and SIGTERM.
static SIGNALS: [SignalKind; 2] = [SignalKind::from_raw(2), SignalKind::from_raw(15)];

/// Shared cancellation flag: false initially, set at most once, never
/// cleared. Loops check it at iteration boundaries only, so cancellation
/// latency is bounded by the largest single poll budget in use.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Background task that sets the cancellation token on the first interrupt.
/// The task does nothing else; teardown and verification run on the main
/// flow once the loops observe the flag.
pub struct InterruptWatcher {
    handle: JoinHandle<()>,
}

impl InterruptWatcher {
    pub fn spawn(token: CancelToken) -> Result<Self> {
        let mut streams = Vec::with_capacity(SIGNALS.len());
        for kind in &SIGNALS {
            streams.push(SignalStream::new(signal(*kind)?));
        }
        let mut merged = select_all(streams);

        let handle = tokio::spawn(async move {
            if merged.next().await.is_some() {
                info!("interrupt received, stopping at the next loop boundary");
                token.cancel();
            }
        });
        Ok(Self { handle })
    }
}

impl Drop for InterruptWatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
