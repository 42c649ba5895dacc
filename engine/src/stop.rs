use std::sync::Arc;

use tokio::sync::watch;

/// Cancellation flag shared between the CLI's Ctrl-C handler and a render.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        StopSignal {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn raise(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal is raised.
    pub async fn raised(&self) {
        let mut rx = self.rx.clone();
        // The sender lives in `self`, so this only fails after a raise.
        let _ = rx.wait_for(|raised| *raised).await;
    }
}
