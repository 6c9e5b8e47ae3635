use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{Level, event};

/// Cooperative cancellation flag, checked by the executor between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    flag: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal that trips on the first Ctrl-C received by the process.
    ///
    /// Must be called inside a tokio runtime.
    pub fn on_ctrl_c() -> Self {
        let signal = Self::new();
        let flag = signal.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                event!(
                    Level::WARN,
                    "interrupt received, stopping after the current step"
                );
                flag.cancel();
            }
        });
        signal
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
