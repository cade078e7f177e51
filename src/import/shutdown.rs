use anyhow::{Context, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLEEP_POLL: Duration = Duration::from_millis(50);

/// Cooperative stop flag shared between the signal handler and the run loop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless cancelled first. Returns `false` when the
    /// wait was cut short. A duration past the clock's range waits until
    /// cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let step = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    SLEEP_POLL.min(deadline - now)
                }
                None => SLEEP_POLL,
            };
            thread::sleep(step);
        }
    }
}

pub struct ShutdownCoordinator;

impl ShutdownCoordinator {
    /// Route SIGINT/SIGTERM to a fresh token. Only one handler may be
    /// installed per process.
    pub fn install() -> Result<CancellationToken> {
        let token = CancellationToken::new();
        let handler_token = token.clone();
        ctrlc::set_handler(move || {
            if !handler_token.is_cancelled() {
                tracing::warn!("interrupt received; finishing current date before stopping");
            }
            handler_token.cancel();
        })
        .context("failed to install interrupt handler")?;
        Ok(token)
    }
}
