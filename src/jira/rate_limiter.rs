use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::sleep;

/// Enforces a minimum gap between consecutive requests to the tracker.
/// Clones share the same clock.
#[derive(Clone, Debug)]
pub struct RequestPacer {
    cooldown: Duration,
    last_call: Arc<Mutex<Option<Instant>>>,
}

impl RequestPacer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_call: Arc::new(Mutex::new(None)),
        }
    }

    /// Wait out whatever remains of the cooldown, then stamp this call.
    pub async fn wait(&self) {
        if self.cooldown.is_zero() {
            return;
        }
        let mut guard = self.last_call.lock().await;
        if let Some(last) = *guard {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                sleep(self.cooldown - elapsed).await;
            }
        }
        *guard = Some(Instant::now());
    }
}
