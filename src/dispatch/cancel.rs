//! Cooperative cancellation flag shared by the operator and the worker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

/// A set-once flag polled at every wait point and before each contact.
///
/// Clones share the same flag. Nothing is ever force-terminated: holders
/// check [`CancelToken::is_cancelled`] and wind down on their own.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The operator interrupted twice before the work wound down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stopped by a second interrupt")]
pub struct ForcedStop;

/// Drive `work` to completion while listening for operator interrupts.
///
/// The first interrupt sets `cancel` and keeps polling `work` so it can wind
/// down. A second one drops `work` and returns [`ForcedStop`].
pub async fn run_interruptible<T, W, I, F>(
    work: W,
    mut interrupts: I,
    cancel: &CancelToken,
) -> Result<T, ForcedStop>
where
    W: Future<Output = T>,
    I: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::pin!(work);
    let mut interrupted = false;
    loop {
        tokio::select! {
            output = &mut work => return Ok(output),
            () = interrupts() => {
                if interrupted {
                    warn!("second interrupt, abandoning the current contact");
                    return Err(ForcedStop);
                }
                interrupted = true;
                warn!("stop requested, finishing the current contact; interrupt again to quit now");
                cancel.cancel();
            }
        }
    }
}
