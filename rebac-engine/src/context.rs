use crate::error::{EngineError, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-call cancellation/deadline context threaded through every evaluation.
///
/// Replaces any ambient global state: each Check/Expand/Lookup call carries
/// its own context, and every recursive query and sub-evaluation observes it
/// before doing work.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancel: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Context that cancels itself once `deadline` elapses.
    ///
    /// Must be created inside a tokio runtime.
    pub fn with_deadline(deadline: Duration) -> Self {
        let cancel = CancellationToken::new();
        let timer = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            timer.cancel();
        });
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns `Cancelled` once the signal fired; checked at every node entry
    /// and before every store query.
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }
}
