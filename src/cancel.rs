use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ReframeError, Result};

/// Cooperative cancellation flag shared between a caller and a running crop.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Cancellation and deadline checked once per processed frame.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub token: CancellationToken,
    pub deadline: Option<Instant>,
}

impl RunControl {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Fail if the run was cancelled or ran past its deadline.
    pub fn check(&self, frames_done: u64) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(ReframeError::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(ReframeError::DeadlineExceeded { frames: frames_done });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_visible_through_clones() {
        let token = CancellationToken::new();
        let control = RunControl::new(token.clone());
        assert!(control.check(0).is_ok());

        token.cancel();
        assert!(matches!(control.check(3), Err(ReframeError::Cancelled)));
    }

    #[test]
    fn test_expired_deadline() {
        let control = RunControl::default().with_timeout(Duration::ZERO);
        assert!(matches!(
            control.check(7),
            Err(ReframeError::DeadlineExceeded { frames: 7 })
        ));
    }
}
