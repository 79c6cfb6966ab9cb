//! Cooperative cancellation token
//!
//! Cancellation is cooperative: long operations call `checkpoint()` at
//! stage boundaries. A token flipped mid-stage takes effect at the next
//! checkpoint rather than killing the session mid-flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{QuillcastError, Result};

#[derive(Clone, Default)]
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

    /// Err(Cancelled) once the token has been flipped.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuillcastError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Reset for the next run. Tokens are reused across runs by the scheduler.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Relaxed);
    }

    /// Sleep in short slices so a cancel request lands within one slice.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        const SLICE: Duration = Duration::from_millis(250);
        let mut remaining = duration;
        loop {
            self.checkpoint()?;
            if remaining.is_zero() {
                return Ok(());
            }
            let step = SLICE.min(remaining);
            tokio::time::sleep(step).await;
            remaining -= step;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_passes_until_cancelled() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());

        token.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(
            token.checkpoint(),
            Err(QuillcastError::Cancelled)
        ));
    }

    #[test]
    fn test_reset_clears_cancellation() {
        let token = CancelToken::new();
        token.cancel();
        token.reset();
        assert!(token.checkpoint().is_ok());
    }

    #[test]
    fn test_clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_sleep_aborts_on_cancel() {
        let token = CancelToken::new();
        let sleeper = token.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(30)).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(QuillcastError::Cancelled)));
    }

    #[tokio::test]
    async fn test_sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(10)).await.is_ok());
    }
}
