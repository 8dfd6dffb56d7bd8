use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::error::{FillyError, FillyResult, TerminationReason};

#[derive(Debug, Default)]
struct TokenState {
    reason: Option<TerminationReason>,
    deadline: Option<Instant>,
}

/// Shared stop flag, polled at loop checkpoints and at every clock tick.
///
/// Clones observe the same flag. The first cancellation reason wins.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<TokenState>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Default::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cancel(&self, reason: TerminationReason) {
        let mut state = self.lock();
        if state.reason.is_none() {
            state.reason = Some(reason);
        }
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<TerminationReason> {
        self.lock().reason
    }

    /// Past this instant, the next [`check`](Self::check) cancels with `Timeout`.
    pub fn set_deadline(&self, deadline: Option<Instant>) {
        self.lock().deadline = deadline;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.lock().deadline
    }

    /// `Err(Terminated)` once cancelled or past the deadline.
    pub fn check(&self) -> FillyResult<()> {
        if !self.is_cancelled() {
            let expired = self
                .deadline()
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false);
            if !expired {
                return Ok(());
            }
            self.cancel(TerminationReason::Timeout);
        }
        let reason = self.reason().unwrap_or(TerminationReason::Stopped);
        Err(FillyError::Terminated(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_reason_wins() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        let clone = token.clone();
        clone.cancel(TerminationReason::Stopped);
        token.cancel(TerminationReason::Timeout);
        assert!(token.is_cancelled());
        assert_eq!(
            token.check(),
            Err(FillyError::Terminated(TerminationReason::Stopped))
        );
    }

    #[test]
    fn expired_deadline_cancels_with_timeout() {
        let token = CancellationToken::new();
        token.set_deadline(Some(Instant::now() - Duration::from_millis(1)));
        assert_eq!(
            token.check(),
            Err(FillyError::Terminated(TerminationReason::Timeout))
        );
        assert_eq!(token.reason(), Some(TerminationReason::Timeout));
    }

    #[test]
    fn future_deadline_does_not_cancel() {
        let token = CancellationToken::new();
        token.set_deadline(Some(Instant::now() + Duration::from_secs(60)));
        assert!(token.check().is_ok());
        assert!(!token.is_cancelled());
    }
}
