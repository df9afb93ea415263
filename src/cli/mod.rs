//! Command-line interface.

pub mod args;
pub mod commands;

use std::sync::{Arc, OnceLock};

use tokio_util::sync::CancellationToken;

use crate::observability::StopReason;

/// Graceful-shutdown trigger shared between the signal handler and the
/// running command.
///
/// The first trigger wins; later triggers only cancel again.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    reason: Arc<OnceLock<StopReason>>,
}

impl Shutdown {
    /// Creates an untriggered shutdown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests shutdown for `reason`.
    pub fn trigger(&self, reason: StopReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    /// Token cancelled on shutdown.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Why shutdown happened; [`StopReason::Cancelled`] if not triggered
    /// through [`trigger`](Self::trigger).
    #[must_use]
    pub fn reason(&self) -> StopReason {
        self.reason.get().copied().unwrap_or(StopReason::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.token().is_cancelled());
        shutdown.trigger(StopReason::Terminated);
        shutdown.trigger(StopReason::Interrupted);
        assert!(shutdown.token().is_cancelled());
        assert_eq!(shutdown.reason(), StopReason::Terminated);
    }
}
