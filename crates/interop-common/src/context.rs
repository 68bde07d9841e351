//! Per-call context: correlation ID, deadline and cancellation
//!
//! A `CallContext` travels with every inbound request and every outbound RPC.
//! Children share the deadline and are cancelled with their parent.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

use crate::error::{InteropError, Result};

#[derive(Debug, Clone)]
pub struct CallContext {
    correlation_id: String,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Context with a fresh UUIDv4 correlation ID
    pub fn background() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    /// Bound the context by a timeout; an earlier deadline is kept
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.with_deadline(deadline)
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) if current < deadline => current,
            _ => deadline,
        });
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, zero when it has passed
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Derived context, cancelled together with this one
    pub fn child(&self) -> Self {
        Self {
            correlation_id: self.correlation_id.clone(),
            deadline: self.deadline,
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Run a future under this context.
    ///
    /// Cancellation yields `canceled`, an expired deadline `deadline-exceeded`.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let bounded = async {
            match self.deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, fut)
                    .await
                    .map_err(|_| InteropError::deadline_exceeded())?,
                None => fut.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(InteropError::canceled()),
            res = bounded => res,
        }
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::background()
    }
}
