//! Join Server race
//!
//! A federation route has several Join Servers, and usually only one of them
//! knows the device. The request is sent to all of them at once:
//!
//! - the first `Success` wins;
//! - an authoritative error (the peer knows the device and refused) ends the
//!   race immediately;
//! - any other error waits for the remaining peers. When nobody succeeds,
//!   the first error by arrival is returned, tagged consensus-unknown when
//!   every peer said it does not know the device.
//!
//! Losers are cancelled and drained before the race returns.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info};

use interop_common::{metrics, CallContext, InteropError, Result};

/// Outcome of a race that nobody won
#[derive(Debug)]
pub struct RaceFailure {
    pub error: InteropError,
    /// Every participant answered unknown-DevEUI or unknown-DevAddr
    pub consensus_unknown: bool,
}

impl From<RaceFailure> for InteropError {
    fn from(failure: RaceFailure) -> Self {
        failure.error
    }
}

/// Run `call` against every participant concurrently.
pub async fn race<P, T, F, Fut>(
    ctx: &CallContext,
    participants: &[Arc<P>],
    call: F,
) -> std::result::Result<T, RaceFailure>
where
    P: Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(CallContext, Arc<P>) -> Fut,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    if participants.is_empty() {
        return Err(RaceFailure {
            error: InteropError::internal("no Join Servers to race"),
            consensus_unknown: false,
        });
    }

    let race_ctx = ctx.child();
    let mut set = JoinSet::new();
    for participant in participants {
        set.spawn(call(race_ctx.child(), Arc::clone(participant)));
    }

    let mut errors: Vec<InteropError> = Vec::new();
    let outcome = loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                break Err(RaceFailure {
                    error: InteropError::canceled(),
                    consensus_unknown: false,
                });
            }
            next = set.join_next() => match next {
                Some(Ok(Ok(value))) => break Ok(value),
                Some(Ok(Err(err))) if err.kind().is_authoritative() => {
                    debug!(
                        correlation_id = %ctx.correlation_id(),
                        kind = err.kind().as_str(),
                        "Authoritative answer ends Join Server race"
                    );
                    break Err(RaceFailure {
                        error: err,
                        consensus_unknown: false,
                    });
                }
                Some(Ok(Err(err))) => errors.push(err),
                Some(Err(join_err)) => errors.push(
                    InteropError::internal("race participant failed").with_source(join_err),
                ),
                None => {
                    let consensus_unknown = errors.iter().all(|e| e.kind().is_unknown_device());
                    let error = if errors.is_empty() {
                        InteropError::internal("Join Server race ended without answers")
                    } else {
                        errors.remove(0)
                    };
                    break Err(RaceFailure {
                        error,
                        consensus_unknown,
                    });
                }
            }
        }
    };

    race_ctx.cancel();
    set.abort_all();
    while set.join_next().await.is_some() {}

    match &outcome {
        Ok(_) => metrics::record_race("success"),
        Err(failure) if failure.consensus_unknown => {
            info!(
                correlation_id = %ctx.correlation_id(),
                participants = participants.len(),
                "No Join Server knows the device"
            );
            metrics::record_race("consensus_unknown");
        }
        Err(_) => metrics::record_race("error"),
    }
    outcome
}
