//! One request/response call against the broker.
//!
//! Pipeline: connect, build the envelope, publish, and, when a reply is
//! expected, subscribe on the response queue and wait, bounded, for the
//! correlated delivery. The session is closed on every exit path, and every
//! failure is converted to an `Error` outcome at this boundary.

pub mod correlate;
pub mod envelope;
pub mod project;

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::broker::{BrokerClient, BrokerSession, Delivery};
use crate::config::{CallRequest, ResponseExpectation};

use self::correlate::Correlator;
pub use self::project::{CapturedResponse, Header};

/// Failure stages. All surface identically: caught once at the call
/// boundary, surfaced as an `Error` outcome, never retried.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

/// Terminal state of one call. Exactly one variant per call.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Published; carries the reply when one was expected and matched.
    Done {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<CapturedResponse>,
    },
    /// A reply was expected but the deadline elapsed without a match.
    Timeout,
    /// Something broke at some stage; the message carries the diagnostics.
    Error { message: String },
}

/// Run one call to completion. Never fails and never hangs: every stage
/// error becomes `Outcome::Error`, the wait is bounded, and the session is
/// torn down before this returns.
pub async fn execute(client: &dyn BrokerClient, request: &CallRequest) -> Outcome {
    match run(client, request).await {
        Ok(outcome) => outcome,
        Err(e) => Outcome::Error {
            message: e.to_string(),
        },
    }
}

/// Session scope: everything between a successful connect and the matching
/// close. `close()` runs no matter how `drive` exits.
async fn run(client: &dyn BrokerClient, request: &CallRequest) -> Result<Outcome, CallError> {
    let session = client
        .connect(&request.connection)
        .await
        .map_err(|e| CallError::Connect(format!("{e:#}")))?;
    debug!(host = %request.connection.host, "session open");

    let result = drive(session.as_ref(), request).await;

    if let Err(e) = session.close().await {
        warn!("session close failed: {e:#}");
    }
    result
}

async fn drive(session: &dyn BrokerSession, request: &CallRequest) -> Result<Outcome, CallError> {
    let wire = envelope::build(&request.message, request.response.as_ref());
    session
        .publish(&request.message.queue, &wire)
        .await
        .map_err(|e| CallError::Publish(format!("{e:#}")))?;
    debug!(queue = %request.message.queue, "published");

    let Some(expect) = &request.response else {
        return Ok(Outcome::Done { response: None });
    };

    let (correlator, matched) = Correlator::new(&expect.correlation);
    let subscription = session
        .subscribe(&expect.queue, correlator.handler())
        .await
        .map_err(|e| CallError::Subscribe(format!("{e:#}")))?;

    let captured = wait_for_match(matched, &correlator, expect).await;

    if let Err(e) = subscription.cancel().await {
        warn!("subscription cancel failed: {e:#}");
    }

    match captured {
        Some(delivery) => Ok(Outcome::Done {
            response: Some(project::project(delivery)?),
        }),
        None => Ok(Outcome::Timeout),
    }
}

/// Bound the wait for the correlator's single completion signal. On expiry
/// the slot is sealed before returning, so a delivery racing the deadline can
/// never be captured. No retries, no deadline extension.
async fn wait_for_match(
    matched: oneshot::Receiver<Delivery>,
    correlator: &Correlator,
    expect: &ResponseExpectation,
) -> Option<Delivery> {
    match tokio::time::timeout(expect.timeout(), matched).await {
        Ok(Ok(delivery)) => Some(delivery),
        // The sender only drops when the slot is sealed, which this function
        // alone does; treat a closed channel as a missed deadline.
        Ok(Err(_)) => None,
        Err(_) => {
            correlator.seal();
            debug!(
                timeout_secs = expect.timeout_secs,
                "no correlated reply before the deadline"
            );
            None
        }
    }
}
