//! Builds the transport message for one call.

use std::collections::HashMap;

use crate::broker::WireMessage;
use crate::config::{OutgoingMessage, ResponseExpectation};

/// Assemble the outgoing wire message. Duplicate property keys resolve
/// last-write-wins; the correlation token is set only when the caller expects
/// a reply. Pure, no side effects.
pub fn build(message: &OutgoingMessage, response: Option<&ResponseExpectation>) -> WireMessage {
    let mut headers = HashMap::with_capacity(message.properties.len());
    for property in &message.properties {
        headers.insert(property.key.clone(), property.value.clone());
    }
    WireMessage {
        payload: message.payload.clone().into_bytes(),
        content_type: message.content_type.clone(),
        headers,
        correlation: response.map(|expect| expect.correlation.clone()),
    }
}
