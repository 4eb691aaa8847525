//! Projects a captured raw delivery into the structured call result.

use serde::Serialize;

use super::CallError;
use crate::broker::Delivery;

/// One decoded header from the reply, in delivery order.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Header {
    pub key: String,
    pub value: String,
}

/// The structured reply: decoded body (absent when the wire payload was
/// empty), content-type verbatim, headers in the order the broker iterated
/// them.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CapturedResponse {
    pub body: Option<String>,
    pub content_type: Option<String>,
    pub headers: Vec<Header>,
}

/// Decode the raw delivery. Bytes that are not valid UTF-8, in the body or
/// in any header value, are a `Decode` failure, never silently dropped or
/// substituted.
pub fn project(delivery: Delivery) -> Result<CapturedResponse, CallError> {
    let body = if delivery.payload.is_empty() {
        None
    } else {
        Some(String::from_utf8(delivery.payload).map_err(|e| {
            CallError::Decode(format!("response body is not valid UTF-8: {e}"))
        })?)
    };

    let mut headers = Vec::with_capacity(delivery.headers.len());
    for (key, raw) in delivery.headers {
        let value = String::from_utf8(raw).map_err(|e| {
            CallError::Decode(format!("header '{key}' is not valid UTF-8: {e}"))
        })?;
        headers.push(Header { key, value });
    }

    Ok(CapturedResponse {
        body,
        content_type: delivery.content_type,
        headers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_empty_payload_decodes_to_body() {
        let response = project(Delivery {
            payload: b"pong".to_vec(),
            content_type: Some("text/plain".into()),
            ..Delivery::default()
        })
        .unwrap();

        assert_eq!(response.body.as_deref(), Some("pong"));
        assert_eq!(response.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn empty_payload_leaves_body_absent() {
        let response = project(Delivery::default()).unwrap();
        assert!(response.body.is_none());
    }

    #[test]
    fn headers_decode_in_delivery_order() {
        let response = project(Delivery {
            headers: vec![
                ("locale".into(), b"en-US".to_vec()),
                ("tenant".into(), b"acme".to_vec()),
            ],
            ..Delivery::default()
        })
        .unwrap();

        assert_eq!(
            response.headers,
            vec![
                Header {
                    key: "locale".into(),
                    value: "en-US".into()
                },
                Header {
                    key: "tenant".into(),
                    value: "acme".into()
                },
            ]
        );
    }

    #[test]
    fn non_utf8_header_value_is_a_decode_failure_naming_the_key() {
        let err = project(Delivery {
            headers: vec![("locale".into(), vec![0xff, 0xfe])],
            ..Delivery::default()
        })
        .unwrap_err();

        let message = err.to_string();
        assert!(message.contains("decode failed"));
        assert!(message.contains("locale"));
    }

    #[test]
    fn non_utf8_body_is_a_decode_failure() {
        let err = project(Delivery {
            payload: vec![0xff, 0xfe],
            ..Delivery::default()
        })
        .unwrap_err();

        assert!(err.to_string().contains("response body"));
    }
}
