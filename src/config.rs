//! Call request model.
//!
//! One `CallRequest` describes one call end to end: where to connect, what to
//! publish, and whether (and how long) to wait for a correlated reply. The
//! CLI deserializes this from a TOML file; library callers build it directly.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::Deserialize;

fn default_port() -> u16 {
    5672
}

fn default_tls() -> bool {
    true
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Where and how to reach the broker. Owned by exactly one call and discarded
/// after its session closes.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_tls")]
    pub tls: bool,
}

/// One application-defined header on the outgoing message.
#[derive(Debug, Clone, Deserialize)]
pub struct AppProperty {
    pub key: String,
    pub value: String,
}

/// The message to publish. Built once per call, immutable thereafter.
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingMessage {
    pub queue: String,
    pub payload: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default)]
    pub properties: Vec<AppProperty>,
}

/// Opt-in to request/response mode: which queue the reply arrives on, the
/// token it must echo, and how long the caller is willing to block.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseExpectation {
    pub queue: String,
    pub correlation: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ResponseExpectation {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Everything one call needs. `response: None` means fire-and-forget.
#[derive(Debug, Clone, Deserialize)]
pub struct CallRequest {
    pub connection: ConnectionParams,
    pub message: OutgoingMessage,
    #[serde(default)]
    pub response: Option<ResponseExpectation>,
}

impl CallRequest {
    /// Validate the request for common misconfigurations.
    pub fn validate(&self) -> Result<()> {
        if self.connection.host.is_empty() {
            bail!("connection.host must not be empty");
        }
        if self.connection.port == 0 {
            bail!("connection.port must be > 0");
        }
        if self.message.queue.is_empty() {
            bail!("message.queue must not be empty");
        }
        if let Some(response) = &self.response {
            if response.queue.is_empty() {
                bail!("response.queue must not be empty");
            }
            // An empty token would "match" any reply that carries an empty
            // correlation slot, which is never what the caller meant.
            if response.correlation.is_empty() {
                bail!("response.correlation must not be empty");
            }
            if response.timeout_secs == 0 {
                bail!("response.timeout_secs must be > 0");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_request() -> CallRequest {
        CallRequest {
            connection: ConnectionParams {
                host: "mq.internal".into(),
                port: 5672,
                username: "guest".into(),
                password: "guest".into(),
                tls: true,
            },
            message: OutgoingMessage {
                queue: "orders".into(),
                payload: r#"{"x":1}"#.into(),
                content_type: "application/json".into(),
                properties: vec![],
            },
            response: None,
        }
    }

    #[test]
    fn request_validation_accepts_valid() {
        assert!(valid_request().validate().is_ok());
    }

    #[test]
    fn request_validation_rejects_empty_host() {
        let mut request = valid_request();
        request.connection.host = String::new();
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("connection.host"));
    }

    #[test]
    fn request_validation_rejects_zero_port() {
        let mut request = valid_request();
        request.connection.port = 0;
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("connection.port"));
    }

    #[test]
    fn request_validation_rejects_empty_queue() {
        let mut request = valid_request();
        request.message.queue = String::new();
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("message.queue"));
    }

    #[test]
    fn request_validation_rejects_empty_correlation_token() {
        let mut request = valid_request();
        request.response = Some(ResponseExpectation {
            queue: "replies".into(),
            correlation: String::new(),
            timeout_secs: 10,
        });
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("response.correlation"));
    }

    #[test]
    fn request_validation_rejects_zero_timeout() {
        let mut request = valid_request();
        request.response = Some(ResponseExpectation {
            queue: "replies".into(),
            correlation: "abc-123".into(),
            timeout_secs: 0,
        });
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("response.timeout_secs"));
    }

    #[test]
    fn request_file_defaults_apply() {
        let request: CallRequest = toml::from_str(
            r#"
            [connection]
            host = "mq.internal"
            username = "guest"
            password = "guest"

            [message]
            queue = "orders"
            payload = '{"x":1}'
            "#,
        )
        .unwrap();

        assert_eq!(request.connection.port, 5672);
        assert!(request.connection.tls);
        assert_eq!(request.message.content_type, "application/json");
        assert!(request.message.properties.is_empty());
        assert!(request.response.is_none());
    }

    #[test]
    fn request_file_parses_response_section() {
        let request: CallRequest = toml::from_str(
            r#"
            [connection]
            host = "mq.internal"
            username = "guest"
            password = "guest"

            [message]
            queue = "orders"
            payload = "ping"

            [[message.properties]]
            key = "locale"
            value = "en-US"

            [response]
            queue = "replies"
            correlation = "abc-123"
            timeout_secs = 2
            "#,
        )
        .unwrap();

        let response = request.response.unwrap();
        assert_eq!(response.queue, "replies");
        assert_eq!(response.correlation, "abc-123");
        assert_eq!(response.timeout(), Duration::from_secs(2));
        assert_eq!(request.message.properties.len(), 1);
        assert_eq!(request.message.properties[0].key, "locale");
    }
}
