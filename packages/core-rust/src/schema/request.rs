//! Inbound transport descriptors.
//!
//! ```yaml
//! request:
//!   type: rabbitmq
//!   rabbitmq:
//!     queue: notes
//!     routing_key: notes.create
//!     message:
//!       operation:
//!         type: string
//!         required: true
//!         value: create
//! ```

use serde::{Deserialize, Serialize};

use crate::types::OperationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Rabbitmq,
    Http,
}

/// How messages for an operation arrive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestConfig {
    #[serde(rename = "type")]
    pub transport: Transport,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rabbitmq: Option<RabbitMqRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpRequest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RabbitMqRequest {
    pub queue: String,
    #[serde(default)]
    pub routing_key: String,
    pub message: MessageShape,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub path: String,
    #[serde(default = "default_http_method")]
    pub method: String,
    pub message: MessageShape,
}

fn default_http_method() -> String {
    "POST".to_string()
}

/// Describes the envelope of an inbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageShape {
    pub operation: OperationShape,
}

/// The `operation` discriminator every inbound message carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationShape {
    #[serde(rename = "type")]
    pub value_type: String,
    pub required: bool,
    pub value: OperationType,
}

impl RequestConfig {
    /// Checks that the payload for the declared transport is present and
    /// well formed. Returns a human-readable reason on failure.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        let shape = match self.transport {
            Transport::Rabbitmq => {
                let rabbit = self
                    .rabbitmq
                    .as_ref()
                    .ok_or("transport rabbitmq requires a rabbitmq section")?;
                if rabbit.queue.trim().is_empty() {
                    return Err("rabbitmq.queue must not be empty".to_string());
                }
                &rabbit.message
            }
            Transport::Http => {
                let http = self
                    .http
                    .as_ref()
                    .ok_or("transport http requires an http section")?;
                if !http.path.starts_with('/') {
                    return Err(format!("http.path must start with '/', got {:?}", http.path));
                }
                &http.message
            }
        };
        shape.operation.validate()
    }

    /// `operation` value inbound messages carry, from the shape of the
    /// declared transport.
    #[must_use]
    pub fn operation_value(&self) -> Option<OperationType> {
        let shape = match self.transport {
            Transport::Rabbitmq => &self.rabbitmq.as_ref()?.message,
            Transport::Http => &self.http.as_ref()?.message,
        };
        Some(shape.operation.value)
    }

    /// Queue name for queue-backed transports.
    #[must_use]
    pub fn queue(&self) -> Option<&str> {
        self.rabbitmq.as_ref().map(|r| r.queue.as_str())
    }
}

impl OperationShape {
    fn validate(&self) -> Result<(), String> {
        if self.value_type != "string" {
            return Err(format!(
                "message.operation.type must be string, got {}",
                self.value_type
            ));
        }
        if !self.required {
            return Err("message.operation must be required".to_string());
        }
        if !matches!(self.value, OperationType::Create | OperationType::Update) {
            return Err(format!(
                "message.operation.value must be create or update, got {}",
                self.value
            ));
        }
        Ok(())
    }
}
