//! # Topic Router
//!
//! Pure parsing and directional authorization of gateway topics.
//!
//! ```text
//! <prefix>/<gateway-identity>/<operation>      operation ∈ {up, down, status}
//! ```
//!
//! | Direction        | `up` | `status` | `down` |
//! |------------------|------|----------|--------|
//! | client publish   | own  | own      | never  |
//! | client subscribe | no   | no       | own    |
//!
//! Every input string maps to either a valid match or `Invalid`; there are no
//! partial matches, wildcards or optional segments.

use super::errors::GatewayError;
use shared_types::GatewayIdentity;
use std::fmt;

/// Semantic operation addressed by a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Uplink,
    Downlink,
    Status,
}

impl Operation {
    /// The topic token for this operation.
    pub fn token(&self) -> &'static str {
        match self {
            Self::Uplink => "up",
            Self::Downlink => "down",
            Self::Status => "status",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "up" => Some(Self::Uplink),
            "down" => Some(Self::Downlink),
            "status" => Some(Self::Status),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Result of parsing a topic string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicMatch {
    Valid {
        gateway: GatewayIdentity,
        operation: Operation,
    },
    Invalid,
}

/// Maps topic strings to operations under a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRouter {
    prefix: String,
}

impl TopicRouter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse a topic. Total over all inputs.
    pub fn parse(&self, topic: &str) -> TopicMatch {
        let mut segments = topic.split('/');
        let (Some(prefix), Some(gateway), Some(operation), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return TopicMatch::Invalid;
        };

        if prefix != self.prefix {
            return TopicMatch::Invalid;
        }
        let Some(operation) = Operation::from_token(operation) else {
            return TopicMatch::Invalid;
        };
        match GatewayIdentity::new(gateway) {
            Ok(gateway) => TopicMatch::Valid { gateway, operation },
            Err(_) => TopicMatch::Invalid,
        }
    }

    /// Authorize a client-to-server publish for the session's identity.
    pub fn authorize_publish(
        &self,
        topic: &str,
        session: &GatewayIdentity,
    ) -> Result<Operation, GatewayError> {
        match self.parse(topic) {
            TopicMatch::Invalid => Err(GatewayError::InvalidTopic(topic.to_string())),
            TopicMatch::Valid {
                operation: Operation::Downlink,
                ..
            } => Err(GatewayError::Unauthorized(format!(
                "publish to downlink topic {:?}",
                topic
            ))),
            TopicMatch::Valid { gateway, .. } if &gateway != session => {
                Err(GatewayError::Unauthorized(format!(
                    "gateway {} published to topic of {}",
                    session, gateway
                )))
            }
            TopicMatch::Valid { operation, .. } => Ok(operation),
        }
    }

    /// Authorize a subscription filter for the session's identity.
    ///
    /// Only the session's own downlink topic is accepted; wildcard filters
    /// fail to parse and are rejected.
    pub fn authorize_subscribe(
        &self,
        filter: &str,
        session: &GatewayIdentity,
    ) -> Result<(), GatewayError> {
        match self.parse(filter) {
            TopicMatch::Invalid => Err(GatewayError::InvalidTopic(filter.to_string())),
            TopicMatch::Valid {
                gateway,
                operation: Operation::Downlink,
            } if &gateway == session => Ok(()),
            TopicMatch::Valid { .. } => Err(GatewayError::Unauthorized(format!(
                "gateway {} may not subscribe to {:?}",
                session, filter
            ))),
        }
    }

    /// Build the topic of an operation for a gateway.
    pub fn topic_for(&self, gateway: &GatewayIdentity, operation: Operation) -> String {
        format!("{}/{}/{}", self.prefix, gateway, operation.token())
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new(super::config::DEFAULT_TOPIC_PREFIX)
    }
}
