//! RabbitMQ stream configuration

use secrecy::Secret;
use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// RabbitMQ stream protocol connection (event streams)
#[derive(Debug, Clone, Deserialize)]
pub struct RabbitMqConfig {
    #[serde(default)]
    pub host: String,

    /// Stream protocol port, not the AMQP one
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: Secret<String>,

    /// Retention cap per partition stream, in bytes
    #[serde(default = "default_max_stream_bytes")]
    pub max_stream_bytes: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl RabbitMqConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate RabbitMQ configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingRequired("SESSION_GRID__RABBITMQ__HOST"));
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.username.is_empty() {
            return Err(ValidationError::MissingRequired(
                "SESSION_GRID__RABBITMQ__USERNAME",
            ));
        }
        if self.max_stream_bytes == 0 {
            return Err(ValidationError::InvalidLimit("rabbitmq.max_stream_bytes"));
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("rabbitmq.timeout_secs"));
        }
        Ok(())
    }
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            max_stream_bytes: default_max_stream_bytes(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_port() -> u16 {
    5552
}

fn default_username() -> String {
    "guest".to_string()
}

fn default_password() -> Secret<String> {
    Secret::new("guest".to_string())
}

fn default_max_stream_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_timeout() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_host(host: &str) -> RabbitMqConfig {
        RabbitMqConfig {
            host: host.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rabbitmq_defaults() {
        let config = RabbitMqConfig::default();
        assert_eq!(config.port, 5552);
        assert_eq!(config.username, "guest");
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validation_missing_host() {
        assert_eq!(
            RabbitMqConfig::default().validate(),
            Err(ValidationError::MissingRequired("SESSION_GRID__RABBITMQ__HOST"))
        );
    }

    #[test]
    fn test_validation_bounds() {
        let no_retention = RabbitMqConfig {
            max_stream_bytes: 0,
            ..with_host("rabbit")
        };
        assert!(no_retention.validate().is_err());

        assert!(with_host("rabbit.internal").validate().is_ok());
    }
}
