// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Options
//!
//! Connection parameters for the RabbitMQ client. The options are plain data:
//! they are built once (directly, through a configuration callback or from
//! environment variables), validated, and then handed to the
//! [`ConnectionManager`](crate::connection::ConnectionManager) which never
//! mutates them.

use crate::errors::AmqpError;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr, time::Duration};

/// Sentinel `retry_count` meaning "retry forever".
pub const UNLIMITED_RETRIES: i32 = -1;

pub const ENV_HOST: &str = "RABBITMQ_HOST";
pub const ENV_PORT: &str = "RABBITMQ_PORT";
pub const ENV_USERNAME: &str = "RABBITMQ_USERNAME";
pub const ENV_PASSWORD: &str = "RABBITMQ_PASSWORD";
pub const ENV_RETRY_COUNT: &str = "RABBITMQ_RETRY_COUNT";
pub const ENV_RETRY_DELAY_SECONDS: &str = "RABBITMQ_RETRY_DELAY_SECONDS";
pub const ENV_CONNECTION_NAME: &str = "RABBITMQ_CONNECTION_NAME";
pub const ENV_MAX_CONCURRENT_DELIVERIES: &str = "RABBITMQ_MAX_CONCURRENT_DELIVERIES";

/// Parameters used to reach the broker.
///
/// Missing fields fall back to [`Default`] when deserialized, so the struct can
/// be embedded as a section of a larger application configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Number of connection attempts. `0` still makes a single attempt and
    /// [`UNLIMITED_RETRIES`] never gives up.
    pub retry_count: i32,
    /// Fixed wait between two connection attempts.
    pub retry_delay_seconds: u64,
    /// Client-provided connection name shown in the broker management UI.
    pub connection_name: Option<String>,
    /// Upper bound of deliveries processed at the same time per subscription.
    pub max_concurrent_deliveries: usize,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5672,
            username: "guest".to_owned(),
            password: "guest".to_owned(),
            retry_count: 3,
            retry_delay_seconds: 5,
            connection_name: None,
            max_concurrent_deliveries: 10,
        }
    }
}

impl fmt::Debug for ConnectionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("retry_count", &self.retry_count)
            .field("retry_delay_seconds", &self.retry_delay_seconds)
            .field("connection_name", &self.connection_name)
            .field("max_concurrent_deliveries", &self.max_concurrent_deliveries)
            .finish()
    }
}

impl ConnectionOptions {
    /// Builds options from the defaults adjusted by a configuration callback.
    ///
    /// # Example
    /// ```
    /// use rabbitmq_client::options::ConnectionOptions;
    ///
    /// let options = ConnectionOptions::configure(|opts| {
    ///     opts.host = "rabbit.internal".to_owned();
    ///     opts.retry_count = 5;
    ///     opts.retry_delay_seconds = 10;
    /// })
    /// .unwrap();
    /// assert_eq!(options.endpoint(), "rabbit.internal:5672");
    /// ```
    pub fn configure<F>(configure: F) -> Result<Self, AmqpError>
    where
        F: FnOnce(&mut ConnectionOptions),
    {
        let mut options = ConnectionOptions::default();
        configure(&mut options);
        options.validate()?;
        Ok(options)
    }

    /// Reads the options from `RABBITMQ_*` environment variables, using the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, AmqpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, AmqpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ConnectionOptions::default();

        let options = ConnectionOptions {
            host: lookup(ENV_HOST).unwrap_or(defaults.host),
            port: parse_var(&lookup, ENV_PORT)?.unwrap_or(defaults.port),
            username: lookup(ENV_USERNAME).unwrap_or(defaults.username),
            password: lookup(ENV_PASSWORD).unwrap_or(defaults.password),
            retry_count: parse_var(&lookup, ENV_RETRY_COUNT)?.unwrap_or(defaults.retry_count),
            retry_delay_seconds: parse_var(&lookup, ENV_RETRY_DELAY_SECONDS)?
                .unwrap_or(defaults.retry_delay_seconds),
            connection_name: lookup(ENV_CONNECTION_NAME).or(defaults.connection_name),
            max_concurrent_deliveries: parse_var(&lookup, ENV_MAX_CONCURRENT_DELIVERIES)?
                .unwrap_or(defaults.max_concurrent_deliveries),
        };

        options.validate()?;
        Ok(options)
    }

    /// Checks the invariants the connection manager relies on.
    pub fn validate(&self) -> Result<(), AmqpError> {
        if self.host.trim().is_empty() {
            return Err(AmqpError::ConfigError("host cannot be empty".to_owned()));
        }

        if self.username.is_empty() {
            return Err(AmqpError::ConfigError("username cannot be empty".to_owned()));
        }

        if self.retry_count < UNLIMITED_RETRIES {
            return Err(AmqpError::ConfigError(format!(
                "retry count must be >= {}, got {}",
                UNLIMITED_RETRIES, self.retry_count
            )));
        }

        if self.max_concurrent_deliveries == 0 {
            return Err(AmqpError::ConfigError(
                "max concurrent deliveries must be greater than zero".to_owned(),
            ));
        }

        Ok(())
    }

    /// AMQP URI built from the options. Contains the password, do not log it.
    pub fn connection_string(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }

    /// `host:port`, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Total number of connection attempts, `None` when unlimited.
    pub fn max_attempts(&self) -> Option<u32> {
        if self.retry_count == UNLIMITED_RETRIES {
            return None;
        }

        Some(self.retry_count.max(1) as u32)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_seconds)
    }
}

fn parse_var<F, V>(lookup: &F, key: &str) -> Result<Option<V>, AmqpError>
where
    F: Fn(&str) -> Option<String>,
    V: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<V>()
            .map(Some)
            .map_err(|_| AmqpError::ConfigError(format!("{} has an invalid value `{}`", key, raw))),
        None => Ok(None),
    }
}
