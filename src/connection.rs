// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Manager
//!
//! Owns the single broker connection shared by every subscription and
//! publish. The connection is created lazily on first use, handed out while
//! it stays open and transparently re-established once it drops.
//!
//! Creation is serialized behind an async mutex, so concurrent callers that
//! find no live connection wait for one attempt instead of racing to open
//! several.

use crate::{
    channel::LapinTransport,
    errors::AmqpError,
    options::ConnectionOptions,
    transport::{BrokerConnection, Transport},
};
use std::sync::Arc;
use tokio::{sync::Mutex, time::sleep};
use tracing::{debug, error, info, warn};

pub struct ConnectionManager {
    options: ConnectionOptions,
    transport: Arc<dyn Transport>,
    connection: Mutex<Option<Arc<dyn BrokerConnection>>>,
}

impl ConnectionManager {
    /// Creates a manager connecting through lapin.
    ///
    /// No connection is opened until [`ConnectionManager::get_connection`]
    /// is first called.
    ///
    /// # Parameters
    /// * `options` - Broker endpoint, credentials and retry policy
    pub fn new(options: ConnectionOptions) -> Self {
        Self::with_transport(options, Arc::new(LapinTransport))
    }

    /// Creates a manager connecting through `transport`.
    ///
    /// # Parameters
    /// * `options` - Broker endpoint, credentials and retry policy
    /// * `transport` - Opens the underlying connections
    pub fn with_transport(options: ConnectionOptions, transport: Arc<dyn Transport>) -> Self {
        ConnectionManager {
            options,
            transport,
            connection: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Returns the live connection, connecting first if there is none or the
    /// previous one has closed.
    ///
    /// Transient failures are retried with a fixed delay of
    /// `retry_delay_seconds` for up to `retry_count` attempts (forever when
    /// it is [`UNLIMITED_RETRIES`](crate::options::UNLIMITED_RETRIES)).
    /// Exhausting the attempts yields [`AmqpError::ConnectionError`]; a
    /// non-transient failure is returned immediately.
    ///
    /// # Returns
    /// A shared handle to the open connection. Callers that arrive while a
    /// connection is being established wait for it and receive the same
    /// handle.
    pub async fn get_connection(&self) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        let mut current = self.connection.lock().await;

        if let Some(conn) = current.as_ref() {
            if conn.is_open() {
                return Ok(conn.clone());
            }
            debug!(endpoint = self.options.endpoint(), "amqp connection is closed, reconnecting");
        }

        let conn = self.establish().await?;
        *current = Some(conn.clone());

        Ok(conn)
    }

    /// Closes the connection if one is open. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), AmqpError> {
        let Some(conn) = self.connection.lock().await.take() else {
            return Ok(());
        };

        if !conn.is_open() {
            return Ok(());
        }

        debug!(endpoint = self.options.endpoint(), "closing amqp connection...");
        conn.close().await.inspect_err(|err| {
            error!(error = err.to_string(), "failure to close the connection");
        })
    }

    /// Runs the retry loop. There is no delay after the final attempt.
    async fn establish(&self) -> Result<Arc<dyn BrokerConnection>, AmqpError> {
        let max_attempts = self.options.max_attempts();
        let endpoint = self.options.endpoint();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            debug!(
                endpoint = endpoint.as_str(),
                attempt,
                max_attempts = ?max_attempts,
                "connecting to rabbitmq..."
            );

            match self.transport.connect(&self.options).await {
                Ok(conn) => {
                    info!(endpoint = endpoint.as_str(), attempt, "connected to rabbitmq");
                    return Ok(conn);
                }
                Err(err) if err.is_transient() => {
                    warn!(
                        error = err.to_string(),
                        endpoint = endpoint.as_str(),
                        attempt,
                        "failure to reach rabbitmq"
                    );

                    if max_attempts.is_some_and(|max| attempt >= max) {
                        break;
                    }

                    sleep(self.options.retry_delay()).await;
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        endpoint = endpoint.as_str(),
                        "failure to connect"
                    );
                    return Err(err);
                }
            }
        }

        error!(endpoint = endpoint.as_str(), attempt, "giving up connecting to rabbitmq");
        Err(AmqpError::ConnectionError(format!(
            "could not reach {} after {} attempts",
            endpoint, attempt
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        options::UNLIMITED_RETRIES,
        transport::{MockBrokerConnection, MockTransport},
    };
    use std::{
        sync::atomic::{AtomicBool, AtomicU32, Ordering},
        time::Duration,
    };
    use tokio::time::Instant;

    fn options(retry_count: i32, retry_delay_seconds: u64) -> ConnectionOptions {
        ConnectionOptions::configure(|opts| {
            opts.retry_count = retry_count;
            opts.retry_delay_seconds = retry_delay_seconds;
        })
        .unwrap()
    }

    fn open_connection() -> Arc<dyn BrokerConnection> {
        let mut conn = MockBrokerConnection::new();
        conn.expect_is_open().return_const(true);
        Arc::new(conn)
    }

    fn unreachable() -> AmqpError {
        AmqpError::TransportError("connection refused".to_owned())
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let mut transport = MockTransport::new();
        transport.expect_connect().times(3).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(unreachable())
            } else {
                Ok(open_connection())
            }
        });

        let manager = ConnectionManager::with_transport(options(3, 1), Arc::new(transport));

        let started = Instant::now();
        assert!(manager.get_connection().await.is_ok());

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert!(started.elapsed() < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_retry_count() {
        let mut transport = MockTransport::new();
        transport
            .expect_connect()
            .times(3)
            .returning(|_| Err(unreachable()));

        let manager = ConnectionManager::with_transport(options(3, 5), Arc::new(transport));

        let started = Instant::now();
        let result = manager.get_connection().await;

        assert!(matches!(result, Err(AmqpError::ConnectionError(_))));
        assert!(started.elapsed() >= Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_millis(10100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_count_makes_a_single_attempt() {
        let mut transport = MockTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|_| Err(unreachable()));

        let manager = ConnectionManager::with_transport(options(0, 5), Arc::new(transport));

        let started = Instant::now();
        let result = manager.get_connection().await;

        assert!(matches!(result, Err(AmqpError::ConnectionError(_))));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unlimited_retries_keep_trying() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let mut transport = MockTransport::new();
        transport.expect_connect().times(20).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 19 {
                Err(unreachable())
            } else {
                Ok(open_connection())
            }
        });

        let manager = ConnectionManager::with_transport(
            options(UNLIMITED_RETRIES, 1),
            Arc::new(transport),
        );

        assert!(manager.get_connection().await.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let mut transport = MockTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|_| Err(AmqpError::ProtocolError("ACCESS_REFUSED".to_owned())));

        let manager = ConnectionManager::with_transport(options(5, 1), Arc::new(transport));

        assert_eq!(
            manager.get_connection().await.err(),
            Some(AmqpError::ProtocolError("ACCESS_REFUSED".to_owned()))
        );
    }

    #[tokio::test]
    async fn test_reuses_open_connection() {
        let mut transport = MockTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|_| Ok(open_connection()));

        let manager = ConnectionManager::with_transport(options(3, 1), Arc::new(transport));

        let first = manager.get_connection().await.unwrap();
        let second = manager.get_connection().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_replaces_closed_connection() {
        let mut transport = MockTransport::new();
        transport.expect_connect().times(2).returning(|_| {
            let mut conn = MockBrokerConnection::new();
            conn.expect_is_open().return_const(false);
            Ok(Arc::new(conn) as Arc<dyn BrokerConnection>)
        });

        let manager = ConnectionManager::with_transport(options(3, 1), Arc::new(transport));

        let first = manager.get_connection().await.unwrap();
        let second = manager.get_connection().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_connection() {
        let mut transport = MockTransport::new();
        transport
            .expect_connect()
            .times(1)
            .returning(|_| Ok(open_connection()));

        let manager = Arc::new(ConnectionManager::with_transport(
            options(3, 1),
            Arc::new(transport),
        ));

        let (a, b) = tokio::join!(manager.get_connection(), manager.get_connection());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let closed = Arc::new(AtomicBool::new(false));
        let flag = closed.clone();

        let mut transport = MockTransport::new();
        transport.expect_connect().times(1).returning(move |_| {
            let flag = flag.clone();
            let mut conn = MockBrokerConnection::new();
            conn.expect_is_open().return_const(true);
            conn.expect_close().times(1).returning(move || {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            Ok(Arc::new(conn) as Arc<dyn BrokerConnection>)
        });

        let manager = ConnectionManager::with_transport(options(3, 1), Arc::new(transport));

        manager.close().await.unwrap();
        assert!(!closed.load(Ordering::SeqCst));

        manager.get_connection().await.unwrap();
        manager.close().await.unwrap();
        manager.close().await.unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }
}
