// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;
mod publisher;

pub mod channel;
pub mod client;
pub mod connection;
pub mod context;
pub mod errors;
pub mod handler;
pub mod options;
pub mod queue;
pub mod transport;

pub use client::RabbitMQClient;
pub use connection::ConnectionManager;
pub use consumer::AckMode;
pub use context::MessageContext;
pub use errors::{AmqpError, ErrorKind};
pub use handler::{HandlerError, MessageHandler};
pub use options::ConnectionOptions;
pub use publisher::{DEFAULT_EXCHANGE, JSON_CONTENT_TYPE};
