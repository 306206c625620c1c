// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definition
//!
//! Describes the queues the client declares. Every queue the client touches is
//! declared idempotently with the same parameters, so declaring it on each
//! subscribe and publish is safe whether or not it already exists.

use lapin::options::QueueDeclareOptions;

/// Definition of a RabbitMQ queue with its declaration parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) delete: bool,
}

impl QueueDefinition {
    /// Creates a non-durable, non-exclusive, non-auto-delete queue definition.
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durable: false,
            exclusive: false,
            delete: false,
        }
    }

    /// Makes the queue durable, persisting across broker restarts.
    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    /// Makes the queue exclusive to the connection.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    /// Sets the queue to auto-delete when no longer used.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }
}

impl From<&QueueDefinition> for QueueDeclareOptions {
    fn from(def: &QueueDefinition) -> Self {
        QueueDeclareOptions {
            passive: false,
            durable: def.durable,
            exclusive: def.exclusive,
            auto_delete: def.delete,
            nowait: false,
        }
    }
}

/// The definition the client uses for every queue it subscribes or publishes
/// to: durable, shared and never auto-deleted.
pub fn default_queue(name: &str) -> QueueDefinition {
    QueueDefinition::new(name).durable()
}
