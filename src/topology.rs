//! What the recovery ledger remembers, and what replaying it produced.

use crate::{
    consumer::Consumer,
    exchange::ExchangeKind,
    options::{BasicConsumeOptions, ExchangeDeclareOptions, QueueDeclareOptions},
    types::{FieldTable, LongUInt, ShortString, ShortUInt},
    Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct TopologyDefinition {
    pub exchanges: Vec<ExchangeDefinition>,
    pub queues: Vec<QueueDefinition>,
    pub bindings: Vec<BindingDefinition>,
    pub consumers: Vec<ConsumerDefinition>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ExchangeDefinition {
    pub name: ShortString,
    pub kind: ExchangeKind,
    pub options: ExchangeDeclareOptions,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct QueueDefinition {
    pub name: ShortString,
    pub options: QueueDeclareOptions,
    pub arguments: FieldTable,
    /// Declared with an empty name: recovery asks the server for a new one.
    pub server_named: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingDestination {
    Queue,
    Exchange,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BindingDefinition {
    pub destination_kind: BindingDestination,
    pub destination: ShortString,
    pub source: ShortString,
    pub routing_key: ShortString,
    pub arguments: FieldTable,
}

impl BindingDefinition {
    pub(crate) fn references_queue(&self, queue: &str) -> bool {
        self.destination_kind == BindingDestination::Queue && self.destination.as_str() == queue
    }

    pub(crate) fn references_exchange(&self, exchange: &str) -> bool {
        self.source.as_str() == exchange
            || (self.destination_kind == BindingDestination::Exchange
                && self.destination.as_str() == exchange)
    }
}

/// The prefetch settings of the channel a consumer was subscribed on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct QosDefinition {
    pub prefetch_size: LongUInt,
    pub prefetch_count: ShortUInt,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ConsumerDefinition {
    pub tag: ShortString,
    pub queue: ShortString,
    pub options: BasicConsumeOptions,
    pub arguments: FieldTable,
    pub qos: Option<QosDefinition>,
    /// The live consumer that keeps receiving once the subscription is replayed.
    #[serde(skip)]
    pub(crate) consumer: Option<Consumer>,
}

/// One entry of the ledger, as named in a [`RecoveryFailure`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedEntity {
    Exchange(ShortString),
    Queue(ShortString),
    Binding {
        source: ShortString,
        destination: ShortString,
        routing_key: ShortString,
    },
    Consumer(ShortString),
}

impl fmt::Display for RecordedEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordedEntity::Exchange(name) => write!(f, "exchange '{}'", name),
            RecordedEntity::Queue(name) => write!(f, "queue '{}'", name),
            RecordedEntity::Binding {
                source,
                destination,
                routing_key,
            } => write!(
                f,
                "binding '{}' -> '{}' ({})",
                source, destination, routing_key
            ),
            RecordedEntity::Consumer(tag) => write!(f, "consumer '{}'", tag),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecoveryFailure {
    pub entity: RecordedEntity,
    pub error: Error,
}

/// The outcome of replaying the ledger on a new connection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecoveryReport {
    /// How many entities were re-established.
    pub recovered: usize,
    /// The entities that could not be, which stay recorded.
    pub failures: Vec<RecoveryFailure>,
    /// Server-named queues and the name they got this time, as `(old, new)`.
    pub renamed_queues: Vec<(ShortString, ShortString)>,
}

impl RecoveryReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn failed(&mut self, entity: RecordedEntity, error: Error) {
        self.failures.push(RecoveryFailure { entity, error });
    }
}
