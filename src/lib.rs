#![warn(rust_2018_idioms)]

//! warren
//!
//! A blocking AMQP 0.9.1 client, targeting especially RabbitMQ.
//!
//! One TCP [`Connection`] multiplexes many [`Session`]s (AMQP channels), each carrying
//! the individual AMQP methods. Everything declared through a session is recorded, so
//! that a connection configured with a [`RecoveryConfig`] can reconnect and replay its
//! exchanges, queues, bindings and consumers. A [`ChannelPool`] shares a few
//! connections between many callers.
//!
//! ## Example
//!
//! ```rust,no_run
//! use warren::{
//!     options::*, publisher_confirm::Confirmation, types::FieldTable, BasicProperties,
//!     Connection, ConnectionProperties, ExchangeKind, RecoveryConfig, Result,
//! };
//! use tracing::info;
//!
//! fn main() -> Result<()> {
//!     tracing_subscriber::fmt::init();
//!
//!     let addr = std::env::var("AMQP_ADDR").unwrap_or_else(|_| "amqp://127.0.0.1:5672/%2f".into());
//!     let conn = Connection::connect(
//!         &addr,
//!         ConnectionProperties::default()
//!             .with_recovery_config(RecoveryConfig::default().auto_recover()),
//!     )?;
//!     info!("CONNECTED");
//!
//!     let session_a = conn.create_session()?;
//!     let session_b = conn.create_session()?;
//!
//!     session_a.exchange_declare(
//!         "logs",
//!         ExchangeKind::Fanout,
//!         ExchangeDeclareOptions::default(),
//!         FieldTable::default(),
//!     )?;
//!     let queue = session_a.queue_declare("", QueueDeclareOptions::default(), FieldTable::default())?;
//!     session_a.queue_bind(
//!         queue.name().as_str(),
//!         "logs",
//!         "",
//!         QueueBindOptions::default(),
//!         FieldTable::default(),
//!     )?;
//!     info!(?queue, "Declared queue");
//!
//!     let consumer = session_b.basic_consume(
//!         queue.name().as_str(),
//!         "my_consumer",
//!         BasicConsumeOptions::default(),
//!         FieldTable::default(),
//!     )?;
//!     consumer.set_delegate(move |delivery: warren::message::DeliveryResult| {
//!         if let Ok(Some(delivery)) = delivery {
//!             delivery.ack(BasicAckOptions::default()).expect("ack");
//!         }
//!     })?;
//!
//!     loop {
//!         let confirm = session_a
//!             .basic_publish(
//!                 "logs",
//!                 "",
//!                 BasicPublishOptions::default(),
//!                 b"Hello world!",
//!                 BasicProperties::default(),
//!             )?
//!             .wait()?;
//!         assert_eq!(confirm, Confirmation::NotRequested);
//!     }
//! }
//! ```

pub use protocol::BasicProperties;

pub use acker::Acker;
pub use auth::{AuthProvider, Credentials, SASLMechanism};
pub use channel_status::{ChannelState, ChannelStatus};
pub use configuration::Configuration;
pub use connection::Connection;
pub use connection_properties::ConnectionProperties;
pub use connection_status::{ConnectionState, ConnectionStatus};
pub use consumer::{Consumer, ConsumerDelegate, ConsumerIterator};
pub use error::{Error, Result};
pub use exchange::ExchangeKind;
pub use pool::{ChannelPool, PoolConfig, PoolEntry};
pub use publisher_confirm::PublisherConfirm;
pub use queue::Queue;
pub use recovery_config::RecoveryConfig;
pub use session::Session;

pub mod format;
pub mod message;
pub mod options;
pub mod protocol;
pub mod publisher_confirm;
pub mod topology;
pub mod types;

mod acker;
mod acknowledgement;
mod api;
mod auth;
mod channel_receiver_state;
mod channel_status;
mod configuration;
mod connection;
mod connection_properties;
mod connection_status;
mod consumer;
mod consumers;
mod continuation;
mod error;
mod exchange;
mod frames;
mod handshake;
mod id_sequence;
mod io_loop;
mod killswitch;
mod pool;
mod promise;
mod queue;
mod recovery_config;
mod registry;
mod returned_messages;
mod session;
mod session_manager;
mod thread;
