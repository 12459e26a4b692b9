//! A fixed set of connections, each holding reusable sessions handed out to callers.
//!
//! Auto-ack and manual-ack sessions are kept apart: manual-ack sessions get a prefetch
//! limit, and deliveries obtained on them are acknowledged on the very same channel.

use crate::{
    connection::Connection,
    connection_properties::ConnectionProperties,
    consumer::Consumer,
    id_sequence::IdSequence,
    killswitch::KillSwitch,
    message::BasicGetMessage,
    options::{
        BasicConsumeOptions, BasicGetOptions, BasicPublishOptions, BasicQosOptions,
        ConfirmSelectOptions,
    },
    protocol::constants::REPLY_SUCCESS,
    session::Session,
    types::FieldTable,
    BasicProperties, Error, Result,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};
use tracing::{debug, info, warn};

/// How a [`ChannelPool`] is laid out.
///
/// ```
/// let config: warren::PoolConfig =
///     serde_json::from_str(r#"{"uri": "amqp://localhost", "connections": 2}"#).unwrap();
/// assert_eq!(config.channels_per_connection, 4);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolConfig {
    pub uri: String,
    pub connections: usize,
    /// Auto-ack sessions opened upfront on each connection.
    pub channels_per_connection: usize,
    /// Manual-ack sessions opened upfront on each connection.
    pub ackable_channels_per_connection: usize,
    /// The `basic.qos` prefetch count of manual-ack sessions. 0 means unlimited.
    pub prefetch_count: u16,
    /// Report the failures of [`ChannelPool::publish`] and [`ChannelPool::get`] as errors
    /// instead of `false`/`None`.
    pub escalate_errors: bool,
    /// Put auto-ack sessions in confirm mode and wait for the server's ack on publish.
    pub publisher_confirms: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            uri: "amqp://127.0.0.1:5672/%2f".into(),
            connections: 1,
            channels_per_connection: 4,
            ackable_channels_per_connection: 2,
            prefetch_count: 10,
            escalate_errors: false,
            publisher_confirms: false,
        }
    }
}

/// A session checked out of the pool. Give it back with [`ChannelPool::return_channel`]
/// or [`ChannelPool::return_ackable`].
#[derive(Clone)]
pub struct PoolEntry {
    id: u64,
    session: Session,
    ackable: bool,
    alive: KillSwitch,
}

impl PoolEntry {
    /// The pool-wide identifier, to use with [`ChannelPool::flag_dead`].
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_ackable(&self) -> bool {
        self.ackable
    }

    /// Not flagged dead and its session still open.
    pub fn is_alive(&self) -> bool {
        self.alive.alive() && self.session.is_open()
    }
}

impl fmt::Debug for PoolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("id", &self.id)
            .field("channel", &self.session.id())
            .field("ackable", &self.ackable)
            .field("alive", &self.alive.alive())
            .finish()
    }
}

#[derive(Clone)]
pub struct ChannelPool {
    inner: Arc<Inner>,
}

struct Inner {
    config: PoolConfig,
    connections: Vec<Connection>,
    state: Mutex<State>,
}

struct State {
    closed: bool,
    ids: IdSequence<u64>,
    idle: VecDeque<PoolEntry>,
    idle_ackable: VecDeque<PoolEntry>,
    /// Every entry issued and not evicted yet, idle or checked out.
    entries: HashMap<u64, KillSwitch>,
    transient: Vec<Session>,
}

impl State {
    fn idle(&mut self, ackable: bool) -> &mut VecDeque<PoolEntry> {
        if ackable {
            &mut self.idle_ackable
        } else {
            &mut self.idle
        }
    }
}

impl ChannelPool {
    /// Open every connection and session upfront, failing on the first error.
    pub fn new(config: PoolConfig, properties: ConnectionProperties) -> Result<Self> {
        let mut connections = Vec::with_capacity(config.connections);
        for _ in 0..config.connections.max(1) {
            match Connection::connect(&config.uri, properties.clone()) {
                Ok(connection) => connections.push(connection),
                Err(err) => {
                    for connection in &connections {
                        let _ = connection.close(REPLY_SUCCESS, "OK");
                    }
                    return Err(err);
                }
            }
        }
        let pool = Self {
            inner: Arc::new(Inner {
                config,
                connections,
                state: Mutex::new(State {
                    closed: false,
                    ids: IdSequence::new(1),
                    idle: VecDeque::new(),
                    idle_ackable: VecDeque::new(),
                    entries: HashMap::new(),
                    transient: Vec::new(),
                }),
            }),
        };
        if let Err(err) = pool.fill() {
            let _ = pool.shutdown();
            return Err(err);
        }
        info!(
            connections = pool.inner.connections.len(),
            channels = pool.inner.config.channels_per_connection,
            ackable_channels = pool.inner.config.ackable_channels_per_connection,
            "channel pool ready"
        );
        Ok(pool)
    }

    fn fill(&self) -> Result<()> {
        let config = &self.inner.config;
        for connection in &self.inner.connections {
            for (count, ackable) in [
                (config.channels_per_connection, false),
                (config.ackable_channels_per_connection, true),
            ] {
                for _ in 0..count {
                    let session = self.open_session(connection, ackable)?;
                    let entry = self.register(session, ackable)?;
                    self.inner.state.lock().idle(ackable).push_back(entry);
                }
            }
        }
        Ok(())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connections(&self) -> &[Connection] {
        &self.inner.connections
    }

    /// Take an idle auto-ack session, opening a new one if none is left.
    pub fn checkout(&self) -> Result<PoolEntry> {
        self.checkout_entry(false)
    }

    /// Take an idle manual-ack session, opening a new one if none is left.
    pub fn checkout_ackable(&self) -> Result<PoolEntry> {
        self.checkout_entry(true)
    }

    fn checkout_entry(&self, ackable: bool) -> Result<PoolEntry> {
        let mut evicted = Vec::new();
        let found = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::PoolClosed);
            }
            let mut found = None;
            while let Some(entry) = state.idle(ackable).pop_front() {
                if entry.is_alive() {
                    found = Some(entry);
                    break;
                }
                debug!(entry = entry.id, channel = entry.session.id(), "evicting dead entry");
                entry.alive.kill();
                state.entries.remove(&entry.id);
                evicted.push(entry);
            }
            found
        };
        self.discard(evicted);
        if let Some(entry) = found {
            return Ok(entry);
        }
        // exhausted: never wait for an entry, open a replacement instead
        let connection = self.least_loaded()?;
        let session = self.open_session(connection, ackable)?;
        self.register(session, ackable)
    }

    /// Make the entry available again, unless it is dead.
    pub fn return_channel(&self, entry: PoolEntry) {
        self.give_back(entry, false)
    }

    pub fn return_ackable(&self, entry: PoolEntry) {
        self.give_back(entry, true)
    }

    fn give_back(&self, entry: PoolEntry, ackable: bool) {
        if entry.ackable != ackable {
            warn!(entry = entry.id, "entry returned to the wrong set, flagging it dead");
            entry.alive.kill();
        }
        let dead = {
            let mut state = self.inner.state.lock();
            if !state.closed && entry.is_alive() {
                state.idle(ackable).push_back(entry);
                return;
            }
            state.entries.remove(&entry.id);
            entry
        };
        self.discard(vec![dead]);
    }

    /// Never hand this entry out again. It gets replaced on the next demand.
    ///
    /// An idle entry is closed right away, a checked-out one when it comes back.
    pub fn flag_dead(&self, id: u64) {
        let idle = {
            let mut state = self.inner.state.lock();
            let Some(alive) = state.entries.remove(&id) else {
                return;
            };
            warn!(entry = id, "entry flagged dead");
            alive.kill();
            let mut idle = Vec::new();
            for ackable in [false, true] {
                let entries = state.idle(ackable);
                if let Some(index) = entries.iter().position(|entry| entry.id == id) {
                    idle.extend(entries.remove(index));
                }
            }
            idle
        };
        self.discard(idle);
    }

    /// Close evicted entries, outside of the state lock.
    fn discard(&self, entries: Vec<PoolEntry>) {
        if self.is_closed() {
            return;
        }
        for entry in entries {
            if entry.session.is_open() {
                if let Err(err) = entry.session.close(REPLY_SUCCESS, "evicted from the pool") {
                    debug!(entry = entry.id, %err, "failed to close an evicted entry");
                }
            }
        }
    }

    /// A session outside of the pool's bookkeeping, for long-lived usage such as consumers.
    ///
    /// It is closed on [`shutdown`](Self::shutdown).
    pub fn open_transient_channel(&self, ackable: bool) -> Result<Session> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let session = self.open_session(self.least_loaded()?, ackable)?;
        let mut state = self.inner.state.lock();
        if state.closed {
            drop(state);
            let _ = session.close(REPLY_SUCCESS, "pool shut down");
            return Err(Error::PoolClosed);
        }
        state.transient.retain(Session::is_open);
        state.transient.push(session.clone());
        Ok(session)
    }

    /// Run `f` on a checked-out session. On failure the entry is flagged dead.
    pub fn execute<T, F>(&self, ackable: bool, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T>,
    {
        let entry = self.checkout_entry(ackable)?;
        let res = f(&entry.session);
        if let Err(err) = res.as_ref() {
            warn!(entry = entry.id, channel = entry.session.id(), %err, "pooled operation failed");
            self.flag_dead(entry.id);
        }
        self.give_back(entry, ackable);
        res
    }

    /// Publish on an auto-ack session. `Ok(false)` reports a failure when errors are not escalated,
    /// or a nack in publisher confirms mode.
    pub fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        options: BasicPublishOptions,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<bool> {
        let confirms = self.inner.config.publisher_confirms;
        let res = self.execute(false, |session| {
            let confirm =
                session.basic_publish(exchange, routing_key, options, payload, properties)?;
            if confirms {
                Ok(confirm.wait()?.is_ack())
            } else {
                Ok(true)
            }
        });
        self.escalate(res, false)
    }

    /// Fetch one message. Unless `no_ack`, it comes from a manual-ack session and must be
    /// acknowledged through its `acker`.
    pub fn get(&self, queue: &str, options: BasicGetOptions) -> Result<Option<BasicGetMessage>> {
        let res = self.execute(!options.no_ack, |session| session.basic_get(queue, options));
        self.escalate(res, None)
    }

    /// Subscribe on a dedicated transient session.
    pub fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: BasicConsumeOptions,
        arguments: FieldTable,
    ) -> Result<Consumer> {
        let session = self.open_transient_channel(!options.no_ack)?;
        session
            .basic_consume(queue, consumer_tag, options, arguments)
            .map_err(|err| {
                let _ = session.close(REPLY_SUCCESS, "consume failed");
                err
            })
    }

    /// Close every session and connection. Later calls do nothing.
    pub fn shutdown(&self) -> Result<()> {
        let sessions = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.entries.clear();
            let mut sessions = state
                .idle
                .drain(..)
                .chain(state.idle_ackable.drain(..))
                .map(|entry| entry.session)
                .collect::<Vec<_>>();
            sessions.append(&mut state.transient);
            sessions
        };
        for session in sessions.into_iter().filter(Session::is_open) {
            if let Err(err) = session.close(REPLY_SUCCESS, "pool shut down") {
                debug!(channel = session.id(), %err, "failed to close pooled session");
            }
        }
        for connection in &self.inner.connections {
            if connection.status().connected() {
                if let Err(err) = connection.close(REPLY_SUCCESS, "OK") {
                    warn!(%err, "failed to close pooled connection");
                }
            }
        }
        info!("channel pool shut down");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// How many entries are idle, auto-ack then manual-ack.
    pub fn idle(&self) -> (usize, usize) {
        let state = self.inner.state.lock();
        (state.idle.len(), state.idle_ackable.len())
    }

    fn least_loaded(&self) -> Result<&Connection> {
        self.inner
            .connections
            .iter()
            .filter(|connection| connection.status().connected())
            .min_by_key(|connection| connection.open_sessions())
            .ok_or_else(|| {
                Error::InvalidConnectionState(
                    self.inner
                        .connections
                        .first()
                        .map(|connection| connection.status().state())
                        .unwrap_or_default(),
                )
            })
    }

    fn open_session(&self, connection: &Connection, ackable: bool) -> Result<Session> {
        let session = connection.create_session()?;
        let configured = if ackable {
            session.basic_qos(0, self.inner.config.prefetch_count, BasicQosOptions::default())
        } else if self.inner.config.publisher_confirms {
            session.confirm_select(ConfirmSelectOptions::default())
        } else {
            Ok(())
        };
        if let Err(err) = configured {
            let _ = session.close(REPLY_SUCCESS, "configuration failed");
            return Err(err);
        }
        debug!(channel = session.id(), ackable, "pooled session opened");
        Ok(session)
    }

    fn register(&self, session: Session, ackable: bool) -> Result<PoolEntry> {
        let mut state = self.inner.state.lock();
        if state.closed {
            drop(state);
            let _ = session.close(REPLY_SUCCESS, "pool shut down");
            return Err(Error::PoolClosed);
        }
        let alive = KillSwitch::default();
        let id = state.ids.next();
        state.entries.insert(id, alive.clone());
        Ok(PoolEntry {
            id,
            session,
            ackable,
            alive,
        })
    }

    fn escalate<T>(&self, res: Result<T>, fallback: T) -> Result<T> {
        match res {
            Err(Error::PoolClosed) => Err(Error::PoolClosed),
            Err(err) if !self.inner.config.escalate_errors => {
                warn!(%err, "pooled operation failed");
                Ok(fallback)
            }
            res => res,
        }
    }
}

impl fmt::Debug for ChannelPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChannelPool")
            .field("config", &self.inner.config)
            .field("closed", &state.closed)
            .field("idle", &state.idle.len())
            .field("idle_ackable", &state.idle_ackable.len())
            .field("transient", &state.transient.len())
            .finish()
    }
}
