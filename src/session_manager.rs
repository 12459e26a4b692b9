use crate::{
    channel_status::ChannelState,
    configuration::Configuration,
    connection_status::{ConnectionState, ConnectionStatus},
    format::frame::AMQPFrame,
    frames::FrameSender,
    registry::Registry,
    session::{Session, SessionContext},
    types::ChannelId,
    Error, Result,
};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};
use tracing::{debug, error, trace};

type OnEmpty = Box<dyn FnOnce() + Send + 'static>;

/// The sessions of one physical connection, channel 0 included.
#[derive(Clone)]
pub(crate) struct SessionManager {
    inner: Arc<Mutex<Inner>>,
    context: SessionContext,
}

struct Inner {
    sessions: HashMap<ChannelId, Session>,
    /// Called from its own thread once the last session is gone, in auto-close mode.
    on_empty: Option<OnEmpty>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        configuration: Configuration,
        connection_status: ConnectionStatus,
        frames: FrameSender,
        registry: Registry,
        rpc_timeout: Option<Duration>,
        close_timeout: Duration,
        auto_recover: bool,
    ) -> Self {
        let inner = Arc::new(Mutex::new(Inner {
            sessions: HashMap::default(),
            on_empty: None,
        }));
        let context = SessionContext {
            configuration,
            connection_status,
            frames,
            registry,
            remover: SessionRemover(Arc::downgrade(&inner)),
            rpc_timeout,
            close_timeout,
            auto_recover,
        };
        let zero = Session::new(0, context.clone());
        zero.status().set_state(ChannelState::Open);
        inner.lock().sessions.insert(0, zero);
        Self { inner, context }
    }

    pub(crate) fn zero(&self) -> Result<Session> {
        self.get(0).ok_or(Error::InvalidConnectionState(
            self.context.connection_status.state(),
        ))
    }

    fn channel_max(&self) -> ChannelId {
        match self.context.configuration.channel_max() {
            0 => ChannelId::MAX,
            max => max,
        }
    }

    /// Reserve the lowest free channel number.
    pub(crate) fn create(&self) -> Result<Session> {
        let channel_max = self.channel_max();
        let mut inner = self.inner.lock();
        let id = (1..=channel_max)
            .find(|id| !inner.sessions.contains_key(id))
            .ok_or(Error::ChannelsLimitReached)?;
        Ok(self.insert(&mut inner, id))
    }

    pub(crate) fn create_with_id(&self, id: ChannelId) -> Result<Session> {
        if id == 0 || id > self.channel_max() {
            return Err(Error::InvalidChannel(id));
        }
        let mut inner = self.inner.lock();
        if inner.sessions.contains_key(&id) {
            return Err(Error::ChannelAlreadyInUse(id));
        }
        Ok(self.insert(&mut inner, id))
    }

    fn insert(&self, inner: &mut Inner, id: ChannelId) -> Session {
        trace!(channel = id, "creating session");
        let session = Session::new(id, self.context.clone());
        inner.sessions.insert(id, session.clone());
        session
    }

    pub(crate) fn get(&self, id: ChannelId) -> Option<Session> {
        self.inner.lock().sessions.get(&id).cloned()
    }

    pub(crate) fn remover(&self) -> SessionRemover {
        self.context.remover.clone()
    }

    /// How many sessions are open, channel 0 excluded.
    pub(crate) fn open_sessions(&self) -> usize {
        self.inner
            .lock()
            .sessions
            .iter()
            .filter(|(id, session)| **id != 0 && !session.state().is_terminal())
            .count()
    }

    pub(crate) fn set_on_empty<F: FnOnce() + Send + 'static>(&self, on_empty: F) {
        self.inner.lock().on_empty = Some(Box::new(on_empty));
    }

    pub(crate) fn clear_on_empty(&self) {
        self.inner.lock().on_empty = None;
    }

    /// Route an inbound frame to its session.
    pub(crate) fn handle_frame(&self, frame: AMQPFrame) -> Result<()> {
        let channel_id = frame.channel_id();
        match self.get(channel_id) {
            Some(session) => session.handle_frame(frame),
            None => {
                error!(channel = channel_id, %frame, "frame received for an unknown channel");
                Err(Error::InvalidChannel(channel_id))
            }
        }
    }

    fn drain(&self) -> Vec<Session> {
        let mut inner = self.inner.lock();
        inner.on_empty = None;
        inner.sessions.drain().map(|(_, session)| session).collect()
    }

    pub(crate) fn set_connection_closing(&self) {
        self.context
            .connection_status
            .transition(ConnectionState::Closing);
        for session in self.inner.lock().sessions.values() {
            if session.id() != 0 && session.is_open() {
                session.status().set_state(ChannelState::Closing);
            }
        }
    }

    /// The connection was closed on purpose: every pending call is interrupted.
    pub(crate) fn set_connection_closed(&self, reason: Error) {
        debug!("connection closed, closing every session");
        self.context
            .connection_status
            .set_state(ConnectionState::Closed);
        for session in self.drain() {
            session.set_connection_closed(reason.clone());
        }
    }

    /// The connection failed: every pending call is interrupted with `error`.
    pub(crate) fn set_connection_error(&self, error: Error) {
        error!(%error, "connection error, failing every session");
        self.context
            .connection_status
            .transition(ConnectionState::Error);
        for session in self.drain() {
            session.set_connection_error(error.clone());
        }
    }
}

/// Lets a session give its channel number back without keeping the manager alive.
#[derive(Clone)]
pub(crate) struct SessionRemover(Weak<Mutex<Inner>>);

impl SessionRemover {
    pub(crate) fn remove(&self, id: ChannelId) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        let on_empty = {
            let mut inner = inner.lock();
            if inner.sessions.remove(&id).is_none() || id == 0 {
                return;
            }
            trace!(channel = id, "session removed");
            if inner.sessions.keys().any(|id| *id != 0) {
                None
            } else {
                inner.on_empty.take()
            }
        };
        if let Some(on_empty) = on_empty {
            debug!("last session closed, closing the connection");
            let spawned = std::thread::Builder::new()
                .name("warren-auto-close".into())
                .spawn(on_empty);
            if let Err(err) = spawned {
                error!(%err, "failed to spawn the auto-close thread");
            }
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("SessionManager");
        if let Some(inner) = self.inner.try_lock() {
            let mut ids = inner.sessions.keys().collect::<Vec<_>>();
            ids.sort();
            debug.field("sessions", &ids);
        }
        debug.finish()
    }
}
