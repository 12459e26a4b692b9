use crate::types::ShortString;
use parking_lot::{Condvar, Mutex};
use std::{
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Clone, Default)]
pub struct ConnectionStatus(Arc<(Mutex<Inner>, Condvar)>);

impl ConnectionStatus {
    pub fn state(&self) -> ConnectionState {
        self.0 .0.lock().state
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let (lock, cvar) = &*self.0;
        lock.lock().state = state;
        cvar.notify_all();
    }

    /// Move to `state` unless the connection was closed on purpose in the meantime.
    pub(crate) fn transition(&self, state: ConnectionState) -> bool {
        let (lock, cvar) = &*self.0;
        let mut inner = lock.lock();
        if inner.state == ConnectionState::Closed {
            return false;
        }
        inner.state = state;
        cvar.notify_all();
        true
    }

    pub fn vhost(&self) -> String {
        self.0 .0.lock().vhost.clone()
    }

    pub(crate) fn set_vhost(&self, vhost: &str) {
        self.0 .0.lock().vhost = vhost.into();
    }

    pub fn username(&self) -> String {
        self.0 .0.lock().username.clone()
    }

    pub(crate) fn set_username(&self, username: &str) {
        self.0 .0.lock().username = username.into();
    }

    /// The reason given by the server in `connection.blocked`, if currently blocked.
    pub fn blocked(&self) -> Option<ShortString> {
        self.0 .0.lock().blocked.clone()
    }

    pub(crate) fn block(&self, reason: ShortString) {
        self.0 .0.lock().blocked = Some(reason);
    }

    pub(crate) fn unblock(&self) {
        self.0 .0.lock().blocked = None;
    }

    pub fn connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn closing(&self) -> bool {
        self.state() == ConnectionState::Closing
    }

    pub fn closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    pub fn errored(&self) -> bool {
        self.state() == ConnectionState::Error
    }

    /// Block until the connection is usable or can no longer become usable.
    pub(crate) fn wait_settled(&self, timeout: Duration) -> ConnectionState {
        let (lock, cvar) = &*self.0;
        let deadline = Instant::now() + timeout;
        let mut inner = lock.lock();
        while matches!(
            inner.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting | ConnectionState::Error
        ) && inner.recovering
        {
            if cvar.wait_until(&mut inner, deadline).timed_out() {
                break;
            }
        }
        inner.state
    }

    pub(crate) fn set_recovering(&self, recovering: bool) {
        let (lock, cvar) = &*self.0;
        lock.lock().recovering = recovering;
        cvar.notify_all();
    }

    pub fn recovering(&self) -> bool {
        self.0 .0.lock().recovering
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Initial,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    Closed,
    Error,
}

#[derive(Default)]
struct Inner {
    state: ConnectionState,
    vhost: String,
    username: String,
    blocked: Option<ShortString>,
    recovering: bool,
}

impl fmt::Debug for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ConnectionStatus");
        if let Some(inner) = self.0 .0.try_lock() {
            debug
                .field("state", &inner.state)
                .field("vhost", &inner.vhost)
                .field("username", &inner.username)
                .field("blocked", &inner.blocked);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_final_for_transitions() {
        let status = ConnectionStatus::default();
        assert!(status.transition(ConnectionState::Connected));
        status.set_state(ConnectionState::Closed);
        assert!(!status.transition(ConnectionState::Error));
        assert!(status.closed());
    }

    #[test]
    fn settled_without_recovery() {
        let status = ConnectionStatus::default();
        status.set_state(ConnectionState::Error);
        assert_eq!(
            status.wait_settled(Duration::from_millis(10)),
            ConnectionState::Error
        );
    }
}
