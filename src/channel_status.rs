use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::trace;

#[derive(Clone, Default)]
pub struct ChannelStatus(Arc<Mutex<Inner>>);

impl ChannelStatus {
    pub fn opening(&self) -> bool {
        self.0.lock().state == ChannelState::Opening
    }

    pub fn open(&self) -> bool {
        self.0.lock().state == ChannelState::Open
    }

    pub fn closing(&self) -> bool {
        self.0.lock().state == ChannelState::Closing
    }

    /// Deliveries keep flowing while we wait for `channel.close-ok`.
    pub(crate) fn can_receive_messages(&self) -> bool {
        matches!(
            self.0.lock().state,
            ChannelState::Open | ChannelState::Closing
        )
    }

    pub fn confirm(&self) -> bool {
        self.0.lock().confirm
    }

    pub(crate) fn set_confirm(&self) {
        self.0.lock().confirm = true;
        trace!("Publisher confirms activated");
    }

    /// Whether the server allows us to publish, as toggled by `channel.flow`.
    pub fn flow(&self) -> bool {
        self.0.lock().flow
    }

    pub(crate) fn set_flow(&self, flow: bool) {
        self.0.lock().flow = flow;
    }

    pub fn state(&self) -> ChannelState {
        self.0.lock().state
    }

    pub(crate) fn set_state(&self, state: ChannelState) {
        let mut inner = self.0.lock();
        trace!(from = ?inner.state, to = ?state, "channel state transition");
        inner.state = state;
    }

    /// Move to `state` unless the channel already reached a terminal state.
    pub(crate) fn transition(&self, state: ChannelState) -> bool {
        let mut inner = self.0.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = state;
        true
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ChannelState {
    #[default]
    Opening,
    Open,
    Closing,
    Closed,
    Error,
}

impl ChannelState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Error)
    }
}

impl fmt::Debug for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ChannelStatus");
        if let Some(inner) = self.0.try_lock() {
            debug
                .field("state", &inner.state)
                .field("confirm", &inner.confirm)
                .field("flow", &inner.flow);
        }
        debug.finish()
    }
}

struct Inner {
    confirm: bool,
    flow: bool,
    state: ChannelState,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            confirm: false,
            flow: true,
            state: ChannelState::default(),
        }
    }
}
