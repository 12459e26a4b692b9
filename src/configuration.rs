use crate::{
    protocol::{connection, constants::FRAME_MIN_SIZE},
    types::{ChannelId, FrameSize, Heartbeat},
};
use parking_lot::RwLock;
use std::{fmt, sync::Arc};

/// The limits negotiated with the server for one physical connection.
///
/// Shared by every session of the connection: frame splitting reads `frame_max`,
/// channel allocation reads `channel_max` and the io loop reads `heartbeat`.
#[derive(Clone, Default)]
pub struct Configuration {
    inner: Arc<RwLock<Limits>>,
}

/// The tuning the client asks for, usually from the URI query string.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Tuning {
    pub(crate) channel_max: Option<ChannelId>,
    pub(crate) frame_max: Option<FrameSize>,
    pub(crate) heartbeat: Option<Heartbeat>,
}

#[derive(Clone, Copy)]
struct Limits {
    channel_max: ChannelId,
    frame_max: FrameSize,
    heartbeat: Heartbeat,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            channel_max: ChannelId::MAX,
            frame_max: 0,
            heartbeat: 0,
        }
    }
}

impl Configuration {
    /// The highest usable channel number. 0 means no limit.
    pub fn channel_max(&self) -> ChannelId {
        self.inner.read().channel_max
    }

    /// The largest frame either peer may send. 0 means no limit.
    pub fn frame_max(&self) -> FrameSize {
        self.inner.read().frame_max
    }

    /// In seconds, 0 when heartbeats are disabled.
    pub fn heartbeat(&self) -> Heartbeat {
        self.inner.read().heartbeat
    }

    /// Settle the limits from the server's `connection.tune`, returning the answer to send.
    ///
    /// Limits requested by the client win when stricter than the server's. An explicit
    /// heartbeat request always wins, even one disabling heartbeats.
    pub(crate) fn tune(&self, tune: &connection::Tune, requested: Tuning) -> connection::TuneOk {
        let channel_max = negotiate(
            tune.channel_max.into(),
            requested.channel_max.map(Into::into),
        );
        let limits = Limits {
            channel_max: ChannelId::try_from(channel_max).unwrap_or(ChannelId::MAX),
            frame_max: match negotiate(tune.frame_max, requested.frame_max) {
                0 => 0,
                frame_max => frame_max.max(FRAME_MIN_SIZE),
            },
            heartbeat: requested.heartbeat.unwrap_or(tune.heartbeat),
        };
        *self.inner.write() = limits;
        connection::TuneOk {
            channel_max: limits.channel_max,
            frame_max: limits.frame_max,
            heartbeat: limits.heartbeat,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_limits(channel_max: ChannelId, frame_max: FrameSize) -> Self {
        let configuration = Self::default();
        {
            let mut limits = configuration.inner.write();
            limits.channel_max = channel_max;
            limits.frame_max = frame_max;
        }
        configuration
    }
}

/// The client value wins when it is set and stricter than the server's (0 meaning no limit).
fn negotiate(server: u32, client: Option<u32>) -> u32 {
    match client {
        Some(client) if client != 0 && (server == 0 || client < server) => client,
        _ => server,
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let limits = *self.inner.read();
        f.debug_struct("Configuration")
            .field("channel_max", &limits.channel_max)
            .field("frame_max", &limits.frame_max)
            .field("heartbeat", &limits.heartbeat)
            .finish()
    }
}
