use crate::{
    configuration::Configuration,
    connection_status::ConnectionState,
    format::{
        frame::{gen_frame, AMQPFrame},
        GenError,
    },
    Error, Result,
};
use bytes::{Bytes, BytesMut};
use flume::{Receiver, Sender};
use std::fmt;
use tracing::{trace, Level};

/// What the writer thread is asked to do.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Already serialised frames, written as one contiguous chunk.
    Frames(Bytes),
    Shutdown,
}

/// The handle sessions use to reach the connection's single writer.
#[derive(Clone)]
pub(crate) struct FrameSender {
    sender: Sender<Outbound>,
    configuration: Configuration,
}

impl FrameSender {
    pub(crate) fn new(configuration: Configuration) -> (Self, Receiver<Outbound>) {
        let (sender, receiver) = flume::unbounded();
        (
            Self {
                sender,
                configuration,
            },
            receiver,
        )
    }

    pub(crate) fn send_frame(&self, frame: AMQPFrame) -> Result<()> {
        self.send_frames(std::slice::from_ref(&frame))
    }

    /// Serialise `frames` and queue them as a single batch, so that no other
    /// frame can be interleaved between a publish and its content.
    pub(crate) fn send_frames(&self, frames: &[AMQPFrame]) -> Result<()> {
        let frame_max = self.configuration.frame_max() as usize;
        let mut buf = BytesMut::new();
        for frame in frames {
            if tracing::enabled!(Level::TRACE) {
                trace!(%frame, "Sending frame");
            }
            let start = buf.len();
            gen_frame(&mut buf, frame)?;
            let size = buf.len() - start;
            if frame_max != 0 && size > frame_max {
                return Err(GenError::FrameTooLarge {
                    size,
                    max: frame_max,
                }
                .into());
            }
        }
        self.sender
            .send(Outbound::Frames(buf.freeze()))
            .map_err(|_| Error::InvalidConnectionState(ConnectionState::Closed))
    }

    pub(crate) fn shutdown(&self) {
        let _ = self.sender.send(Outbound::Shutdown);
    }

    pub(crate) fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}

impl fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameSender")
            .field("configuration", &self.configuration)
            .finish()
    }
}
