use crate::{
    channel_status::ChannelState,
    connection_status::ConnectionState,
    format::{frame::ProtocolVersion, GenError, ParserError},
    protocol::{constants::*, AMQPClass, AMQPError},
    types::{ChannelId, ReplyCode},
};
use std::{error, fmt, io, sync::Arc};
use tracing::error;

/// A std Result with a warren::Error error type
pub type Result<T> = std::result::Result<T, Error>;

/// The type of error that can be returned in this crate.
///
/// Even though we expose the complete enumeration of possible error variants, it is not
/// considered stable to exhaustively match on this enumeration: do it at your own risk.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    ChannelsLimitReached,
    ChannelAlreadyInUse(ChannelId),
    InvalidAck,
    InvalidBodyReceived,
    InvalidFrameReceived,
    MissingHeartbeat,
    PoolClosed,
    RpcTimeout,
    UnexpectedReply,

    /// The operation is not allowed by the protocol, such as a second concurrent call on a channel.
    NotSupported(&'static str),
    /// The pending call was aborted because its channel or connection shut down.
    Interrupted(Box<Error>),

    InvalidChannel(ChannelId),
    InvalidChannelState(ChannelState),
    InvalidConnectionState(ConnectionState),
    InvalidMethod(Box<AMQPClass>),
    InvalidUri(String),
    ProtocolVersionMismatch(ProtocolVersion),
    UnsupportedMechanism(String),

    IOError(Arc<io::Error>),
    ParsingError(ParserError),
    ProtocolError(AMQPError),
    SerialisationError(GenError),
}

impl Error {
    pub fn wouldblock(&self) -> bool {
        if let Error::IOError(e) = self {
            e.kind() == io::ErrorKind::WouldBlock
        } else {
            false
        }
    }

    pub fn interrupted(reason: Error) -> Self {
        match reason {
            Error::Interrupted(_) => reason,
            reason => Error::Interrupted(Box::new(reason)),
        }
    }

    /// The error behind an interruption, or the error itself.
    pub fn cause(&self) -> &Error {
        match self {
            Error::Interrupted(reason) => reason.cause(),
            _ => self,
        }
    }

    /// Errors after which the whole connection is unusable.
    pub fn is_connection_fatal(&self) -> bool {
        match self.cause() {
            Error::IOError(_)
            | Error::MissingHeartbeat
            | Error::ParsingError(_)
            | Error::InvalidChannel(_)
            | Error::InvalidFrameReceived
            | Error::InvalidBodyReceived
            | Error::ProtocolVersionMismatch(_) => true,
            Error::ProtocolError(e) => !e.is_soft(),
            Error::InvalidConnectionState(state) => {
                matches!(state, ConnectionState::Closed | ConnectionState::Error)
            }
            _ => false,
        }
    }

    /// Errors after which the channel is unusable, the connection surviving.
    pub fn is_channel_fatal(&self) -> bool {
        match self.cause() {
            Error::ProtocolError(e) => e.is_soft(),
            Error::InvalidChannelState(state) => {
                matches!(state, ChannelState::Closed | ChannelState::Error)
            }
            _ => false,
        }
    }

    /// The reply code to send along `connection.close` when this error kills the connection.
    pub(crate) fn reply_code(&self) -> ReplyCode {
        match self.cause() {
            Error::ParsingError(ParserError::UnknownMethod { .. }) => COMMAND_INVALID,
            Error::ParsingError(_) => FRAME_ERROR,
            Error::InvalidChannel(_) => CHANNEL_ERROR,
            Error::InvalidFrameReceived | Error::InvalidBodyReceived | Error::InvalidMethod(_) => {
                UNEXPECTED_FRAME
            }
            Error::ProtocolError(e) => e.get_id(),
            _ => INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChannelsLimitReached => write!(
                f,
                "the maximum number of channels for this connection has been reached"
            ),
            Error::ChannelAlreadyInUse(id) => write!(f, "channel {} is already in use", id),
            Error::InvalidAck => write!(f, "invalid acknowledgement"),
            Error::InvalidBodyReceived => write!(f, "invalid body received"),
            Error::InvalidFrameReceived => write!(f, "invalid frame received"),
            Error::MissingHeartbeat => write!(f, "no heartbeat received from the server"),
            Error::PoolClosed => write!(f, "the channel pool has been shut down"),
            Error::RpcTimeout => write!(f, "timed out waiting for a reply"),
            Error::UnexpectedReply => write!(f, "unexpected reply"),

            Error::NotSupported(what) => write!(f, "not supported: {}", what),
            Error::Interrupted(reason) => write!(f, "interrupted: {}", reason),

            Error::InvalidChannel(channel) => write!(f, "invalid channel: {}", channel),
            Error::InvalidChannelState(state) => write!(f, "invalid channel state: {:?}", state),
            Error::InvalidConnectionState(state) => {
                write!(f, "invalid connection state: {:?}", state)
            }
            Error::InvalidMethod(method) => write!(f, "invalid protocol method: {}", method),
            Error::InvalidUri(uri) => write!(f, "invalid uri: {}", uri),
            Error::ProtocolVersionMismatch(version) => {
                write!(f, "server requested protocol version {}", version)
            }
            Error::UnsupportedMechanism(mechanism) => {
                write!(f, "SASL mechanism not offered by the server: {}", mechanism)
            }

            Error::IOError(e) => write!(f, "IO error: {}", e),
            Error::ParsingError(e) => write!(f, "failed to parse: {}", e),
            Error::ProtocolError(e) => write!(f, "protocol error: {}", e),
            Error::SerialisationError(e) => write!(f, "failed to serialise: {}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Interrupted(reason) => Some(&**reason),
            Error::IOError(e) => Some(&**e),
            Error::ParsingError(e) => Some(e),
            Error::ProtocolError(e) => Some(e),
            Error::SerialisationError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(other: io::Error) -> Self {
        Error::IOError(Arc::new(other))
    }
}

impl From<ParserError> for Error {
    fn from(other: ParserError) -> Self {
        Error::ParsingError(other)
    }
}

impl From<GenError> for Error {
    fn from(other: GenError) -> Self {
        Error::SerialisationError(other)
    }
}

impl From<AMQPError> for Error {
    fn from(other: AMQPError) -> Self {
        Error::ProtocolError(other)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;

        match (self, other) {
            (ChannelsLimitReached, ChannelsLimitReached) => true,
            (ChannelAlreadyInUse(left_inner), ChannelAlreadyInUse(right_inner)) => {
                left_inner == right_inner
            }
            (InvalidAck, InvalidAck) => true,
            (InvalidBodyReceived, InvalidBodyReceived) => true,
            (InvalidFrameReceived, InvalidFrameReceived) => true,
            (MissingHeartbeat, MissingHeartbeat) => true,
            (PoolClosed, PoolClosed) => true,
            (RpcTimeout, RpcTimeout) => true,
            (UnexpectedReply, UnexpectedReply) => true,

            (NotSupported(left_inner), NotSupported(right_inner)) => left_inner == right_inner,
            (Interrupted(left_inner), Interrupted(right_inner)) => left_inner == right_inner,

            (InvalidChannel(left_inner), InvalidChannel(right_inner)) => left_inner == right_inner,
            (InvalidChannelState(left_inner), InvalidChannelState(right_inner)) => {
                left_inner == right_inner
            }
            (InvalidConnectionState(left_inner), InvalidConnectionState(right_inner)) => {
                left_inner == right_inner
            }
            (InvalidMethod(left_inner), InvalidMethod(right_inner)) => left_inner == right_inner,
            (InvalidUri(left_inner), InvalidUri(right_inner)) => left_inner == right_inner,
            (ProtocolVersionMismatch(left_inner), ProtocolVersionMismatch(right_inner)) => {
                left_inner == right_inner
            }
            (UnsupportedMechanism(left_inner), UnsupportedMechanism(right_inner)) => {
                left_inner == right_inner
            }

            (IOError(_), IOError(_)) => {
                error!("Unable to compare warren::Error::IOError");
                false
            }
            (ParsingError(left_inner), ParsingError(right_inner)) => left_inner == right_inner,
            (ProtocolError(left_inner), ProtocolError(right_inner)) => left_inner == right_inner,
            (SerialisationError(left_inner), SerialisationError(right_inner)) => {
                left_inner == right_inner
            }

            _ => false,
        }
    }
}
