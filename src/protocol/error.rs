use super::constants::*;
use crate::types::{ReplyCode, ShortString};
use std::{error, fmt};

/// An error reported by the peer through `channel.close` or `connection.close`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AMQPError {
    kind: AMQPErrorKind,
    message: ShortString,
}

/// Soft errors close the channel, hard errors close the whole connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AMQPErrorKind {
    Soft(AMQPSoftError),
    Hard(AMQPHardError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AMQPSoftError {
    ContentTooLarge,
    NoRoute,
    NoConsumers,
    AccessRefused,
    NotFound,
    ResourceLocked,
    PreconditionFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AMQPHardError {
    ConnectionForced,
    InvalidPath,
    FrameError,
    SyntaxError,
    CommandInvalid,
    ChannelError,
    UnexpectedFrame,
    ResourceError,
    NotAllowed,
    NotImplemented,
    InternalError,
}

impl AMQPError {
    pub fn new(kind: AMQPErrorKind, message: ShortString) -> Self {
        Self { kind, message }
    }

    pub fn from_id(id: ReplyCode, message: ShortString) -> Option<Self> {
        AMQPErrorKind::from_id(id).map(|kind| Self::new(kind, message))
    }

    pub fn kind(&self) -> &AMQPErrorKind {
        &self.kind
    }

    pub fn get_id(&self) -> ReplyCode {
        self.kind.get_id()
    }

    pub fn get_message(&self) -> &ShortString {
        &self.message
    }

    pub fn is_soft(&self) -> bool {
        matches!(self.kind, AMQPErrorKind::Soft(_))
    }
}

impl AMQPErrorKind {
    pub fn from_id(id: ReplyCode) -> Option<Self> {
        use AMQPHardError::*;
        use AMQPSoftError::*;

        Some(match id {
            CONTENT_TOO_LARGE => Self::Soft(ContentTooLarge),
            NO_ROUTE => Self::Soft(NoRoute),
            NO_CONSUMERS => Self::Soft(NoConsumers),
            ACCESS_REFUSED => Self::Soft(AccessRefused),
            NOT_FOUND => Self::Soft(NotFound),
            RESOURCE_LOCKED => Self::Soft(ResourceLocked),
            PRECONDITION_FAILED => Self::Soft(PreconditionFailed),
            CONNECTION_FORCED => Self::Hard(ConnectionForced),
            INVALID_PATH => Self::Hard(InvalidPath),
            FRAME_ERROR => Self::Hard(FrameError),
            SYNTAX_ERROR => Self::Hard(SyntaxError),
            COMMAND_INVALID => Self::Hard(CommandInvalid),
            CHANNEL_ERROR => Self::Hard(ChannelError),
            UNEXPECTED_FRAME => Self::Hard(UnexpectedFrame),
            RESOURCE_ERROR => Self::Hard(ResourceError),
            NOT_ALLOWED => Self::Hard(NotAllowed),
            NOT_IMPLEMENTED => Self::Hard(NotImplemented),
            INTERNAL_ERROR => Self::Hard(InternalError),
            _ => return None,
        })
    }

    pub fn get_id(&self) -> ReplyCode {
        match self {
            Self::Soft(AMQPSoftError::ContentTooLarge) => CONTENT_TOO_LARGE,
            Self::Soft(AMQPSoftError::NoRoute) => NO_ROUTE,
            Self::Soft(AMQPSoftError::NoConsumers) => NO_CONSUMERS,
            Self::Soft(AMQPSoftError::AccessRefused) => ACCESS_REFUSED,
            Self::Soft(AMQPSoftError::NotFound) => NOT_FOUND,
            Self::Soft(AMQPSoftError::ResourceLocked) => RESOURCE_LOCKED,
            Self::Soft(AMQPSoftError::PreconditionFailed) => PRECONDITION_FAILED,
            Self::Hard(AMQPHardError::ConnectionForced) => CONNECTION_FORCED,
            Self::Hard(AMQPHardError::InvalidPath) => INVALID_PATH,
            Self::Hard(AMQPHardError::FrameError) => FRAME_ERROR,
            Self::Hard(AMQPHardError::SyntaxError) => SYNTAX_ERROR,
            Self::Hard(AMQPHardError::CommandInvalid) => COMMAND_INVALID,
            Self::Hard(AMQPHardError::ChannelError) => CHANNEL_ERROR,
            Self::Hard(AMQPHardError::UnexpectedFrame) => UNEXPECTED_FRAME,
            Self::Hard(AMQPHardError::ResourceError) => RESOURCE_ERROR,
            Self::Hard(AMQPHardError::NotAllowed) => NOT_ALLOWED,
            Self::Hard(AMQPHardError::NotImplemented) => NOT_IMPLEMENTED,
            Self::Hard(AMQPHardError::InternalError) => INTERNAL_ERROR,
        }
    }
}

impl fmt::Display for AMQPError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({}): {}", self.kind, self.get_id(), self.message)
    }
}

impl error::Error for AMQPError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_codes_round_trip() {
        for code in [311, 312, 313, 320, 402, 403, 404, 405, 406, 501, 502, 503, 504, 505, 506, 530, 540, 541] {
            let kind = AMQPErrorKind::from_id(code).expect("known code");
            assert_eq!(kind.get_id(), code);
        }
        assert_eq!(AMQPErrorKind::from_id(REPLY_SUCCESS), None);
    }

    #[test]
    fn soft_and_hard() {
        let not_found = AMQPError::from_id(NOT_FOUND, "no queue 'q'".into()).unwrap();
        assert!(not_found.is_soft());
        let forced = AMQPError::from_id(CONNECTION_FORCED, "shutdown".into()).unwrap();
        assert!(!forced.is_soft());
    }
}
