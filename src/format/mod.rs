//! Wire format: frames, content headers and field values.

pub mod content;
pub mod field;
pub mod frame;

use crate::types::Identifier;
use nom::{
    error::{ErrorKind, ParseError},
    IResult,
};
use std::{error, fmt};

pub type ParserResult<'a, T> = IResult<&'a [u8], T, ParserError>;
pub type GenResult = Result<(), GenError>;

/// Errors that can occur while decoding bytes received from the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParserError {
    ShortFrame { expected: usize, available: usize },
    InvalidFrameEnd(u8),
    UnknownFrameType(u8),
    UnknownMethod {
        class_id: Identifier,
        method_id: Identifier,
    },
    UnknownFieldType(u8),
    InvalidUtf8,
    /// A length prefix pointed past the end of the enclosing payload.
    Truncated,
    Nom(ErrorKind),
}

impl fmt::Display for ParserError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParserError::ShortFrame {
                expected,
                available,
            } => write!(
                f,
                "short frame: expected {} bytes, only {} available",
                expected, available
            ),
            ParserError::InvalidFrameEnd(end) => write!(f, "invalid frame end marker: {}", end),
            ParserError::UnknownFrameType(kind) => write!(f, "unknown frame type: {}", kind),
            ParserError::UnknownMethod {
                class_id,
                method_id,
            } => write!(f, "unknown method {}.{}", class_id, method_id),
            ParserError::UnknownFieldType(tag) => write!(f, "unknown field type: {}", tag),
            ParserError::InvalidUtf8 => write!(f, "invalid utf-8 in short string"),
            ParserError::Truncated => write!(f, "truncated payload"),
            ParserError::Nom(kind) => write!(f, "parser error: {:?}", kind),
        }
    }
}

impl error::Error for ParserError {}

impl<'a> ParseError<&'a [u8]> for ParserError {
    fn from_error_kind(_input: &'a [u8], kind: ErrorKind) -> Self {
        ParserError::Nom(kind)
    }

    fn append(_input: &'a [u8], _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

/// Errors that can occur while serialising frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GenError {
    ShortStringTooLong(usize),
    LongStringTooLong(usize),
    FrameTooLarge { size: usize, max: usize },
}

impl fmt::Display for GenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenError::ShortStringTooLong(len) => {
                write!(f, "short string too long: {} bytes (max 255)", len)
            }
            GenError::LongStringTooLong(len) => write!(f, "long string too long: {} bytes", len),
            GenError::FrameTooLarge { size, max } => {
                write!(f, "frame too large: {} bytes (max {})", size, max)
            }
        }
    }
}

impl error::Error for GenError {}
