use super::{
    content::{gen_content_header, parse_content_header, AMQPContentHeader},
    field::*,
    GenError, GenResult, ParserError, ParserResult,
};
use crate::{
    protocol::{constants::*, gen_class, parse_class, AMQPClass},
    types::{ChannelId, ShortShortUInt},
};
use bytes::{BufMut, BytesMut};
use std::fmt;

const PROTOCOL_NAME: &[u8] = b"AMQP";

// 0      1         3             7                    size+7 size+8
// +------+---------+-------------+   +------------+   +-----------+
// | type | channel |    size     |   | payload    |   | frame-end |
// +------+---------+-------------+   +------------+   +-----------+
//   octet  short        long        size octets           octet

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: ShortShortUInt,
    pub minor: ShortShortUInt,
    pub revision: ShortShortUInt,
}

impl ProtocolVersion {
    pub const fn amqp_0_9_1() -> Self {
        Self {
            major: 0,
            minor: 9,
            revision: 1,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.major, self.minor, self.revision)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AMQPFrameType {
    Method,
    Header,
    Body,
    Heartbeat,
}

impl AMQPFrameType {
    fn from_id(id: ShortShortUInt) -> Option<Self> {
        match id {
            FRAME_METHOD => Some(Self::Method),
            FRAME_HEADER => Some(Self::Header),
            FRAME_BODY => Some(Self::Body),
            FRAME_HEARTBEAT => Some(Self::Heartbeat),
            _ => None,
        }
    }
}

/// A frame whose payload has not been interpreted yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AMQPRawFrame<'a> {
    pub frame_type: AMQPFrameType,
    pub channel_id: ChannelId,
    pub payload: &'a [u8],
}

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPFrame {
    ProtocolHeader(ProtocolVersion),
    Method(ChannelId, AMQPClass),
    Header(ChannelId, Box<AMQPContentHeader>),
    Body(ChannelId, Vec<u8>),
    Heartbeat(ChannelId),
}

impl AMQPFrame {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            AMQPFrame::ProtocolHeader(_) => 0,
            AMQPFrame::Method(channel_id, _)
            | AMQPFrame::Header(channel_id, _)
            | AMQPFrame::Body(channel_id, _)
            | AMQPFrame::Heartbeat(channel_id) => *channel_id,
        }
    }
}

impl fmt::Display for AMQPFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AMQPFrame::ProtocolHeader(version) => write!(f, "ProtocolHeader({})", version),
            AMQPFrame::Method(channel_id, method) => {
                write!(f, "Method(channel={}, {})", channel_id, method)
            }
            AMQPFrame::Header(channel_id, header) => write!(
                f,
                "Header(channel={}, class={}, body_size={})",
                channel_id, header.class_id, header.body_size
            ),
            AMQPFrame::Body(channel_id, body) => {
                write!(f, "Body(channel={}, {} bytes)", channel_id, body.len())
            }
            AMQPFrame::Heartbeat(channel_id) => write!(f, "Heartbeat(channel={})", channel_id),
        }
    }
}

pub fn parse_protocol_header(i: &[u8]) -> ParserResult<'_, ProtocolVersion> {
    let (i, name) = take_bytes(i, PROTOCOL_NAME.len())?;
    if name != PROTOCOL_NAME {
        return fail(ParserError::Nom(nom::error::ErrorKind::Tag));
    }
    let (i, _) = parse_octet(i)?;
    let (i, major) = parse_octet(i)?;
    let (i, minor) = parse_octet(i)?;
    let (i, revision) = parse_octet(i)?;
    Ok((
        i,
        ProtocolVersion {
            major,
            minor,
            revision,
        },
    ))
}

pub fn parse_raw_frame(i: &[u8]) -> ParserResult<'_, AMQPRawFrame<'_>> {
    let (i, kind) = parse_octet(i)?;
    let frame_type = match AMQPFrameType::from_id(kind) {
        Some(frame_type) => frame_type,
        None => return fail(ParserError::UnknownFrameType(kind)),
    };
    let (i, channel_id) = parse_short(i)?;
    let (i, size) = parse_long(i)?;
    let (i, payload) = take_bytes(i, size as usize)?;
    let (i, end) = parse_octet(i)?;
    if end != FRAME_END {
        return fail(ParserError::InvalidFrameEnd(end));
    }
    Ok((
        i,
        AMQPRawFrame {
            frame_type,
            channel_id,
            payload,
        },
    ))
}

/// Parse one frame from a stream of bytes.
///
/// `Incomplete` means more bytes are needed; any other error is fatal to the connection.
pub fn parse_frame(i: &[u8]) -> ParserResult<'_, AMQPFrame> {
    if i.first() == Some(&PROTOCOL_NAME[0]) {
        let (i, version) = parse_protocol_header(i)?;
        return Ok((i, AMQPFrame::ProtocolHeader(version)));
    }
    let (i, raw) = parse_raw_frame(i)?;
    let frame = match raw.frame_type {
        AMQPFrameType::Method => {
            let (_, method) = complete(parse_class(raw.payload))?;
            AMQPFrame::Method(raw.channel_id, method)
        }
        AMQPFrameType::Header => {
            let (_, header) = complete(parse_content_header(raw.payload))?;
            AMQPFrame::Header(raw.channel_id, Box::new(header))
        }
        AMQPFrameType::Body => AMQPFrame::Body(raw.channel_id, raw.payload.to_vec()),
        AMQPFrameType::Heartbeat => AMQPFrame::Heartbeat(raw.channel_id),
    };
    Ok((i, frame))
}

/// Decode one frame out of a buffer expected to hold it entirely.
///
/// Returns the frame and how many bytes it used. A buffer shorter than what the frame
/// advertises is a [`ParserError::ShortFrame`].
pub fn decode_frame(i: &[u8]) -> Result<(AMQPFrame, usize), ParserError> {
    match parse_frame(i) {
        Ok((rest, frame)) => Ok((frame, i.len() - rest.len())),
        Err(nom::Err::Incomplete(_)) => Err(ParserError::ShortFrame {
            expected: expected_len(i),
            available: i.len(),
        }),
        Err(nom::Err::Error(err)) | Err(nom::Err::Failure(err)) => Err(err),
    }
}

fn expected_len(i: &[u8]) -> usize {
    match i.get(3..7) {
        Some(&[a, b, c, d]) => FRAME_OVERHEAD + u32::from_be_bytes([a, b, c, d]) as usize,
        _ => FRAME_OVERHEAD,
    }
}

fn gen_raw_frame(
    buf: &mut BytesMut,
    frame_type: ShortShortUInt,
    channel_id: ChannelId,
    gen_payload: impl FnOnce(&mut BytesMut) -> GenResult,
) -> GenResult {
    buf.put_u8(frame_type);
    buf.put_u16(channel_id);
    let start = buf.len();
    buf.put_u32(0);
    gen_payload(buf)?;
    let written = buf.len() - start - 4;
    let size = u32::try_from(written).map_err(|_| GenError::FrameTooLarge {
        size: written,
        max: u32::MAX as usize,
    })?;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
    buf.put_u8(FRAME_END);
    Ok(())
}

pub fn gen_frame(buf: &mut BytesMut, frame: &AMQPFrame) -> GenResult {
    match frame {
        AMQPFrame::ProtocolHeader(version) => {
            buf.put_slice(PROTOCOL_NAME);
            buf.put_slice(&[0, version.major, version.minor, version.revision]);
            Ok(())
        }
        AMQPFrame::Method(channel_id, method) => {
            gen_raw_frame(buf, FRAME_METHOD, *channel_id, |buf| gen_class(buf, method))
        }
        AMQPFrame::Header(channel_id, header) => {
            gen_raw_frame(buf, FRAME_HEADER, *channel_id, |buf| {
                gen_content_header(buf, header)
            })
        }
        AMQPFrame::Body(channel_id, body) => gen_raw_frame(buf, FRAME_BODY, *channel_id, |buf| {
            buf.put_slice(body);
            Ok(())
        }),
        AMQPFrame::Heartbeat(channel_id) => {
            gen_raw_frame(buf, FRAME_HEARTBEAT, *channel_id, |_| Ok(()))
        }
    }
}
