//! Protocol constants.

use crate::types::{FrameSize, ReplyCode, ShortShortUInt};

pub const FRAME_METHOD: ShortShortUInt = 1;
pub const FRAME_HEADER: ShortShortUInt = 2;
pub const FRAME_BODY: ShortShortUInt = 3;
pub const FRAME_HEARTBEAT: ShortShortUInt = 8;
pub const FRAME_END: ShortShortUInt = 206;

/// The smallest frame_max a peer may negotiate.
pub const FRAME_MIN_SIZE: FrameSize = 4096;
/// type, channel, size and frame-end.
pub const FRAME_OVERHEAD: usize = 8;

pub const DEFAULT_PORT: u16 = 5672;

pub const REPLY_SUCCESS: ReplyCode = 200;
pub const CONTENT_TOO_LARGE: ReplyCode = 311;
pub const NO_ROUTE: ReplyCode = 312;
pub const NO_CONSUMERS: ReplyCode = 313;
pub const CONNECTION_FORCED: ReplyCode = 320;
pub const INVALID_PATH: ReplyCode = 402;
pub const ACCESS_REFUSED: ReplyCode = 403;
pub const NOT_FOUND: ReplyCode = 404;
pub const RESOURCE_LOCKED: ReplyCode = 405;
pub const PRECONDITION_FAILED: ReplyCode = 406;
pub const FRAME_ERROR: ReplyCode = 501;
pub const SYNTAX_ERROR: ReplyCode = 502;
pub const COMMAND_INVALID: ReplyCode = 503;
pub const CHANNEL_ERROR: ReplyCode = 504;
pub const UNEXPECTED_FRAME: ReplyCode = 505;
pub const RESOURCE_ERROR: ReplyCode = 506;
pub const NOT_ALLOWED: ReplyCode = 530;
pub const NOT_IMPLEMENTED: ReplyCode = 540;
pub const INTERNAL_ERROR: ReplyCode = 541;
