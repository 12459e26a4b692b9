//! The channel class: open, flow control and close.

use crate::{
    format::{field::*, GenResult, ParserError, ParserResult},
    types::*,
};
use bytes::{BufMut, BytesMut};

pub const CLASS_ID: Identifier = 20;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Open {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpenOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Flow {
    pub active: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowOk {
    pub active: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Close {
    pub reply_code: ReplyCode,
    pub reply_text: ShortString,
    pub class_id: Identifier,
    pub method_id: Identifier,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CloseOk {}

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPMethod {
    Open(Open),
    OpenOk(OpenOk),
    Flow(Flow),
    FlowOk(FlowOk),
    Close(Close),
    CloseOk(CloseOk),
}

impl AMQPMethod {
    pub fn method_id(&self) -> Identifier {
        match self {
            AMQPMethod::Open(_) => 10,
            AMQPMethod::OpenOk(_) => 11,
            AMQPMethod::Flow(_) => 20,
            AMQPMethod::FlowOk(_) => 21,
            AMQPMethod::Close(_) => 40,
            AMQPMethod::CloseOk(_) => 41,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AMQPMethod::Open(_) => "open",
            AMQPMethod::OpenOk(_) => "open-ok",
            AMQPMethod::Flow(_) => "flow",
            AMQPMethod::FlowOk(_) => "flow-ok",
            AMQPMethod::Close(_) => "close",
            AMQPMethod::CloseOk(_) => "close-ok",
        }
    }

    pub(crate) fn gen(&self, buf: &mut BytesMut) -> GenResult {
        buf.put_u16(self.method_id());
        match self {
            // out-of-band
            AMQPMethod::Open(_) => gen_short_string(buf, ""),
            // channel-id
            AMQPMethod::OpenOk(_) => gen_long_string(buf, b""),
            AMQPMethod::Flow(Flow { active }) | AMQPMethod::FlowOk(FlowOk { active }) => {
                gen_bits(buf, &[*active]);
                Ok(())
            }
            AMQPMethod::Close(m) => {
                buf.put_u16(m.reply_code);
                gen_short_string(buf, m.reply_text.as_str())?;
                buf.put_u16(m.class_id);
                buf.put_u16(m.method_id);
                Ok(())
            }
            AMQPMethod::CloseOk(_) => Ok(()),
        }
    }
}

pub(crate) fn parse_method(method_id: Identifier, i: &[u8]) -> ParserResult<'_, AMQPMethod> {
    match method_id {
        10 => {
            let (i, _out_of_band) = parse_short_string(i)?;
            Ok((i, AMQPMethod::Open(Open {})))
        }
        11 => {
            let (i, _channel_id) = parse_long_string(i)?;
            Ok((i, AMQPMethod::OpenOk(OpenOk {})))
        }
        20 => {
            let (i, [active]) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::Flow(Flow { active })))
        }
        21 => {
            let (i, [active]) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::FlowOk(FlowOk { active })))
        }
        40 => {
            let (i, reply_code) = parse_short(i)?;
            let (i, reply_text) = parse_short_string(i)?;
            let (i, class_id) = parse_short(i)?;
            let (i, method_id) = parse_short(i)?;
            Ok((
                i,
                AMQPMethod::Close(Close {
                    reply_code,
                    reply_text,
                    class_id,
                    method_id,
                }),
            ))
        }
        41 => Ok((i, AMQPMethod::CloseOk(CloseOk {}))),
        method_id => fail(ParserError::UnknownMethod {
            class_id: CLASS_ID,
            method_id,
        }),
    }
}
