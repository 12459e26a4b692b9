//! The queue class.

use crate::{
    format::{field::*, GenResult, ParserError, ParserResult},
    types::*,
};
use bytes::{BufMut, BytesMut};

pub const CLASS_ID: Identifier = 50;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Declare {
    pub queue: ShortString,
    pub passive: Boolean,
    pub durable: Boolean,
    pub exclusive: Boolean,
    pub auto_delete: Boolean,
    pub nowait: Boolean,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeclareOk {
    pub queue: ShortString,
    pub message_count: MessageCount,
    pub consumer_count: ConsumerCount,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bind {
    pub queue: ShortString,
    pub exchange: ShortString,
    pub routing_key: ShortString,
    pub nowait: Boolean,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Purge {
    pub queue: ShortString,
    pub nowait: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PurgeOk {
    pub message_count: MessageCount,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delete {
    pub queue: ShortString,
    pub if_unused: Boolean,
    pub if_empty: Boolean,
    pub nowait: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteOk {
    pub message_count: MessageCount,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Unbind {
    pub queue: ShortString,
    pub exchange: ShortString,
    pub routing_key: ShortString,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnbindOk {}

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPMethod {
    Declare(Declare),
    DeclareOk(DeclareOk),
    Bind(Bind),
    BindOk(BindOk),
    Purge(Purge),
    PurgeOk(PurgeOk),
    Delete(Delete),
    DeleteOk(DeleteOk),
    Unbind(Unbind),
    UnbindOk(UnbindOk),
}

impl AMQPMethod {
    pub fn method_id(&self) -> Identifier {
        match self {
            AMQPMethod::Declare(_) => 10,
            AMQPMethod::DeclareOk(_) => 11,
            AMQPMethod::Bind(_) => 20,
            AMQPMethod::BindOk(_) => 21,
            AMQPMethod::Purge(_) => 30,
            AMQPMethod::PurgeOk(_) => 31,
            AMQPMethod::Delete(_) => 40,
            AMQPMethod::DeleteOk(_) => 41,
            AMQPMethod::Unbind(_) => 50,
            AMQPMethod::UnbindOk(_) => 51,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AMQPMethod::Declare(_) => "declare",
            AMQPMethod::DeclareOk(_) => "declare-ok",
            AMQPMethod::Bind(_) => "bind",
            AMQPMethod::BindOk(_) => "bind-ok",
            AMQPMethod::Purge(_) => "purge",
            AMQPMethod::PurgeOk(_) => "purge-ok",
            AMQPMethod::Delete(_) => "delete",
            AMQPMethod::DeleteOk(_) => "delete-ok",
            AMQPMethod::Unbind(_) => "unbind",
            AMQPMethod::UnbindOk(_) => "unbind-ok",
        }
    }

    pub(crate) fn gen(&self, buf: &mut BytesMut) -> GenResult {
        buf.put_u16(self.method_id());
        match self {
            AMQPMethod::Declare(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.queue.as_str())?;
                gen_bits(
                    buf,
                    &[m.passive, m.durable, m.exclusive, m.auto_delete, m.nowait],
                );
                gen_field_table(buf, &m.arguments)
            }
            AMQPMethod::DeclareOk(m) => {
                gen_short_string(buf, m.queue.as_str())?;
                buf.put_u32(m.message_count);
                buf.put_u32(m.consumer_count);
                Ok(())
            }
            AMQPMethod::Bind(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.queue.as_str())?;
                gen_short_string(buf, m.exchange.as_str())?;
                gen_short_string(buf, m.routing_key.as_str())?;
                gen_bits(buf, &[m.nowait]);
                gen_field_table(buf, &m.arguments)
            }
            AMQPMethod::Purge(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.queue.as_str())?;
                gen_bits(buf, &[m.nowait]);
                Ok(())
            }
            AMQPMethod::PurgeOk(PurgeOk { message_count })
            | AMQPMethod::DeleteOk(DeleteOk { message_count }) => {
                buf.put_u32(*message_count);
                Ok(())
            }
            AMQPMethod::Delete(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.queue.as_str())?;
                gen_bits(buf, &[m.if_unused, m.if_empty, m.nowait]);
                Ok(())
            }
            AMQPMethod::Unbind(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.queue.as_str())?;
                gen_short_string(buf, m.exchange.as_str())?;
                gen_short_string(buf, m.routing_key.as_str())?;
                gen_field_table(buf, &m.arguments)
            }
            AMQPMethod::BindOk(_) | AMQPMethod::UnbindOk(_) => Ok(()),
        }
    }
}

pub(crate) fn parse_method(method_id: Identifier, i: &[u8]) -> ParserResult<'_, AMQPMethod> {
    match method_id {
        10 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, queue) = parse_short_string(i)?;
            let (i, [passive, durable, exclusive, auto_delete, nowait]) = parse_bits::<5>(i)?;
            let (i, arguments) = parse_field_table(i)?;
            Ok((
                i,
                AMQPMethod::Declare(Declare {
                    queue,
                    passive,
                    durable,
                    exclusive,
                    auto_delete,
                    nowait,
                    arguments,
                }),
            ))
        }
        11 => {
            let (i, queue) = parse_short_string(i)?;
            let (i, message_count) = parse_long(i)?;
            let (i, consumer_count) = parse_long(i)?;
            Ok((
                i,
                AMQPMethod::DeclareOk(DeclareOk {
                    queue,
                    message_count,
                    consumer_count,
                }),
            ))
        }
        20 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, queue) = parse_short_string(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, routing_key) = parse_short_string(i)?;
            let (i, [nowait]) = parse_bits::<1>(i)?;
            let (i, arguments) = parse_field_table(i)?;
            Ok((
                i,
                AMQPMethod::Bind(Bind {
                    queue,
                    exchange,
                    routing_key,
                    nowait,
                    arguments,
                }),
            ))
        }
        21 => Ok((i, AMQPMethod::BindOk(BindOk {}))),
        30 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, queue) = parse_short_string(i)?;
            let (i, [nowait]) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::Purge(Purge { queue, nowait })))
        }
        31 => {
            let (i, message_count) = parse_long(i)?;
            Ok((i, AMQPMethod::PurgeOk(PurgeOk { message_count })))
        }
        40 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, queue) = parse_short_string(i)?;
            let (i, [if_unused, if_empty, nowait]) = parse_bits::<3>(i)?;
            Ok((
                i,
                AMQPMethod::Delete(Delete {
                    queue,
                    if_unused,
                    if_empty,
                    nowait,
                }),
            ))
        }
        41 => {
            let (i, message_count) = parse_long(i)?;
            Ok((i, AMQPMethod::DeleteOk(DeleteOk { message_count })))
        }
        50 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, queue) = parse_short_string(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, routing_key) = parse_short_string(i)?;
            let (i, arguments) = parse_field_table(i)?;
            Ok((
                i,
                AMQPMethod::Unbind(Unbind {
                    queue,
                    exchange,
                    routing_key,
                    arguments,
                }),
            ))
        }
        51 => Ok((i, AMQPMethod::UnbindOk(UnbindOk {}))),
        method_id => fail(ParserError::UnknownMethod {
            class_id: CLASS_ID,
            method_id,
        }),
    }
}
