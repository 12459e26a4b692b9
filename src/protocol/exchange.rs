//! The exchange class.

use crate::{
    format::{field::*, GenResult, ParserError, ParserResult},
    types::*,
};
use bytes::{BufMut, BytesMut};

pub const CLASS_ID: Identifier = 40;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Declare {
    pub exchange: ShortString,
    pub kind: ShortString,
    pub passive: Boolean,
    pub durable: Boolean,
    pub auto_delete: Boolean,
    pub internal: Boolean,
    pub nowait: Boolean,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeclareOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delete {
    pub exchange: ShortString,
    pub if_unused: Boolean,
    pub nowait: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeleteOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bind {
    pub destination: ShortString,
    pub source: ShortString,
    pub routing_key: ShortString,
    pub nowait: Boolean,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BindOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Unbind {
    pub destination: ShortString,
    pub source: ShortString,
    pub routing_key: ShortString,
    pub nowait: Boolean,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnbindOk {}

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPMethod {
    Declare(Declare),
    DeclareOk(DeclareOk),
    Delete(Delete),
    DeleteOk(DeleteOk),
    Bind(Bind),
    BindOk(BindOk),
    Unbind(Unbind),
    UnbindOk(UnbindOk),
}

impl AMQPMethod {
    pub fn method_id(&self) -> Identifier {
        match self {
            AMQPMethod::Declare(_) => 10,
            AMQPMethod::DeclareOk(_) => 11,
            AMQPMethod::Delete(_) => 20,
            AMQPMethod::DeleteOk(_) => 21,
            AMQPMethod::Bind(_) => 30,
            AMQPMethod::BindOk(_) => 31,
            AMQPMethod::Unbind(_) => 40,
            AMQPMethod::UnbindOk(_) => 51,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AMQPMethod::Declare(_) => "declare",
            AMQPMethod::DeclareOk(_) => "declare-ok",
            AMQPMethod::Delete(_) => "delete",
            AMQPMethod::DeleteOk(_) => "delete-ok",
            AMQPMethod::Bind(_) => "bind",
            AMQPMethod::BindOk(_) => "bind-ok",
            AMQPMethod::Unbind(_) => "unbind",
            AMQPMethod::UnbindOk(_) => "unbind-ok",
        }
    }

    pub(crate) fn gen(&self, buf: &mut BytesMut) -> GenResult {
        buf.put_u16(self.method_id());
        match self {
            AMQPMethod::Declare(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.exchange.as_str())?;
                gen_short_string(buf, m.kind.as_str())?;
                gen_bits(
                    buf,
                    &[m.passive, m.durable, m.auto_delete, m.internal, m.nowait],
                );
                gen_field_table(buf, &m.arguments)
            }
            AMQPMethod::Delete(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.exchange.as_str())?;
                gen_bits(buf, &[m.if_unused, m.nowait]);
                Ok(())
            }
            AMQPMethod::Bind(Bind {
                destination,
                source,
                routing_key,
                nowait,
                arguments,
            })
            | AMQPMethod::Unbind(Unbind {
                destination,
                source,
                routing_key,
                nowait,
                arguments,
            }) => {
                buf.put_u16(0);
                gen_short_string(buf, destination.as_str())?;
                gen_short_string(buf, source.as_str())?;
                gen_short_string(buf, routing_key.as_str())?;
                gen_bits(buf, &[*nowait]);
                gen_field_table(buf, arguments)
            }
            AMQPMethod::DeclareOk(_)
            | AMQPMethod::DeleteOk(_)
            | AMQPMethod::BindOk(_)
            | AMQPMethod::UnbindOk(_) => Ok(()),
        }
    }
}

pub(crate) fn parse_method(method_id: Identifier, i: &[u8]) -> ParserResult<'_, AMQPMethod> {
    match method_id {
        10 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, kind) = parse_short_string(i)?;
            let (i, [passive, durable, auto_delete, internal, nowait]) = parse_bits::<5>(i)?;
            let (i, arguments) = parse_field_table(i)?;
            Ok((
                i,
                AMQPMethod::Declare(Declare {
                    exchange,
                    kind,
                    passive,
                    durable,
                    auto_delete,
                    internal,
                    nowait,
                    arguments,
                }),
            ))
        }
        11 => Ok((i, AMQPMethod::DeclareOk(DeclareOk {}))),
        20 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, [if_unused, nowait]) = parse_bits::<2>(i)?;
            Ok((
                i,
                AMQPMethod::Delete(Delete {
                    exchange,
                    if_unused,
                    nowait,
                }),
            ))
        }
        21 => Ok((i, AMQPMethod::DeleteOk(DeleteOk {}))),
        30 | 40 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, destination) = parse_short_string(i)?;
            let (i, source) = parse_short_string(i)?;
            let (i, routing_key) = parse_short_string(i)?;
            let (i, [nowait]) = parse_bits::<1>(i)?;
            let (i, arguments) = parse_field_table(i)?;
            let method = if method_id == 30 {
                AMQPMethod::Bind(Bind {
                    destination,
                    source,
                    routing_key,
                    nowait,
                    arguments,
                })
            } else {
                AMQPMethod::Unbind(Unbind {
                    destination,
                    source,
                    routing_key,
                    nowait,
                    arguments,
                })
            };
            Ok((i, method))
        }
        31 => Ok((i, AMQPMethod::BindOk(BindOk {}))),
        51 => Ok((i, AMQPMethod::UnbindOk(UnbindOk {}))),
        method_id => fail(ParserError::UnknownMethod {
            class_id: CLASS_ID,
            method_id,
        }),
    }
}
