//! The confirm class: publisher acknowledgements.

use crate::{
    format::{field::*, GenResult, ParserError, ParserResult},
    types::*,
};
use bytes::{BufMut, BytesMut};

pub const CLASS_ID: Identifier = 85;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Select {
    pub nowait: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SelectOk {}

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPMethod {
    Select(Select),
    SelectOk(SelectOk),
}

impl AMQPMethod {
    pub fn method_id(&self) -> Identifier {
        match self {
            AMQPMethod::Select(_) => 10,
            AMQPMethod::SelectOk(_) => 11,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AMQPMethod::Select(_) => "select",
            AMQPMethod::SelectOk(_) => "select-ok",
        }
    }

    pub(crate) fn gen(&self, buf: &mut BytesMut) -> GenResult {
        buf.put_u16(self.method_id());
        if let AMQPMethod::Select(m) = self {
            gen_bits(buf, &[m.nowait]);
        }
        Ok(())
    }
}

pub(crate) fn parse_method(method_id: Identifier, i: &[u8]) -> ParserResult<'_, AMQPMethod> {
    match method_id {
        10 => {
            let (i, [nowait]) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::Select(Select { nowait })))
        }
        11 => Ok((i, AMQPMethod::SelectOk(SelectOk {}))),
        method_id => fail(ParserError::UnknownMethod {
            class_id: CLASS_ID,
            method_id,
        }),
    }
}
