//! Primitive AMQP encodings: integers, strings, field tables, packed bits and property flags.
//!
//! Parsers are streaming: running out of input yields `Incomplete`. Everything nested inside
//! a length-prefixed region is run through [`complete`] so that a bad inner length is reported
//! as [`ParserError::Truncated`] instead of asking for more bytes.

use super::{GenError, GenResult, ParserError, ParserResult};
use crate::types::*;
use bytes::{BufMut, BytesMut};
use nom::{
    bytes::streaming::take,
    number::streaming::{
        be_f32, be_f64, be_i16, be_i32, be_i64, be_i8, be_u16, be_u32, be_u64, be_u8,
    },
    Err,
};

/// Number of data bits carried by each property flags word.
const FLAGS_PER_WORD: usize = 15;

pub(crate) fn complete<T>(res: ParserResult<'_, T>) -> ParserResult<'_, T> {
    res.map_err(|err| match err {
        Err::Incomplete(_) => Err::Failure(ParserError::Truncated),
        err => err,
    })
}

pub(crate) fn fail<T>(err: ParserError) -> ParserResult<'static, T> {
    Err(Err::Failure(err))
}

pub fn take_bytes(i: &[u8], count: usize) -> ParserResult<'_, &[u8]> {
    take(count)(i)
}

pub fn parse_octet(i: &[u8]) -> ParserResult<'_, ShortShortUInt> {
    be_u8(i)
}

pub fn parse_short_short_int(i: &[u8]) -> ParserResult<'_, ShortShortInt> {
    be_i8(i)
}

pub fn parse_short(i: &[u8]) -> ParserResult<'_, ShortUInt> {
    be_u16(i)
}

pub fn parse_short_int(i: &[u8]) -> ParserResult<'_, ShortInt> {
    be_i16(i)
}

pub fn parse_long(i: &[u8]) -> ParserResult<'_, LongUInt> {
    be_u32(i)
}

pub fn parse_long_int(i: &[u8]) -> ParserResult<'_, LongInt> {
    be_i32(i)
}

pub fn parse_long_long(i: &[u8]) -> ParserResult<'_, LongLongUInt> {
    be_u64(i)
}

pub fn parse_long_long_int(i: &[u8]) -> ParserResult<'_, LongLongInt> {
    be_i64(i)
}

pub fn parse_float(i: &[u8]) -> ParserResult<'_, Float> {
    be_f32(i)
}

pub fn parse_double(i: &[u8]) -> ParserResult<'_, Double> {
    be_f64(i)
}

pub fn parse_timestamp(i: &[u8]) -> ParserResult<'_, Timestamp> {
    parse_long_long(i)
}

pub fn parse_decimal_value(i: &[u8]) -> ParserResult<'_, DecimalValue> {
    let (i, scale) = parse_octet(i)?;
    let (i, value) = parse_long(i)?;
    Ok((i, DecimalValue { scale, value }))
}

pub fn parse_short_string(i: &[u8]) -> ParserResult<'_, ShortString> {
    let (i, len) = parse_octet(i)?;
    let (i, bytes) = take_bytes(i, len.into())?;
    match std::str::from_utf8(bytes) {
        Ok(s) => Ok((i, s.into())),
        Err(_) => fail(ParserError::InvalidUtf8),
    }
}

pub fn parse_long_string(i: &[u8]) -> ParserResult<'_, LongString> {
    let (i, len) = parse_long(i)?;
    let (i, bytes) = take_bytes(i, len as usize)?;
    Ok((i, bytes.into()))
}

pub fn parse_byte_array(i: &[u8]) -> ParserResult<'_, ByteArray> {
    let (i, len) = parse_long(i)?;
    let (i, bytes) = take_bytes(i, len as usize)?;
    Ok((i, bytes.into()))
}

pub fn parse_field_table(i: &[u8]) -> ParserResult<'_, FieldTable> {
    let (i, len) = parse_long(i)?;
    let (i, mut data) = take_bytes(i, len as usize)?;
    let mut table = FieldTable::default();
    while !data.is_empty() {
        let (rest, key) = complete(parse_short_string(data))?;
        let (rest, value) = complete(parse_field_value(rest))?;
        table.insert(key, value);
        data = rest;
    }
    Ok((i, table))
}

pub fn parse_field_array(i: &[u8]) -> ParserResult<'_, FieldArray> {
    let (i, len) = parse_long(i)?;
    let (i, mut data) = take_bytes(i, len as usize)?;
    let mut array = FieldArray::default();
    while !data.is_empty() {
        let (rest, value) = complete(parse_field_value(data))?;
        array.push(value);
        data = rest;
    }
    Ok((i, array))
}

/// Parse a type tag followed by the value it announces.
pub fn parse_field_value(i: &[u8]) -> ParserResult<'_, AMQPValue> {
    let (i, tag) = parse_octet(i)?;
    let kind = match AMQPType::from_id(tag) {
        Some(kind) => kind,
        None => return fail(ParserError::UnknownFieldType(tag)),
    };
    match kind {
        AMQPType::Boolean => parse_octet(i).map(|(i, b)| (i, AMQPValue::Boolean(b != 0))),
        AMQPType::ShortShortInt => {
            parse_short_short_int(i).map(|(i, v)| (i, AMQPValue::ShortShortInt(v)))
        }
        AMQPType::ShortShortUInt => parse_octet(i).map(|(i, v)| (i, AMQPValue::ShortShortUInt(v))),
        AMQPType::ShortInt => parse_short_int(i).map(|(i, v)| (i, AMQPValue::ShortInt(v))),
        AMQPType::ShortUInt => parse_short(i).map(|(i, v)| (i, AMQPValue::ShortUInt(v))),
        AMQPType::LongInt => parse_long_int(i).map(|(i, v)| (i, AMQPValue::LongInt(v))),
        AMQPType::LongUInt => parse_long(i).map(|(i, v)| (i, AMQPValue::LongUInt(v))),
        AMQPType::LongLongInt => {
            parse_long_long_int(i).map(|(i, v)| (i, AMQPValue::LongLongInt(v)))
        }
        AMQPType::LongLongUInt => parse_long_long(i).map(|(i, v)| (i, AMQPValue::LongLongUInt(v))),
        AMQPType::Float => parse_float(i).map(|(i, v)| (i, AMQPValue::Float(v))),
        AMQPType::Double => parse_double(i).map(|(i, v)| (i, AMQPValue::Double(v))),
        AMQPType::DecimalValue => {
            parse_decimal_value(i).map(|(i, v)| (i, AMQPValue::DecimalValue(v)))
        }
        AMQPType::ShortString => {
            parse_short_string(i).map(|(i, v)| (i, AMQPValue::ShortString(v)))
        }
        AMQPType::LongString => parse_long_string(i).map(|(i, v)| (i, AMQPValue::LongString(v))),
        AMQPType::FieldArray => parse_field_array(i).map(|(i, v)| (i, AMQPValue::FieldArray(v))),
        AMQPType::Timestamp => parse_timestamp(i).map(|(i, v)| (i, AMQPValue::Timestamp(v))),
        AMQPType::FieldTable => parse_field_table(i).map(|(i, v)| (i, AMQPValue::FieldTable(v))),
        AMQPType::ByteArray => parse_byte_array(i).map(|(i, v)| (i, AMQPValue::ByteArray(v))),
        AMQPType::Void => Ok((i, AMQPValue::Void)),
    }
}

/// Parse `N` method argument bits, packed 8 per octet, low bit first.
pub fn parse_bits<const N: usize>(i: &[u8]) -> ParserResult<'_, [Boolean; N]> {
    let (i, bytes) = take_bytes(i, N.div_ceil(8))?;
    let mut bits = [false; N];
    for (idx, bit) in bits.iter_mut().enumerate() {
        *bit = bytes[idx / 8] & (1 << (idx % 8)) != 0;
    }
    Ok((i, bits))
}

/// Parse content header presence flags, following continuation bits.
///
/// Each word carries 15 flags, most significant bit first; bit 0 is set when another word follows.
pub fn parse_property_flags(mut i: &[u8]) -> ParserResult<'_, Vec<Boolean>> {
    let mut flags = Vec::with_capacity(FLAGS_PER_WORD);
    loop {
        let (rest, word) = parse_short(i)?;
        i = rest;
        flags.extend((0..FLAGS_PER_WORD).map(|bit| word & (1 << (15 - bit)) != 0));
        if word & 1 == 0 {
            break;
        }
    }
    Ok((i, flags))
}

pub fn gen_short_string(buf: &mut BytesMut, s: &str) -> GenResult {
    let len = u8::try_from(s.len()).map_err(|_| GenError::ShortStringTooLong(s.len()))?;
    buf.put_u8(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

pub fn gen_long_string(buf: &mut BytesMut, bytes: &[u8]) -> GenResult {
    let len = u32::try_from(bytes.len()).map_err(|_| GenError::LongStringTooLong(bytes.len()))?;
    buf.put_u32(len);
    buf.put_slice(bytes);
    Ok(())
}

pub fn gen_decimal_value(buf: &mut BytesMut, d: &DecimalValue) {
    buf.put_u8(d.scale);
    buf.put_u32(d.value);
}

/// Reserve a 32 bits length, run `gen`, then patch the length with what it wrote.
fn gen_with_length(
    buf: &mut BytesMut,
    gen: impl FnOnce(&mut BytesMut) -> GenResult,
) -> GenResult {
    let start = buf.len();
    buf.put_u32(0);
    gen(buf)?;
    let written = buf.len() - start - 4;
    let len = u32::try_from(written).map_err(|_| GenError::LongStringTooLong(written))?;
    buf[start..start + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

pub fn gen_field_table(buf: &mut BytesMut, table: &FieldTable) -> GenResult {
    gen_with_length(buf, |buf| {
        for (key, value) in table.iter() {
            gen_short_string(buf, key.as_str())?;
            gen_field_value(buf, value)?;
        }
        Ok(())
    })
}

pub fn gen_field_array(buf: &mut BytesMut, array: &FieldArray) -> GenResult {
    gen_with_length(buf, |buf| {
        for value in array.as_slice() {
            gen_field_value(buf, value)?;
        }
        Ok(())
    })
}

/// Write the type tag of a value followed by the value itself.
pub fn gen_field_value(buf: &mut BytesMut, value: &AMQPValue) -> GenResult {
    buf.put_u8(value.get_type().get_id());
    match value {
        AMQPValue::Boolean(b) => buf.put_u8(u8::from(*b)),
        AMQPValue::ShortShortInt(v) => buf.put_i8(*v),
        AMQPValue::ShortShortUInt(v) => buf.put_u8(*v),
        AMQPValue::ShortInt(v) => buf.put_i16(*v),
        AMQPValue::ShortUInt(v) => buf.put_u16(*v),
        AMQPValue::LongInt(v) => buf.put_i32(*v),
        AMQPValue::LongUInt(v) => buf.put_u32(*v),
        AMQPValue::LongLongInt(v) => buf.put_i64(*v),
        AMQPValue::LongLongUInt(v) => buf.put_u64(*v),
        AMQPValue::Float(v) => buf.put_f32(*v),
        AMQPValue::Double(v) => buf.put_f64(*v),
        AMQPValue::DecimalValue(v) => gen_decimal_value(buf, v),
        AMQPValue::ShortString(v) => gen_short_string(buf, v.as_str())?,
        AMQPValue::LongString(v) => gen_long_string(buf, v.as_bytes())?,
        AMQPValue::FieldArray(v) => gen_field_array(buf, v)?,
        AMQPValue::Timestamp(v) => buf.put_u64(*v),
        AMQPValue::FieldTable(v) => gen_field_table(buf, v)?,
        AMQPValue::ByteArray(v) => gen_long_string(buf, v.as_slice())?,
        AMQPValue::Void => {}
    }
    Ok(())
}

/// Pack method argument bits, 8 per octet, low bit first.
pub fn gen_bits(buf: &mut BytesMut, bits: &[Boolean]) {
    for chunk in bits.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .fold(0u8, |byte, (idx, _)| byte | (1 << idx));
        buf.put_u8(byte);
    }
}

/// Write content header presence flags: 15 per word, most significant bit first,
/// with bit 0 flagging that another word follows.
pub fn gen_property_flags(buf: &mut BytesMut, flags: &[Boolean]) {
    if flags.is_empty() {
        buf.put_u16(0);
        return;
    }
    let mut chunks = flags.chunks(FLAGS_PER_WORD).peekable();
    while let Some(chunk) = chunks.next() {
        let mut word = chunk
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .fold(0u16, |word, (bit, _)| word | (1 << (15 - bit)));
        if chunks.peek().is_some() {
            word |= 1;
        }
        buf.put_u16(word);
    }
}
