use super::{field::*, GenResult, ParserResult};
use crate::{
    protocol::{
        basic::{gen_properties, parse_properties},
        BasicProperties,
    },
    types::{Identifier, PayloadSize, ShortUInt},
};
use bytes::{BufMut, BytesMut};

// 0          2        4           12               14
// +----------+--------+-----------+----------------+------------- - -
// | class-id | weight | body size | property flags | property list...
// +----------+--------+-----------+----------------+------------- - -
//    short     short    long long       short       remainder...

#[derive(Clone, Debug, PartialEq)]
pub struct AMQPContentHeader {
    pub class_id: Identifier,
    pub weight: ShortUInt,
    pub body_size: PayloadSize,
    pub properties: BasicProperties,
}

pub fn parse_content_header(i: &[u8]) -> ParserResult<'_, AMQPContentHeader> {
    let (i, class_id) = parse_short(i)?;
    let (i, weight) = parse_short(i)?;
    let (i, body_size) = parse_long_long(i)?;
    let (i, properties) = parse_properties(i)?;
    Ok((
        i,
        AMQPContentHeader {
            class_id,
            weight,
            body_size,
            properties,
        },
    ))
}

pub fn gen_content_header(buf: &mut BytesMut, header: &AMQPContentHeader) -> GenResult {
    buf.put_u16(header.class_id);
    buf.put_u16(header.weight);
    buf.put_u64(header.body_size);
    gen_properties(buf, &header.properties)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = AMQPContentHeader {
            class_id: 60,
            weight: 0,
            body_size: 3,
            properties: BasicProperties::default().with_priority(9),
        };
        let mut buf = BytesMut::new();
        gen_content_header(&mut buf, &header).unwrap();
        assert_eq!(
            &buf[..],
            &[0, 60, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0b0000_1000, 0, 9]
        );
        assert_eq!(parse_content_header(&buf), Ok((&[][..], header)));
    }
}
