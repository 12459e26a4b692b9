//! The basic class: qos, consume, publish, get and acknowledgements.

use crate::{
    format::{field::*, GenResult, ParserError, ParserResult},
    types::*,
};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

pub const CLASS_ID: Identifier = 60;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Qos {
    pub prefetch_size: LongUInt,
    pub prefetch_count: ShortUInt,
    pub global: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QosOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Consume {
    pub queue: ShortString,
    pub consumer_tag: ShortString,
    pub no_local: Boolean,
    pub no_ack: Boolean,
    pub exclusive: Boolean,
    pub nowait: Boolean,
    pub arguments: FieldTable,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConsumeOk {
    pub consumer_tag: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cancel {
    pub consumer_tag: ShortString,
    pub nowait: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CancelOk {
    pub consumer_tag: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Publish {
    pub exchange: ShortString,
    pub routing_key: ShortString,
    pub mandatory: Boolean,
    pub immediate: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Return {
    pub reply_code: ReplyCode,
    pub reply_text: ShortString,
    pub exchange: ShortString,
    pub routing_key: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Deliver {
    pub consumer_tag: ShortString,
    pub delivery_tag: DeliveryTag,
    pub redelivered: Boolean,
    pub exchange: ShortString,
    pub routing_key: ShortString,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Get {
    pub queue: ShortString,
    pub no_ack: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetOk {
    pub delivery_tag: DeliveryTag,
    pub redelivered: Boolean,
    pub exchange: ShortString,
    pub routing_key: ShortString,
    pub message_count: MessageCount,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GetEmpty {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ack {
    pub delivery_tag: DeliveryTag,
    pub multiple: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reject {
    pub delivery_tag: DeliveryTag,
    pub requeue: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecoverAsync {
    pub requeue: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Recover {
    pub requeue: Boolean,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecoverOk {}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Nack {
    pub delivery_tag: DeliveryTag,
    pub multiple: Boolean,
    pub requeue: Boolean,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPMethod {
    Qos(Qos),
    QosOk(QosOk),
    Consume(Consume),
    ConsumeOk(ConsumeOk),
    Cancel(Cancel),
    CancelOk(CancelOk),
    Publish(Publish),
    Return(Return),
    Deliver(Deliver),
    Get(Get),
    GetOk(GetOk),
    GetEmpty(GetEmpty),
    Ack(Ack),
    Reject(Reject),
    RecoverAsync(RecoverAsync),
    Recover(Recover),
    RecoverOk(RecoverOk),
    Nack(Nack),
}

impl AMQPMethod {
    pub fn method_id(&self) -> Identifier {
        match self {
            AMQPMethod::Qos(_) => 10,
            AMQPMethod::QosOk(_) => 11,
            AMQPMethod::Consume(_) => 20,
            AMQPMethod::ConsumeOk(_) => 21,
            AMQPMethod::Cancel(_) => 30,
            AMQPMethod::CancelOk(_) => 31,
            AMQPMethod::Publish(_) => 40,
            AMQPMethod::Return(_) => 50,
            AMQPMethod::Deliver(_) => 60,
            AMQPMethod::Get(_) => 70,
            AMQPMethod::GetOk(_) => 71,
            AMQPMethod::GetEmpty(_) => 72,
            AMQPMethod::Ack(_) => 80,
            AMQPMethod::Reject(_) => 90,
            AMQPMethod::RecoverAsync(_) => 100,
            AMQPMethod::Recover(_) => 110,
            AMQPMethod::RecoverOk(_) => 111,
            AMQPMethod::Nack(_) => 120,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AMQPMethod::Qos(_) => "qos",
            AMQPMethod::QosOk(_) => "qos-ok",
            AMQPMethod::Consume(_) => "consume",
            AMQPMethod::ConsumeOk(_) => "consume-ok",
            AMQPMethod::Cancel(_) => "cancel",
            AMQPMethod::CancelOk(_) => "cancel-ok",
            AMQPMethod::Publish(_) => "publish",
            AMQPMethod::Return(_) => "return",
            AMQPMethod::Deliver(_) => "deliver",
            AMQPMethod::Get(_) => "get",
            AMQPMethod::GetOk(_) => "get-ok",
            AMQPMethod::GetEmpty(_) => "get-empty",
            AMQPMethod::Ack(_) => "ack",
            AMQPMethod::Reject(_) => "reject",
            AMQPMethod::RecoverAsync(_) => "recover-async",
            AMQPMethod::Recover(_) => "recover",
            AMQPMethod::RecoverOk(_) => "recover-ok",
            AMQPMethod::Nack(_) => "nack",
        }
    }

    pub(crate) fn gen(&self, buf: &mut BytesMut) -> GenResult {
        buf.put_u16(self.method_id());
        match self {
            AMQPMethod::Qos(m) => {
                buf.put_u32(m.prefetch_size);
                buf.put_u16(m.prefetch_count);
                gen_bits(buf, &[m.global]);
            }
            AMQPMethod::Consume(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.queue.as_str())?;
                gen_short_string(buf, m.consumer_tag.as_str())?;
                gen_bits(buf, &[m.no_local, m.no_ack, m.exclusive, m.nowait]);
                gen_field_table(buf, &m.arguments)?;
            }
            AMQPMethod::ConsumeOk(ConsumeOk { consumer_tag })
            | AMQPMethod::CancelOk(CancelOk { consumer_tag }) => {
                gen_short_string(buf, consumer_tag.as_str())?;
            }
            AMQPMethod::Cancel(m) => {
                gen_short_string(buf, m.consumer_tag.as_str())?;
                gen_bits(buf, &[m.nowait]);
            }
            AMQPMethod::Publish(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.exchange.as_str())?;
                gen_short_string(buf, m.routing_key.as_str())?;
                gen_bits(buf, &[m.mandatory, m.immediate]);
            }
            AMQPMethod::Return(m) => {
                buf.put_u16(m.reply_code);
                gen_short_string(buf, m.reply_text.as_str())?;
                gen_short_string(buf, m.exchange.as_str())?;
                gen_short_string(buf, m.routing_key.as_str())?;
            }
            AMQPMethod::Deliver(m) => {
                gen_short_string(buf, m.consumer_tag.as_str())?;
                buf.put_u64(m.delivery_tag);
                gen_bits(buf, &[m.redelivered]);
                gen_short_string(buf, m.exchange.as_str())?;
                gen_short_string(buf, m.routing_key.as_str())?;
            }
            AMQPMethod::Get(m) => {
                buf.put_u16(0);
                gen_short_string(buf, m.queue.as_str())?;
                gen_bits(buf, &[m.no_ack]);
            }
            AMQPMethod::GetOk(m) => {
                buf.put_u64(m.delivery_tag);
                gen_bits(buf, &[m.redelivered]);
                gen_short_string(buf, m.exchange.as_str())?;
                gen_short_string(buf, m.routing_key.as_str())?;
                buf.put_u32(m.message_count);
            }
            // cluster-id
            AMQPMethod::GetEmpty(_) => gen_short_string(buf, "")?,
            AMQPMethod::Ack(m) => {
                buf.put_u64(m.delivery_tag);
                gen_bits(buf, &[m.multiple]);
            }
            AMQPMethod::Reject(m) => {
                buf.put_u64(m.delivery_tag);
                gen_bits(buf, &[m.requeue]);
            }
            AMQPMethod::RecoverAsync(RecoverAsync { requeue })
            | AMQPMethod::Recover(Recover { requeue }) => gen_bits(buf, &[*requeue]),
            AMQPMethod::Nack(m) => {
                buf.put_u64(m.delivery_tag);
                gen_bits(buf, &[m.multiple, m.requeue]);
            }
            AMQPMethod::QosOk(_) | AMQPMethod::RecoverOk(_) => {}
        }
        Ok(())
    }
}

pub(crate) fn parse_method(method_id: Identifier, i: &[u8]) -> ParserResult<'_, AMQPMethod> {
    match method_id {
        10 => {
            let (i, prefetch_size) = parse_long(i)?;
            let (i, prefetch_count) = parse_short(i)?;
            let (i, [global]) = parse_bits::<1>(i)?;
            Ok((
                i,
                AMQPMethod::Qos(Qos {
                    prefetch_size,
                    prefetch_count,
                    global,
                }),
            ))
        }
        11 => Ok((i, AMQPMethod::QosOk(QosOk {}))),
        20 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, queue) = parse_short_string(i)?;
            let (i, consumer_tag) = parse_short_string(i)?;
            let (i, [no_local, no_ack, exclusive, nowait]) = parse_bits::<4>(i)?;
            let (i, arguments) = parse_field_table(i)?;
            Ok((
                i,
                AMQPMethod::Consume(Consume {
                    queue,
                    consumer_tag,
                    no_local,
                    no_ack,
                    exclusive,
                    nowait,
                    arguments,
                }),
            ))
        }
        21 => {
            let (i, consumer_tag) = parse_short_string(i)?;
            Ok((i, AMQPMethod::ConsumeOk(ConsumeOk { consumer_tag })))
        }
        30 => {
            let (i, consumer_tag) = parse_short_string(i)?;
            let (i, [nowait]) = parse_bits::<1>(i)?;
            Ok((
                i,
                AMQPMethod::Cancel(Cancel {
                    consumer_tag,
                    nowait,
                }),
            ))
        }
        31 => {
            let (i, consumer_tag) = parse_short_string(i)?;
            Ok((i, AMQPMethod::CancelOk(CancelOk { consumer_tag })))
        }
        40 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, routing_key) = parse_short_string(i)?;
            let (i, [mandatory, immediate]) = parse_bits::<2>(i)?;
            Ok((
                i,
                AMQPMethod::Publish(Publish {
                    exchange,
                    routing_key,
                    mandatory,
                    immediate,
                }),
            ))
        }
        50 => {
            let (i, reply_code) = parse_short(i)?;
            let (i, reply_text) = parse_short_string(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, routing_key) = parse_short_string(i)?;
            Ok((
                i,
                AMQPMethod::Return(Return {
                    reply_code,
                    reply_text,
                    exchange,
                    routing_key,
                }),
            ))
        }
        60 => {
            let (i, consumer_tag) = parse_short_string(i)?;
            let (i, delivery_tag) = parse_long_long(i)?;
            let (i, [redelivered]) = parse_bits::<1>(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, routing_key) = parse_short_string(i)?;
            Ok((
                i,
                AMQPMethod::Deliver(Deliver {
                    consumer_tag,
                    delivery_tag,
                    redelivered,
                    exchange,
                    routing_key,
                }),
            ))
        }
        70 => {
            let (i, _ticket) = parse_short(i)?;
            let (i, queue) = parse_short_string(i)?;
            let (i, [no_ack]) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::Get(Get { queue, no_ack })))
        }
        71 => {
            let (i, delivery_tag) = parse_long_long(i)?;
            let (i, [redelivered]) = parse_bits::<1>(i)?;
            let (i, exchange) = parse_short_string(i)?;
            let (i, routing_key) = parse_short_string(i)?;
            let (i, message_count) = parse_long(i)?;
            Ok((
                i,
                AMQPMethod::GetOk(GetOk {
                    delivery_tag,
                    redelivered,
                    exchange,
                    routing_key,
                    message_count,
                }),
            ))
        }
        72 => {
            let (i, _cluster_id) = parse_short_string(i)?;
            Ok((i, AMQPMethod::GetEmpty(GetEmpty {})))
        }
        80 => {
            let (i, delivery_tag) = parse_long_long(i)?;
            let (i, [multiple]) = parse_bits::<1>(i)?;
            Ok((
                i,
                AMQPMethod::Ack(Ack {
                    delivery_tag,
                    multiple,
                }),
            ))
        }
        90 => {
            let (i, delivery_tag) = parse_long_long(i)?;
            let (i, [requeue]) = parse_bits::<1>(i)?;
            Ok((
                i,
                AMQPMethod::Reject(Reject {
                    delivery_tag,
                    requeue,
                }),
            ))
        }
        100 => {
            let (i, [requeue]) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::RecoverAsync(RecoverAsync { requeue })))
        }
        110 => {
            let (i, [requeue]) = parse_bits::<1>(i)?;
            Ok((i, AMQPMethod::Recover(Recover { requeue })))
        }
        111 => Ok((i, AMQPMethod::RecoverOk(RecoverOk {}))),
        120 => {
            let (i, delivery_tag) = parse_long_long(i)?;
            let (i, [multiple, requeue]) = parse_bits::<2>(i)?;
            Ok((
                i,
                AMQPMethod::Nack(Nack {
                    delivery_tag,
                    multiple,
                    requeue,
                }),
            ))
        }
        method_id => fail(ParserError::UnknownMethod {
            class_id: CLASS_ID,
            method_id,
        }),
    }
}

/// The properties carried by a content header.
///
/// A property is present on the wire exactly when it is `Some`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AMQPProperties {
    content_type: Option<ShortString>,
    content_encoding: Option<ShortString>,
    headers: Option<FieldTable>,
    delivery_mode: Option<ShortShortUInt>,
    priority: Option<ShortShortUInt>,
    correlation_id: Option<ShortString>,
    reply_to: Option<ShortString>,
    expiration: Option<ShortString>,
    message_id: Option<ShortString>,
    timestamp: Option<Timestamp>,
    kind: Option<ShortString>,
    user_id: Option<ShortString>,
    app_id: Option<ShortString>,
    cluster_id: Option<ShortString>,
}

impl AMQPProperties {
    pub fn with_content_type(mut self, value: ShortString) -> Self {
        self.content_type = Some(value);
        self
    }

    pub fn with_content_encoding(mut self, value: ShortString) -> Self {
        self.content_encoding = Some(value);
        self
    }

    pub fn with_headers(mut self, value: FieldTable) -> Self {
        self.headers = Some(value);
        self
    }

    pub fn with_delivery_mode(mut self, value: ShortShortUInt) -> Self {
        self.delivery_mode = Some(value);
        self
    }

    pub fn with_priority(mut self, value: ShortShortUInt) -> Self {
        self.priority = Some(value);
        self
    }

    pub fn with_correlation_id(mut self, value: ShortString) -> Self {
        self.correlation_id = Some(value);
        self
    }

    pub fn with_reply_to(mut self, value: ShortString) -> Self {
        self.reply_to = Some(value);
        self
    }

    pub fn with_expiration(mut self, value: ShortString) -> Self {
        self.expiration = Some(value);
        self
    }

    pub fn with_message_id(mut self, value: ShortString) -> Self {
        self.message_id = Some(value);
        self
    }

    pub fn with_timestamp(mut self, value: Timestamp) -> Self {
        self.timestamp = Some(value);
        self
    }

    pub fn with_type(mut self, value: ShortString) -> Self {
        self.kind = Some(value);
        self
    }

    pub fn with_user_id(mut self, value: ShortString) -> Self {
        self.user_id = Some(value);
        self
    }

    pub fn with_app_id(mut self, value: ShortString) -> Self {
        self.app_id = Some(value);
        self
    }

    pub fn with_cluster_id(mut self, value: ShortString) -> Self {
        self.cluster_id = Some(value);
        self
    }

    pub fn content_type(&self) -> &Option<ShortString> {
        &self.content_type
    }

    pub fn content_encoding(&self) -> &Option<ShortString> {
        &self.content_encoding
    }

    pub fn headers(&self) -> &Option<FieldTable> {
        &self.headers
    }

    pub fn delivery_mode(&self) -> &Option<ShortShortUInt> {
        &self.delivery_mode
    }

    pub fn priority(&self) -> &Option<ShortShortUInt> {
        &self.priority
    }

    pub fn correlation_id(&self) -> &Option<ShortString> {
        &self.correlation_id
    }

    pub fn reply_to(&self) -> &Option<ShortString> {
        &self.reply_to
    }

    pub fn expiration(&self) -> &Option<ShortString> {
        &self.expiration
    }

    pub fn message_id(&self) -> &Option<ShortString> {
        &self.message_id
    }

    pub fn timestamp(&self) -> &Option<Timestamp> {
        &self.timestamp
    }

    pub fn kind(&self) -> &Option<ShortString> {
        &self.kind
    }

    pub fn user_id(&self) -> &Option<ShortString> {
        &self.user_id
    }

    pub fn app_id(&self) -> &Option<ShortString> {
        &self.app_id
    }

    pub fn cluster_id(&self) -> &Option<ShortString> {
        &self.cluster_id
    }

    fn flags(&self) -> [Boolean; 14] {
        [
            self.content_type.is_some(),
            self.content_encoding.is_some(),
            self.headers.is_some(),
            self.delivery_mode.is_some(),
            self.priority.is_some(),
            self.correlation_id.is_some(),
            self.reply_to.is_some(),
            self.expiration.is_some(),
            self.message_id.is_some(),
            self.timestamp.is_some(),
            self.kind.is_some(),
            self.user_id.is_some(),
            self.app_id.is_some(),
            self.cluster_id.is_some(),
        ]
    }
}

fn gen_opt_short_string(buf: &mut BytesMut, value: &Option<ShortString>) -> GenResult {
    match value {
        Some(value) => gen_short_string(buf, value.as_str()),
        None => Ok(()),
    }
}

/// Write the presence flags, then every present property in declaration order.
pub fn gen_properties(buf: &mut BytesMut, props: &AMQPProperties) -> GenResult {
    gen_property_flags(buf, &props.flags());
    gen_opt_short_string(buf, &props.content_type)?;
    gen_opt_short_string(buf, &props.content_encoding)?;
    if let Some(headers) = &props.headers {
        gen_field_table(buf, headers)?;
    }
    if let Some(delivery_mode) = props.delivery_mode {
        buf.put_u8(delivery_mode);
    }
    if let Some(priority) = props.priority {
        buf.put_u8(priority);
    }
    gen_opt_short_string(buf, &props.correlation_id)?;
    gen_opt_short_string(buf, &props.reply_to)?;
    gen_opt_short_string(buf, &props.expiration)?;
    gen_opt_short_string(buf, &props.message_id)?;
    if let Some(timestamp) = props.timestamp {
        buf.put_u64(timestamp);
    }
    gen_opt_short_string(buf, &props.kind)?;
    gen_opt_short_string(buf, &props.user_id)?;
    gen_opt_short_string(buf, &props.app_id)?;
    gen_opt_short_string(buf, &props.cluster_id)
}

fn parse_opt<'a, T>(
    i: &'a [u8],
    present: Boolean,
    parser: fn(&'a [u8]) -> ParserResult<'a, T>,
) -> ParserResult<'a, Option<T>> {
    if present {
        let (i, value) = parser(i)?;
        Ok((i, Some(value)))
    } else {
        Ok((i, None))
    }
}

pub fn parse_properties(i: &[u8]) -> ParserResult<'_, AMQPProperties> {
    let (i, flags) = parse_property_flags(i)?;
    let flag = |idx: usize| flags.get(idx).copied().unwrap_or(false);
    let (i, content_type) = parse_opt(i, flag(0), parse_short_string)?;
    let (i, content_encoding) = parse_opt(i, flag(1), parse_short_string)?;
    let (i, headers) = parse_opt(i, flag(2), parse_field_table)?;
    let (i, delivery_mode) = parse_opt(i, flag(3), parse_octet)?;
    let (i, priority) = parse_opt(i, flag(4), parse_octet)?;
    let (i, correlation_id) = parse_opt(i, flag(5), parse_short_string)?;
    let (i, reply_to) = parse_opt(i, flag(6), parse_short_string)?;
    let (i, expiration) = parse_opt(i, flag(7), parse_short_string)?;
    let (i, message_id) = parse_opt(i, flag(8), parse_short_string)?;
    let (i, timestamp) = parse_opt(i, flag(9), parse_timestamp)?;
    let (i, kind) = parse_opt(i, flag(10), parse_short_string)?;
    let (i, user_id) = parse_opt(i, flag(11), parse_short_string)?;
    let (i, app_id) = parse_opt(i, flag(12), parse_short_string)?;
    let (i, cluster_id) = parse_opt(i, flag(13), parse_short_string)?;
    Ok((
        i,
        AMQPProperties {
            content_type,
            content_encoding,
            headers,
            delivery_mode,
            priority,
            correlation_id,
            reply_to,
            expiration,
            message_id,
            timestamp,
            kind,
            user_id,
            app_id,
            cluster_id,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_properties_take_no_room() {
        let mut buf = BytesMut::new();
        gen_properties(&mut buf, &AMQPProperties::default()).unwrap();
        assert_eq!(&buf[..], &[0, 0]);

        let mut buf = BytesMut::new();
        let props = AMQPProperties::default()
            .with_delivery_mode(2)
            .with_app_id("app".into());
        gen_properties(&mut buf, &props).unwrap();
        // delivery-mode is bit 12, app-id is bit 3
        assert_eq!(&buf[..], &[0b0001_0000, 0b0000_1000, 2, 3, b'a', b'p', b'p']);
        assert_eq!(parse_properties(&buf), Ok((&[][..], props)));
    }

    #[test]
    fn all_properties_round_trip() {
        let mut headers = FieldTable::default();
        headers.insert("x-retry".into(), AMQPValue::LongInt(3));
        let props = AMQPProperties::default()
            .with_content_type("application/json".into())
            .with_content_encoding("gzip".into())
            .with_headers(headers)
            .with_delivery_mode(2)
            .with_priority(5)
            .with_correlation_id("corr".into())
            .with_reply_to("replies".into())
            .with_expiration("60000".into())
            .with_message_id("id-1".into())
            .with_timestamp(1_700_000_000)
            .with_type("event".into())
            .with_user_id("guest".into())
            .with_app_id("app".into())
            .with_cluster_id("cluster".into());
        let mut buf = BytesMut::new();
        gen_properties(&mut buf, &props).unwrap();
        let (rest, parsed) = parse_properties(&buf).unwrap();
        assert!(rest.is_empty());
        assert_eq!(parsed, props);
    }
}
