//! The AMQP 0.9.1 methods this client speaks, and how to map them to and from the wire.
//!
//! Each class lives in its own module with its method structs and an `AMQPMethod` enum;
//! [`AMQPClass`] ties them together and dispatches on `(class-id, method-id)`.

pub mod basic;
pub mod channel;
pub mod confirm;
pub mod connection;
pub mod constants;
pub mod exchange;
pub mod queue;

mod error;

pub use basic::AMQPProperties;
pub use error::{AMQPError, AMQPErrorKind, AMQPHardError, AMQPSoftError};

use crate::{
    format::{
        field::{complete, parse_short},
        GenResult, ParserError, ParserResult,
    },
    types::Identifier,
};
use bytes::{BufMut, BytesMut};
use std::fmt;

pub type BasicProperties = AMQPProperties;

#[derive(Clone, Debug, PartialEq)]
pub enum AMQPClass {
    Connection(connection::AMQPMethod),
    Channel(channel::AMQPMethod),
    Exchange(exchange::AMQPMethod),
    Queue(queue::AMQPMethod),
    Basic(basic::AMQPMethod),
    Confirm(confirm::AMQPMethod),
}

impl AMQPClass {
    pub fn get_amqp_class_id(&self) -> Identifier {
        match self {
            AMQPClass::Connection(_) => connection::CLASS_ID,
            AMQPClass::Channel(_) => channel::CLASS_ID,
            AMQPClass::Exchange(_) => exchange::CLASS_ID,
            AMQPClass::Queue(_) => queue::CLASS_ID,
            AMQPClass::Basic(_) => basic::CLASS_ID,
            AMQPClass::Confirm(_) => confirm::CLASS_ID,
        }
    }

    pub fn get_amqp_method_id(&self) -> Identifier {
        match self {
            AMQPClass::Connection(m) => m.method_id(),
            AMQPClass::Channel(m) => m.method_id(),
            AMQPClass::Exchange(m) => m.method_id(),
            AMQPClass::Queue(m) => m.method_id(),
            AMQPClass::Basic(m) => m.method_id(),
            AMQPClass::Confirm(m) => m.method_id(),
        }
    }

    fn class_name(&self) -> &'static str {
        match self {
            AMQPClass::Connection(_) => "connection",
            AMQPClass::Channel(_) => "channel",
            AMQPClass::Exchange(_) => "exchange",
            AMQPClass::Queue(_) => "queue",
            AMQPClass::Basic(_) => "basic",
            AMQPClass::Confirm(_) => "confirm",
        }
    }

    fn method_name(&self) -> &'static str {
        match self {
            AMQPClass::Connection(m) => m.name(),
            AMQPClass::Channel(m) => m.name(),
            AMQPClass::Exchange(m) => m.name(),
            AMQPClass::Queue(m) => m.name(),
            AMQPClass::Basic(m) => m.name(),
            AMQPClass::Confirm(m) => m.name(),
        }
    }

    /// Whether this method is followed by a content header and body frames.
    pub fn has_content(&self) -> bool {
        matches!(
            self,
            AMQPClass::Basic(
                basic::AMQPMethod::Publish(_)
                    | basic::AMQPMethod::Return(_)
                    | basic::AMQPMethod::Deliver(_)
                    | basic::AMQPMethod::GetOk(_)
            )
        )
    }

    /// Whether this method is the synchronous answer to `request`.
    pub fn is_reply_to(&self, request: &AMQPClass) -> bool {
        use basic::AMQPMethod as Basic;
        use exchange::AMQPMethod as Exchange;

        if self.get_amqp_class_id() != request.get_amqp_class_id() {
            return false;
        }
        match (request, self) {
            (AMQPClass::Basic(Basic::Get(_)), AMQPClass::Basic(reply)) => {
                matches!(reply, Basic::GetOk(_) | Basic::GetEmpty(_))
            }
            (AMQPClass::Exchange(Exchange::Unbind(_)), AMQPClass::Exchange(reply)) => {
                matches!(reply, Exchange::UnbindOk(_))
            }
            _ => self.get_amqp_method_id() == request.get_amqp_method_id() + 1,
        }
    }
}

impl fmt::Display for AMQPClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.class_name(), self.method_name())
    }
}

/// Parse a method frame payload: class-id, method-id, then the arguments.
pub fn parse_class(i: &[u8]) -> ParserResult<'_, AMQPClass> {
    let (i, class_id) = parse_short(i)?;
    let (i, method_id) = parse_short(i)?;
    parse_method(class_id, method_id, i)
}

fn parse_method(class_id: Identifier, method_id: Identifier, i: &[u8]) -> ParserResult<'_, AMQPClass> {
    match class_id {
        connection::CLASS_ID => connection::parse_method(method_id, i)
            .map(|(i, m)| (i, AMQPClass::Connection(m))),
        channel::CLASS_ID => {
            channel::parse_method(method_id, i).map(|(i, m)| (i, AMQPClass::Channel(m)))
        }
        exchange::CLASS_ID => {
            exchange::parse_method(method_id, i).map(|(i, m)| (i, AMQPClass::Exchange(m)))
        }
        queue::CLASS_ID => queue::parse_method(method_id, i).map(|(i, m)| (i, AMQPClass::Queue(m))),
        basic::CLASS_ID => basic::parse_method(method_id, i).map(|(i, m)| (i, AMQPClass::Basic(m))),
        confirm::CLASS_ID => {
            confirm::parse_method(method_id, i).map(|(i, m)| (i, AMQPClass::Confirm(m)))
        }
        class_id => crate::format::field::fail(ParserError::UnknownMethod {
            class_id,
            method_id,
        }),
    }
}

/// Decode the arguments of the method identified by `(class_id, method_id)`.
///
/// The arguments must be complete: running out of bytes is an error, not a request for more.
pub fn decode_method(
    class_id: Identifier,
    method_id: Identifier,
    arguments: &[u8],
) -> Result<AMQPClass, ParserError> {
    complete(parse_method(class_id, method_id, arguments))
        .map(|(_, class)| class)
        .map_err(|err| match err {
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
            nom::Err::Incomplete(_) => ParserError::Truncated,
        })
}

pub fn gen_class(buf: &mut BytesMut, class: &AMQPClass) -> GenResult {
    buf.put_u16(class.get_amqp_class_id());
    match class {
        AMQPClass::Connection(m) => m.gen(buf),
        AMQPClass::Channel(m) => m.gen(buf),
        AMQPClass::Exchange(m) => m.gen(buf),
        AMQPClass::Queue(m) => m.gen(buf),
        AMQPClass::Basic(m) => m.gen(buf),
        AMQPClass::Confirm(m) => m.gen(buf),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AMQPValue, FieldTable};

    fn round_trip(class: AMQPClass) {
        let mut buf = BytesMut::new();
        gen_class(&mut buf, &class).unwrap();
        assert_eq!(
            u16::from_be_bytes([buf[0], buf[1]]),
            class.get_amqp_class_id()
        );
        assert_eq!(
            u16::from_be_bytes([buf[2], buf[3]]),
            class.get_amqp_method_id()
        );
        let (rest, parsed) = parse_class(&buf).unwrap();
        assert!(rest.is_empty(), "{} left {} bytes", class, rest.len());
        assert_eq!(parsed, class);
    }

    fn arguments() -> FieldTable {
        let mut args = FieldTable::default();
        args.insert("x-message-ttl".into(), AMQPValue::LongInt(60_000));
        args
    }

    #[test]
    fn every_method_round_trips() {
        let methods = vec![
            AMQPClass::Connection(connection::AMQPMethod::Start(connection::Start {
                version_major: 0,
                version_minor: 9,
                server_properties: arguments(),
                mechanisms: "PLAIN AMQPLAIN".into(),
                locales: "en_US".into(),
            })),
            AMQPClass::Connection(connection::AMQPMethod::StartOk(connection::StartOk {
                client_properties: arguments(),
                mechanism: "PLAIN".into(),
                response: "\0guest\0guest".into(),
                locale: "en_US".into(),
            })),
            AMQPClass::Connection(connection::AMQPMethod::Secure(connection::Secure {
                challenge: "challenge".into(),
            })),
            AMQPClass::Connection(connection::AMQPMethod::SecureOk(connection::SecureOk {
                response: "response".into(),
            })),
            AMQPClass::Connection(connection::AMQPMethod::Tune(connection::Tune {
                channel_max: 2047,
                frame_max: 131_072,
                heartbeat: 60,
            })),
            AMQPClass::Connection(connection::AMQPMethod::TuneOk(connection::TuneOk {
                channel_max: 2047,
                frame_max: 131_072,
                heartbeat: 60,
            })),
            AMQPClass::Connection(connection::AMQPMethod::Open(connection::Open {
                virtual_host: "/".into(),
            })),
            AMQPClass::Connection(connection::AMQPMethod::OpenOk(connection::OpenOk {})),
            AMQPClass::Connection(connection::AMQPMethod::Close(connection::Close {
                reply_code: 320,
                reply_text: "CONNECTION_FORCED".into(),
                class_id: 0,
                method_id: 0,
            })),
            AMQPClass::Connection(connection::AMQPMethod::CloseOk(connection::CloseOk {})),
            AMQPClass::Connection(connection::AMQPMethod::Blocked(connection::Blocked {
                reason: "low on memory".into(),
            })),
            AMQPClass::Connection(connection::AMQPMethod::Unblocked(connection::Unblocked {})),
            AMQPClass::Connection(connection::AMQPMethod::UpdateSecret(
                connection::UpdateSecret {
                    new_secret: "token".into(),
                    reason: "refresh".into(),
                },
            )),
            AMQPClass::Connection(connection::AMQPMethod::UpdateSecretOk(
                connection::UpdateSecretOk {},
            )),
            AMQPClass::Channel(channel::AMQPMethod::Open(channel::Open {})),
            AMQPClass::Channel(channel::AMQPMethod::OpenOk(channel::OpenOk {})),
            AMQPClass::Channel(channel::AMQPMethod::Flow(channel::Flow { active: true })),
            AMQPClass::Channel(channel::AMQPMethod::FlowOk(channel::FlowOk { active: false })),
            AMQPClass::Channel(channel::AMQPMethod::Close(channel::Close {
                reply_code: 406,
                reply_text: "PRECONDITION_FAILED".into(),
                class_id: 50,
                method_id: 10,
            })),
            AMQPClass::Channel(channel::AMQPMethod::CloseOk(channel::CloseOk {})),
            AMQPClass::Exchange(exchange::AMQPMethod::Declare(exchange::Declare {
                exchange: "logs".into(),
                kind: "fanout".into(),
                passive: false,
                durable: true,
                auto_delete: false,
                internal: true,
                nowait: false,
                arguments: arguments(),
            })),
            AMQPClass::Exchange(exchange::AMQPMethod::DeclareOk(exchange::DeclareOk {})),
            AMQPClass::Exchange(exchange::AMQPMethod::Delete(exchange::Delete {
                exchange: "logs".into(),
                if_unused: true,
                nowait: false,
            })),
            AMQPClass::Exchange(exchange::AMQPMethod::DeleteOk(exchange::DeleteOk {})),
            AMQPClass::Exchange(exchange::AMQPMethod::Bind(exchange::Bind {
                destination: "dst".into(),
                source: "src".into(),
                routing_key: "rk".into(),
                nowait: true,
                arguments: arguments(),
            })),
            AMQPClass::Exchange(exchange::AMQPMethod::BindOk(exchange::BindOk {})),
            AMQPClass::Exchange(exchange::AMQPMethod::Unbind(exchange::Unbind {
                destination: "dst".into(),
                source: "src".into(),
                routing_key: "rk".into(),
                nowait: false,
                arguments: FieldTable::default(),
            })),
            AMQPClass::Exchange(exchange::AMQPMethod::UnbindOk(exchange::UnbindOk {})),
            AMQPClass::Queue(queue::AMQPMethod::Declare(queue::Declare {
                queue: "jobs".into(),
                passive: false,
                durable: true,
                exclusive: false,
                auto_delete: true,
                nowait: false,
                arguments: arguments(),
            })),
            AMQPClass::Queue(queue::AMQPMethod::DeclareOk(queue::DeclareOk {
                queue: "jobs".into(),
                message_count: 12,
                consumer_count: 3,
            })),
            AMQPClass::Queue(queue::AMQPMethod::Bind(queue::Bind {
                queue: "jobs".into(),
                exchange: "logs".into(),
                routing_key: "info".into(),
                nowait: false,
                arguments: FieldTable::default(),
            })),
            AMQPClass::Queue(queue::AMQPMethod::BindOk(queue::BindOk {})),
            AMQPClass::Queue(queue::AMQPMethod::Purge(queue::Purge {
                queue: "jobs".into(),
                nowait: true,
            })),
            AMQPClass::Queue(queue::AMQPMethod::PurgeOk(queue::PurgeOk { message_count: 7 })),
            AMQPClass::Queue(queue::AMQPMethod::Delete(queue::Delete {
                queue: "jobs".into(),
                if_unused: false,
                if_empty: true,
                nowait: false,
            })),
            AMQPClass::Queue(queue::AMQPMethod::DeleteOk(queue::DeleteOk { message_count: 1 })),
            AMQPClass::Queue(queue::AMQPMethod::Unbind(queue::Unbind {
                queue: "jobs".into(),
                exchange: "logs".into(),
                routing_key: "info".into(),
                arguments: arguments(),
            })),
            AMQPClass::Queue(queue::AMQPMethod::UnbindOk(queue::UnbindOk {})),
            AMQPClass::Basic(basic::AMQPMethod::Qos(basic::Qos {
                prefetch_size: 0,
                prefetch_count: 10,
                global: true,
            })),
            AMQPClass::Basic(basic::AMQPMethod::QosOk(basic::QosOk {})),
            AMQPClass::Basic(basic::AMQPMethod::Consume(basic::Consume {
                queue: "jobs".into(),
                consumer_tag: "ctag".into(),
                no_local: false,
                no_ack: true,
                exclusive: true,
                nowait: false,
                arguments: arguments(),
            })),
            AMQPClass::Basic(basic::AMQPMethod::ConsumeOk(basic::ConsumeOk {
                consumer_tag: "ctag".into(),
            })),
            AMQPClass::Basic(basic::AMQPMethod::Cancel(basic::Cancel {
                consumer_tag: "ctag".into(),
                nowait: false,
            })),
            AMQPClass::Basic(basic::AMQPMethod::CancelOk(basic::CancelOk {
                consumer_tag: "ctag".into(),
            })),
            AMQPClass::Basic(basic::AMQPMethod::Publish(basic::Publish {
                exchange: "".into(),
                routing_key: "jobs".into(),
                mandatory: true,
                immediate: false,
            })),
            AMQPClass::Basic(basic::AMQPMethod::Return(basic::Return {
                reply_code: 312,
                reply_text: "NO_ROUTE".into(),
                exchange: "".into(),
                routing_key: "nowhere".into(),
            })),
            AMQPClass::Basic(basic::AMQPMethod::Deliver(basic::Deliver {
                consumer_tag: "ctag".into(),
                delivery_tag: u64::MAX,
                redelivered: true,
                exchange: "logs".into(),
                routing_key: "info".into(),
            })),
            AMQPClass::Basic(basic::AMQPMethod::Get(basic::Get {
                queue: "jobs".into(),
                no_ack: true,
            })),
            AMQPClass::Basic(basic::AMQPMethod::GetOk(basic::GetOk {
                delivery_tag: 1,
                redelivered: false,
                exchange: "".into(),
                routing_key: "jobs".into(),
                message_count: 0,
            })),
            AMQPClass::Basic(basic::AMQPMethod::GetEmpty(basic::GetEmpty {})),
            AMQPClass::Basic(basic::AMQPMethod::Ack(basic::Ack {
                delivery_tag: 42,
                multiple: true,
            })),
            AMQPClass::Basic(basic::AMQPMethod::Reject(basic::Reject {
                delivery_tag: 42,
                requeue: true,
            })),
            AMQPClass::Basic(basic::AMQPMethod::RecoverAsync(basic::RecoverAsync {
                requeue: true,
            })),
            AMQPClass::Basic(basic::AMQPMethod::Recover(basic::Recover { requeue: false })),
            AMQPClass::Basic(basic::AMQPMethod::RecoverOk(basic::RecoverOk {})),
            AMQPClass::Basic(basic::AMQPMethod::Nack(basic::Nack {
                delivery_tag: 42,
                multiple: false,
                requeue: true,
            })),
            AMQPClass::Confirm(confirm::AMQPMethod::Select(confirm::Select { nowait: false })),
            AMQPClass::Confirm(confirm::AMQPMethod::SelectOk(confirm::SelectOk {})),
        ];
        for method in methods {
            round_trip(method);
        }
    }

    #[test]
    fn unknown_method() {
        assert_eq!(
            decode_method(50, 99, &[]),
            Err(ParserError::UnknownMethod {
                class_id: 50,
                method_id: 99
            })
        );
        assert_eq!(
            decode_method(77, 10, &[]),
            Err(ParserError::UnknownMethod {
                class_id: 77,
                method_id: 10
            })
        );
    }

    #[test]
    fn truncated_arguments() {
        assert_eq!(decode_method(50, 31, &[0, 0]), Err(ParserError::Truncated));
    }

    #[test]
    fn method_bits_share_an_octet() {
        let declare = AMQPClass::Queue(queue::AMQPMethod::Declare(queue::Declare {
            queue: "q".into(),
            passive: true,
            durable: false,
            exclusive: true,
            auto_delete: false,
            nowait: true,
            arguments: FieldTable::default(),
        }));
        let mut buf = BytesMut::new();
        gen_class(&mut buf, &declare).unwrap();
        // class, method, ticket, "q", bits, empty table
        assert_eq!(
            &buf[..],
            &[0, 50, 0, 10, 0, 0, 1, b'q', 0b0001_0101, 0, 0, 0, 0]
        );
    }

    #[test]
    fn content_bearing_methods() {
        let publish = AMQPClass::Basic(basic::AMQPMethod::Publish(basic::Publish::default()));
        let deliver = AMQPClass::Basic(basic::AMQPMethod::Deliver(basic::Deliver::default()));
        let get_ok = AMQPClass::Basic(basic::AMQPMethod::GetOk(basic::GetOk::default()));
        let ret = AMQPClass::Basic(basic::AMQPMethod::Return(basic::Return::default()));
        let get = AMQPClass::Basic(basic::AMQPMethod::Get(basic::Get::default()));
        let ack = AMQPClass::Basic(basic::AMQPMethod::Ack(basic::Ack::default()));
        assert!(publish.has_content());
        assert!(deliver.has_content());
        assert!(get_ok.has_content());
        assert!(ret.has_content());
        assert!(!get.has_content());
        assert!(!ack.has_content());
    }

    #[test]
    fn replies() {
        let get = AMQPClass::Basic(basic::AMQPMethod::Get(basic::Get::default()));
        let get_ok = AMQPClass::Basic(basic::AMQPMethod::GetOk(basic::GetOk::default()));
        let get_empty = AMQPClass::Basic(basic::AMQPMethod::GetEmpty(basic::GetEmpty {}));
        assert!(get_ok.is_reply_to(&get));
        assert!(get_empty.is_reply_to(&get));

        let unbind = AMQPClass::Exchange(exchange::AMQPMethod::Unbind(exchange::Unbind::default()));
        let unbind_ok = AMQPClass::Exchange(exchange::AMQPMethod::UnbindOk(exchange::UnbindOk {}));
        assert!(unbind_ok.is_reply_to(&unbind));

        let declare = AMQPClass::Queue(queue::AMQPMethod::Declare(queue::Declare::default()));
        let declare_ok = AMQPClass::Queue(queue::AMQPMethod::DeclareOk(queue::DeclareOk::default()));
        let bind_ok = AMQPClass::Queue(queue::AMQPMethod::BindOk(queue::BindOk {}));
        let exchange_declare_ok =
            AMQPClass::Exchange(exchange::AMQPMethod::DeclareOk(exchange::DeclareOk {}));
        assert!(declare_ok.is_reply_to(&declare));
        assert!(!bind_ok.is_reply_to(&declare));
        assert!(!exchange_declare_ok.is_reply_to(&declare));
        assert_eq!(declare.to_string(), "queue.declare");
    }
}
