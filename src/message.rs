use crate::{
    acker::Acker,
    protocol::AMQPError,
    types::{DeliveryTag, MessageCount, ReplyCode, ShortString},
    BasicProperties, Result,
};
use std::ops::{Deref, DerefMut};

/// What a consumer hands out for each event.
///
/// `Ok(None)` marks the end of the consumer, after a cancellation or a closed session.
/// An `Err` is always followed by `Ok(None)`.
pub type DeliveryResult = Result<Option<Delivery>>;

/// A message pushed by `basic.deliver` or pulled by `basic.get`.
///
/// Messages received in manual-ack mode must be settled through the embedded
/// [`Acker`], which `Delivery` derefs to.
#[derive(Debug, PartialEq)]
pub struct Delivery {
    /// Scoped to the session the message arrived on.
    pub delivery_tag: DeliveryTag,
    /// Empty for the default exchange.
    pub exchange: ShortString,
    pub routing_key: ShortString,
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    pub acker: Acker,
}

impl Delivery {
    pub(crate) fn new(
        delivery_tag: DeliveryTag,
        exchange: ShortString,
        routing_key: ShortString,
        redelivered: bool,
        acker: Acker,
    ) -> Self {
        Self {
            delivery_tag,
            exchange,
            routing_key,
            redelivered,
            properties: BasicProperties::default(),
            data: Vec::new(),
            acker,
        }
    }

    /// Body frames arrive in order; the first one is moved in as is.
    pub(crate) fn append_body(&mut self, mut chunk: Vec<u8>) {
        if self.data.is_empty() {
            std::mem::swap(&mut self.data, &mut chunk);
        } else {
            self.data.append(&mut chunk);
        }
    }
}

impl Deref for Delivery {
    type Target = Acker;

    fn deref(&self) -> &Acker {
        &self.acker
    }
}

/// A message obtained with `basic.get`.
#[derive(Debug, PartialEq)]
pub struct BasicGetMessage {
    pub delivery: Delivery,
    /// Messages still waiting in the queue after this one.
    pub message_count: MessageCount,
}

/// A mandatory message the server handed back with `basic.return`.
///
/// Its delivery carries no tag and a no-op acker.
#[derive(Debug, PartialEq)]
pub struct BasicReturnMessage {
    pub delivery: Delivery,
    pub reply_code: ReplyCode,
    pub reply_text: ShortString,
}

impl BasicReturnMessage {
    pub(crate) fn new(delivery: Delivery, reply_code: ReplyCode, reply_text: ShortString) -> Self {
        Self {
            delivery,
            reply_code,
            reply_text,
        }
    }

    /// Why the server could not route the message, typically `NO_ROUTE`.
    pub fn error(&self) -> Option<AMQPError> {
        AMQPError::from_id(self.reply_code, self.reply_text.clone())
    }
}

macro_rules! wraps_delivery {
    ($($message:ty),*) => {$(
        impl Deref for $message {
            type Target = Delivery;

            fn deref(&self) -> &Delivery {
                &self.delivery
            }
        }

        impl DerefMut for $message {
            fn deref_mut(&mut self) -> &mut Delivery {
                &mut self.delivery
            }
        }
    )*};
}

wraps_delivery!(BasicGetMessage, BasicReturnMessage);
