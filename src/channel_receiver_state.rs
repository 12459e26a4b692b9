use crate::{
    continuation::Continuation,
    message::Delivery,
    protocol::basic,
    types::{ChannelId, Identifier, MessageCount, PayloadSize, ReplyCode, ShortString},
    BasicProperties, Error, Result,
};
use parking_lot::Mutex;
use std::{fmt, sync::Arc};
use tracing::error;

/// Why a session is about to receive content.
pub(crate) enum DeliveryCause {
    Consume(ShortString),
    /// The pending `basic.get` and the number of messages left in the queue.
    Get(Option<Continuation>, MessageCount),
    Return(ReplyCode, ShortString),
}

impl fmt::Debug for DeliveryCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryCause::Consume(tag) => f.debug_tuple("Consume").field(tag).finish(),
            DeliveryCause::Get(_, count) => f.debug_tuple("Get").field(count).finish(),
            DeliveryCause::Return(code, text) => {
                f.debug_tuple("Return").field(code).field(text).finish()
            }
        }
    }
}

/// A message whose method arrived, waiting for its header and body frames.
#[derive(Debug)]
pub(crate) struct PendingContent {
    pub(crate) cause: DeliveryCause,
    pub(crate) delivery: Delivery,
}

#[derive(Debug, Default)]
pub(crate) enum ChannelReceiverState {
    #[default]
    Idle,
    WillReceiveContent(PendingContent),
    ReceivingContent(PendingContent, PayloadSize),
}

/// Reassembles `method, header, body*` sequences; anything out of order is a framing error.
#[derive(Clone, Default)]
pub(crate) struct ChannelReceiverStates(Arc<Mutex<ChannelReceiverState>>);

impl ChannelReceiverStates {
    pub(crate) fn is_idle(&self) -> bool {
        matches!(*self.0.lock(), ChannelReceiverState::Idle)
    }

    pub(crate) fn set_will_receive(
        &self,
        channel_id: ChannelId,
        cause: DeliveryCause,
        delivery: Delivery,
    ) -> Result<()> {
        let mut state = self.0.lock();
        if !matches!(*state, ChannelReceiverState::Idle) {
            error!(
                channel = channel_id,
                "content method received while still receiving the previous content"
            );
            return Err(Error::InvalidFrameReceived);
        }
        *state = ChannelReceiverState::WillReceiveContent(PendingContent { cause, delivery });
        Ok(())
    }

    /// Returns the content if it is complete (empty body).
    pub(crate) fn receive_header(
        &self,
        channel_id: ChannelId,
        class_id: Identifier,
        body_size: PayloadSize,
        properties: BasicProperties,
    ) -> Result<Option<PendingContent>> {
        let mut state = self.0.lock();
        match std::mem::take(&mut *state) {
            ChannelReceiverState::WillReceiveContent(mut pending) => {
                if class_id != basic::CLASS_ID {
                    error!(
                        channel = channel_id,
                        class_id, "content header frame with an invalid class id"
                    );
                    return Err(Error::InvalidFrameReceived);
                }
                pending.delivery.properties = properties;
                if body_size == 0 {
                    Ok(Some(pending))
                } else {
                    *state = ChannelReceiverState::ReceivingContent(pending, body_size);
                    Ok(None)
                }
            }
            other => {
                *state = other;
                error!(channel = channel_id, "unexpected content header frame");
                Err(Error::InvalidFrameReceived)
            }
        }
    }

    /// Returns the content once its last body frame arrived.
    pub(crate) fn receive_body(
        &self,
        channel_id: ChannelId,
        payload: Vec<u8>,
    ) -> Result<Option<PendingContent>> {
        let mut state = self.0.lock();
        match std::mem::take(&mut *state) {
            ChannelReceiverState::ReceivingContent(mut pending, remaining) => {
                let len = payload.len() as PayloadSize;
                if len > remaining {
                    error!(
                        channel = channel_id,
                        len, remaining, "body frame larger than the announced content"
                    );
                    return Err(Error::InvalidBodyReceived);
                }
                pending.delivery.append_body(payload);
                if len == remaining {
                    Ok(Some(pending))
                } else {
                    *state = ChannelReceiverState::ReceivingContent(pending, remaining - len);
                    Ok(None)
                }
            }
            other => {
                *state = other;
                error!(channel = channel_id, "unexpected body frame");
                Err(Error::InvalidFrameReceived)
            }
        }
    }

    /// Drop any partially received content.
    pub(crate) fn reset(&self) -> Option<PendingContent> {
        match std::mem::take(&mut *self.0.lock()) {
            ChannelReceiverState::Idle => None,
            ChannelReceiverState::WillReceiveContent(pending)
            | ChannelReceiverState::ReceivingContent(pending, _) => Some(pending),
        }
    }
}

impl fmt::Debug for ChannelReceiverStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_tuple("ChannelReceiverStates");
        if let Some(state) = self.0.try_lock() {
            debug.field(&*state);
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acker::Acker;

    fn delivery() -> Delivery {
        Delivery::new(1, "".into(), "q".into(), false, Acker::default())
    }

    #[test]
    fn header_then_bodies() {
        let states = ChannelReceiverStates::default();
        states
            .set_will_receive(1, DeliveryCause::Consume("ctag".into()), delivery())
            .unwrap();
        assert!(states
            .receive_header(1, 60, 5, BasicProperties::default())
            .unwrap()
            .is_none());
        assert!(states.receive_body(1, b"he".to_vec()).unwrap().is_none());
        let pending = states.receive_body(1, b"llo".to_vec()).unwrap().unwrap();
        assert_eq!(pending.delivery.data, b"hello");
        assert!(states.is_idle());
    }

    #[test]
    fn empty_body() {
        let states = ChannelReceiverStates::default();
        states
            .set_will_receive(1, DeliveryCause::Get(None, 0), delivery())
            .unwrap();
        let pending = states
            .receive_header(1, 60, 0, BasicProperties::default())
            .unwrap()
            .unwrap();
        assert!(pending.delivery.data.is_empty());
        assert!(states.is_idle());
    }

    #[test]
    fn out_of_order() {
        let states = ChannelReceiverStates::default();
        assert_eq!(
            states.receive_body(1, vec![1]).unwrap_err(),
            Error::InvalidFrameReceived
        );
        assert_eq!(
            states
                .receive_header(1, 60, 1, BasicProperties::default())
                .unwrap_err(),
            Error::InvalidFrameReceived
        );
        states
            .set_will_receive(1, DeliveryCause::Consume("ctag".into()), delivery())
            .unwrap();
        assert_eq!(
            states
                .set_will_receive(1, DeliveryCause::Consume("ctag".into()), delivery())
                .unwrap_err(),
            Error::InvalidFrameReceived
        );
        assert_eq!(
            states
                .receive_header(1, 50, 1, BasicProperties::default())
                .unwrap_err(),
            Error::InvalidFrameReceived
        );
    }

    #[test]
    fn body_overflow() {
        let states = ChannelReceiverStates::default();
        states
            .set_will_receive(1, DeliveryCause::Consume("ctag".into()), delivery())
            .unwrap();
        states
            .receive_header(1, 60, 2, BasicProperties::default())
            .unwrap();
        assert_eq!(
            states.receive_body(1, vec![0; 3]).unwrap_err(),
            Error::InvalidBodyReceived
        );
        assert!(states.reset().is_none());
    }
}
