use crate::{
    channel_status::ChannelStatus,
    format::frame::AMQPFrame,
    frames::FrameSender,
    options::{BasicAckOptions, BasicNackOptions, BasicRejectOptions},
    protocol::{basic, AMQPClass},
    types::{ChannelId, DeliveryTag},
    Error, Result,
};
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

/// Settles one delivery on the channel it was received on.
///
/// A delivery can be settled only once; deliveries received in no-ack mode
/// are already settled.
#[derive(Clone, Default)]
pub struct Acker {
    channel_id: ChannelId,
    delivery_tag: DeliveryTag,
    link: Option<(FrameSender, ChannelStatus)>,
    used: Arc<AtomicBool>,
}

impl Acker {
    pub(crate) fn new(
        channel_id: ChannelId,
        delivery_tag: DeliveryTag,
        frames: FrameSender,
        status: ChannelStatus,
        no_ack: bool,
    ) -> Self {
        Self {
            channel_id,
            delivery_tag,
            link: Some((frames, status)),
            used: Arc::new(AtomicBool::new(no_ack)),
        }
    }

    pub fn ack(&self, options: BasicAckOptions) -> Result<()> {
        self.settle(basic::AMQPMethod::Ack(basic::Ack {
            delivery_tag: self.delivery_tag,
            multiple: options.multiple,
        }))
    }

    pub fn nack(&self, options: BasicNackOptions) -> Result<()> {
        self.settle(basic::AMQPMethod::Nack(basic::Nack {
            delivery_tag: self.delivery_tag,
            multiple: options.multiple,
            requeue: options.requeue,
        }))
    }

    pub fn reject(&self, options: BasicRejectOptions) -> Result<()> {
        self.settle(basic::AMQPMethod::Reject(basic::Reject {
            delivery_tag: self.delivery_tag,
            requeue: options.requeue,
        }))
    }

    /// Whether the delivery was already settled (or never needed to be).
    pub fn used(&self) -> bool {
        self.used.load(Ordering::SeqCst)
    }

    fn settle(&self, method: basic::AMQPMethod) -> Result<()> {
        let (frames, status) = self.link.as_ref().ok_or(Error::InvalidAck)?;
        if !status.can_receive_messages() {
            return Err(Error::InvalidChannelState(status.state()));
        }
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Error::InvalidAck);
        }
        frames
            .send_frame(AMQPFrame::Method(self.channel_id, AMQPClass::Basic(method)))
            .map_err(|err| {
                self.used.store(false, Ordering::SeqCst);
                err
            })
    }
}

impl PartialEq for Acker {
    fn eq(&self, other: &Acker) -> bool {
        self.channel_id == other.channel_id && self.delivery_tag == other.delivery_tag
    }
}

impl fmt::Debug for Acker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acker")
            .field("channel_id", &self.channel_id)
            .field("delivery_tag", &self.delivery_tag)
            .field("used", &self.used())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel_status::ChannelState, configuration::Configuration,
        frames::tests::sent_frames,
    };

    fn acker(no_ack: bool) -> (Acker, ChannelStatus, flume::Receiver<crate::frames::Outbound>) {
        let (frames, receiver) = FrameSender::new(Configuration::default());
        let status = ChannelStatus::default();
        status.set_state(ChannelState::Open);
        (Acker::new(3, 7, frames, status.clone(), no_ack), status, receiver)
    }

    #[test]
    fn settle_once() {
        let (acker, _status, receiver) = acker(false);
        assert_eq!(acker.ack(BasicAckOptions::default()), Ok(()));
        assert_eq!(
            acker.reject(BasicRejectOptions::default()),
            Err(Error::InvalidAck)
        );
        assert_eq!(
            sent_frames(&receiver),
            vec![AMQPFrame::Method(
                3,
                AMQPClass::Basic(basic::AMQPMethod::Ack(basic::Ack {
                    delivery_tag: 7,
                    multiple: false
                }))
            )]
        );
    }

    #[test]
    fn no_ack_deliveries_are_settled() {
        let (acker, _status, receiver) = acker(true);
        assert!(acker.used());
        assert_eq!(
            acker.nack(BasicNackOptions::default()),
            Err(Error::InvalidAck)
        );
        assert!(sent_frames(&receiver).is_empty());
    }

    #[test]
    fn closed_channel() {
        let (acker, status, _receiver) = acker(false);
        status.set_state(ChannelState::Error);
        assert_eq!(
            acker.ack(BasicAckOptions::default()),
            Err(Error::InvalidChannelState(ChannelState::Error))
        );
        assert!(!acker.used());
    }
}
