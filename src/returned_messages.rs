use crate::message::BasicReturnMessage;
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt, sync::Arc};
use tracing::warn;

/// Messages the server sent back with `basic.return`.
#[derive(Clone, Default)]
pub(crate) struct ReturnedMessages {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    /// Waiting for the ack or nack of their publication.
    waiting_messages: VecDeque<BasicReturnMessage>,
    messages: Vec<BasicReturnMessage>,
}

impl ReturnedMessages {
    pub(crate) fn new_returned_message(&self, message: BasicReturnMessage, confirm_mode: bool) {
        warn!(
            reply_code = message.reply_code,
            reply_text = %message.reply_text,
            exchange = %message.exchange,
            routing_key = %message.routing_key,
            "Server returned us a message"
        );
        let mut inner = self.inner.lock();
        if confirm_mode {
            inner.waiting_messages.push_back(message);
        } else {
            inner.messages.push(message);
        }
    }

    /// The returned message to attach to the confirmation being resolved.
    pub(crate) fn get_waiting_message(&self) -> Option<BasicReturnMessage> {
        self.inner.lock().waiting_messages.pop_front()
    }

    /// Keep a message whose confirmation was dropped without being looked at.
    pub(crate) fn register_dropped_message(&self, message: BasicReturnMessage) {
        self.inner.lock().messages.push(message);
    }

    pub(crate) fn drain(&self) -> Vec<BasicReturnMessage> {
        let mut inner = self.inner.lock();
        let mut messages = std::mem::take(&mut inner.messages);
        messages.extend(inner.waiting_messages.drain(..));
        messages
    }
}

impl fmt::Debug for ReturnedMessages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ReturnedMessages");
        if let Some(inner) = self.inner.try_lock() {
            debug
                .field("waiting_messages", &inner.waiting_messages.len())
                .field("messages", &inner.messages.len());
        }
        debug.finish()
    }
}
