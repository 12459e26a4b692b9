use crate::{consumer::Consumer, message::Delivery, types::ShortString, Error};
use parking_lot::Mutex;
use std::{collections::HashMap, fmt, sync::Arc};
use tracing::warn;

/// The consumers subscribed on one session, by consumer tag.
#[derive(Clone, Default)]
pub(crate) struct Consumers(Arc<Mutex<HashMap<ShortString, Consumer>>>);

impl Consumers {
    pub(crate) fn register(&self, tag: ShortString, consumer: Consumer) {
        self.0.lock().insert(tag, consumer);
    }

    /// Forget the consumer, letting it know it won't receive anything more.
    pub(crate) fn deregister(&self, consumer_tag: &str) -> Option<Consumer> {
        let consumer = self.0.lock().remove(consumer_tag);
        if let Some(consumer) = consumer.as_ref() {
            consumer.cancel();
        }
        consumer
    }

    pub(crate) fn get(&self, consumer_tag: &str) -> Option<Consumer> {
        self.0.lock().get(consumer_tag).cloned()
    }

    pub(crate) fn deliver(&self, consumer_tag: &str, delivery: Delivery) {
        // clone so that the consumer is not called under our lock
        let consumer = self.0.lock().get(consumer_tag).cloned();
        match consumer {
            Some(consumer) => consumer.new_delivery(delivery),
            None => warn!(
                %consumer_tag,
                delivery_tag = delivery.delivery_tag,
                "delivery for an unknown consumer, dropping it"
            ),
        }
    }

    pub(crate) fn cancel(&self) {
        for (_, consumer) in self.0.lock().drain() {
            consumer.cancel();
        }
    }

    pub(crate) fn error(&self, error: Error) {
        for (_, consumer) in self.0.lock().drain() {
            consumer.set_error(error.clone());
        }
    }

    /// Forget every consumer without notifying them, as they are about to be
    /// subscribed again on another session.
    pub(crate) fn detach(&self) {
        self.0.lock().clear();
    }

    pub(crate) fn tags(&self) -> Vec<ShortString> {
        self.0.lock().keys().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }
}

impl fmt::Debug for Consumers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_tuple("Consumers");
        if let Some(consumers) = self.0.try_lock() {
            debug.field(&*consumers);
        }
        debug.finish()
    }
}
