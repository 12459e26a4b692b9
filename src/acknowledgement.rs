use crate::{
    id_sequence::IdSequence,
    promise::{Promise, PromiseResolver},
    publisher_confirm::{Confirmation, PublisherConfirm},
    returned_messages::ReturnedMessages,
    types::DeliveryTag,
    Error, Result,
};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::warn;

/// Publications waiting for their confirmation, on a channel in confirm mode.
#[derive(Clone)]
pub(crate) struct Acknowledgements {
    inner: Arc<(Mutex<Inner>, Condvar)>,
}

struct Inner {
    delivery_tags: IdSequence<DeliveryTag>,
    pending: BTreeMap<DeliveryTag, PromiseResolver<Confirmation>>,
    returned_messages: ReturnedMessages,
}

impl Acknowledgements {
    pub(crate) fn new(returned_messages: ReturnedMessages) -> Self {
        Self {
            inner: Arc::new((
                Mutex::new(Inner {
                    delivery_tags: IdSequence::new(1),
                    pending: BTreeMap::default(),
                    returned_messages,
                }),
                Condvar::new(),
            )),
        }
    }

    /// Allocate the delivery tag of the next publication.
    pub(crate) fn register_pending(&self) -> (DeliveryTag, PublisherConfirm) {
        let mut inner = self.inner.0.lock();
        let delivery_tag = inner.delivery_tags.next();
        let (promise, resolver) = Promise::new();
        promise.set_marker(format!("confirm {}", delivery_tag));
        inner.pending.insert(delivery_tag, resolver);
        (
            delivery_tag,
            PublisherConfirm::new(promise, inner.returned_messages.clone()),
        )
    }

    /// Forget a publication that never made it to the wire.
    pub(crate) fn cancel_pending(&self, delivery_tag: DeliveryTag, error: Error) {
        let resolver = self.inner.0.lock().pending.remove(&delivery_tag);
        if let Some(resolver) = resolver {
            resolver.reject(error);
        }
        self.inner.1.notify_all();
    }

    pub(crate) fn ack(&self, delivery_tag: DeliveryTag, multiple: bool) -> Result<()> {
        self.complete(delivery_tag, multiple, true)
    }

    pub(crate) fn nack(&self, delivery_tag: DeliveryTag, multiple: bool) -> Result<()> {
        self.complete(delivery_tag, multiple, false)
    }

    fn complete(&self, delivery_tag: DeliveryTag, multiple: bool, ack: bool) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let mut inner = lock.lock();
        let tags = if multiple {
            inner
                .pending
                .range(..=delivery_tag)
                .map(|(tag, _)| *tag)
                .collect::<Vec<_>>()
        } else {
            vec![delivery_tag]
        };
        let mut res = Ok(());
        for tag in tags {
            match inner.pending.remove(&tag) {
                Some(resolver) => {
                    let message = inner.returned_messages.get_waiting_message().map(Box::new);
                    resolver.resolve(if ack {
                        Confirmation::Ack(message)
                    } else {
                        Confirmation::Nack(message)
                    });
                }
                None => {
                    warn!(delivery_tag = tag, "confirmation for an unknown publication");
                    res = Err(Error::InvalidAck);
                }
            }
        }
        cvar.notify_all();
        res
    }

    /// Fail every pending publication, as the channel went away.
    pub(crate) fn reject_all(&self, error: Error) {
        let (lock, cvar) = &*self.inner;
        let pending = std::mem::take(&mut lock.lock().pending);
        for resolver in pending.into_values() {
            resolver.reject(error.clone());
        }
        cvar.notify_all();
    }

    pub(crate) fn pending(&self) -> usize {
        self.inner.0.lock().pending.len()
    }

    /// Block until every publication made so far is confirmed.
    pub(crate) fn wait_all(&self, timeout: Option<Duration>) -> Result<()> {
        let (lock, cvar) = &*self.inner;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut inner = lock.lock();
        while !inner.pending.is_empty() {
            match deadline {
                Some(deadline) => {
                    if cvar.wait_until(&mut inner, deadline).timed_out() {
                        return Err(Error::RpcTimeout);
                    }
                }
                None => cvar.wait(&mut inner),
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Acknowledgements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Acknowledgements");
        if let Some(inner) = self.inner.0.try_lock() {
            debug.field("pending", &inner.pending.len());
        }
        debug.finish()
    }
}
