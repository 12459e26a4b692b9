use crate::{
    message::{Delivery, DeliveryResult},
    thread::ThreadHandle,
    types::ShortString,
    Error, Result,
};
use flume::{r#async::RecvStream, Receiver, Sender};
use futures_core::stream::Stream;
use parking_lot::Mutex;
use std::{
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};
use tracing::{trace, warn};

/// Receives the deliveries of a consumer on a dedicated thread.
pub trait ConsumerDelegate: Send + 'static {
    fn on_new_delivery(&self, delivery: DeliveryResult);
}

impl<DeliveryHandler: Fn(DeliveryResult) + Send + 'static> ConsumerDelegate for DeliveryHandler {
    fn on_new_delivery(&self, delivery: DeliveryResult) {
        self(delivery);
    }
}

static NEXT_CONSUMER_ID: AtomicU64 = AtomicU64::new(1);

/// The receiving end of a `basic.consume`.
///
/// Deliveries can be drained as an [`Iterator`] (blocking), as a [`Stream`], or handed to
/// a [`ConsumerDelegate`]. All clones share the same queue of deliveries. A consumer
/// survives connection recovery: it keeps receiving once its subscription is replayed.
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    no_ack: bool,
    tag: Mutex<ShortString>,
    queue: Mutex<ShortString>,
    deliveries_in: Sender<DeliveryResult>,
    deliveries_out: Receiver<DeliveryResult>,
    stream: Mutex<Option<Pin<Box<RecvStream<'static, DeliveryResult>>>>>,
    delegate: Mutex<Option<ThreadHandle>>,
}

impl Consumer {
    pub(crate) fn new(consumer_tag: ShortString, queue: ShortString, no_ack: bool) -> Consumer {
        let (deliveries_in, deliveries_out) = flume::unbounded();
        Consumer {
            inner: Arc::new(Inner {
                id: NEXT_CONSUMER_ID.fetch_add(1, Ordering::Relaxed),
                no_ack,
                tag: Mutex::new(consumer_tag),
                queue: Mutex::new(queue),
                deliveries_in,
                deliveries_out,
                stream: Mutex::new(None),
                delegate: Mutex::new(None),
            }),
        }
    }

    /// The consumer tag, as assigned by the server when we didn't choose one.
    pub fn tag(&self) -> ShortString {
        self.inner.tag.lock().clone()
    }

    pub(crate) fn set_tag(&self, tag: ShortString) {
        *self.inner.tag.lock() = tag;
    }

    pub fn queue(&self) -> ShortString {
        self.inner.queue.lock().clone()
    }

    pub(crate) fn set_queue(&self, queue: ShortString) {
        *self.inner.queue.lock() = queue;
    }

    /// Whether deliveries are settled by the server as soon as they are sent.
    pub fn no_ack(&self) -> bool {
        self.inner.no_ack
    }

    pub(crate) fn is_same(&self, other: &Consumer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Hand every delivery, including the ones already received, to `delegate`.
    ///
    /// The delegate runs on its own thread until the consumer is canceled.
    pub fn set_delegate<D: ConsumerDelegate>(&self, delegate: D) -> Result<()> {
        let receiver = self.inner.deliveries_out.clone();
        let tag = self.tag();
        let handle = ThreadHandle::spawn("warren-consumer", move || {
            while let Ok(delivery) = receiver.recv() {
                let canceled = matches!(delivery, Ok(None));
                delegate.on_new_delivery(delivery);
                if canceled {
                    trace!(consumer_tag = %tag, "consumer canceled, stopping delegate");
                    break;
                }
            }
            Ok(())
        })?;
        *self.inner.delegate.lock() = Some(handle);
        Ok(())
    }

    pub(crate) fn new_delivery(&self, delivery: Delivery) {
        trace!(
            consumer_tag = %self.inner.tag.lock(),
            delivery_tag = delivery.delivery_tag,
            "new delivery"
        );
        self.push(Ok(Some(delivery)));
    }

    pub(crate) fn cancel(&self) {
        trace!(consumer_tag = %self.inner.tag.lock(), "cancel");
        self.push(Ok(None));
    }

    pub(crate) fn set_error(&self, error: Error) {
        trace!(consumer_tag = %self.inner.tag.lock(), %error, "set_error");
        self.push(Err(error));
        self.cancel();
    }

    /// Deliveries received but not consumed yet.
    pub fn pending(&self) -> usize {
        self.inner.deliveries_out.len()
    }

    fn push(&self, delivery: DeliveryResult) {
        if self.inner.deliveries_in.send(delivery).is_err() {
            warn!(consumer_tag = %self.inner.tag.lock(), "consumer vanished");
        }
    }
}

pub struct ConsumerIterator {
    receiver: Receiver<DeliveryResult>,
}

impl Iterator for ConsumerIterator {
    type Item = Result<Delivery>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.recv().ok().and_then(Result::transpose)
    }
}

impl IntoIterator for Consumer {
    type Item = Result<Delivery>;
    type IntoIter = ConsumerIterator;

    fn into_iter(self) -> Self::IntoIter {
        ConsumerIterator {
            receiver: self.inner.deliveries_out.clone(),
        }
    }
}

impl Stream for Consumer {
    type Item = Result<Delivery>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut stream = self.inner.stream.lock();
        let stream = stream
            .get_or_insert_with(|| Box::pin(self.inner.deliveries_out.clone().into_stream()));
        match stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(Some(delivery)))) => Poll::Ready(Some(Ok(delivery))),
            Poll::Ready(Some(Err(error))) => Poll::Ready(Some(Err(error))),
            Poll::Ready(Some(Ok(None))) | Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl PartialEq for Consumer {
    fn eq(&self, other: &Consumer) -> bool {
        self.is_same(other)
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.inner.id)
            .field("tag", &*self.inner.tag.lock())
            .field("queue", &*self.inner.queue.lock())
            .finish()
    }
}
