use crate::{
    consumer::Consumer,
    message::BasicGetMessage,
    promise::PromiseResolver,
    protocol::AMQPClass,
    Error, Result,
};
use parking_lot::Mutex;
use std::{collections::VecDeque, fmt, sync::Arc};
use tracing::{debug, trace};

/// The synchronous answer to a call.
#[derive(Debug)]
pub(crate) struct Reply {
    pub(crate) method: AMQPClass,
    /// The message assembled after `basic.get-ok`.
    pub(crate) message: Option<BasicGetMessage>,
}

/// What a caller blocked in a call is waiting for.
///
/// The id is assigned by the [`ContinuationQueue`] it is enqueued in.
pub(crate) struct Continuation {
    pub(crate) id: u64,
    pub(crate) request: AMQPClass,
    pub(crate) resolver: PromiseResolver<Reply>,
    /// The consumer to register once `basic.consume-ok` comes back.
    pub(crate) consumer: Option<Consumer>,
}

impl Continuation {
    pub(crate) fn new(request: AMQPClass, resolver: PromiseResolver<Reply>) -> Self {
        Self {
            id: 0,
            request,
            resolver,
            consumer: None,
        }
    }

    pub(crate) fn with_consumer(mut self, consumer: Consumer) -> Self {
        self.consumer = Some(consumer);
        self
    }

    pub(crate) fn resolve(self, method: AMQPClass) {
        self.resolver.resolve(Reply {
            method,
            message: None,
        });
    }

    pub(crate) fn resolve_with_message(self, method: AMQPClass, message: BasicGetMessage) {
        self.resolver.resolve(Reply {
            method,
            message: Some(message),
        });
    }

    pub(crate) fn reject(self, error: Error) {
        self.resolver.reject(error);
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("id", &self.id)
            .field("request", &format_args!("{}", self.request))
            .finish()
    }
}

/// The single outstanding call of a session.
///
/// AMQP forbids pipelining synchronous methods on a channel, so at most one
/// continuation is ever pending. Calls that timed out are remembered until
/// their late reply shows up, so that it cannot complete a later call.
#[derive(Clone, Default)]
pub(crate) struct ContinuationQueue(Arc<Mutex<Inner>>);

#[derive(Default)]
struct Inner {
    pending: Option<Continuation>,
    abandoned: VecDeque<AMQPClass>,
    last_id: u64,
}

/// Where an inbound reply belongs.
pub(crate) enum ReplyTarget {
    Pending(Continuation),
    /// The late answer to a call that timed out.
    Abandoned(AMQPClass),
    Unexpected,
}

impl ContinuationQueue {
    /// Returns the id to give back to [`take_if_id`](Self::take_if_id) or
    /// [`abandon`](Self::abandon).
    pub(crate) fn enqueue(&self, mut continuation: Continuation) -> Result<u64> {
        let mut inner = self.0.lock();
        if inner.pending.is_some() {
            return Err(Error::NotSupported("pipelining forbidden"));
        }
        inner.last_id += 1;
        continuation.id = inner.last_id;
        trace!(id = continuation.id, request = %continuation.request, "expecting reply");
        inner.pending = Some(continuation);
        Ok(inner.last_id)
    }

    pub(crate) fn next(&self) -> Option<Continuation> {
        self.0.lock().pending.take()
    }

    /// Route `reply` to the call it answers.
    ///
    /// Replies come back in request order, so the oldest abandoned call
    /// answered by `reply` takes it before the pending one.
    pub(crate) fn next_for(&self, reply: &AMQPClass) -> ReplyTarget {
        let mut inner = self.0.lock();
        if let Some(index) = inner
            .abandoned
            .iter()
            .position(|request| reply.is_reply_to(request))
        {
            if let Some(request) = inner.abandoned.remove(index) {
                return ReplyTarget::Abandoned(request);
            }
        }
        match inner.pending.as_ref() {
            Some(continuation) if reply.is_reply_to(&continuation.request) => inner
                .pending
                .take()
                .map_or(ReplyTarget::Unexpected, ReplyTarget::Pending),
            _ => ReplyTarget::Unexpected,
        }
    }

    /// Take the pending continuation back if it is still the given one.
    ///
    /// For a request that never reached the wire.
    pub(crate) fn take_if_id(&self, id: u64) -> Option<Continuation> {
        let mut inner = self.0.lock();
        match inner.pending.as_ref() {
            Some(continuation) if continuation.id == id => inner.pending.take(),
            _ => None,
        }
    }

    /// Give up on a call that was sent, expecting its reply to arrive later.
    ///
    /// Returns false when the reply already won the race.
    pub(crate) fn abandon(&self, id: u64) -> bool {
        let mut inner = self.0.lock();
        match inner.pending.as_ref() {
            Some(continuation) if continuation.id == id => {
                if let Some(continuation) = inner.pending.take() {
                    debug!(request = %continuation.request, "abandoning call");
                    inner.abandoned.push_back(continuation.request);
                }
                true
            }
            _ => false,
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.0.lock().pending.is_some()
    }

    /// Fail the pending call. No reply is expected anymore once the session goes down.
    pub(crate) fn interrupt(&self, reason: Error) {
        let continuation = {
            let mut inner = self.0.lock();
            inner.abandoned.clear();
            inner.pending.take()
        };
        if let Some(continuation) = continuation {
            trace!(request = %continuation.request, %reason, "interrupting call");
            continuation.reject(Error::interrupted(reason));
        }
    }
}

impl fmt::Debug for ContinuationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ContinuationQueue");
        if let Some(inner) = self.0.try_lock() {
            debug
                .field("pending", &inner.pending)
                .field("abandoned", &inner.abandoned.len());
        }
        debug.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        promise::Promise,
        protocol::{basic, queue},
    };

    fn declare() -> (Promise<Reply>, Continuation) {
        let (promise, resolver) = Promise::new();
        let request = AMQPClass::Queue(queue::AMQPMethod::Declare(queue::Declare {
            queue: "q".into(),
            ..Default::default()
        }));
        (promise, Continuation::new(request, resolver))
    }

    #[test]
    fn no_pipelining() {
        let queue = ContinuationQueue::default();
        let (_p1, first) = declare();
        let (_p2, second) = declare();
        queue.enqueue(first).unwrap();
        assert_eq!(
            queue.enqueue(second).unwrap_err(),
            Error::NotSupported("pipelining forbidden")
        );
        assert!(queue.next().is_some());
        assert!(queue.next().is_none());
    }

    #[test]
    fn only_matching_replies() {
        let queue = ContinuationQueue::default();
        let (promise, continuation) = declare();
        queue.enqueue(continuation).unwrap();
        let unrelated = AMQPClass::Basic(basic::AMQPMethod::QosOk(basic::QosOk {}));
        assert!(matches!(queue.next_for(&unrelated), ReplyTarget::Unexpected));
        let reply = AMQPClass::Queue(queue::AMQPMethod::DeclareOk(queue::DeclareOk {
            queue: "q".into(),
            message_count: 0,
            consumer_count: 0,
        }));
        match queue.next_for(&reply) {
            ReplyTarget::Pending(continuation) => continuation.resolve(reply.clone()),
            _ => panic!("the reply should answer the pending call"),
        }
        assert_eq!(promise.wait(None).unwrap().method, reply);
    }

    #[test]
    fn interrupt_and_timeout_cleanup() {
        let queue = ContinuationQueue::default();
        let (promise, continuation) = declare();
        let id = queue.enqueue(continuation).unwrap();
        assert!(queue.take_if_id(id + 1).is_none());
        assert!(queue.take_if_id(id).is_some());
        assert!(!queue.is_pending());

        let (promise2, continuation) = declare();
        queue.enqueue(continuation).unwrap();
        queue.interrupt(Error::MissingHeartbeat);
        assert_eq!(
            promise2.wait(None).unwrap_err(),
            Error::Interrupted(Box::new(Error::MissingHeartbeat))
        );
        drop(promise);
    }

    #[test]
    fn ids_are_per_queue() {
        let first = ContinuationQueue::default();
        let second = ContinuationQueue::default();
        let (_p1, continuation) = declare();
        assert_eq!(first.enqueue(continuation).unwrap(), 1);
        let (_p2, continuation) = declare();
        assert_eq!(second.enqueue(continuation).unwrap(), 1);
        first.next();
        let (_p3, continuation) = declare();
        assert_eq!(first.enqueue(continuation).unwrap(), 2);
    }

    #[test]
    fn late_reply_goes_to_the_abandoned_call() {
        let queue = ContinuationQueue::default();
        let (_stale, continuation) = declare();
        let id = queue.enqueue(continuation).unwrap();
        assert!(queue.abandon(id));
        assert!(!queue.abandon(id));

        let (promise, continuation) = declare();
        queue.enqueue(continuation).unwrap();
        let reply = AMQPClass::Queue(queue::AMQPMethod::DeclareOk(queue::DeclareOk {
            queue: "q".into(),
            message_count: 0,
            consumer_count: 0,
        }));
        assert!(matches!(queue.next_for(&reply), ReplyTarget::Abandoned(_)));
        assert!(queue.is_pending());
        match queue.next_for(&reply) {
            ReplyTarget::Pending(continuation) => continuation.resolve(reply.clone()),
            _ => panic!("the second reply should answer the pending call"),
        }
        assert_eq!(promise.wait(None).unwrap().method, reply);
    }

    #[test]
    fn interrupt_forgets_abandoned_calls() {
        let queue = ContinuationQueue::default();
        let (_stale, continuation) = declare();
        let id = queue.enqueue(continuation).unwrap();
        assert!(queue.abandon(id));
        queue.interrupt(Error::MissingHeartbeat);
        let reply = AMQPClass::Queue(queue::AMQPMethod::DeclareOk(queue::DeclareOk {
            queue: "q".into(),
            message_count: 0,
            consumer_count: 0,
        }));
        assert!(matches!(queue.next_for(&reply), ReplyTarget::Unexpected));
    }
}
