use crate::{connection_status::ConnectionState, Error, Result};
use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tracing::{trace, warn};

/// A one-shot result, waited for by blocking or by `.await`.
#[must_use = "Promise should be used or you can miss errors"]
pub(crate) struct Promise<T> {
    recv: Receiver<Result<T>>,
    recv_fut: Option<Pin<Box<dyn Future<Output = Result<T>> + Send>>>,
    marker: Arc<RwLock<Option<String>>>,
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Promise")
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        trace!(promise = %marker(&self.marker), "Dropping promise.");
    }
}

fn vanished() -> Error {
    Error::interrupted(Error::InvalidConnectionState(ConnectionState::Closed))
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn new() -> (Self, PromiseResolver<T>) {
        let (send, recv) = flume::bounded(1);
        let marker = Arc::<RwLock<Option<String>>>::default();
        let resolver = PromiseResolver {
            send,
            marker: marker.clone(),
        };
        (
            Self {
                recv,
                recv_fut: None,
                marker,
            },
            resolver,
        )
    }

    pub(crate) fn new_with_data(data: Result<T>) -> Self {
        let (promise, resolver) = Self::new();
        resolver.complete(data);
        promise
    }

    pub(crate) fn set_marker(&self, marker: String) {
        *self.marker.write() = Some(marker);
    }

    pub(crate) fn try_wait(&self) -> Option<Result<T>> {
        self.recv.try_recv().ok()
    }

    /// Block until resolved. `None` waits forever; an elapsed timeout is [`Error::RpcTimeout`].
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> Result<T> {
        match timeout {
            Some(timeout) => match self.recv.recv_timeout(timeout) {
                Ok(res) => res,
                Err(RecvTimeoutError::Timeout) => Err(Error::RpcTimeout),
                Err(RecvTimeoutError::Disconnected) => Err(vanished()),
            },
            None => self.recv.recv().unwrap_or_else(|_| Err(vanished())),
        }
    }
}

impl<T: Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.recv_fut.is_none() {
            let recv = self.recv.clone().into_recv_async();
            self.recv_fut = Some(Box::pin(async move {
                recv.await.unwrap_or_else(|_| Err(vanished()))
            }));
        }
        match self.recv_fut.as_mut() {
            Some(fut) => fut.as_mut().poll(cx),
            None => Poll::Pending,
        }
    }
}

pub(crate) struct PromiseResolver<T> {
    send: Sender<Result<T>>,
    marker: Arc<RwLock<Option<String>>>,
}

impl<T> fmt::Debug for PromiseResolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromiseResolver")
    }
}

impl<T> Clone for PromiseResolver<T> {
    fn clone(&self) -> Self {
        Self {
            send: self.send.clone(),
            marker: self.marker.clone(),
        }
    }
}

impl<T> PromiseResolver<T> {
    pub(crate) fn resolve(&self, data: T) {
        self.complete(Ok(data))
    }

    pub(crate) fn reject(&self, error: Error) {
        self.complete(Err(error))
    }

    pub(crate) fn complete(&self, res: Result<T>) {
        trace!(promise = %marker(&self.marker), "Resolving promise.");
        if self.send.try_send(res).is_err() {
            warn!(
                promise = %marker(&self.marker),
                "Failed resolving promise, promise has vanished or was already resolved.",
            );
        }
    }
}

fn marker(marker: &RwLock<Option<String>>) -> String {
    marker
        .read()
        .as_ref()
        .map_or(String::default(), |marker| format!("[{}] ", marker))
}
