use crate::{
    message::BasicReturnMessage, promise::Promise, returned_messages::ReturnedMessages, Result,
};
use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

/// The outcome of a publication.
#[derive(Debug, PartialEq)]
pub enum Confirmation {
    /// The server took responsibility for the message. It carries the message back if
    /// it was published as mandatory and could not be routed.
    Ack(Option<Box<BasicReturnMessage>>),
    Nack(Option<Box<BasicReturnMessage>>),
    /// The channel is not in confirm mode.
    NotRequested,
}

impl Confirmation {
    pub fn is_ack(&self) -> bool {
        matches!(self, Confirmation::Ack(_))
    }

    pub fn is_nack(&self) -> bool {
        matches!(self, Confirmation::Nack(_))
    }

    pub fn take_message(self) -> Option<BasicReturnMessage> {
        match self {
            Confirmation::Ack(message) | Confirmation::Nack(message) => message.map(|m| *m),
            Confirmation::NotRequested => None,
        }
    }
}

/// Resolves to the [`Confirmation`] of one publication, by blocking or by `.await`.
#[must_use = "PublisherConfirm should be used or you can miss errors"]
pub struct PublisherConfirm {
    inner: Promise<Confirmation>,
    returned_messages: ReturnedMessages,
    used: bool,
}

impl PublisherConfirm {
    pub(crate) fn new(inner: Promise<Confirmation>, returned_messages: ReturnedMessages) -> Self {
        Self {
            inner,
            returned_messages,
            used: false,
        }
    }

    pub(crate) fn not_requested(returned_messages: ReturnedMessages) -> Self {
        Self::new(
            Promise::new_with_data(Ok(Confirmation::NotRequested)),
            returned_messages,
        )
    }

    pub fn try_wait(&mut self) -> Option<Result<Confirmation>> {
        let confirmation = self.inner.try_wait()?;
        self.used = true;
        Some(confirmation)
    }

    pub fn wait(mut self) -> Result<Confirmation> {
        self.used = true;
        self.inner.wait(None)
    }

    /// Like [`wait`](Self::wait), failing with [`Error::RpcTimeout`](crate::Error::RpcTimeout)
    /// after `timeout`.
    pub fn wait_timeout(mut self, timeout: Duration) -> Result<Confirmation> {
        self.used = true;
        self.inner.wait(Some(timeout))
    }
}

impl Future for PublisherConfirm {
    type Output = Result<Confirmation>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let res = Pin::new(&mut self.inner).poll(cx);
        if res.is_ready() {
            self.used = true;
        }
        res
    }
}

impl Drop for PublisherConfirm {
    fn drop(&mut self) {
        if !self.used {
            if let Some(Ok(confirmation)) = self.inner.try_wait() {
                if let Some(message) = confirmation.take_message() {
                    self.returned_messages.register_dropped_message(message);
                }
            }
        }
    }
}

impl fmt::Debug for PublisherConfirm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherConfirm")
            .field("used", &self.used)
            .finish()
    }
}
