use crate::Result;
use parking_lot::Mutex;
use std::{io, panic, sync::Arc, thread};
use tracing::error;

pub(crate) type JoinHandle = thread::JoinHandle<Result<()>>;

/// A thread owned by a connection, joined on shutdown.
#[derive(Clone, Default)]
pub(crate) struct ThreadHandle(Arc<Mutex<Option<JoinHandle>>>);

impl ThreadHandle {
    pub(crate) fn spawn<F>(name: &str, f: F) -> io::Result<Self>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let handle = thread::Builder::new().name(name.into()).spawn(f)?;
        Ok(Self(Arc::new(Mutex::new(Some(handle)))))
    }

    /// Join the thread, unless called from the thread itself.
    pub(crate) fn wait(&self, context: &'static str) -> Result<()> {
        let handle = {
            let mut inner = self.0.lock();
            match inner.as_ref() {
                Some(handle) if handle.thread().id() != thread::current().id() => inner.take(),
                _ => None,
            }
        };
        if let Some(handle) = handle {
            match handle.join() {
                Ok(res) => return res,
                Err(e) => {
                    error!(%context, "Failed waiting for thread");
                    panic::resume_unwind(e);
                }
            }
        }
        Ok(())
    }
}
