use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::utils::error::{Error, Result};

/// Outcome of a client operation, resolved by the event loop.
///
/// If the event loop goes away before resolving it, the completion yields
/// [`Error::ClientClosed`].
#[derive(Debug)]
#[must_use = "completions do nothing unless awaited"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Completion<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ClientClosed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The event loop's end of a [`Completion`].
#[derive(Debug)]
pub(crate) struct Resolver<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Resolver<T> {
    pub(crate) fn resolve(self, value: T) {
        // the caller may have dropped the completion
        let _ = self.tx.send(Ok(value));
    }

    pub(crate) fn reject(self, err: Error) {
        let _ = self.tx.send(Err(err));
    }
}

pub(crate) fn completion<T>() -> (Resolver<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (Resolver { tx }, Completion { rx })
}
