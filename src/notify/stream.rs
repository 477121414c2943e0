use crate::core::Result;
use crate::object::ObjectAccessor;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

use super::{NotificationToken, ObjectChange};

/// Object changes as an async stream.
///
/// Items arrive in commit order. The stream ends after a
/// [`ObjectChange::Deleted`] item, or once [`close`](Self::close) is called
/// and buffered items are drained.
pub struct ObjectChangeStream {
    receiver: mpsc::UnboundedReceiver<ObjectChange>,
    token: NotificationToken,
}

impl ObjectChangeStream {
    pub(crate) fn new(object: &mut ObjectAccessor) -> Result<Self> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let token = super::subscribe(object, move |change| {
            if sender.send(change).is_err() {
                trace!("change stream receiver dropped");
            }
        })?;
        Ok(Self { receiver, token })
    }

    pub fn token(&self) -> &NotificationToken {
        &self.token
    }

    /// Stop observing; already buffered changes are still yielded.
    pub fn close(&mut self) {
        self.token.invalidate();
        self.receiver.close();
    }
}

impl Stream for ObjectChangeStream {
    type Item = ObjectChange;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}
