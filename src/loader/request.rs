use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::oneshot;

use super::flight::{Delivery, Ticket};
use super::LoaderInner;
use crate::error::PreviewError;
use crate::state::data::CacheKey;

enum RequestState {
    /// Served from memory when the request was made
    Ready(Arc<RgbaImage>),
    Pending {
        ticket: Ticket,
        rx: Option<oneshot::Receiver<Delivery>>,
    },
}

/// Handle to one preview request.
///
/// Await [`wait`](Self::wait) for the image, or [`cancel`](Self::cancel)
/// to stop caring about it.
pub struct PreviewRequest {
    key: CacheKey,
    state: RequestState,
    inner: Arc<LoaderInner>,
}

impl PreviewRequest {
    pub(crate) fn ready(key: CacheKey, image: Arc<RgbaImage>, inner: Arc<LoaderInner>) -> Self {
        Self {
            key,
            state: RequestState::Ready(image),
            inner,
        }
    }

    pub(crate) fn pending(
        key: CacheKey,
        ticket: Ticket,
        rx: oneshot::Receiver<Delivery>,
        inner: Arc<LoaderInner>,
    ) -> Self {
        Self {
            key,
            state: RequestState::Pending {
                ticket,
                rx: Some(rx),
            },
            inner,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// The image, when the request was answered from memory
    pub fn immediate(&self) -> Option<&Arc<RgbaImage>> {
        match &self.state {
            RequestState::Ready(image) => Some(image),
            RequestState::Pending { .. } => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, RequestState::Ready(_))
    }

    /// Resolve the request. A pending request delivers exactly once;
    /// waiting again returns [`PreviewError::AlreadyDelivered`].
    pub async fn wait(&mut self) -> Result<Arc<RgbaImage>, PreviewError> {
        match &mut self.state {
            RequestState::Ready(image) => Ok(image.clone()),
            RequestState::Pending { rx, .. } => {
                let rx = rx.take().ok_or(PreviewError::AlreadyDelivered)?;
                rx.await.unwrap_or(Err(PreviewError::Cancelled))
            }
        }
    }

    /// Stop waiting for this preview. The load itself is cancelled once no
    /// other request is attached to it. With `evict`, the key's in-memory
    /// entry is dropped as well and its buffer recycled when unshared.
    pub fn cancel(self, evict: bool) {
        let PreviewRequest { key, state, inner } = self;

        if let RequestState::Pending { ticket, .. } = &state {
            if inner.flights.lock().detach(&key, *ticket) {
                tracing::debug!(%key, "preview load cancelled");
            }
        }
        // A ready image held here would pin the buffer
        drop(state);

        if evict {
            inner.memory.lock().evict(&key);
        }
    }
}

impl std::fmt::Debug for PreviewRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreviewRequest")
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}
