//! Swappable rendering layer: turns snapshots into output values.
//!
//! Content follows a render-prop style: a function receives the current
//! frame and may return another content value, chained until a plain node
//! (or nothing) is reached. The controller knows nothing about rendering;
//! consumers feed frames to [`render`] from the change hook or the event
//! channel.

use std::sync::Arc;

use tracing::warn;

use crate::types::{FetchRequest, FetchSnapshot, FetchState};
use crate::FetchController;

/// What a consumer declared to render.
pub enum Content<T> {
    /// Nothing declared; renders to nothing.
    Empty,
    /// A single literal node.
    Node(T),
    /// Computed from the current frame; may itself yield more content.
    Func(Arc<dyn Fn(&RenderFrame) -> Content<T> + Send + Sync>),
}

impl<T> Content<T> {
    pub fn func(render: impl Fn(&RenderFrame) -> Content<T> + Send + Sync + 'static) -> Self {
        Content::Func(Arc::new(render))
    }
}

impl<T> Default for Content<T> {
    fn default() -> Self {
        Content::Empty
    }
}

impl<T: Clone> Clone for Content<T> {
    fn clone(&self) -> Self {
        match self {
            Content::Empty => Content::Empty,
            Content::Node(node) => Content::Node(node.clone()),
            Content::Func(render) => Content::Func(Arc::clone(render)),
        }
    }
}

/// Inputs available to a render function: the declaration, the state that
/// accompanies it, and a handle for re-triggering.
#[derive(Clone)]
pub struct RenderFrame {
    pub request: FetchRequest,
    pub state: FetchState,
    pub handle: Arc<FetchController>,
}

impl RenderFrame {
    pub fn new(snapshot: FetchSnapshot, handle: Arc<FetchController>) -> Self {
        Self {
            request: snapshot.request,
            state: snapshot.state,
            handle,
        }
    }

    /// Re-issue the declared request in the background.
    pub fn refetch(&self) {
        let handle = Arc::clone(&self.handle);
        tokio::spawn(async move {
            if let Err(err) = handle.trigger(None, None).await {
                warn!("fetch: refetch from render failed: {err}");
            }
        });
    }
}

/// Resolve content against a frame, invoking functions until a non-callable
/// result is reached.
pub fn render<T: Clone>(content: &Content<T>, frame: &RenderFrame) -> Option<T> {
    match content {
        Content::Empty => None,
        Content::Node(node) => Some(node.clone()),
        Content::Func(func) => render(&func(frame), frame),
    }
}
