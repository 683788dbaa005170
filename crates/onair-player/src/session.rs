use tracing::debug;

use crate::analysis::AnalysisGraph;
use crate::media::{HandleId, MediaHandle};

/// One pass over the candidate URLs.
///
/// A session owns at most one native handle and the analysis graph tapping
/// it.  It is built fresh for every full (re)connect and never rewound;
/// dropping it releases everything it holds.
pub struct PlaybackSession<H: MediaHandle> {
    url_cursor: usize,
    handle: Option<H>,
    graph: Option<AnalysisGraph>,
}

impl<H: MediaHandle> Default for PlaybackSession<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: MediaHandle> PlaybackSession<H> {
    pub fn new() -> Self {
        Self {
            url_cursor: 0,
            handle: None,
            graph: None,
        }
    }

    pub fn url_cursor(&self) -> usize {
        self.url_cursor
    }

    /// Move to the next candidate.  Returns false (and stays put) when the
    /// cursor already points at the last of `url_count` URLs.
    pub fn advance(&mut self, url_count: usize) -> bool {
        if self.url_cursor + 1 < url_count {
            self.url_cursor += 1;
            true
        } else {
            false
        }
    }

    /// Install a freshly opened handle, releasing any previous one first.
    pub fn install(&mut self, handle: H) {
        self.release_media();
        self.handle = Some(handle);
    }

    pub fn handle_id(&self) -> Option<HandleId> {
        self.handle.as_ref().map(|h| h.id())
    }

    pub fn is_current(&self, id: HandleId) -> bool {
        self.handle_id() == Some(id)
    }

    pub fn handle_mut(&mut self) -> Option<&mut H> {
        self.handle.as_mut()
    }

    pub fn has_source(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.has_source())
    }

    pub fn has_graph(&self) -> bool {
        self.graph.is_some()
    }

    /// Build the analysis graph on the current handle unless one exists.
    pub fn ensure_graph(&mut self) {
        if self.graph.is_some() {
            return;
        }
        if let Some(tap) = self.handle.as_mut().and_then(|h| h.sample_tap()) {
            self.graph = Some(AnalysisGraph::attach(tap));
        }
    }

    pub fn graph_mut(&mut self) -> Option<&mut AnalysisGraph> {
        self.graph.as_mut()
    }

    /// Release the graph, then the handle.  The session itself (and its
    /// cursor) stays, so the next candidate can be opened into it.
    pub fn release_media(&mut self) {
        if let Some(graph) = self.graph.take() {
            graph.close();
        }
        if let Some(mut handle) = self.handle.take() {
            debug!("session: releasing handle {}", handle.id());
            handle.release();
        }
    }
}

impl<H: MediaHandle> Drop for PlaybackSession<H> {
    fn drop(&mut self) {
        self.release_media();
    }
}
