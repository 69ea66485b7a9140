//! Reusable per-engine buffers.

use crate::graph::GridGraph;
use log::debug;

/// Scratch state kept across `segment` calls so repeated runs on the same
/// image size do not reallocate.
#[derive(Default)]
pub(crate) struct SegmentWorkspace {
    /// Grid graph sized for the last image; rebuilt on dimension change.
    pub(crate) graph: Option<GridGraph>,
    /// Mixture component index per pixel, row major.
    pub(crate) component: Vec<u8>,
    /// Source-side terminal capacity per pixel, row major.
    pub(crate) cap_source: Vec<f64>,
    /// Sink-side terminal capacity per pixel, row major.
    pub(crate) cap_sink: Vec<f64>,
}

impl SegmentWorkspace {
    /// Size the scratch vectors for a `w` x `h` image.
    pub(crate) fn prepare(&mut self, w: usize, h: usize) {
        self.component.resize(w * h, 0);
        self.cap_source.resize(w * h, 0.0);
        self.cap_sink.resize(w * h, 0.0);
    }

    /// Make sure the cached graph matches `w` x `h`.
    pub(crate) fn ensure_graph(&mut self, w: usize, h: usize) {
        let rebuild = match &self.graph {
            Some(g) => g.width() != w || g.height() != h,
            None => true,
        };
        if rebuild {
            debug!("allocating {w}x{h} grid graph");
            self.graph = Some(GridGraph::new(w, h));
        }
    }
}
