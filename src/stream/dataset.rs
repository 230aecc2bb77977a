use super::cache::GeometryCache;
use super::draw::{DrawStats, FrameRenderer, RenderMode};
use super::state::Residency;
use super::traversal::{Traversal, TraversalLimits};
use super::view::ViewEstimator;
use super::StreamEvent;
use crate::config::StreamingConfig;
use crate::format::{Header, NodeIndex, PayloadDecoder};
use crate::gpu::GpuContext;

use std::sync::Arc;

/// A dataset whose header and index are loaded, with all of its runtime state.
pub struct OpenDataset {
    pub header: Header,
    pub index: NodeIndex,
    pub decoder: Arc<dyn PayloadDecoder>,
    pub residency: Residency,
    pub cache: GeometryCache,
    pub traversal: Traversal,
    /// Node requests in flight.
    pub pending_requests: usize,
    /// Bytes of nodes that are requested or arrived, but not yet in the cache.
    pub reserved_bytes: u64,
}

impl OpenDataset {
    pub fn new(header: Header, index: NodeIndex, decoder: Arc<dyn PayloadDecoder>) -> Self {
        let residency = Residency::new(&index);
        Self {
            header,
            index,
            decoder,
            residency,
            cache: GeometryCache::default(),
            traversal: Traversal::default(),
            pending_requests: 0,
            reserved_bytes: 0,
        }
    }

    /// Moves ready nodes into the cache and enforces the byte budget.
    pub fn update_cache(
        &mut self,
        config: &StreamingConfig,
        frame: u64,
        gpu: &mut dyn GpuContext,
        events: &mut Vec<StreamEvent>,
    ) {
        let ready = self.take_ready_nodes(frame, gpu, events);
        let report = self.cache.update(
            config.max_cache_bytes,
            &self.index,
            &self.header.signature,
            &mut self.residency,
            ready,
            gpu,
        );
        events.extend(report.uploaded.into_iter().map(StreamEvent::NodeReady));
        events.extend(report.evicted.into_iter().map(StreamEvent::NodeEvicted));
    }

    pub fn traverse(&mut self, view: &ViewEstimator, config: &StreamingConfig, frame: u64) {
        let limits = TraversalLimits {
            target_error: config.target_error,
            draw_budget: config.draw_budget,
            max_blocked: config.max_blocked,
            max_visits: config.max_visits,
            max_candidates: config.max_pending_requests,
        };
        self.traversal
            .run(&self.index, &mut self.residency, view, limits, frame);
    }

    pub fn render(&self, view: &ViewEstimator, mode: RenderMode, gpu: &mut dyn GpuContext) -> DrawStats {
        FrameRenderer.render(
            &self.index,
            &self.header.signature,
            &self.residency,
            &self.traversal,
            view,
            mode,
            gpu,
        )
    }

    /// Deletes every GPU resource this dataset owns.
    pub fn release(&mut self, gpu: &mut dyn GpuContext) {
        self.residency.release_all(gpu);
        self.cache.clear();
        self.traversal.clear();
        self.pending_requests = 0;
        self.reserved_bytes = 0;
    }
}
