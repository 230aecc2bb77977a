use super::state::{NodeState, Residency, Status};
use crate::format::{NodeId, NodeIndex, NodePayload, Signature};
use crate::gpu::{GpuContext, NodeBuffers};

use float_ord::FloatOrd;
use std::cmp::Reverse;

/// Orders nodes by value to the cache: more recently rendered first, then larger error first. Ties go to the lower id so the
/// order is total.
pub fn cache_priority(id: NodeId, state: &NodeState) -> (u64, FloatOrd<f32>, Reverse<NodeId>) {
    (state.render_frame, FloatOrd(state.render_error), Reverse(id))
}

/// What one [`GeometryCache::update`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CacheReport {
    /// Newly arrived nodes that were uploaded.
    pub uploaded: Vec<NodeId>,
    /// Previously resident nodes that were evicted.
    pub evicted: Vec<NodeId>,
    /// Newly arrived nodes that didn't fit and were thrown away.
    pub dropped: Vec<NodeId>,
}

/// The set of nodes with GPU buffers, kept within a byte budget.
#[derive(Debug, Default)]
pub struct GeometryCache {
    resident: Vec<NodeId>,
    resident_bytes: u64,
}

impl GeometryCache {
    pub fn resident(&self) -> &[NodeId] {
        &self.resident
    }

    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    /// Merges `arrived` with the resident nodes and keeps the most valuable prefix that fits in `max_bytes`.
    ///
    /// The walk stops at the first node that doesn't fit: it and every node after it are evicted (or dropped, if they only just
    /// arrived), even if a smaller one further down would have fit. Arrived nodes that make the cut are uploaded here and
    /// nowhere else.
    pub fn update(
        &mut self,
        max_bytes: u64,
        index: &NodeIndex,
        signature: &Signature,
        residency: &mut Residency,
        mut arrived: Vec<(NodeId, NodePayload)>,
        gpu: &mut dyn GpuContext,
    ) -> CacheReport {
        let mut report = CacheReport::default();

        arrived.sort_unstable_by_key(|(id, _)| *id);
        let mut all: Vec<NodeId> = self
            .resident
            .iter()
            .copied()
            .chain(arrived.iter().map(|(id, _)| *id))
            .collect();
        all.sort_unstable_by_key(|&id| Reverse(cache_priority(id, residency.node(id))));

        let mut kept = Vec::with_capacity(all.len());
        let mut total = 0;
        let mut full = false;
        for id in all {
            let size = index.node(id).byte_size();
            let payload = arrived
                .binary_search_by_key(&id, |(a, _)| *a)
                .ok()
                .map(|i| std::mem::take(&mut arrived[i].1));
            full = full || total + size > max_bytes;

            match (full, payload) {
                (false, Some(payload)) => {
                    upload(id, signature, &payload, residency, gpu);
                    report.uploaded.push(id);
                    total += size;
                    kept.push(id);
                }
                (false, None) => {
                    total += size;
                    kept.push(id);
                }
                (true, Some(_)) => {
                    log::debug!("Dropping node {}: cache is full", id);
                    residency.node_mut(id).status = Status::None;
                    residency.release_textures(index, id, gpu);
                    report.dropped.push(id);
                }
                (true, None) => {
                    log::debug!("Evicting node {}", id);
                    unload(id, index, residency, gpu);
                    report.evicted.push(id);
                }
            }
        }

        self.resident = kept;
        self.resident_bytes = total;
        debug_assert!(self.resident_bytes <= max_bytes);

        report
    }

    /// Evicts one resident node immediately, to make room for a request.
    pub fn evict(
        &mut self,
        id: NodeId,
        index: &NodeIndex,
        residency: &mut Residency,
        gpu: &mut dyn GpuContext,
    ) {
        if let Some(i) = self.resident.iter().position(|&r| r == id) {
            log::debug!("Evicting node {} to make room", id);
            self.resident.swap_remove(i);
            self.resident_bytes -= index.node(id).byte_size();
            unload(id, index, residency, gpu);
        }
    }

    /// Forgets every resident node. GPU resources must be released separately.
    pub fn clear(&mut self) {
        self.resident.clear();
        self.resident_bytes = 0;
    }
}

fn upload(
    id: NodeId,
    signature: &Signature,
    payload: &NodePayload,
    residency: &mut Residency,
    gpu: &mut dyn GpuContext,
) {
    let vertices = gpu.create_vertex_buffer(&payload.vertices);
    let indices = signature.face.has_index().then(|| {
        let index_bytes = signature.face.index().size() * payload.face_count as usize;
        gpu.create_index_buffer(&payload.faces[..index_bytes])
    });
    let state = residency.node_mut(id);
    state.buffers = Some(NodeBuffers { vertices, indices });
    state.status = Status::Ready;
    state.attempts = 0;
}

fn unload(id: NodeId, index: &NodeIndex, residency: &mut Residency, gpu: &mut dyn GpuContext) {
    let state = residency.node_mut(id);
    if let Some(buffers) = state.buffers.take() {
        gpu.delete_buffer(buffers.vertices);
        if let Some(indices) = buffers.indices {
            gpu.delete_buffer(indices);
        }
    }
    state.status = Status::None;
    residency.release_textures(index, id, gpu);
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;
    use crate::gpu::HeadlessContext;
    use crate::stream::fixtures::blocks_dataset;
    use crate::format::PADDING;

    fn stamp(residency: &mut Residency, id: NodeId, frame: u64, error: f32) {
        let state = residency.node_mut(id);
        state.render_frame = frame;
        state.render_error = error;
        state.status = Status::Pending;
    }

    #[test]
    fn eviction_keeps_most_valuable_within_budget() {
        // Nodes 0, 1, 2 take 60, 50 and 50 blocks; the budget is 100 blocks.
        let (index, signature) = blocks_dataset(&[60, 50, 50]);
        let mut residency = Residency::new(&index);
        let mut gpu = HeadlessContext::new();
        let mut cache = GeometryCache::default();
        let max = 100 * PADDING;

        stamp(&mut residency, 0, 1, 5.0);
        let report = cache.update(max, &index, &signature, &mut residency, vec![(0, NodePayload::default())], &mut gpu);
        assert_eq!(report.uploaded, vec![0]);
        assert_eq!(cache.resident_bytes(), 60 * PADDING);

        // Node 1 was seen more recently than node 0, node 2 just as recently but with a smaller error.
        stamp(&mut residency, 1, 2, 3.0);
        stamp(&mut residency, 2, 2, 1.0);
        residency.node_mut(0).status = Status::Ready;
        let report = cache.update(
            max,
            &index,
            &signature,
            &mut residency,
            vec![(1, NodePayload::default()), (2, NodePayload::default())],
            &mut gpu,
        );

        assert_eq!(report.uploaded, vec![1, 2]);
        assert_eq!(report.evicted, vec![0]);
        assert!(report.dropped.is_empty());
        assert_eq!(cache.resident_bytes(), 100 * PADDING);
        assert_eq!(residency.node(0).status, Status::None);
        assert!(residency.node(0).buffers.is_none());
        assert_eq!(residency.node(1).status, Status::Ready);
        // Two vertex buffers and two index buffers.
        assert_eq!(gpu.live_buffer_count(), 4);
    }

    #[test]
    fn walk_stops_at_first_node_that_does_not_fit() {
        let (index, signature) = blocks_dataset(&[60, 50, 10]);
        let mut residency = Residency::new(&index);
        let mut gpu = HeadlessContext::new();
        let mut cache = GeometryCache::default();

        stamp(&mut residency, 0, 3, 1.0);
        stamp(&mut residency, 1, 2, 1.0);
        stamp(&mut residency, 2, 1, 1.0);
        let arrived = (0..3).map(|id| (id, NodePayload::default())).collect();
        let report = cache.update(100 * PADDING, &index, &signature, &mut residency, arrived, &mut gpu);

        // Node 2 would fit on its own, but it comes after node 1, which doesn't.
        assert_eq!(report.uploaded, vec![0]);
        assert_eq!(report.dropped, vec![1, 2]);
        assert_eq!(cache.resident_bytes(), 60 * PADDING);
        assert_eq!(residency.node(2).status, Status::None);
    }

    #[test]
    fn shrinking_budget_evicts_on_next_update() {
        let (index, signature) = blocks_dataset(&[10, 10, 10]);
        let mut residency = Residency::new(&index);
        let mut gpu = HeadlessContext::new();
        let mut cache = GeometryCache::default();

        for id in 0..3 {
            stamp(&mut residency, id, 1, id as f32);
        }
        let arrived = (0..3).map(|id| (id, NodePayload::default())).collect();
        cache.update(u64::MAX, &index, &signature, &mut residency, arrived, &mut gpu);
        assert_eq!(cache.resident().len(), 3);

        let report = cache.update(20 * PADDING, &index, &signature, &mut residency, Vec::new(), &mut gpu);
        // The lowest error goes first.
        assert_eq!(report.evicted, vec![0]);
        assert!(cache.resident_bytes() <= 20 * PADDING);
        assert_eq!(gpu.live_buffer_count(), 4);
    }

    #[test]
    fn explicit_eviction_frees_buffers() {
        let (index, signature) = blocks_dataset(&[4]);
        let mut residency = Residency::new(&index);
        let mut gpu = HeadlessContext::new();
        let mut cache = GeometryCache::default();

        stamp(&mut residency, 0, 1, 1.0);
        cache.update(u64::MAX, &index, &signature, &mut residency, vec![(0, NodePayload::default())], &mut gpu);
        cache.evict(0, &index, &mut residency, &mut gpu);
        assert_eq!(cache.resident_bytes(), 0);
        assert_eq!(gpu.live_buffer_count(), 0);
        assert_eq!(residency.node(0).status, Status::None);
    }
}
