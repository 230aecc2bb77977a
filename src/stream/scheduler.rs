use super::cache::cache_priority;
use super::dataset::OpenDataset;
use super::inbox::{Completion, Inbox};
use super::state::Status;
use super::StreamEvent;
use crate::config::StreamingConfig;
use crate::fetch::{FetchError, FetchRequest, RangeFetcher, RangeSource};
use crate::format::{ByteOrder, ByteRange, NodeId, NodePayload, PayloadLayout, TextureId};
use crate::gpu::GpuContext;

use smallvec::SmallVec;
use std::sync::Arc;

/// Everything needed to issue requests against the open dataset.
pub struct Requester<'a> {
    pub fetcher: &'a dyn RangeFetcher,
    pub source: &'a Arc<dyn RangeSource>,
    pub inbox: &'a Arc<Inbox>,
    pub generation: u64,
    pub order: ByteOrder,
}

/// The frame before which a node or texture that has failed `attempts` times may be requested again.
pub fn retry_frame(frame: u64, backoff_frames: u64, attempts: u32) -> u64 {
    frame + (backoff_frames << attempts.saturating_sub(1).min(16))
}

impl OpenDataset {
    /// Requests the traversal's candidates, best first, while request slots last.
    ///
    /// Each request reserves its node's bytes in the cache up front, evicting less valuable resident nodes if needed. Nodes
    /// selected this frame are never evicted here, since they are about to be drawn. A candidate that can't get enough room
    /// is skipped. So is one whose texture is still backing off after a failure; it waits for the texture, and this returns
    /// true so the host keeps drawing frames until then.
    pub fn schedule_requests(
        &mut self,
        requester: &Requester,
        config: &StreamingConfig,
        frame: u64,
        gpu: &mut dyn GpuContext,
        events: &mut Vec<StreamEvent>,
    ) -> bool {
        let mut deferred = false;
        let candidates: SmallVec<[NodeId; 8]> = self.traversal.candidates().collect();
        for id in candidates {
            if self.pending_requests >= config.max_pending_requests {
                break;
            }
            let state = self.residency.node(id);
            if state.status != Status::None || state.retry_frame > frame {
                continue;
            }
            let Some(range) = self.index.node(id).byte_range() else {
                continue;
            };

            let failed_texture = self
                .index
                .node_textures(id)
                .find(|&t| self.residency.textures[t as usize].status == Status::Failed);
            if let Some(t) = failed_texture {
                log::error!("Node {} can never load: texture {} failed", id, t);
                self.residency.node_mut(id).status = Status::Failed;
                events.push(StreamEvent::NodeFailed(id));
                continue;
            }

            if let Some(retry_at) = self.residency.texture_retry_frame(&self.index, id, frame) {
                log::debug!("Node {} waits for its texture until frame {}", id, retry_at);
                self.residency.node_mut(id).retry_frame = retry_at;
                deferred = true;
                continue;
            }

            if !self.make_room(id, range.len(), config.max_cache_bytes, gpu, events) {
                log::debug!("No room for node {} ({} bytes)", id, range.len());
                continue;
            }

            self.pending_requests += 1;
            self.reserved_bytes += range.len();
            self.residency.node_mut(id).status = Status::Pending;
            for t in self.residency.acquire_textures(&self.index, id) {
                self.request_texture(t, requester);
            }
            self.request_node(id, range, requester);
            events.push(StreamEvent::NodeRequested(id));
        }
        deferred
    }

    fn make_room(
        &mut self,
        id: NodeId,
        size: u64,
        max_bytes: u64,
        gpu: &mut dyn GpuContext,
        events: &mut Vec<StreamEvent>,
    ) -> bool {
        let used = self.cache.resident_bytes() + self.reserved_bytes;
        if used + size <= max_bytes {
            return true;
        }
        if size > max_bytes {
            return false;
        }
        let needed = used + size - max_bytes;

        let key = cache_priority(id, self.residency.node(id));
        let mut victims: Vec<NodeId> = self
            .cache
            .resident()
            .iter()
            .copied()
            .filter(|&v| {
                !self.traversal.is_selected(v) && cache_priority(v, self.residency.node(v)) < key
            })
            .collect();
        victims.sort_unstable_by_key(|&v| cache_priority(v, self.residency.node(v)));

        let mut freed = 0;
        let mut num_victims = 0;
        for &v in victims.iter() {
            if freed >= needed {
                break;
            }
            freed += self.index.node(v).byte_size();
            num_victims += 1;
        }
        if freed < needed {
            return false;
        }

        for &v in &victims[..num_victims] {
            self.cache.evict(v, &self.index, &mut self.residency, gpu);
            events.push(StreamEvent::NodeEvicted(v));
        }
        true
    }

    fn request_node(&self, id: NodeId, range: ByteRange, requester: &Requester) {
        log::debug!("Requesting node {} at {:?}", id, range);

        let layout = PayloadLayout::new(self.header.signature, self.index.node(id), requester.order);
        let decoder = self.decoder.clone();
        let inbox = requester.inbox.clone();
        let generation = requester.generation;
        requester.fetcher.fetch(
            FetchRequest::new(requester.source.clone(), range),
            Box::new(move |result| {
                // Runs wherever the fetcher completes, so decoding stays off the frame thread.
                let result = result.and_then(|bytes| decoder.decode(&layout, bytes).map_err(FetchError::from));
                inbox.push(generation, Completion::Node { id, result });
            }),
        );
    }

    fn request_texture(&mut self, t: TextureId, requester: &Requester) {
        let Some(range) = self.index.texture(t).byte_range() else {
            log::error!("Texture {} has no data", t);
            self.residency.textures[t as usize].status = Status::Failed;
            return;
        };
        log::debug!("Requesting texture {} at {:?}", t, range);
        self.residency.textures[t as usize].status = Status::Pending;

        let inbox = requester.inbox.clone();
        let generation = requester.generation;
        requester.fetcher.fetch(
            FetchRequest::new(requester.source.clone(), range),
            Box::new(move |result| inbox.push(generation, Completion::Texture { id: t, result })),
        );
    }

    pub fn node_completed(
        &mut self,
        id: NodeId,
        result: Result<NodePayload, FetchError>,
        config: &StreamingConfig,
        frame: u64,
        gpu: &mut dyn GpuContext,
        events: &mut Vec<StreamEvent>,
    ) {
        if self.residency.node(id).status != Status::Pending {
            log::debug!("Ignoring completion for node {}, which is no longer pending", id);
            return;
        }
        self.pending_requests = self.pending_requests.saturating_sub(1);

        match result {
            Ok(payload) => {
                self.residency.arrived_nodes.insert(id, payload);
            }
            Err(e) => {
                self.reserved_bytes -= self.index.node(id).byte_size();
                self.residency.release_textures(&self.index, id, gpu);
                self.fail_node(id, &e, config, frame, events);
            }
        }
    }

    fn fail_node(
        &mut self,
        id: NodeId,
        error: &FetchError,
        config: &StreamingConfig,
        frame: u64,
        events: &mut Vec<StreamEvent>,
    ) {
        let state = self.residency.node_mut(id);
        state.attempts += 1;
        if state.attempts >= config.max_retries {
            log::error!("Giving up on node {} after {} attempts: {}", id, state.attempts, error);
            state.status = Status::Failed;
            events.push(StreamEvent::NodeFailed(id));
        } else {
            state.status = Status::None;
            state.retry_frame = retry_frame(frame, config.retry_backoff_frames, state.attempts);
            log::warn!(
                "Request for node {} failed ({}), retrying at frame {}",
                id,
                error,
                state.retry_frame
            );
        }
    }

    pub fn texture_completed(
        &mut self,
        t: TextureId,
        result: Result<Vec<u8>, FetchError>,
        config: &StreamingConfig,
        frame: u64,
        events: &mut Vec<StreamEvent>,
    ) {
        let texture = &mut self.residency.textures[t as usize];
        if texture.status != Status::Pending {
            return;
        }

        match result {
            Ok(_) if texture.users.is_empty() => {
                log::debug!("Discarding texture {}: nothing uses it anymore", t);
                texture.status = Status::None;
            }
            Ok(image) => {
                self.residency.arrived_textures.insert(t, image);
            }
            Err(e) => {
                texture.attempts += 1;
                if texture.attempts >= config.max_retries {
                    log::error!("Giving up on texture {} after {} attempts: {}", t, texture.attempts, e);
                    texture.status = Status::Failed;
                    events.push(StreamEvent::TextureFailed(t));
                } else {
                    texture.status = Status::None;
                    texture.retry_frame = retry_frame(frame, config.retry_backoff_frames, texture.attempts);
                    log::warn!("Request for texture {} failed ({}), retrying", t, e);
                }
            }
        }
    }

    /// Uploads arrived textures, then takes every arrived node whose textures are all resident. The returned nodes no longer
    /// hold a reservation; the cache decides whether they stay.
    ///
    /// Nodes waiting on a texture that has since failed are sent back to be requested again, or fail with it.
    pub fn take_ready_nodes(
        &mut self,
        frame: u64,
        gpu: &mut dyn GpuContext,
        events: &mut Vec<StreamEvent>,
    ) -> Vec<(NodeId, NodePayload)> {
        let mut arrived_textures: Vec<_> = self.residency.arrived_textures.drain().collect();
        arrived_textures.sort_unstable_by_key(|(t, _)| *t);
        for (t, image) in arrived_textures {
            let texture = &mut self.residency.textures[t as usize];
            if texture.users.is_empty() {
                texture.status = Status::None;
                continue;
            }
            log::debug!("Uploading texture {}", t);
            texture.handle = Some(gpu.create_texture(&image));
            texture.status = Status::Ready;
        }

        let mut arrived: Vec<NodeId> = self.residency.arrived_nodes.keys().copied().collect();
        arrived.sort_unstable();

        let mut ready = Vec::new();
        for id in arrived {
            let mut waiting = false;
            let mut failed = false;
            let mut lost_retry_frame = None;
            for t in self.index.node_textures(id) {
                let texture = &self.residency.textures[t as usize];
                match texture.status {
                    Status::Ready => {}
                    Status::Pending => waiting = true,
                    Status::Failed => failed = true,
                    Status::None => {
                        lost_retry_frame = Some(lost_retry_frame.unwrap_or(0).max(texture.retry_frame))
                    }
                }
            }
            if waiting && !failed && lost_retry_frame.is_none() {
                continue;
            }

            let Some(payload) = self.residency.arrived_nodes.remove(&id) else {
                continue;
            };
            self.reserved_bytes -= self.index.node(id).byte_size();

            if failed {
                log::error!("Node {} failed with its texture", id);
                self.residency.release_textures(&self.index, id, gpu);
                self.residency.node_mut(id).status = Status::Failed;
                events.push(StreamEvent::NodeFailed(id));
            } else if let Some(retry_at) = lost_retry_frame {
                log::debug!("Node {} lost its texture, requesting both again", id);
                self.residency.release_textures(&self.index, id, gpu);
                let state = self.residency.node_mut(id);
                state.status = Status::None;
                state.retry_frame = retry_at.max(frame);
            } else {
                ready.push((id, payload));
            }
        }
        ready
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
