//! The streaming engine: view-dependent selection of nodes, fetching them on demand, and keeping the most useful ones on the
//! GPU.
//!
//! A frame runs in a fixed order inside [`Nexus::begin`]:
//!
//! 1. Merge the results of finished requests.
//! 2. Recompute the view (frustum, view point, pixel size).
//! 3. Upload newly arrived nodes and evict whatever no longer fits in the cache.
//! 4. Walk the node DAG to select the cut to draw and collect candidates to fetch.
//! 5. Request candidates, reserving cache space for them.
//!
//! Requests complete on other threads, but they only ever write to the [`Inbox`](inbox::Inbox). Everything else is owned by
//! the thread driving the frames.

mod cache;
mod dataset;
mod draw;
mod inbox;
mod scheduler;
mod state;
mod traversal;
mod view;

#[cfg(test)]
mod fixtures;

pub use draw::{point_count, DrawStats, RenderMode};
pub use inbox::RedrawSignal;
pub use scheduler::retry_frame;
pub use state::Status;
pub use view::{ViewEstimator, Viewport};

use dataset::OpenDataset;
use inbox::{Completion, Inbox};
use scheduler::Requester;

use crate::config::StreamingConfig;
use crate::core::geometry::Sphere;
use crate::core::glam::{Mat4, Vec3A};
use crate::fetch::{FetchError, FetchRequest, RangeFetcher, RangeSource};
use crate::format::{
    builtin_decoder, FormatError, Header, NodeId, NodeIndex, PayloadDecoder, TextureId,
};
use crate::gpu::GpuContext;

use std::sync::Arc;
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq)]
pub enum OpenError {
    #[error("failed to fetch the dataset: {0}")]
    Fetch(#[from] FetchError),
    #[error("invalid dataset: {0}")]
    Format(#[from] FormatError),
}

/// Things that happened during [`Nexus::begin`], reported in order.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    /// The header and index are loaded; the dataset can be drawn.
    Opened { node_count: usize, sphere: Sphere },
    OpenFailed(OpenError),
    NodeRequested(NodeId),
    NodeReady(NodeId),
    NodeEvicted(NodeId),
    /// The node will not be requested again until the dataset is reopened.
    NodeFailed(NodeId),
    TextureFailed(TextureId),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DatasetState {
    Closed,
    Loading,
    Ready,
    Failed(OpenError),
}

enum Session {
    LoadingHeader,
    LoadingIndex(Header),
    Open(Box<OpenDataset>),
    Failed(OpenError),
}

/// A multiresolution mesh streamed from a [`RangeSource`].
///
/// Drive it once per frame with [`Nexus::begin`], [`Nexus::render`] and [`Nexus::end`]. The redraw signal given to
/// [`Nexus::new`] fires (from any thread) when new data makes another frame worthwhile.
pub struct Nexus {
    config: StreamingConfig,
    fetcher: Arc<dyn RangeFetcher>,
    inbox: Arc<Inbox>,
    decoder: Option<Arc<dyn PayloadDecoder>>,
    view: ViewEstimator,
    mode: RenderMode,
    frame: u64,
    source: Option<Arc<dyn RangeSource>>,
    session: Option<Session>,
    /// Datasets replaced by `open`, waiting for a GPU context to release their resources.
    retired: Vec<Box<OpenDataset>>,
    in_frame: bool,
}

impl Nexus {
    pub fn new(config: StreamingConfig, fetcher: Arc<dyn RangeFetcher>, redraw: RedrawSignal) -> Self {
        Self {
            config,
            fetcher,
            inbox: Arc::new(Inbox::new(redraw)),
            decoder: None,
            view: ViewEstimator::default(),
            mode: RenderMode::default(),
            frame: 0,
            source: None,
            session: None,
            retired: Vec::new(),
            in_frame: false,
        }
    }

    /// Uses `decoder` for node payloads instead of the built-in one. Needed for MECO and CORTO datasets. Takes effect on the
    /// next [`Nexus::open`].
    pub fn set_decoder(&mut self, decoder: Arc<dyn PayloadDecoder>) {
        self.decoder = Some(decoder);
    }

    /// Starts loading a dataset, replacing any open one. Results of requests for the old dataset are ignored from now on.
    pub fn open(&mut self, source: Arc<dyn RangeSource>) {
        let generation = self.inbox.next_generation();
        if let Some(Session::Open(dataset)) = self.session.take() {
            self.retired.push(dataset);
        }
        log::info!("Opening {}", source.describe());

        let order = self.config.byte_order;
        let inbox = self.inbox.clone();
        self.fetcher.fetch(
            FetchRequest::new(source.clone(), Header::header_range()),
            Box::new(move |result| {
                let header = result
                    .map_err(OpenError::from)
                    .and_then(|bytes| Header::parse(&bytes, order).map_err(OpenError::from));
                inbox.push(generation, Completion::Header(header));
            }),
        );

        self.source = Some(source);
        self.session = Some(Session::LoadingHeader);
    }

    /// Drops the dataset and deletes all of its GPU resources.
    pub fn close(&mut self, gpu: &mut dyn GpuContext) {
        self.inbox.next_generation();
        if let Some(Session::Open(mut dataset)) = self.session.take() {
            dataset.release(gpu);
        }
        self.release_retired(gpu);
        self.source = None;
    }

    fn release_retired(&mut self, gpu: &mut dyn GpuContext) {
        for mut dataset in self.retired.drain(..) {
            dataset.release(gpu);
        }
    }

    /// Prepares a frame: merges finished requests, updates the view and cache, selects nodes and issues new requests.
    pub fn begin(&mut self, gpu: &mut dyn GpuContext, mut rx: impl FnMut(StreamEvent)) {
        debug_assert!(!self.in_frame, "begin called twice without end");
        self.in_frame = true;
        self.frame += 1;
        let frame = self.frame;

        self.release_retired(gpu);

        let mut events = Vec::new();
        let completions = self.inbox.drain();
        self.inbox.arm_failure_redraw();
        for completion in completions {
            self.complete(completion, gpu, &mut events);
        }

        if let (Some(Session::Open(dataset)), Some(source)) = (self.session.as_mut(), self.source.as_ref()) {
            self.view.update();
            dataset.update_cache(&self.config, frame, gpu, &mut events);
            dataset.traverse(&self.view, &self.config, frame);
            self.inbox
                .set_redraw_on_new_nodes(dataset.traversal.blocked_on_missing());

            let requester = Requester {
                fetcher: &*self.fetcher,
                source,
                inbox: &self.inbox,
                generation: self.inbox.generation(),
                order: self.config.byte_order,
            };
            let waiting_on_texture = dataset.schedule_requests(&requester, &self.config, frame, gpu, &mut events);

            if dataset.traversal.deferred_retry() || waiting_on_texture {
                // Nothing else will wake the host while a failed node waits out its backoff.
                self.inbox.request_redraw();
            }
        }

        for event in events {
            rx(event);
        }
    }

    fn complete(&mut self, completion: Completion, gpu: &mut dyn GpuContext, events: &mut Vec<StreamEvent>) {
        match completion {
            Completion::Header(Ok(header)) if matches!(self.session, Some(Session::LoadingHeader)) => {
                self.header_loaded(header, events)
            }
            Completion::Index(Ok(index)) => match self.session.take() {
                Some(Session::LoadingIndex(header)) => self.index_loaded(header, index, events),
                other => {
                    log::debug!("Ignoring an index that arrived out of order");
                    self.session = other;
                }
            },
            Completion::Header(Err(e)) | Completion::Index(Err(e)) => self.fail_open(e, events),
            Completion::Node { id, result } => {
                if let Some(Session::Open(dataset)) = self.session.as_mut() {
                    dataset.node_completed(id, result, &self.config, self.frame, gpu, events);
                }
            }
            Completion::Texture { id, result } => {
                if let Some(Session::Open(dataset)) = self.session.as_mut() {
                    dataset.texture_completed(id, result, &self.config, self.frame, events);
                }
            }
            Completion::Header(Ok(_)) => log::debug!("Ignoring a header that arrived out of order"),
        }
    }

    fn header_loaded(&mut self, header: Header, events: &mut Vec<StreamEvent>) {
        log::debug!(
            "Header: version {}, {} nodes, {} patches, {} textures",
            header.version,
            header.node_count,
            header.patch_count,
            header.texture_count
        );
        if self.decoder.is_none() {
            if let Err(e) = builtin_decoder(&header.signature) {
                self.fail_open(e.into(), events);
                return;
            }
        }
        let Some(source) = self.source.clone() else {
            return;
        };

        let order = self.config.byte_order;
        let inbox = self.inbox.clone();
        let generation = self.inbox.generation();
        let index_header = header.clone();
        self.fetcher.fetch(
            FetchRequest::new(source, header.index_range()),
            Box::new(move |result| {
                let index = result.map_err(OpenError::from).and_then(|bytes| {
                    NodeIndex::import(&index_header, &bytes, 0, order).map_err(OpenError::from)
                });
                inbox.push(generation, Completion::Index(index));
            }),
        );
        self.session = Some(Session::LoadingIndex(header));
    }

    fn index_loaded(&mut self, header: Header, index: NodeIndex, events: &mut Vec<StreamEvent>) {
        let decoder = match self.decoder.clone() {
            Some(decoder) => decoder,
            None => match builtin_decoder(&header.signature) {
                Ok(decoder) => decoder,
                Err(e) => {
                    self.fail_open(e.into(), events);
                    return;
                }
            },
        };
        log::info!("Opened dataset with {} nodes", index.node_count());
        events.push(StreamEvent::Opened {
            node_count: index.node_count(),
            sphere: header.sphere,
        });
        self.session = Some(Session::Open(Box::new(OpenDataset::new(header, index, decoder))));
    }

    fn fail_open(&mut self, error: OpenError, events: &mut Vec<StreamEvent>) {
        let name = self
            .source
            .as_ref()
            .map_or_else(String::new, |s| s.describe());
        log::error!("Failed to open {}: {}", name, error);
        self.session = Some(Session::Failed(error.clone()));
        events.push(StreamEvent::OpenFailed(error));
    }

    /// Draws the selection made by the last [`Nexus::begin`].
    pub fn render(&mut self, gpu: &mut dyn GpuContext) -> DrawStats {
        debug_assert!(self.in_frame, "render called outside begin/end");
        match &self.session {
            Some(Session::Open(dataset)) => dataset.render(&self.view, self.mode, gpu),
            _ => DrawStats::default(),
        }
    }

    pub fn end(&mut self) {
        debug_assert!(self.in_frame, "end called without begin");
        self.in_frame = false;
    }

    pub fn state(&self) -> DatasetState {
        match &self.session {
            None => DatasetState::Closed,
            Some(Session::LoadingHeader | Session::LoadingIndex(_)) => DatasetState::Loading,
            Some(Session::Open(_)) => DatasetState::Ready,
            Some(Session::Failed(e)) => DatasetState::Failed(e.clone()),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.session, Some(Session::Open(_)))
    }

    fn dataset(&self) -> Option<&OpenDataset> {
        match &self.session {
            Some(Session::Open(dataset)) => Some(dataset.as_ref()),
            _ => None,
        }
    }

    pub fn header(&self) -> Option<&Header> {
        match &self.session {
            Some(Session::LoadingIndex(header)) => Some(header),
            Some(Session::Open(dataset)) => Some(&dataset.header),
            _ => None,
        }
    }

    pub fn index(&self) -> Option<&NodeIndex> {
        self.dataset().map(|d| &d.index)
    }

    /// Center of the dataset's bounding sphere, in model space. Known once the header is loaded.
    pub fn dataset_center(&self) -> Option<Vec3A> {
        self.header().map(|h| h.sphere.center)
    }

    pub fn dataset_radius(&self) -> Option<f32> {
        self.header().map(|h| h.sphere.radius)
    }

    pub fn node_status(&self, id: NodeId) -> Option<Status> {
        self.dataset()
            .and_then(|d| d.residency.nodes.get(id as usize))
            .map(|n| n.status)
    }

    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StreamingConfig) {
        self.config = config;
    }

    pub fn set_target_error(&mut self, target_error: f32) {
        self.config.target_error = target_error;
    }

    pub fn set_max_pending_requests(&mut self, max_pending_requests: usize) {
        self.config.max_pending_requests = max_pending_requests;
    }

    /// A smaller budget takes effect at the next cache update.
    pub fn set_max_cache_bytes(&mut self, max_cache_bytes: u64) {
        self.config.max_cache_bytes = max_cache_bytes;
    }

    pub fn set_draw_budget(&mut self, draw_budget: f32) {
        self.config.draw_budget = draw_budget;
    }

    pub fn set_model_matrix(&mut self, model: Mat4) {
        self.view.set_model(model);
    }

    pub fn set_view_matrix(&mut self, view: Mat4) {
        self.view.set_view(view);
    }

    pub fn set_projection_matrix(&mut self, projection: Mat4) {
        self.view.set_projection(projection);
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.view.set_viewport(viewport);
    }

    pub fn set_mode(&mut self, mode: RenderMode) {
        self.mode = mode;
    }

    pub fn view(&self) -> &ViewEstimator {
        &self.view
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn resident_bytes(&self) -> u64 {
        self.dataset().map_or(0, |d| d.cache.resident_bytes())
    }

    pub fn resident_count(&self) -> usize {
        self.dataset().map_or(0, |d| d.cache.resident().len())
    }

    pub fn pending_requests(&self) -> usize {
        self.dataset().map_or(0, |d| d.pending_requests)
    }

    pub fn selected_count(&self) -> usize {
        self.dataset()
            .map_or(0, |d| d.traversal.selected().count_ones())
    }

    /// Screen-space error where the last traversal stopped refining.
    pub fn current_error(&self) -> f32 {
        self.dataset()
            .map_or(self.config.target_error, |d| d.traversal.current_error())
    }
}

impl std::fmt::Debug for Nexus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nexus")
            .field("state", &self.state())
            .field("frame", &self.frame)
            .field("resident_bytes", &self.resident_bytes())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
