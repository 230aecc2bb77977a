use super::OpenError;
use crate::fetch::FetchError;
use crate::format::{Header, NodeId, NodeIndex, NodePayload, TextureId};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Asks the host to schedule another frame. May be called from any thread.
pub type RedrawSignal = Arc<dyn Fn() + Send + Sync>;

/// The result of one asynchronous request.
pub enum Completion {
    Header(Result<Header, OpenError>),
    Index(Result<NodeIndex, OpenError>),
    Node {
        id: NodeId,
        result: Result<NodePayload, FetchError>,
    },
    Texture {
        id: TextureId,
        result: Result<Vec<u8>, FetchError>,
    },
}

impl Completion {
    fn is_failure(&self) -> bool {
        match self {
            Self::Header(r) => r.is_err(),
            Self::Index(r) => r.is_err(),
            Self::Node { result, .. } => result.is_err(),
            Self::Texture { result, .. } => result.is_err(),
        }
    }
}

/// Where fetch callbacks leave their results until the next frame merges them.
///
/// Callbacks only ever touch this; all other engine state belongs to the thread that calls `begin`. Each result is tagged
/// with the generation of the dataset that requested it, and results from older generations are dropped.
pub struct Inbox {
    completions: Mutex<Vec<(u64, Completion)>>,
    generation: AtomicU64,
    /// Set when the last traversal stopped at a node that wasn't resident yet.
    redraw_on_new_nodes: AtomicBool,
    /// Cleared by the first failure of a batch, so one batch of failures asks for one redraw.
    failure_redraw_armed: AtomicBool,
    redraw: RedrawSignal,
}

impl Inbox {
    pub fn new(redraw: RedrawSignal) -> Self {
        Self {
            completions: Mutex::new(Vec::new()),
            generation: AtomicU64::new(0),
            redraw_on_new_nodes: AtomicBool::new(false),
            failure_redraw_armed: AtomicBool::new(true),
            redraw,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Invalidates every request made so far and returns the new generation.
    pub fn next_generation(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.completions.lock().clear();
        self.redraw_on_new_nodes.store(false, Ordering::Release);
        self.failure_redraw_armed.store(true, Ordering::Release);
        generation
    }

    pub fn set_redraw_on_new_nodes(&self, redraw: bool) {
        self.redraw_on_new_nodes.store(redraw, Ordering::Release);
        // Results that landed while the frame was running would otherwise never wake the host.
        if redraw
            && !self.completions.lock().is_empty()
            && self.redraw_on_new_nodes.swap(false, Ordering::AcqRel)
        {
            self.request_redraw();
        }
    }

    pub fn arm_failure_redraw(&self) {
        self.failure_redraw_armed.store(true, Ordering::Release);
    }

    pub fn request_redraw(&self) {
        (self.redraw)();
    }

    pub fn push(&self, generation: u64, completion: Completion) {
        if generation != self.generation() {
            log::trace!("Dropping a completion from closed generation {}", generation);
            return;
        }

        let is_open_step = matches!(completion, Completion::Header(_) | Completion::Index(_));
        let is_failure = completion.is_failure();
        // Queue first, so a concurrent `set_redraw_on_new_nodes` either sees this completion or leaves the flag for us.
        self.completions.lock().push((generation, completion));

        let redraw = if is_open_step {
            true
        } else if is_failure {
            self.failure_redraw_armed.swap(false, Ordering::AcqRel)
        } else {
            self.redraw_on_new_nodes.swap(false, Ordering::AcqRel)
        };

        if redraw {
            self.request_redraw();
        }
    }

    /// Takes every completion of the current generation.
    pub fn drain(&self) -> Vec<Completion> {
        let generation = self.generation();
        let drained = std::mem::take(&mut *self.completions.lock());
        drained
            .into_iter()
            .filter(|(g, _)| *g == generation)
            .map(|(_, c)| c)
            .collect()
    }
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

    use std::sync::atomic::AtomicUsize;

    fn counting_inbox() -> (Inbox, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let inbox = Inbox::new(Arc::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        (inbox, count)
    }

    fn failed_node(id: NodeId) -> Completion {
        Completion::Node {
            id,
            result: Err(FetchError::Io("reset".into())),
        }
    }

    #[test]
    fn stale_generations_are_dropped() {
        let (inbox, _) = counting_inbox();
        let old = inbox.next_generation();
        let new = inbox.next_generation();
        inbox.push(old, failed_node(1));
        inbox.push(new, failed_node(2));

        let drained = inbox.drain();
        assert_eq!(drained.len(), 1);
        assert!(matches!(drained[0], Completion::Node { id: 2, .. }));
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn one_redraw_per_failure_batch() {
        let (inbox, redraws) = counting_inbox();
        let generation = inbox.next_generation();
        for id in 0..5 {
            inbox.push(generation, failed_node(id));
        }
        assert_eq!(redraws.load(Ordering::SeqCst), 1);

        inbox.drain();
        inbox.arm_failure_redraw();
        inbox.push(generation, failed_node(9));
        assert_eq!(redraws.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn new_nodes_redraw_only_when_requested() {
        let (inbox, redraws) = counting_inbox();
        let generation = inbox.next_generation();
        let ok = |id| Completion::Node {
            id,
            result: Ok(NodePayload::default()),
        };

        inbox.push(generation, ok(1));
        assert_eq!(redraws.load(Ordering::SeqCst), 0);

        inbox.drain();
        inbox.set_redraw_on_new_nodes(true);
        inbox.push(generation, ok(2));
        inbox.push(generation, ok(3));
        assert_eq!(redraws.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn results_that_beat_the_flag_still_redraw() {
        let (inbox, redraws) = counting_inbox();
        let generation = inbox.next_generation();
        inbox.push(
            generation,
            Completion::Node {
                id: 0,
                result: Ok(NodePayload::default()),
            },
        );
        assert_eq!(redraws.load(Ordering::SeqCst), 0);

        inbox.set_redraw_on_new_nodes(true);
        assert_eq!(redraws.load(Ordering::SeqCst), 1);
    }
}
