use super::state::{Residency, Status};
use super::view::ViewEstimator;
use crate::core::bitset::Bitset;
use crate::format::{NodeId, NodeIndex};

use float_ord::FloatOrd;
use std::collections::BinaryHeap;

/// Limits for one traversal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TraversalLimits {
    pub target_error: f32,
    pub draw_budget: f32,
    pub max_blocked: usize,
    pub max_visits: usize,
    pub max_candidates: usize,
}

/// Picks this frame's cut through the node DAG.
///
/// Nodes are visited in order of decreasing screen-space error. A node is selected when it can be expanded; otherwise it is
/// blocked and so is everything below it. The pass ends once `max_blocked` nodes have failed to expand, since the heap only
/// gets less interesting from there.
#[derive(Debug, Default)]
pub struct Traversal {
    visited: Bitset,
    blocked: Bitset,
    selected: Bitset,
    heap: BinaryHeap<SearchNode>,
    /// Every non-resident node seen this pass. Only the best `max_candidates` end up in `candidates`.
    candidate_heap: BinaryHeap<SearchNode>,
    candidates: Vec<NodeId>,
    draw_size: f32,
    current_error: f32,
    blocked_on_missing: bool,
    deferred_retry: bool,
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
struct SearchNode {
    error: FloatOrd<f32>,
    id: std::cmp::Reverse<NodeId>,
}

impl Traversal {
    pub fn selected(&self) -> &Bitset {
        &self.selected
    }

    pub fn is_selected(&self, id: NodeId) -> bool {
        self.selected.get(id)
    }

    pub fn is_blocked(&self, id: NodeId) -> bool {
        self.blocked.get(id)
    }

    pub fn is_visited(&self, id: NodeId) -> bool {
        self.visited.get(id)
    }

    /// Non-resident nodes worth requesting, highest error first.
    pub fn candidates(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.candidates.iter().copied()
    }

    /// Estimated cost of drawing the selection.
    pub fn draw_size(&self) -> f32 {
        self.draw_size
    }

    /// Error of the first node that couldn't be expanded, or the target error if all of them could.
    pub fn current_error(&self) -> f32 {
        self.current_error
    }

    /// True if the cut stopped at a node that wasn't resident yet.
    pub fn blocked_on_missing(&self) -> bool {
        self.blocked_on_missing
    }

    /// True if a node would have been a candidate but is still waiting out a retry delay.
    pub fn deferred_retry(&self) -> bool {
        self.deferred_retry
    }

    /// Forgets the last selection, e.g. when the dataset is closed.
    pub fn clear(&mut self) {
        self.visited.reset(0);
        self.blocked.reset(0);
        self.selected.reset(0);
        self.heap.clear();
        self.candidates.clear();
        self.draw_size = 0.0;
    }

    pub fn run(
        &mut self,
        index: &NodeIndex,
        residency: &mut Residency,
        view: &ViewEstimator,
        limits: TraversalLimits,
        frame: u64,
    ) {
        let num_nodes = index.node_count();
        self.visited.reset(num_nodes);
        self.blocked.reset(num_nodes);
        self.selected.reset(num_nodes);
        self.heap.clear();
        self.candidate_heap.clear();
        self.candidates.clear();
        self.draw_size = 0.0;
        self.blocked_on_missing = false;
        self.deferred_retry = false;
        let mut first_blocked_error = None;

        // A dataset with only a sink has nothing to draw.
        if index.is_sink(0) {
            self.current_error = limits.target_error;
            return;
        }

        self.insert(0, index, residency, view, limits, frame);

        let mut num_blocked = 0;
        let mut num_visits = 0;
        while num_blocked < limits.max_blocked && num_visits < limits.max_visits {
            let Some(SearchNode { error, id }) = self.heap.pop() else {
                break;
            };
            let id = id.0;
            num_visits += 1;

            let blocked = self.blocked.get(id) || !self.expand(id, error.0, index, residency, limits);
            if blocked {
                num_blocked += 1;
                self.blocked.set(id);
                first_blocked_error.get_or_insert(error.0);
            } else {
                self.selected.set(id);
            }

            for child in index.children(id) {
                if blocked {
                    self.blocked.set(child);
                }
                self.insert(child, index, residency, view, limits, frame);
            }
        }

        self.current_error = first_blocked_error.unwrap_or(limits.target_error);
        while self.candidates.len() < limits.max_candidates {
            let Some(SearchNode { id, .. }) = self.candidate_heap.pop() else {
                break;
            };
            self.candidates.push(id.0);
        }
        self.candidate_heap.clear();

        log::trace!(
            "Frame {}: visited {} nodes, selected {}, blocked {}, draw size {}, {} candidates",
            frame,
            num_visits,
            self.selected.count_ones(),
            num_blocked,
            self.draw_size,
            self.candidates.len()
        );
    }

    fn insert(
        &mut self,
        id: NodeId,
        index: &NodeIndex,
        residency: &mut Residency,
        view: &ViewEstimator,
        limits: TraversalLimits,
        frame: u64,
    ) {
        if self.visited.get(id) {
            return;
        }
        self.visited.set(id);

        let error = view.node_error(index.node(id));
        let state = residency.node_mut(id);
        state.render_error = error;
        state.render_frame = frame;

        if state.status == Status::None {
            if state.retry_frame <= frame {
                self.candidate_heap.push(SearchNode {
                    error: FloatOrd(error),
                    id: std::cmp::Reverse(id),
                });
            } else {
                self.deferred_retry = true;
            }
        }

        self.heap.push(SearchNode {
            error: FloatOrd(error),
            id: std::cmp::Reverse(id),
        });
    }

    /// Whether the cut should move below `id`.
    fn expand(
        &mut self,
        id: NodeId,
        error: f32,
        index: &NodeIndex,
        residency: &Residency,
        limits: TraversalLimits,
    ) -> bool {
        if error < limits.target_error {
            return false;
        }
        if self.draw_size > limits.draw_budget {
            return false;
        }
        if !residency.is_ready(id) {
            self.blocked_on_missing = true;
            return false;
        }
        self.draw_size += index.node(id).draw_cost();
        true
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
