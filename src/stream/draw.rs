use super::state::Residency;
use super::traversal::Traversal;
use super::view::ViewEstimator;
use crate::core::geometry::Sphere;
use crate::format::{NodeId, NodeIndex, Signature, TextureId};
use crate::gpu::{GpuContext, NodeBinding};

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum RenderMode {
    #[default]
    Triangles,
    /// Draw only vertices, fading nodes in by drawing a growing prefix of their points.
    Points,
}

/// Counters for one [`FrameRenderer::render`] call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DrawStats {
    pub nodes: u32,
    pub draw_calls: u32,
    pub triangles: u64,
    pub points: u64,
}

/// Issues the draw calls for the current selection.
#[derive(Debug, Default)]
pub struct FrameRenderer;

impl FrameRenderer {
    #[allow(clippy::too_many_arguments)]
    pub fn render(
        &self,
        index: &NodeIndex,
        signature: &Signature,
        residency: &Residency,
        traversal: &Traversal,
        view: &ViewEstimator,
        mode: RenderMode,
        gpu: &mut dyn GpuContext,
    ) -> DrawStats {
        let mut stats = DrawStats::default();

        for id in traversal.selected().iter_ones() {
            let node = index.node(id);
            if !view.is_visible(&Sphere::new(node.sphere.center, node.tight_radius)) {
                continue;
            }
            let state = residency.node(id);
            let Some(buffers) = state.buffers else {
                continue;
            };

            let binding = NodeBinding {
                node: id,
                buffers,
                signature,
                vertex_count: node.vertex_count as u32,
                attribute_offsets: signature.vertex.element.block_offsets(node.vertex_count as usize),
            };

            if mode == RenderMode::Points || signature.is_point_cloud() {
                let count = point_count(node.vertex_count as u32, state.render_error, traversal.current_error());
                if count == 0 {
                    continue;
                }
                gpu.bind_node(&binding);
                gpu.draw_points(count);
                stats.nodes += 1;
                stats.draw_calls += 1;
                stats.points += count as u64;
            } else {
                gpu.bind_node(&binding);
                stats.nodes += 1;
                self.draw_patches(id, index, residency, traversal, gpu, &mut stats);
            }
        }

        stats
    }

    /// Draws the parts of `id` that aren't covered by selected children, merging neighboring patches into one call unless the
    /// texture changes between them.
    fn draw_patches(
        &self,
        id: NodeId,
        index: &NodeIndex,
        residency: &Residency,
        traversal: &Traversal,
        gpu: &mut dyn GpuContext,
        stats: &mut DrawStats,
    ) {
        let mut run = TriangleRun::default();
        let mut patch_start = 0;
        for patch in index.patches_of(id) {
            let start = patch_start;
            patch_start = patch.triangle_end;

            if !index.is_sink(patch.child) && traversal.is_selected(patch.child) {
                run.flush(index, residency, gpu, stats);
                continue;
            }
            if !run.is_empty() && run.texture != patch.texture {
                run.flush(index, residency, gpu, stats);
            }
            if run.is_empty() {
                run.start = start;
                run.texture = patch.texture;
            }
            run.end = patch.triangle_end;
        }
        run.flush(index, residency, gpu, stats);
    }
}

#[derive(Default)]
struct TriangleRun {
    start: u32,
    end: u32,
    texture: Option<TextureId>,
}

impl TriangleRun {
    fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    fn flush(&mut self, index: &NodeIndex, residency: &Residency, gpu: &mut dyn GpuContext, stats: &mut DrawStats) {
        if !self.is_empty() {
            if let Some(t) = self.texture {
                if let Some(handle) = residency.textures[t as usize].handle {
                    gpu.bind_texture(handle, &index.texture(t).uv_matrix);
                }
            }
            let count = self.end - self.start;
            gpu.draw_triangles(self.start, count);
            stats.draw_calls += 1;
            stats.triangles += count as u64;
        }
        *self = Self::default();
    }
}

/// How many of a node's points to draw. Nodes at the cut draw none and fade in fully once their error is twice the cut's.
pub fn point_count(vertex_count: u32, render_error: f32, current_error: f32) -> u32 {
    if current_error <= 0.0 {
        return vertex_count;
    }
    let fraction = (render_error / current_error - 1.0).clamp(0.0, 1.0);
    (vertex_count as f32 * fraction) as u32
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
