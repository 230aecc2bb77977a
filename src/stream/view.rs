use crate::core::geometry::{Frustum, Sphere};
use crate::core::glam::{Mat4, Vec3, Vec3A};
use crate::format::Node;

/// Screen rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1024.0, 768.0)
    }
}

/// Turns object-space node error into screen-space error for the current camera.
///
/// Everything is computed in the dataset's own (model) space: the frustum planes and view point are pulled back through the
/// inverse model-view-projection, so node spheres can be tested without transforming them.
#[derive(Clone, Debug)]
pub struct ViewEstimator {
    model: Mat4,
    view: Mat4,
    projection: Mat4,
    viewport: Viewport,

    view_point: Vec3A,
    frustum: Frustum,
    /// Model-space size of one pixel per unit of distance from the view point. For orthographic projections the size doesn't
    /// depend on distance, so distance is taken to be 1.
    resolution: f32,
    orthographic: bool,
}

/// Nodes closer than this are treated as this close, so errors stay finite when the camera is inside a node.
const MIN_DISTANCE: f32 = 0.1;

/// Error divisor for nodes outside the frustum. They stay selectable for prefetching, just with low priority.
const OFFSCREEN_ERROR_DIVISOR: f32 = 1000.0;

impl Default for ViewEstimator {
    fn default() -> Self {
        let mut estimator = Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_4, 4.0 / 3.0, 0.1, 1000.0),
            viewport: Viewport::default(),
            view_point: Vec3A::ZERO,
            frustum: Frustum::default(),
            resolution: 1.0,
            orthographic: false,
        };
        estimator.update();
        estimator
    }
}

impl ViewEstimator {
    pub fn set_model(&mut self, model: Mat4) {
        self.model = model;
    }

    pub fn set_view(&mut self, view: Mat4) {
        self.view = view;
    }

    pub fn set_projection(&mut self, projection: Mat4) {
        self.projection = projection;
    }

    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn model(&self) -> Mat4 {
        self.model
    }

    pub fn view_point(&self) -> Vec3A {
        self.view_point
    }

    pub fn frustum(&self) -> &Frustum {
        &self.frustum
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    /// Recomputes the frustum, view point and resolution from the current matrices and viewport.
    pub fn update(&mut self) {
        let model_view = self.view * self.model;
        let inverse_model_view = model_view.inverse();
        let model_view_projection = self.projection * model_view;

        self.view_point = Vec3A::from(inverse_model_view.transform_point3(Vec3::ZERO));
        self.frustum = Frustum::from_inverse_view_projection(model_view_projection.inverse());

        // The projection's vertical scale maps a view-space slope to half the viewport height.
        let pixel_slope = 2.0 / (self.viewport.height.max(1.0) * self.projection.y_axis.y.abs());
        self.orthographic = self.projection.z_axis.w == 0.0;
        self.resolution = if self.orthographic {
            // Here `pixel_slope` is a view-space length; bring it back into model space.
            let view_units_per_model_unit = model_view.x_axis.truncate().length().max(f32::EPSILON);
            pixel_slope / view_units_per_model_unit
        } else {
            pixel_slope
        };
    }

    pub fn is_visible(&self, sphere: &Sphere) -> bool {
        self.frustum.intersects_sphere(sphere)
    }

    /// Approximate projected error of `node`, in pixels.
    pub fn node_error(&self, node: &Node) -> f32 {
        let distance = if self.orthographic {
            1.0
        } else {
            node.sphere.distance_to_surface(self.view_point).max(MIN_DISTANCE)
        };
        let error = node.error / (self.resolution * distance);
        if self.is_visible(&node.sphere) {
            error
        } else {
            error / OFFSCREEN_ERROR_DIVISOR
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::core::approx::assert_relative_eq;
    use crate::format::ByteUnits;

    /// A camera at the origin looking down -Z with a 90° vertical field of view and a 1000 pixel tall viewport, so
    /// `resolution == 0.002` and a node whose surface is 500 units away has `resolution * distance == 1`.
    pub fn unit_view() -> ViewEstimator {
        let mut view = ViewEstimator::default();
        view.set_projection(Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 10_000.0));
        view.set_viewport(Viewport::new(1000.0, 1000.0));
        view.update();
        view
    }

    pub fn node_at(center: Vec3A, radius: f32, error: f32) -> Node {
        Node {
            offset: ByteUnits(0),
            end: ByteUnits(0),
            vertex_count: 0,
            face_count: 0,
            error,
            cone: Default::default(),
            sphere: Sphere::new(center, radius),
            tight_radius: radius,
            first_patch: 0,
            last_patch: 0,
        }
    }

    #[test]
    fn resolution_matches_field_of_view() {
        let view = unit_view();
        assert_relative_eq!(view.resolution(), 0.002, epsilon = 1e-6);
        assert_relative_eq!(view.view_point(), Vec3A::ZERO, epsilon = 1e-5);

        let node = node_at(Vec3A::new(0.0, 0.0, -501.0), 1.0, 10.0);
        assert_relative_eq!(view.node_error(&node), 10.0, epsilon = 1e-3);
    }

    #[test]
    fn error_falls_off_with_distance() {
        let view = unit_view();
        let near = node_at(Vec3A::new(0.0, 0.0, -11.0), 1.0, 1.0);
        let far = node_at(Vec3A::new(0.0, 0.0, -21.0), 1.0, 1.0);
        assert_relative_eq!(view.node_error(&near), 2.0 * view.node_error(&far), epsilon = 1e-3);
    }

    #[test]
    fn camera_inside_node_uses_minimum_distance() {
        let view = unit_view();
        let around = node_at(Vec3A::ZERO, 5.0, 1.0);
        assert_relative_eq!(view.node_error(&around), 1.0 / (0.002 * MIN_DISTANCE), epsilon = 1e-1);
    }

    #[test]
    fn offscreen_error_is_divided() {
        let view = unit_view();
        let ahead = node_at(Vec3A::new(0.0, 0.0, -11.0), 1.0, 1.0);
        let behind = node_at(Vec3A::new(0.0, 0.0, 11.0), 1.0, 1.0);
        assert!(view.is_visible(&ahead.sphere));
        assert!(!view.is_visible(&behind.sphere));
        assert_relative_eq!(
            view.node_error(&ahead),
            OFFSCREEN_ERROR_DIVISOR * view.node_error(&behind),
            epsilon = 1e-3
        );
    }

    #[test]
    fn model_matrix_moves_view_point_into_model_space() {
        let mut view = unit_view();
        view.set_model(Mat4::from_translation(Vec3::new(0.0, 0.0, -100.0)));
        view.update();
        assert_relative_eq!(view.view_point(), Vec3A::new(0.0, 0.0, 100.0), epsilon = 1e-3);
        // The model's origin is now straight ahead of the camera.
        assert!(view.is_visible(&Sphere::new(Vec3A::ZERO, 1.0)));
    }
}
