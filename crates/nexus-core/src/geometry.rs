use glam::{Mat4, Vec3, Vec3A};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sphere {
    pub center: Vec3A,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3A, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Distance from `p` to the closest point of the sphere. Negative when `p` is inside.
    pub fn distance_to_surface(&self, p: Vec3A) -> f32 {
        self.center.distance(p) - self.radius
    }
}

/// A cone of normals bounding the surface in a node. Packed as four normalized `i16`s on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Cone {
    pub axis: Vec3A,
    pub spread: f32,
}

impl Cone {
    pub fn from_packed(packed: [i16; 4]) -> Self {
        let [x, y, z, w] = packed.map(|c| c as f32 / i16::MAX as f32);
        Self {
            axis: Vec3A::new(x, y, z),
            spread: w,
        }
    }

    pub fn to_packed(&self) -> [i16; 4] {
        let q = |c: f32| (c.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        [q(self.axis.x), q(self.axis.y), q(self.axis.z), q(self.spread)]
    }
}

/// The set of points `p` where `normal.dot(p) - offset == 0`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Plane {
    pub normal: Vec3A,
    pub offset: f32,
}

impl Plane {
    /// The plane through `a`, `b`, `c`, with normal pointing along `(b - a) x (c - a)`.
    pub fn from_points(a: Vec3A, b: Vec3A, c: Vec3A) -> Self {
        let normal = (b - a).cross(c - a).normalize_or_zero();
        Self {
            normal,
            offset: normal.dot(a),
        }
    }

    #[inline]
    pub fn signed_distance(&self, p: Vec3A) -> f32 {
        self.normal.dot(p) - self.offset
    }

    pub fn flipped(&self) -> Self {
        Self {
            normal: -self.normal,
            offset: -self.offset,
        }
    }
}

/// Six planes bounding the view volume. Every plane's positive half-space faces the inside.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Frustum {
    pub planes: [Plane; 6],
}

impl Frustum {
    pub const LEFT: usize = 0;
    pub const RIGHT: usize = 1;
    pub const BOTTOM: usize = 2;
    pub const TOP: usize = 3;
    pub const NEAR: usize = 4;
    pub const FAR: usize = 5;

    /// Un-projects the corners of the normalized device cube (depth in `[-1, 1]`) through `inverse_view_projection` and builds
    /// the planes from those corners.
    pub fn from_inverse_view_projection(inverse_view_projection: Mat4) -> Self {
        let corner = |x: f32, y: f32, z: f32| {
            Vec3A::from(inverse_view_projection.project_point3(Vec3::new(x, y, z)))
        };
        let near = [
            corner(-1.0, -1.0, -1.0),
            corner(1.0, -1.0, -1.0),
            corner(1.0, 1.0, -1.0),
            corner(-1.0, 1.0, -1.0),
        ];
        let far = [
            corner(-1.0, -1.0, 1.0),
            corner(1.0, -1.0, 1.0),
            corner(1.0, 1.0, 1.0),
            corner(-1.0, 1.0, 1.0),
        ];
        Self::from_corners(near, far)
    }

    /// Corners are given counter-clockwise starting at bottom-left: `[bl, br, tr, tl]`.
    pub fn from_corners(near: [Vec3A; 4], far: [Vec3A; 4]) -> Self {
        let [n0, n1, n2, n3] = near;
        let [f0, f1, f2, f3] = far;

        let mut planes = [Plane::default(); 6];
        planes[Self::LEFT] = Plane::from_points(n0, n3, f3);
        planes[Self::RIGHT] = Plane::from_points(n1, f1, f2);
        planes[Self::BOTTOM] = Plane::from_points(n0, f0, f1);
        planes[Self::TOP] = Plane::from_points(n3, n2, f2);
        planes[Self::NEAR] = Plane::from_points(n0, n1, n2);
        planes[Self::FAR] = Plane::from_points(f0, f3, f2);

        // A mirroring transform flips the winding, so orient every plane against the centroid instead of trusting it.
        let centroid = near.iter().chain(far.iter()).fold(Vec3A::ZERO, |s, &p| s + p) / 8.0;
        for plane in planes.iter_mut() {
            if plane.signed_distance(centroid) < 0.0 {
                *plane = plane.flipped();
            }
        }

        Self { planes }
    }

    /// True iff the sphere is not entirely outside any of the planes.
    pub fn intersects_sphere(&self, sphere: &Sphere) -> bool {
        self.planes
            .iter()
            .all(|p| p.signed_distance(sphere.center) + sphere.radius >= 0.0)
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

    use approx::assert_relative_eq;

    fn camera_frustum() -> Frustum {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh_gl(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 100.0);
        Frustum::from_inverse_view_projection((proj * view).inverse())
    }

    #[test]
    fn planes_face_inward() {
        let frustum = camera_frustum();
        for plane in frustum.planes.iter() {
            assert!(plane.signed_distance(Vec3A::ZERO) > 0.0, "{:?}", plane);
        }
        assert_relative_eq!(
            frustum.planes[Frustum::NEAR].signed_distance(Vec3A::new(0.0, 0.0, 9.0)),
            0.0,
            epsilon = 1e-3
        );
    }

    #[test]
    fn sphere_culling() {
        let frustum = camera_frustum();
        assert!(frustum.intersects_sphere(&Sphere::new(Vec3A::ZERO, 1.0)));
        // Behind the camera.
        assert!(!frustum.intersects_sphere(&Sphere::new(Vec3A::new(0.0, 0.0, 20.0), 1.0)));
        // Far off to the side, but a big radius reaches back in.
        assert!(!frustum.intersects_sphere(&Sphere::new(Vec3A::new(50.0, 0.0, 0.0), 1.0)));
        assert!(frustum.intersects_sphere(&Sphere::new(Vec3A::new(50.0, 0.0, 0.0), 40.0)));
        // Beyond the far plane.
        assert!(!frustum.intersects_sphere(&Sphere::new(Vec3A::new(0.0, 0.0, -200.0), 1.0)));
    }

    #[test]
    fn mirrored_projection_keeps_inward_planes() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 10.0), Vec3::ZERO, Vec3::Y);
        let proj = Mat4::perspective_rh_gl(1.0, 1.0, 1.0, 100.0);
        let mirror = Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0));
        let frustum = Frustum::from_inverse_view_projection((proj * view * mirror).inverse());
        assert!(frustum.intersects_sphere(&Sphere::new(Vec3A::ZERO, 0.5)));
    }

    #[test]
    fn cone_packing() {
        let cone = Cone::from_packed([i16::MAX, 0, 0, i16::MAX / 2]);
        assert_relative_eq!(cone.axis.x, 1.0);
        assert_relative_eq!(cone.spread, 0.5, epsilon = 1e-4);
        assert_eq!(Cone::from_packed(cone.to_packed()), cone);
    }
}
