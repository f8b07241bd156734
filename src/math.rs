use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

/// Tolerance used for approximate equality and for the zero-length guard in `normalize`
pub const EPSILON: f32 = 0.001;

fn almost_equal(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

/// Two-component vector
#[derive(Clone, Copy, Debug, Default)]
pub struct Vector2 {
    pub x: f32,
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    pub fn magnitude(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn dot(self, other: Vector2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Unit vector in the same direction, or zero when the magnitude is below `EPSILON`
    pub fn normalize(self) -> Vector2 {
        let mag = self.magnitude();
        if mag.abs() < EPSILON {
            return Vector2::ZERO;
        }
        self * (1.0 / mag)
    }
}

impl Add for Vector2 {
    type Output = Vector2;

    fn add(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vector2 {
    type Output = Vector2;

    fn sub(self, rhs: Vector2) -> Vector2 {
        Vector2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vector2 {
    type Output = Vector2;

    fn mul(self, scalar: f32) -> Vector2 {
        Vector2::new(self.x * scalar, self.y * scalar)
    }
}

impl PartialEq for Vector2 {
    fn eq(&self, other: &Self) -> bool {
        almost_equal(self.x, other.x) && almost_equal(self.y, other.y)
    }
}

impl fmt::Display for Vector2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2} {:.2})", self.x, self.y)
    }
}

/// Three-component vector
#[derive(Clone, Copy, Debug, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3 {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Vector3 { x, y, z }
    }

    pub fn magnitude(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn dot(self, other: Vector3) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Calculates the cross product `self × other`
    pub fn cross(self, other: Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Unit vector in the same direction, or zero when the magnitude is below `EPSILON`
    pub fn normalize(self) -> Vector3 {
        let mag = self.magnitude();
        if mag.abs() < EPSILON {
            return Vector3::ZERO;
        }
        self * (1.0 / mag)
    }

    /// Shortens the vector to `bound` if it is longer, otherwise returns it unchanged
    pub fn clamp_magnitude(self, bound: f32) -> Vector3 {
        if self.magnitude() < bound {
            self
        } else {
            self.normalize() * bound
        }
    }

    /// Linear interpolation, `t = 0` yields `self`
    pub fn lerp(self, other: Vector3, t: f32) -> Vector3 {
        self * (1.0 - t) + other * t
    }
}

impl Add for Vector3 {
    type Output = Vector3;

    fn add(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vector3 {
    type Output = Vector3;

    fn sub(self, rhs: Vector3) -> Vector3 {
        Vector3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vector3 {
    type Output = Vector3;

    fn mul(self, scalar: f32) -> Vector3 {
        Vector3::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        self * -1.0
    }
}

impl PartialEq for Vector3 {
    fn eq(&self, other: &Self) -> bool {
        almost_equal(self.x, other.x) && almost_equal(self.y, other.y) && almost_equal(self.z, other.z)
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2} {:.2} {:.2})", self.x, self.y, self.z)
    }
}

/// Row-major 4x4 matrix. Points are treated as column vectors with an implicit `w = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    m: [[f32; 4]; 4],
}

impl Default for Transform {
    fn default() -> Self {
        Transform::identity()
    }
}

impl Transform {
    pub const fn identity() -> Self {
        Transform {
            m: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    pub fn translation(t: Vector3) -> Self {
        let mut out = Transform::identity();
        out.m[0][3] = t.x;
        out.m[1][3] = t.y;
        out.m[2][3] = t.z;
        out
    }

    pub fn scale(s: Vector3) -> Self {
        let mut out = Transform::identity();
        out.m[0][0] = s.x;
        out.m[1][1] = s.y;
        out.m[2][2] = s.z;
        out
    }

    /// Right-handed rotation about the X axis
    pub fn rotation_x(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let mut out = Transform::identity();
        out.m[1][1] = cos;
        out.m[1][2] = -sin;
        out.m[2][1] = sin;
        out.m[2][2] = cos;
        out
    }

    /// Right-handed rotation about the Y axis
    pub fn rotation_y(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let mut out = Transform::identity();
        out.m[0][0] = cos;
        out.m[0][2] = sin;
        out.m[2][0] = -sin;
        out.m[2][2] = cos;
        out
    }

    /// Right-handed rotation about the Z axis
    pub fn rotation_z(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        let mut out = Transform::identity();
        out.m[0][0] = cos;
        out.m[0][1] = -sin;
        out.m[1][0] = sin;
        out.m[1][1] = cos;
        out
    }

    /// Euler rotation in degrees, composed X then Y then Z
    pub fn rotation(degrees: Vector3) -> Self {
        Transform::rotation_x(degrees.x)
            * Transform::rotation_y(degrees.y)
            * Transform::rotation_z(degrees.z)
    }

    /// Scale, then rotate, then translate
    pub fn trs(translate: Vector3, rotate: Vector3, scale: Vector3) -> Self {
        Transform::translation(translate) * Transform::rotation(rotate) * Transform::scale(scale)
    }

    /// View matrix looking from `eye` towards `center`; forward ends up along -Z
    pub fn look_at(eye: Vector3, center: Vector3, up: Vector3) -> Self {
        let forward = (center - eye).normalize();
        let side = forward.cross(up).normalize();
        let up = side.cross(forward);

        Transform {
            m: [
                [side.x, side.y, side.z, -side.dot(eye)],
                [up.x, up.y, up.z, -up.dot(eye)],
                [-forward.x, -forward.y, -forward.z, forward.dot(eye)],
                [0.0, 0.0, 0.0, 1.0],
            ],
        }
    }

    /// Multiplies two 4x4 matrices
    pub fn multiply(&self, rhs: &Transform) -> Transform {
        let mut m = [[0.0; 4]; 4];
        for (r, row) in m.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = (0..4).map(|k| self.m[r][k] * rhs.m[k][c]).sum();
            }
        }
        Transform { m }
    }

    /// Applies the matrix to a point with `w = 1`
    pub fn transform_point(&self, v: Vector3) -> Vector3 {
        let m = &self.m;
        Vector3::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z + m[0][3],
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z + m[1][3],
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z + m[2][3],
        )
    }

    /// Component-wise comparison with an explicit tolerance
    pub fn approx_eq(&self, other: &Transform, tolerance: f32) -> bool {
        self.m
            .iter()
            .flatten()
            .zip(other.m.iter().flatten())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

impl Mul for Transform {
    type Output = Transform;

    fn mul(self, rhs: Transform) -> Transform {
        self.multiply(&rhs)
    }
}

impl Mul<Vector3> for Transform {
    type Output = Vector3;

    fn mul(self, rhs: Vector3) -> Vector3 {
        self.transform_point(rhs)
    }
}
