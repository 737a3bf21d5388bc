use serde::{Deserialize, Serialize};

/// A point in either page-native or surface coordinates, depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Scroll offset in unscaled page units, measured from the origin of the
/// current page to the top-left of the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle. Page bounds use the page's native space with the
/// origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x0 && point.x < self.x1 && point.y >= self.y0 && point.y < self.y1
    }

    /// Bounding box of the four transformed corners.
    pub fn transform(&self, matrix: Matrix) -> Rect {
        let corners = [
            matrix.transform_point(Point::new(self.x0, self.y0)),
            matrix.transform_point(Point::new(self.x1, self.y0)),
            matrix.transform_point(Point::new(self.x0, self.y1)),
            matrix.transform_point(Point::new(self.x1, self.y1)),
        ];
        let mut out = Rect::new(corners[0].x, corners[0].y, corners[0].x, corners[0].y);
        for corner in &corners[1..] {
            out.x0 = out.x0.min(corner.x);
            out.y0 = out.y0.min(corner.y);
            out.x1 = out.x1.max(corner.x);
            out.y1 = out.y1.max(corner.y);
        }
        out
    }
}

/// Page rotation in quarter turns. The trigonometric pairs are exact so a
/// rotate/unrotate round-trip does not accumulate floating-point error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    /// Next quarter turn clockwise.
    pub fn rotated_clockwise(self) -> Self {
        match self {
            Rotation::Deg0 => Rotation::Deg90,
            Rotation::Deg90 => Rotation::Deg180,
            Rotation::Deg180 => Rotation::Deg270,
            Rotation::Deg270 => Rotation::Deg0,
        }
    }

    fn cos_sin(self) -> (f32, f32) {
        match self {
            Rotation::Deg0 => (1.0, 0.0),
            Rotation::Deg90 => (0.0, 1.0),
            Rotation::Deg180 => (-1.0, 0.0),
            Rotation::Deg270 => (0.0, -1.0),
        }
    }
}

/// Affine transform using the row-vector convention:
/// `(x, y) -> (a*x + c*y + e, b*x + d*y + f)`.
///
/// `m1.concat(m2)` applies `m1` first, then `m2`, which is why the per-page
/// draw matrix is written `translate(cursor).concat(scale_matrix)` — the
/// cursor translation happens in unscaled page units before zoom and
/// rotation are applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn scale(sx: f32, sy: f32) -> Self {
        Matrix {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn translation(tx: f32, ty: f32) -> Self {
        Matrix {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: tx,
            f: ty,
        }
    }

    pub fn rotation(rotation: Rotation) -> Self {
        let (cos, sin) = rotation.cos_sin();
        Matrix {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self` applied first, then `other`.
    pub fn concat(self, other: Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    pub fn transform_point(self, point: Point) -> Point {
        Point {
            x: self.a * point.x + self.c * point.y + self.e,
            y: self.b * point.x + self.d * point.y + self.f,
        }
    }

    /// Inverse transform. Callers must not feed a degenerate matrix (zoom is
    /// clamped to stay positive, rotations are quarter turns); a singular
    /// input falls back to the identity.
    pub fn invert(self) -> Matrix {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() <= f32::EPSILON {
            debug_assert!(false, "inverting a singular matrix");
            return Matrix::IDENTITY;
        }
        let inv_det = 1.0 / det;
        let a = self.d * inv_det;
        let b = -self.b * inv_det;
        let c = -self.c * inv_det;
        let d = self.a * inv_det;
        Matrix {
            a,
            b,
            c,
            d,
            e: -(self.e * a + self.f * c),
            f: -(self.e * b + self.f * d),
        }
    }
}

/// Transform taking page-native coordinates to the zoomed/rotated space,
/// parameterized solely by zoom, rotation, and the page bounds.
///
/// Scale and rotate, then shift the rotated bounding box back so the page
/// occupies the positive quadrant with its top-left corner at the origin.
/// Cheap enough to recompute on every use; it is deliberately never cached.
pub fn scale_matrix(zoom: f32, rotation: Rotation, bounds: Rect) -> Matrix {
    let linear = Matrix::scale(zoom, zoom).concat(Matrix::rotation(rotation));
    let placed = bounds.transform(linear);
    linear.concat(Matrix::translation(-placed.x0, -placed.y0))
}
