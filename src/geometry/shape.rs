//! Collision shapes and intersection tests

use super::Vector2;

/// Contact information for two overlapping shapes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intersection {
    /// Contact point on the surface of the other shape
    pub hit_point: Vector2,
    /// Unit normal at the contact, pointing toward `self`
    pub normal: Vector2,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Vector2,
    pub radius: f64,
}

impl Circle {
    pub const fn new(center: Vector2, radius: f64) -> Self {
        Self { center, radius }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub a: Vector2,
    pub b: Vector2,
}

impl Segment {
    pub const fn new(a: Vector2, b: Vector2) -> Self {
        Self { a, b }
    }

    pub fn midpoint(&self) -> Vector2 {
        (self.a + self.b) * 0.5
    }

    pub fn length(&self) -> f64 {
        (self.b - self.a).length()
    }

    /// Closest point on the segment to `p`
    pub fn closest_point(&self, p: Vector2) -> Vector2 {
        let ab = self.b - self.a;
        let len_sq = ab.length_squared();
        if len_sq < f64::EPSILON {
            return self.a;
        }
        let t = ((p - self.a).dot(ab) / len_sq).clamp(0.0, 1.0);
        self.a + ab * t
    }

    /// Unit normal (left-hand side of a→b)
    pub fn normal(&self) -> Vector2 {
        (self.b - self.a).perp().normalize()
    }

    /// Same segment shifted by `offset`
    pub fn translated(&self, offset: Vector2) -> Self {
        Self::new(self.a + offset, self.b + offset)
    }
}

/// Polymorphic collision primitive
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Circle(Circle),
    Segment(Segment),
}

impl Shape {
    /// Test this shape against `other`.
    ///
    /// Returns the contact when they overlap. Touching exactly at the
    /// boundary counts as a miss.
    pub fn intersect(&self, other: &Shape) -> Option<Intersection> {
        match (self, other) {
            (Shape::Circle(a), Shape::Circle(b)) => circle_circle(a, b),
            (Shape::Circle(c), Shape::Segment(s)) => circle_segment(c, s),
            (Shape::Segment(s), Shape::Circle(c)) => circle_segment(c, s).map(|hit| Intersection {
                hit_point: hit.hit_point,
                normal: -hit.normal,
            }),
            (Shape::Segment(a), Shape::Segment(b)) => segment_segment(a, b),
        }
    }
}

impl From<Circle> for Shape {
    fn from(c: Circle) -> Self {
        Shape::Circle(c)
    }
}

impl From<Segment> for Shape {
    fn from(s: Segment) -> Self {
        Shape::Segment(s)
    }
}

fn circle_circle(a: &Circle, b: &Circle) -> Option<Intersection> {
    let delta = a.center - b.center;
    let combined = a.radius + b.radius;
    if delta.length_squared() >= combined * combined {
        return None;
    }
    let normal = match delta.normalize() {
        n if n == Vector2::ZERO => Vector2::new(1.0, 0.0),
        n => n,
    };
    Some(Intersection {
        hit_point: b.center + normal * b.radius,
        normal,
    })
}

fn circle_segment(c: &Circle, s: &Segment) -> Option<Intersection> {
    let closest = s.closest_point(c.center);
    let delta = c.center - closest;
    if delta.length_squared() >= c.radius * c.radius {
        return None;
    }
    // Centre lying on the segment: fall back to the segment normal facing the circle's side
    let normal = match delta.normalize() {
        n if n == Vector2::ZERO => s.normal(),
        n => n,
    };
    Some(Intersection {
        hit_point: closest,
        normal,
    })
}

fn segment_segment(a: &Segment, b: &Segment) -> Option<Intersection> {
    let r = a.b - a.a;
    let s = b.b - b.a;
    let denom = r.cross(s);
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let qp = b.a - a.a;
    let t = qp.cross(s) / denom;
    let u = qp.cross(r) / denom;
    if !(0.0..=1.0).contains(&t) || !(0.0..=1.0).contains(&u) {
        return None;
    }
    let hit_point = a.a + r * t;
    let mut normal = b.normal();
    // Orient toward the side `a` starts from
    if (a.a - b.a).dot(normal) < 0.0 {
        normal = -normal;
    }
    Some(Intersection { hit_point, normal })
}
