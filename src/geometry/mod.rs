//! Geometry primitives shared by physics and the wire codec

pub mod shape;
pub mod vector;

pub use shape::{Circle, Segment, Shape};
pub use vector::Vector2;
