//! Geometric primitives shared by manual gating and centroid classification.
//!
//! Everything here is generic over [`EventValue`](flow_events::EventValue) so the same
//! tests run against `f32` and `f64` tables without converting each event.

pub mod primitives;

pub use primitives::{BoundingBox, is_left, point_in_polygon, winding_number, within_bounds};
