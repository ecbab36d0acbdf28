//! # flow-gates
//!
//! Gate definitions and gate trees for flow cytometry, with the geometry primitives
//! used to evaluate them and codecs for Gating-ML 2.0 and JSON gate files.
//!
//! ## Overview
//!
//! - **Gates**: a closed set of shapes ([`GateShape`]): rectangles and polygons, plus
//!   ellipsoid, quadrant, and boolean gates which are stored but not evaluated
//! - **Dimensions**: each gate axis names a parameter and optionally a
//!   [`Transform`](flow_events::Transform) held by the gate trees
//! - **Gating methods**: test every event, or cluster first and test the cluster
//!   centroids ([`GatingMethod::ClusterCentroid`])
//! - **Gate Trees**: an arena of gates with parent/child links and the
//!   parent-before-child traversal gating must follow
//! - **Geometry**: winding-number point-in-polygon and bound tests generic over the
//!   event width
//! - **Codecs**: Gating-ML 2.0 XML and JSON, both reading into and writing from
//!   [`GateTrees`]
//!
//! ## Quick Start
//!
//! ```rust
//! use flow_gates::*;
//!
//! # fn example() -> Result<()> {
//! let mut trees = GateTrees::new();
//! let cells = trees.add_root_gate(
//!     Gate::rectangle(
//!         vec![GateDimension::new("FSC-A"), GateDimension::new("SSC-A")],
//!         vec![
//!             RectangleBound::new(Some(10_000.0), None),
//!             RectangleBound::new(None, Some(200_000.0)),
//!         ],
//!     )?
//!     .with_name("Cells"),
//! )?;
//! trees.add_child_gate(
//!     cells,
//!     Gate::polygon(
//!         GateDimension::new("FSC-A"),
//!         GateDimension::new("FSC-H"),
//!         vec![(0.0, 0.0), (250_000.0, 0.0), (250_000.0, 240_000.0)],
//!     )?
//!     .with_name("Singlets"),
//! )?;
//!
//! let xml = gate_trees_to_gatingml(&trees)?;
//! let reloaded = gatingml_to_gate_trees(&xml)?;
//! assert_eq!(reloaded.number_of_gates(), 2);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod geometry;
pub mod gatingml;
pub mod json;
pub mod trees;
pub mod types;

/// Format selection and file helpers for gate trees
pub use codec::{GateTreesFormat, read_gate_trees_from_path, write_gate_trees_to_path};
/// Error types for gate operations
pub use error::{GateError, Result};
/// Geometry primitives
pub use geometry::{BoundingBox, is_left, point_in_polygon, winding_number, within_bounds};
/// Gating-ML 2.0 import/export
pub use gatingml::{gate_trees_to_gatingml, gatingml_to_gate_trees};
/// JSON import/export
pub use json::{gate_trees_from_json, gate_trees_to_json};
/// The gate arena and traversal
pub use trees::GateTrees;
/// Core gate types
pub use types::{
    BooleanOperand, BooleanOperator, BooleanShape, EllipsoidShape, Gate, GateDimension, GateId,
    GateShape, GatingMethod, PolygonShape, Quadrant, QuadrantDivider, QuadrantPosition,
    QuadrantShape, RectangleBound, RectangleShape, TransformId,
};
