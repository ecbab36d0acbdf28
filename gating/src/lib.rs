//! # flow-gating
//!
//! Computes per-gate inclusion flags for a table of flow cytometry events, walking a
//! gate tree from the root down so that every gate only classifies what its parent
//! included.
//!
//! ## Overview
//!
//! - **[`GatingCache`]**: a source [`EventTable`](flow_events::EventTable), its
//!   [`GateTrees`](flow_gates::GateTrees), and one [`GateState`] per gate
//! - **[`GatingEngine`]**: computes gate states in parent-before-child order
//! - **Event-value gating**: every event is tested against the gate's rectangle or
//!   polygon
//! - **Cluster-centroid (DAFi) gating**: events are clustered and each cluster's
//!   centroid is tested instead; see [`DafiConfig`]
//! - **Binary cache files**: [`save_gating_cache`] / [`load_gating_cache`]
//!
//! ## Quick Start
//!
//! ```rust
//! use flow_events::EventTable;
//! use flow_gates::{Gate, GateDimension, GateTrees, GatingMethod};
//! use flow_gating::{DafiConfig, GatingCache, GatingEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let events = EventTable::from_columns(
//!     ["FSC-A", "SSC-A"],
//!     vec![vec![1.0f32, 2.0, 8.0, 9.0], vec![1.0, 2.0, 8.0, 9.0]],
//! )?;
//! let mut trees = GateTrees::new();
//! let root = trees.add_root_gate(
//!     Gate::polygon(
//!         GateDimension::new("FSC-A"),
//!         GateDimension::new("SSC-A"),
//!         vec![(5.0, 5.0), (10.0, 5.0), (10.0, 10.0), (5.0, 10.0)],
//!     )?
//!     .with_method(GatingMethod::ClusterCentroid),
//! )?;
//!
//! let mut cache = GatingCache::new(events, trees)?;
//! let config = DafiConfig::new().cluster_count(2usize).build()?;
//! GatingEngine::with_config(&mut cache, config)?.gate_all()?;
//! assert!(cache.state(root).unwrap().is_applied());
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod cache;
pub mod config;
mod dafi;
pub mod engine;
pub mod error;
mod manual;
pub mod state;

/// Binary gating-cache files
pub use binary::{
    ByteOrder, CacheHeader, decode_gating_cache, encode_gating_cache, load_gating_cache,
    read_cache_header, save_gating_cache,
};
pub use cache::GatingCache;
pub use config::{DafiConfig, DafiConfigBuilder};
pub use engine::GatingEngine;
pub use error::{GatingError, Result};
pub use state::GateState;
