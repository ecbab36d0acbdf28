//! # flow-events
//!
//! Columnar storage for flow cytometry events and the scale transforms applied to them
//! before gating.
//!
//! ## Overview
//!
//! - **Event Tables**: one dense column per parameter, stored as either `f32` or `f64`
//!   for the whole table ([`NumericWidth`]), with per-parameter metadata
//!   ([`ParameterInfo`]) including specified and computed ranges
//! - **Transforms**: the Gating-ML 2.0 scale transforms (`flin`, `flog`, `fasinh`,
//!   `logicle`, `hyperlog`) behind the [`Transformable`] trait
//! - **Text format**: the legacy tab-separated event format, with optional 0/1 flag
//!   columns on export
//!
//! ## Quick Start
//!
//! ```rust
//! use flow_events::*;
//!
//! # fn example() -> Result<()> {
//! let table = EventTable::from_columns(
//!     ["FSC-A", "SSC-A"],
//!     vec![vec![120.0f32, 340.0], vec![56.0, 78.0]],
//! )?;
//! let fsc = table.require_parameter("FSC-A")?;
//! assert_eq!(table.column::<f32>(fsc), Some(&[120.0f32, 340.0][..]));
//!
//! let logicle = Transform::new("logicle-1", TransformType::logicle(262144.0, 0.5, 4.5, 0.0)?);
//! let scaled = logicle.transform(1000.0);
//! assert!(scaled > 0.0 && scaled < 1.0);
//! # Ok(())
//! # }
//! ```

pub mod datatype;
pub mod error;
pub mod table;
pub mod text;
pub mod transform;

/// Numeric storage width and the trait implemented by `f32`/`f64` columns
pub use datatype::{EventValue, NumericWidth};
/// Error types for table construction, transforms, and parsing
pub use error::{EventError, Result};
/// The event table and its parameter metadata
pub use table::{ColumnSelection, EventColumns, EventTable, ParameterInfo, ParameterName};
/// Legacy tab-separated event codec
pub use text::{
    FlagColumn, parse_text_events, read_text_events, read_text_events_from_path, write_text_events,
    write_text_events_to_path,
};
/// Gating-ML 2.0 scale transforms
pub use transform::{Hyperlog, Logicle, Transform, TransformParameters, TransformType, Transformable};
