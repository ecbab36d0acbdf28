use crate::error::{EventError, Result};
use crate::table::EventColumns;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};
use strum_macros::Display;

/// The numeric width of an event table, which determines how event values are stored
///
/// Every column of a table shares one width, fixed when the table is constructed.
/// Single precision is the default because it is what cytometers record.
#[derive(Default, Display, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum NumericWidth {
    /// Single-precision floating point (f32)
    #[default]
    #[strum(to_string = "float")]
    Float,
    /// Double-precision floating point (f64)
    #[strum(to_string = "double")]
    Double,
}

impl NumericWidth {
    /// Matches the keyword used by the file formats and returns the corresponding width
    /// # Errors
    /// Will return `Err` if `keyword` is neither `float` nor `double`
    pub fn from_keyword_str(keyword: &str) -> Result<Self> {
        match keyword.trim() {
            "float" | "f32" | "F" => Ok(Self::Float),
            "double" | "f64" | "D" => Ok(Self::Double),
            other => Err(EventError::UnknownWidth(other.to_string())),
        }
    }

    /// Returns the keyword string written to file headers
    pub fn to_keyword_str(&self) -> &'static str {
        match self {
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    /// Returns the number of bytes one event value occupies
    #[must_use]
    pub const fn bytes_per_value(&self) -> usize {
        match self {
            Self::Float => 4,
            Self::Double => 8,
        }
    }
}

/// A floating point type that can back the columns of an [`EventTable`](crate::EventTable).
///
/// Gating code is written once against this trait and monomorphized for `f32` and `f64`,
/// so neither width pays a per-event conversion cost.
pub trait EventValue:
    Copy
    + Send
    + Sync
    + Default
    + Debug
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + 'static
{
    /// The table width this type corresponds to
    const WIDTH: NumericWidth;

    fn from_f64(value: f64) -> Self;
    fn to_f64(self) -> f64;

    /// Borrow the columns of a table if they are stored with this width
    fn columns(columns: &EventColumns) -> Option<&[Vec<Self>]>;

    /// Mutably borrow the columns of a table if they are stored with this width
    fn columns_mut(columns: &mut EventColumns) -> Option<&mut Vec<Vec<Self>>>;

    /// Wrap owned columns of this width
    fn wrap(columns: Vec<Vec<Self>>) -> EventColumns;
}

impl EventValue for f32 {
    const WIDTH: NumericWidth = NumericWidth::Float;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    fn columns(columns: &EventColumns) -> Option<&[Vec<Self>]> {
        match columns {
            EventColumns::Float(c) => Some(c),
            EventColumns::Double(_) => None,
        }
    }

    fn columns_mut(columns: &mut EventColumns) -> Option<&mut Vec<Vec<Self>>> {
        match columns {
            EventColumns::Float(c) => Some(c),
            EventColumns::Double(_) => None,
        }
    }

    fn wrap(columns: Vec<Vec<Self>>) -> EventColumns {
        EventColumns::Float(columns)
    }
}

impl EventValue for f64 {
    const WIDTH: NumericWidth = NumericWidth::Double;

    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    fn columns(columns: &EventColumns) -> Option<&[Vec<Self>]> {
        match columns {
            EventColumns::Double(c) => Some(c),
            EventColumns::Float(_) => None,
        }
    }

    fn columns_mut(columns: &mut EventColumns) -> Option<&mut Vec<Vec<Self>>> {
        match columns {
            EventColumns::Double(c) => Some(c),
            EventColumns::Float(_) => None,
        }
    }

    fn wrap(columns: Vec<Vec<Self>>) -> EventColumns {
        EventColumns::Double(columns)
    }
}
