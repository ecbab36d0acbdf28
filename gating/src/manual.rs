//! Event-value gating: every parent-included event is tested against the gate's region.
//!
//! Loops are specialized for 1-D and 2-D rectangles; wider rectangles use a generic
//! loop that stops at the first failing dimension. Work is split across events and each
//! task writes only its own flag slots.

use crate::error::{GatingError, Result};
use flow_events::EventValue;
use flow_gates::{BoundingBox, Gate, GateShape, point_in_polygon, within_bounds};
use rayon::prelude::*;

/// A gate's region converted to the width of the table it is tested against
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Region<T> {
    Rectangle { bounds: Vec<(T, T)> },
    Polygon { bounds: BoundingBox, vertices: Vec<(T, T)> },
}

impl<T: EventValue> Region<T> {
    /// # Errors
    /// Returns `GatingError::InvalidArgument` for shapes the engine does not evaluate
    pub(crate) fn from_gate(gate: &Gate) -> Result<Self> {
        match &gate.shape {
            GateShape::Rectangle(rectangle) => Ok(Self::Rectangle {
                bounds: rectangle
                    .bounds
                    .iter()
                    .map(|bound| {
                        let (min, max) = bound.ordered();
                        (T::from_f64(min), T::from_f64(max))
                    })
                    .collect(),
            }),
            GateShape::Polygon(polygon) => Ok(Self::Polygon {
                bounds: *polygon.bounds(),
                vertices: polygon
                    .vertices()
                    .iter()
                    .map(|&(x, y)| (T::from_f64(x), T::from_f64(y)))
                    .collect(),
            }),
            other => Err(GatingError::invalid_argument(format!(
                "{} gates cannot be evaluated",
                other.kind()
            ))),
        }
    }

    /// Test one point given by its coordinates along the gate's dimensions
    pub(crate) fn contains(&self, point: &[T]) -> bool {
        match self {
            Self::Rectangle { bounds } => {
                bounds.len() == point.len()
                    && bounds
                        .iter()
                        .zip(point)
                        .all(|(&(min, max), &value)| within_bounds(value, min, max))
            }
            Self::Polygon { bounds, vertices } => match point {
                &[x, y] => bounds.contains(x, y) && point_in_polygon((x, y), vertices),
                _ => false,
            },
        }
    }
}

#[inline]
fn parent_includes(parent: Option<&[u8]>, event: usize) -> bool {
    parent.is_none_or(|flags| flags[event] != 0)
}

/// Classify every event of `columns` (the gate's dimensions first) against `region`.
///
/// Returns one flag per event; events excluded by `parent` are always 0.
pub(crate) fn gate_events<T: EventValue>(
    region: &Region<T>,
    columns: &[Vec<T>],
    number_of_events: usize,
    parent: Option<&[u8]>,
) -> Vec<u8> {
    let mut flags = vec![0u8; number_of_events];
    match region {
        Region::Rectangle { bounds } => match (bounds.as_slice(), columns) {
            ([x_bounds], [x, ..]) => rectangle_1d(x, *x_bounds, parent, &mut flags),
            ([x_bounds, y_bounds], [x, y, ..]) => {
                rectangle_2d((x.as_slice(), y.as_slice()), (*x_bounds, *y_bounds), parent, &mut flags);
            }
            _ => rectangle_nd(columns, bounds, parent, &mut flags),
        },
        Region::Polygon { bounds, vertices } => {
            if let [x, y, ..] = columns {
                polygon(x, y, bounds, vertices, parent, &mut flags);
            }
        }
    }
    flags
}

pub(crate) fn rectangle_1d<T: EventValue>(x: &[T], (min, max): (T, T), parent: Option<&[u8]>, flags: &mut [u8]) {
    flags.par_iter_mut().enumerate().for_each(|(i, flag)| {
        *flag = u8::from(parent_includes(parent, i) && within_bounds(x[i], min, max));
    });
}

pub(crate) fn rectangle_2d<T: EventValue>(
    (x, y): (&[T], &[T]),
    ((min_x, max_x), (min_y, max_y)): ((T, T), (T, T)),
    parent: Option<&[u8]>,
    flags: &mut [u8],
) {
    flags.par_iter_mut().enumerate().for_each(|(i, flag)| {
        *flag = u8::from(
            parent_includes(parent, i) && within_bounds(x[i], min_x, max_x) && within_bounds(y[i], min_y, max_y),
        );
    });
}

pub(crate) fn rectangle_nd<T: EventValue>(
    columns: &[Vec<T>],
    bounds: &[(T, T)],
    parent: Option<&[u8]>,
    flags: &mut [u8],
) {
    flags.par_iter_mut().enumerate().for_each(|(i, flag)| {
        *flag = u8::from(
            parent_includes(parent, i)
                && bounds
                    .iter()
                    .zip(columns)
                    .all(|(&(min, max), column)| within_bounds(column[i], min, max)),
        );
    });
}

fn polygon<T: EventValue>(
    x: &[T],
    y: &[T],
    bounds: &BoundingBox,
    vertices: &[(T, T)],
    parent: Option<&[u8]>,
    flags: &mut [u8],
) {
    flags.par_iter_mut().enumerate().for_each(|(i, flag)| {
        let (px, py) = (x[i], y[i]);
        *flag = u8::from(
            parent_includes(parent, i) && bounds.contains(px, py) && point_in_polygon((px, py), vertices),
        );
    });
}
