use crate::datatype::{EventValue, NumericWidth};
use crate::error::{EventError, Result};
use crate::transform::{Transform, Transformable};
use itertools::{Itertools, MinMaxResult};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

pub type ParameterName = Arc<str>;

/// Metadata describing one column of an [`EventTable`]
///
/// The specified range comes from instrument calibration or the source file and is
/// optional. The data range is always computed from the finite values in the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterInfo {
    /// The unique short name of the parameter (e.g. "FSC-A")
    pub name: ParameterName,
    /// An optional descriptive name (e.g. "CD8 FITC")
    pub long_name: Option<Arc<str>>,
    pub specified_min: Option<f64>,
    pub specified_max: Option<f64>,
    pub data_min: f64,
    pub data_max: f64,
}

impl ParameterInfo {
    pub fn new(name: impl Into<ParameterName>) -> Self {
        Self {
            name: name.into(),
            long_name: None,
            specified_min: None,
            specified_max: None,
            data_min: 0.0,
            data_max: 0.0,
        }
    }

    /// Sets the specified (calibrated) range of the parameter
    #[must_use]
    pub fn with_specified_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.specified_min = min;
        self.specified_max = max;
        self
    }

    #[must_use]
    pub fn with_long_name(mut self, long_name: impl Into<Arc<str>>) -> Self {
        self.long_name = Some(long_name.into());
        self
    }

    /// The specified minimum when present, otherwise the data minimum
    #[must_use]
    pub fn best_min(&self) -> f64 {
        self.specified_min.unwrap_or(self.data_min)
    }

    /// The specified maximum when present, otherwise the data maximum
    #[must_use]
    pub fn best_max(&self) -> f64 {
        self.specified_max.unwrap_or(self.data_max)
    }
}

/// Column storage for an [`EventTable`], one dense vector per parameter
///
/// All columns share one width, which is enforced by the enum rather than checked at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum EventColumns {
    Float(Vec<Vec<f32>>),
    Double(Vec<Vec<f64>>),
}

impl EventColumns {
    pub fn empty(width: NumericWidth) -> Self {
        match width {
            NumericWidth::Float => Self::Float(Vec::new()),
            NumericWidth::Double => Self::Double(Vec::new()),
        }
    }

    pub fn width(&self) -> NumericWidth {
        match self {
            Self::Float(_) => NumericWidth::Float,
            Self::Double(_) => NumericWidth::Double,
        }
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        match self {
            Self::Float(c) => c.len(),
            Self::Double(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn column_len(&self, column: usize) -> Option<usize> {
        match self {
            Self::Float(c) => c.get(column).map(Vec::len),
            Self::Double(c) => c.get(column).map(Vec::len),
        }
    }

    /// Reads one value widened to `f64`
    pub fn value_as_f64(&self, column: usize, event: usize) -> Option<f64> {
        match self {
            Self::Float(c) => c.get(column)?.get(event).map(|v| f64::from(*v)),
            Self::Double(c) => c.get(column)?.get(event).copied(),
        }
    }

    /// Copies one column widened to `f64`
    pub fn column_as_f64(&self, column: usize) -> Option<Vec<f64>> {
        match self {
            Self::Float(c) => c
                .get(column)
                .map(|values| values.iter().map(|v| f64::from(*v)).collect()),
            Self::Double(c) => c.get(column).cloned(),
        }
    }

    fn data_range(&self, column: usize) -> (f64, f64) {
        match self {
            Self::Float(c) => c.get(column).map_or((0.0, 0.0), |v| finite_range(v)),
            Self::Double(c) => c.get(column).map_or((0.0, 0.0), |v| finite_range(v)),
        }
    }
}

/// The (min, max) over the finite values of a column, or `(0, 0)` if there are none
fn finite_range<T: EventValue>(values: &[T]) -> (f64, f64) {
    let finite = values
        .iter()
        .map(|v| v.to_f64())
        .filter(|v| v.is_finite());
    match finite.minmax_by(f64::total_cmp) {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(min, max) => (min, max),
    }
}

/// One column selected from a table while deriving a new one
#[derive(Debug, Clone, Copy)]
pub struct ColumnSelection<'a> {
    pub parameter: usize,
    pub transform: Option<&'a Transform>,
}

/// A columnar table of events
///
/// Each parameter is one dense vector of event values. Every column has the same
/// length and all columns share the table's [`NumericWidth`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    parameters: Vec<ParameterInfo>,
    lookup: FxHashMap<ParameterName, usize>,
    columns: EventColumns,
    number_of_events: usize,
}

impl EventTable {
    /// Creates a table with no parameters that will hold `number_of_events` rows
    pub fn new(width: NumericWidth, number_of_events: usize) -> Self {
        Self {
            parameters: Vec::new(),
            lookup: FxHashMap::default(),
            columns: EventColumns::empty(width),
            number_of_events,
        }
    }

    /// Builds a table from parallel lists of names and columns
    /// # Errors
    /// Will return `Err` if the counts differ, a name repeats, or a column has the wrong length
    pub fn from_columns<T, N>(names: impl IntoIterator<Item = N>, columns: Vec<Vec<T>>) -> Result<Self>
    where
        T: EventValue,
        N: Into<ParameterName>,
    {
        let parameters: Vec<ParameterInfo> = names.into_iter().map(ParameterInfo::new).collect();
        Self::from_parts(parameters, T::wrap(columns))
    }

    /// Builds a table from already-assembled metadata and columns, recomputing data ranges
    /// # Errors
    /// Will return `Err` if the counts differ, a name repeats, or a column has the wrong length
    pub fn from_parts(mut parameters: Vec<ParameterInfo>, columns: EventColumns) -> Result<Self> {
        if parameters.len() != columns.len() {
            return Err(EventError::ParameterCountMismatch {
                names: parameters.len(),
                columns: columns.len(),
            });
        }
        let number_of_events = columns.column_len(0).unwrap_or(0);

        let mut lookup = FxHashMap::default();
        for (index, info) in parameters.iter().enumerate() {
            let actual = columns.column_len(index).unwrap_or(0);
            if actual != number_of_events {
                return Err(EventError::LengthMismatch {
                    parameter: info.name.to_string(),
                    expected: number_of_events,
                    actual,
                });
            }
            if lookup.insert(info.name.clone(), index).is_some() {
                return Err(EventError::DuplicateParameter(info.name.to_string()));
            }
        }

        let ranges: Vec<(f64, f64)> = (0..parameters.len())
            .into_par_iter()
            .map(|index| columns.data_range(index))
            .collect();
        for (info, (min, max)) in parameters.iter_mut().zip(ranges) {
            info.data_min = min;
            info.data_max = max;
        }

        Ok(Self {
            parameters,
            lookup,
            columns,
            number_of_events,
        })
    }

    /// Appends a parameter column and returns its index
    /// # Errors
    /// Will return `Err` if the width or length differs from the table, or the name is taken
    pub fn push_parameter<T: EventValue>(&mut self, mut info: ParameterInfo, values: Vec<T>) -> Result<usize> {
        if T::WIDTH != self.width() {
            return Err(EventError::WidthMismatch {
                table: self.width(),
                requested: T::WIDTH,
            });
        }
        if values.len() != self.number_of_events {
            return Err(EventError::LengthMismatch {
                parameter: info.name.to_string(),
                expected: self.number_of_events,
                actual: values.len(),
            });
        }
        if self.lookup.contains_key(&info.name) {
            return Err(EventError::DuplicateParameter(info.name.to_string()));
        }

        let (min, max) = finite_range(&values);
        info.data_min = min;
        info.data_max = max;

        let index = self.parameters.len();
        self.lookup.insert(info.name.clone(), index);
        self.parameters.push(info);
        if let Some(columns) = T::columns_mut(&mut self.columns) {
            columns.push(values);
        }
        Ok(index)
    }

    pub fn width(&self) -> NumericWidth {
        self.columns.width()
    }

    pub fn number_of_events(&self) -> usize {
        self.number_of_events
    }

    pub fn number_of_parameters(&self) -> usize {
        self.parameters.len()
    }

    pub fn parameters(&self) -> &[ParameterInfo] {
        &self.parameters
    }

    pub fn parameter(&self, index: usize) -> Option<&ParameterInfo> {
        self.parameters.get(index)
    }

    pub fn parameter_names(&self) -> impl Iterator<Item = &str> {
        self.parameters.iter().map(|p| p.name.as_ref())
    }

    /// Looks up a parameter index by its short name
    pub fn find_parameter(&self, name: &str) -> Option<usize> {
        self.lookup.get(name).copied()
    }

    /// Looks up a parameter index by its short name
    /// # Errors
    /// Will return `Err` if no parameter has that name
    pub fn require_parameter(&self, name: &str) -> Result<usize> {
        self.find_parameter(name)
            .ok_or_else(|| EventError::ParameterNotFound(name.to_string()))
    }

    /// Sets the specified range of a parameter
    /// # Errors
    /// Will return `Err` if `index` is out of range
    pub fn set_specified_range(&mut self, index: usize, min: Option<f64>, max: Option<f64>) -> Result<()> {
        let info = self
            .parameters
            .get_mut(index)
            .ok_or_else(|| EventError::ParameterNotFound(format!("#{index}")))?;
        info.specified_min = min;
        info.specified_max = max;
        Ok(())
    }

    /// Sets or clears the long name of a parameter
    /// # Errors
    /// Will return `Err` if `index` is out of range
    pub fn set_long_name(&mut self, index: usize, long_name: Option<&str>) -> Result<()> {
        let info = self
            .parameters
            .get_mut(index)
            .ok_or_else(|| EventError::ParameterNotFound(format!("#{index}")))?;
        info.long_name = long_name.map(Arc::from);
        Ok(())
    }

    pub fn columns(&self) -> &EventColumns {
        &self.columns
    }

    /// Borrows every column if the table is stored with width `T`
    pub fn typed_columns<T: EventValue>(&self) -> Option<&[Vec<T>]> {
        T::columns(&self.columns)
    }

    /// Borrows one column if the table is stored with width `T`
    pub fn column<T: EventValue>(&self, index: usize) -> Option<&[T]> {
        T::columns(&self.columns)?.get(index).map(Vec::as_slice)
    }

    pub fn value_as_f64(&self, parameter: usize, event: usize) -> Option<f64> {
        self.columns.value_as_f64(parameter, event)
    }

    pub fn column_as_f64(&self, parameter: usize) -> Option<Vec<f64>> {
        self.columns.column_as_f64(parameter)
    }

    /// Derives a new table of the same width holding the selected columns, each passed
    /// through its optional transform.
    ///
    /// Specified ranges are carried through the transform; a bound that maps to a
    /// non-finite value is dropped. Data ranges are recomputed from the transformed values.
    /// # Errors
    /// Will return `Err` if a selection is out of range or names a parameter twice
    pub fn select_transformed(&self, selections: &[ColumnSelection<'_>]) -> Result<Self> {
        let mut parameters = Vec::with_capacity(selections.len());
        for selection in selections {
            let source = self
                .parameters
                .get(selection.parameter)
                .ok_or_else(|| EventError::ParameterNotFound(format!("#{}", selection.parameter)))?;
            let mut info = ParameterInfo::new(source.name.clone());
            info.long_name = source.long_name.clone();
            match selection.transform {
                Some(transform) => {
                    let min = source.specified_min.map(|v| transform.transform(v));
                    let max = source.specified_max.map(|v| transform.transform(v));
                    info.specified_min = min.filter(|v| v.is_finite());
                    info.specified_max = max.filter(|v| v.is_finite());
                }
                None => {
                    info.specified_min = source.specified_min;
                    info.specified_max = source.specified_max;
                }
            }
            parameters.push(info);
        }

        let columns = match &self.columns {
            EventColumns::Float(columns) => EventColumns::Float(select_columns(columns, selections)),
            EventColumns::Double(columns) => EventColumns::Double(select_columns(columns, selections)),
        };
        debug!(
            "Derived {} column table over {} events",
            selections.len(),
            self.number_of_events
        );
        Self::from_parts(parameters, columns)
    }
}

fn select_columns<T: EventValue>(columns: &[Vec<T>], selections: &[ColumnSelection<'_>]) -> Vec<Vec<T>> {
    selections
        .iter()
        .map(|selection| {
            let source = &columns[selection.parameter];
            match selection.transform {
                Some(transform) => source
                    .par_iter()
                    .map(|v| T::from_f64(transform.transform(v.to_f64())))
                    .collect(),
                None => source.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TransformType;
    use approx::assert_relative_eq;

    fn sample_table() -> EventTable {
        EventTable::from_columns(
            ["FSC-A", "SSC-A"],
            vec![vec![1.0f32, 5.0, 3.0], vec![10.0f32, f32::NAN, -2.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_data_ranges_skip_non_finite_values() {
        let table = sample_table();
        let ssc = table.parameter(1).unwrap();
        assert_eq!(ssc.data_min, -2.0);
        assert_eq!(ssc.data_max, 10.0);
        assert_eq!(table.number_of_events(), 3);
        assert_eq!(table.width(), NumericWidth::Float);
    }

    #[test]
    fn test_best_range_prefers_specified() {
        let mut table = sample_table();
        table.set_specified_range(0, Some(0.0), None).unwrap();
        let fsc = table.parameter(0).unwrap();
        assert_eq!(fsc.best_min(), 0.0);
        assert_eq!(fsc.best_max(), 5.0);
    }

    #[test]
    fn test_rejects_duplicate_and_ragged_columns() {
        let duplicate = EventTable::from_columns(["A", "A"], vec![vec![1.0f64], vec![2.0]]);
        assert!(matches!(duplicate, Err(EventError::DuplicateParameter(_))));

        let ragged = EventTable::from_columns(["A", "B"], vec![vec![1.0f64], vec![2.0, 3.0]]);
        assert!(matches!(ragged, Err(EventError::LengthMismatch { .. })));
    }

    #[test]
    fn test_push_parameter_checks_width() {
        let mut table = EventTable::new(NumericWidth::Double, 2);
        assert!(table.push_parameter(ParameterInfo::new("A"), vec![1.0f64, 2.0]).is_ok());
        let wrong = table.push_parameter(ParameterInfo::new("B"), vec![1.0f32, 2.0]);
        assert!(matches!(wrong, Err(EventError::WidthMismatch { .. })));
        assert_eq!(table.require_parameter("A").unwrap(), 0);
        assert!(table.require_parameter("B").is_err());
    }

    #[test]
    fn test_select_transformed_maps_values_and_ranges() {
        let mut table = EventTable::from_columns(["X", "Y"], vec![vec![0.0f64, 50.0, 100.0], vec![1.0, 2.0, 3.0]]).unwrap();
        table.set_specified_range(0, Some(0.0), Some(100.0)).unwrap();
        let linear = Transform::new("lin", TransformType::linear(100.0, 0.0).unwrap());

        let derived = table
            .select_transformed(&[
                ColumnSelection { parameter: 0, transform: Some(&linear) },
                ColumnSelection { parameter: 1, transform: None },
            ])
            .unwrap();

        let x = derived.column::<f64>(0).unwrap();
        assert_relative_eq!(x[1], 0.5);
        assert_relative_eq!(derived.parameter(0).unwrap().best_max(), 1.0);
        assert_eq!(derived.column::<f64>(1).unwrap(), &[1.0, 2.0, 3.0]);
        assert!(derived.column::<f32>(0).is_none());
    }
}
