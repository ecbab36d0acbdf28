use crate::error::{GateError, Result};
use crate::geometry::BoundingBox;
use flow_events::ParameterName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use strum_macros::Display;

/// Stable handle of a gate inside a [`GateTrees`](crate::GateTrees) arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GateId(pub usize);

impl GateId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for GateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle of a transform held by a [`GateTrees`](crate::GateTrees)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransformId(pub usize);

impl TransformId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One axis of a gate: a source parameter and the transform applied before testing
#[derive(Debug, Clone, PartialEq)]
pub struct GateDimension {
    pub parameter: ParameterName,
    pub transform: Option<TransformId>,
}

impl GateDimension {
    pub fn new(parameter: impl Into<ParameterName>) -> Self {
        Self {
            parameter: parameter.into(),
            transform: None,
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: TransformId) -> Self {
        self.transform = Some(transform);
        self
    }
}

/// How a gate classifies its events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display)]
pub enum GatingMethod {
    /// Test every event against the shape
    #[default]
    #[strum(to_string = "event-value")]
    EventValue,
    /// Cluster the parent's events, test the cluster centroids, then propagate (DAFi)
    #[strum(to_string = "cluster-centroid")]
    ClusterCentroid,
}

impl FromStr for GatingMethod {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "event-value" => Ok(Self::EventValue),
            "cluster-centroid" => Ok(Self::ClusterCentroid),
            other => Err(GateError::UnknownGatingMethod(other.to_string())),
        }
    }
}

/// Per-dimension rectangle bounds; `None` is unbounded on that side
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectangleBound {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl RectangleBound {
    pub fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    /// Closed interval with unbounded sides as infinities and reversed bounds swapped
    pub fn ordered(&self) -> (f64, f64) {
        let min = self.min.unwrap_or(f64::NEG_INFINITY);
        let max = self.max.unwrap_or(f64::INFINITY);
        if min > max { (max, min) } else { (min, max) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RectangleShape {
    pub bounds: Vec<RectangleBound>,
}

/// A closed polygon over exactly two dimensions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PolygonVertices", into = "PolygonVertices")]
pub struct PolygonShape {
    vertices: Vec<(f64, f64)>,
    bounds: BoundingBox,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PolygonVertices {
    vertices: Vec<(f64, f64)>,
}

impl TryFrom<PolygonVertices> for PolygonShape {
    type Error = GateError;

    fn try_from(value: PolygonVertices) -> Result<Self> {
        Self::new(value.vertices)
    }
}

impl From<PolygonShape> for PolygonVertices {
    fn from(value: PolygonShape) -> Self {
        Self {
            vertices: value.vertices,
        }
    }
}

impl PolygonShape {
    /// # Errors
    /// Returns `GateError::InvalidGeometry` for fewer than 3 vertices or non-finite coordinates
    pub fn new(vertices: Vec<(f64, f64)>) -> Result<Self> {
        if vertices.len() < 3 {
            return Err(GateError::invalid_geometry(format!(
                "Polygon requires at least 3 vertices, got {}",
                vertices.len()
            )));
        }
        if let Some(index) = vertices.iter().position(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(GateError::invalid_geometry(format!(
                "Polygon vertex {index} is not finite"
            )));
        }
        let bounds = BoundingBox::from_vertices(&vertices);
        Ok(Self { vertices, bounds })
    }

    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }
}

/// Mahalanobis-distance ellipsoid (stored and round-tripped, not evaluated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EllipsoidShape {
    pub mean: Vec<f64>,
    pub covariance: Vec<Vec<f64>>,
    pub distance_square: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadrantDivider {
    pub id: String,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadrantPosition {
    pub divider: String,
    pub location: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quadrant {
    pub id: String,
    pub positions: Vec<QuadrantPosition>,
}

/// Quadrant gate: one divider per dimension (stored and round-tripped, not evaluated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuadrantShape {
    pub dividers: Vec<QuadrantDivider>,
    pub quadrants: Vec<Quadrant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BooleanOperator {
    And,
    Or,
    Not,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BooleanOperand {
    /// Original ID of the referenced gate
    pub reference: String,
    #[serde(default)]
    pub complement: bool,
}

/// Boolean combination of other gates (stored and round-tripped, not evaluated)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanShape {
    pub operator: BooleanOperator,
    pub operands: Vec<BooleanOperand>,
}

/// The closed set of gate shapes
///
/// Only rectangles and polygons can be evaluated; the remaining shapes are carried so
/// that gate files survive a read/write cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GateShape {
    Rectangle(RectangleShape),
    Polygon(PolygonShape),
    Ellipsoid(EllipsoidShape),
    Quadrant(QuadrantShape),
    Boolean(BooleanShape),
}

impl GateShape {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rectangle(_) => "rectangle",
            Self::Polygon(_) => "polygon",
            Self::Ellipsoid(_) => "ellipsoid",
            Self::Quadrant(_) => "quadrant",
            Self::Boolean(_) => "boolean",
        }
    }

    /// Whether the gating engine can evaluate this shape
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Rectangle(_) | Self::Polygon(_))
    }
}

/// One node of a gate tree
///
/// The parent/child links live in [`GateTrees`](crate::GateTrees); a `Gate` only
/// describes what to test.
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    /// Identifier supplied by the gate file, kept for round-tripping
    pub original_id: Option<String>,
    pub name: String,
    pub description: String,
    pub notes: String,
    pub shape: GateShape,
    pub dimensions: Vec<GateDimension>,
    pub method: GatingMethod,
    /// Extra parameters used only when clustering
    pub clustering_parameters: Vec<GateDimension>,
}

impl Gate {
    pub fn new(shape: GateShape, dimensions: Vec<GateDimension>) -> Self {
        Self {
            original_id: None,
            name: String::new(),
            description: String::new(),
            notes: String::new(),
            shape,
            dimensions,
            method: GatingMethod::EventValue,
            clustering_parameters: Vec::new(),
        }
    }

    /// Rectangle gate with one bound per dimension
    /// # Errors
    /// Returns an error if there are no dimensions or the bound count differs
    pub fn rectangle(dimensions: Vec<GateDimension>, bounds: Vec<RectangleBound>) -> Result<Self> {
        let gate = Self::new(GateShape::Rectangle(RectangleShape { bounds }), dimensions);
        gate.validate()?;
        Ok(gate)
    }

    /// Polygon gate over two dimensions
    /// # Errors
    /// Returns an error for fewer than 3 vertices or non-finite coordinates
    pub fn polygon(x: GateDimension, y: GateDimension, vertices: Vec<(f64, f64)>) -> Result<Self> {
        let shape = PolygonShape::new(vertices)?;
        Ok(Self::new(GateShape::Polygon(shape), vec![x, y]))
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_original_id(mut self, id: impl Into<String>) -> Self {
        self.original_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    #[must_use]
    pub fn with_method(mut self, method: GatingMethod) -> Self {
        self.method = method;
        self
    }

    #[must_use]
    pub fn with_clustering_parameters(mut self, parameters: Vec<GateDimension>) -> Self {
        self.clustering_parameters = parameters;
        self
    }

    /// Dimensions followed by clustering parameters, the column order of a gate state table
    pub fn all_parameters(&self) -> impl Iterator<Item = &GateDimension> {
        self.dimensions.iter().chain(self.clustering_parameters.iter())
    }

    /// A label for log and error messages
    pub fn label(&self) -> String {
        match (&self.original_id, self.name.is_empty()) {
            (_, false) => self.name.clone(),
            (Some(id), true) => id.clone(),
            (None, true) => format!("unnamed {} gate", self.shape.kind()),
        }
    }

    /// Checks the structural invariants of the gate
    /// # Errors
    /// Returns `GateError::InvalidArgument`/`InvalidGeometry` describing the first violation
    pub fn validate(&self) -> Result<()> {
        let dims = self.dimensions.len();
        match &self.shape {
            GateShape::Rectangle(rect) => {
                if dims == 0 {
                    return Err(GateError::invalid_argument("rectangle gate needs at least one dimension"));
                }
                if rect.bounds.len() != dims {
                    return Err(GateError::invalid_geometry(format!(
                        "rectangle has {} bounds for {dims} dimensions",
                        rect.bounds.len()
                    )));
                }
                if rect
                    .bounds
                    .iter()
                    .flat_map(|b| [b.min, b.max])
                    .flatten()
                    .any(f64::is_nan)
                {
                    return Err(GateError::invalid_geometry("rectangle bound is NaN"));
                }
            }
            GateShape::Polygon(_) => {
                if dims != 2 {
                    return Err(GateError::invalid_argument(format!(
                        "polygon gate needs exactly 2 dimensions, got {dims}"
                    )));
                }
            }
            GateShape::Ellipsoid(ellipsoid) => {
                if ellipsoid.mean.len() != dims
                    || ellipsoid.covariance.len() != dims
                    || ellipsoid.covariance.iter().any(|row| row.len() != dims)
                {
                    return Err(GateError::invalid_geometry(
                        "ellipsoid mean and covariance must match the dimension count",
                    ));
                }
            }
            GateShape::Quadrant(quadrant) => {
                if quadrant.dividers.len() != dims {
                    return Err(GateError::invalid_geometry(
                        "quadrant gate needs one divider per dimension",
                    ));
                }
            }
            GateShape::Boolean(boolean) => {
                if boolean.operands.is_empty() {
                    return Err(GateError::invalid_geometry("boolean gate has no operands"));
                }
            }
        }

        if self.method == GatingMethod::EventValue && !self.clustering_parameters.is_empty() {
            return Err(GateError::invalid_argument(
                "clustering parameters are only allowed on cluster-centroid gates",
            ));
        }

        let mut seen = HashSet::new();
        for dimension in self.all_parameters() {
            if !seen.insert(dimension.parameter.as_ref()) {
                return Err(GateError::invalid_argument(format!(
                    "parameter '{}' is used more than once",
                    dimension.parameter
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gating_method_names() {
        assert_eq!("event-value".parse::<GatingMethod>().unwrap(), GatingMethod::EventValue);
        assert_eq!(
            "cluster-centroid".parse::<GatingMethod>().unwrap(),
            GatingMethod::ClusterCentroid
        );
        assert_eq!(GatingMethod::ClusterCentroid.to_string(), "cluster-centroid");
        let err = "dafi".parse::<GatingMethod>().unwrap_err();
        assert!(matches!(err, GateError::UnknownGatingMethod(_)));
    }

    #[test]
    fn test_rectangle_bound_ordering() {
        assert_eq!(RectangleBound::new(Some(16.0), Some(4.0)).ordered(), (4.0, 16.0));
        assert_eq!(
            RectangleBound::new(None, Some(4.0)).ordered(),
            (f64::NEG_INFINITY, 4.0)
        );
    }

    #[test]
    fn test_polygon_requires_three_vertices() {
        let result = Gate::polygon(
            GateDimension::new("X"),
            GateDimension::new("Y"),
            vec![(0.0, 0.0), (1.0, 1.0)],
        );
        assert!(matches!(result, Err(GateError::InvalidGeometry { .. })));
    }

    #[test]
    fn test_clustering_parameters_require_cluster_method() {
        let gate = Gate::rectangle(
            vec![GateDimension::new("X")],
            vec![RectangleBound::new(Some(0.0), Some(1.0))],
        )
        .unwrap()
        .with_clustering_parameters(vec![GateDimension::new("Y")]);
        assert!(gate.validate().unwrap_err().is_invalid_argument());
        assert!(gate.with_method(GatingMethod::ClusterCentroid).validate().is_ok());
    }

    #[test]
    fn test_rejects_repeated_parameter() {
        let gate = Gate::polygon(
            GateDimension::new("X"),
            GateDimension::new("X"),
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0)],
        )
        .unwrap();
        assert!(gate.validate().is_err());

        let gate = Gate::rectangle(vec![GateDimension::new("CD3")], vec![RectangleBound::default()])
            .unwrap()
            .with_method(GatingMethod::ClusterCentroid)
            .with_clustering_parameters(vec![GateDimension::new("CD4"), GateDimension::new("CD3")]);
        let err = gate.validate().unwrap_err();
        assert!(err.to_string().contains("'CD3' is used more than once"));
    }

    #[test]
    fn test_rectangle_bound_count_must_match() {
        let result = Gate::rectangle(vec![GateDimension::new("X"), GateDimension::new("Y")], vec![RectangleBound::default()]);
        assert!(result.is_err());
        assert!(Gate::rectangle(vec![], vec![]).is_err());
    }
}
