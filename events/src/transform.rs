use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_10;
use std::sync::Arc;

const MAX_SOLVER_ITERATIONS: usize = 200;
const MAX_BRACKET_EXPANSIONS: usize = 64;
const SOLVER_TOLERANCE: f64 = 1e-12;

/// Trait for types that map raw parameter values onto a display/gating scale
///
/// All transforms are computed in `f64` regardless of the table width.
pub trait Transformable {
    fn transform(&self, value: f64) -> f64;
    fn inverse_transform(&self, value: f64) -> f64;
}

/// The raw T/W/M/A parameters of a transform, as found in gate files
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformParameters {
    #[serde(rename = "T")]
    pub t: f64,
    #[serde(rename = "W", default, skip_serializing_if = "Option::is_none")]
    pub w: Option<f64>,
    #[serde(rename = "M", default, skip_serializing_if = "Option::is_none")]
    pub m: Option<f64>,
    #[serde(rename = "A", default, skip_serializing_if = "Option::is_none")]
    pub a: Option<f64>,
}

/// The Gating-ML 2.0 family of scale transforms
///
/// `T` is the top of scale, `M` the number of decades, `A` the additional negative
/// decades and `W` the linearization width (all in decades).
#[derive(Clone, Debug, PartialEq)]
pub enum TransformType {
    /// `flin(x) = (x + A) / (T + A)`
    Linear { t: f64, a: f64 },
    /// `flog(x) = log10(x / T) / M + 1`
    Logarithmic { t: f64, m: f64 },
    /// `fasinh(x) = (asinh(x sinh(M ln10) / T) + A ln10) / ((M + A) ln10)`
    InverseHyperbolicSine { t: f64, m: f64, a: f64 },
    /// Moore-Parks logicle
    Logicle(Logicle),
    /// Bagwell hyperlog
    Hyperlog(Hyperlog),
}

fn require(condition: bool, kind: &'static str, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(EventError::invalid_transform(kind, message))
    }
}

fn require_finite(kind: &'static str, values: &[f64]) -> Result<()> {
    require(
        values.iter().all(|v| v.is_finite()),
        kind,
        "parameters must be finite",
    )
}

impl TransformType {
    /// # Errors
    /// Will return `Err` unless `T > 0` and `-T < A <= T`
    pub fn linear(t: f64, a: f64) -> Result<Self> {
        require_finite("flin", &[t, a])?;
        require(t > 0.0, "flin", "T must be positive")?;
        require(a > -t && a <= t, "flin", "A must satisfy -T < A <= T")?;
        Ok(Self::Linear { t, a })
    }

    /// # Errors
    /// Will return `Err` unless `T > 0` and `M > 0`
    pub fn logarithmic(t: f64, m: f64) -> Result<Self> {
        require_finite("flog", &[t, m])?;
        require(t > 0.0, "flog", "T must be positive")?;
        require(m > 0.0, "flog", "M must be positive")?;
        Ok(Self::Logarithmic { t, m })
    }

    /// # Errors
    /// Will return `Err` unless `T > 0`, `M > 0` and `0 <= A <= M`
    pub fn inverse_hyperbolic_sine(t: f64, m: f64, a: f64) -> Result<Self> {
        require_finite("fasinh", &[t, m, a])?;
        require(t > 0.0, "fasinh", "T must be positive")?;
        require(m > 0.0, "fasinh", "M must be positive")?;
        require((0.0..=m).contains(&a), "fasinh", "A must satisfy 0 <= A <= M")?;
        Ok(Self::InverseHyperbolicSine { t, m, a })
    }

    /// # Errors
    /// See [`Logicle::new`]
    pub fn logicle(t: f64, w: f64, m: f64, a: f64) -> Result<Self> {
        Ok(Self::Logicle(Logicle::new(t, w, m, a)?))
    }

    /// # Errors
    /// See [`Hyperlog::new`]
    pub fn hyperlog(t: f64, w: f64, m: f64, a: f64) -> Result<Self> {
        Ok(Self::Hyperlog(Hyperlog::new(t, w, m, a)?))
    }

    /// Builds a transform from its Gating-ML element name and raw parameters
    /// # Errors
    /// Will return `Err` if the keyword is unknown, a required parameter is missing, or
    /// the parameters are out of range
    pub fn from_parameters(keyword: &str, parameters: &TransformParameters) -> Result<Self> {
        let missing = |kind: &'static str, name: &str| {
            EventError::invalid_transform(kind, format!("missing parameter {name}"))
        };
        let TransformParameters { t, w, m, a } = *parameters;
        match keyword {
            "flin" => Self::linear(t, a.unwrap_or(0.0)),
            "flog" => Self::logarithmic(t, m.ok_or_else(|| missing("flog", "M"))?),
            "fasinh" => Self::inverse_hyperbolic_sine(
                t,
                m.ok_or_else(|| missing("fasinh", "M"))?,
                a.unwrap_or(0.0),
            ),
            "logicle" => Self::logicle(
                t,
                w.ok_or_else(|| missing("logicle", "W"))?,
                m.ok_or_else(|| missing("logicle", "M"))?,
                a.unwrap_or(0.0),
            ),
            "hyperlog" => Self::hyperlog(
                t,
                w.ok_or_else(|| missing("hyperlog", "W"))?,
                m.ok_or_else(|| missing("hyperlog", "M"))?,
                a.unwrap_or(0.0),
            ),
            other => Err(EventError::UnknownTransform(other.to_string())),
        }
    }

    /// The Gating-ML element name of this transform
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Linear { .. } => "flin",
            Self::Logarithmic { .. } => "flog",
            Self::InverseHyperbolicSine { .. } => "fasinh",
            Self::Logicle(_) => "logicle",
            Self::Hyperlog(_) => "hyperlog",
        }
    }

    pub fn parameters(&self) -> TransformParameters {
        match self {
            Self::Linear { t, a } => TransformParameters {
                t: *t,
                a: Some(*a),
                ..Default::default()
            },
            Self::Logarithmic { t, m } => TransformParameters {
                t: *t,
                m: Some(*m),
                ..Default::default()
            },
            Self::InverseHyperbolicSine { t, m, a } => TransformParameters {
                t: *t,
                w: None,
                m: Some(*m),
                a: Some(*a),
            },
            Self::Logicle(l) => TransformParameters {
                t: l.t,
                w: Some(l.w),
                m: Some(l.m),
                a: Some(l.a),
            },
            Self::Hyperlog(h) => TransformParameters {
                t: h.t,
                w: Some(h.w),
                m: Some(h.m),
                a: Some(h.a),
            },
        }
    }
}

impl Transformable for TransformType {
    fn transform(&self, value: f64) -> f64 {
        match self {
            Self::Linear { t, a } => (value + a) / (t + a),
            Self::Logarithmic { t, m } => (value / t).log10() / m + 1.0,
            Self::InverseHyperbolicSine { t, m, a } => {
                ((value * (m * LN_10).sinh() / t).asinh() + a * LN_10) / ((m + a) * LN_10)
            }
            Self::Logicle(l) => l.scale(value),
            Self::Hyperlog(h) => h.scale(value),
        }
    }

    fn inverse_transform(&self, value: f64) -> f64 {
        match self {
            Self::Linear { t, a } => value * (t + a) - a,
            Self::Logarithmic { t, m } => t * 10f64.powf((value - 1.0) * m),
            Self::InverseHyperbolicSine { t, m, a } => {
                t * (value * (m + a) * LN_10 - a * LN_10).sinh() / (m * LN_10).sinh()
            }
            Self::Logicle(l) => l.inverse(value),
            Self::Hyperlog(h) => h.inverse(value),
        }
    }
}

/// A named transform, referenced by gate dimensions
#[derive(Clone, Debug, PartialEq)]
pub struct Transform {
    pub id: Arc<str>,
    pub transform_type: TransformType,
}

impl Transform {
    pub fn new(id: impl Into<Arc<str>>, transform_type: TransformType) -> Self {
        Self {
            id: id.into(),
            transform_type,
        }
    }
}

impl Transformable for Transform {
    #[inline]
    fn transform(&self, value: f64) -> f64 {
        self.transform_type.transform(value)
    }

    #[inline]
    fn inverse_transform(&self, value: f64) -> f64 {
        self.transform_type.inverse_transform(value)
    }
}

/// Shared scale geometry of the logicle and hyperlog transforms, in display units
#[derive(Clone, Copy, Debug, PartialEq)]
struct ScaleGeometry {
    /// Width in display units
    w: f64,
    /// Display position of zero
    x1: f64,
    /// End of the linear-like region
    x0: f64,
    b: f64,
}

impl ScaleGeometry {
    fn new(w: f64, m: f64, a: f64) -> Self {
        let w = w / (m + a);
        let x2 = a / (m + a);
        Self {
            w,
            x1: x2 + w,
            x0: x2 + 2.0 * w,
            b: (m + a) * LN_10,
        }
    }
}

fn validate_biexponential(kind: &'static str, t: f64, w: f64, m: f64, a: f64) -> Result<()> {
    require_finite(kind, &[t, w, m, a])?;
    require(t > 0.0, kind, "T must be positive")?;
    require(m > 0.0, kind, "M must be positive")?;
    require(w >= 0.0 && w <= m / 2.0, kind, "W must satisfy 0 <= W <= M/2")?;
    require(a >= -w && a <= m - 2.0 * w, kind, "A must satisfy -W <= A <= M - 2W")
}

/// Logicle (Moore & Parks) transform with its precomputed coefficients
///
/// The inverse is the biexponential `B(y) = a e^(by) - c e^(-dy) + f` above the zero
/// point `x1`, reflected below it. The forward transform solves `B(y) = x`.
#[derive(Clone, Debug, PartialEq)]
pub struct Logicle {
    pub t: f64,
    pub w: f64,
    pub m: f64,
    pub a: f64,
    geometry: ScaleGeometry,
    d: f64,
    coef_a: f64,
    coef_c: f64,
    coef_f: f64,
}

impl Logicle {
    /// # Errors
    /// Will return `Err` unless `T > 0`, `M > 0`, `0 <= W <= M/2` and `-W <= A <= M - 2W`
    pub fn new(t: f64, w: f64, m: f64, a: f64) -> Result<Self> {
        validate_biexponential("logicle", t, w, m, a)?;
        let geometry = ScaleGeometry::new(w, m, a);
        let ScaleGeometry { w: wd, x1, x0, b } = geometry;
        let d = solve_logicle_d(b, wd);

        let c_a = (x0 * (b + d)).exp();
        let mf_a = (b * x1).exp() - c_a / (d * x1).exp();
        let coef_a = t / ((b.exp() - mf_a) - c_a / d.exp());
        Ok(Self {
            t,
            w,
            m,
            a,
            geometry,
            d,
            coef_a,
            coef_c: c_a * coef_a,
            coef_f: -mf_a * coef_a,
        })
    }

    /// `B(y)` and its derivative, valid for `y >= x1`
    fn biexponential(&self, y: f64) -> (f64, f64) {
        let b = self.geometry.b;
        let growth = self.coef_a * (b * y).exp();
        let decay = self.coef_c * (-self.d * y).exp();
        (growth - decay + self.coef_f, b * growth + self.d * decay)
    }

    fn scale(&self, value: f64) -> f64 {
        let x1 = self.geometry.x1;
        if value == 0.0 {
            return x1;
        }
        if value < 0.0 {
            return 2.0 * x1 - self.scale(-value);
        }
        solve_increasing(value, x1, |y| self.biexponential(y))
    }

    fn inverse(&self, value: f64) -> f64 {
        let x1 = self.geometry.x1;
        if value < x1 {
            -self.biexponential(2.0 * x1 - value).0
        } else {
            self.biexponential(value).0
        }
    }
}

/// Solves `2 (ln d - ln b) + w (b + d) = 0` for `d` in `(0, b]`
fn solve_logicle_d(b: f64, w: f64) -> f64 {
    if w == 0.0 {
        return b;
    }
    bracketed_newton(0.0, b, 0.0, |d| (2.0 * (d.ln() - b.ln()) + w * (b + d), 2.0 / d + w))
}

/// Hyperlog (Bagwell) transform with its precomputed coefficients
///
/// The inverse is `EH(y) = a e^(by) + c y - f` above the zero point `x1`, reflected below it.
#[derive(Clone, Debug, PartialEq)]
pub struct Hyperlog {
    pub t: f64,
    pub w: f64,
    pub m: f64,
    pub a: f64,
    geometry: ScaleGeometry,
    coef_a: f64,
    coef_c: f64,
    coef_f: f64,
}

impl Hyperlog {
    /// # Errors
    /// Will return `Err` unless `T > 0`, `M > 0`, `0 < W <= M/2` and `-W <= A <= M - 2W`
    pub fn new(t: f64, w: f64, m: f64, a: f64) -> Result<Self> {
        validate_biexponential("hyperlog", t, w, m, a)?;
        require(w > 0.0, "hyperlog", "W must be positive")?;
        let geometry = ScaleGeometry::new(w, m, a);
        let ScaleGeometry { w: wd, x1, x0, b } = geometry;

        let e0 = (b * x0).exp();
        let c_a = e0 / wd;
        let f_a = (b * x1).exp() + c_a * x1;
        let coef_a = t / (b.exp() + c_a - f_a);
        Ok(Self {
            t,
            w,
            m,
            a,
            geometry,
            coef_a,
            coef_c: c_a * coef_a,
            coef_f: f_a * coef_a,
        })
    }

    /// `EH(y)` and its derivative, valid for `y >= x1`
    fn extended_hyperlog(&self, y: f64) -> (f64, f64) {
        let growth = self.coef_a * (self.geometry.b * y).exp();
        (
            growth + self.coef_c * y - self.coef_f,
            self.geometry.b * growth + self.coef_c,
        )
    }

    fn scale(&self, value: f64) -> f64 {
        let x1 = self.geometry.x1;
        if value == 0.0 {
            return x1;
        }
        if value < 0.0 {
            return 2.0 * x1 - self.scale(-value);
        }
        solve_increasing(value, x1, |y| self.extended_hyperlog(y))
    }

    fn inverse(&self, value: f64) -> f64 {
        let x1 = self.geometry.x1;
        if value < x1 {
            -self.extended_hyperlog(2.0 * x1 - value).0
        } else {
            self.extended_hyperlog(value).0
        }
    }
}

/// Finds `y >= lower` with `f(y) = target` for an increasing `f` where `f(lower) <= target`
fn solve_increasing(target: f64, lower: f64, f: impl Fn(f64) -> (f64, f64)) -> f64 {
    if target.is_nan() || target.is_infinite() {
        return target;
    }
    let mut lo = lower;
    let mut hi = lower + 1.0;
    let mut expansions = 0;
    while f(hi).0 < target && expansions < MAX_BRACKET_EXPANSIONS {
        lo = hi;
        hi = lower + 2.0 * (hi - lower);
        expansions += 1;
    }
    bracketed_newton(lo, hi, target, f)
}

/// Newton iteration confined to `[lo, hi]`, bisecting whenever a step leaves the bracket
fn bracketed_newton(mut lo: f64, mut hi: f64, target: f64, f: impl Fn(f64) -> (f64, f64)) -> f64 {
    let mut y = 0.5 * (lo + hi);
    for _ in 0..MAX_SOLVER_ITERATIONS {
        let (value, slope) = f(y);
        let error = value - target;
        if error.abs() <= SOLVER_TOLERANCE * target.abs().max(1.0) {
            break;
        }
        if error < 0.0 {
            lo = y;
        } else {
            hi = y;
        }
        if hi - lo <= f64::EPSILON * y.abs().max(1.0) {
            break;
        }
        let step = y - error / slope;
        y = if step.is_finite() && step > lo && step < hi {
            step
        } else {
            0.5 * (lo + hi)
        };
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_linear_and_log() {
        let lin = TransformType::linear(1000.0, 0.0).unwrap();
        assert_relative_eq!(lin.transform(250.0), 0.25);
        assert_relative_eq!(lin.inverse_transform(0.25), 250.0);

        let log = TransformType::logarithmic(10000.0, 4.0).unwrap();
        assert_relative_eq!(log.transform(10000.0), 1.0);
        assert_relative_eq!(log.transform(1.0), 0.0);
        assert_relative_eq!(log.inverse_transform(0.5), 100.0, max_relative = 1e-12);
    }

    #[test]
    fn test_fasinh_top_of_scale_maps_to_one() {
        let t = TransformType::inverse_hyperbolic_sine(262144.0, 4.5, 0.0).unwrap();
        assert_relative_eq!(t.transform(0.0), 0.0);
        assert_relative_eq!(t.transform(262144.0), 1.0, max_relative = 1e-12);
        let x = 1234.5;
        assert_relative_eq!(t.inverse_transform(t.transform(x)), x, max_relative = 1e-9);
    }

    #[test]
    fn test_logicle_fixed_points() {
        let t = TransformType::logicle(262144.0, 0.5, 4.5, 0.0).unwrap();
        assert_relative_eq!(t.transform(262144.0), 1.0, max_relative = 1e-9);
        // zero sits at x1 = W / (M + A)
        assert_relative_eq!(t.transform(0.0), 0.5 / 4.5, max_relative = 1e-12);
        for x in [-500.0, -1.0, 3.0, 800.0, 50000.0] {
            assert_relative_eq!(t.inverse_transform(t.transform(x)), x, max_relative = 1e-7, epsilon = 1e-7);
        }
        assert!(t.transform(10.0) < t.transform(11.0));
    }

    #[test]
    fn test_logicle_zero_width_is_logarithmic_above_zero() {
        let t = TransformType::logicle(10000.0, 0.0, 4.0, 0.0).unwrap();
        assert_relative_eq!(t.transform(10000.0), 1.0, max_relative = 1e-9);
        assert_relative_eq!(t.transform(100.0), 0.5, max_relative = 1e-4);
    }

    #[test]
    fn test_hyperlog_fixed_points() {
        let t = TransformType::hyperlog(10000.0, 1.0, 4.0, 0.0).unwrap();
        assert_relative_eq!(t.transform(10000.0), 1.0, max_relative = 1e-9);
        assert_relative_eq!(t.transform(0.0), 0.25, max_relative = 1e-12);
        for x in [-20.0, 0.5, 70.0, 9000.0] {
            assert_relative_eq!(t.inverse_transform(t.transform(x)), x, max_relative = 1e-7, epsilon = 1e-7);
        }
    }

    #[test]
    fn test_parameter_validation() {
        assert!(TransformType::linear(0.0, 0.0).is_err());
        assert!(TransformType::logarithmic(100.0, -1.0).is_err());
        assert!(TransformType::inverse_hyperbolic_sine(100.0, 2.0, 3.0).is_err());
        assert!(TransformType::logicle(262144.0, 3.0, 4.5, 0.0).is_err());
        assert!(TransformType::logicle(262144.0, 0.5, 4.5, -1.0).is_err());
        assert!(TransformType::hyperlog(262144.0, 0.0, 4.5, 0.0).is_err());
    }

    #[test]
    fn test_from_parameters_uses_keywords() {
        let parameters = TransformParameters {
            t: 262144.0,
            w: Some(0.5),
            m: Some(4.5),
            a: Some(0.0),
        };
        let t = TransformType::from_parameters("logicle", &parameters).unwrap();
        assert_eq!(t.keyword(), "logicle");
        assert_eq!(t.parameters(), parameters);

        let missing = TransformType::from_parameters("flog", &TransformParameters { t: 1.0, ..Default::default() });
        assert!(missing.is_err());
        assert!(matches!(
            TransformType::from_parameters("fratio", &parameters),
            Err(EventError::UnknownTransform(_))
        ));
    }
}
