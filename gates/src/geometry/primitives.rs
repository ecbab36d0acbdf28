use flow_events::EventValue;

/// Axis-aligned bounds of a polygon, used to reject points before the winding test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn from_vertices(vertices: &[(f64, f64)]) -> Self {
        vertices.iter().fold(
            Self {
                min_x: f64::INFINITY,
                min_y: f64::INFINITY,
                max_x: f64::NEG_INFINITY,
                max_y: f64::NEG_INFINITY,
            },
            |b, &(x, y)| Self {
                min_x: b.min_x.min(x),
                min_y: b.min_y.min(y),
                max_x: b.max_x.max(x),
                max_y: b.max_y.max(y),
            },
        )
    }

    /// Closed containment test, false for NaN coordinates
    #[inline]
    pub fn contains<T: EventValue>(&self, x: T, y: T) -> bool {
        within_bounds(x, T::from_f64(self.min_x), T::from_f64(self.max_x))
            && within_bounds(y, T::from_f64(self.min_y), T::from_f64(self.max_y))
    }
}

/// `min <= value <= max`; NaN is never within bounds
#[inline]
pub fn within_bounds<T: PartialOrd>(value: T, min: T, max: T) -> bool {
    value >= min && value <= max
}

/// Twice the signed area of the triangle `p0 p1 p2`
///
/// Positive when `p2` is left of the directed line `p0 -> p1`, negative when right,
/// zero when collinear.
#[inline]
pub fn is_left<T: EventValue>(p0: (T, T), p1: (T, T), p2: (T, T)) -> T {
    (p1.0 - p0.0) * (p2.1 - p0.1) - (p2.0 - p0.0) * (p1.1 - p0.1)
}

/// Winding number of `point` around the implicitly closed polygon `vertices`
pub fn winding_number<T: EventValue>(point: (T, T), vertices: &[(T, T)]) -> i32 {
    let zero = T::default();
    let mut winding = 0;
    let n = vertices.len();
    for i in 0..n {
        let v0 = vertices[i];
        let v1 = vertices[(i + 1) % n];
        if v0.1 <= point.1 {
            // upward crossing with the point strictly left of the edge
            if v1.1 > point.1 && is_left(v0, v1, point) > zero {
                winding += 1;
            }
        } else if v1.1 <= point.1 && is_left(v0, v1, point) < zero {
            // downward crossing with the point strictly right of the edge
            winding -= 1;
        }
    }
    winding
}

/// Nonzero winding rule
#[inline]
pub fn point_in_polygon<T: EventValue>(point: (T, T), vertices: &[(T, T)]) -> bool {
    winding_number(point, vertices) != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const SQUARE: [(f64, f64); 4] = [(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];

    #[test]
    fn test_is_left_sign() {
        assert!(is_left((0.0, 0.0), (1.0, 0.0), (0.5, 1.0)) > 0.0);
        assert!(is_left((0.0, 0.0), (1.0, 0.0), (0.5, -1.0)) < 0.0);
        assert_eq!(is_left((0.0, 0.0), (1.0, 0.0), (2.0, 0.0)), 0.0);
        assert_relative_eq!(is_left((0.1, 0.2), (1.3, 0.2), (0.7, 2.2)), 2.4, epsilon = 1e-12);
    }

    #[test]
    fn test_square_containment() {
        assert!(point_in_polygon((5.0, 5.0), &SQUARE));
        assert!(!point_in_polygon((15.0, 5.0), &SQUARE));
        // the top-right corner lies on the upper edges, which the half-open crossing rule excludes
        assert!(!point_in_polygon((10.0, 10.0), &SQUARE));
        // the bottom-left corner lies on the lower edge, which the rule includes
        assert_eq!(winding_number((0.0, 0.0), &SQUARE), 1);
    }

    #[test]
    fn test_orientation_sign() {
        let clockwise: Vec<(f64, f64)> = SQUARE.iter().rev().copied().collect();
        assert_eq!(winding_number((5.0, 5.0), &SQUARE), 1);
        assert_eq!(winding_number((5.0, 5.0), &clockwise), -1);
    }

    #[test]
    fn test_self_intersecting_polygon_uses_nonzero_rule() {
        // a pentagram winds twice around its center
        let star: Vec<(f64, f64)> = (0..5)
            .map(|k| {
                let angle = std::f64::consts::FRAC_PI_2 + f64::from(k * 2) * std::f64::consts::TAU / 5.0;
                (angle.cos(), angle.sin())
            })
            .collect();
        assert_eq!(winding_number((0.0, 0.0), &star).abs(), 2);
        assert!(point_in_polygon((0.0, 0.0), &star));
    }

    #[test]
    fn test_f32_agrees_with_f64() {
        let square32: Vec<(f32, f32)> = SQUARE.iter().map(|&(x, y)| (x as f32, y as f32)).collect();
        for point in [(5.0, 5.0), (15.0, 5.0), (10.0, 10.0), (0.0, 5.0), (-1.0, -1.0)] {
            assert_eq!(
                point_in_polygon(point, &SQUARE),
                point_in_polygon((point.0 as f32, point.1 as f32), &square32)
            );
        }
    }

    #[test]
    fn test_bounding_box() {
        let bounds = BoundingBox::from_vertices(&SQUARE);
        assert!(bounds.contains(10.0f32, 0.0));
        assert!(!bounds.contains(10.5f64, 0.0));
        assert!(!bounds.contains(f64::NAN, 1.0));
    }
}
