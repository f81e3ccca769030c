//! Piecewise-linear fuzzy sets and centroid defuzzification.

/// A membership function given by knots `(x, membership)` in ascending `x`.
///
/// Between knots the membership is interpolated linearly; outside the knot
/// range it stays at the value of the nearest end knot, which makes
/// shoulder functions ("very small", "large") extend to infinity.
#[derive(Clone, Debug, PartialEq)]
pub struct MembershipFunction {
    knots: Vec<(f64, f64)>,
}

impl MembershipFunction {
    pub fn from_knots(knots: Vec<(f64, f64)>) -> Self {
        Self { knots }
    }

    /// Zero at `a`, rising to one on `[b, c]`, back to zero at `d`.
    pub fn trapezoid(a: f64, b: f64, c: f64, d: f64) -> Self {
        Self::from_knots(vec![(a, 0.0), (b, 1.0), (c, 1.0), (d, 0.0)])
    }

    /// One up to `c`, falling to zero at `d`.
    pub fn left_shoulder(c: f64, d: f64) -> Self {
        Self::from_knots(vec![(c, 1.0), (d, 0.0)])
    }

    /// Zero up to `a`, rising to one at `b`.
    pub fn right_shoulder(a: f64, b: f64) -> Self {
        Self::from_knots(vec![(a, 0.0), (b, 1.0)])
    }

    /// Degree of membership of `x`.
    pub fn membership(&self, x: f64) -> f64 {
        let (Some(first), Some(last)) = (self.knots.first(), self.knots.last()) else {
            return 0.0;
        };
        if x <= first.0 {
            return first.1;
        }
        if x >= last.0 {
            return last.1;
        }
        for pair in self.knots.windows(2) {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            if x >= x0 && x <= x1 {
                if x1 == x0 {
                    return y1;
                }
                return y0 + (y1 - y0) * (x - x0) / (x1 - x0);
            }
        }
        last.1
    }
}

/// A trapezoid output set cut off at `height`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClippedTrapezoid {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub height: f64,
}

impl ClippedTrapezoid {
    /// `(area, centroid)` of the rising triangle, plateau and falling triangle.
    fn pieces(&self) -> [(f64, f64); 3] {
        let h = self.height;
        let left_width = (self.b - self.a) * h;
        let right_width = (self.d - self.c) * h;
        let plateau_start = self.a + left_width;
        let plateau_end = self.d - right_width;
        [
            (0.5 * left_width * h, self.a + 2.0 * left_width / 3.0),
            (
                (plateau_end - plateau_start) * h,
                0.5 * (plateau_start + plateau_end),
            ),
            (0.5 * right_width * h, plateau_end + right_width / 3.0),
        ]
    }
}

/// Area-weighted mean abscissa of all pieces of all clipped sets.
///
/// Returns `None` when the total area is zero (no rule fired).
pub fn centroid(sets: &[ClippedTrapezoid]) -> Option<f64> {
    let mut area_sum = 0.0;
    let mut moment = 0.0;
    for set in sets.iter().filter(|s| s.height > 0.0) {
        for (area, x) in set.pieces() {
            if area > 0.0 {
                area_sum += area;
                moment += area * x;
            }
        }
    }
    (area_sum > 0.0).then(|| moment / area_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn trapezoid_interpolates_between_knots() {
        let f = MembershipFunction::trapezoid(0.0, 1.0, 2.0, 4.0);
        assert_eq!(f.membership(-1.0), 0.0);
        assert_relative_eq!(f.membership(0.5), 0.5);
        assert_eq!(f.membership(1.5), 1.0);
        assert_relative_eq!(f.membership(3.0), 0.5);
        assert_eq!(f.membership(10.0), 0.0);
    }

    #[test]
    fn shoulders_extend_outwards() {
        let left = MembershipFunction::left_shoulder(0.02, 0.04);
        assert_eq!(left.membership(-5.0), 1.0);
        assert_relative_eq!(left.membership(0.03), 0.5);
        let right = MembershipFunction::right_shoulder(0.3, 0.4);
        assert_eq!(right.membership(7.0), 1.0);
        assert_eq!(right.membership(0.1), 0.0);
    }

    #[test]
    fn symmetric_clipped_set_centroid_is_its_centre() {
        let set = ClippedTrapezoid {
            a: 0.5,
            b: 0.75,
            c: 1.25,
            d: 1.5,
            height: 0.3,
        };
        assert_relative_eq!(centroid(&[set]).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn heavier_set_pulls_centroid() {
        let mk = |centre: f64, height: f64| ClippedTrapezoid {
            a: centre - 0.5,
            b: centre - 0.25,
            c: centre + 0.25,
            d: centre + 0.5,
            height,
        };
        let x = centroid(&[mk(0.0, 1.0), mk(1.0, 0.2)]).unwrap();
        assert!(x > 0.0 && x < 0.5);
        assert!(centroid(&[mk(0.0, 0.0)]).is_none());
    }
}
