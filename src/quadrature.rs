//! Gauss quadrature on the reference interval, quadrilateral and hexahedron.
use crate::Real;
use nalgebra::{OPoint, Point2, Point3, U2, U3};
use std::f64::consts::PI;

/// Quadrature weights paired with quadrature points in reference coordinates.
pub type QuadraturePair<T, D> = (Vec<T>, Vec<OPoint<T, D>>);
pub type QuadraturePair2d<T> = QuadraturePair<T, U2>;
pub type QuadraturePair3d<T> = QuadraturePair<T, U3>;

/// Upper bound on Newton iterations when locating a root of a Legendre polynomial.
const MAX_NEWTON_ITERATIONS: usize = 100;

/// Recurrence relation for Legendre polynomials.
///
/// Note: we use a formula for which derivatives are *not* defined at |x| == 1, so it is only
/// suitable for evaluation in the open interval (-1, 1).
#[derive(Debug, Default)]
struct LegendreRecurrence {
    n: usize,
    x: f64,
    // p_n(x)
    p1: f64,
    // p_{n - 1}(x)
    p2: f64,
}

impl LegendreRecurrence {
    fn evaluate(n: usize, x: f64) -> Self {
        //  m P_m(x) = (2m - 1) * x P_{m - 1}(x) - (m - 1) P_{m - 2}(x)
        let mut p1 = 1.0;
        let mut p2 = 0.0;
        let mut p3;
        for m in 1..=n {
            let m = m as f64;
            p3 = p2;
            p2 = p1;
            p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
        }

        Self { n, x, p1, p2 }
    }

    fn value_and_derivative(&self) -> (f64, f64) {
        let Self { n, x, p1, p2 } = *self;
        let n = n as f64;
        // dp_n/dx (x) = n * (x * p_n(x) - p_{n - 1}(x)) / (x^2 - 1)
        (p1, n * (x * p1 - p2) / (x * x - 1.0))
    }
}

/// Gauss quadrature for the reference interval [-1, 1].
///
/// Returns weights and points of the Gauss-Legendre rule with the given number of points.
/// Given `n` points, the rule integrates polynomials of order up to `2 n - 1` exactly.
///
/// # Panics
///
/// Panics if zero points are requested.
pub fn gauss(num_points: usize) -> (Vec<f64>, Vec<f64>) {
    let n = num_points;
    assert!(n > 0, "number of points must be positive");

    // Only find the first m roots, the rest follow by symmetry
    let m = (n + 1) / 2;
    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    for i in 0..m {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        let (mut p, mut dp) = LegendreRecurrence::evaluate(n, x).value_and_derivative();

        for _ in 0..MAX_NEWTON_ITERATIONS {
            let dx = -p / dp;
            x += dx;
            let (p_new, dp_new) = LegendreRecurrence::evaluate(n, x).value_and_derivative();
            p = p_new;
            dp = dp_new;
            if dx.abs() <= 1e-15 {
                break;
            }
        }

        points.push(x);
        weights.push(2.0 / ((1.0 - x * x) * dp * dp));
    }

    for i in m..n {
        let mirror_idx = n - i - 1;
        points.push(-points[mirror_idx]);
        weights.push(weights[mirror_idx]);
    }

    debug_assert_eq!(points.len(), n);
    (weights, points)
}

fn convert_scalar<T: Real>(value: f64) -> T {
    T::from_f64(value).expect("Quadrature value must fit in T")
}

/// A tensor-product Gauss rule for the reference quadrilateral `[-1, 1]^2`.
pub fn quadrilateral_gauss<T: Real>(num_points_per_dim: usize) -> QuadraturePair2d<T> {
    let (weights1d, points1d) = gauss(num_points_per_dim);
    let rule1d = || weights1d.iter().zip(&points1d);

    let mut weights = Vec::new();
    let mut points = Vec::new();
    for (&wx, &x) in rule1d() {
        for (&wy, &y) in rule1d() {
            weights.push(convert_scalar(wx * wy));
            points.push(Point2::new(convert_scalar(x), convert_scalar(y)));
        }
    }
    (weights, points)
}

/// A tensor-product Gauss rule for the reference hexahedron `[-1, 1]^3`.
pub fn hexahedron_gauss<T: Real>(num_points_per_dim: usize) -> QuadraturePair3d<T> {
    let (weights1d, points1d) = gauss(num_points_per_dim);
    let rule1d = || weights1d.iter().zip(&points1d);

    let mut weights = Vec::new();
    let mut points = Vec::new();
    for (&wx, &x) in rule1d() {
        for (&wy, &y) in rule1d() {
            for (&wz, &z) in rule1d() {
                weights.push(convert_scalar(wx * wy * wz));
                points.push(Point3::new(convert_scalar(x), convert_scalar(y), convert_scalar(z)));
            }
        }
    }
    (weights, points)
}
