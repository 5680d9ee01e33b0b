//! Real roots of quadratic and cubic polynomials.
//!
//! The solvers here are written for the coefficient ranges that show up in
//! lens distortion models, where the leading coefficient may be many orders
//! of magnitude smaller than the others. Instead of relying on tuned epsilons,
//! degenerate cases fall back to a lower-degree solver and the first cubic
//! root is bracketed and bisected on a monotonic branch.

/// Upper bound on the halvings used when bisecting a cubic root.
///
/// Walking `[0, 1]` down to the smallest subnormal takes 1074 halvings; the
/// loop stops as soon as the midpoint can no longer split the bracket.
const CUBIC_BISECTION_STEPS: usize = 1200;

/// Finds the real roots of `a·x² + b·x + c = 0`, sorted in ascending order.
///
/// Uses the cancellation-free form `u = -b - sign(b)·√D`, `x1 = u / 2a`,
/// `x2 = 2c / u`. When `a` is (nearly) zero `x1` is not finite and only the
/// root of the linear equation is returned.
///
/// # Examples
///
/// ```rust
/// use lens_distortion_estimator::polynomial::solve_quadratic;
///
/// assert_eq!(solve_quadratic(1.0, 0.0, -4.0), vec![-2.0, 2.0]);
/// assert!(solve_quadratic(1.0, 0.0, 4.0).is_empty());
/// ```
pub fn solve_quadratic(a: f64, b: f64, c: f64) -> Vec<f64> {
    if a == 0.0 && b == 0.0 {
        return Vec::new();
    }
    let discriminant = b * b - 4.0 * a * c;
    if discriminant < 0.0 {
        return Vec::new();
    }
    let sqrt_d = discriminant.sqrt();
    let sign_b = if b < 0.0 { -1.0 } else { 1.0 };
    let u = -b - sign_b * sqrt_d;
    let x1 = u / (2.0 * a);
    let x2 = 2.0 * c / u;

    if !x1.is_finite() {
        // a ~ 0, the equation is linear
        return if x2.is_finite() { vec![x2] } else { Vec::new() };
    }
    if !x2.is_finite() {
        // u == 0 only when b == 0 and c == 0: a double root at zero
        return vec![x1];
    }
    if x1 < x2 {
        vec![x1, x2]
    } else {
        vec![x2, x1]
    }
}

/// Locates the unique root of `t³ + B·t² + C·t - 1 = 0` inside `[t_min, t_max]`.
///
/// The caller guarantees `f(t_min) <= 0 <= f(t_max)`.
fn locate_root_in_cubic(b: f64, c: f64, mut t_min: f64, mut t_max: f64) -> f64 {
    for _ in 0..CUBIC_BISECTION_STEPS {
        let t = (t_min + t_max) / 2.0;
        if t <= t_min || t >= t_max {
            break;
        }
        let poly = -1.0 + t * (c + t * (b + t));
        if poly > 0.0 {
            t_max = t;
        } else {
            t_min = t;
        }
    }
    (t_min + t_max) / 2.0
}

/// Finds the real roots of `A·x³ + a·x² + b·x + c = 0`, sorted in ascending order.
///
/// Repeated roots may appear more than once; collapsing them is left to the
/// caller. Hard cases such as `A ~ 1e-17, a ~ b ~ c ~ 1` are handled without
/// arbitrary epsilons:
///
/// * if `A³` underflows, the equation is treated as quadratic;
/// * if `c == 0`, the root `x = 0` is factored out;
/// * otherwise the equation is rescaled by `x = -∛(c/A) · t`, which always has
///   a root on `(0, 1]` or (after `t = 1/p`) on `[1, ∞)`. That root is bisected
///   and the cubic is deflated to a quadratic for the other two.
///
/// The rescaled coefficients are built from `∛A` and `∛c` directly, so a tiny
/// `A` never overflows the monic form. A root too large for `f64` is dropped
/// and the remaining quadratic is solved with the original coefficients.
///
/// # Examples
///
/// ```rust
/// use lens_distortion_estimator::polynomial::solve_cubic;
///
/// // (x - 1)(x - 2)(x - 3)
/// let roots = solve_cubic(1.0, -6.0, 11.0, -6.0);
/// assert_eq!(roots.len(), 3);
/// assert!((roots[0] - 1.0).abs() < 1e-9);
/// assert!((roots[2] - 3.0).abs() < 1e-9);
/// ```
pub fn solve_cubic(a3: f64, a: f64, b: f64, c: f64) -> Vec<f64> {
    if (a3 * a3 * a3).abs() < f64::MIN_POSITIVE {
        return solve_quadratic(a, b, c);
    }

    if c == 0.0 {
        // x·(A·x² + a·x + b) = 0
        let mut roots = solve_quadratic(a3, a, b);
        roots.push(0.0);
        sort_roots(&mut roots);
        return roots;
    }

    // With x = -∛(c/A)·t the equation becomes t³ + B·t² + C·t - 1 = 0
    let cbrt_a3 = a3.cbrt();
    let cbrt_c = c.cbrt();
    let t_to_x = -cbrt_c / cbrt_a3;
    let big_b = -a / (cbrt_a3 * cbrt_a3 * cbrt_c);
    let big_c = b / (cbrt_a3 * cbrt_c * cbrt_c);
    if !(big_b.is_finite() && big_c.is_finite() && t_to_x.is_finite()) {
        return solve_quadratic(a, b, c);
    }

    // f(0) = -1, f(1) = B + C
    let f1 = big_b + big_c;
    let t = if f1 == 0.0 {
        1.0
    } else if f1 > 0.0 {
        locate_root_in_cubic(big_b, big_c, 0.0, 1.0)
    } else {
        // Root on (1, ∞): with t = 1/p the equation becomes p³ - C·p² - B·p - 1 = 0
        let p = locate_root_in_cubic(-big_c, -big_b, 0.0, 1.0);
        1.0 / p
    };
    let x1 = t_to_x * t;

    if !x1.is_finite() || x1 == 0.0 {
        return solve_quadratic(a, b, c);
    }

    // (x - x1)·(A·x² + p·x + q), remainder dropped. |t| > 1 means x1 is larger
    // than the geometric mean of the root magnitudes, so divide from the
    // constant term down; otherwise from the leading term up.
    let (linear, constant) = if t > 1.0 {
        let constant = -c / x1;
        ((constant - b) / x1, constant)
    } else {
        let linear = a3 * x1 + a;
        (linear, linear * x1 + b)
    };
    let norm = a3.abs().max(linear.abs()).max(constant.abs());
    let mut roots = solve_quadratic(a3 / norm, linear / norm, constant / norm);
    roots.push(x1);
    sort_roots(&mut roots);
    roots
}

fn sort_roots(roots: &mut [f64]) {
    roots.sort_by(|lhs, rhs| lhs.total_cmp(rhs));
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quadratic_residual(a: f64, b: f64, c: f64, x: f64) -> f64 {
        a * x * x + b * x + c
    }

    fn cubic_residual(a3: f64, a: f64, b: f64, c: f64, x: f64) -> f64 {
        ((a3 * x + a) * x + b) * x + c
    }

    #[test]
    fn test_quadratic_symmetric_roots() {
        assert_eq!(solve_quadratic(1.0, 0.0, -4.0), vec![-2.0, 2.0]);
    }

    #[test]
    fn test_quadratic_no_real_roots() {
        assert!(solve_quadratic(1.0, 1.0, 1.0).is_empty());
        assert!(solve_quadratic(0.0, 0.0, 3.0).is_empty());
    }

    #[test]
    fn test_quadratic_linear_fallback() {
        let roots = solve_quadratic(0.0, 2.0, -4.0);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 2.0, epsilon = 1e-15);

        // The second root sits near -2e300; the finite one must still be exact
        let roots = solve_quadratic(1e-300, 2.0, -4.0);
        assert_relative_eq!(roots[roots.len() - 1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_quadratic_double_root_at_zero() {
        assert_eq!(solve_quadratic(3.0, 0.0, 0.0), vec![0.0]);
    }

    #[test]
    fn test_quadratic_soundness() {
        let cases = [
            (1.0, -3.0, 2.0),
            (2.0, 7.0, -4.0),
            (1e-8, 1.0, -1.0),
            (-5.0, 1e3, 3.0),
            (1.0, 1e8, 1.0),
        ];
        for (a, b, c) in cases {
            let roots = solve_quadratic(a, b, c);
            assert!(!roots.is_empty(), "expected roots for ({a}, {b}, {c})");
            let scale = a.abs().max(b.abs()).max(c.abs());
            for x in roots {
                let magnitude = scale * (1.0 + x.abs() * x.abs());
                assert!(
                    quadratic_residual(a, b, c, x).abs() < 1e-10 * magnitude,
                    "root {x} of ({a}, {b}, {c}) has residual {}",
                    quadratic_residual(a, b, c, x)
                );
            }
        }
    }

    #[test]
    fn test_cubic_three_roots() {
        let roots = solve_cubic(2.0, -12.0, 22.0, -12.0);
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-9);
        assert_relative_eq!(roots[2], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_cubic_single_real_root() {
        // (x - 2)(x² + 1)
        let roots = solve_cubic(1.0, -2.0, 1.0, -2.0);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_cubic_zero_constant_term() {
        // x (x - 1)(x + 4)
        let roots = solve_cubic(1.0, 3.0, -4.0, 0.0);
        assert_eq!(roots, vec![-4.0, 0.0, 1.0]);
    }

    #[test]
    fn test_cubic_tiny_leading_coefficient() {
        // The A·x³ term is negligible: x² - 3x + 2 dominates for the small roots
        let roots = solve_cubic(1e-17, 1.0, -3.0, 2.0);
        assert!(roots.len() >= 2);
        let small: Vec<f64> = roots.iter().copied().filter(|x| x.abs() < 10.0).collect();
        assert_eq!(small.len(), 2);
        assert_relative_eq!(small[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(small[1], 2.0, epsilon = 1e-9);

        // A³ underflows: handled as a pure quadratic
        let roots = solve_cubic(1e-120, 1.0, -3.0, 2.0);
        assert_eq!(roots.len(), 2);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(roots[1], 2.0, epsilon = 1e-12);
    }

    /// Residual of `x` relative to the largest term of the cubic at `x`.
    fn relative_cubic_residual(a3: f64, a: f64, b: f64, c: f64, x: f64) -> f64 {
        let terms = [a3 * x * x * x, a * x * x, b * x, c];
        let magnitude = terms.iter().fold(0.0f64, |m, t| m.max(t.abs()));
        terms.iter().sum::<f64>().abs() / magnitude
    }

    #[test]
    fn test_cubic_negligible_leading_coefficient() {
        // Far above the underflow limit of A³: the x³ term only adds a root near -1e100
        let roots = solve_cubic(1e-100, 1.0, -3.0, 2.0);
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], -1e100, max_relative = 1e-12);
        assert_relative_eq!(roots[1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(roots[2], 2.0, epsilon = 1e-12);
        for &x in &roots {
            assert!(relative_cubic_residual(1e-100, 1.0, -3.0, 2.0, x) < 1e-12);
        }

        // x² + x + 1 has no real roots, the only one is the large root
        let roots = solve_cubic(1e-17, 1.0, 1.0, 1.0);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], -1e17, max_relative = 1e-12);
        assert!(relative_cubic_residual(1e-17, 1.0, 1.0, 1.0, roots[0]) < 1e-12);
    }

    #[test]
    fn test_cubic_huge_quadratic_coefficient() {
        // x³ + 1e200·x² + x + 1: one real root next to -1e200
        let roots = solve_cubic(1.0, 1e200, 1.0, 1.0);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], -1e200, max_relative = 1e-12);
    }

    #[test]
    fn test_cubic_soundness() {
        let cases = [
            (1.0, -6.0, 11.0, -6.0),
            (4.0, 0.3, -2.0, 0.9),
            (-0.4, 0.9, 0.2, 0.7),
            (0.012, -0.03, 0.1, 1.0),
            (3.0, 0.0, 0.0, -24.0),
            (1.0, 0.0, -1.0, 1e-6),
        ];
        for (a3, a, b, c) in cases {
            let roots = solve_cubic(a3, a, b, c);
            assert!(!roots.is_empty(), "a cubic always has a real root");
            for x in roots {
                let magnitude = a3.abs() * x.abs().powi(3)
                    + a.abs() * x * x
                    + b.abs() * x.abs()
                    + c.abs();
                assert!(
                    cubic_residual(a3, a, b, c, x).abs() < 1e-9 * magnitude.max(1.0),
                    "root {x} of ({a3}, {a}, {b}, {c}) has residual {}",
                    cubic_residual(a3, a, b, c, x)
                );
            }
        }
    }

    #[test]
    fn test_cubic_scale_invariance() {
        let base = (0.8, -1.7, -2.3, 1.1);
        let reference = solve_cubic(base.0, base.1, base.2, base.3);
        for exponent in -5..=5 {
            for sign in [1.0, -1.0] {
                let lambda = sign * 10f64.powi(exponent);
                let scaled =
                    solve_cubic(lambda * base.0, lambda * base.1, lambda * base.2, lambda * base.3);
                assert_eq!(scaled.len(), reference.len(), "lambda = {lambda}");
                for (lhs, rhs) in scaled.iter().zip(reference.iter()) {
                    assert_relative_eq!(*lhs, *rhs, epsilon = 1e-9, max_relative = 1e-9);
                }
            }
        }
    }

    #[test]
    fn test_roots_are_sorted() {
        let roots = solve_cubic(-1.0, 2.0, 5.0, -6.0);
        assert!(roots.windows(2).all(|pair| pair[0] <= pair[1]));
    }
}
