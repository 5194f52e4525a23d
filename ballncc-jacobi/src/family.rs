use crate::Error;
use std::f64::consts::LN_2;

/// A Jacobi polynomial family with weight $(1 - x)^a (1 + x)^b$ on `[-1, 1]`.
///
/// The monic polynomials satisfy the recurrence
///
/// ```text
/// p_{n + 1}(x) = (x - alpha_n) p_n(x) - beta_n p_{n - 1}(x),
/// ```
///
/// and the orthonormal polynomials are obtained by dividing through with
/// `sqrt(mass * beta_1 * ... * beta_n)`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct JacobiFamily {
    a: f64,
    b: f64,
}

impl JacobiFamily {
    pub fn new(a: f64, b: f64) -> Result<Self, Error> {
        if a > -1.0 && b > -1.0 {
            Ok(Self { a, b })
        } else {
            Err(Error::InvalidParameters { a, b })
        }
    }

    /// The Legendre family, `a = b = 0`.
    pub fn legendre() -> Self {
        Self { a: 0.0, b: 0.0 }
    }

    pub fn a(&self) -> f64 {
        self.a
    }

    pub fn b(&self) -> f64 {
        self.b
    }

    /// The family with `b` incremented by one.
    pub fn raised(&self) -> Self {
        Self {
            a: self.a,
            b: self.b + 1.0,
        }
    }

    /// The family with both parameters incremented by one, i.e. the family of the derivatives.
    pub fn derivative_family(&self) -> Self {
        Self {
            a: self.a + 1.0,
            b: self.b + 1.0,
        }
    }

    /// Diagonal recurrence coefficient $\alpha_n$.
    pub fn alpha(&self, n: usize) -> f64 {
        let Self { a, b } = *self;
        if n == 0 {
            (b - a) / (a + b + 2.0)
        } else {
            let s = 2.0 * n as f64 + a + b;
            (b * b - a * a) / (s * (s + 2.0))
        }
    }

    /// Off-diagonal recurrence coefficient $\beta_n$ for `n >= 1`.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn beta(&self, n: usize) -> f64 {
        assert!(n > 0, "beta_n is only defined for n >= 1");
        let Self { a, b } = *self;
        if n == 1 {
            4.0 * (1.0 + a) * (1.0 + b) / ((2.0 + a + b).powi(2) * (3.0 + a + b))
        } else {
            let n = n as f64;
            let s = 2.0 * n + a + b;
            4.0 * n * (n + a) * (n + b) * (n + a + b) / (s * s * (s + 1.0) * (s - 1.0))
        }
    }

    /// The total mass $\int_{-1}^1 (1 - x)^a (1 + x)^b \, dx$ of the weight function.
    pub fn mass(&self) -> f64 {
        let Self { a, b } = *self;
        let log_mass = (a + b + 1.0) * LN_2 + libm::lgamma(a + 1.0) + libm::lgamma(b + 1.0)
            - libm::lgamma(a + b + 2.0);
        log_mass.exp()
    }

    /// Evaluates the first `n` orthonormal polynomials at `x`.
    pub fn evaluate(&self, n: usize, x: f64) -> Vec<f64> {
        let mut values = vec![0.0; n];
        self.evaluate_into(&mut values, x);
        values
    }

    /// Evaluates the first `values.len()` orthonormal polynomials at `x` into `values`.
    pub fn evaluate_into(&self, values: &mut [f64], x: f64) {
        let n = values.len();
        if n == 0 {
            return;
        }
        values[0] = 1.0 / self.mass().sqrt();
        if n > 1 {
            values[1] = (x - self.alpha(0)) * values[0] / self.beta(1).sqrt();
        }
        for k in 1..n.saturating_sub(1) {
            values[k + 1] =
                ((x - self.alpha(k)) * values[k] - self.beta(k).sqrt() * values[k - 1]) / self.beta(k + 1).sqrt();
        }
    }

    /// Value and derivative of the orthonormal polynomial of degree `n` at `x`.
    pub fn value_and_derivative(&self, n: usize, x: f64) -> (f64, f64) {
        let mut p1 = 1.0 / self.mass().sqrt();
        let mut dp1 = 0.0;
        let mut p2 = 0.0;
        let mut dp2 = 0.0;
        for k in 0..n {
            let prev = if k > 0 { self.beta(k).sqrt() } else { 0.0 };
            let next = self.beta(k + 1).sqrt();
            let p_new = ((x - self.alpha(k)) * p1 - prev * p2) / next;
            let dp_new = ((x - self.alpha(k)) * dp1 + p1 - prev * dp2) / next;
            p2 = p1;
            dp2 = dp1;
            p1 = p_new;
            dp1 = dp_new;
        }
        (p1, dp1)
    }
}
