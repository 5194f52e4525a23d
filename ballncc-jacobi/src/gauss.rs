//! Gauss-Jacobi quadrature.

use crate::operators::jacobi_matrix;
use crate::{Error, JacobiFamily, Rule};
use log::trace;
use nalgebra::SymmetricEigen;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, OnceLock};

const MAX_NEWTON_ITERATIONS: usize = 4;

/// Gauss quadrature for the weight $(1 - x)^a (1 + x)^b$ on `[-1, 1]`.
///
/// Returns the rule with `num_points` points, sorted by ascending point. Given `n` points, the
/// rule integrates $w(x) q(x)$ exactly for polynomials $q$ of degree up to `2 n - 1`.
///
/// The points are the eigenvalues of the symmetric Jacobi matrix (Golub-Welsch), polished by a
/// few Newton steps on the recurrence. The weights are computed from the Christoffel function
/// $w_i = 1 / \sum_k \hat P_k(x_i)^2$, which does not depend on eigenvector accuracy.
pub fn gauss_jacobi(family: &JacobiFamily, num_points: usize) -> Result<Rule, Error> {
    let n = num_points;
    if n == 0 {
        return Err(Error::NoRuleAvailable);
    }

    let eigen = SymmetricEigen::new(jacobi_matrix(family, n));
    let mut points: Vec<f64> = eigen.eigenvalues.iter().copied().collect();
    points.sort_by(|x, y| x.total_cmp(y));

    for x in &mut points {
        for _ in 0..MAX_NEWTON_ITERATIONS {
            let (p, dp) = family.value_and_derivative(n, *x);
            if dp == 0.0 {
                break;
            }
            let dx = -p / dp;
            *x += dx;
            if dx.abs() <= 1e-15 {
                break;
            }
        }
    }

    let mut buffer = vec![0.0; n];
    let weights = points
        .iter()
        .map(|&x| {
            family.evaluate_into(&mut buffer, x);
            1.0 / buffer.iter().map(|p| p * p).sum::<f64>()
        })
        .collect();

    Ok((weights, points))
}

type RuleKey = (u64, u64, usize);

fn rule_cache() -> &'static RwLock<FxHashMap<RuleKey, Arc<Rule>>> {
    static CACHE: OnceLock<RwLock<FxHashMap<RuleKey, Arc<Rule>>>> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Same as [`gauss_jacobi`], but the rule is computed at most once per process for each
/// `(family, num_points)` and shared afterwards.
pub fn cached_gauss_jacobi(family: &JacobiFamily, num_points: usize) -> Result<Arc<Rule>, Error> {
    let key = (family.a().to_bits(), family.b().to_bits(), num_points);
    if let Some(rule) = rule_cache().read().get(&key) {
        return Ok(Arc::clone(rule));
    }

    let rule = Arc::new(gauss_jacobi(family, num_points)?);
    trace!(
        "Computed Gauss-Jacobi rule (a = {}, b = {}) with {} points",
        family.a(),
        family.b(),
        num_points
    );
    let mut cache = rule_cache().write();
    Ok(Arc::clone(cache.entry(key).or_insert(rule)))
}
