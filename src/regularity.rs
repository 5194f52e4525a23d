//! Regularity components of tensor fields in the ball.
//!
//! At degree `ell`, the spin components of a smooth rank-`R` tensor field are coupled through
//! the origin. Recombining them with the orthogonal intertwiner `Q(R, ell)` yields *regularity
//! components*, indexed by tuples `kappa` in `{-1, 0, +1}^R`, each of which behaves like a
//! scalar with effective degree `lambda = ell + sum(kappa)` and can be expanded in
//! `r^lambda P_n(2 r^2 - 1)`.
use crate::coords::num_components;
use crate::spin::decode_tuple;
use nalgebra::DMatrix;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::{Arc, OnceLock};

/// Clebsch-Gordan coefficient $\langle j_1 m_1; 1 m_2 | J, m_1 + m_2 \rangle$ for coupling with
/// angular momentum one.
pub fn clebsch_gordan_one(j1: i64, m1: i64, m2: i64, j: i64) -> f64 {
    let big_m = m1 + m2;
    if j < 0 || m1.abs() > j1 || big_m.abs() > j {
        return 0.0;
    }
    let (j1f, mf) = (j1 as f64, big_m as f64);

    if j == j1 + 1 {
        let d = (2.0 * j1f + 1.0) * (2.0 * j1f + 2.0);
        match m2 {
            1 => ((j1f + mf) * (j1f + mf + 1.0) / d).sqrt(),
            0 => ((j1f - mf + 1.0) * (j1f + mf + 1.0) / ((2.0 * j1f + 1.0) * (j1f + 1.0))).sqrt(),
            _ => ((j1f - mf) * (j1f - mf + 1.0) / d).sqrt(),
        }
    } else if j == j1 && j1 > 0 {
        let d = 2.0 * j1f * (j1f + 1.0);
        match m2 {
            1 => -((j1f + mf) * (j1f - mf + 1.0) / d).sqrt(),
            0 => mf / (j1f * (j1f + 1.0)).sqrt(),
            _ => ((j1f - mf) * (j1f + mf + 1.0) / d).sqrt(),
        }
    } else if j == j1 - 1 && j1 > 0 {
        let d = 2.0 * j1f * (2.0 * j1f + 1.0);
        match m2 {
            1 => ((j1f - mf) * (j1f - mf + 1.0) / d).sqrt(),
            0 => -((j1f - mf) * (j1f + mf) / (j1f * (2.0 * j1f + 1.0))).sqrt(),
            _ => ((j1f + mf + 1.0) * (j1f + mf) / d).sqrt(),
        }
    } else {
        0.0
    }
}

/// Effective radial degree of the regularity component `kappa` at degree `ell`.
pub fn effective_degree(ell: usize, kappa: &[i32]) -> i64 {
    ell as i64 + kappa.iter().map(|&k| k as i64).sum::<i64>()
}

/// Whether the regularity tuple `kappa` exists at degree `ell`.
///
/// Starting from `lambda`, every index lowers the running degree by `kappa_i`. The degree must
/// stay non-negative, and a scalar (degree zero) cannot couple with a vector to degree zero.
pub fn is_valid(ell: usize, kappa: &[i32]) -> bool {
    let mut j = effective_degree(ell, kappa);
    if j < 0 {
        return false;
    }
    for &k in kappa {
        let next = j - k as i64;
        if next < 0 || (j == 0 && next == 0) {
            return false;
        }
        j = next;
    }
    true
}

/// A regularity component valid at a given degree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegularityComponent {
    /// Flat index of the tuple `kappa`.
    pub index: usize,
    /// Effective radial degree `ell + sum(kappa)`.
    pub lambda: usize,
}

/// Valid regularity components of rank `rank` at degree `ell`, in ascending flat order.
pub fn regularity_components(rank: usize, ell: usize) -> Vec<RegularityComponent> {
    (0..num_components(rank))
        .filter_map(|index| {
            let kappa = decode_tuple(index, rank);
            is_valid(ell, &kappa).then(|| RegularityComponent {
                index,
                lambda: effective_degree(ell, &kappa) as usize,
            })
        })
        .collect()
}

fn build_intertwiner(rank: usize, ell: usize) -> DMatrix<f64> {
    let n = num_components(rank);
    let mut q = DMatrix::zeros(n, n);
    for component in regularity_components(rank, ell) {
        let kappa = decode_tuple(component.index, rank);
        for t in 0..n {
            let spins = decode_tuple(t, rank);
            let mut j = component.lambda as i64;
            let mut sigma = 0;
            let mut value = 1.0;
            for (&k, &s) in kappa.iter().zip(&spins) {
                let next = j - k as i64;
                value *= clebsch_gordan_one(j, sigma, s as i64, next);
                sigma += s as i64;
                j = next;
                if s == 1 {
                    value = -value;
                }
            }
            q[(t, component.index)] = value;
        }

        let mut column = q.column_mut(component.index);
        let norm = column.norm();
        if norm > 0.0 {
            column /= norm;
        }
    }
    q
}

fn intertwiner_cache() -> &'static RwLock<FxHashMap<(usize, usize), Arc<DMatrix<f64>>>> {
    static CACHE: OnceLock<RwLock<FxHashMap<(usize, usize), Arc<DMatrix<f64>>>>> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// The intertwiner `Q(rank, ell)` between spin and regularity components.
///
/// Rows are indexed by spin tuples and columns by regularity tuples. Columns of regularity
/// tuples that are invalid at `ell` are zero; the remaining columns are orthonormal, and span
/// exactly the spin tuples with `|sum(s)| <= ell`.
pub fn intertwiner(rank: usize, ell: usize) -> Arc<DMatrix<f64>> {
    if let Some(q) = intertwiner_cache().read().get(&(rank, ell)) {
        return Arc::clone(q);
    }
    let q = Arc::new(build_intertwiner(rank, ell));
    let mut cache = intertwiner_cache().write();
    Arc::clone(cache.entry((rank, ell)).or_insert(q))
}
