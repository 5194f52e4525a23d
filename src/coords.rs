//! Coordinate systems and tensor signatures.
use std::sync::Arc;

/// Spherical coordinates with the coordinate order `(phi, theta, r)`.
///
/// Tensor components are always indexed in this order: index `0` is the azimuthal component,
/// `1` the colatitudinal and `2` the radial component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SphericalCoordinates {
    names: [String; 3],
}

impl SphericalCoordinates {
    pub fn new(azimuth: &str, colatitude: &str, radius: &str) -> Arc<Self> {
        Arc::new(Self {
            names: [azimuth.to_string(), colatitude.to_string(), radius.to_string()],
        })
    }

    pub fn dim(&self) -> usize {
        3
    }

    pub fn names(&self) -> &[String; 3] {
        &self.names
    }
}

/// Ordered sequence of coordinate systems, one per tensor index.
///
/// The empty signature describes a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TensorSignature {
    indices: Vec<Arc<SphericalCoordinates>>,
}

impl TensorSignature {
    pub fn scalar() -> Self {
        Self::default()
    }

    pub fn new(indices: Vec<Arc<SphericalCoordinates>>) -> Self {
        Self { indices }
    }

    /// A signature of the given rank with every index in `coords`.
    pub fn uniform(coords: &Arc<SphericalCoordinates>, rank: usize) -> Self {
        Self {
            indices: vec![Arc::clone(coords); rank],
        }
    }

    pub fn rank(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[Arc<SphericalCoordinates>] {
        &self.indices
    }

    pub fn num_components(&self) -> usize {
        num_components(self.rank())
    }
}

/// Number of components of a rank-`rank` tensor over three-dimensional space.
pub fn num_components(rank: usize) -> usize {
    3usize.pow(rank as u32)
}

/// Row-major multi-index, with entries in `0..3`, of a flat component index.
pub fn multi_index(mut flat: usize, rank: usize) -> Vec<usize> {
    let mut index = vec![0; rank];
    for slot in index.iter_mut().rev() {
        *slot = flat % 3;
        flat /= 3;
    }
    index
}
