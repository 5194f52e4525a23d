//! Fields and the distributor that owns them.
//!
//! Fields live in an arena owned by [`Distributor`] and are referred to by [`FieldId`] handles.
//! Every assignment of data bumps the field's version, while layout conversions between grid
//! and coefficient space do not.
use crate::basis::{BallBasis, Domain};
use crate::coords::{SphericalCoordinates, TensorSignature};
use crate::error::NccError;
use crate::transform::{backward, check_coeff_shape, forward, CoeffData, GridData};
use nalgebra::DMatrix;
use num::complex::Complex64;
use std::borrow::Cow;
use std::sync::Arc;

/// Handle to a field owned by a [`Distributor`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(usize);

impl FieldId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Which representation of a field is authoritative.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Layout {
    Grid,
    Coeff,
}

#[derive(Debug, Clone)]
enum FieldData {
    Grid(GridData),
    Coeff(CoeffData),
}

/// Location of a grid point in physical space.
///
/// For fields on the radial domain, only `r` is meaningful and both angles are zero.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct GridPoint {
    pub phi: f64,
    pub theta: f64,
    pub r: f64,
}

impl GridPoint {
    /// Cartesian coordinates `(x, y, z)` of the point.
    pub fn cartesian(&self) -> [f64; 3] {
        let Self { phi, theta, r } = *self;
        [r * theta.sin() * phi.cos(), r * theta.sin() * phi.sin(), r * theta.cos()]
    }
}

#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    basis: Arc<BallBasis>,
    domain: Domain,
    tensorsig: TensorSignature,
    data: FieldData,
    version: u64,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn basis(&self) -> &Arc<BallBasis> {
        &self.basis
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn tensorsig(&self) -> &TensorSignature {
        &self.tensorsig
    }

    pub fn rank(&self) -> usize {
        self.tensorsig.rank()
    }

    pub fn layout(&self) -> Layout {
        match self.data {
            FieldData::Grid(_) => Layout::Grid,
            FieldData::Coeff(_) => Layout::Coeff,
        }
    }

    /// Number of times data has been assigned to the field.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Owner of all fields.
#[derive(Debug)]
pub struct Distributor {
    coords: Arc<SphericalCoordinates>,
    fields: Vec<Field>,
}

impl Distributor {
    pub fn new(coords: &Arc<SphericalCoordinates>) -> Self {
        Self {
            coords: Arc::clone(coords),
            fields: Vec::new(),
        }
    }

    pub fn coords(&self) -> &Arc<SphericalCoordinates> {
        &self.coords
    }

    /// Creates a zero-valued field in grid layout.
    pub fn new_field(
        &mut self,
        name: &str,
        basis: &Arc<BallBasis>,
        domain: Domain,
        tensorsig: TensorSignature,
    ) -> Result<FieldId, NccError> {
        if basis.coords() != &self.coords {
            return Err(NccError::configuration(format!(
                "Basis of field '{name}' is not defined on the coordinates of the distributor"
            )));
        }
        if tensorsig.indices().iter().any(|cs| cs != &self.coords) {
            return Err(NccError::configuration(format!(
                "Tensor signature of field '{name}' refers to foreign coordinates"
            )));
        }
        let grid = DMatrix::zeros(tensorsig.num_components(), basis.num_grid_points(domain));
        Ok(self.push(Field {
            name: name.to_string(),
            basis: Arc::clone(basis),
            domain,
            tensorsig,
            data: FieldData::Grid(grid),
            version: 0,
        }))
    }

    pub(crate) fn insert_coeff_field(
        &mut self,
        name: &str,
        basis: &Arc<BallBasis>,
        domain: Domain,
        tensorsig: TensorSignature,
        coeffs: CoeffData,
    ) -> FieldId {
        self.push(Field {
            name: name.to_string(),
            basis: Arc::clone(basis),
            domain,
            tensorsig,
            data: FieldData::Coeff(coeffs),
            version: 1,
        })
    }

    pub(crate) fn insert_grid_field(
        &mut self,
        name: &str,
        basis: &Arc<BallBasis>,
        domain: Domain,
        tensorsig: TensorSignature,
        grid: GridData,
    ) -> FieldId {
        self.push(Field {
            name: name.to_string(),
            basis: Arc::clone(basis),
            domain,
            tensorsig,
            data: FieldData::Grid(grid),
            version: 1,
        })
    }

    fn push(&mut self, field: Field) -> FieldId {
        self.fields.push(field);
        FieldId(self.fields.len() - 1)
    }

    /// Returns the field with the given handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle was not created by this distributor.
    pub fn field(&self, id: FieldId) -> &Field {
        &self.fields[id.0]
    }

    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    pub fn version(&self, id: FieldId) -> u64 {
        self.field(id).version
    }

    /// Assigns grid values, making the grid layout authoritative.
    pub fn set_grid(&mut self, id: FieldId, grid: GridData) -> Result<(), NccError> {
        let field = &mut self.fields[id.0];
        let expected = (field.tensorsig.num_components(), field.basis.num_grid_points(field.domain));
        if grid.shape() != expected {
            return Err(NccError::configuration(format!(
                "Grid data of shape {:?} assigned to field '{}' (expected {expected:?})",
                grid.shape(),
                field.name
            )));
        }
        field.data = FieldData::Grid(grid);
        field.version += 1;
        Ok(())
    }

    /// Assigns grid values computed pointwise.
    ///
    /// The closure receives the grid point and a buffer holding one entry per tensor component,
    /// ordered by row-major `(phi, theta, r)` multi-index.
    pub fn set_grid_from_fn(
        &mut self,
        id: FieldId,
        mut f: impl FnMut(GridPoint, &mut [Complex64]),
    ) -> Result<(), NccError> {
        let field = self.field(id);
        let basis = Arc::clone(&field.basis);
        let num_components = field.tensorsig.num_components();
        let mut grid = DMatrix::zeros(num_components, basis.num_grid_points(field.domain));
        let mut buffer = vec![Complex64::new(0.0, 0.0); num_components];
        let r = basis.grid_r();

        match field.domain {
            Domain::Ball => {
                let theta = basis.grid_theta();
                for (j, &phi) in basis.grid_phi().iter().enumerate() {
                    for (i, &theta) in theta.iter().enumerate() {
                        for (k, &r) in r.iter().enumerate() {
                            buffer.fill(Complex64::new(0.0, 0.0));
                            f(GridPoint { phi, theta, r }, &mut buffer);
                            grid.column_mut(basis.grid_index(j, i, k))
                                .copy_from_slice(&buffer);
                        }
                    }
                }
            }
            Domain::Radial => {
                for (k, &r) in r.iter().enumerate() {
                    buffer.fill(Complex64::new(0.0, 0.0));
                    f(GridPoint { phi: 0.0, theta: 0.0, r }, &mut buffer);
                    grid.column_mut(k).copy_from_slice(&buffer);
                }
            }
        }
        self.set_grid(id, grid)
    }

    /// Assigns spectral coefficients, making the coefficient layout authoritative.
    pub fn set_coeffs(&mut self, id: FieldId, coeffs: CoeffData) -> Result<(), NccError> {
        let field = &mut self.fields[id.0];
        check_coeff_shape(&field.basis, field.domain, field.rank(), &coeffs)?;
        field.data = FieldData::Coeff(coeffs);
        field.version += 1;
        Ok(())
    }

    /// Converts the field to the requested layout in place. The version is unchanged.
    pub fn change_layout(&mut self, id: FieldId, layout: Layout) -> Result<(), NccError> {
        let field = &mut self.fields[id.0];
        let converted = match (&field.data, layout) {
            (FieldData::Grid(grid), Layout::Coeff) => {
                FieldData::Coeff(forward(&field.basis, field.domain, field.rank(), grid)?)
            }
            (FieldData::Coeff(coeffs), Layout::Grid) => {
                FieldData::Grid(backward(&field.basis, field.domain, field.rank(), coeffs)?)
            }
            _ => return Ok(()),
        };
        field.data = converted;
        Ok(())
    }

    /// Grid values of the field, converting it to grid layout first.
    pub fn grid_values(&mut self, id: FieldId) -> Result<&GridData, NccError> {
        self.change_layout(id, Layout::Grid)?;
        match &self.fields[id.0].data {
            FieldData::Grid(grid) => Ok(grid),
            FieldData::Coeff(_) => Err(NccError::configuration("Field is not in grid layout")),
        }
    }

    /// Coefficients of the field, converting it to coefficient layout first.
    pub fn coeff_values(&mut self, id: FieldId) -> Result<&CoeffData, NccError> {
        self.change_layout(id, Layout::Coeff)?;
        match &self.fields[id.0].data {
            FieldData::Coeff(coeffs) => Ok(coeffs),
            FieldData::Grid(_) => Err(NccError::configuration("Field is not in coefficient layout")),
        }
    }

    /// Grid values without changing the field's layout.
    pub fn grid_snapshot(&self, id: FieldId) -> Result<Cow<'_, GridData>, NccError> {
        let field = self.field(id);
        match &field.data {
            FieldData::Grid(grid) => Ok(Cow::Borrowed(grid)),
            FieldData::Coeff(coeffs) => Ok(Cow::Owned(backward(
                &field.basis,
                field.domain,
                field.rank(),
                coeffs,
            )?)),
        }
    }

    /// Coefficients without changing the field's layout.
    pub fn coeff_snapshot(&self, id: FieldId) -> Result<Cow<'_, CoeffData>, NccError> {
        let field = self.field(id);
        match &field.data {
            FieldData::Coeff(coeffs) => Ok(Cow::Borrowed(coeffs)),
            FieldData::Grid(grid) => Ok(Cow::Owned(forward(&field.basis, field.domain, field.rank(), grid)?)),
        }
    }
}
