//! Matrix-free tangent stiffness operator for compressible hyperelasticity.
//!
//! The [`TangentOperator`] computes the action of the consistent tangent of the internal
//! forces on a vector. Its kinematic state (deformation gradient and Kirchhoff stress) is
//! evaluated on the *reference* configuration from the total displacement, while the probe
//! vector is differentiated with the shape functions of the *current* configuration. Each
//! quadrature point contributes
//!
//! ```text
//! (sym(grad v) : J c : sym(grad w) + grad v : (grad w τ)) JxW_ref
//! ```
//!
//! where `w` is the probe and `v` the test function.
use crate::allocators::DimAllocator;
use crate::cg::LinearOperator;
use crate::geometry::CellBatchGeometry;
use crate::material::ConstitutiveModel;
use crate::preconditioner::DiagonalPreconditioner;
use crate::settings::{ConstraintPolicy, ConstraintSource, OperatorSettings};
use crate::{Real, SmallDim};
use kernel::BatchWorkspace;
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut, DefaultAllocator};
use rayon::prelude::*;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::sync::Arc;

mod kernel;

/// Errors reported by [`TangentOperator`].
///
/// All of them are precondition or consistency violations. A failed call must not be retried
/// with the same state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorError {
    /// Geometries and displacement have not been bound with `initialize`.
    NotInitialized,
    /// No material has been bound with `set_material`.
    MaterialNotSet,
    /// The diagonal is required, but `compute_diagonal` has not been called.
    DiagonalNotComputed,
    /// The current and reference geometries do not describe the same cell batches.
    InconsistentGeometries(String),
    /// A vector does not have the dimension of the operator.
    DimensionMismatch { expected: usize, actual: usize },
    /// Only diagonal entries of the operator can be queried.
    Unsupported { row: usize, col: usize },
    IndexOutOfBounds { index: usize, len: usize },
}

impl Display for OperatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            OperatorError::NotInitialized => write!(f, "Operator has not been initialized with geometries"),
            OperatorError::MaterialNotSet => write!(f, "No material has been set for the operator"),
            OperatorError::DiagonalNotComputed => write!(f, "Diagonal has not been computed"),
            OperatorError::InconsistentGeometries(msg) => {
                write!(f, "Current and reference geometries are inconsistent: {}", msg)
            }
            OperatorError::DimensionMismatch { expected, actual } => {
                write!(f, "Vector has dimension {}, expected {}", actual, expected)
            }
            OperatorError::Unsupported { row, col } => {
                write!(f, "Entry ({}, {}) is not available, only diagonal entries are stored", row, col)
            }
            OperatorError::IndexOutOfBounds { index, len } => {
                write!(f, "Index {} is out of bounds for operator of dimension {}", index, len)
            }
        }
    }
}

impl Error for OperatorError {}

/// Checks that two geometries describe the same cells in the same batch layout.
pub fn check_geometry_consistency<T, D>(
    current: &CellBatchGeometry<T, D>,
    reference: &CellBatchGeometry<T, D>,
) -> Result<(), OperatorError>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    let inconsistent = |what: &str, current: usize, reference: usize| {
        Err(OperatorError::InconsistentGeometries(format!(
            "{} differ (current: {}, reference: {})",
            what, current, reference
        )))
    };

    if current.num_batches() != reference.num_batches() {
        return inconsistent("Batch counts", current.num_batches(), reference.num_batches());
    }
    if current.lanes() != reference.lanes() {
        return inconsistent("Lane counts", current.lanes(), reference.lanes());
    }
    if current.num_quadrature_points() != reference.num_quadrature_points() {
        return inconsistent(
            "Quadrature point counts",
            current.num_quadrature_points(),
            reference.num_quadrature_points(),
        );
    }
    if current.dofs_per_cell() != reference.dofs_per_cell() {
        return inconsistent("Dofs per cell", current.dofs_per_cell(), reference.dofs_per_cell());
    }
    if current.num_dofs() != reference.num_dofs() {
        return inconsistent("Dof counts", current.num_dofs(), reference.num_dofs());
    }
    for (index, (current_batch, reference_batch)) in current.batches().iter().zip(reference.batches()).enumerate() {
        if current_batch.cells() != reference_batch.cells() {
            return Err(OperatorError::InconsistentGeometries(format!(
                "Cell assignment of batch {} differs",
                index
            )));
        }
    }
    Ok(())
}

/// Everything the operator needs for an application, borrowed from the operator.
struct Bound<'s, T, D, M: ?Sized> {
    current: &'s CellBatchGeometry<T, D>,
    reference: &'s CellBatchGeometry<T, D>,
    displacement: &'s [T],
    material: &'s M,
}

impl<'s, T, D, M> Bound<'s, T, D, M>
where
    T: Real,
    D: SmallDim,
    M: ConstitutiveModel<T, D> + ?Sized,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn constrained_dofs(&self, source: ConstraintSource) -> &'s [usize] {
        match source {
            ConstraintSource::Current => self.current.constrained_dofs(),
            ConstraintSource::Reference => self.reference.constrained_dofs(),
        }
    }
}

/// Matrix-free tangent stiffness operator of a compressible hyperelastic solid.
///
/// The operator is bound to a pair of geometries, the total displacement and a material
/// once per Newton step. Geometries and material are shared through [`Arc`], so several
/// operators (e.g. on different levels of a multigrid hierarchy) may use the same objects.
/// The displacement is borrowed for the lifetime `'a` and is read on every application.
///
/// Constrained dofs are never gathered from nor scattered to during the cell loop. With
/// [`ConstraintPolicy::IdentityPassThrough`], the operator acts as the identity on them.
pub struct TangentOperator<'a, T, D, M>
where
    T: Real,
    D: SmallDim,
    M: ?Sized,
    DefaultAllocator: DimAllocator<T, D>,
{
    current: Option<Arc<CellBatchGeometry<T, D>>>,
    reference: Option<Arc<CellBatchGeometry<T, D>>>,
    displacement: Option<&'a DVector<T>>,
    material: Option<Arc<M>>,
    preconditioner: Option<DiagonalPreconditioner<T>>,
    settings: OperatorSettings<T>,
}

impl<'a, T, D, M> Default for TangentOperator<'a, T, D, M>
where
    T: Real,
    D: SmallDim,
    M: ConstitutiveModel<T, D> + ?Sized,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, T, D, M> TangentOperator<'a, T, D, M>
where
    T: Real,
    D: SmallDim,
    M: ConstitutiveModel<T, D> + ?Sized,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new() -> Self {
        Self::with_settings(OperatorSettings::default())
    }

    pub fn with_settings(settings: OperatorSettings<T>) -> Self {
        Self {
            current: None,
            reference: None,
            displacement: None,
            material: None,
            preconditioner: None,
            settings,
        }
    }

    pub fn settings(&self) -> &OperatorSettings<T> {
        &self.settings
    }

    /// Binds the geometries of the current and reference configuration and the total
    /// displacement.
    ///
    /// Fails if the geometries do not describe the same cell batches, or if the displacement
    /// does not have one entry per dof. Any previously computed diagonal is discarded.
    pub fn initialize(
        &mut self,
        current: Arc<CellBatchGeometry<T, D>>,
        reference: Arc<CellBatchGeometry<T, D>>,
        displacement: &'a DVector<T>,
    ) -> Result<(), OperatorError> {
        check_geometry_consistency(&current, &reference)?;
        if displacement.len() != current.num_dofs() {
            return Err(OperatorError::DimensionMismatch {
                expected: current.num_dofs(),
                actual: displacement.len(),
            });
        }

        debug!(
            "Initialized tangent operator with {} dofs in {} cell batches",
            current.num_dofs(),
            current.num_batches()
        );
        self.current = Some(current);
        self.reference = Some(reference);
        self.displacement = Some(displacement);
        self.preconditioner = None;
        Ok(())
    }

    pub fn set_material(&mut self, material: Arc<M>) {
        self.material = Some(material);
    }

    /// Releases geometries, displacement, material and the cached diagonal.
    pub fn clear(&mut self) {
        self.current = None;
        self.reference = None;
        self.displacement = None;
        self.material = None;
        self.preconditioner = None;
    }

    /// Number of rows, i.e. the dof count of the current geometry, or zero when unbound.
    pub fn nrows(&self) -> usize {
        self.current
            .as_ref()
            .map(|geometry| geometry.num_dofs())
            .unwrap_or(0)
    }

    pub fn ncols(&self) -> usize {
        self.nrows()
    }

    pub fn current_geometry(&self) -> Option<&Arc<CellBatchGeometry<T, D>>> {
        self.current.as_ref()
    }

    pub fn reference_geometry(&self) -> Option<&Arc<CellBatchGeometry<T, D>>> {
        self.reference.as_ref()
    }

    /// The diagonal computed by the last call to [`compute_diagonal`](Self::compute_diagonal).
    pub fn diagonal(&self) -> Option<&DVector<T>> {
        self.preconditioner.as_ref().map(|p| p.diagonal())
    }

    pub fn inverse_diagonal(&self) -> Option<&DVector<T>> {
        self.preconditioner
            .as_ref()
            .map(|p| p.inverse_diagonal())
    }

    pub fn preconditioner(&self) -> Option<&DiagonalPreconditioner<T>> {
        self.preconditioner.as_ref()
    }

    fn bound(&self) -> Result<Bound<'_, T, D, M>, OperatorError> {
        let (current, reference, displacement) = match (&self.current, &self.reference, self.displacement) {
            (Some(current), Some(reference), Some(displacement)) => (current, reference, displacement),
            _ => return Err(OperatorError::NotInitialized),
        };
        let material = self
            .material
            .as_deref()
            .ok_or(OperatorError::MaterialNotSet)?;

        if current.num_batches() != reference.num_batches() {
            return Err(OperatorError::InconsistentGeometries(format!(
                "Batch counts differ (current: {}, reference: {})",
                current.num_batches(),
                reference.num_batches()
            )));
        }

        Ok(Bound {
            current,
            reference,
            displacement: displacement.as_slice(),
            material,
        })
    }

    fn check_dimension(&self, actual: usize) -> Result<(), OperatorError> {
        let expected = self.nrows();
        if actual != expected {
            return Err(OperatorError::DimensionMismatch { expected, actual });
        }
        Ok(())
    }

    /// Computes `dst = A src`.
    pub fn apply<'x, 'y>(
        &self,
        dst: impl Into<DVectorViewMut<'x, T>>,
        src: impl Into<DVectorView<'y, T>>,
    ) -> Result<(), OperatorError> {
        let mut dst = dst.into();
        let src = src.into();
        let bound = self.bound()?;
        self.check_dimension(dst.len())?;
        self.check_dimension(src.len())?;

        dst.fill(T::zero());
        self.apply_add_bound(&bound, dst.as_mut_slice(), src.as_slice());
        Ok(())
    }

    /// Computes `dst = dst + A src`.
    pub fn apply_add<'x, 'y>(
        &self,
        dst: impl Into<DVectorViewMut<'x, T>>,
        src: impl Into<DVectorView<'y, T>>,
    ) -> Result<(), OperatorError> {
        let mut dst = dst.into();
        let src = src.into();
        let bound = self.bound()?;
        self.check_dimension(dst.len())?;
        self.check_dimension(src.len())?;

        self.apply_add_bound(&bound, dst.as_mut_slice(), src.as_slice());
        Ok(())
    }

    /// Computes `dst = Aᵀ src`, which equals `A src` since the tangent is self-adjoint.
    pub fn transpose_apply<'x, 'y>(
        &self,
        dst: impl Into<DVectorViewMut<'x, T>>,
        src: impl Into<DVectorView<'y, T>>,
    ) -> Result<(), OperatorError> {
        self.apply(dst, src)
    }

    /// Computes `dst = dst + Aᵀ src`, which equals `dst + A src` since the tangent is
    /// self-adjoint.
    pub fn transpose_apply_add<'x, 'y>(
        &self,
        dst: impl Into<DVectorViewMut<'x, T>>,
        src: impl Into<DVectorView<'y, T>>,
    ) -> Result<(), OperatorError> {
        self.apply_add(dst, src)
    }

    fn apply_add_bound(&self, bound: &Bound<T, D, M>, dst: &mut [T], src: &[T]) {
        let current = bound.current;
        let tolerance = self.settings.weight_tolerance;

        if self.settings.parallel {
            // Batches are evaluated concurrently into separate buffers, but accumulated in
            // batch order, so the result does not depend on scheduling.
            let local_results: Vec<(Vec<T>, Vec<T>)> = (0..current.num_batches())
                .into_par_iter()
                .map_init(
                    || BatchWorkspace::new(bound.current, bound.reference),
                    |workspace, batch| {
                        workspace.apply_batch(batch, src, bound.displacement, bound.material, tolerance);
                        (
                            workspace.gradient_test.dof_values().to_vec(),
                            workspace.symmetric_gradient_test.dof_values().to_vec(),
                        )
                    },
                )
                .collect();

            for (batch, (gradient_local, symmetric_local)) in local_results.iter().enumerate() {
                current.distribute_local_to_global(batch, gradient_local, dst);
                current.distribute_local_to_global(batch, symmetric_local, dst);
            }
        } else {
            let mut workspace = BatchWorkspace::new(bound.current, bound.reference);
            for batch in 0..current.num_batches() {
                workspace.apply_batch(batch, src, bound.displacement, bound.material, tolerance);
                workspace
                    .gradient_test
                    .distribute_local_to_global(dst);
                workspace
                    .symmetric_gradient_test
                    .distribute_local_to_global(dst);
            }
        }

        match self.settings.constraint_policy {
            ConstraintPolicy::IdentityPassThrough => {
                for &dof in bound.constrained_dofs(self.settings.constraint_source) {
                    dst[dof] += src[dof];
                }
            }
            ConstraintPolicy::Skip => {}
        }
    }

    /// Extracts the diagonal of the operator and its guarded inverse.
    ///
    /// Every local dof of every cell is probed with a unit vector, and the diagonal entry of
    /// the local tangent is accumulated into the global diagonal. Contributions that couple
    /// different dofs through constraints are ignored. Diagonal entries of constrained dofs
    /// are set to one.
    ///
    /// The result replaces any previously computed diagonal.
    pub fn compute_diagonal(&mut self) -> Result<(), OperatorError> {
        let bound = self.bound()?;
        let current = bound.current;
        let tolerance = self.settings.weight_tolerance;
        let mut diagonal = DVector::zeros(current.num_dofs());

        if self.settings.parallel {
            let local_diagonals: Vec<Vec<T>> = (0..current.num_batches())
                .into_par_iter()
                .map_init(
                    || BatchWorkspace::new(bound.current, bound.reference),
                    |workspace, batch| {
                        workspace.diagonal_batch(batch, bound.displacement, bound.material, tolerance);
                        workspace.diagonal.clone()
                    },
                )
                .collect();

            for (batch, local_diagonal) in local_diagonals.iter().enumerate() {
                current.distribute_local_to_global(batch, local_diagonal, diagonal.as_mut_slice());
            }
        } else {
            let mut workspace = BatchWorkspace::new(bound.current, bound.reference);
            for batch in 0..current.num_batches() {
                workspace.diagonal_batch(batch, bound.displacement, bound.material, tolerance);
                current.distribute_local_to_global(batch, &workspace.diagonal, diagonal.as_mut_slice());
            }
        }

        let constrained_dofs = bound.constrained_dofs(self.settings.constraint_source);
        let preconditioner = DiagonalPreconditioner::from_diagonal(diagonal, constrained_dofs);
        debug!(
            "Computed operator diagonal with {} entries ({} constrained)",
            preconditioner.len(),
            constrained_dofs.len()
        );
        self.preconditioner = Some(preconditioner);
        Ok(())
    }

    /// Computes `dst = omega * D^-1 src` with the inverse diagonal from
    /// [`compute_diagonal`](Self::compute_diagonal).
    pub fn apply_jacobi<'x, 'y>(
        &self,
        dst: impl Into<DVectorViewMut<'x, T>>,
        src: impl Into<DVectorView<'y, T>>,
        omega: T,
    ) -> Result<(), OperatorError> {
        self.preconditioner
            .as_ref()
            .ok_or(OperatorError::DiagonalNotComputed)?
            .apply_jacobi(dst, src, omega)
    }

    /// Returns the entry at `(row, col)`, which is only available on the diagonal and only
    /// after the diagonal has been computed.
    pub fn element(&self, row: usize, col: usize) -> Result<T, OperatorError> {
        if row != col {
            return Err(OperatorError::Unsupported { row, col });
        }
        let diagonal = self.diagonal().ok_or(OperatorError::DiagonalNotComputed)?;
        diagonal
            .get(row)
            .copied()
            .ok_or(OperatorError::IndexOutOfBounds {
                index: row,
                len: diagonal.len(),
            })
    }
}

impl<'a, T, D, M> LinearOperator<T> for TangentOperator<'a, T, D, M>
where
    T: Real,
    D: SmallDim,
    M: ConstitutiveModel<T, D> + ?Sized,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        Ok(TangentOperator::apply(self, y, x)?)
    }

    fn apply_add(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        Ok(TangentOperator::apply_add(self, y, x)?)
    }

    fn transpose_apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        Ok(TangentOperator::transpose_apply(self, y, x)?)
    }

    fn transpose_apply_add(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        Ok(TangentOperator::transpose_apply_add(self, y, x)?)
    }
}
