//! Evaluation of vector-valued fields at the quadrature points of a cell batch.
use crate::allocators::DimAllocator;
use crate::geometry::CellBatchGeometry;
use crate::kinematics::symmetric_part;
use crate::{Real, SmallDim};
use nalgebra::{DefaultAllocator, OMatrix, OVector};

/// Evaluates a vector-valued finite element field, with one component per spatial dimension,
/// on all lanes of a cell batch.
///
/// The evaluator follows the usual matrix-free cycle:
///
/// 1. [`reinit`](Self::reinit) binds it to a batch,
/// 2. [`read_dof_values`](Self::read_dof_values) gathers local dof values,
/// 3. [`evaluate_gradients`](Self::evaluate_gradients) computes gradients at quadrature points,
/// 4. `submit_*` stores a tensor per quadrature point to be tested with shape function gradients,
/// 5. [`integrate`](Self::integrate) turns the submissions into local dof values,
/// 6. [`distribute_local_to_global`](Self::distribute_local_to_global) scatter-adds them.
///
/// Local dof values are stored lane-major, `[lane * dofs_per_cell + D * node + component]`.
#[derive(Debug)]
pub struct CellEvaluator<'g, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    geometry: &'g CellBatchGeometry<T, D>,
    batch: usize,
    dof_values: Vec<T>,
    /// Gradients, `[q * lanes + lane]`.
    gradients: Vec<OMatrix<T, D, D>>,
    /// Submitted values already multiplied by the integration weight, `[q * lanes + lane]`.
    submissions: Vec<OMatrix<T, D, D>>,
}

impl<'g, T, D> CellEvaluator<'g, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Creates an evaluator bound to the first batch of the geometry.
    pub fn new(geometry: &'g CellBatchGeometry<T, D>) -> Self {
        let num_points = geometry.num_quadrature_points() * geometry.lanes();
        Self {
            geometry,
            batch: 0,
            dof_values: vec![T::zero(); geometry.lanes() * geometry.dofs_per_cell()],
            gradients: vec![OMatrix::<T, D, D>::zeros(); num_points],
            submissions: vec![OMatrix::<T, D, D>::zeros(); num_points],
        }
    }

    pub fn geometry(&self) -> &'g CellBatchGeometry<T, D> {
        self.geometry
    }

    /// Binds the evaluator to the given batch.
    ///
    /// Local dof values, gradients and submissions are reset to zero.
    pub fn reinit(&mut self, batch: usize) {
        assert!(batch < self.geometry.num_batches(), "Batch index out of bounds");
        self.batch = batch;
        self.dof_values.fill(T::zero());
        self.gradients.fill(OMatrix::<T, D, D>::zeros());
        self.submissions.fill(OMatrix::<T, D, D>::zeros());
    }

    pub fn batch(&self) -> usize {
        self.batch
    }

    pub fn lanes(&self) -> usize {
        self.geometry.lanes()
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.geometry.dofs_per_cell()
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.geometry.num_quadrature_points()
    }

    /// Gathers local dof values from a global dof vector, reading constrained dofs as zero.
    pub fn read_dof_values(&mut self, src: &[T]) {
        self.geometry
            .read_dof_values(self.batch, src, &mut self.dof_values);
    }

    /// Gathers local dof values from a global dof vector, including constrained dofs.
    pub fn read_dof_values_plain(&mut self, src: &[T]) {
        self.geometry
            .read_dof_values_plain(self.batch, src, &mut self.dof_values);
    }

    pub fn dof_values(&self) -> &[T] {
        &self.dof_values
    }

    pub fn dof_values_mut(&mut self) -> &mut [T] {
        &mut self.dof_values
    }

    /// Computes gradients `G_ij = sum_I u_Ii (grad phi_I)_j` at every quadrature point and lane.
    pub fn evaluate_gradients(&mut self) {
        let d = D::dim();
        let lanes = self.lanes();
        let nodes_per_cell = self.geometry.nodes_per_cell();
        let dofs_per_cell = self.dofs_per_cell();

        for q in 0..self.num_quadrature_points() {
            for lane in 0..lanes {
                let lane_values = &self.dof_values[lane * dofs_per_cell..(lane + 1) * dofs_per_cell];
                let gradient = &mut self.gradients[q * lanes + lane];
                gradient.fill(T::zero());
                for node in 0..nodes_per_cell {
                    let u_node = OVector::<T, D>::from_fn(|i, _| lane_values[d * node + i]);
                    let grad_phi = self.geometry.shape_gradient(self.batch, q, lane, node);
                    gradient.ger(T::one(), &u_node, &grad_phi, T::one());
                }
            }
        }
    }

    pub fn gradient(&self, q: usize, lane: usize) -> &OMatrix<T, D, D> {
        &self.gradients[q * self.lanes() + lane]
    }

    pub fn symmetric_gradient(&self, q: usize, lane: usize) -> OMatrix<T, D, D> {
        symmetric_part(self.gradient(q, lane))
    }

    pub fn jxw(&self, q: usize, lane: usize) -> T {
        self.geometry.jxw(self.batch, q, lane)
    }

    /// Submits a value to be tested with the gradients of the test functions.
    ///
    /// The value is multiplied by the integration weight of the quadrature point.
    pub fn submit_gradient(&mut self, value: OMatrix<T, D, D>, q: usize, lane: usize) {
        let jxw = self.jxw(q, lane);
        let index = q * self.lanes() + lane;
        self.submissions[index] = value * jxw;
    }

    /// Submits a value to be tested with the symmetric gradients of the test functions.
    ///
    /// Only the symmetric part of the value contributes, since `S : sym(grad v) = sym(S) : grad v`.
    pub fn submit_symmetric_gradient(&mut self, value: OMatrix<T, D, D>, q: usize, lane: usize) {
        self.submit_gradient(symmetric_part(&value), q, lane);
    }

    /// Tests the submitted values with the shape function gradients and sums over quadrature
    /// points, overwriting the local dof values with `sum_q (S_q grad phi_I)_i`.
    pub fn integrate(&mut self) {
        let d = D::dim();
        let lanes = self.lanes();
        let nodes_per_cell = self.geometry.nodes_per_cell();
        let dofs_per_cell = self.dofs_per_cell();

        self.dof_values.fill(T::zero());
        for q in 0..self.num_quadrature_points() {
            for lane in 0..lanes {
                let submission = &self.submissions[q * lanes + lane];
                for node in 0..nodes_per_cell {
                    let grad_phi = self.geometry.shape_gradient(self.batch, q, lane, node);
                    let contribution = submission * grad_phi;
                    let offset = lane * dofs_per_cell + d * node;
                    for i in 0..d {
                        self.dof_values[offset + i] += contribution[i];
                    }
                }
            }
        }
    }

    /// Scatter-adds the local dof values into a global dof vector, skipping constrained dofs
    /// and padding lanes.
    pub fn distribute_local_to_global(&self, dst: &mut [T]) {
        self.geometry
            .distribute_local_to_global(self.batch, &self.dof_values, dst);
    }
}
