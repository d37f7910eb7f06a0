//! Quadrature-point kernel of the tangent operator, evaluated one cell batch at a time.
use crate::allocators::DimAllocator;
use crate::evaluator::CellEvaluator;
use crate::geometry::CellBatchGeometry;
use crate::kinematics::{geometric_stress, weight_scale, QuadratureSample};
use crate::material::ConstitutiveModel;
use crate::{Real, SmallDim};
use nalgebra::DefaultAllocator;

/// Per-thread buffers for evaluating the kernel on a cell batch.
///
/// The two current-configuration evaluators hold the same probe but are integrated
/// separately: `gradient_test` receives the geometric stiffness and is tested with full
/// gradients, `symmetric_gradient_test` receives the material stiffness and is tested with
/// symmetric gradients.
pub(crate) struct BatchWorkspace<'g, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub gradient_test: CellEvaluator<'g, T, D>,
    pub symmetric_gradient_test: CellEvaluator<'g, T, D>,
    reference: CellEvaluator<'g, T, D>,
    /// Reference state of the current batch, `[q * lanes + lane]`.
    samples: Vec<QuadratureSample<T, D>>,
    /// Local diagonal of the current batch, lane-major.
    pub diagonal: Vec<T>,
}

impl<'g, T, D> BatchWorkspace<'g, T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub fn new(current: &'g CellBatchGeometry<T, D>, reference: &'g CellBatchGeometry<T, D>) -> Self {
        Self {
            gradient_test: CellEvaluator::new(current),
            symmetric_gradient_test: CellEvaluator::new(current),
            reference: CellEvaluator::new(reference),
            samples: Vec::with_capacity(current.num_quadrature_points() * current.lanes()),
            diagonal: vec![T::zero(); current.lanes() * current.dofs_per_cell()],
        }
    }

    /// Computes the reference-configuration state of a batch from the total displacement.
    fn prepare_reference_state<M>(&mut self, batch: usize, displacement: &[T], material: &M, weight_tolerance: T)
    where
        M: ConstitutiveModel<T, D> + ?Sized,
    {
        let current = self.gradient_test.geometry();
        let reference = &mut self.reference;
        reference.reinit(batch);
        reference.read_dof_values_plain(displacement);
        reference.evaluate_gradients();

        self.samples.clear();
        for q in 0..reference.num_quadrature_points() {
            for lane in 0..reference.lanes() {
                let mut sample = QuadratureSample::from_displacement_gradient(reference.gradient(q, lane).clone());
                sample.kirchhoff_stress = material.kirchhoff_stress(sample.det_f, &sample.b_bar);
                sample.weight_scale = weight_scale(reference.jxw(q, lane), current.jxw(batch, q, lane), weight_tolerance);
                self.samples.push(sample);
            }
        }
    }

    /// Applies the local tangent to the probe values currently held by both current-configuration
    /// evaluators. Afterwards their local dof values hold the integrated contributions.
    fn apply_tangent<M>(&mut self, material: &M)
    where
        M: ConstitutiveModel<T, D> + ?Sized,
    {
        let gradient_test = &mut self.gradient_test;
        let symmetric_gradient_test = &mut self.symmetric_gradient_test;
        gradient_test.evaluate_gradients();
        symmetric_gradient_test.evaluate_gradients();

        let lanes = gradient_test.lanes();
        for q in 0..gradient_test.num_quadrature_points() {
            for lane in 0..lanes {
                let sample = &self.samples[q * lanes + lane];
                let sym_grad = symmetric_gradient_test.symmetric_gradient(q, lane);
                let jc = material.contract_tangent(sample.det_f, &sample.b_bar, &sym_grad);
                let geo = geometric_stress(gradient_test.gradient(q, lane), &sample.kirchhoff_stress);

                symmetric_gradient_test.submit_symmetric_gradient(jc * sample.weight_scale, q, lane);
                gradient_test.submit_gradient(geo * sample.weight_scale, q, lane);
            }
        }

        gradient_test.integrate();
        symmetric_gradient_test.integrate();
    }

    /// Evaluates the action of the tangent on `src` for a single batch.
    ///
    /// The local results are left in the two current-configuration evaluators.
    pub fn apply_batch<M>(&mut self, batch: usize, src: &[T], displacement: &[T], material: &M, weight_tolerance: T)
    where
        M: ConstitutiveModel<T, D> + ?Sized,
    {
        self.prepare_reference_state(batch, displacement, material, weight_tolerance);

        self.gradient_test.reinit(batch);
        self.symmetric_gradient_test.reinit(batch);
        self.gradient_test.read_dof_values(src);
        self.symmetric_gradient_test.read_dof_values(src);

        self.apply_tangent(material);
    }

    /// Extracts the diagonal of the local tangent of every lane of a batch by probing with
    /// unit vectors, one local dof at a time.
    ///
    /// The result is left in [`diagonal`](Self::diagonal).
    pub fn diagonal_batch<M>(&mut self, batch: usize, displacement: &[T], material: &M, weight_tolerance: T)
    where
        M: ConstitutiveModel<T, D> + ?Sized,
    {
        self.prepare_reference_state(batch, displacement, material, weight_tolerance);
        self.gradient_test.reinit(batch);
        self.symmetric_gradient_test.reinit(batch);

        let lanes = self.gradient_test.lanes();
        let dofs_per_cell = self.gradient_test.dofs_per_cell();
        for i in 0..dofs_per_cell {
            for evaluator in [&mut self.gradient_test, &mut self.symmetric_gradient_test] {
                let values = evaluator.dof_values_mut();
                values.fill(T::zero());
                for lane in 0..lanes {
                    values[lane * dofs_per_cell + i] = T::one();
                }
            }

            self.apply_tangent(material);

            let gradient_values = self.gradient_test.dof_values();
            let symmetric_values = self.symmetric_gradient_test.dof_values();
            for lane in 0..lanes {
                let index = lane * dofs_per_cell + i;
                self.diagonal[index] = gradient_values[index] + symmetric_values[index];
            }
        }
    }
}
