//! Preconditioned conjugate gradient for symmetric positive definite operators.
use crate::Real;
use core::fmt;
use log::debug;
use nalgebra::base::constraint::AreMultipliable;
use nalgebra::constraint::{DimEq, ShapeConstraint};
use nalgebra::storage::Storage;
use nalgebra::{DVector, DVectorView, DVectorViewMut, Dim, Dyn, Matrix, U1};
use std::error::Error;

/// A linear operator that is symmetric with respect to the Euclidean inner product.
///
/// Since the operator is assumed to be symmetric, the transposed products default to the
/// plain products.
pub trait LinearOperator<T: Real> {
    /// `y = A x`
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;

    /// `y = y + A x`
    fn apply_add(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        let mut ax = DVector::zeros(y.len());
        self.apply((&mut ax).into(), x)?;
        y += &ax;
        Ok(())
    }

    /// `y = Aᵀ x`
    fn transpose_apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        self.apply(y, x)
    }

    /// `y = y + Aᵀ x`
    fn transpose_apply_add(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        self.apply_add(y, x)
    }
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Real,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }

    fn apply_add(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply_add(self, y, x)
    }

    fn transpose_apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::transpose_apply(self, y, x)
    }

    fn transpose_apply_add(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::transpose_apply_add(self, y, x)
    }
}

impl<T, R, C, S> LinearOperator<T> for Matrix<T, R, C, S>
where
    T: Real,
    R: Dim,
    C: Dim,
    S: Storage<T, R, C>,
    ShapeConstraint: DimEq<Dyn, R> + DimEq<C, Dyn> + AreMultipliable<R, C, Dyn, U1>,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }

    fn apply_add(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.gemv(T::one(), self, &x, T::one());
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Real> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        Ok(())
    }
}

pub trait CgStoppingCriterion<T: Real> {
    /// Called by CG at the start of a new solve.
    fn reset(&self, _a: &dyn LinearOperator<T>, _x: DVectorView<T>, _b: DVectorView<T>) {}

    fn has_converged(
        &self,
        a: &dyn LinearOperator<T>,
        x: DVectorView<T>,
        b: DVectorView<T>,
        b_norm: T,
        iteration: usize,
        approx_residual: DVectorView<T>,
    ) -> Result<bool, SolveErrorKind>;
}

/// Relative residual tolerance ||r|| <= tol * ||b||.
///
/// Note that we use the *approximate* residual given by Conjugate-Gradient. For ill-conditioned
/// problems, it is possible that CG's residual converges, but the real residual does not.
#[derive(Debug)]
pub struct RelativeResidualCriterion<T> {
    tol: T,
}

impl<T: Real> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl Default for RelativeResidualCriterion<f32> {
    fn default() -> Self {
        Self::new(1e-4)
    }
}

impl<T: Real> CgStoppingCriterion<T> for RelativeResidualCriterion<T> {
    fn has_converged(
        &self,
        _a: &dyn LinearOperator<T>,
        _x: DVectorView<T>,
        _b: DVectorView<T>,
        b_norm: T,
        _iteration: usize,
        approx_residual: DVectorView<T>,
    ) -> Result<bool, SolveErrorKind> {
        let r_approx_norm = approx_residual.norm();
        Ok(r_approx_norm <= self.tol * b_norm)
    }
}

/// Scratch vectors reused across solves.
#[derive(Debug, Clone)]
pub struct CgWorkspace<T: Real> {
    residual: DVector<T>,
    preconditioned: DVector<T>,
    direction: DVector<T>,
    operator_times_direction: DVector<T>,
}

impl<T: Real> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self {
            residual: DVector::zeros(0),
            preconditioned: DVector::zeros(0),
            direction: DVector::zeros(0),
            operator_times_direction: DVector::zeros(0),
        }
    }
}

impl<T: Real> CgWorkspace<T> {
    /// Resizes every vector to `dim` and returns `(r, z, p, Ap)`.
    #[allow(clippy::type_complexity)]
    fn vectors(&mut self, dim: usize) -> (&mut DVector<T>, &mut DVector<T>, &mut DVector<T>, &mut DVector<T>) {
        for v in [
            &mut self.residual,
            &mut self.preconditioned,
            &mut self.direction,
            &mut self.operator_times_direction,
        ] {
            v.resize_vertically_mut(dim, T::zero());
        }
        (
            &mut self.residual,
            &mut self.preconditioned,
            &mut self.direction,
            &mut self.operator_times_direction,
        )
    }
}

#[derive(Debug)]
enum WorkspaceStorage<'a, T: Real> {
    Owned(CgWorkspace<T>),
    Borrowed(&'a mut CgWorkspace<T>),
}

impl<'a, T: Real> WorkspaceStorage<'a, T> {
    fn get_mut(&mut self) -> &mut CgWorkspace<T> {
        match self {
            Self::Owned(workspace) => workspace,
            Self::Borrowed(workspace) => workspace,
        }
    }
}

/// Preconditioned conjugate gradient solver, configured with a builder-style API.
///
/// The preconditioner is an operator approximating the *inverse* of the system operator,
/// such as [`Jacobi`](crate::preconditioner::Jacobi).
#[derive(Debug)]
pub struct ConjugateGradient<'a, T, A, P, Criterion>
where
    T: Real,
{
    workspace: WorkspaceStorage<'a, T>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
}

impl<'a, T: Real> ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self::from_storage(WorkspaceStorage::Owned(CgWorkspace::default()))
    }

    /// Solves using the buffers of the given workspace, avoiding allocations across repeated solves.
    pub fn with_workspace(workspace: &'a mut CgWorkspace<T>) -> Self {
        Self::from_storage(WorkspaceStorage::Borrowed(workspace))
    }

    fn from_storage(workspace: WorkspaceStorage<'a, T>) -> Self {
        Self {
            workspace,
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl<'a, T: Real, P, Criterion> ConjugateGradient<'a, T, (), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<'a, T, A, P, Criterion> {
        let Self {
            workspace,
            preconditioner,
            stopping_criterion,
            max_iter,
            ..
        } = self;
        ConjugateGradient {
            workspace,
            operator,
            preconditioner,
            stopping_criterion,
            max_iter,
        }
    }
}

impl<'a, T: Real, A, P, Criterion> ConjugateGradient<'a, T, A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<'a, T, A, P2, Criterion> {
        let Self {
            workspace,
            operator,
            stopping_criterion,
            max_iter,
            ..
        } = self;
        ConjugateGradient {
            workspace,
            operator,
            preconditioner,
            stopping_criterion,
            max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<'a, T: Real, A, P> ConjugateGradient<'a, T, A, P, ()> {
    pub fn with_stopping_criterion<Criterion>(
        self,
        stopping_criterion: Criterion,
    ) -> ConjugateGradient<'a, T, A, P, Criterion> {
        let Self {
            workspace,
            operator,
            preconditioner,
            max_iter,
            ..
        } = self;
        ConjugateGradient {
            workspace,
            operator,
            preconditioner,
            stopping_criterion,
            max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    StoppingCriterionError(Box<dyn Error>),
    /// Encountered a search direction `p` with `p^T A p <= 0`.
    IndefiniteOperator,
    /// Encountered a residual `r` with `r^T P r <= 0`.
    IndefinitePreconditioner,
    MaxIterationsReached {
        max_iter: usize,
    },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "operator application failed: {}", err),
            Self::PreconditionerError(err) => write!(f, "preconditioner application failed: {}", err),
            Self::StoppingCriterionError(err) => write!(f, "stopping criterion failed: {}", err),
            Self::IndefiniteOperator => write!(f, "operator is not positive definite"),
            Self::IndefinitePreconditioner => write!(f, "preconditioner is not positive definite"),
            Self::MaxIterationsReached { max_iter } => write!(f, "no convergence within {} iterations", max_iter),
        }
    }
}

/// A failed solve, together with the progress made before the failure.
#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T: fmt::Debug> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conjugate gradient failed after {} iterations: {}",
            self.output.num_iterations, self.kind
        )
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput<T> {
    /// Number of updates made to the solution vector.
    pub num_iterations: usize,
    /// Norm of the recursively updated residual at termination.
    pub residual_norm: T,
}

impl<T: Real> CgOutput<T> {
    fn fail(&self, kind: SolveErrorKind) -> SolveError<T> {
        SolveError {
            output: self.clone(),
            kind,
        }
    }
}

/// `y = A x`
fn apply_operator<'y, 'x, T, A>(
    a: &A,
    y: impl Into<DVectorViewMut<'y, T>>,
    x: impl Into<DVectorView<'x, T>>,
) -> Result<(), Box<dyn Error>>
where
    T: Real,
    A: ?Sized + LinearOperator<T>,
{
    a.apply(y.into(), x.into())
}

impl<'a, T, A, P, Criterion> ConjugateGradient<'a, T, A, P, Criterion>
where
    T: Real,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: CgStoppingCriterion<T>,
{
    /// Solves `A x = b`, using the current contents of `x` as the initial guess.
    ///
    /// # Panics
    ///
    /// Panics if `b` and `x` have different lengths.
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        self.solve_impl(b.into(), x.into())
    }

    fn solve_impl(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<CgOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len(), "right-hand side and solution must have the same length");

        let mut output = CgOutput {
            num_iterations: 0,
            residual_norm: T::zero(),
        };

        let b_norm = b.norm();
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        let a = &self.operator;
        let preconditioner = &self.preconditioner;
        let (r, z, p, ap) = self.workspace.get_mut().vectors(x.len());

        // r = b - A x
        apply_operator(a, &mut *r, &x).map_err(|err| output.fail(OperatorError(err)))?;
        r.axpy(T::one(), &b, -T::one());
        output.residual_norm = r.norm();

        // z = P r, p = z
        apply_operator(preconditioner, &mut *z, &*r).map_err(|err| output.fail(PreconditionerError(err)))?;
        p.copy_from(z);
        let mut z_dot_r = z.dot(r);

        self.stopping_criterion.reset(a, (&x).into(), b);

        loop {
            let converged = self
                .stopping_criterion
                .has_converged(a, (&x).into(), b, b_norm, output.num_iterations, (&*r).into())
                .map_err(|kind| output.fail(kind))?;
            if converged {
                break;
            }
            if let Some(max_iter) = self.max_iter.filter(|&max_iter| output.num_iterations >= max_iter) {
                return Err(output.fail(MaxIterationsReached { max_iter }));
            }

            apply_operator(a, &mut *ap, &*p).map_err(|err| output.fail(OperatorError(err)))?;
            let p_dot_ap = p.dot(ap);
            if p_dot_ap <= T::zero() {
                return Err(output.fail(IndefiniteOperator));
            }
            if z_dot_r <= T::zero() {
                return Err(output.fail(IndefinitePreconditioner));
            }

            let alpha = z_dot_r / p_dot_ap;
            x.axpy(alpha, &*p, T::one());
            r.axpy(-alpha, &*ap, T::one());
            output.num_iterations += 1;
            output.residual_norm = r.norm();

            apply_operator(preconditioner, &mut *z, &*r).map_err(|err| output.fail(PreconditionerError(err)))?;
            let z_dot_r_next = z.dot(r);
            let beta = z_dot_r_next / z_dot_r;
            // p <- z + beta p
            p.axpy(T::one(), &*z, beta);
            z_dot_r = z_dot_r_next;
        }

        debug!(
            "CG converged after {} iterations (residual norm {:?})",
            output.num_iterations, output.residual_norm
        );
        Ok(output)
    }
}
