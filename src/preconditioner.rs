//! Jacobi preconditioning with an operator's own diagonal.
use crate::cg::LinearOperator;
use crate::operator::OperatorError;
use crate::Real;
use itertools::izip;
use log::warn;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::error::Error;

/// Returns `1 / value`, or one if `|value| <= sqrt(eps)`.
pub fn guarded_inverse<T: Real>(value: T) -> T {
    if value.abs() > T::default_epsilon().sqrt() {
        T::one() / value
    } else {
        T::one()
    }
}

/// The diagonal of an operator together with its guarded inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagonalPreconditioner<T: Real> {
    diagonal: DVector<T>,
    inverse_diagonal: DVector<T>,
}

impl<T: Real> DiagonalPreconditioner<T> {
    /// Constructs the preconditioner from a diagonal, setting the entries of constrained dofs
    /// to one.
    ///
    /// # Panics
    ///
    /// Panics if a constrained dof is out of bounds.
    pub fn from_diagonal(mut diagonal: DVector<T>, constrained_dofs: &[usize]) -> Self {
        for &dof in constrained_dofs {
            diagonal[dof] = T::one();
        }

        let threshold = T::default_epsilon().sqrt();
        let num_guarded = diagonal
            .iter()
            .filter(|d_i| d_i.abs() <= threshold)
            .count();
        if num_guarded > 0 {
            warn!(
                "{} of {} diagonal entries are close to zero and are not inverted",
                num_guarded,
                diagonal.len()
            );
        }

        let inverse_diagonal = diagonal.map(guarded_inverse);
        Self {
            diagonal,
            inverse_diagonal,
        }
    }

    pub fn diagonal(&self) -> &DVector<T> {
        &self.diagonal
    }

    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inverse_diagonal
    }

    pub fn len(&self) -> usize {
        self.diagonal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagonal.is_empty()
    }

    /// Computes `dst = omega * (D^-1 ⊙ src)`.
    pub fn apply_jacobi<'x, 'y>(
        &self,
        dst: impl Into<DVectorViewMut<'x, T>>,
        src: impl Into<DVectorView<'y, T>>,
        omega: T,
    ) -> Result<(), OperatorError> {
        let mut dst = dst.into();
        let src = src.into();
        for len in [dst.len(), src.len()] {
            if len != self.len() {
                return Err(OperatorError::DimensionMismatch {
                    expected: self.len(),
                    actual: len,
                });
            }
        }

        for (dst_i, src_i, inv_i) in izip!(dst.iter_mut(), src.iter(), self.inverse_diagonal.iter()) {
            *dst_i = omega * *inv_i * *src_i;
        }
        Ok(())
    }
}

/// A damped Jacobi step `omega D^-1` used as a linear operator, e.g. as preconditioner for
/// [`ConjugateGradient`](crate::cg::ConjugateGradient).
#[derive(Debug, Clone, Copy)]
pub struct Jacobi<'a, T: Real> {
    pub preconditioner: &'a DiagonalPreconditioner<T>,
    pub omega: T,
}

impl<'a, T: Real> Jacobi<'a, T> {
    pub fn new(preconditioner: &'a DiagonalPreconditioner<T>) -> Self {
        Self {
            preconditioner,
            omega: T::one(),
        }
    }

    pub fn with_omega(self, omega: T) -> Self {
        Self { omega, ..self }
    }
}

impl<'a, T: Real> LinearOperator<T> for Jacobi<'a, T> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        self.preconditioner.apply_jacobi(y, x, self.omega)?;
        Ok(())
    }
}
