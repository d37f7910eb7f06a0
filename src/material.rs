use crate::allocators::DimAllocator;
use crate::{Real, SmallDim};
use nalgebra::{DefaultAllocator, OMatrix};

/// A hyperelastic material law expressed in terms of the isochoric left Cauchy-Green tensor.
///
/// Implementations are shared between operators and threads, hence `Send + Sync`.
pub trait ConstitutiveModel<T, D>: Send + Sync
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Kirchhoff stress `τ = J σ` as a function of `J = det F` and `b̄ = F̄ F̄ᵀ`.
    ///
    /// The result is symmetric.
    fn kirchhoff_stress(&self, det_f: T, b_bar: &OMatrix<T, D, D>) -> OMatrix<T, D, D>;

    /// Action `J c : S` of the spatial tangent moduli on a symmetric tensor `S`,
    /// without forming the fourth-order tensor.
    ///
    /// The result is symmetric.
    fn contract_tangent(&self, det_f: T, b_bar: &OMatrix<T, D, D>, sym_grad: &OMatrix<T, D, D>) -> OMatrix<T, D, D>;
}
