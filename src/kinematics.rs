//! Finite strain kinematics at a single quadrature point.
use crate::allocators::DimAllocator;
use crate::{Real, SmallDim};
use nalgebra::{DefaultAllocator, OMatrix};
use numeric_literals::replace_float_literals;

/// Deformation gradient `F = I + grad u`.
pub fn deformation_gradient<T, D>(displacement_gradient: &OMatrix<T, D, D>) -> OMatrix<T, D, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    OMatrix::<T, D, D>::identity() + displacement_gradient
}

/// Isochoric (volume preserving) part `F̄ = det(F)^(-1/d) F` of the deformation gradient.
///
/// The determinant must be positive for the result to be meaningful.
pub fn isochoric_deformation_gradient<T, D>(f: &OMatrix<T, D, D>, det_f: T) -> OMatrix<T, D, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    let d = T::from_usize(D::dim()).expect("Dimension must fit in T");
    let factor = det_f.powf(-T::one() / d);
    f * factor
}

/// Left Cauchy-Green tensor `F Fᵀ`.
pub fn left_cauchy_green<T, D>(f: &OMatrix<T, D, D>) -> OMatrix<T, D, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    f * f.transpose()
}

/// Symmetric part `(A + Aᵀ) / 2`.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
pub fn symmetric_part<T, D>(a: &OMatrix<T, D, D>) -> OMatrix<T, D, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    OMatrix::<T, D, D>::from_fn(|i, j| 0.5 * (a[(i, j)] + a[(j, i)]))
}

/// Deviatoric part `A - tr(A)/d I`.
pub fn deviatoric_part<T, D>(a: &OMatrix<T, D, D>) -> OMatrix<T, D, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    let d = T::from_usize(D::dim()).expect("Dimension must fit in T");
    a - OMatrix::<T, D, D>::identity() * (a.trace() / d)
}

/// Geometric stress contribution `(G τ)_ik = sum_j G_ij τ_jk`.
pub fn geometric_stress<T, D>(gradient: &OMatrix<T, D, D>, tau: &OMatrix<T, D, D>) -> OMatrix<T, D, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    gradient * tau
}

/// Kinematic state of the reference configuration at a quadrature point, shared by every
/// probe applied to the same cell batch.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureSample<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    pub displacement_gradient: OMatrix<T, D, D>,
    pub deformation_gradient: OMatrix<T, D, D>,
    pub det_f: T,
    pub isochoric_deformation_gradient: OMatrix<T, D, D>,
    pub b_bar: OMatrix<T, D, D>,
    pub kirchhoff_stress: OMatrix<T, D, D>,
    /// Ratio of reference to current integration weight.
    pub weight_scale: T,
}

impl<T, D> QuadratureSample<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Computes the kinematics from the displacement gradient with respect to reference
    /// coordinates. The stress is left at zero and the weight scale at one.
    pub fn from_displacement_gradient(displacement_gradient: OMatrix<T, D, D>) -> Self {
        let f = deformation_gradient(&displacement_gradient);
        let det_f = f.determinant();
        let f_bar = isochoric_deformation_gradient(&f, det_f);
        let b_bar = symmetric_part(&left_cauchy_green(&f_bar));
        Self {
            displacement_gradient,
            deformation_gradient: f,
            det_f,
            isochoric_deformation_gradient: f_bar,
            b_bar,
            kirchhoff_stress: OMatrix::<T, D, D>::zeros(),
            weight_scale: T::one(),
        }
    }
}

/// Ratio `jxw_reference / jxw_current`, or `jxw_reference` itself when the current weight
/// is at or below the tolerance in magnitude.
pub fn weight_scale<T: Real>(jxw_reference: T, jxw_current: T, tolerance: T) -> T {
    if jxw_current.abs() > tolerance {
        jxw_reference / jxw_current
    } else {
        jxw_reference
    }
}
