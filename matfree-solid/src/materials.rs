use matfree::allocators::DimAllocator;
use matfree::kinematics::deviatoric_part;
use matfree::material::ConstitutiveModel;
use matfree::nalgebra::{DefaultAllocator, OMatrix};
use matfree::{Real, SmallDim};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// Shear modulus `mu` and bulk modulus `kappa`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeoHookeanParameters<T> {
    pub mu: T,
    pub kappa: T,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct YoungPoisson<T> {
    pub young: T,
    pub poisson: T,
}

impl<T: Real> From<YoungPoisson<T>> for NeoHookeanParameters<T> {
    #[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
    fn from(params: YoungPoisson<T>) -> Self {
        let YoungPoisson { young, poisson } = params;
        let mu = 0.5 * young / (1.0 + poisson);
        let kappa = young / (3.0 * (1.0 - 2.0 * poisson));
        Self { mu, kappa }
    }
}

/// The compressible Neo-Hookean material with a decoupled volumetric-isochoric response.
///
/// The strain energy density is
/// $$
/// \psi = \frac{\kappa}{4} (J^2 - 1 - 2 \log J) + \frac{\mu}{2} (\tr \bar{\vec b} - d),
/// $$
/// where $J = \det \vec F$, $\bar{\vec F} = J^{-1/d} \vec F$ and
/// $\bar{\vec b} = \bar{\vec F} \bar{\vec F}^T$. The Kirchhoff stress is
/// $$
/// \vec \tau = p J \vec I + \operatorname{dev}(\mu \bar{\vec b}),
/// \qquad p = \frac{\kappa}{2} \left(J - \frac{1}{J}\right).
/// $$
/// In the undeformed state the material reduces to linear elasticity with bulk modulus
/// $\kappa$ and shear modulus $\mu$.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressibleNeoHookean<T> {
    parameters: NeoHookeanParameters<T>,
}

#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T: Real> CompressibleNeoHookean<T> {
    pub fn new(parameters: impl Into<NeoHookeanParameters<T>>) -> Self {
        Self {
            parameters: parameters.into(),
        }
    }

    pub fn parameters(&self) -> &NeoHookeanParameters<T> {
        &self.parameters
    }

    /// Volumetric energy `kappa / 4 (J^2 - 1 - 2 log J)`.
    pub fn volumetric_energy(&self, det_f: T) -> T {
        let j = det_f;
        0.25 * self.parameters.kappa * (j * j - 1.0 - 2.0 * j.ln())
    }

    /// Pressure `p = dpsi_vol / dJ`.
    pub fn pressure(&self, det_f: T) -> T {
        0.5 * self.parameters.kappa * (det_f - 1.0 / det_f)
    }

    /// Derivative of the pressure with respect to `J`.
    pub fn pressure_derivative(&self, det_f: T) -> T {
        0.5 * self.parameters.kappa * (1.0 + 1.0 / (det_f * det_f))
    }

    pub fn energy_density<D>(&self, det_f: T, b_bar: &OMatrix<T, D, D>) -> T
    where
        D: SmallDim,
        DefaultAllocator: DimAllocator<T, D>,
    {
        let d = T::from_usize(D::dim()).expect("Dimension must fit in T");
        self.volumetric_energy(det_f) + 0.5 * self.parameters.mu * (b_bar.trace() - d)
    }
}

#[allow(non_snake_case)]
#[replace_float_literals(T::from_f64(literal).expect("literal must fit in T"))]
impl<T, D> ConstitutiveModel<T, D> for CompressibleNeoHookean<T>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    fn kirchhoff_stress(&self, det_f: T, b_bar: &OMatrix<T, D, D>) -> OMatrix<T, D, D> {
        let I = OMatrix::<T, D, D>::identity();
        let tau_bar = b_bar * self.parameters.mu;
        let tau_iso = deviatoric_part(&tau_bar);
        let tau_vol = I * (self.pressure(det_f) * det_f);
        tau_vol + tau_iso
    }

    /// Computes
    /// $$
    /// J \mathbb{c} : \vec S =
    ///     J \left[ (p + J p') \tr(\vec S) \vec I - 2 p \vec S \right]
    ///     + \frac{2}{d} \tr(\bar{\vec \tau}) \operatorname{dev}(\vec S)
    ///     - \frac{2}{d} \left[ \tr(\vec S) \vec \tau_{\text{iso}} + (\vec \tau_{\text{iso}} : \vec S) \vec I \right].
    /// $$
    fn contract_tangent(&self, det_f: T, b_bar: &OMatrix<T, D, D>, sym_grad: &OMatrix<T, D, D>) -> OMatrix<T, D, D> {
        let d = T::from_usize(D::dim()).expect("Dimension must fit in T");
        let I = OMatrix::<T, D, D>::identity();
        let J = det_f;
        let S = sym_grad;
        let S_trace = S.trace();

        let p = self.pressure(J);
        let dp_dJ = self.pressure_derivative(J);
        let tau_bar = b_bar * self.parameters.mu;
        let tau_iso = deviatoric_part(&tau_bar);

        let jc_vol = &I * (J * (p + J * dp_dJ) * S_trace) - S * (2.0 * J * p);
        let jc_iso = deviatoric_part(S) * (2.0 / d * tau_bar.trace())
            - (&tau_iso * S_trace + &I * tau_iso.dot(S)) * (2.0 / d);
        jc_vol + jc_iso
    }
}
