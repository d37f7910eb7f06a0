use super::{deformation_gradient_2d, deformation_gradient_3d, neo_hookean_parameters, sample_2d, sample_3d};
use matfree::material::ConstitutiveModel;
use matfree::nalgebra;
use matfree::nalgebra::{matrix, Matrix2, Matrix3};
use matfree_solid::materials::{CompressibleNeoHookean, NeoHookeanParameters, YoungPoisson};
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};

#[test]
fn neo_hookean_parameters_from_young_poisson() {
    let young_poisson = YoungPoisson {
        young: 1e3,
        poisson: 0.3,
    };
    let params = NeoHookeanParameters::from(young_poisson);

    assert_scalar_eq!(params.mu, 384.6153846153846, comp = abs, tol = 1e-9);
    assert_scalar_eq!(params.kappa, 833.3333333333333, comp = abs, tol = 1e-9);
}

#[test]
fn kirchhoff_stress_vanishes_in_undeformed_state() {
    let material = CompressibleNeoHookean::new(neo_hookean_parameters());

    let tau_2d = material.kirchhoff_stress(1.0, &Matrix2::identity());
    assert_matrix_eq!(tau_2d, Matrix2::<f64>::zeros(), comp = abs, tol = 1e-12);

    let tau_3d = material.kirchhoff_stress(1.0, &Matrix3::identity());
    assert_matrix_eq!(tau_3d, Matrix3::<f64>::zeros(), comp = abs, tol = 1e-12);

    assert_scalar_eq!(material.energy_density(1.0, &Matrix3::identity()), 0.0, comp = abs, tol = 1e-12);
}

#[test]
fn pure_dilation_gives_hydrostatic_kirchhoff_stress() {
    let params = neo_hookean_parameters();
    let material = CompressibleNeoHookean::new(params);
    let s = 1.1;
    let sample = sample_3d(&(Matrix3::identity() * s));

    let j: f64 = s * s * s;
    assert_scalar_eq!(sample.det_f, j, comp = abs, tol = 1e-12);
    assert_matrix_eq!(sample.b_bar, Matrix3::<f64>::identity(), comp = abs, tol = 1e-12);

    let tau = material.kirchhoff_stress(sample.det_f, &sample.b_bar);
    let expected = Matrix3::identity() * (0.5 * params.kappa * (j * j - 1.0));
    assert_matrix_eq!(tau, expected, comp = abs, tol = 1e-9);
}

#[test]
fn tangent_reduces_to_linear_elasticity_in_undeformed_state() {
    let NeoHookeanParameters { mu, kappa } = neo_hookean_parameters();
    let material = CompressibleNeoHookean::new(neo_hookean_parameters());

    let s_3d = matrix![1.0, 2.0, -0.5;
                       2.0, -3.0, 0.25;
                       -0.5, 0.25, 4.0];
    let jc_3d = material.contract_tangent(1.0, &Matrix3::identity(), &s_3d);
    let dev_3d = s_3d - Matrix3::identity() * (s_3d.trace() / 3.0);
    let expected_3d = Matrix3::identity() * (kappa * s_3d.trace()) + dev_3d * (2.0 * mu);
    assert_matrix_eq!(jc_3d, expected_3d, comp = abs, tol = 1e-9);

    let s_2d = matrix![1.0, -2.0;
                       -2.0, 3.0];
    let jc_2d = material.contract_tangent(1.0, &Matrix2::identity(), &s_2d);
    let dev_2d = s_2d - Matrix2::identity() * (s_2d.trace() / 2.0);
    let expected_2d = Matrix2::identity() * (kappa * s_2d.trace()) + dev_2d * (2.0 * mu);
    assert_matrix_eq!(jc_2d, expected_2d, comp = abs, tol = 1e-9);
}

#[test]
fn tangent_has_major_symmetry() {
    let material = CompressibleNeoHookean::new(neo_hookean_parameters());
    let sample = sample_3d(&deformation_gradient_3d());

    let s1 = matrix![1.0, 0.5, -0.2;
                     0.5, -1.0, 0.3;
                     -0.2, 0.3, 2.0];
    let s2 = matrix![0.3, -0.7, 1.1;
                     -0.7, 2.0, 0.4;
                     1.1, 0.4, -0.6];

    let jc_s1 = material.contract_tangent(sample.det_f, &sample.b_bar, &s1);
    let jc_s2 = material.contract_tangent(sample.det_f, &sample.b_bar, &s2);
    assert_matrix_eq!(jc_s1, jc_s1.transpose(), comp = abs, tol = 1e-9);
    assert_scalar_eq!(s2.dot(&jc_s1), s1.dot(&jc_s2), comp = abs, tol = 1e-8);
}

/// For the perturbed deformation gradient `F(e) = (I + e H) F`, the Lie derivative
/// `d tau/de - H tau - tau H^T` equals `J c : sym(H)`.
#[test]
fn tangent_matches_lie_derivative_of_kirchhoff_stress_2d() {
    let material = CompressibleNeoHookean::new(neo_hookean_parameters());
    let f = deformation_gradient_2d();
    let h = matrix![0.3, 0.1;
                    0.6, 0.5];
    let eps = 1e-6;

    let tau_at = |f: &Matrix2<f64>| {
        let sample = sample_2d(f);
        material.kirchhoff_stress(sample.det_f, &sample.b_bar)
    };
    let tau_plus = tau_at(&((Matrix2::identity() + h * eps) * f));
    let tau_minus = tau_at(&((Matrix2::identity() - h * eps) * f));
    let tau = tau_at(&f);
    let lie_derivative = (tau_plus - tau_minus) / (2.0 * eps) - h * tau - tau * h.transpose();

    let sample = sample_2d(&f);
    let jc = material.contract_tangent(sample.det_f, &sample.b_bar, &h.symmetric_part());
    assert_matrix_eq!(lie_derivative, jc, comp = abs, tol = 1e-4);
}

#[test]
fn tangent_matches_lie_derivative_of_kirchhoff_stress_3d() {
    let material = CompressibleNeoHookean::new(neo_hookean_parameters());
    let f = deformation_gradient_3d();
    let h = matrix![0.3, 0.1, -0.1;
                    0.6, 0.5, 0.4;
                    0.9, 0.9, 0.9];
    let eps = 1e-6;

    let tau_at = |f: &Matrix3<f64>| {
        let sample = sample_3d(f);
        material.kirchhoff_stress(sample.det_f, &sample.b_bar)
    };
    let tau_plus = tau_at(&((Matrix3::identity() + h * eps) * f));
    let tau_minus = tau_at(&((Matrix3::identity() - h * eps) * f));
    let tau = tau_at(&f);
    let lie_derivative = (tau_plus - tau_minus) / (2.0 * eps) - h * tau - tau * h.transpose();

    let sample = sample_3d(&f);
    let jc = material.contract_tangent(sample.det_f, &sample.b_bar, &h.symmetric_part());
    assert_matrix_eq!(lie_derivative, jc, comp = abs, tol = 1e-4);
}

/// The rate of the stored energy along `F(e) = (I + e H) F` equals the stress power `tau : H`.
#[test]
fn kirchhoff_stress_is_power_conjugate_to_energy_density() {
    let material = CompressibleNeoHookean::new(neo_hookean_parameters());
    let f = deformation_gradient_3d();
    let h = matrix![0.3, 0.1, -0.1;
                    0.6, 0.5, 0.4;
                    0.9, 0.9, 0.9];
    let eps = 1e-6;

    let psi_at = |f: &Matrix3<f64>| {
        let sample = sample_3d(f);
        material.energy_density(sample.det_f, &sample.b_bar)
    };
    let psi_plus = psi_at(&((Matrix3::identity() + h * eps) * f));
    let psi_minus = psi_at(&((Matrix3::identity() - h * eps) * f));
    let dpsi = (psi_plus - psi_minus) / (2.0 * eps);

    let sample = sample_3d(&f);
    let tau = material.kirchhoff_stress(sample.det_f, &sample.b_bar);
    assert_scalar_eq!(dpsi, tau.dot(&h), comp = abs, tol = 1e-5);
}
