use matfree::kinematics::QuadratureSample;
use matfree::nalgebra;
use matfree::nalgebra::{matrix, Matrix2, Matrix3, U2, U3};
use matfree_solid::materials::NeoHookeanParameters;

mod materials;

fn neo_hookean_parameters() -> NeoHookeanParameters<f64> {
    NeoHookeanParameters {
        mu: 384.0,
        kappa: 833.0,
    }
}

fn deformation_gradient_2d() -> Matrix2<f64> {
    // Note: this is deliberately chosen so that it has det(F) > 0
    matrix![1.2, 0.1;
            0.3, 0.9]
}

fn deformation_gradient_3d() -> Matrix3<f64> {
    // Note: this is deliberately chosen so that it has det(F) > 0
    matrix![1.1, 0.2, -0.1;
            0.05, 0.95, 0.3;
            0.1, -0.2, 1.3]
}

/// Reference-state kinematics for a given deformation gradient.
fn sample_2d(f: &Matrix2<f64>) -> QuadratureSample<f64, U2> {
    QuadratureSample::from_displacement_gradient(f - Matrix2::identity())
}

fn sample_3d(f: &Matrix3<f64>) -> QuadratureSample<f64, U3> {
    QuadratureSample::from_displacement_gradient(f - Matrix3::identity())
}
