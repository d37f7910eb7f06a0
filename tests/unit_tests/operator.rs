use super::{hex_problem, neo_hookean, smooth_displacement, unconstrained, zero_displacement, HexProblem};
use matfree::geometry::CellBatchGeometry;
use matfree::kinematics::QuadratureSample;
use matfree::material::ConstitutiveModel;
use matfree::mesh::HexMesh;
use matfree::nalgebra::{DVector, Matrix3, Point3, Vector3, U3};
use matfree::operator::{OperatorError, TangentOperator};
use matfree::quadrature::hexahedron_gauss;
use matfree::settings::{ConstraintPolicy, ConstraintSource, OperatorSettings};
use matfree_solid::materials::CompressibleNeoHookean;
use matrixcompare::{assert_matrix_eq, assert_scalar_eq};
use proptest::prelude::*;
use std::sync::Arc;

type Operator<'a> = TangentOperator<'a, f64, U3, CompressibleNeoHookean<f64>>;

fn bound_operator(problem: &HexProblem, settings: OperatorSettings<f64>) -> Operator {
    let mut operator = TangentOperator::with_settings(settings);
    operator
        .initialize(problem.current.clone(), problem.reference.clone(), &problem.displacement)
        .unwrap();
    operator.set_material(neo_hookean());
    operator
}

fn apply(operator: &Operator, x: &DVector<f64>) -> DVector<f64> {
    let mut y = DVector::<f64>::zeros(x.len());
    operator.apply(&mut y, x).unwrap();
    y
}

fn on_bottom_face(x: &Point3<f64>) -> bool {
    x.z == 0.0
}

fn test_vector(n: usize, seed: f64) -> DVector<f64> {
    DVector::from_fn(n, |i, _| ((i as f64 + 1.0) * seed).sin())
}

/// Internal forces `f_Ii = sum_q (τ F^-T grad_X phi_I)_i JxW` of a displacement, integrated on the
/// undeformed mesh.
fn internal_forces(mesh: &HexMesh<f64>, reference: &CellBatchGeometry<f64, U3>, u: &DVector<f64>) -> DVector<f64> {
    let material = neo_hookean();
    let mut f = DVector::<f64>::zeros(u.len());
    for batch in 0..reference.num_batches() {
        for (lane, cell) in reference.batch(batch).cells().iter().enumerate() {
            let nodes = match cell {
                Some(cell) => mesh.connectivity()[*cell].0,
                None => continue,
            };
            for q in 0..reference.num_quadrature_points() {
                let mut grad_u = Matrix3::<f64>::zeros();
                for (local, &node) in nodes.iter().enumerate() {
                    let u_node = Vector3::new(u[3 * node], u[3 * node + 1], u[3 * node + 2]);
                    grad_u += u_node * reference.shape_gradient(batch, q, lane, local).transpose();
                }
                let sample = QuadratureSample::from_displacement_gradient(grad_u);
                let tau = material.kirchhoff_stress(sample.det_f, &sample.b_bar);
                let first_piola = tau
                    * sample
                        .deformation_gradient
                        .try_inverse()
                        .unwrap()
                        .transpose();
                let jxw = reference.jxw(batch, q, lane);
                for (local, &node) in nodes.iter().enumerate() {
                    let r = first_piola * reference.shape_gradient(batch, q, lane, local) * jxw;
                    for i in 0..3 {
                        f[3 * node + i] += r[i];
                    }
                }
            }
        }
    }
    f
}

#[test]
fn uninitialized_operator_reports_errors() {
    let operator = Operator::new();
    assert_eq!(operator.nrows(), 0);
    assert_eq!(operator.ncols(), 0);
    assert!(operator.diagonal().is_none());

    let x = DVector::<f64>::zeros(3);
    let mut y = DVector::<f64>::zeros(3);
    assert_eq!(operator.apply(&mut y, &x), Err(OperatorError::NotInitialized));
    assert_eq!(operator.apply_add(&mut y, &x), Err(OperatorError::NotInitialized));
    assert_eq!(operator.element(0, 0), Err(OperatorError::DiagonalNotComputed));
    assert_eq!(operator.element(0, 1), Err(OperatorError::Unsupported { row: 0, col: 1 }));
}

#[test]
fn operator_without_material_reports_error() {
    let problem = hex_problem(1, 4, zero_displacement, unconstrained);
    let mut operator = Operator::new();
    operator
        .initialize(problem.current.clone(), problem.reference.clone(), &problem.displacement)
        .unwrap();
    assert_eq!(operator.nrows(), 24);

    let x = DVector::<f64>::zeros(24);
    let mut y = DVector::<f64>::zeros(24);
    assert_eq!(operator.apply(&mut y, &x), Err(OperatorError::MaterialNotSet));
    assert_eq!(operator.compute_diagonal(), Err(OperatorError::MaterialNotSet));
}

#[test]
fn mismatched_vectors_are_rejected_without_writing() {
    let problem = hex_problem(1, 4, zero_displacement, unconstrained);
    let operator = bound_operator(&problem, OperatorSettings::default());

    let x = DVector::from_element(24, 1.0);
    let mut y = DVector::from_element(23, 7.0);
    assert_eq!(
        operator.apply(&mut y, &x),
        Err(OperatorError::DimensionMismatch {
            expected: 24,
            actual: 23
        })
    );
    assert_eq!(y, DVector::from_element(23, 7.0));

    let x = DVector::from_element(25, 1.0);
    let mut y = DVector::from_element(24, 7.0);
    assert_eq!(
        operator.apply_add(&mut y, &x),
        Err(OperatorError::DimensionMismatch {
            expected: 24,
            actual: 25
        })
    );
    assert_eq!(y, DVector::from_element(24, 7.0));
}

#[test]
fn initialize_rejects_inconsistent_geometries() {
    let problem = hex_problem(2, 4, zero_displacement, unconstrained);
    let other_lanes = Arc::new(CellBatchGeometry::from_mesh(&problem.mesh, &hexahedron_gauss(2), 3).unwrap());
    let other_quadrature = Arc::new(CellBatchGeometry::from_mesh(&problem.mesh, &hexahedron_gauss(3), 4).unwrap());

    let mut operator = Operator::new();
    let result = operator.initialize(problem.current.clone(), other_lanes, &problem.displacement);
    assert!(matches!(result, Err(OperatorError::InconsistentGeometries(_))));
    let result = operator.initialize(problem.current.clone(), other_quadrature, &problem.displacement);
    assert!(matches!(result, Err(OperatorError::InconsistentGeometries(_))));
    assert_eq!(operator.nrows(), 0);

    let short_displacement = DVector::<f64>::zeros(problem.displacement.len() - 1);
    let result = operator.initialize(problem.current.clone(), problem.reference.clone(), &short_displacement);
    assert_eq!(
        result,
        Err(OperatorError::DimensionMismatch {
            expected: 81,
            actual: 80
        })
    );
}

#[test]
fn clear_releases_bound_state() {
    let problem = hex_problem(1, 2, smooth_displacement, unconstrained);
    let mut operator = bound_operator(&problem, OperatorSettings::default());
    operator.compute_diagonal().unwrap();
    assert!(operator.diagonal().is_some());

    operator.clear();
    assert_eq!(operator.nrows(), 0);
    assert!(operator.diagonal().is_none());
    assert!(operator.current_geometry().is_none());
    assert!(operator.reference_geometry().is_none());

    let x = DVector::<f64>::zeros(24);
    let mut y = DVector::<f64>::zeros(24);
    assert_eq!(operator.apply(&mut y, &x), Err(OperatorError::NotInitialized));
}

#[test]
fn zero_probe_gives_zero_result() {
    let problem = hex_problem(2, 4, smooth_displacement, unconstrained);
    let operator = bound_operator(&problem, OperatorSettings::default());
    let y = apply(&operator, &DVector::<f64>::zeros(81));
    assert_eq!(y, DVector::<f64>::zeros(81));
}

#[test]
fn rigid_translation_is_in_kernel() {
    let problem = hex_problem(2, 4, smooth_displacement, unconstrained);
    let operator = bound_operator(&problem, OperatorSettings::default());
    let translation = super::nodal_vector(&problem.mesh, |_| Vector3::new(0.3, -0.2, 0.5));
    let y = apply(&operator, &translation);
    assert_matrix_eq!(y, DVector::<f64>::zeros(81), comp = abs, tol = 1e-12);
}

/// In the undeformed state the operator is the linear elastic stiffness. A linear probe
/// `w = A x` on the unit cube produces the constant stress `σ = κ tr(ε) I + 2 μ dev(ε)`, and
/// `∫ ∂_j phi_I dx = ±1/4` on a single unit hexahedron.
#[test]
fn undeformed_operator_is_linear_elastic_stiffness() {
    let problem = hex_problem(1, 1, zero_displacement, unconstrained);
    let operator = bound_operator(&problem, OperatorSettings::default());

    let a = Matrix3::new(0.1, 0.2, -0.3, 0.05, -0.1, 0.25, 0.4, -0.2, 0.15);
    let probe = super::nodal_vector(&problem.mesh, |x| a * x.coords);
    let y = apply(&operator, &probe);

    let (mu, kappa) = (3.0, 10.0);
    let eps = 0.5 * (a + a.transpose());
    let sigma = Matrix3::identity() * (kappa * eps.trace()) + (eps - Matrix3::identity() * (eps.trace() / 3.0)) * (2.0 * mu);

    let mut expected = DVector::<f64>::zeros(24);
    for (node, x) in problem.mesh.vertices().iter().enumerate() {
        let signs = x.coords.map(|x_j| if x_j == 1.0 { 0.25 } else { -0.25 });
        let r = sigma * signs;
        expected.fixed_rows_mut::<3>(3 * node).copy_from(&r);
    }
    assert_matrix_eq!(y, expected, comp = abs, tol = 1e-12);
}

#[test]
fn operator_matches_derivative_of_internal_forces() {
    let problem = hex_problem(2, 4, smooth_displacement, unconstrained);
    let operator = bound_operator(&problem, OperatorSettings::default());

    let w = test_vector(81, 0.7) * 0.1;
    let h = 1e-6;
    let f_plus = internal_forces(&problem.mesh, &problem.reference, &(&problem.displacement + &w * h));
    let f_minus = internal_forces(&problem.mesh, &problem.reference, &(&problem.displacement - &w * h));
    let fd = (f_plus - f_minus) / (2.0 * h);

    let tol = 1e-7 * fd.amax().max(1.0);
    let y = apply(&operator, &w);
    assert_matrix_eq!(y, fd, comp = abs, tol = tol);
}

#[test]
fn constrained_dofs_pass_through_unchanged() {
    let problem = hex_problem(2, 4, smooth_displacement, on_bottom_face);
    let operator = bound_operator(&problem, OperatorSettings::default());
    let constrained = problem.current.constrained_dofs().to_vec();
    assert_eq!(constrained.len(), 27);

    let mut x = DVector::<f64>::zeros(81);
    for &dof in &constrained {
        x[dof] = dof as f64 + 0.5;
    }
    let y = apply(&operator, &x);
    assert_eq!(y, x);

    // Free rows of a general probe are unaffected by the constrained entries of the probe
    let z = test_vector(81, 1.3);
    let mut z_free = z.clone();
    for &dof in &constrained {
        z_free[dof] = 0.0;
    }
    let y = apply(&operator, &z);
    let y_free = apply(&operator, &z_free);
    for dof in 0..81 {
        if problem.current.is_constrained(dof) {
            assert_eq!(y[dof], z[dof]);
        } else {
            assert_eq!(y[dof], y_free[dof]);
        }
    }
}

#[test]
fn skip_policy_leaves_constrained_rows_zero() {
    let problem = hex_problem(2, 4, smooth_displacement, on_bottom_face);
    let settings = OperatorSettings {
        constraint_policy: ConstraintPolicy::Skip,
        ..OperatorSettings::default()
    };
    let operator = bound_operator(&problem, settings);

    let y = apply(&operator, &test_vector(81, 0.9));
    for &dof in problem.current.constrained_dofs() {
        assert_eq!(y[dof], 0.0);
    }
}

#[test]
fn constraint_source_selects_geometry() {
    let unconstrained_problem = hex_problem(1, 2, smooth_displacement, unconstrained);
    let constrained_reference = Arc::new(
        CellBatchGeometry::from_mesh(&unconstrained_problem.mesh, &hexahedron_gauss(2), 2)
            .unwrap()
            .with_constrained_dofs([0, 1, 2])
            .unwrap(),
    );

    let mut operators = Vec::new();
    for source in [ConstraintSource::Current, ConstraintSource::Reference] {
        let settings = OperatorSettings {
            constraint_source: source,
            ..OperatorSettings::default()
        };
        let mut operator = Operator::with_settings(settings);
        operator
            .initialize(
                unconstrained_problem.current.clone(),
                constrained_reference.clone(),
                &unconstrained_problem.displacement,
            )
            .unwrap();
        operator.set_material(neo_hookean());
        operators.push(operator);
    }

    let x = test_vector(24, 0.4);
    let y_current = apply(&operators[0], &x);
    let y_reference = apply(&operators[1], &x);
    for dof in 0..24 {
        let expected = if dof < 3 { y_current[dof] + x[dof] } else { y_current[dof] };
        assert_scalar_eq!(y_reference[dof], expected, comp = abs, tol = 1e-14);
    }
}

#[test]
fn apply_add_accumulates_into_destination() {
    let problem = hex_problem(2, 3, smooth_displacement, on_bottom_face);
    let operator = bound_operator(&problem, OperatorSettings::default());
    let x = test_vector(81, 0.3);
    let y0 = test_vector(81, 2.1);

    let mut y = y0.clone();
    operator.apply_add(&mut y, &x).unwrap();
    let expected = apply(&operator, &x) + &y0;
    assert_matrix_eq!(y, expected, comp = abs, tol = 1e-12);
}

#[test]
fn transpose_apply_equals_apply() {
    let problem = hex_problem(2, 4, smooth_displacement, on_bottom_face);
    let operator = bound_operator(&problem, OperatorSettings::default());
    let x = test_vector(81, 0.6);

    let mut y = DVector::<f64>::zeros(81);
    operator.transpose_apply(&mut y, &x).unwrap();
    assert_eq!(y, apply(&operator, &x));

    let mut y_add = DVector::from_element(81, 1.0);
    let mut y_expected = DVector::from_element(81, 1.0);
    operator.transpose_apply_add(&mut y_add, &x).unwrap();
    operator.apply_add(&mut y_expected, &x).unwrap();
    assert_eq!(y_add, y_expected);
}

#[test]
fn result_does_not_depend_on_lane_count() {
    let x = test_vector(81, 1.7);
    let results: Vec<_> = [1, 3, 4, 8]
        .into_iter()
        .map(|lanes| {
            let problem = hex_problem(2, lanes, smooth_displacement, on_bottom_face);
            apply(&bound_operator(&problem, OperatorSettings::default()), &x)
        })
        .collect();

    for y in &results[1..] {
        assert_matrix_eq!(y.clone(), results[0].clone(), comp = abs, tol = 1e-12);
    }
}

#[test]
fn parallel_application_is_identical_to_sequential() {
    let problem = hex_problem(3, 4, smooth_displacement, on_bottom_face);
    let sequential = bound_operator(&problem, OperatorSettings::default());
    let parallel = bound_operator(
        &problem,
        OperatorSettings {
            parallel: true,
            ..OperatorSettings::default()
        },
    );

    let x = test_vector(problem.current.num_dofs(), 0.8);
    assert_eq!(apply(&parallel, &x), apply(&sequential, &x));
}

#[test]
fn operator_is_usable_as_linear_operator() {
    use matfree::cg::LinearOperator;

    let problem = hex_problem(1, 4, smooth_displacement, unconstrained);
    let operator = bound_operator(&problem, OperatorSettings::default());
    let x = test_vector(24, 0.5);

    let mut y = DVector::<f64>::zeros(24);
    LinearOperator::apply(&operator, (&mut y).into(), (&x).into()).unwrap();
    assert_eq!(y, apply(&operator, &x));

    let mut too_short = DVector::<f64>::zeros(23);
    assert!(LinearOperator::apply(&operator, (&mut too_short).into(), (&x).into()).is_err());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn operator_is_self_adjoint(
        u in prop::collection::vec(-1.0..1.0f64, 81),
        v in prop::collection::vec(-1.0..1.0f64, 81),
    ) {
        let problem = hex_problem(2, 4, smooth_displacement, on_bottom_face);
        let operator = bound_operator(&problem, OperatorSettings::default());
        let u = DVector::from_vec(u);
        let v = DVector::from_vec(v);

        let u_a_v = u.dot(&apply(&operator, &v));
        let v_a_u = v.dot(&apply(&operator, &u));
        let scale = u_a_v.abs().max(v_a_u.abs()).max(1.0);
        prop_assert!((u_a_v - v_a_u).abs() <= 1e-12 * scale);
    }
}
