//! Lagrange finite elements used to build cell batch geometries.
use crate::allocators::DimAllocator;
use crate::{Real, SmallDim};
use nalgebra::{DefaultAllocator, OMatrix, OPoint, OVector, Point2, Point3, Vector2, Vector3, U2, U3};
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// A volumetric finite element whose reference dimension equals its geometry dimension.
pub trait FiniteElement<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Returns the number of nodes in the element.
    fn num_nodes(&self) -> usize;

    /// Populates the gradients of each basis function with respect to reference coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `gradients` does not have exactly one entry per node.
    fn populate_basis_gradients(&self, gradients: &mut [OVector<T, D>], reference_coords: &OPoint<T, D>);

    /// Computes the Jacobian of the map from reference to physical coordinates.
    fn reference_jacobian(&self, reference_coords: &OPoint<T, D>) -> OMatrix<T, D, D>;

    /// Maps reference coordinates to physical coordinates.
    fn map_reference_coords(&self, reference_coords: &OPoint<T, D>) -> OPoint<T, D>;
}

/// Connectivity of a single cell, i.e. the indices of its vertices in a mesh.
pub trait ElementConnectivity<T, D>: Debug + Clone
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    type Element: FiniteElement<T, D>;

    fn vertex_indices(&self) -> &[usize];

    /// Constructs the element from the given mesh vertices.
    ///
    /// Returns `None` if any vertex index is out of bounds.
    fn element(&self, vertices: &[OPoint<T, D>]) -> Option<Self::Element>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Quad4d2Connectivity(pub [usize; 4]);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hex8Connectivity(pub [usize; 8]);

/// Linear basis function on the interval [-1, 1].
///
///`alpha == -1` denotes the basis function associated with the node at `x == -1`,
/// and `alpha == 1` for `x == 1`.
#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
#[inline(always)]
fn phi_linear_1d<T: Real>(alpha: T, xi: T) -> T {
    (1.0 + alpha * xi) / 2.0
}

#[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
#[inline(always)]
fn phi_linear_1d_grad<T: Real>(alpha: T) -> T {
    alpha / 2.0
}

/// Reference coordinates of the quadrilateral nodes, counter-clockwise.
const QUAD4_NODE_SIGNS: [[f64; 2]; 4] = [[-1.0, -1.0], [1.0, -1.0], [1.0, 1.0], [-1.0, 1.0]];

/// Reference coordinates of the hexahedron nodes: bottom face counter-clockwise, then top face.
const HEX8_NODE_SIGNS: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

fn sign<T: Real>(value: f64) -> T {
    T::from_f64(value).expect("Literal must fit in T")
}

/// Jacobian `J = sum_I x_I (grad_xi phi_I)^T`.
fn jacobian_from_vertices<T, D>(vertices: &[OPoint<T, D>], reference_gradients: &[OVector<T, D>]) -> OMatrix<T, D, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    let mut j = OMatrix::<T, D, D>::zeros();
    for (x, grad) in vertices.iter().zip(reference_gradients) {
        j.ger(T::one(), &x.coords, grad, T::one());
    }
    j
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Quad4d2Element<T: Real> {
    vertices: [Point2<T>; 4],
}

impl<T: Real> Quad4d2Element<T> {
    pub fn from_vertices(vertices: [Point2<T>; 4]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point2<T>; 4] {
        &self.vertices
    }

    fn basis_values(&self, xi: &Point2<T>) -> [T; 4] {
        let phi_1d = phi_linear_1d;
        QUAD4_NODE_SIGNS.map(|[a, b]| phi_1d(sign(a), xi[0]) * phi_1d(sign(b), xi[1]))
    }

    fn reference_gradients(&self, xi: &Point2<T>) -> [Vector2<T>; 4] {
        let phi_1d = phi_linear_1d;
        let grad_1d = phi_linear_1d_grad;
        QUAD4_NODE_SIGNS.map(|[a, b]| {
            let (a, b) = (sign(a), sign(b));
            Vector2::new(grad_1d(a) * phi_1d(b, xi[1]), phi_1d(a, xi[0]) * grad_1d(b))
        })
    }
}

impl<T: Real> FiniteElement<T, U2> for Quad4d2Element<T> {
    fn num_nodes(&self) -> usize {
        4
    }

    fn populate_basis_gradients(&self, gradients: &mut [Vector2<T>], reference_coords: &Point2<T>) {
        assert_eq!(gradients.len(), 4, "Gradient buffer must have one entry per node");
        gradients.copy_from_slice(&self.reference_gradients(reference_coords));
    }

    fn reference_jacobian(&self, reference_coords: &Point2<T>) -> OMatrix<T, U2, U2> {
        jacobian_from_vertices(&self.vertices, &self.reference_gradients(reference_coords))
    }

    fn map_reference_coords(&self, reference_coords: &Point2<T>) -> Point2<T> {
        let phi = self.basis_values(reference_coords);
        let mut x = Vector2::zeros();
        for (vertex, phi_i) in self.vertices.iter().zip(phi) {
            x += vertex.coords * phi_i;
        }
        Point2::from(x)
    }
}

impl<T: Real> ElementConnectivity<T, U2> for Quad4d2Connectivity {
    type Element = Quad4d2Element<T>;

    fn vertex_indices(&self) -> &[usize] {
        &self.0
    }

    fn element(&self, vertices: &[Point2<T>]) -> Option<Self::Element> {
        let [a, b, c, d] = self.0;
        Some(Quad4d2Element::from_vertices([
            *vertices.get(a)?,
            *vertices.get(b)?,
            *vertices.get(c)?,
            *vertices.get(d)?,
        ]))
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Hex8Element<T: Real> {
    vertices: [Point3<T>; 8],
}

impl<T: Real> Hex8Element<T> {
    pub fn from_vertices(vertices: [Point3<T>; 8]) -> Self {
        Self { vertices }
    }

    pub fn vertices(&self) -> &[Point3<T>; 8] {
        &self.vertices
    }

    /// The reference hexahedron `[-1, 1]^3`.
    pub fn reference() -> Self {
        Self::from_vertices(HEX8_NODE_SIGNS.map(|[a, b, c]| Point3::new(sign(a), sign(b), sign(c))))
    }

    fn basis_values(&self, xi: &Point3<T>) -> [T; 8] {
        // N_{alpha, beta, gamma}([alpha, beta, gamma]) = 1
        let phi_1d = phi_linear_1d;
        HEX8_NODE_SIGNS.map(|[a, b, c]| phi_1d(sign(a), xi[0]) * phi_1d(sign(b), xi[1]) * phi_1d(sign(c), xi[2]))
    }

    fn reference_gradients(&self, xi: &Point3<T>) -> [Vector3<T>; 8] {
        let phi_1d = phi_linear_1d;
        let grad_1d = phi_linear_1d_grad;
        HEX8_NODE_SIGNS.map(|[a, b, c]| {
            let (a, b, c) = (sign(a), sign(b), sign(c));
            Vector3::new(
                grad_1d(a) * phi_1d(b, xi[1]) * phi_1d(c, xi[2]),
                phi_1d(a, xi[0]) * grad_1d(b) * phi_1d(c, xi[2]),
                phi_1d(a, xi[0]) * phi_1d(b, xi[1]) * grad_1d(c),
            )
        })
    }
}

impl<T: Real> FiniteElement<T, U3> for Hex8Element<T> {
    fn num_nodes(&self) -> usize {
        8
    }

    fn populate_basis_gradients(&self, gradients: &mut [Vector3<T>], reference_coords: &Point3<T>) {
        assert_eq!(gradients.len(), 8, "Gradient buffer must have one entry per node");
        gradients.copy_from_slice(&self.reference_gradients(reference_coords));
    }

    fn reference_jacobian(&self, reference_coords: &Point3<T>) -> OMatrix<T, U3, U3> {
        jacobian_from_vertices(&self.vertices, &self.reference_gradients(reference_coords))
    }

    fn map_reference_coords(&self, reference_coords: &Point3<T>) -> Point3<T> {
        let phi = self.basis_values(reference_coords);
        let mut x = Vector3::zeros();
        for (vertex, phi_i) in self.vertices.iter().zip(phi) {
            x += vertex.coords * phi_i;
        }
        Point3::from(x)
    }
}

impl<T: Real> ElementConnectivity<T, U3> for Hex8Connectivity {
    type Element = Hex8Element<T>;

    fn vertex_indices(&self) -> &[usize] {
        &self.0
    }

    fn element(&self, vertices: &[Point3<T>]) -> Option<Self::Element> {
        let mut element_vertices = [Point3::origin(); 8];
        for (v, &index) in element_vertices.iter_mut().zip(&self.0) {
            *v = *vertices.get(index)?;
        }
        Some(Hex8Element::from_vertices(element_vertices))
    }
}
