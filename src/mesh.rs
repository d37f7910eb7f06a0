use crate::allocators::DimAllocator;
use crate::element::{ElementConnectivity, Hex8Connectivity, Quad4d2Connectivity};
use crate::{Real, SmallDim};
use eyre::eyre;
use nalgebra::allocator::Allocator;
use nalgebra::{DVector, DefaultAllocator, DimName, OPoint, OVector, Scalar, U2, U3};
use serde::{Deserialize, Serialize};

pub mod procedural;

/// Index-based data structure for conforming meshes (i.e. no hanging nodes).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(bound(serialize = "T: Serialize", deserialize = "T: Deserialize<'de>"))]
pub struct Mesh<T: Scalar, D, Connectivity>
where
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    // serde's not able correctly determine the necessary trait bounds in this case,
    // so write our own
    #[serde(bound(
        serialize = "<DefaultAllocator as Allocator<T, D>>::Buffer: Serialize",
        deserialize = "<DefaultAllocator as Allocator<T, D>>::Buffer: Deserialize<'de>"
    ))]
    vertices: Vec<OPoint<T, D>>,
    #[serde(bound(
        serialize = "Connectivity: Serialize",
        deserialize = "Connectivity: Deserialize<'de>"
    ))]
    connectivity: Vec<Connectivity>,
}

pub type Mesh2d<T, Connectivity> = Mesh<T, U2, Connectivity>;
pub type Mesh3d<T, Connectivity> = Mesh<T, U3, Connectivity>;

pub type QuadMesh2d<T> = Mesh2d<T, Quad4d2Connectivity>;
pub type HexMesh<T> = Mesh3d<T, Hex8Connectivity>;

impl<T, D, Connectivity> Mesh<T, D, Connectivity>
where
    T: Scalar,
    D: DimName,
    DefaultAllocator: Allocator<T, D>,
{
    /// Construct a mesh from vertices and connectivity.
    ///
    /// The connectivity is not validated here. Consumers of the mesh, such as
    /// [`CellBatchGeometry::from_mesh`](crate::geometry::CellBatchGeometry::from_mesh),
    /// report out-of-bounds vertex indices as errors.
    pub fn from_vertices_and_connectivity(vertices: Vec<OPoint<T, D>>, connectivity: Vec<Connectivity>) -> Self {
        Self { vertices, connectivity }
    }

    pub fn vertices(&self) -> &[OPoint<T, D>] {
        &self.vertices
    }

    pub fn vertices_mut(&mut self) -> &mut [OPoint<T, D>] {
        &mut self.vertices
    }

    pub fn connectivity(&self) -> &[Connectivity] {
        &self.connectivity
    }

    pub fn num_cells(&self) -> usize {
        self.connectivity.len()
    }
}

impl<T, D, C> Mesh<T, D, C>
where
    T: Real,
    D: SmallDim,
    C: ElementConnectivity<T, D>,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Returns a copy of the mesh whose vertices are displaced by the given nodal displacement.
    ///
    /// The displacement is a dof vector with node-interleaved numbering, i.e. the displacement of
    /// vertex `i` is stored at `D * i .. D * (i + 1)`. The result describes the current
    /// configuration when `self` describes the reference configuration.
    pub fn deformed(&self, displacement: &DVector<T>) -> eyre::Result<Self> {
        let d = D::dim();
        let expected = d * self.vertices.len();
        if displacement.len() != expected {
            return Err(eyre!(
                "Displacement has {} entries, but the mesh has {} dofs",
                displacement.len(),
                expected
            ));
        }

        let vertices = self
            .vertices
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let u = OVector::<T, D>::from_fn(|k, _| displacement[d * i + k]);
                OPoint::from(&x.coords + u)
            })
            .collect();
        Ok(Self::from_vertices_and_connectivity(vertices, self.connectivity.clone()))
    }

    /// Collects all dofs of the vertices for which the predicate returns `true`.
    ///
    /// The returned dofs are sorted in increasing order.
    pub fn dofs_for_vertices_where(&self, predicate: impl Fn(&OPoint<T, D>) -> bool) -> Vec<usize> {
        let d = D::dim();
        self.vertices
            .iter()
            .enumerate()
            .filter(|(_, x)| predicate(x))
            .flat_map(|(i, _)| (0..d).map(move |k| d * i + k))
            .collect()
    }
}
