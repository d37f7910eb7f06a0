//! Precomputed geometry of cells grouped into vector-lane batches.
//!
//! A [`CellBatchGeometry`] groups the cells of a mesh into batches of `lanes` cells
//! (sometimes called *macro cells*). All per-quadrature-point data is laid out lane by lane,
//! so that the cells of a batch are processed together. The last batch may be only partially
//! filled, in which case the remaining lanes are padding lanes: they have zero integration
//! weights and zero shape gradients, and they are never gathered from or scattered to.
//!
//! Dofs use node-interleaved numbering, `dof = D * node + component`, both globally and
//! within a cell.
use crate::allocators::DimAllocator;
use crate::element::{ElementConnectivity, FiniteElement};
use crate::mesh::Mesh;
use crate::quadrature::QuadraturePair;
use crate::{Real, SmallDim};
use eyre::{bail, eyre};
use log::debug;
use nalgebra::{DefaultAllocator, OPoint, OVector};
use std::marker::PhantomData;

/// Geometric data of the cells in a single batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CellBatch<T> {
    /// Mesh cell index per lane, `None` for padding lanes.
    cells: Vec<Option<usize>>,
    /// Mesh vertex indices, `[lane * nodes_per_cell + node]`.
    nodes: Vec<usize>,
    /// Physical shape gradients, `[((q * lanes + lane) * nodes_per_cell + node) * D + k]`.
    gradients: Vec<T>,
    /// Quadrature weight times Jacobian determinant, `[q * lanes + lane]`.
    jxw: Vec<T>,
    /// Physical quadrature points, `[(q * lanes + lane) * D + k]`.
    points: Vec<T>,
}

impl<T> CellBatch<T> {
    pub fn cells(&self) -> &[Option<usize>] {
        &self.cells
    }

    pub fn num_active_lanes(&self) -> usize {
        self.cells.iter().filter(|cell| cell.is_some()).count()
    }
}

/// Cells of a mesh grouped into batches, with shape gradients and integration weights
/// precomputed at every quadrature point.
///
/// The geometry also owns the set of constrained dofs, which gathers and scatters
/// take into account.
#[derive(Debug, Clone)]
pub struct CellBatchGeometry<T, D> {
    num_nodes: usize,
    lanes: usize,
    nodes_per_cell: usize,
    num_quadrature_points: usize,
    batches: Vec<CellBatch<T>>,
    constrained_dofs: Vec<usize>,
    constrained_mask: Vec<bool>,
    marker: PhantomData<D>,
}

impl<T, D> CellBatchGeometry<T, D>
where
    T: Real,
    D: SmallDim,
    DefaultAllocator: DimAllocator<T, D>,
{
    /// Precomputes the geometry of every cell of the mesh at the given quadrature rule.
    ///
    /// Cells are assigned to batches in mesh order: cell `c` lands in batch `c / lanes`,
    /// lane `c % lanes`.
    ///
    /// Fails if `lanes` is zero, the quadrature rule is empty or inconsistent, cells have
    /// differing node counts, a cell references a vertex out of bounds or a cell has a
    /// singular Jacobian at a quadrature point.
    pub fn from_mesh<C>(mesh: &Mesh<T, D, C>, quadrature: &QuadraturePair<T, D>, lanes: usize) -> eyre::Result<Self>
    where
        C: ElementConnectivity<T, D>,
    {
        let (weights, points) = quadrature;
        if lanes == 0 {
            bail!("Number of lanes must be positive");
        }
        if weights.len() != points.len() {
            bail!(
                "Quadrature rule has {} weights, but {} points",
                weights.len(),
                points.len()
            );
        }
        if weights.is_empty() {
            bail!("Quadrature rule must contain at least one point");
        }

        let d = D::dim();
        let nq = weights.len();
        let connectivity = mesh.connectivity();
        let nodes_per_cell = connectivity
            .first()
            .map(|conn| conn.vertex_indices().len())
            .unwrap_or(0);
        let mut reference_gradients = vec![OVector::<T, D>::zeros(); nodes_per_cell];

        let mut batches = Vec::with_capacity(connectivity.len().div_ceil(lanes));
        for (batch_index, chunk) in connectivity.chunks(lanes).enumerate() {
            let mut batch = CellBatch {
                cells: vec![None; lanes],
                nodes: vec![0; lanes * nodes_per_cell],
                gradients: vec![T::zero(); nq * lanes * nodes_per_cell * d],
                jxw: vec![T::zero(); nq * lanes],
                points: vec![T::zero(); nq * lanes * d],
            };

            for (lane, conn) in chunk.iter().enumerate() {
                let cell_index = batch_index * lanes + lane;
                let vertex_indices = conn.vertex_indices();
                if vertex_indices.len() != nodes_per_cell {
                    bail!(
                        "Cell {} has {} nodes, expected {}",
                        cell_index,
                        vertex_indices.len(),
                        nodes_per_cell
                    );
                }
                let element = conn
                    .element(mesh.vertices())
                    .ok_or_else(|| eyre!("Cell {} references a vertex out of bounds", cell_index))?;

                batch.cells[lane] = Some(cell_index);
                batch.nodes[lane * nodes_per_cell..(lane + 1) * nodes_per_cell].copy_from_slice(vertex_indices);

                for (q, (&w, xi)) in weights.iter().zip(points).enumerate() {
                    let j = element.reference_jacobian(xi);
                    let j_det = j.determinant();
                    let j_inv_t = j
                        .try_inverse()
                        .ok_or_else(|| eyre!("Jacobian of cell {} is singular at quadrature point {}", cell_index, q))?
                        .transpose();
                    element.populate_basis_gradients(&mut reference_gradients, xi);

                    let ql = q * lanes + lane;
                    for (node, grad_ref) in reference_gradients.iter().enumerate() {
                        let grad = &j_inv_t * grad_ref;
                        let start = (ql * nodes_per_cell + node) * d;
                        for k in 0..d {
                            batch.gradients[start + k] = grad[k];
                        }
                    }
                    batch.jxw[ql] = w * j_det.abs();

                    let x = element.map_reference_coords(xi);
                    for k in 0..d {
                        batch.points[ql * d + k] = x[k];
                    }
                }
            }
            batches.push(batch);
        }

        debug!(
            "Built cell batch geometry: {} cells in {} batches of {} lanes, {} quadrature points per cell",
            connectivity.len(),
            batches.len(),
            lanes,
            nq
        );

        let num_nodes = mesh.vertices().len();
        Ok(Self {
            num_nodes,
            lanes,
            nodes_per_cell,
            num_quadrature_points: nq,
            batches,
            constrained_dofs: Vec::new(),
            constrained_mask: vec![false; num_nodes * d],
            marker: PhantomData,
        })
    }

    /// Replaces the set of constrained dofs.
    ///
    /// Duplicates are removed. Fails if any dof is out of bounds.
    pub fn with_constrained_dofs(mut self, dofs: impl IntoIterator<Item = usize>) -> eyre::Result<Self> {
        let num_dofs = self.num_dofs();
        let mut dofs: Vec<usize> = dofs.into_iter().collect();
        if let Some(dof) = dofs.iter().find(|&&dof| dof >= num_dofs) {
            bail!("Constrained dof {} is out of bounds for {} dofs", dof, num_dofs);
        }
        dofs.sort_unstable();
        dofs.dedup();

        self.constrained_mask = vec![false; num_dofs];
        for &dof in &dofs {
            self.constrained_mask[dof] = true;
        }
        self.constrained_dofs = dofs;
        Ok(self)
    }

    /// The number of cell batches (macro cells).
    pub fn num_batches(&self) -> usize {
        self.batches.len()
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn nodes_per_cell(&self) -> usize {
        self.nodes_per_cell
    }

    pub fn dofs_per_cell(&self) -> usize {
        self.nodes_per_cell * D::dim()
    }

    pub fn num_quadrature_points(&self) -> usize {
        self.num_quadrature_points
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_dofs(&self) -> usize {
        self.num_nodes * D::dim()
    }

    /// Constrained dofs in increasing order.
    pub fn constrained_dofs(&self) -> &[usize] {
        &self.constrained_dofs
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.constrained_mask.get(dof).copied().unwrap_or(false)
    }

    pub fn batch(&self, batch: usize) -> &CellBatch<T> {
        &self.batches[batch]
    }

    pub fn batches(&self) -> &[CellBatch<T>] {
        &self.batches
    }

    /// Gradient of the shape function of `node` with respect to physical coordinates.
    pub fn shape_gradient(&self, batch: usize, q: usize, lane: usize, node: usize) -> OVector<T, D> {
        let d = D::dim();
        let start = ((q * self.lanes + lane) * self.nodes_per_cell + node) * d;
        let gradients = &self.batches[batch].gradients;
        OVector::<T, D>::from_fn(|k, _| gradients[start + k])
    }

    /// Quadrature weight times Jacobian determinant.
    pub fn jxw(&self, batch: usize, q: usize, lane: usize) -> T {
        self.batches[batch].jxw[q * self.lanes + lane]
    }

    pub fn quadrature_point(&self, batch: usize, q: usize, lane: usize) -> OPoint<T, D> {
        let d = D::dim();
        let start = (q * self.lanes + lane) * d;
        let points = &self.batches[batch].points;
        OPoint::from(OVector::<T, D>::from_fn(|k, _| points[start + k]))
    }

    /// Gathers the global dofs of a batch into lane-major local storage, reading constrained
    /// dofs as zero.
    ///
    /// `local` holds `lanes * dofs_per_cell` entries, `[lane * dofs_per_cell + local_dof]`.
    /// Entries of padding lanes are set to zero.
    ///
    /// # Panics
    ///
    /// Panics if the local or global storage have the wrong length.
    pub fn read_dof_values(&self, batch: usize, src: &[T], local: &mut [T]) {
        self.gather(batch, src, local, true)
    }

    /// Same as [`read_dof_values`](Self::read_dof_values), but constrained dofs are read
    /// as they are.
    pub fn read_dof_values_plain(&self, batch: usize, src: &[T], local: &mut [T]) {
        self.gather(batch, src, local, false)
    }

    fn gather(&self, batch: usize, src: &[T], local: &mut [T], skip_constrained: bool) {
        let d = D::dim();
        let dofs_per_cell = self.dofs_per_cell();
        assert_eq!(src.len(), self.num_dofs(), "Global dof vector dimension mismatch");
        assert_eq!(local.len(), self.lanes * dofs_per_cell, "Local dof storage dimension mismatch");

        local.fill(T::zero());
        let batch = &self.batches[batch];
        for (lane, _) in batch.cells.iter().enumerate().filter(|(_, cell)| cell.is_some()) {
            for node in 0..self.nodes_per_cell {
                let global_node = batch.nodes[lane * self.nodes_per_cell + node];
                for k in 0..d {
                    let dof = d * global_node + k;
                    if skip_constrained && self.constrained_mask[dof] {
                        continue;
                    }
                    local[lane * dofs_per_cell + d * node + k] = src[dof];
                }
            }
        }
    }

    /// Adds lane-major local values of a batch into the global dof vector.
    ///
    /// Constrained dofs and padding lanes are skipped.
    ///
    /// # Panics
    ///
    /// Panics if the local or global storage have the wrong length.
    pub fn distribute_local_to_global(&self, batch: usize, local: &[T], dst: &mut [T]) {
        let d = D::dim();
        let dofs_per_cell = self.dofs_per_cell();
        assert_eq!(dst.len(), self.num_dofs(), "Global dof vector dimension mismatch");
        assert_eq!(local.len(), self.lanes * dofs_per_cell, "Local dof storage dimension mismatch");

        let batch = &self.batches[batch];
        for (lane, _) in batch.cells.iter().enumerate().filter(|(_, cell)| cell.is_some()) {
            for node in 0..self.nodes_per_cell {
                let global_node = batch.nodes[lane * self.nodes_per_cell + node];
                for k in 0..d {
                    let dof = d * global_node + k;
                    if !self.constrained_mask[dof] {
                        dst[dof] += local[lane * dofs_per_cell + d * node + k];
                    }
                }
            }
        }
    }
}
