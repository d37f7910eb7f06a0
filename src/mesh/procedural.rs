//! Basic procedural mesh generation routines.
use crate::element::{Hex8Connectivity, Quad4d2Connectivity};
use crate::mesh::{HexMesh, QuadMesh2d};
use crate::Real;
use nalgebra::{Point2, Point3};

fn usize_to_real<T: Real>(value: usize) -> T {
    T::from_usize(value).expect("Must be able to fit usize in T")
}

pub fn create_unit_square_uniform_quad_mesh_2d<T: Real>(cells_per_dim: usize) -> QuadMesh2d<T> {
    create_rectangular_uniform_quad_mesh_2d(T::one(), 1, 1, cells_per_dim)
}

pub fn create_unit_box_uniform_hex_mesh_3d<T: Real>(cells_per_dim: usize) -> HexMesh<T> {
    create_rectangular_uniform_hex_mesh(T::one(), 1, 1, 1, cells_per_dim)
}

/// Generates an axis-aligned rectangular uniform quad mesh with its lower-left corner at the origin,
/// given a unit length, dimensions as multipliers of the unit length and the number of cells per
/// unit length.
///
/// Cells are ordered row by row, and each cell is oriented counter-clockwise.
pub fn create_rectangular_uniform_quad_mesh_2d<T: Real>(
    unit_length: T,
    units_x: usize,
    units_y: usize,
    cells_per_unit: usize,
) -> QuadMesh2d<T> {
    if cells_per_unit == 0 || units_x == 0 || units_y == 0 {
        return QuadMesh2d::from_vertices_and_connectivity(Vec::new(), Vec::new());
    }

    let cell_size = unit_length / usize_to_real(cells_per_unit);
    let num_cells_x = units_x * cells_per_unit;
    let num_cells_y = units_y * cells_per_unit;
    let to_global_vertex_index = |i, j| (num_cells_x + 1) * j + i;

    let mut vertices = Vec::new();
    for j in 0..=num_cells_y {
        for i in 0..=num_cells_x {
            let x: T = usize_to_real(i);
            let y: T = usize_to_real(j);
            vertices.push(Point2::new(x * cell_size, y * cell_size));
        }
    }

    let mut cells = Vec::new();
    for j in 0..num_cells_y {
        for i in 0..num_cells_x {
            cells.push(Quad4d2Connectivity([
                to_global_vertex_index(i, j),
                to_global_vertex_index(i + 1, j),
                to_global_vertex_index(i + 1, j + 1),
                to_global_vertex_index(i, j + 1),
            ]));
        }
    }

    QuadMesh2d::from_vertices_and_connectivity(vertices, cells)
}

/// Generates an axis-aligned box-shaped uniform hexahedral mesh with a corner at the origin.
///
/// The node ordering of each cell matches the reference hexahedron, so every cell has a
/// positive Jacobian determinant.
pub fn create_rectangular_uniform_hex_mesh<T: Real>(
    unit_length: T,
    units_x: usize,
    units_y: usize,
    units_z: usize,
    cells_per_unit: usize,
) -> HexMesh<T> {
    if cells_per_unit == 0 || units_x == 0 || units_y == 0 || units_z == 0 {
        return HexMesh::from_vertices_and_connectivity(Vec::new(), Vec::new());
    }

    let cell_size = unit_length / usize_to_real(cells_per_unit);
    let num_cells_x = units_x * cells_per_unit;
    let num_cells_y = units_y * cells_per_unit;
    let num_cells_z = units_z * cells_per_unit;
    let num_vertices_x = num_cells_x + 1;
    let num_vertices_y = num_cells_y + 1;
    let to_global_vertex_index = |i, j, k| num_vertices_x * num_vertices_y * k + num_vertices_x * j + i;

    let mut vertices = Vec::new();
    for k in 0..=num_cells_z {
        for j in 0..=num_cells_y {
            for i in 0..=num_cells_x {
                let x: T = usize_to_real(i);
                let y: T = usize_to_real(j);
                let z: T = usize_to_real(k);
                vertices.push(Point3::new(x * cell_size, y * cell_size, z * cell_size));
            }
        }
    }

    let mut cells = Vec::new();
    for k in 0..num_cells_z {
        for j in 0..num_cells_y {
            for i in 0..num_cells_x {
                let idx = to_global_vertex_index;
                cells.push(Hex8Connectivity([
                    idx(i, j, k),
                    idx(i + 1, j, k),
                    idx(i + 1, j + 1, k),
                    idx(i, j + 1, k),
                    idx(i, j, k + 1),
                    idx(i + 1, j, k + 1),
                    idx(i + 1, j + 1, k + 1),
                    idx(i, j + 1, k + 1),
                ]));
            }
        }
    }

    HexMesh::from_vertices_and_connectivity(vertices, cells)
}
