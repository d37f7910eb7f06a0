//! Matrix-free tangent operators for large-strain solid mechanics.
//!
//! The central type is [`TangentOperator`](operator::TangentOperator), which applies the
//! tangent stiffness of a compressible hyperelastic material to a vector without ever
//! forming a matrix. The operator combines two [cell batch geometries](geometry::CellBatchGeometry),
//! one for the current (deformed) configuration and one for the reference configuration,
//! and can extract its own diagonal for use as a Jacobi preconditioner
//! in the [conjugate gradient](cg::ConjugateGradient) solver.
use nalgebra::{DimMin, DimName, RealField};

pub mod allocators;
pub mod cg;
pub mod element;
pub mod evaluator;
pub mod geometry;
pub mod kinematics;
pub mod material;
pub mod mesh;
pub mod operator;
pub mod preconditioner;
pub mod quadrature;
pub mod settings;

pub extern crate nalgebra;

/// A small, fixed-size dimension.
///
/// Used as a trait alias for various traits frequently needed by generic `matfree` routines.
pub trait SmallDim: DimName + DimMin<Self, Output = Self> {}

impl<D> SmallDim for D where D: DimName + DimMin<Self, Output = Self> {}

/// Real scalar types usable with the operators in this crate.
pub trait Real: RealField + Copy + Send + Sync {}

impl<T: RealField + Copy + Send + Sync> Real for T {}
