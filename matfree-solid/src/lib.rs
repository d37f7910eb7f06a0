//! Solid mechanics material laws for `matfree`.
//!
//! The materials in this crate implement [`ConstitutiveModel`](matfree::material::ConstitutiveModel),
//! so they can be bound to a [`TangentOperator`](matfree::operator::TangentOperator).
pub mod materials;
