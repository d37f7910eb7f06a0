//! Configuration of the tangent operator.
use crate::Real;
use numeric_literals::replace_float_literals;
use serde::{Deserialize, Serialize};

/// How constrained dofs are treated after the cell loop of an operator application.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintPolicy {
    /// Constrained rows act as the identity, i.e. `dst[c] += src[c]`.
    ///
    /// This does not account for coupled (hanging-node-like) constraints.
    IdentityPassThrough,
    /// Constrained rows are left as produced by the cell loop, which never writes to them.
    Skip,
}

/// Which geometry provides the set of constrained dofs used by the constraint policy.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintSource {
    Current,
    Reference,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorSettings<T> {
    /// Current-configuration integration weights with magnitude at or below this tolerance
    /// are not used to rescale the reference weight.
    pub weight_tolerance: T,
    pub constraint_policy: ConstraintPolicy,
    pub constraint_source: ConstraintSource,
    /// Evaluate cell batches in parallel. Accumulation into the output remains sequential,
    /// so results do not depend on this flag.
    pub parallel: bool,
}

impl<T: Real> Default for OperatorSettings<T> {
    #[replace_float_literals(T::from_f64(literal).expect("Literal must fit in T"))]
    fn default() -> Self {
        Self {
            weight_tolerance: 1e-10,
            constraint_policy: ConstraintPolicy::IdentityPassThrough,
            constraint_source: ConstraintSource::Current,
            parallel: false,
        }
    }
}
