//! Approval policy gate for EVM token allowances

pub mod engine;

pub use engine::{
    build_capped_approval, build_capped_permit, CappedAlternative, PolicyDecision, PolicyEngine, PolicyViolation,
};
