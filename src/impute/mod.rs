pub mod constraint;
pub mod engine;
pub mod models;

pub use constraint::{ConstraintError, ConstraintTable, SqueezeAudit};
pub use engine::{ImputationEngine, ImputationResult, ImputeError};
pub use models::ModelError;
