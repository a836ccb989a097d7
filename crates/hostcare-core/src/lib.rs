pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod io;
pub mod operation;
pub mod orchestrator;
pub mod paths;
pub mod precondition;
pub mod record;
pub mod registry;
pub mod rules;
pub mod types;

pub use error::{HostcareError, PreconditionError, Result};
pub use types::{OperationMode, Profile, ResultCode};
