//! Operator console module.
//!
//! Parses and executes the line commands an operator types while the
//! broadcaster runs.

mod handler;
mod seed;
mod types;

pub use handler::CommandHandler;
pub use seed::{SeedError, seed_memberships};
pub use types::{CommandResult, OperatorCommand};
