pub mod command;
pub mod editing;
pub mod error;
pub mod project;
pub mod snapping;
pub mod store;
pub mod sync;
pub mod types;

pub use error::{CoreError, Result};
pub use types::*;
