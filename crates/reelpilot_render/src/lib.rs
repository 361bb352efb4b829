pub mod error;
pub mod ops;
pub mod probe;
pub mod queue;
pub mod render;
pub mod tasks;

pub use error::{RenderError, Result};
