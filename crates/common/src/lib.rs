//! Common types shared by the implicit-flow workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
