//! Common types for the Gemini gateway workspace

mod error;
mod key;

pub use error::{Error, Result};
pub use key::ApiKey;
