pub mod error;
pub mod version;

pub use error::{MigrateError, Result};
pub use version::SchemaVersion;
