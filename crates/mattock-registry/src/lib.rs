pub mod loader;
pub mod records;

pub use loader::{RegistryError, RegistryManager};
pub use records::*;
