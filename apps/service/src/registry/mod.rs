/// Node registry module - keeps the local inventory in step with the
/// external node directory
pub mod directory;
pub mod sync;

pub use directory::{DirectoryClient, DirectoryError, NodeDirectory};
pub use sync::RegistrySync;
