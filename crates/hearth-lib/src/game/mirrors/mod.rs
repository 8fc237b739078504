//! Mirror descriptors: persistence and discovery.

pub mod discovery;
pub mod store;
pub mod types;

pub use discovery::MirrorDiscoveryService;
pub use store::MirrorStore;
pub use types::{MirrorDescriptor, MirrorSourceConfig};
