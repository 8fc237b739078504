//! Instances: isolated installs with their own client files and user data.

pub mod registry;
pub mod relocate;
pub mod types;
pub mod validation;

pub use registry::InstanceRegistry;
pub use relocate::MoveProgress;
pub use types::{CreateInstance, InstanceLayout, InstanceMeta, InstanceState, ValidationResult};
