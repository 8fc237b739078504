pub mod auth;
pub mod error;
pub mod game;
pub mod settings;
pub mod utils;

// Re-export commonly used types
pub use auth::{AuthToken, CredentialProvider};
pub use error::{DiscoveryError, DownloadError, RegistryError, SourceError, StoreError};
pub use game::instance::{InstanceMeta, InstanceRegistry, InstanceState, ValidationResult};
pub use game::installer::{DownloadOrchestrator, DownloadOutcome, DownloadRequest};
pub use game::mirrors::{MirrorDescriptor, MirrorStore};
pub use game::resolution::{VersionListing, VersionResolutionService};
pub use game::types::{Branch, VersionOrigin, VersionRecord};
pub use settings::SettingsStore;
