pub mod installer;
pub mod instance;
pub mod mirrors;
pub mod resolution;
pub mod sources;
pub mod types;
