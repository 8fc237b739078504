//! Host process for the Hearth launcher UI.

pub mod auth;
pub mod bridge;
pub mod commands;
pub mod launch;
pub mod setup;
pub mod utils;
