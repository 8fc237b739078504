//! Centralized installer settings.
//! Static constants used by the downloader, patcher and orchestrator.

/// Attempts per artifact before the source is given up on
pub const MAX_ATTEMPTS: u32 = 3;
/// Base back-off between attempts; multiplied by the attempt number
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Minimum time between two byte-progress events
pub const PROGRESS_INTERVAL_MS: u64 = 200;

/// Suffix of in-flight staged downloads
pub const PART_SUFFIX: &str = "part";
/// Read buffer used when hashing staged files
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Archive entry of a delta listing paths to delete, one per line
pub const REMOVED_LIST_ENTRY: &str = ".hearth-removed";
/// Scratch directory (under staging) a full archive is extracted into
pub const EXTRACT_DIR: &str = "extract";
/// Previous client directory kept (under staging) until a full install commits
pub const BACKUP_DIR: &str = "game.bak";
