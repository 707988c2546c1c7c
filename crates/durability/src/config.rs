//! Store configuration
//!
//! Controls how commits are sealed and how much memory the write and
//! recovery paths use. Nothing here is persisted in the file: a store written
//! with one configuration can be opened with any other.

use crate::format::FOOTER_SIZE;
use k2v_core::ConfigError;

/// How a commit footer proves the commit is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// CRC32 over every byte since the prior commit (the default)
    #[default]
    Checksum,

    /// fsync the body, then write the footer with a fixed marker
    ///
    /// Cheaper when bytes reach the file without passing through the
    /// checksum, at the price of one more sync per commit.
    DoubleSync,
}

impl CommitMode {
    /// Human-readable description of the mode
    pub fn description(&self) -> &'static str {
        match self {
            CommitMode::Checksum => "Checksum (one sync, CRC32 verified on open)",
            CommitMode::DoubleSync => "Double sync (two ordered syncs, no checksum)",
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Commit sealing mode (default: Checksum)
    pub commit_mode: CommitMode,

    /// Tail write buffer in bytes (default: 256KB)
    ///
    /// Document bytes are staged here before reaching the file. Writes larger
    /// than the buffer bypass it.
    pub write_buffer_size: usize,

    /// Bytes examined per read while scanning backward for a checkpoint
    /// (default: 4KB)
    pub scan_window: usize,
}

/// Smallest accepted write buffer.
pub const MIN_WRITE_BUFFER_SIZE: usize = 4 * 1024;

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            commit_mode: CommitMode::Checksum,
            write_buffer_size: 256 * 1024, // 256KB
            scan_window: 4 * 1024,         // 4KB
        }
    }
}

impl StoreConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set commit mode (builder pattern).
    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    /// Set write buffer size (builder pattern).
    pub fn with_write_buffer_size(mut self, bytes: usize) -> Self {
        self.write_buffer_size = bytes;
        self
    }

    /// Set recovery scan window (builder pattern).
    pub fn with_scan_window(mut self, bytes: usize) -> Self {
        self.scan_window = bytes;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_buffer_size < MIN_WRITE_BUFFER_SIZE {
            return Err(ConfigError::WriteBufferTooSmall {
                min: MIN_WRITE_BUFFER_SIZE,
                actual: self.write_buffer_size,
            });
        }
        if self.scan_window < FOOTER_SIZE {
            return Err(ConfigError::ScanWindowTooSmall {
                min: FOOTER_SIZE,
                actual: self.scan_window,
            });
        }
        Ok(())
    }

    /// Create a configuration for testing (small buffers, so buffer
    /// overflow paths run on modest inputs).
    pub fn for_testing() -> Self {
        StoreConfig {
            commit_mode: CommitMode::Checksum,
            write_buffer_size: MIN_WRITE_BUFFER_SIZE,
            scan_window: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.commit_mode, CommitMode::Checksum);
        assert_eq!(config.write_buffer_size, 256 * 1024);
        assert_eq!(config.scan_window, 4 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = StoreConfig::new()
            .with_commit_mode(CommitMode::DoubleSync)
            .with_write_buffer_size(1024 * 1024)
            .with_scan_window(512);

        assert_eq!(config.commit_mode, CommitMode::DoubleSync);
        assert_eq!(config.write_buffer_size, 1024 * 1024);
        assert_eq!(config.scan_window, 512);
    }

    #[test]
    fn test_validation_buffer_too_small() {
        let config = StoreConfig::new().with_write_buffer_size(100);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::WriteBufferTooSmall { actual: 100, .. })
        ));
    }

    #[test]
    fn test_validation_scan_window_too_small() {
        let config = StoreConfig::new().with_scan_window(FOOTER_SIZE - 1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ScanWindowTooSmall { .. })
        ));
    }

    #[test]
    fn test_testing_config() {
        let config = StoreConfig::for_testing();
        assert!(config.validate().is_ok());
        assert!(config.write_buffer_size < StoreConfig::default().write_buffer_size);
    }

    #[test]
    fn test_mode_descriptions_differ() {
        assert_ne!(
            CommitMode::Checksum.description(),
            CommitMode::DoubleSync.description()
        );
    }
}
