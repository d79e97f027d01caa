//! FileSize Type-Safe Wrapper
//!
//! Byte counts for upload ceilings and artifact reporting.

use std::fmt;

// ============================================================================
// FileSize Newtype
// ============================================================================

/// File size in bytes.
///
/// # Examples
/// ```
/// use shared_utils::types::file_size::FileSize;
///
/// let limit = FileSize::from_mb(100);
/// assert_eq!(limit.bytes(), 104_857_600);
/// assert_eq!(limit.display(), "100.00 MB");
/// assert!(FileSize::new(1024).exceeds(FileSize::new(1000)));
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileSize(u64);

impl FileSize {
    pub const ZERO: FileSize = FileSize(0);

    pub const KB: u64 = 1024;
    pub const MB: u64 = 1024 * 1024;
    pub const GB: u64 = 1024 * 1024 * 1024;

    #[inline]
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    #[inline]
    pub const fn from_mb(mb: u64) -> Self {
        Self(mb * Self::MB)
    }

    #[inline]
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// True when `self` is strictly larger than `limit`.
    #[inline]
    pub fn exceeds(&self, limit: FileSize) -> bool {
        self.0 > limit.0
    }

    /// Human readable size with an automatically chosen unit.
    pub fn display(&self) -> String {
        let bytes = self.0;
        if bytes >= Self::GB {
            format!("{:.2} GB", bytes as f64 / Self::GB as f64)
        } else if bytes >= Self::MB {
            format!("{:.2} MB", bytes as f64 / Self::MB as f64)
        } else if bytes >= Self::KB {
            format!("{:.2} KB", bytes as f64 / Self::KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display())
    }
}

impl fmt::Debug for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileSize({} = {})", self.0, self.display())
    }
}

impl From<u64> for FileSize {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}
