//! Type-Safe Wrappers Module
//!
//! - `file_size`: byte counts with unit-aware display

pub mod file_size;

pub use file_size::FileSize;
