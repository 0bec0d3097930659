//! Shared configuration constants for previewbox crates.

pub mod constants;
