//! Core domain types and shared logic for the Lectern video delivery server.
//!
//! This crate defines the canonical data model used across all other crates:
//! - HTTP range parsing and resolution
//! - Requester entitlement and access decisions
//! - Upload session lifecycle
//! - Configuration shared by storage and server

pub mod access;
pub mod config;
pub mod error;
pub mod range;
pub mod upload;

pub use access::{AccessDecision, DenyReason, Requester, Role};
pub use error::{Error, Result};
pub use range::{ByteRange, ResolvedRange, parse_range};
pub use upload::{UploadId, UploadSession, UploadState};

/// Default window for open-ended range requests served from disk: 1 MiB
pub const DISK_RANGE_WINDOW: u64 = 1024 * 1024;
