#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `redcat-session` is the platform facade every higher module consumes: it
//! composes the channel, the delimiter protocol, and the GTFOBins catalog
//! into convenient, file-like semantics. [`Session`] owns the channel behind
//! a mutex, the remote binary-path cache, and the catalog; it exposes
//! `run`/`which`/`open_read`/`open_write`/`subprocess`/`tempfile`/`getenv`/
//! `sudo` plus the per-block download driver.
//!
//! # Ownership and serialization
//!
//! All remote state (shell prompt, job state, terminal discipline) is shared
//! mutable state multiplexed onto one serial channel, so exactly one
//! operation may be in flight per session. The channel mutex enforces this
//! structurally: buffered operations hold the lock for their duration, and a
//! [`RemoteFile`] or streamed subprocess holds the guard until it is closed.
//! Issuing another operation from the same thread while a stream is open
//! deadlocks rather than corrupting framing; from another thread it queues.
//!
//! # Error mapping
//!
//! Resolution failures surface as standard file conditions — missing remote
//! files map to [`SessionError::NotFound`], unreadable ones to
//! [`SessionError::PermissionDenied`], exhausted method candidates to
//! [`SessionError::NoTransferMethod`] — so generic file-handling code above
//! this layer needs no catalog-specific knowledge.

mod error;
mod file;
mod session;

pub use crate::error::SessionError;
pub use crate::file::RemoteFile;
pub use crate::session::Session;
