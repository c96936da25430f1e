#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `redcat-gtfobins` resolves a desired capability (read a file, write a
//! file, obtain a shell) plus a binary present on the remote host into the
//! exact shell command to run, the stdin bootstrap it needs, the bytes that
//! terminate it early, and the streaming discipline its output uses.
//!
//! The catalog is a static JSON data file mapping binary names to method
//! templates. It is decoded once at load time into strongly typed
//! [`MethodSpec`] values; template placeholders such as `{lfile}` or
//! `{base64}` are substituted at build time, recursively resolving referenced
//! binaries through a caller-supplied `which` resolver. The catalog never
//! performs I/O of its own.
//!
//! # Resolution semantics
//!
//! Missing binaries and unsupported capabilities are expected, recoverable
//! conditions. Resolution returns [`ResolutionError`] values from a closed
//! set (`MissingDependency`, `UnsupportedCapability`, `NoTemplate`,
//! `SudoNotPossible`) so "try the next candidate" is an ordinary branch;
//! nothing here is exception-driven.
//!
//! # Streaming disciplines
//!
//! [`Stream`] describes how payload bytes survive the text-oriented shell:
//! `Print` carries literal printable text only (guarded before any byte is
//! sent), `Raw` is exact passthrough and requires a declared length for
//! writes, and `Base64`/`Hex` wrap the raw stream in the incremental codec
//! adapters from [`adapter`].

pub mod adapter;
mod block;
mod capability;
mod catalog;
mod error;
mod method;

pub use crate::adapter::{PrintabilityError, ReadAdapter, WriteAdapter, ensure_printable};
pub use crate::block::{BlockDownload, BlockState, DEFAULT_BLOCK_SIZE};
pub use crate::capability::{Capability, Stream, StreamSet};
pub use crate::catalog::{Catalog, MethodSpec};
pub use crate::error::{CatalogError, ResolutionError};
pub use crate::method::{BuiltPayload, MethodHandle, PayloadRequest};
