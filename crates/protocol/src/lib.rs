#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `redcat-protocol` turns the undifferentiated byte stream of an interactive
//! remote shell into well-formed command output. The remote side offers no
//! message boundaries, echoes input unpredictably, and intermixes prompts and
//! job-control chatter with real output; this crate frames every command
//! between freshly generated sentinel tokens and scans the incoming stream
//! for those tokens, including tokens split across receive boundaries.
//!
//! # Design
//!
//! Three layers, leaf first:
//!
//! - Wire-level synchronization helpers: receive-until, drain, and a bounded
//!   non-destructive peek ([`recv_until`], [`flush_output`],
//!   [`peek_at_least`]).
//! - The delimiter protocol and command runner: [`launch`] frames and sends a
//!   command, [`collect`] captures its output, [`run`] combines both, and
//!   [`spawn`] starts a long-lived remote process for streaming.
//! - [`RemoteStream`]: a blocking, byte-exact [`Read`](std::io::Read) +
//!   [`Write`](std::io::Write) view of a still-running remote process, with
//!   end-sentinel detection, bounded writes, and an idempotent EOF
//!   transition.
//!
//! # Invariants
//!
//! - Sentinel pairs are fresh per invocation and never reused; the token
//!   counter makes sequential pairs distinct by construction.
//! - One command in flight per channel. The protocol is not safe for
//!   concurrent use of a single channel; the session layer serializes with a
//!   mutex whose guard lives as long as any open stream.
//! - Delimiter bytes are never returned to a caller as payload, and a
//!   delimiter split across receive boundaries is still detected.

mod error;
mod runner;
mod stream;
mod token;
mod wire;

pub use crate::error::FramingError;
pub use crate::runner::{
    StreamOptions, collect, launch, run, run_detached, run_with_input, shell_quote, spawn,
};
pub use crate::stream::{RemoteStream, StreamMode};
pub use crate::token::{SentinelPair, SentinelToken, TOKEN_LEN};
pub use crate::wire::{flush_output, peek_at_least, peek_pending, recv_exact, recv_until};
