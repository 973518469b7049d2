//! cdw - terminal sessions with a local automation API
//!
//! cdw hosts interactive shells in pseudo-terminals and tracks each shell's
//! working directory as it changes. Local tools can open a session already
//! sitting in a project directory with commands typed into it.
//!
//! ## Parts
//!
//! 1. **Sessions** ([`pty`]): one shell per session id, output streamed to a
//!    listener, cwd reported through OSC 7 with platform fallbacks.
//!
//! 2. **Automation API** ([`automation`]): a loopback-only HTTP endpoint
//!    guarded by a per-run bearer token, path sandboxing and rate limits.
//!
//! [`app::App`] wires the two together.

pub mod app;
pub mod automation;
pub mod config;
pub mod pty;
