//! Pipeline stages for HTML-to-PDF conversion.
//!
//! Each submodule implements exactly one step. Keeping them separate makes
//! each independently testable, and keeps the only stage that touches the
//! operating system's process table ([`supervise`]) small enough to reason
//! about.
//!
//! ## Data Flow
//!
//! ```text
//! multipart ──▶ decode ──▶ args ──▶ supervise ──▶ PDF bytes
//!  (parts)   (workspace)  (argv)   (renderer)
//! ```
//!
//! 1. [`workspace`] — per-request private temp directory; removed on release
//!    or drop
//! 2. [`decode`]    — consume the parts, write files into the workspace,
//!    collect renderer options
//! 3. [`args`]      — pure translation to the renderer's ordered argv
//! 4. [`supervise`] — spawn, drain, cancel and reap the renderer process

pub mod args;
pub mod decode;
pub mod supervise;
pub mod workspace;
