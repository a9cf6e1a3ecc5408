//! Request middleware.
//!
//! Purpose: hold cross-cutting request lifecycle concerns. Today that is the
//! trace identifier shared by logs, error payloads and response headers.

pub mod trace;

pub use trace::Trace;
