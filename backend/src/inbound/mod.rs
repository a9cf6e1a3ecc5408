//! Inbound adapters that translate external requests into domain service
//! calls while keeping framework details at the edge.
//!
//! REST handlers live under [`http`]; the chat socket lives under [`ws`] and
//! shares the HTTP adapter's state and error envelope.

pub mod http;
pub mod ws;
