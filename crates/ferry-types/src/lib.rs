//! Core types for ferry, the cross-context remote module proxy.
//!
//! This crate defines the data model shared by the privileged remote context
//! and every client context: call envelopes and results, broadcast messages,
//! bridged events, module interface declarations, the error taxonomy, and the
//! configuration struct. It contains no business logic.

pub mod broadcast;
pub mod config;
pub mod envelope;
pub mod error;
pub mod event;
pub mod host;
pub mod module;
