//! # Event Bus Module
//!
//! Unified publish/subscribe bus for decoupled communication between
//! components:
//! - Publishers emit typed events without knowing their subscribers
//! - Subscribers filter by category (connection, machine, scan)
//! - Supports both synchronous handlers and async broadcast receivers
//!
//! The scan orchestrator publishes phase changes and point outcomes here;
//! external collaborators (UI, logging) subscribe instead of registering
//! callbacks.

mod bus;
mod events;

pub use bus::*;
pub use events::*;
