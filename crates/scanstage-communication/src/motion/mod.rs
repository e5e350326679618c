//! Motion layer: typed, validated operations over the protocol client
//!
//! Owns the homing and alarm-recovery procedures and the motion-completion
//! heuristics that paper over the firmware's inconsistent acknowledgments.

pub mod controller;

pub use controller::{MotionConfig, MotionController};
