//! State Controller (§4.3, §4.4): the layered HMI-state machine and
//! its conflict-resolution and overlay-management logic.

pub mod controller;
pub mod stack;

pub use controller::{DeactivationReason, StateController};
pub use stack::StateStack;
