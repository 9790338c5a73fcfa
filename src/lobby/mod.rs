//! Participants, sides and the session phase machine
//!
//! Everything here is shared through the state channel: the roster, the role
//! seed, the phase record and the ownership registry.

pub mod lifecycle;
pub mod ownership;
pub mod roles;
pub mod roster;
