//! Statistics module
//!
//! Running statistics ([`running`]) and the per-trial store ([`store`]).

pub mod running;
pub mod store;
