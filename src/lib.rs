//! roadsnap library
//!
//! Snaps GPS traces onto the road network and labels each point as
//! highway or service road. Exposes modules for integration testing and
//! binary reuse.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
