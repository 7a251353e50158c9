//! I2P transport via the SAM v3 bridge.
//!
//! The controller creates a STREAM session; dialers and the listener
//! attach to it by nick and hand their sockets to ordinary connection
//! workers, which treat the resulting byte streams exactly like TCP.

pub mod controller;
pub mod dialer;
pub mod listener;
pub mod sam;
pub mod util;

pub use controller::I2pController;
