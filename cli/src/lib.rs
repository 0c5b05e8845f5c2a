//! Gateway bootstrap: wires config, stores, schedulers, and the channel
//! registry into a [`serve::GatewayState`] (spec §4.4 "startup").

pub mod bootstrap;
pub mod log_format;
pub mod logging;

pub use bootstrap::{bootstrap, BootstrapError, Layout};
