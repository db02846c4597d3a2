//! Library components of the cellwire server.
//!
//! The binary wires these together: [`config`] and [`logging`] set up the
//! process, [`demo`] builds the exported control tree, [`capability`] hands
//! out the URLs clients use to reach it and [`server`] accepts connections.

#![allow(clippy::needless_pass_by_value)]

pub mod capability;
pub mod config;
pub mod demo;
pub mod logging;
pub mod server;
