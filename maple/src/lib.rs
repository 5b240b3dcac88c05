//! The `maple` daemon: loads its configuration and runs the notification
//! mail dispatcher until asked to stop.

pub mod controller;

pub use controller::{Maple, SHUTDOWN_BROADCAST};
