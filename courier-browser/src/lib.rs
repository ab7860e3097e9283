//! Chromium-backed automation surface for the courier engine.
//!
//! Drives a persistent Chrome profile over CDP so the messaging login
//! survives restarts.

mod chromium;

pub use chromium::{ChromiumLauncher, ChromiumPage};
