#![warn(missing_docs)]

//! Volume controller for PulseAudio panel applets.
//!
//! The controller keeps a local mirror of the default sink's volume and
//! mute state, pushes changes back to the server and tells its consumers
//! (tray icon, popup slider, hotkeys) when something changed.

pub extern crate flexi_logger;
#[macro_use]
pub extern crate log;

#[macro_use]
pub extern crate error_chain;

#[macro_use]
pub extern crate serde_derive;
pub extern crate serde;
pub extern crate toml;

pub extern crate futures;
pub extern crate glib;
pub extern crate libpulse_binding;
pub extern crate libpulse_glib_binding;
pub extern crate xdg;

#[macro_use]
pub mod errors;

pub mod audio;
pub mod prefs;
pub mod support;
