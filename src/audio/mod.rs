//! Audio subsystem.
//!
//! The `VolumeController` is the middleman between the sound server and
//! the ui code. The server itself is hidden behind the `Session` and
//! `Connector` traits, so the controller doesn't know about libpulse.

pub mod controller;
pub mod frontend;
pub mod pulseaudio;
pub mod session;

#[cfg(test)]
pub mod mock;

pub use self::controller::{Subscription, VolumeController, VolumeHandle};
pub use self::frontend::{AudioSignal, HandlerId};
pub use self::session::SessionState;
