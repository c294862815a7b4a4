//! Streams a PC emulator's text-mode screen to a viewer over a Unix-domain
//! socket and feeds the viewer's keyboard back as BIOS keycodes.
//!
//! The host owns a [`TextStream`], drives it with [`TextStream::on_vsync`]
//! once per display refresh, and implements the [`capture::VideoSource`] and
//! [`input::KeyboardSink`] seams against its own video and keyboard cores.

pub mod capture;
pub mod input;
pub mod model;
pub mod protocol;
pub mod render;
pub mod server;

mod session;

pub use protocol::TransportError;
pub use server::{StreamConfig, TextStream};
