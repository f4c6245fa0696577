//! looper-rs - loop player engine
//!
//! Plays a decoded audio file on loop between two frame offsets, optionally
//! walking through a playlist, with independent tempo/pitch control.
//!
//! The real-time side lives in [`engine`]: the loop transport, the
//! time-stretch wrapper, the track handoff barrier and the background
//! prefetcher. [`audio`] holds the collaborators around it (decoding,
//! resampling, device output), and [`session`] ties everything together for
//! the control thread.

pub mod audio;
pub mod control;
pub mod engine;
pub mod playlist;
pub mod session;
pub mod settings;
