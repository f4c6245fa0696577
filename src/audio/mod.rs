//! Audio module - everything between a file on disk and the sound card
//!
//! This module provides:
//! - Decoded track storage
//! - File decoding with symphonia
//! - Sample rate conversion
//! - Device output with cpal

mod loader;
mod output;
mod resample;
mod track;

pub use loader::{is_supported, DecodedAudio, LoadError, Loader, SymphoniaLoader, SUPPORTED_EXTENSIONS};
pub use output::{list_output_devices, AudioOutput, OutputDevice, OutputError};
pub use resample::resample_interleaved;
pub use track::{Track, MAX_CHANNELS};
