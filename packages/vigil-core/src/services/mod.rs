//! Ancillary background services.

pub mod tts;

pub use tts::TtsWorker;
