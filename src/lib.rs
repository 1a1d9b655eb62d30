//! Scene audio core
//!
//! Streams compressed audio from disk, decodes it incrementally and feeds a
//! spatial audio backend, with fade envelopes, looping and matched playback
//! between audio objects.

pub mod cli;
pub mod config;
pub mod logging;
pub mod resource;
pub mod sound;
pub mod threading;

pub use cli::Cli;
pub use config::AudioConfig;
pub use logging::LogLevel;
