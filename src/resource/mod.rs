// Resource Module
// Loads encoded audio files and configuration text

pub mod loader;
pub mod propfile;

pub use loader::{resolve_file_name, AudioResource, ByteSource, LoaderError};
pub use propfile::parse_propfile;
