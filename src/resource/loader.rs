//! Audio resource loader - reads encoded audio files into memory
//!
//! An [`AudioResource`] owns the complete encoded file and exposes it to the
//! decoders as a seekable byte stream. Loading happens once per audio object;
//! the bytes are released on unload.
//!
//! # Example
//! ```ignore
//! let mut rng = rand::thread_rng();
//! let file_name = resolve_file_name("step", &mut rng); // e.g. "step003.ogg"
//! let resource = AudioResource::load(config.resource_path(&file_name))?;
//! ```

use std::fs;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use rand::Rng;
use thiserror::Error;

/// Extensions that are used verbatim by [`resolve_file_name`]
pub const KNOWN_EXTENSIONS: &[&str] = &[".ogg", ".wav"];

/// Number of variants a stem-only audio name may pick from
pub const RANDOM_VARIANTS: u32 = 6;

/// Error type for resource loading operations
#[derive(Debug, Error)]
pub enum LoaderError {
    /// File does not exist
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    /// I/O error reading the file
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LoaderError>;

/// Seekable byte stream consumed by the stream decoders
///
/// `close` rewinds the stream to its start without releasing the bytes.
pub trait ByteSource: Read + Seek + Send {
    fn name(&self) -> &str;
    fn tell(&self) -> u64;
    fn len(&self) -> u64;
    fn close(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Encoded audio file held entirely in memory
#[derive(Debug, Clone)]
pub struct AudioResource {
    name: String,
    data: Vec<u8>,
    cursor: u64,
}

impl AudioResource {
    /// Read the whole file at `path`
    ///
    /// # Errors
    /// * `NotFound` - no file at `path`
    /// * `Io` - the file exists but could not be read
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => LoaderError::NotFound(path.to_path_buf()),
            _ => LoaderError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self::from_bytes(name, data))
    }

    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
            cursor: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Read for AudioResource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let start = self.cursor.min(self.data.len() as u64) as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.cursor += n as u64;
        Ok(n)
    }
}

impl Seek for AudioResource {
    /// Positions outside `0..=len` fail and reset the cursor to the start
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let len = self.data.len() as i128;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => self.cursor as i128 + delta as i128,
            SeekFrom::End(delta) => len + delta as i128,
        };

        if target < 0 || target > len {
            self.cursor = 0;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek to {} outside resource of {} bytes", target, len),
            ));
        }

        self.cursor = target as u64;
        Ok(self.cursor)
    }
}

impl ByteSource for AudioResource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tell(&self) -> u64 {
        self.cursor
    }

    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn close(&mut self) {
        self.cursor = 0;
    }
}

/// Turn an audio name into a file name
///
/// Names that already carry a known extension are returned unchanged. A bare
/// stem picks one of its numbered variants at random: `step` becomes
/// `step001.ogg` .. `step006.ogg`.
pub fn resolve_file_name<R: Rng + ?Sized>(name: &str, rng: &mut R) -> String {
    let lower = name.to_ascii_lowercase();
    if KNOWN_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return name.to_string();
    }

    let variant = rng.gen_range(1..=RANDOM_VARIANTS);
    format!("{}00{}.ogg", name, variant)
}
