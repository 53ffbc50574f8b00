#![deny(missing_docs)]

//! Incremental decompression of zlib streams.
//!
//! The [`decompress`] function reads a compressed stream in fixed-size chunks, feeds them to an
//! incremental zlib decoder and writes every produced chunk to the destination before requesting
//! more input. The compressed stream never has to fit in memory.
//!
//! Failures are reported as an [`InflateError`] which keeps the different failure modes apart: a
//! failing read or write on the underlying streams, the decoder running out of memory, and a
//! corrupt or truncated compressed stream.
//!
//! ```rust,no_run
//! use std::fs::File;
//! use std::io::BufWriter;
//!
//! let input = File::open("package.tar.z").unwrap();
//! let output = BufWriter::new(File::create("package.tar").unwrap());
//! let written = pkg_inflate::decompress(input, output).unwrap();
//! println!("decompressed {written} bytes");
//! ```

mod stream;

use std::io::{ErrorKind, Read, Write};

use stream::{Inflater, Status};

/// The default size of the input and output chunks.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// An error that can occur while decompressing a stream.
#[derive(thiserror::Error, Debug)]
pub enum InflateError {
    /// Reading from the compressed input failed.
    #[error("failed to read from the compressed stream")]
    Read(#[source] std::io::Error),

    /// Writing the decompressed output failed.
    #[error("failed to write the decompressed stream")]
    Write(#[source] std::io::Error),

    /// The decoder could not allocate the memory it requires.
    #[error("the decoder ran out of memory")]
    OutOfMemory,

    /// The compressed data is invalid.
    #[error("the compressed stream is corrupt: {0}")]
    Corrupt(String),

    /// The input ended before the decoder reached the end of the compressed stream.
    #[error("the compressed stream ended unexpectedly")]
    Truncated,
}

impl InflateError {
    /// Returns true if the error was caused by invalid or incomplete compressed data.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, InflateError::Corrupt(_) | InflateError::Truncated)
    }

    /// Returns the underlying io error if the error was caused by one of the streams.
    pub fn io_error(&self) -> Option<&std::io::Error> {
        match self {
            InflateError::Read(err) | InflateError::Write(err) => Some(err),
            _ => None,
        }
    }
}

/// Options to control how a stream is decompressed. Using [`InflateOptions::default`] works in
/// most cases.
#[derive(Debug, Clone)]
pub struct InflateOptions {
    /// The size of the chunks read from the input and handed to the output. Values are clamped to
    /// at least one byte.
    pub chunk_size: usize,

    /// The maximum number of bytes the decoder is allowed to allocate for its internal state. If
    /// the decoder requires more memory decompression fails with [`InflateError::OutOfMemory`].
    /// `None` means no limit.
    pub memory_limit: Option<usize>,
}

impl Default for InflateOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            memory_limit: None,
        }
    }
}

/// Decompresses the zlib stream read from `input` and writes the result to `output`. Returns the
/// number of decompressed bytes.
pub fn decompress(input: impl Read, output: impl Write) -> Result<u64, InflateError> {
    decompress_with_options(input, output, &InflateOptions::default())
}

/// Decompresses the zlib stream read from `input` and writes the result to `output` using the
/// specified options. Returns the number of decompressed bytes.
pub fn decompress_with_options(
    mut input: impl Read,
    mut output: impl Write,
    options: &InflateOptions,
) -> Result<u64, InflateError> {
    let chunk_size = options.chunk_size.max(1);
    let mut inflater = Inflater::new(options.memory_limit)?;
    let mut input_chunk = vec![0u8; chunk_size];
    let mut output_chunk = vec![0u8; chunk_size];
    let mut written = 0u64;

    loop {
        let filled = read_chunk(&mut input, &mut input_chunk)?;
        if filled == 0 {
            return Err(InflateError::Truncated);
        }

        let mut pending = &input_chunk[..filled];
        loop {
            let progress = inflater.inflate(pending, &mut output_chunk)?;
            pending = &pending[progress.consumed..];

            if progress.produced > 0 {
                output
                    .write_all(&output_chunk[..progress.produced])
                    .map_err(InflateError::Write)?;
                written += progress.produced as u64;
            }

            if progress.status == Status::StreamEnd {
                output.flush().map_err(InflateError::Write)?;
                if !pending.is_empty() {
                    tracing::debug!(
                        "ignoring {} bytes after the end of the compressed stream",
                        pending.len()
                    );
                }
                tracing::debug!("decompressed {written} bytes");
                return Ok(written);
            }

            // A full output chunk means the decoder may hold more output, drain it before
            // reading more input.
            let output_full = progress.produced == output_chunk.len();
            if !output_full && (progress.status == Status::NoProgress || pending.is_empty()) {
                break;
            }
        }
    }
}

/// Reads the next chunk from `reader`, retrying reads that were interrupted.
fn read_chunk(reader: &mut impl Read, chunk: &mut [u8]) -> Result<usize, InflateError> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(InflateError::Read(err)),
        }
    }
}
