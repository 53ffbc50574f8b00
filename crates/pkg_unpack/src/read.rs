//! Functions that enable extracting a compressed package from a [`std::io::Read`]
//! implementation.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use pkg_inflate::InflateOptions;
use tempfile::SpooledTempFile;

use crate::{unarchive_with_options, ExtractError, UnarchiveOptions};

/// The amount of decompressed data that is kept in memory before it is spilled to disk.
const SPOOL_THRESHOLD: usize = 5 * 1024 * 1024;

/// Extracts the contents of a compressed package read from `reader` into the specified
/// destination.
///
/// ```rust,no_run
/// # use std::path::Path;
/// use pkg_unpack::read::extract;
/// let package = std::fs::File::open("zlib-1.3.1.pkg").unwrap();
/// extract(package, Path::new("/opt/local")).unwrap();
/// ```
pub fn extract(reader: impl Read, destination: &Path) -> Result<(), ExtractError> {
    extract_with_options(
        reader,
        destination,
        &InflateOptions::default(),
        &UnarchiveOptions::default(),
    )
}

/// Extracts the contents of a compressed package read from `reader` into the specified
/// destination using the specified options.
///
/// The package is decompressed completely before the first entry is materialized, so a corrupt
/// compressed stream never leaves a partially extracted package behind.
pub fn extract_with_options(
    reader: impl Read,
    destination: &Path,
    inflate_options: &InflateOptions,
    unarchive_options: &UnarchiveOptions,
) -> Result<(), ExtractError> {
    let mut archive = SpooledTempFile::new(SPOOL_THRESHOLD);
    pkg_inflate::decompress_with_options(reader, &mut archive, inflate_options)?;
    archive.seek(SeekFrom::Start(0))?;

    unarchive_with_options(archive, destination, unarchive_options)
}
