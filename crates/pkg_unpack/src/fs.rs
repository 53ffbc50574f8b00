//! Functions to extract a package from a file on disk.

use std::io::BufReader;
use std::path::Path;

use crate::ExtractError;

/// Extracts the contents of the compressed package at the specified path to a directory.
///
/// ```rust,no_run
/// # use std::path::Path;
/// use pkg_unpack::fs::extract;
/// extract(Path::new("packages/zlib-1.3.1.pkg"), Path::new("/opt/local")).unwrap();
/// ```
pub fn extract(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let file = fs_err::File::open(archive)?;
    crate::read::extract(file, destination)
}

/// Extracts the contents of the uncompressed archive at the specified path to a directory.
pub fn unarchive(archive: &Path, destination: &Path) -> Result<(), ExtractError> {
    let file = fs_err::File::open(archive)?;
    crate::unarchive(BufReader::new(file), destination)
}
