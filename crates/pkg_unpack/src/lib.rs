#![deny(missing_docs)]

//! This crate materializes package archives onto the filesystem.
//!
//! A package is a zlib compressed ustar archive. Extraction happens in two synchronous stages:
//! the compressed stream is decompressed with [`pkg_inflate`], after which the raw archive is
//! parsed block by block and every entry is recreated below a destination directory with the
//! type, permissions, ownership and modification time recorded in its header.
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! // Extract a compressed package into the current working directory.
//! pkg_unpack::fs::extract(Path::new("zlib-1.3.1.pkg"), Path::new(".")).unwrap();
//! ```
//!
//! There is no rollback: when extraction fails, the entries that were materialized before the
//! failing one remain on disk.

#[cfg(not(unix))]
compile_error!("pkg_unpack only supports unix platforms");

use std::fmt;
use std::fmt::Formatter;
use std::path::PathBuf;

pub mod dirs;
pub mod fs;
pub mod header;
pub mod numeric;
pub mod read;
mod unarchive;

pub use header::{EntryType, Header, BLOCK_SIZE};
pub use numeric::NumericFieldError;
pub use pkg_inflate::{InflateError, InflateOptions};
pub use unarchive::{unarchive, unarchive_with_options, UnarchiveOptions};

/// An error that can occur when extracting a package archive.
#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    /// Reading the archive stream failed, this includes an archive that ends in the middle of a
    /// block.
    #[error("failed to read the archive stream")]
    IoError(#[from] std::io::Error),

    /// The destination directory could not be created.
    #[error("could not create the destination path")]
    CouldNotCreateDestination(#[source] std::io::Error),

    /// Writing the contents of a regular file failed.
    #[error("failed to write the contents of {}", .path.display())]
    WriteContent {
        /// The file that was being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A numeric header field could not be decoded.
    #[error("invalid {field} field in the header of {}", .path.display())]
    InvalidField {
        /// The path of the entry as recorded in the archive.
        path: PathBuf,
        /// The name of the field.
        field: &'static str,
        /// Why the field could not be decoded.
        #[source]
        source: NumericFieldError,
    },

    /// The header carries a type tag that is not supported.
    #[error("unsupported entry type '{}' for {}", .tag.escape_ascii(), .path.display())]
    UnsupportedEntryType {
        /// The path of the entry as recorded in the archive.
        path: PathBuf,
        /// The raw type tag.
        tag: u8,
    },

    /// An entry path or hard link target tries to escape the destination directory.
    #[error("path traversal attempt in archive: {}", .0.display())]
    PathTraversal(PathBuf),

    /// A filesystem operation was rejected.
    #[error("failed to {operation} {}", .path.display())]
    Filesystem {
        /// The operation that failed.
        operation: Operation,
        /// The path the operation was applied to.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Decompressing the package failed.
    #[error(transparent)]
    DecompressError(#[from] InflateError),
}

/// The category of an [`ExtractError`].
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Reading the source stream or writing entry contents failed.
    StreamIo,
    /// The archive contains a malformed or unsupported header.
    Format,
    /// The filesystem rejected an operation.
    Filesystem,
    /// The decoder ran out of memory.
    ResourceExhausted,
    /// The compressed stream is invalid or incomplete.
    CorruptStream,
}

impl ExtractError {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::IoError(_) | ExtractError::WriteContent { .. } => ErrorKind::StreamIo,
            ExtractError::CouldNotCreateDestination(_) | ExtractError::Filesystem { .. } => {
                ErrorKind::Filesystem
            }
            ExtractError::InvalidField { .. }
            | ExtractError::UnsupportedEntryType { .. }
            | ExtractError::PathTraversal(_) => ErrorKind::Format,
            ExtractError::DecompressError(err) => match err {
                InflateError::OutOfMemory => ErrorKind::ResourceExhausted,
                InflateError::Read(_) | InflateError::Write(_) => ErrorKind::StreamIo,
                InflateError::Corrupt(_) | InflateError::Truncated => ErrorKind::CorruptStream,
            },
        }
    }

    /// Returns the operating system error code that caused this error, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            ExtractError::IoError(err)
            | ExtractError::CouldNotCreateDestination(err)
            | ExtractError::WriteContent { source: err, .. }
            | ExtractError::Filesystem { source: err, .. } => err.raw_os_error(),
            ExtractError::DecompressError(InflateError::OutOfMemory) => Some(libc::ENOMEM),
            ExtractError::DecompressError(err) => {
                err.io_error().and_then(std::io::Error::raw_os_error)
            }
            ExtractError::InvalidField { .. }
            | ExtractError::UnsupportedEntryType { .. }
            | ExtractError::PathTraversal(_) => None,
        }
    }
}

/// A filesystem operation performed while materializing an entry.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Operation {
    /// Creating the missing parent directories of an entry.
    CreateParentDirectories,
    /// Creating a directory entry.
    CreateDirectory,
    /// Creating a regular file.
    CreateFile,
    /// Creating a hard link.
    CreateHardLink,
    /// Creating a symbolic link.
    CreateSymlink,
    /// Creating a device node or named pipe.
    CreateNode,
    /// Changing the owning user and group.
    ChangeOwner,
    /// Changing the permission bits.
    ChangePermissions,
    /// Setting the access and modification times.
    SetTimestamps,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateParentDirectories => write!(f, "create the parent directories of"),
            Operation::CreateDirectory => write!(f, "create directory"),
            Operation::CreateFile => write!(f, "create file"),
            Operation::CreateHardLink => write!(f, "create hard link"),
            Operation::CreateSymlink => write!(f, "create symbolic link"),
            Operation::CreateNode => write!(f, "create special file"),
            Operation::ChangeOwner => write!(f, "change the owner of"),
            Operation::ChangePermissions => write!(f, "change the permissions of"),
            Operation::SetTimestamps => write!(f, "set the timestamps of"),
        }
    }
}

pub(crate) fn filesystem_error(
    operation: Operation,
    path: &std::path::Path,
    source: std::io::Error,
) -> ExtractError {
    ExtractError::Filesystem {
        operation,
        path: path.to_path_buf(),
        source,
    }
}
