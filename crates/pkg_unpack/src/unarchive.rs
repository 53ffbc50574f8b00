//! Functions to materialize an uncompressed archive onto the filesystem.

use std::ffi::{CString, OsStr};
use std::io::{self, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use filetime::FileTime;

use crate::dirs::{self, CreatedDirectories};
use crate::header::{padded_size, EntryType, Header, BLOCK_SIZE};
use crate::numeric::NumericFieldError;
use crate::{filesystem_error, ExtractError, Operation};

/// Options to control how an archive is materialized. Using [`UnarchiveOptions::default`] works
/// in most cases.
#[derive(Debug, Clone)]
pub struct UnarchiveOptions {
    /// The mode used for directories that are created because an entry needs them but that are
    /// not described by the archive itself. Subject to the process umask.
    pub dir_mode: u32,

    /// The mode regular files are created with before the mode recorded in the archive is
    /// applied. Subject to the process umask.
    pub file_mode: u32,

    /// Whether to change the owner and group of every entry to the ids recorded in the archive.
    /// When this is disabled the permission bits are still applied.
    pub restore_ownership: bool,

    /// The number of blocks that are read from the archive at once when copying file contents.
    /// Values are clamped to at least one block.
    pub copy_buffer_blocks: usize,
}

impl Default for UnarchiveOptions {
    fn default() -> Self {
        Self {
            dir_mode: 0o777,
            file_mode: 0o666,
            restore_ownership: true,
            copy_buffer_blocks: 16,
        }
    }
}

/// Materializes the uncompressed archive read from `reader` below `destination`.
///
/// Reading stops at the first terminator block, anything after it is left unread. The
/// destination is created if it does not exist yet.
///
/// The permissions, ownership and timestamps of directory entries are applied once the whole
/// archive has been materialized, deepest directories first. Creating the children of a
/// directory would otherwise update its modification time again, and a read-only directory
/// could not receive its children at all.
pub fn unarchive(reader: impl Read, destination: &Path) -> Result<(), ExtractError> {
    unarchive_with_options(reader, destination, &UnarchiveOptions::default())
}

/// Materializes the uncompressed archive read from `reader` below `destination` using the
/// specified options.
pub fn unarchive_with_options(
    mut reader: impl Read,
    destination: &Path,
    options: &UnarchiveOptions,
) -> Result<(), ExtractError> {
    dirs::ensure_dir_all(destination, options.dir_mode, options.dir_mode)
        .map_err(ExtractError::CouldNotCreateDestination)?;
    let destination = destination
        .canonicalize()
        .map_err(ExtractError::CouldNotCreateDestination)?;

    let mut created_dirs = CreatedDirectories::new(destination.clone(), options.dir_mode);
    let mut buffer = vec![0u8; options.copy_buffer_blocks.max(1) * BLOCK_SIZE];
    let mut directories = Vec::new();
    let mut entries = 0usize;

    loop {
        let Some(header) = read_header(&mut reader)? else {
            tracing::warn!(
                "archive ended without a terminating block after {entries} entries"
            );
            return restore_directory_metadata(directories, options);
        };

        if header.is_terminator() {
            tracing::debug!("materialized {entries} entries in {}", destination.display());
            return restore_directory_metadata(directories, options);
        }

        let entry = Entry::decode(&header, &destination)?;
        let Some(path) = entry.path.as_deref() else {
            tracing::trace!(
                "skipping entry {} without a destination",
                entry.archive_path.display()
            );
            if let EntryKind::File { size } = entry.kind {
                copy_content(&mut reader, io::sink(), size, &mut buffer, &entry.archive_path)?;
            }
            continue;
        };

        if let Some(parent) = path.parent() {
            created_dirs.create_dir_all(parent)?;
        }

        tracing::debug!("extracting {:?} {}", entry.entry_type, path.display());
        match &entry.kind {
            EntryKind::File { size } => {
                let file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(options.file_mode)
                    .open(path)
                    .map_err(|source| filesystem_error(Operation::CreateFile, path, source))?;
                copy_content(&mut reader, file, *size, &mut buffer, path)?;
            }
            EntryKind::HardLink { target } => {
                // The target may sit below a symbolic link extracted earlier.
                if let Some(parent) = target.parent() {
                    created_dirs.resolve(parent, Operation::CreateHardLink)?;
                }
                std::fs::hard_link(target, path)
                    .map_err(|source| filesystem_error(Operation::CreateHardLink, path, source))?;
            }
            EntryKind::Symlink { target } => {
                std::os::unix::fs::symlink(target, path)
                    .map_err(|source| filesystem_error(Operation::CreateSymlink, path, source))?;
            }
            EntryKind::Directory => {
                // Owner access is needed to create the children, the recorded mode is applied
                // afterwards.
                created_dirs.create_dir(path, entry.mode | 0o700, Operation::CreateDirectory)?;
            }
            EntryKind::Fifo => {
                make_fifo(path, entry.mode)
                    .map_err(|source| filesystem_error(Operation::CreateNode, path, source))?;
            }
            EntryKind::Device { file_type, device } => {
                make_device(path, *file_type, entry.mode, *device)
                    .map_err(|source| filesystem_error(Operation::CreateNode, path, source))?;
            }
        }

        if matches!(entry.kind, EntryKind::Directory) {
            directories.push(entry);
        } else {
            restore_metadata(&entry, path, options)?;
        }
        entries += 1;
    }
}

/// Applies the metadata of the directory entries, children before their parents.
fn restore_directory_metadata(
    mut directories: Vec<Entry>,
    options: &UnarchiveOptions,
) -> Result<(), ExtractError> {
    directories.sort_by_key(|entry| {
        std::cmp::Reverse(entry.path.as_deref().map_or(0, |path| path.components().count()))
    });
    for entry in &directories {
        if let Some(path) = entry.path.as_deref() {
            restore_metadata(entry, path, options)?;
        }
    }
    Ok(())
}

/// The decoded contents of a header.
#[derive(Debug)]
struct Entry {
    /// The path as recorded in the archive, used in error messages.
    archive_path: PathBuf,
    /// The location of the entry below the destination, `None` if the entry is skipped.
    path: Option<PathBuf>,
    entry_type: EntryType,
    kind: EntryKind,
    mode: u32,
    uid: u32,
    gid: u32,
    mtime: i64,
}

#[derive(Debug)]
enum EntryKind {
    File { size: u64 },
    HardLink { target: PathBuf },
    Symlink { target: PathBuf },
    Directory,
    Fifo,
    Device { file_type: libc::mode_t, device: libc::dev_t },
}

#[cfg(target_vendor = "apple")]
type DeviceNumber = libc::c_int;
#[cfg(not(target_vendor = "apple"))]
type DeviceNumber = libc::c_uint;

impl Entry {
    /// Decodes every field the entry needs. Nothing on the filesystem is touched, so a malformed
    /// header never leaves a partially materialized entry behind.
    fn decode(header: &Header, destination: &Path) -> Result<Self, ExtractError> {
        let archive_path = PathBuf::from(OsStr::from_bytes(&header.path_bytes()));
        let invalid = |field: &'static str, source: NumericFieldError| {
            ExtractError::InvalidField {
                path: archive_path.clone(),
                field,
                source,
            }
        };

        let entry_type = header
            .entry_type()
            .ok_or_else(|| ExtractError::UnsupportedEntryType {
                path: archive_path.clone(),
                tag: header.entry_tag(),
            })?;

        let mode = header.mode().map_err(|err| invalid("mode", err))?;
        let uid = header.uid().map_err(|err| invalid("uid", err))?;
        let gid = header.gid().map_err(|err| invalid("gid", err))?;
        let mtime = header.mtime().map_err(|err| invalid("mtime", err))?;

        let kind = match entry_type {
            EntryType::Regular | EntryType::Contiguous => EntryKind::File {
                size: header.size().map_err(|err| invalid("size", err))?,
            },
            EntryType::HardLink => {
                let target = Path::new(OsStr::from_bytes(header.link_name_bytes()));
                EntryKind::HardLink {
                    target: match normalize_archive_path(target)? {
                        Some(target) => destination.join(target),
                        None => destination.to_path_buf(),
                    },
                }
            }
            EntryType::Symlink => EntryKind::Symlink {
                target: PathBuf::from(OsStr::from_bytes(header.link_name_bytes())),
            },
            EntryType::Directory => EntryKind::Directory,
            EntryType::Fifo => EntryKind::Fifo,
            EntryType::CharDevice | EntryType::BlockDevice => {
                let major = header
                    .device_major()
                    .map_err(|err| invalid("devmajor", err))?;
                let minor = header
                    .device_minor()
                    .map_err(|err| invalid("devminor", err))?;
                let major = DeviceNumber::try_from(major)
                    .map_err(|_| invalid("devmajor", NumericFieldError::OutOfRange))?;
                let minor = DeviceNumber::try_from(minor)
                    .map_err(|_| invalid("devminor", NumericFieldError::OutOfRange))?;
                EntryKind::Device {
                    file_type: if entry_type == EntryType::CharDevice {
                        libc::S_IFCHR
                    } else {
                        libc::S_IFBLK
                    },
                    device: libc::makedev(major, minor),
                }
            }
        };

        let path = normalize_archive_path(&archive_path)?.map(|path| destination.join(path));

        let out_of_range = |field| invalid(field, NumericFieldError::OutOfRange);
        Ok(Self {
            mtime: i64::try_from(mtime).map_err(|_| out_of_range("mtime"))?,
            uid: u32::try_from(uid).map_err(|_| out_of_range("uid"))?,
            gid: u32::try_from(gid).map_err(|_| out_of_range("gid"))?,
            mode: (mode & 0o7777) as u32,
            archive_path,
            path,
            entry_type,
            kind,
        })
    }
}

/// Reads the next header block. Returns `None` if the stream ended cleanly at a block boundary.
fn read_header(reader: &mut impl Read) -> Result<Option<Header>, ExtractError> {
    let mut block = [0u8; BLOCK_SIZE];
    let mut filled = 0;
    while filled < BLOCK_SIZE {
        match reader.read(&mut block[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "the archive ended in the middle of a header block",
                )
                .into())
            }
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(Some(Header::from_bytes(block)))
}

/// Copies the content of an entry to `writer`. The stream is consumed up to the next block
/// boundary but only the first `size` bytes are written.
fn copy_content(
    reader: &mut impl Read,
    mut writer: impl Write,
    size: u64,
    buffer: &mut [u8],
    path: &Path,
) -> Result<(), ExtractError> {
    let mut remaining = size;
    let mut padded_remaining = padded_size(size);
    while padded_remaining > 0 {
        let chunk = padded_remaining.min(buffer.len() as u64) as usize;
        reader.read_exact(&mut buffer[..chunk])?;

        let content = remaining.min(chunk as u64) as usize;
        if content > 0 {
            writer
                .write_all(&buffer[..content])
                .map_err(|source| ExtractError::WriteContent {
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        remaining -= content as u64;
        padded_remaining -= chunk as u64;
    }

    writer.flush().map_err(|source| ExtractError::WriteContent {
        path: path.to_path_buf(),
        source,
    })
}

/// Applies the ownership, permissions and modification time recorded in the archive.
fn restore_metadata(
    entry: &Entry,
    path: &Path,
    options: &UnarchiveOptions,
) -> Result<(), ExtractError> {
    if matches!(entry.kind, EntryKind::Symlink { .. }) {
        if options.restore_ownership {
            std::os::unix::fs::lchown(path, Some(entry.uid), Some(entry.gid))
                .map_err(|source| filesystem_error(Operation::ChangeOwner, path, source))?;
        }
    } else {
        if options.restore_ownership {
            std::os::unix::fs::chown(path, Some(entry.uid), Some(entry.gid))
                .map_err(|source| filesystem_error(Operation::ChangeOwner, path, source))?;
        }
        // Changing the owner clears the set-user-id and set-group-id bits, so the mode has to
        // be applied afterwards.
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(entry.mode))
            .map_err(|source| filesystem_error(Operation::ChangePermissions, path, source))?;
    }

    let mtime = FileTime::from_unix_time(entry.mtime, 0);
    filetime::set_symlink_file_times(path, mtime, mtime)
        .map_err(|source| filesystem_error(Operation::SetTimestamps, path, source))
}

fn make_fifo(path: &Path, mode: u32) -> io::Result<()> {
    let c_path = c_path(path)?;
    // SAFETY: `c_path` is a valid nul terminated string that outlives the call.
    if unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn make_device(
    path: &Path,
    file_type: libc::mode_t,
    mode: u32,
    device: libc::dev_t,
) -> io::Result<()> {
    let c_path = c_path(path)?;
    // SAFETY: `c_path` is a valid nul terminated string that outlives the call.
    if unsafe { libc::mknod(c_path.as_ptr(), file_type | mode as libc::mode_t, device) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))
}

/// Strips root and current directory components from a path recorded in the archive. Returns
/// `None` if nothing remains.
///
/// This follows what libarchive's bsdtar does by default: leading slashes are dropped, repeated
/// slashes collapse and a `..` component is rejected with [`ExtractError::PathTraversal`] because
/// it would allow an entry to escape the destination; see CVE-2001-1267, CVE-2005-1918 and
/// CVE-2007-4131.
fn normalize_archive_path(path: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut result = PathBuf::with_capacity(path.as_os_str().len());
    for component in path.components() {
        match component {
            Component::Prefix(..) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => return Err(ExtractError::PathTraversal(path.to_path_buf())),
            Component::Normal(part) => result.push(part),
        }
    }

    if result.as_os_str().is_empty() {
        return Ok(None);
    }

    Ok(Some(result))
}
