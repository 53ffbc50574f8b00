//! Creation of missing directory chains.

use std::collections::HashSet;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};

use crate::{filesystem_error, ExtractError, Operation};

/// Creates every missing directory of `path`.
///
/// Intermediate directories are created with `dir_mode`, the final component with `mode` (both
/// are subject to the process umask). Directories that already exist are left untouched. If a
/// component exists but is not a directory an error is returned. A path without any normal
/// components, like `""`, `"."` or `"/"`, is already satisfied.
pub fn ensure_dir_all(path: &Path, dir_mode: u32, mode: u32) -> io::Result<()> {
    let components: Vec<_> = path
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect();
    let Some(last) = components
        .iter()
        .rposition(|component| matches!(component, Component::Normal(_)))
    else {
        return Ok(());
    };

    let mut current = PathBuf::with_capacity(path.as_os_str().len());
    for (index, component) in components.iter().enumerate() {
        current.push(component);
        match component {
            Component::Normal(_) | Component::ParentDir => {
                create_dir(&current, if index == last { mode } else { dir_mode })?;
            }
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
        }
    }

    Ok(())
}

/// Creates a single directory, tolerating an existing directory at the same location.
fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    match std::fs::DirBuilder::new().mode(mode).create(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            if fs_err::metadata(path)?.is_dir() {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(libc::ENOTDIR))
            }
        }
        Err(err) => Err(err),
    }
}

/// Memoizes directory creation below an extraction root so parents shared by many entries only
/// cost syscalls once.
///
/// Existing symbolic links are only accepted in place of a directory if they resolve to a
/// directory below the root, so entries can never be written through a link to the outside.
pub(crate) struct CreatedDirectories {
    created: HashSet<PathBuf>,
    root: PathBuf,
    dir_mode: u32,
}

impl CreatedDirectories {
    /// Constructs a new instance. `root` must already exist and be canonical.
    pub fn new(root: PathBuf, dir_mode: u32) -> Self {
        Self {
            created: HashSet::from_iter([root.clone()]),
            root,
            dir_mode,
        }
    }

    /// Ensures `path` and all of its ancestors exist as directories below the root.
    pub fn create_dir_all(&mut self, path: &Path) -> Result<(), ExtractError> {
        if self.created.contains(path) || !has_normal_component(path) {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }

        self.create_dir(path, self.dir_mode, Operation::CreateParentDirectories)
    }

    /// Creates a single directory whose parent already exists. An existing directory is
    /// accepted as is.
    pub fn create_dir(
        &mut self,
        path: &Path,
        mode: u32,
        operation: Operation,
    ) -> Result<(), ExtractError> {
        match fs_err::symlink_metadata(path) {
            Ok(metadata) if metadata.is_dir() => {}
            Ok(metadata) if metadata.file_type().is_symlink() => {
                let resolved = self.resolve(path, operation)?;
                if !resolved.is_dir() {
                    return Err(filesystem_error(
                        operation,
                        path,
                        io::Error::from_raw_os_error(libc::ENOTDIR),
                    ));
                }
            }
            Ok(_) => {
                return Err(filesystem_error(
                    operation,
                    path,
                    io::Error::from_raw_os_error(libc::ENOTDIR),
                ))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                create_dir(path, mode).map_err(|source| filesystem_error(operation, path, source))?;
            }
            Err(err) => return Err(filesystem_error(operation, path, err)),
        }

        self.created.insert(path.to_path_buf());
        Ok(())
    }

    /// Resolves every symbolic link in `path` and returns the result, failing with
    /// [`ExtractError::PathTraversal`] if it lies outside of the root.
    pub fn resolve(&self, path: &Path, operation: Operation) -> Result<PathBuf, ExtractError> {
        let resolved = path
            .canonicalize()
            .map_err(|source| filesystem_error(operation, path, source))?;
        if !resolved.starts_with(&self.root) {
            return Err(ExtractError::PathTraversal(path.to_path_buf()));
        }
        Ok(resolved)
    }
}

fn has_normal_component(path: &Path) -> bool {
    path.components()
        .any(|component| matches!(component, Component::Normal(_)))
}
