//! Small filesystem helpers with the durability discipline the vault
//! relies on: data files are replaced via write-to-temp + rename, and
//! both the file and its parent directory are fsynced when the caller
//! needs the change to survive a crash.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use sietch_api_types::{Error, Result};

/// Read a whole file, attaching the path to any error.
pub fn file_get_contents<P: AsRef<Path>>(path: P) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|err| Error::io(path, err))
}

/// Read a whole file as UTF-8.
pub fn file_get_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    std::fs::read_to_string(path).map_err(|err| Error::io(path, err))
}

/// Fsync an open file.
pub fn fsync_file(file: &File, path: &Path) -> Result<()> {
    nix::unistd::fsync(file.as_raw_fd())
        .map_err(|err| Error::io(path, std::io::Error::from_raw_os_error(err as i32)))
}

/// Fsync the directory containing `path`, persisting a rename or unlink
/// of an entry inside it.
pub fn fsync_parent_dir(path: &Path) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let handle = File::open(dir).map_err(|err| Error::io(dir, err))?;
    fsync_file(&handle, dir)
}

/// Atomically replace `path` with `data`.
///
/// Writes a sibling temp file, optionally fsyncs it, then renames it
/// over the target. With `sync` set the parent directory is fsynced as
/// well, so the replacement is durable when this returns.
pub fn replace_file<P: AsRef<Path>>(
    path: P,
    data: &[u8],
    mode: Option<u32>,
    sync: bool,
) -> Result<()> {
    let path = path.as_ref();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::InvalidInput(format!("invalid target path {path:?}")))?;
    let tmp_path = path.with_file_name(format!(".{}.tmp_{}", file_name, std::process::id()));

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if let Some(mode) = mode {
        options.mode(mode);
    }

    let result = (|| {
        let mut file = options
            .open(&tmp_path)
            .map_err(|err| Error::io(&tmp_path, err))?;
        file.write_all(data).map_err(|err| Error::io(&tmp_path, err))?;
        if sync {
            fsync_file(&file, &tmp_path)?;
        }
        std::fs::rename(&tmp_path, path).map_err(|err| Error::io(path, err))?;
        if sync {
            fsync_parent_dir(path)?;
        }
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

/// Create a directory with the given mode; an existing directory is
/// left as is (stricter permissions are tolerated).
pub fn ensure_dir<P: AsRef<Path>>(path: P, mode: u32) -> Result<()> {
    let path = path.as_ref();
    match std::fs::create_dir(path) {
        Ok(()) => {
            let perm = std::fs::Permissions::from_mode(mode);
            std::fs::set_permissions(path, perm).map_err(|err| Error::io(path, err))
        }
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(Error::io(path, err)),
    }
}

/// Permission bits of `path`.
pub fn path_mode<P: AsRef<Path>>(path: P) -> Result<u32> {
    let path = path.as_ref();
    let metadata = std::fs::metadata(path).map_err(|err| Error::io(path, err))?;
    Ok(metadata.permissions().mode() & 0o7777)
}

/// Names of the regular files directly inside `dir`.
pub fn read_dir_file_names<P: AsRef<Path>>(dir: P) -> Result<Vec<String>> {
    let dir = dir.as_ref();
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|err| Error::io(dir, err))? {
        let entry = entry.map_err(|err| Error::io(dir, err))?;
        let file_type = entry.file_type().map_err(|err| Error::io(dir, err))?;
        if !file_type.is_file() {
            continue;
        }
        if let Ok(name) = entry.file_name().into_string() {
            // temp files from interrupted replace_file calls
            if name.starts_with('.') && name.contains(".tmp_") {
                continue;
            }
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
