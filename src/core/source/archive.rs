use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::error::{PrestarterError, PrestarterResult};

/// Unpack `archive` into `dest`, dropping the single top-level directory
/// upstream archives wrap their content in. Runs on the blocking pool.
pub async fn unpack(archive: &Path, dest: &Path) -> PrestarterResult<()> {
    let archive = archive.to_path_buf();
    let dest = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack_blocking(&archive, &dest))
        .await
        .map_err(|e| PrestarterError::Other(format!("Task join error: {e}")))?
}

pub fn unpack_blocking(archive: &Path, dest: &Path) -> PrestarterResult<()> {
    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    std::fs::create_dir_all(dest).map_err(|source| PrestarterError::io(dest, source))?;

    if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar_gz(archive, dest)
    } else if name.ends_with(".zip") {
        extract_zip(archive, dest)
    } else {
        Err(unpack_error(archive, format!("unknown archive format: {name}")))
    }
}

fn extract_zip(archive_path: &Path, dest: &Path) -> PrestarterResult<()> {
    let file = std::fs::File::open(archive_path)
        .map_err(|source| PrestarterError::io(archive_path, source))?;
    let mut archive = zip::ZipArchive::new(file)?;

    for index in 0..archive.len() {
        let mut zipped = archive.by_index(index)?;
        let enclosed_name = zipped
            .enclosed_name()
            .ok_or_else(|| unpack_error(archive_path, format!("unsafe entry {}", zipped.name())))?;
        let Some(rel_path) = strip_top_level(&enclosed_name) else {
            continue;
        };

        let out_path = dest.join(rel_path);
        if zipped.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|e| unpack_error(archive_path, e))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| unpack_error(archive_path, e))?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(|e| unpack_error(archive_path, e))?;
        std::io::copy(&mut zipped, &mut out).map_err(|e| unpack_error(archive_path, e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = zipped.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> PrestarterResult<()> {
    let file = std::fs::File::open(archive_path)
        .map_err(|source| PrestarterError::io(archive_path, source))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    let entries = archive.entries().map_err(|e| unpack_error(archive_path, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| unpack_error(archive_path, e))?;
        let entry_path = entry
            .path()
            .map_err(|e| unpack_error(archive_path, e))?
            .into_owned();
        let Some(rel_path) = strip_top_level(&entry_path) else {
            continue;
        };

        let out_path = dest.join(rel_path);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| unpack_error(archive_path, e))?;
        }
        entry
            .unpack(&out_path)
            .map_err(|e| unpack_error(archive_path, e))?;
    }

    Ok(())
}

/// Drop the first path component and anything that is not a plain name.
fn strip_top_level(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    components.next()?;
    let mut rel_path = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => rel_path.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if rel_path.as_os_str().is_empty() {
        None
    } else {
        Some(rel_path)
    }
}

fn unpack_error(archive: &Path, reason: impl ToString) -> PrestarterError {
    PrestarterError::Unpack {
        archive: archive.to_path_buf(),
        reason: reason.to_string(),
    }
}

// ── Staging ─────────────────────────────────────────────

/// Fresh scratch directory under `<destination>/temp`.
pub fn staging_dir(destination: &Path) -> PathBuf {
    destination
        .join("temp")
        .join(format!("{}_dir", Uuid::new_v4()))
}

/// Move a fully prepared `staged` tree to `target`, keeping the previous
/// tree as a backup until the rename succeeds.
pub async fn swap_into_place(staged: &Path, target: &Path) -> PrestarterResult<()> {
    let backup = target.with_extension("backup");
    if backup.exists() {
        let _ = tokio::fs::remove_dir_all(&backup).await;
    }
    if target.exists() {
        tokio::fs::rename(target, &backup)
            .await
            .map_err(|source| PrestarterError::io(&backup, source))?;
    }

    if let Err(source) = tokio::fs::rename(staged, target).await {
        if backup.exists() {
            let _ = tokio::fs::rename(&backup, target).await;
        }
        return Err(PrestarterError::io(target, source));
    }

    if backup.exists() {
        if let Err(err) = tokio::fs::remove_dir_all(&backup).await {
            warn!("Failed to remove backup {:?}: {}", backup, err);
        }
    }
    debug!("Installed {:?}", target);
    Ok(())
}

// ── Layout helpers ──────────────────────────────────────

pub fn locate_java_binary(runtime_root: &Path, java_exe: &str) -> PathBuf {
    let primary = runtime_root.join("bin").join(java_exe);
    if primary.exists() {
        return primary;
    }

    let mac_layout = runtime_root
        .join("Contents")
        .join("Home")
        .join("bin")
        .join(java_exe);
    if mac_layout.exists() {
        return mac_layout;
    }

    find_java_binary_recursive(runtime_root, java_exe).unwrap_or(primary)
}

fn find_java_binary_recursive(root: &Path, java_exe: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let file_type = entry.file_type().ok()?;

        if file_type.is_file() {
            if path.file_name().and_then(|n| n.to_str()) == Some(java_exe)
                && path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()) == Some("bin")
            {
                return Some(path);
            }
        } else if file_type.is_dir() {
            if let Some(found) = find_java_binary_recursive(&path, java_exe) {
                return Some(found);
            }
        }
    }
    None
}

/// Zip archives carry no modes on Windows-built SDKs; make `bin/*` runnable.
pub fn mark_bin_executable(java_bin: &Path) -> PrestarterResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let Some(bin_dir) = java_bin.parent() else {
            return Ok(());
        };
        let entries = std::fs::read_dir(bin_dir).map_err(|source| PrestarterError::io(bin_dir, source))?;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let mut perms = std::fs::metadata(&path)
                .map_err(|source| PrestarterError::io(&path, source))?
                .permissions();
            perms.set_mode(perms.mode() | 0o755);
            std::fs::set_permissions(&path, perms).map_err(|source| PrestarterError::io(&path, source))?;
        }
    }
    #[cfg(not(unix))]
    let _ = java_bin;
    Ok(())
}

/// Overlay `source` onto `destination`, replacing files that already exist.
pub fn copy_dir_recursive(source: &Path, destination: &Path) -> PrestarterResult<()> {
    std::fs::create_dir_all(destination).map_err(|e| PrestarterError::io(destination, e))?;

    for entry in std::fs::read_dir(source).map_err(|e| PrestarterError::io(source, e))? {
        let entry = entry.map_err(|e| PrestarterError::io(source, e))?;
        let src_path = entry.path();
        let dst_path = destination.join(entry.file_name());
        let file_type = entry.file_type().map_err(|e| PrestarterError::io(&src_path, e))?;

        if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else if file_type.is_file() {
            std::fs::copy(&src_path, &dst_path).map_err(|e| PrestarterError::io(&dst_path, e))?;
        }
    }

    Ok(())
}
