// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Atomic local writes for the host credential replica and config files.

use std::path::Path;

/// Permission bits for the host credential replica.
pub const CREDENTIALS_MODE: u32 = 0o600;

/// Write `bytes` to `path` atomically (write tmp + rename).
///
/// Uses a unique temp filename (PID + counter) so concurrent writers never
/// share a `.tmp` file. When `mode` is set the temp file gets those
/// permission bits before it is renamed into place.
pub fn write_atomic(path: &Path, bytes: &[u8], mode: Option<u32>) -> anyhow::Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_name = format!(
        "{}.{}.{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy(),
        std::process::id(),
        seq,
    );
    let tmp_path = path.with_file_name(tmp_name);
    std::fs::write(&tmp_path, bytes)?;
    if let Some(mode) = mode {
        set_mode(&tmp_path, mode)?;
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_existing_content() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "a much longer previous body")?;
        write_atomic(&path, b"short", None)?;
        assert_eq!(std::fs::read_to_string(&path)?, "short");
        Ok(())
    }

    #[test]
    fn creates_missing_parent() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("auth/nested/.credentials.json");
        write_atomic(&path, b"{}", None)?;
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn leaves_no_temp_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_atomic(&dir.path().join("x.json"), b"1", Some(CREDENTIALS_MODE))?;
        let names: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["x.json".to_owned()]);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn applies_mode() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".credentials.json");
        write_atomic(&path, b"{}", Some(CREDENTIALS_MODE))?;
        let mode = std::fs::metadata(&path)?.permissions().mode() & 0o777;
        assert_eq!(mode, CREDENTIALS_MODE);
        Ok(())
    }
}
