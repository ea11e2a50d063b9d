//! Atomic, hash-gated fragment writer.
//!
//! 1. Normalise line endings to LF.
//! 2. SHA-256 the content and compare with the file already on disk; skip if identical.
//! 3. With `backup`, copy the file being replaced to `<path>~`.
//! 4. Write to `<path>.stencil.tmp`, then rename over the final path.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    pub dry_run: bool,
    /// Keep the previous contents of a replaced file as `<path>~`.
    pub backup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Written {
        path: PathBuf,
        backup: Option<PathBuf>,
    },
    Unchanged {
        path: PathBuf,
    },
    /// `--dry-run`: the file would have been written.
    WouldWrite {
        path: PathBuf,
    },
}

fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

/// Resolve a fragment name under `out_dir`, refusing names that escape it.
pub fn fragment_path(out_dir: &Path, name: &str) -> Result<PathBuf> {
    let relative = Path::new(name);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if name.trim().is_empty() || escapes {
        bail!("fragment name '{name}' is not a relative path inside the output directory");
    }
    Ok(out_dir.join(relative))
}

pub fn atomic_write(path: &Path, content: &str, options: WriteOptions) -> Result<WriteResult> {
    let normalized = content.replace("\r\n", "\n");
    let wanted = digest(normalized.as_bytes());

    let existing = std::fs::read(path).ok();
    if let Some(existing) = &existing {
        if digest(existing) == wanted {
            tracing::debug!(path = %path.display(), "unchanged");
            return Ok(WriteResult::Unchanged {
                path: path.to_path_buf(),
            });
        }
    }

    if options.dry_run {
        return Ok(WriteResult::WouldWrite {
            path: path.to_path_buf(),
        });
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let backup = match existing {
        Some(previous) if options.backup => {
            let backup = PathBuf::from(format!("{}~", path.display()));
            std::fs::write(&backup, previous)
                .with_context(|| format!("writing backup {}", backup.display()))?;
            Some(backup)
        }
        _ => None,
    };

    let tmp = PathBuf::from(format!("{}.stencil.tmp", path.display()));
    std::fs::write(&tmp, &normalized).with_context(|| format!("writing {}", tmp.display()))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("renaming onto {}", path.display()));
    }

    tracing::info!(path = %path.display(), backup = backup.is_some(), "wrote file");
    Ok(WriteResult::Written {
        path: path.to_path_buf(),
        backup,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const WRITE: WriteOptions = WriteOptions {
        dry_run: false,
        backup: false,
    };

    #[test]
    fn writes_then_skips_identical_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gen/zap-id.h");
        assert!(matches!(atomic_write(&path, "a\r\nb\n", WRITE).unwrap(), WriteResult::Written { .. }));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a\nb\n");
        assert!(!dir.path().join("gen/zap-id.h.stencil.tmp").exists());
        assert!(matches!(atomic_write(&path, "a\nb\n", WRITE).unwrap(), WriteResult::Unchanged { .. }));
    }

    #[test]
    fn dry_run_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.h");
        let options = WriteOptions {
            dry_run: true,
            backup: true,
        };
        assert!(matches!(atomic_write(&path, "x", options).unwrap(), WriteResult::WouldWrite { .. }));
        assert!(!path.exists());
    }

    #[test]
    fn backup_keeps_replaced_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("zap-id.h");
        let options = WriteOptions {
            dry_run: false,
            backup: true,
        };

        match atomic_write(&path, "one\n", options).unwrap() {
            WriteResult::Written { backup, .. } => assert_eq!(backup, None),
            other => panic!("expected write, got {other:?}"),
        }
        match atomic_write(&path, "two\n", options).unwrap() {
            WriteResult::Written { backup, .. } => {
                assert_eq!(backup, Some(dir.path().join("zap-id.h~")));
            }
            other => panic!("expected write, got {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("zap-id.h~")).unwrap(), "one\n");

        atomic_write(&path, "two\n", options).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("zap-id.h~")).unwrap(), "one\n");
    }

    #[test]
    fn fragment_names_cannot_escape() {
        let out = Path::new("/out");
        assert_eq!(fragment_path(out, "dir/a.h").unwrap(), Path::new("/out/dir/a.h"));
        assert!(fragment_path(out, "../a.h").is_err());
        assert!(fragment_path(out, "/etc/passwd").is_err());
        assert!(fragment_path(out, " ").is_err());
    }
}
