//! In-place replacement of an existing file.
//!
//! The new contents go to a temporary sibling which is fsynced and renamed
//! over the target, so the target path holds either the old or the new
//! complete file at every instant. While that happens a hidden hard link
//! keeps the old contents reachable under a second name.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::{Builder, NamedTempFile};

use crate::error::{Error, Result};

/// Blocks SIGINT and SIGTSTP for the calling thread until dropped.
///
/// A no-op where POSIX signals do not exist.
pub struct SignalGuard {
    #[cfg(unix)]
    saved: Option<nix::sys::signal::SigSet>,
}

impl SignalGuard {
    #[cfg(unix)]
    pub fn new() -> Self {
        use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};

        let mut block = SigSet::empty();
        block.add(Signal::SIGINT);
        block.add(Signal::SIGTSTP);
        let mut saved = SigSet::empty();
        match pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&block), Some(&mut saved)) {
            Ok(()) => SignalGuard { saved: Some(saved) },
            Err(e) => {
                warn!("cannot block signals: {e}");
                SignalGuard { saved: None }
            }
        }
    }

    #[cfg(not(unix))]
    pub fn new() -> Self {
        SignalGuard {}
    }
}

impl Default for SignalGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
impl Drop for SignalGuard {
    fn drop(&mut self) {
        use nix::sys::signal::{pthread_sigmask, SigmaskHow};

        if let Some(saved) = self.saved.take() {
            if let Err(e) = pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&saved), None) {
                warn!("cannot restore signal mask: {e}");
            }
        }
    }
}

/// Hidden name prefix for the backup link and the temporary output.
fn hidden_prefix(target: &Path) -> String {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(".{name}.")
}

/// Hard-link `real` to a hidden sibling. The link is removed on drop.
fn backup_link(real: &Path, dir: &Path) -> Option<NamedTempFile<()>> {
    let link = Builder::new()
        .prefix(&hidden_prefix(real))
        .suffix(".orig")
        .make_in(dir, |path| fs::hard_link(real, path));
    match link {
        Ok(link) => {
            debug!("linked {} -> {}", real.display(), link.path().display());
            Some(link)
        }
        Err(e) => {
            warn!("cannot hard-link {}: {e}", real.display());
            None
        }
    }
}

fn write_synced<F>(file: &File, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let mut out = BufWriter::new(file);
    write(&mut out)?;
    out.flush()?;
    drop(out);
    file.sync_all()?;
    Ok(())
}

/// Overwrite `target` with truncation.
fn overwrite<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let file = File::create(target)?;
    write_synced(&file, write)
}

/// Replace the contents of `target` with what `write` produces.
///
/// On failure the target keeps its old contents. When the real path of
/// `target` cannot be resolved the file is overwritten directly instead.
/// SIGINT and SIGTSTP are blocked for the duration.
pub fn replace_file<F>(target: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let _guard = SignalGuard::new();

    let real: PathBuf = match fs::canonicalize(target) {
        Ok(p) => p,
        Err(e) => {
            warn!(
                "cannot resolve {}: {e}; overwriting in place",
                target.display()
            );
            return overwrite(target, write);
        }
    };
    let dir = real
        .parent()
        .ok_or_else(|| Error::Unsupported(format!("rewriting {}", real.display())))?;

    let backup = backup_link(&real, dir);
    let tmp = Builder::new()
        .prefix(&hidden_prefix(&real))
        .suffix(".new")
        .tempfile_in(dir)?;
    if let Ok(meta) = fs::metadata(&real) {
        if let Err(e) = fs::set_permissions(tmp.path(), meta.permissions()) {
            warn!("cannot copy permissions of {}: {e}", real.display());
        }
    }

    // On error `tmp` is dropped and removed; the target is untouched.
    write_synced(tmp.as_file(), write)?;
    tmp.persist(&real).map_err(|e| Error::Io(e.error))?;
    debug!("replaced {}", real.display());

    if let Some(link) = backup {
        if let Err(e) = link.close() {
            warn!("cannot remove backup link: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.fits");
        fs::write(&path, b"old").unwrap();
        replace_file(&path, |out| {
            out.write_all(b"new contents")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new contents");
        assert_eq!(entries(dir.path()), vec!["a.fits"]);
    }

    #[test]
    fn failed_write_keeps_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.fits");
        fs::write(&path, b"original").unwrap();
        let err = replace_file(&path, |out| {
            out.write_all(b"partial")?;
            Err(Error::Cancelled)
        });
        assert!(matches!(err, Err(Error::Cancelled)));
        assert_eq!(fs::read(&path).unwrap(), b"original");
        assert_eq!(entries(dir.path()), vec!["b.fits"]);
    }

    #[test]
    fn missing_target_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.fits");
        replace_file(&path, |out| {
            out.write_all(b"fresh")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"fresh");
    }

    #[cfg(unix)]
    #[test]
    fn rewrites_through_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.fits");
        let link = dir.path().join("link.fits");
        fs::write(&real, b"one").unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();
        replace_file(&link, |out| {
            out.write_all(b"two")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(fs::read(&real).unwrap(), b"two");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    }

    #[test]
    fn guard_nests() {
        let outer = SignalGuard::new();
        let inner = SignalGuard::default();
        drop(inner);
        drop(outer);
    }
}
