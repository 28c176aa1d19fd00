//! Mount-based path confinement shared by the file and shell executors.
//!
//! Generalizes the single-root sandbox pattern (canonicalize, then
//! `starts_with` the jail) to a capability's ordered `mounts` list: a path is
//! confined if, after symlink/`..` normalization, it resolves to a location
//! equal to or strictly under *some* mount's container path.

use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::security::capabilities::Mount;

/// The mount that authorized a resolved path, and whether the write was
/// permitted under it.
pub struct Confined<'a> {
    pub mount: &'a Mount,
    pub resolved: PathBuf,
}

/// Resolve `requested` (absolute, or relative to `default_dir`) against
/// `mounts`, normalizing `..` and symlinks, and confirm the result lands
/// under exactly one declared mount's `container_path`.
///
/// `requested` is permitted to equal a mount's container path itself (the
/// mount root), or any strict descendant of it.
pub fn confine<'a>(
    requested: &str,
    default_dir: &str,
    mounts: &'a [Mount],
) -> Result<Confined<'a>> {
    let raw = if requested.is_empty() {
        PathBuf::from(default_dir)
    } else {
        let p = Path::new(requested);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            Path::new(default_dir).join(p)
        }
    };

    let normalized = normalize(&raw);

    for mount in mounts {
        let mount_root = normalize(Path::new(&mount.container_path));
        if normalized == mount_root || normalized.starts_with(&mount_root) {
            let resolved = real_path_within(&normalized, &mount_root)?;
            return Ok(Confined { mount, resolved });
        }
    }

    Err(CoreError::Policy(format!(
        "Access denied: path '{}' (resolved '{}') is not within any mounted directory.",
        requested,
        normalized.display()
    )))
}

/// Resolve `normalized` through the real filesystem and confirm it still
/// lands under `mount_root` once symlinks are followed. `..`/`.` stripping
/// alone is not symlink-aware: a symlink placed inside a writable mount and
/// pointing outside it would otherwise pass the lexical check in `confine`
/// untouched. Canonicalizes the deepest existing ancestor (the target
/// itself may not exist yet, e.g. a file about to be created by `write`)
/// and re-appends the not-yet-existing suffix, mirroring the teacher's
/// `SandboxedFs::resolve` pattern of canonicalizing before the containment
/// check.
fn real_path_within(normalized: &Path, mount_root: &Path) -> Result<PathBuf> {
    let real_mount_root = std::fs::canonicalize(mount_root).map_err(|e| {
        CoreError::Policy(format!("mount root '{}' could not be resolved: {e}", mount_root.display()))
    })?;

    let mut suffix: Vec<std::ffi::OsString> = Vec::new();
    let mut existing = normalized;
    let real_existing = loop {
        match std::fs::canonicalize(existing) {
            Ok(real) => break real,
            Err(_) => match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    suffix.push(name.to_os_string());
                    existing = parent;
                }
                _ => {
                    return Err(CoreError::Policy(format!(
                        "Access denied: path '{}' could not be resolved",
                        normalized.display()
                    )));
                }
            },
        }
    };

    let mut real_path = real_existing;
    for name in suffix.into_iter().rev() {
        real_path.push(name);
    }

    if real_path == real_mount_root || real_path.starts_with(&real_mount_root) {
        Ok(real_path)
    } else {
        Err(CoreError::Policy(format!(
            "Access denied: path '{}' resolves to '{}' outside the mounted directory via a symlink.",
            normalized.display(),
            real_path.display()
        )))
    }
}

/// Like [`confine`], but additionally requires the matched mount to be
/// writable. Used by the file executor's `write` operation.
pub fn confine_writable<'a>(
    requested: &str,
    default_dir: &str,
    mounts: &'a [Mount],
) -> Result<Confined<'a>> {
    let confined = confine(requested, default_dir, mounts)?;
    if confined.mount.read_only {
        return Err(CoreError::Policy(format!(
            "Access denied: mount '{}' is read-only.",
            confined.mount.container_path
        )));
    }
    Ok(confined)
}

/// Lexically normalize `..` and `.` components without touching the
/// filesystem. This alone is not symlink-aware, which is why `confine`
/// follows it with `real_path_within`.
fn normalize(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Mount roots must exist on the real filesystem for `real_path_within`
    /// to canonicalize them, so tests use tempdirs rather than literal
    /// paths like "/workspace".
    struct Fixture {
        workspace: tempfile::TempDir,
        docs: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self { workspace: tempfile::tempdir().unwrap(), docs: tempfile::tempdir().unwrap() }
        }

        fn mounts(&self) -> Vec<Mount> {
            vec![
                Mount {
                    host_path: self.workspace.path().to_string_lossy().into_owned(),
                    container_path: self.workspace.path().to_string_lossy().into_owned(),
                    read_only: false,
                },
                Mount {
                    host_path: self.docs.path().to_string_lossy().into_owned(),
                    container_path: self.docs.path().to_string_lossy().into_owned(),
                    read_only: true,
                },
            ]
        }

        fn workspace_path(&self, rel: &str) -> String {
            self.workspace.path().join(rel).to_string_lossy().into_owned()
        }

        fn docs_path(&self, rel: &str) -> String {
            self.docs.path().join(rel).to_string_lossy().into_owned()
        }
    }

    #[test]
    fn confines_path_under_mount() {
        let fx = Fixture::new();
        std::fs::write(fx.workspace.path().join("notes.txt"), "x").unwrap();
        let requested = fx.workspace_path("notes.txt");
        let c = confine(&requested, &fx.workspace.path().to_string_lossy(), &fx.mounts()).unwrap();
        assert_eq!(c.resolved, fx.workspace.path().join("notes.txt"));
    }

    #[test]
    fn confines_mount_root_itself() {
        let fx = Fixture::new();
        let root = fx.workspace.path().to_string_lossy().into_owned();
        let c = confine(&root, &root, &fx.mounts()).unwrap();
        assert_eq!(c.resolved, fx.workspace.path().canonicalize().unwrap());
    }

    #[test]
    fn rejects_path_outside_all_mounts() {
        let fx = Fixture::new();
        let root = fx.workspace.path().to_string_lossy().into_owned();
        let err = confine("/etc/passwd", &root, &fx.mounts()).unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[test]
    fn rejects_traversal_out_of_mount() {
        let fx = Fixture::new();
        let root = fx.workspace.path().to_string_lossy().into_owned();
        let requested = format!("{root}/../../../../etc/passwd");
        let err = confine(&requested, &root, &fx.mounts()).unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[test]
    fn traversal_that_stays_inside_mount_is_allowed() {
        let fx = Fixture::new();
        std::fs::create_dir(fx.workspace.path().join("a")).unwrap();
        std::fs::write(fx.workspace.path().join("b.txt"), "x").unwrap();
        let root = fx.workspace.path().to_string_lossy().into_owned();
        let requested = fx.workspace_path("a/../b.txt");
        let c = confine(&requested, &root, &fx.mounts()).unwrap();
        assert_eq!(c.resolved, fx.workspace.path().join("b.txt"));
    }

    #[test]
    fn relative_path_resolves_against_default_dir() {
        let fx = Fixture::new();
        std::fs::write(fx.workspace.path().join("notes.txt"), "x").unwrap();
        let root = fx.workspace.path().to_string_lossy().into_owned();
        let c = confine("notes.txt", &root, &fx.mounts()).unwrap();
        assert_eq!(c.resolved, fx.workspace.path().join("notes.txt"));
    }

    #[test]
    fn write_rejected_on_read_only_mount() {
        let fx = Fixture::new();
        let root = fx.workspace.path().to_string_lossy().into_owned();
        let requested = fx.docs_path("a.txt");
        let err = confine_writable(&requested, &root, &fx.mounts()).unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn write_allowed_on_writable_mount() {
        let fx = Fixture::new();
        let root = fx.workspace.path().to_string_lossy().into_owned();
        let requested = fx.workspace_path("a.txt");
        let c = confine_writable(&requested, &root, &fx.mounts()).unwrap();
        assert_eq!(c.resolved, fx.workspace.path().join("a.txt"));
    }

    #[test]
    #[cfg(unix)]
    fn rejects_symlink_escaping_the_mount() {
        let fx = Fixture::new();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "classified").unwrap();
        std::os::unix::fs::symlink(outside.path(), fx.workspace.path().join("escape")).unwrap();

        let root = fx.workspace.path().to_string_lossy().into_owned();
        let requested = fx.workspace_path("escape/secret.txt");
        let err = confine(&requested, &root, &fx.mounts()).unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }

    #[test]
    #[cfg(unix)]
    fn rejects_symlink_escaping_via_not_yet_existing_write_target() {
        let fx = Fixture::new();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), fx.workspace.path().join("escape")).unwrap();

        let root = fx.workspace.path().to_string_lossy().into_owned();
        let requested = fx.workspace_path("escape/new_file.txt");
        let err = confine_writable(&requested, &root, &fx.mounts()).unwrap_err();
        assert!(err.to_string().contains("Access denied"));
    }
}
