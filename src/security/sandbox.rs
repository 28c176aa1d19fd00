//! Process-level defense-in-depth for the executor binaries: kernel
//! resource limits and, on Linux, a Landlock filesystem ruleset. The
//! container boundary the dispatcher builds (`no-new-privileges`,
//! `cap_drop: ALL`, network none/bridge, unprivileged uid) is the primary
//! isolation mechanism; this is a second layer inside that boundary, in
//! case the container runtime itself is misconfigured or compromised.
//!
//! Both functions are best-effort: an executor binary that fails to apply
//! them logs a warning and proceeds rather than refusing to run, since the
//! container boundary already holds even with this layer absent (e.g. on a
//! non-Linux container host, or a kernel too old for Landlock).

use std::path::Path;

use tracing::warn;

use crate::security::capabilities::Mount;

/// Resource ceilings applied to an executor process before it does any
/// real work. Conservative defaults sized for single-command / single-file
/// operations, not long-running services.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_memory_bytes: u64,
    pub max_open_files: u64,
    pub max_cpu_secs: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_bytes: 512 * 1024 * 1024,
            max_open_files: 256,
            max_cpu_secs: 120,
        }
    }
}

/// Apply `limits` via `setrlimit`. Best-effort: logs and returns `Ok(())`
/// even on partial failure, since a missing individual limit does not
/// undermine the container-level isolation already in place.
#[cfg(unix)]
pub fn apply_resource_limits(limits: &ResourceLimits) {
    use rlimit::Resource;

    let set = |resource: Resource, value: u64, name: &str| {
        if let Err(e) = resource.set(value, value) {
            warn!(limit = name, error = %e, "setrlimit failed, continuing without it");
        }
    };

    set(Resource::AS, limits.max_memory_bytes, "AS");
    set(Resource::NOFILE, limits.max_open_files, "NOFILE");
    set(Resource::CPU, limits.max_cpu_secs, "CPU");
}

#[cfg(not(unix))]
pub fn apply_resource_limits(_limits: &ResourceLimits) {}

/// Restrict the current process's filesystem view to `mount_root` plus every
/// declared capability mount (and a handful of read-only system paths
/// binaries need to run at all), using Landlock. No-op outside Linux.
///
/// Landlock default-denies: a path not covered by a `PathBeneath` rule is
/// blocked regardless of what `paths::confine` would permit, so every mount
/// the capability grants needs its own rule here, not just the default
/// working directory.
#[cfg(target_os = "linux")]
pub fn apply_landlock(mount_root: &Path, mounts: &[Mount]) {
    use landlock::{Access, AccessFs, BitFlags, PathBeneath, PathFd, Ruleset, RulesetAttr, RulesetCreatedAttr, RulesetStatus, ABI};

    let apply = || -> Result<RulesetStatus, String> {
        let abi = ABI::V3;
        let read_write: BitFlags<AccessFs> = AccessFs::from_all(abi);
        let read_only: BitFlags<AccessFs> = AccessFs::from_read(abi);

        let mut ruleset = Ruleset::default()
            .handle_access(read_write)
            .map_err(|e| format!("ruleset: {e}"))?
            .create()
            .map_err(|e| format!("create: {e}"))?
            .add_rule(
                PathBeneath::new(PathFd::new(mount_root).map_err(|e| format!("pathfd {}: {e}", mount_root.display()))?, read_write),
            )
            .map_err(|e| format!("rule {}: {e}", mount_root.display()))?;

        for mount in mounts {
            let path = Path::new(&mount.container_path);
            if !path.exists() {
                continue;
            }
            let access = if mount.read_only { read_only } else { read_write };
            ruleset = ruleset
                .add_rule(PathBeneath::new(PathFd::new(path).map_err(|e| format!("pathfd {}: {e}", path.display()))?, access))
                .map_err(|e| format!("rule {}: {e}", path.display()))?;
        }

        for p in ["/usr", "/bin", "/lib", "/lib64"] {
            if Path::new(p).exists() {
                ruleset = ruleset
                    .add_rule(PathBeneath::new(PathFd::new(p).map_err(|e| format!("pathfd {p}: {e}"))?, read_only | AccessFs::Execute))
                    .map_err(|e| format!("rule {p}: {e}"))?;
            }
        }

        let result = ruleset.restrict_self().map_err(|e| format!("restrict_self: {e}"))?;
        Ok(result.ruleset)
    };

    match apply() {
        Ok(RulesetStatus::FullyEnforced) => {}
        Ok(status) => warn!(?status, "landlock sandbox not fully enforced"),
        Err(e) => warn!(error = %e, "landlock sandbox not applied"),
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply_landlock(_mount_root: &Path, _mounts: &[Mount]) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_are_nonzero() {
        let limits = ResourceLimits::default();
        assert!(limits.max_memory_bytes > 0);
        assert!(limits.max_open_files > 0);
        assert!(limits.max_cpu_secs > 0);
    }
}
