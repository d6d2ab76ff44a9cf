//! Shell environment for installed recipes

use std::collections::HashSet;

use vessel_errors::{Error, OpsError};
use vessel_events::EventEmitter;
use vessel_types::PackageId;

use crate::install::{execute, load_all};
use crate::types::ShellEnv;
use crate::OpsCtx;

/// Build `names` and compute the `PATH` exposing their programs
///
/// Every root and every transitive dependency contributes its `bin`
/// directory when one exists, roots first. `inherited` is appended after
/// them. Nothing is linked into a profile.
///
/// # Errors
///
/// Returns an error if no names are given, a recipe fails to load, planning
/// fails, the run is cancelled, or any id of the plan fails to install.
pub async fn shell_env(
    ctx: &OpsCtx,
    names: &[String],
    inherited: Option<&str>,
) -> Result<ShellEnv, Error> {
    if names.is_empty() {
        return Err(OpsError::NoPackagesSpecified.into());
    }
    ctx.emit_operation_started("shell");

    let roots = load_all(ctx, names).await?;
    let report = execute(ctx, &roots).await?;
    if !report.is_success() {
        let failed: Vec<String> = report
            .failed
            .iter()
            .map(|(id, _)| id)
            .chain(&report.skipped)
            .map(ToString::to_string)
            .collect();
        ctx.emit_operation_completed("shell", false);
        return Err(OpsError::OperationFailed {
            message: format!("could not install {}", failed.join(", ")),
        }
        .into());
    }

    let mut seen = HashSet::new();
    let mut ids: Vec<PackageId> = Vec::new();
    let closure = roots
        .iter()
        .map(|root| root.id.clone())
        .chain(roots.iter().flat_map(|root| {
            root.transitive_dependencies()
                .into_iter()
                .map(|dep| dep.id.clone())
        }));
    for id in closure {
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }

    let mut entries = Vec::new();
    for id in &ids {
        let bin = ctx.store.artifact_path(id).join("bin");
        if tokio::fs::metadata(&bin).await.is_ok_and(|m| m.is_dir()) {
            entries.push(bin.display().to_string());
        }
    }
    let path = compose_path(&entries, inherited);
    tracing::debug!(roots = roots.len(), bins = entries.len(), %path, "shell environment");

    ctx.emit_operation_completed("shell", true);
    Ok(ShellEnv { ids, path, report })
}

/// `entries` joined with `:`, followed by `inherited` when it is set
fn compose_path(entries: &[String], inherited: Option<&str>) -> String {
    let mut path = entries.join(":");
    match inherited.filter(|p| !p.is_empty()) {
        Some(rest) if path.is_empty() => path = rest.to_string(),
        Some(rest) => {
            path.push(':');
            path.push_str(rest);
        }
        None => {}
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose_path() {
        let bins = vec!["/s/a/bin".to_string(), "/s/b/bin".to_string()];
        assert_eq!(compose_path(&bins, Some("/usr/bin")), "/s/a/bin:/s/b/bin:/usr/bin");
        assert_eq!(compose_path(&bins, Some("")), "/s/a/bin:/s/b/bin");
        assert_eq!(compose_path(&[], Some("/usr/bin")), "/usr/bin");
        assert_eq!(compose_path(&[], None), "");
    }
}
