//! Store and profile maintenance

use vessel_errors::{Error, OpsError};
use vessel_events::EventEmitter;
use vessel_types::{GcReport, PackageId};

use crate::types::LinkReport;
use crate::OpsCtx;

/// Remove every artifact no profile reaches
///
/// # Errors
///
/// Returns an error if the roots or the store cannot be read, or a removal
/// fails.
pub async fn gc(ctx: &OpsCtx) -> Result<GcReport, Error> {
    ctx.emit_operation_started("gc");
    let report = ctx.collector().sweep_and_remove().await?;
    ctx.emit_operation_completed("gc", true);
    Ok(report)
}

/// Link a stored artifact into `profile`
///
/// # Errors
///
/// Returns `StorageError::PackageNotFound` if the artifact is not in the
/// store, or an error if the profile cannot be written.
pub async fn link(ctx: &OpsCtx, id: &PackageId, profile: &str) -> Result<LinkReport, Error> {
    let links = ctx.profile(profile).link(id).await?;
    Ok(LinkReport {
        profile: profile.to_string(),
        id: id.clone(),
        links,
    })
}

/// Remove an artifact's links from `profile`
///
/// # Errors
///
/// Returns `OpsError::NotInProfile` if the profile holds no link into the
/// artifact.
pub async fn unlink(ctx: &OpsCtx, id: &PackageId, profile: &str) -> Result<LinkReport, Error> {
    let handle = ctx.profile(profile);
    let listed = handle.installed().await?.contains(id);
    let links = handle.unlink(id).await?;
    if links == 0 && !listed {
        return Err(OpsError::NotInProfile {
            profile: profile.to_string(),
            id: id.to_string(),
        }
        .into());
    }
    Ok(LinkReport {
        profile: profile.to_string(),
        id: id.clone(),
        links,
    })
}

/// Ids linked into `profile`
///
/// # Errors
///
/// Returns an error if the profile's marker directory cannot be read.
pub async fn list(ctx: &OpsCtx, profile: &str) -> Result<Vec<PackageId>, Error> {
    ctx.profile(profile).installed().await
}
