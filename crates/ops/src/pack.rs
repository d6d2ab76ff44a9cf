//! Pack and upload command implementations

use std::path::Path;

use vessel_car::{CarPacker, CarUploader};
use vessel_errors::{Error, OpsError};
use vessel_events::EventEmitter;
use vessel_types::{PackReport, PackageId, UploadReport};

use crate::OpsCtx;

/// Pack a stored artifact into `<data>/archive`, signed with the configured key
///
/// # Errors
///
/// Returns an error if the signing key cannot be loaded, the artifact or its
/// pkg-info is missing, or a scanned reference does not resolve.
pub async fn pack(ctx: &OpsCtx, id: &PackageId) -> Result<PackReport, Error> {
    ctx.emit_operation_started("pack");
    let key = ctx.signing_key()?;
    let report = CarPacker::new(ctx.store.clone())
        .with_events(ctx.tx.clone())
        .pack(id, &key, &ctx.config.archive_path())
        .await?;
    tracing::info!(
        %id,
        car = %report.car_path.display(),
        size = report.size,
        dependencies = report.dependencies.len(),
        "packed"
    );
    ctx.emit_operation_completed("pack", true);
    Ok(report)
}

/// Push `<data>/archive` cars for a recipe to the configured remote store
///
/// Without `all`, uploads the recipe's car and whichever of its car
/// dependencies are in the archive. With `all`, uploads exactly the recipe's
/// dependency closure and the recipe itself, dependencies first.
///
/// # Errors
///
/// Returns `OpsError::OperationFailed` if no remote is configured,
/// `CarError::NoCarData` if a car to push is missing, or a network error if
/// the remote rejects a push.
pub async fn upload(
    ctx: &OpsCtx,
    name: &str,
    all: bool,
    input_dir: Option<&Path>,
) -> Result<UploadReport, Error> {
    let base = ctx
        .config
        .upload
        .url
        .clone()
        .ok_or_else(|| OpsError::OperationFailed {
            message: "no upload url configured; set [upload] url or VESSEL_UPLOAD_URL".to_string(),
        })?;
    ctx.emit_operation_started("upload");

    let pkg = ctx.loader.load(name).await?;
    let archive = input_dir.map_or_else(|| ctx.config.archive_path(), Path::to_path_buf);
    let uploader = CarUploader::new(base, ctx.net.clone(), archive, ctx.tx.clone())
        .with_token(ctx.config.upload.token.clone());

    let report = if all {
        let mut ids: Vec<PackageId> = pkg
            .transitive_dependencies()
            .iter()
            .map(|dep| dep.id.clone())
            .collect();
        ids.push(pkg.id.clone());
        uploader.upload_explicit(&ids).await?
    } else {
        uploader.upload(&pkg.id).await?
    };

    tracing::info!(id = %pkg.id, uploaded = report.uploaded.len(), base = %report.base, "upload finished");
    ctx.emit_operation_completed("upload", true);
    Ok(report)
}
