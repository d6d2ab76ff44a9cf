//! Install, build and plan operations
//!
//! All three load recipes through the context's loader and hand them to the
//! planner; `install` additionally links the requested roots into a profile.

use std::sync::Arc;
use std::time::Instant;

use vessel_car::CarCalcSet;
use vessel_errors::{Error, OpsError};
use vessel_events::EventEmitter;
use vessel_install::PackagesToInstall;
use vessel_recipe::ScriptPackage;
use vessel_types::{InstallReport, InstallState, PackageId};

use crate::types::{BuildOutcome, CalcReport, PlannedInstall};
use crate::OpsCtx;

/// Install recipes by name and link them into `profile`
///
/// Roots that end up in the store are linked even when other ids of the plan
/// failed; failures are listed in the returned report.
///
/// # Errors
///
/// Returns an error if no names are given, a recipe fails to load, the plan
/// cannot be computed, the run is cancelled, or linking fails.
pub async fn install(ctx: &OpsCtx, names: &[String], profile: &str) -> Result<InstallReport, Error> {
    if names.is_empty() {
        return Err(OpsError::NoPackagesSpecified.into());
    }
    ctx.emit_operation_started("install");

    let roots = load_all(ctx, names).await?;
    let report = execute(ctx, &roots).await?;

    let profile = ctx.profile(profile);
    for root in &roots {
        if ctx.store.contains(&root.id).await? {
            profile.link(&root.id).await?;
        } else {
            ctx.emit_warning(format!("{} is not in the store, not linking", root.id));
        }
    }

    ctx.emit_operation_completed("install", report.is_success());
    Ok(report)
}

/// Build one recipe and its dependencies into the store without linking
///
/// # Errors
///
/// Returns an error if the recipe fails to load, planning fails, or the run
/// is cancelled.
pub async fn build(ctx: &OpsCtx, name: &str) -> Result<BuildOutcome, Error> {
    ctx.emit_operation_started("build");
    let pkg = ctx.loader.load(name).await?;
    let report = execute(ctx, std::slice::from_ref(&pkg)).await?;
    ctx.emit_operation_completed("build", report.is_success());
    Ok(BuildOutcome {
        id: pkg.id.clone(),
        report,
    })
}

/// Compute the id of a recipe and the plan that would install it
///
/// # Errors
///
/// Returns an error if the recipe fails to load or planning fails.
pub async fn calc(ctx: &OpsCtx, name: &str) -> Result<CalcReport, Error> {
    let pkg = ctx.loader.load(name).await?;
    let plan = ctx.planner().plan(std::slice::from_ref(&pkg)).await?;
    Ok(calc_report(&pkg.id, &plan))
}

/// Install a published car and its car dependencies, then link it
///
/// Cars are unpacked dependencies first; ids already in the store are left
/// alone.
///
/// # Errors
///
/// Returns `CarError::NoCarData` if any car in the closure is missing, a
/// verification error if a car is rejected, or `Error::Cancelled`.
pub async fn install_car(
    ctx: &OpsCtx,
    repo: &str,
    id: &PackageId,
    profile: &str,
) -> Result<InstallReport, Error> {
    let start = Instant::now();
    ctx.emit_operation_started("install-car");

    let cars = CarCalcSet::new(&ctx.cars).calculate(repo, id).await?;
    let unpacker = ctx.unpacker();
    let mut report = InstallReport::default();

    for car in cars {
        if ctx.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if ctx.store.contains(&car.id).await? {
            report.already_installed.push(car.id);
            continue;
        }
        ctx.emit_install_state(car.id.to_string(), InstallState::Staging);
        let data = car.data.open().await?;
        unpacker.unpack(data, &car.info, Some(&car.signer)).await?;
        ctx.emit_install_state(car.id.to_string(), InstallState::Frozen);
        tracing::info!(id = %car.id, repo = %car.repo, "installed car");
        report.from_car.push(car.id);
    }

    ctx.profile(profile).link(id).await?;
    report.duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    ctx.emit_operation_completed("install-car", true);
    Ok(report)
}

pub(crate) async fn load_all(ctx: &OpsCtx, names: &[String]) -> Result<Vec<Arc<ScriptPackage>>, Error> {
    let mut roots = Vec::with_capacity(names.len());
    for name in names {
        roots.push(ctx.loader.load(name).await?);
    }
    Ok(roots)
}

pub(crate) async fn execute(ctx: &OpsCtx, roots: &[Arc<ScriptPackage>]) -> Result<InstallReport, Error> {
    let plan = ctx.planner().plan(roots).await?;
    tracing::debug!(
        roots = roots.len(),
        to_install = plan.len(),
        installed = plan.installed.len(),
        "plan computed"
    );
    ctx.executor().execute(&plan, &ctx.cancel).await
}

fn calc_report(id: &PackageId, plan: &PackagesToInstall) -> CalcReport {
    let install_order = plan
        .install_order
        .iter()
        .map(|planned| PlannedInstall {
            id: planned.clone(),
            installer: plan
                .installers
                .get(planned)
                .map_or("script", |installer| installer.kind())
                .to_string(),
            dependencies: plan.dependencies.get(planned).cloned().unwrap_or_default(),
        })
        .collect();
    CalcReport {
        id: id.clone(),
        install_order,
        installed: plan.installed.iter().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_calc_report_follows_plan_order() {
        let a = PackageId::from("aaaa-a-1");
        let b = PackageId::from("bbbb-b-1");
        let mut dependencies = BTreeMap::new();
        dependencies.insert(a.clone(), vec![]);
        dependencies.insert(b.clone(), vec![a.clone()]);
        let plan = PackagesToInstall {
            roots: vec![b.clone()],
            dependencies,
            install_order: vec![a.clone(), b.clone()],
            installed: [PackageId::from("cccc-c-1")].into_iter().collect(),
            ..PackagesToInstall::default()
        };

        let report = calc_report(&b, &plan);
        assert_eq!(report.id, b);
        assert_eq!(report.install_order.len(), 2);
        assert_eq!(report.install_order[0].id, a);
        assert_eq!(report.install_order[1].dependencies, vec![a]);
        assert_eq!(report.installed, vec![PackageId::from("cccc-c-1")]);
    }
}
