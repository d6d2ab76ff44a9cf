//! Parallel plan execution with dependency ordering

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use vessel_car::CarUnpacker;
use vessel_errors::{Error, InstallError};
use vessel_events::{AppEvent, EventEmitter, EventSender, FailureContext, InstallEvent};
use vessel_resources::ResourceManager;
use vessel_types::{InstallReport, InstallState, PackageId};

use crate::builder::ScriptBuilder;
use crate::plan::{CarInstall, Installer, PackagesToInstall};

/// How a finished id got into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Built,
    Car,
}

/// Scheduling state of one planned id
#[derive(Debug, Default)]
struct ExecutionNode {
    /// Dependencies not yet frozen
    in_degree: usize,
    dependents: Vec<PackageId>,
}

/// Runs a [`PackagesToInstall`] with bounded parallelism
///
/// An id starts once all of its planned dependencies are frozen. When an id
/// fails, everything that depends on it (directly or not) is skipped while
/// unrelated ids keep going.
#[derive(Clone)]
pub struct InstallExecutor {
    builder: ScriptBuilder,
    unpacker: CarUnpacker,
    resources: ResourceManager,
    tx: EventSender,
    deadline: Option<Duration>,
}

impl InstallExecutor {
    #[must_use]
    pub fn new(
        builder: ScriptBuilder,
        unpacker: CarUnpacker,
        resources: ResourceManager,
        tx: EventSender,
    ) -> Self {
        Self {
            builder,
            unpacker,
            resources,
            tx,
            deadline: None,
        }
    }

    /// Cancel whatever is still running once `deadline` has passed
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn state(&self, id: &PackageId, state: InstallState) {
        self.tx.emit(AppEvent::Install(InstallEvent::StateChanged {
            id: id.to_string(),
            state,
        }));
    }

    /// Execute `plan`, returning what happened to every id
    ///
    /// Per-id failures are reported in the returned [`InstallReport`], not as
    /// an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if `cancel` fired, or
    /// `InstallError::TaskError` if the deadline passed or a task panicked.
    pub async fn execute(
        &self,
        plan: &PackagesToInstall,
        cancel: &CancellationToken,
    ) -> Result<InstallReport, Error> {
        let started = Instant::now();
        let cancel = cancel.child_token();
        let deadline = self.deadline.map(|d| started + d);
        let mut timed_out = false;

        let mut graph = build_graph(plan);
        let mut report = InstallReport {
            already_installed: plan.installed.iter().cloned().collect(),
            ..InstallReport::default()
        };
        let mut skipped: HashSet<PackageId> = HashSet::new();
        let mut ready: VecDeque<PackageId> = plan
            .install_order
            .iter()
            .filter(|id| graph.get(*id).is_some_and(|n| n.in_degree == 0))
            .cloned()
            .collect();
        for id in &plan.install_order {
            self.state(id, InstallState::Pending);
        }

        let mut tasks: JoinSet<(PackageId, Result<Origin, Error>)> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, PackageId> = HashMap::new();

        loop {
            while !cancel.is_cancelled() {
                let Some(id) = ready.pop_front() else {
                    break;
                };
                let Some(installer) = plan.installers.get(&id).cloned() else {
                    return Err(Error::internal(format!("no installer planned for {id}")));
                };
                tracing::debug!(%id, kind = installer.kind(), "starting");
                let handle = tasks.spawn(self.clone().run_one(id.clone(), installer, cancel.clone()));
                running.insert(handle.id(), id);
            }

            let joined = match deadline {
                Some(at) if !cancel.is_cancelled() => {
                    tokio::select! {
                        joined = tasks.join_next_with_id() => joined,
                        () = tokio::time::sleep_until(at) => {
                            tracing::warn!("plan deadline passed, cancelling running installs");
                            timed_out = true;
                            cancel.cancel();
                            continue;
                        }
                    }
                }
                _ => tasks.join_next_with_id().await,
            };
            let Some(joined) = joined else {
                break;
            };

            let (id, result) = match joined {
                Ok((task, outcome)) => {
                    running.remove(&task);
                    outcome
                }
                Err(e) => {
                    let id = running.remove(&e.id()).ok_or_else(|| {
                        Error::from(InstallError::TaskError {
                            message: e.to_string(),
                        })
                    })?;
                    let err = InstallError::TaskError {
                        message: e.to_string(),
                    };
                    (id, Err(err.into()))
                }
            };

            match result {
                Ok(origin) => {
                    self.state(&id, InstallState::Frozen);
                    match origin {
                        Origin::Built => report.built.push(id.clone()),
                        Origin::Car => report.from_car.push(id.clone()),
                    }
                    let dependents = graph
                        .get(&id)
                        .map(|n| n.dependents.clone())
                        .unwrap_or_default();
                    for dependent in dependents {
                        if let Some(node) = graph.get_mut(&dependent) {
                            node.in_degree = node.in_degree.saturating_sub(1);
                            if node.in_degree == 0 && !skipped.contains(&dependent) {
                                ready.push_back(dependent);
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(%id, error = %e, "install failed");
                    self.state(&id, InstallState::Failed);
                    self.tx.emit(AppEvent::Install(InstallEvent::Failed {
                        id: id.to_string(),
                        failure: FailureContext::from_error(&e),
                    }));
                    report.failed.push((id.clone(), e.to_string()));
                    for dependent in self.skip_dependents(&id, &mut graph, &mut skipped) {
                        report.skipped.push(dependent);
                    }
                }
            }
        }

        report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.tx.emit(AppEvent::Install(InstallEvent::Completed {
            succeeded: report.built.len() + report.from_car.len(),
            failed: report.failed.len(),
            skipped: report.skipped.len(),
        }));
        tracing::info!(
            built = report.built.len(),
            from_car = report.from_car.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "plan executed"
        );

        if timed_out {
            return Err(InstallError::TaskError {
                message: format!(
                    "plan deadline of {}s exceeded",
                    self.deadline.unwrap_or_default().as_secs()
                ),
            }
            .into());
        }
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(report)
    }

    /// Mark every transitive dependent of `failed` as skipped
    fn skip_dependents(
        &self,
        failed: &PackageId,
        graph: &mut HashMap<PackageId, ExecutionNode>,
        skipped: &mut HashSet<PackageId>,
    ) -> Vec<PackageId> {
        let mut out = Vec::new();
        let mut queue: VecDeque<PackageId> = graph
            .get(failed)
            .map(|n| n.dependents.iter().cloned().collect())
            .unwrap_or_default();
        while let Some(id) = queue.pop_front() {
            if !skipped.insert(id.clone()) {
                continue;
            }
            self.state(&id, InstallState::Skipped);
            self.tx.emit(AppEvent::Install(InstallEvent::Skipped {
                id: id.to_string(),
                dependency: failed.to_string(),
            }));
            tracing::warn!(%id, dependency = %failed, "skipped");
            if let Some(node) = graph.get(&id) {
                queue.extend(node.dependents.iter().cloned());
            }
            out.push(id);
        }
        out
    }

    async fn run_one(
        self,
        id: PackageId,
        installer: Installer,
        cancel: CancellationToken,
    ) -> (PackageId, Result<Origin, Error>) {
        let result = async {
            let _permit = tokio::select! {
                permit = self.resources.acquire_build() => permit?,
                () = cancel.cancelled() => return Err(Error::Cancelled),
            };
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match installer {
                Installer::Script(pkg) => self.builder.build(&pkg, &cancel).await.map(|_| Origin::Built),
                Installer::Car(car) => self.install_car(&car).await.map(|()| Origin::Car),
            }
        }
        .await;
        (id, result)
    }

    async fn install_car(&self, car: &CarInstall) -> Result<(), Error> {
        self.state(&car.info.id, InstallState::Staging);
        let data = car.data.open().await?;
        self.unpacker
            .unpack(data, &car.info, car.expected_signer.as_deref())
            .await
            .map(|_| ())
    }
}

fn build_graph(plan: &PackagesToInstall) -> HashMap<PackageId, ExecutionNode> {
    let mut graph: HashMap<PackageId, ExecutionNode> = plan
        .install_order
        .iter()
        .map(|id| (id.clone(), ExecutionNode::default()))
        .collect();
    for (id, deps) in &plan.dependencies {
        let unique: HashSet<&PackageId> = deps.iter().collect();
        for dep in unique {
            if !graph.contains_key(dep) {
                continue;
            }
            if let Some(node) = graph.get_mut(id) {
                node.in_degree += 1;
            }
            if let Some(node) = graph.get_mut(dep) {
                node.dependents.push(id.clone());
            }
        }
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn id(s: &str) -> PackageId {
        PackageId::from(s)
    }

    #[test]
    fn test_graph_counts_unique_planned_edges() {
        let mut dependencies = BTreeMap::new();
        dependencies.insert(id("a-a-1"), vec![]);
        dependencies.insert(id("b-b-1"), vec![id("a-a-1"), id("a-a-1")]);
        dependencies.insert(id("c-c-1"), vec![id("a-a-1"), id("b-b-1")]);
        let plan = PackagesToInstall {
            install_order: vec![id("a-a-1"), id("b-b-1"), id("c-c-1")],
            dependencies,
            ..PackagesToInstall::default()
        };

        let graph = build_graph(&plan);
        assert_eq!(graph[&id("a-a-1")].in_degree, 0);
        assert_eq!(graph[&id("b-b-1")].in_degree, 1);
        assert_eq!(graph[&id("c-c-1")].in_degree, 2);
        let mut dependents = graph[&id("a-a-1")].dependents.clone();
        dependents.sort();
        assert_eq!(dependents, vec![id("b-b-1"), id("c-c-1")]);
    }
}
