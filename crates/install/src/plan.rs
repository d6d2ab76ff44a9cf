//! Install planning
//!
//! A plan is computed by a depth-first walk from the requested roots. An id
//! whose artifact directory already exists is installed and its subtree is
//! not visited. Otherwise a published car is preferred over building, and
//! the car's own dependency records replace the recipe's. The resulting
//! adjacency map is ordered with Kahn's algorithm.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use vessel_car::{CarData, CarLookup};
use vessel_errors::{CarError, Error, InstallError};
use vessel_events::{AppEvent, EventEmitter, EventSender, InstallEvent};
use vessel_recipe::ScriptPackage;
use vessel_store::Store;
use vessel_types::{CarDependency, CarInfo, PackageId};

/// A car chosen to satisfy an id
#[derive(Debug, Clone)]
pub struct CarInstall {
    pub repo: String,
    pub info: CarInfo,
    pub data: CarData,
    /// Signer the dependent's car recorded for this id
    pub expected_signer: Option<String>,
}

/// How an id in the plan gets into the store
#[derive(Debug, Clone)]
pub enum Installer {
    /// Build from the recipe
    Script(Arc<ScriptPackage>),
    /// Verify and unpack a car
    Car(Box<CarInstall>),
}

impl Installer {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::Car(_) => "car",
        }
    }
}

/// Output of the planner
#[derive(Debug, Default)]
pub struct PackagesToInstall {
    pub roots: Vec<PackageId>,
    pub installers: HashMap<PackageId, Installer>,
    /// `u -> [v]` where `u` depends on `v`; only ids that need installing appear
    pub dependencies: BTreeMap<PackageId, Vec<PackageId>>,
    /// Ids found in the store while walking
    pub installed: BTreeSet<PackageId>,
    /// Every id to install, dependencies first
    pub install_order: Vec<PackageId>,
}

impl PackagesToInstall {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.install_order.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.install_order.len()
    }

    /// Ids that directly depend on each planned id
    #[must_use]
    pub fn dependents(&self) -> HashMap<PackageId, Vec<PackageId>> {
        let mut out: HashMap<PackageId, Vec<PackageId>> = HashMap::new();
        for (id, deps) in &self.dependencies {
            for dep in deps {
                out.entry(dep.clone()).or_default().push(id.clone());
            }
        }
        out
    }
}

enum Node {
    Recipe(Arc<ScriptPackage>),
    Car(CarDependency),
}

impl Node {
    fn id(&self) -> &PackageId {
        match self {
            Self::Recipe(pkg) => &pkg.id,
            Self::Car(dep) => &dep.id,
        }
    }

    fn repo(&self) -> &str {
        match self {
            Self::Recipe(pkg) => &pkg.repo,
            Self::Car(dep) => &dep.repo,
        }
    }
}

#[derive(Default)]
struct Walk {
    out: PackagesToInstall,
    visited: HashSet<PackageId>,
    /// Recipes reachable from the roots, for car dependencies without a car
    recipes: HashMap<PackageId, Arc<ScriptPackage>>,
}

/// Computes [`PackagesToInstall`] for a set of root recipes
#[derive(Debug, Clone)]
pub struct Planner {
    store: Store,
    cars: Option<CarLookup>,
    tx: Option<EventSender>,
}

impl Planner {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            store,
            cars: None,
            tx: None,
        }
    }

    /// Consult published cars before falling back to building
    #[must_use]
    pub fn with_cars(mut self, cars: CarLookup) -> Self {
        self.cars = Some(cars);
        self
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Plan the installation of `roots` and everything they need
    ///
    /// # Errors
    ///
    /// Returns `StorageError::CorruptStore` if an artifact path is not a
    /// directory, `InstallError::CircularDependency` if the graph has a cycle,
    /// or `CarError::NoCarData` for a car dependency with neither a car nor a
    /// recipe.
    pub async fn plan(&self, roots: &[Arc<ScriptPackage>]) -> Result<PackagesToInstall, Error> {
        let mut walk = Walk::default();
        for root in roots {
            walk.recipes.insert(root.id.clone(), Arc::clone(root));
            for dep in root.transitive_dependencies() {
                walk.recipes.insert(dep.id.clone(), dep);
            }
        }

        for root in roots {
            walk.out.roots.push(root.id.clone());
            self.visit(Node::Recipe(Arc::clone(root)), &mut walk).await?;
        }

        let mut out = walk.out;
        out.install_order = topological_order(&out.dependencies)?;

        tracing::debug!(
            roots = out.roots.len(),
            planned = out.install_order.len(),
            installed = out.installed.len(),
            "plan computed"
        );
        self.tx.emit(AppEvent::Install(InstallEvent::PlanComputed {
            roots: out.roots.iter().map(ToString::to_string).collect(),
            install_order: out.install_order.iter().map(ToString::to_string).collect(),
            installed: out.installed.len(),
        }));
        Ok(out)
    }

    /// Visit `node`; returns whether its id has to be installed
    fn visit<'a>(
        &'a self,
        node: Node,
        walk: &'a mut Walk,
    ) -> Pin<Box<dyn Future<Output = Result<bool, Error>> + Send + 'a>> {
        Box::pin(async move {
            let id = node.id().clone();
            if !walk.visited.insert(id.clone()) {
                return Ok(!walk.out.installed.contains(&id));
            }

            if self.store.contains(&id).await? {
                tracing::debug!(%id, "already installed");
                walk.out.installed.insert(id);
                return Ok(false);
            }

            if let Some(car) = self.find_car(node.repo(), &id).await? {
                let deps = car.info.dependencies.clone();
                let expected_signer = match &node {
                    Node::Car(dep) => Some(dep.signer.clone()),
                    Node::Recipe(_) => None,
                };
                walk.out.installers.insert(
                    id.clone(),
                    Installer::Car(Box::new(CarInstall {
                        expected_signer,
                        ..car
                    })),
                );

                let mut edges = Vec::new();
                for dep in deps {
                    let dep_id = dep.id.clone();
                    if self.visit(Node::Car(dep), walk).await? {
                        edges.push(dep_id);
                    }
                }
                walk.out.dependencies.insert(id, edges);
                return Ok(true);
            }

            let pkg = match node {
                Node::Recipe(pkg) => pkg,
                Node::Car(dep) => walk.recipes.get(&dep.id).cloned().ok_or_else(|| {
                    Error::from(CarError::NoCarData {
                        repo: dep.repo.clone(),
                        id: dep.id.to_string(),
                    })
                })?,
            };
            walk.out
                .installers
                .insert(id.clone(), Installer::Script(Arc::clone(&pkg)));

            let mut edges = Vec::new();
            for dep in pkg.all_dependencies() {
                if self.visit(Node::Recipe(Arc::clone(dep)), walk).await? && !edges.contains(&dep.id)
                {
                    edges.push(dep.id.clone());
                }
            }
            walk.out.dependencies.insert(id, edges);
            Ok(true)
        })
    }

    async fn find_car(&self, repo: &str, id: &PackageId) -> Result<Option<CarInstall>, Error> {
        let Some(cars) = &self.cars else {
            return Ok(None);
        };
        if repo.is_empty() {
            return Ok(None);
        }

        let located = match cars.lookup(repo, id).await {
            Ok(data) => data,
            Err(Error::Car(CarError::NoCarData { .. })) => return Ok(None),
            Err(e) => return Err(e),
        };
        match located.info().await {
            Ok(info) => Ok(Some(CarInstall {
                repo: repo.to_string(),
                info,
                data: located,
                expected_signer: None,
            })),
            Err(Error::Car(CarError::NoCarData { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Order the keys of `dependencies` so every dependency precedes its dependents
///
/// Ties are broken by id, so the order is stable for a given graph.
///
/// # Errors
///
/// Returns `InstallError::CircularDependency` naming the ids left on a cycle.
pub fn topological_order(
    dependencies: &BTreeMap<PackageId, Vec<PackageId>>,
) -> Result<Vec<PackageId>, Error> {
    let mut remaining: BTreeMap<&PackageId, usize> = BTreeMap::new();
    let mut dependents: HashMap<&PackageId, Vec<&PackageId>> = HashMap::new();
    for (id, deps) in dependencies {
        let unique: BTreeSet<&PackageId> = deps.iter().collect();
        remaining.insert(id, unique.len());
        for dep in unique {
            dependents.entry(dep).or_default().push(id);
        }
    }

    let mut ready: VecDeque<&PackageId> = remaining
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(remaining.len());

    while let Some(id) = ready.pop_front() {
        order.push(id.clone());
        let mut unblocked = Vec::new();
        for dependent in dependents.get(id).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(dependent) {
                *count -= 1;
                if *count == 0 {
                    unblocked.push(*dependent);
                }
            }
        }
        unblocked.sort();
        ready.extend(unblocked);
    }

    if order.len() < remaining.len() {
        let placed: HashSet<&PackageId> = order.iter().collect();
        let cycle = remaining
            .keys()
            .filter(|id| !placed.contains(**id))
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(InstallError::CircularDependency { ids: cycle }.into());
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn id(n: usize) -> PackageId {
        PackageId::from(format!("h{n:02}-p{n}-1").as_str())
    }

    #[test]
    fn test_cycle_is_reported() {
        let mut deps = BTreeMap::new();
        deps.insert(id(1), vec![id(2)]);
        deps.insert(id(2), vec![id(3)]);
        deps.insert(id(3), vec![id(1)]);
        deps.insert(id(4), vec![]);

        let err = topological_order(&deps).unwrap_err();
        match err {
            Error::Install(InstallError::CircularDependency { ids }) => {
                assert!(ids.contains("p1") && ids.contains("p3"));
                assert!(!ids.contains("p4"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_ties_break_by_id() {
        let mut deps = BTreeMap::new();
        deps.insert(id(3), vec![]);
        deps.insert(id(1), vec![]);
        deps.insert(id(2), vec![id(1), id(1)]);
        assert_eq!(topological_order(&deps).unwrap(), vec![id(1), id(3), id(2)]);
    }

    proptest! {
        #[test]
        fn prop_dependencies_precede_dependents(
            edges in prop::collection::vec((0usize..24, 0usize..24), 0..80)
        ) {
            // Edges only point to lower numbers, so the graph is acyclic
            let mut deps: BTreeMap<PackageId, Vec<PackageId>> = BTreeMap::new();
            for n in 0..24 {
                deps.insert(id(n), Vec::new());
            }
            for (a, b) in edges {
                let (hi, lo) = if a > b { (a, b) } else { (b, a) };
                if hi != lo {
                    deps.entry(id(hi)).or_default().push(id(lo));
                }
            }

            let order = topological_order(&deps).unwrap();
            let position: HashMap<&PackageId, usize> =
                order.iter().enumerate().map(|(i, id)| (id, i)).collect();
            prop_assert_eq!(position.len(), order.len());
            prop_assert_eq!(order.len(), deps.len());
            for (u, vs) in &deps {
                for v in vs {
                    prop_assert!(position[v] < position[u]);
                }
            }
        }
    }
}
