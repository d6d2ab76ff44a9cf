//! Closing a car over its dependencies

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use vessel_errors::Error;
use vessel_types::{CarInfo, PackageId};

use crate::lookup::{CarData, CarLookup};

/// One car selected for installation
#[derive(Debug, Clone)]
pub struct CarToInstall {
    pub repo: String,
    pub id: PackageId,
    /// Signer recorded by the dependent, or the car's own for the root
    pub signer: String,
    pub info: CarInfo,
    pub data: CarData,
}

/// Computes the set of cars needed to install one car
#[derive(Debug)]
pub struct CarCalcSet<'a> {
    lookup: &'a CarLookup,
}

impl<'a> CarCalcSet<'a> {
    #[must_use]
    pub fn new(lookup: &'a CarLookup) -> Self {
        Self { lookup }
    }

    /// Breadth-first closure of `id` over declared car dependencies
    ///
    /// The result is ordered so every car follows its dependencies.
    ///
    /// # Errors
    ///
    /// Returns `CarError::NoCarData` if any car in the closure is missing.
    pub async fn calculate(&self, repo: &str, id: &PackageId) -> Result<Vec<CarToInstall>, Error> {
        let mut found = BTreeMap::new();
        let mut seen = BTreeSet::from([id.clone()]);
        let mut queue = VecDeque::from([(repo.to_string(), id.clone(), String::new())]);

        while let Some((repo, id, signer)) = queue.pop_front() {
            let data = self.lookup.lookup(&repo, &id).await?;
            let info = data.info().await?;
            for dep in &info.dependencies {
                if seen.insert(dep.id.clone()) {
                    queue.push_back((dep.repo.clone(), dep.id.clone(), dep.signer.clone()));
                }
            }
            let signer = if signer.is_empty() {
                info.signer.clone()
            } else {
                signer
            };
            found.insert(
                id.clone(),
                CarToInstall {
                    repo,
                    id,
                    signer,
                    info,
                    data,
                },
            );
        }

        Ok(dependency_order(found))
    }
}

/// Post-order over the dependency graph so dependencies come first
fn dependency_order(mut found: BTreeMap<PackageId, CarToInstall>) -> Vec<CarToInstall> {
    fn visit(
        id: &PackageId,
        graph: &BTreeMap<PackageId, Vec<PackageId>>,
        done: &mut BTreeSet<PackageId>,
        order: &mut Vec<PackageId>,
    ) {
        if !done.insert(id.clone()) {
            return;
        }
        for dep in graph.get(id).into_iter().flatten() {
            visit(dep, graph, done, order);
        }
        order.push(id.clone());
    }

    let graph: BTreeMap<PackageId, Vec<PackageId>> = found
        .iter()
        .map(|(id, car)| (id.clone(), car.info.dependency_ids().cloned().collect()))
        .collect();
    let mut done = BTreeSet::new();
    let mut order = Vec::new();
    for id in graph.keys() {
        visit(id, &graph, &mut done, &mut order);
    }

    order.into_iter().filter_map(|id| found.remove(&id)).collect()
}
