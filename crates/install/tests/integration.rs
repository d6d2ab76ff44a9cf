//! Integration tests for install crate

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use std::sync::Arc;
    use tempfile::{tempdir, TempDir};
    use tokio_util::sync::CancellationToken;
    use vessel_car::{CarLookup, CarPacker, CarUnpacker, DirCarReader};
    use vessel_errors::{Error, StorageError};
    use vessel_events::{channel, AppEvent, EventReceiver, EventSender, InstallEvent};
    use vessel_hash::{Hash, Sum};
    use vessel_install::*;
    use vessel_net::NetClient;
    use vessel_platform::Platform;
    use vessel_recipe::{Input, InputSource, ScriptPackage, Statement};
    use vessel_resources::ResourceManager;
    use vessel_signing::Keypair;
    use vessel_store::Store;
    use vessel_types::{host_constraints, PackageId, PackageInfo};

    struct Env {
        temp: TempDir,
        store: Store,
        tx: EventSender,
        rx: EventReceiver,
    }

    fn env() -> Env {
        let temp = tempdir().unwrap();
        let store = Store::new(temp.path().join("store"));
        let (tx, rx) = channel();
        Env { temp, store, tx, rx }
    }

    fn recipe(
        name: &str,
        repo: &str,
        dependencies: Vec<Arc<ScriptPackage>>,
        install: Vec<Statement>,
    ) -> Arc<ScriptPackage> {
        let data = format!("{name} source\n").into_bytes();
        Arc::new(ScriptPackage {
            id: PackageId::new(&Hash::from_data(name.as_bytes()), name, "0.1"),
            name: name.to_string(),
            version: "0.1".to_string(),
            repo: repo.to_string(),
            inputs: vec![Input {
                name: "source".to_string(),
                sum: Sum::b2_of(&data),
                source: InputSource::Asset {
                    path: "./source.txt".to_string(),
                    data: Arc::from(data.as_slice()),
                },
                into: None,
                chdir: false,
            }],
            dependencies,
            instances: Vec::new(),
            install: Some(install),
            hook: None,
            constraints: host_constraints(),
        })
    }

    fn write(target: &str, data: &str) -> Statement {
        Statement::WriteFile {
            target: target.to_string(),
            data: data.to_string(),
        }
    }

    fn fail() -> Statement {
        Statement::System {
            args: vec!["false".to_string()],
            dir: None,
        }
    }

    fn executor(env: &Env) -> InstallExecutor {
        let builder = ScriptBuilder::new(
            env.store.clone(),
            env.temp.path().join("build"),
            env.temp.path().join("cache"),
            NetClient::with_defaults().unwrap(),
            Arc::new(Platform::current()),
            env.tx.clone(),
        );
        let unpacker = CarUnpacker::new(env.store.clone(), vec![]).with_events(env.tx.clone());
        InstallExecutor::new(builder, unpacker, ResourceManager::default(), env.tx.clone())
    }

    fn chain() -> (Arc<ScriptPackage>, Arc<ScriptPackage>, Arc<ScriptPackage>) {
        let p1 = recipe("p1", "", vec![], vec![write("share/p1", "1")]);
        let p2 = recipe("p2", "", vec![p1.clone()], vec![write("share/p2", "2")]);
        let p3 = recipe("p3", "", vec![p2.clone()], vec![write("share/p3", "3")]);
        (p1, p2, p3)
    }

    #[tokio::test]
    async fn test_plan_orders_dependencies_first() {
        let env = env();
        let (p1, p2, p3) = chain();

        let plan = Planner::new(env.store.clone()).plan(&[p3.clone()]).await.unwrap();
        assert_eq!(plan.install_order, vec![p1.id.clone(), p2.id.clone(), p3.id.clone()]);
        assert_eq!(plan.roots, vec![p3.id.clone()]);
        assert!(plan.installed.is_empty());
        assert!(plan
            .installers
            .values()
            .all(|installer| installer.kind() == "script"));
    }

    #[tokio::test]
    async fn test_plan_skips_installed_subtree() {
        let env = env();
        let (p1, p2, p3) = chain();
        env.store.create_artifact(&p2.id).await.unwrap();

        let plan = Planner::new(env.store.clone()).plan(&[p3.clone()]).await.unwrap();
        assert_eq!(plan.install_order, vec![p3.id.clone()]);
        assert!(plan.installed.contains(&p2.id));
        assert!(!plan.installers.contains_key(&p1.id));
        assert!(plan.dependencies[&p3.id].is_empty());
    }

    #[tokio::test]
    async fn test_installed_dependency_still_reached_independently() {
        let env = env();
        let (p1, p2, _) = chain();
        let p4 = recipe("p4", "", vec![p2.clone(), p1.clone()], vec![]);
        env.store.create_artifact(&p2.id).await.unwrap();

        let plan = Planner::new(env.store.clone()).plan(&[p4.clone()]).await.unwrap();
        assert_eq!(plan.install_order, vec![p1.id.clone(), p4.id.clone()]);
        assert_eq!(plan.dependencies[&p4.id], vec![p1.id.clone()]);
    }

    #[tokio::test]
    async fn test_plan_rejects_non_directory_artifact() {
        let env = env();
        let (p1, _, p3) = chain();
        std::fs::create_dir_all(env.store.path()).unwrap();
        std::fs::write(env.store.artifact_path(&p1.id), b"not a directory").unwrap();

        let err = Planner::new(env.store.clone()).plan(&[p3]).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::CorruptStore { .. })));
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_and_keeps_others() {
        let mut env = env();
        let ok = recipe("ok", "", vec![], vec![write("share/ok", "fine")]);
        let broken = recipe("broken", "", vec![ok.clone()], vec![write("partial", "x"), fail()]);
        let top = recipe("top", "", vec![broken.clone()], vec![write("share/top", "t")]);
        let other = recipe("other", "", vec![], vec![write("share/other", "o")]);

        let plan = Planner::new(env.store.clone())
            .plan(&[top.clone(), other.clone()])
            .await
            .unwrap();
        let report = executor(&env)
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();

        let mut built = report.built.clone();
        built.sort();
        let mut expected = vec![ok.id.clone(), other.id.clone()];
        expected.sort();
        assert_eq!(built, expected);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken.id);
        assert_eq!(report.skipped, vec![top.id.clone()]);

        assert!(!env.store.contains(&broken.id).await.unwrap());
        assert!(!env.store.contains(&top.id).await.unwrap());
        assert!(env.store.contains(&other.id).await.unwrap());

        let mut skipped_events = Vec::new();
        let mut completed = None;
        while let Ok(event) = env.rx.try_recv() {
            match event {
                AppEvent::Install(InstallEvent::Skipped { id, dependency }) => {
                    skipped_events.push((id, dependency));
                }
                AppEvent::Install(InstallEvent::Completed {
                    succeeded,
                    failed,
                    skipped,
                }) => completed = Some((succeeded, failed, skipped)),
                _ => {}
            }
        }
        assert_eq!(
            skipped_events,
            vec![(top.id.to_string(), broken.id.to_string())]
        );
        assert_eq!(completed, Some((2, 1, 1)));
    }

    #[tokio::test]
    async fn test_hooks_and_runtime_dependency_scan() {
        let env = env();
        let mut dep = (*recipe("dep", "", vec![], vec![])).clone();
        dep.hook = Some(vec![Statement::SetEnv {
            key: "FROM_HOOK".to_string(),
            value: "@@prefix@@/share".to_string(),
        }]);
        let dep = Arc::new(dep);
        let unused = recipe("unused", "", vec![], vec![]);

        // The dependencies exist in the store already
        for pkg in [&dep, &unused] {
            let root = env.store.create_artifact(&pkg.id).await.unwrap();
            std::fs::create_dir_all(root.join("share")).unwrap();
            env.store.freeze(&pkg.id).await.unwrap();
        }

        let app = recipe(
            "app",
            "",
            vec![dep.clone(), unused.clone()],
            vec![
                write("bin/run", &format!("#!/bin/sh\ncat @@store@@/{}/foo\n", dep.id)),
                Statement::Shell {
                    code: "echo \"$FROM_HOOK\" > @@prefix@@/hook.txt".to_string(),
                },
            ],
        );

        let plan = Planner::new(env.store.clone()).plan(&[app.clone()]).await.unwrap();
        assert_eq!(plan.install_order, vec![app.id.clone()]);
        let report = executor(&env)
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.built, vec![app.id.clone()]);
        assert_eq!(report.already_installed.len(), 2);

        let info = env.store.read_info(&app.id).await.unwrap().unwrap();
        assert_eq!(info.runtime_deps, vec![dep.id.clone()]);
        assert_eq!(info.build_deps.len(), 2);

        let hook = std::fs::read_to_string(env.store.artifact_path(&app.id).join("hook.txt")).unwrap();
        assert_eq!(
            hook.trim_end(),
            env.store.artifact_path(&dep.id).join("share").display().to_string()
        );
    }

    #[tokio::test]
    async fn test_published_car_is_preferred_over_building() {
        let source = env();
        let target = env();
        let repo = "local-cars";
        // Building this recipe would fail, so success means the car was used
        let lib = recipe("lib", repo, vec![], vec![fail()]);

        let root = source.store.create_artifact(&lib.id).await.unwrap();
        std::fs::write(root.join("lib.txt"), b"from a car").unwrap();
        source
            .store
            .write_info(&PackageInfo {
                id: lib.id.clone(),
                name: "lib".into(),
                version: "0.1".into(),
                repo: repo.into(),
                runtime_deps: vec![],
                build_deps: vec![],
                constraints: host_constraints(),
                inputs: vec![],
            })
            .await
            .unwrap();
        source.store.freeze(&lib.id).await.unwrap();

        let archive = source.temp.path().join("archive");
        CarPacker::new(source.store.clone())
            .pack(&lib.id, &Keypair::from_seed(&[3; 32]), &archive)
            .await
            .unwrap();

        let cars = CarLookup::new(NetClient::with_defaults().unwrap(), target.tx.clone())
            .with_override(repo, Arc::new(DirCarReader::new(&archive)));
        let plan = Planner::new(target.store.clone())
            .with_cars(cars)
            .plan(&[lib.clone()])
            .await
            .unwrap();
        assert_eq!(plan.installers[&lib.id].kind(), "car");

        let report = executor(&target)
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.from_car, vec![lib.id.clone()]);
        assert_eq!(
            std::fs::read(target.store.artifact_path(&lib.id).join("lib.txt")).unwrap(),
            b"from a car"
        );
    }

    #[tokio::test]
    async fn test_cancelled_plan_installs_nothing() {
        let env = env();
        let (p1, _, p3) = chain();
        let plan = Planner::new(env.store.clone()).plan(&[p3]).await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = executor(&env).execute(&plan, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!env.store.contains(&p1.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_url_input_is_fetched_once_and_staged() {
        let env = env();
        let server = MockServer::start();
        let body = b"remote payload\n";
        let mock = server.mock(|when, then| {
            when.method(GET).path("/dist/data.txt");
            then.status(200).body(body.as_slice());
        });

        let mut fetched = (*recipe(
            "fetched",
            "",
            vec![],
            vec![Statement::System {
                args: vec![
                    "cp".to_string(),
                    "@@top@@/data.txt".to_string(),
                    "@@prefix@@/data.txt".to_string(),
                ],
                dir: None,
            }],
        ))
        .clone();
        fetched.inputs = vec![Input {
            name: "data".to_string(),
            sum: Sum::b2_of(body),
            source: InputSource::Url {
                url: server.url("/dist/data.txt"),
            },
            into: None,
            chdir: false,
        }];
        let fetched = Arc::new(fetched);

        let plan = Planner::new(env.store.clone()).plan(&[fetched.clone()]).await.unwrap();
        let report = executor(&env)
            .execute(&plan, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.built, vec![fetched.id.clone()]);
        assert_eq!(
            std::fs::read(env.store.artifact_path(&fetched.id).join("data.txt")).unwrap(),
            body
        );
        mock.assert_hits(1);
    }
}
