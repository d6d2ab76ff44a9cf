//! Building one recipe into its store artifact

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use vessel_errors::{Error, InstallError};
use vessel_events::{AppEvent, EventEmitter, EventSender, InstallEvent};
use vessel_net::NetClient;
use vessel_platform::fs as pfs;
use vessel_platform::{is_host_binary, relocate_references, Platform, PlatformContext};
use vessel_recipe::{Bindings, ScriptPackage, Statement};
use vessel_store::{prune_runtime_deps, ResolveDb, Store};
use vessel_types::{InstallState, PackageId, PackageInfo};

use crate::env::BuildEnv;
use crate::runner::StatementRunner;
use crate::staging::{build_root, Stager};

/// Runs a recipe's inputs, hooks and install procedure
///
/// The artifact directory only survives a build that completes: any error,
/// including cancellation, removes it again.
#[derive(Clone)]
pub struct ScriptBuilder {
    store: Store,
    build_dir: PathBuf,
    stager: Stager,
    client: NetClient,
    platform: Arc<Platform>,
    tx: EventSender,
}

impl ScriptBuilder {
    #[must_use]
    pub fn new(
        store: Store,
        build_dir: PathBuf,
        cache_dir: PathBuf,
        client: NetClient,
        platform: Arc<Platform>,
        tx: EventSender,
    ) -> Self {
        Self {
            stager: Stager::new(client.clone(), cache_dir, tx.clone()),
            store,
            build_dir,
            client,
            platform,
            tx,
        }
    }

    fn state(&self, id: &PackageId, state: InstallState) {
        self.tx.emit(AppEvent::Install(InstallEvent::StateChanged {
            id: id.to_string(),
            state,
        }));
    }

    /// Build `pkg` into a frozen artifact and return its path
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact already exists, an input fails to
    /// stage, a statement fails, post-processing fails, or `cancel` fires.
    pub async fn build(&self, pkg: &ScriptPackage, cancel: &CancellationToken) -> Result<PathBuf, Error> {
        let id = &pkg.id;
        let work = self.build_dir.join(format!("build-{id}"));
        pfs::remove_dir_all(&work).await?;
        tokio::fs::create_dir_all(&work)
            .await
            .map_err(|e| Error::io_with_path(&e, &work))?;

        let result = match self.store.create_artifact(id).await {
            Ok(prefix) => {
                let built = self.build_in(pkg, &work, &prefix, cancel).await;
                if built.is_err() {
                    if let Err(e) = self.store.remove(id).await {
                        tracing::warn!(%id, error = %e, "could not remove failed artifact");
                    }
                }
                built.map(|()| prefix)
            }
            Err(e) => Err(e),
        };

        if let Err(e) = pfs::remove_dir_all(&work).await {
            tracing::warn!(%id, error = %e, "could not remove build directory");
        }
        result
    }

    async fn build_in(
        &self,
        pkg: &ScriptPackage,
        top: &Path,
        prefix: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), Error> {
        let id = &pkg.id;
        let check = || {
            if cancel.is_cancelled() {
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        };

        check()?;
        self.state(id, InstallState::Staging);
        self.stager.stage_all(id, &pkg.inputs, top).await?;
        let build = build_root(&pkg.inputs, top).await;

        let deps = pkg.transitive_dependencies();
        let dep_ids: Vec<PackageId> = deps.iter().map(|d| d.id.clone()).collect();
        let env = BuildEnv::compose(self.store.path(), &dep_ids).await;

        let ctx = PlatformContext::new(Some(self.tx.clone())).with_id(id.to_string());
        let mut runner = StatementRunner::new(
            id,
            &self.platform,
            ctx.clone(),
            cancel,
            &self.client,
            &self.tx,
            build,
            env,
        );

        for dep in &deps {
            let Some(hook) = &dep.hook else {
                continue;
            };
            check()?;
            let dep_prefix = self.store.artifact_path(&dep.id);
            let statements = self.bind(hook, &dep_prefix, runner.build_dir(), top);
            runner.set_prefix(dep_prefix);
            runner.run(&statements).await?;
            tracing::debug!(%id, dependency = %dep.id, "hook applied");
            self.tx.emit(AppEvent::Install(InstallEvent::HookApplied {
                id: id.to_string(),
                dependency: dep.id.to_string(),
            }));
        }

        check()?;
        self.state(id, InstallState::Building);
        runner.set_prefix(prefix.to_path_buf());
        if let Some(install) = &pkg.install {
            let statements = self.bind(install, prefix, runner.build_dir(), top);
            runner.run(&statements).await?;
        }
        drop(runner);

        check()?;
        self.state(id, InstallState::PostProcessing);
        self.relocate(id, &ctx, prefix).await?;

        let scanned = self.store.scan(id).await?;
        let info = PackageInfo {
            id: id.clone(),
            name: pkg.name.clone(),
            version: pkg.version.clone(),
            repo: pkg.repo.clone(),
            runtime_deps: prune_runtime_deps(&dep_ids, &scanned),
            build_deps: dep_ids,
            constraints: pkg.constraints.clone(),
            inputs: pkg.input_records(),
        };
        self.store.write_info(&info).await?;
        self.store.freeze(id).await?;
        ResolveDb::new(self.store.path()).record(&pkg.name, id).await?;

        tracing::info!(%id, runtime_deps = info.runtime_deps.len(), "built");
        Ok(())
    }

    fn bind(&self, statements: &[Statement], prefix: &Path, build: &Path, top: &Path) -> Vec<Statement> {
        let bindings = Bindings {
            prefix: prefix.display().to_string(),
            build: build.display().to_string(),
            top: top.display().to_string(),
            store: self.store.path().display().to_string(),
        };
        statements.iter().map(|s| s.bind(&bindings)).collect()
    }

    /// Rewrite host binaries so their store references use canonical paths
    async fn relocate(&self, id: &PackageId, ctx: &PlatformContext, prefix: &Path) -> Result<(), Error> {
        let post_failed = |message: String| -> Error {
            InstallError::PostProcessFailed {
                id: id.to_string(),
                message,
            }
            .into()
        };

        let root = prefix.to_path_buf();
        let files = tokio::task::spawn_blocking(move || {
            walkdir::WalkDir::new(&root)
                .into_iter()
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(walkdir::DirEntry::into_path)
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| Error::internal(format!("relocate walk task failed: {e}")))?;

        for file in files {
            if !is_host_binary(&file).await.map_err(|e| post_failed(e.to_string()))? {
                continue;
            }
            let changes = relocate_references(self.platform.binary(), ctx, &file, self.store.path())
                .await
                .map_err(|e| post_failed(format!("{}: {e}", file.display())))?;
            for change in changes {
                tracing::debug!(%id, file = %file.display(), %change, "relocated");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc as StdArc;
    use vessel_hash::Sum;
    use vessel_recipe::{Input, InputSource};
    use vessel_types::Constraints;

    fn package(id: &str, install: Vec<Statement>) -> ScriptPackage {
        let data: &[u8] = b"hello\n";
        ScriptPackage {
            id: PackageId::from(id),
            name: id.split('-').nth(1).unwrap_or(id).to_string(),
            version: "1".to_string(),
            repo: String::new(),
            inputs: vec![Input {
                name: "greeting".to_string(),
                source: InputSource::Asset {
                    path: "./greeting.txt".to_string(),
                    data: StdArc::from(data),
                },
                sum: Sum::b2_of(data),
                into: None,
                chdir: false,
            }],
            dependencies: Vec::new(),
            instances: Vec::new(),
            install: Some(install),
            hook: None,
            constraints: Constraints::default(),
        }
    }

    fn builder(root: &Path) -> (ScriptBuilder, Store, vessel_events::EventReceiver) {
        let store = Store::new(root.join("store"));
        let (tx, rx) = vessel_events::channel();
        let builder = ScriptBuilder::new(
            store.clone(),
            root.join("build"),
            root.join("cache"),
            NetClient::with_defaults().unwrap(),
            Arc::new(Platform::current()),
            tx,
        );
        (builder, store, rx)
    }

    #[tokio::test]
    async fn test_successful_build_is_frozen_with_info() {
        let temp = tempfile::tempdir().unwrap();
        let (builder, store, mut rx) = builder(temp.path());
        let pkg = package(
            "aaaa-hello-1",
            vec![
                Statement::System {
                    args: vec![
                        "cp".to_string(),
                        "@@top@@/greeting.txt".to_string(),
                        "@@prefix@@/greeting.txt".to_string(),
                    ],
                    dir: None,
                },
                Statement::WriteFile {
                    target: "share/version".to_string(),
                    data: "1\n".to_string(),
                },
            ],
        );

        let path = builder.build(&pkg, &CancellationToken::new()).await.unwrap();
        assert_eq!(std::fs::read(path.join("greeting.txt")).unwrap(), b"hello\n");
        assert!(store.contains(&pkg.id).await.unwrap());
        assert!(pfs::is_frozen(&path).await.unwrap());
        assert_eq!(store.read_info(&pkg.id).await.unwrap().unwrap().name, "hello");
        assert!(!temp.path().join("build/build-aaaa-hello-1").exists());

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::Install(InstallEvent::StateChanged { state, .. }) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![InstallState::Staging, InstallState::Building, InstallState::PostProcessing]
        );
    }

    #[tokio::test]
    async fn test_failed_command_leaves_no_artifact() {
        let temp = tempfile::tempdir().unwrap();
        let (builder, store, _rx) = builder(temp.path());
        let pkg = package(
            "bbbb-broken-1",
            vec![
                Statement::WriteFile {
                    target: "partial".to_string(),
                    data: "x".to_string(),
                },
                Statement::System {
                    args: vec!["false".to_string()],
                    dir: None,
                },
            ],
        );

        let err = builder.build(&pkg, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Install(InstallError::CommandFailed { .. })));
        assert!(!store.contains(&pkg.id).await.unwrap());
        assert!(!store.info_path(&pkg.id).exists());
    }

    #[tokio::test]
    async fn test_existing_artifact_is_kept() {
        let temp = tempfile::tempdir().unwrap();
        let (builder, store, _rx) = builder(temp.path());
        let pkg = package("cccc-kept-1", Vec::new());
        let existing = store.create_artifact(&pkg.id).await.unwrap();
        std::fs::write(existing.join("marker"), b"").unwrap();

        assert!(builder.build(&pkg, &CancellationToken::new()).await.is_err());
        assert!(existing.join("marker").exists());
    }
}
