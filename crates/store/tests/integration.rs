//! Integration tests for store crate

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use vessel_hash::Hash;
    use vessel_store::*;
    use vessel_types::{host_constraints, PackageId, PackageInfo};

    struct Layout {
        _temp: TempDir,
        store: Store,
        profiles: std::path::PathBuf,
        roots: std::path::PathBuf,
    }

    fn layout() -> Layout {
        let temp = tempdir().unwrap();
        let store = Store::new(temp.path().join("store"));
        let profiles = temp.path().join("profiles");
        let roots = temp.path().join("roots");
        Layout {
            store,
            profiles,
            roots,
            _temp: temp,
        }
    }

    fn id(name: &str) -> PackageId {
        PackageId::new(&Hash::from_data(name.as_bytes()), name, "1")
    }

    async fn artifact(store: &Store, id: &PackageId, files: &[(&str, &[u8])]) {
        let root = store.create_artifact(id).await.unwrap();
        for (path, data) in files {
            let path = root.join(path);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
    }

    fn info(id: &PackageId, runtime: Vec<PackageId>, build: Vec<PackageId>) -> PackageInfo {
        PackageInfo {
            id: id.clone(),
            name: id.as_str().split('-').nth(1).unwrap().to_string(),
            version: "1".into(),
            repo: String::new(),
            runtime_deps: runtime,
            build_deps: build,
            constraints: host_constraints(),
            inputs: vec![],
        }
    }

    fn dir_size(path: &Path) -> u64 {
        walkdir::WalkDir::new(path)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
            .map(|e| e.metadata().unwrap().len())
            .sum()
    }

    #[tokio::test]
    async fn test_scan_finds_runtime_dependency() {
        let l = layout();
        let dep = id("zlib");
        let unused = id("cmake");
        let app = id("app");
        artifact(&l.store, &dep, &[("lib/libz.a", b"zlib")]).await;

        let script = format!(
            "#!/bin/sh\nLD_LIBRARY_PATH={}/{dep}/lib exec app\n",
            l.store.path().display()
        );
        artifact(&l.store, &app, &[("bin/app", script.as_bytes())]).await;
        std::os::unix::fs::symlink(
            l.store.artifact_path(&dep).join("lib/libz.a"),
            l.store.artifact_path(&app).join("libz.a"),
        )
        .unwrap();

        let scanned = l.store.scan(&app).await.unwrap();
        assert_eq!(scanned, BTreeSet::from([dep.hash_part().to_string()]));

        let runtime = prune_runtime_deps(&[dep.clone(), unused], &scanned);
        assert_eq!(runtime, vec![dep]);
    }

    #[tokio::test]
    async fn test_gc_sweeps_unreachable_artifacts() {
        let l = layout();
        let a = id("a");
        let b = id("b");
        let c = id("c");
        artifact(&l.store, &a, &[("bin/a", b"aaaa")]).await;
        artifact(&l.store, &b, &[("lib/libb", b"bb")]).await;
        artifact(&l.store, &c, &[("share/c/data", b"cccccccc"), ("share/c/more", b"c")]).await;
        l.store
            .write_info(&info(&a, vec![b.clone()], vec![]))
            .await
            .unwrap();
        l.store.write_info(&info(&c, vec![], vec![])).await.unwrap();

        let profile = Profile::new(l.store.clone(), &l.profiles, l.roots.clone(), "default");
        profile.link(&a).await.unwrap();

        let c_size = dir_size(&l.store.artifact_path(&c));
        let gc = GarbageCollector::new(l.store.clone(), l.roots.clone());
        let live = gc.mark().await.unwrap();
        assert_eq!(live, BTreeSet::from([a.clone(), b.clone()]));

        let report = gc.sweep(&live).await.unwrap();
        assert_eq!(report.removed, vec![c.clone()]);
        assert_eq!(report.bytes_recovered, c_size);
        assert!(report.entries_removed >= 4);

        assert!(l.store.contains(&a).await.unwrap());
        assert!(l.store.contains(&b).await.unwrap());
        assert!(!l.store.contains(&c).await.unwrap());
        assert!(!l.store.info_path(&c).exists());

        // Nothing left to collect
        assert!(gc.sweep_and_remove().await.unwrap().removed.is_empty());
    }

    #[tokio::test]
    async fn test_gc_retains_build_deps_and_ignores_dangling_roots() {
        let l = layout();
        let tool = id("tool");
        let app = id("app");
        artifact(&l.store, &tool, &[("bin/tool", b"t")]).await;
        artifact(&l.store, &app, &[("bin/app", b"a")]).await;
        l.store
            .write_info(&info(&app, vec![], vec![tool.clone()]))
            .await
            .unwrap();

        let profile = Profile::new(l.store.clone(), &l.profiles, l.roots.clone(), "work");
        profile.link(&app).await.unwrap();
        std::os::unix::fs::symlink("/nonexistent/profile", l.roots.join("dangling")).unwrap();

        let gc = GarbageCollector::new(l.store.clone(), l.roots.clone());
        let report = gc.sweep_and_remove().await.unwrap();
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn test_frozen_artifact_can_be_swept() {
        let l = layout();
        let old = id("old");
        artifact(&l.store, &old, &[("bin/old", b"old")]).await;
        l.store.freeze(&old).await.unwrap();

        let gc = GarbageCollector::new(l.store.clone(), l.roots.clone());
        let report = gc.sweep_and_remove().await.unwrap();
        assert_eq!(report.removed, vec![old.clone()]);
        assert!(!l.store.artifact_path(&old).exists());
    }

    #[tokio::test]
    async fn test_profile_merges_and_unlinks() {
        let l = layout();
        let a = id("a");
        let b = id("b");
        artifact(&l.store, &a, &[("bin/a", b"a"), ("share/doc", b"from a")]).await;
        artifact(&l.store, &b, &[("bin/b", b"b"), ("share/doc", b"from b")]).await;

        let profile = Profile::new(l.store.clone(), &l.profiles, l.roots.clone(), "default");
        profile.link(&a).await.unwrap();

        // bin/ is folded into a single link while only one artifact provides it
        let bin = profile.path().join("bin");
        assert!(std::fs::symlink_metadata(&bin).unwrap().file_type().is_symlink());

        profile.link(&b).await.unwrap();
        assert!(std::fs::symlink_metadata(&bin).unwrap().is_dir());
        assert_eq!(std::fs::read(bin.join("a")).unwrap(), b"a");
        assert_eq!(std::fs::read(bin.join("b")).unwrap(), b"b");
        // First writer wins on file conflicts
        assert_eq!(
            std::fs::read(profile.path().join("share/doc")).unwrap(),
            b"from a"
        );
        assert_eq!(profile.installed().await.unwrap().len(), 2);
        assert!(std::fs::symlink_metadata(profile.root_link()).is_ok());

        profile.unlink(&a).await.unwrap();
        assert!(!bin.join("a").exists());
        assert!(bin.join("b").exists());
        assert!(std::fs::symlink_metadata(profile.path().join("share/doc")).is_err());
        assert_eq!(profile.installed().await.unwrap(), vec![b.clone()]);

        profile.unlink(&b).await.unwrap();
        assert!(!bin.exists());
        assert!(profile.installed().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_link_requires_artifact() {
        let l = layout();
        let profile = Profile::new(l.store.clone(), &l.profiles, l.roots.clone(), "default");
        assert!(profile.link(&id("missing")).await.is_err());
    }
}
