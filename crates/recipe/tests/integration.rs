//! Integration tests for recipe crate

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use httpmock::prelude::*;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use vessel_errors::{Error, RecipeError};
    use vessel_events::{channel, AppEvent, RecipeEvent};
    use vessel_hash::{Sum, SumAlgo};
    use vessel_net::NetClient;
    use vessel_recipe::*;

    const SHA: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    fn write(root: &Path, file: &str, body: &str) {
        let path = root.join(file);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn loader_for(paths: Vec<String>) -> ScriptLoader {
        let (tx, _rx) = channel();
        let lookup = ScriptLookup::new(paths, NetClient::with_defaults().unwrap(), tx.clone());
        ScriptLoader::new(lookup, tx)
    }

    fn local(dir: &TempDir) -> ScriptLoader {
        loader_for(vec![dir.path().display().to_string()])
    }

    fn p1_recipe(install_flag: &str, hook: &str) -> String {
        format!(
            r#"
def build(ctx):
    ctx.system("./configure", "--prefix=" + ctx.prefix, "{install_flag}")
    ctx.system("make", "install")

def hook(ctx):
    ctx.append_env("PATH", ctx.prefix + "/{hook}")

pkg(
    name = "p1",
    version = "0.1",
    input = file("https://example.com/p1-0.1.tar.gz", sum = ("sha256", "{SHA}")),
    install = build,
    hook = hook,
)
"#
        )
    }

    #[tokio::test]
    async fn test_id_is_stable_across_locations() {
        let one = tempdir().unwrap();
        let two = tempdir().unwrap();
        write(one.path(), "p1.star", &p1_recipe("--static", "bin"));
        write(two.path(), "packages/p1/p1.star", &p1_recipe("--static", "bin"));

        let a = local(&one).load("p1").await.unwrap();
        let b = local(&two).load("p1").await.unwrap();

        assert_eq!(a.id, b.id);
        assert!(a.id.as_str().ends_with("-p1-0.1"));
        assert_eq!(a.name, "p1");
        assert_eq!(a.inputs.len(), 1);
        assert_eq!(a.inputs[0].name, DEFAULT_INPUT);
        assert_eq!(a.inputs[0].sum, Sum::new(SumAlgo::Sha256, SHA));
    }

    #[tokio::test]
    async fn test_install_code_changes_id_but_hook_does_not() {
        let base = tempdir().unwrap();
        let changed_install = tempdir().unwrap();
        let changed_hook = tempdir().unwrap();
        write(base.path(), "p1.star", &p1_recipe("--static", "bin"));
        write(changed_install.path(), "p1.star", &p1_recipe("--shared", "bin"));
        write(changed_hook.path(), "p1.star", &p1_recipe("--static", "sbin"));

        let base = local(&base).load("p1").await.unwrap();
        let install = local(&changed_install).load("p1").await.unwrap();
        let hook = local(&changed_hook).load("p1").await.unwrap();

        assert_ne!(base.id, install.id);
        assert_eq!(base.id, hook.id);
    }

    #[tokio::test]
    async fn test_install_is_recorded_with_placeholders() {
        let dir = tempdir().unwrap();
        write(dir.path(), "p1.star", &p1_recipe("--static", "bin"));

        let pkg = local(&dir).load("p1").await.unwrap();
        let install = pkg.install.as_ref().unwrap();
        assert_eq!(
            install[0],
            Statement::System {
                args: vec![
                    "./configure".into(),
                    format!("--prefix={PREFIX_VAR}"),
                    "--static".into()
                ],
                dir: None,
            }
        );
        assert_eq!(
            pkg.hook.as_deref(),
            Some(
                &[Statement::AppendEnv {
                    key: "PATH".into(),
                    value: format!("{PREFIX_VAR}/bin"),
                }][..]
            )
        );
    }

    #[tokio::test]
    async fn test_dependency_load_and_prefix() {
        let dir = tempdir().unwrap();
        write(dir.path(), "p1.star", &p1_recipe("--static", "bin"));
        write(
            dir.path(),
            "p2.star",
            r#"
load("p1", p1 = "pkg")

pkg(
    name = "p2",
    version = "1.0",
    dependencies = [p1],
    install = lambda ctx: ctx.system("make", "P1=" + p1.prefix),
)
"#,
        );

        let loader = local(&dir);
        let p2 = loader.load("p2").await.unwrap();
        let p1 = loader.load("p1").await.unwrap();

        assert_eq!(p2.dependencies.len(), 1);
        assert_eq!(p2.dependencies[0].id, p1.id);
        assert_eq!(
            p2.install.as_ref().unwrap()[0],
            Statement::System {
                args: vec!["make".into(), format!("P1={STORE_VAR}/{}", p1.id)],
                dir: None,
            }
        );

        let other = tempdir().unwrap();
        write(other.path(), "p1.star", &p1_recipe("--shared", "bin"));
        write(
            other.path(),
            "p2.star",
            &std::fs::read_to_string(dir.path().join("p2.star")).unwrap(),
        );
        let p2_other = local(&other).load("p2").await.unwrap();
        assert_ne!(p2.id, p2_other.id);
    }

    #[tokio::test]
    async fn test_helpers_are_exported() {
        let dir = tempdir().unwrap();
        write(dir.path(), "p1.star", &p1_recipe("--static", "bin"));
        write(
            dir.path(),
            "p1.helpers.star",
            r#"
def cflags():
    return "-O2 -fPIC"
"#,
        );
        write(
            dir.path(),
            "p3.star",
            r#"
load("p1", "cflags")

def build(ctx):
    ctx.set_env("CFLAGS", cflags())

pkg(name = "p3", install = build)
"#,
        );

        let p3 = local(&dir).load("p3").await.unwrap();
        assert!(p3.id.as_str().ends_with("-p3-unknown"));
        assert!(p3.dependencies.is_empty());
        assert_eq!(
            p3.install.as_ref().unwrap()[0],
            Statement::SetEnv {
                key: "CFLAGS".into(),
                value: "-O2 -fPIC".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_chdir_nests_statements() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "p4.star",
            r#"
def build(ctx):
    ctx.chdir("src", lambda: ctx.system("make"))
    ctx.install_files("bin", "src/tool", symlink = True)

pkg(name = "p4", version = "1", install = build)
"#,
        );

        let p4 = local(&dir).load("p4").await.unwrap();
        assert_eq!(
            p4.install.as_deref().unwrap(),
            &[
                Statement::ChangeDir {
                    dir: "src".into(),
                    body: vec![Statement::System {
                        args: vec!["make".into()],
                        dir: None,
                    }],
                },
                Statement::InstallFiles {
                    target: "bin".into(),
                    pattern: "src/tool".into(),
                    symlink: true,
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_instances_join_dependencies() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "p5.star",
            r#"
cfg = instance(
    name = "p5-cfg",
    version = "1",
    install = lambda ctx: ctx.write_file("etc/p5.conf", "verbose = true"),
)

pkg(name = "p5", version = "1", dependencies = [cfg])
"#,
        );

        let p5 = local(&dir).load("p5").await.unwrap();
        assert!(p5.dependencies.is_empty());
        assert_eq!(p5.instances.len(), 1);
        assert!(p5.instances[0].id.as_str().ends_with("-p5-cfg-1"));
        assert_eq!(p5.transitive_dependencies().len(), 1);
    }

    #[tokio::test]
    async fn test_sums_file_supplies_missing_sum() {
        let dir = tempdir().unwrap();
        let recipe = r#"
pkg(name = "p6", version = "2", source = file("https://example.com/p6.tgz"))
"#;
        write(dir.path(), "p6.star", recipe);

        let err = local(&dir).load("p6").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Recipe(RecipeError::MissingSum { ref path, .. }) if path == "https://example.com/p6.tgz"
        ));

        let mut sums = SumsFile::default();
        sums.insert("https://example.com/p6.tgz", Sum::new(SumAlgo::Sha256, SHA));
        write(
            dir.path(),
            &sums_asset("p6"),
            &serde_json::to_string(&sums).unwrap(),
        );

        let p6 = local(&dir).load("p6").await.unwrap();
        assert_eq!(p6.inputs[0].sum, Sum::new(SumAlgo::Sha256, SHA));
    }

    #[tokio::test]
    async fn test_asset_and_dir_inputs() {
        let dir = tempdir().unwrap();
        write(dir.path(), "packages/p7/fix.patch", "--- a\n+++ b\n");
        write(dir.path(), "packages/p7/tree/main.c", "int main;");
        write(
            dir.path(),
            "packages/p7/p7.star",
            r#"
pkg(
    name = "p7",
    version = "1",
    input = inputs(patch = file("./fix.patch"), tree = dir("tree", chdir = True)),
)
"#,
        );

        let p7 = local(&dir).load("p7").await.unwrap();
        let patch = p7.inputs.iter().find(|i| i.name == "patch").unwrap();
        assert_eq!(patch.sum, Sum::b2_of(b"--- a\n+++ b\n"));
        let tree = p7.inputs.iter().find(|i| i.name == "tree").unwrap();
        assert!(tree.chdir);
        assert!(matches!(tree.source, InputSource::Dir { .. }));
        assert_eq!(tree.sum.algo, SumAlgo::B2);
    }

    #[tokio::test]
    async fn test_cycle_is_detected() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.star", "load(\"b\", b = \"pkg\")\npkg(name = \"a\", dependencies = [b])\n");
        write(dir.path(), "b.star", "load(\"a\", a = \"pkg\")\npkg(name = \"b\", dependencies = [a])\n");

        let err = local(&dir).load("a").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Recipe(RecipeError::CircularDependency { ref chain }) if chain == "a -> b -> a"
        ));
    }

    #[tokio::test]
    async fn test_parent_paths_are_rejected() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "bad.star",
            "pkg(name = \"bad\", install = lambda ctx: ctx.rm_rf(\"../outside\"))\n",
        );

        let err = local(&dir).load("bad").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Recipe(RecipeError::InvalidPath { ref path }) if path == "../outside"
        ));
    }

    #[tokio::test]
    async fn test_recipe_without_final_pkg() {
        let dir = tempdir().unwrap();
        write(dir.path(), "q.star", "p = pkg(name = \"q\")\n");
        write(dir.path(), "r.star", "pkg(name = \"r\", install = 42)\n");

        let err = local(&dir).load("q").await.unwrap_err();
        assert!(matches!(err, Error::Recipe(RecipeError::BadScript { .. })));

        let err = local(&dir).load("r").await.unwrap_err();
        assert!(matches!(err, Error::Recipe(RecipeError::EvalFailed { .. })));
    }

    #[tokio::test]
    async fn test_not_found_and_search_order() {
        let first = tempdir().unwrap();
        let second = tempdir().unwrap();
        write(first.path(), "p1.star", &p1_recipe("--static", "bin"));
        write(second.path(), "p1.star", &p1_recipe("--shared", "bin"));

        let (tx, mut rx) = channel();
        let lookup = ScriptLookup::new(
            vec![
                first.path().display().to_string(),
                second.path().display().to_string(),
            ],
            NetClient::with_defaults().unwrap(),
            tx.clone(),
        );
        let loader = ScriptLoader::new(lookup, tx);

        let p1 = loader.load("p1").await.unwrap();
        let only_first = local(&first).load("p1").await.unwrap();
        assert_eq!(p1.id, only_first.id);

        let mut located = None;
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::Recipe(RecipeEvent::Located { backend, .. }) = event {
                located = Some(backend);
            }
        }
        assert_eq!(located, Some(first.path().display().to_string()));

        let err = loader.load("missing").await.unwrap_err();
        assert!(matches!(err, Error::Recipe(RecipeError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_inspect_reports_unsummed_inputs() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "p6.star",
            "pkg(name = \"p6\", source = file(\"https://example.com/p6.tgz\"))\n",
        );

        let inspection = local(&dir).inspect("p6").await.unwrap();
        assert_eq!(inspection.evaluated.name, "p6");
        assert_eq!(inspection.dir.as_deref(), Some(dir.path()));
        assert!(inspection.sums.is_empty());
        let (name, spec) = &inspection.evaluated.inputs[0];
        assert_eq!(name, DEFAULT_INPUT);
        assert!(spec.is_url());
        assert!(spec.sum.is_none());
    }

    fn contents(body: &str) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(body);
        // The contents API wraps base64 at 60 columns
        let wrapped: Vec<String> = encoded
            .as_bytes()
            .chunks(60)
            .map(|c| String::from_utf8(c.to_vec()).unwrap())
            .collect();
        serde_json::json!({ "content": wrapped.join("\n") }).to_string()
    }

    #[tokio::test]
    async fn test_remote_recipe_and_assets() {
        let server = MockServer::start();
        let recipe = p1_recipe("--static", "bin");

        let script = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/example/pkgs/contents/packages/p1/p1.star");
            then.status(200).body(contents(&recipe));
        });
        let helpers = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/example/pkgs/contents/packages/p1/p1.helpers.star");
            then.status(200).body(contents("def answer():\n    return 42\n"));
        });

        let (tx, _rx) = channel();
        let lookup = ScriptLookup::new(
            vec!["github.com/example/pkgs".to_string()],
            NetClient::with_defaults().unwrap(),
            tx.clone(),
        )
        .with_api_base(server.url(""));
        let loader = ScriptLoader::new(lookup, tx);

        let remote = loader.load("p1").await.unwrap();
        script.assert();
        helpers.assert();
        assert_eq!(remote.repo, "github.com/example/pkgs");

        let dir = tempdir().unwrap();
        write(dir.path(), "p1.star", &recipe);
        assert_eq!(remote.id, local(&dir).load("p1").await.unwrap().id);
    }

    #[tokio::test]
    async fn test_vanity_repository() {
        let server = MockServer::start();
        let host = server.address().to_string();
        let vanity = format!("{host}/pkgs");

        let discovery = server.mock(|when, then| {
            when.method(GET).path("/pkgs").query_param("vessel-get", "1");
            then.status(200).body(format!(
                r#"<html><head><meta name="vessel-import" content="{vanity} git github.com/example/pkgs"></head></html>"#
            ));
        });
        let script = server.mock(|when, then| {
            when.method(GET).path("/repos/example/pkgs/contents/p1.star");
            then.status(200).body(contents(&p1_recipe("--static", "bin")));
        });

        let (tx, _rx) = channel();
        let lookup = ScriptLookup::new(vec![vanity], NetClient::with_defaults().unwrap(), tx.clone())
            .with_api_base(server.url(""))
            .with_vanity_scheme("http");
        let loader = ScriptLoader::new(lookup, tx);

        let p1 = loader.load("p1").await.unwrap();
        discovery.assert();
        script.assert();
        assert_eq!(p1.name, "p1");
    }
}
