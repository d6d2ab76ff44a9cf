//! Build environment composition

use std::collections::BTreeMap;
use std::path::Path;

use vessel_platform::PlatformCommand;
use vessel_types::PackageId;

/// Directories every build can rely on, searched after the dependencies
pub const SYSTEM_PATH: &str = "/bin:/usr/bin";

/// `HOME` for builds; never created
pub const BUILD_HOME: &str = "/nonexistent";

/// The exact environment a build's commands run with
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
}

impl BuildEnv {
    /// Environment exposing the build dependencies in `deps` (dependency-first order)
    pub async fn compose(store: &Path, deps: &[PackageId]) -> Self {
        let mut path = Vec::new();
        let mut cflags = Vec::new();
        let mut ldflags = Vec::new();
        let mut pkgconfig = Vec::new();

        for dep in deps {
            let root = store.join(dep.as_str());
            let bin = root.join("bin");
            if is_dir(&bin).await {
                path.push(bin.display().to_string());
            }
            let include = root.join("include");
            if is_dir(&include).await {
                cflags.push(format!("-I{}", include.display()));
            }
            let lib = root.join("lib");
            if is_dir(&lib).await {
                ldflags.push(format!("-L{}", lib.display()));
                let pc = lib.join("pkgconfig");
                if is_dir(&pc).await {
                    pkgconfig.push(pc.display().to_string());
                }
            }
        }
        path.push(SYSTEM_PATH.to_string());

        let mut env = Self::default();
        env.set("HOME", BUILD_HOME);
        env.set("PATH", path.join(":"));
        if !cflags.is_empty() {
            env.set("CFLAGS", cflags.join(" "));
        }
        if !ldflags.is_empty() {
            env.set("LDFLAGS", ldflags.join(" "));
        }
        if !pkgconfig.is_empty() {
            env.set("PKG_CONFIG_PATH", pkgconfig.join(":"));
        }
        env
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Add `value` after the current value, `:`-separated
    pub fn append(&mut self, key: &str, value: &str) {
        if let Some(current) = self.vars.get_mut(key).filter(|c| !c.is_empty()) {
            current.push(':');
            current.push_str(value);
            return;
        }
        self.set(key, value);
    }

    /// Add `value` before the current value, `:`-separated
    pub fn prepend(&mut self, key: &str, value: &str) {
        if let Some(current) = self.vars.get_mut(key).filter(|c| !c.is_empty()) {
            *current = format!("{value}:{current}");
            return;
        }
        self.set(key, value);
    }

    /// The search path for programs
    #[must_use]
    pub fn path(&self) -> &str {
        self.get("PATH").unwrap_or(SYSTEM_PATH)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Replace the command's inherited environment with this one
    pub fn apply(&self, cmd: &mut PlatformCommand) {
        cmd.env_clear();
        for (key, value) in &self.vars {
            cmd.env(key.as_str(), value.as_str());
        }
    }
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok_and(|m| m.is_dir())
}
