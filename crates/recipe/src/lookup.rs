//! Recipe lookup across local and remote back-ends

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use vessel_errors::{Error, RecipeError};
use vessel_events::{AppEvent, EventEmitter, EventSender, RecipeEvent};
use vessel_net::NetClient;

/// File extension of recipe sources
pub const EXTENSION: &str = "star";

/// Source of one recipe plus access to the assets stored next to it
#[async_trait]
pub trait ScriptData: Send + Sync + fmt::Debug {
    /// Recipe name this data was located for
    fn name(&self) -> &str;

    /// Repository the recipe came from
    fn repo(&self) -> &str;

    /// Raw recipe source
    fn script_bytes(&self) -> &[u8];

    /// Directory holding the recipe, for local back-ends
    fn local_dir(&self) -> Option<&Path> {
        None
    }

    /// Read an asset stored beside the recipe
    ///
    /// # Errors
    ///
    /// Returns `RecipeError::AssetNotFound` if no such asset exists.
    async fn asset(&self, name: &str) -> Result<Vec<u8>, Error>;
}

/// Read an asset, mapping a missing asset to `None`
///
/// # Errors
///
/// Propagates every failure other than a missing asset.
pub async fn optional_asset(data: &dyn ScriptData, name: &str) -> Result<Option<Vec<u8>>, Error> {
    match data.asset(name).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(Error::Recipe(RecipeError::AssetNotFound { .. })) => Ok(None),
        Err(e) => Err(e),
    }
}

/// The five conventional places a recipe can live, relative to a repo root
///
/// Returns `(recipe path, asset dir)` pairs in lookup order.
#[must_use]
pub fn candidate_layouts(name: &str) -> Vec<(String, String)> {
    let short: String = name.chars().take(2).collect();
    let file = format!("{name}.{EXTENSION}");

    vec![
        (file.clone(), String::new()),
        (format!("packages/{file}"), "packages".to_string()),
        (format!("packages/{name}/{file}"), format!("packages/{name}")),
        (format!("packages/{short}/{file}"), format!("packages/{short}")),
        (
            format!("packages/{short}/{name}/{file}"),
            format!("packages/{short}/{name}"),
        ),
    ]
}

/// Recipe found in a local directory
#[derive(Debug)]
pub struct DirScriptData {
    name: String,
    repo: String,
    dir: PathBuf,
    script: Vec<u8>,
}

impl DirScriptData {
    /// Look in `root` for `name` using the conventional layouts
    ///
    /// # Errors
    ///
    /// Returns an error for read failures other than a missing file.
    pub async fn find(root: &Path, name: &str) -> Result<Option<Self>, Error> {
        for (file, dir) in candidate_layouts(name) {
            let path = root.join(&file);
            match tokio::fs::read(&path).await {
                Ok(script) => {
                    return Ok(Some(Self {
                        name: name.to_string(),
                        repo: root.display().to_string(),
                        dir: root.join(dir),
                        script,
                    }))
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io_with_path(&e, &path)),
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl ScriptData for DirScriptData {
    fn name(&self) -> &str {
        &self.name
    }

    fn repo(&self) -> &str {
        &self.repo
    }

    fn script_bytes(&self) -> &[u8] {
        &self.script
    }

    fn local_dir(&self) -> Option<&Path> {
        Some(&self.dir)
    }

    async fn asset(&self, name: &str) -> Result<Vec<u8>, Error> {
        let path = self.dir.join(name.trim_start_matches("./"));
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(RecipeError::AssetNotFound {
                name: name.to_string(),
            }
            .into()),
            Err(e) => Err(Error::io_with_path(&e, &path)),
        }
    }
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
}

fn decode_contents(body: &str, url: &str) -> Result<Vec<u8>, Error> {
    let response: ContentsResponse = serde_json::from_str(body)?;
    let packed: String = response
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    base64::engine::general_purpose::STANDARD
        .decode(packed)
        .map_err(|e| {
            RecipeError::LookupFailed {
                name: url.to_string(),
                message: format!("invalid base64 content: {e}"),
            }
            .into()
        })
}

/// Recipe served by a code host's contents API
#[derive(Debug)]
pub struct RemoteScriptData {
    name: String,
    repo: String,
    base: String,
    script: Vec<u8>,
    client: NetClient,
    tx: EventSender,
}

#[async_trait]
impl ScriptData for RemoteScriptData {
    fn name(&self) -> &str {
        &self.name
    }

    fn repo(&self) -> &str {
        &self.repo
    }

    fn script_bytes(&self) -> &[u8] {
        &self.script
    }

    async fn asset(&self, name: &str) -> Result<Vec<u8>, Error> {
        let url = format!("{}/{}", self.base, name.trim_start_matches("./"));
        match vessel_net::fetch_text_optional(&self.client, &url, &self.tx).await? {
            Some(body) => decode_contents(&body, &url),
            None => Err(RecipeError::AssetNotFound {
                name: name.to_string(),
            }
            .into()),
        }
    }
}

/// Ordered set of recipe back-ends
///
/// Path entries starting with `/` or `.` are local directories, entries
/// starting with `github.com/` are code-host repositories, and any other
/// `host/path` entry is resolved through vanity discovery.
#[derive(Debug, Clone)]
pub struct ScriptLookup {
    paths: Vec<String>,
    client: NetClient,
    tx: EventSender,
    api_base: String,
    vanity_scheme: String,
}

impl ScriptLookup {
    #[must_use]
    pub fn new(paths: Vec<String>, client: NetClient, tx: EventSender) -> Self {
        Self {
            paths,
            client,
            tx,
            api_base: "https://api.github.com".to_string(),
            vanity_scheme: "https".to_string(),
        }
    }

    /// Override the code-host API endpoint
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the scheme used for vanity discovery requests
    #[must_use]
    pub fn with_vanity_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.vanity_scheme = scheme.into();
        self
    }

    #[must_use]
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// Locate `name` in the first back-end that has it
    ///
    /// # Errors
    ///
    /// Returns `RecipeError::NotFound` if no back-end matched; other failures
    /// propagate immediately.
    pub async fn load(&self, name: &str) -> Result<Arc<dyn ScriptData>, Error> {
        for path in &self.paths {
            if let Some(data) = self.load_from(path, name, true).await? {
                self.tx.emit(AppEvent::Recipe(RecipeEvent::Located {
                    name: name.to_string(),
                    backend: path.clone(),
                }));
                return Ok(data);
            }
        }

        Err(RecipeError::NotFound {
            name: name.to_string(),
        }
        .into())
    }

    async fn load_from(
        &self,
        path: &str,
        name: &str,
        allow_vanity: bool,
    ) -> Result<Option<Arc<dyn ScriptData>>, Error> {
        if path.starts_with('/') || path.starts_with('.') {
            let found = DirScriptData::find(Path::new(path), name).await?;
            return Ok(found.map(|d| Arc::new(d) as Arc<dyn ScriptData>));
        }

        if let Some(repo) = path.strip_prefix("github.com/") {
            let found = self.load_remote(path, repo, name).await?;
            return Ok(found.map(|d| Arc::new(d) as Arc<dyn ScriptData>));
        }

        if allow_vanity && path.contains('/') {
            let Some(root) =
                vessel_net::discover(&self.client, &self.vanity_scheme, path, &self.tx).await?
            else {
                tracing::debug!(path, "vanity host declared no import");
                return Ok(None);
            };
            return self.load_root(root, name).await;
        }

        tracing::debug!(path, "unsupported recipe back-end");
        Ok(None)
    }

    fn load_root<'a>(
        &'a self,
        root: String,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Arc<dyn ScriptData>>, Error>> + Send + 'a>>
    {
        Box::pin(async move { self.load_from(&root, name, false).await })
    }

    async fn load_remote(
        &self,
        full_repo: &str,
        repo: &str,
        name: &str,
    ) -> Result<Option<RemoteScriptData>, Error> {
        let contents = format!("{}/repos/{repo}/contents", self.api_base);

        for (file, dir) in candidate_layouts(name) {
            let url = format!("{contents}/{file}");
            let Some(body) = vessel_net::fetch_text_optional(&self.client, &url, &self.tx).await?
            else {
                continue;
            };

            let script = decode_contents(&body, &url)?;
            let base = if dir.is_empty() {
                contents.clone()
            } else {
                format!("{contents}/{dir}")
            };

            return Ok(Some(RemoteScriptData {
                name: name.to_string(),
                repo: full_repo.to_string(),
                base,
                script,
                client: self.client.clone(),
                tx: self.tx.clone(),
            }));
        }

        Ok(None)
    }
}
