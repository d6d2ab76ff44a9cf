//! Locating cars for `(repo, id)`
//!
//! Resolution order: caller overrides, then code-host release assets, then
//! the `car_urls` listed in the repository's config document, then vanity
//! discovery followed by a second pass against the discovered repository.
//! Every miss is soft: the caller gets `CarError::NoCarData` and builds.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use serde::Deserialize;
use vessel_errors::{CarError, Error};
use vessel_events::{AppEvent, CarEvent, EventEmitter, EventSender};
use vessel_net::NetClient;
use vessel_types::{CarInfo, PackageId};

use crate::pack::{car_file_name, info_file_name};

/// Config document read from a code-host repository
pub const CONFIG_DOCUMENT: &str = "vessel.json";

/// A source of cars and their info records
#[async_trait]
pub trait CarReader: Send + Sync + fmt::Debug {
    /// Where the cars are read from, for reporting
    fn location(&self) -> String;

    /// The car bytes for `id`
    async fn lookup(&self, id: &PackageId) -> Result<Bytes, Error>;

    /// The info record for `id`
    async fn info(&self, id: &PackageId) -> Result<CarInfo, Error>;
}

fn check_info(id: &PackageId, info: CarInfo) -> Result<CarInfo, Error> {
    if info.id == *id {
        Ok(info)
    } else {
        Err(CarError::InvalidInfo {
            id: id.to_string(),
            message: format!("record describes {}", info.id),
        }
        .into())
    }
}

fn parse_info(id: &PackageId, data: &[u8]) -> Result<CarInfo, Error> {
    let info: CarInfo = serde_json::from_slice(data).map_err(|e| CarError::InvalidInfo {
        id: id.to_string(),
        message: e.to_string(),
    })?;
    check_info(id, info)
}

/// Cars in a local directory, as written by the packer
#[derive(Debug, Clone)]
pub struct DirCarReader {
    dir: PathBuf,
}

impl DirCarReader {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Whether the directory holds a car for `id`
    pub async fn has(&self, id: &PackageId) -> bool {
        vessel_platform::fs::exists(&self.dir.join(car_file_name(id))).await
    }

    pub(crate) async fn read(&self, id: &PackageId, name: String) -> Result<Vec<u8>, Error> {
        let path = self.dir.join(name);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CarError::NoCarData {
                repo: self.dir.display().to_string(),
                id: id.to_string(),
            }
            .into()),
            Err(e) => Err(Error::io_with_path(&e, &path)),
        }
    }
}

#[async_trait]
impl CarReader for DirCarReader {
    fn location(&self) -> String {
        self.dir.display().to_string()
    }

    async fn lookup(&self, id: &PackageId) -> Result<Bytes, Error> {
        self.read(id, car_file_name(id)).await.map(Bytes::from)
    }

    async fn info(&self, id: &PackageId) -> Result<CarInfo, Error> {
        let data = self.read(id, info_file_name(id)).await?;
        parse_info(id, &data)
    }
}

/// Cars served below an HTTP base URL
#[derive(Debug, Clone)]
pub struct HttpCarReader {
    base: String,
    client: NetClient,
    tx: EventSender,
}

impl HttpCarReader {
    #[must_use]
    pub fn new(base: impl Into<String>, client: NetClient, tx: EventSender) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            tx,
        }
    }
}

#[async_trait]
impl CarReader for HttpCarReader {
    fn location(&self) -> String {
        self.base.clone()
    }

    async fn lookup(&self, id: &PackageId) -> Result<Bytes, Error> {
        let url = format!("{}/{}", self.base, car_file_name(id));
        vessel_net::fetch_bytes(&self.client, &url, &self.tx)
            .await
            .map(Bytes::from)
    }

    async fn info(&self, id: &PackageId) -> Result<CarInfo, Error> {
        let url = format!("{}/{}", self.base, info_file_name(id));
        let body = vessel_net::fetch_text(&self.client, &url, &self.tx).await?;
        parse_info(id, body.as_bytes())
    }
}

/// A located car
#[derive(Debug, Clone)]
pub struct CarData {
    id: PackageId,
    reader: Arc<dyn CarReader>,
}

impl CarData {
    #[must_use]
    pub fn new(id: PackageId, reader: Arc<dyn CarReader>) -> Self {
        Self { id, reader }
    }

    #[must_use]
    pub fn id(&self) -> &PackageId {
        &self.id
    }

    /// Fetch the car bytes
    ///
    /// # Errors
    ///
    /// Returns an error if the reader fails.
    pub async fn open(&self) -> Result<Bytes, Error> {
        self.reader.lookup(&self.id).await
    }

    /// Fetch the info record
    ///
    /// # Errors
    ///
    /// Returns an error if the reader fails or the record is invalid.
    pub async fn info(&self) -> Result<CarInfo, Error> {
        self.reader.info(&self.id).await
    }
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: String,
}

#[derive(Debug, Default, Deserialize)]
struct RepoConfig {
    #[serde(default)]
    car_urls: Vec<String>,
}

/// Resolves `(repo, id)` to a [`CarData`]
#[derive(Debug, Clone)]
pub struct CarLookup {
    client: NetClient,
    tx: EventSender,
    overrides: HashMap<String, Arc<dyn CarReader>>,
    api_base: String,
    release_base: String,
    vanity_scheme: String,
}

impl CarLookup {
    #[must_use]
    pub fn new(client: NetClient, tx: EventSender) -> Self {
        Self {
            client,
            tx,
            overrides: HashMap::new(),
            api_base: "https://api.github.com".to_string(),
            release_base: "https://github.com".to_string(),
            vanity_scheme: "https".to_string(),
        }
    }

    /// Serve every car for `key` (a repo or a single id) from `reader`
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, reader: Arc<dyn CarReader>) -> Self {
        self.overrides.insert(key.into(), reader);
        self
    }

    /// Override the code host's contents API base
    #[must_use]
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the code host's web base used for release assets
    #[must_use]
    pub fn with_release_base(mut self, base: impl Into<String>) -> Self {
        self.release_base = base.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the scheme used for vanity discovery requests
    #[must_use]
    pub fn with_vanity_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.vanity_scheme = scheme.into();
        self
    }

    /// Locate the car for `id` published by `repo`
    ///
    /// # Errors
    ///
    /// Returns `CarError::NoCarData` when no source has the car.
    pub async fn lookup(&self, repo: &str, id: &PackageId) -> Result<CarData, Error> {
        match self.locate(repo, id, true).await? {
            Some(reader) => {
                let location = reader.location();
                tracing::debug!(%id, repo, %location, "car located");
                self.tx.emit(AppEvent::Car(CarEvent::Found {
                    id: id.to_string(),
                    url: location,
                }));
                Ok(CarData::new(id.clone(), reader))
            }
            None => {
                self.tx.emit(AppEvent::Car(CarEvent::NotFound {
                    id: id.to_string(),
                    repo: repo.to_string(),
                }));
                Err(CarError::NoCarData {
                    repo: repo.to_string(),
                    id: id.to_string(),
                }
                .into())
            }
        }
    }

    async fn locate(
        &self,
        repo: &str,
        id: &PackageId,
        allow_vanity: bool,
    ) -> Result<Option<Arc<dyn CarReader>>, Error> {
        if let Some(reader) = self
            .overrides
            .get(id.as_str())
            .or_else(|| self.overrides.get(repo))
        {
            return Ok(Some(reader.clone()));
        }

        if repo.starts_with('/') || repo.starts_with('.') {
            let reader = DirCarReader::new(repo);
            return Ok(reader
                .has(id)
                .await
                .then(|| Arc::new(reader) as Arc<dyn CarReader>));
        }

        if let Some(path) = repo.strip_prefix("github.com/") {
            if let Some(reader) = self.try_release(path, id).await {
                return Ok(Some(reader));
            }
            return Ok(self.try_config(path, id).await);
        }

        if allow_vanity && repo.contains('/') {
            match vessel_net::discover(&self.client, &self.vanity_scheme, repo, &self.tx).await {
                Ok(Some(root)) => return self.locate_root(root, id).await,
                Ok(None) => tracing::debug!(repo, "vanity host declared no import"),
                Err(e) => tracing::debug!(repo, error = %e, "vanity discovery failed"),
            }
        }

        Ok(None)
    }

    fn locate_root<'a>(
        &'a self,
        root: String,
        id: &'a PackageId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Arc<dyn CarReader>>, Error>> + Send + 'a>>
    {
        Box::pin(async move { self.locate(&root, id, false).await })
    }

    async fn try_release(&self, path: &str, id: &PackageId) -> Option<Arc<dyn CarReader>> {
        let base = format!(
            "{}/{path}/releases/download/{}",
            self.release_base,
            id.version()
        );
        let url = format!("{base}/{}", car_file_name(id));
        if vessel_net::check_url(&self.client, &url).await.unwrap_or(false) {
            return Some(Arc::new(HttpCarReader::new(
                base,
                self.client.clone(),
                self.tx.clone(),
            )));
        }
        None
    }

    async fn try_config(&self, path: &str, id: &PackageId) -> Option<Arc<dyn CarReader>> {
        let url = format!("{}/repos/{path}/contents/{CONFIG_DOCUMENT}", self.api_base);
        let body = match vessel_net::fetch_text_optional(&self.client, &url, &self.tx).await {
            Ok(Some(body)) => body,
            Ok(None) => return None,
            Err(e) => {
                tracing::debug!(%url, error = %e, "config document unavailable");
                return None;
            }
        };
        let config = match decode_config(&body) {
            Ok(config) => config,
            Err(message) => {
                tracing::warn!(%url, %message, "ignoring invalid config document");
                return None;
            }
        };

        for base in config.car_urls {
            let base = base.trim_end_matches('/').to_string();
            let url = format!("{base}/{}", car_file_name(id));
            if vessel_net::check_url(&self.client, &url).await.unwrap_or(false) {
                return Some(Arc::new(HttpCarReader::new(
                    base,
                    self.client.clone(),
                    self.tx.clone(),
                )));
            }
        }
        None
    }
}

fn decode_config(body: &str) -> Result<RepoConfig, String> {
    let response: ContentsResponse = serde_json::from_str(body).map_err(|e| e.to_string())?;
    let packed: String = response
        .content
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let raw = base64::engine::general_purpose::STANDARD
        .decode(packed)
        .map_err(|e| e.to_string())?;
    serde_json::from_slice(&raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_config() {
        let content = base64::engine::general_purpose::STANDARD
            .encode(br#"{"car_urls": ["https://cars.example.org/packages"]}"#);
        let body = format!(r#"{{"content": "{content}\n"}}"#);
        let config = decode_config(&body).unwrap();
        assert_eq!(config.car_urls, vec!["https://cars.example.org/packages"]);

        assert!(decode_config(r#"{"content": "!!"}"#).is_err());
    }
}
