//! Input staging into a build directory

use std::path::{Path, PathBuf};

use vessel_errors::{Error, InstallError};
use vessel_events::EventSender;
use vessel_net::NetClient;
use vessel_platform::fs as pfs;
use vessel_recipe::{Input, InputSource};
use vessel_types::PackageId;

use crate::archive::{self, ArchiveKind};

/// Where inputs are fetched from and cached
#[derive(Debug, Clone)]
pub struct Stager {
    client: NetClient,
    cache_dir: PathBuf,
    tx: EventSender,
}

impl Stager {
    #[must_use]
    pub fn new(client: NetClient, cache_dir: PathBuf, tx: EventSender) -> Self {
        Self {
            client,
            cache_dir,
            tx,
        }
    }

    /// Place every input of `id` under `top`
    ///
    /// # Errors
    ///
    /// Returns an error if a download fails verification, an archive does
    /// not extract, or a local directory cannot be mirrored.
    pub async fn stage_all(&self, id: &PackageId, inputs: &[Input], top: &Path) -> Result<(), Error> {
        for input in inputs {
            tracing::debug!(%id, input = %input.name, location = %input.location(), "staging input");
            self.stage(id, input, top).await?;
        }
        Ok(())
    }

    async fn stage(&self, id: &PackageId, input: &Input, top: &Path) -> Result<(), Error> {
        match &input.source {
            InputSource::Dir { path, linked } => stage_dir(id, input, path, *linked, top).await,
            InputSource::Url { url } => {
                let fetched = vessel_net::fetch_to_cache(
                    &self.client,
                    &self.cache_dir,
                    url,
                    Some(&input.sum),
                    &self.tx,
                )
                .await?;
                place_file(input, url, &fetched.path, top).await
            }
            InputSource::Asset { path, data } => {
                let raw = top.join(format!(".{}.asset", input.name));
                tokio::fs::write(&raw, data)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &raw))?;
                let placed = place_file(input, path, &raw, top).await;
                pfs::remove_file_quietly(&raw).await;
                placed
            }
        }
    }
}

/// Copy or unpack a fetched file into its slot under `top`
async fn place_file(input: &Input, location: &str, source: &Path, top: &Path) -> Result<(), Error> {
    if let Some(into) = &input.into {
        let target = top.join(into);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(&e, parent))?;
        }
        copy_file(source, &target).await?;
        return Ok(());
    }

    if let Some(kind) = ArchiveKind::detect(location) {
        let target = top.join(&input.name);
        if pfs::exists(&target).await {
            return Ok(());
        }
        archive::extract(source, kind, &target, 0).await?;
        return Ok(());
    }

    let target = top.join(format!("{}{}", input.name, extension(location)));
    copy_file(source, &target).await
}

async fn copy_file(source: &Path, target: &Path) -> Result<(), Error> {
    tokio::fs::copy(source, target)
        .await
        .map(|_| ())
        .map_err(|e| Error::io_with_path(&e, target))
}

/// Extension of the last path segment of a path or URL, with its dot
fn extension(location: &str) -> String {
    let last = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location)
        .rsplit('/')
        .next()
        .unwrap_or_default();
    Path::new(last)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

async fn stage_dir(
    id: &PackageId,
    input: &Input,
    source: &Path,
    linked: bool,
    top: &Path,
) -> Result<(), Error> {
    if !tokio::fs::metadata(source).await.is_ok_and(|m| m.is_dir()) {
        return Err(InstallError::StagingFailed {
            id: id.to_string(),
            message: format!("input directory {} does not exist", source.display()),
        }
        .into());
    }
    let name = if input.name.is_empty() {
        source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        input.name.clone()
    };
    let target = top.join(name);

    if linked {
        tokio::fs::symlink(source, &target)
            .await
            .map_err(|e| Error::io_with_path(&e, &target))
    } else {
        pfs::copy_directory(source, &target).await
    }
}

/// The directory a build starts in
///
/// With one input that input's directory is used, otherwise the input marked
/// `chdir`. A directory holding exactly one visible entry that is itself a
/// directory is descended into.
pub async fn build_root(inputs: &[Input], top: &Path) -> PathBuf {
    let primary = if inputs.len() == 1 {
        inputs.first()
    } else {
        inputs.iter().find(|i| i.chdir)
    };
    let Some(primary) = primary else {
        return top.to_path_buf();
    };

    let candidate = top.join(&primary.name);
    if !tokio::fs::metadata(&candidate).await.is_ok_and(|m| m.is_dir()) {
        return top.to_path_buf();
    }
    descend_single(&candidate).await
}

/// `dir`, or its only visible child when that child is a directory
pub async fn descend_single(dir: &Path) -> PathBuf {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return dir.to_path_buf();
    };
    let mut visible = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with('.') {
            visible.push(entry.path());
        }
        if visible.len() > 1 {
            return dir.to_path_buf();
        }
    }
    match visible.pop() {
        Some(only) if tokio::fs::metadata(&only).await.is_ok_and(|m| m.is_dir()) => only,
        _ => dir.to_path_buf(),
    }
}
