//! Pushing packed cars to a remote store
//!
//! The remote layout matches what [`HttpCarReader`](crate::HttpCarReader)
//! reads: `<base>/<id>.car` beside `<base>/<id>.car-info.json`. The info
//! record goes up first so a reader never sees a car without one.

use std::collections::HashSet;
use std::path::PathBuf;

use vessel_errors::Error;
use vessel_events::{AppEvent, CarEvent, EventEmitter, EventSender};
use vessel_net::NetClient;
use vessel_types::{PackageId, UploadReport, UploadedCar};

use crate::lookup::{CarReader, DirCarReader};
use crate::pack::{car_file_name, info_file_name};

pub const CAR_CONTENT_TYPE: &str = "application/x-vessel-car";
pub const INFO_CONTENT_TYPE: &str = "application/x-vessel-car-info+json";

/// Uploads cars from a local archive directory
#[derive(Debug, Clone)]
pub struct CarUploader {
    base: String,
    client: NetClient,
    token: Option<String>,
    archive: DirCarReader,
    tx: EventSender,
}

impl CarUploader {
    #[must_use]
    pub fn new(
        base: impl Into<String>,
        client: NetClient,
        archive_dir: impl Into<PathBuf>,
        tx: EventSender,
    ) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            token: None,
            archive: DirCarReader::new(archive_dir),
            tx,
        }
    }

    /// Send `token` as a bearer credential
    #[must_use]
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Upload `id` after every car dependency present in the archive
    ///
    /// Dependencies are read from the info records; ones with no local car
    /// are skipped.
    ///
    /// # Errors
    ///
    /// Returns `CarError::NoCarData` if `id` itself has no car, or a network
    /// error if a push is rejected.
    pub async fn upload(&self, id: &PackageId) -> Result<UploadReport, Error> {
        let order = self.dependency_order(id).await?;
        self.upload_explicit(&order).await
    }

    /// Upload exactly `ids`, in the given order
    ///
    /// # Errors
    ///
    /// Returns `CarError::NoCarData` if an id has no car, or a network error
    /// if a push is rejected.
    pub async fn upload_explicit(&self, ids: &[PackageId]) -> Result<UploadReport, Error> {
        let mut report = UploadReport {
            base: self.base.clone(),
            uploaded: Vec::with_capacity(ids.len()),
        };
        for id in ids {
            report.uploaded.push(self.push(id).await?);
        }
        Ok(report)
    }

    /// Ids reachable from `id` through info records, dependencies first
    async fn dependency_order(&self, id: &PackageId) -> Result<Vec<PackageId>, Error> {
        let mut order = Vec::new();
        let mut seen = HashSet::from([id.clone()]);
        let mut stack = vec![(id.clone(), false)];

        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            let info = self.archive.info(&current).await?;
            stack.push((current, true));
            let deps: Vec<&PackageId> = info.dependency_ids().collect();
            for dep in deps.into_iter().rev() {
                if seen.contains(dep) {
                    continue;
                }
                if !self.archive.has(dep).await {
                    tracing::debug!(%dep, "no local car, not uploading");
                    continue;
                }
                seen.insert(dep.clone());
                stack.push((dep.clone(), false));
            }
        }
        Ok(order)
    }

    async fn push(&self, id: &PackageId) -> Result<UploadedCar, Error> {
        let info = self.archive.read(id, info_file_name(id)).await?;
        let car = self.archive.lookup(id).await?;

        let info_url = format!("{}/{}", self.base, info_file_name(id));
        vessel_net::put_bytes(
            &self.client,
            &info_url,
            info.into(),
            INFO_CONTENT_TYPE,
            self.token.as_deref(),
            &self.tx,
        )
        .await?;

        let url = format!("{}/{}", self.base, car_file_name(id));
        let etag = vessel_net::put_bytes(
            &self.client,
            &url,
            car,
            CAR_CONTENT_TYPE,
            self.token.as_deref(),
            &self.tx,
        )
        .await?;

        tracing::info!(%id, %url, etag = etag.as_deref().unwrap_or("-"), "uploaded car");
        self.tx.emit(AppEvent::Car(CarEvent::Uploaded {
            id: id.to_string(),
            url: url.clone(),
            etag: etag.clone(),
        }));
        Ok(UploadedCar {
            id: id.clone(),
            url,
            etag,
        })
    }
}
