//! Packing stored artifacts into signed cars and restoring them

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use vessel_errors::{CarError, Error, StorageError};
use vessel_events::{AppEvent, CarEvent, EventEmitter, EventSender};
use vessel_hash::{Hash, HashingWriter};
use vessel_signing::Keypair;
use vessel_store::Store;
use vessel_types::{CarInfo, PackReport, PackageId, PackageInfo};

use crate::archive::{read_car, write_car};

/// File name of the car for `id`
#[must_use]
pub fn car_file_name(id: &PackageId) -> String {
    format!("{id}.car")
}

/// File name of the info record for `id`
#[must_use]
pub fn info_file_name(id: &PackageId) -> String {
    format!("{id}.car-info.json")
}

/// Packs stored artifacts into an output directory
#[derive(Debug, Clone)]
pub struct CarPacker {
    store: Store,
    tx: Option<EventSender>,
}

impl CarPacker {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self { store, tx: None }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Pack `id` into `<out_dir>/<id>.car` and sign it with `key`
    ///
    /// The info record is written beside the car and cached in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact or its metadata is missing, a
    /// symlink escapes the artifact, a referenced hash is not in the store,
    /// or the output cannot be written.
    pub async fn pack(
        &self,
        id: &PackageId,
        key: &Keypair,
        out_dir: &Path,
    ) -> Result<PackReport, Error> {
        if !self.store.contains(id).await? {
            return Err(StorageError::PackageNotFound { id: id.to_string() }.into());
        }
        let template = self
            .store
            .read_info(id)
            .await?
            .ok_or_else(|| CarError::PackFailed {
                id: id.to_string(),
                message: "artifact has no package info".to_string(),
            })?;

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| Error::io_with_path(&e, out_dir))?;
        let car_path = out_dir.join(car_file_name(id));
        let info_path = out_dir.join(info_file_name(id));

        let artifact = self.store.artifact_path(id);
        let store_path = self.store.path().to_path_buf();
        let tmp = car_path.with_extension("car.tmp");
        let written = tokio::task::spawn_blocking({
            let tmp = tmp.clone();
            move || {
                let file = std::fs::File::create(&tmp).map_err(|e| Error::io_with_path(&e, &tmp))?;
                let writer = HashingWriter::new(BufWriter::new(file));
                let (writer, hashes) = write_car(&artifact, &store_path, writer)?;
                let size = writer.written();
                let (mut inner, digest) = writer.finish();
                inner.flush().map_err(|e| Error::io_with_path(&e, &tmp))?;
                Ok::<_, Error>((digest, size, hashes))
            }
        })
        .await
        .map_err(|e| Error::internal(format!("pack task failed: {e}")))?;
        let (digest, size, hashes) = match written {
            Ok(written) => written,
            Err(e) => {
                vessel_platform::fs::remove_file_quietly(&tmp).await;
                return Err(e);
            }
        };
        tokio::fs::rename(&tmp, &car_path)
            .await
            .map_err(|e| Error::io_with_path(&e, &car_path))?;

        let signer = key.signer();
        let mut dependencies = Vec::new();
        for hash in hashes.iter().filter(|h| !id.has_hash(h)) {
            let dep = self
                .store
                .map_dependency(hash, &signer)
                .await?
                .ok_or_else(|| CarError::UnresolvedDependency {
                    id: id.to_string(),
                    hash: hash.clone(),
                })?;
            dependencies.push(dep);
        }

        let info = CarInfo {
            id: id.clone(),
            name: template.name,
            version: template.version,
            repo: template.repo,
            signer,
            constraints: template.constraints,
            inputs: template.inputs,
            dependencies,
            signature: key.sign_digest(&digest),
        };
        let json = serde_json::to_vec_pretty(&info)?;
        tokio::fs::write(&info_path, json)
            .await
            .map_err(|e| Error::io_with_path(&e, &info_path))?;
        self.store.write_car_info(&info).await?;

        tracing::info!(%id, size, dependencies = info.dependencies.len(), "packed car");
        self.tx.emit(AppEvent::Car(CarEvent::Packed {
            id: id.to_string(),
            path: car_path.display().to_string(),
            size,
            dependencies: info.dependencies.len(),
        }));

        Ok(PackReport {
            id: id.clone(),
            car_path,
            info_path,
            dependencies: info.dependencies.into_iter().map(|d| d.id).collect(),
            size,
        })
    }
}

/// Verifies cars and extracts them into the store
#[derive(Debug, Clone)]
pub struct CarUnpacker {
    store: Store,
    trusted: Vec<String>,
    tx: Option<EventSender>,
}

impl CarUnpacker {
    /// `trusted` lists acceptable signers; empty trusts the declared one
    #[must_use]
    pub fn new(store: Store, trusted: Vec<String>) -> Self {
        Self {
            store,
            trusted,
            tx: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, tx: EventSender) -> Self {
        self.tx = Some(tx);
        self
    }

    /// Verify `data` against `info` and extract it as `info.id`
    ///
    /// `expected_signer` is the signer a dependent car declared for this id;
    /// the info record must agree with it. A failure after the artifact
    /// directory exists removes the artifact and its sidecars.
    ///
    /// # Errors
    ///
    /// Returns `CarError::WrongSignature` if the signature does not verify
    /// against the declared signer, `SigningError::UntrustedSigner` if the
    /// signer is not trusted, or an extraction error.
    pub async fn unpack(
        &self,
        data: Bytes,
        info: &CarInfo,
        expected_signer: Option<&str>,
    ) -> Result<PathBuf, Error> {
        let id = &info.id;
        // Verified before anything is written, so a rejected car leaves no trace
        self.verify(&data, info, expected_signer)?;

        let dest = self.store.create_artifact(id).await?;
        let entries = match self.restore(data, info, &dest).await {
            Ok(entries) => entries,
            Err(e) => {
                if let Err(cleanup) = self.store.remove(id).await {
                    tracing::warn!(%id, error = %cleanup, "could not remove failed artifact");
                }
                return Err(e);
            }
        };

        tracing::info!(%id, entries, signer = %info.signer, "unpacked car");
        self.tx.emit(AppEvent::Car(CarEvent::Unpacked {
            id: id.to_string(),
            signer: info.signer.clone(),
        }));
        Ok(dest)
    }

    /// Extract into `dest`, then freeze and record metadata
    async fn restore(&self, data: Bytes, info: &CarInfo, dest: &Path) -> Result<usize, Error> {
        let store_path = self.store.path().to_path_buf();
        let target = dest.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || read_car(&data, &target, &store_path))
            .await
            .map_err(|e| Error::internal(format!("unpack task failed: {e}")))??;

        self.store.freeze(&info.id).await?;
        self.store.write_car_info(info).await?;
        self.store.write_info(&package_info(info)).await?;
        Ok(entries)
    }

    fn verify(&self, data: &[u8], info: &CarInfo, expected: Option<&str>) -> Result<(), Error> {
        let wrong = || -> Error {
            CarError::WrongSignature {
                id: info.id.to_string(),
            }
            .into()
        };
        if expected.is_some_and(|s| !s.is_empty() && s != info.signer) {
            tracing::warn!(id = %info.id, declared = %info.signer, "car signer differs from dependent's record");
            return Err(wrong());
        }
        vessel_signing::ensure_trusted(&info.signer, &self.trusted)?;
        let digest = Hash::from_data(data);
        vessel_signing::verify_digest(&info.signer, &digest, &info.signature).map_err(|e| {
            tracing::warn!(id = %info.id, error = %e, "car signature rejected");
            wrong()
        })
    }
}

/// Package metadata recorded for an artifact restored from a car
fn package_info(info: &CarInfo) -> PackageInfo {
    PackageInfo {
        id: info.id.clone(),
        name: info.name.clone(),
        version: info.version.clone(),
        repo: info.repo.clone(),
        runtime_deps: info.dependency_ids().cloned().collect(),
        build_deps: Vec::new(),
        constraints: info.constraints.clone(),
        inputs: info.inputs.clone(),
    }
}
