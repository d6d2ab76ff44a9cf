//! Signing key management

use std::path::{Path, PathBuf};

use vessel_errors::{Error, SigningError};
use vessel_signing::Keypair;

use crate::types::KeyReport;
use crate::OpsCtx;

/// Generate the configured signing key
///
/// An existing key is kept unless `force` is set.
///
/// # Errors
///
/// Returns an error if an existing key is malformed (without `force`) or the
/// key cannot be written.
pub async fn keygen(ctx: &OpsCtx, force: bool) -> Result<KeyReport, Error> {
    let path = ctx.config.signing_key_path()?;
    let (key, generated) = blocking(path.clone(), move |path| {
        if force {
            let key = Keypair::generate();
            key.save(&path)?;
            return Ok((key, true));
        }
        match Keypair::load(&path) {
            Ok(key) => Ok((key, false)),
            Err(Error::Signing(SigningError::KeyNotFound { .. })) => {
                let key = Keypair::generate();
                key.save(&path)?;
                Ok((key, true))
            }
            Err(e) => Err(e),
        }
    })
    .await?;

    if generated {
        tracing::info!(path = %path.display(), signer = %key.signer(), "generated signing key");
    }
    Ok(KeyReport {
        path,
        signer: key.signer(),
        generated,
    })
}

/// Write `<signer>.txt` holding the signer id into `dir`
///
/// The file is what a consumer drops into its trusted signers.
///
/// # Errors
///
/// Returns an error if the signing key cannot be loaded or the file cannot
/// be written.
pub async fn export_key(ctx: &OpsCtx, dir: &Path) -> Result<PathBuf, Error> {
    let signer = ctx.signing_key()?.signer();
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io_with_path(&e, dir))?;
    let file = dir.join(format!("{signer}.txt"));
    tokio::fs::write(&file, format!("{signer}\n"))
        .await
        .map_err(|e| Error::io_with_path(&e, &file))?;
    tracing::info!(file = %file.display(), %signer, "exported signer");
    Ok(file)
}

async fn blocking<T, F>(path: PathBuf, f: F) -> Result<T, Error>
where
    T: Send + 'static,
    F: FnOnce(PathBuf) -> Result<T, Error> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(path))
        .await
        .map_err(|e| Error::internal(format!("key task failed: {e}")))?
}
