//! Binary operations backed by the `object` reader and `install_name_tool`

use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use vessel_errors::PlatformError;

use crate::binary::{read_dylib_refs, BinaryOperations, DylibRefs};
use crate::core::PlatformContext;

/// Host implementation of binary operations
#[derive(Debug, Default)]
pub struct HostBinaryOperations;

impl HostBinaryOperations {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn install_name_tool(
        operation: &str,
        binary: &Path,
        args: &[&str],
    ) -> Result<(), PlatformError> {
        let output = Command::new("install_name_tool")
            .args(args)
            .arg(binary)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    PlatformError::CommandNotFound {
                        command: "install_name_tool".to_string(),
                    }
                } else {
                    PlatformError::ProcessExecutionFailed {
                        command: format!("install_name_tool {}", args.join(" ")),
                        message: e.to_string(),
                    }
                }
            })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.contains("larger updated load commands do not fit") {
            format!("HEADERPAD_ERROR: {}", binary.display())
        } else {
            stderr.trim().to_string()
        };
        Err(PlatformError::BinaryOperationFailed {
            operation: operation.to_string(),
            binary_path: binary.display().to_string(),
            message,
        })
    }
}

#[async_trait]
impl BinaryOperations for HostBinaryOperations {
    async fn read_references(
        &self,
        _ctx: &PlatformContext,
        binary: &Path,
    ) -> Result<DylibRefs, PlatformError> {
        let data = tokio::fs::read(binary)
            .await
            .map_err(|e| PlatformError::InvalidBinaryFormat {
                path: binary.display().to_string(),
                message: e.to_string(),
            })?;

        tokio::task::spawn_blocking(move || read_dylib_refs(&data))
            .await
            .map_err(|e| PlatformError::BinaryOperationFailed {
                operation: "read_references".to_string(),
                binary_path: String::new(),
                message: e.to_string(),
            })?
            .map_err(|e| PlatformError::InvalidBinaryFormat {
                path: binary.display().to_string(),
                message: e.to_string(),
            })
    }

    async fn set_install_name(
        &self,
        _ctx: &PlatformContext,
        binary: &Path,
        name: &str,
    ) -> Result<(), PlatformError> {
        tracing::debug!(binary = %binary.display(), name, "setting install name");
        Self::install_name_tool("set_install_name", binary, &["-id", name]).await
    }

    async fn change_dependency(
        &self,
        _ctx: &PlatformContext,
        binary: &Path,
        old: &str,
        new: &str,
    ) -> Result<(), PlatformError> {
        tracing::debug!(binary = %binary.display(), old, new, "changing dependency");
        Self::install_name_tool("change_dependency", binary, &["-change", old, new]).await
    }
}
