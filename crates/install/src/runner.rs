//! Executes recorded install statements against the filesystem

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio_util::sync::CancellationToken;
use vessel_errors::{Error, InstallError, PlatformError};
use vessel_events::EventSender;
use vessel_net::NetClient;
use vessel_platform::fs as pfs;
use vessel_platform::{Platform, PlatformCommand, PlatformContext};
use vessel_recipe::Statement;
use vessel_types::PackageId;

use crate::archive::{self, ArchiveKind};
use crate::env::BuildEnv;
use crate::staging::descend_single;

/// Interpreter state for one install or hook procedure
///
/// Relative paths resolve against the current build directory, except the
/// targets of `link`, `install_files` and `write_file`, which resolve
/// against the prefix.
pub struct StatementRunner<'a> {
    id: &'a PackageId,
    platform: &'a Platform,
    ctx: PlatformContext,
    cancel: &'a CancellationToken,
    client: &'a NetClient,
    tx: &'a EventSender,
    prefix: PathBuf,
    build: PathBuf,
    env: BuildEnv,
}

impl<'a> StatementRunner<'a> {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: &'a PackageId,
        platform: &'a Platform,
        ctx: PlatformContext,
        cancel: &'a CancellationToken,
        client: &'a NetClient,
        tx: &'a EventSender,
        build: PathBuf,
        env: BuildEnv,
    ) -> Self {
        Self {
            id,
            platform,
            ctx,
            cancel,
            client,
            tx,
            prefix: PathBuf::new(),
            build,
            env,
        }
    }

    /// Point `prefix` at another directory (a dependency for hooks)
    pub fn set_prefix(&mut self, prefix: PathBuf) {
        self.prefix = prefix;
    }

    #[must_use]
    pub fn env(&self) -> &BuildEnv {
        &self.env
    }

    #[must_use]
    pub fn build_dir(&self) -> &Path {
        &self.build
    }

    /// Run `statements` in order, stopping at the first failure
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` when cancellation was requested,
    /// `InstallError::CommandFailed` for a failing command, or the
    /// filesystem error of the failing statement.
    pub fn run<'b>(
        &'b mut self,
        statements: &'b [Statement],
    ) -> Pin<Box<dyn Future<Output = Result<(), Error>> + Send + 'b>>
    where
        'a: 'b,
    {
        Box::pin(async move {
            for statement in statements {
                if self.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                self.execute(statement).await?;
            }
            Ok(())
        })
    }

    fn in_build(&self, path: &str) -> PathBuf {
        self.build.join(path)
    }

    fn in_prefix(&self, path: &str) -> PathBuf {
        self.prefix.join(path)
    }

    fn failed(&self, message: impl Into<String>) -> Error {
        InstallError::Failed {
            id: self.id.to_string(),
            message: message.into(),
        }
        .into()
    }

    async fn execute(&mut self, statement: &Statement) -> Result<(), Error> {
        match statement {
            Statement::System { args, dir } => {
                let Some((program, rest)) = args.split_first() else {
                    return Err(self.failed("system called without a command"));
                };
                let dir = dir.as_deref().map_or_else(|| self.build.clone(), |d| self.in_build(d));
                let exe = vessel_platform::process::which(program, self.env.path()).ok_or_else(
                    || PlatformError::CommandNotFound {
                        command: program.clone(),
                    },
                )?;
                let mut cmd = PlatformCommand::new(&exe.to_string_lossy());
                cmd.args(rest);
                self.spawn(cmd, &dir).await
            }
            Statement::Shell { code } => {
                let mut cmd = PlatformCommand::new(&self.tool("bash"));
                cmd.args(["-c", code.as_str()]);
                let dir = self.build.clone();
                self.spawn(cmd, &dir).await
            }
            Statement::ApplyPatch { patch } => {
                let file = self.build.join(".vessel-apply.patch");
                tokio::fs::write(&file, patch)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &file))?;
                let mut cmd = PlatformCommand::new(&self.tool("patch"));
                cmd.args(["-p1", "-i"]).arg(file.to_string_lossy());
                let dir = self.build.clone();
                let result = self.spawn(cmd, &dir).await;
                pfs::remove_file_quietly(&file).await;
                result
            }
            Statement::Inreplace {
                file,
                pattern,
                target,
            } => {
                let path = self.in_build(file);
                let data = read_text(&path).await?;
                write_bytes(&path, data.replace(pattern.as_str(), target).as_bytes()).await
            }
            Statement::InreplaceRe {
                file,
                pattern,
                target,
            } => {
                let re = regex::bytes::Regex::new(pattern)
                    .map_err(|e| self.failed(format!("invalid pattern {pattern:?}: {e}")))?;
                let path = self.in_build(file);
                let data = tokio::fs::read(&path)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &path))?;
                let replaced = re.replace_all(&data, target.as_bytes());
                write_bytes(&path, &replaced).await
            }
            Statement::RmF { path } | Statement::RmRf { path } => remove(&self.in_build(path)).await,
            Statement::SetEnv { key, value } => {
                self.env.set(key.as_str(), value.as_str());
                Ok(())
            }
            Statement::AppendEnv { key, value } => {
                self.env.append(key, value);
                Ok(())
            }
            Statement::PrependEnv { key, value } => {
                self.env.prepend(key, value);
                Ok(())
            }
            Statement::Link { sources, target } => {
                let dir = self.in_prefix(target);
                tokio::fs::create_dir_all(&dir)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &dir))?;
                for source in sources {
                    let name = Path::new(source)
                        .file_name()
                        .ok_or_else(|| self.failed(format!("cannot link {source:?}")))?;
                    let link = dir.join(name);
                    tokio::fs::symlink(source, &link)
                        .await
                        .map_err(|e| Error::io_with_path(&e, &link))?;
                }
                Ok(())
            }
            Statement::InstallFiles {
                target,
                pattern,
                symlink,
            } => {
                let pattern = self.in_build(pattern);
                let target = self.in_prefix(target);
                install_files(&pattern, &target, *symlink).await
            }
            Statement::WriteFile { target, data } => {
                let path = self.in_prefix(target);
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::io_with_path(&e, parent))?;
                }
                write_bytes(&path, data.as_bytes()).await
            }
            Statement::ChangeDir { dir, body } => {
                let joined = self.build.join(dir);
                let saved = std::mem::replace(&mut self.build, joined);
                let result = self.run(body).await;
                self.build = saved;
                result
            }
            Statement::MakeDir { dir } => {
                let path = self.in_build(dir);
                tokio::fs::create_dir_all(&path)
                    .await
                    .map_err(|e| Error::io_with_path(&e, &path))
            }
            Statement::SetRoot { dir } => {
                let path = self.in_build(dir);
                if !tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) {
                    return Err(self.failed(format!("set_root: {} is not a directory", path.display())));
                }
                self.build = descend_single(&path).await;
                Ok(())
            }
            Statement::Download { url, path, sum } => {
                let dest = self.in_build(path);
                vessel_net::download_verified(self.client, url, &dest, sum.as_ref(), self.tx)
                    .await
                    .map(|_| ())
            }
            Statement::Unpack { path, output } => {
                let archive_path = self.in_build(path);
                let kind = ArchiveKind::detect(path)
                    .ok_or_else(|| self.failed(format!("unpack: unknown archive format {path:?}")))?;
                let dest = output
                    .as_deref()
                    .map_or_else(|| self.build.clone(), |o| self.in_build(o));
                archive::extract(&archive_path, kind, &dest, 1).await.map(|_| ())
            }
        }
    }

    /// A tool found on the build path, or its bare name
    fn tool(&self, name: &str) -> String {
        vessel_platform::process::which(name, self.env.path())
            .map_or_else(|| name.to_string(), |p| p.to_string_lossy().into_owned())
    }

    async fn spawn(&self, mut cmd: PlatformCommand, dir: &Path) -> Result<(), Error> {
        self.env.apply(&mut cmd);
        cmd.current_dir(dir);
        let command = cmd.display();
        tracing::debug!(id = %self.id, %command, dir = %dir.display(), "running");

        let output = self
            .platform
            .process()
            .run_streaming(&self.ctx, cmd, self.cancel)
            .await?;
        if output.status.success() {
            return Ok(());
        }
        let tail = String::from_utf8_lossy(&output.stderr);
        if !tail.is_empty() {
            tracing::warn!(id = %self.id, %command, output = %tail, "command failed");
        }
        Err(InstallError::CommandFailed {
            id: self.id.to_string(),
            command,
            status: output.status.code().unwrap_or(-1),
        }
        .into())
    }
}

async fn read_text(path: &Path) -> Result<String, Error> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

async fn write_bytes(path: &Path, data: &[u8]) -> Result<(), Error> {
    tokio::fs::write(path, data)
        .await
        .map_err(|e| Error::io_with_path(&e, path))
}

async fn remove(path: &Path) -> Result<(), Error> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => pfs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path)
            .await
            .map_err(|e| Error::io_with_path(&e, path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io_with_path(&e, path)),
    }
}

/// Copy (or symlink) every match of `pattern` into `target`, keeping paths
/// relative to the pattern's directory
async fn install_files(pattern: &Path, target: &Path, symlink: bool) -> Result<(), Error> {
    let base = pattern.parent().unwrap_or(pattern).to_path_buf();
    let matches = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| Error::internal(format!("invalid pattern {}: {e}", pattern.display())))?
        .filter_map(Result::ok)
        .collect::<Vec<_>>();

    tokio::fs::create_dir_all(target)
        .await
        .map_err(|e| Error::io_with_path(&e, target))?;

    for entry in matches {
        let rel = entry.strip_prefix(&base).unwrap_or(&entry);
        let dest = target.join(rel);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io_with_path(&e, parent))?;
        }
        if symlink {
            tokio::fs::symlink(&entry, &dest)
                .await
                .map_err(|e| Error::io_with_path(&e, &dest))?;
            continue;
        }
        let meta = tokio::fs::symlink_metadata(&entry)
            .await
            .map_err(|e| Error::io_with_path(&e, &entry))?;
        if meta.file_type().is_symlink() {
            let link = tokio::fs::read_link(&entry)
                .await
                .map_err(|e| Error::io_with_path(&e, &entry))?;
            tokio::fs::symlink(&link, &dest)
                .await
                .map_err(|e| Error::io_with_path(&e, &dest))?;
        } else if meta.is_dir() {
            pfs::copy_directory(&entry, &dest).await?;
        } else {
            tokio::fs::copy(&entry, &dest)
                .await
                .map_err(|e| Error::io_with_path(&e, &dest))?;
        }
    }
    Ok(())
}
