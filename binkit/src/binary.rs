//! Lifecycle of one named, versioned external binary.
//!
//! A [`Binary`] lives at `<install_dir>/<name>-<version>/<name>`. Whether it is
//! installed is read from the filesystem every time; nothing is cached.

use crate::download::{self, Extraction, RequestOptions, DEFAULT_STRIP_LEVEL};
use crate::error::{BinkitError, Result};
use crate::utils;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// File written into the version directory once extraction has fully succeeded.
pub const RECEIPT_FILE: &str = ".binkit-receipt.json";

/// Spawn attempts while the program file is reported busy.
const SPAWN_ATTEMPTS: u32 = 5;

/// How a missing binary is put in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum InstallStrategy {
    /// Wipe the whole install directory, then extract straight into place.
    ///
    /// Not safe against concurrent installers sharing the directory, and removes
    /// every other binary installed there.
    #[default]
    Recreate,
    /// Extract into a temporary sibling and rename into place on success.
    Staged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyInstalled,
    Installed,
}

/// Record of a completed install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub name: String,
    pub version: String,
    pub url: String,
    pub sha256: String,
    pub files: usize,
    pub installed_at: u64,
}

#[derive(Debug, Clone)]
pub struct Binary {
    name: String,
    url: String,
    version: String,
    install_dir: PathBuf,
    executable: PathBuf,
    strategy: InstallStrategy,
}

impl Binary {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        version: impl Into<String>,
        install_dir: impl Into<PathBuf>,
    ) -> Self {
        let name = name.into();
        let executable = PathBuf::from(format!("{name}{}", std::env::consts::EXE_SUFFIX));
        Self {
            name,
            url: url.into(),
            version: version.into(),
            install_dir: install_dir.into(),
            executable,
            strategy: InstallStrategy::default(),
        }
    }

    /// Program location relative to the version directory, for archives that do
    /// not keep it at the top level.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    pub fn with_strategy(mut self, strategy: InstallStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn install_dir(&self) -> &Path {
        &self.install_dir
    }

    pub fn strategy(&self) -> InstallStrategy {
        self.strategy
    }

    /// `<install_dir>/<name>-<version>`, the extraction target.
    pub fn version_dir(&self) -> PathBuf {
        self.install_dir
            .join(format!("{}-{}", self.name, self.version))
    }

    /// Deterministic location of the program itself.
    pub fn binary_path(&self) -> PathBuf {
        self.version_dir().join(&self.executable)
    }

    pub fn receipt_path(&self) -> PathBuf {
        self.version_dir().join(RECEIPT_FILE)
    }

    /// Whether the binary is present. No content validation is done, so an
    /// interrupted extraction that got as far as the program file counts.
    pub fn exists(&self) -> bool {
        self.binary_path().exists()
    }

    pub fn receipt(&self) -> Option<Receipt> {
        let content = fs::read_to_string(self.receipt_path()).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Present and carrying a receipt for this exact name, version and URL.
    pub fn is_complete(&self) -> bool {
        self.exists()
            && self.receipt().is_some_and(|receipt| {
                receipt.name == self.name
                    && receipt.version == self.version
                    && receipt.url == self.url
            })
    }

    /// Install unless already present, returning errors to the caller.
    pub async fn try_install(
        &self,
        options: &RequestOptions,
        suppress_logs: bool,
    ) -> Result<InstallOutcome> {
        if self.exists() {
            if !suppress_logs {
                tracing::info!("{} is already installed, skipping installation.", self.name);
            }
            return Ok(InstallOutcome::AlreadyInstalled);
        }

        if !suppress_logs {
            tracing::info!("Downloading release from {}", self.url);
        }

        let extraction = match self.strategy {
            InstallStrategy::Recreate => self.install_in_place(options).await?,
            InstallStrategy::Staged => self.install_staged(options).await?,
        };

        if !self.exists() {
            return Err(BinkitError::MissingExecutable {
                name: self.name.clone(),
                path: self.binary_path().display().to_string(),
            });
        }

        self.write_receipt(&extraction)?;

        if !suppress_logs {
            tracing::info!("{} has been installed!", self.name);
        }
        Ok(InstallOutcome::Installed)
    }

    async fn install_in_place(&self, options: &RequestOptions) -> Result<Extraction> {
        utils::recreate_dir(&self.install_dir)?;
        download::fetch_and_extract(
            &self.url,
            Some(&self.version_dir()),
            options,
            DEFAULT_STRIP_LEVEL,
        )
        .await
    }

    async fn install_staged(&self, options: &RequestOptions) -> Result<Extraction> {
        fs::create_dir_all(&self.install_dir)?;
        let stage = tempfile::Builder::new()
            .prefix(".binkit-stage-")
            .tempdir_in(&self.install_dir)?;
        let payload = stage.path().join("payload");

        let mut extraction =
            download::fetch_and_extract(&self.url, Some(&payload), options, DEFAULT_STRIP_LEVEL)
                .await?;

        if !payload.join(&self.executable).exists() {
            return Err(BinkitError::MissingExecutable {
                name: self.name.clone(),
                path: self.binary_path().display().to_string(),
            });
        }

        let version_dir = self.version_dir();
        if version_dir.exists() {
            fs::remove_dir_all(&version_dir)?;
        }
        fs::rename(&payload, &version_dir)?;

        extraction.path = version_dir;
        Ok(extraction)
    }

    fn write_receipt(&self, extraction: &Extraction) -> Result<()> {
        let receipt = Receipt {
            name: self.name.clone(),
            version: self.version.clone(),
            url: self.url.clone(),
            sha256: extraction.sha256.clone(),
            files: extraction.files,
            installed_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
        };
        let content = serde_json::to_string_pretty(&receipt).map_err(io::Error::other)?;
        fs::write(self.receipt_path(), content)?;
        Ok(())
    }

    /// Install, terminating the process with status 1 on failure.
    pub async fn install(&self, options: &RequestOptions, suppress_logs: bool) {
        if let Err(e) = self.try_install(options, suppress_logs).await {
            tracing::error!("Failed to install {}: {}", self.name, e);
            std::process::exit(1);
        }
    }

    /// Install if needed, then run the binary in the current directory with
    /// inherited stdin and wait for it. Returns the child's exit code.
    pub async fn try_run<I, S>(&self, options: &RequestOptions, args: I) -> Result<i32>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        if !self.exists() {
            self.try_install(options, true).await?;
        }

        let path = self.binary_path();
        utils::make_executable(&path)?;

        let spawn_error = |source: io::Error| BinkitError::Spawn {
            path: path.display().to_string(),
            source,
        };

        let mut command = tokio::process::Command::new(&path);
        command
            .current_dir(std::env::current_dir()?)
            .args(args)
            .stdin(Stdio::inherit());

        // A freshly written file can still be open in a concurrently forked child.
        let mut attempt = 1;
        let status = loop {
            match command.status().await {
                Err(e)
                    if e.kind() == io::ErrorKind::ExecutableFileBusy && attempt < SPAWN_ATTEMPTS =>
                {
                    tracing::debug!("{} is busy, retrying spawn", path.display());
                    tokio::time::sleep(Duration::from_millis(20 * u64::from(attempt))).await;
                    attempt += 1;
                }
                result => break result.map_err(spawn_error)?,
            }
        };

        Ok(utils::exit_code(status))
    }

    /// Run the binary and exit the process with its exit code. Any install or
    /// spawn failure exits with status 1.
    pub async fn run<I, S>(&self, options: &RequestOptions, args: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        match self.try_run(options, args).await {
            Ok(code) => std::process::exit(code),
            Err(e) => {
                tracing::error!("Install or run failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
