//! Executable lookup on a PATH-like search list.
//!
//! The lookup is split in two: [`SystemInfo`] turns an environment snapshot into an
//! ordered list of candidate paths, and a probe decides which candidate is a regular
//! file. The blocking ([`which_in`]) and suspending ([`which_in_async`]) entry points
//! share the candidate list and only differ in how they probe.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

/// Extensions probed on Windows when `PATHEXT` is unset.
pub const DEFAULT_PATHEXT: &str = ".EXE;.CMD;.BAT;.COM";

/// Operating system family, as far as executable lookup is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Os {
    Windows,
    Unix,
}

impl Os {
    pub fn current() -> Self {
        if cfg!(windows) {
            Os::Windows
        } else {
            Os::Unix
        }
    }

    fn list_separator(self) -> char {
        match self {
            Os::Windows => ';',
            Os::Unix => ':',
        }
    }

    fn path_separator(self) -> char {
        match self {
            Os::Windows => '\\',
            Os::Unix => '/',
        }
    }
}

/// Everything the lookup needs from the outside world.
pub trait Environment {
    /// Gets an environment variable.
    fn var(&self, key: &str) -> Option<String>;

    /// The operating system the lookup runs for.
    fn os(&self) -> Os;

    /// Whether `path` resolves (following symlinks) to a regular file.
    fn stat_is_file(&self, path: &Path) -> io::Result<bool>;

    /// Suspending variant of [`Environment::stat_is_file`].
    fn stat_is_file_async<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Future<Output = io::Result<bool>> + Send + 'a;
}

/// Process environment and the real filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealEnvironment;

impl Environment for RealEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn os(&self) -> Os {
        Os::current()
    }

    fn stat_is_file(&self, path: &Path) -> io::Result<bool> {
        Ok(std::fs::metadata(path)?.is_file())
    }

    fn stat_is_file_async<'a>(
        &'a self,
        path: &'a Path,
    ) -> impl Future<Output = io::Result<bool>> + Send + 'a {
        async move { Ok(tokio::fs::metadata(path).await?.is_file()) }
    }
}

/// Lookup parameters derived from one environment snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfo {
    /// PATH entries, trimmed, non-empty, each ending with the path separator.
    pub path_items: Vec<String>,
    /// Extensions to append, or `None` when the command is probed as-is.
    pub path_exts: Option<Vec<String>>,
    os: Os,
}

impl SystemInfo {
    /// Snapshot the environment for `command`. `None` when PATH is unset.
    pub fn capture<E: Environment + ?Sized>(command: &str, env: &E) -> Option<Self> {
        let os = env.os();
        let path = env.var("PATH")?;

        let path_items = split_env_value(&path, os)
            .map(|item| normalize_dir(item, os))
            .collect();

        let mut info = Self {
            path_items,
            path_exts: None,
            os,
        };

        if os == Os::Windows {
            let pathext = env
                .var("PATHEXT")
                .unwrap_or_else(|| DEFAULT_PATHEXT.to_string());
            let exts: Vec<String> = split_env_value(&pathext, os)
                .map(str::to_string)
                .collect();

            // A command that already names an executable extension is probed verbatim.
            if !exts.iter().any(|ext| info.has_suffix(command, ext)) {
                info.path_exts = Some(exts);
            }
        }

        Some(info)
    }

    /// Name equality: case-insensitive on Windows, exact elsewhere.
    pub fn is_name_match(&self, a: &str, b: &str) -> bool {
        match self.os {
            Os::Windows => a.to_lowercase() == b.to_lowercase(),
            Os::Unix => a == b,
        }
    }

    fn has_suffix(&self, command: &str, ext: &str) -> bool {
        command
            .len()
            .checked_sub(ext.len())
            .and_then(|start| command.get(start..))
            .map(|tail| self.is_name_match(tail, ext))
            .unwrap_or(false)
    }

    /// Candidate paths in probe order: PATH entries outer, extensions inner.
    pub fn candidates(&self, command: &str) -> Vec<PathBuf> {
        match &self.path_exts {
            Some(exts) => self
                .path_items
                .iter()
                .flat_map(|dir| exts.iter().map(move |ext| format!("{dir}{command}{ext}")))
                .map(PathBuf::from)
                .collect(),
            None => self
                .path_items
                .iter()
                .map(|dir| PathBuf::from(format!("{dir}{command}")))
                .collect(),
        }
    }
}

fn split_env_value(value: &str, os: Os) -> impl Iterator<Item = &str> {
    value
        .split(os.list_separator())
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

fn normalize_dir(dir: &str, os: Os) -> String {
    let separator = os.path_separator();
    if dir.ends_with(separator) {
        dir.to_string()
    } else {
        format!("{dir}{separator}")
    }
}

/// Probe failures (missing file, permission denied) mean "no match".
fn path_matches(probe: io::Result<bool>) -> bool {
    probe.unwrap_or(false)
}

fn snapshot<E: Environment + ?Sized>(command: &str, env: &E) -> Option<SystemInfo> {
    if command.trim().is_empty() {
        return None;
    }
    SystemInfo::capture(command, env)
}

/// Find `command` on the PATH of `env`, blocking on each probe.
pub fn which_in<E: Environment + ?Sized>(command: &str, env: &E) -> Option<PathBuf> {
    let info = snapshot(command, env)?;
    info.candidates(command)
        .into_iter()
        .find(|candidate| path_matches(env.stat_is_file(candidate)))
}

/// Find `command` on the PATH of `env` without blocking the executor.
pub async fn which_in_async<E: Environment + Sync + ?Sized>(
    command: &str,
    env: &E,
) -> Option<PathBuf> {
    let info = snapshot(command, env)?;
    for candidate in info.candidates(command) {
        if path_matches(env.stat_is_file_async(&candidate).await) {
            return Some(candidate);
        }
    }
    None
}

/// Find `command` on the process PATH.
pub fn which(command: &str) -> Option<PathBuf> {
    which_in(command, &RealEnvironment)
}

/// Find `command` on the process PATH, asynchronously.
pub async fn which_async(command: &str) -> Option<PathBuf> {
    which_in_async(command, &RealEnvironment).await
}
