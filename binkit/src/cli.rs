use crate::binary::{Binary, InstallStrategy};
use crate::config::{self, BinaryOverrides, Config};
use crate::download::{RequestOptions, DEFAULT_STRIP_LEVEL};
use crate::error::{BinkitError, Result};
use crate::retry::RetryConfig;
use clap::{Args, Parser, Subcommand};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[clap(
    name = "binkit",
    version,
    about = "Locate, download, install and run versioned release binaries",
    long_about = None
)]
pub struct Cli {
    /// Configuration file path [default: <config dir>/binkit.toml]
    #[clap(long, global = true, env = "BINKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[clap(long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the location of a command found on PATH
    Which {
        /// Command name
        command: String,
    },

    /// Download a .tar.gz archive and extract it
    Fetch(FetchArgs),

    /// Install a binary unless it is already present
    Install {
        #[clap(flatten)]
        binary: BinaryArgs,

        /// Suppress progress messages
        #[clap(short, long)]
        quiet: bool,
    },

    /// Run a binary, installing it first if needed, and exit with its status
    Run {
        #[clap(flatten)]
        binary: BinaryArgs,

        /// Arguments passed to the binary
        #[clap(last = true, value_name = "ARGS")]
        args: Vec<OsString>,
    },

    /// Show where a binary lives and whether it is installed
    Status {
        #[clap(flatten)]
        binary: BinaryArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct RequestArgs {
    /// Extra request header, e.g. 'Authorization: Bearer <token>'
    #[clap(short = 'H', long = "header", value_name = "NAME: VALUE")]
    pub headers: Vec<String>,

    /// Request deadline in seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Retries for connection failures and 5xx/429 responses
    #[clap(long, default_value_t = 0)]
    pub max_retries: u32,
}

impl RequestArgs {
    /// Request options with `base` headers and timeout overridden by the flags.
    pub fn request_options(
        &self,
        base_headers: HeaderMap,
        base_timeout: Option<u64>,
    ) -> Result<RequestOptions> {
        let mut headers = base_headers;
        for raw in &self.headers {
            let (name, value) = config::parse_header(raw)?;
            headers.insert(name, value);
        }

        Ok(RequestOptions {
            headers,
            timeout: self.timeout.or(base_timeout).map(Duration::from_secs),
            retry: RetryConfig::with_max_retries(self.max_retries),
            ..Default::default()
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct FetchArgs {
    /// Archive URL (http or https)
    pub url: String,

    /// Destination directory [default: a new temporary directory]
    #[clap(short = 'd', long)]
    pub dest: Option<PathBuf>,

    /// Leading path segments to strip from archive entries
    #[clap(long, default_value_t = DEFAULT_STRIP_LEVEL)]
    pub strip: usize,

    /// HTTP method
    #[clap(short = 'X', long, default_value = "GET")]
    pub method: String,

    #[clap(flatten)]
    pub request: RequestArgs,
}

impl FetchArgs {
    pub fn request_options(&self) -> Result<RequestOptions> {
        let mut options = self.request.request_options(HeaderMap::new(), None)?;
        options.method = Method::from_bytes(self.method.to_uppercase().as_bytes()).map_err(|_| {
            BinkitError::InvalidMethod {
                method: self.method.clone(),
            }
        })?;
        Ok(options)
    }
}

#[derive(Args, Debug, Clone)]
pub struct BinaryArgs {
    /// Binary name, also the program file name inside the archive
    pub name: String,

    /// Release archive URL (overrides the config file)
    #[clap(long)]
    pub url: Option<String>,

    /// Release version (overrides the config file)
    #[clap(short, long, value_name = "VERSION")]
    pub tag: Option<String>,

    /// Installation directory (overrides the config file)
    #[clap(short = 'd', long)]
    pub install_dir: Option<String>,

    /// How a missing binary is installed
    #[clap(long, value_enum)]
    pub strategy: Option<InstallStrategy>,

    /// Program path inside the install root
    #[clap(long)]
    pub executable: Option<String>,

    #[clap(flatten)]
    pub request: RequestArgs,
}

impl BinaryArgs {
    /// Combine flags with the `[binary.<name>]` table; flags win.
    pub fn binary(&self, config: &Config) -> Result<Binary> {
        let overrides = BinaryOverrides {
            url: self.url.clone(),
            version: self.tag.clone(),
            install_dir: self.install_dir.clone(),
            strategy: self.strategy,
            executable: self.executable.clone(),
        };
        config.binary(&self.name, &overrides)
    }

    pub fn request_options(&self, config: &Config) -> Result<RequestOptions> {
        self.request
            .request_options(config.headers(&self.name)?, config.default.timeout)
    }
}
