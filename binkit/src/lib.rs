//! # binkit
//!
//! Locate executables on PATH, download and unpack release archives, and install
//! and run versioned external binaries.
//!
//! ## Overview
//!
//! A [`binary::Binary`] names one program at one version. Its install location is
//! computed from `(install_dir, name, version)` alone, so whether it is installed
//! is always answered by looking at the filesystem. Installing streams the release
//! `.tar.gz` through decompression and extraction without buffering it, and running
//! forwards arguments and stdin to the program and hands back its exit status.
//!
//! ## Usage
//!
//! ```bash
//! # Where is a command?
//! binkit which cargo
//!
//! # Download and unpack an archive, dropping its top-level directory
//! binkit fetch https://example.com/tool-1.0.tar.gz -d ./tool
//!
//! # Install and run a pinned release
//! binkit run wasm-pack --url https://example.com/wasm-pack-v0.13.1.tar.gz -t v0.13.1 -- build
//! ```
//!
//! ## Configuration
//!
//! Binaries can be declared in `<config dir>/binkit.toml` under `[binary.<name>]`
//! tables; command-line flags override the file.

/// Install, inspect and run one versioned binary
pub mod binary;

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Run a PATH command and parse its JSON output
pub mod command;

/// Configuration file handling and per-binary settings
pub mod config;

/// Streaming download and extraction of .tar.gz archives
pub mod download;

/// Error types and error handling utilities
pub mod error;

/// Network retry logic with exponential backoff
pub mod retry;

/// Permission, directory and exit status helpers
pub mod utils;

/// Executable lookup on PATH
pub mod which;
