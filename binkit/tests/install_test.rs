//! End-to-end tests for archive download, install and run against a loopback server.

mod common;

use binkit::binary::{Binary, InstallOutcome, InstallStrategy};
use binkit::download::{fetch_and_extract, RequestOptions};
use binkit::error::BinkitError;
use common::{direct_client, noise, tar_gz, TestServer};
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn options() -> RequestOptions {
    RequestOptions {
        client: Some(direct_client()),
        ..Default::default()
    }
}

fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_fetch_strips_wrapper_directory() {
    let archive = tar_gz(&[
        ("wrapper/bin/tool", b"tool"),
        ("wrapper/LICENSE", b"MIT"),
    ]);
    let expected_sha = hex::encode(Sha256::digest(&archive));
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let dest = TempDir::new().unwrap();

    let extraction = fetch_and_extract(&server.url("/tool.tar.gz"), Some(dest.path()), &options(), 1)
        .await
        .unwrap();

    assert_eq!(extraction.path, dest.path());
    assert_eq!(extraction.files, 2);
    assert_eq!(extraction.sha256, expected_sha);
    assert_eq!(fs::read(dest.path().join("bin/tool")).unwrap(), b"tool");
    assert_eq!(fs::read(dest.path().join("LICENSE")).unwrap(), b"MIT");
}

#[tokio::test]
async fn test_fetch_without_stripping() {
    let archive = tar_gz(&[("wrapper/bin/tool", b"tool")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let dest = TempDir::new().unwrap();

    fetch_and_extract(&server.url("/tool.tar.gz"), Some(dest.path()), &options(), 0)
        .await
        .unwrap();

    assert!(dest.path().join("wrapper/bin/tool").is_file());
}

#[tokio::test]
async fn test_fetch_into_fresh_temporary_directory() {
    let archive = tar_gz(&[("pkg/package.json", b"{}")]);
    let server = TestServer::start(vec![("/pkg.tgz", 200, archive)]);

    let extraction = fetch_and_extract(&server.url("/pkg.tgz"), None, &options(), 1)
        .await
        .unwrap();

    assert!(extraction.path.join("package.json").is_file());
    fs::remove_dir_all(&extraction.path).unwrap();
}

#[tokio::test]
async fn test_fetch_rejects_error_status() {
    let server = TestServer::start(vec![]);
    let dest = TempDir::new().unwrap();

    let err = fetch_and_extract(&server.url("/missing.tar.gz"), Some(dest.path()), &options(), 1)
        .await
        .unwrap_err();

    match err {
        BinkitError::DownloadFailed { status, reason, .. } => {
            assert_eq!(status, 404);
            assert_eq!(reason, "Not Found");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_fetch_rejects_non_gzip_body() {
    let server = TestServer::start(vec![("/plain", 200, b"plain text body".to_vec())]);
    let dest = TempDir::new().unwrap();

    let err = fetch_and_extract(&server.url("/plain"), Some(dest.path()), &options(), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, BinkitError::StreamSetup { .. }));
}

#[tokio::test]
async fn test_checksum_covers_data_after_tar_end() {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(3);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append_data(&mut header, "pkg/tool", &b"bin"[..]).unwrap();
    let mut payload = builder.into_inner().unwrap();
    payload.extend(noise(2 * 1024 * 1024));

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(&payload).unwrap();
    let body = encoder.finish().unwrap();
    let expected_sha = hex::encode(Sha256::digest(&body));

    let server = TestServer::start(vec![("/padded.tar.gz", 200, body)]);
    let dest = TempDir::new().unwrap();

    let extraction = fetch_and_extract(&server.url("/padded.tar.gz"), Some(dest.path()), &options(), 1)
        .await
        .unwrap();

    assert_eq!(extraction.files, 1);
    assert_eq!(extraction.sha256, expected_sha);
}

#[tokio::test]
async fn test_checksum_covers_bytes_after_gzip_member() {
    let mut body = tar_gz(&[("pkg/tool", b"bin")]);
    body.extend(noise(256 * 1024));
    let expected_sha = hex::encode(Sha256::digest(&body));

    let server = TestServer::start(vec![("/trailing.tar.gz", 200, body)]);
    let dest = TempDir::new().unwrap();

    let extraction =
        fetch_and_extract(&server.url("/trailing.tar.gz"), Some(dest.path()), &options(), 1)
            .await
            .unwrap();

    assert_eq!(extraction.sha256, expected_sha);
    assert!(dest.path().join("tool").is_file());
}

#[tokio::test]
async fn test_corrupt_download_is_not_installed() {
    let marker = b"release payload marker";
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::none()));
    let mut header = tar::Header::new_gnu();
    header.set_size(marker.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "tool-1.0.0/tool", &marker[..])
        .unwrap();
    let mut archive = builder.into_inner().unwrap().finish().unwrap();
    let at = archive
        .windows(marker.len())
        .position(|w| w == marker)
        .unwrap();
    archive[at] ^= 0x01;

    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();
    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path())
        .with_strategy(InstallStrategy::Staged);

    let err = binary.try_install(&options(), true).await.unwrap_err();

    assert!(matches!(err, BinkitError::Extraction { .. }));
    assert!(!binary.exists());
}

#[tokio::test]
async fn test_truncated_body_fails() {
    let content = noise(64 * 1024);
    let archive = tar_gz(&[("tool-1.0.0/tool", content.as_slice())]);
    let half = archive.len() / 2;

    for with_length in [true, false] {
        let server = TestServer::start_truncated("/tool.tar.gz", archive.clone(), half, with_length);
        let dest = TempDir::new().unwrap();

        let err = fetch_and_extract(&server.url("/tool.tar.gz"), Some(dest.path()), &options(), 1)
            .await
            .unwrap_err();

        assert!(
            matches!(err, BinkitError::Extraction { .. }),
            "content-length {with_length}: {err}"
        );
    }
}

#[tokio::test]
async fn test_install_is_idempotent() {
    let archive = tar_gz(&[("tool-1.0.0/tool", b"bin"), ("tool-1.0.0/README", b"docs")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();
    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path());

    assert!(!binary.exists());
    let first = binary.try_install(&options(), true).await.unwrap();
    assert_eq!(first, InstallOutcome::Installed);
    assert!(binary.exists());
    assert!(binary.is_complete());
    let after_first = listing(&binary.version_dir());

    let second = binary.try_install(&options(), true).await.unwrap();
    assert_eq!(second, InstallOutcome::AlreadyInstalled);
    assert_eq!(server.hits(), 1);
    assert_eq!(listing(&binary.version_dir()), after_first);

    let receipt = binary.receipt().unwrap();
    assert_eq!(receipt.version, "1.0.0");
    assert_eq!(receipt.files, 2);

    let again = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path());
    assert!(again.exists());
}

#[tokio::test]
async fn test_recreate_strategy_wipes_install_directory() {
    let archive = tar_gz(&[("tool-1.0.0/tool", b"bin")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();
    fs::create_dir_all(install_dir.path().join("other-2.0/other")).unwrap();

    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path());
    binary.try_install(&options(), true).await.unwrap();

    assert_eq!(listing(install_dir.path()), vec!["tool-1.0.0"]);
}

#[tokio::test]
async fn test_staged_strategy_keeps_siblings() {
    let archive = tar_gz(&[("tool-1.0.0/tool", b"bin")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();
    fs::create_dir_all(install_dir.path().join("other-2.0")).unwrap();
    fs::write(install_dir.path().join("other-2.0/other"), "other").unwrap();

    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path())
        .with_strategy(InstallStrategy::Staged);
    binary.try_install(&options(), true).await.unwrap();

    assert!(binary.is_complete());
    assert_eq!(listing(install_dir.path()), vec!["other-2.0", "tool-1.0.0"]);
}

#[tokio::test]
async fn test_staged_strategy_leaves_nothing_on_failure() {
    let archive = tar_gz(&[("tool-1.0.0/not-the-tool", b"bin")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();

    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path())
        .with_strategy(InstallStrategy::Staged);
    let err = binary.try_install(&options(), true).await.unwrap_err();

    assert!(matches!(err, BinkitError::MissingExecutable { .. }));
    assert!(listing(install_dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_executable_is_reported() {
    let archive = tar_gz(&[("tool-1.0.0/bin/tool", b"bin")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();

    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path());
    let err = binary.try_install(&options(), true).await.unwrap_err();
    assert!(matches!(err, BinkitError::MissingExecutable { .. }));

    let nested = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path())
        .with_executable("bin/tool");
    // The partial install left the program file behind, so it reads as installed.
    let outcome = nested.try_install(&options(), true).await.unwrap();
    assert_eq!(outcome, InstallOutcome::AlreadyInstalled);
    assert!(nested.exists());
    assert!(!nested.is_complete());
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_installs_sets_permissions_and_forwards_exit_code() {
    use std::os::unix::fs::PermissionsExt;

    let script = b"#!/bin/sh\necho \"$@\" > \"$(dirname \"$0\")/args.txt\"\nexit 3\n";
    let archive = tar_gz(&[("tool-1.0.0/tool", script)]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();
    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path());

    binary.try_install(&options(), true).await.unwrap();
    let mode = fs::metadata(binary.binary_path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0, "extraction must not set execute bits");

    let code = binary
        .try_run(&options(), ["first", "second"])
        .await
        .unwrap();

    assert_eq!(code, 3);
    let mode = fs::metadata(binary.binary_path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    assert_eq!(
        fs::read_to_string(binary.version_dir().join("args.txt")).unwrap(),
        "first second\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_run_installs_silently_when_missing() {
    let archive = tar_gz(&[("tool-1.0.0/tool", b"#!/bin/sh\nexit 0\n")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();
    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path());

    let code = binary
        .try_run(&options(), std::iter::empty::<&str>())
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert!(binary.is_complete());
    assert_eq!(server.hits(), 1);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_run_waits_for_busy_program_file() {
    let archive = tar_gz(&[("tool-1.0.0/tool", b"#!/bin/sh\nexit 7\n")]);
    let server = TestServer::start(vec![("/tool.tar.gz", 200, archive)]);
    let install_dir = TempDir::new().unwrap();
    let binary = Binary::new("tool", server.url("/tool.tar.gz"), "1.0.0", install_dir.path());
    binary.try_install(&options(), true).await.unwrap();

    // An open write handle makes exec fail with ETXTBSY until it is closed.
    let writer = fs::OpenOptions::new()
        .append(true)
        .open(binary.binary_path())
        .unwrap();
    let release = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(30));
        drop(writer);
    });

    let code = binary
        .try_run(&options(), std::iter::empty::<&str>())
        .await
        .unwrap();
    release.join().unwrap();

    assert_eq!(code, 7);
}

#[tokio::test]
async fn test_run_reports_install_failure() {
    let server = TestServer::start(vec![]);
    let install_dir = TempDir::new().unwrap();
    let binary = Binary::new("tool", server.url("/gone.tar.gz"), "1.0.0", install_dir.path());

    let err = binary
        .try_run(&options(), std::iter::empty::<&str>())
        .await
        .unwrap_err();

    assert!(matches!(err, BinkitError::DownloadFailed { status: 404, .. }));
}
