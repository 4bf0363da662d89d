//! End-to-end acquisition against an in-process HTTP server standing in for
//! the Adoptium API, Maven Central and the Gluon download server.

use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use prestarter_lib::core::cache::RuntimeCache;
use prestarter_lib::core::composite::CompositeSource;
use prestarter_lib::core::config::PrestarterConfig;
use prestarter_lib::core::downloader::Downloader;
use prestarter_lib::core::error::ErrorKind;
use prestarter_lib::core::layout::RuntimeLayout;
use prestarter_lib::core::orchestrator::{AcquisitionOrchestrator, RetryPolicy};
use prestarter_lib::core::paths::{InstallPaths, Scope};
use prestarter_lib::core::platform::{Arch, Os, PlatformDescriptor};
use prestarter_lib::core::source::{
    AdoptiumSource, ComponentKind, RuntimeRequirement, RuntimeSource, UiRuntimeSource,
};
use prestarter_lib::core::version::VersionConstraint;

type Routes = HashMap<String, Vec<u8>>;

struct FakeUpstream {
    addr: SocketAddr,
    hits: Arc<AtomicUsize>,
}

impl FakeUpstream {
    /// Bind first, so routes can carry absolute links back to the server.
    async fn start(routes: impl FnOnce(SocketAddr) -> Routes) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes = Arc::new(routes(addr));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let routes = routes.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buf = [0_u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);

                    let head = String::from_utf8_lossy(&request).to_string();
                    let target = head.split_whitespace().nth(1).unwrap_or("/");
                    let path = target.split('?').next().unwrap_or(target);
                    let (status, body) = match routes.get(path) {
                        Some(body) => ("200 OK", body.clone()),
                        None => ("404 Not Found", b"not found".to_vec()),
                    };
                    let header = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = socket.write_all(header.as_bytes()).await;
                    let _ = socket.write_all(&body).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self { addr, hits }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn jdk_tar_gz() -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (path, body) in [
        ("jdk-21.0.2+13/bin/java", &b"#!/bin/sh\n"[..]),
        ("jdk-21.0.2+13/lib/modules", &b"modules"[..]),
        ("jdk-21.0.2+13/release", &b"JAVA_VERSION=\"21.0.2\""[..]),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, body).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn javafx_zip() -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (path, body) in [
        ("javafx-sdk-17.0.10/lib/javafx.base.jar", &b"jar"[..]),
        ("javafx-sdk-17.0.10/lib/javafx.controls.jar", &b"jar"[..]),
        ("javafx-sdk-17.0.10/legal/javafx.base/LICENSE", &b"GPLv2+CE"[..]),
    ] {
        writer.start_file(path, options).unwrap();
        writer.write_all(body).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

const MAVEN_METADATA: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<metadata>
  <groupId>org.openjfx</groupId>
  <artifactId>javafx</artifactId>
  <versioning>
    <versions>
      <version>17.0.10</version>
      <version>21.0.1</version>
      <version>21.0.2</version>
      <version>22-ea+5</version>
    </versions>
  </versioning>
</metadata>"#;

// The UI runtime follows the lowest feature release `>=17` admits.
const JFX_ARCHIVE: &str = "/openjfx/17.0.10/openjfx-17.0.10_linux-x64_bin-sdk.zip";

fn upstream_routes(addr: SocketAddr, jdk_checksum: Option<String>) -> Routes {
    let jdk = jdk_tar_gz();
    let jfx = javafx_zip();
    let release = serde_json::json!([{
        "binaries": [{
            "architecture": "x64",
            "image_type": "jdk",
            "os": "linux",
            "package": {
                "checksum": jdk_checksum.unwrap_or_else(|| sha256_hex(&jdk)),
                "link": format!("http://{addr}/files/jdk21.tar.gz"),
                "name": "OpenJDK21U-jdk_x64_linux_hotspot_21.0.2_13.tar.gz",
                "size": jdk.len()
            }
        }],
        "version_data": { "openjdk_version": "21.0.2+13-LTS" }
    }]);

    let mut routes = Routes::new();
    routes.insert(
        "/v3/info/available_releases".into(),
        br#"{"available_releases":[17,21]}"#.to_vec(),
    );
    routes.insert(
        "/v3/assets/feature_releases/21/ga".into(),
        serde_json::to_vec(&release).unwrap(),
    );
    routes.insert("/files/jdk21.tar.gz".into(), jdk);
    routes.insert("/maven/maven-metadata.xml".into(), MAVEN_METADATA.as_bytes().to_vec());
    routes.insert(
        format!("{JFX_ARCHIVE}.sha256"),
        format!("{}  openjfx-17.0.10_linux-x64_bin-sdk.zip\n", sha256_hex(&jfx)).into_bytes(),
    );
    routes.insert(JFX_ARCHIVE.into(), jfx);
    routes
}

fn local_downloader() -> Downloader {
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Downloader::new(client).with_min_free_bytes(0)
}

fn linux_x64() -> PlatformDescriptor {
    PlatformDescriptor::from_parts(Os::Linux, Arch::X64).unwrap()
}

fn requirement() -> RuntimeRequirement {
    RuntimeRequirement::new(
        ComponentKind::Jdk,
        VersionConstraint::parse(">=17").unwrap(),
        linux_x64(),
    )
}

fn config_for(upstream: &FakeUpstream) -> PrestarterConfig {
    PrestarterConfig {
        adoptium_api: upstream.url("/v3"),
        openjfx_metadata_url: upstream.url("/maven/maven-metadata.xml"),
        openjfx_download_base: upstream.url("/openjfx"),
        ..PrestarterConfig::default()
    }
}

fn orchestrator<'a>(config: &'a PrestarterConfig, root: PathBuf) -> AcquisitionOrchestrator<'a> {
    let downloader = local_downloader();
    let composite = CompositeSource::new(vec![
        Box::new(AdoptiumSource::from_config(config, downloader.clone())),
        Box::new(UiRuntimeSource::from_config(config, downloader)),
    ])
    .unwrap();
    let paths = InstallPaths::new(root.join("shared"), root.join("private"));
    AcquisitionOrchestrator::new(config, linux_x64(), composite, paths).with_retry_policy(RetryPolicy {
        base_backoff: std::time::Duration::from_millis(5),
        ..RetryPolicy::default()
    })
}

#[tokio::test]
async fn installs_jdk_with_merged_openjfx() {
    let upstream = FakeUpstream::start(|addr| upstream_routes(addr, None)).await;
    let config = config_for(&upstream);
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&config, dir.path().to_path_buf());

    let result = orchestrator
        .ensure(&requirement(), Scope::Shared, None, &CancellationToken::new())
        .await;
    assert!(result.success, "{:?}", result.errors);
    assert_eq!(result.installed_paths.len(), 2);
    assert_eq!(result.installed[0].version, "21.0.2+13");
    assert_eq!(result.installed[1].version, "17.0.10");

    let java_home = &result.installed[0].install_path;
    assert!(java_home.join("bin").join("java").is_file());
    assert!(java_home.join("lib").join("modules").is_file());
    assert!(java_home.join("lib").join("javafx.base.jar").is_file());
    assert!(java_home.join("legal").join("javafx.base").join("LICENSE").is_file());

    let layout = RuntimeLayout::from_installed(&result.installed, &linux_x64()).unwrap();
    assert_eq!(layout.module_path, Some(java_home.join("lib")));

    let root = orchestrator.paths().root_for(Scope::Shared);
    let entries = RuntimeCache::new(root).entries().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert!(!root.join("downloads").join("OpenJDK21U-jdk_x64_linux_hotspot_21.0.2_13.tar.gz").exists());

    // Second run is served from the manifest without touching the network.
    let before = upstream.hits();
    let again = orchestrator
        .ensure(&requirement(), Scope::Shared, None, &CancellationToken::new())
        .await;
    assert!(again.success);
    assert_eq!(again.installed_paths, result.installed_paths);
    assert_eq!(upstream.hits(), before);
}

#[tokio::test]
async fn standalone_openjfx_installs_next_to_jdk() {
    let upstream = FakeUpstream::start(|addr| upstream_routes(addr, None)).await;
    let config = PrestarterConfig {
        merge_javafx_into_jdk: false,
        ..config_for(&upstream)
    };
    let dir = tempfile::tempdir().unwrap();

    let result = orchestrator(&config, dir.path().to_path_buf())
        .ensure(&requirement(), Scope::Shared, None, &CancellationToken::new())
        .await;
    assert!(result.success, "{:?}", result.errors);
    assert!(result.installed_paths[1].ends_with("javafx"));
    assert!(result.installed_paths[1].join("lib").join("javafx.controls.jar").is_file());
    assert!(!result.installed_paths[0].join("lib").join("javafx.controls.jar").exists());
}

#[tokio::test]
async fn fetch_twice_downloads_once() {
    let upstream = FakeUpstream::start(|addr| upstream_routes(addr, None)).await;
    let config = config_for(&upstream);
    let dir = tempfile::tempdir().unwrap();
    let source = AdoptiumSource::from_config(&config, local_downloader());
    let cancel = CancellationToken::new();

    let build = source.resolve(&requirement(), &cancel).await.unwrap();
    let first = source.fetch(&build, dir.path(), &cancel).await.unwrap();
    let after_first = upstream.hits();
    let second = source.fetch(&build, dir.path(), &cancel).await.unwrap();

    assert!(matches!(first, prestarter_lib::core::source::FetchOutcome::Downloaded { .. }));
    assert!(matches!(second, prestarter_lib::core::source::FetchOutcome::AlreadyPresent { .. }));
    assert_eq!(upstream.hits(), after_first);
}

#[tokio::test]
async fn wrong_catalog_checksum_is_an_integrity_failure() {
    let upstream = FakeUpstream::start(|addr| upstream_routes(addr, Some("0".repeat(64)))).await;
    let config = config_for(&upstream);
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator(&config, dir.path().to_path_buf());

    let result = orchestrator
        .ensure(&requirement(), Scope::Shared, None, &CancellationToken::new())
        .await;
    assert!(!result.success);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].kind(), ErrorKind::Integrity);

    let root = orchestrator.paths().root_for(Scope::Shared);
    assert!(!root.join("java").exists());
    assert!(RuntimeCache::new(root).entries().await.unwrap().is_empty());
}
