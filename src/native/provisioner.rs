use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use tokio::{fs, io::AsyncWriteExt, sync::Mutex};
use uuid::Uuid;

use crate::core::{
    domain::{BinaryHandle, Provenance},
    traits::provisioner::{Provisioner, ProvisioningError},
};

const MAX_REDIRECTS: usize = 10;
const EXECUTABLE_MODE: u32 = 0o755;

/// Where the interpreter may be found and where it comes from otherwise.
#[derive(Clone, Debug)]
pub struct ProvisionerConfig {
    pub local_path: PathBuf,
    pub cache_path: PathBuf,
    pub source_url: String,
}

/// Resolves the interpreter from a bundled copy, a cached download, or a
/// fresh download, in that order.
///
/// Downloads are serialized per cache path, so concurrent cold starts
/// fetch the binary once and the waiters pick up the cached copy.
#[derive(Debug)]
pub struct BinaryProvisioner {
    config: ProvisionerConfig,
    client: reqwest::Client,
    downloads: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl BinaryProvisioner {
    pub fn new(config: ProvisionerConfig) -> Result<Self, ProvisioningError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;

        Ok(Self {
            config,
            client,
            downloads: DashMap::new(),
        })
    }

    async fn locate(&self) -> Result<BinaryHandle, ProvisioningError> {
        if fs::try_exists(&self.config.local_path).await? {
            return Ok(BinaryHandle {
                path: self.config.local_path.clone(),
                provenance: Provenance::Bundled,
            });
        }

        let cache_path = &self.config.cache_path;
        let cached = BinaryHandle {
            path: cache_path.clone(),
            provenance: Provenance::Cached,
        };
        if fs::try_exists(cache_path).await? {
            return Ok(cached);
        }

        let lock = self.download_lock(cache_path);
        let _guard = lock.lock().await;

        // Another request may have finished the download while we waited.
        if fs::try_exists(cache_path).await? {
            return Ok(cached);
        }

        self.download(cache_path).await?;

        Ok(BinaryHandle {
            path: cache_path.clone(),
            provenance: Provenance::Downloaded,
        })
    }

    fn download_lock(&self, key: &Path) -> Arc<Mutex<()>> {
        let entry = self.downloads.entry(key.to_path_buf()).or_default();
        Arc::clone(entry.value())
    }

    #[tracing::instrument(skip(self))]
    async fn download(&self, dest: &Path) -> Result<(), ProvisioningError> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        tracing::info!("Downloading interpreter from {}", self.config.source_url);
        let response = self.client.get(&self.config.source_url).send().await?;

        let status = response.status();
        if status.is_redirection() {
            return Err(ProvisioningError::NoRedirectTarget {
                status: status.as_u16(),
            });
        }
        let response = response.error_for_status()?;

        let partial = PartialDownload::new(dest);
        let bytes = write_body(response, partial.path()).await?;
        tracing::debug!("Downloaded {} bytes to {}", bytes, partial.path().display());
        partial.persist(dest).await?;

        if !fs::try_exists(dest).await? {
            return Err(ProvisioningError::Missing {
                path: dest.to_path_buf(),
            });
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl Provisioner for BinaryProvisioner {
    #[tracing::instrument(skip(self))]
    async fn resolve(&self) -> Result<BinaryHandle, ProvisioningError> {
        let handle = self.locate().await?;

        // A checked-out bundled copy may have lost its executable bit.
        mark_executable(&handle.path).await?;

        tracing::info!(
            "Interpreter resolved: path={}, provenance={:?}",
            handle.path.display(),
            handle.provenance
        );
        Ok(handle)
    }
}

/// A download in progress next to its final path.
///
/// Removed on drop unless [`PartialDownload::persist`] renamed it into
/// place, so a failed or cancelled download leaves nothing behind.
#[derive(Debug)]
struct PartialDownload {
    path: Option<PathBuf>,
}

impl PartialDownload {
    fn new(dest: &Path) -> Self {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "interpreter".to_string());

        Self {
            path: Some(dest.with_file_name(format!("{}.part-{}", name, Uuid::new_v4()))),
        }
    }

    fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    async fn persist(mut self, dest: &Path) -> std::io::Result<()> {
        if let Some(path) = &self.path {
            fs::rename(path, dest).await?;
        }
        self.path = None;
        Ok(())
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed partial download {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    "Failed to remove partial download {}: {}",
                    path.display(),
                    e
                ),
            }
        }
    }
}

async fn write_body(response: reqwest::Response, path: &Path) -> Result<u64, ProvisioningError> {
    let mut file = fs::File::create(path).await?;
    let mut body = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Leaves files that are already executable untouched, so a read-only
/// bundle still resolves.
#[cfg(unix)]
async fn mark_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path).await?.permissions().mode();
    if mode & 0o111 == 0o111 {
        return Ok(());
    }

    fs::set_permissions(path, std::fs::Permissions::from_mode(EXECUTABLE_MODE)).await
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use axum::{
        Router,
        body::{Body, Bytes},
        http::{StatusCode, header},
        routing::get,
    };

    use super::*;

    const BINARY_BYTES: &[u8] = b"#!/bin/sh\necho downloaded\n";

    async fn serve_binary(hits: Arc<AtomicUsize>) -> String {
        let app = Router::new()
            .route(
                "/start",
                get(|| async { (StatusCode::FOUND, [(header::LOCATION, "/hop")]) }),
            )
            .route(
                "/hop",
                get(|| async { (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, "/SK")]) }),
            )
            .route(
                "/SK",
                get(move || {
                    let hits = hits.clone();
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        BINARY_BYTES
                    }
                }),
            )
            .route(
                "/stalled",
                get(|| async {
                    let first = futures::stream::once(async {
                        Ok::<_, std::io::Error>(Bytes::from_static(b"#!/bin/sh\n"))
                    });
                    Body::from_stream(first.chain(futures::stream::pending()))
                }),
            )
            .route("/dangling", get(|| async { StatusCode::FOUND }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn provisioner(dir: &Path, source_url: String) -> BinaryProvisioner {
        BinaryProvisioner::new(ProvisionerConfig {
            local_path: dir.join("bundled").join("SK"),
            cache_path: dir.join("cache").join("SK"),
            source_url,
        })
        .unwrap()
    }

    #[cfg(unix)]
    fn is_executable(path: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;

        std::fs::metadata(path).unwrap().permissions().mode() & 0o111 == 0o111
    }

    fn leftover_partials(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| e.file_name().to_string_lossy().contains(".part-"))
                    .count()
            })
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_bundled_binary_is_preferred_and_marked_executable() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), "http://127.0.0.1:1/SK".to_string());
        std::fs::create_dir_all(dir.path().join("bundled")).unwrap();
        std::fs::write(&provisioner.config.local_path, BINARY_BYTES).unwrap();
        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        std::fs::write(&provisioner.config.cache_path, BINARY_BYTES).unwrap();

        let handle = provisioner.resolve().await.unwrap();

        assert_eq!(handle.provenance, Provenance::Bundled);
        assert_eq!(handle.path, provisioner.config.local_path);
        #[cfg(unix)]
        assert!(is_executable(&handle.path));
    }

    #[tokio::test]
    async fn test_cached_binary_is_used_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), "http://127.0.0.1:1/SK".to_string());
        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        std::fs::write(&provisioner.config.cache_path, BINARY_BYTES).unwrap();

        let handle = provisioner.resolve().await.unwrap();

        assert_eq!(handle.provenance, Provenance::Cached);
        assert_eq!(handle.path, provisioner.config.cache_path);
        #[cfg(unix)]
        assert!(is_executable(&handle.path));
    }

    #[tokio::test]
    async fn test_download_follows_redirects() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve_binary(hits.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), format!("{}/start", base));

        let handle = provisioner.resolve().await.unwrap();

        assert_eq!(handle.provenance, Provenance::Downloaded);
        assert_eq!(std::fs::read(&handle.path).unwrap(), BINARY_BYTES);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(leftover_partials(&dir.path().join("cache")), 0);
        #[cfg(unix)]
        assert!(is_executable(&handle.path));

        let again = provisioner.resolve().await.unwrap();
        assert_eq!(again.provenance, Provenance::Cached);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_starts_download_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let base = serve_binary(hits.clone()).await;
        let dir = tempfile::tempdir().unwrap();
        let provisioner = Arc::new(provisioner(dir.path(), format!("{}/SK", base)));

        let handles = futures::future::join_all((0..8).map(|_| {
            let provisioner = provisioner.clone();
            async move { provisioner.resolve().await }
        }))
        .await;

        let handles: Vec<BinaryHandle> = handles.into_iter().map(Result::unwrap).collect();
        let downloaded = handles
            .iter()
            .filter(|h| h.provenance == Provenance::Downloaded)
            .count();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(downloaded, 1);
        assert!(handles.iter().all(|h| h.path == provisioner.config.cache_path));
        assert_eq!(std::fs::read(&provisioner.config.cache_path).unwrap(), BINARY_BYTES);
    }

    #[tokio::test]
    async fn test_redirect_without_location_fails() {
        let base = serve_binary(Arc::new(AtomicUsize::new(0))).await;
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), format!("{}/dangling", base));

        let result = provisioner.resolve().await;

        assert!(matches!(
            result,
            Err(ProvisioningError::NoRedirectTarget { status: 302 })
        ));
        assert!(!provisioner.config.cache_path.exists());
    }

    #[tokio::test]
    async fn test_error_status_fails_without_leaving_files() {
        let base = serve_binary(Arc::new(AtomicUsize::new(0))).await;
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), format!("{}/missing", base));

        let result = provisioner.resolve().await;

        assert!(matches!(result, Err(ProvisioningError::Request(_))));
        assert!(!provisioner.config.cache_path.exists());
        assert_eq!(leftover_partials(&dir.path().join("cache")), 0);
    }

    #[tokio::test]
    async fn test_unreachable_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), "http://127.0.0.1:1/SK".to_string());

        let result = provisioner.resolve().await;

        assert!(matches!(result, Err(ProvisioningError::Request(_))));
        assert!(!provisioner.config.cache_path.exists());
    }

    #[tokio::test]
    async fn test_cancelled_download_leaves_no_partial_file() {
        let base = serve_binary(Arc::new(AtomicUsize::new(0))).await;
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let provisioner = Arc::new(provisioner(dir.path(), format!("{}/stalled", base)));

        let task = tokio::spawn({
            let provisioner = provisioner.clone();
            async move { provisioner.resolve().await }
        });

        let started = std::time::Instant::now();
        while leftover_partials(&cache_dir) == 0 {
            assert!(started.elapsed() < Duration::from_secs(5), "download never started");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(leftover_partials(&cache_dir), 0);
        assert!(!provisioner.config.cache_path.exists());
    }

    #[tokio::test]
    async fn test_timed_out_resolve_leaves_no_partial_file() {
        let base = serve_binary(Arc::new(AtomicUsize::new(0))).await;
        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), format!("{}/stalled", base));

        let result = tokio::time::timeout(Duration::from_millis(500), provisioner.resolve()).await;

        assert!(result.is_err());
        assert_eq!(leftover_partials(&dir.path().join("cache")), 0);
        assert!(!provisioner.config.cache_path.exists());
    }

    #[tokio::test]
    async fn test_partial_download_persists_or_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("SK");

        let dropped = PartialDownload::new(&dest);
        std::fs::write(dropped.path(), b"half").unwrap();
        drop(dropped);
        assert_eq!(leftover_partials(dir.path()), 0);

        let kept = PartialDownload::new(&dest);
        std::fs::write(kept.path(), BINARY_BYTES).unwrap();
        kept.persist(&dest).await.unwrap();
        assert_eq!(leftover_partials(dir.path()), 0);
        assert_eq!(std::fs::read(&dest).unwrap(), BINARY_BYTES);
    }

    #[tokio::test]
    async fn test_failed_rename_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing-dir").join("SK");
        let partial = PartialDownload::new(&dir.path().join("SK"));
        std::fs::write(partial.path(), BINARY_BYTES).unwrap();

        assert!(partial.persist(&dest).await.is_err());
        assert_eq!(leftover_partials(dir.path()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executable_bundle_is_left_untouched() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let provisioner = provisioner(dir.path(), "http://127.0.0.1:1/SK".to_string());
        std::fs::create_dir_all(dir.path().join("bundled")).unwrap();
        std::fs::write(&provisioner.config.local_path, BINARY_BYTES).unwrap();
        std::fs::set_permissions(
            &provisioner.config.local_path,
            std::fs::Permissions::from_mode(0o555),
        )
        .unwrap();

        let handle = provisioner.resolve().await.unwrap();

        let mode = std::fs::metadata(&handle.path).unwrap().permissions().mode();
        assert_eq!(handle.provenance, Provenance::Bundled);
        assert_eq!(mode & 0o777, 0o555);
    }
}
