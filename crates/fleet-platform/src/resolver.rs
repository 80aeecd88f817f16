//! Platform resolver — turns a group's platform reference into a runnable
//! artifact on local disk.
//!
//! Artifacts are cached under `<cache>/<name>/<version>/` and reused by
//! every later `prepare` call. A download lands in a uniquely named temp
//! file next to the final path and is renamed into place only after the
//! transfer (and checksum, when the catalogue lists one) completes, so the
//! final path never holds a partial file. Concurrent `prepare` calls for
//! the same reference serialize on a per-reference lock; different
//! references download in parallel.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_core::PlatformRef;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::catalogue::{Catalogue, Platform, PlatformKind};
use crate::error::{PlatformError, PlatformResult};
use crate::fetcher::ArtifactFetcher;

/// A catalogue lookup result for one platform reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPlatform {
    pub reference: PlatformRef,
    pub kind: PlatformKind,
    pub build: String,
    pub url: String,
    pub sha256: Option<String>,
    /// Final cache location of the artifact.
    pub artifact: PathBuf,
    pub launch: Vec<String>,
    pub files: BTreeMap<String, String>,
}

impl ResolvedPlatform {
    /// File name the artifact gets inside a service working directory.
    pub fn file_name(&self) -> String {
        self.artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.jar", self.reference.name))
    }

    fn expand(&self, template: &str, port: u16, memory_mb: u32) -> String {
        template
            .replace("{artifact}", &self.file_name())
            .replace("{port}", &port.to_string())
            .replace("{memory}", &memory_mb.to_string())
    }

    /// Expand the launch template for one service.
    pub fn command_line(&self, port: u16, memory_mb: u32) -> Vec<String> {
        self.launch
            .iter()
            .map(|arg| self.expand(arg, port, memory_mb))
            .collect()
    }

    /// Static files with the same placeholders expanded.
    pub fn rendered_files(&self, port: u16, memory_mb: u32) -> Vec<(String, String)> {
        self.files
            .iter()
            .map(|(name, content)| (name.clone(), self.expand(content, port, memory_mb)))
            .collect()
    }
}

pub struct PlatformResolver {
    cache_dir: PathBuf,
    catalogue: Catalogue,
    fetcher: Arc<dyn ArtifactFetcher>,
    /// One lock per reference; the map lock is held only to look one up.
    locks: Mutex<HashMap<PlatformRef, Arc<Mutex<()>>>>,
}

impl PlatformResolver {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        catalogue: Catalogue,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            catalogue,
            fetcher,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn catalogue(&self) -> &Catalogue {
        &self.catalogue
    }

    /// Look a reference up in the catalogue. Does no I/O.
    pub fn resolve(&self, reference: &PlatformRef) -> PlatformResult<ResolvedPlatform> {
        let platform = self
            .catalogue
            .find(&reference.name)
            .ok_or_else(|| PlatformError::UnknownPlatform(reference.name.clone()))?;
        let version =
            platform
                .version(&reference.version)
                .ok_or_else(|| PlatformError::UnknownVersion {
                    platform: reference.name.clone(),
                    version: reference.version.clone(),
                })?;

        Ok(ResolvedPlatform {
            reference: reference.clone(),
            kind: platform.kind,
            build: version.build.clone(),
            url: platform.download_url(version),
            sha256: version.sha256.clone(),
            artifact: self.artifact_path(platform, &version.version, &version.build),
            launch: platform.launch.clone(),
            files: platform.files.clone(),
        })
    }

    fn artifact_path(&self, platform: &Platform, version: &str, build: &str) -> PathBuf {
        self.cache_dir
            .join(&platform.name)
            .join(version)
            .join(format!("{}-{version}-{build}.jar", platform.name))
    }

    /// Make sure the artifact for `reference` exists locally and return its path.
    pub async fn prepare(&self, reference: &PlatformRef) -> PlatformResult<PathBuf> {
        let resolved = self.resolve(reference)?;
        if tokio::fs::try_exists(&resolved.artifact).await? {
            debug!(platform = %reference, path = ?resolved.artifact, "artifact cached");
            return Ok(resolved.artifact);
        }

        let lock = self.lock_for(reference).await;
        let _guard = lock.lock().await;

        // Another caller may have finished the download while we waited.
        if tokio::fs::try_exists(&resolved.artifact).await? {
            debug!(platform = %reference, "artifact downloaded by concurrent caller");
            return Ok(resolved.artifact);
        }

        self.download(&resolved).await?;
        Ok(resolved.artifact)
    }

    async fn lock_for(&self, reference: &PlatformRef) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(reference.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn download(&self, resolved: &ResolvedPlatform) -> PlatformResult<()> {
        let dir = resolved
            .artifact
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.cache_dir.clone());
        tokio::fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(
            ".{}.{}.part",
            resolved.file_name(),
            uuid::Uuid::new_v4().simple()
        ));

        info!(platform = %resolved.reference, build = %resolved.build, url = %resolved.url, "downloading platform");
        let result = self.fetch_verified(resolved, &tmp).await;
        if let Err(e) = result {
            warn!(platform = %resolved.reference, error = %e, "platform download failed");
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }

        tokio::fs::rename(&tmp, &resolved.artifact).await?;
        info!(platform = %resolved.reference, path = ?resolved.artifact, "platform ready");
        Ok(())
    }

    async fn fetch_verified(&self, resolved: &ResolvedPlatform, tmp: &Path) -> PlatformResult<()> {
        self.fetcher.fetch(&resolved.url, tmp).await?;

        if let Some(expected) = &resolved.sha256 {
            let bytes = tokio::fs::read(tmp).await?;
            let actual = hex::encode(Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(PlatformError::ChecksumMismatch {
                    reference: resolved.reference.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Writes fixed bytes, counting calls.
    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    #[async_trait]
    impl ArtifactFetcher for CountingFetcher {
        async fn fetch(&self, url: &str, dest: &Path) -> PlatformResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::write(dest, b"partial").await?;
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(PlatformError::Download {
                    reference: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            tokio::fs::write(dest, b"server jar").await?;
            Ok(10)
        }
    }

    fn catalogue(sha256: Option<&str>) -> Catalogue {
        let sha = sha256
            .map(|s| format!(r#","sha256":"{s}""#))
            .unwrap_or_default();
        Catalogue::from_json(&format!(
            r#"{{"platforms":[{{"name":"paper","kind":"server",
                "url":"https://example.com/{{version}}/{{build}}.jar",
                "versions":[{{"version":"1.21","build":"130"{sha}}},
                            {{"version":"1.20.4","build":"499"}}]}}]}}"#
        ))
        .unwrap()
    }

    fn resolver(dir: &Path, fetcher: Arc<CountingFetcher>) -> PlatformResolver {
        PlatformResolver::new(dir, catalogue(None), fetcher)
    }

    fn paper(version: &str) -> PlatformRef {
        PlatformRef::new("paper", version)
    }

    fn entries(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default()
    }

    #[test]
    fn resolve_builds_paths_and_urls() {
        let resolved = PlatformResolver::new(
            "/cache",
            catalogue(None),
            Arc::new(CountingFetcher::default()),
        )
        .resolve(&paper("1.21"))
        .unwrap();

        assert_eq!(resolved.build, "130");
        assert_eq!(resolved.url, "https://example.com/1.21/130.jar");
        assert_eq!(
            resolved.artifact,
            PathBuf::from("/cache/paper/1.21/paper-1.21-130.jar")
        );
    }

    #[test]
    fn command_line_expands_placeholders() {
        let resolver = PlatformResolver::new(
            "/cache",
            Catalogue::builtin().unwrap(),
            Arc::new(CountingFetcher::default()),
        );
        let resolved = resolver.resolve(&paper("1.21")).unwrap();
        assert_eq!(
            resolved.command_line(30001, 2048),
            [
                "java",
                "-Xmx2048M",
                "-jar",
                "paper-1.21-130.jar",
                "--port",
                "30001",
                "--nogui"
            ]
        );
    }

    #[test]
    fn files_are_rendered_per_service() {
        let resolver = PlatformResolver::new(
            "/cache",
            Catalogue::builtin().unwrap(),
            Arc::new(CountingFetcher::default()),
        );
        let velocity = resolver
            .resolve(&PlatformRef::new("velocity", "3.4.0-SNAPSHOT"))
            .unwrap();
        let files = velocity.rendered_files(25577, 512);
        assert_eq!(files[0].0, "velocity.toml");
        assert!(files[0].1.contains("bind = \"0.0.0.0:25577\""));
    }

    #[tokio::test]
    async fn cached_artifact_is_not_downloaded_twice() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = resolver(dir.path(), fetcher.clone());

        let first = resolver.prepare(&paper("1.21")).await.unwrap();
        let second = resolver.prepare(&paper("1.21")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&first).unwrap(), b"server jar");
    }

    #[tokio::test]
    async fn concurrent_prepare_downloads_once() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let resolver = Arc::new(resolver(dir.path(), fetcher.clone()));

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.prepare(&paper("1.21")).await })
            })
            .collect();

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().unwrap());
        }

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(paths.windows(2).all(|w| w[0] == w[1]));
        // Only the final artifact remains; no temp files linger.
        assert_eq!(
            entries(&dir.path().join("paper/1.21")),
            ["paper-1.21-130.jar"]
        );
        assert_eq!(std::fs::read(&paths[0]).unwrap(), b"server jar");
    }

    #[tokio::test]
    async fn different_versions_download_independently() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = resolver(dir.path(), fetcher.clone());

        let paper_a = paper("1.21");
        let paper_b = paper("1.20.4");
        let (a, b) = tokio::join!(
            resolver.prepare(&paper_a),
            resolver.prepare(&paper_b)
        );
        assert_ne!(a.unwrap(), b.unwrap());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..Default::default()
        });
        let resolver = resolver(dir.path(), fetcher.clone());

        let result = resolver.prepare(&paper("1.21")).await;
        assert!(matches!(result, Err(PlatformError::Download { .. })));
        assert!(entries(&dir.path().join("paper/1.21")).is_empty());
    }

    #[tokio::test]
    async fn unknown_references_fail_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = resolver(dir.path(), fetcher.clone());

        assert!(matches!(
            resolver.prepare(&paper("0.1")).await,
            Err(PlatformError::UnknownVersion { .. })
        ));
        assert!(matches!(
            resolver.prepare(&PlatformRef::new("spigot", "1.21")).await,
            Err(PlatformError::UnknownPlatform(_))
        ));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn checksum_is_verified_before_rename() {
        let dir = tempfile::tempdir().unwrap();
        let good = hex::encode(Sha256::digest(b"server jar"));

        let ok = PlatformResolver::new(
            dir.path().join("ok"),
            catalogue(Some(&good)),
            Arc::new(CountingFetcher::default()),
        );
        assert!(ok.prepare(&paper("1.21")).await.is_ok());

        let bad = PlatformResolver::new(
            dir.path().join("bad"),
            catalogue(Some("00ff")),
            Arc::new(CountingFetcher::default()),
        );
        assert!(matches!(
            bad.prepare(&paper("1.21")).await,
            Err(PlatformError::ChecksumMismatch { .. })
        ));
        assert!(entries(&dir.path().join("bad/paper/1.21")).is_empty());
    }
}
