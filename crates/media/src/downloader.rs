//! Concurrent, retrying artifact downloads.

use std::sync::Arc;

use {
    futures::{StreamExt, stream},
    tokio::time::Instant,
    tracing::{debug, info, warn},
};

use crate::{
    artifact::ImageArtifact,
    error::{Error, Result},
    fetch::ResourceFetcher,
    format,
    retry::RetryPolicy,
    store::ArtifactStore,
};

/// Result of downloading one batch.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    /// One entry per reference, in the order the references were given.
    pub artifacts: Vec<ImageArtifact>,
    /// The deadline expired before every download finished.
    pub timed_out: bool,
}

impl DownloadReport {
    pub fn verified_count(&self) -> usize {
        self.artifacts.iter().filter(|a| a.is_valid()).count()
    }
}

/// Downloads references, verifies them and files them by content hash.
pub struct ArtifactDownloader<F> {
    fetcher: F,
    store: Arc<ArtifactStore>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl<F: ResourceFetcher> ArtifactDownloader<F> {
    pub fn new(fetcher: F, store: ArtifactStore, retry: RetryPolicy) -> Self {
        Self {
            fetcher,
            store: Arc::new(store),
            retry,
            concurrency: 1,
        }
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Download one reference, retrying transient failures within the
    /// retry budget. Never fails: exhausted or permanent errors are recorded
    /// on the returned artifact.
    pub async fn fetch(&self, reference: &str) -> ImageArtifact {
        let artifact = ImageArtifact::reference(reference);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_once(reference).await {
                Ok(done) => {
                    debug!(url = %reference, attempt, hash = %done.content_hash, "artifact verified");
                    return done;
                },
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    debug!(
                        url = %reference,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "download attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => {
                    warn!(url = %reference, attempt, error = %e, "download failed");
                    return artifact.failed(e.to_string());
                },
            }
        }
    }

    async fn try_once(&self, reference: &str) -> Result<ImageArtifact> {
        let res = self.fetcher.fetch(reference).await?;
        let kind = format::verify(&res.bytes, res.content_type.as_deref())?;
        let stored = self.store.persist(&res.bytes, kind).await?;
        if stored.byte_size == 0 {
            return Err(Error::verification("stored file is empty"));
        }
        Ok(ImageArtifact {
            source: reference.to_string(),
            content_hash: stored.content_hash,
            local_path: Some(stored.path),
            byte_size: stored.byte_size,
            verified: true,
            failure: None,
        })
    }

    /// Download every reference with bounded concurrency.
    ///
    /// The report keeps the input order regardless of completion order. When
    /// `deadline` passes, in-flight downloads are abandoned and reported as
    /// failed; artifacts already verified are kept.
    pub async fn download_all(
        &self,
        references: &[String],
        deadline: Option<Instant>,
    ) -> DownloadReport {
        let mut slots: Vec<Option<ImageArtifact>> = vec![None; references.len()];

        let run = async {
            let mut pending = stream::iter(references.iter().enumerate())
                .map(|(i, r)| async move { (i, self.fetch(r).await) })
                .buffer_unordered(self.concurrency);
            while let Some((i, artifact)) = pending.next().await {
                slots[i] = Some(artifact);
            }
        };

        let timed_out = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, run).await.is_err(),
            None => {
                run.await;
                false
            },
        };

        let artifacts: Vec<ImageArtifact> = slots
            .into_iter()
            .zip(references)
            .map(|(slot, reference)| {
                slot.unwrap_or_else(|| {
                    ImageArtifact::reference(reference.as_str())
                        .failed("abandoned: deadline expired")
                })
            })
            .collect();

        let report = DownloadReport {
            artifacts,
            timed_out,
        };
        info!(
            total = references.len(),
            verified = report.verified_count(),
            timed_out,
            "downloads finished"
        );
        report
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::Mutex,
        time::Duration,
    };

    use {async_trait::async_trait, mirage_browser::FetchedResource};

    use super::*;

    fn png(seed: u8) -> Vec<u8> {
        vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, seed, seed, seed, seed]
    }

    /// Serves scripted responses per reference, one per call.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<HashMap<String, Vec<Result<Vec<u8>>>>>,
        calls: Mutex<HashMap<String, u32>>,
        delays: HashMap<String, Duration>,
    }

    impl Scripted {
        fn with(mut self, reference: &str, responses: Vec<Result<Vec<u8>>>) -> Self {
            self.responses
                .get_mut()
                .unwrap()
                .insert(reference.to_string(), responses);
            self
        }

        fn delayed(mut self, reference: &str, delay: Duration) -> Self {
            self.delays.insert(reference.to_string(), delay);
            self
        }

        fn calls(&self, reference: &str) -> u32 {
            self.calls.lock().unwrap().get(reference).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ResourceFetcher for Scripted {
        async fn fetch(&self, reference: &str) -> Result<FetchedResource> {
            *self
                .calls
                .lock()
                .unwrap()
                .entry(reference.to_string())
                .or_default() += 1;
            if let Some(d) = self.delays.get(reference) {
                tokio::time::sleep(*d).await;
            }
            let next = {
                let mut responses = self.responses.lock().unwrap();
                let queue = responses.get_mut(reference).unwrap();
                if queue.len() > 1 {
                    queue.remove(0)
                } else {
                    match &queue[0] {
                        Ok(b) => Ok(b.clone()),
                        Err(e) => Err(Error::network(reference, e.to_string())),
                    }
                }
            };
            next.map(|bytes| FetchedResource {
                bytes,
                content_type: Some("image/png".into()),
            })
        }
    }

    fn downloader(fetcher: Scripted, dir: &tempfile::TempDir) -> ArtifactDownloader<Scripted> {
        ArtifactDownloader::new(
            fetcher,
            ArtifactStore::new(dir.path()),
            RetryPolicy::immediate(3),
        )
        .with_concurrency(4)
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(
            Scripted::default().with("a", vec![Err(Error::network("a", "reset")), Ok(png(1))]),
            &dir,
        );
        let artifact = d.fetch("a").await;
        assert!(artifact.is_valid());
        assert_eq!(d.fetcher.calls("a"), 2);
        assert!(artifact.local_path.unwrap().exists());
    }

    #[tokio::test]
    async fn verification_failure_exhausts_budget() {
        let dir = tempfile::tempdir().unwrap();
        let d = downloader(
            Scripted::default().with("a", vec![Ok(b"<html>".to_vec())]),
            &dir,
        );
        let artifact = d.fetch("a").await;
        assert!(!artifact.is_valid());
        assert!(artifact.failure.unwrap().contains("verification"));
        assert_eq!(d.fetcher.calls("a"), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();

        struct NotFound;
        #[async_trait]
        impl ResourceFetcher for NotFound {
            async fn fetch(&self, reference: &str) -> Result<FetchedResource> {
                Err(Error::Http {
                    url: reference.into(),
                    status: 404,
                })
            }
        }

        let d = ArtifactDownloader::new(
            NotFound,
            ArtifactStore::new(dir.path()),
            RetryPolicy::immediate(5),
        );
        let artifact = d.fetch("https://x/y").await;
        assert!(artifact.failure.unwrap().contains("404"));
    }

    #[tokio::test]
    async fn order_follows_input_not_completion() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Scripted::default()
            .with("slow", vec![Ok(png(1))])
            .with("fast", vec![Ok(png(2))])
            .delayed("slow", Duration::from_millis(50));
        let d = downloader(fetcher, &dir);

        let refs = vec!["slow".to_string(), "fast".to_string()];
        let report = d.download_all(&refs, None).await;
        let sources: Vec<_> = report.artifacts.iter().map(|a| a.source.as_str()).collect();
        assert_eq!(sources, ["slow", "fast"]);
        assert_eq!(report.verified_count(), 2);
        assert!(!report.timed_out);
    }

    #[tokio::test]
    async fn same_content_twice_is_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Scripted::default()
            .with("a", vec![Ok(png(7))])
            .with("b", vec![Ok(png(7))]);
        let d = downloader(fetcher, &dir);

        let refs = vec!["a".to_string(), "b".to_string()];
        let report = d.download_all(&refs, None).await;
        assert_eq!(
            report.artifacts[0].content_hash,
            report.artifacts[1].content_hash
        );
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn deadline_keeps_verified_and_abandons_rest() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Scripted::default()
            .with("fast", vec![Ok(png(1))])
            .with("stuck", vec![Ok(png(2))])
            .delayed("stuck", Duration::from_secs(30));
        let d = downloader(fetcher, &dir);

        let refs = vec!["stuck".to_string(), "fast".to_string()];
        let deadline = Instant::now() + Duration::from_millis(100);
        let report = d.download_all(&refs, Some(deadline)).await;

        assert!(report.timed_out);
        assert!(!report.artifacts[0].is_valid());
        assert!(report.artifacts[0].failure.as_deref().unwrap().contains("deadline"));
        assert!(report.artifacts[1].is_valid());
    }
}
