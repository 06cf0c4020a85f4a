use crate::cache::MediaCache;
use crate::config::ResolverConfig;
use crate::delivery::TrackerSink;
use crate::error::ResolveError;
use crate::fetch::VastFetcher;
use crate::resolver::{CancellationFlag, ResolvedVideoAd, Resolver};
use log::{debug, error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;

struct InFlight {
    cancel: CancellationFlag,
    handle: JoinHandle<()>,
}

/// Runs resolutions for one ad slot, at most one at a time.
///
/// Every `prepare` call invokes its callback exactly once: with the resolved
/// ad, or with `None` on failure or cancellation.
pub struct VastManager {
    config: Arc<ResolverConfig>,
    fetcher: Arc<dyn VastFetcher>,
    sink: Arc<dyn TrackerSink>,
    cache: Arc<dyn MediaCache>,
    in_flight: Option<InFlight>,
}

impl VastManager {
    pub fn new(
        config: ResolverConfig,
        fetcher: Arc<dyn VastFetcher>,
        sink: Arc<dyn TrackerSink>,
        cache: Arc<dyn MediaCache>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            fetcher,
            sink,
            cache,
            in_flight: None,
        }
    }

    /// Start resolving `raw_vast`, cancelling any resolution already running.
    /// Must be called from within a tokio runtime.
    pub fn prepare<F>(&mut self, raw_vast: String, dsp_creative_id: Option<String>, callback: F)
    where
        F: FnOnce(Option<ResolvedVideoAd>) + Send + 'static,
    {
        self.cancel();

        let cancel = CancellationFlag::new();
        let config = Arc::clone(&self.config);
        let fetcher = Arc::clone(&self.fetcher);
        let sink = Arc::clone(&self.sink);
        let cache = Arc::clone(&self.cache);
        let flag = cancel.clone();

        let handle = tokio::task::spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                prepare_blocking(
                    &config,
                    fetcher.as_ref(),
                    sink.as_ref(),
                    cache.as_ref(),
                    &flag,
                    &raw_vast,
                    dsp_creative_id,
                )
            }));
            match outcome {
                Ok(Ok(ad)) => callback(Some(ad)),
                Ok(Err(ResolveError::Cancelled)) => {
                    debug!("Preparation cancelled");
                    callback(None)
                }
                Ok(Err(e)) => {
                    info!("No playable ad: {}", e);
                    callback(None)
                }
                Err(_) => {
                    error!("Resolution worker panicked");
                    callback(None)
                }
            }
        });

        self.in_flight = Some(InFlight { cancel, handle });
    }

    /// Cancel the running resolution, if any. Its callback receives `None`.
    pub fn cancel(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            if !in_flight.handle.is_finished() {
                debug!("Cancelling in-flight resolution");
            }
            in_flight.cancel.cancel();
        }
    }

    pub fn is_preparing(&self) -> bool {
        self.in_flight
            .as_ref()
            .is_some_and(|in_flight| !in_flight.handle.is_finished())
    }
}

impl Drop for VastManager {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn prepare_blocking(
    config: &ResolverConfig,
    fetcher: &dyn VastFetcher,
    sink: &dyn TrackerSink,
    cache: &dyn MediaCache,
    cancel: &CancellationFlag,
    raw_vast: &str,
    dsp_creative_id: Option<String>,
) -> Result<ResolvedVideoAd, ResolveError> {
    if !cache.is_initialized() {
        warn!("Media cache is not initialized, dropping VAST response");
        return Err(ResolveError::CacheUnavailable);
    }

    let mut ad = Resolver::new(config, fetcher, sink)
        .with_cancellation(cancel.clone())
        .resolve(raw_vast)?;
    if cancel.is_cancelled() {
        return Err(ResolveError::Cancelled);
    }

    ad.dsp_creative_id = dsp_creative_id;
    if cache.has(&ad.media_file_url) {
        let path = cache.path_for(&ad.media_file_url);
        debug!("Media {} already cached at {}", ad.media_file_url, path);
        ad.disk_media_file_path = Some(path);
    }
    Ok(ad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DirectoryCache;
    use crate::delivery::RecordingSink;
    use crate::fetch::FetchResponse;
    use tokio::sync::oneshot;

    const INLINE: &str = r#"<VAST version="3.0"><Ad><InLine>
        <Error>https://t/err</Error>
        <Creatives><Creative><Linear>
          <MediaFiles><MediaFile type="video/mp4" width="640" height="360">https://cdn/v.mp4</MediaFile></MediaFiles>
        </Linear></Creative></Creatives>
    </InLine></Ad></VAST>"#;

    struct StaticFetcher;

    impl VastFetcher for StaticFetcher {
        fn fetch(&self, _url: &str) -> crate::error::Result<FetchResponse> {
            Ok(FetchResponse::ok(INLINE))
        }
    }

    fn manager(cache: DirectoryCache, sink: Arc<RecordingSink>) -> VastManager {
        VastManager::new(ResolverConfig::default(), Arc::new(StaticFetcher), sink, Arc::new(cache))
    }

    #[tokio::test]
    async fn prepares_and_marks_cached_media() {
        let dir = tempfile::tempdir().expect("temp dir");
        let cache = DirectoryCache::open(dir.path()).expect("cache");
        let cached = cache.insert("https://cdn/v.mp4", b"video").expect("insert");
        let mut manager = manager(cache, Arc::new(RecordingSink::default()));

        let (tx, rx) = oneshot::channel();
        manager.prepare(INLINE.to_string(), Some("dsp-1".into()), move |ad| {
            let _ = tx.send(ad);
        });
        let ad = rx.await.expect("callback").expect("ad");
        assert_eq!(ad.dsp_creative_id.as_deref(), Some("dsp-1"));
        assert_eq!(ad.disk_media_file_path, Some(cached.display().to_string()));
    }

    struct PanickingFetcher;

    impl VastFetcher for PanickingFetcher {
        fn fetch(&self, url: &str) -> crate::error::Result<FetchResponse> {
            panic!("fetcher exploded on {}", url);
        }
    }

    #[tokio::test]
    async fn worker_panic_still_reports_none() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut manager = VastManager::new(
            ResolverConfig::default(),
            Arc::new(PanickingFetcher),
            Arc::new(RecordingSink::default()),
            Arc::new(DirectoryCache::open(dir.path()).expect("cache")),
        );
        let wrapper = "<VAST><Ad><Wrapper><VASTAdTagURI>https://ads/next</VASTAdTagURI></Wrapper></Ad></VAST>";

        let (tx, rx) = oneshot::channel();
        manager.prepare(wrapper.to_string(), None, move |ad| {
            let _ = tx.send(ad);
        });
        assert!(rx.await.expect("callback").is_none());
    }

    #[tokio::test]
    async fn oversized_duration_yields_an_ad_without_duration() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut manager = manager(DirectoryCache::open(dir.path()).expect("cache"), Arc::new(RecordingSink::default()));
        let doc = INLINE.replace("<Linear>", "<Linear><Duration>18446744073709551:00:00</Duration>");

        let (tx, rx) = oneshot::channel();
        manager.prepare(doc, None, move |ad| {
            let _ = tx.send(ad);
        });
        let ad = rx.await.expect("callback").expect("ad");
        assert_eq!(ad.duration_ms, None);
    }

    #[tokio::test]
    async fn uninitialized_cache_yields_none() {
        let sink = Arc::new(RecordingSink::default());
        let mut manager = manager(DirectoryCache::uninitialized(), sink.clone());

        let (tx, rx) = oneshot::channel();
        manager.prepare(INLINE.to_string(), None, move |ad| {
            let _ = tx.send(ad);
        });
        assert!(rx.await.expect("callback").is_none());
        assert!(sink.urls().is_empty());
    }
}
