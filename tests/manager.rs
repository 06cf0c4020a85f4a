use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vast_resolver::cache::DirectoryCache;
use vast_resolver::delivery::RecordingSink;
use vast_resolver::error::Result as VastResult;
use vast_resolver::fetch::{FetchResponse, HttpFetcher, VastFetcher};
use vast_resolver::{ResolvedVideoAd, ResolverConfig, VastManager};

const INLINE: &str = r#"<VAST version="3.0"><Ad id="inline"><InLine>
    <Impression>https://t/imp/inline</Impression>
    <Creatives><Creative><Linear>
      <Duration>00:00:15</Duration>
      <MediaFiles><MediaFile type="video/mp4" width="1280" height="720">https://cdn/v.mp4</MediaFile></MediaFiles>
    </Linear></Creative></Creatives>
</InLine></Ad></VAST>"#;

fn wrapper_to(uri: &str) -> String {
    format!(
        r#"<VAST version="3.0"><Ad><Wrapper>
            <VASTAdTagURI>{uri}</VASTAdTagURI>
            <Impression>https://t/imp/wrapper</Impression>
            <Error>https://t/err/wrapper?c=[ERRORCODE]</Error>
        </Wrapper></Ad></VAST>"#
    )
}

fn prepare(manager: &mut VastManager, raw: String) -> oneshot::Receiver<Option<ResolvedVideoAd>> {
    let (tx, rx) = oneshot::channel();
    manager.prepare(raw, None, move |ad| {
        let _ = tx.send(ad);
    });
    rx
}

/// Answers every request with [`INLINE`] once the test opens the gate.
struct GatedFetcher {
    started: mpsc::UnboundedSender<String>,
    gate: Mutex<std_mpsc::Receiver<()>>,
}

impl VastFetcher for GatedFetcher {
    fn fetch(&self, url: &str) -> VastResult<FetchResponse> {
        let _ = self.started.send(url.to_string());
        let gate = self.gate.lock().expect("gate lock");
        let _ = gate.recv();
        Ok(FetchResponse::ok(INLINE))
    }
}

#[tokio::test]
async fn second_prepare_cancels_the_first() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let (gate_tx, gate_rx) = std_mpsc::channel();
    let fetcher = GatedFetcher {
        started: started_tx,
        gate: Mutex::new(gate_rx),
    };
    let sink = Arc::new(RecordingSink::default());
    let mut manager = VastManager::new(
        ResolverConfig::default(),
        Arc::new(fetcher),
        sink.clone(),
        Arc::new(DirectoryCache::open(dir.path()).expect("cache")),
    );

    let first = prepare(&mut manager, wrapper_to("https://ads/first"));
    assert_eq!(started_rx.recv().await.as_deref(), Some("https://ads/first"));
    assert!(manager.is_preparing());

    let second = prepare(&mut manager, wrapper_to("https://ads/second"));
    gate_tx.send(()).expect("open gate");
    gate_tx.send(()).expect("open gate");

    assert!(first.await.expect("first callback").is_none());
    let ad = second.await.expect("second callback").expect("second ad");
    assert_eq!(ad.media_file_url, "https://cdn/v.mp4");
    assert!(sink.urls().is_empty());
}

#[tokio::test]
async fn cancel_reports_none_without_firing_errors() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let (gate_tx, gate_rx) = std_mpsc::channel();
    let sink = Arc::new(RecordingSink::default());
    let mut manager = VastManager::new(
        ResolverConfig::default(),
        Arc::new(GatedFetcher {
            started: started_tx,
            gate: Mutex::new(gate_rx),
        }),
        sink.clone(),
        Arc::new(DirectoryCache::open(dir.path()).expect("cache")),
    );

    let pending = prepare(&mut manager, wrapper_to("https://ads/slow"));
    started_rx.recv().await.expect("fetch started");
    manager.cancel();
    gate_tx.send(()).expect("open gate");

    assert!(pending.await.expect("callback").is_none());
    assert!(sink.urls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resolves_wrapper_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vast/inline"))
        .respond_with(ResponseTemplate::new(200).set_body_string(INLINE))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("temp dir");
    let sink = Arc::new(RecordingSink::default());
    let config = ResolverConfig::default();
    let fetcher = HttpFetcher::new(config.fetch_timeout).expect("fetcher");
    let mut manager = VastManager::new(
        config,
        Arc::new(fetcher),
        sink.clone(),
        Arc::new(DirectoryCache::open(dir.path()).expect("cache")),
    );

    let raw = wrapper_to(&format!("{}/vast/inline", server.uri()));
    let ad = prepare(&mut manager, raw).await.expect("callback").expect("ad");

    assert_eq!(ad.media_file_url, "https://cdn/v.mp4");
    assert_eq!(ad.duration_ms, Some(15_000));
    let impressions: Vec<&str> = ad.impression_trackers.iter().map(|t| t.url_template()).collect();
    assert_eq!(impressions, vec!["https://t/imp/wrapper", "https://t/imp/inline"]);
    assert!(sink.urls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn http_error_status_reaches_error_trackers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/vast/gone"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().expect("temp dir");
    let sink = Arc::new(RecordingSink::default());
    let config = ResolverConfig::default();
    let fetcher = HttpFetcher::new(config.fetch_timeout).expect("fetcher");
    let mut manager = VastManager::new(
        config,
        Arc::new(fetcher),
        sink.clone(),
        Arc::new(DirectoryCache::open(dir.path()).expect("cache")),
    );

    let raw = wrapper_to(&format!("{}/vast/gone", server.uri()));
    assert!(prepare(&mut manager, raw).await.expect("callback").is_none());
    assert_eq!(sink.urls(), vec!["https://t/err/wrapper?c=503"]);
}
