use crate::error::{Result, VastError};
use log::{debug, info, warn};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::path::Path;
use std::time::{Duration, Instant};

/// Raw answer to a document request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

impl FetchResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches the document behind a `VASTAdTagURI`.
///
/// Called from a worker thread; implementations may block.
pub trait VastFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<FetchResponse>;
}

/// Fetcher backed by an async reqwest client on an existing tokio runtime.
///
/// `fetch` blocks on the runtime handle, so it must run outside of async
/// context, e.g. inside `tokio::task::spawn_blocking`.
pub struct HttpFetcher {
    client: reqwest::Client,
    handle: tokio::runtime::Handle,
}

impl HttpFetcher {
    /// Must be called from within a tokio runtime.
    pub fn new(timeout: Duration) -> Result<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| VastError::Other(format!("No tokio runtime available: {}", e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, handle })
    }
}

impl VastFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse> {
        if let Some(path) = url.strip_prefix("file://") {
            debug!("Reading wrapper target from file: {}", path);
            return Ok(FetchResponse::ok(std::fs::read_to_string(path)?));
        }
        self.handle.block_on(fetch_from_url(&self.client, url))
    }
}

/// Fetch a document over HTTP. Non-success statuses are returned, not raised.
async fn fetch_from_url(client: &reqwest::Client, url: &str) -> Result<FetchResponse> {
    let req_id: String = thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();

    let url = url::Url::parse(url)?;
    debug!("[{}] Fetching from URL: {}", req_id, url);
    let start_time = Instant::now();

    let response = client.get(url).send().await.map_err(|e| {
        warn!("[{}] Request failed after {:?}: {}", req_id, start_time.elapsed(), e);
        VastError::HttpError(e)
    })?;

    let status = response.status().as_u16();
    let body = response.text().await?;
    debug!(
        "[{}] HTTP {} with {} bytes in {:?}",
        req_id,
        status,
        body.len(),
        start_time.elapsed()
    );

    Ok(FetchResponse { status, body })
}

/// Load a document for the command line: a `file://` URL, a local path or an http(s) URL.
pub async fn read_input(input: &str, timeout: Duration) -> Result<String> {
    if let Some(path) = input.strip_prefix("file://") {
        info!("Reading from file: {}", path);
        return Ok(tokio::fs::read_to_string(path).await?);
    }

    if Path::new(input).exists() {
        info!("Reading from local file: {}", input);
        return Ok(tokio::fs::read_to_string(input).await?);
    }

    let client = reqwest::Client::builder().timeout(timeout).build()?;
    let response = fetch_from_url(&client, input).await?;
    if !(200..300).contains(&response.status) {
        return Err(VastError::Other(format!(
            "Failed to fetch URL: HTTP status {}",
            response.status
        )));
    }
    Ok(response.body)
}
