use crate::config::ProviderConfig;
use crate::error::FeedError;
use log::debug;
use reqwest::header::{HeaderMap, HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Boxed future returned by [`StatusFeed`] methods
pub type FeedFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, FeedError>> + Send + 'a>>;

/// Cache validators carried from one successful incidents fetch to the next
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidators {
    /// Value of the last `ETag` response header, sent back as `If-None-Match`
    pub etag: Option<String>,
    /// Value of the last `Last-Modified` response header, sent back as `If-Modified-Since`
    pub last_modified: Option<String>,
}

impl CacheValidators {
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: HeaderName| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
        };
        Self {
            etag: header(ETAG),
            last_modified: header(LAST_MODIFIED),
        }
    }
}

/// Result of a conditional incidents fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IncidentsResponse {
    /// Server answered `304 Not Modified`
    NotModified,
    /// Fresh body together with the validators to use next time
    Modified {
        body: Vec<u8>,
        validators: CacheValidators,
    },
}

/// Source of a single provider's status documents
pub trait StatusFeed: Send + Sync {
    /// Fetch the incidents document, presenting `validators` as conditional headers
    fn fetch_incidents<'a>(
        &'a self,
        validators: &'a CacheValidators,
    ) -> FeedFuture<'a, IncidentsResponse>;

    /// Fetch the provider-wide summary document
    fn fetch_summary(&self) -> FeedFuture<'_, Vec<u8>>;
}

/// Status feed served over HTTP from a status page's JSON API
///
/// Every request holds a permit from a semaphore shared by all feeds, which caps
/// the number of requests in flight across providers.
pub struct HttpFeed {
    client: Client,
    permits: Arc<Semaphore>,
    incidents_url: String,
    summary_url: String,
}

impl HttpFeed {
    pub fn new(client: Client, permits: Arc<Semaphore>, provider: &ProviderConfig) -> Self {
        Self {
            client,
            permits,
            incidents_url: provider.incidents_url(),
            summary_url: provider.summary_url(),
        }
    }

    pub fn incidents_url(&self) -> &str {
        &self.incidents_url
    }

    pub fn summary_url(&self) -> &str {
        &self.summary_url
    }

    async fn get_incidents(
        &self,
        validators: &CacheValidators,
    ) -> Result<IncidentsResponse, FeedError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FeedError::PoolClosed)?;

        let mut request = self.client.get(&self.incidents_url);
        if let Some(etag) = &validators.etag {
            request = request.header(IF_NONE_MATCH, etag.as_str());
        }
        if let Some(last_modified) = &validators.last_modified {
            request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(IncidentsResponse::NotModified);
        }
        if !status.is_success() {
            return Err(FeedError::UnexpectedStatus(status.as_u16()));
        }

        let validators = CacheValidators::from_headers(response.headers());
        let body = response.bytes().await.map_err(classify)?;
        debug!(
            "Fetched {} ({} bytes, etag: {:?})",
            self.incidents_url,
            body.len(),
            validators.etag
        );

        Ok(IncidentsResponse::Modified {
            body: body.to_vec(),
            validators,
        })
    }

    async fn get_summary(&self) -> Result<Vec<u8>, FeedError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| FeedError::PoolClosed)?;

        let response = self
            .client
            .get(&self.summary_url)
            .send()
            .await
            .map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::UnexpectedStatus(status.as_u16()));
        }

        Ok(response.bytes().await.map_err(classify)?.to_vec())
    }
}

impl StatusFeed for HttpFeed {
    fn fetch_incidents<'a>(
        &'a self,
        validators: &'a CacheValidators,
    ) -> FeedFuture<'a, IncidentsResponse> {
        Box::pin(self.get_incidents(validators))
    }

    fn fetch_summary(&self) -> FeedFuture<'_, Vec<u8>> {
        Box::pin(self.get_summary())
    }
}

fn classify(error: reqwest::Error) -> FeedError {
    if error.is_timeout() {
        FeedError::Timeout
    } else {
        FeedError::Http(error)
    }
}
