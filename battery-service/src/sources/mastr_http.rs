use std::{sync::Arc, time::Duration};

use async_stream::try_stream;
use reqwest::{
    header::{HeaderValue, ACCEPT},
    StatusCode,
};
use serde_json::Value;

use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};

/// Production listing endpoint for extended public generation/storage units.
pub const DEFAULT_BASE_URL: &str = "https://www.marktstammdatenregister.de/MaStR/Einheit/EinheitJson/GetErweiterteOeffentlicheEinheitStromerzeugung";

const API_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const MORE_DATA_CODE: &str = "OkWeitereDatenVorhanden";

/// One page of the registry listing.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ListingPage {
    #[serde(rename = "Data", default)]
    pub data: Option<Vec<Value>>,
    #[serde(rename = "Total", default)]
    pub total: Option<u64>,
    #[serde(rename = "Ergebniscode", default)]
    pub result_code: Option<String>,
}

impl ListingPage {
    pub fn len(&self) -> usize {
        self.data.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The provider's result code wins when present; otherwise a full page
    /// means there may be another one.
    pub fn has_more(&self, page_size: u32) -> bool {
        if self.is_empty() {
            return false;
        }
        match &self.result_code {
            Some(code) => code == MORE_DATA_CODE,
            None => self.len() >= page_size as usize,
        }
    }
}

/// Builds the registry's `~`-separated filter expression. It is a coarse
/// prefilter: thresholds are re-applied exactly after parsing.
pub fn registry_filter(min_power_kw: f64, min_capacity_kwh: f64, storage_technology: Option<u32>) -> String {
    let mut clauses = Vec::new();
    if min_power_kw > 0.0 {
        clauses.push(format!(
            "Bruttoleistung der Einheit~gt~{}",
            min_power_kw.floor() as i64 - 1
        ));
    }
    if min_capacity_kwh > 0.0 {
        clauses.push(format!(
            "Nutzbare Speicherkapazität in kWh~gt~{}",
            min_capacity_kwh.floor() as i64 - 1
        ));
    }
    if let Some(code) = storage_technology {
        clauses.push(format!("Stromspeichertechnologie~eq~{code}"));
    }
    clauses.join("~and~")
}

/// `base * 2^(attempt-1)`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.checked_mul(1u32 << exp).unwrap_or(max).min(max)
}

enum FetchFailure {
    Auth(String),
    Transient(String),
    Fatal(String),
}

/// Registry HTTP client: one listing page per call, with retries.
pub struct MastrClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
    retry_backoff: Duration,
    max_backoff: Duration,
}

impl MastrClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        timeout: Duration,
        max_retries: u32,
        retry_backoff: Duration,
        max_backoff: Duration,
    ) -> Result<Self, PipelineError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(PipelineError::Auth("MASTR_API_KEY is not set".to_string()));
        }
        if HeaderValue::from_str(api_key).is_err() {
            return Err(PipelineError::Auth(
                "MASTR_API_KEY contains characters not allowed in a header".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::Source(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
            max_retries,
            retry_backoff,
            max_backoff,
        })
    }

    /// Fetches one page, retrying transient failures with exponential backoff.
    pub async fn fetch_page(&self, filter: &str, page: u32, page_size: u32) -> Result<ListingPage, PipelineError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.request_page(filter, page, page_size).await {
                Ok(body) => {
                    metrics::counter!("mastr_pages_fetched_total").increment(1);
                    return Ok(body);
                }
                Err(FetchFailure::Auth(message)) => {
                    tracing::error!(page, %message, "registry rejected credentials");
                    return Err(PipelineError::Auth(message));
                }
                Err(FetchFailure::Fatal(message)) => {
                    tracing::error!(page, %message, "registry request failed");
                    return Err(PipelineError::Source(message));
                }
                Err(FetchFailure::Transient(message)) if attempt <= self.max_retries => {
                    let sleep_for = backoff_delay(self.retry_backoff, self.max_backoff, attempt);
                    tracing::warn!(
                        page,
                        attempt,
                        error = %message,
                        backoff_ms = sleep_for.as_millis() as u64,
                        "registry page fetch failed, retrying with backoff"
                    );
                    metrics::counter!("mastr_fetch_retries_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(FetchFailure::Transient(message)) => {
                    tracing::error!(page, attempt, error = %message, "registry page fetch failed, giving up");
                    return Err(PipelineError::TransientFetch {
                        page,
                        attempts: attempt,
                        message,
                    });
                }
            }
        }
    }

    async fn request_page(&self, filter: &str, page: u32, page_size: u32) -> Result<ListingPage, FetchFailure> {
        let mut query: Vec<(&str, String)> = Vec::with_capacity(3);
        if !filter.is_empty() {
            query.push(("filter", filter.to_string()));
        }
        query.push(("page", page.to_string()));
        query.push(("pageSize", page_size.to_string()));

        let resp = self
            .http
            .get(&self.base_url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .header(ACCEPT, "application/json")
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    FetchFailure::Fatal(e.to_string())
                } else {
                    FetchFailure::Transient(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchFailure::Auth(format!("registry answered {status}")));
        }
        if status.is_server_error()
            || status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::REQUEST_TIMEOUT
        {
            return Err(FetchFailure::Transient(format!("registry answered {status}")));
        }
        if !status.is_success() {
            return Err(FetchFailure::Fatal(format!("registry answered {status}")));
        }

        resp.json::<ListingPage>()
            .await
            .map_err(|e| FetchFailure::Transient(format!("invalid listing body: {e}")))
    }
}

/// Streams raw registry records page by page until the provider signals the
/// end or `max_pages` is reached.
pub struct MastrHttpSource {
    client: Arc<MastrClient>,
    filter: String,
    page_size: u32,
    max_pages: u32,
}

impl MastrHttpSource {
    pub fn new(client: Arc<MastrClient>, filter: String, page_size: u32, max_pages: u32) -> Self {
        Self {
            client,
            filter,
            page_size: page_size.max(1),
            max_pages,
        }
    }
}

#[async_trait::async_trait]
impl Source<Value> for MastrHttpSource {
    async fn stream(&self) -> EnvelopeStream<Value> {
        let client = self.client.clone();
        let filter = self.filter.clone();
        let page_size = self.page_size;
        let max_pages = self.max_pages;

        let s = try_stream! {
            tracing::info!(filter = %filter, page_size, max_pages, "starting registry fetch");
            let mut page: u32 = 1;
            while page <= max_pages {
                let body = client.fetch_page(&filter, page, page_size).await?;
                let more = body.has_more(page_size);
                let records = body.data.unwrap_or_default();
                tracing::info!(page, records = records.len(), total = ?body.total, "fetched registry page");
                metrics::counter!("mastr_records_received_total").increment(records.len() as u64);

                for record in records {
                    yield Envelope::new(record, page);
                }

                if !more {
                    tracing::info!(page, "last registry page reached");
                    break;
                }
                if page == max_pages {
                    tracing::warn!(max_pages, "page limit reached while registry reports more data");
                }
                page += 1;
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;
    use wiremock::{
        matchers::{header, method, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn client(server: &MockServer, max_retries: u32) -> Arc<MastrClient> {
        Arc::new(
            MastrClient::new(
                &server.uri(),
                "test-key",
                Duration::from_secs(5),
                max_retries,
                Duration::from_millis(1),
                Duration::from_millis(4),
            )
            .unwrap(),
        )
    }

    fn records(ids: &[&str]) -> Vec<Value> {
        ids.iter().map(|id| json!({ "EinheitMastrNummer": id })).collect()
    }

    async fn drain(source: &MastrHttpSource) -> (Vec<Value>, Option<PipelineError>) {
        let mut stream = source.stream().await;
        let mut out = Vec::new();
        while let Some(item) = stream.next().await {
            match item {
                Ok(env) => out.push(env.payload),
                Err(e) => return (out, Some(e)),
            }
        }
        (out, None)
    }

    #[test]
    fn filter_expression_matches_registry_syntax() {
        assert_eq!(
            registry_filter(1000.0, 5000.0, Some(524)),
            "Bruttoleistung der Einheit~gt~999~and~Nutzbare Speicherkapazität in kWh~gt~4999~and~Stromspeichertechnologie~eq~524"
        );
        assert_eq!(registry_filter(0.0, 0.0, Some(524)), "Stromspeichertechnologie~eq~524");
        assert_eq!(registry_filter(0.0, 0.0, None), "");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let max = Duration::from_millis(350);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, max, 3), max);
        assert_eq!(backoff_delay(base, max, 40), max);
    }

    #[test]
    fn result_code_overrides_page_size_heuristic() {
        let full_but_done = ListingPage {
            data: Some(records(&["a", "b"])),
            total: Some(2),
            result_code: Some("Ok".to_string()),
        };
        assert!(!full_but_done.has_more(2));

        let short_but_more = ListingPage {
            data: Some(records(&["a"])),
            total: None,
            result_code: Some(MORE_DATA_CODE.to_string()),
        };
        assert!(short_but_more.has_more(2));

        let no_code = ListingPage {
            data: Some(records(&["a", "b"])),
            total: None,
            result_code: None,
        };
        assert!(no_code.has_more(2));
        assert!(!ListingPage::default().has_more(2));
    }

    #[test]
    fn empty_api_key_is_auth_error() {
        let res = MastrClient::new(
            DEFAULT_BASE_URL,
            "  ",
            Duration::from_secs(1),
            0,
            Duration::from_millis(1),
            Duration::from_millis(1),
        );
        assert!(matches!(res, Err(PipelineError::Auth(_))));
    }

    #[tokio::test]
    async fn paginates_until_provider_signals_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("Ocp-Apim-Subscription-Key", "test-key"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Data": records(&["u1", "u2"]),
                "Ergebniscode": "OkWeitereDatenVorhanden"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Data": records(&["u3"]),
                "Ergebniscode": "OK"
            })))
            .mount(&server)
            .await;

        let source = MastrHttpSource::new(client(&server, 0), String::new(), 2, 10);
        let (got, err) = drain(&source).await;

        assert!(err.is_none());
        let ids: Vec<_> = got.iter().map(|v| v["EinheitMastrNummer"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["u1", "u2", "u3"]);
    }

    #[tokio::test]
    async fn stops_at_max_pages_on_looping_api() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Data": records(&["same"]),
                "Ergebniscode": "OkWeitereDatenVorhanden"
            })))
            .expect(3)
            .mount(&server)
            .await;

        let source = MastrHttpSource::new(client(&server, 0), String::new(), 1, 3);
        let (got, err) = drain(&source).await;

        assert!(err.is_none());
        assert_eq!(got.len(), 3);
    }

    #[tokio::test]
    async fn unauthorized_is_fatal_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let source = MastrHttpSource::new(client(&server, 3), String::new(), 10, 10);
        let (got, err) = drain(&source).await;

        assert!(got.is_empty());
        assert!(matches!(err, Some(PipelineError::Auth(_))));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_succeed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "Data": records(&["u1"]),
                "Ergebniscode": "OK"
            })))
            .mount(&server)
            .await;

        let source = MastrHttpSource::new(client(&server, 3), String::new(), 10, 10);
        let (got, err) = drain(&source).await;

        assert!(err.is_none());
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_transient_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let source = MastrHttpSource::new(client(&server, 2), String::new(), 10, 10);
        let (_, err) = drain(&source).await;

        match err {
            Some(PipelineError::TransientFetch { page, attempts, .. }) => {
                assert_eq!(page, 1);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected TransientFetch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn other_client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let source = MastrHttpSource::new(client(&server, 3), String::new(), 10, 10);
        let (_, err) = drain(&source).await;

        assert!(matches!(err, Some(PipelineError::Source(_))));
    }
}
