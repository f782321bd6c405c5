use std::time::{Duration, Instant};

use futures::Stream;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Method, RequestBuilder, Response, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::{AuthScheme, RelayConfig};
use crate::error::{Error, Result};
use crate::observability::{CLIENT_REQUESTS, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS};
use crate::sse::process_sse;
use crate::types::{
    AgentStreamEvent, AgentThread, CreateMessageParams, CreateRunParams, ListMessagesParams,
    ListResponse, Run, ThreadId, ThreadMessage,
};

/// Client for the hosted agents REST API.
///
/// Cloning is cheap; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct FoundryClient {
    client: ReqwestClient,
    headers: HeaderMap,
    endpoint: Url,
    api_version: String,
    timeout: Duration,
}

impl FoundryClient {
    /// Create a new client from a resolved configuration.
    ///
    /// `request_timeout` bounds connecting and every plain request.  Streamed
    /// runs are only bounded by the caller, since a reply may legitimately
    /// take longer than any single request.
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            headers: default_headers(&config.api_key, config.auth)?,
            endpoint: config.endpoint.clone(),
            api_version: config.api_version.clone(),
            timeout: config.request_timeout,
        })
    }

    /// Build the URL for `path` relative to the endpoint.
    fn url(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = self.endpoint.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api-version", &self.api_version);
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.streaming_request(method, url).timeout(self.timeout)
    }

    fn streaming_request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client.request(method, url).headers(self.headers.clone())
    }

    /// Send a request and map transport failures and error statuses.
    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        CLIENT_REQUESTS.click();
        let start = Instant::now();
        let result = request.send().await;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        let response = result.map_err(|e| {
            CLIENT_REQUEST_ERRORS.click();
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {e}"),
                    Some(self.timeout.as_secs_f64()),
                )
            } else if e.is_connect() {
                Error::connection(format!("Connection error: {e}"), Some(Box::new(e)))
            } else {
                Error::http_client(format!("Request failed: {e}"), Some(Box::new(e)))
            }
        })?;

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(process_error_response(response).await);
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.execute(request).await?;
        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {e}"),
                    Some(self.timeout.as_secs_f64()),
                )
            } else {
                Error::serialization(
                    format!("Failed to parse response: {e}"),
                    Some(Box::new(e)),
                )
            }
        })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let url = self.url(path, &[])?;
        self.send_json(self.request(Method::POST, url).json(body)).await
    }

    /// Create a new, empty conversation thread.
    pub async fn create_thread(&self) -> Result<AgentThread> {
        self.post("threads", &serde_json::json!({})).await
    }

    /// Delete a thread and its messages.
    pub async fn delete_thread(&self, thread_id: &ThreadId) -> Result<()> {
        let url = self.url(&format!("threads/{thread_id}"), &[])?;
        self.execute(self.request(Method::DELETE, url)).await?;
        Ok(())
    }

    /// Append a message to a thread.
    pub async fn create_message(
        &self,
        thread_id: &ThreadId,
        params: &CreateMessageParams,
    ) -> Result<ThreadMessage> {
        self.post(&format!("threads/{thread_id}/messages"), params).await
    }

    /// List the messages of a thread.
    pub async fn list_messages(
        &self,
        thread_id: &ThreadId,
        params: &ListMessagesParams,
    ) -> Result<ListResponse<ThreadMessage>> {
        let url = self.url(&format!("threads/{thread_id}/messages"), &params.query_pairs())?;
        self.send_json(self.request(Method::GET, url)).await
    }

    /// Start a run without streaming.
    pub async fn create_run(&self, thread_id: &ThreadId, params: &CreateRunParams) -> Result<Run> {
        let mut params = params.clone();
        params.stream = false;
        self.post(&format!("threads/{thread_id}/runs"), &params).await
    }

    /// Start a run and stream its events.
    ///
    /// The returned stream owns the HTTP response; dropping it closes the
    /// connection.  No whole-request timeout applies.
    pub async fn stream_run(
        &self,
        thread_id: &ThreadId,
        params: &CreateRunParams,
    ) -> Result<impl Stream<Item = Result<AgentStreamEvent>> + Send + 'static> {
        let mut params = params.clone();
        params.stream = true;

        let url = self.url(&format!("threads/{thread_id}/runs"), &[])?;
        let request = self
            .streaming_request(Method::POST, url)
            .header(header::ACCEPT, HeaderValue::from_static("text/event-stream"))
            .json(&params);
        let response = self.execute(request).await?;

        Ok(process_sse(response.bytes_stream()))
    }

    /// Fetch the current state of a run.
    pub async fn get_run(&self, thread_id: &ThreadId, run_id: &str) -> Result<Run> {
        let url = self.url(&format!("threads/{thread_id}/runs/{run_id}"), &[])?;
        self.send_json(self.request(Method::GET, url)).await
    }

    /// Request cancellation of a run.
    pub async fn cancel_run(&self, thread_id: &ThreadId, run_id: &str) -> Result<Run> {
        self.post(
            &format!("threads/{thread_id}/runs/{run_id}/cancel"),
            &serde_json::json!({}),
        )
        .await
    }
}

/// Create the headers sent with every request.
fn default_headers(api_key: &str, auth: AuthScheme) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

    let (name, value) = match auth {
        AuthScheme::Bearer => (header::AUTHORIZATION, format!("Bearer {api_key}")),
        AuthScheme::ApiKey => (header::HeaderName::from_static("api-key"), api_key.to_string()),
    };
    let mut value = HeaderValue::from_str(&value).map_err(|_| {
        Error::configuration(
            "access key contains characters that cannot be sent in a header",
            Some(crate::config::API_KEY_VAR.to_string()),
        )
    })?;
    value.set_sensitive(true);
    headers.insert(name, value);
    Ok(headers)
}

/// Process API response errors and convert to our Error type
async fn process_error_response(response: Response) -> Error {
    let status = response.status();
    let status_code = status.as_u16();

    let request_id = response
        .headers()
        .get("x-request-id")
        .or_else(|| response.headers().get("apim-request-id"))
        .and_then(|val| val.to_str().ok())
        .map(String::from);

    let retry_after = response
        .headers()
        .get("retry-after")
        .and_then(|val| val.to_str().ok())
        .and_then(|val| val.parse::<u64>().ok());

    #[derive(Deserialize)]
    struct ErrorResponse {
        error: Option<ErrorDetail>,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        code: Option<String>,
        message: Option<String>,
        param: Option<String>,
    }

    let error_body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            return Error::http_client(
                format!("Failed to read error response: {e}"),
                Some(Box::new(e)),
            );
        }
    };

    let detail = serde_json::from_str::<ErrorResponse>(&error_body)
        .ok()
        .and_then(|e| e.error);
    let error_code = detail.as_ref().and_then(|e| e.code.clone());
    let error_param = detail.as_ref().and_then(|e| e.param.clone());
    let error_message = detail
        .and_then(|e| e.message)
        .unwrap_or_else(|| error_body.clone());

    match status_code {
        400 => Error::bad_request(error_message, error_param),
        401 => Error::authentication(error_message),
        403 => Error::permission(error_message),
        404 => Error::not_found(error_message, None, None),
        408 => Error::timeout(error_message, None),
        429 => Error::rate_limit(error_message, retry_after),
        500 => Error::internal_server(error_message, request_id),
        502..=504 => Error::service_unavailable(error_message, retry_after),
        _ => Error::api(status_code, error_code, error_message, request_id),
    }
}
