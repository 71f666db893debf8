//! API client and request dispatcher
//!
//! [`GpuCloudClient::dispatch`] is the single primitive every typed call goes
//! through: build a [`RequestContext`], run it through a snapshot of the
//! request middleware down to the network call, run the response middleware,
//! then decode either the JSON payload or the error envelope.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gpucloud_common::resilience::{RetryObserver, RetryPolicy};
use gpucloud_common::ClassifiedError;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::auth::CredentialStore;
use crate::config::ClientConfig;
use crate::errors::ApiError;
use crate::middleware::{
    build_request_chain, build_response_chain, AuthMiddleware, ErrorClassificationMiddleware,
    JsonContentTypeMiddleware, LoggingMiddleware, MiddlewareRegistry, RawResponse, RequestContext,
    RequestHandler, RequestMiddleware, ResponseContext, ResponseHandler, ResponseMiddleware,
    RetryMiddleware, UserAgentMiddleware,
};

/// Token endpoint path relative to the base URL.
pub const TOKEN_PATH: &str = "oauth2/token";

/// State shared by a client, its clones and every request context.
#[derive(Debug)]
pub(crate) struct ClientShared {
    pub(crate) config: ClientConfig,
    pub(crate) http: reqwest::Client,
    pub(crate) credentials: Option<Arc<CredentialStore>>,
    base_url: String,
}

impl ClientShared {
    /// Absolute URL for a path relative to the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

/// Per-call options for [`GpuCloudClient::dispatch`].
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Query parameters, in order
    pub query: Vec<(String, String)>,
    /// Extra headers; middleware may overwrite them
    pub headers: HeaderMap,
    /// Cancels the call, including any retry backoff
    pub cancellation: Option<CancellationToken>,
    /// Timeout overriding the client default
    pub timeout: Option<Duration>,
}

impl CallOptions {
    /// Empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Override the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Successful response of [`GpuCloudClient::dispatch`].
#[derive(Debug, Clone)]
pub struct ApiResponse<T> {
    /// HTTP status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Decoded body; `None` when the body was empty
    pub data: Option<T>,
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// The decoded body. An empty body decodes as JSON `null`, which
    /// succeeds for `()` and `Option<_>` targets.
    ///
    /// # Errors
    /// Returns `ApiError::Decode` if the body was empty and `T` cannot be
    /// built from `null`.
    pub fn into_data(self) -> Result<T, ApiError> {
        match self.data {
            Some(data) => Ok(data),
            None => serde_json::from_value(Value::Null).map_err(ApiError::Decode),
        }
    }
}

/// REST client for the GPU cloud API
///
/// Cheap to clone; clones share configuration, credential cache and
/// middleware registry.
#[derive(Debug, Clone)]
pub struct GpuCloudClient {
    shared: Arc<ClientShared>,
    middleware: Arc<MiddlewareRegistry>,
}

impl GpuCloudClient {
    /// Create a client with the default middleware.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if the configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        Self::builder(config).build()
    }

    /// Start building a client.
    #[must_use]
    pub fn builder(config: ClientConfig) -> GpuCloudClientBuilder {
        GpuCloudClientBuilder::new(config)
    }

    /// Client configuration.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Credential store, when client credentials are configured.
    #[must_use]
    pub fn credentials(&self) -> Option<&Arc<CredentialStore>> {
        self.shared.credentials.as_ref()
    }

    /// Middleware registry. Changes apply to calls dispatched afterwards.
    #[must_use]
    pub fn middleware(&self) -> &MiddlewareRegistry {
        &self.middleware
    }

    /// Perform one API call.
    ///
    /// # Errors
    /// - `ApiError::Encode` if `body` cannot be serialized
    /// - any error raised by the request middleware or the network call
    /// - the error recorded by the response middleware, typically
    ///   `ApiError::Api` for non-2xx answers
    /// - `ApiError::Decode` if a non-empty body does not decode as `T`
    #[instrument(skip(self, body, options), fields(method = %method, path = %path))]
    pub async fn dispatch<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: CallOptions,
    ) -> Result<ApiResponse<T>, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = body.map(serde_json::to_value).transpose().map_err(ApiError::Encode)?;

        let mut ctx = RequestContext::new(Arc::clone(&self.shared), method, path, body)
            .with_cancellation(options.cancellation);
        ctx.query = options.query;
        ctx.headers = options.headers;
        ctx.timeout = options.timeout;

        let snapshot = self.middleware.snapshot();
        let request_chain = build_request_chain(&snapshot.request, Arc::new(NetworkHandler));
        let outcome = request_chain.handle(&mut ctx).await;

        let Some(raw) = ctx.take_response() else {
            return Err(outcome.err().unwrap_or(ApiError::NoResponse));
        };

        let mut response = ResponseContext::new(ctx, raw, outcome.err());
        let response_chain = build_response_chain(&snapshot.response, Arc::new(ResponseTerminal));
        response_chain.handle(&mut response).await?;

        if let Some(error) = response.error {
            return Err(error);
        }
        if !response.status.is_success() {
            return Err(ApiError::Api(ClassifiedError::from_response(
                response.status.as_u16(),
                &response.body,
            )));
        }

        let data = if response.body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(serde_json::from_slice(&response.body).map_err(ApiError::Decode)?)
        };

        Ok(ApiResponse { status: response.status, headers: response.headers, data })
    }

    /// `GET path`, decoding the body.
    ///
    /// # Errors
    /// See [`Self::dispatch`].
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.dispatch::<Value, T>(Method::GET, path, None, CallOptions::default())
            .await?
            .into_data()
    }

    /// `GET path?query`, decoding the body.
    ///
    /// # Errors
    /// See [`Self::dispatch`].
    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let options = query
            .iter()
            .fold(CallOptions::default(), |options, (key, value)| options.query(*key, *value));
        self.dispatch::<Value, T>(Method::GET, path, None, options).await?.into_data()
    }

    /// `POST path` with a JSON body, decoding the response.
    ///
    /// # Errors
    /// See [`Self::dispatch`].
    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.dispatch(Method::POST, path, Some(body), CallOptions::default()).await?.into_data()
    }

    /// `PUT path` with a JSON body, decoding the response.
    ///
    /// # Errors
    /// See [`Self::dispatch`].
    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.dispatch(Method::PUT, path, Some(body), CallOptions::default()).await?.into_data()
    }

    /// `PATCH path` with a JSON body, decoding the response.
    ///
    /// # Errors
    /// See [`Self::dispatch`].
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.dispatch(Method::PATCH, path, Some(body), CallOptions::default()).await?.into_data()
    }

    /// `DELETE path`, discarding any response body.
    ///
    /// # Errors
    /// See [`Self::dispatch`].
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.dispatch::<Value, Value>(Method::DELETE, path, None, CallOptions::default())
            .await
            .map(|_| ())
    }
}

/// Builder for [`GpuCloudClient`].
pub struct GpuCloudClientBuilder {
    config: ClientConfig,
    http: Option<reqwest::Client>,
    request_middleware: Option<Vec<Arc<dyn RequestMiddleware>>>,
    response_middleware: Option<Vec<Arc<dyn ResponseMiddleware>>>,
    retry_observer: Option<Arc<dyn RetryObserver>>,
}

impl std::fmt::Debug for GpuCloudClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuCloudClientBuilder")
            .field("config", &self.config)
            .field("custom_request_middleware", &self.request_middleware.as_ref().map(Vec::len))
            .field("custom_response_middleware", &self.response_middleware.as_ref().map(Vec::len))
            .finish_non_exhaustive()
    }
}

impl GpuCloudClientBuilder {
    fn new(config: ClientConfig) -> Self {
        Self {
            config,
            http: None,
            request_middleware: None,
            response_middleware: None,
            retry_observer: None,
        }
    }

    /// Use a preconfigured `reqwest` client instead of building one.
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Register these request middleware instead of the defaults.
    #[must_use]
    pub fn request_middleware(mut self, middleware: Vec<Arc<dyn RequestMiddleware>>) -> Self {
        self.request_middleware = Some(middleware);
        self
    }

    /// Register these response middleware instead of the defaults.
    #[must_use]
    pub fn response_middleware(mut self, middleware: Vec<Arc<dyn ResponseMiddleware>>) -> Self {
        self.response_middleware = Some(middleware);
        self
    }

    /// Diagnostic sink for the default retry middleware.
    #[must_use]
    pub fn retry_observer(mut self, observer: Arc<dyn RetryObserver>) -> Self {
        self.retry_observer = Some(observer);
        self
    }

    /// Validate the configuration and build the client.
    ///
    /// # Errors
    /// Returns `ApiError::Config` if validation fails or the HTTP client
    /// cannot be built.
    pub fn build(self) -> Result<GpuCloudClient, ApiError> {
        self.config.validate()?;

        let http = match self.http {
            Some(client) => client,
            None => reqwest::Client::builder()
                .timeout(self.config.timeout())
                .build()
                .map_err(|e| ApiError::Config(format!("Failed to build HTTP client: {e}")))?,
        };

        let base_url = self.config.base_url.trim_end_matches('/').to_string();
        let credentials = match (&self.config.client_id, &self.config.client_secret) {
            (Some(id), Some(secret)) => Some(Arc::new(
                CredentialStore::new(http.clone(), format!("{base_url}/{TOKEN_PATH}"), id, secret)
                    .with_static_token(self.config.bearer_token.clone()),
            )),
            _ => None,
        };

        let request = self
            .request_middleware
            .unwrap_or_else(|| default_request_middleware(&self.config, self.retry_observer));
        let response =
            self.response_middleware.unwrap_or_else(|| default_response_middleware(&self.config));

        let registry = MiddlewareRegistry::new();
        registry.set_request(request);
        registry.set_response(response);

        info!(
            base_url = %base_url,
            client_credentials = credentials.is_some(),
            max_retries = self.config.max_retries,
            request_middleware = registry.request_count(),
            response_middleware = registry.response_count(),
            "GPU cloud client initialized"
        );

        Ok(GpuCloudClient {
            shared: Arc::new(ClientShared { config: self.config, http, credentials, base_url }),
            middleware: Arc::new(registry),
        })
    }
}

/// Default request side: `[retry?, auth, content type, user agent, logging?]`.
///
/// Retry sits outermost so every attempt re-runs authentication.
#[must_use]
pub fn default_request_middleware(
    config: &ClientConfig,
    retry_observer: Option<Arc<dyn RetryObserver>>,
) -> Vec<Arc<dyn RequestMiddleware>> {
    let mut middleware: Vec<Arc<dyn RequestMiddleware>> = Vec::new();
    if config.max_retries > 0 {
        let mut policy = RetryPolicy::new(config.max_retries, config.retry_initial_delay());
        if let Some(observer) = retry_observer {
            policy = policy.with_observer(observer);
        }
        middleware.push(Arc::new(RetryMiddleware::new(policy)));
    }
    middleware.push(Arc::new(AuthMiddleware));
    middleware.push(Arc::new(JsonContentTypeMiddleware));
    middleware.push(Arc::new(UserAgentMiddleware::new(config.user_agent.as_deref())));
    if config.verbose {
        middleware.push(Arc::new(LoggingMiddleware));
    }
    middleware
}

/// Default response side: `[error classification, logging?]`.
#[must_use]
pub fn default_response_middleware(config: &ClientConfig) -> Vec<Arc<dyn ResponseMiddleware>> {
    let mut middleware: Vec<Arc<dyn ResponseMiddleware>> =
        vec![Arc::new(ErrorClassificationMiddleware)];
    if config.verbose {
        middleware.push(Arc::new(LoggingMiddleware));
    }
    middleware
}

/// Terminal request handler performing the HTTP exchange.
struct NetworkHandler;

#[async_trait]
impl RequestHandler for NetworkHandler {
    async fn handle(&self, ctx: &mut RequestContext) -> Result<(), ApiError> {
        ctx.clear_response();

        let shared = ctx.shared();
        let url = shared.endpoint(&ctx.path);
        let mut builder =
            shared.http.request(ctx.method.clone(), &url).headers(ctx.headers.clone());
        if !ctx.query.is_empty() {
            builder = builder.query(&ctx.query);
        }
        if let Some(body) = &ctx.body {
            builder = builder.body(serde_json::to_vec(body).map_err(ApiError::Encode)?);
        }
        if let Some(timeout) = ctx.timeout {
            builder = builder.timeout(timeout);
        }

        let exchange = async move {
            let response = builder.send().await?;
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await?.to_vec();
            Ok::<_, reqwest::Error>(RawResponse { status, headers, body })
        };

        let raw = match ctx.cancellation().cloned() {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => {
                        debug!(url = %url, "request cancelled in flight");
                        return Err(ApiError::Cancelled);
                    }
                    result = exchange => result,
                }
            }
            None => exchange.await,
        }
        .map_err(ApiError::from_transport)?;

        debug!(
            url = %url,
            status = raw.status.as_u16(),
            bytes = raw.body.len(),
            "received HTTP response"
        );
        ctx.set_response(raw);
        Ok(())
    }
}

/// Terminal response handler.
struct ResponseTerminal;

#[async_trait]
impl ResponseHandler for ResponseTerminal {
    async fn handle(&self, _ctx: &mut ResponseContext) -> Result<(), ApiError> {
        Ok(())
    }
}
