//! HTTP server for the website's form endpoints.

use crate::classify::{estimated_response, next_steps};
use crate::config::Config;
use crate::dispatch::DispatchPolicy;
use crate::error::{AppError, Result};
use crate::mailer::{MailProvider, ResendMailer};
use crate::processor::{Pipeline, RequestMeta};
use crate::rate_limit::{InMemoryRateLimiter, RateLimiter};
use crate::templates::Brand;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{FutureExt, Stream, StreamExt};
use serde_json::{Value, json};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use warp::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ALLOW, CONTENT_LENGTH, CONTENT_SECURITY_POLICY, HeaderMap, HeaderName, HeaderValue,
    ORIGIN, REFERRER_POLICY, RETRY_AFTER, USER_AGENT, VARY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};
use warp::http::{Method, StatusCode};
use warp::hyper::body::Buf;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const ALLOWED_METHODS: &str = "POST, OPTIONS";
const ALLOWED_HEADERS: &str = "Content-Type, Accept";
const QUOTE_CSP: &str = "default-src 'none'; frame-ancestors 'none'";
const PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// The three public forms. Each has its own path and quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FormKind {
    Quote,
    Contact,
    Subscribe,
}

impl FormKind {
    fn path(&self) -> &'static str {
        match self {
            FormKind::Quote => "sendQuote",
            FormKind::Contact => "contact",
            FormKind::Subscribe => "subscribe",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            FormKind::Quote => "quote",
            FormKind::Contact => "contact",
            FormKind::Subscribe => "subscribe",
        }
    }
}

/// Shared, read-only state behind every route.
pub(crate) struct ApiState {
    /// `None` when no mail API key is configured.
    pipeline: Option<Pipeline>,
    brand: Brand,
    quote_limiter: Arc<dyn RateLimiter>,
    contact_limiter: Arc<dyn RateLimiter>,
    subscribe_limiter: Arc<dyn RateLimiter>,
    allowed_origins: Vec<String>,
    max_body_bytes: usize,
    cors_max_age: u64,
}

impl ApiState {
    pub(crate) fn new(pipeline: Option<Pipeline>, config: &Config) -> Self {
        let limiter = |settings: crate::config::RateLimitSettings| -> Arc<dyn RateLimiter> {
            Arc::new(InMemoryRateLimiter::new(
                settings.max_requests,
                settings.window,
            ))
        };
        Self {
            pipeline,
            brand: config.brand.clone(),
            quote_limiter: limiter(config.quote_limit),
            contact_limiter: limiter(config.contact_limit),
            subscribe_limiter: limiter(config.subscribe_limit),
            allowed_origins: config.allowed_origins.clone(),
            max_body_bytes: config.max_body_bytes,
            cors_max_age: config.cors_max_age,
        }
    }

    fn limiter(&self, kind: FormKind) -> &dyn RateLimiter {
        match kind {
            FormKind::Quote => self.quote_limiter.as_ref(),
            FormKind::Contact => self.contact_limiter.as_ref(),
            FormKind::Subscribe => self.subscribe_limiter.as_ref(),
        }
    }

    fn is_allowed_origin(&self, origin: &str) -> bool {
        let origin = origin.trim_end_matches('/');
        self.allowed_origins.iter().any(|o| o == origin)
    }

    async fn purge_limiters(&self) -> usize {
        self.quote_limiter.purge().await
            + self.contact_limiter.purge().await
            + self.subscribe_limiter.purge().await
    }
}

/// Builds the pipeline (if a mail key is configured) and serves until Ctrl-C.
pub(crate) async fn start_api_server(config: Arc<Config>) -> anyhow::Result<()> {
    let pipeline = match &config.mail_api_key {
        Some(key) => {
            let mailer = ResendMailer::new(
                &config.mail_api_url,
                key.expose().to_string(),
                &config.user_agent,
                config.request_timeout,
            )?;
            let provider: Arc<dyn MailProvider> = Arc::new(mailer);
            Some(Pipeline::new(
                provider,
                DispatchPolicy {
                    min_successes: config.min_successes,
                    send_timeout: config.send_timeout,
                },
                config.from_address.clone(),
                config.admin_recipients.clone(),
                config.brand.clone(),
            ))
        }
        None => {
            tracing::error!(target: "api_task",
                "RESEND_API_KEY is not set; form endpoints will answer 500 until it is configured"
            );
            None
        }
    };

    let state = Arc::new(ApiState::new(pipeline, &config));

    let purge_state = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = purge_state.purge_limiters().await;
            if removed > 0 {
                tracing::debug!(target: "api_task", "Purged {} expired rate-limit windows", removed);
            }
        }
    });

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address {}:{}: {}", config.host, config.port, e))?;

    let (bound, server) = warp::serve(routes(state))
        .try_bind_with_graceful_shutdown(addr, async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "api_task", "Shutdown signal received");
        })
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    tracing::info!(target: "api_task", "Starting form API server on {}", bound);
    server.await;
    Ok(())
}

fn with_state(
    state: Arc<ApiState>,
) -> impl Filter<Extract = (Arc<ApiState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// The complete route tree: the three form endpoints plus `GET /health`.
pub(crate) fn routes(
    state: Arc<ApiState>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_state(state.clone()))
        .map(|state: Arc<ApiState>| {
            with_security_headers(json_response(
                StatusCode::OK,
                json!({
                    "status": "ok",
                    "service": "wallshop-forms",
                    "mailConfigured": state.pipeline.is_some(),
                    "timestamp": timestamp(Utc::now()),
                }),
            ))
        });

    health
        .or(form_route(FormKind::Quote, state.clone()))
        .or(form_route(FormKind::Contact, state.clone()))
        .or(form_route(FormKind::Subscribe, state))
        .recover(handle_rejection)
}

/// Matches every method on the form's path so that 405 and preflight
/// responses carry the same headers as the real answer. The body is handed
/// over unread; `accept` drains it under the size limit.
fn form_route(
    kind: FormKind,
    state: Arc<ApiState>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("api")
        .and(warp::path(kind.path()))
        .and(warp::path::end())
        .and(warp::method())
        .and(warp::header::headers_cloned())
        .and(warp::addr::remote())
        .and(warp::body::stream())
        .and(with_state(state))
        .and_then(
            move |method: Method,
                  headers: HeaderMap,
                  remote: Option<SocketAddr>,
                  body,
                  state: Arc<ApiState>| async move {
                let response = respond(kind, &method, &headers, remote, body, &state).await;
                Ok::<_, Rejection>(with_common_headers(response, kind, &headers, &state))
            },
        )
}

async fn respond<S, B>(
    kind: FormKind,
    method: &Method,
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    body: S,
    state: &ApiState,
) -> Response
where
    S: Stream<Item = std::result::Result<B, warp::Error>>,
    B: Buf,
{
    if *method == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    if *method != Method::POST {
        let mut response = json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            json!({
                "error": "Method not allowed",
                "message": format!("Use POST to submit the {} form", kind.as_str()),
            }),
        );
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        return response;
    }

    match accept(kind, headers, remote, body, state).await {
        Ok(response) => response,
        Err(e) => error_response(kind, &e, &state.brand, Utc::now()),
    }
}

/// Rate limit, configuration, body and pipeline checks, in that order.
async fn accept<S, B>(
    kind: FormKind,
    headers: &HeaderMap,
    remote: Option<SocketAddr>,
    body: S,
    state: &ApiState,
) -> Result<Response>
where
    S: Stream<Item = std::result::Result<B, warp::Error>>,
    B: Buf,
{
    let client_ip = client_ip(headers, remote);

    let decision = state.limiter(kind).check(&client_ip).await;
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after_secs: decision.retry_after_secs(Utc::now()),
            decision,
        });
    }

    let pipeline = state.pipeline.as_ref().ok_or_else(|| {
        AppError::Config("Mail provider API key (RESEND_API_KEY) is not configured".to_string())
    })?;

    let declared = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = read_body(body, declared, state.max_body_bytes).await?;
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| AppError::MalformedRequest(e.to_string()))?;

    let meta = RequestMeta {
        client_ip,
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };
    let now = Utc::now();

    match AssertUnwindSafe(run_pipeline(kind, pipeline, &payload, &meta, now))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(panic) => {
            let detail = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AppError::Unknown(anyhow::anyhow!(
                "{} pipeline panicked: {}",
                kind.as_str(),
                detail
            )))
        }
    }
}

/// Collects the request body, refusing a declared or streamed size over `limit`
/// before buffering more than `limit` bytes.
async fn read_body<S, B>(body: S, declared: Option<u64>, limit: usize) -> Result<Vec<u8>>
where
    S: Stream<Item = std::result::Result<B, warp::Error>>,
    B: Buf,
{
    if let Some(length) = declared.filter(|length| *length > limit as u64) {
        return Err(AppError::PayloadTooLarge {
            size: usize::try_from(length).unwrap_or(usize::MAX),
            limit,
        });
    }

    futures::pin_mut!(body);
    let mut collected = Vec::with_capacity(declared.map_or(0, |l| l as usize));
    while let Some(chunk) = body.next().await {
        let mut chunk = chunk.map_err(|e| AppError::MalformedRequest(e.to_string()))?;
        let size = collected.len() + chunk.remaining();
        if size > limit {
            return Err(AppError::PayloadTooLarge { size, limit });
        }
        while chunk.has_remaining() {
            let bytes = chunk.chunk();
            collected.extend_from_slice(bytes);
            let read = bytes.len();
            chunk.advance(read);
        }
    }
    Ok(collected)
}

async fn run_pipeline(
    kind: FormKind,
    pipeline: &Pipeline,
    payload: &Value,
    meta: &RequestMeta,
    now: DateTime<Utc>,
) -> Result<Response> {
    let support = support_contact(pipeline.brand());
    let body = match kind {
        FormKind::Quote => {
            let outcome = pipeline.process_quote(payload, meta, now).await?;
            let priority = outcome.classification.priority;
            json!({
                "success": true,
                "message": "Quote request submitted successfully",
                "referenceId": outcome.reference_id,
                "details": {
                    "quoteId": outcome.reference_id,
                    "submittedAt": timestamp(outcome.submitted_at),
                    "priority": priority,
                    "estimatedValue": outcome.classification.estimated_value,
                    "estimatedResponse": estimated_response(priority),
                    "nextSteps": next_steps(priority),
                    "contact": support,
                },
                "tracking": {
                    "emailIds": outcome.report.email_ids(),
                    "referenceId": outcome.reference_id,
                },
            })
        }
        FormKind::Contact => {
            let outcome = pipeline.process_contact(payload, meta, now).await?;
            json!({
                "success": true,
                "message": "Message sent successfully",
                "referenceId": outcome.reference_id,
                "details": {
                    "messageId": outcome.reference_id,
                    "submittedAt": timestamp(outcome.submitted_at),
                    "estimatedResponse": "Within 24 hours",
                    "contact": support,
                },
                "tracking": {
                    "emailIds": outcome.report.email_ids(),
                    "referenceId": outcome.reference_id,
                },
            })
        }
        FormKind::Subscribe => {
            let outcome = pipeline.process_subscription(payload, meta, now).await?;
            json!({
                "success": true,
                "message": "Subscribed successfully",
                "referenceId": outcome.reference_id,
                "details": {
                    "subscriptionId": outcome.reference_id,
                    "submittedAt": timestamp(outcome.submitted_at),
                    "email": outcome.record.email.to_plain(),
                },
                "tracking": {
                    "emailIds": outcome.report.email_ids(),
                    "referenceId": outcome.reference_id,
                },
            })
        }
    };
    Ok(json_response(StatusCode::OK, body))
}

/// Maps a pipeline error to its status and body. Internal detail is logged, never returned.
fn error_response(kind: FormKind, err: &AppError, brand: &Brand, now: DateTime<Utc>) -> Response {
    let server_error = |error: &str, message: &str| {
        json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({
                "error": error,
                "message": message,
                "details": {
                    "timestamp": timestamp(now),
                    "supportContact": support_contact(brand),
                },
            }),
        )
    };

    match err {
        AppError::Validation(fields) => {
            tracing::info!(target: "api_task", "{} submission failed validation: {:?}", kind.as_str(), fields.keys());
            json_response(
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Validation failed",
                    "message": "Please correct the highlighted fields and try again",
                    "fields": fields,
                    "timestamp": timestamp(now),
                }),
            )
        }
        AppError::MalformedRequest(detail) => {
            tracing::info!(target: "api_task", "{} request body was not valid JSON: {}", kind.as_str(), detail);
            json_response(
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "Invalid JSON",
                    "message": "The request body must be a valid JSON object",
                    "timestamp": timestamp(now),
                }),
            )
        }
        AppError::PayloadTooLarge { size, limit } => {
            tracing::warn!(target: "api_task", "{} request body too large: {} > {}", kind.as_str(), size, limit);
            json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                json!({
                    "error": "Payload too large",
                    "message": format!("Request bodies are limited to {} bytes", limit),
                    "timestamp": timestamp(now),
                }),
            )
        }
        AppError::RateLimited {
            retry_after_secs,
            decision,
        } => {
            let mut response = json_response(
                StatusCode::TOO_MANY_REQUESTS,
                json!({
                    "error": "Too many requests",
                    "message": format!(
                        "Too many {} submissions. Please try again in {} seconds.",
                        kind.as_str(),
                        retry_after_secs
                    ),
                    "retryAfter": retry_after_secs,
                    "details": {
                        "limit": decision.limit,
                        "window": decision.window.as_secs(),
                        "remaining": decision.remaining,
                        "resetTime": timestamp(decision.reset_at),
                    },
                }),
            );
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(*retry_after_secs));
            response
        }
        AppError::Config(detail) => {
            tracing::error!(target: "api_task", "Configuration error: {}", detail);
            server_error(
                "Service configuration error",
                "Our form service is temporarily unavailable. Please contact us directly.",
            )
        }
        AppError::Dispatch { .. } => {
            tracing::error!(target: "api_task", "{} submission not delivered: {}", kind.as_str(), err);
            server_error(
                "Email delivery failed",
                "We could not send your submission. Please call or email us directly.",
            )
        }
        other => {
            tracing::error!(target: "api_task", "Unhandled error in {} handler: {:?}", kind.as_str(), other);
            server_error(
                "Internal server error",
                "Something went wrong on our side. Please try again or contact us directly.",
            )
        }
    }
}

fn with_common_headers(
    mut response: Response,
    kind: FormKind,
    request_headers: &HeaderMap,
    state: &ApiState,
) -> Response {
    let headers = response.headers_mut();

    if let Some(origin) = request_headers.get(ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| state.is_allowed_origin(o))
            .unwrap_or(false);
        if allowed {
            headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        } else {
            tracing::debug!(target: "api_task", "Origin {:?} is not in the allow-list", origin);
        }
    }
    headers.insert(VARY, HeaderValue::from_static("Origin"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOWED_HEADERS),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(state.cors_max_age));
    if kind == FormKind::Quote {
        headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static(QUOTE_CSP));
    }
    with_security_headers(response)
}

/// Headers every response carries, including health checks and unmatched paths.
fn with_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    headers.insert(
        REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    response
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> String {
    let header = |name: &'static str| {
        headers
            .get(HeaderName::from_static(name))
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .map(str::to_string)
        .or_else(|| remote.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn support_contact(brand: &Brand) -> Value {
    json!({
        "phone": brand.support_phone,
        "email": brand.support_email,
    })
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn json_response(status: StatusCode, body: Value) -> Response {
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

/// Handle rejections for paths outside the form endpoints
async fn handle_rejection(err: Rejection) -> std::result::Result<Response, Infallible> {
    let response = if err.is_not_found() {
        json_response(
            StatusCode::NOT_FOUND,
            json!({ "error": "Not found", "message": "No such endpoint" }),
        )
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "error": "Method not allowed", "message": "Method not allowed" }),
        )
    } else {
        tracing::warn!(target: "api_task", "Unhandled rejection: {:?}", err);
        json_response(
            StatusCode::BAD_REQUEST,
            json!({ "error": "Bad request", "message": "Bad request" }),
        )
    };
    Ok(with_security_headers(response))
}
