//! Request pipeline for `POST /v1/terminal/bootstrap`
//!
//! Stages run in a fixed order and the first failure decides the response.
//! Nothing past the auth stage runs for an unauthenticated caller, and the
//! body is never read before the cheap header checks pass.

use std::io::{Cursor, Read};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tiny_http::{Header, Method, Request, Response};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::rate_limit::RateLimiter;
use super::types::{ApiError, BootstrapHandler, BootstrapRequest, BootstrapResponse};
use crate::config::{AutomationApiConfig, constant_time_eq, normalize_path};

pub const BOOTSTRAP_PATH: &str = "/v1/terminal/bootstrap";
pub const CLIENT_HEADER: &str = "X-CDW-Client";
pub const MAX_CLIENT_ID_LEN: usize = 128;

const RESPONSE_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", "application/json"),
    ("Cache-Control", "no-store"),
    ("X-Content-Type-Options", "nosniff"),
];

/// Everything a worker thread needs to serve one request.
pub(super) struct RequestContext {
    pub config: Arc<RwLock<AutomationApiConfig>>,
    pub token: String,
    pub rate_limiter: RateLimiter,
    pub bootstrap: Arc<dyn BootstrapHandler>,
    pub runtime: Handle,
}

impl RequestContext {
    fn config(&self) -> AutomationApiConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Serve one request to completion, including the response write.
pub(super) fn handle_request(ctx: &RequestContext, mut request: Request) {
    let remote = request.remote_addr().copied();
    let method = request.method().clone();
    let path = request_path(request.url()).to_string();

    let (status, body) = match process(ctx, &mut request) {
        Ok(created) => {
            info!(
                "[cdw:api] {} {} from {:?} -> 201 session {}",
                method, path, remote, created.session_id
            );
            (201, serde_json::to_value(&created).unwrap_or_default())
        }
        Err(err) => {
            let status = err.status();
            if status >= 500 {
                warn!("[cdw:api] {} {} from {:?} -> {} ({})", method, path, remote, status, err);
            } else {
                info!("[cdw:api] {} {} from {:?} -> {}", method, path, remote, status);
            }
            (status, serde_json::json!({ "error": err.to_string() }))
        }
    };

    let mut response = json_response(status, &body);
    if status == 405 {
        if let Ok(allow) = Header::from_bytes(&b"Allow"[..], &b"POST"[..]) {
            response.add_header(allow);
        }
    }
    if let Err(e) = request.respond(response) {
        debug!("[cdw:api] Failed to write response: {}", e);
    }
}

fn process(ctx: &RequestContext, request: &mut Request) -> Result<BootstrapResponse, ApiError> {
    check_route(request.method(), request.url())?;
    let config = ctx.config();

    check_browser_headers(request)?;
    check_client_header(request)?;
    let remote = check_remote_addr(request.remote_addr())?;
    check_bearer(request, &ctx.token)?;

    if !ctx
        .rate_limiter
        .check(remote.ip(), config.rate_limit_per_minute)
    {
        return Err(ApiError::RateLimited);
    }

    check_content_type(request)?;
    let body = read_body(request, config.max_request_bytes)?;
    let mut bootstrap = parse_bootstrap(&body, &config)?;

    let cwd = resolve_cwd(&bootstrap.cwd)?;
    check_ready(&config)?;
    if !within_allowed_roots(&config, &cwd) {
        return Err(ApiError::Forbidden("cwd is outside the allowed roots"));
    }
    bootstrap.cwd = cwd;

    run_bootstrap(
        ctx,
        bootstrap,
        Duration::from_millis(config.request_timeout_ms),
    )
}

fn request_path(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

fn check_route(method: &Method, url: &str) -> Result<(), ApiError> {
    match (method, request_path(url)) {
        (Method::Post, BOOTSTRAP_PATH) => Ok(()),
        (_, BOOTSTRAP_PATH) => Err(ApiError::MethodNotAllowed),
        _ => Err(ApiError::NotFound),
    }
}

fn header_value<'a>(request: &'a Request, name: &str) -> Option<&'a str> {
    find_header(request.headers(), name)
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// Disabled, or enabled with nothing to allow.
fn check_ready(config: &AutomationApiConfig) -> Result<(), ApiError> {
    if config.enabled && !config.allowed_roots.is_empty() {
        Ok(())
    } else {
        Err(ApiError::Unavailable)
    }
}

/// Web content cannot omit these; a CLI or script never sends them.
fn check_browser_headers(request: &Request) -> Result<(), ApiError> {
    let from_browser = request.headers().iter().any(|h| {
        let field = h.field.as_str().as_str();
        field.eq_ignore_ascii_case("Origin")
            || field
                .get(..10)
                .is_some_and(|p| p.eq_ignore_ascii_case("Sec-Fetch-"))
    });
    if from_browser {
        return Err(ApiError::Forbidden("browser requests are not allowed"));
    }
    Ok(())
}

fn check_client_header(request: &Request) -> Result<(), ApiError> {
    match header_value(request, CLIENT_HEADER).map(str::trim) {
        Some(client) if !client.is_empty() && client.len() <= MAX_CLIENT_ID_LEN => Ok(()),
        _ => Err(ApiError::bad_request(format!(
            "{} header is required (1-{} characters)",
            CLIENT_HEADER, MAX_CLIENT_ID_LEN
        ))),
    }
}

fn check_remote_addr(addr: Option<&SocketAddr>) -> Result<SocketAddr, ApiError> {
    match addr {
        Some(addr) if addr.ip().is_loopback() => Ok(*addr),
        _ => Err(ApiError::Forbidden("only loopback clients are allowed")),
    }
}

fn check_bearer(request: &Request, token: &str) -> Result<(), ApiError> {
    let presented = header_value(request, "Authorization")
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or(ApiError::Unauthorized)?;
    if constant_time_eq(token.as_bytes(), presented.as_bytes()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn check_content_type(request: &Request) -> Result<(), ApiError> {
    let is_json = header_value(request, "Content-Type")
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"));
    if is_json {
        Ok(())
    } else {
        Err(ApiError::UnsupportedMediaType)
    }
}

/// Read at most `limit` bytes; one byte more means the body is too large.
fn read_body(request: &mut Request, limit: u64) -> Result<Vec<u8>, ApiError> {
    if request.body_length().is_some_and(|len| len as u64 > limit) {
        return Err(ApiError::PayloadTooLarge);
    }

    let mut body = Vec::new();
    let mut reader = request.as_reader().take(limit + 1);
    if let Err(e) = reader.read_to_end(&mut body) {
        debug!("[cdw:api] Failed to read body: {}", e);
        return Err(ApiError::bad_request("failed to read request body"));
    }
    if body.len() as u64 > limit {
        return Err(ApiError::PayloadTooLarge);
    }
    Ok(body)
}

fn parse_bootstrap(
    body: &[u8],
    config: &AutomationApiConfig,
) -> Result<BootstrapRequest, ApiError> {
    let request: BootstrapRequest = serde_json::from_slice(body)
        .map_err(|_| ApiError::bad_request("body must be {\"cwd\": string, \"commands\": [string]}"))?;

    if request.cwd.as_os_str().is_empty() || !request.cwd.is_absolute() {
        return Err(ApiError::bad_request("cwd must be an absolute path"));
    }
    if request.commands.is_empty() {
        return Err(ApiError::bad_request("commands must not be empty"));
    }
    if request.commands.len() as u64 > config.max_commands {
        return Err(ApiError::bad_request(format!(
            "at most {} commands are allowed",
            config.max_commands
        )));
    }
    for command in &request.commands {
        if command.is_empty() {
            return Err(ApiError::bad_request("commands must be non-empty strings"));
        }
        if command.chars().count() as u64 > config.max_command_length {
            return Err(ApiError::bad_request(format!(
                "commands must be at most {} characters",
                config.max_command_length
            )));
        }
    }
    Ok(request)
}

/// Canonical form of `cwd`, which must be an existing directory.
fn resolve_cwd(cwd: &Path) -> Result<std::path::PathBuf, ApiError> {
    let resolved = std::fs::canonicalize(cwd)
        .map_err(|_| ApiError::bad_request("cwd does not exist"))?;
    if !resolved.is_dir() {
        return Err(ApiError::bad_request("cwd is not a directory"));
    }
    Ok(resolved)
}

/// Roots are compared both as configured and with symlinks resolved.
fn within_allowed_roots(config: &AutomationApiConfig, cwd: &Path) -> bool {
    let cwd = normalize_path(cwd);
    config.is_path_allowed(&cwd)
        || config.allowed_roots.iter().any(|root| {
            std::fs::canonicalize(root).is_ok_and(|root| cwd.starts_with(root))
        })
}

/// Race the bootstrap handler against `timeout`.
///
/// A late result is not lost: its session is handed back to the handler's
/// `discard` hook.
fn run_bootstrap(
    ctx: &RequestContext,
    request: BootstrapRequest,
    timeout: Duration,
) -> Result<BootstrapResponse, ApiError> {
    let handler = ctx.bootstrap.clone();
    let mut task = ctx
        .runtime
        .spawn(async move { handler.bootstrap(request).await });

    let outcome = ctx
        .runtime
        .block_on(async { tokio::time::timeout(timeout, &mut task).await });

    match outcome {
        Ok(Ok(Ok(response))) => Ok(response),
        Ok(Ok(Err(e))) => Err(ApiError::Internal(e.to_string())),
        Ok(Err(join_err)) => {
            warn!("[cdw:api] Bootstrap task failed: {}", join_err);
            Err(ApiError::Internal("bootstrap failed".to_string()))
        }
        Err(_) => {
            let handler = ctx.bootstrap.clone();
            ctx.runtime.spawn(async move {
                if let Ok(Ok(late)) = task.await {
                    warn!(
                        "[cdw:api] Discarding session {} created after timeout",
                        late.session_id
                    );
                    handler.discard(&late.session_id).await;
                }
            });
            Err(ApiError::Timeout)
        }
    }
}

fn json_response(status: u16, body: &serde_json::Value) -> Response<Cursor<Vec<u8>>> {
    let mut response = Response::from_data(body.to_string().into_bytes()).with_status_code(status);
    for (name, value) in RESPONSE_HEADERS {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }
    response
}
