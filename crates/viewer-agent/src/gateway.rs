//! Client for the external biology-data gateway.
//!
//! Only constructible when the OpenBio credential resolved; every
//! operation maps to one fixed endpoint. Failures are classified so the
//! session can report them back to the model as tool errors instead of
//! dying: transport problems, auth rejections and non-2xx responses are
//! all distinct kinds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use strum_macros::EnumIter;
use thiserror::Error;
use tracing::debug;

use crate::credentials::{ProviderConfig, Secret};
use crate::errors::AgentError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const API_KEY_HEADER: &str = "X-API-Key";

/// Closed set of gateway operations. One variant per remote endpoint;
/// the tool registry exposes each as a `gateway_*` tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
pub enum GatewayOp {
    Health,
    ListTools,
    SearchTools,
    ListCategories,
    GetCategory,
    GetToolSchema,
    ValidateParams,
    InvokeTool,
    ListJobs,
    GetJobStatus,
    GetJobResult,
    GetJobLogs,
}

impl GatewayOp {
    pub fn tool_name(&self) -> &'static str {
        match self {
            GatewayOp::Health => "gateway_health",
            GatewayOp::ListTools => "gateway_list_tools",
            GatewayOp::SearchTools => "gateway_search_tools",
            GatewayOp::ListCategories => "gateway_list_categories",
            GatewayOp::GetCategory => "gateway_get_category",
            GatewayOp::GetToolSchema => "gateway_get_tool_schema",
            GatewayOp::ValidateParams => "gateway_validate_params",
            GatewayOp::InvokeTool => "gateway_invoke_tool",
            GatewayOp::ListJobs => "gateway_list_jobs",
            GatewayOp::GetJobStatus => "gateway_get_job_status",
            GatewayOp::GetJobResult => "gateway_get_job_result",
            GatewayOp::GetJobLogs => "gateway_get_job_logs",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("network failure: {0}")]
    Network(String),

    #[error("authentication rejected ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("gateway error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
}

impl From<GatewayError> for AgentError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidArgs(message) => AgentError::InvalidParameters(message),
            // Auth and transport failures against the gateway are the
            // gateway-unavailable family as far as the session loop is
            // concerned.
            other => AgentError::GatewayUnavailable(other.to_string()),
        }
    }
}

pub struct GatewayClient {
    client: Client,
    base_url: String,
    api_key: Secret,
    /// Upload paths must stay inside this root.
    working_dir: PathBuf,
}

impl GatewayClient {
    /// Build from a resolved config. Fails with `CredentialUnavailable`
    /// when the gateway credential is unset.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, AgentError> {
        let api_key = config
            .gateway
            .value
            .clone()
            .ok_or_else(|| AgentError::CredentialUnavailable("OpenBio".to_string()))?;
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AgentError::Internal(e.to_string()))?;
        let working_dir =
            std::env::current_dir().map_err(|e| AgentError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.gateway_base_url.trim_end_matches('/').to_string(),
            api_key,
            working_dir,
        })
    }

    #[cfg(test)]
    pub(crate) fn for_tests(base_url: &str, api_key: &str, working_dir: PathBuf) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: Secret::new(api_key),
            working_dir,
        }
    }

    /// Cheap authenticated request used by explicit key-test flows.
    pub async fn validate_key(&self) -> Result<(), GatewayError> {
        self.call(GatewayOp::ListTools, &json!({"limit": 1, "offset": 0}))
            .await
            .map(|_| ())
    }

    /// Execute one gateway operation. The returned value wraps the
    /// upstream payload as `{ok, status_code, data}`.
    pub async fn call(&self, op: GatewayOp, args: &Value) -> Result<Value, GatewayError> {
        debug!(op = op.tool_name(), "gateway call");
        match op {
            GatewayOp::Health => self.get("/api/v1/tools/health", &[], false).await,
            GatewayOp::ListTools => {
                let query = passthrough_query(args, &["limit", "offset", "category"]);
                self.get("/api/v1/tools", &query, true).await
            }
            GatewayOp::SearchTools => {
                let q = required_str(args, "query")?;
                self.get("/api/v1/tools/search", &[("q".to_string(), q)], true)
                    .await
            }
            GatewayOp::ListCategories => self.get("/api/v1/tools/categories", &[], true).await,
            GatewayOp::GetCategory => {
                let name = required_str(args, "category_name")?;
                self.get_segmented(&["api", "v1", "tools", "categories", &name], &[])
                    .await
            }
            GatewayOp::GetToolSchema => {
                let name = required_str(args, "tool_name")?;
                self.get_segmented(&["api", "v1", "tools", &name], &[]).await
            }
            GatewayOp::ValidateParams => {
                let name = required_str(args, "tool_name")?;
                let params = normalized_params(args)?;
                self.post_json(
                    "/api/v1/tools/validate",
                    json!({"tool_name": name, "params": params}),
                )
                .await
            }
            GatewayOp::InvokeTool => {
                let name = required_str(args, "tool_name")?;
                let params = normalized_params(args)?;
                let files = normalized_upload_files(args, &self.working_dir)?;
                self.post_multipart("/api/v1/tools", &name, &params, files)
                    .await
            }
            GatewayOp::ListJobs => {
                let query =
                    passthrough_query(args, &["limit", "offset", "status", "tool", "compact"]);
                self.get("/api/v1/jobs", &query, true).await
            }
            GatewayOp::GetJobStatus => {
                let id = required_str(args, "job_id")?;
                self.get_segmented(&["api", "v1", "jobs", &id, "status"], &[])
                    .await
            }
            GatewayOp::GetJobResult => {
                let id = required_str(args, "job_id")?;
                self.get_segmented(&["api", "v1", "jobs", &id], &[]).await
            }
            GatewayOp::GetJobLogs => {
                let id = required_str(args, "job_id")?;
                self.get_segmented(&["api", "v1", "jobs", &id, "logs"], &[])
                    .await
            }
        }
    }

    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
        authed: bool,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(Method::GET, &url).query(query);
        if authed {
            request = request.header(API_KEY_HEADER, self.api_key.expose());
        }
        self.send(request).await
    }

    /// GET with caller-supplied path segments, percent-encoded via the
    /// url crate so tool and job names cannot smuggle path syntax.
    async fn get_segmented(
        &self,
        segments: &[&str],
        query: &[(String, String)],
    ) -> Result<Value, GatewayError> {
        let mut url = url::Url::parse(&self.base_url)
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Network("gateway base URL cannot be a base".to_string()))?
            .extend(segments);
        let request = self
            .client
            .request(Method::GET, url)
            .query(query)
            .header(API_KEY_HEADER, self.api_key.expose());
        self.send(request).await
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .client
            .request(Method::POST, &url)
            .header(API_KEY_HEADER, self.api_key.expose())
            .json(&body);
        self.send(request).await
    }

    async fn post_multipart(
        &self,
        path: &str,
        tool_name: &str,
        params: &Value,
        files: Vec<UploadFile>,
    ) -> Result<Value, GatewayError> {
        let mut form = Form::new()
            .text("tool_name", tool_name.to_string())
            .text("params", params.to_string());
        for file in files {
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str("application/octet-stream")
                .map_err(|e| GatewayError::Network(e.to_string()))?;
            form = form.part(file.field_name, part);
        }
        let url = format!("{}{}", self.base_url, path);
        let request = self
            .client
            .request(Method::POST, &url)
            .header(API_KEY_HEADER, self.api_key.expose())
            .multipart(form);
        self.send(request).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| GatewayError::Network(e.to_string()))?;
        let data = json_or_text(&raw);

        if status.is_success() {
            return Ok(json!({
                "ok": true,
                "status_code": status.as_u16(),
                "data": data,
            }));
        }

        let message = extract_error_message(&data, status);
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GatewayError::Auth {
                status: status.as_u16(),
                message,
            }),
            _ => Err(GatewayError::Http {
                status: status.as_u16(),
                message,
            }),
        }
    }
}

#[derive(Debug)]
struct UploadFile {
    field_name: String,
    file_name: String,
    bytes: Vec<u8>,
}

fn json_or_text(raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn extract_error_message(payload: &Value, status: StatusCode) -> String {
    if let Value::Object(map) = payload {
        for key in ["message", "detail", "error", "reason"] {
            if let Some(Value::String(text)) = map.get(key) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }
    if let Value::String(text) = payload {
        let low = text.to_lowercase();
        if low.contains("invalid or revoked api key") {
            return "Invalid or revoked API key.".to_string();
        }
    }
    format!("request failed with status {}", status.as_u16())
}

fn required_str(args: &Value, key: &str) -> Result<String, GatewayError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or_else(|| GatewayError::InvalidArgs(format!("{} is required", key)))
}

fn passthrough_query(args: &Value, keys: &[&str]) -> Vec<(String, String)> {
    let mut query = Vec::new();
    for key in keys {
        match args.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::Bool(b)) => query.push((key.to_string(), b.to_string())),
            Some(Value::String(s)) if !s.trim().is_empty() => {
                query.push((key.to_string(), s.trim().to_string()))
            }
            Some(Value::String(_)) => {}
            Some(other) => query.push((key.to_string(), other.to_string())),
        }
    }
    query
}

/// `params` may arrive as an object or as a JSON-encoded object string;
/// models produce both.
fn normalized_params(args: &Value) -> Result<Value, GatewayError> {
    match args.get("params") {
        None | Some(Value::Null) => Ok(json!({})),
        Some(Value::Object(map)) => Ok(Value::Object(map.clone())),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(json!({}));
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Object(map)) => Ok(Value::Object(map)),
                _ => Err(GatewayError::InvalidArgs(
                    "params must be an object (or a JSON object string)".to_string(),
                )),
            }
        }
        Some(_) => Err(GatewayError::InvalidArgs(
            "params must be an object (or a JSON object string)".to_string(),
        )),
    }
}

fn normalized_upload_files(
    args: &Value,
    working_dir: &Path,
) -> Result<Vec<UploadFile>, GatewayError> {
    let items = match args.get("upload_files").or_else(|| args.get("upload_paths")) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Object(map)) => vec![Value::Object(map.clone())],
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null") {
                return Ok(Vec::new());
            }
            match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(items)) => items,
                _ => {
                    return Err(GatewayError::InvalidArgs(
                        "upload_files must be a list (or a JSON list string)".to_string(),
                    ))
                }
            }
        }
        Some(_) => {
            return Err(GatewayError::InvalidArgs(
                "upload_files must be a list (or a JSON list string)".to_string(),
            ))
        }
    };

    let root = working_dir
        .canonicalize()
        .map_err(|e| GatewayError::InvalidArgs(format!("working directory: {}", e)))?;

    let mut resolved = Vec::new();
    for (idx, item) in items.iter().enumerate() {
        let (field_name, raw_path) = match item {
            Value::String(path) => (format!("file_{}", idx + 1), path.trim().to_string()),
            Value::Object(map) => {
                let field = map
                    .get("field_name")
                    .or_else(|| map.get("name"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(String::from)
                    .unwrap_or_else(|| format!("file_{}", idx + 1));
                let path = ["path", "file_path", "local_path", "file"]
                    .iter()
                    .find_map(|k| map.get(*k))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or("")
                    .to_string();
                (field, path)
            }
            _ => {
                return Err(GatewayError::InvalidArgs(
                    "upload_files entries must be path strings or objects with path".to_string(),
                ))
            }
        };

        // Placeholder entries like [{}] are skipped to avoid a retry loop.
        if raw_path.is_empty() {
            continue;
        }

        let candidate = if Path::new(&raw_path).is_absolute() {
            PathBuf::from(&raw_path)
        } else {
            root.join(&raw_path)
        };
        let resolved_path = candidate.canonicalize().map_err(|_| {
            GatewayError::InvalidArgs(format!("upload file does not exist: {}", raw_path))
        })?;
        if !resolved_path.starts_with(&root) {
            return Err(GatewayError::InvalidArgs(format!(
                "upload path is outside the working directory: {}",
                raw_path
            )));
        }
        if !resolved_path.is_file() {
            return Err(GatewayError::InvalidArgs(format!(
                "upload path must point to a regular file: {}",
                raw_path
            )));
        }
        let bytes = std::fs::read(&resolved_path)
            .map_err(|e| GatewayError::InvalidArgs(format!("failed to read {}: {}", raw_path, e)))?;
        let file_name = resolved_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("file_{}", idx + 1));
        resolved.push(UploadFile {
            field_name,
            file_name,
            bytes,
        });
    }
    Ok(resolved)
}
