//! Multipart batch codec for the tenant's `$batch` endpoint. Query operations
//! travel as `application/http` parts directly under the outer boundary;
//! mutating operations are wrapped together in one nested changeset.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::warn;

use crate::client::{Method, TenantTransport};
use crate::error::{DeployerError, Result};

/// Relative path of the batch endpoint.
pub const BATCH_PATH: &str = "api/v1/$batch";

/// Largest number of operations submitted in a single batch request.
pub const MAX_BATCH_OPERATIONS: usize = 90;

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_boundary(prefix: &str) -> String {
    let n = BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{n}")
}

/// One sub-operation of a batch request.
#[derive(Debug, Clone)]
pub struct Operation {
    pub method: Method,
    pub path: String,
    pub body: Vec<u8>,
    pub content_id: String,
    pub headers: Vec<(String, String)>,
    /// Queries travel outside the changeset.
    pub is_query: bool,
}

impl Operation {
    /// A GET outside the changeset.
    pub fn query(path: impl Into<String>, content_id: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            body: Vec::new(),
            content_id: content_id.into(),
            headers: vec![("Accept".to_string(), "application/json".to_string())],
            is_query: true,
        }
    }

    /// A state-changing operation inside the changeset.
    pub fn mutate(
        method: Method,
        path: impl Into<String>,
        content_id: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if !body.is_empty() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        Self {
            method,
            path: path.into(),
            body,
            content_id: content_id.into(),
            headers,
            is_query: false,
        }
    }
}

/// Result of one operation, positionally matched to its input within each
/// section (queries vs. changeset).
#[derive(Debug, Clone)]
pub struct OperationResponse {
    pub content_id: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub error: Option<String>,
}

impl OperationResponse {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// Assembled request body plus the boundary advertised in its Content-Type.
#[derive(Debug)]
pub struct BatchBody {
    pub boundary: String,
    pub bytes: Vec<u8>,
}

/// Build the multipart body for a set of operations. Queries come first,
/// then all changeset operations wrapped in one nested multipart section.
pub fn build_batch(operations: &[Operation]) -> BatchBody {
    let outer = next_boundary("batch");
    let mut out = String::new();

    for op in operations.iter().filter(|op| op.is_query) {
        out.push_str(&format!("--{outer}\r\n"));
        push_http_part(&mut out, op);
    }

    let changeset: Vec<&Operation> = operations.iter().filter(|op| !op.is_query).collect();
    if !changeset.is_empty() {
        let inner = next_boundary("changeset");
        out.push_str(&format!("--{outer}\r\n"));
        out.push_str(&format!(
            "Content-Type: multipart/mixed; boundary={inner}\r\n\r\n"
        ));
        for op in changeset {
            out.push_str(&format!("--{inner}\r\n"));
            push_http_part(&mut out, op);
        }
        out.push_str(&format!("--{inner}--\r\n"));
    }

    out.push_str(&format!("--{outer}--\r\n"));
    BatchBody {
        boundary: outer,
        bytes: out.into_bytes(),
    }
}

fn push_http_part(out: &mut String, op: &Operation) {
    out.push_str("Content-Type: application/http\r\n");
    out.push_str("Content-Transfer-Encoding: binary\r\n");
    out.push_str(&format!("Content-ID: {}\r\n\r\n", op.content_id));
    out.push_str(&format!("{} {} HTTP/1.1\r\n", op.method, op.path));
    for (name, value) in &op.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if !op.body.is_empty() {
        out.push_str(&format!("Content-Length: {}\r\n", op.body.len()));
        out.push_str("\r\n");
        out.push_str(&String::from_utf8_lossy(&op.body));
        out.push_str("\r\n");
    } else {
        out.push_str("\r\n");
    }
}

/// Execute one batch request. 200 and 202 are accepted; anything else is a
/// batch-level failure.
pub async fn execute(
    transport: &dyn TenantTransport,
    operations: &[Operation],
) -> Result<Vec<OperationResponse>> {
    let batch = build_batch(operations);
    let headers = vec![
        (
            "Content-Type".to_string(),
            format!("multipart/mixed; boundary={}", batch.boundary),
        ),
        ("Accept".to_string(), "multipart/mixed".to_string()),
    ];
    let response = transport
        .request(Method::Post, BATCH_PATH, &headers, Some(batch.bytes))
        .await?;
    if response.status != 200 && response.status != 202 {
        return Err(DeployerError::from_status(
            response.status,
            format!("batch request rejected: {}", response.body_text()),
        ));
    }
    let content_type = response.header("Content-Type").ok_or_else(|| {
        DeployerError::Protocol("batch response is missing a Content-Type header".into())
    })?;
    parse_batch_response(content_type, &response.body)
}

/// Split operations into groups of at most [`MAX_BATCH_OPERATIONS`] and
/// execute each group as an independent batch, concatenating responses in
/// input order.
pub async fn execute_chunked(
    transport: &dyn TenantTransport,
    operations: &[Operation],
) -> Result<Vec<OperationResponse>> {
    let mut responses = Vec::with_capacity(operations.len());
    for chunk in operations.chunks(MAX_BATCH_OPERATIONS) {
        responses.extend(execute(transport, chunk).await?);
    }
    Ok(responses)
}

/// Parse a multipart batch response using the boundary advertised in the
/// response Content-Type.
pub fn parse_batch_response(content_type: &str, body: &[u8]) -> Result<Vec<OperationResponse>> {
    let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
        DeployerError::Protocol(format!(
            "no boundary parameter in batch response Content-Type '{content_type}'"
        ))
    })?;
    let text = String::from_utf8_lossy(body);
    let mut responses = Vec::new();

    for part in split_multipart(&text, &boundary) {
        let (headers, payload) = split_headers(&part);
        let part_type = header_value(&headers, "Content-Type").unwrap_or_default();
        if part_type
            .to_ascii_lowercase()
            .starts_with("multipart/mixed")
        {
            let inner = boundary_from_content_type(&part_type)
                .or_else(|| boundary_from_first_line(&payload))
                .ok_or_else(|| {
                    DeployerError::Protocol("changeset part has no discoverable boundary".into())
                })?;
            for sub in split_multipart(&payload, &inner) {
                let (sub_headers, sub_payload) = split_headers(&sub);
                responses.push(parse_http_response(&sub_headers, &sub_payload));
            }
        } else {
            responses.push(parse_http_response(&headers, &payload));
        }
    }
    Ok(responses)
}

/// Parse one `application/http` payload: status line, headers, body. A
/// malformed payload yields a response with `error` set instead of aborting
/// sibling parses.
fn parse_http_response(mime_headers: &[(String, String)], payload: &str) -> OperationResponse {
    let content_id = header_value(mime_headers, "Content-ID").unwrap_or_default();
    let mut lines = payload.lines();
    let status_line = loop {
        match lines.next() {
            Some(line) if line.trim().is_empty() => continue,
            Some(line) => break line.trim().to_string(),
            None => {
                return error_response(content_id, "empty application/http part");
            }
        }
    };

    let mut fields = status_line.split_whitespace();
    let version = fields.next().unwrap_or_default();
    let code = fields.next().and_then(|c| c.parse::<u16>().ok());
    if !version.starts_with("HTTP/") {
        return error_response(
            content_id,
            format!("unparsable status line '{status_line}'"),
        );
    }
    let Some(status) = code else {
        return error_response(
            content_id,
            format!("unparsable status code in '{status_line}'"),
        );
    };

    let mut headers = Vec::new();
    let mut body_lines = Vec::new();
    let mut in_body = false;
    for line in lines {
        if in_body {
            body_lines.push(line);
            continue;
        }
        if line.trim().is_empty() {
            in_body = true;
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_string(), value.trim().to_string()));
        } else {
            warn!(line, "skipping malformed header line in batch sub-response");
        }
    }
    let body = body_lines.join("\n").trim().to_string();

    OperationResponse {
        content_id,
        status,
        headers,
        body: body.into_bytes(),
        error: None,
    }
}

fn error_response(content_id: String, message: impl Into<String>) -> OperationResponse {
    OperationResponse {
        content_id,
        status: 0,
        headers: Vec::new(),
        body: Vec::new(),
        error: Some(message.into()),
    }
}

/// Extract the `boundary=` parameter from a Content-Type header value.
fn boundary_from_content_type(content_type: &str) -> Option<String> {
    for param in content_type.split(';').skip(1) {
        let param = param.trim();
        if let Some(value) = param
            .strip_prefix("boundary=")
            .or_else(|| param.strip_prefix("Boundary="))
        {
            return Some(value.trim_matches('"').to_string());
        }
    }
    None
}

/// Discover a changeset boundary from its first non-empty `--<boundary>` line.
fn boundary_from_first_line(payload: &str) -> Option<String> {
    payload
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .and_then(|line| line.strip_prefix("--"))
        .map(|b| b.trim_end_matches('-').to_string())
}

/// Split multipart content into parts. Tolerates CRLF and bare LF; stops at
/// the canonical `--boundary--` trailer.
fn split_multipart(text: &str, boundary: &str) -> Vec<String> {
    let open = format!("--{boundary}");
    let close = format!("--{boundary}--");
    let mut parts = Vec::new();
    let mut current: Option<Vec<&str>> = None;

    for line in text.lines() {
        let marker = line.trim();
        if marker == close {
            if let Some(part) = current.take() {
                parts.push(part.join("\n"));
            }
            break;
        }
        if marker == open {
            if let Some(part) = current.take() {
                parts.push(part.join("\n"));
            }
            current = Some(Vec::new());
            continue;
        }
        if let Some(part) = &mut current {
            part.push(line);
        }
    }
    if let Some(part) = current.take() {
        parts.push(part.join("\n"));
    }
    parts
}

/// Split a part into its MIME headers and the remaining payload.
fn split_headers(part: &str) -> (Vec<(String, String)>, String) {
    let mut headers = Vec::new();
    let mut lines = part.lines();
    let mut payload = Vec::new();
    let mut in_payload = false;

    for line in lines.by_ref() {
        if in_payload {
            payload.push(line);
            continue;
        }
        if line.trim().is_empty() {
            in_payload = true;
            continue;
        }
        match line.split_once(':') {
            Some((name, value)) => headers.push((name.trim().to_string(), value.trim().to_string())),
            None => {
                // Not a header block after all (e.g. a changeset payload
                // starting with its own boundary line).
                payload.push(line);
                in_payload = true;
            }
        }
    }
    (headers, payload.join("\n"))
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}
