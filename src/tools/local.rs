//! Local tool executor - tools served by the session's execution environment
//!
//! The executor is stateless: the environment endpoint is passed per call,
//! so one instance is shared by every session.
//!
//! ```text
//! bash                POST /tools/bash         {command, timeout}  → {stdout, stderr, return_code}
//! str_replace_editor  POST /tools/file/read    {path}              → {content}
//!                     POST /tools/file/write   {path, content}
//! computer            GET  /tools/screenshot                       → {image_base64, width, height}
//!                     POST /tools/browser      {action, params}    (click / type / scroll)
//! browser             POST /tools/browser      {action, params}    → {status, data | error}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{ToolDescriptor, ToolError, ToolOutput};

/// Files edited by `str_replace_editor` are rooted here
pub const WORKSPACE_ROOT: &str = "/workspace";

/// Default `bash` command timeout in seconds
const DEFAULT_BASH_TIMEOUT_SECS: u64 = 120;

/// Extra time granted to the HTTP request beyond the command timeout
const BASH_REQUEST_GRACE: Duration = Duration::from_secs(10);

/// Executes tools whose implementation lives in the session environment
#[async_trait]
pub trait LocalToolExecutor: Send + Sync {
    /// Tools this executor serves; registered ahead of provider tools
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Run one tool against the given environment
    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Value,
        environment_endpoint: &str,
    ) -> Result<ToolOutput, ToolError>;
}

#[derive(Debug, Deserialize)]
struct BashResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    return_code: i64,
}

#[derive(Debug, Deserialize)]
struct FileReadResponse {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ScreenshotResponse {
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BrowserResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP bridge to the environment's tool server
#[derive(Clone)]
pub struct EnvironmentTools {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl EnvironmentTools {
    /// Create the executor
    ///
    /// # Arguments
    /// * `connect_timeout` - TCP connect timeout toward the environment
    /// * `request_timeout` - Overall timeout for non-bash requests, and the
    ///   ceiling for the command timeout a `bash` call may ask for
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ToolError::execution(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            request_timeout,
        })
    }

    async fn bash(&self, endpoint: &str, args: &Value) -> Result<ToolOutput, ToolError> {
        if args["restart"].as_bool().unwrap_or(false) {
            debug!("Bash restart requested");
            return Ok(ToolOutput::Text("Shell session restarted".to_string()));
        }

        let command = args["command"].as_str().unwrap_or("");
        if command.trim().is_empty() {
            return Err(ToolError::execution("no command provided"));
        }
        let timeout_secs = bash_timeout_secs(&args["timeout"], self.request_timeout);

        info!(command = %truncate(command, 100), timeout_secs, "Executing bash command");

        let response: BashResponse = self
            .post_json(
                &format!("{}/tools/bash", endpoint),
                &json!({ "command": command, "timeout": timeout_secs }),
                Duration::from_secs(timeout_secs).saturating_add(BASH_REQUEST_GRACE),
            )
            .await?;

        Ok(ToolOutput::Text(format_bash_output(&response)))
    }

    async fn editor(&self, endpoint: &str, args: &Value) -> Result<ToolOutput, ToolError> {
        let command = args["command"].as_str().unwrap_or("");
        let path = workspace_path(args["path"].as_str().unwrap_or(""));

        debug!(command, path = %path, "Editor command");

        match command {
            "view" => {
                let content = self.read_file(endpoint, &path).await?;
                Ok(ToolOutput::Text(number_lines(&content)))
            }
            "create" => {
                let file_text = args["file_text"].as_str().unwrap_or("");
                self.write_file(endpoint, &path, file_text).await?;
                Ok(ToolOutput::Text(format!("Created file: {}", path)))
            }
            "str_replace" => {
                let content = self.read_file(endpoint, &path).await?;
                let old_str = args["old_str"].as_str().unwrap_or("");
                let new_str = args["new_str"].as_str().unwrap_or("");
                let updated = replace_unique(&content, old_str, new_str)?;
                self.write_file(endpoint, &path, &updated).await?;
                Ok(ToolOutput::Text(format!("Successfully replaced text in {}", path)))
            }
            "insert" => {
                let content = self.read_file(endpoint, &path).await?;
                let insert_line = args["insert_line"].as_i64().unwrap_or(0);
                let new_str = args["new_str"].as_str().unwrap_or("");
                let updated = insert_at_line(&content, insert_line, new_str);
                self.write_file(endpoint, &path, &updated).await?;
                Ok(ToolOutput::Text(format!(
                    "Inserted text at line {} in {}",
                    insert_line, path
                )))
            }
            "undo_edit" => Ok(ToolOutput::Text(
                "Undo is not supported. Please manually revert changes.".to_string(),
            )),
            other => Err(ToolError::execution(format!("unknown editor command: {}", other))),
        }
    }

    async fn computer(&self, endpoint: &str, args: &Value) -> Result<ToolOutput, ToolError> {
        let action = args["action"].as_str().unwrap_or("");
        let (x, y) = coordinate(&args["coordinate"], (0, 0));

        debug!(action, x, y, "Computer action");

        match action {
            "screenshot" => self.screenshot(endpoint).await,
            "mouse_move" => Ok(ToolOutput::Text(format!("Moved mouse to ({}, {})", x, y))),
            "left_click" => {
                self.browser_action(endpoint, "click", json!({ "x": x, "y": y })).await?;
                Ok(ToolOutput::Text(format!("Left clicked at ({}, {})", x, y)))
            }
            "right_click" => {
                self.browser_action(endpoint, "click", json!({ "x": x, "y": y, "button": "right" }))
                    .await?;
                Ok(ToolOutput::Text(format!("Right clicked at ({}, {})", x, y)))
            }
            "double_click" => {
                for _ in 0..2 {
                    self.browser_action(endpoint, "click", json!({ "x": x, "y": y })).await?;
                }
                Ok(ToolOutput::Text(format!("Double clicked at ({}, {})", x, y)))
            }
            "left_click_drag" => {
                let (sx, sy) = coordinate(&args["start_coordinate"], (0, 0));
                Ok(ToolOutput::Text(format!(
                    "Dragged from ({}, {}) to ({}, {})",
                    sx, sy, x, y
                )))
            }
            "type" => {
                let text = args["text"].as_str().unwrap_or("");
                self.browser_action(endpoint, "type", json!({ "text": text })).await?;
                Ok(ToolOutput::Text(format!("Typed: {}", truncate(text, 50))))
            }
            "key" => {
                let key = args["key"].as_str().unwrap_or("");
                let mapped = map_key(key);
                let text = if mapped.chars().count() == 1 {
                    mapped.to_string()
                } else {
                    format!("[{}]", mapped)
                };
                self.browser_action(endpoint, "type", json!({ "text": text })).await?;
                Ok(ToolOutput::Text(format!("Pressed key: {}", key)))
            }
            "scroll" => {
                let (x, y) = coordinate(&args["coordinate"], (960, 540));
                let direction = args["direction"].as_str().unwrap_or("down");
                let amount = args["amount"].as_i64().unwrap_or(3);
                self.browser_action(
                    endpoint,
                    "scroll",
                    json!({ "direction": direction, "amount": scroll_pixels(amount) }),
                )
                .await?;
                Ok(ToolOutput::Text(format!("Scrolled {} at ({}, {})", direction, x, y)))
            }
            "wait" => {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(ToolOutput::Text("Waited 1 second".to_string()))
            }
            other => Err(ToolError::execution(format!("unknown computer action: {}", other))),
        }
    }

    async fn browser(&self, endpoint: &str, args: &Value) -> Result<ToolOutput, ToolError> {
        let action = args["action"].as_str().unwrap_or("");
        if action.is_empty() {
            return Err(ToolError::execution("browser action is required"));
        }
        let params = args.get("params").cloned().unwrap_or_else(|| json!({}));

        let data = self.browser_action(endpoint, action, params).await?;

        if let Some(image) = data.get("image_base64").and_then(Value::as_str) {
            return decode_png(image);
        }

        Ok(ToolOutput::Structured(data))
    }

    async fn screenshot(&self, endpoint: &str) -> Result<ToolOutput, ToolError> {
        let response = self
            .client
            .get(format!("{}/tools/screenshot", endpoint))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e, self.request_timeout))?;
        let screenshot: ScreenshotResponse = Self::decode_response(response).await?;

        if let Some(error) = screenshot.error {
            return Err(ToolError::execution(format!("screenshot failed: {}", error)));
        }
        let image = screenshot
            .image_base64
            .ok_or_else(|| ToolError::execution("screenshot response without image data"))?;

        debug!(width = ?screenshot.width, height = ?screenshot.height, "Screenshot captured");
        decode_png(&image)
    }

    /// POST `{action, params}` to the browser endpoint and unwrap `data`
    async fn browser_action(&self, endpoint: &str, action: &str, params: Value) -> Result<Value, ToolError> {
        let response: BrowserResponse = self
            .post_json(
                &format!("{}/tools/browser", endpoint),
                &json!({ "action": action, "params": params }),
                self.request_timeout,
            )
            .await?;

        if response.status.as_deref() == Some("error") {
            return Err(ToolError::execution(
                response.error.unwrap_or_else(|| "unknown browser error".to_string()),
            ));
        }

        Ok(response.data.unwrap_or_else(|| json!({})))
    }

    async fn read_file(&self, endpoint: &str, path: &str) -> Result<String, ToolError> {
        let response = self
            .client
            .post(format!("{}/tools/file/read", endpoint))
            .json(&json!({ "path": path }))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e, self.request_timeout))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ToolError::execution(format!("file not found: {}", path)));
        }

        let file: FileReadResponse = Self::decode_response(response).await?;
        Ok(file.content)
    }

    async fn write_file(&self, endpoint: &str, path: &str, content: &str) -> Result<(), ToolError> {
        let response = self
            .client
            .post(format!("{}/tools/file/write", endpoint))
            .json(&json!({ "path": path, "content": content }))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e, self.request_timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::execution(format!(
                "failed to write {}: {} {}",
                path,
                status,
                truncate(&body, 200)
            )));
        }
        Ok(())
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<T, ToolError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| self.request_error(e, timeout))?;
        Self::decode_response(response).await
    }

    async fn decode_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ToolError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::execution(format!(
                "environment returned {}: {}",
                status,
                truncate(&body, 200)
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ToolError::execution(format!("invalid environment response: {}", e)))
    }

    fn request_error(&self, e: reqwest::Error, timeout: Duration) -> ToolError {
        if e.is_timeout() {
            ToolError::Timeout(timeout)
        } else {
            ToolError::execution(format!("environment communication error: {}", e))
        }
    }
}

#[async_trait]
impl LocalToolExecutor for EnvironmentTools {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        environment_tool_descriptors()
    }

    async fn execute(
        &self,
        tool_name: &str,
        arguments: &Value,
        environment_endpoint: &str,
    ) -> Result<ToolOutput, ToolError> {
        let endpoint = environment_endpoint.trim_end_matches('/');
        match tool_name {
            "bash" => self.bash(endpoint, arguments).await,
            "str_replace_editor" => self.editor(endpoint, arguments).await,
            "computer" => self.computer(endpoint, arguments).await,
            "browser" => self.browser(endpoint, arguments).await,
            other => Err(ToolError::NotFound(other.to_string())),
        }
    }
}

/// Descriptors for the four environment tools
pub fn environment_tool_descriptors() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor::local(
            "bash",
            "Run a shell command in the session environment. Returns stdout, stderr and the exit code.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The shell command to run" },
                    "timeout": { "type": "integer", "description": "Timeout in seconds (default 120)" },
                    "restart": { "type": "boolean", "description": "Restart the shell session" }
                },
                "required": ["command"]
            }),
        ),
        ToolDescriptor::local(
            "str_replace_editor",
            "View, create and edit files under /workspace. str_replace requires old_str to match exactly once.",
            json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "enum": ["view", "create", "str_replace", "insert", "undo_edit"]
                    },
                    "path": { "type": "string", "description": "File path, relative paths are rooted at /workspace" },
                    "file_text": { "type": "string", "description": "Content for create" },
                    "old_str": { "type": "string", "description": "Text to replace (must be unique)" },
                    "new_str": { "type": "string", "description": "Replacement or inserted text" },
                    "insert_line": { "type": "integer", "description": "Line after which to insert" }
                },
                "required": ["command", "path"]
            }),
        ),
        ToolDescriptor::local(
            "computer",
            "Control the display: take screenshots, move and click the mouse, type, press keys, scroll and wait.",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["screenshot", "mouse_move", "left_click", "right_click", "double_click",
                                 "left_click_drag", "type", "key", "scroll", "wait"]
                    },
                    "coordinate": { "type": "array", "items": { "type": "integer" }, "minItems": 2, "maxItems": 2 },
                    "start_coordinate": { "type": "array", "items": { "type": "integer" }, "minItems": 2, "maxItems": 2 },
                    "text": { "type": "string" },
                    "key": { "type": "string" },
                    "direction": { "type": "string", "enum": ["up", "down", "left", "right"] },
                    "amount": { "type": "integer" }
                },
                "required": ["action"]
            }),
        ),
        ToolDescriptor::local(
            "browser",
            "Control a web browser. Actions: navigate, click, type, screenshot, scroll, get_content, wait, go_back, go_forward, refresh.",
            json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["navigate", "click", "type", "screenshot", "scroll",
                                 "get_content", "wait", "go_back", "go_forward", "refresh"]
                    },
                    "params": { "type": "object", "description": "Parameters for the action" }
                },
                "required": ["action"]
            }),
        ),
    ]
}

fn format_bash_output(response: &BashResponse) -> String {
    let mut parts = Vec::new();
    if !response.stdout.is_empty() {
        parts.push(response.stdout.clone());
    }
    if !response.stderr.is_empty() {
        parts.push(format!("STDERR:\n{}", response.stderr));
    }
    if response.return_code != 0 {
        parts.push(format!("\nExit code: {}", response.return_code));
    }

    if parts.is_empty() {
        "(no output)".to_string()
    } else {
        parts.join("\n")
    }
}

fn workspace_path(path: &str) -> String {
    if path.starts_with(WORKSPACE_ROOT) {
        path.to_string()
    } else {
        format!("{}/{}", WORKSPACE_ROOT, path.trim_start_matches('/'))
    }
}

fn number_lines(content: &str) -> String {
    content
        .split('\n')
        .enumerate()
        .map(|(i, line)| format!("{:>4}\t{}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

fn replace_unique(content: &str, old_str: &str, new_str: &str) -> Result<String, ToolError> {
    if old_str.is_empty() {
        return Err(ToolError::execution("old_str must not be empty"));
    }
    match content.matches(old_str).count() {
        0 => Err(ToolError::execution(format!("string not found in file:\n{}", old_str))),
        1 => Ok(content.replacen(old_str, new_str, 1)),
        n => Err(ToolError::execution(format!(
            "string appears {} times. Please provide more context to make it unique.",
            n
        ))),
    }
}

fn insert_at_line(content: &str, insert_line: i64, new_str: &str) -> String {
    let mut lines: Vec<&str> = content.split('\n').collect();
    let at = insert_line.clamp(0, lines.len() as i64) as usize;
    lines.insert(at, new_str);
    lines.join("\n")
}

/// Requested command timeout, capped at the executor's request timeout
fn bash_timeout_secs(requested: &Value, limit: Duration) -> u64 {
    let ceiling = limit.as_secs().max(1);
    requested
        .as_u64()
        .unwrap_or(DEFAULT_BASH_TIMEOUT_SECS)
        .clamp(1, ceiling)
}

/// Scroll clicks to pixels
fn scroll_pixels(amount: i64) -> i64 {
    amount.saturating_mul(100)
}

fn map_key(key: &str) -> &str {
    match key {
        "Return" => "Enter",
        "BackSpace" => "Backspace",
        "space" => " ",
        other => other,
    }
}

fn coordinate(value: &Value, default: (i64, i64)) -> (i64, i64) {
    match value.as_array().map(Vec::as_slice) {
        Some([x, y]) => (x.as_i64().unwrap_or(default.0), y.as_i64().unwrap_or(default.1)),
        _ => default,
    }
}

fn decode_png(image_base64: &str) -> Result<ToolOutput, ToolError> {
    let data = BASE64
        .decode(image_base64)
        .map_err(|e| ToolError::execution(format!("invalid screenshot data: {}", e)))?;
    Ok(ToolOutput::Binary {
        media_type: "image/png".to_string(),
        data,
    })
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &s[..end]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bash_output_formatting() {
        let ok = BashResponse {
            stdout: "hello".to_string(),
            stderr: String::new(),
            return_code: 0,
        };
        assert_eq!(format_bash_output(&ok), "hello");

        let failed = BashResponse {
            stdout: String::new(),
            stderr: "not found".to_string(),
            return_code: 127,
        };
        assert_eq!(format_bash_output(&failed), "STDERR:\nnot found\n\nExit code: 127");

        let silent = BashResponse {
            stdout: String::new(),
            stderr: String::new(),
            return_code: 0,
        };
        assert_eq!(format_bash_output(&silent), "(no output)");
    }

    #[test]
    fn test_paths_are_rooted_in_workspace() {
        assert_eq!(workspace_path("notes.txt"), "/workspace/notes.txt");
        assert_eq!(workspace_path("/etc/passwd"), "/workspace/etc/passwd");
        assert_eq!(workspace_path("/workspace/a/b.rs"), "/workspace/a/b.rs");
    }

    #[test]
    fn test_view_numbers_lines() {
        assert_eq!(number_lines("a\nb"), "   1\ta\n   2\tb");
    }

    #[test]
    fn test_str_replace_requires_unique_match() {
        assert_eq!(replace_unique("let x = 1;", "1", "2").unwrap(), "let x = 2;");
        assert!(replace_unique("a a", "a", "b").unwrap_err().to_string().contains("appears 2 times"));
        assert!(replace_unique("abc", "z", "y").is_err());
        assert!(replace_unique("abc", "", "y").is_err());
    }

    #[test]
    fn test_insert_clamps_line() {
        assert_eq!(insert_at_line("a\nb", 0, "x"), "x\na\nb");
        assert_eq!(insert_at_line("a\nb", 1, "x"), "a\nx\nb");
        assert_eq!(insert_at_line("a\nb", 99, "x"), "a\nb\nx");
        assert_eq!(insert_at_line("a\nb", -4, "x"), "x\na\nb");
    }

    #[test]
    fn test_bash_timeout_is_capped() {
        let limit = Duration::from_secs(180);
        assert_eq!(bash_timeout_secs(&Value::Null, limit), 120);
        assert_eq!(bash_timeout_secs(&json!(30), limit), 30);
        assert_eq!(bash_timeout_secs(&json!(u64::MAX), limit), 180);
        assert_eq!(bash_timeout_secs(&json!(0), limit), 1);
        assert_eq!(bash_timeout_secs(&json!(-5), Duration::from_secs(60)), 60);
    }

    #[test]
    fn test_scroll_amount_saturates() {
        assert_eq!(scroll_pixels(3), 300);
        assert_eq!(scroll_pixels(i64::MAX), i64::MAX);
        assert_eq!(scroll_pixels(i64::MIN), i64::MIN);
    }

    #[test]
    fn test_key_mapping() {
        assert_eq!(map_key("Return"), "Enter");
        assert_eq!(map_key("space"), " ");
        assert_eq!(map_key("Tab"), "Tab");
    }

    #[test]
    fn test_coordinate_defaults() {
        assert_eq!(coordinate(&json!([10, 20]), (0, 0)), (10, 20));
        assert_eq!(coordinate(&Value::Null, (960, 540)), (960, 540));
        assert_eq!(coordinate(&json!([1]), (5, 5)), (5, 5));
    }

    #[test]
    fn test_descriptor_names() {
        let names: Vec<_> = environment_tool_descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["bash", "str_replace_editor", "computer", "browser"]);
    }
}
