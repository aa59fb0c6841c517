//! The evaluator gateway: invokes an external program with one evaluation
//! context as JSON on stdin, reads one verdict as JSON from stdout, and
//! falls back to a built-in default evaluator on any departure from that
//! contract. Stateless across calls — it holds no state between them,
//! mirroring the old `StepExecutor` trait's `&self`-only contract.

use crate::errors::ErrorCode;
use crate::ir::{Body, RequestRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, AsyncReadExt};
use tokio::process::Command;

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationContext {
    pub ir: RequestRecord,
    pub sent: SentRequest,
    pub response: ObservedResponse,
    pub vars: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SentRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObservedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: ResponseBody,
    pub latency_ms: u64,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Raw `Set-Cookie` header values, kept alongside the collapsed
    /// `headers` map since a response can carry more than one.
    #[serde(default)]
    pub set_cookie: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            ResponseBody::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            ResponseBody::Json(v) => v.to_string(),
            ResponseBody::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Verdict {
    pub decision: Decision,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mutations: Option<Mutations>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Actions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Retry,
    Fail,
    Branch,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Mutations {
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub query: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub body: Option<Body>,
    #[serde(default)]
    pub vars: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Actions {
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub goto: Option<String>,
    #[serde(default)]
    pub extract: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub kind: String,
    pub path: Option<String>,
    pub timeout_ms: u64,
}

pub async fn run(config: &EvaluatorConfig, ctx: &EvaluationContext) -> Verdict {
    match try_run_external(config, ctx).await {
        Ok(verdict) => verdict,
        Err(reason) => default_evaluator(&ctx.response, Some(reason)),
    }
}

async fn try_run_external(config: &EvaluatorConfig, ctx: &EvaluationContext) -> Result<Verdict, String> {
    if config.kind == "default" {
        return Err("no evaluator configured".to_string());
    }
    let path = config
        .path
        .as_deref()
        .ok_or_else(|| "no evaluator path configured".to_string())?;

    let mut cmd = build_command(&config.kind, path)?;
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("[{}] failed to spawn evaluator: {}", ErrorCode::EVALUATOR_SPAWN_FAILED, e))?;

    let payload = serde_json::to_vec(ctx)
        .map_err(|e| format!("[{}] failed to serialize context: {}", ErrorCode::INTERNAL_ERROR, e))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| format!("failed to write evaluator stdin: {}", e))?;
    }

    let timeout = Duration::from_millis(config.timeout_ms);
    let output = tokio::time::timeout(timeout, read_all_stdout(&mut child)).await;

    let stdout = match output {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            let _ = child.kill().await;
            return Err(format!("evaluator I/O error: {}", e));
        }
        Err(_) => {
            let _ = child.kill().await;
            return Err(format!("[{}] evaluator timed out", ErrorCode::EVALUATOR_TIMEOUT));
        }
    };

    let status = child
        .wait()
        .await
        .map_err(|e| format!("failed waiting on evaluator: {}", e))?;
    if !status.success() {
        return Err(format!(
            "[{}] evaluator exited with status {:?}",
            ErrorCode::EVALUATOR_NONZERO_EXIT,
            status.code()
        ));
    }

    let verdict: Verdict = serde_json::from_slice(&stdout).map_err(|e| {
        format!(
            "[{}] malformed verdict JSON: {}",
            ErrorCode::EVALUATOR_MALFORMED_VERDICT,
            e
        )
    })?;

    validate_verdict(&verdict)?;
    Ok(verdict)
}

async fn read_all_stdout(child: &mut tokio::process::Child) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(stdout) = child.stdout.as_mut() {
        stdout.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

fn validate_verdict(verdict: &Verdict) -> Result<(), String> {
    if verdict.decision == Decision::Branch {
        let has_goto = verdict
            .actions
            .as_ref()
            .and_then(|a| a.goto.as_ref())
            .is_some();
        if !has_goto {
            return Err(format!(
                "[{}] branch verdict missing actions.goto",
                ErrorCode::EVALUATOR_INVALID_VERDICT
            ));
        }
    }
    Ok(())
}

fn build_command(kind: &str, path: &str) -> Result<Command, String> {
    match kind {
        "bun" => {
            let mut cmd = Command::new("bun");
            cmd.arg(path);
            Ok(cmd)
        }
        "python" => {
            let interpreter = if which("mojo") { "mojo" } else { "python3" };
            let mut cmd = Command::new(interpreter);
            cmd.arg(path);
            Ok(cmd)
        }
        "go" => Ok(Command::new(path)),
        other => Err(format!("unknown evaluator kind '{}'", other)),
    }
}

/// Searches `PATH` for an executable with this name, the same probing idiom
/// the execution-limits loader uses for environment configuration, applied
/// here to an executable name instead of an env var.
fn which(name: &str) -> bool {
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(name).is_file())
}

pub fn default_evaluator(response: &ObservedResponse, fallback_reason: Option<String>) -> Verdict {
    let decision = if response.status != 0 && response.status < 400 {
        Decision::Pass
    } else {
        Decision::Fail
    };
    let mut metadata = HashMap::new();
    if let Some(reason) = fallback_reason {
        metadata.insert("evaluator_fallback".to_string(), Value::String(reason));
    }
    Verdict {
        decision,
        reason: response.status.to_string(),
        mutations: None,
        actions: None,
        metadata: if metadata.is_empty() { None } else { Some(metadata) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> ObservedResponse {
        ObservedResponse {
            status,
            headers: HashMap::new(),
            body: ResponseBody::Text(String::new()),
            latency_ms: 1,
            bytes: 0,
            error: None,
            set_cookie: Vec::new(),
        }
    }

    #[test]
    fn default_evaluator_passes_under_400() {
        let verdict = default_evaluator(&response(200), None);
        assert_eq!(verdict.decision, Decision::Pass);
    }

    #[test]
    fn default_evaluator_fails_at_or_above_400() {
        let verdict = default_evaluator(&response(404), None);
        assert_eq!(verdict.decision, Decision::Fail);
    }

    #[test]
    fn branch_without_goto_is_invalid() {
        let verdict = Verdict {
            decision: Decision::Branch,
            reason: String::new(),
            mutations: None,
            actions: None,
            metadata: None,
        };
        assert!(validate_verdict(&verdict).is_err());
    }

    #[test]
    fn branch_with_goto_is_valid() {
        let verdict = Verdict {
            decision: Decision::Branch,
            reason: String::new(),
            mutations: None,
            actions: Some(Actions {
                goto: Some("retry_step".to_string()),
                ..Default::default()
            }),
            metadata: None,
        };
        assert!(validate_verdict(&verdict).is_ok());
    }

    #[tokio::test]
    async fn missing_evaluator_path_falls_back_to_default() {
        let config = EvaluatorConfig {
            kind: "bun".to_string(),
            path: None,
            timeout_ms: 1000,
        };
        let ctx = EvaluationContext {
            ir: serde_json::from_value(serde_json::json!({
                "version": "1.0",
                "metadata": {"id": "x", "source": "x", "created_at": "now"},
                "request": {"method": "GET", "url": "https://example.invalid"},
                "transport": {},
                "evaluation": {}
            }))
            .unwrap(),
            sent: SentRequest {
                method: "GET".to_string(),
                url: "https://example.invalid".to_string(),
                headers: HashMap::new(),
                body: None,
            },
            response: response(200),
            vars: HashMap::new(),
        };
        let verdict = run(&config, &ctx).await;
        assert_eq!(verdict.decision, Decision::Pass);
    }
}
