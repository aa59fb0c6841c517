//! The request record (IR) and scenario plan types that the compiler emits
//! and the executor/driver consume. These are the on-the-wire JSON shapes
//! described in the external interface: a `RequestRecord` round-trips
//! through `translate-curl`/`validate-ir`/`exec-file` unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const IR_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub version: String,
    pub metadata: IrMetadata,
    pub request: RequestSpec,
    pub transport: TransportOptions,
    pub evaluation: EvaluationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrMetadata {
    pub id: String,
    pub source: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Body>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

/// Tagged by hand rather than via `#[serde(tag = "type")]` because the
/// payload key itself changes name between `binary` (`content_base64`) and
/// every other variant (`content`).
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Form(HashMap<String, String>),
    Text(String),
    Binary(String),
}

impl Serialize for Body {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(None)?;
        match self {
            Body::Json(v) => {
                map.serialize_entry("type", "json")?;
                map.serialize_entry("content", v)?;
            }
            Body::Form(v) => {
                map.serialize_entry("type", "form")?;
                map.serialize_entry("content", v)?;
            }
            Body::Text(v) => {
                map.serialize_entry("type", "text")?;
                map.serialize_entry("content", v)?;
            }
            Body::Binary(v) => {
                map.serialize_entry("type", "binary")?;
                map.serialize_entry("content_base64", v)?;
            }
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Body {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(rename = "type")]
            kind: String,
            #[serde(default)]
            content: Option<Value>,
            #[serde(default)]
            content_base64: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        match raw.kind.as_str() {
            "json" => Ok(Body::Json(raw.content.unwrap_or(Value::Null))),
            "form" => {
                let content = raw.content.unwrap_or(Value::Null);
                let form: HashMap<String, String> = serde_json::from_value(content)
                    .map_err(serde::de::Error::custom)?;
                Ok(Body::Form(form))
            }
            "text" => {
                let content = raw.content.unwrap_or(Value::Null);
                let s = content.as_str().unwrap_or_default().to_string();
                Ok(Body::Text(s))
            }
            "binary" => Ok(Body::Binary(raw.content_base64.unwrap_or_default())),
            other => Err(serde::de::Error::custom(format!(
                "unknown body type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Auth {
    Basic { username: String, password: String },
    Bearer { token: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportOptions {
    #[serde(default = "default_true")]
    pub tls_verify: bool,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            tls_verify: true,
            follow_redirects: true,
            max_redirects: default_max_redirects(),
            timeout_ms: default_timeout_ms(),
            proxy: None,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_redirects() -> u32 {
    10
}
fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSettings {
    #[serde(default = "default_evaluator")]
    pub evaluator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluator_path: Option<String>,
    #[serde(default = "default_evaluator_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub vars: HashMap<String, Value>,
}

impl Default for EvaluationSettings {
    fn default() -> Self {
        Self {
            evaluator: default_evaluator(),
            evaluator_path: None,
            timeout_ms: default_evaluator_timeout_ms(),
            vars: HashMap::new(),
        }
    }
}

fn default_evaluator() -> String {
    "default".to_string()
}
fn default_evaluator_timeout_ms() -> u64 {
    5_000
}

// --------------------------------------------------------------------
// Scenario plan
// --------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioPlan {
    pub name: String,
    pub load: LoadProfile,
    #[serde(default)]
    pub setup: Vec<RequestRecord>,
    #[serde(default)]
    pub main: Vec<PlanNode>,
    #[serde(default)]
    pub teardown: Vec<RequestRecord>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LoadProfile {
    VusForDuration { vus: u32, duration_ms: u64 },
    RpsForDuration { rps: u32, duration_ms: u64 },
    IterationsWithVus { iterations: u32, vus: u32 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanNode {
    pub name: String,
    /// `None` marks a pure control node (a conditional gate with no request
    /// of its own) — it only evaluates `condition` and descends into
    /// `children` or `else_children`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ir: Option<RequestRecord>,
    #[serde(default)]
    pub extract: Vec<ExtractionRule>,
    #[serde(default)]
    pub assert: Vec<AssertionRule>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionRule>,
    #[serde(default)]
    pub children: Vec<PlanNode>,
    #[serde(default)]
    pub else_children: Vec<PlanNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRule {
    pub left: String,
    pub op: String,
    pub right: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub name: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssertionRule {
    pub field: String,
    pub operator: String,
    pub value: Value,
}
