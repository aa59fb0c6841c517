//! Abstract tree produced by the parser.
//!
//! This is a direct tree, not a typed grammar with position info baked into
//! every node — positions live on the tokens that produced each node and are
//! carried only where a later stage (the compiler) needs to report back to a
//! source location (`RequestDecl.pos`, `ScenarioDecl.pos`).

use crate::lexer::error::Position;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum TopLevel {
    Var(VarDecl),
    Request(RequestDecl),
    Scenario(ScenarioDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    pub value: VarValue,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VarValue {
    Str(String),
    Number(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestDecl {
    pub name: String,
    pub curl: CurlCommand,
    pub assertions: Vec<AssertionDecl>,
    pub extractions: Vec<ExtractionDecl>,
    pub retry: Option<RetryConfigDecl>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioDecl {
    pub name: String,
    pub load: LoadConfig,
    pub flow: Vec<FlowStmt>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlowStmt {
    Run(String),
    Sequential(Vec<String>),
    Nested {
        parent: String,
        children: Vec<FlowStmt>,
        parallel: bool,
    },
    Conditional {
        cond: Condition,
        then_branch: Vec<FlowStmt>,
        else_branch: Vec<FlowStmt>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub left: Expr,
    pub op: CompareOp,
    pub right: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(String),
    VarRef(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurlCommand {
    pub method: String,
    pub url_segments: Vec<UrlSegment>,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub cookies: HashMap<String, String>,
    pub auth: Option<CurlAuth>,
    pub insecure: bool,
    pub follow_redirects: bool,
    pub max_redirects: Option<u32>,
    pub proxy: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub user_agent: Option<String>,
    pub data_binary: bool,
    pub query_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UrlSegment {
    Literal(String),
    Var(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CurlAuth {
    Basic { user: String, password: String },
    Bearer(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssertionDecl {
    pub field: AssertionField,
    pub operator: CompareOperator,
    pub value: Expr,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssertionField {
    Status,
    Latency,
    /// Dotted path rooted at `body` or `header`, e.g. `body.user.id`.
    Path { root: String, path: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionDecl {
    pub name: String,
    pub source: ExtractionSource,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionSource {
    JsonPath(String),
    Regex(String),
    Header(String),
    Cookie(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfigDecl {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub base_delay_ms: u64,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadConfig {
    pub kind: LoadConfigKind,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LoadConfigKind {
    VusForDuration { vus: u32, duration_ms: u64 },
    RpsForDuration { rps: u32, duration_ms: u64 },
    IterationsWithVus { iterations: u32, vus: u32 },
}
