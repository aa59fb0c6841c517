//! Tree walk from the abstract syntax into a [`ScenarioPlan`].
//!
//! Variable resolution happens in two tiers: `var`-declared names are
//! substituted eagerly here (compile time); anything else — a built-in like
//! `${VU}`, or a name a request earlier in the flow will extract — is left
//! in the string untouched for the runtime variable engine to resolve.

use crate::ast::{
    AssertionDecl, AssertionField, CompareOp, CompareOperator, Condition, CurlCommand, Expr,
    ExtractionDecl, ExtractionSource, FlowStmt, LoadConfigKind, RequestDecl, RetryConfigDecl,
    ScenarioDecl, TopLevel, UrlSegment, VarDecl, VarValue,
};
use crate::ir::{
    AssertionRule, ConditionRule, EvaluationSettings, ExtractionRule, IrMetadata, LoadProfile,
    PlanNode, RequestRecord, RequestSpec, RetryPolicy, ScenarioPlan, TransportOptions, IR_VERSION,
};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error("unknown request '{0}' referenced in the flow")]
    UnknownRequest(String),
    #[error("scenario '{0}' not found")]
    UnknownScenario(String),
    #[error("no scenario declared in source")]
    NoScenario,
    #[error("multiple scenarios declared; specify one by name")]
    AmbiguousScenario,
}

static VAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{([A-Za-z0-9_.:-]+)\}").unwrap());

pub fn compile(items: &[TopLevel], scenario_name: Option<&str>) -> Result<ScenarioPlan, CompileError> {
    let mut vars: HashMap<String, String> = HashMap::new();
    let mut requests: HashMap<String, &RequestDecl> = HashMap::new();
    let mut scenarios: HashMap<String, &ScenarioDecl> = HashMap::new();

    for item in items {
        match item {
            TopLevel::Var(VarDecl { name, value, .. }) => {
                let rendered = match value {
                    VarValue::Str(s) => s.clone(),
                    VarValue::Number(n) => n.clone(),
                };
                vars.insert(name.clone(), rendered);
            }
            TopLevel::Request(r) => {
                requests.insert(r.name.clone(), r);
            }
            TopLevel::Scenario(s) => {
                scenarios.insert(s.name.clone(), s);
            }
        }
    }

    let scenario = match scenario_name {
        Some(name) => scenarios
            .get(name)
            .ok_or_else(|| CompileError::UnknownScenario(name.to_string()))?,
        None => {
            if scenarios.len() == 1 {
                scenarios.values().next().unwrap()
            } else if scenarios.is_empty() {
                return Err(CompileError::NoScenario);
            } else {
                return Err(CompileError::AmbiguousScenario);
            }
        }
    };

    let load = lower_load_config(&scenario.load.kind);

    let mut main = Vec::new();
    for stmt in &scenario.flow {
        main.push(lower_flow_stmt(stmt, &requests, &vars, &scenario.name)?);
    }

    Ok(ScenarioPlan {
        name: scenario.name.clone(),
        load,
        setup: Vec::new(),
        main,
        teardown: Vec::new(),
        variables: vars
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    })
}

fn lower_load_config(kind: &LoadConfigKind) -> LoadProfile {
    match *kind {
        LoadConfigKind::VusForDuration { vus, duration_ms } => {
            LoadProfile::VusForDuration { vus, duration_ms }
        }
        LoadConfigKind::RpsForDuration { rps, duration_ms } => {
            LoadProfile::RpsForDuration { rps, duration_ms }
        }
        LoadConfigKind::IterationsWithVus { iterations, vus } => {
            LoadProfile::IterationsWithVus { iterations, vus }
        }
    }
}

fn lower_flow_stmt(
    stmt: &FlowStmt,
    requests: &HashMap<String, &RequestDecl>,
    vars: &HashMap<String, String>,
    scenario_name: &str,
) -> Result<PlanNode, CompileError> {
    match stmt {
        FlowStmt::Run(name) => lower_request_node(name, requests, vars, scenario_name),
        FlowStmt::Sequential(chain) => lower_chain(chain, requests, vars, scenario_name),
        FlowStmt::Nested {
            parent,
            children,
            parallel,
        } => {
            let mut node = lower_request_node(parent, requests, vars, scenario_name)?;
            let mut lowered_children = Vec::new();
            for child in children {
                lowered_children.push(lower_flow_stmt(child, requests, vars, scenario_name)?);
            }
            node.children.extend(lowered_children);
            node.parallel = *parallel;
            Ok(node)
        }
        FlowStmt::Conditional {
            cond,
            then_branch,
            else_branch,
        } => {
            let mut then_nodes = Vec::new();
            for s in then_branch {
                then_nodes.push(lower_flow_stmt(s, requests, vars, scenario_name)?);
            }
            let mut else_nodes = Vec::new();
            for s in else_branch {
                else_nodes.push(lower_flow_stmt(s, requests, vars, scenario_name)?);
            }
            Ok(PlanNode {
                name: format!("{}::if", scenario_name),
                ir: None,
                extract: Vec::new(),
                assert: Vec::new(),
                parallel: false,
                condition: Some(lower_condition(cond)),
                children: then_nodes,
                else_children: else_nodes,
                retry: None,
            })
        }
    }
}

fn lower_chain(
    chain: &[String],
    requests: &HashMap<String, &RequestDecl>,
    vars: &HashMap<String, String>,
    scenario_name: &str,
) -> Result<PlanNode, CompileError> {
    let (first, rest) = chain
        .split_first()
        .expect("parser never produces an empty chain");
    let mut head = lower_request_node(first, requests, vars, scenario_name)?;
    if rest.is_empty() {
        return Ok(head);
    }
    head.children
        .push(lower_chain(rest, requests, vars, scenario_name)?);
    Ok(head)
}

fn lower_condition(cond: &Condition) -> ConditionRule {
    ConditionRule {
        left: expr_to_string(&cond.left),
        op: compare_op_to_string(cond.op).to_string(),
        right: expr_to_string(&cond.right),
    }
}

fn expr_to_string(e: &Expr) -> String {
    match e {
        Expr::Literal(s) => s.clone(),
        Expr::VarRef(n) => format!("${{{}}}", n),
    }
}

fn compare_op_to_string(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "==",
        CompareOp::Neq => "!=",
        CompareOp::Lt => "<",
        CompareOp::Lte => "<=",
        CompareOp::Gt => ">",
        CompareOp::Gte => ">=",
    }
}

fn lower_request_node(
    name: &str,
    requests: &HashMap<String, &RequestDecl>,
    vars: &HashMap<String, String>,
    scenario_name: &str,
) -> Result<PlanNode, CompileError> {
    let decl = requests
        .get(name)
        .ok_or_else(|| CompileError::UnknownRequest(name.to_string()))?;

    let ir = translate_request(decl, vars, scenario_name)?;
    let extract = decl.extractions.iter().map(lower_extraction).collect();
    let assert = decl.assertions.iter().map(lower_assertion).collect();
    let retry = decl.retry.as_ref().map(lower_retry);

    Ok(PlanNode {
        name: name.to_string(),
        ir: Some(ir),
        extract,
        assert,
        parallel: false,
        condition: None,
        children: Vec::new(),
        else_children: Vec::new(),
        retry,
    })
}

fn lower_extraction(decl: &ExtractionDecl) -> ExtractionRule {
    let source = match &decl.source {
        ExtractionSource::JsonPath(p) => p.clone(),
        ExtractionSource::Regex(p) => format!("regex:{}", p),
        ExtractionSource::Header(n) => format!("header:{}", n),
        ExtractionSource::Cookie(n) => format!("cookie:{}", n),
    };
    ExtractionRule {
        name: decl.name.clone(),
        source,
    }
}

fn lower_assertion(decl: &AssertionDecl) -> AssertionRule {
    let field = match &decl.field {
        AssertionField::Status => "status".to_string(),
        AssertionField::Latency => "latency".to_string(),
        AssertionField::Path { root, path } => {
            if path.is_empty() {
                root.clone()
            } else {
                format!("{}.{}", root, path)
            }
        }
    };
    let operator = match decl.operator {
        CompareOperator::Eq => "==",
        CompareOperator::Neq => "!=",
        CompareOperator::Lt => "<",
        CompareOperator::Lte => "<=",
        CompareOperator::Gt => ">",
        CompareOperator::Gte => ">=",
        CompareOperator::Contains => "contains",
        CompareOperator::In => "in",
    }
    .to_string();
    let value = expr_to_json(&decl.value);
    AssertionRule {
        field,
        operator,
        value,
    }
}

fn expr_to_json(e: &Expr) -> serde_json::Value {
    match e {
        Expr::VarRef(n) => serde_json::Value::String(format!("${{{}}}", n)),
        Expr::Literal(s) => {
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(s) {
                if v.is_array() || v.is_number() || v.is_boolean() {
                    return v;
                }
            }
            serde_json::Value::String(s.clone())
        }
    }
}

fn lower_retry(decl: &RetryConfigDecl) -> RetryPolicy {
    RetryPolicy {
        max_attempts: decl.max_attempts,
        backoff_ms: decl.backoff_ms,
        base_delay_ms: decl.base_delay_ms,
    }
}

fn translate_request(
    decl: &RequestDecl,
    vars: &HashMap<String, String>,
    scenario_name: &str,
) -> Result<RequestRecord, CompileError> {
    let curl: &CurlCommand = &decl.curl;

    let url_rendered = render_url(&curl.url_segments, vars);
    let (url, query_from_url) = crate::curl::split_query(&url_rendered);

    let mut headers: HashMap<String, String> = curl
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), substitute_compile_time(v, vars)))
        .collect();
    let cookies: HashMap<String, String> = curl
        .cookies
        .iter()
        .map(|(k, v)| (k.clone(), substitute_compile_time(v, vars)))
        .collect();

    if let Some(ua) = &curl.user_agent {
        headers
            .entry("User-Agent".to_string())
            .or_insert_with(|| substitute_compile_time(ua, vars));
    }

    let mut query = query_from_url;
    let body = if curl.query_only {
        if let Some(raw) = &curl.body {
            let rendered = substitute_compile_time(raw, vars);
            for pair in rendered.split('&').filter(|p| !p.is_empty()) {
                if let Some((k, v)) = pair.split_once('=') {
                    query.push((k.to_string(), v.to_string()));
                }
            }
        }
        None
    } else if let Some(raw) = &curl.body {
        let rendered = substitute_compile_time(raw, vars);
        Some(crate::curl::infer_body(&rendered, curl.data_binary, &mut headers))
    } else {
        None
    };

    let auth = crate::curl::translate_auth(&curl.auth);

    let transport = TransportOptions {
        tls_verify: !curl.insecure,
        follow_redirects: curl.follow_redirects,
        max_redirects: curl.max_redirects.unwrap_or(10),
        timeout_ms: curl
            .timeout_ms
            .or(curl.connect_timeout_ms)
            .unwrap_or(30_000),
        proxy: curl.proxy.clone(),
    };

    Ok(RequestRecord {
        version: IR_VERSION.to_string(),
        metadata: IrMetadata {
            id: format!("{}::{}", scenario_name, decl.name),
            source: decl.name.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
            tags: Vec::new(),
        },
        request: RequestSpec {
            method: curl.method.clone(),
            url,
            query,
            headers,
            cookies,
            body,
            auth,
        },
        transport,
        evaluation: EvaluationSettings::default(),
    })
}

fn render_url(segments: &[UrlSegment], vars: &HashMap<String, String>) -> String {
    segments
        .iter()
        .map(|seg| match seg {
            UrlSegment::Literal(s) => s.clone(),
            UrlSegment::Var(name) => match vars.get(name) {
                Some(v) => v.clone(),
                None => format!("${{{}}}", name),
            },
        })
        .collect()
}

fn substitute_compile_time(s: &str, vars: &HashMap<String, String>) -> String {
    VAR_RE
        .replace_all(s, |caps: &regex::Captures| {
            let name = &caps[1];
            vars.get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn compiles_simple_scenario() {
        let src = r#"
var base = "https://example.invalid"

request ping {
    curl ${base}/ping
    assert status == 200
}

scenario smoke {
    load(vus = 2, duration = 5s)
    run ping
}
"#;
        let items = parse(src).unwrap();
        let plan = compile(&items, None).unwrap();
        assert_eq!(plan.name, "smoke");
        assert_eq!(plan.main.len(), 1);
        let node = &plan.main[0];
        assert_eq!(node.ir.as_ref().unwrap().request.url, "https://example.invalid/ping");
    }

    #[test]
    fn rejects_unknown_request_reference() {
        let src = r#"
scenario s {
    load(vus = 1, duration = 1s)
    run nope
}
"#;
        let items = parse(src).unwrap();
        let err = compile(&items, None).unwrap_err();
        assert!(matches!(err, CompileError::UnknownRequest(_)));
    }

    #[test]
    fn lowers_sequential_chain() {
        let src = r#"
request a { curl https://example.invalid/a }
request b { curl https://example.invalid/b }
scenario s {
    load(vus = 1, duration = 1s)
    a -> b
}
"#;
        let items = parse(src).unwrap();
        let plan = compile(&items, None).unwrap();
        let head = &plan.main[0];
        assert_eq!(head.name, "a");
        assert_eq!(head.children.len(), 1);
        assert_eq!(head.children[0].name, "b");
    }

    #[test]
    fn unknown_set_for_runtime_is_left_textual() {
        let src = r#"
request r {
    curl https://example.invalid/users/${id}
}
scenario s {
    load(vus = 1, duration = 1s)
    run r
}
"#;
        let items = parse(src).unwrap();
        let plan = compile(&items, None).unwrap();
        assert!(plan.main[0]
            .ir
            .as_ref()
            .unwrap()
            .request
            .url
            .contains("${id}"));
    }
}
