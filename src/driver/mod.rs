//! The load driver: runs a compiled [`ScenarioPlan`] under one of its three
//! load profiles, spinning one `tokio` task per VU (the teacher's DAG
//! planner used the same `Arc` + `JoinSet` shape for step-level
//! concurrency; here the unit of concurrency is a VU instead of a step).
//! Within one VU's iteration, a `parallel` nested block spawns its children
//! as sibling tasks of their own, each working against its own cloned
//! `Context`/`CookieJar`, merged back into the parent once every sibling has
//! been awaited.
//!
//! Setup runs once, sequentially, before any VU starts. Teardown runs once,
//! sequentially, after every VU has finished. Progress is reported on a
//! bounded channel that the driver never blocks on — a full channel means
//! the consumer is behind, and an iteration would rather keep going than
//! stall the run.
//!
//! [`ExecutionLimits::max_execution_time`](crate::limits::ExecutionLimits)
//! backstops the whole run via a watchdog task that cancels a shared
//! [`CancellationToken`]; `max_step_timeout` caps every executor's
//! per-request timeout at build time.

use crate::context::{BuiltinResolver, Context};
use crate::cookie::CookieJar;
use crate::evaluator::EvaluatorConfig;
use crate::executor::HttpExecutor;
use crate::ir::{Body, ConditionRule, PlanNode, RequestRecord, RequestSpec, ScenarioPlan, LoadProfile};
use crate::limits::ExecutionLimits;
use crate::progress::{ProgressEvent, Stats};
use crate::{assert, extract, retry};
use anyhow::{anyhow, Context as _, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct DriverConfig {
    pub evaluator: EvaluatorConfig,
    pub limits: ExecutionLimits,
}

pub async fn run(
    plan: ScenarioPlan,
    config: DriverConfig,
    progress_tx: Option<mpsc::Sender<ProgressEvent>>,
) -> Result<Stats> {
    let violation = crate::limits::validate_plan(&plan, &config.limits);
    if !violation.passed {
        let messages: Vec<String> = violation.violations.iter().map(|v| v.message.clone()).collect();
        return Err(anyhow!("plan exceeds execution limits: {}", messages.join("; ")));
    }

    let max_step_timeout = config.limits.max_step_timeout;
    let mut executors = HashMap::new();
    build_executors(&plan.main, &mut executors, max_step_timeout)?;
    let executors = Arc::new(executors);

    let mut setup_cookies = CookieJar::new();
    let mut setup_ctx = Context::new();
    setup_ctx.extend(&plan.variables);
    for record in &plan.setup {
        run_bare_record(record, &config.evaluator, &mut setup_cookies, &mut setup_ctx, max_step_timeout).await?;
    }

    let plan = Arc::new(plan);
    let evaluator = Arc::new(config.evaluator);
    let counter = Arc::new(AtomicU64::new(0));
    let stats = Arc::new(tokio::sync::Mutex::new(Stats::new()));

    let cancel = CancellationToken::new();
    let start = Instant::now();

    // Whole-run backstop: a scenario can ask for any `duration_ms`/
    // `iterations`, so this is the only thing actually bounding total wall
    // time. Aborted once the dispatch below returns on its own.
    let watchdog = {
        let cancel = cancel.clone();
        let max_execution_time = config.limits.max_execution_time;
        tokio::spawn(async move {
            tokio::time::sleep(max_execution_time).await;
            cancel.cancel();
        })
    };

    match &plan.load {
        LoadProfile::VusForDuration { vus, duration_ms } => {
            run_vus(*vus, Some(*duration_ms), None, &plan, &executors, &evaluator, &counter, &stats, &progress_tx, &cancel).await?;
        }
        LoadProfile::RpsForDuration { rps, duration_ms } => {
            run_rps(*rps, *duration_ms, &plan, &executors, &evaluator, &counter, &stats, &progress_tx, &cancel).await?;
        }
        LoadProfile::IterationsWithVus { iterations, vus } => {
            run_vus(*vus, None, Some(*iterations), &plan, &executors, &evaluator, &counter, &stats, &progress_tx, &cancel).await?;
        }
    }

    watchdog.abort();
    if cancel.is_cancelled() {
        warn!(max_execution_secs = config.limits.max_execution_time.as_secs(), "run hit max_execution_time, stopped early");
    }

    info!(elapsed_ms = start.elapsed().as_millis() as u64, "load run finished");

    let mut teardown_cookies = CookieJar::new();
    let mut teardown_ctx = Context::new();
    teardown_ctx.extend(&plan.variables);
    for record in &plan.teardown {
        run_bare_record(record, &evaluator, &mut teardown_cookies, &mut teardown_ctx, max_step_timeout).await?;
    }

    let stats = Arc::try_unwrap(stats)
        .map_err(|_| anyhow!("stats still shared after all VUs finished"))?
        .into_inner();
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
async fn run_vus(
    vus: u32,
    duration_ms: Option<u64>,
    iterations_per_vu: Option<u32>,
    plan: &Arc<ScenarioPlan>,
    executors: &Arc<HashMap<String, Arc<HttpExecutor>>>,
    evaluator: &Arc<EvaluatorConfig>,
    counter: &Arc<AtomicU64>,
    stats: &Arc<tokio::sync::Mutex<Stats>>,
    progress_tx: &Option<mpsc::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let deadline = duration_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    let mut join_set = JoinSet::new();

    for vu in 1..=vus as u64 {
        let plan = Arc::clone(plan);
        let executors = Arc::clone(executors);
        let evaluator = Arc::clone(evaluator);
        let counter = Arc::clone(counter);
        let stats = Arc::clone(stats);
        let progress_tx = progress_tx.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
            run_vu(vu, deadline, iterations_per_vu, &plan, &executors, &evaluator, &counter, &stats, &progress_tx, &cancel).await
        });
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "VU task panicked");
        }
    }
    Ok(())
}

/// Fires one request start per `1/RPS` tick until `duration_ms` passes, each
/// tick spawning a fresh task running one iteration. VU accounting is
/// synthetic here: the tick index rolls a virtual-user identifier every
/// `rps` ticks, purely for log/progress de-duplication — it carries no
/// session continuity the way a real VU's identifier does.
#[allow(clippy::too_many_arguments)]
async fn run_rps(
    rps: u32,
    duration_ms: u64,
    plan: &Arc<ScenarioPlan>,
    executors: &Arc<HashMap<String, Arc<HttpExecutor>>>,
    evaluator: &Arc<EvaluatorConfig>,
    counter: &Arc<AtomicU64>,
    stats: &Arc<tokio::sync::Mutex<Stats>>,
    progress_tx: &Option<mpsc::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) -> Result<()> {
    let rps = rps.max(1) as u64;
    let deadline = Instant::now() + Duration::from_millis(duration_ms);
    let mut ticker = tokio::time::interval(Duration::from_secs_f64(1.0 / rps as f64));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Burst);

    let mut join_set = JoinSet::new();
    let mut tick: u64 = 0;

    loop {
        if Instant::now() >= deadline || cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        if Instant::now() >= deadline {
            break;
        }

        let vu = tick / rps + 1;
        let iteration = tick % rps + 1;
        tick += 1;

        let plan = Arc::clone(plan);
        let executors = Arc::clone(executors);
        let evaluator = Arc::clone(evaluator);
        let counter = Arc::clone(counter);
        let stats = Arc::clone(stats);
        let progress_tx = progress_tx.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let mut cookies = CookieJar::new();
            run_one_iteration(vu, iteration, &plan, &executors, &evaluator, &counter, &mut cookies, &stats, &progress_tx, &cancel).await;
        });
    }

    while let Some(joined) = join_set.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "RPS tick task panicked");
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_vu(
    vu: u64,
    deadline: Option<Instant>,
    iterations_cap: Option<u32>,
    plan: &Arc<ScenarioPlan>,
    executors: &Arc<HashMap<String, Arc<HttpExecutor>>>,
    evaluator: &Arc<EvaluatorConfig>,
    counter: &Arc<AtomicU64>,
    stats: &Arc<tokio::sync::Mutex<Stats>>,
    progress_tx: &Option<mpsc::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) {
    send_progress(progress_tx, ProgressEvent::VuStarted { vu });

    let mut cookies = CookieJar::new();
    let mut iteration: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        if let Some(cap) = iterations_cap {
            if iteration >= cap as u64 {
                break;
            }
        }

        iteration += 1;
        run_one_iteration(vu, iteration, plan, executors, evaluator, counter, &mut cookies, stats, progress_tx, cancel).await;
    }

    send_progress(progress_tx, ProgressEvent::VuFinished { vu, iterations: iteration });
}

#[allow(clippy::too_many_arguments)]
async fn run_one_iteration(
    vu: u64,
    iteration: u64,
    plan: &Arc<ScenarioPlan>,
    executors: &Arc<HashMap<String, Arc<HttpExecutor>>>,
    evaluator: &Arc<EvaluatorConfig>,
    counter: &Arc<AtomicU64>,
    cookies: &mut CookieJar,
    stats: &Arc<tokio::sync::Mutex<Stats>>,
    progress_tx: &Option<mpsc::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) {
    send_progress(progress_tx, ProgressEvent::IterationStarted { vu, iteration });

    let builtins = BuiltinResolver::new(vu, Arc::clone(counter)).for_iteration(iteration);
    let mut ctx = Context::with_builtins(builtins);
    ctx.extend(&plan.variables);

    for node in &plan.main {
        if let Err(e) = execute_node(node, &mut ctx, cookies, executors, evaluator, vu, iteration, stats, progress_tx, cancel).await {
            warn!(vu, iteration, error = %e, "node execution aborted");
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_node<'a>(
    node: &'a PlanNode,
    ctx: &'a mut Context,
    cookies: &'a mut CookieJar,
    executors: &'a Arc<HashMap<String, Arc<HttpExecutor>>>,
    evaluator: &'a Arc<EvaluatorConfig>,
    vu: u64,
    iteration: u64,
    stats: &'a Arc<tokio::sync::Mutex<Stats>>,
    progress_tx: &'a Option<mpsc::Sender<ProgressEvent>>,
    cancel: &'a CancellationToken,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if let Some(record) = &node.ir {
            let executor = executors
                .get(&node.name)
                .ok_or_else(|| anyhow!("no HTTP executor built for node '{}'", node.name))?;

            let rendered = render_record(record, ctx)?;
            let outcome = retry::run_with_retry(
                executor,
                rendered,
                node.retry.as_ref(),
                evaluator,
                cookies,
                ctx.variables.clone(),
                cancel,
            )
            .await?;

            let event = ProgressEvent::RequestCompleted {
                vu,
                iteration,
                step: node.name.clone(),
                status: outcome.response.status,
                latency_ms: outcome.response.latency_ms,
                bytes: outcome.response.bytes,
                error: outcome.response.error.clone(),
            };
            stats.lock().await.record(&event);
            send_progress(progress_tx, event);

            for rule in &node.extract {
                let input = extract::ExtractionInput {
                    body_json: outcome.response.body.as_json(),
                    body_text: &outcome.response.body.as_text(),
                    headers: &outcome.response.headers,
                    set_cookie_headers: &outcome.response.set_cookie,
                };
                match extract::extract_value(&rule.source, &input) {
                    Ok(value) => ctx.set(rule.name.clone(), value),
                    Err(e) => warn!(node = %node.name, rule = %rule.name, error = %e, "extraction failed"),
                }
            }

            for rule in &node.assert {
                let input = assert::AssertionInput {
                    status: outcome.response.status,
                    latency_ms: outcome.response.latency_ms,
                    body_json: outcome.response.body.as_json(),
                    headers: &outcome.response.headers,
                };
                let outcome = assert::evaluate(&rule.field, &rule.operator, &rule.value, &input);
                if !outcome.passed {
                    if let Some(err) = outcome.error {
                        warn!(node = %node.name, "{}", err);
                    }
                }
            }
        }

        if let Some(condition) = &node.condition {
            let branch = if evaluate_condition(condition, ctx) {
                &node.children
            } else {
                &node.else_children
            };
            for child in branch {
                execute_node(child, ctx, cookies, executors, evaluator, vu, iteration, stats, progress_tx, cancel).await?;
            }
        } else if node.parallel && !node.children.is_empty() {
            run_parallel_children(&node.children, ctx, cookies, executors, evaluator, vu, iteration, stats, progress_tx, cancel).await;
        } else if !node.children.is_empty() {
            for child in &node.children {
                execute_node(child, ctx, cookies, executors, evaluator, vu, iteration, stats, progress_tx, cancel).await?;
            }
        }

        Ok(())
    })
}

/// Runs a `parallel` nested block's children as sibling tasks, each against
/// its own cloned `Context`/`CookieJar` (since the siblings otherwise have no
/// conflict-free way to share one mutable variable map or jar across task
/// boundaries), and merges every sibling's resulting variables and cookies
/// back into the parent once all have been awaited. Merge order across
/// siblings is unspecified — extractions from one branch stepping on another
/// branch's extraction of the same name are not given a defined precedence.
#[allow(clippy::too_many_arguments)]
async fn run_parallel_children(
    children: &[PlanNode],
    ctx: &mut Context,
    cookies: &mut CookieJar,
    executors: &Arc<HashMap<String, Arc<HttpExecutor>>>,
    evaluator: &Arc<EvaluatorConfig>,
    vu: u64,
    iteration: u64,
    stats: &Arc<tokio::sync::Mutex<Stats>>,
    progress_tx: &Option<mpsc::Sender<ProgressEvent>>,
    cancel: &CancellationToken,
) {
    let mut join_set = JoinSet::new();

    for child in children {
        let child = child.clone();
        let mut child_ctx = ctx.clone();
        let mut child_cookies = cookies.clone();
        let executors = Arc::clone(executors);
        let evaluator = Arc::clone(evaluator);
        let stats = Arc::clone(stats);
        let progress_tx = progress_tx.clone();
        let cancel = cancel.clone();

        join_set.spawn(async move {
            let result = execute_node(
                &child,
                &mut child_ctx,
                &mut child_cookies,
                &executors,
                &evaluator,
                vu,
                iteration,
                &stats,
                &progress_tx,
                &cancel,
            )
            .await;
            (result, child_ctx, child_cookies)
        });
    }

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((Err(e), _, _)) => warn!(vu, iteration, error = %e, "parallel child aborted"),
            Ok((Ok(()), child_ctx, child_cookies)) => {
                ctx.variables.extend(child_ctx.variables);
                cookies.merge(child_cookies);
            }
            Err(e) => warn!(vu, iteration, error = %e, "parallel child task panicked"),
        }
    }
}

fn evaluate_condition(condition: &ConditionRule, ctx: &Context) -> bool {
    let left = ctx.interpolate_str(&condition.left).unwrap_or_else(|_| condition.left.clone());
    let right = ctx.interpolate_str(&condition.right).unwrap_or_else(|_| condition.right.clone());
    let left_value = Value::String(left);
    let right_value = Value::String(right);
    let headers = HashMap::new();
    let input = assert::AssertionInput {
        status: 0,
        latency_ms: 0,
        body_json: Some(&left_value),
        headers: &headers,
    };
    // Reuses the assertion comparator against a synthetic `body` field so
    // the same loose-equality/numeric-compare rules apply to both.
    assert::evaluate("body", &condition.op, &right_value, &input).passed
}

fn render_record(record: &RequestRecord, ctx: &Context) -> Result<RequestRecord> {
    let mut rendered = record.clone();
    rendered.request.url = ctx.interpolate_str(&rendered.request.url)?;
    for (_, v) in rendered.request.headers.iter_mut() {
        *v = ctx.interpolate_str(v)?;
    }
    for (_, v) in rendered.request.query.iter_mut() {
        *v = ctx.interpolate_str(v)?;
    }
    for (_, v) in rendered.request.cookies.iter_mut() {
        *v = ctx.interpolate_str(v)?;
    }
    if let Some(body) = &rendered.request.body {
        rendered.request.body = Some(render_body(body, ctx)?);
    }
    Ok(rendered)
}

fn render_body(body: &Body, ctx: &Context) -> Result<Body> {
    Ok(match body {
        Body::Json(v) => Body::Json(ctx.interpolate_value(v)?),
        Body::Form(m) => {
            let mut out = HashMap::new();
            for (k, v) in m {
                out.insert(k.clone(), ctx.interpolate_str(v)?);
            }
            Body::Form(out)
        }
        Body::Text(s) => Body::Text(ctx.interpolate_str(s)?),
        Body::Binary(b) => Body::Binary(b.clone()),
    })
}

fn build_executors(nodes: &[PlanNode], out: &mut HashMap<String, Arc<HttpExecutor>>, max_step_timeout: Duration) -> Result<()> {
    for node in nodes {
        if let Some(record) = &node.ir {
            let executor = HttpExecutor::new(record, max_step_timeout).with_context(|| format!("building executor for node '{}'", node.name))?;
            out.insert(node.name.clone(), Arc::new(executor));
        }
        build_executors(&node.children, out, max_step_timeout)?;
        build_executors(&node.else_children, out, max_step_timeout)?;
    }
    Ok(())
}

/// Runs one setup/teardown request to completion, rendering it against
/// `ctx` first and feeding its extractions back in so later setup/teardown
/// steps (and, for setup, the VUs that follow) can reference them.
async fn run_bare_record(
    record: &RequestRecord,
    evaluator: &EvaluatorConfig,
    cookies: &mut CookieJar,
    ctx: &mut Context,
    max_step_timeout: Duration,
) -> Result<()> {
    let executor = HttpExecutor::new(record, max_step_timeout)?;
    let cancel = CancellationToken::new();
    let rendered = render_record(record, ctx)?;
    retry::run_with_retry(&executor, rendered, None, evaluator, cookies, ctx.variables.clone(), &cancel).await?;
    Ok(())
}

fn send_progress(tx: &Option<mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = tx {
        if tx.try_send(event).is_err() {
            // Channel full or closed — the driver never blocks on a slow
            // or absent consumer.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn evaluate_condition_compares_interpolated_strings() {
        let mut ctx = Context::new();
        ctx.set("status", json!("200"));
        let cond = ConditionRule {
            left: "${status}".to_string(),
            op: "==".to_string(),
            right: "200".to_string(),
        };
        assert!(evaluate_condition(&cond, &ctx));
    }

    #[test]
    fn render_record_interpolates_url_and_headers() {
        let mut ctx = Context::new();
        ctx.set("id", json!("42"));
        let mut headers = HashMap::new();
        headers.insert("X-Id".to_string(), "${id}".to_string());
        let record = RequestRecord {
            version: "1.0".to_string(),
            metadata: crate::ir::IrMetadata {
                id: "r".to_string(),
                source: "test".to_string(),
                created_at: "now".to_string(),
                tags: vec![],
            },
            request: RequestSpec {
                method: "GET".to_string(),
                url: "https://example.invalid/users/${id}".to_string(),
                query: vec![],
                headers,
                cookies: HashMap::new(),
                body: None,
                auth: None,
            },
            transport: Default::default(),
            evaluation: Default::default(),
        };
        let rendered = render_record(&record, &ctx).unwrap();
        assert_eq!(rendered.request.url, "https://example.invalid/users/42");
        assert_eq!(rendered.request.headers.get("X-Id"), Some(&"42".to_string()));
    }
}
