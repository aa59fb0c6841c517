//! Execution limits: guards against a malformed or adversarial scenario
//! source blowing up resource usage — too many steps, too much parallelism,
//! runaway retry budgets, or a plan that never finishes.
//!
//! | Limit              | Default | Meaning                               |
//! |---------------------|--------|----------------------------------------|
//! | max_steps           | 100    | Max plan nodes (recursively counted)   |
//! | max_parallel         | 10    | Max concurrent VUs/nodes                |
//! | max_retries_total    | 50    | Sum of every node's `max_attempts`      |
//! | max_execution_secs   | 300   | Whole-run timeout                       |
//! | max_step_timeout     | 30    | Per-request timeout                     |

use crate::ir::{LoadProfile, PlanNode, ScenarioPlan};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_STEPS: usize = 100;
pub const DEFAULT_MAX_PARALLEL: usize = 10;
pub const DEFAULT_MAX_RETRIES_TOTAL: u32 = 50;
pub const DEFAULT_MAX_EXECUTION_SECS: u64 = 300;
pub const DEFAULT_MAX_STEP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLimits {
    pub max_steps: usize,
    pub max_parallel: usize,
    pub max_retries_total: u32,
    pub max_execution_time: Duration,
    pub max_step_timeout: Duration,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            max_parallel: DEFAULT_MAX_PARALLEL,
            max_retries_total: DEFAULT_MAX_RETRIES_TOTAL,
            max_execution_time: Duration::from_secs(DEFAULT_MAX_EXECUTION_SECS),
            max_step_timeout: Duration::from_secs(DEFAULT_MAX_STEP_TIMEOUT_SECS),
        }
    }
}

impl ExecutionLimits {
    /// Reads overrides from `HTTPX_MAX_STEPS`, `HTTPX_MAX_PARALLEL`,
    /// `HTTPX_MAX_RETRIES`, `HTTPX_MAX_EXECUTION_SECS`, `HTTPX_MAX_STEP_TIMEOUT`.
    pub fn from_env() -> Self {
        let mut limits = Self::default();

        if let Ok(val) = std::env::var("HTTPX_MAX_STEPS") {
            if let Ok(n) = val.parse() {
                limits.max_steps = n;
            }
        }
        if let Ok(val) = std::env::var("HTTPX_MAX_PARALLEL") {
            if let Ok(n) = val.parse() {
                limits.max_parallel = n;
            }
        }
        if let Ok(val) = std::env::var("HTTPX_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                limits.max_retries_total = n;
            }
        }
        if let Ok(val) = std::env::var("HTTPX_MAX_EXECUTION_SECS") {
            if let Ok(n) = val.parse() {
                limits.max_execution_time = Duration::from_secs(n);
            }
        }
        if let Ok(val) = std::env::var("HTTPX_MAX_STEP_TIMEOUT") {
            if let Ok(n) = val.parse() {
                limits.max_step_timeout = Duration::from_secs(n);
            }
        }

        limits
    }

    pub fn strict() -> Self {
        Self {
            max_steps: 10,
            max_parallel: 2,
            max_retries_total: 5,
            max_execution_time: Duration::from_secs(30),
            max_step_timeout: Duration::from_secs(5),
        }
    }

    pub fn relaxed() -> Self {
        Self {
            max_steps: 500,
            max_parallel: 50,
            max_retries_total: 200,
            max_execution_time: Duration::from_secs(3600),
            max_step_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug)]
pub struct LimitValidationResult {
    pub passed: bool,
    pub violations: Vec<LimitViolation>,
}

#[derive(Debug, Clone)]
pub struct LimitViolation {
    pub limit_name: String,
    pub limit_value: String,
    pub actual_value: String,
    pub message: String,
}

/// Counts plan nodes and the sum of every node's retry `max_attempts`,
/// walking `children`/`else_children` recursively — a conditional gate node
/// (no `ir` of its own) still counts as one node.
fn count_nodes(nodes: &[PlanNode]) -> (usize, u32) {
    let mut count = 0usize;
    let mut retries = 0u32;
    for node in nodes {
        count += 1;
        if let Some(policy) = &node.retry {
            retries += policy.max_attempts;
        }
        let (c, r) = count_nodes(&node.children);
        count += c;
        retries += r;
        let (c, r) = count_nodes(&node.else_children);
        count += c;
        retries += r;
    }
    (count, retries)
}

/// The widest number of sibling tasks any single node in this list could
/// have in flight at once. A non-parallel node only ever runs one child at a
/// time, so it contributes the max of its children's own widths; a
/// `parallel` node runs every child concurrently, so it contributes the sum
/// of theirs — a `parallel` block nested inside another adds its own width
/// on top of its siblings' rather than just taking the max.
fn widest_fanout(nodes: &[PlanNode]) -> usize {
    nodes.iter().map(node_fanout).max().unwrap_or(1)
}

fn node_fanout(node: &PlanNode) -> usize {
    if node.parallel && !node.children.is_empty() {
        node.children.iter().map(node_fanout).sum::<usize>().max(1)
    } else {
        widest_fanout(&node.children).max(widest_fanout(&node.else_children))
    }
}

/// The number of concurrent execution units the plan's load profile spins
/// up: the VU count for the two VU-based profiles, or the RPS rate for the
/// paced profile (a tick can still have a task in flight from the previous
/// tick when a request outlives `1/RPS`).
fn concurrency_units(load: &LoadProfile) -> usize {
    match load {
        LoadProfile::VusForDuration { vus, .. } => *vus as usize,
        LoadProfile::RpsForDuration { rps, .. } => *rps as usize,
        LoadProfile::IterationsWithVus { vus, .. } => *vus as usize,
    }
}

/// Validates a whole scenario plan (setup + main + teardown) against the
/// configured limits.
pub fn validate_plan(plan: &ScenarioPlan, limits: &ExecutionLimits) -> LimitValidationResult {
    let (main_count, main_retries) = count_nodes(&plan.main);
    let step_count = main_count + plan.setup.len() + plan.teardown.len();
    let max_parallel_tasks = concurrency_units(&plan.load).saturating_mul(widest_fanout(&plan.main));
    validate_limits(step_count, main_retries, max_parallel_tasks, limits)
}

pub fn validate_limits(
    step_count: usize,
    total_retries: u32,
    max_parallel_tasks: usize,
    limits: &ExecutionLimits,
) -> LimitValidationResult {
    let mut violations = Vec::new();

    if step_count > limits.max_steps {
        violations.push(LimitViolation {
            limit_name: "max_steps".to_string(),
            limit_value: limits.max_steps.to_string(),
            actual_value: step_count.to_string(),
            message: format!(
                "plan has {} steps, maximum allowed is {}",
                step_count, limits.max_steps
            ),
        });
    }

    if total_retries > limits.max_retries_total {
        violations.push(LimitViolation {
            limit_name: "max_retries_total".to_string(),
            limit_value: limits.max_retries_total.to_string(),
            actual_value: total_retries.to_string(),
            message: format!(
                "plan can issue up to {} retries, maximum allowed is {}",
                total_retries, limits.max_retries_total
            ),
        });
    }

    if max_parallel_tasks > limits.max_parallel {
        violations.push(LimitViolation {
            limit_name: "max_parallel".to_string(),
            limit_value: limits.max_parallel.to_string(),
            actual_value: max_parallel_tasks.to_string(),
            message: format!(
                "plan can run up to {} tasks concurrently, maximum allowed is {}",
                max_parallel_tasks, limits.max_parallel
            ),
        });
    }

    LimitValidationResult {
        passed: violations.is_empty(),
        violations,
    }
}

#[derive(Debug, Default)]
pub struct RetryCounter {
    count: std::sync::atomic::AtomicU32,
    limit: u32,
}

impl RetryCounter {
    pub fn new(limit: u32) -> Self {
        Self {
            count: std::sync::atomic::AtomicU32::new(0),
            limit,
        }
    }

    pub fn try_increment(&self) -> bool {
        let current = self.count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        current < self.limit
    }

    pub fn current(&self) -> u32 {
        self.count.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.max_steps, 100);
        assert_eq!(limits.max_parallel, 10);
        assert_eq!(limits.max_retries_total, 50);
    }

    #[test]
    fn strict_limits() {
        let limits = ExecutionLimits::strict();
        assert_eq!(limits.max_steps, 10);
        assert_eq!(limits.max_parallel, 2);
    }

    #[test]
    fn validate_limits_ok() {
        let limits = ExecutionLimits::default();
        let result = validate_limits(50, 20, 5, &limits);
        assert!(result.passed);
        assert!(result.violations.is_empty());
    }

    #[test]
    fn validate_limits_steps_exceeded() {
        let limits = ExecutionLimits::default();
        let result = validate_limits(150, 20, 5, &limits);
        assert!(!result.passed);
        assert_eq!(result.violations[0].limit_name, "max_steps");
    }

    #[test]
    fn validate_limits_retries_exceeded() {
        let limits = ExecutionLimits::default();
        let result = validate_limits(10, 100, 5, &limits);
        assert!(!result.passed);
        assert_eq!(result.violations[0].limit_name, "max_retries_total");
    }

    #[test]
    fn validate_limits_parallel_exceeded() {
        let limits = ExecutionLimits::default();
        let result = validate_limits(10, 5, 20, &limits);
        assert!(!result.passed);
        assert_eq!(result.violations[0].limit_name, "max_parallel");
    }

    #[test]
    fn widest_fanout_sums_parallel_children_but_maxes_sequential_ones() {
        let leaf = |name: &str| PlanNode {
            name: name.to_string(),
            ir: None,
            extract: vec![],
            assert: vec![],
            parallel: false,
            condition: None,
            children: vec![],
            else_children: vec![],
            retry: None,
        };
        let parallel_block = PlanNode {
            name: "fan".to_string(),
            ir: None,
            extract: vec![],
            assert: vec![],
            parallel: true,
            condition: None,
            children: vec![leaf("a"), leaf("b"), leaf("c")],
            else_children: vec![],
            retry: None,
        };
        assert_eq!(widest_fanout(&[parallel_block]), 3);
        assert_eq!(widest_fanout(&[leaf("solo")]), 1);
    }

    #[test]
    fn retry_counter_trips_after_limit() {
        let counter = RetryCounter::new(3);
        assert!(counter.try_increment());
        assert!(counter.try_increment());
        assert!(counter.try_increment());
        assert!(!counter.try_increment());
        assert_eq!(counter.current(), 4);
    }

    #[test]
    fn count_nodes_walks_conditional_branches() {
        let nodes = vec![PlanNode {
            name: "gate".to_string(),
            ir: None,
            extract: vec![],
            assert: vec![],
            parallel: false,
            condition: None,
            children: vec![PlanNode {
                name: "inner".to_string(),
                ir: None,
                extract: vec![],
                assert: vec![],
                parallel: false,
                condition: None,
                children: vec![],
                else_children: vec![],
                retry: None,
            }],
            else_children: vec![],
            retry: None,
        }];
        let (count, _) = count_nodes(&nodes);
        assert_eq!(count, 2);
    }
}
