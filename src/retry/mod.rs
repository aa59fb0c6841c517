//! Drives one request through the evaluator's pass/retry/fail/branch
//! protocol. The old strategy enum (`retry`/`fail_fast`/`ignore`) is gone —
//! every request now goes through the evaluator gateway at least once, and
//! its verdict decides whether there's a next attempt.

use crate::cookie::CookieJar;
use crate::evaluator::{self, Decision, EvaluationContext, EvaluatorConfig, Mutations, ObservedResponse, SentRequest, Verdict};
use crate::executor::HttpExecutor;
use crate::ir::{RequestRecord, RetryPolicy};
use anyhow::{anyhow, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct RetryOutcome {
    pub attempts: u32,
    pub sent: SentRequest,
    pub response: ObservedResponse,
    pub verdict: Verdict,
    pub vars: HashMap<String, Value>,
}

/// Runs `record` to completion: keeps retrying while the evaluator returns
/// `Decision::Retry`, applying any mutations it supplies to the next
/// attempt, until a terminal `Pass`/`Fail` lands or attempts are exhausted.
///
/// `record` is taken by value since a `retry` verdict's mutations are
/// applied directly to it between attempts.
pub async fn run_with_retry(
    executor: &HttpExecutor,
    mut record: RequestRecord,
    retry: Option<&RetryPolicy>,
    evaluator_config: &EvaluatorConfig,
    cookies: &mut CookieJar,
    mut vars: HashMap<String, Value>,
    cancel: &CancellationToken,
) -> Result<RetryOutcome> {
    let mut effective_max = retry.map(|r| r.max_attempts).unwrap_or(1).max(1);
    let mut attempt: u32 = 1;

    loop {
        vars.insert("attempt".to_string(), Value::from(attempt));

        let (sent, response) = executor.send(&record, cookies).await?;
        let ctx = EvaluationContext {
            ir: record.clone(),
            sent: sent.clone(),
            response: response.clone(),
            vars: vars.clone(),
        };
        let verdict = evaluator::run(evaluator_config, &ctx).await;

        match verdict.decision {
            Decision::Pass | Decision::Fail => {
                return Ok(RetryOutcome {
                    attempts: attempt,
                    sent,
                    response,
                    verdict,
                    vars,
                });
            }
            Decision::Branch => {
                return Err(anyhow!(
                    "branch verdict cannot be honoured outside scenario flow control: {}",
                    verdict.reason
                ));
            }
            Decision::Retry => {
                if let Some(over) = verdict.actions.as_ref().and_then(|a| a.max_retries) {
                    effective_max = over;
                }

                if attempt >= effective_max {
                    let mut exhausted = verdict.clone();
                    exhausted.decision = Decision::Fail;
                    exhausted.reason = format!(
                        "max retries exceeded after {} attempt(s): {}",
                        attempt, verdict.reason
                    );
                    return Ok(RetryOutcome {
                        attempts: attempt,
                        sent,
                        response,
                        verdict: exhausted,
                        vars,
                    });
                }

                if let Some(mutations) = &verdict.mutations {
                    apply_mutations(&mut record, &mut vars, mutations);
                }

                let delay_ms = verdict
                    .actions
                    .as_ref()
                    .and_then(|a| a.retry_after_ms)
                    .unwrap_or_else(|| default_delay_ms(retry, attempt));

                tokio::select! {
                    _ = cancel.cancelled() => return Err(anyhow!("retry cancelled")),
                    _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                }

                attempt += 1;
            }
        }
    }
}

fn apply_mutations(record: &mut RequestRecord, vars: &mut HashMap<String, Value>, mutations: &Mutations) {
    if let Some(headers) = &mutations.headers {
        for (k, v) in headers {
            record.request.headers.insert(k.clone(), v.clone());
        }
    }
    if let Some(query) = &mutations.query {
        for (k, v) in query {
            record.request.query.retain(|(existing, _)| existing != k);
            record.request.query.push((k.clone(), v.clone()));
        }
    }
    if let Some(body) = &mutations.body {
        record.request.body = Some(body.clone());
    }
    if let Some(new_vars) = &mutations.vars {
        for (k, v) in new_vars {
            vars.insert(k.clone(), v.clone());
        }
    }
}

/// `base_delay_ms` is the wait before the first retry; `backoff_ms` is added
/// per additional attempt (`base_delay_ms + backoff_ms * (attempt - 1)`),
/// kept linear rather than multiplicative since both fields already carry
/// millisecond units from the source syntax, unlike the old `backoff_factor`.
fn default_delay_ms(retry: Option<&RetryPolicy>, attempt: u32) -> u64 {
    match retry {
        Some(policy) => policy.base_delay_ms + policy.backoff_ms * (attempt as u64 - 1),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_linearly_with_attempt() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff_ms: 100,
            base_delay_ms: 50,
        };
        assert_eq!(default_delay_ms(Some(&policy), 1), 50);
        assert_eq!(default_delay_ms(Some(&policy), 2), 150);
        assert_eq!(default_delay_ms(Some(&policy), 3), 250);
    }

    #[test]
    fn no_policy_means_no_delay() {
        assert_eq!(default_delay_ms(None, 4), 0);
    }

    #[test]
    fn mutations_merge_headers_and_replace_body() {
        let mut record: RequestRecord = serde_json::from_value(serde_json::json!({
            "version": "1.0",
            "metadata": {"id": "x", "source": "x", "created_at": "now"},
            "request": {"method": "GET", "url": "https://example.invalid", "headers": {"A": "1"}},
            "transport": {},
            "evaluation": {}
        }))
        .unwrap();
        let mut vars = HashMap::new();
        let mutations = Mutations {
            headers: Some(HashMap::from([("B".to_string(), "2".to_string())])),
            query: None,
            body: Some(crate::ir::Body::Text("replaced".to_string())),
            vars: Some(HashMap::from([("k".to_string(), Value::from(1))])),
        };
        apply_mutations(&mut record, &mut vars, &mutations);
        assert_eq!(record.request.headers.get("A"), Some(&"1".to_string()));
        assert_eq!(record.request.headers.get("B"), Some(&"2".to_string()));
        assert_eq!(record.request.body, Some(crate::ir::Body::Text("replaced".to_string())));
        assert_eq!(vars.get("k"), Some(&Value::from(1)));
    }
}
