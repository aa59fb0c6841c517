//! Loads scenario sources and request records from disk.

use crate::compiler::{self, CompileError};
use crate::ir::{RequestRecord, ScenarioPlan};
use crate::parser::{self, ParseError};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("{0} parse error(s) in {1}")]
    Parse(usize, String),
    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Loads a `.httpx`-style scenario source file and compiles it, optionally
/// selecting one named scenario when the file declares more than one.
pub fn load_scenario_source<P: AsRef<Path>>(
    path: P,
    scenario_name: Option<&str>,
) -> Result<ScenarioPlan> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)
        .with_context(|| format!("reading scenario source {}", path.display()))?;
    let items = parser::parse(&source).map_err(|errors| {
        anyhow::Error::new(LoadError::Parse(errors.len(), describe_parse_errors(&errors)))
    })?;
    let plan = compiler::compile(&items, scenario_name)?;
    Ok(plan)
}

/// Loads a single request record previously emitted by `translate-curl` or
/// hand-written against the IR schema.
pub fn load_request_record<P: AsRef<Path>>(path: P) -> Result<RequestRecord> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading request record {}", path.display()))?;
    let record = serde_json::from_str(&content)
        .with_context(|| format!("parsing request record {}", path.display()))?;
    Ok(record)
}

fn describe_parse_errors(errors: &[ParseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT: AtomicU64 = AtomicU64::new(0);

    fn write_temp(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "httpx-loader-test-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_and_compiles_scenario_source() {
        let path = write_temp(
            r#"
request ping {
    curl https://example.invalid/ping
    assert status == 200
}

scenario smoke {
    load(vus = 1, duration = 1s)
    run ping
}
"#,
        );
        let plan = load_scenario_source(&path, None).unwrap();
        assert_eq!(plan.name, "smoke");
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn loads_request_record_json() {
        let json = serde_json::json!({
            "version": "1.0",
            "metadata": {"id": "x", "source": "x", "created_at": "now"},
            "request": {"method": "GET", "url": "https://example.invalid"},
            "transport": {},
            "evaluation": {}
        });
        let path = write_temp(&json.to_string());
        let record = load_request_record(&path).unwrap();
        assert_eq!(record.request.method, "GET");
        let _ = fs::remove_file(&path);
    }
}
