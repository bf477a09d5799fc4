//! `code-review`: discover files, scan them for secrets, summarise
//!
//! Input: `{"root": "<dir>", "maxFiles": <n>}` (both optional).

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::pipeline::{DistributedOptions, Pipeline, StepContext, StepDefinition, StepError, StepResult};

pub const CODE_REVIEW: &str = "code-review";

const SKIPPED_DIRS: &[&str] = &[".git", "target", "node_modules"];

const SECRET_RULES: &[(&str, &str)] = &[
    ("aws-access-key", r"AKIA[0-9A-Z]{16}"),
    ("private-key", r"-----BEGIN (?:RSA |EC |OPENSSH )?PRIVATE KEY-----"),
    (
        "hardcoded-credential",
        r#"(?i)\b(?:password|secret|api[_-]?key|token)\s*[:=]\s*["'][^"']{6,}["']"#,
    ),
];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewInput {
    #[serde(default)]
    root: Option<PathBuf>,
    #[serde(default)]
    max_files: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub file: String,
    pub line: usize,
    pub rule: String,
}

/// Partial progress of the security scan
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ScanProgress {
    scanned: usize,
    findings: Vec<Finding>,
}

pub fn pipeline() -> Pipeline {
    Pipeline::new(CODE_REVIEW)
        .step(StepDefinition::from_fn("discover", discover).with_max_retries(1))
        .step(
            StepDefinition::from_fn("security", security).with_distributed(DistributedOptions {
                migratable: true,
                resume_events: Vec::new(),
                migration_timeout: Some(Duration::from_secs(120)),
            }),
        )
        .step(StepDefinition::from_fn("report", report))
}

fn parse_input(input: &Value) -> StepResult<ReviewInput> {
    if input.is_null() {
        return Ok(ReviewInput::default());
    }
    serde_json::from_value(input.clone())
        .map_err(|e| StepError::permanent(format!("invalid code-review input: {}", e)))
}

async fn discover(input: Value, _ctx: StepContext) -> StepResult<Value> {
    let input = parse_input(&input)?;
    let root = input.root.unwrap_or_else(|| PathBuf::from("."));
    if !root.is_dir() {
        return Err(StepError::permanent(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let walk_root = root.clone();
    let mut files = tokio::task::spawn_blocking(move || collect_files(&walk_root))
        .await
        .map_err(|e| StepError::failed(format!("file discovery aborted: {}", e)))?;
    if let Some(limit) = input.max_files {
        files.truncate(limit);
    }

    info!("Discovered {} files under {}", files.len(), root.display());
    Ok(json!({ "root": root, "files": files }))
}

fn collect_files(root: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().display().to_string())
        .collect();
    files.sort();
    files
}

fn compile_rules() -> StepResult<Vec<(&'static str, Regex)>> {
    SECRET_RULES
        .iter()
        .map(|(name, pattern)| {
            Regex::new(pattern)
                .map(|re| (*name, re))
                .map_err(|e| StepError::permanent(format!("bad rule {}: {}", name, e)))
        })
        .collect()
}

fn scan_text(file: &str, text: &str, rules: &[(&'static str, Regex)]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for (index, line) in text.lines().enumerate() {
        for (rule, re) in rules {
            if re.is_match(line) {
                findings.push(Finding {
                    file: file.to_string(),
                    line: index + 1,
                    rule: rule.to_string(),
                });
            }
        }
    }
    findings
}

/// Scan discovered files, resuming after the last checkpointed file
async fn security(_input: Value, ctx: StepContext) -> StepResult<Value> {
    let files: Vec<String> = ctx
        .variable("discover")
        .await
        .and_then(|d| d.get("files").cloned())
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StepError::permanent(format!("discover output has wrong shape: {}", e)))?
        .unwrap_or_default();

    let mut progress: ScanProgress = match ctx.last_checkpoint().await {
        Some(saved) => serde_json::from_value(saved).unwrap_or_default(),
        None => ScanProgress::default(),
    };
    if progress.scanned > 0 {
        info!(
            "Resuming security scan at file {}/{}",
            progress.scanned,
            files.len()
        );
    }

    let rules = compile_rules()?;
    for file in files.iter().skip(progress.scanned) {
        if ctx.is_cancelled() {
            return Err(StepError::Cancelled("security scan interrupted".into()));
        }
        match tokio::fs::read_to_string(file).await {
            Ok(text) => progress.findings.extend(scan_text(file, &text, &rules)),
            Err(e) => debug!("Skipping {}: {}", file, e),
        }
        progress.scanned += 1;
        let snapshot = serde_json::to_value(&progress)
            .map_err(|e| StepError::failed(format!("unserialisable progress: {}", e)))?;
        ctx.checkpoint(snapshot).await?;
    }

    info!(
        "Security scan finished: {} files, {} findings",
        progress.scanned,
        progress.findings.len()
    );
    Ok(json!({ "scanned": progress.scanned, "findings": progress.findings }))
}

async fn report(_input: Value, ctx: StepContext) -> StepResult<Value> {
    let files = ctx
        .variable("discover")
        .await
        .and_then(|d| d.get("files").and_then(Value::as_array).map(Vec::len))
        .unwrap_or(0);
    let findings: Vec<Finding> = ctx
        .variable("security")
        .await
        .and_then(|s| s.get("findings").cloned())
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StepError::permanent(format!("security output has wrong shape: {}", e)))?
        .unwrap_or_default();

    let summary = if findings.is_empty() {
        format!("{} files reviewed, no secrets found", files)
    } else {
        format!(
            "{} files reviewed, {} possible secrets found",
            files,
            findings.len()
        )
    };
    Ok(json!({
        "files": files,
        "findings": findings.len(),
        "clean": findings.is_empty(),
        "summary": summary,
    }))
}
