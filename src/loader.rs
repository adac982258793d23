//! Reading task definitions
//!
//! Two formats are accepted. Delimited text has one task per line:
//!
//! ```text
//! # name, duration, blocks_on
//! A, 5
//! B, 3, A
//! C, 2, Z
//! ```
//!
//! Blank lines and `#` comments are skipped, as is a first content line whose
//! first field is `name`. YAML files hold a sequence of `{ name, duration, blocks_on }`
//! mappings.

use serde::Deserialize;
use std::path::Path;

use crate::coord::types::{TaskRecord, TaskSet};
use crate::core::errors::{ChainError, Result};

pub const DEFAULT_DELIMITER: char = ',';

/// Parse delimited text into a validated task set
pub fn parse_delimited(text: &str, delimiter: char) -> Result<TaskSet> {
    let mut records = Vec::new();
    let mut seen_content = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(delimiter).map(str::trim).collect();
        let first_content = !seen_content;
        seen_content = true;
        // only the first content line may be a header
        if first_content && fields[0].eq_ignore_ascii_case("name") {
            continue;
        }
        if fields.len() < 2 {
            return Err(ChainError::parse(
                line_no,
                format!("expected `name{d}duration[{d}blocks_on]`", d = delimiter),
            ));
        }
        if fields.len() > 3 {
            return Err(ChainError::parse(
                line_no,
                format!("expected at most 3 fields, found {}", fields.len()),
            ));
        }

        let duration = fields[1].parse::<u64>().map_err(|_| {
            ChainError::parse(
                line_no,
                format!("duration must be a non-negative integer, got '{}'", fields[1]),
            )
        })?;
        let blocks_on = fields.get(2).copied();

        let record = TaskRecord::new(fields[0], duration, blocks_on)
            .map_err(|e| ChainError::parse(line_no, e.to_string()))?;
        records.push(record);
    }

    TaskSet::new(records)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTask {
    name: String,
    duration: u64,
    #[serde(default)]
    blocks_on: Option<String>,
}

/// Parse a YAML sequence of tasks
pub fn parse_yaml(text: &str) -> Result<TaskSet> {
    let raw: Vec<RawTask> = serde_yaml::from_str(text)?;
    let records = raw
        .into_iter()
        .map(|t| TaskRecord::new(t.name, t.duration, t.blocks_on))
        .collect::<Result<Vec<_>>>()?;
    TaskSet::new(records)
}

/// Load a task file; `.yaml`/`.yml` is read as YAML, anything else as
/// delimited text.
pub fn load_file(path: impl AsRef<Path>, delimiter: char) -> Result<TaskSet> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| ChainError::io(format!("read tasks {}", path.display()), e))?;

    let is_yaml = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

    let tasks = if is_yaml {
        parse_yaml(&text)?
    } else {
        parse_delimited(&text, delimiter)?
    };
    tracing::debug!("Loaded {} tasks from {}", tasks.len(), path.display());
    Ok(tasks)
}
