//! Snapshot text format:
//!
//! ```text
//! # warden rule table generation=7 saved=2026-10-14T09:30:00+00:00
//! ALLOW { [signer "*, o=ACME;-"] (all) } "acme"
//! END
//! ```

use chrono::{DateTime, Utc};

use crate::rule::RuleSpec;
use crate::table::StoredTable;

const HEADER: &str = "# warden rule table";
const SENTINEL: &str = "END";

pub(crate) fn encode(table: &StoredTable, saved_at: DateTime<Utc>) -> String {
    let mut out = format!(
        "{HEADER} generation={} saved={}\n",
        table.generation,
        saved_at.to_rfc3339()
    );
    for rule in &table.rules {
        out.push_str(&rule.encode());
        out.push('\n');
    }
    out.push_str(SENTINEL);
    out.push('\n');
    out
}

pub(crate) fn decode(text: &str) -> Result<StoredTable, String> {
    let mut lines = text.lines().enumerate();
    let (_, header) = lines.next().ok_or("empty snapshot")?;
    let generation = parse_header(header)?;

    let mut rules = Vec::new();
    let mut complete = false;
    for (number, line) in lines {
        let line = line.trim();
        if complete {
            if line.is_empty() {
                continue;
            }
            return Err(format!("line {}: content after {SENTINEL}", number + 1));
        }
        if line.is_empty() {
            continue;
        }
        if line == SENTINEL {
            complete = true;
            continue;
        }
        let rule = RuleSpec::parse(line).map_err(|e| format!("line {}: {e}", number + 1))?;
        if rule.name.is_none() {
            return Err(format!("line {}: rule without a name", number + 1));
        }
        rules.push(rule);
    }

    if !complete {
        return Err(format!("missing {SENTINEL} sentinel"));
    }
    Ok(StoredTable { generation, rules })
}

fn parse_header(header: &str) -> Result<u64, String> {
    let fields = header
        .strip_prefix(HEADER)
        .ok_or_else(|| format!("unrecognized header {header:?}"))?;
    fields
        .split_whitespace()
        .find_map(|field| field.strip_prefix("generation="))
        .ok_or_else(|| "header has no generation".to_string())?
        .parse::<u64>()
        .map_err(|e| format!("invalid generation: {e}"))
}
