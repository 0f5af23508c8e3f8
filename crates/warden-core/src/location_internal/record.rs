//! One declared-permission record per file:
//!
//! ```text
//! file:/opt/units/billing.jar
//!
//! (file "/var/billing/*" "read,write")
//! (service "org.acme.*" "get")
//!
//! ```
//!
//! The key is `*` for the default list; origins escape `%`, `*` and
//! control characters as `%XX` and wrap after 72 columns with a trailing
//! `%`. A section holding the single line `NULL` deletes the key.

use crate::permission::PermissionInfo;

const DEFAULT_KEY: &str = "*";
const DELETED: &str = "NULL";
const MAX_COLUMNS: usize = 72;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum RecordKey {
    Default,
    Origin(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Record {
    pub(crate) key: RecordKey,
    /// `None` deletes the key.
    pub(crate) permissions: Option<Vec<PermissionInfo>>,
}

pub(crate) fn encode(record: &Record) -> String {
    let key = match &record.key {
        RecordKey::Default => DEFAULT_KEY.to_string(),
        RecordKey::Origin(origin) => escape(origin),
    };

    let mut out = String::new();
    for line in wrap(&key) {
        out.push_str(&line);
        out.push('\n');
    }
    out.push('\n');
    match &record.permissions {
        None => {
            out.push_str(DELETED);
            out.push('\n');
        }
        Some(permissions) => {
            for permission in permissions {
                out.push_str(&permission.encode());
                out.push('\n');
            }
        }
    }
    out.push('\n');
    out
}

pub(crate) fn decode(text: &str) -> Result<Record, String> {
    let body = text.strip_suffix('\n').ok_or("truncated record")?;
    let mut lines = body.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let mut key = String::new();
    loop {
        let line = lines.next().ok_or("missing key")?;
        match line.strip_suffix('%') {
            Some(part) => key.push_str(part),
            None => {
                key.push_str(line);
                break;
            }
        }
    }
    if lines.next() != Some("") {
        return Err("expected blank line after key".into());
    }

    let mut section = Vec::new();
    let mut terminated = false;
    for line in lines.by_ref() {
        if line.is_empty() {
            terminated = true;
            break;
        }
        section.push(line);
    }
    if !terminated {
        return Err("missing record terminator".into());
    }
    if lines.any(|rest| !rest.is_empty()) {
        return Err("content after record terminator".into());
    }

    let key = if key == DEFAULT_KEY {
        RecordKey::Default
    } else {
        RecordKey::Origin(unescape(&key)?)
    };
    let permissions = if section == [DELETED] {
        None
    } else {
        let parsed = section
            .iter()
            .map(|line| PermissionInfo::parse(line).map_err(|e| e.to_string()))
            .collect::<Result<Vec<_>, _>>()?;
        Some(parsed)
    };
    Ok(Record { key, permissions })
}

fn escape(origin: &str) -> String {
    let mut out = String::with_capacity(origin.len());
    for c in origin.chars() {
        match c {
            '%' | '*' => out.push_str(&format!("%{:02X}", c as u32)),
            c if c.is_control() && (c as u32) < 0x80 => out.push_str(&format!("%{:02X}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Escapes are raw bytes; the decoded key must be UTF-8.
fn unescape(text: &str) -> Result<String, String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'%' {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        let value = text
            .get(i + 1..i + 3)
            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .ok_or_else(|| format!("invalid escape at offset {i}"))?;
        out.push(value);
        i += 3;
    }
    String::from_utf8(out).map_err(|e| format!("escaped key is not UTF-8: {e}"))
}

/// Split into lines of at most 72 columns; all but the last end in `%`.
fn wrap(key: &str) -> Vec<String> {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= MAX_COLUMNS {
        return vec![key.to_string()];
    }
    let mut lines: Vec<String> = chars
        .chunks(MAX_COLUMNS - 1)
        .map(|chunk| chunk.iter().collect::<String>() + "%")
        .collect();
    if let Some(last) = lines.last_mut() {
        last.pop();
    }
    lines
}
