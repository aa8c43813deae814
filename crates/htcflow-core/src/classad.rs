use crate::model::JobId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Attribute record describing one job, the way the scheduler reports it.
///
/// Records from different sources are merged key by key, later writers win.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassAd(BTreeMap<String, Value>);

/// Job records keyed by scheduler job id.
pub type JobAds = BTreeMap<JobId, ClassAd>;

/// Job records grouped by the name of the scheduler instance that owns them.
pub type ScheddJobs = BTreeMap<String, JobAds>;

impl ClassAd {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Copies every attribute of `other` into `self`, overwriting existing keys.
    pub fn update(&mut self, other: &ClassAd) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        value_as_i64(self.0.get(key)?)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.0.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_f64().map(|f| f != 0.0),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// String form of a scalar attribute; numbers and booleans are rendered.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn job_id(&self) -> Option<JobId> {
        Some(JobId::new(
            self.get_i64("ClusterId")?,
            self.get_i64("ProcId").unwrap_or(0),
        ))
    }

    /// `ClusterId.ProcId` for log messages, with `?` for missing parts.
    pub fn display_id(&self) -> String {
        let part = |key: &str| {
            self.get_i64(key)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "?".to_string())
        };
        format!("{}.{}", part("ClusterId"), part("ProcId"))
    }
}

impl FromIterator<(String, Value)> for ClassAd {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        ClassAd(iter.into_iter().collect())
    }
}

impl From<BTreeMap<String, Value>> for ClassAd {
    fn from(map: BTreeMap<String, Value>) -> Self {
        ClassAd(map)
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::Bool(b) => Some(i64::from(*b)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

/// Merges `source` into `target` per job id; attributes present in both are
/// taken from `source`.
pub fn update_jobs(target: &mut JobAds, source: &JobAds) {
    for (id, ad) in source {
        target.entry(*id).or_default().update(ad);
    }
}

/// Escapes quotes the way the submit description language expects them.
pub fn htc_escape(value: &str) -> String {
    value
        .replace('"', "\"\"")
        .replace('\'', "''")
        .replace("&quot;", "\"")
}

/// Escapes a configuration value, leaving non-string values untouched.
pub fn htc_escape_value(value: &Value) -> String {
    match value {
        Value::String(s) => htc_escape(s),
        other => other.to_string(),
    }
}

/// Renders a value as a ClassAd literal (`"text"`, `12`, `true`).
pub fn classad_literal(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Null => "undefined".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("{reason} (line {line})")]
pub struct ClassAdParseError {
    pub line: usize,
    pub reason: String,
}

/// Parses a sequence of old-style ClassAds (`[ Key = Value; ... ]`), the
/// format DAGMan uses for its node status file.
pub fn parse_classads(text: &str) -> Result<Vec<ClassAd>, ClassAdParseError> {
    let mut ads = Vec::new();
    let chars: Vec<char> = strip_comments(text).chars().collect();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '\n' => line += 1,
            '[' => {
                let start_line = line;
                let (body, end, lines) = take_until_close(&chars, i + 1, '[', ']')
                    .ok_or_else(|| ClassAdParseError {
                        line: start_line,
                        reason: "unterminated ClassAd".to_string(),
                    })?;
                ads.push(parse_ad_body(&body, start_line)?);
                line += lines;
                i = end;
            }
            c if c.is_whitespace() => {}
            other => {
                return Err(ClassAdParseError {
                    line,
                    reason: format!("unexpected character '{}' outside of a ClassAd", other),
                })
            }
        }
        i += 1;
    }
    Ok(ads)
}

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    let mut in_string = false;
    while let Some(c) = chars.next() {
        if in_string {
            out.push(c);
            if c == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                    }
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Returns the text up to the matching close delimiter, the index of that
/// delimiter and the number of newlines consumed.
fn take_until_close(
    chars: &[char],
    start: usize,
    open: char,
    close: char,
) -> Option<(String, usize, usize)> {
    let mut depth = 1;
    let mut in_string = false;
    let mut lines = 0;
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            lines += 1;
        }
        if in_string {
            if c == '\\' {
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some((chars[start..i].iter().collect(), i, lines));
            }
        }
        i += 1;
    }
    None
}

fn split_top_level(text: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in text.chars() {
        if in_string {
            current.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                current.push(c);
            }
            '{' | '[' | '(' => {
                depth += 1;
                current.push(c);
            }
            '}' | ']' | ')' => {
                depth -= 1;
                current.push(c);
            }
            c if c == sep && depth == 0 => parts.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    parts.push(current);
    parts
}

fn parse_ad_body(body: &str, start_line: usize) -> Result<ClassAd, ClassAdParseError> {
    let mut ad = ClassAd::new();
    let mut line = start_line;
    for statement in split_top_level(body, ';') {
        let statement_line = line + statement.chars().take_while(|c| c.is_whitespace()).filter(|c| *c == '\n').count();
        line += statement.matches('\n').count();
        let statement = statement.trim();
        if statement.is_empty() {
            continue;
        }
        let (key, value) = statement.split_once('=').ok_or_else(|| ClassAdParseError {
            line: statement_line,
            reason: format!("expected 'Key = Value', found '{}'", statement),
        })?;
        let key = key.trim();
        if key.is_empty() || !key.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(ClassAdParseError {
                line: statement_line,
                reason: format!("invalid attribute name '{}'", key),
            });
        }
        ad.insert(key, parse_value(value.trim()));
    }
    Ok(ad)
}

fn parse_value(raw: &str) -> Value {
    if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
        return Value::String(unescape(&raw[1..raw.len() - 1]));
    }
    if raw.starts_with('{') && raw.ends_with('}') {
        let inner = &raw[1..raw.len() - 1];
        let items = split_top_level(inner, ',')
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .map(|item| parse_value(&item))
            .collect();
        return Value::Array(items);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "undefined" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_htc_escape() {
        assert_eq!(htc_escape("\"double\""), "\"\"double\"\"");
        assert_eq!(htc_escape("'single'"), "''single''");
        assert_eq!(htc_escape("&quot;val&quot;"), "\"val\"");
        assert_eq!(htc_escape_value(&json!(100)), "100");
    }

    #[test]
    fn test_typed_getters_coerce() {
        let mut ad = ClassAd::new();
        ad.insert("ClusterId", json!(1163));
        ad.insert("ProcId", json!("0"));
        ad.insert("TerminatedNormally", json!("true"));
        ad.insert("ExitCode", json!(1.0));
        assert_eq!(ad.job_id(), Some(JobId::new(1163, 0)));
        assert_eq!(ad.get_bool("TerminatedNormally"), Some(true));
        assert_eq!(ad.get_i64("ExitCode"), Some(1));
        assert_eq!(ad.display_id(), "1163.0");
        assert_eq!(ClassAd::new().display_id(), "?.?");
    }

    #[test]
    fn test_update_jobs_last_writer_wins() {
        let id = JobId::new(1, 0);
        let mut first = ClassAd::new();
        first.insert("JobStatus", json!(2));
        first.insert("Owner", json!("jdoe"));
        let mut second = ClassAd::new();
        second.insert("JobStatus", json!(4));

        let mut target = JobAds::new();
        target.insert(id, first);
        let mut source = JobAds::new();
        source.insert(id, second);
        source.insert(JobId::new(2, 0), ClassAd::new());

        update_jobs(&mut target, &source);
        assert_eq!(target.len(), 2);
        assert_eq!(target[&id].get_i64("JobStatus"), Some(4));
        assert_eq!(target[&id].get_str("Owner"), Some("jdoe"));
    }

    #[test]
    fn test_parse_node_status_ads() {
        let text = r#"
[
  Type = "DagStatus";
  DagFiles = {
    "tiny.dag"
  };
  Timestamp = 1738777655; /* "Wed Feb  5 11:07:35 2025" */
  DagStatus = 3; /* "STATUS_SUBMITTED ()" */
  NodesTotal = 4;
  NodesDone = 1;
]
[
  Type = "NodeStatus";
  Node = "label1_a";
  NodeStatus = 6; /* "STATUS_ERROR" */
  StatusDetails = "Job proc (1.0.0) failed with status 1";
  RetryCount = 0;
]
"#;
        let ads = parse_classads(text).unwrap();
        assert_eq!(ads.len(), 2);
        assert_eq!(ads[0].get_str("Type"), Some("DagStatus"));
        assert_eq!(ads[0].get_i64("NodesTotal"), Some(4));
        assert_eq!(ads[0].get("DagFiles"), Some(&json!(["tiny.dag"])));
        assert_eq!(ads[1].get_i64("NodeStatus"), Some(6));
        assert_eq!(
            ads[1].get_str("StatusDetails"),
            Some("Job proc (1.0.0) failed with status 1")
        );
    }

    #[test]
    fn test_parse_classads_rejects_garbage() {
        let err = parse_classads("[\n  Type = \"x\";\n  garbage;\n]").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(parse_classads("[ Type = 1;").is_err());
    }

    #[test]
    fn test_classad_literal() {
        assert_eq!(classad_literal(&json!("a \"b\"")), "\"a \\\"b\\\"\"");
        assert_eq!(classad_literal(&json!(7)), "7");
        assert_eq!(classad_literal(&json!(true)), "true");
    }
}
