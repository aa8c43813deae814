use std::fmt;

/// Ordered `label:count` tally, rendered as `a:1;b:2`.
///
/// Labels keep the order in which they were first seen, which for workflow
/// graphs approximates pipeline order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountSummary {
    entries: Vec<(String, i64)>,
}

impl CountSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: &str, count: i64) {
        match self.entries.iter_mut().find(|(l, _)| l == label) {
            Some((_, c)) => *c += count,
            None => self.entries.push((label.to_string(), count)),
        }
    }

    pub fn get(&self, label: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, c)| *c)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.entries.iter().map(|(l, c)| (l.as_str(), *c))
    }

    pub fn total(&self) -> i64 {
        self.entries.iter().map(|(_, c)| c).sum()
    }

    /// Parses `a:1;b:2`. Malformed entries are skipped.
    pub fn parse(text: &str) -> Self {
        let mut summary = CountSummary::new();
        for part in text.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            match part.rsplit_once(':') {
                Some((label, count)) => match count.trim().parse::<i64>() {
                    Ok(n) => summary.add(label.trim(), n),
                    Err(_) => tracing::debug!("Skipping malformed count summary entry '{}'", part),
                },
                None => tracing::debug!("Skipping malformed count summary entry '{}'", part),
            }
        }
        summary
    }
}

impl fmt::Display for CountSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .entries
            .iter()
            .map(|(l, c)| format!("{}:{}", l, c))
            .collect::<Vec<_>>()
            .join(";");
        write!(f, "{}", joined)
    }
}

impl<'a> FromIterator<(&'a str, i64)> for CountSummary {
    fn from_iter<T: IntoIterator<Item = (&'a str, i64)>>(iter: T) -> Self {
        let mut summary = CountSummary::new();
        for (label, count) in iter {
            summary.add(label, count);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_first_seen_order() {
        let summary: CountSummary = [("pipetaskInit", 1), ("label1", 2), ("pipetaskInit", 0), ("finalJob", 1)]
            .into_iter()
            .collect();
        assert_eq!(summary.to_string(), "pipetaskInit:1;label1:2;finalJob:1");
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_parse_skips_malformed_entries() {
        let summary = CountSummary::parse("payload:3;noop;subdag:x;service:1");
        assert_eq!(summary.get("payload"), Some(3));
        assert_eq!(summary.get("noop"), None);
        assert_eq!(summary.to_string(), "payload:3;service:1");
        assert!(CountSummary::parse("").is_empty());
    }
}
