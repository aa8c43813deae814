//! Derivation of a uniform exit status for terminal and held job records.
//!
//! Every handler either updates the record with `ExitBySignal` plus one of
//! `ExitSignal`/`ExitCode`, reports that it does not apply, or declines
//! because an attribute it needs is missing. The chain stops at the first
//! handler that updates the record.

use crate::classad::{ClassAd, JobAds};
use crate::constants::hold_codes;
use crate::model::JobStatus;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

#[allow(clippy::unwrap_used)]
static SIGNAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"signal (\d+)").unwrap());

#[derive(Debug, Error, PartialEq)]
#[error("required attribute '{0}' missing")]
pub struct MissingAttribute(pub String);

pub trait JobAdHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns `Ok(true)` when the record was updated and `Ok(false)` when the
    /// handler does not apply. Nothing is modified unless `Ok(true)` is
    /// returned.
    fn handle(&self, ad: &mut ClassAd) -> Result<bool, MissingAttribute>;
}

fn require_i64(ad: &ClassAd, key: &str) -> Result<i64, MissingAttribute> {
    ad.get_i64(key)
        .ok_or_else(|| MissingAttribute(key.to_string()))
}

fn require_bool(ad: &ClassAd, key: &str) -> Result<bool, MissingAttribute> {
    ad.get_bool(key)
        .ok_or_else(|| MissingAttribute(key.to_string()))
}

fn require_str<'a>(ad: &'a ClassAd, key: &str) -> Result<&'a str, MissingAttribute> {
    ad.get_str(key)
        .ok_or_else(|| MissingAttribute(key.to_string()))
}

/// Hold attributes linger after a release, so they only count while the job
/// is (or may be) held.
fn hold_is_current(ad: &ClassAd, handler: &str) -> bool {
    match ad.get_i64("JobStatus") {
        None => true,
        Some(code) if code == JobStatus::Held.code() => true,
        Some(code) => {
            tracing::debug!(
                "{}: job '{}' has JobStatus {}, ignoring stale hold attributes",
                handler,
                ad.display_id(),
                code
            );
            false
        }
    }
}

pub struct HeldByUser;

impl JobAdHandler for HeldByUser {
    fn name(&self) -> &'static str {
        "HeldByUser"
    }

    fn handle(&self, ad: &mut ClassAd) -> Result<bool, MissingAttribute> {
        let code = require_i64(ad, "HoldReasonCode")?;
        if !hold_is_current(ad, self.name()) {
            return Ok(false);
        }
        if code != hold_codes::USER {
            tracing::debug!(
                "Job '{}' marked as held, but not by the user: HoldReasonCode = {}",
                ad.display_id(),
                code
            );
            return Ok(false);
        }
        ad.insert("ExitBySignal", false);
        ad.insert("ExitCode", 0);
        Ok(true)
    }
}

pub struct HeldBySignal;

impl JobAdHandler for HeldBySignal {
    fn name(&self) -> &'static str {
        "HeldBySignal"
    }

    fn handle(&self, ad: &mut ClassAd) -> Result<bool, MissingAttribute> {
        let code = require_i64(ad, "HoldReasonCode")?;
        if !hold_is_current(ad, self.name()) {
            return Ok(false);
        }
        if code != hold_codes::SIGNAL {
            tracing::debug!(
                "Job '{}' marked as held, but not by a signal: HoldReasonCode = {}",
                ad.display_id(),
                code
            );
            return Ok(false);
        }
        let reason = require_str(ad, "HoldReason")?;
        let signal = SIGNAL_RE
            .captures(reason)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<i64>().ok());
        match signal {
            Some(signal) => {
                ad.insert("ExitBySignal", true);
                ad.insert("ExitSignal", signal);
                Ok(true)
            }
            None => {
                tracing::debug!(
                    "Job '{}' marked as held, but signal not found in 'HoldReason': {}",
                    ad.display_id(),
                    reason
                );
                Ok(false)
            }
        }
    }
}

pub struct HeldByOther;

impl JobAdHandler for HeldByOther {
    fn name(&self) -> &'static str {
        "HeldByOther"
    }

    fn handle(&self, ad: &mut ClassAd) -> Result<bool, MissingAttribute> {
        let code = require_i64(ad, "HoldReasonCode")?;
        if !hold_is_current(ad, self.name()) {
            return Ok(false);
        }
        if code == hold_codes::USER || code == hold_codes::SIGNAL {
            tracing::debug!(
                "Job '{}' marked as held, but hold reason code {} not supported",
                ad.display_id(),
                code
            );
            return Ok(false);
        }
        ad.insert("ExitBySignal", false);
        ad.insert("ExitCode", code);
        Ok(true)
    }
}

pub struct CompletedWithToe;

impl JobAdHandler for CompletedWithToe {
    fn name(&self) -> &'static str {
        "CompletedWithToe"
    }

    fn handle(&self, ad: &mut ClassAd) -> Result<bool, MissingAttribute> {
        let Some(toe) = ad.get("ToE") else {
            tracing::debug!(
                "Job '{}' marked as completed, but not processing: ticket of execution missing",
                ad.display_id()
            );
            return Ok(false);
        };
        let toe: ClassAd = match toe {
            Value::Object(map) => map.clone().into_iter().collect(),
            _ => return Err(MissingAttribute("ToE.ExitBySignal".to_string())),
        };
        let by_signal = toe
            .get_bool("ExitBySignal")
            .ok_or_else(|| MissingAttribute("ToE.ExitBySignal".to_string()))?;
        let (key, value) = if by_signal {
            ("ExitSignal", toe.get_i64("ExitSignal"))
        } else {
            ("ExitCode", toe.get_i64("ExitCode"))
        };
        let value = value.ok_or_else(|| MissingAttribute(format!("ToE.{}", key)))?;
        ad.insert("ExitBySignal", by_signal);
        ad.insert(key, value);
        Ok(true)
    }
}

pub struct CompletedWithoutToe;

impl JobAdHandler for CompletedWithoutToe {
    fn name(&self) -> &'static str {
        "CompletedWithoutToe"
    }

    fn handle(&self, ad: &mut ClassAd) -> Result<bool, MissingAttribute> {
        if ad.contains("ToE") {
            tracing::debug!(
                "Job '{}' marked as completed, but not processing: ticket of execution found",
                ad.display_id()
            );
            return Ok(false);
        }
        let by_signal = !require_bool(ad, "TerminatedNormally")?;
        if by_signal {
            let signal = require_i64(ad, "TerminatedBySignal")?;
            ad.insert("ExitBySignal", true);
            ad.insert("ExitSignal", signal);
        } else {
            let code = require_i64(ad, "ReturnValue")?;
            ad.insert("ExitBySignal", false);
            ad.insert("ExitCode", code);
        }
        Ok(true)
    }
}

/// Ordered chain of handlers; the first one to update a record wins.
pub struct HandlerChain {
    handlers: Vec<Box<dyn JobAdHandler>>,
}

impl HandlerChain {
    pub fn empty() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    pub fn push(&mut self, handler: Box<dyn JobAdHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Returns true when some handler updated the record. A record no handler
    /// could process is left untouched.
    pub fn handle(&self, ad: &mut ClassAd) -> bool {
        for handler in &self.handlers {
            match handler.handle(ad) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(missing) => tracing::debug!(
                    "Handler {} failed to process the ad for job '{}': {}. Proceeding to the next handler (if any).",
                    handler.name(),
                    ad.display_id(),
                    missing
                ),
            }
        }
        false
    }

    /// Runs the chain over every completed or held record in `jobs`, no matter
    /// which log or scheduler query they came from.
    pub fn apply_to_terminal(&self, jobs: &mut JobAds) {
        for (id, ad) in jobs.iter_mut() {
            let terminal = matches!(
                ad.get_i64("JobStatus").and_then(JobStatus::from_code),
                Some(JobStatus::Completed) | Some(JobStatus::Held)
            );
            if terminal && !self.handle(ad) {
                tracing::error!("Could not determine exit status for job '{}': {:?}", id, ad);
            }
        }
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self {
            handlers: vec![
                Box::new(HeldByUser),
                Box::new(HeldBySignal),
                Box::new(HeldByOther),
                Box::new(CompletedWithToe),
                Box::new(CompletedWithoutToe),
            ],
        }
    }
}
