//! Scheduler-side expressions that grow a job's memory request each time it
//! is held for exceeding memory.
//!
//! The expressions are evaluated by HTCondor, never here. Hold attributes
//! are undefined unless the job is held, so every comparison against them is
//! guarded by an explicit status check and uses the `=?=` meta-operator.

/// Memory scaling parameters of one job: the initial request and the
/// ceiling in MB, and the growth factor between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryScaling {
    pub request: i64,
    pub multiplier: f64,
    pub limit: i64,
}

const HELD_FOR_MEMORY: &str = "JobStatus == 5 \
    && (HoldReasonCode =?= 34 && HoldReasonSubCode =?= 0 \
    || HoldReasonCode =?= 3 && HoldReasonSubCode =?= 34)";

const LAST_HELD_FOR_MEMORY: &str = "LastJobStatus =?= 5 \
    && (LastHoldReasonCode =?= 34 && LastHoldReasonSubCode =?= 0 \
    || LastHoldReasonCode =?= 3 && LastHoldReasonSubCode =?= 34)";

impl MemoryScaling {
    pub fn new(request: i64, multiplier: f64, limit: i64) -> Self {
        Self {
            request,
            multiplier,
            limit,
        }
    }

    /// `min({int(M * pow(X, <exponent>)), L})`
    fn capped(&self, exponent: &str) -> String {
        format!(
            "min({{int({} * pow({:?}, {})), {}}})",
            self.request, self.multiplier, exponent, self.limit
        )
    }

    /// Releases a job held for memory while it has retries left and its last
    /// attempt ran below the ceiling.
    pub fn release_expr(&self) -> String {
        format!(
            "{} && NumJobStarts <= JobMaxRetries && {} < {}",
            HELD_FOR_MEMORY,
            self.capped("NumJobStarts - 1"),
            self.limit
        )
    }

    /// Removes a job held for memory once it ran out of retries or already
    /// ran at the ceiling.
    pub fn remove_expr(&self) -> String {
        format!(
            "{} && (NumJobStarts > JobMaxRetries || {} == {})",
            HELD_FOR_MEMORY,
            self.capped("NumJobStarts - 1"),
            self.limit
        )
    }

    /// Scaled request after a memory hold; otherwise the larger of the
    /// initial request and the measured usage.
    pub fn request_memory_expr(&self) -> String {
        format!(
            "({}) ? {} : max({{{}, MemoryUsage ?: 0}})",
            LAST_HELD_FOR_MEMORY,
            self.capped("NumJobStarts"),
            self.request
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Host-side model of the expressions above, for checking their
    /// arithmetic.
    impl MemoryScaling {
        /// Memory the given 1-based attempt runs with when every earlier
        /// attempt was held for memory.
        fn attempt_request(&self, attempt: u32) -> i64 {
            let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
            let scaled = (self.request as f64 * self.multiplier.powi(exponent)) as i64;
            scaled.min(self.limit)
        }

        fn release_allowed(&self, attempt: u32, max_retries: u32) -> bool {
            attempt <= max_retries && self.attempt_request(attempt) < self.limit
        }

        fn remove_required(&self, attempt: u32, max_retries: u32) -> bool {
            attempt > max_retries || self.attempt_request(attempt) == self.limit
        }
    }

    #[test]
    fn test_release_expression_text() {
        let scaling = MemoryScaling::new(2048, 2.0, 8192);
        assert_eq!(
            scaling.release_expr(),
            "JobStatus == 5 && (HoldReasonCode =?= 34 && HoldReasonSubCode =?= 0 \
             || HoldReasonCode =?= 3 && HoldReasonSubCode =?= 34) \
             && NumJobStarts <= JobMaxRetries \
             && min({int(2048 * pow(2.0, NumJobStarts - 1)), 8192}) < 8192"
        );
    }

    #[test]
    fn test_remove_expression_text() {
        let scaling = MemoryScaling::new(2048, 2.0, 8192);
        assert_eq!(
            scaling.remove_expr(),
            "JobStatus == 5 && (HoldReasonCode =?= 34 && HoldReasonSubCode =?= 0 \
             || HoldReasonCode =?= 3 && HoldReasonSubCode =?= 34) \
             && (NumJobStarts > JobMaxRetries \
             || min({int(2048 * pow(2.0, NumJobStarts - 1)), 8192}) == 8192)"
        );
    }

    #[test]
    fn test_request_memory_expression_text() {
        let scaling = MemoryScaling::new(2048, 1.5, 8192);
        assert_eq!(
            scaling.request_memory_expr(),
            "(LastJobStatus =?= 5 && (LastHoldReasonCode =?= 34 && LastHoldReasonSubCode =?= 0 \
             || LastHoldReasonCode =?= 3 && LastHoldReasonSubCode =?= 34)) \
             ? min({int(2048 * pow(1.5, NumJobStarts)), 8192}) \
             : max({2048, MemoryUsage ?: 0})"
        );
    }

    #[test]
    fn test_requests_grow_monotonically_up_to_the_ceiling() {
        let scaling = MemoryScaling::new(2048, 2.0, 8192);
        let requests: Vec<i64> = (1..=4).map(|n| scaling.attempt_request(n)).collect();
        assert_eq!(requests, vec![2048, 4096, 8192, 8192]);
    }

    #[test]
    fn test_release_stops_once_the_ceiling_is_reached() {
        let scaling = MemoryScaling::new(2048, 2.0, 8192);
        assert!(scaling.release_allowed(1, 5));
        assert!(scaling.release_allowed(2, 5));
        assert!(!scaling.release_allowed(3, 5));
        assert!(scaling.remove_required(3, 5));
        assert!(scaling.remove_required(2, 1), "retries exhausted");
        assert!(!scaling.remove_required(1, 5));
    }
}
