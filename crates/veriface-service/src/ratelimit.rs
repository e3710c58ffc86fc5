use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maximum consecutive failed verifications before lockout.
const MAX_FAILURES: u32 = 5;
/// Sliding window over which failures are counted.
const WINDOW: Duration = Duration::from_secs(60);
/// Lockout duration after exceeding MAX_FAILURES.
const LOCKOUT: Duration = Duration::from_secs(300);

struct IdentityRecord {
    failures: u32,
    window_start: Instant,
    locked_until: Option<Instant>,
}

/// Per-identity limiter for verification attempts.
///
/// After MAX_FAILURES failed verifications within WINDOW seconds the
/// identity is locked out for LOCKOUT seconds. Detector or store errors are
/// not counted as failures — only a deliberate face-not-matched result
/// increments the counter.
pub struct VerifyLimiter {
    records: HashMap<String, IdentityRecord>,
}

impl VerifyLimiter {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Return `Ok(())` if the identity may attempt verification, or the
    /// number of seconds remaining on its lockout.
    pub fn check(&mut self, identity: &str) -> Result<(), u64> {
        let now = Instant::now();
        let record = self
            .records
            .entry(identity.to_string())
            .or_insert(IdentityRecord {
                failures: 0,
                window_start: now,
                locked_until: None,
            });

        if let Some(locked_until) = record.locked_until {
            if now < locked_until {
                return Err(locked_until.duration_since(now).as_secs());
            }
            // Lockout expired — reset
            *record = IdentityRecord {
                failures: 0,
                window_start: now,
                locked_until: None,
            };
        } else if now.duration_since(record.window_start) >= WINDOW {
            // Sliding window expired — reset failure counter
            record.failures = 0;
            record.window_start = now;
        }

        Ok(())
    }

    /// Record a failed verification. May trigger a lockout.
    pub fn record_failure(&mut self, identity: &str) {
        let now = Instant::now();
        let record = self
            .records
            .entry(identity.to_string())
            .or_insert(IdentityRecord {
                failures: 0,
                window_start: now,
                locked_until: None,
            });

        if now.duration_since(record.window_start) >= WINDOW {
            record.failures = 0;
            record.window_start = now;
        }

        record.failures += 1;
        if record.failures >= MAX_FAILURES {
            record.locked_until = Some(now + LOCKOUT);
            tracing::warn!(
                identity,
                failures = record.failures,
                lockout_secs = LOCKOUT.as_secs(),
                "verification limit reached — locking identity"
            );
        }
    }

    /// Record a successful verification — clear the identity's history.
    pub fn record_success(&mut self, identity: &str) {
        self.records.remove(identity);
    }
}

impl Default for VerifyLimiter {
    fn default() -> Self {
        Self::new()
    }
}
