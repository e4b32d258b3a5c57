//! Retry policies and the attempt stream they produce
//!
//! A step's retry policy is either constant or exponential; an absent policy
//! means a single attempt. Waits are jittered and capped by the context's
//! request deadline so cancellation cuts a retry loop short promptly.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::common::{Error, Result};

/// Retry policy as declared on a step
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub constant: Option<RetryPolicyConstant>,
    pub exponential: Option<RetryPolicyExponential>,
}

/// Fixed-interval retry
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicyConstant {
    pub interval: Option<HumaneDuration>,
    pub max_retries: Option<u32>,
    pub jitter_factor: Option<f64>,
}

/// Exponentially growing retry
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RetryPolicyExponential {
    pub initial_interval: Option<HumaneDuration>,
    pub factor: Option<f64>,
    pub max_interval: Option<HumaneDuration>,
    pub max_retries: Option<u32>,
    pub jitter_factor: Option<f64>,
}

impl RetryPolicy {
    /// True when no retry is configured (single attempt)
    pub fn is_none(&self) -> bool {
        self.constant.is_none() && self.exponential.is_none()
    }

    /// Build the attempt stream for this policy
    pub fn build(&self) -> Result<Retrier> {
        match (&self.constant, &self.exponential) {
            (Some(_), Some(_)) => Err(Error::InvalidScenario(
                "retry policy must not declare both constant and exponential".to_string(),
            )),
            (Some(c), None) => Ok(Retrier {
                kind: RetrierKind::Constant {
                    interval: c.interval.map(|d| d.0).unwrap_or(Duration::from_secs(1)),
                },
                max_retries: c.max_retries,
                jitter_factor: c.jitter_factor.unwrap_or(0.0).clamp(0.0, 1.0),
                attempts: 0,
            }),
            (None, Some(e)) => Ok(Retrier {
                kind: RetrierKind::Exponential {
                    next_interval: e
                        .initial_interval
                        .map(|d| d.0)
                        .unwrap_or(Duration::from_millis(500)),
                    factor: e.factor.unwrap_or(2.0).max(1.0),
                    max_interval: e.max_interval.map(|d| d.0),
                },
                max_retries: e.max_retries,
                jitter_factor: e.jitter_factor.unwrap_or(0.0).clamp(0.0, 1.0),
                attempts: 0,
            }),
            (None, None) => Ok(Retrier {
                kind: RetrierKind::None,
                max_retries: Some(0),
                jitter_factor: 0.0,
                attempts: 0,
            }),
        }
    }
}

#[derive(Debug)]
enum RetrierKind {
    None,
    Constant {
        interval: Duration,
    },
    Exponential {
        next_interval: Duration,
        factor: f64,
        max_interval: Option<Duration>,
    },
}

/// Outcome of asking the retrier for another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// Proceed with another attempt (the retrier already waited)
    Continue,
    /// Retries are used up
    Exhausted,
    /// The request deadline fired
    DeadlineExceeded,
}

/// Bounded, cancellable attempt stream.
///
/// The first `next` returns immediately; later calls sleep out the policy's
/// interval first. A step therefore runs at most `max_retries + 1` attempts,
/// and never past the deadline.
#[derive(Debug)]
pub struct Retrier {
    kind: RetrierKind,
    max_retries: Option<u32>,
    jitter_factor: f64,
    attempts: u32,
}

impl Retrier {
    pub fn next(&mut self, deadline: Option<Instant>) -> Attempt {
        if let Some(d) = deadline {
            if Instant::now() >= d {
                return Attempt::DeadlineExceeded;
            }
        }
        if self.attempts == 0 {
            self.attempts = 1;
            return Attempt::Continue;
        }
        if let Some(max) = self.max_retries {
            if self.attempts > max {
                return Attempt::Exhausted;
            }
        }

        let interval = match &mut self.kind {
            RetrierKind::None => return Attempt::Exhausted,
            RetrierKind::Constant { interval } => *interval,
            RetrierKind::Exponential {
                next_interval,
                factor,
                max_interval,
            } => {
                let current = *next_interval;
                let mut grown = current.mul_f64(*factor);
                if let Some(max) = max_interval {
                    grown = grown.min(*max);
                }
                *next_interval = grown;
                current
            }
        };
        let wait = jitter(interval, self.jitter_factor);

        if let Some(d) = deadline {
            let remaining = d.saturating_duration_since(Instant::now());
            if wait >= remaining {
                thread::sleep(remaining);
                return Attempt::DeadlineExceeded;
            }
        }
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        self.attempts += 1;
        Attempt::Continue
    }
}

fn jitter(interval: Duration, factor: f64) -> Duration {
    if factor <= 0.0 || interval.is_zero() {
        return interval;
    }
    let scale = 1.0 - factor + rand::thread_rng().gen::<f64>() * 2.0 * factor;
    interval.mul_f64(scale)
}

/// A duration declared in YAML: a bare number means seconds, a string takes
/// a unit suffix (`10ms`, `1.5s`, `2m`, `1h`).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct HumaneDuration(pub Duration);

impl fmt::Debug for HumaneDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl<'de> Deserialize<'de> for HumaneDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = HumaneDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a duration (number of seconds or string like \"100ms\")")
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<HumaneDuration, E> {
                Ok(HumaneDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<HumaneDuration, E> {
                u64::try_from(v)
                    .map(|s| HumaneDuration(Duration::from_secs(s)))
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<HumaneDuration, E> {
                if v < 0.0 {
                    return Err(E::custom("duration must not be negative"));
                }
                Ok(HumaneDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<HumaneDuration, E> {
                parse_duration(v).map(HumaneDuration).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration \"{s}\""))?;
    let unit_secs = match unit {
        "" | "s" => 1.0,
        "ns" => 1e-9,
        "us" | "µs" => 1e-6,
        "ms" => 1e-3,
        "m" => 60.0,
        "h" => 3600.0,
        _ => return Err(format!("invalid duration unit \"{unit}\"")),
    };
    Ok(Duration::from_secs_f64(number * unit_secs))
}
