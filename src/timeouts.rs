//! Per-operation deadlines.
//!
//! Resources may carry a `timeouts` block with `create`, `read`, `update` and
//! `delete` durations written as `"45s"`, `"30m"` or `"1h30m"`. Anything left
//! unset uses the defaults below.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

const UNITS: [(char, u64); 4] = [('d', 86400), ('h', 3600), ('m', 60), ('s', 1)];

/// Default deadline for create.
pub const DEFAULT_CREATE: Duration = Duration::from_secs(30 * 60);
/// Default deadline for read.
pub const DEFAULT_READ: Duration = Duration::from_secs(5 * 60);
/// Default deadline for update.
pub const DEFAULT_UPDATE: Duration = Duration::from_secs(30 * 60);
/// Default deadline for delete.
pub const DEFAULT_DELETE: Duration = Duration::from_secs(30 * 60);

/// Deadlines for each lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Deadline for create.
    pub create: Duration,
    /// Deadline for read.
    pub read: Duration,
    /// Deadline for update.
    pub update: Duration,
    /// Deadline for delete.
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            create: DEFAULT_CREATE,
            read: DEFAULT_READ,
            update: DEFAULT_UPDATE,
            delete: DEFAULT_DELETE,
        }
    }
}

/// The `timeouts` block as configured.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsBlock {
    /// Create deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create: Option<String>,
    /// Read deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    /// Update deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update: Option<String>,
    /// Delete deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete: Option<String>,
}

impl Timeouts {
    /// Resolve a configured block against the defaults.
    pub fn from_block(block: Option<&TimeoutsBlock>) -> Result<Self, ProviderError> {
        let mut timeouts = Self::default();
        let Some(block) = block else {
            return Ok(timeouts);
        };

        for (field, value, slot) in [
            ("create", &block.create, &mut timeouts.create),
            ("read", &block.read, &mut timeouts.read),
            ("update", &block.update, &mut timeouts.update),
            ("delete", &block.delete, &mut timeouts.delete),
        ] {
            if let Some(value) = value {
                *slot = parse_duration(value).map_err(|e| {
                    ProviderError::Validation(format!("timeouts.{}: {}", field, e))
                })?;
            }
        }
        Ok(timeouts)
    }
}

/// Parse a duration such as `90s`, `30m`, `1h30m` or `1d`.
///
/// Every number needs a unit and units must appear from largest to smallest.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration cannot be empty".to_string());
    }

    let mut secs: u64 = 0;
    let mut digits = String::new();
    let mut next_unit = 0;
    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let position = UNITS[next_unit..]
            .iter()
            .position(|(unit, _)| *unit == c)
            .ok_or_else(|| format!("invalid duration {:?}: unexpected {:?}", input, c))?;
        if digits.is_empty() {
            return Err(format!("invalid duration {:?}: {:?} has no value", input, c));
        }
        let (_, factor) = UNITS[next_unit + position];
        let value: u64 = digits
            .parse()
            .map_err(|e| format!("invalid duration {:?}: {}", input, e))?;
        secs = value
            .checked_mul(factor)
            .and_then(|v| secs.checked_add(v))
            .ok_or_else(|| format!("invalid duration {:?}: too large", input))?;
        digits.clear();
        next_unit += position + 1;
    }

    if !digits.is_empty() {
        return Err(format!("invalid duration {:?}: missing unit after {}", input, digits));
    }
    if secs == 0 {
        return Err(format!("invalid duration {:?}: must be greater than zero", input));
    }
    Ok(Duration::from_secs(secs))
}

/// Render a duration the way [`parse_duration`] reads it.
pub fn format_duration(duration: Duration) -> String {
    let mut remaining = duration.as_secs();
    if remaining == 0 {
        return "0s".to_string();
    }
    let mut out = String::new();
    for (unit, factor) in UNITS {
        if remaining >= factor {
            out.push_str(&format!("{}{}", remaining / factor, unit));
            remaining %= factor;
        }
    }
    out
}

/// Run `fut`, failing with [`ProviderError::DeadlineExceeded`] after `limit`.
pub async fn with_deadline<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::DeadlineExceeded(format!(
            "{} did not complete within {}",
            what,
            format_duration(limit)
        ))),
    }
}
