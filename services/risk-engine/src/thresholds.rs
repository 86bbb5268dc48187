//! Risk threshold resolution
//!
//! Thresholds come from the settings store, then the environment, then the
//! compiled defaults. Resolution is a pure function over the raw inputs so
//! the caching layer stays outside this crate.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Settings-store key for the warning threshold
pub const WARNING_THRESHOLD_KEY: &str = "risk.warning_threshold";
/// Settings-store key for the auto-close threshold
pub const AUTO_CLOSE_THRESHOLD_KEY: &str = "risk.auto_close_threshold";
/// Environment fallback for the warning threshold
pub const WARNING_THRESHOLD_ENV: &str = "RISK_WARNING_THRESHOLD";
/// Environment fallback for the auto-close threshold
pub const AUTO_CLOSE_THRESHOLD_ENV: &str = "RISK_AUTO_CLOSE_THRESHOLD";

/// Loss-utilization thresholds as ratios in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub warning: Decimal,
    pub auto_close: Decimal,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            warning: Decimal::new(80, 2),
            auto_close: Decimal::new(90, 2),
        }
    }
}

impl RiskThresholds {
    /// Build from two ratios, normalising and clamping like `resolve_thresholds`
    pub fn new(warning: Decimal, auto_close: Decimal) -> Option<Self> {
        let warning = normalize_ratio(warning)?;
        let auto_close = normalize_ratio(auto_close)?;
        Some(Self {
            warning,
            auto_close: auto_close.max(warning),
        })
    }
}

/// Raw threshold inputs from each source, first match wins
#[derive(Debug, Clone, Copy, Default)]
pub struct ThresholdSources<'a> {
    pub store_warning: Option<&'a str>,
    pub store_auto_close: Option<&'a str>,
    pub env_warning: Option<&'a str>,
    pub env_auto_close: Option<&'a str>,
}

/// Resolve thresholds: store, then env, then default.
///
/// Invalid inputs at one level fall through to the next. Percent-style
/// values (above 1, up to 100) are divided by 100. The auto-close threshold
/// is clamped to be at least the warning threshold.
pub fn resolve_thresholds(sources: ThresholdSources<'_>) -> RiskThresholds {
    let defaults = RiskThresholds::default();

    let warning = [sources.store_warning, sources.env_warning]
        .into_iter()
        .flatten()
        .find_map(parse_ratio)
        .unwrap_or(defaults.warning);

    let auto_close = [sources.store_auto_close, sources.env_auto_close]
        .into_iter()
        .flatten()
        .find_map(parse_ratio)
        .unwrap_or(defaults.auto_close);

    RiskThresholds {
        warning,
        auto_close: auto_close.max(warning),
    }
}

/// Parse a ratio or percent string into a ratio in `[0, 1]`
pub fn parse_ratio(raw: &str) -> Option<Decimal> {
    let value = raw.trim().trim_end_matches('%').trim().parse::<Decimal>().ok()?;
    normalize_ratio(value)
}

fn normalize_ratio(value: Decimal) -> Option<Decimal> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        None
    } else if value > Decimal::ONE {
        Some(value / Decimal::ONE_HUNDRED)
    } else {
        Some(value)
    }
}
