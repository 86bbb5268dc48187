//! Runtime settings
//!
//! Risk thresholds and margin overrides are read from the settings table,
//! then the environment, then compiled defaults, and cached for a bounded
//! time so operator changes take effect without a restart.

use chrono::Utc;
use persistence::Database;
use risk_engine::thresholds::{
    AUTO_CLOSE_THRESHOLD_ENV, AUTO_CLOSE_THRESHOLD_KEY, WARNING_THRESHOLD_ENV, WARNING_THRESHOLD_KEY,
};
use risk_engine::{resolve_thresholds, MarginCalculator, MarginConfig, RiskThresholds, ThresholdSources};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{EngineError, Result};

/// Default cache lifetime for resolved settings
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;
type Slot<T> = Mutex<Option<(Instant, T)>>;

/// Cached settings resolution over store, environment and defaults
pub struct SettingsCache {
    db: Database,
    env: EnvLookup,
    max_age: Duration,
    thresholds: Slot<RiskThresholds>,
    margin: Slot<Arc<MarginCalculator>>,
}

impl fmt::Debug for SettingsCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsCache")
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl SettingsCache {
    /// Cache reading the process environment
    pub fn new(db: Database, max_age: Duration) -> Self {
        Self::with_env(db, max_age, |key| std::env::var(key).ok())
    }

    /// Cache with a custom environment lookup
    pub fn with_env<F>(db: Database, max_age: Duration, env: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            db,
            env: Box::new(env),
            max_age,
            thresholds: Mutex::new(None),
            margin: Mutex::new(None),
        }
    }

    /// Current thresholds, re-resolved once the cached value is too old
    pub fn thresholds(&self) -> RiskThresholds {
        self.cached(&self.thresholds, || {
            let thresholds = self.resolve_thresholds();
            debug!(warning = %thresholds.warning, auto_close = %thresholds.auto_close, "Thresholds loaded");
            thresholds
        })
    }

    /// Margin calculator over the current leverage and brokerage overrides.
    ///
    /// Each key resolves from the settings table, then its environment
    /// variable (see [`MarginConfig::env_key`]), then the built-in default.
    pub fn margin_calculator(&self) -> Arc<MarginCalculator> {
        self.cached(&self.margin, || {
            let config = MarginConfig::from_lookup(|key| {
                self.db.setting(key).or_else(|| (self.env)(&MarginConfig::env_key(key)))
            });
            debug!(
                leverage_overrides = config.leverage_overrides.len(),
                brokerage_overrides = config.brokerage_overrides.len(),
                "Margin overrides loaded"
            );
            Arc::new(MarginCalculator::with_config(config))
        })
    }

    /// Drop the cached values so the next read hits the store
    pub fn invalidate(&self) {
        *self.thresholds.lock().unwrap_or_else(PoisonError::into_inner) = None;
        *self.margin.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn cached<T: Clone>(&self, slot: &Slot<T>, load: impl FnOnce() -> T) -> T {
        let mut cached = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((loaded_at, value)) = cached.as_ref() {
            if loaded_at.elapsed() < self.max_age {
                return value.clone();
            }
        }
        let value = load();
        *cached = Some((Instant::now(), value.clone()));
        value
    }

    /// Persist new thresholds to the settings table
    pub fn store_thresholds(&self, thresholds: RiskThresholds) -> Result<()> {
        if thresholds.auto_close < thresholds.warning {
            return Err(EngineError::InvalidThresholds {
                warning: thresholds.warning.to_string(),
                auto_close: thresholds.auto_close.to_string(),
            });
        }
        let now = Utc::now();
        let mut txn = self.db.begin();
        txn.set_setting(WARNING_THRESHOLD_KEY, thresholds.warning.to_string(), now);
        txn.set_setting(AUTO_CLOSE_THRESHOLD_KEY, thresholds.auto_close.to_string(), now);
        txn.commit()?;
        self.invalidate();
        info!(warning = %thresholds.warning, auto_close = %thresholds.auto_close, "Thresholds updated");
        Ok(())
    }

    fn resolve_thresholds(&self) -> RiskThresholds {
        let store_warning = self.db.setting(WARNING_THRESHOLD_KEY);
        let store_auto_close = self.db.setting(AUTO_CLOSE_THRESHOLD_KEY);
        let env_warning = (self.env)(WARNING_THRESHOLD_ENV);
        let env_auto_close = (self.env)(AUTO_CLOSE_THRESHOLD_ENV);

        resolve_thresholds(ThresholdSources {
            store_warning: store_warning.as_deref(),
            store_auto_close: store_auto_close.as_deref(),
            env_warning: env_warning.as_deref(),
            env_auto_close: env_auto_close.as_deref(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use types::instrument::{ProductType, Segment};

    fn pct(v: i64) -> Decimal {
        Decimal::new(v, 2)
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let cache = SettingsCache::with_env(Database::in_memory(), DEFAULT_MAX_AGE, no_env);
        assert_eq!(cache.thresholds(), RiskThresholds::default());
    }

    #[test]
    fn test_env_used_when_store_empty() {
        let cache = SettingsCache::with_env(Database::in_memory(), DEFAULT_MAX_AGE, |key| {
            (key == WARNING_THRESHOLD_ENV).then(|| "70".to_string())
        });
        let t = cache.thresholds();
        assert_eq!(t.warning, pct(70));
        assert_eq!(t.auto_close, pct(90));
    }

    #[test]
    fn test_store_beats_env() {
        let db = Database::in_memory();
        let mut txn = db.begin();
        txn.set_setting(WARNING_THRESHOLD_KEY, "0.6", Utc::now());
        txn.commit().unwrap();

        let cache = SettingsCache::with_env(db, DEFAULT_MAX_AGE, |_| Some("0.7".to_string()));
        let t = cache.thresholds();
        assert_eq!(t.warning, Decimal::new(6, 1));
        assert_eq!(t.auto_close, Decimal::new(7, 1));
    }

    #[test]
    fn test_cache_holds_until_invalidated() {
        let db = Database::in_memory();
        let cache = SettingsCache::with_env(db.clone(), DEFAULT_MAX_AGE, no_env);
        assert_eq!(cache.thresholds().warning, pct(80));

        let mut txn = db.begin();
        txn.set_setting(WARNING_THRESHOLD_KEY, "0.5", Utc::now());
        txn.commit().unwrap();
        assert_eq!(cache.thresholds().warning, pct(80));

        cache.invalidate();
        assert_eq!(cache.thresholds().warning, pct(50));
    }

    #[test]
    fn test_zero_max_age_always_reloads() {
        let db = Database::in_memory();
        let cache = SettingsCache::with_env(db.clone(), Duration::ZERO, no_env);
        assert_eq!(cache.thresholds().warning, pct(80));
        let mut txn = db.begin();
        txn.set_setting(WARNING_THRESHOLD_KEY, "65%", Utc::now());
        txn.commit().unwrap();
        assert_eq!(cache.thresholds().warning, pct(65));
    }

    #[test]
    fn test_store_thresholds_round_trip() {
        let cache = SettingsCache::with_env(Database::in_memory(), DEFAULT_MAX_AGE, no_env);
        let t = RiskThresholds::new(pct(70), pct(85)).unwrap();
        cache.store_thresholds(t).unwrap();
        assert_eq!(cache.thresholds(), t);
    }

    fn intraday_margin(cache: &SettingsCache) -> Decimal {
        // 100 x 250 = 25,000 turnover
        cache
            .margin_calculator()
            .calculate(Segment::Equity, ProductType::Intraday, 100, Decimal::from(250), 1)
            .unwrap()
            .required_margin
    }

    #[test]
    fn test_margin_overrides_from_store() {
        let db = Database::in_memory();
        let mut txn = db.begin();
        txn.set_setting("margin.equity.intraday.leverage", "5", Utc::now());
        txn.commit().unwrap();
        let cache = SettingsCache::with_env(db, DEFAULT_MAX_AGE, no_env);
        assert_eq!(
            cache.margin_calculator().config().leverage(Segment::Equity, ProductType::Intraday),
            Decimal::from(5)
        );
    }

    #[test]
    fn test_margin_env_then_store_after_startup() {
        let db = Database::in_memory();
        let cache = SettingsCache::with_env(db.clone(), Duration::ZERO, |key| {
            (key == "MARGIN_EQUITY_INTRADAY_LEVERAGE").then(|| "5".to_string())
        });
        assert_eq!(intraday_margin(&cache), Decimal::from(5_000));

        let mut txn = db.begin();
        txn.set_setting("margin.equity.intraday.leverage", "10", Utc::now());
        txn.commit().unwrap();
        assert_eq!(intraday_margin(&cache), Decimal::from(2_500));
    }

    #[test]
    fn test_brokerage_override_from_env() {
        let cache = SettingsCache::with_env(Database::in_memory(), DEFAULT_MAX_AGE, |key| {
            (key == "BROKERAGE_EQUITY_FLAT").then(|| "7".to_string())
        });
        let b = cache
            .margin_calculator()
            .calculate(Segment::Equity, ProductType::Intraday, 100, Decimal::from(250), 1)
            .unwrap();
        assert_eq!(b.brokerage, Decimal::from(7));
    }

    #[test]
    fn test_margin_cached_until_invalidated() {
        let db = Database::in_memory();
        let cache = SettingsCache::with_env(db.clone(), DEFAULT_MAX_AGE, no_env);
        assert_eq!(intraday_margin(&cache), Decimal::from(125));

        let mut txn = db.begin();
        txn.set_setting("margin.equity.intraday.leverage", "10", Utc::now());
        txn.commit().unwrap();
        assert_eq!(intraday_margin(&cache), Decimal::from(125));

        cache.invalidate();
        assert_eq!(intraday_margin(&cache), Decimal::from(2_500));
    }
}
