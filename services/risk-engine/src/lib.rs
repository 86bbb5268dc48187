//! Risk Engine Service
//!
//! Pure pricing and risk arithmetic for the execution engine:
//! - margin and statutory charges per order
//! - simulated execution pricing (spread and slippage)
//! - loss utilization and health classification
//! - risk threshold resolution
//! - alert construction
//!
//! Nothing here performs I/O; persistence and scheduling live in the
//! `execution-engine` crate.

pub mod margin;
pub mod realism;
pub mod exposure;
pub mod liquidation;
pub mod thresholds;
pub mod validator;
pub mod events;
pub mod engine;

pub use engine::{Assessment, RiskEngine, RiskEngineConfig};
pub use liquidation::HealthLevel;
pub use margin::{MarginBreakdown, MarginCalculator, MarginConfig, MarginError};
pub use realism::{MarketRealism, RealismConfig, RealisticPrice};
pub use thresholds::{resolve_thresholds, RiskThresholds, ThresholdSources};
pub use validator::ValidationError;
