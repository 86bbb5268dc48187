//! Market realism
//!
//! Turns a base price into a simulated execution price: half the segment
//! spread against the taker, then size-scaled slippage drawn from the
//! segment band, both unfavourable. Randomness is injected so callers can
//! seed it.

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::instrument::Segment;
use types::numeric::{ceil_to_tick, floor_to_tick};
use types::order::Side;

/// Resolution of the uniform slippage draw
const DRAW_STEPS: u32 = 1_000_000;

/// Spread and slippage band for one segment, in percent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentRealism {
    pub spread_percent: Decimal,
    pub slippage_min_percent: Decimal,
    pub slippage_max_percent: Decimal,
}

/// Notional tier; `max_notional = None` is the open-ended top tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTier {
    pub label: &'static str,
    pub max_notional: Option<Decimal>,
    pub multiplier: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RealismConfig {
    pub segments: HashMap<Segment, SegmentRealism>,
    /// Ascending by `max_notional`
    pub tiers: Vec<SizeTier>,
    /// Slippage above this percent produces a warning
    pub slippage_warning_percent: Decimal,
}

impl Default for RealismConfig {
    fn default() -> Self {
        let pct = |mantissa: i64, scale: u32| Decimal::new(mantissa, scale);
        let segments = HashMap::from([
            (
                Segment::Equity,
                SegmentRealism {
                    spread_percent: pct(5, 2),
                    slippage_min_percent: pct(1, 2),
                    slippage_max_percent: pct(5, 2),
                },
            ),
            (
                Segment::Futures,
                SegmentRealism {
                    spread_percent: pct(2, 2),
                    slippage_min_percent: pct(5, 3),
                    slippage_max_percent: pct(2, 2),
                },
            ),
            (
                Segment::Options,
                SegmentRealism {
                    spread_percent: pct(5, 1),
                    slippage_min_percent: pct(5, 2),
                    slippage_max_percent: pct(3, 1),
                },
            ),
            (
                Segment::Commodity,
                SegmentRealism {
                    spread_percent: pct(3, 2),
                    slippage_min_percent: pct(1, 2),
                    slippage_max_percent: pct(5, 2),
                },
            ),
        ]);

        Self {
            segments,
            tiers: vec![
                SizeTier {
                    label: "small",
                    max_notional: Some(Decimal::from(100_000)),
                    multiplier: Decimal::ONE,
                },
                SizeTier {
                    label: "medium",
                    max_notional: Some(Decimal::from(1_000_000)),
                    multiplier: pct(15, 1),
                },
                SizeTier {
                    label: "large",
                    max_notional: None,
                    multiplier: pct(25, 1),
                },
            ],
            slippage_warning_percent: pct(5, 1),
        }
    }
}

impl RealismConfig {
    pub fn segment(&self, segment: Segment) -> SegmentRealism {
        self.segments.get(&segment).copied().unwrap_or(SegmentRealism {
            spread_percent: Decimal::ZERO,
            slippage_min_percent: Decimal::ZERO,
            slippage_max_percent: Decimal::ZERO,
        })
    }

    /// Tier for a notional; falls back to the last tier
    pub fn tier_for(&self, notional: Decimal) -> Option<&SizeTier> {
        self.tiers
            .iter()
            .find(|t| t.max_notional.map_or(true, |max| notional <= max))
            .or_else(|| self.tiers.last())
    }
}

/// Result of applying realism to a base price
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealisticPrice {
    pub execution_price: Decimal,
    pub spread_percent: Decimal,
    pub slippage_percent: Decimal,
    pub size_tier: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MarketRealism {
    config: RealismConfig,
}

impl MarketRealism {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RealismConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RealismConfig {
        &self.config
    }

    /// Adjust `base_price` for spread and slippage.
    ///
    /// Warnings are informational and never block.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        base_price: Decimal,
        side: Side,
        segment: Segment,
        quantity: u32,
        lot_size: u32,
    ) -> RealisticPrice {
        let params = self.config.segment(segment);
        let direction = Decimal::from(side.sign());
        let mut warnings = Vec::new();

        // Step 1: half spread against the taker
        let half_spread = base_price * params.spread_percent / Decimal::ONE_HUNDRED / Decimal::TWO;
        let quoted = base_price + direction * half_spread;

        // Step 2: size-scaled slippage
        let notional = base_price * Decimal::from(quantity);
        let (tier_label, multiplier) = match self.config.tier_for(notional) {
            Some(tier) => (tier.label, tier.multiplier),
            None => ("small", Decimal::ONE),
        };
        let drawn = draw_uniform(rng, params.slippage_min_percent, params.slippage_max_percent);
        let slippage_percent = drawn * multiplier;
        let slipped = quoted * (Decimal::ONE + direction * slippage_percent / Decimal::ONE_HUNDRED);

        // snap to the grid against the taker so the adjustment never rounds away
        let execution_price = match side {
            Side::BUY => ceil_to_tick(slipped),
            Side::SELL => floor_to_tick(slipped),
        };

        if tier_label == "large" {
            warnings.push(format!(
                "Large order: notional {} may see reduced fill quality",
                notional.round_dp(2)
            ));
        }
        if slippage_percent > self.config.slippage_warning_percent {
            warnings.push(format!(
                "High slippage: {}%",
                slippage_percent.round_dp(4)
            ));
        }
        if lot_size > 1 && quantity % lot_size != 0 {
            warnings.push(format!(
                "Quantity {} is not a whole number of lots of {}",
                quantity, lot_size
            ));
        }

        RealisticPrice {
            execution_price,
            spread_percent: params.spread_percent,
            slippage_percent,
            size_tier: tier_label.to_string(),
            warnings,
        }
    }
}

/// Uniform draw in `[min, max]` on a fixed decimal grid
fn draw_uniform<R: Rng + ?Sized>(rng: &mut R, min: Decimal, max: Decimal) -> Decimal {
    if max <= min {
        return min;
    }
    let step = rng.gen_range(0..=DRAW_STEPS);
    min + (max - min) * Decimal::from(step) / Decimal::from(DRAW_STEPS)
}
