//! Item effect types: time-bounded multiplicative bonuses, tiered by
//! lifetime consumption.
//!
//! Effects carry absolute timestamps so activity can always be recomputed
//! from persisted state; scheduled callbacks are an optimization, never the
//! source of truth.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique identifier for an effect instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EffectId(pub Ulid);

impl EffectId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EffectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EffectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "effect_{}", self.0)
    }
}

/// Gameplay dimension an effect multiplies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectCategory {
    MiningEfficiency,
    CraftingSpeed,
    ExperienceBoost,
    ResourceYield,
    EnergyRestore,
}

impl EffectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectCategory::MiningEfficiency => "mining_efficiency",
            EffectCategory::CraftingSpeed => "crafting_speed",
            EffectCategory::ExperienceBoost => "experience_boost",
            EffectCategory::ResourceYield => "resource_yield",
            EffectCategory::EnergyRestore => "energy_restore",
        }
    }

    /// All categories, for iteration in UI/CLI listings
    pub fn all() -> [EffectCategory; 5] {
        [
            EffectCategory::MiningEfficiency,
            EffectCategory::CraftingSpeed,
            EffectCategory::ExperienceBoost,
            EffectCategory::ResourceYield,
            EffectCategory::EnergyRestore,
        ]
    }
}

impl std::fmt::Display for EffectCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EffectCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mining_efficiency" => Ok(EffectCategory::MiningEfficiency),
            "crafting_speed" => Ok(EffectCategory::CraftingSpeed),
            "experience_boost" => Ok(EffectCategory::ExperienceBoost),
            "resource_yield" => Ok(EffectCategory::ResourceYield),
            "energy_restore" => Ok(EffectCategory::EnergyRestore),
            other => Err(format!("unknown effect category: {other}")),
        }
    }
}

/// A time-bounded multiplicative bonus created by consuming items.
///
/// At most one effect per category is active at any instant; a new usage
/// replaces the prior effect of that category instead of stacking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemEffect {
    pub id: EffectId,
    pub category: EffectCategory,
    /// Tiered multiplier from the lifetime usage counter
    pub multiplier: f64,
    /// Total lifetime in milliseconds (`per_unit_duration × quantity`)
    pub duration_ms: i64,
    /// Millisecond Unix timestamp the effect began
    pub started_at: i64,
    /// Items consumed to create this effect
    pub quantity: u32,
    pub description: String,
}

impl ItemEffect {
    /// Absolute expiry timestamp in milliseconds
    pub fn expires_at(&self) -> i64 {
        self.started_at + self.duration_ms
    }

    /// Whether the effect is still live at `now_ms`.
    ///
    /// Evaluated from timestamps rather than any cached flag, so a missed
    /// or drifting callback can never keep a dead effect alive.
    pub fn is_active_at(&self, now_ms: i64) -> bool {
        now_ms - self.started_at < self.duration_ms
    }

    /// Remaining lifetime at `now_ms`, zero once expired
    pub fn remaining_ms(&self, now_ms: i64) -> i64 {
        (self.expires_at() - now_ms).max(0)
    }
}

/// Tiered multiplier from the lifetime items-used counter.
///
/// The counter is global across all categories; the tier reflects total
/// consumption, not the size of any single use.
pub fn multiplier_for_usage(total_items_used: u64) -> f64 {
    match total_items_used {
        0 => 1.00,
        1..=4 => 1.03,
        5..=10 => 1.10,
        11..=25 => 1.20,
        26..=40 => 1.35,
        41..=100 => 1.50,
        _ => 1.70,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiplier_tiers() {
        assert_eq!(multiplier_for_usage(0), 1.00);
        assert_eq!(multiplier_for_usage(1), 1.03);
        assert_eq!(multiplier_for_usage(4), 1.03);
        assert_eq!(multiplier_for_usage(5), 1.10);
        assert_eq!(multiplier_for_usage(10), 1.10);
        assert_eq!(multiplier_for_usage(11), 1.20);
        assert_eq!(multiplier_for_usage(12), 1.20);
        assert_eq!(multiplier_for_usage(25), 1.20);
        assert_eq!(multiplier_for_usage(26), 1.35);
        assert_eq!(multiplier_for_usage(40), 1.35);
        assert_eq!(multiplier_for_usage(41), 1.50);
        assert_eq!(multiplier_for_usage(100), 1.50);
        assert_eq!(multiplier_for_usage(101), 1.70);
        assert_eq!(multiplier_for_usage(10_000), 1.70);
    }

    #[test]
    fn test_effect_activity_from_timestamps() {
        let effect = ItemEffect {
            id: EffectId::new(),
            category: EffectCategory::MiningEfficiency,
            multiplier: 1.10,
            duration_ms: 10_000,
            started_at: 1_000_000,
            quantity: 2,
            description: "Mining booster".to_string(),
        };
        assert!(effect.is_active_at(1_000_000));
        assert!(effect.is_active_at(1_009_999));
        assert!(!effect.is_active_at(1_010_000));
        assert_eq!(effect.remaining_ms(1_003_000), 7_000);
        assert_eq!(effect.remaining_ms(1_020_000), 0);
    }

    #[test]
    fn test_category_string_roundtrip() {
        for category in EffectCategory::all() {
            let parsed: EffectCategory = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!("warp_speed".parse::<EffectCategory>().is_err());
    }
}
