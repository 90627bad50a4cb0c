//! Fare split and environmental impact for a shared ride.
//!
//! Formula: `fare = base_fare + distance_km * per_km_rate`. The original
//! rider pays a share of their baseline; the added rider pays part of the base
//! fare plus a discounted distance component.

use bevy_ecs::prelude::Resource;
use serde::{Deserialize, Serialize};

pub const CO2_KG_PER_KM: f64 = 0.12;
pub const FUEL_LITERS_PER_KM: f64 = 0.08;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Resource)]
#[serde(default)]
pub struct PricingConfig {
    pub base_fare: f64,
    pub per_km_rate: f64,
    /// Share of the baseline fare the original rider still pays.
    pub original_rider_share: f64,
    /// Share of the base fare the added rider pays.
    pub shared_base_share: f64,
    /// Share of the distance component the added rider pays.
    pub shared_distance_share: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_fare: 10.0,
            per_km_rate: 2.0,
            original_rider_share: 0.7,
            shared_base_share: 0.5,
            shared_distance_share: 0.8,
        }
    }
}

impl PricingConfig {
    pub fn fare(&self, distance_km: f64) -> f64 {
        round_cents(self.base_fare + distance_km.max(0.0) * self.per_km_rate)
    }
}

pub fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalRiderFare {
    pub original_fare: f64,
    pub new_fare: f64,
    pub savings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRiderFare {
    pub direct_fare: f64,
    pub shared_fare: f64,
    pub savings: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FareSplit {
    pub original_rider: OriginalRiderFare,
    pub new_rider: NewRiderFare,
    pub total_savings: f64,
}

/// Splits fares between the original rider (baseline over `original_km`) and
/// the added rider (baseline over `direct_km`). Shares are clamped to
/// `[0, 1]`, so neither party is charged more than their baseline.
pub fn split_fare(config: &PricingConfig, original_km: f64, direct_km: f64) -> FareSplit {
    let original_fare = config.fare(original_km);
    let new_fare = round_cents(original_fare * config.original_rider_share.clamp(0.0, 1.0));

    let direct_fare = config.fare(direct_km);
    let shared_fare = round_cents(
        config.base_fare * config.shared_base_share.clamp(0.0, 1.0)
            + direct_km.max(0.0) * config.per_km_rate * config.shared_distance_share.clamp(0.0, 1.0),
    )
    .min(direct_fare);

    let original_savings = round_cents(original_fare - new_fare);
    let new_savings = round_cents(direct_fare - shared_fare);

    FareSplit {
        original_rider: OriginalRiderFare {
            original_fare,
            new_fare,
            savings: original_savings,
        },
        new_rider: NewRiderFare {
            direct_fare,
            shared_fare,
            savings: new_savings,
        },
        total_savings: round_cents(original_savings + new_savings),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentalImpact {
    /// Kilograms of CO2.
    #[serde(rename = "co2Reduction")]
    pub co2_reduction_kg: f64,
    /// Liters of fuel.
    #[serde(rename = "fuelSaved")]
    pub fuel_saved_liters: f64,
}

pub fn environmental_impact(direct_km: f64) -> EnvironmentalImpact {
    let km = direct_km.max(0.0);
    EnvironmentalImpact {
        co2_reduction_kg: (km * CO2_KG_PER_KM * 1000.0).round() / 1000.0,
        fuel_saved_liters: round_cents(km * FUEL_LITERS_PER_KM),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn ten_and_three_km_split() {
        let split = split_fare(&PricingConfig::default(), 10.0, 3.0);
        assert_eq!(split.original_rider.original_fare, 30.0);
        assert_eq!(split.original_rider.new_fare, 21.0);
        assert_eq!(split.original_rider.savings, 9.0);
        assert_eq!(split.new_rider.direct_fare, 16.0);
        assert_eq!(split.new_rider.shared_fare, 9.8);
        assert_eq!(split.new_rider.savings, 6.2);
        assert_eq!(split.total_savings, 15.2);
    }

    #[test]
    fn impact_is_proportional_to_direct_distance() {
        let impact = environmental_impact(3.0);
        assert_eq!(impact.co2_reduction_kg, 0.36);
        assert_eq!(impact.fuel_saved_liters, 0.24);
        assert_eq!(environmental_impact(-1.0).co2_reduction_kg, 0.0);
    }

    #[test]
    fn shares_above_one_never_raise_a_fare() {
        let config = PricingConfig {
            original_rider_share: 1.5,
            shared_base_share: 3.0,
            shared_distance_share: 2.0,
            ..PricingConfig::default()
        };
        let split = split_fare(&config, 5.0, 5.0);
        assert!(split.original_rider.new_fare <= split.original_rider.original_fare);
        assert!(split.new_rider.shared_fare <= split.new_rider.direct_fare);
    }

    proptest! {
        #[test]
        fn savings_add_up_and_are_never_negative(
            original_km in 0.0f64..500.0,
            direct_km in 0.0f64..500.0,
        ) {
            let split = split_fare(&PricingConfig::default(), original_km, direct_km);
            let sum = split.original_rider.savings + split.new_rider.savings;
            prop_assert!((sum - split.total_savings).abs() < 1e-6);
            prop_assert!(split.original_rider.new_fare <= split.original_rider.original_fare);
            prop_assert!(split.new_rider.shared_fare <= split.new_rider.direct_fare);
            prop_assert!(split.original_rider.savings >= 0.0);
            prop_assert!(split.new_rider.savings >= 0.0);
        }
    }
}
