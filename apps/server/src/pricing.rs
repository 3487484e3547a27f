//! Price, duration and deposit for a service selection.
//!
//! Formula:
//! `total = round((basePrice + length.priceAdd) * size.priceMultiplier + Σ addOn.price)`
//! `duration = round(baseDuration * size.timeMultiplier, 1 dp)`
//!
//! Add-ons are flat and never scaled by the size multiplier. Unset size or
//! length contribute nothing, so a bare service prices at its base figures.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::catalog::{AddOn, Length, ServiceDefinition, Size};

/// Default flat deposit in currency units.
pub const DEFAULT_DEPOSIT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricingResult {
    pub total_price: i64,
    /// Hours, one decimal place.
    pub duration: f64,
    pub deposit: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PricingError {
    #[error("service {service} has no pricing for size {size}")]
    MissingSize { service: String, size: Size },
    #[error("service {service} has no pricing for length {length}")]
    MissingLength { service: String, length: Length },
}

/// How the upfront deposit is derived from the total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum DepositPolicy {
    /// Same amount for every booking.
    Fixed(i64),
    /// Percentage of the rounded total.
    Percent(u8),
}

impl Default for DepositPolicy {
    fn default() -> Self {
        DepositPolicy::Fixed(DEFAULT_DEPOSIT)
    }
}

impl DepositPolicy {
    pub fn deposit_for(&self, total_price: i64) -> i64 {
        match *self {
            DepositPolicy::Fixed(amount) => amount,
            DepositPolicy::Percent(pct) => {
                (total_price as f64 * f64::from(pct) / 100.0).round() as i64
            }
        }
    }
}

impl FromStr for DepositPolicy {
    type Err = anyhow::Error;

    /// Parses `fixed:<units>` or `percent:<0-100>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s.split_once(':').ok_or_else(|| {
            anyhow::anyhow!("deposit policy must look like fixed:50 or percent:30")
        })?;
        match kind.trim() {
            "fixed" => {
                let amount: i64 = value.trim().parse()?;
                if amount < 0 {
                    anyhow::bail!("fixed deposit cannot be negative");
                }
                Ok(DepositPolicy::Fixed(amount))
            }
            "percent" => {
                let pct: u8 = value.trim().parse()?;
                if pct > 100 {
                    anyhow::bail!("deposit percentage must be between 0 and 100");
                }
                Ok(DepositPolicy::Percent(pct))
            }
            other => anyhow::bail!("unknown deposit policy {other:?}"),
        }
    }
}

impl fmt::Display for DepositPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DepositPolicy::Fixed(amount) => write!(f, "fixed:{amount}"),
            DepositPolicy::Percent(pct) => write!(f, "percent:{pct}"),
        }
    }
}

/// Compute total price, duration and deposit for a (possibly partial) selection.
pub fn compute_price(
    service: &ServiceDefinition,
    size: Option<Size>,
    length: Option<Length>,
    add_ons: &[AddOn],
    policy: DepositPolicy,
) -> Result<PricingResult, PricingError> {
    let size_variant = match size {
        Some(size) => Some(service.sizes.get(&size).ok_or_else(|| PricingError::MissingSize {
            service: service.id.clone(),
            size,
        })?),
        None => None,
    };
    let length_add = match length {
        Some(length) => {
            service
                .lengths
                .get(&length)
                .ok_or_else(|| PricingError::MissingLength {
                    service: service.id.clone(),
                    length,
                })?
                .price_add
        }
        None => 0.0,
    };

    let price_multiplier = size_variant.map_or(1.0, |v| v.price_multiplier);
    let time_multiplier = size_variant.map_or(1.0, |v| v.time_multiplier);

    let mut total = service.base_price;
    total += length_add;
    total *= price_multiplier;
    for add_on in add_ons {
        total += add_on.price;
    }
    let total_price = total.round() as i64;

    let duration = round_to_tenth(service.base_duration * time_multiplier);

    Ok(PricingResult {
        total_price,
        duration,
        deposit: policy.deposit_for(total_price),
    })
}

fn round_to_tenth(hours: f64) -> f64 {
    (hours * 10.0).round() / 10.0
}

/// Add `add_on` when absent, remove it when already selected (matched by id).
pub fn toggle_add_on(selected: &mut Vec<AddOn>, add_on: &AddOn) {
    if let Some(pos) = selected.iter().position(|a| a.id == add_on.id) {
        selected.remove(pos);
    } else {
        selected.push(add_on.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LengthVariant, SizeVariant};
    use std::collections::BTreeMap;

    fn size_variant(price: f64, time: f64, label: &str) -> SizeVariant {
        SizeVariant {
            price_multiplier: price,
            time_multiplier: time,
            label: label.into(),
        }
    }

    fn knotless() -> ServiceDefinition {
        let sizes = BTreeMap::from([
            (Size::Small, size_variant(1.5, 1.5, "Small")),
            (Size::Medium, size_variant(1.0, 1.0, "Medium")),
            (Size::Jumbo, size_variant(0.8, 0.7, "Jumbo")),
        ]);
        let lengths = BTreeMap::from([
            (Length::Shoulder, LengthVariant { price_add: 0.0, label: "Shoulder".into() }),
            (Length::MidBack, LengthVariant { price_add: 20.0, label: "Mid-back".into() }),
            (Length::Waist, LengthVariant { price_add: 40.0, label: "Waist".into() }),
            (Length::Butt, LengthVariant { price_add: 60.0, label: "Butt".into() }),
        ]);
        ServiceDefinition {
            id: "knotless-braids".into(),
            name: "Knotless Braids".into(),
            description: String::new(),
            base_price: 80.0,
            base_duration: 5.0,
            sizes,
            lengths,
        }
    }

    fn add_on(id: &str, price: f64) -> AddOn {
        AddOn {
            id: id.into(),
            name: id.into(),
            price,
            description: String::new(),
        }
    }

    fn price(size: Option<Size>, length: Option<Length>, add_ons: &[AddOn]) -> PricingResult {
        compute_price(&knotless(), size, length, add_ons, DepositPolicy::default()).unwrap()
    }

    #[test]
    fn test_medium_waist() {
        let result = price(Some(Size::Medium), Some(Length::Waist), &[]);
        assert_eq!(result.total_price, 120);
        assert_eq!(result.duration, 5.0);
    }

    #[test]
    fn test_small_shoulder() {
        let result = price(Some(Size::Small), Some(Length::Shoulder), &[]);
        assert_eq!(result.total_price, 120);
        assert_eq!(result.duration, 7.5);
    }

    #[test]
    fn test_length_added_before_multiplier() {
        // (80 + 60) * 1.5 = 210, not 80 * 1.5 + 60 = 180
        let result = price(Some(Size::Small), Some(Length::Butt), &[]);
        assert_eq!(result.total_price, 210);
    }

    #[test]
    fn test_total_rounds_to_nearest_unit() {
        let mut service = knotless();
        service.base_price = 77.0;
        // (77 + 20) * 0.8 = 77.6
        let result = compute_price(
            &service,
            Some(Size::Jumbo),
            Some(Length::MidBack),
            &[],
            DepositPolicy::default(),
        )
        .unwrap();
        assert_eq!(result.total_price, 78);
    }

    #[test]
    fn test_duration_one_decimal() {
        let mut service = knotless();
        service.base_duration = 4.5;
        // 4.5 * 1.5 = 6.75
        let result = compute_price(&service, Some(Size::Small), None, &[], DepositPolicy::default())
            .unwrap();
        assert_eq!(result.duration, 6.8);
        assert_eq!(result.duration * 10.0, (result.duration * 10.0).round());
    }

    #[test]
    fn test_add_ons_are_flat_for_every_size() {
        let extra = add_on("boho-curls", 25.0);
        for size in Size::ALL {
            for length in Length::ALL {
                let without = price(Some(size), Some(length), &[]);
                let with = price(Some(size), Some(length), std::slice::from_ref(&extra));
                assert_eq!(with.total_price - without.total_price, 25);
                assert_eq!(with.duration, without.duration);
            }
        }
    }

    #[test]
    fn test_unset_selection_uses_base_figures() {
        let result = price(None, None, &[]);
        assert_eq!(result.total_price, 80);
        assert_eq!(result.duration, 5.0);
    }

    #[test]
    fn test_length_without_size_adds_surcharge_only() {
        let result = price(None, Some(Length::Waist), &[]);
        assert_eq!(result.total_price, 120);
        assert_eq!(result.duration, 5.0);
    }

    #[test]
    fn test_same_input_same_output() {
        let extras = [add_on("wash", 15.0), add_on("beads", 10.0)];
        let first = price(Some(Size::Jumbo), Some(Length::MidBack), &extras);
        let second = price(Some(Size::Jumbo), Some(Length::MidBack), &extras);
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_variant_is_error() {
        let mut service = knotless();
        service.sizes.remove(&Size::Jumbo);
        let err = compute_price(&service, Some(Size::Jumbo), None, &[], DepositPolicy::default())
            .unwrap_err();
        assert_eq!(
            err,
            PricingError::MissingSize {
                service: "knotless-braids".into(),
                size: Size::Jumbo
            }
        );
    }

    #[test]
    fn test_fixed_deposit_ignores_total() {
        assert_eq!(price(Some(Size::Small), Some(Length::Butt), &[]).deposit, 50);
        assert_eq!(price(None, None, &[]).deposit, 50);
    }

    #[test]
    fn test_percent_deposit() {
        assert_eq!(DepositPolicy::Percent(30).deposit_for(120), 36);
        assert_eq!(DepositPolicy::Percent(30).deposit_for(125), 38);
    }

    #[test]
    fn test_deposit_policy_parse() {
        assert_eq!("fixed:50".parse::<DepositPolicy>().unwrap(), DepositPolicy::Fixed(50));
        assert_eq!("percent:30".parse::<DepositPolicy>().unwrap(), DepositPolicy::Percent(30));
        assert!("percent:130".parse::<DepositPolicy>().is_err());
        assert!("fixed".parse::<DepositPolicy>().is_err());
        assert!("half:1".parse::<DepositPolicy>().is_err());
    }

    #[test]
    fn test_toggle_add_on_twice_restores_selection() {
        let wash = add_on("wash", 15.0);
        let beads = add_on("beads", 10.0);
        let mut selected = vec![beads.clone()];

        toggle_add_on(&mut selected, &wash);
        assert_eq!(selected, vec![beads.clone(), wash.clone()]);

        toggle_add_on(&mut selected, &wash);
        assert_eq!(selected, vec![beads]);
    }
}
