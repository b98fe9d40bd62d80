//! Price computation and reward-point arithmetic.
//!
//! Everything here is pure: no clock, no I/O. Callers resolve membership and
//! the nightly rate first.

use crate::allocation;
use crate::config::{PricingConfig, RewardsConfig};
use crate::error::BookingError;
use crate::types::{Money, StayDates};
use serde::{Deserialize, Serialize};

/// Breakdown of a quoted stay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingResult {
    /// Nights charged
    pub nights: u32,
    /// Nightly rate × nights, plus the extra-guest surcharge
    pub base: Money,
    /// Extra-guest surcharge included in `base`
    pub surcharge: Money,
    /// Service fee (zero for active members)
    pub service_fee: Money,
    /// `base + service_fee`
    pub total: Money,
}

/// Quote a stay.
///
/// 1. `base = nightly_rate × nights`
/// 2. each guest beyond `included_guests` adds the nightly surcharge for every night
/// 3. `service_fee = round(base × fee)` unless membership is active
/// 4. `total = base + service_fee`
///
/// # Errors
///
/// - [`BookingError::InvalidGuestCount`] outside 1-5 guests
/// - [`BookingError::AmountOutOfRange`] if an amount overflows
pub fn quote(
    nightly_rate: Money,
    stay: &StayDates,
    guests: u32,
    membership_active: bool,
    config: &PricingConfig,
) -> Result<PricingResult, BookingError> {
    allocation::validate_guests(guests)?;

    let nights = u64::from(stay.nights());
    let mut base = nightly_rate
        .checked_mul(nights)
        .ok_or(BookingError::AmountOutOfRange)?;

    let extra_guests = u64::from(guests.saturating_sub(config.included_guests));
    let surcharge = config
        .extra_guest_nightly_surcharge
        .checked_mul(extra_guests)
        .and_then(|per_night| per_night.checked_mul(nights))
        .ok_or(BookingError::AmountOutOfRange)?;
    base = base
        .checked_add(surcharge)
        .ok_or(BookingError::AmountOutOfRange)?;

    let service_fee = if membership_active {
        Money::ZERO
    } else {
        base.percent_bps(config.service_fee_bps)
    };
    let total = base
        .checked_add(service_fee)
        .ok_or(BookingError::AmountOutOfRange)?;

    Ok(PricingResult {
        nights: stay.nights(),
        base,
        surcharge,
        service_fee,
        total,
    })
}

/// Points earned for a settled total: `floor(total / block) × points_per_block`.
#[must_use]
pub fn points_earned(total: Money, rewards: &RewardsConfig) -> u64 {
    if rewards.accrual_block.is_zero() {
        return 0;
    }
    (total.minor() / rewards.accrual_block.minor()).saturating_mul(rewards.points_per_block)
}

/// Wallet credit for redeeming `points`: `floor(points / points_per_unit)` major units.
///
/// # Errors
///
/// Returns [`BookingError::MinimumRedemptionNotMet`] below the minimum.
pub fn redemption_credit(points: u64, rewards: &RewardsConfig) -> Result<Money, BookingError> {
    if points < rewards.minimum_redemption || rewards.points_per_currency_unit == 0 {
        return Err(BookingError::MinimumRedemptionNotMet {
            minimum: rewards.minimum_redemption,
            requested: points,
        });
    }
    Money::checked_from_major(points / rewards.points_per_currency_unit)
        .ok_or(BookingError::AmountOutOfRange)
}
