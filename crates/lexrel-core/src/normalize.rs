//! Boundary normalisation for numeric record fields.
//!
//! Missing or `null` values fall back to their documented default and
//! out-of-range values are clamped; nothing here ever rejects input.

use serde::{Deserialize, Deserializer};

use crate::score_math::clamp_score;

pub const DEFAULT_ENGAGEMENT_SCORE: f64 = 50.0;
pub const DEFAULT_PROBABILITY: f64 = 50.0;
pub const DEFAULT_EXPECTED_VALUE: f64 = 0.0;
pub const DEFAULT_CASE_HEALTH: f64 = 100.0;

pub fn clamp_money(v: f64) -> f64 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        DEFAULT_EXPECTED_VALUE
    }
}

fn score_or<'de, D: Deserializer<'de>>(d: D, default: f64) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.map_or(default, clamp_score))
}

pub(crate) const fn default_engagement() -> f64 {
    DEFAULT_ENGAGEMENT_SCORE
}

pub(crate) const fn default_probability() -> f64 {
    DEFAULT_PROBABILITY
}

pub(crate) const fn default_expected_value() -> f64 {
    DEFAULT_EXPECTED_VALUE
}

pub(crate) const fn default_case_health() -> f64 {
    DEFAULT_CASE_HEALTH
}

pub(crate) fn engagement<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    score_or(d, DEFAULT_ENGAGEMENT_SCORE)
}

pub(crate) fn probability<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    score_or(d, DEFAULT_PROBABILITY)
}

pub(crate) fn case_health<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    score_or(d, DEFAULT_CASE_HEALTH)
}

pub(crate) fn expected_value<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(Option::<f64>::deserialize(d)?.map_or(DEFAULT_EXPECTED_VALUE, clamp_money))
}

/// Treats an explicit `null` like a missing field for enum-valued columns.
pub(crate) fn or_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}
