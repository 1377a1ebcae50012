//! Built-in computations
//!
//! - `sma`: simple moving average of closes
//! - `volume_profile`: per-bar buy/sell volume by price bucket from trades
//! - `book_imbalance`: bid/ask depth imbalance at each bar close
//! - `price_zones`: support/resistance zones from swing points, as boxes

mod book_imbalance;
mod price_zones;
mod sma;
mod volume_profile;

pub use book_imbalance::BookImbalance;
pub use price_zones::PriceZones;
pub use sma::Sma;
pub use volume_profile::VolumeProfile;

use rust_decimal::Decimal;
use types::errors::ComputationError;
use types::params::Params;

/// Read an integer parameter that must be at least 1.
pub(crate) fn positive_usize(params: &Params, name: &str, default: usize) -> Result<usize, ComputationError> {
    let value = params.usize_or(name, default)?;
    if value == 0 {
        return Err(ComputationError::invalid(name, "must be >= 1"));
    }
    Ok(value)
}

/// Read a decimal parameter that must be strictly positive.
pub(crate) fn positive_decimal(params: &Params, name: &str, default: Decimal) -> Result<Decimal, ComputationError> {
    let value = params.decimal_or(name, default)?;
    if value <= Decimal::ZERO {
        return Err(ComputationError::invalid(name, "must be > 0"));
    }
    Ok(value)
}

/// Price bucket index: `floor(price / width)`.
pub(crate) fn bucket_of(price: Decimal, width: Decimal) -> Decimal {
    (price / width).floor().normalize()
}
