//! Volume profile
//!
//! Accumulates trade volume by price bucket within the forming bar and keeps
//! the profiles of the last `lookback` closed bars. Each closed bar emits the
//! aggregate over the retained profiles.
//!
//! | param         | default | meaning                              |
//! |---------------|---------|--------------------------------------|
//! | `lookback`    | 20      | closed-bar profiles retained (>= 1)  |
//! | `bucket_size` | 1       | price bucket width (> 0)             |

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;
use types::errors::ComputationError;
use types::events::{Bar, EventKind, EventKindSet, Side, Trade};
use types::params::Params;
use types::result::Output;

use super::{bucket_of, positive_decimal, positive_usize};
use crate::computation::{BarContext, Computation, StepResult};

const DEFAULT_LOOKBACK: usize = 20;

#[derive(Debug, Default, Clone, Copy)]
pub struct VolumeProfile;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct LevelVolume {
    buy: Decimal,
    sell: Decimal,
}

impl LevelVolume {
    fn total(&self) -> Decimal {
        self.buy + self.sell
    }
}

/// Volume by bucket index for one bar.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct BarProfile {
    levels: BTreeMap<Decimal, LevelVolume>,
    trades: u64,
}

impl BarProfile {
    fn add(&mut self, bucket: Decimal, trade: &Trade) {
        let level = self.levels.entry(bucket).or_default();
        match trade.side {
            Side::BUY => level.buy += trade.quantity,
            Side::SELL => level.sell += trade.quantity,
        }
        self.trades += 1;
    }

    fn volume(&self) -> Decimal {
        self.levels.values().map(LevelVolume::total).sum()
    }
}

#[derive(Debug)]
pub struct VolumeProfileState {
    lookback: usize,
    bucket_size: Decimal,
    current: BarProfile,
    closed: VecDeque<BarProfile>,
}

impl VolumeProfileState {
    fn summarize<'a>(&self, profiles: impl Iterator<Item = &'a BarProfile>, bar_profile: &BarProfile) -> Output {
        let mut merged: BTreeMap<Decimal, LevelVolume> = BTreeMap::new();
        let mut count = 0u64;
        for profile in profiles {
            count += 1;
            for (bucket, level) in &profile.levels {
                let entry = merged.entry(*bucket).or_default();
                entry.buy += level.buy;
                entry.sell += level.sell;
            }
        }

        let buy: Decimal = merged.values().map(|l| l.buy).sum();
        let sell: Decimal = merged.values().map(|l| l.sell).sum();
        let total = buy + sell;
        let buy_ratio = if total.is_zero() { Decimal::ZERO } else { buy / total };

        let mut output = Output::new()
            .value("total_volume", total)
            .value("buy_volume", buy)
            .value("sell_volume", sell)
            .value("delta", buy - sell)
            .value("buy_ratio", buy_ratio)
            .value("levels", Decimal::from(merged.len() as u64))
            .value("profile_bars", Decimal::from(count))
            .value("bar_volume", bar_profile.volume())
            .value("bar_trades", Decimal::from(bar_profile.trades));

        // Highest-volume bucket; ties go to the lower price.
        let poc = merged
            .iter()
            .fold(None::<(Decimal, Decimal)>, |best, (bucket, level)| match best {
                Some((_, vol)) if vol >= level.total() => best,
                _ => Some((*bucket, level.total())),
            });
        if let Some((bucket, _)) = poc {
            output = output.value("poc", bucket * self.bucket_size);
        }
        output
    }
}

impl Computation for VolumeProfile {
    type State = VolumeProfileState;

    fn id(&self) -> &'static str {
        "volume_profile"
    }

    fn required_event_types(&self) -> EventKindSet {
        EventKindSet::of(&[EventKind::Bar, EventKind::Trade])
    }

    fn minimum_history_length(&self, params: &Params) -> usize {
        params.usize_or("lookback", DEFAULT_LOOKBACK).unwrap_or(DEFAULT_LOOKBACK)
    }

    fn validate_params(&self, params: &Params) -> Result<(), ComputationError> {
        positive_usize(params, "lookback", DEFAULT_LOOKBACK)?;
        positive_decimal(params, "bucket_size", Decimal::ONE)?;
        Ok(())
    }

    fn initialize(&self, params: &Params) -> Result<VolumeProfileState, ComputationError> {
        let lookback = positive_usize(params, "lookback", DEFAULT_LOOKBACK)?;
        Ok(VolumeProfileState {
            lookback,
            bucket_size: positive_decimal(params, "bucket_size", Decimal::ONE)?,
            current: BarProfile::default(),
            closed: VecDeque::with_capacity(lookback + 1),
        })
    }

    fn on_trade(&self, trade: &Trade, _params: &Params, state: &mut VolumeProfileState) -> StepResult {
        let bucket = bucket_of(trade.price, state.bucket_size);
        state.current.add(bucket, trade);
        Ok(None)
    }

    fn on_bar(
        &self,
        bar: &Bar,
        _ctx: &BarContext<'_>,
        _params: &Params,
        state: &mut VolumeProfileState,
    ) -> StepResult {
        if !bar.closed {
            // Provisional view: retained profiles plus the forming one.
            let skip = usize::from(state.closed.len() == state.lookback);
            let profiles = state.closed.iter().skip(skip).chain(std::iter::once(&state.current));
            return Ok(Some(state.summarize(profiles, &state.current)));
        }

        state.closed.push_back(state.current.clone());
        while state.closed.len() > state.lookback {
            state.closed.pop_front();
        }
        let last = state.closed.back().cloned().unwrap_or_default();
        Ok(Some(state.summarize(state.closed.iter(), &last)))
    }

    fn boundary_reset(&self, _bar: &Bar, _params: &Params, state: &mut VolumeProfileState) {
        state.current = BarProfile::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::market::{Granularity, MarketContext};

    fn params() -> Params {
        Params::new().with("lookback", 2).with("bucket_size", 10)
    }

    fn trade(price: i64, qty: i64, side: Side) -> Trade {
        Trade::new(Decimal::from(price), Decimal::from(qty), side, 0)
    }

    fn close_bar(state: &mut VolumeProfileState) -> Output {
        let ctx = MarketContext::new("binance", "BTCUSDT", Granularity::M5);
        let bar_ctx = BarContext {
            context: &ctx,
            latest_snapshot: None,
        };
        let bar = Bar::flat(Decimal::from(100), 0, 300_000);
        let output = VolumeProfile.on_bar(&bar, &bar_ctx, &params(), state).unwrap().unwrap();
        VolumeProfile.boundary_reset(&bar, &params(), state);
        output
    }

    #[test]
    fn test_profile_buckets_and_poc() {
        let mut state = VolumeProfile.initialize(&params()).unwrap();
        VolumeProfile.on_trade(&trade(101, 2, Side::BUY), &params(), &mut state).unwrap();
        VolumeProfile.on_trade(&trade(109, 1, Side::SELL), &params(), &mut state).unwrap();
        VolumeProfile.on_trade(&trade(95, 2, Side::SELL), &params(), &mut state).unwrap();

        let out = close_bar(&mut state);
        assert_eq!(out.values["total_volume"], Decimal::from(5));
        assert_eq!(out.values["delta"], Decimal::from(-1));
        assert_eq!(out.values["levels"], Decimal::from(2));
        assert_eq!(out.values["poc"], Decimal::from(100));
        assert_eq!(out.values["bar_trades"], Decimal::from(3));
    }

    #[test]
    fn test_empty_bar_is_valid_and_isolated() {
        let mut state = VolumeProfile.initialize(&params()).unwrap();
        VolumeProfile.on_trade(&trade(101, 4, Side::BUY), &params(), &mut state).unwrap();
        close_bar(&mut state);

        let out = close_bar(&mut state);
        assert_eq!(out.values["bar_volume"], Decimal::ZERO);
        assert_eq!(out.values["profile_bars"], Decimal::from(2));
        assert_eq!(out.values["total_volume"], Decimal::from(4));

        // Lookback of two drops the first bar.
        let out = close_bar(&mut state);
        assert_eq!(out.values["total_volume"], Decimal::ZERO);
        assert_eq!(out.values["buy_ratio"], Decimal::ZERO);
        assert!(!out.values.contains_key("poc"));
    }

    #[test]
    fn test_invalid_bucket_size() {
        let bad = Params::new().with("bucket_size", 0);
        assert!(VolumeProfile.validate_params(&bad).is_err());
        let bad = Params::new().with("lookback", 0);
        assert!(VolumeProfile.validate_params(&bad).is_err());
    }
}
