//! Simple moving average

use std::collections::VecDeque;

use rust_decimal::Decimal;
use types::errors::ComputationError;
use types::events::Bar;
use types::params::Params;
use types::result::Output;

use super::positive_usize;
use crate::computation::{BarContext, Computation, StepResult};

const DEFAULT_PERIOD: usize = 20;

/// Arithmetic mean of the last `period` closes.
///
/// Closed bars enter the window. A forming bar yields a provisional value
/// over the window with its close substituted for the oldest entry, without
/// changing state.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sma;

#[derive(Debug, Default)]
pub struct SmaState {
    period: usize,
    window: VecDeque<Decimal>,
    sum: Decimal,
}

impl Computation for Sma {
    type State = SmaState;

    fn id(&self) -> &'static str {
        "sma"
    }

    fn minimum_history_length(&self, params: &Params) -> usize {
        params.usize_or("period", DEFAULT_PERIOD).unwrap_or(DEFAULT_PERIOD)
    }

    fn validate_params(&self, params: &Params) -> Result<(), ComputationError> {
        positive_usize(params, "period", DEFAULT_PERIOD).map(|_| ())
    }

    fn initialize(&self, params: &Params) -> Result<SmaState, ComputationError> {
        let period = positive_usize(params, "period", DEFAULT_PERIOD)?;
        Ok(SmaState {
            period,
            window: VecDeque::with_capacity(period),
            sum: Decimal::ZERO,
        })
    }

    fn on_bar(&self, bar: &Bar, _ctx: &BarContext<'_>, _params: &Params, state: &mut SmaState) -> StepResult {
        let period = Decimal::from(state.period as u64);

        if !bar.closed {
            if state.window.len() + 1 < state.period {
                return Ok(None);
            }
            let dropped = if state.window.len() == state.period {
                state.window.front().copied().unwrap_or_default()
            } else {
                Decimal::ZERO
            };
            let provisional = (state.sum - dropped + bar.close) / period;
            return Ok(Some(Output::new().value("sma", provisional)));
        }

        state.window.push_back(bar.close);
        state.sum += bar.close;
        if state.window.len() > state.period {
            if let Some(oldest) = state.window.pop_front() {
                state.sum -= oldest;
            }
        }

        if state.window.len() < state.period {
            return Ok(None);
        }
        Ok(Some(Output::new().value("sma", state.sum / period)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::market::{Granularity, MarketContext};

    fn run(state: &mut SmaState, close: i64, closed: bool) -> Option<Decimal> {
        let ctx = MarketContext::new("binance", "BTCUSDT", Granularity::M1);
        let bar_ctx = BarContext {
            context: &ctx,
            latest_snapshot: None,
        };
        let mut bar = Bar::flat(Decimal::from(close), 0, 60_000);
        bar.closed = closed;
        Sma.on_bar(&bar, &bar_ctx, &Params::new(), state)
            .unwrap()
            .map(|o| o.values["sma"])
    }

    #[test]
    fn test_sma_warms_up_then_slides() {
        let mut state = Sma.initialize(&Params::new().with("period", 3)).unwrap();
        assert_eq!(run(&mut state, 1, true), None);
        assert_eq!(run(&mut state, 2, true), None);
        assert_eq!(run(&mut state, 3, true), Some(Decimal::from(2)));
        assert_eq!(run(&mut state, 6, true), Some(Decimal::from(11) / Decimal::from(3)));
    }

    #[test]
    fn test_forming_bar_does_not_mutate() {
        let mut state = Sma.initialize(&Params::new().with("period", 2)).unwrap();
        run(&mut state, 10, true);
        run(&mut state, 20, true);
        assert_eq!(run(&mut state, 40, false), Some(Decimal::from(30)));
        assert_eq!(state.window.len(), 2);
        assert_eq!(run(&mut state, 30, true), Some(Decimal::from(25)));
    }

    #[test]
    fn test_zero_period_rejected() {
        assert!(Sma.validate_params(&Params::new().with("period", 0)).is_err());
        assert!(Sma.validate_params(&Params::new().with("period", "x")).is_err());
        assert!(Sma.validate_params(&Params::new()).is_ok());
        assert_eq!(Sma.minimum_history_length(&Params::new().with("period", 7)), 7);
    }
}
