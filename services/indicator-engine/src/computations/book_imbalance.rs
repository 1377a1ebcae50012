//! Order book depth imbalance at bar close

use rust_decimal::Decimal;
use types::errors::ComputationError;
use types::events::{Bar, BookSnapshot, EventKind, EventKindSet};
use types::params::Params;
use types::result::Output;

use super::positive_usize;
use crate::computation::{BarContext, Computation, StepResult};

const DEFAULT_DEPTH: usize = 5;

/// `(bid - ask) / (bid + ask)` over the top `depth` levels of the snapshot
/// nearest the bar close. Bars without any preceding snapshot emit nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct BookImbalance;

#[derive(Debug, Default)]
pub struct BookImbalanceState {
    depth: usize,
    snapshots_seen: u64,
}

impl Computation for BookImbalance {
    type State = BookImbalanceState;

    fn id(&self) -> &'static str {
        "book_imbalance"
    }

    fn required_event_types(&self) -> EventKindSet {
        EventKindSet::of(&[EventKind::Bar, EventKind::BookSnapshot])
    }

    fn minimum_history_length(&self, _params: &Params) -> usize {
        1
    }

    fn validate_params(&self, params: &Params) -> Result<(), ComputationError> {
        positive_usize(params, "depth", DEFAULT_DEPTH).map(|_| ())
    }

    fn initialize(&self, params: &Params) -> Result<BookImbalanceState, ComputationError> {
        Ok(BookImbalanceState {
            depth: positive_usize(params, "depth", DEFAULT_DEPTH)?,
            snapshots_seen: 0,
        })
    }

    fn on_book_snapshot(
        &self,
        _snapshot: &BookSnapshot,
        _params: &Params,
        state: &mut BookImbalanceState,
    ) -> StepResult {
        state.snapshots_seen += 1;
        Ok(None)
    }

    fn on_bar(
        &self,
        bar: &Bar,
        ctx: &BarContext<'_>,
        _params: &Params,
        state: &mut BookImbalanceState,
    ) -> StepResult {
        let Some(snapshot) = ctx.latest_snapshot else {
            return Ok(None);
        };
        let bid = snapshot.bid_depth(state.depth);
        let ask = snapshot.ask_depth(state.depth);
        let total = bid + ask;
        let imbalance = if total.is_zero() { Decimal::ZERO } else { (bid - ask) / total };

        let mut output = Output::new()
            .value("bid_depth", bid)
            .value("ask_depth", ask)
            .value("imbalance", imbalance)
            .value("snapshot_age_ms", Decimal::from(bar.close_time - snapshot.timestamp))
            .value("snapshots_seen", Decimal::from(state.snapshots_seen));
        if let (Some(best_bid), Some(best_ask)) = (snapshot.best_bid(), snapshot.best_ask()) {
            output = output.value("spread", best_ask.price - best_bid.price);
        }
        Ok(Some(output))
    }
}
