//! Computation contract
//!
//! A `Computation` is a stateless definition: it validates parameters,
//! builds an initial state and folds events into that state one at a time.
//! All mutable data lives in `State`, owned by the instance that wraps the
//! computation, so the same definition can back any number of instances.
//!
//! The registry stores computations of different concrete types together
//! through the object-safe [`DynComputation`], which erases `State` behind
//! `Box<dyn Any + Send>`.

use std::any::Any;

use types::errors::ComputationError;
use types::events::{Bar, BookSnapshot, EventKindSet, MarketEvent, MarketEventPayload, PriceTick, Trade};
use types::market::MarketContext;
use types::params::Params;
use types::result::Output;

/// Outcome of one step: `Ok(None)` when the step produced no result.
pub type StepResult = Result<Option<Output>, ComputationError>;

/// Auxiliary inputs available while a bar is applied.
#[derive(Debug, Clone, Copy)]
pub struct BarContext<'a> {
    pub context: &'a MarketContext,
    /// Nearest book snapshot at or before the bar's close, if any.
    pub latest_snapshot: Option<&'a BookSnapshot>,
}

pub trait Computation: Send + Sync + 'static {
    type State: Send + 'static;

    /// Registry identifier (e.g. `"sma"`).
    fn id(&self) -> &'static str;

    /// Event kinds this computation consumes. Others are never delivered.
    fn required_event_types(&self) -> EventKindSet {
        EventKindSet::BARS
    }

    /// Bars of history needed before results are meaningful.
    fn minimum_history_length(&self, params: &Params) -> usize;

    fn validate_params(&self, params: &Params) -> Result<(), ComputationError>;

    /// Fresh state, before any history has been applied.
    fn initialize(&self, params: &Params) -> Result<Self::State, ComputationError>;

    fn on_bar(
        &self,
        bar: &Bar,
        ctx: &BarContext<'_>,
        params: &Params,
        state: &mut Self::State,
    ) -> StepResult;

    fn on_trade(&self, _trade: &Trade, _params: &Params, _state: &mut Self::State) -> StepResult {
        Ok(None)
    }

    fn on_book_snapshot(
        &self,
        _snapshot: &BookSnapshot,
        _params: &Params,
        _state: &mut Self::State,
    ) -> StepResult {
        Ok(None)
    }

    fn on_tick(&self, _tick: &PriceTick, _params: &Params, _state: &mut Self::State) -> StepResult {
        Ok(None)
    }

    /// Called after every closed bar, once `on_bar` has run.
    fn boundary_reset(&self, _bar: &Bar, _params: &Params, _state: &mut Self::State) {}
}

/// Type-erased state held by an instance.
pub type ErasedState = Box<dyn Any + Send>;

/// Object-safe view of a [`Computation`].
pub trait DynComputation: Send + Sync {
    fn id(&self) -> &'static str;
    fn required_event_types(&self) -> EventKindSet;
    fn minimum_history_length(&self, params: &Params) -> usize;
    fn validate_params(&self, params: &Params) -> Result<(), ComputationError>;
    fn initialize(&self, params: &Params) -> Result<ErasedState, ComputationError>;

    /// Dispatch one event to the matching handler.
    fn consume(
        &self,
        event: &MarketEvent,
        snapshot: Option<&BookSnapshot>,
        params: &Params,
        state: &mut ErasedState,
    ) -> StepResult;

    fn boundary_reset(
        &self,
        bar: &Bar,
        params: &Params,
        state: &mut ErasedState,
    ) -> Result<(), ComputationError>;
}

fn downcast<'s, C: Computation>(
    computation: &C,
    state: &'s mut ErasedState,
) -> Result<&'s mut C::State, ComputationError> {
    state
        .downcast_mut::<C::State>()
        .ok_or_else(|| ComputationError::StateMismatch {
            computation: Computation::id(computation).to_string(),
        })
}

impl<C: Computation> DynComputation for C {
    fn id(&self) -> &'static str {
        Computation::id(self)
    }

    fn required_event_types(&self) -> EventKindSet {
        Computation::required_event_types(self)
    }

    fn minimum_history_length(&self, params: &Params) -> usize {
        Computation::minimum_history_length(self, params)
    }

    fn validate_params(&self, params: &Params) -> Result<(), ComputationError> {
        Computation::validate_params(self, params)
    }

    fn initialize(&self, params: &Params) -> Result<ErasedState, ComputationError> {
        let state = Computation::initialize(self, params)?;
        Ok(Box::new(state))
    }

    fn consume(
        &self,
        event: &MarketEvent,
        snapshot: Option<&BookSnapshot>,
        params: &Params,
        state: &mut ErasedState,
    ) -> StepResult {
        let state = downcast(self, state)?;
        match &event.payload {
            MarketEventPayload::Bar(bar) => {
                let ctx = BarContext {
                    context: &event.context,
                    latest_snapshot: snapshot,
                };
                self.on_bar(bar, &ctx, params, state)
            }
            MarketEventPayload::Trade(trade) => self.on_trade(trade, params, state),
            MarketEventPayload::BookSnapshot(book) => self.on_book_snapshot(book, params, state),
            MarketEventPayload::PriceTick(tick) => self.on_tick(tick, params, state),
        }
    }

    fn boundary_reset(
        &self,
        bar: &Bar,
        params: &Params,
        state: &mut ErasedState,
    ) -> Result<(), ComputationError> {
        let state = downcast(self, state)?;
        Computation::boundary_reset(self, bar, params, state);
        Ok(())
    }
}
