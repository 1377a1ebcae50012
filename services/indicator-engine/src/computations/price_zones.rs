//! Support and resistance zones
//!
//! A bar is a swing high (low) when its high (low) is the extreme of the
//! `2 * swing_window + 1` closed bars centred on it. Swing prices are
//! bucketed into zones `zone_width` wide; each zone spans from its first to
//! its last touch. Zones are re-emitted as box annotations every
//! `redetect_every` closed bars under a stable id, so an unchanged zone is
//! recognised as the same artifact on every emission.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;

use rust_decimal::Decimal;
use types::errors::ComputationError;
use types::events::Bar;
use types::params::Params;
use types::result::{Annotation, ArtifactId, Geometry, Output};

use super::{bucket_of, positive_decimal, positive_usize};
use crate::computation::{BarContext, Computation, StepResult};

const DEFAULT_SWING_WINDOW: usize = 3;
const DEFAULT_REDETECT_EVERY: usize = 1;

#[derive(Debug, Default, Clone, Copy)]
pub struct PriceZones;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ZoneKind {
    Support,
    Resistance,
}

impl fmt::Display for ZoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ZoneKind::Support => f.write_str("support"),
            ZoneKind::Resistance => f.write_str("resistance"),
        }
    }
}

#[derive(Debug, Clone)]
struct Zone {
    first_touch: i64,
    last_touch: i64,
    touches: u64,
}

#[derive(Debug)]
pub struct PriceZonesState {
    swing_window: usize,
    zone_width: Decimal,
    redetect_every: usize,
    window: VecDeque<Bar>,
    zones: BTreeMap<(ZoneKind, Decimal), Zone>,
    closed_bars: usize,
}

impl PriceZonesState {
    fn span(&self) -> usize {
        2 * self.swing_window + 1
    }

    /// Check the centre of a full window for swing points.
    fn detect(&mut self) {
        if self.window.len() < self.span() {
            return;
        }
        let centre = &self.window[self.swing_window];
        let is_high = self.window.iter().all(|b| b.high <= centre.high);
        let is_low = self.window.iter().all(|b| b.low >= centre.low);
        let (high, low, touched) = (centre.high, centre.low, centre.open_time);

        if is_high {
            self.touch(ZoneKind::Resistance, high, touched);
        }
        if is_low {
            self.touch(ZoneKind::Support, low, touched);
        }
    }

    fn touch(&mut self, kind: ZoneKind, price: Decimal, at: i64) {
        let bucket = bucket_of(price, self.zone_width);
        let zone = self.zones.entry((kind, bucket)).or_insert(Zone {
            first_touch: at,
            last_touch: at,
            touches: 0,
        });
        zone.first_touch = zone.first_touch.min(at);
        zone.last_touch = zone.last_touch.max(at);
        zone.touches += 1;
    }

    fn emit(&self) -> Output {
        let mut support = 0u64;
        let mut resistance = 0u64;
        let mut output = Output::new();
        for ((kind, bucket), zone) in &self.zones {
            match kind {
                ZoneKind::Support => support += 1,
                ZoneKind::Resistance => resistance += 1,
            }
            let bottom = *bucket * self.zone_width;
            let id = ArtifactId::new(format!("zone:{}:{}", kind, bucket));
            output = output.annotate(Annotation::new(
                id,
                format!("{} x{}", kind, zone.touches),
                Geometry::Box {
                    start_time: zone.first_touch,
                    end_time: zone.last_touch,
                    top: bottom + self.zone_width,
                    bottom,
                },
            ));
        }
        output
            .value("support_zones", Decimal::from(support))
            .value("resistance_zones", Decimal::from(resistance))
    }
}

impl Computation for PriceZones {
    type State = PriceZonesState;

    fn id(&self) -> &'static str {
        "price_zones"
    }

    fn minimum_history_length(&self, params: &Params) -> usize {
        let window = params
            .usize_or("swing_window", DEFAULT_SWING_WINDOW)
            .unwrap_or(DEFAULT_SWING_WINDOW);
        2 * window + 1
    }

    fn validate_params(&self, params: &Params) -> Result<(), ComputationError> {
        positive_usize(params, "swing_window", DEFAULT_SWING_WINDOW)?;
        positive_decimal(params, "zone_width", Decimal::ONE)?;
        positive_usize(params, "redetect_every", DEFAULT_REDETECT_EVERY)?;
        Ok(())
    }

    fn initialize(&self, params: &Params) -> Result<PriceZonesState, ComputationError> {
        let swing_window = positive_usize(params, "swing_window", DEFAULT_SWING_WINDOW)?;
        Ok(PriceZonesState {
            swing_window,
            zone_width: positive_decimal(params, "zone_width", Decimal::ONE)?,
            redetect_every: positive_usize(params, "redetect_every", DEFAULT_REDETECT_EVERY)?,
            window: VecDeque::with_capacity(2 * swing_window + 2),
            zones: BTreeMap::new(),
            closed_bars: 0,
        })
    }

    fn on_bar(
        &self,
        bar: &Bar,
        _ctx: &BarContext<'_>,
        _params: &Params,
        state: &mut PriceZonesState,
    ) -> StepResult {
        if !bar.closed {
            return Ok(None);
        }
        state.window.push_back(bar.clone());
        while state.window.len() > state.span() {
            state.window.pop_front();
        }
        state.detect();
        state.closed_bars += 1;

        if state.closed_bars % state.redetect_every != 0 {
            return Ok(None);
        }
        Ok(Some(state.emit()))
    }
}
