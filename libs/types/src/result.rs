//! Computation results and chart annotations
//!
//! Annotations are a closed set of geometries with a stable `ArtifactId`.
//! A computation that re-detects the same artifact on a later step emits the
//! same id, which lets result history keep one copy instead of many.

use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::events::EventKind;

/// Stable identity of a persistent chart artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerShape {
    ArrowUp,
    ArrowDown,
    Circle,
}

/// Chart geometry of an annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Geometry {
    /// Price zone between two times.
    Box {
        start_time: i64,
        end_time: i64,
        top: Decimal,
        bottom: Decimal,
    },
    /// Trend line or level.
    Line {
        start_time: i64,
        start_price: Decimal,
        end_time: i64,
        end_price: Decimal,
    },
    /// Point marker.
    Marker {
        time: i64,
        price: Decimal,
        marker: MarkerShape,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: ArtifactId,
    pub label: String,
    pub geometry: Geometry,
}

impl Annotation {
    pub fn new(id: ArtifactId, label: impl Into<String>, geometry: Geometry) -> Self {
        Self {
            id,
            label: label.into(),
            geometry,
        }
    }
}

/// Values and annotations produced by one computation step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub values: BTreeMap<String, Decimal>,
    pub annotations: Vec<Annotation>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, name: impl Into<String>, value: Decimal) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn annotate(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }
}

/// Reference to the event that produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRef {
    pub kind: EventKind,
    pub timestamp: i64,
}

/// A result emitted by an instance for one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationResult {
    /// Timestamp of the source event (never wall clock).
    pub timestamp: i64,
    pub values: BTreeMap<String, Decimal>,
    pub annotations: Vec<Annotation>,
    pub source: EventRef,
}

impl ComputationResult {
    pub fn from_output(output: Output, source: EventRef) -> Self {
        Self {
            timestamp: source.timestamp,
            values: output.values,
            annotations: output.annotations,
            source,
        }
    }

    pub fn value(&self, name: &str) -> Option<Decimal> {
        self.values.get(name).copied()
    }
}
