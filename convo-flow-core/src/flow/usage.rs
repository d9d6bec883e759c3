use serde_json::{Map, Number, Value};

use crate::model::MessageMetadata;
use crate::node::UsageSummary;

pub const USAGE_FIELDS: &[&str] = &[
    "acceptedPredictionTokens",
    "cost",
    "inputAudioTokens",
    "inputCacheMissTokens",
    "inputCachedTokens",
    "inputCitationTokens",
    "inputImageTokens",
    "inputTextTokens",
    "inputWriteCacheTokens",
    "outputAudioTokens",
    "outputImageTokens",
    "outputReasoningTokens",
    "outputTextTokens",
    "rejectedPredictionTokens",
    "totalInputTokens",
    "totalOutputTokens",
    "totalTokens",
];
pub const PERFORMANCE_FIELDS: &[&str] = &["duration", "latency", "tps", "ttft"];

const USAGE_SECTION: &str = "usage";
const PERFORMANCE_SECTION: &str = "performance";

#[derive(Debug, Clone, Copy)]
enum Tally {
    Int(i64),
    Float(f64),
}

impl Tally {
    fn from_value(value: &Value) -> Option<Self> {
        if let Some(int) = value.as_i64() {
            return Some(Self::Int(int));
        }
        value.as_f64().map(Self::Float)
    }

    #[allow(clippy::cast_precision_loss)]
    fn as_f64(self) -> f64 {
        match self {
            Self::Int(int) => int as f64,
            Self::Float(float) => float,
        }
    }

    fn add(self, other: Self) -> Self {
        match (self, other) {
            (Self::Int(left), Self::Int(right)) => left
                .checked_add(right)
                .map_or_else(|| Self::Float(self.as_f64() + other.as_f64()), Self::Int),
            _ => Self::Float(self.as_f64() + other.as_f64()),
        }
    }

    fn into_value(self) -> Value {
        match self {
            Self::Int(int) => Value::from(int),
            Self::Float(float) => Number::from_f64(float).map_or(Value::Null, Value::Number),
        }
    }
}

/// Sums usage counters and folds performance counters across a chain.
#[derive(Debug, Default)]
pub struct UsageAccumulator {
    usage: Vec<(&'static str, Tally)>,
    duration: Option<Tally>,
    latency: Option<Tally>,
    ttft: Option<Tally>,
    tps_sum: f64,
    tps_count: u32,
}

impl UsageAccumulator {
    pub fn add(&mut self, metadata: Option<&MessageMetadata>) {
        let Some(metadata) = metadata else {
            return;
        };

        for &field in USAGE_FIELDS {
            let Some(value) = lookup(metadata, USAGE_SECTION, field).and_then(Tally::from_value)
            else {
                continue;
            };
            match self.usage.iter_mut().find(|(name, _)| *name == field) {
                Some((_, total)) => *total = total.add(value),
                None => self.usage.push((field, value)),
            }
        }

        let read = |field| lookup(metadata, PERFORMANCE_SECTION, field).and_then(Tally::from_value);
        if let Some(duration) = read("duration") {
            self.duration = Some(self.duration.map_or(duration, |total| total.add(duration)));
        }
        if let Some(latency) = read("latency") {
            self.latency = Some(self.latency.map_or(latency, |total| total.add(latency)));
        }
        if self.ttft.is_none() {
            self.ttft = read("ttft");
        }
        if let Some(tps) = read("tps") {
            self.tps_sum += tps.as_f64();
            self.tps_count += 1;
        }
    }

    pub fn finish(self) -> Option<UsageSummary> {
        let mut summary = UsageSummary::default();
        for (field, total) in self.usage {
            summary.usage.insert(field.to_string(), total.into_value());
        }

        let performance = [
            ("duration", self.duration),
            ("latency", self.latency),
            ("ttft", self.ttft),
            (
                "tps",
                (self.tps_count > 0).then(|| Tally::Float(self.tps_sum / f64::from(self.tps_count))),
            ),
        ];
        for (field, value) in performance {
            if let Some(value) = value {
                summary.performance.insert(field.to_string(), value.into_value());
            }
        }

        (!summary.is_empty()).then_some(summary)
    }
}

pub fn aggregate_usage<'a>(
    metadata: impl IntoIterator<Item = Option<&'a MessageMetadata>>,
) -> Option<UsageSummary> {
    let mut accumulator = UsageAccumulator::default();
    for item in metadata {
        accumulator.add(item);
    }
    accumulator.finish()
}

/// Metadata reduced to the usage and performance allow-lists. Everything
/// else, typed keys included, is dropped.
pub fn strip_to_usage(metadata: &MessageMetadata) -> MessageMetadata {
    let mut extra = Map::new();
    for (key, value) in &metadata.extra {
        match key.as_str() {
            USAGE_SECTION => {
                if let Some(section) = filter_section(value, USAGE_FIELDS) {
                    extra.insert(key.clone(), section);
                }
            }
            PERFORMANCE_SECTION => {
                if let Some(section) = filter_section(value, PERFORMANCE_FIELDS) {
                    extra.insert(key.clone(), section);
                }
            }
            field if USAGE_FIELDS.contains(&field) || PERFORMANCE_FIELDS.contains(&field) => {
                extra.insert(key.clone(), value.clone());
            }
            _ => {}
        }
    }

    MessageMetadata {
        extra,
        ..MessageMetadata::default()
    }
}

fn filter_section(value: &Value, fields: &[&str]) -> Option<Value> {
    let object = value.as_object()?;
    let filtered = object
        .iter()
        .filter(|(key, _)| fields.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<Map<_, _>>();
    (!filtered.is_empty()).then_some(Value::Object(filtered))
}

fn lookup<'a>(metadata: &'a MessageMetadata, section: &str, field: &str) -> Option<&'a Value> {
    metadata
        .extra
        .get(section)
        .and_then(|section| section.get(field))
        .or_else(|| metadata.extra.get(field))
}
