//! Subscription configuration.

use crate::error::{AggregateError, Result};
use crate::source::Watchable;
use crate::types::Document;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default target collection for the extras singleton.
pub const DEFAULT_EXTRAS_COLLECTION: &str = "ReactiveAggregate";

/// Default identity field of result records.
pub const DEFAULT_ID_FIELD: &str = "_id";

/// Configuration for one reactive aggregation.
#[derive(Clone)]
pub struct ReactiveAggregateConfig {
    /// Pipeline forwarded to the aggregator.
    pub pipeline: Vec<Value>,

    /// Options forwarded to the aggregator.
    pub aggregation_options: Document,

    /// Additional change sources to watch.
    pub observers: Vec<Arc<dyn Watchable>>,

    /// Skip the automatic observer over the primary source.
    pub no_automatic_observer: bool,

    /// Selector for the automatic observer (deprecated).
    pub observe_selector: Document,

    /// Options for the automatic observer (deprecated).
    pub observe_options: Document,

    /// Signals tolerated before a recompute is forced.
    /// Default: 0 (every signal recomputes).
    pub debounce_count: u64,

    /// Window after the first signal before a recompute runs.
    /// Only armed when `debounce_count > 0`.
    pub debounce_delay: Duration,

    /// Target for document events (None = primary source name).
    pub client_collection: Option<String>,

    /// Field holding the document array of a single-record result.
    pub docs_prop_name: Option<String>,

    /// Target for the extras singleton.
    pub client_extras_collection: String,

    /// Identity field of result documents.
    pub id_field: String,
}

impl Default for ReactiveAggregateConfig {
    fn default() -> Self {
        Self {
            pipeline: Vec::new(),
            aggregation_options: Document::new(),
            observers: Vec::new(),
            no_automatic_observer: false,
            observe_selector: Document::new(),
            observe_options: Document::new(),
            debounce_count: 0,
            debounce_delay: Duration::ZERO,
            client_collection: None,
            docs_prop_name: None,
            client_extras_collection: DEFAULT_EXTRAS_COLLECTION.to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
        }
    }
}

impl fmt::Debug for ReactiveAggregateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveAggregateConfig")
            .field("pipeline", &self.pipeline)
            .field("aggregation_options", &self.aggregation_options)
            .field("observers", &self.observers.len())
            .field("no_automatic_observer", &self.no_automatic_observer)
            .field("observe_selector", &self.observe_selector)
            .field("observe_options", &self.observe_options)
            .field("debounce_count", &self.debounce_count)
            .field("debounce_delay", &self.debounce_delay)
            .field("client_collection", &self.client_collection)
            .field("docs_prop_name", &self.docs_prop_name)
            .field("client_extras_collection", &self.client_extras_collection)
            .field("id_field", &self.id_field)
            .finish()
    }
}

/// Debounce settings, as seen by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DebounceConfig {
    pub count: u64,
    pub delay: Duration,
}

/// Wire form of the options accepted by [`ReactiveAggregateConfig::from_json`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawOptions {
    pipeline: Vec<Value>,
    #[serde(default)]
    aggregation_options: Option<Document>,
    #[serde(default)]
    no_automatic_observer: Option<bool>,
    #[serde(default)]
    observe_selector: Option<Document>,
    #[serde(default)]
    observe_options: Option<Document>,
    #[serde(default)]
    debounce_count: Option<serde_json::Number>,
    #[serde(default)]
    debounce_delay: Option<serde_json::Number>,
    #[serde(default)]
    client_collection: Option<String>,
    #[serde(default)]
    docs_prop_name: Option<String>,
    #[serde(default)]
    client_extras_collection: Option<String>,
    #[serde(default)]
    id_field: Option<String>,
}

impl ReactiveAggregateConfig {
    /// Configuration with the given pipeline and defaults elsewhere.
    pub fn new(pipeline: Vec<Value>) -> Self {
        Self {
            pipeline,
            ..Default::default()
        }
    }

    /// Parse options from a camelCase JSON object. `debounceDelay` is in
    /// milliseconds. The result is validated.
    pub fn from_json(options: &Value) -> Result<Self> {
        if !options.is_object() {
            return Err(AggregateError::Configuration(
                "options must be an object".to_string(),
            ));
        }
        let raw: RawOptions = serde_json::from_value(options.clone())?;

        let debounce_count = match raw.debounce_count {
            None => 0,
            Some(n) => n.as_u64().ok_or_else(|| {
                AggregateError::Configuration(format!(
                    "debounceCount must be a non-negative integer, got {}",
                    n
                ))
            })?,
        };
        let debounce_delay = match raw.debounce_delay {
            None => Duration::ZERO,
            Some(n) => parse_delay_ms(&n)?,
        };

        let defaults = Self::default();
        let config = Self {
            pipeline: raw.pipeline,
            aggregation_options: raw.aggregation_options.unwrap_or_default(),
            observers: Vec::new(),
            no_automatic_observer: raw.no_automatic_observer.unwrap_or(false),
            observe_selector: raw.observe_selector.unwrap_or_default(),
            observe_options: raw.observe_options.unwrap_or_default(),
            debounce_count,
            debounce_delay,
            client_collection: raw.client_collection,
            docs_prop_name: raw.docs_prop_name,
            client_extras_collection: raw
                .client_extras_collection
                .unwrap_or(defaults.client_extras_collection),
            id_field: raw.id_field.unwrap_or(defaults.id_field),
        };
        config.validate()?;
        Ok(config)
    }

    /// Add a change source to watch.
    pub fn with_observer(mut self, observer: Arc<dyn Watchable>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Check every setting. Called by the subscription before any wiring.
    pub fn validate(&self) -> Result<()> {
        for (position, stage) in self.pipeline.iter().enumerate() {
            match stage.as_object() {
                Some(object) if !object.is_empty() => {}
                _ => {
                    return Err(AggregateError::Configuration(format!(
                        "pipeline stage {} must be a non-empty object",
                        position
                    )))
                }
            }
        }

        require_name("clientCollection", self.client_collection.as_deref())?;
        require_name("docsPropName", self.docs_prop_name.as_deref())?;
        require_name(
            "clientExtrasCollection",
            Some(self.client_extras_collection.as_str()),
        )?;
        require_name("idField", Some(self.id_field.as_str()))?;
        Ok(())
    }

    pub fn debounce(&self) -> DebounceConfig {
        DebounceConfig {
            count: self.debounce_count,
            delay: self.debounce_delay,
        }
    }
}

fn require_name(option: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(name) if name.trim().is_empty() => Err(AggregateError::Configuration(format!(
            "{} must not be empty",
            option
        ))),
        _ => Ok(()),
    }
}

fn parse_delay_ms(n: &serde_json::Number) -> Result<Duration> {
    let invalid = || {
        AggregateError::Configuration(format!(
            "debounceDelay must be a non-negative number of milliseconds, got {}",
            n
        ))
    };
    if let Some(ms) = n.as_u64() {
        return Ok(Duration::from_millis(ms));
    }
    match n.as_f64() {
        Some(ms) if ms.is_finite() && ms >= 0.0 => Ok(Duration::from_secs_f64(ms / 1000.0)),
        _ => Err(invalid()),
    }
}
