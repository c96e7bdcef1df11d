//! Engine versions and behaviour routing.
//!
//! A version is an [`Engine`] trait object registered under its id. Engines
//! hold only immutable tuning and build a fresh evaluator per run, so adding
//! or changing one version cannot alter another's output.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::backtest::{RunResult, run_engine};
use super::bar::Bar;
use super::config::EngineConfig;
use super::error::ShadowtraderError;
use super::execution::ProtectionConfig;
use super::instrument::{BehaviorClass, Instrument, TradingStyle, normalize_symbol};
use super::rules::{
    BreakoutEvaluator, NoTradeEvaluator, ReversionEvaluator, RuleEvaluator, RuleParams,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// One evaluator for every instrument.
    Single,
    /// Evaluator chosen per instrument from the behaviour table.
    BehaviorRouted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineDescriptor {
    pub id: String,
    /// `None` accepts every style.
    pub style: Option<TradingStyle>,
    pub routing: RoutingMode,
    pub description: String,
}

pub trait Engine: Send + Sync {
    fn descriptor(&self) -> &EngineDescriptor;

    fn evaluator_for(
        &self,
        instrument: &Instrument,
        config: &EngineConfig,
    ) -> Box<dyn RuleEvaluator>;

    fn protection(&self, config: &EngineConfig) -> ProtectionConfig;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    fn run(
        &self,
        config: &EngineConfig,
        instrument: &Instrument,
        bars: &[Bar],
    ) -> Result<RunResult, ShadowtraderError> {
        run_engine(self, config, instrument, bars)
    }
}

/// Static symbol → behaviour lookup with an explicit fallback bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorTable {
    default: BehaviorClass,
    entries: HashMap<String, BehaviorClass>,
}

impl Default for BehaviorTable {
    fn default() -> Self {
        BehaviorTable::new(BehaviorClass::Trending)
    }
}

impl BehaviorTable {
    pub fn new(default: BehaviorClass) -> Self {
        BehaviorTable {
            default,
            entries: HashMap::new(),
        }
    }

    /// Returns the previous class if the symbol was already present.
    pub fn insert(&mut self, symbol: &str, class: BehaviorClass) -> Option<BehaviorClass> {
        let key = normalize_symbol(symbol).unwrap_or_else(|_| symbol.to_uppercase());
        self.entries.insert(key, class)
    }

    pub fn default_class(&self) -> BehaviorClass {
        self.default
    }

    pub fn classify(&self, symbol: &str) -> BehaviorClass {
        let key = symbol.trim().to_uppercase();
        self.entries.get(&key).copied().unwrap_or(self.default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Breakout entries with either fixed exits or full profit protection.
pub struct BreakoutEngine {
    descriptor: EngineDescriptor,
    params: RuleParams,
    protected: bool,
}

impl Engine for BreakoutEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn evaluator_for(&self, instrument: &Instrument, config: &EngineConfig) -> Box<dyn RuleEvaluator> {
        if config.behavior.classify(&instrument.symbol) == BehaviorClass::Excluded {
            return Box::new(NoTradeEvaluator);
        }
        Box::new(BreakoutEvaluator::new(
            format!("{}_breakout", self.descriptor.id),
            self.params.clone().with_overrides(&config.rules),
        ))
    }

    fn protection(&self, config: &EngineConfig) -> ProtectionConfig {
        if self.protected {
            config.protection.clone()
        } else {
            ProtectionConfig::fixed(config.protection.max_hold_bars)
        }
    }
}

/// Routes each instrument to the evaluator tuned for its behaviour class.
pub struct BehaviorRoutedEngine {
    descriptor: EngineDescriptor,
    trending: RuleParams,
    range_bound: RuleParams,
    volatile: RuleParams,
}

impl Engine for BehaviorRoutedEngine {
    fn descriptor(&self) -> &EngineDescriptor {
        &self.descriptor
    }

    fn evaluator_for(&self, instrument: &Instrument, config: &EngineConfig) -> Box<dyn RuleEvaluator> {
        let id = &self.descriptor.id;
        match config.behavior.classify(&instrument.symbol) {
            BehaviorClass::Trending => Box::new(BreakoutEvaluator::new(
                format!("{id}_trending"),
                self.trending.clone().with_overrides(&config.rules),
            )),
            BehaviorClass::Volatile => Box::new(BreakoutEvaluator::new(
                format!("{id}_volatile"),
                self.volatile.clone().with_overrides(&config.rules),
            )),
            BehaviorClass::RangeBound => Box::new(ReversionEvaluator::new(
                format!("{id}_range_bound"),
                self.range_bound.clone().with_overrides(&config.rules),
            )),
            BehaviorClass::Excluded => Box::new(NoTradeEvaluator),
        }
    }

    fn protection(&self, config: &EngineConfig) -> ProtectionConfig {
        config.protection.clone()
    }
}

pub fn v1() -> BreakoutEngine {
    BreakoutEngine {
        descriptor: EngineDescriptor {
            id: "v1".to_string(),
            style: None,
            routing: RoutingMode::Single,
            description: "breakout entries, fixed stop and target".to_string(),
        },
        params: RuleParams::trending(),
        protected: false,
    }
}

pub fn v2() -> BreakoutEngine {
    BreakoutEngine {
        descriptor: EngineDescriptor {
            id: "v2".to_string(),
            style: None,
            routing: RoutingMode::Single,
            description: "breakout entries, breakeven/partial/trailing protection".to_string(),
        },
        params: RuleParams::trending(),
        protected: true,
    }
}

pub fn v3() -> BehaviorRoutedEngine {
    BehaviorRoutedEngine {
        descriptor: EngineDescriptor {
            id: "v3".to_string(),
            style: None,
            routing: RoutingMode::BehaviorRouted,
            description: "behaviour-routed evaluators with v2 protection".to_string(),
        },
        trending: RuleParams::trending(),
        range_bound: RuleParams::range_bound(),
        volatile: RuleParams::volatile(),
    }
}

#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn Engine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(v1()));
        registry.register(Arc::new(v2()));
        registry.register(Arc::new(v3()));
        registry
    }

    /// Adds an engine, replacing any previous one with the same id.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.id().to_string(), engine);
    }

    pub fn get(&self, version: &str) -> Result<Arc<dyn Engine>, ShadowtraderError> {
        self.engines
            .get(version)
            .cloned()
            .ok_or_else(|| ShadowtraderError::UnknownVersion(version.to_string()))
    }

    pub fn descriptors(&self) -> Vec<&EngineDescriptor> {
        self.engines.values().map(|e| e.descriptor()).collect()
    }

    pub fn versions(&self) -> Vec<&str> {
        self.engines.keys().map(String::as_str).collect()
    }

    pub fn run(
        &self,
        version: &str,
        config: &EngineConfig,
        instrument: &Instrument,
        bars: &[Bar],
    ) -> Result<RunResult, ShadowtraderError> {
        self.get(version)?.run(config, instrument, bars)
    }
}
