//! CLI definition and dispatch.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::adapters::csv_adapter::CsvAdapter;
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::batch::{BatchInput, BatchOutcome, pooled_stats, run_batch};
use crate::domain::config::EngineConfig;
use crate::domain::config_validation::{validate_engine_config, validate_shadow_config};
use crate::domain::error::ShadowtraderError;
use crate::domain::instrument::{Instrument, TradingStyle};
use crate::domain::router::{EngineRegistry, RoutingMode};
use crate::domain::universe::parse_universe;
use crate::ports::bar_source::BarSource;
use crate::ports::config_port::ConfigPort;

#[derive(Parser, Debug)]
#[command(
    name = "shadowtrader",
    about = "Versioned trade execution and risk sizing for backtests and shadow trading"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Backtest one engine version over CSV bars
    Backtest {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        data_dir: PathBuf,
        #[arg(short, long)]
        version: String,
        /// Comma-separated symbols; overrides the configured universe
        #[arg(short, long)]
        instrument: Option<String>,
        #[arg(short, long)]
        timeframe: Option<String>,
        /// Write the full run results as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run one shadow-trading tick and print the report as JSON
    Tick {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        version: String,
    },
    /// List registered engine versions
    Versions,
    /// Validate a configuration file
    Validate {
        #[arg(short, long)]
        config: PathBuf,
        /// Validate only this version's overrides
        #[arg(short, long)]
        version: Option<String>,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Command::Backtest {
            config,
            data_dir,
            version,
            instrument,
            timeframe,
            output,
        } => run_backtest(
            &config,
            &data_dir,
            &version,
            instrument.as_deref(),
            timeframe.as_deref(),
            output.as_deref(),
        ),
        Command::Tick { config, version } => run_tick(&config, &version),
        Command::Versions => run_versions(),
        Command::Validate { config, version } => run_validate(&config, version.as_deref()),
    }
}

fn fail(err: &ShadowtraderError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|e| fail(&e))
}

/// Instruments for a backtest: the `--instrument` override, then
/// `[backtest] instruments`, then `[shadow] universe`.
pub fn resolve_instruments(
    instrument_override: Option<&str>,
    config: &dyn ConfigPort,
) -> Result<Vec<Instrument>, ShadowtraderError> {
    let style = match config
        .get_string("backtest", "style")
        .or_else(|| config.get_string("shadow", "style"))
    {
        Some(s) => s
            .parse::<TradingStyle>()
            .map_err(|reason| ShadowtraderError::ConfigInvalid {
                section: "backtest".into(),
                key: "style".into(),
                reason,
            })?,
        None => TradingStyle::Swing,
    };

    let (section, key, list) = match instrument_override {
        Some(list) => ("cli", "instrument", Some(list.to_string())),
        None => match config.get_string("backtest", "instruments") {
            Some(list) => ("backtest", "instruments", Some(list)),
            None => ("shadow", "universe", config.get_string("shadow", "universe")),
        },
    };
    let list = list.ok_or_else(|| ShadowtraderError::ConfigMissing {
        section: "backtest".into(),
        key: "instruments".into(),
    })?;

    parse_universe(&list, style).map_err(|e| ShadowtraderError::ConfigInvalid {
        section: section.into(),
        key: key.into(),
        reason: e.to_string(),
    })
}

/// `[backtest] start_date` / `end_date` (YYYY-MM-DD, both inclusive). A
/// missing bound leaves that side open.
pub fn backtest_window(
    config: &dyn ConfigPort,
) -> Result<(DateTime<Utc>, DateTime<Utc>), ShadowtraderError> {
    let parse = |key: &str| -> Result<Option<NaiveDate>, ShadowtraderError> {
        config
            .get_string("backtest", key)
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|_| {
                    ShadowtraderError::ConfigInvalid {
                        section: "backtest".into(),
                        key: key.into(),
                        reason: "invalid date format (expected YYYY-MM-DD)".into(),
                    }
                })
            })
            .transpose()
    };

    let start = parse("start_date")?
        .map(|d| d.and_time(NaiveTime::MIN).and_utc())
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = parse("end_date")?
        .map(|d| d.and_time(NaiveTime::MIN).and_utc() + Duration::days(1) - Duration::seconds(1))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    if start > end {
        return Err(ShadowtraderError::ConfigInvalid {
            section: "backtest".into(),
            key: "end_date".into(),
            reason: "end_date is before start_date".into(),
        });
    }
    Ok((start, end))
}

/// Loads bars for every instrument and runs `version` over them. A fetch
/// failure becomes that instrument's outcome rather than aborting the batch.
pub fn backtest(
    config: &dyn ConfigPort,
    source: &dyn BarSource,
    version: &str,
    instrument_override: Option<&str>,
    timeframe_override: Option<&str>,
) -> Result<(EngineConfig, Vec<BatchOutcome>), ShadowtraderError> {
    let registry = EngineRegistry::builtin();
    registry.get(version)?;
    let mut engine_config = EngineConfig::resolve(config, version)?;
    if let Some(tf) = timeframe_override {
        engine_config.timeframe = tf.to_string();
    }
    let instruments = resolve_instruments(instrument_override, config)?;
    let (start, end) = backtest_window(config)?;

    let mut inputs = Vec::with_capacity(instruments.len());
    let mut failed = Vec::new();
    for instrument in instruments {
        match source.fetch_bars(&instrument.symbol, &engine_config.timeframe, start, end) {
            Ok(bars) => inputs.push(BatchInput { instrument, bars }),
            Err(e) => {
                eprintln!("warning: skipping {} ({})", instrument.symbol, e);
                failed.push(BatchOutcome {
                    instrument: instrument.symbol,
                    result: Err(e),
                });
            }
        }
    }

    let mut outcomes = run_batch(&registry, version, &engine_config, &inputs)?;
    outcomes.extend(failed);
    Ok((engine_config, outcomes))
}

fn run_backtest(
    config_path: &Path,
    data_dir: &Path,
    version: &str,
    instrument_override: Option<&str>,
    timeframe_override: Option<&str>,
    output_path: Option<&Path>,
) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let source = CsvAdapter::new(data_dir.to_path_buf());
    let (engine_config, outcomes) = match backtest(
        &adapter,
        &source,
        version,
        instrument_override,
        timeframe_override,
    ) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    eprintln!("\n=== Per-Instrument Results ({version}) ===");
    for outcome in &outcomes {
        match &outcome.result {
            Ok(r) => eprintln!(
                "  {}:  {} trades, {:.1}% win rate, avg {:.2}R, net {:+.0}, max dd {:.1}%",
                outcome.instrument,
                r.stats.trade_count,
                r.stats.win_rate * 100.0,
                r.stats.avg_r,
                r.stats.net_pnl,
                r.stats.max_drawdown * 100.0,
            ),
            Err(e) => eprintln!("  {}:  skipped ({})", outcome.instrument, e.reason_code()),
        }
    }

    let pooled = pooled_stats(&outcomes, engine_config.risk_free_rate);
    eprintln!("\n=== Pooled Trades ===");
    eprintln!("Total Trades:     {}", pooled.trade_count);
    eprintln!("Win Rate:         {:.1}%", pooled.win_rate * 100.0);
    eprintln!("Average R:        {:.2}", pooled.avg_r);
    eprintln!("Profit Factor:    {:.2}", pooled.profit_factor);
    eprintln!("Net PnL:          {:.2}", pooled.net_pnl);

    if let Some(path) = output_path {
        let results: Vec<_> = outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .collect();
        let written = serde_json::to_string_pretty(&results)
            .map_err(ShadowtraderError::from)
            .and_then(|json| fs::write(path, json).map_err(ShadowtraderError::from));
        if let Err(e) = written {
            return fail(&e);
        }
        eprintln!("\nResults written to: {}", path.display());
    }

    // every instrument failing is a failed run; report the first cause
    match outcomes.iter().find_map(|o| o.result.as_ref().err()) {
        Some(e) if outcomes.iter().all(|o| o.result.is_err()) => e.into(),
        _ => ExitCode::SUCCESS,
    }
}

#[cfg(feature = "sqlite")]
pub fn tick(
    config: &dyn ConfigPort,
    version: &str,
    now: DateTime<Utc>,
) -> Result<crate::domain::shadow::TickReport, ShadowtraderError> {
    use crate::adapters::cached_bar_source::CachedBarSource;
    use crate::adapters::sqlite_adapter::SqliteAdapter;
    use crate::domain::shadow::{ShadowConfig, ShadowEngine};

    validate_shadow_config(config)?;
    let engine = EngineRegistry::builtin().get(version)?;
    let engine_config = EngineConfig::resolve(config, version)?;
    let shadow = ShadowConfig::resolve(config)?;

    let store = SqliteAdapter::from_config(config)?;
    store.initialize_schema()?;

    #[cfg(feature = "postgres")]
    let postgres = if config.get_string("postgres", "connection_string").is_some() {
        Some(crate::adapters::postgres_adapter::PostgresAdapter::from_config(config)?)
    } else {
        None
    };
    let csv = config
        .get_string("shadow", "data_dir")
        .map(|dir| CsvAdapter::new(PathBuf::from(dir)));

    let mut inner: &dyn BarSource = &store;
    if let Some(csv) = &csv {
        inner = csv;
    }
    #[cfg(feature = "postgres")]
    if csv.is_none()
        && let Some(pg) = &postgres
    {
        inner = pg;
    }
    let bars = CachedBarSource::with_cache(inner, &store)
        .configure(config)
        .with_clock(move || now);

    log::info!(
        "tick {} over {} instruments ({})",
        version,
        shadow.universe.len(),
        shadow.timeframe
    );
    ShadowEngine::new(engine, &engine_config, &shadow, &bars, &store)
        .with_signals(&store)
        .tick_with_lease(now)
}

fn run_tick(config_path: &Path, version: &str) -> ExitCode {
    #[cfg(feature = "sqlite")]
    {
        let adapter = match load_config(config_path) {
            Ok(a) => a,
            Err(code) => return code,
        };
        let report = match tick(&adapter, version, Utc::now()) {
            Ok(r) => r,
            Err(e) => return fail(&e),
        };
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => return fail(&e.into()),
        }
        if report.budget_exhausted {
            eprintln!(
                "warning: tick budget exhausted, {} instruments not processed",
                report.unprocessed.len()
            );
        }
        ExitCode::SUCCESS
    }

    #[cfg(not(feature = "sqlite"))]
    {
        let _ = (config_path, version);
        eprintln!("error: sqlite feature is required for tick");
        ExitCode::from(1)
    }
}

fn run_versions() -> ExitCode {
    for d in EngineRegistry::builtin().descriptors() {
        let routing = match d.routing {
            RoutingMode::Single => "single",
            RoutingMode::BehaviorRouted => "behavior_routed",
        };
        let style = d.style.map(|s| s.as_str()).unwrap_or("any");
        println!("{}\t{}\t{}\t{}", d.id, routing, style, d.description);
    }
    ExitCode::SUCCESS
}

/// Validates engine settings for `version` (or every registered version)
/// and the `[shadow]` section when one is configured.
pub fn validate(config: &dyn ConfigPort, version: Option<&str>) -> Result<(), ShadowtraderError> {
    let registry = EngineRegistry::builtin();
    let versions: Vec<String> = match version {
        Some(v) => {
            registry.get(v)?;
            vec![v.to_string()]
        }
        None => registry.versions().into_iter().map(String::from).collect(),
    };
    for v in &versions {
        validate_engine_config(config, v)?;
        EngineConfig::resolve(config, v)?;
    }
    if config.get_string("shadow", "universe").is_some() {
        validate_shadow_config(config)?;
    }
    Ok(())
}

fn run_validate(config_path: &Path, version: Option<&str>) -> ExitCode {
    eprintln!("Loading config from {}", config_path.display());
    let adapter = match load_config(config_path) {
        Ok(a) => a,
        Err(code) => return code,
    };
    match validate(&adapter, version) {
        Ok(()) => {
            eprintln!("Config validated successfully");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}
