//! SQLite adapter: bar storage, pending signals and shadow-trading state.
//!
//! Structured records (positions, trades, snapshots, decisions) are stored as
//! JSON payloads next to the few columns queries filter on. Timestamps are
//! RFC 3339 text with a fixed precision so string order is time order.

use crate::domain::audit::DecisionRecord;
use crate::domain::bar::Bar;
use crate::domain::decision::{EntrySignal, Side};
use crate::domain::error::ShadowtraderError;
use crate::domain::portfolio::EquityPoint;
use crate::domain::position::{Position, Trade};
use crate::ports::bar_cache::BarCache;
use crate::ports::bar_source::BarSource;
use crate::ports::config_port::ConfigPort;
use crate::ports::persistence_port::{PersistencePort, TickCommit};
use crate::ports::signal_source::{PendingSignal, SignalSource};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn pool_err(e: r2d2::Error) -> ShadowtraderError {
    ShadowtraderError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> ShadowtraderError {
    ShadowtraderError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn ts_text(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, ShadowtraderError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| ShadowtraderError::DatabaseQuery {
            reason: format!("invalid stored timestamp {raw:?}: {e}"),
        })
}

fn write_positions(
    conn: &Connection,
    version: &str,
    positions: &[Position],
) -> Result<(), ShadowtraderError> {
    conn.execute("DELETE FROM positions WHERE version = ?1", params![version])
        .map_err(query_err)?;
    for position in positions {
        conn.execute(
            "INSERT INTO positions (version, instrument, payload) VALUES (?1, ?2, ?3)",
            params![version, position.instrument, serde_json::to_string(position)?],
        )
        .map_err(query_err)?;
    }
    Ok(())
}

fn write_trades(conn: &Connection, version: &str, trades: &[Trade]) -> Result<(), ShadowtraderError> {
    for trade in trades {
        conn.execute(
            "INSERT INTO trades (version, instrument, closed_at, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                version,
                trade.instrument,
                ts_text(trade.closed_at),
                serde_json::to_string(trade)?
            ],
        )
        .map_err(query_err)?;
    }
    Ok(())
}

fn write_snapshot(
    conn: &Connection,
    version: &str,
    point: &EquityPoint,
) -> Result<(), ShadowtraderError> {
    conn.execute(
        "INSERT INTO snapshots (version, ts, payload) VALUES (?1, ?2, ?3)",
        params![version, ts_text(point.timestamp), serde_json::to_string(point)?],
    )
    .map_err(query_err)?;
    Ok(())
}

fn write_decisions(conn: &Connection, records: &[DecisionRecord]) -> Result<(), ShadowtraderError> {
    for record in records {
        conn.execute(
            "INSERT INTO decisions (version, instrument, ts, outcome, reason, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.engine_version,
                record.instrument,
                ts_text(record.timestamp),
                record.outcome.as_str(),
                record.reason,
                serde_json::to_string(record)?
            ],
        )
        .map_err(query_err)?;
    }
    Ok(())
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ShadowtraderError> {
        let db_path =
            config
                .get_string("sqlite", "path")
                .ok_or_else(|| ShadowtraderError::ConfigMissing {
                    section: "sqlite".into(),
                    key: "path".into(),
                })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, ShadowtraderError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(pool_err)?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, ShadowtraderError> {
        self.pool.get().map_err(pool_err)
    }

    pub fn initialize_schema(&self) -> Result<(), ShadowtraderError> {
        self.conn()?
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS bars (
                    symbol TEXT NOT NULL,
                    timeframe TEXT NOT NULL,
                    ts TEXT NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume REAL NOT NULL,
                    PRIMARY KEY (symbol, timeframe, ts)
                );
                CREATE TABLE IF NOT EXISTS positions (
                    version TEXT NOT NULL,
                    instrument TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    PRIMARY KEY (version, instrument)
                );
                CREATE TABLE IF NOT EXISTS trades (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version TEXT NOT NULL,
                    instrument TEXT NOT NULL,
                    closed_at TEXT NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_trades_version_closed ON trades(version, closed_at);
                CREATE TABLE IF NOT EXISTS snapshots (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version TEXT NOT NULL,
                    ts TEXT NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_snapshots_version ON snapshots(version, id);
                CREATE TABLE IF NOT EXISTS decisions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version TEXT NOT NULL,
                    instrument TEXT NOT NULL,
                    ts TEXT NOT NULL,
                    outcome TEXT NOT NULL,
                    reason TEXT,
                    payload TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS signals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    version TEXT NOT NULL,
                    instrument TEXT NOT NULL,
                    side TEXT NOT NULL,
                    entry REAL NOT NULL,
                    stop REAL NOT NULL,
                    targets TEXT NOT NULL,
                    confidence REAL NOT NULL,
                    created_at TEXT NOT NULL,
                    consumed_at TEXT
                );
                CREATE TABLE IF NOT EXISTS tick_locks (
                    key TEXT PRIMARY KEY,
                    acquired_at TEXT NOT NULL,
                    expires_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS market_cache (
                    key TEXT PRIMARY KEY,
                    expires_at TEXT NOT NULL,
                    payload TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_market_cache_expiry ON market_cache(expires_at);",
            )
            .map_err(query_err)
    }

    pub fn insert_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: &[Bar],
    ) -> Result<(), ShadowtraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        for bar in bars {
            tx.execute(
                "INSERT OR REPLACE INTO bars (symbol, timeframe, ts, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    symbol,
                    timeframe,
                    ts_text(bar.timestamp),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ],
            )
            .map_err(query_err)?;
        }
        tx.commit().map_err(query_err)
    }

    /// Queues an externally produced entry for `version`. Returns its id.
    pub fn insert_signal(
        &self,
        version: &str,
        signal: &EntrySignal,
        created_at: DateTime<Utc>,
    ) -> Result<i64, ShadowtraderError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO signals (version, instrument, side, entry, stop, targets, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                version,
                signal.instrument,
                signal.side.as_str(),
                signal.entry,
                signal.stop,
                serde_json::to_string(&signal.targets)?,
                signal.confidence,
                ts_text(created_at)
            ],
        )
        .map_err(query_err)?;
        Ok(conn.last_insert_rowid())
    }

    /// Decision log for `version`, oldest first.
    pub fn load_decisions(&self, version: &str) -> Result<Vec<DecisionRecord>, ShadowtraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT payload FROM decisions WHERE version = ?1 ORDER BY id ASC")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![version], |row| row.get::<_, String>(0))
            .map_err(query_err)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(serde_json::from_str(&row.map_err(query_err)?)?);
        }
        Ok(records)
    }

    fn load_payloads<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<T>, ShadowtraderError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(query).map_err(query_err)?;
        let rows = stmt
            .query_map(args, |row| row.get::<_, String>(0))
            .map_err(query_err)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(serde_json::from_str(&row.map_err(query_err)?)?);
        }
        Ok(items)
    }
}

impl BarSource for SqliteAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ShadowtraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT ts, open, high, low, close, volume
                 FROM bars
                 WHERE symbol = ?1 AND timeframe = ?2 AND ts >= ?3 AND ts <= ?4
                 ORDER BY ts ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(
                params![symbol, timeframe, ts_text(start), ts_text(end)],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        row.get::<_, f64>(2)?,
                        row.get::<_, f64>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                    ))
                },
            )
            .map_err(query_err)?;

        let mut bars = Vec::new();
        for row in rows {
            let (ts, open, high, low, close, volume) = row.map_err(query_err)?;
            bars.push(Bar {
                timestamp: parse_ts(&ts)?,
                open,
                high,
                low,
                close,
                volume,
            });
        }
        Ok(bars)
    }

    fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT symbol FROM bars ORDER BY symbol")
            .map_err(query_err)?;
        let rows = stmt.query_map([], |row| row.get(0)).map_err(query_err)?;

        let mut symbols = Vec::new();
        for row in rows {
            symbols.push(row.map_err(query_err)?);
        }
        Ok(symbols)
    }
}

impl SignalSource for SqliteAdapter {
    fn pending(&self, version: &str) -> Result<Vec<PendingSignal>, ShadowtraderError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, instrument, side, entry, stop, targets, confidence, created_at
                 FROM signals
                 WHERE version = ?1 AND consumed_at IS NULL
                 ORDER BY created_at ASC, id ASC",
            )
            .map_err(query_err)?;

        let rows = stmt
            .query_map(params![version], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, f64>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, f64>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .map_err(query_err)?;

        let mut signals = Vec::new();
        for row in rows {
            let (id, instrument, side, entry, stop, targets, confidence, created_at) =
                row.map_err(query_err)?;
            let side = match side.as_str() {
                "long" => Side::Long,
                "short" => Side::Short,
                other => {
                    return Err(ShadowtraderError::DatabaseQuery {
                        reason: format!("signal {id}: unknown side {other:?}"),
                    });
                }
            };
            signals.push(PendingSignal {
                id,
                instrument,
                side,
                entry,
                stop,
                targets: serde_json::from_str(&targets)?,
                confidence,
                created_at: parse_ts(&created_at)?,
            });
        }
        Ok(signals)
    }

    fn mark_consumed(&self, id: i64) -> Result<(), ShadowtraderError> {
        self.conn()?
            .execute(
                "UPDATE signals SET consumed_at = ?1 WHERE id = ?2 AND consumed_at IS NULL",
                params![ts_text(Utc::now()), id],
            )
            .map_err(query_err)?;
        Ok(())
    }
}

impl PersistencePort for SqliteAdapter {
    fn load_positions(&self, version: &str) -> Result<Vec<Position>, ShadowtraderError> {
        self.load_payloads(
            "SELECT payload FROM positions WHERE version = ?1 ORDER BY instrument",
            params![version],
        )
    }

    fn save_positions(
        &self,
        version: &str,
        positions: &[Position],
    ) -> Result<(), ShadowtraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        write_positions(&tx, version, positions)?;
        tx.commit().map_err(query_err)
    }

    fn append_trades(&self, version: &str, trades: &[Trade]) -> Result<(), ShadowtraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        write_trades(&tx, version, trades)?;
        tx.commit().map_err(query_err)
    }

    fn load_trades_since(
        &self,
        version: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Trade>, ShadowtraderError> {
        let since = ts_text(since);
        self.load_payloads(
            "SELECT payload FROM trades WHERE version = ?1 AND closed_at >= ?2 ORDER BY id ASC",
            params![version, since],
        )
    }

    fn append_snapshot(
        &self,
        version: &str,
        point: &EquityPoint,
    ) -> Result<(), ShadowtraderError> {
        write_snapshot(&*self.conn()?, version, point)
    }

    fn latest_snapshot(&self, version: &str) -> Result<Option<EquityPoint>, ShadowtraderError> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload FROM snapshots WHERE version = ?1 ORDER BY id DESC LIMIT 1",
                params![version],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        Ok(payload
            .map(|p| serde_json::from_str(&p))
            .transpose()?)
    }

    fn append_decisions(&self, records: &[DecisionRecord]) -> Result<(), ShadowtraderError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        write_decisions(&tx, records)?;
        tx.commit().map_err(query_err)
    }

    fn commit_tick(&self, version: &str, commit: &TickCommit<'_>) -> Result<(), ShadowtraderError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;
        write_decisions(&tx, commit.decisions)?;
        write_trades(&tx, version, commit.trades)?;
        write_positions(&tx, version, commit.positions)?;
        write_snapshot(&tx, version, commit.snapshot)?;
        tx.commit().map_err(query_err)
    }

    fn try_acquire_tick_lock(
        &self,
        key: &str,
        now: DateTime<Utc>,
        lease_secs: i64,
    ) -> Result<bool, ShadowtraderError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;
        let held_until: Option<String> = tx
            .query_row(
                "SELECT expires_at FROM tick_locks WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        if let Some(expires) = held_until
            && parse_ts(&expires)? > now
        {
            return Ok(false);
        }
        tx.execute(
            "INSERT OR REPLACE INTO tick_locks (key, acquired_at, expires_at) VALUES (?1, ?2, ?3)",
            params![
                key,
                ts_text(now),
                ts_text(now + Duration::seconds(lease_secs.max(0)))
            ],
        )
        .map_err(query_err)?;
        tx.commit().map_err(query_err)?;
        Ok(true)
    }

    fn release_tick_lock(&self, key: &str) -> Result<(), ShadowtraderError> {
        self.conn()?
            .execute("DELETE FROM tick_locks WHERE key = ?1", params![key])
            .map_err(query_err)?;
        Ok(())
    }
}

impl BarCache for SqliteAdapter {
    fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Vec<Bar>>, ShadowtraderError> {
        let payload: Option<String> = self
            .conn()?
            .query_row(
                "SELECT payload FROM market_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, ts_text(now)],
                |row| row.get(0),
            )
            .optional()
            .map_err(query_err)?;
        Ok(payload.map(|p| serde_json::from_str(&p)).transpose()?)
    }

    fn put(
        &self,
        key: &str,
        bars: &[Bar],
        expires_at: DateTime<Utc>,
    ) -> Result<(), ShadowtraderError> {
        self.conn()?
            .execute(
                "INSERT OR REPLACE INTO market_cache (key, expires_at, payload) VALUES (?1, ?2, ?3)",
                params![key, ts_text(expires_at), serde_json::to_string(bars)?],
            )
            .map_err(query_err)?;
        Ok(())
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, ShadowtraderError> {
        self.conn()?
            .execute(
                "DELETE FROM market_cache WHERE expires_at <= ?1",
                params![ts_text(now)],
            )
            .map_err(query_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;
    use crate::domain::audit::DecisionOutcome;
    use crate::domain::decision::{Decision, NoTradeReason};
    use crate::domain::position::{ExitLeg, ExitReason, PositionState};
    use chrono::TimeZone;

    fn ts(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 0, 0, 0).unwrap()
    }

    fn adapter() -> SqliteAdapter {
        let adapter = SqliteAdapter::in_memory().unwrap();
        adapter.initialize_schema().unwrap();
        adapter
    }

    fn position(instrument: &str) -> Position {
        Position {
            instrument: instrument.into(),
            side: Side::Long,
            initial_quantity: 100.0,
            quantity: 100.0,
            entry_price: 50.0,
            initial_stop: 49.5,
            stop: 49.5,
            targets: vec![51.0],
            state: PositionState::Open,
            opened_at: ts(1),
            bars_held: 0,
            entry_fees: 0.0,
            entry_atr: 0.4,
            trail_distance: 0.8,
            legs: Vec::new(),
        }
    }

    fn trade(instrument: &str, closed: u32, pnl: f64) -> Trade {
        Trade {
            instrument: instrument.into(),
            side: Side::Long,
            quantity: 100.0,
            entry_price: 50.0,
            initial_stop: 49.5,
            opened_at: ts(1),
            closed_at: ts(closed),
            bars_held: 2,
            exit_reason: ExitReason::TakeProfit,
            legs: vec![ExitLeg {
                timestamp: ts(closed),
                quantity: 100.0,
                price: 50.0 + pnl / 100.0,
                fees: 0.0,
                pnl,
                reason: ExitReason::TakeProfit,
            }],
            pnl,
            r_multiple: pnl / 50.0,
        }
    }

    #[test]
    fn from_config_missing_path() {
        let config = FileConfigAdapter::from_string("[sqlite]\n").unwrap();
        match SqliteAdapter::from_config(&config) {
            Err(ShadowtraderError::ConfigMissing { section, key }) => {
                assert_eq!(section, "sqlite");
                assert_eq!(key, "path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn bars_round_trip_within_window() {
        let adapter = adapter();
        let bars: Vec<Bar> = (1..=4)
            .map(|d| Bar {
                timestamp: ts(d),
                open: 10.0,
                high: 11.0,
                low: 9.0,
                close: 10.5,
                volume: 100.0,
            })
            .collect();
        adapter.insert_bars("BHP", "1d", &bars).unwrap();
        adapter.insert_bars("CBA", "1d", &bars[..1]).unwrap();

        let fetched = adapter.fetch_bars("BHP", "1d", ts(2), ts(3)).unwrap();
        assert_eq!(fetched, bars[1..3].to_vec());
        assert!(adapter.fetch_bars("BHP", "1h", ts(1), ts(4)).unwrap().is_empty());
        assert_eq!(adapter.list_symbols().unwrap(), vec!["BHP", "CBA"]);
    }

    #[test]
    fn positions_are_replaced_per_version() {
        let adapter = adapter();
        adapter
            .save_positions("v2", &[position("BHP"), position("CBA")])
            .unwrap();
        adapter.save_positions("v1", &[position("WBC")]).unwrap();
        adapter.save_positions("v2", &[position("CBA")]).unwrap();

        let v2 = adapter.load_positions("v2").unwrap();
        assert_eq!(v2, vec![position("CBA")]);
        assert_eq!(adapter.load_positions("v1").unwrap().len(), 1);
        assert!(adapter.load_positions("v3").unwrap().is_empty());
    }

    #[test]
    fn trades_filtered_by_close_time() {
        let adapter = adapter();
        adapter
            .append_trades("v2", &[trade("BHP", 3, 50.0), trade("CBA", 6, -20.0)])
            .unwrap();
        let recent = adapter.load_trades_since("v2", ts(5)).unwrap();
        assert_eq!(recent, vec![trade("CBA", 6, -20.0)]);
        assert!(adapter.load_trades_since("v1", ts(1)).unwrap().is_empty());
    }

    #[test]
    fn latest_snapshot_is_last_appended() {
        let adapter = adapter();
        assert!(adapter.latest_snapshot("v2").unwrap().is_none());
        for (day, equity) in [(1, 100_000.0), (2, 100_500.0)] {
            adapter
                .append_snapshot(
                    "v2",
                    &EquityPoint {
                        timestamp: ts(day),
                        equity,
                        realized: equity - 100_000.0,
                        unrealized: 0.0,
                        peak: equity,
                        drawdown: 0.0,
                    },
                )
                .unwrap();
        }
        assert_eq!(adapter.latest_snapshot("v2").unwrap().unwrap().equity, 100_500.0);
    }

    #[test]
    fn decisions_append_only() {
        let adapter = adapter();
        let d = Decision::no_trade("BHP", NoTradeReason::Cooldown);
        let record = DecisionRecord::from_decision(ts(1), "v2", "v2_breakout", &d);
        adapter.append_decisions(&[record.clone()]).unwrap();
        adapter.append_decisions(&[record.clone()]).unwrap();
        let loaded = adapter.load_decisions("v2").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], record);
        assert_eq!(loaded[1].outcome, DecisionOutcome::NoTrade);
    }

    #[test]
    fn signals_consumed_once() {
        let adapter = adapter();
        let signal = EntrySignal {
            instrument: "BHP".into(),
            side: Side::Short,
            entry: 50.0,
            stop: 50.5,
            targets: vec![49.0],
            confidence: 0.7,
        };
        let id = adapter.insert_signal("v2", &signal, ts(2)).unwrap();
        let pending = adapter.pending("v2").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].to_entry(), signal);
        assert!(adapter.pending("v1").unwrap().is_empty());

        adapter.mark_consumed(id).unwrap();
        assert!(adapter.pending("v2").unwrap().is_empty());
    }

    #[test]
    fn tick_commit_writes_every_table() {
        let adapter = adapter();
        adapter.save_positions("v2", &[position("WBC")]).unwrap();
        let record = DecisionRecord::from_decision(
            ts(4),
            "v2",
            "v2_breakout",
            &Decision::no_trade("BHP", NoTradeReason::Cooldown),
        );
        let snapshot = EquityPoint {
            timestamp: ts(4),
            equity: 100_050.0,
            realized: 50.0,
            unrealized: 0.0,
            peak: 100_050.0,
            drawdown: 0.0,
        };
        adapter
            .commit_tick(
                "v2",
                &TickCommit {
                    decisions: &[record.clone()],
                    trades: &[trade("BHP", 4, 50.0)],
                    positions: &[position("CBA")],
                    snapshot: &snapshot,
                },
            )
            .unwrap();

        assert_eq!(adapter.load_decisions("v2").unwrap(), vec![record]);
        assert_eq!(adapter.load_trades_since("v2", ts(1)).unwrap().len(), 1);
        assert_eq!(adapter.load_positions("v2").unwrap(), vec![position("CBA")]);
        assert_eq!(adapter.latest_snapshot("v2").unwrap(), Some(snapshot));
    }

    #[test]
    fn failed_tick_commit_leaves_nothing_behind() {
        let adapter = adapter();
        adapter
            .conn()
            .unwrap()
            .execute_batch("DROP TABLE snapshots;")
            .unwrap();
        let record = DecisionRecord::from_decision(
            ts(4),
            "v2",
            "v2_breakout",
            &Decision::no_trade("BHP", NoTradeReason::Cooldown),
        );
        let snapshot = EquityPoint {
            timestamp: ts(4),
            equity: 100_000.0,
            realized: 0.0,
            unrealized: 0.0,
            peak: 100_000.0,
            drawdown: 0.0,
        };
        let result = adapter.commit_tick(
            "v2",
            &TickCommit {
                decisions: &[record],
                trades: &[trade("BHP", 4, 50.0)],
                positions: &[position("CBA")],
                snapshot: &snapshot,
            },
        );
        assert!(matches!(result, Err(ShadowtraderError::DatabaseQuery { .. })));
        assert!(adapter.load_decisions("v2").unwrap().is_empty());
        assert!(adapter.load_trades_since("v2", ts(1)).unwrap().is_empty());
        assert!(adapter.load_positions("v2").unwrap().is_empty());
    }

    #[test]
    fn market_cache_honours_expiry() {
        let adapter = adapter();
        let bars = vec![Bar {
            timestamp: ts(1),
            open: 10.0,
            high: 11.0,
            low: 9.0,
            close: 10.5,
            volume: 100.0,
        }];
        adapter.put("BHP:1d:0:0", &bars, ts(3)).unwrap();
        adapter.put("CBA:1d:0:0", &bars, ts(5)).unwrap();

        assert_eq!(adapter.get("BHP:1d:0:0", ts(2)).unwrap(), Some(bars.clone()));
        assert_eq!(adapter.get("BHP:1d:0:0", ts(3)).unwrap(), None);
        assert_eq!(adapter.get("NAB:1d:0:0", ts(2)).unwrap(), None);

        assert_eq!(adapter.evict_expired(ts(3)).unwrap(), 1);
        assert_eq!(adapter.evict_expired(ts(3)).unwrap(), 0);
        assert_eq!(adapter.get("CBA:1d:0:0", ts(4)).unwrap(), Some(bars));
    }

    #[test]
    fn tick_lock_excludes_until_expiry_or_release() {
        let adapter = adapter();
        assert!(adapter.try_acquire_tick_lock("tick:v2", ts(1), 60).unwrap());
        assert!(!adapter.try_acquire_tick_lock("tick:v2", ts(1), 60).unwrap());
        assert!(adapter.try_acquire_tick_lock("tick:v3", ts(1), 60).unwrap());

        adapter.release_tick_lock("tick:v2").unwrap();
        assert!(adapter.try_acquire_tick_lock("tick:v2", ts(1), 60).unwrap());
        // an abandoned lease lapses
        assert!(adapter.try_acquire_tick_lock("tick:v2", ts(2), 60).unwrap());
    }
}
