//! PostgreSQL bar source.
//!
//! Reads a `bars` table with columns `symbol`, `timeframe`, `ts timestamptz`
//! and the OHLCV values. Shadow-trading state stays in SQLite.

use crate::domain::bar::Bar;
use crate::domain::error::ShadowtraderError;
use crate::ports::bar_source::BarSource;
use crate::ports::config_port::ConfigPort;
use chrono::{DateTime, Utc};
use postgres::NoTls;
use postgres::types::ToSql;
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;

pub struct PostgresAdapter {
    pool: Pool<PostgresConnectionManager<NoTls>>,
}

impl PostgresAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, ShadowtraderError> {
        // [postgres] connection_string wins over [database] conninfo
        let connection_string = config
            .get_string("postgres", "connection_string")
            .or_else(|| config.get_string("database", "conninfo"))
            .ok_or_else(|| ShadowtraderError::ConfigMissing {
                section: "database".into(),
                key: "conninfo".into(),
            })?;

        let pg_config: postgres::Config =
            connection_string
                .parse()
                .map_err(|e: postgres::Error| ShadowtraderError::ConfigInvalid {
                    section: "database".into(),
                    key: "conninfo".into(),
                    reason: e.to_string(),
                })?;
        let pool_size = config.get_int("postgres", "pool_size", 4).max(1) as u32;

        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|e| ShadowtraderError::Database {
                reason: e.to_string(),
            })?;

        Ok(Self { pool })
    }

    fn conn(&self) -> Result<PooledConnection<PostgresConnectionManager<NoTls>>, ShadowtraderError> {
        self.pool.get().map_err(|e| ShadowtraderError::Database {
            reason: e.to_string(),
        })
    }
}

impl BarSource for PostgresAdapter {
    fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ShadowtraderError> {
        let query = "SELECT ts, \
                            open::double precision, high::double precision, \
                            low::double precision, close::double precision, \
                            volume::double precision \
                     FROM public.bars \
                     WHERE symbol = $1 AND timeframe = $2 AND ts >= $3 AND ts <= $4 \
                     ORDER BY ts ASC";

        let params: &[&(dyn ToSql + Sync)] = &[&symbol, &timeframe, &start, &end];
        let rows = self
            .conn()?
            .query(query, params)
            .map_err(|e| ShadowtraderError::UpstreamIo {
                instrument: symbol.to_string(),
                reason: e.to_string(),
            })?;

        Ok(rows
            .into_iter()
            .map(|row| Bar {
                timestamp: row.get(0),
                open: row.get(1),
                high: row.get(2),
                low: row.get(3),
                close: row.get(4),
                volume: row.get(5),
            })
            .collect())
    }

    fn list_symbols(&self) -> Result<Vec<String>, ShadowtraderError> {
        let rows = self
            .conn()?
            .query("SELECT DISTINCT symbol FROM public.bars ORDER BY symbol", &[])
            .map_err(|e| ShadowtraderError::DatabaseQuery {
                reason: e.to_string(),
            })?;

        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn from_config_missing_connection_string() {
        let config = FileConfigAdapter::from_string("[postgres]\npool_size = 2\n").unwrap();
        match PostgresAdapter::from_config(&config) {
            Err(ShadowtraderError::ConfigMissing { section, key }) => {
                assert_eq!(section, "database");
                assert_eq!(key, "conninfo");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn from_config_rejects_malformed_conninfo() {
        let config =
            FileConfigAdapter::from_string("[database]\nconninfo = host='unterminated\n").unwrap();
        assert!(matches!(
            PostgresAdapter::from_config(&config),
            Err(ShadowtraderError::ConfigInvalid { .. })
        ));
    }
}
