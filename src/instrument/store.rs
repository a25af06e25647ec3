//! The instrument store: a `InstrumentStore` trait plus a Postgres-backed
//! implementation.

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;

use crate::config::DatabaseConfig;
use crate::error::{DatabaseError, InstrumentError};

use super::model::Instrument;

#[async_trait]
pub trait InstrumentStore: Send + Sync {
    async fn get(&self, symbol: &str) -> Result<Option<Instrument>, InstrumentError>;

    /// Validates allocations against the closed vocabularies and the
    /// sum-to-100 invariant before writing; invalid writes fail without
    /// touching the store.
    async fn upsert(&self, instrument: Instrument) -> Result<(), InstrumentError>;

    /// Symbols that are absent or lack any of the three allocation maps.
    async fn list_missing(&self, symbols: &[String]) -> Result<Vec<String>, InstrumentError>;
}

pub struct PostgresInstrumentStore {
    pool: Pool,
}

impl PostgresInstrumentStore {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let pool = config.connect_pool().await?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> Result<deadpool_postgres::Object, InstrumentError> {
        self.pool
            .get()
            .await
            .map_err(|e| InstrumentError::BackendUnavailable(e.to_string()))
    }
}

#[async_trait]
impl InstrumentStore for PostgresInstrumentStore {
    async fn get(&self, symbol: &str) -> Result<Option<Instrument>, InstrumentError> {
        let conn = self.conn().await?;
        let row = conn
            .query_opt(
                r#"
                SELECT symbol, display_name, kind, asset_class_allocation,
                       region_allocation, sector_allocation, updated_at
                FROM instruments WHERE symbol = $1
                "#,
                &[&symbol],
            )
            .await
            .map_err(|e| InstrumentError::Database(DatabaseError::Query(e)))?;

        let Some(row) = row else { return Ok(None) };

        let kind_str: String = row.get("kind");
        let kind = serde_json::from_value(serde_json::Value::String(kind_str))
            .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?;
        let asset_class_allocation = row.get("asset_class_allocation");
        let region_allocation = row.get("region_allocation");
        let sector_allocation = row.get("sector_allocation");

        Ok(Some(Instrument {
            symbol: row.get("symbol"),
            display_name: row.get("display_name"),
            kind,
            asset_class_allocation: serde_json::from_value(asset_class_allocation)
                .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?,
            region_allocation: serde_json::from_value(region_allocation)
                .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?,
            sector_allocation: serde_json::from_value(sector_allocation)
                .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?,
            updated_at: row.get("updated_at"),
        }))
    }

    async fn upsert(&self, instrument: Instrument) -> Result<(), InstrumentError> {
        instrument
            .validate()
            .map_err(|reason| InstrumentError::ValidationError {
                symbol: instrument.symbol.clone(),
                reason,
            })?;

        let conn = self.conn().await?;
        let kind_value = serde_json::to_value(instrument.kind)
            .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?;
        let kind_str = kind_value.as_str().unwrap_or_default();
        let asset_class = serde_json::to_value(&instrument.asset_class_allocation)
            .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?;
        let region = serde_json::to_value(&instrument.region_allocation)
            .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?;
        let sector = serde_json::to_value(&instrument.sector_allocation)
            .map_err(|e| InstrumentError::Database(DatabaseError::Serialization(e)))?;
        let now = Utc::now();

        conn.execute(
            r#"
            INSERT INTO instruments (
                symbol, display_name, kind, asset_class_allocation,
                region_allocation, sector_allocation, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (symbol) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                kind = EXCLUDED.kind,
                asset_class_allocation = EXCLUDED.asset_class_allocation,
                region_allocation = EXCLUDED.region_allocation,
                sector_allocation = EXCLUDED.sector_allocation,
                updated_at = EXCLUDED.updated_at
            "#,
            &[
                &instrument.symbol,
                &instrument.display_name,
                &kind_str,
                &asset_class,
                &region,
                &sector,
                &now,
            ],
        )
        .await
        .map_err(|e| InstrumentError::Database(DatabaseError::Query(e)))?;

        Ok(())
    }

    async fn list_missing(&self, symbols: &[String]) -> Result<Vec<String>, InstrumentError> {
        let mut missing = Vec::new();
        for symbol in symbols {
            match self.get(symbol).await? {
                Some(inst) if !inst.is_missing_classification() => {}
                _ => missing.push(symbol.clone()),
            }
        }
        Ok(missing)
    }
}
