//! Watermark reads with an explicit fallback chain, and monotonic advances.

use time::PrimitiveDateTime;
use tidemark_warehouse::{StoreSession, WarehouseError};
use tracing::debug;

/// One way of finding a source's resume point.
pub trait WatermarkFallback: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` hands over to the next strategy in the chain.
    fn resolve(
        &self,
        session: &StoreSession,
        source: &str,
    ) -> Result<Option<PrimitiveDateTime>, WarehouseError>;
}

/// The persisted watermark row.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoredWatermark;

impl WatermarkFallback for StoredWatermark {
    fn name(&self) -> &'static str {
        "stored"
    }

    fn resolve(
        &self,
        session: &StoreSession,
        source: &str,
    ) -> Result<Option<PrimitiveDateTime>, WarehouseError> {
        session.read_watermark(source)
    }
}

/// The newest price bar already stored for the source.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxPriceTimestamp;

impl WatermarkFallback for MaxPriceTimestamp {
    fn name(&self) -> &'static str {
        "max_price"
    }

    fn resolve(
        &self,
        session: &StoreSession,
        source: &str,
    ) -> Result<Option<PrimitiveDateTime>, WarehouseError> {
        session.max_price_timestamp(source)
    }
}

/// Terminal strategy: a fixed epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedEpoch(pub PrimitiveDateTime);

impl WatermarkFallback for FixedEpoch {
    fn name(&self) -> &'static str {
        "epoch"
    }

    fn resolve(
        &self,
        _session: &StoreSession,
        _source: &str,
    ) -> Result<Option<PrimitiveDateTime>, WarehouseError> {
        Ok(Some(self.0))
    }
}

/// A resolved watermark and the strategy that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWatermark {
    pub value: PrimitiveDateTime,
    pub origin: &'static str,
}

/// Reads and advances per-source watermarks.
pub struct WatermarkStore {
    chain: Vec<Box<dyn WatermarkFallback>>,
    epoch: FixedEpoch,
}

impl WatermarkStore {
    /// Stored watermark, then the newest stored price, then `epoch`.
    pub fn for_prices(epoch: PrimitiveDateTime) -> Self {
        Self::with_chain(
            vec![Box::new(StoredWatermark), Box::new(MaxPriceTimestamp)],
            FixedEpoch(epoch),
        )
    }

    /// Stored watermark, then `epoch`.
    pub fn for_news(epoch: PrimitiveDateTime) -> Self {
        Self::with_chain(vec![Box::new(StoredWatermark)], FixedEpoch(epoch))
    }

    /// `chain` is tried in order; `epoch` answers when every strategy declines.
    pub fn with_chain(chain: Vec<Box<dyn WatermarkFallback>>, epoch: FixedEpoch) -> Self {
        Self { chain, epoch }
    }

    pub fn resolve(
        &self,
        session: &StoreSession,
        source: &str,
    ) -> Result<ResolvedWatermark, WarehouseError> {
        for strategy in &self.chain {
            if let Some(value) = strategy.resolve(session, source)? {
                debug!(source, origin = strategy.name(), watermark = %value, "watermark resolved");
                return Ok(ResolvedWatermark {
                    value,
                    origin: strategy.name(),
                });
            }
        }
        debug!(source, origin = self.epoch.name(), watermark = %self.epoch.0, "watermark resolved");
        Ok(ResolvedWatermark {
            value: self.epoch.0,
            origin: self.epoch.name(),
        })
    }

    pub fn get_last_success(
        &self,
        session: &StoreSession,
        source: &str,
    ) -> Result<PrimitiveDateTime, WarehouseError> {
        self.resolve(session, source).map(|resolved| resolved.value)
    }

    /// Advance the stored watermark; stale values leave it unchanged.
    /// Returns whether the stored value moved.
    pub fn update_last_success(
        &self,
        session: &StoreSession,
        source: &str,
        last_success: PrimitiveDateTime,
        updated_at: PrimitiveDateTime,
    ) -> Result<bool, WarehouseError> {
        let advanced = session.advance_watermark(source, last_success, updated_at)?;
        if !advanced {
            debug!(source, requested = %last_success, "watermark not advanced; stored value is newer");
        }
        Ok(advanced)
    }
}

impl std::fmt::Debug for WatermarkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkStore")
            .field(
                "chain",
                &self.chain.iter().map(|strategy| strategy.name()).collect::<Vec<_>>(),
            )
            .field("epoch", &self.epoch.0)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};
    use tidemark_warehouse::{PriceRecord, Warehouse};

    const EPOCH: PrimitiveDateTime = datetime!(2024-01-01 00:00);

    fn price(hour: u8) -> PriceRecord {
        PriceRecord {
            date: date!(2024 - 02 - 10),
            hour,
            source: String::from("BTC-USD"),
            open: Some(1.0),
            high: Some(1.0),
            low: Some(1.0),
            close: Some(1.0),
            volume: Some(1),
        }
    }

    #[test]
    fn empty_store_falls_back_to_epoch() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let session = warehouse.session().expect("session");

        let resolved = WatermarkStore::for_prices(EPOCH)
            .resolve(&session, "BTC-USD")
            .expect("resolve");

        assert_eq!(resolved.value, EPOCH);
        assert_eq!(resolved.origin, "epoch");
    }

    #[test]
    fn stored_prices_are_used_before_epoch() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let session = warehouse.session().expect("session");
        for hour in [3, 7, 5] {
            session
                .insert_price_if_absent(&price(hour), EPOCH)
                .expect("insert");
        }

        let resolved = WatermarkStore::for_prices(EPOCH)
            .resolve(&session, "BTC-USD")
            .expect("resolve");

        assert_eq!(resolved.value, datetime!(2024-02-10 07:00));
        assert_eq!(resolved.origin, "max_price");
    }

    #[test]
    fn stored_watermark_wins_over_prices() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let session = warehouse.session().expect("session");
        session
            .insert_price_if_absent(&price(7), EPOCH)
            .expect("insert");
        let store = WatermarkStore::for_prices(EPOCH);
        store
            .update_last_success(&session, "BTC-USD", datetime!(2024-02-10 04:00), EPOCH)
            .expect("update");

        let resolved = store.resolve(&session, "BTC-USD").expect("resolve");
        assert_eq!(resolved.value, datetime!(2024-02-10 04:00));
        assert_eq!(resolved.origin, "stored");
    }

    #[test]
    fn news_chain_ignores_price_table() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let session = warehouse.session().expect("session");
        let mut row = price(9);
        row.source = String::from("NEWSAPI");
        session.insert_price_if_absent(&row, EPOCH).expect("insert");

        let value = WatermarkStore::for_news(EPOCH)
            .get_last_success(&session, "NEWSAPI")
            .expect("resolve");
        assert_eq!(value, EPOCH);
    }

    #[test]
    fn stale_update_is_ignored() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let session = warehouse.session().expect("session");
        let store = WatermarkStore::for_prices(EPOCH);

        assert!(store
            .update_last_success(&session, "ETH-USD", datetime!(2024-03-01 10:00), EPOCH)
            .expect("first update"));
        assert!(!store
            .update_last_success(&session, "ETH-USD", datetime!(2024-03-01 08:00), EPOCH)
            .expect("stale update"));

        assert_eq!(
            store.get_last_success(&session, "ETH-USD").expect("read"),
            datetime!(2024-03-01 10:00)
        );
    }
}
