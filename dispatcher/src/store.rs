use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use tokio_postgres::NoTls;
use uuid::Uuid;

use crate::error::StoreError;
use crate::processor_type::ProcessorType;

/// A payment a processor accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub correlation_id: Uuid,
    pub amount: Decimal,
    pub processor: ProcessorType,
    pub completed_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessorSummary {
    #[serde(rename = "totalRequests")]
    pub total_requests: i64,
    #[serde(rename = "totalAmount", with = "rust_decimal::serde::arbitrary_precision")]
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PaymentsSummary {
    pub default: ProcessorSummary,
    pub fallback: ProcessorSummary,
}

impl PaymentsSummary {
    pub fn processor_mut(&mut self, processor: ProcessorType) -> &mut ProcessorSummary {
        match processor {
            ProcessorType::Default => &mut self.default,
            ProcessorType::Fallback => &mut self.fallback,
        }
    }
}

/// Aggregate over every persisted amount. `mean` and `stddev_sample` are
/// `None` when the database has nothing to aggregate over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmountStatistics {
    pub count: i64,
    pub mean: Option<Decimal>,
    pub stddev_sample: Option<Decimal>,
}

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, record: &PaymentRecord) -> Result<(), StoreError>;

    async fn summary(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<PaymentsSummary, StoreError>;

    async fn purge_all(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait StatisticsProvider: Send + Sync {
    async fn aggregate(&self) -> Result<AmountStatistics, StoreError>;
}

const SCHEMA: &str = "
DO $$ BEGIN
    CREATE TYPE service_type AS ENUM ('default', 'fallback');
EXCEPTION
    WHEN duplicate_object THEN NULL;
END $$;

CREATE TABLE IF NOT EXISTS payments (
    id BIGSERIAL PRIMARY KEY,
    correlation_id UUID NOT NULL,
    amount NUMERIC NOT NULL,
    service_used service_type NOT NULL,
    completed_at TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS payments_completed_at_idx ON payments (completed_at);
";

pub struct PgStore {
    dbpool: Pool,
}

impl PgStore {
    pub fn connect(
        postgres_url: &str,
        max_size: usize,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let pg_config = postgres_url.parse::<tokio_postgres::Config>()?;

        let mgr = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let dbpool = Pool::builder(mgr)
            .max_size(max_size)
            .runtime(deadpool_postgres::Runtime::Tokio1)
            .build()?;

        Ok(Self { dbpool })
    }

    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let client = self.dbpool.get().await?;
        client.batch_execute(SCHEMA).await?;
        tracing::info!("Payments schema ready");
        Ok(())
    }
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn insert(&self, record: &PaymentRecord) -> Result<(), StoreError> {
        let conn = self.dbpool.get().await?;

        let stmt = conn
            .prepare_cached(
                "INSERT INTO payments (correlation_id, amount, service_used, completed_at) VALUES ($1, $2, $3, $4)",
            )
            .await?;

        conn.execute(
            &stmt,
            &[
                &record.correlation_id,
                &record.amount,
                &record.processor,
                &record.completed_at,
            ],
        )
        .await?;

        Ok(())
    }

    async fn summary(
        &self,
        from: Option<OffsetDateTime>,
        to: Option<OffsetDateTime>,
    ) -> Result<PaymentsSummary, StoreError> {
        let client = self.dbpool.get().await?;

        let stmt = client
            .prepare_cached(
                "
                SELECT COUNT(*) AS total_requests,
                       SUM(amount) AS total_amount,
                       service_used
                FROM payments
                WHERE ($1::timestamptz IS NULL OR completed_at >= $1::timestamptz)
                  AND ($2::timestamptz IS NULL OR completed_at <= $2::timestamptz)
                GROUP BY service_used
                ",
            )
            .await?;

        let rows = client.query(&stmt, &[&from, &to]).await?;

        let mut summary = PaymentsSummary::default();
        for row in rows {
            let processor: ProcessorType = row.try_get("service_used")?;
            let entry = summary.processor_mut(processor);
            entry.total_requests = row.try_get("total_requests")?;
            entry.total_amount = row
                .try_get::<_, Option<Decimal>>("total_amount")?
                .unwrap_or(Decimal::ZERO);
        }

        Ok(summary)
    }

    async fn purge_all(&self) -> Result<(), StoreError> {
        let client = self.dbpool.get().await?;
        client
            .batch_execute("TRUNCATE TABLE payments RESTART IDENTITY")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StatisticsProvider for PgStore {
    async fn aggregate(&self) -> Result<AmountStatistics, StoreError> {
        let client = self.dbpool.get().await?;

        let row = client
            .query_one(
                "SELECT COUNT(*) AS count, AVG(amount) AS mean, STDDEV_SAMP(amount) AS stddev FROM payments",
                &[],
            )
            .await?;

        Ok(AmountStatistics {
            count: row.try_get("count")?,
            mean: row.try_get("mean")?,
            stddev_sample: row.try_get("stddev")?,
        })
    }
}
