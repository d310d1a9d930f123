//! Transactional name updates for legal units

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, warn};

use super::{BatchWriter, FailurePolicy, WriteOutcome};
use crate::config::TableName;
use crate::models::LegalUnitRecord;

/// Updates the name columns of every row sharing a SIREN
///
/// Each batch runs in its own transaction and commits only if every update
/// succeeds. Updates never insert: a SIREN with no establishment row matches
/// nothing and is silently skipped.
pub struct PgUpdateWriter {
    db: PgPool,
    update_sql: String,
}

impl PgUpdateWriter {
    pub fn new(db: PgPool, table: TableName) -> Self {
        let update_sql = format!(
            "UPDATE {} \
             SET nom_unite_legale = $1, prenom_usuel_unite_legale = $2, denomination_unite_legale = $3 \
             WHERE siren = $4",
            table
        );
        Self { db, update_sql }
    }

    /// Apply every update inside `tx`, returning the number of matched rows
    async fn apply(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        batch: &[LegalUnitRecord],
    ) -> Result<u64, sqlx::Error> {
        let mut matched = 0;

        for record in batch {
            let result = sqlx::query(&self.update_sql)
                .bind(&record.nom)
                .bind(&record.prenom_usuel)
                .bind(&record.denomination)
                .bind(&record.siren)
                .execute(&mut **tx)
                .await?;
            matched += result.rows_affected();
        }

        Ok(matched)
    }

    async fn update(&self, batch: &[LegalUnitRecord]) -> Result<u64, sqlx::Error> {
        let mut tx = self.db.begin().await?;

        match self.apply(&mut tx, batch).await {
            Ok(matched) => {
                tx.commit().await?;
                Ok(matched)
            },
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Failed to roll back legal unit batch");
                }
                Err(e)
            },
        }
    }
}

#[async_trait]
impl BatchWriter for PgUpdateWriter {
    type Record = LegalUnitRecord;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::RollbackBatch
    }

    async fn write_batch(&mut self, batch: &[LegalUnitRecord]) -> WriteOutcome {
        if batch.is_empty() {
            return WriteOutcome::Committed { rows: 0 };
        }

        match self.update(batch).await {
            Ok(matched) => {
                debug!(size = batch.len(), matched, "Committed legal unit batch");
                WriteOutcome::Committed { rows: batch.len() }
            },
            Err(e) => WriteOutcome::Failed {
                policy: self.failure_policy(),
                cause: Box::new(e),
            },
        }
    }
}
