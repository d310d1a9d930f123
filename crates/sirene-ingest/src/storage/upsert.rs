//! Bulk upsert of establishment rows

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::debug;

use super::{collapse_duplicate_keys, BatchWriter, FailurePolicy, WriteOutcome};
use crate::config::TableName;
use crate::models::EstablishmentRecord;

/// Bind parameters per establishment row
pub const BINDS_PER_ROW: usize = 7;

/// Writes establishment batches with one `INSERT .. ON CONFLICT (siret)`
///
/// Address columns of an existing row are overwritten, so replaying the same
/// extract converges to the same table. A failed statement drops the batch.
pub struct PgUpsertWriter {
    db: PgPool,
    table: TableName,
}

impl PgUpsertWriter {
    pub fn new(db: PgPool, table: TableName) -> Self {
        Self { db, table }
    }

    async fn upsert(&self, batch: &[EstablishmentRecord]) -> Result<u64, sqlx::Error> {
        let rows = collapse_duplicate_keys(batch);

        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            r#"
            INSERT INTO {} (
                siren,
                siret,
                numero_voie,
                type_voie,
                libelle_voie,
                code_postal,
                libelle_commune
            )
            "#,
            self.table
        ));

        query_builder.push_values(rows, |mut b, record| {
            b.push_bind(&record.siren)
                .push_bind(&record.siret)
                .push_bind(&record.numero_voie)
                .push_bind(&record.type_voie)
                .push_bind(&record.libelle_voie)
                .push_bind(&record.code_postal)
                .push_bind(&record.libelle_commune);
        });

        query_builder.push(
            r#"
            ON CONFLICT (siret)
            DO UPDATE SET
                numero_voie = EXCLUDED.numero_voie,
                type_voie = EXCLUDED.type_voie,
                libelle_voie = EXCLUDED.libelle_voie,
                code_postal = EXCLUDED.code_postal,
                libelle_commune = EXCLUDED.libelle_commune
            "#,
        );

        let result = query_builder.build().execute(&self.db).await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BatchWriter for PgUpsertWriter {
    type Record = EstablishmentRecord;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::DropBatch
    }

    async fn write_batch(&mut self, batch: &[EstablishmentRecord]) -> WriteOutcome {
        if batch.is_empty() {
            return WriteOutcome::Committed { rows: 0 };
        }

        match self.upsert(batch).await {
            Ok(affected) => {
                debug!(table = %self.table, size = batch.len(), affected, "Upserted establishment batch");
                WriteOutcome::Committed { rows: batch.len() }
            },
            Err(e) => WriteOutcome::Failed {
                policy: self.failure_policy(),
                cause: Box::new(e),
            },
        }
    }
}
