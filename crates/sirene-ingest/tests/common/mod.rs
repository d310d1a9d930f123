//! Shared helpers for sirene-ingest integration tests
//!
//! [`MemoryStore`] stands in for the establishment table: rows keyed by
//! SIRET, written through writers that follow the same failure policies as
//! the Postgres ones. Batches can be made to fail by index or by poisoned
//! key so drop and rollback behaviour is observable without a database.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sirene_ingest::progress::ProgressSink;
use sirene_ingest::{
    BatchWriter, EstablishmentRecord, FailurePolicy, LegalUnitRecord, PipelineStats, RecordKind,
    WriteOutcome,
};

pub const ESTABLISHMENT_HEADER: &str = "siren,siret,numeroVoieEtablissement,typeVoieEtablissement,libelleVoieEtablissement,codePostalEtablissement,libelleCommuneEtablissement,etatAdministratifEtablissement";

pub const LEGAL_UNIT_HEADER: &str =
    "siren,nomUniteLegale,prenomUsuelUniteLegale,denominationUniteLegale,etatAdministratifUniteLegale";

/// One row of the establishment table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredRow {
    pub siren: Option<String>,
    pub numero_voie: Option<String>,
    pub type_voie: Option<String>,
    pub libelle_voie: Option<String>,
    pub code_postal: Option<String>,
    pub libelle_commune: Option<String>,
    pub nom: Option<String>,
    pub prenom_usuel: Option<String>,
    pub denomination: Option<String>,
}

#[derive(Default)]
struct Inner {
    rows: Mutex<BTreeMap<String, StoredRow>>,
    batch_sizes: Mutex<Vec<usize>>,
}

/// In-memory establishment table
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_writer(&self) -> MemoryUpsertWriter {
        MemoryUpsertWriter {
            store: self.clone(),
            fail_batches: HashSet::new(),
            next_batch: 0,
        }
    }

    pub fn update_writer(&self) -> MemoryUpdateWriter {
        MemoryUpdateWriter {
            store: self.clone(),
            fail_batches: HashSet::new(),
            poison_siren: None,
            next_batch: 0,
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, StoredRow> {
        self.inner.rows.lock().unwrap().clone()
    }

    pub fn get(&self, siret: &str) -> Option<StoredRow> {
        self.inner.rows.lock().unwrap().get(siret).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.rows.lock().unwrap().len()
    }

    /// Sizes of every batch handed to a writer, failed ones included
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.inner.batch_sizes.lock().unwrap().clone()
    }

    fn record_batch(&self, size: usize) {
        self.inner.batch_sizes.lock().unwrap().push(size);
    }
}

/// Insert-or-update by SIRET, drops failed batches
pub struct MemoryUpsertWriter {
    store: MemoryStore,
    fail_batches: HashSet<usize>,
    next_batch: usize,
}

impl MemoryUpsertWriter {
    /// Fail the batch with the given zero-based index
    pub fn failing_batch(mut self, index: usize) -> Self {
        self.fail_batches.insert(index);
        self
    }
}

#[async_trait]
impl BatchWriter for MemoryUpsertWriter {
    type Record = EstablishmentRecord;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::DropBatch
    }

    async fn write_batch(&mut self, batch: &[EstablishmentRecord]) -> WriteOutcome {
        let index = self.next_batch;
        self.next_batch += 1;
        self.store.record_batch(batch.len());

        if self.fail_batches.contains(&index) {
            return WriteOutcome::Failed {
                policy: self.failure_policy(),
                cause: format!("injected failure in batch {index}").into(),
            };
        }

        let mut rows = self.store.inner.rows.lock().unwrap();
        for record in batch {
            let row = rows.entry(record.siret.clone()).or_insert_with(|| StoredRow {
                siren: record.siren.clone(),
                ..StoredRow::default()
            });
            row.numero_voie = record.numero_voie.clone();
            row.type_voie = record.type_voie.clone();
            row.libelle_voie = record.libelle_voie.clone();
            row.code_postal = record.code_postal.clone();
            row.libelle_commune = record.libelle_commune.clone();
        }

        WriteOutcome::Committed { rows: batch.len() }
    }
}

/// Name updates by SIREN, all-or-nothing per batch
pub struct MemoryUpdateWriter {
    store: MemoryStore,
    fail_batches: HashSet<usize>,
    poison_siren: Option<String>,
    next_batch: usize,
}

impl MemoryUpdateWriter {
    pub fn failing_batch(mut self, index: usize) -> Self {
        self.fail_batches.insert(index);
        self
    }

    /// Fail mid-batch when this SIREN is reached, after earlier updates ran
    pub fn poisoned(mut self, siren: &str) -> Self {
        self.poison_siren = Some(siren.to_string());
        self
    }
}

#[async_trait]
impl BatchWriter for MemoryUpdateWriter {
    type Record = LegalUnitRecord;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::RollbackBatch
    }

    async fn write_batch(&mut self, batch: &[LegalUnitRecord]) -> WriteOutcome {
        let index = self.next_batch;
        self.next_batch += 1;
        self.store.record_batch(batch.len());

        let mut rows = self.store.inner.rows.lock().unwrap();
        let mut staged = rows.clone();

        for record in batch {
            if self.poison_siren.as_deref() == Some(record.siren.as_str()) {
                return WriteOutcome::Failed {
                    policy: self.failure_policy(),
                    cause: format!("injected failure on siren {}", record.siren).into(),
                };
            }

            for row in staged
                .values_mut()
                .filter(|row| row.siren.as_deref() == Some(record.siren.as_str()))
            {
                row.nom = record.nom.clone();
                row.prenom_usuel = record.prenom_usuel.clone();
                row.denomination = record.denomination.clone();
            }
        }

        if self.fail_batches.contains(&index) {
            return WriteOutcome::Failed {
                policy: self.failure_policy(),
                cause: format!("injected failure in batch {index}").into(),
            };
        }

        *rows = staged;
        WriteOutcome::Committed { rows: batch.len() }
    }
}

/// Captures every progress callback
#[derive(Default)]
pub struct RecordingProgress {
    pub events: Mutex<Vec<(RecordKind, u64)>>,
    pub finished: Mutex<Vec<RecordKind>>,
    pub aborted: Mutex<Vec<RecordKind>>,
}

impl ProgressSink for RecordingProgress {
    fn advanced(&self, kind: RecordKind, rows_written: u64) {
        self.events.lock().unwrap().push((kind, rows_written));
    }

    fn finished(&self, kind: RecordKind, _stats: &PipelineStats) {
        self.finished.lock().unwrap().push(kind);
    }

    fn aborted(&self, kind: RecordKind) {
        self.aborted.lock().unwrap().push(kind);
    }
}

/// Establishment CSV line
pub fn establishment_line(siren: &str, siret: &str, commune: &str, status: &str) -> String {
    format!("{siren},{siret},12,RUE,DE LA PAIX,75002,{commune},{status}")
}

/// Legal unit CSV line
pub fn legal_unit_line(siren: &str, nom: &str, denomination: &str, status: &str) -> String {
    format!("{siren},{nom},,{denomination},{status}")
}

pub fn csv(header: &str, lines: &[String]) -> String {
    let mut out = String::from(header);
    out.push('\n');
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}
