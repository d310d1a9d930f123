//! End-to-end pipeline behaviour against an in-memory store

mod common;

use std::sync::Arc;

use common::{
    csv, establishment_line, legal_unit_line, MemoryStore, RecordingProgress,
    ESTABLISHMENT_HEADER, LEGAL_UNIT_HEADER,
};
use sirene_ingest::progress::{NoProgress, ProgressSink};
use sirene_ingest::{
    run_pipeline, BatchAccumulator, BatchWriter, CsvRecordSource, EstablishmentRecord,
    IngestError, LegalUnitRecord, PipelineStats, RecordKind,
};

async fn ingest_establishments<W>(input: &str, writer: W, capacity: usize) -> PipelineStats
where
    W: BatchWriter<Record = EstablishmentRecord>,
{
    let source = CsvRecordSource::for_record::<EstablishmentRecord>(input.as_bytes(), b',')
        .await
        .expect("header should validate");
    let accumulator = BatchAccumulator::new(writer, capacity, Arc::new(NoProgress)).unwrap();
    run_pipeline(source, accumulator, &NoProgress).await.unwrap()
}

async fn ingest_legal_units<W>(input: &str, writer: W, capacity: usize) -> PipelineStats
where
    W: BatchWriter<Record = LegalUnitRecord>,
{
    let source = CsvRecordSource::for_record::<LegalUnitRecord>(input.as_bytes(), b',')
        .await
        .expect("header should validate");
    let accumulator = BatchAccumulator::new(writer, capacity, Arc::new(NoProgress)).unwrap();
    run_pipeline(source, accumulator, &NoProgress).await.unwrap()
}

fn active_establishments(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| establishment_line(&format!("{:09}", i), &format!("{:014}", i), "PARIS", "A"))
        .collect()
}

#[tokio::test]
async fn test_batches_are_full_except_the_last() {
    let store = MemoryStore::new();
    let input = csv(ESTABLISHMENT_HEADER, &active_establishments(12_001));

    let stats = ingest_establishments(&input, store.upsert_writer(), 5000).await;

    assert_eq!(store.batch_sizes(), vec![5000, 5000, 2001]);
    assert_eq!(stats.rows_read, 12_001);
    assert_eq!(stats.batches.batches_committed, 3);
    assert_eq!(stats.batches.rows_committed, 12_001);
    assert!(stats.batches.peak_buffered <= 5000);
    assert_eq!(store.len(), 12_001);
}

#[tokio::test]
async fn test_last_occurrence_wins_and_inactive_rows_are_skipped() {
    let store = MemoryStore::new();
    let input = csv(
        ESTABLISHMENT_HEADER,
        &[
            establishment_line("111111111", "A", "PARIS", "A"),
            establishment_line("222222222", "B", "NANTES", "F"),
            establishment_line("111111111", "A", "LYON", "A"),
        ],
    );

    let stats = ingest_establishments(&input, store.upsert_writer(), 5000).await;

    assert_eq!(stats.rows_accepted, 2);
    assert_eq!(stats.rows_rejected, 1);
    assert_eq!(store.get("A").unwrap().libelle_commune.as_deref(), Some("LYON"));
    assert!(store.get("B").is_none());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_last_occurrence_wins_across_batches() {
    let store = MemoryStore::new();
    let input = csv(
        ESTABLISHMENT_HEADER,
        &[
            establishment_line("111111111", "A", "PARIS", "A"),
            establishment_line("333333333", "C", "LILLE", "A"),
            establishment_line("111111111", "A", "LYON", "A"),
        ],
    );

    ingest_establishments(&input, store.upsert_writer(), 1).await;

    assert_eq!(store.batch_sizes(), vec![1, 1, 1]);
    assert_eq!(store.get("A").unwrap().libelle_commune.as_deref(), Some("LYON"));
}

#[tokio::test]
async fn test_rerunning_an_extract_is_idempotent() {
    let store = MemoryStore::new();
    let input = csv(ESTABLISHMENT_HEADER, &active_establishments(250));

    ingest_establishments(&input, store.upsert_writer(), 100).await;
    let first = store.snapshot();

    ingest_establishments(&input, store.upsert_writer(), 100).await;
    assert_eq!(store.snapshot(), first);
    assert_eq!(first.len(), 250);
}

#[tokio::test]
async fn test_dropped_batch_does_not_stop_the_pipeline() {
    let store = MemoryStore::new();
    let input = csv(ESTABLISHMENT_HEADER, &active_establishments(5));

    let stats = ingest_establishments(&input, store.upsert_writer().failing_batch(1), 2).await;

    assert_eq!(store.batch_sizes(), vec![2, 2, 1]);
    assert_eq!(stats.batches.batches_failed, 1);
    assert_eq!(stats.batches.rows_lost, 2);
    assert_eq!(stats.batches.rows_committed, 3);

    let stored: Vec<String> = store.snapshot().into_keys().collect();
    assert_eq!(
        stored,
        vec![format!("{:014}", 0), format!("{:014}", 1), format!("{:014}", 4)]
    );
}

#[tokio::test]
async fn test_legal_units_update_every_matching_row() {
    let store = MemoryStore::new();
    let establishments = csv(
        ESTABLISHMENT_HEADER,
        &[
            establishment_line("111111111", "11111111100011", "PARIS", "A"),
            establishment_line("111111111", "11111111100029", "LYON", "A"),
            establishment_line("222222222", "22222222200017", "NANTES", "A"),
        ],
    );
    ingest_establishments(&establishments, store.upsert_writer(), 5000).await;

    let legal_units = csv(
        LEGAL_UNIT_HEADER,
        &[
            legal_unit_line("111111111", "", "ACME", "A"),
            legal_unit_line("999999999", "", "GHOST", "A"),
        ],
    );
    let stats = ingest_legal_units(&legal_units, store.update_writer(), 1000).await;

    assert_eq!(stats.batches.batches_failed, 0);
    for siret in ["11111111100011", "11111111100029"] {
        let row = store.get(siret).unwrap();
        assert_eq!(row.denomination.as_deref(), Some("ACME"));
        assert_eq!(row.nom, None);
    }
    assert_eq!(store.get("22222222200017").unwrap().denomination, None);

    // updates never create rows
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_rolled_back_batch_leaves_no_partial_updates() {
    let store = MemoryStore::new();
    let establishments = csv(
        ESTABLISHMENT_HEADER,
        &[
            establishment_line("100000001", "10000000100011", "PARIS", "A"),
            establishment_line("100000002", "10000000200011", "PARIS", "A"),
            establishment_line("100000003", "10000000300011", "PARIS", "A"),
            establishment_line("100000004", "10000000400011", "PARIS", "A"),
            establishment_line("100000005", "10000000500011", "PARIS", "A"),
        ],
    );
    ingest_establishments(&establishments, store.upsert_writer(), 5000).await;

    let legal_units = csv(
        LEGAL_UNIT_HEADER,
        &[
            legal_unit_line("100000001", "", "ONE", "A"),
            legal_unit_line("100000002", "", "TWO", "A"),
            legal_unit_line("100000003", "", "THREE", "A"),
            legal_unit_line("100000004", "", "FOUR", "A"),
            legal_unit_line("100000005", "", "FIVE", "A"),
        ],
    );
    let stats =
        ingest_legal_units(&legal_units, store.update_writer().poisoned("100000004"), 2).await;

    assert_eq!(stats.batches.batches_dispatched, 3);
    assert_eq!(stats.batches.batches_failed, 1);
    assert_eq!(stats.batches.rows_lost, 2);

    let names: Vec<Option<String>> = store
        .snapshot()
        .into_values()
        .map(|row| row.denomination)
        .collect();
    assert_eq!(
        names,
        vec![
            Some("ONE".to_string()),
            Some("TWO".to_string()),
            None,
            None,
            Some("FIVE".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_legal_unit_predicate() {
    let store = MemoryStore::new();
    let legal_units = csv(
        LEGAL_UNIT_HEADER,
        &[
            legal_unit_line("100000001", "DUPONT", "", "A"),
            legal_unit_line("100000002", "", "CLOSED", "C"),
            legal_unit_line("100000003", "", "", "A"),
            legal_unit_line("", "", "NOKEY", "A"),
        ],
    );

    let stats = ingest_legal_units(&legal_units, store.update_writer(), 10).await;

    assert_eq!(stats.rows_read, 4);
    assert_eq!(stats.rows_accepted, 1);
    assert_eq!(stats.rows_rejected, 3);
    assert_eq!(store.batch_sizes(), vec![1]);
}

#[tokio::test]
async fn test_predicates_see_untrimmed_values() {
    let store = MemoryStore::new();
    let establishments = csv(
        ESTABLISHMENT_HEADER,
        &[
            "111111111,11111111100011,,,,,PARIS,\" A\"".to_string(),
            establishment_line("222222222", "22222222200017", "LYON", "A"),
        ],
    );
    let stats = ingest_establishments(&establishments, store.upsert_writer(), 10).await;

    assert_eq!(stats.rows_rejected, 1);
    assert!(store.get("11111111100011").is_none());

    let legal_units = csv(
        LEGAL_UNIT_HEADER,
        &["222222222,,,\"   \",A".to_string()],
    );
    let stats = ingest_legal_units(&legal_units, store.update_writer(), 10).await;

    assert_eq!(stats.rows_accepted, 1);
    assert_eq!(
        store.get("22222222200017").unwrap().denomination.as_deref(),
        Some("   ")
    );
}

#[tokio::test]
async fn test_progress_reports_cumulative_committed_rows() {
    let store = MemoryStore::new();
    let progress = Arc::new(RecordingProgress::default());
    let sink: Arc<dyn ProgressSink> = progress.clone();

    let input = csv(ESTABLISHMENT_HEADER, &active_establishments(7));
    let source = CsvRecordSource::for_record::<EstablishmentRecord>(input.as_bytes(), b',')
        .await
        .unwrap();
    let accumulator =
        BatchAccumulator::new(store.upsert_writer().failing_batch(1), 3, sink.clone()).unwrap();
    run_pipeline(source, accumulator, sink.as_ref()).await.unwrap();

    let events = progress.events.lock().unwrap().clone();
    assert_eq!(
        events,
        vec![(RecordKind::Establishment, 3), (RecordKind::Establishment, 4)]
    );
    assert_eq!(*progress.finished.lock().unwrap(), vec![RecordKind::Establishment]);
    assert!(progress.aborted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_read_error_aborts_after_committed_batches() {
    let store = MemoryStore::new();
    let progress = Arc::new(RecordingProgress::default());
    let mut lines = active_establishments(4);
    lines.push("999,999".to_string());
    lines.extend(active_establishments(2));
    let input = csv(ESTABLISHMENT_HEADER, &lines);

    let source = CsvRecordSource::for_record::<EstablishmentRecord>(input.as_bytes(), b',')
        .await
        .unwrap();
    let accumulator =
        BatchAccumulator::new(store.upsert_writer(), 2, Arc::new(NoProgress)).unwrap();
    let err = run_pipeline(source, accumulator, progress.as_ref())
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::Read { .. }));
    assert_eq!(err.stage(), "read");
    assert_eq!(store.len(), 4);
    assert_eq!(*progress.aborted.lock().unwrap(), vec![RecordKind::Establishment]);
    assert!(progress.finished.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_reads_extract_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("StockUniteLegale_utf8.csv");
    std::fs::write(
        &path,
        csv(LEGAL_UNIT_HEADER, &[legal_unit_line("100000001", "DUPONT", "", "A")]),
    )
    .unwrap();

    let store = MemoryStore::new();
    let source = CsvRecordSource::from_path::<LegalUnitRecord>(&path, b',')
        .await
        .unwrap();
    let accumulator =
        BatchAccumulator::new(store.update_writer(), 10, Arc::new(NoProgress)).unwrap();
    let stats = run_pipeline(source, accumulator, &NoProgress).await.unwrap();

    assert_eq!(stats.kind, RecordKind::LegalUnit);
    assert_eq!(stats.batches.rows_committed, 1);
}
