//! Scan scheduler tests over the in-memory catalog and schedule stores.

mod common;

use std::str::FromStr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use percept::analysis::{AnalysisDeps, AnalysisService};
use percept::jobs::JobQueue;
use percept::media::ContentError;
use percept::providers::{GeoPoint, GeolocationProvider, Providers};
use percept::scan::{
    ScanCadence, ScanError, ScanKind, ScanRunStatus, Scanner, SchedulePatch, ScheduleStore,
};
use percept::store::memory::{
    MemoryAnalysisStore, MemoryFaceStore, MemoryFileCatalog, MemoryMarkerStore,
    MemoryScheduleStore, MemorySearchIndex,
};
use percept::store::{
    AnalysisStatus, AnalysisStore, CatalogEntry, FileCatalog, StoreError,
};

struct ScanHarness {
    scanner: Scanner,
    schedules: Arc<MemoryScheduleStore>,
    catalog: Arc<MemoryFileCatalog>,
    records: Arc<MemoryAnalysisStore>,
    geolocation: Arc<StaticGeolocation>,
}

fn scan_harness(tmp: &std::path::Path, schedules: Arc<MemoryScheduleStore>) -> ScanHarness {
    let catalog = Arc::new(MemoryFileCatalog::new());
    let records = Arc::new(MemoryAnalysisStore::new());
    let geolocation = Arc::new(StaticGeolocation::new(Some(GeoPoint {
        latitude: 40.4,
        longitude: -3.7,
        place: Some("Madrid".to_string()),
    })));

    let analysis = AnalysisService::new(
        AnalysisDeps {
            queue: Arc::new(JobQueue::new(2)),
            records: records.clone(),
            markers: Arc::new(MemoryMarkerStore::new()),
            faces: Arc::new(MemoryFaceStore::new()),
            search: Arc::new(MemorySearchIndex::new()),
            providers: Providers::disabled(),
            toolkit: Arc::new(MockToolkit::new(0)),
        },
        settings_in(tmp),
    );

    let scanner = Scanner::new(
        schedules.clone(),
        catalog.clone(),
        records.clone(),
        analysis,
        geolocation.clone(),
    );

    ScanHarness {
        scanner,
        schedules,
        catalog,
        records,
        geolocation,
    }
}

fn entry(file_id: &str, content_type: &str) -> CatalogEntry {
    CatalogEntry {
        file_id: file_id.to_string(),
        content_type: content_type.to_string(),
        has_faces: false,
        has_tags: false,
        has_location: false,
        analysis_completed: false,
    }
}

#[tokio::test]
async fn geolocation_scan_filters_candidates() {
    let tmp = tempfile::tempdir().unwrap();
    let h = scan_harness(tmp.path(), Arc::new(MemoryScheduleStore::new()));

    // Eligible: image and video without a location.
    h.catalog.insert(entry("img-1", "image/jpeg"), vec![1]);
    h.catalog.insert(entry("vid-1", "video/mp4"), vec![2]);
    // Excluded: already located, audio, unsupported content type.
    let mut located = entry("img-2", "image/png");
    located.has_location = true;
    h.catalog.insert(located, vec![3]);
    h.catalog.insert(entry("aud-1", "audio/mpeg"), vec![4]);
    h.catalog.insert(entry("doc-1", "application/pdf"), vec![5]);

    // img-1 already has a record; the extracted point lands on it.
    h.records
        .upsert_pending("img-1", percept::media::MediaKind::Image)
        .await
        .unwrap();

    let outcome = h
        .scanner
        .run_scan(ScanKind::GeolocationExtraction)
        .await
        .unwrap();

    assert_eq!(outcome.files_processed, 2);
    assert!(outcome.error.is_none());
    assert_eq!(h.geolocation.calls.load(Ordering::SeqCst), 2);

    let record = h.records.get("img-1").await.unwrap().unwrap();
    assert_eq!(
        record.location.unwrap().place.as_deref(),
        Some("Madrid")
    );

    let schedule = h
        .schedules
        .get(ScanKind::GeolocationExtraction)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.last_status, Some(ScanRunStatus::Completed));
    assert_eq!(schedule.last_count, Some(2));
    assert!(schedule.last_error.is_none());
    assert!(schedule.last_run_at.is_some());
}

#[tokio::test]
async fn auto_tagging_scan_resubmits_through_orchestrator() {
    let tmp = tempfile::tempdir().unwrap();
    let h = scan_harness(tmp.path(), Arc::new(MemoryScheduleStore::new()));

    h.catalog.insert(entry("img-1", "image/jpeg"), vec![1]);
    h.catalog.insert(entry("img-2", "image/jpeg"), vec![2]);
    let mut tagged = entry("img-3", "image/jpeg");
    tagged.has_tags = true;
    h.catalog.insert(tagged, vec![3]);

    let outcome = h.scanner.run_scan(ScanKind::AutoTagging).await.unwrap();
    assert_eq!(outcome.files_processed, 2);

    // Both eligible files went through the full pipeline.
    wait_for_status(&h.records, "img-1", AnalysisStatus::Completed).await;
    wait_for_status(&h.records, "img-2", AnalysisStatus::Completed).await;
    assert!(h.records.get("img-3").await.unwrap().is_none());

    // The geolocation provider is only consulted by geolocation scans.
    assert_eq!(h.geolocation.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn full_analysis_scan_includes_audio() {
    let tmp = tempfile::tempdir().unwrap();
    let h = scan_harness(tmp.path(), Arc::new(MemoryScheduleStore::new()));

    h.catalog.insert(entry("aud-1", "audio/mpeg"), vec![1]);
    let mut done = entry("img-1", "image/jpeg");
    done.analysis_completed = true;
    h.catalog.insert(done, vec![2]);

    let outcome = h.scanner.run_scan(ScanKind::FullAnalysis).await.unwrap();
    assert_eq!(outcome.files_processed, 1);
    wait_for_status(&h.records, "aud-1", AnalysisStatus::Completed).await;
}

#[tokio::test]
async fn missing_schedule_row_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let h = scan_harness(tmp.path(), Arc::new(MemoryScheduleStore::unseeded()));

    let result = h.scanner.run_scan(ScanKind::AutoTagging).await;
    assert!(matches!(result, Err(ScanError::UnknownSchedule(_))));
}

#[tokio::test]
async fn unknown_scan_type_string_is_rejected() {
    assert!(matches!(
        ScanKind::from_str("reticulate_splines"),
        Err(ScanError::UnknownScanType(_))
    ));
}

/// Catalog whose enumeration always fails.
struct BrokenCatalog;

#[async_trait]
impl FileCatalog for BrokenCatalog {
    async fn list(&self) -> Result<Vec<CatalogEntry>, StoreError> {
        Err(StoreError::Backend("catalog db offline".to_string()))
    }
    async fn fetch(&self, _: &str) -> Result<Vec<u8>, ContentError> {
        Err(ContentError::Unavailable("catalog db offline".to_string()))
    }
}

#[tokio::test]
async fn enumeration_failure_marks_row_failed_and_reraises() {
    let tmp = tempfile::tempdir().unwrap();
    let schedules = Arc::new(MemoryScheduleStore::new());
    let records = Arc::new(MemoryAnalysisStore::new());

    let analysis = AnalysisService::new(
        AnalysisDeps {
            queue: Arc::new(JobQueue::new(1)),
            records: records.clone(),
            markers: Arc::new(MemoryMarkerStore::new()),
            faces: Arc::new(MemoryFaceStore::new()),
            search: Arc::new(MemorySearchIndex::new()),
            providers: Providers::disabled(),
            toolkit: Arc::new(MockToolkit::new(0)),
        },
        settings_in(tmp.path()),
    );
    let scanner = Scanner::new(
        schedules.clone(),
        Arc::new(BrokenCatalog),
        records,
        analysis,
        Arc::new(StaticGeolocation::new(None)),
    );

    let result = scanner.run_scan(ScanKind::FaceRecognition).await;
    assert!(matches!(result, Err(ScanError::Enumeration(_))));

    let schedule = schedules
        .get(ScanKind::FaceRecognition)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.last_status, Some(ScanRunStatus::Failed));
    assert!(schedule
        .last_error
        .as_deref()
        .unwrap()
        .contains("catalog db offline"));
}

#[tokio::test]
async fn per_file_failures_do_not_abort_the_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let h = scan_harness(tmp.path(), Arc::new(MemoryScheduleStore::new()));

    // One entry has no stored bytes, so its direct geolocation call fails;
    // the other still processes and the row completes.
    h.catalog.insert_entry_only(entry("img-broken", "image/jpeg"));
    h.catalog.insert(entry("img-ok", "image/jpeg"), vec![1]);

    let outcome = h
        .scanner
        .run_scan(ScanKind::GeolocationExtraction)
        .await
        .unwrap();
    assert_eq!(outcome.files_processed, 1);

    let schedule = h
        .schedules
        .get(ScanKind::GeolocationExtraction)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(schedule.last_status, Some(ScanRunStatus::Completed));
    assert_eq!(schedule.last_count, Some(1));
}

#[tokio::test]
async fn manual_cadence_never_fires_automatically() {
    let tmp = tempfile::tempdir().unwrap();
    let schedules = Arc::new(MemoryScheduleStore::new());
    let h = scan_harness(tmp.path(), schedules.clone());

    h.catalog.insert(entry("img-1", "image/jpeg"), vec![1]);

    // All four seeded rows are manual; a check fires nothing.
    h.scanner.check_scheduled_scans().await;
    h.scanner.drain().await;

    for kind in ScanKind::ALL {
        let schedule = schedules.get(kind).await.unwrap().unwrap();
        assert!(schedule.last_run_at.is_none());
    }
    assert!(h.records.is_empty());
}

#[tokio::test]
async fn disabled_schedule_never_fires() {
    let tmp = tempfile::tempdir().unwrap();
    let schedules = Arc::new(MemoryScheduleStore::new());
    // Hourly cadence would fire at minute zero, but the row is disabled;
    // this stays deterministic regardless of the wall clock.
    schedules
        .update(
            ScanKind::AutoTagging,
            SchedulePatch {
                cadence: Some(ScanCadence::Hourly),
                enabled: Some(false),
                ..SchedulePatch::default()
            },
        )
        .await
        .unwrap();

    let h = scan_harness(tmp.path(), schedules.clone());
    h.catalog.insert(entry("img-1", "image/jpeg"), vec![1]);

    h.scanner.check_scheduled_scans().await;
    h.scanner.drain().await;

    let schedule = schedules.get(ScanKind::AutoTagging).await.unwrap().unwrap();
    assert!(schedule.last_run_at.is_none());
    assert!(h.records.is_empty());
}
