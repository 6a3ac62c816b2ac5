use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use archiver::testing::{video_probe, MockProbe, MockTranscoder};
use archiver::{BatchConfig, BatchOrchestrator, DetectionMode, FileState, Manifest};
use tempfile::TempDir;
use walkdir::WalkDir;

const A_OUTPUT: &str = "Proj_A_10bit_1920x1080_2021-01-01.mov";
const C_OUTPUT: &str = "Proj_C_8bit_1280x720_2022-03-04.mov";

fn project() -> (TempDir, BatchConfig) {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("media/old")).unwrap();
    let cfg = BatchConfig {
        project_id: Some("Proj".to_string()),
        ..BatchConfig::for_project(dir.path())
    };
    (dir, cfg)
}

fn media(dir: &TempDir, name: &str) -> PathBuf {
    dir.path().join("media").join(name)
}

fn standard_probe() -> MockProbe {
    MockProbe::new()
        .with("A.mp4", video_probe(Some(10), Some((1920, 1080)), Some("2021-01-01T09:30:00.000000Z")))
        .with("B.mp4", video_probe(Some(8), Some((3840, 2160)), None))
        .with("C.mp4", video_probe(Some(8), Some((1280, 720)), Some("2022-03-04T18:00:00Z")))
}

fn orchestrator(cfg: &BatchConfig, transcoder: &Arc<MockTranscoder>) -> BatchOrchestrator {
    BatchOrchestrator::new(cfg.clone(), Arc::new(standard_probe()), transcoder.clone())
}

// Relative path -> contents for every file under the project
fn tree(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[tokio::test]
async fn test_scenario_a_transcodes_and_archives() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "A.mp4"), b"original A bytes").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    let a = report.file("A.mp4").unwrap();
    assert_eq!(a.state, FileState::Archived);
    assert!(a.transcoded);
    assert_eq!(a.output.as_deref(), Some(media(&dir, A_OUTPUT).as_path()));
    assert!(media(&dir, A_OUTPUT).exists());
    assert!(!media(&dir, "A.mp4").exists());
    assert_eq!(fs::read(media(&dir, "old/A.mp4")).unwrap(), b"original A bytes");

    let job = &transcoder.jobs()[0];
    assert_eq!(job.codec, "prores");
    assert_eq!(job.input, media(&dir, "A.mp4"));

    let manifest = Manifest::load(&cfg.state_path()).unwrap();
    let record = manifest.get("A.mp4").unwrap();
    assert_eq!(record.state, FileState::Archived);
    assert_eq!(record.output_name.as_deref(), Some(A_OUTPUT));
    assert_eq!(record.run_id, report.run_id);
}

#[tokio::test]
async fn test_scenario_b_missing_creation_date_uses_sentinel() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "B.mp4"), b"b").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    let b = report.file("B.mp4").unwrap();
    assert_eq!(b.state, FileState::Archived);
    assert!(media(&dir, "Proj_B_8bit_3840x2160_NA.mov").exists());
    assert_eq!(b.missing_fields, vec![archiver::MetadataField::CreationDate]);
}

#[tokio::test]
async fn test_unprobeable_file_gets_all_sentinels() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "X.mov"), b"x").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    assert_eq!(report.file("X.mov").unwrap().state, FileState::Archived);
    assert!(media(&dir, "Proj_X_NA_NA_NA.mov").exists());
    assert!(media(&dir, "old/X.mov").exists());
}

#[tokio::test]
async fn test_rerun_with_output_present_resumes_archiving() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "C.mp4"), b"c original").unwrap();
    // Output left behind by an interrupted run that never reached archiving
    fs::write(media(&dir, C_OUTPUT), b"c transcoded").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    assert!(transcoder.jobs().is_empty());
    let c = report.file("C.mp4").unwrap();
    assert_eq!(c.state, FileState::Archived);
    assert!(!c.transcoded);
    assert_eq!(fs::read(media(&dir, C_OUTPUT)).unwrap(), b"c transcoded");
    assert_eq!(fs::read(media(&dir, "old/C.mp4")).unwrap(), b"c original");
    // The output itself is never treated as a source
    assert!(report.file(C_OUTPUT).is_none());
}

#[tokio::test]
async fn test_collision_keeps_both_files_and_rerun_does_not_retranscode() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "C.mp4"), b"new C").unwrap();
    fs::write(media(&dir, "old/C.mp4"), b"archived earlier").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let first = orchestrator(&cfg, &transcoder).run().await.unwrap();

    let c = first.file("C.mp4").unwrap();
    assert_eq!(c.state, FileState::ArchiveFailed);
    assert!(c.reason.as_deref().unwrap_or_default().contains("already exists"));
    assert_eq!(fs::read(media(&dir, "C.mp4")).unwrap(), b"new C");
    assert_eq!(fs::read(media(&dir, "old/C.mp4")).unwrap(), b"archived earlier");
    assert!(media(&dir, C_OUTPUT).exists());
    assert!(first.has_failures());

    // Clear the collision and run again
    fs::rename(media(&dir, "old/C.mp4"), dir.path().join("C-earlier.mp4")).unwrap();
    let second = orchestrator(&cfg, &transcoder).run().await.unwrap();

    assert_eq!(second.file("C.mp4").unwrap().state, FileState::Archived);
    assert_eq!(transcoder.inputs(), vec!["C.mp4"]);
    assert_eq!(fs::read(media(&dir, "old/C.mp4")).unwrap(), b"new C");
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn test_transcode_failure_does_not_stop_batch() {
    let (dir, cfg) = project();
    for name in ["A.mp4", "B.mp4", "C.mp4"] {
        fs::write(media(&dir, name), name.as_bytes()).unwrap();
    }
    let transcoder = Arc::new(MockTranscoder::new().failing_on("B.mp4"));

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    assert_eq!(transcoder.inputs(), vec!["A.mp4", "B.mp4", "C.mp4"]);
    assert_eq!(report.file("A.mp4").unwrap().state, FileState::Archived);
    assert_eq!(report.file("B.mp4").unwrap().state, FileState::TranscodeFailed);
    assert_eq!(report.file("C.mp4").unwrap().state, FileState::Archived);
    assert!(media(&dir, "B.mp4").exists());
    assert!(!media(&dir, "old/B.mp4").exists());
    assert_eq!(report.count(FileState::Archived), 2);

    let manifest = Manifest::load(&cfg.state_path()).unwrap();
    assert_eq!(manifest.get("B.mp4").unwrap().state, FileState::TranscodeFailed);
}

#[tokio::test]
async fn test_failed_transcode_is_retried_on_rerun() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "B.mp4"), b"b").unwrap();

    let failing = Arc::new(MockTranscoder::new().failing_on("B.mp4"));
    orchestrator(&cfg, &failing).run().await.unwrap();

    let working = Arc::new(MockTranscoder::new());
    let report = orchestrator(&cfg, &working).run().await.unwrap();

    assert_eq!(report.file("B.mp4").unwrap().state, FileState::Archived);
    assert_eq!(working.inputs(), vec!["B.mp4"]);
}

#[tokio::test]
async fn test_dry_run_mutates_nothing() {
    let (dir, mut cfg) = project();
    cfg.dry_run = true;
    fs::write(media(&dir, "A.mp4"), b"a").unwrap();
    fs::write(media(&dir, "B.mp4"), b"b").unwrap();
    fs::write(media(&dir, ".stale.partial.mov"), b"stale").unwrap();
    let before = tree(dir.path());
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    assert!(report.dry_run);
    assert_eq!(report.count(FileState::Planned), 2);
    assert_eq!(report.file("A.mp4").unwrap().output.as_deref(), Some(media(&dir, A_OUTPUT).as_path()));
    assert!(transcoder.jobs().is_empty());
    assert_eq!(tree(dir.path()), before);
    assert!(!cfg.state_path().exists());
}

#[tokio::test]
async fn test_archived_record_skips_even_after_output_moved_away() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "A.mp4"), b"a").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());
    orchestrator(&cfg, &transcoder).run().await.unwrap();

    // Output delivered elsewhere, and a file with the same name shows up again
    fs::rename(media(&dir, A_OUTPUT), dir.path().join(A_OUTPUT)).unwrap();
    fs::write(media(&dir, "A.mp4"), b"a again").unwrap();

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    let a = report.file("A.mp4").unwrap();
    assert_eq!(a.state, FileState::Skipped);
    assert_eq!(transcoder.jobs().len(), 1);
    assert_eq!(fs::read(media(&dir, "A.mp4")).unwrap(), b"a again");
}

#[tokio::test]
async fn test_token_mode_skips_on_shared_token() {
    let (dir, mut cfg) = project();
    cfg.detection = DetectionMode::Token;
    fs::write(media(&dir, "clip_20210101_8bit_1920x1080_2021-01-01.mov"), b"clip").unwrap();
    fs::write(media(&dir, "other_20210101.mp4"), b"other").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    let other = report.file("other_20210101.mp4").unwrap();
    assert_eq!(other.state, FileState::Skipped);
    assert!(other.reason.as_deref().unwrap_or_default().contains("20210101"));
    assert!(transcoder.jobs().is_empty());
    assert!(media(&dir, "other_20210101.mp4").exists());
}

#[tokio::test]
async fn test_ignored_entries_are_reported() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "notes.txt"), b"n").unwrap();
    fs::write(media(&dir, ".hidden.mp4"), b"h").unwrap();
    fs::write(media(&dir, "A.mp4"), b"a").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();

    assert_eq!(report.files.len(), 1);
    let ignored: Vec<_> = report
        .ignored
        .iter()
        .filter_map(|(p, _)| p.file_name().and_then(|n| n.to_str()))
        .collect();
    assert!(ignored.contains(&"notes.txt"));
    assert!(ignored.contains(&".hidden.mp4"));
}

#[tokio::test]
async fn test_report_serializes_to_json() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "A.mp4"), b"a").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    let report = orchestrator(&cfg, &transcoder).run().await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["project_id"], "Proj");
    assert_eq!(json["files"][0]["state"], "archived");
    assert_eq!(json["cancelled"], false);
}

#[tokio::test]
async fn test_same_stem_sources_never_share_an_output() {
    let (dir, cfg) = project();
    let meta = video_probe(Some(10), Some((1920, 1080)), Some("2021-01-01T00:00:00Z"));
    let probe = Arc::new(MockProbe::new().with("A.mov", meta.clone()).with("A.mp4", meta));
    fs::write(media(&dir, "A.mov"), b"mov").unwrap();
    fs::write(media(&dir, "A.mp4"), b"mp4").unwrap();
    let transcoder = Arc::new(MockTranscoder::new());

    for _ in 0..2 {
        let report = BatchOrchestrator::new(cfg.clone(), probe.clone(), transcoder.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(report.file("A.mp4").unwrap().state, FileState::TranscodeFailed);
    }

    assert_eq!(fs::read(media(&dir, "old/A.mov")).unwrap(), b"mov");
    assert_eq!(fs::read(media(&dir, "A.mp4")).unwrap(), b"mp4");
    assert_eq!(fs::read(media(&dir, A_OUTPUT)).unwrap(), b"prores:A.mov");
}

#[tokio::test]
async fn test_shorter_stem_does_not_claim_longer_stems_output() {
    let (dir, cfg) = project();
    let output = "Proj_my_clip_10bit_1920x1080_2021-01-01.mov";
    fs::write(media(&dir, "my.mp4"), b"my").unwrap();
    fs::write(media(&dir, "my_clip.mp4"), b"my clip").unwrap();
    fs::write(media(&dir, output), b"clip transcoded").unwrap();
    let probe = MockProbe::new().with("my.mp4", video_probe(Some(8), Some((1280, 720)), None));
    let transcoder = Arc::new(MockTranscoder::new());

    let report = BatchOrchestrator::new(cfg.clone(), Arc::new(probe), transcoder.clone())
        .run()
        .await
        .unwrap();

    let my = report.file("my.mp4").unwrap();
    assert_eq!(my.state, FileState::Archived);
    assert!(my.transcoded);
    assert_eq!(my.output.as_deref(), Some(media(&dir, "Proj_my_8bit_1280x720_NA.mov").as_path()));
    assert!(!report.file("my_clip.mp4").unwrap().transcoded);
    assert_eq!(transcoder.inputs(), vec!["my.mp4"]);
    assert_eq!(fs::read(media(&dir, output)).unwrap(), b"clip transcoded");
}

#[tokio::test]
async fn test_prefixed_camera_original_is_processed() {
    let (dir, cfg) = project();
    fs::write(media(&dir, "Proj_shoot_day1_cam2_take3.mov"), b"raw").unwrap();
    let probe = MockProbe::new().with(
        "Proj_shoot_day1_cam2_take3.mov",
        video_probe(Some(10), Some((3840, 2160)), Some("2023-05-06T07:08:09Z")),
    );
    let transcoder = Arc::new(MockTranscoder::new());

    let report = BatchOrchestrator::new(cfg.clone(), Arc::new(probe), transcoder.clone())
        .run()
        .await
        .unwrap();

    assert!(report.ignored.is_empty());
    let take = report.file("Proj_shoot_day1_cam2_take3.mov").unwrap();
    assert_eq!(take.state, FileState::Archived);
    assert!(media(&dir, "Proj_Proj_shoot_day1_cam2_take3_10bit_3840x2160_2023-05-06.mov").exists());
    assert_eq!(fs::read(media(&dir, "old/Proj_shoot_day1_cam2_take3.mov")).unwrap(), b"raw");
}
