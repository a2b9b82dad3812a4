//! Pipeline integration tests: segmenter + playlist + HTTP surface.
//!
//! A shell script stands in for ffmpeg: it parses the same arguments the
//! real tool gets and writes chunk files plus the segment list.
//!
//! Run with: `cargo test`

#![cfg(unix)]

use std::fmt::Write as _;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use segserve::config::Config;
use segserve::error::SegError;
use segserve::orchestrator::{Orchestrator, Stage};
use segserve::playlist::{self, parse_chunk_uris};
use segserve::segmenter::{SegmentationJob, Segmenter};

fn tmp_dir() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

/// Locates the staging directory and segment list from the arguments.
const ARG_SCAN: &str = r#"#!/bin/sh
list=""; prev=""; out=""
for a in "$@"; do
  if [ "$prev" = "-segment_list" ]; then list="$a"; fi
  prev="$a"; out="$a"
done
dir=$(dirname "$out")
"#;

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("{ARG_SCAN}{body}")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    path
}

/// Fake ffmpeg producing one chunk per entry of `durations`.
fn fake_ffmpeg(dir: &Path, durations: &[f64]) -> PathBuf {
    let mut body = String::new();
    body.push_str("case \"$*\" in *\"-c copy -f segment\"*) ;; *) echo \"unexpected args: $*\" >&2; exit 2;; esac\n");
    let mut start = 0.0;
    for (i, d) in durations.iter().enumerate() {
        let end = start + d;
        writeln!(body, "printf 'chunk-{i:03}-payload' > \"$dir/segment{i:03}.ts\"").unwrap();
        writeln!(body, "printf 'segment{i:03}.ts,{start:.6},{end:.6}\\n' >> \"$list\"").unwrap();
        start = end;
    }
    body.push_str("exit 0\n");
    write_script(dir, "ffmpeg", &body)
}

fn config_for(dir: &Path, ffmpeg: PathBuf) -> Config {
    let source = dir.join("input.mp4");
    std::fs::write(&source, b"not really a video").expect("write source");

    let mut cfg = Config::default();
    cfg.source.path = source;
    cfg.segments.dir = dir.join("segments");
    cfg.segments.chunk_duration_secs = 3.0;
    cfg.segments.ffmpeg_path = ffmpeg;
    cfg.segments.timeout_secs = 5;
    cfg.playlist.path = dir.join("playlist.m3u8");
    cfg.http.listen = "127.0.0.1:0".parse().unwrap();
    cfg.validate().expect("valid config");
    cfg
}

async fn get(app: &axum::Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn chunk_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_nine_second_source_end_to_end() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0, 3.0, 3.0]);
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg.clone());

    let manifest = orch.prepare().await.expect("prepare");
    assert_eq!(manifest.len(), 3);
    assert_eq!(
        chunk_files(&cfg.segments.dir),
        vec!["segment000.ts", "segment001.ts", "segment002.ts"]
    );

    let on_disk = std::fs::read_to_string(&cfg.playlist.path).expect("playlist written");
    assert_eq!(on_disk.lines().next(), Some("#EXTM3U"));
    assert_eq!(on_disk.matches("#EXTINF:3.000,").count(), 3);
    assert_eq!(
        parse_chunk_uris(&on_disk).unwrap(),
        vec!["segments/segment000.ts", "segments/segment001.ts", "segments/segment002.ts"]
    );

    let app = orch.publish().expect("publish");
    assert_eq!(orch.stage(), Stage::Serving);

    let res = get(&app, "/playlist.m3u8").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "application/x-mpegURL");
    assert_eq!(body_to_string(res.into_body()).await, on_disk);

    let res = get(&app, "/segments/segment000.ts").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "video/MP2T");
    assert_eq!(body_to_string(res.into_body()).await, "chunk-000-payload");

    let res = app
        .clone()
        .oneshot(
            Request::get("/segments/segment000.ts")
                .header(header::RANGE, "bytes=0-3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "video/MP2T");
    assert_eq!(body_to_string(res.into_body()).await, "chun");
}

#[tokio::test]
async fn test_short_final_chunk_keeps_true_duration() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0, 3.0, 1.5]);
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg.clone());

    orch.prepare().await.expect("prepare");
    let text = std::fs::read_to_string(&cfg.playlist.path).unwrap();
    let entries = playlist::parse_entries(&text).unwrap();
    let durations: Vec<f64> = entries.iter().map(|e| e.duration).collect();
    assert_eq!(durations, vec![3.0, 3.0, 1.5]);
}

#[tokio::test]
async fn test_segmenter_indices_are_contiguous() {
    let dir = tmp_dir();
    let durations = vec![2.0; 12];
    let ffmpeg = fake_ffmpeg(dir.path(), &durations);
    let cfg = config_for(dir.path(), ffmpeg);

    let chunks = Segmenter::new(&cfg.segments)
        .run(SegmentationJob::from_config(&cfg))
        .await
        .expect("segment");

    assert_eq!(chunks.len(), 12);
    for (i, c) in chunks.iter().enumerate() {
        assert_eq!(c.index as usize, i);
        assert!(c.path.starts_with(&cfg.segments.dir));
        assert!(c.path.exists());
    }
    assert!(!cfg.segments.dir.join(".staging").exists());
}

#[tokio::test]
async fn test_stale_chunks_are_replaced() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0, 3.0]);
    let cfg = config_for(dir.path(), ffmpeg);
    std::fs::create_dir_all(&cfg.segments.dir).unwrap();
    std::fs::write(cfg.segments.dir.join("segment007.ts"), b"old").unwrap();
    std::fs::write(cfg.segments.dir.join("notes.txt"), b"keep").unwrap();

    let chunks = Segmenter::new(&cfg.segments)
        .run(SegmentationJob::from_config(&cfg))
        .await
        .expect("segment");

    assert_eq!(chunks.len(), 2);
    assert_eq!(
        chunk_files(&cfg.segments.dir),
        vec!["notes.txt", "segment000.ts", "segment001.ts"]
    );
}

#[tokio::test]
async fn test_tool_failure_surfaces_diagnostics() {
    let dir = tmp_dir();
    let ffmpeg = write_script(
        dir.path(),
        "ffmpeg",
        "echo 'input.mp4: Invalid data found when processing input' >&2\nexit 1\n",
    );
    let cfg = config_for(dir.path(), ffmpeg);
    std::fs::write(&cfg.playlist.path, "#EXTM3U\n").unwrap();
    let orch = Orchestrator::new(cfg.clone());

    let err = orch.prepare().await.unwrap_err();
    match err {
        SegError::SegmentationFailure { status, stderr } => {
            assert_eq!(status, Some(1));
            assert!(stderr.contains("Invalid data found"));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert!(matches!(orch.stage(), Stage::Failed(_)));
    assert!(!cfg.playlist.path.exists(), "stale playlist must be withdrawn");
    match orch.publish() {
        Err(SegError::NotReady(reason)) => assert!(reason.contains("Invalid data found"), "{reason}"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("published a failed job"),
    }
}

#[tokio::test]
async fn test_failed_job_answers_playlist_with_5xx() {
    let dir = tmp_dir();
    let ffmpeg = write_script(dir.path(), "ffmpeg", "exit 3\n");
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg.clone());
    assert!(orch.prepare().await.is_err());

    let state = segserve::server::AppState::from_config(&cfg, orch.state()).unwrap();
    let app = segserve::server::build_router(std::sync::Arc::new(state));

    let res = get(&app, "/playlist.m3u8").await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_to_string(res.into_body()).await;
    assert!(body.contains("could not be built"));
    assert!(!body.contains("#EXTM3U"));

    let res = get(&app, "/status").await;
    assert_eq!(res.status(), StatusCode::OK);
    let status: serde_json::Value = serde_json::from_str(&body_to_string(res.into_body()).await).unwrap();
    assert_eq!(status["stage"], "failed");
    assert!(status["playlist"].is_null());
}

#[tokio::test]
async fn test_zero_chunks_writes_no_playlist() {
    let dir = tmp_dir();
    let ffmpeg = write_script(dir.path(), "ffmpeg", "exit 0\n");
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg.clone());

    let err = orch.prepare().await.unwrap_err();
    assert!(matches!(err, SegError::EmptyManifest));
    assert!(!cfg.playlist.path.exists());
    assert!(matches!(orch.stage(), Stage::Failed(_)));
}

#[tokio::test]
async fn test_gap_in_tool_output_is_rejected() {
    let dir = tmp_dir();
    let ffmpeg = write_script(
        dir.path(),
        "ffmpeg",
        "printf a > \"$dir/segment000.ts\"\n\
         printf b > \"$dir/segment002.ts\"\n\
         printf 'segment000.ts,0,3\\nsegment002.ts,6,9\\n' > \"$list\"\n",
    );
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg.clone());

    let err = orch.prepare().await.unwrap_err();
    assert!(matches!(err, SegError::InconsistentOutput(_)), "got {err}");
    assert!(!cfg.playlist.path.exists());
    assert!(chunk_files(&cfg.segments.dir).is_empty());
}

#[tokio::test]
async fn test_segmentation_timeout_kills_tool() {
    let dir = tmp_dir();
    let ffmpeg = write_script(dir.path(), "ffmpeg", "exec sleep 30\n");
    let mut cfg = config_for(dir.path(), ffmpeg);
    cfg.segments.timeout_secs = 1;

    let started = std::time::Instant::now();
    let err = Segmenter::new(&cfg.segments)
        .run(SegmentationJob::from_config(&cfg))
        .await
        .unwrap_err();

    assert!(matches!(err, SegError::SegmentationTimeout { secs: 1 }));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}

#[tokio::test]
async fn test_missing_source_is_filesystem_error() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0]);
    let mut cfg = config_for(dir.path(), ffmpeg);
    cfg.source.path = dir.path().join("missing.mp4");

    let err = Segmenter::new(&cfg.segments)
        .run(SegmentationJob::from_config(&cfg))
        .await
        .unwrap_err();
    assert!(matches!(err, SegError::Filesystem { .. }));
}

#[tokio::test]
async fn test_landing_page_and_unknown_chunk() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0]);
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg);
    orch.prepare().await.unwrap();
    let app = orch.publish().unwrap();

    let res = get(&app, "/").await;
    assert_eq!(res.status(), StatusCode::OK);
    let html = body_to_string(res.into_body()).await;
    assert!(html.contains("/playlist.m3u8"));
    assert!(!html.contains("{{playlist}}"));

    let res = get(&app, "/segments/segment009.ts").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_ne!(
        res.headers().get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(b"video/MP2T".as_slice())
    );
}

#[tokio::test]
async fn test_custom_index_template() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0]);
    let mut cfg = config_for(dir.path(), ffmpeg);
    let template = dir.path().join("index.html");
    std::fs::write(&template, "<a href=\"{{playlist}}\">watch</a>").unwrap();
    cfg.http.index_template = Some(template.clone());

    let orch = Orchestrator::new(cfg);
    orch.prepare().await.unwrap();
    let app = orch.publish().unwrap();

    let res = get(&app, "/").await;
    assert_eq!(body_to_string(res.into_body()).await, "<a href=\"/playlist.m3u8\">watch</a>");

    std::fs::remove_file(&template).unwrap();
    let res = get(&app, "/").await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_playlist_unavailable_before_serving() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0]);
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg.clone());
    orch.prepare().await.unwrap();

    let state = segserve::server::AppState::from_config(&cfg, orch.state()).unwrap();
    let app = segserve::server::build_router(std::sync::Arc::new(state));
    let res = get(&app, "/playlist.m3u8").await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_run_serves_until_shutdown() {
    let dir = tmp_dir();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0, 3.0]);
    let cfg = config_for(dir.path(), ffmpeg);
    let orch = Orchestrator::new(cfg);

    orch.run(async {}).await.expect("run");
    assert_eq!(orch.stage(), Stage::Terminated);
}

#[tokio::test]
async fn test_bind_failure_is_fatal() {
    let dir = tmp_dir();
    let busy = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let ffmpeg = fake_ffmpeg(dir.path(), &[3.0]);
    let mut cfg = config_for(dir.path(), ffmpeg);
    cfg.http.listen = busy.local_addr().unwrap();
    let orch = Orchestrator::new(cfg);

    let err = orch.run(async {}).await.unwrap_err();
    assert!(matches!(err, SegError::Serve(_)));
    assert!(matches!(orch.stage(), Stage::Failed(_)));
}
