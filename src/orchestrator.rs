// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Orchestrator: segment, build the playlist, then serve.
//!
//! ```text
//! Idle → Segmenting → BuildingManifest → Serving → Terminated
//!            │               │              │
//!            └───────────────┴──────────────┴──→ Failed
//! ```
//!
//! Serving is only entered with a non-empty playlist that has been fully
//! written to disk. Every failure withdraws the playlist file so a stale
//! one is never advertised next to a different chunk set.

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;

use axum::Router;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Result, SegError};
use crate::playlist::Manifest;
use crate::segmenter::{SegmentationJob, Segmenter};
use crate::server::{self, AppState};

/// Lifecycle stage of the single job.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Idle,
    Segmenting,
    BuildingManifest,
    Serving,
    Terminated,
    Failed(String),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Segmenting => "segmenting",
            Stage::BuildingManifest => "building_manifest",
            Stage::Serving => "serving",
            Stage::Terminated => "terminated",
            Stage::Failed(_) => "failed",
        }
    }
}

/// What the HTTP surface is allowed to see.
#[derive(Debug, Clone)]
pub struct PublishState {
    pub stage: Stage,
    /// Rendered playlist, present once it has been written to disk.
    pub playlist: Option<String>,
    pub chunks: usize,
    pub total_duration_secs: f64,
    pub started_at: DateTime<Utc>,
}

impl Default for PublishState {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            playlist: None,
            chunks: 0,
            total_duration_secs: 0.0,
            started_at: Utc::now(),
        }
    }
}

/// Shared handle read by the HTTP handlers.
pub type SharedState = Arc<RwLock<PublishState>>;

pub struct Orchestrator {
    config: Config,
    segmenter: Segmenter,
    state: SharedState,
}

impl Orchestrator {
    /// Create the orchestrator from a validated [`Config`].
    pub fn new(config: Config) -> Self {
        let segmenter = Segmenter::new(&config.segments);
        Self {
            config,
            segmenter,
            state: Arc::new(RwLock::new(PublishState::default())),
        }
    }

    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    pub fn stage(&self) -> Stage {
        self.state.read().stage.clone()
    }

    /// Segment the source and write the playlist.
    ///
    /// On success the playlist is on disk and held in the publish state, but
    /// not yet served.
    pub async fn prepare(&self) -> Result<Manifest> {
        self.set_stage(Stage::Segmenting);
        let job = SegmentationJob::from_config(&self.config);
        let chunks = match self.segmenter.run(job).await {
            Ok(c) => c,
            Err(e) => return Err(self.fail(e).await),
        };

        self.set_stage(Stage::BuildingManifest);
        let prefix = self.config.segments.url_prefix().unwrap_or_default();
        let manifest = match Manifest::build(&chunks, prefix) {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e).await),
        };
        if let Err(e) = manifest.write_atomic(&self.config.playlist.path).await {
            return Err(self.fail(e).await);
        }

        let mut st = self.state.write();
        st.playlist = Some(manifest.render());
        st.chunks = manifest.len();
        st.total_duration_secs = manifest.total_duration();
        drop(st);

        info!(
            chunks = manifest.len(),
            target_duration = manifest.target_duration,
            playlist = ?self.config.playlist.path,
            "Playlist ready"
        );
        Ok(manifest)
    }

    /// Enter `Serving` and return the router. Requires a prepared playlist.
    pub fn publish(&self) -> Result<Router> {
        let app_state = Arc::new(AppState::from_config(&self.config, self.state.clone())?);
        let mut st = self.state.write();
        match (&st.stage, &st.playlist) {
            (Stage::BuildingManifest, Some(_)) => {}
            (Stage::Failed(reason), _) => return Err(SegError::NotReady(format!("job failed: {reason}"))),
            (stage, _) => return Err(SegError::NotReady(format!("stage is {}", stage.name()))),
        }
        info!(from = st.stage.name(), to = Stage::Serving.name(), "Stage transition");
        st.stage = Stage::Serving;
        drop(st);
        Ok(server::build_router(app_state))
    }

    /// Run the whole pipeline and serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.prepare().await?;

        let listener = match server::bind(self.config.http.listen).await {
            Ok(l) => l,
            Err(e) => return Err(self.fail(e).await),
        };
        let app = match self.publish() {
            Ok(app) => app,
            Err(e) => return Err(self.fail(e).await),
        };
        if let Some(name) = self.config.playlist.file_name() {
            info!(
                url = %format!("http://{}/{}", self.config.http.listen, name),
                "Playlist published"
            );
        }

        match server::serve(listener, app, shutdown).await {
            Ok(()) => {
                self.set_stage(Stage::Terminated);
                info!("Server stopped");
                Ok(())
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    fn set_stage(&self, stage: Stage) {
        let mut st = self.state.write();
        info!(from = st.stage.name(), to = stage.name(), "Stage transition");
        st.stage = stage;
    }

    /// Record `err`, withdraw the playlist, and hand the error back.
    async fn fail(&self, err: SegError) -> SegError {
        error!(error = %err, stage = self.stage().name(), "Job failed");
        {
            let mut st = self.state.write();
            st.stage = Stage::Failed(err.to_string());
            st.playlist = None;
        }

        let path = &self.config.playlist.path;
        match tokio::fs::remove_file(path).await {
            Ok(()) => warn!(playlist = ?path, "Withdrew previous playlist"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(playlist = ?path, error = %e, "Cannot withdraw previous playlist"),
        }
        err
    }
}
