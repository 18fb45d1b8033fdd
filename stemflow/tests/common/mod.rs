//! Shared fixtures for the integration tests: stage doubles with call
//! counters and a fully wired service graph over a temporary work dir.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stemflow::error::StageError;
use stemflow::jobs::{ChordEntry, JobRecord, JobRegistry, StemCount};
use stemflow::notify::{HubConfig, JobEvent, NotificationHub};
use stemflow::pipeline::stages::{
    Archiver, ChordExtractor, Downloader, KeyDetector, MediaConverter, MelodyExtractor,
    ReportContent, ReportWriter, StageResult, StemCombiner, StemSeparator,
};
use stemflow::pipeline::{
    Orchestrator, OrchestratorConfig, REPORT_FILE, StageSet, WorkDirAllocator,
};
use stemflow::submission::SubmissionService;
use tempfile::TempDir;
use tokio::sync::mpsc;

const WAIT_LIMIT: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct Calls {
    pub download: AtomicUsize,
    pub convert: AtomicUsize,
    pub separate: AtomicUsize,
    pub combine: AtomicUsize,
    pub detect_key: AtomicUsize,
    pub chords: AtomicUsize,
    pub melody: AtomicUsize,
    pub report: AtomicUsize,
    pub archive: AtomicUsize,
}

pub fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

/// One double implementing every stage, configured per test.
pub struct FakeStages {
    pub calls: Calls,
    pub key: String,
    /// Added to every stage call.
    pub latency: Duration,
    /// Extra time spent in separation.
    pub separation_latency: Duration,
    pub separation_error: Option<String>,
    pub fail_download: bool,
    pub fail_convert: bool,
    pub fail_key: bool,
    pub fail_chords: bool,
    pub fail_melody: bool,
    pub fail_report: bool,
    pub fail_archive: bool,
    pub panic_on_key: bool,
    pub panic_on_chords: bool,
    /// Number of stems handed to each combine call.
    pub combined: Mutex<Vec<usize>>,
}

impl Default for FakeStages {
    fn default() -> Self {
        Self {
            calls: Calls::default(),
            key: "C major".to_string(),
            latency: Duration::ZERO,
            separation_latency: Duration::ZERO,
            separation_error: None,
            fail_download: false,
            fail_convert: false,
            fail_key: false,
            fail_chords: false,
            fail_melody: false,
            fail_report: false,
            fail_archive: false,
            panic_on_key: false,
            panic_on_chords: false,
            combined: Mutex::new(Vec::new()),
        }
    }
}

impl FakeStages {
    pub fn stage_set(self: &Arc<Self>, enrichment: bool) -> StageSet {
        let stages = StageSet {
            downloader: self.clone(),
            converter: self.clone(),
            separator: self.clone(),
            combiner: self.clone(),
            key_detector: self.clone(),
            chord_extractor: Some(self.clone()),
            melody_extractor: Some(self.clone()),
            report_writer: Some(self.clone()),
            archiver: self.clone(),
        };
        if enrichment {
            stages
        } else {
            stages.without_enrichment()
        }
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

fn touch(path: &Path) -> StageResult<()> {
    std::fs::write(path, b"RIFF")?;
    Ok(())
}

#[async_trait]
impl Downloader for FakeStages {
    async fn download(&self, _url: &str, dest_dir: &Path) -> StageResult<PathBuf> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_download {
            return Err(StageError::Download("video unavailable".to_string()));
        }
        let path = dest_dir.join("download.wav");
        touch(&path)?;
        Ok(path)
    }
}

#[async_trait]
impl MediaConverter for FakeStages {
    async fn convert(&self, _video: &Path, dest_dir: &Path) -> StageResult<PathBuf> {
        self.calls.convert.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_convert {
            return Err(StageError::Conversion("no audio stream".to_string()));
        }
        let path = dest_dir.join("audio.wav");
        touch(&path)?;
        Ok(path)
    }
}

#[async_trait]
impl StemSeparator for FakeStages {
    async fn separate(
        &self,
        _audio: &Path,
        stem_count: StemCount,
        dest_dir: &Path,
    ) -> StageResult<PathBuf> {
        self.calls.separate.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if !self.separation_latency.is_zero() {
            tokio::time::sleep(self.separation_latency).await;
        }
        if let Some(message) = &self.separation_error {
            return Err(StageError::Separation(message.clone()));
        }

        let folder = dest_dir.join("audio");
        std::fs::create_dir_all(&folder)?;
        let names: &[&str] = match stem_count.get() {
            2 => &["vocals.wav", "accompaniment.wav"],
            3 => &["vocals.wav", "drums.wav", "other.wav"],
            _ => &["vocals.wav", "drums.wav", "bass.wav", "other.wav"],
        };
        for name in names {
            touch(&folder.join(name))?;
        }
        Ok(folder)
    }
}

#[async_trait]
impl StemCombiner for FakeStages {
    async fn combine(&self, stems: &[PathBuf], output: &Path) -> StageResult<PathBuf> {
        self.calls.combine.fetch_add(1, Ordering::SeqCst);
        if stems.is_empty() {
            return Err(StageError::EmptyInput);
        }
        self.combined.lock().unwrap().push(stems.len());
        touch(output)?;
        Ok(output.to_path_buf())
    }
}

#[async_trait]
impl KeyDetector for FakeStages {
    async fn detect_key(&self, _wav: &Path) -> StageResult<String> {
        self.calls.detect_key.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.panic_on_key {
            panic!("analyzer crashed");
        }
        if self.fail_key {
            return Err(StageError::Analysis("silent input".to_string()));
        }
        Ok(self.key.clone())
    }
}

#[async_trait]
impl ChordExtractor for FakeStages {
    async fn extract_chords(&self, _wav: &Path) -> StageResult<Vec<ChordEntry>> {
        self.calls.chords.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.panic_on_chords {
            panic!("chord model crashed");
        }
        if self.fail_chords {
            return Err(StageError::Analysis("no beats found".to_string()));
        }
        Ok(vec![
            ChordEntry {
                bar: 1,
                chord: "C".to_string(),
            },
            ChordEntry {
                bar: 2,
                chord: "G".to_string(),
            },
        ])
    }
}

#[async_trait]
impl MelodyExtractor for FakeStages {
    async fn extract_melody(&self, _wav: &Path) -> StageResult<Vec<String>> {
        self.calls.melody.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_melody {
            return Err(StageError::Analysis("no pitch".to_string()));
        }
        Ok(vec!["C4".to_string(), "E4".to_string(), "G4".to_string()])
    }
}

#[async_trait]
impl Archiver for FakeStages {
    async fn archive(&self, _folder: &Path, dest_dir: &Path) -> StageResult<PathBuf> {
        self.calls.archive.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_archive {
            return Err(StageError::Io("no space left on device".to_string()));
        }
        let path = dest_dir.join("stems.zip");
        touch(&path)?;
        Ok(path)
    }
}

#[async_trait]
impl ReportWriter for FakeStages {
    async fn write_report(
        &self,
        _content: ReportContent<'_>,
        dest_dir: &Path,
    ) -> StageResult<PathBuf> {
        self.calls.report.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_report {
            return Err(StageError::Io("read-only folder".to_string()));
        }
        let path = dest_dir.join(REPORT_FILE);
        touch(&path)?;
        Ok(path)
    }
}

/// Wired services over a temporary work dir.
pub struct Harness {
    pub registry: Arc<JobRegistry>,
    pub hub: Arc<NotificationHub>,
    pub orchestrator: Arc<Orchestrator>,
    pub submission: SubmissionService,
    pub workdirs: Arc<WorkDirAllocator>,
    pub dir: TempDir,
}

impl Harness {
    pub fn new(stages: StageSet) -> Self {
        Self::with_config(stages, HubConfig::default(), OrchestratorConfig::default())
    }

    pub fn with_config(
        stages: StageSet,
        hub_config: HubConfig,
        orchestrator_config: OrchestratorConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(JobRegistry::new());
        let hub = Arc::new(NotificationHub::new(registry.clone(), hub_config));
        let workdirs = Arc::new(WorkDirAllocator::new(dir.path().join("work")));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            hub.clone(),
            stages,
            workdirs.clone(),
            orchestrator_config,
        ));
        let submission =
            SubmissionService::new(registry.clone(), orchestrator.clone(), workdirs.clone());

        Self {
            registry,
            hub,
            orchestrator,
            submission,
            workdirs,
            dir,
        }
    }

    /// Register a job, attach a subscriber, then start the run, so the
    /// subscriber sees every transition.
    pub fn start_watched(&self, record: JobRecord) -> mpsc::Receiver<JobEvent> {
        let job_id = record.id.clone();
        self.registry.insert(record);
        let (tx, rx) = self.hub.channel();
        self.hub.subscribe(&job_id, tx).unwrap();
        self.orchestrator.spawn(job_id);
        rx
    }
}

/// Drain a subscription until the hub closes it.
pub async fn collect_events(mut rx: mpsc::Receiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    loop {
        match tokio::time::timeout(WAIT_LIMIT, rx.recv()).await {
            Ok(Some(event)) => events.push(event),
            Ok(None) => return events,
            Err(_) => panic!("subscription never closed; received {:?}", events),
        }
    }
}

pub async fn wait_terminal(registry: &JobRegistry, job_id: &str) -> JobRecord {
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let record = registry.get(job_id).unwrap();
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job did not reach a terminal status")
}
