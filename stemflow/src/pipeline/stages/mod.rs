//! Pipeline stage adapters.
//!
//! Each stage is a trait object selected at construction time. The production
//! backends wrap external tools; tests swap in doubles through [`StageSet`].

mod analyzer;
mod archive;
mod ffmpeg;
mod mixer;
mod process;
mod report;
mod spleeter;
mod traits;
mod workdir;
mod ytdlp;

use std::sync::Arc;

pub use analyzer::CommandAnalyzer;
pub use archive::{ArchiveFormat, FolderArchiver};
pub use ffmpeg::FfmpegConverter;
pub use mixer::{WavMixer, mix_files};
pub use process::{CommandOutput, run_command_with_logs};
pub use report::{PdfReportWriter, REPORT_FILE};
pub use spleeter::SpleeterSeparator;
pub use traits::{
    Archiver, ChordExtractor, Downloader, KeyDetector, MediaConverter, MelodyExtractor,
    ReportContent, ReportWriter, StageResult, StemCombiner, StemSeparator,
};
pub use workdir::WorkDirAllocator;
pub use ytdlp::YtDlpDownloader;

use crate::config::AppConfig;

/// The stage implementations one orchestrator drives.
///
/// Chord and melody extraction and the analysis report are optional; `None`
/// skips the stage and the corresponding result field.
#[derive(Clone)]
pub struct StageSet {
    pub downloader: Arc<dyn Downloader>,
    pub converter: Arc<dyn MediaConverter>,
    pub separator: Arc<dyn StemSeparator>,
    pub combiner: Arc<dyn StemCombiner>,
    pub key_detector: Arc<dyn KeyDetector>,
    pub chord_extractor: Option<Arc<dyn ChordExtractor>>,
    pub melody_extractor: Option<Arc<dyn MelodyExtractor>>,
    pub report_writer: Option<Arc<dyn ReportWriter>>,
    pub archiver: Arc<dyn Archiver>,
}

impl StageSet {
    /// Wire the production backends from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let analyzer = Arc::new(CommandAnalyzer::new(&config.tools.analyzer));

        let (chord_extractor, melody_extractor, report_writer) = if config.enrichment {
            (
                Some(analyzer.clone() as Arc<dyn ChordExtractor>),
                Some(analyzer.clone() as Arc<dyn MelodyExtractor>),
                Some(Arc::new(PdfReportWriter::new()) as Arc<dyn ReportWriter>),
            )
        } else {
            (None, None, None)
        };

        Self {
            downloader: Arc::new(YtDlpDownloader::new(&config.tools.ytdlp)),
            converter: Arc::new(FfmpegConverter::new(&config.tools.ffmpeg)),
            separator: Arc::new(SpleeterSeparator::new(&config.tools.spleeter)),
            combiner: Arc::new(WavMixer::new()),
            key_detector: analyzer,
            chord_extractor,
            melody_extractor,
            report_writer,
            archiver: Arc::new(FolderArchiver::new(config.archive_format)),
        }
    }

    /// Same stages without the optional enrichments.
    pub fn without_enrichment(mut self) -> Self {
        self.chord_extractor = None;
        self.melody_extractor = None;
        self.report_writer = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_enrichment_toggle() {
        let config = AppConfig::default();
        let stages = StageSet::from_config(&config);
        assert!(stages.chord_extractor.is_some());
        assert!(stages.melody_extractor.is_some());
        assert!(stages.report_writer.is_some());

        let config = AppConfig {
            enrichment: false,
            ..AppConfig::default()
        };
        let stages = StageSet::from_config(&config);
        assert!(stages.chord_extractor.is_none());
        assert!(stages.melody_extractor.is_none());
        assert!(stages.report_writer.is_none());
    }
}
