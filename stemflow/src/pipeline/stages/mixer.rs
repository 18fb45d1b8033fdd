//! WAV overlay backend for combining stems.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use super::traits::{StageResult, StemCombiner};
use crate::error::StageError;

/// Mixes 16-bit PCM WAV stems sample by sample.
///
/// The mix has the length of the first input. Shorter inputs contribute
/// silence past their end, longer ones are cut. Sums are clamped to the
/// 16-bit range.
#[derive(Debug, Clone, Default)]
pub struct WavMixer;

impl WavMixer {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StemCombiner for WavMixer {
    async fn combine(&self, stems: &[PathBuf], output: &Path) -> StageResult<PathBuf> {
        if stems.is_empty() {
            return Err(StageError::EmptyInput);
        }

        let stems = stems.to_vec();
        let output = output.to_path_buf();
        tokio::task::spawn_blocking(move || mix_files(&stems, &output).map(|_| output))
            .await
            .map_err(|e| StageError::Io(format!("mix task failed: {}", e)))?
    }
}

fn read_stem(path: &Path) -> StageResult<(WavSpec, Vec<i16>)> {
    let reader = WavReader::open(path)
        .map_err(|e| StageError::Io(format!("failed to open {}: {}", path.display(), e)))?;
    let spec = reader.spec();
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(StageError::Io(format!(
            "{} is not 16-bit PCM ({} bit {:?})",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        )));
    }

    let samples = reader
        .into_samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StageError::Io(format!("failed to read {}: {}", path.display(), e)))?;
    Ok((spec, samples))
}

/// Overlay `stems` into `output`. Nothing is written unless every input is readable.
pub fn mix_files(stems: &[PathBuf], output: &Path) -> StageResult<()> {
    let (first, rest) = stems.split_first().ok_or(StageError::EmptyInput)?;

    let (spec, base) = read_stem(first)?;
    let mut mixed: Vec<i32> = base.into_iter().map(i32::from).collect();

    for path in rest {
        let (other_spec, samples) = read_stem(path)?;
        if other_spec.channels != spec.channels || other_spec.sample_rate != spec.sample_rate {
            return Err(StageError::Io(format!(
                "{} has {} ch @ {} Hz, expected {} ch @ {} Hz",
                path.display(),
                other_spec.channels,
                other_spec.sample_rate,
                spec.channels,
                spec.sample_rate
            )));
        }
        for (acc, sample) in mixed.iter_mut().zip(samples) {
            *acc += i32::from(sample);
        }
    }

    let write = || -> Result<(), hound::Error> {
        let mut writer = WavWriter::create(output, spec)?;
        for sample in &mixed {
            writer.write_sample((*sample).clamp(i16::MIN as i32, i16::MAX as i32) as i16)?;
        }
        writer.finalize()
    };

    if let Err(e) = write() {
        let _ = std::fs::remove_file(output);
        return Err(StageError::Io(format!(
            "failed to write {}: {}",
            output.display(),
            e
        )));
    }

    debug!(
        inputs = stems.len(),
        samples = mixed.len(),
        output = %output.display(),
        "Mixed stems"
    );
    Ok(())
}
