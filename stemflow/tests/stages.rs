//! Production stage backends working together on real files.

use std::fs::File;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use stemflow::error::StageError;
use stemflow::jobs::StemCount;
use stemflow::pipeline::stages::{Archiver, FolderArchiver, StemCombiner, WavMixer};
use stemflow::pipeline::{ArchiveFormat, INSTRUMENTAL_FILE, build_instrumental};

const SPEC: WavSpec = WavSpec {
    channels: 2,
    sample_rate: 44_100,
    bits_per_sample: 16,
    sample_format: SampleFormat::Int,
};

fn write_wav(path: &Path, samples: &[i16]) {
    let mut writer = WavWriter::create(path, SPEC).unwrap();
    for s in samples {
        writer.write_sample(*s).unwrap();
    }
    writer.finalize().unwrap();
}

#[tokio::test]
async fn combine_without_inputs_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("mix.wav");

    let err = WavMixer::new().combine(&[], &output).await.unwrap_err();

    assert!(matches!(err, StageError::EmptyInput));
    assert!(!output.exists());
}

#[tokio::test]
async fn four_stem_instrumental_is_mixed_and_archived() {
    let stems = tempfile::tempdir().unwrap();
    write_wav(&stems.path().join("vocals.wav"), &[1000, 1000, 1000, 1000]);
    write_wav(&stems.path().join("bass.wav"), &[100, 200, 300, 400]);
    write_wav(&stems.path().join("drums.wav"), &[10, 20, 30, 40]);
    write_wav(&stems.path().join("other.wav"), &[1, 2, 3, 4]);

    let instrumental = build_instrumental(stems.path(), StemCount::FOUR, &WavMixer::new())
        .await
        .unwrap();
    assert_eq!(instrumental, stems.path().join(INSTRUMENTAL_FILE));

    let samples: Vec<i16> = WavReader::open(&instrumental)
        .unwrap()
        .into_samples::<i16>()
        .map(|s| s.unwrap())
        .collect();
    assert_eq!(samples, vec![111, 222, 333, 444]);

    let out = tempfile::tempdir().unwrap();
    let archive: PathBuf = FolderArchiver::new(ArchiveFormat::Zip)
        .archive(stems.path(), out.path())
        .await
        .unwrap();

    let zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
    let mut names: Vec<&str> = zip.file_names().collect();
    names.sort_unstable();
    assert_eq!(
        names,
        vec![
            "bass.wav",
            "drums.wav",
            INSTRUMENTAL_FILE,
            "other.wav",
            "vocals.wav"
        ]
    );
}

#[tokio::test]
async fn missing_stem_fails_the_combine() {
    let stems = tempfile::tempdir().unwrap();
    write_wav(&stems.path().join("drums.wav"), &[1, 2]);

    let err = build_instrumental(stems.path(), StemCount::THREE, &WavMixer::new())
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::Io(_)));
    assert!(!stems.path().join(INSTRUMENTAL_FILE).exists());
}
