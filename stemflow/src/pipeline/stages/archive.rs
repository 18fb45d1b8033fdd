//! Stems folder archiver (ZIP or tar.gz).

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tar::Builder as TarBuilder;
use tracing::{debug, info};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::traits::{Archiver, StageResult};
use crate::error::StageError;

/// Base name of the produced archive.
const ARCHIVE_STEM: &str = "stems";

/// Default compression level (6 is a good balance between speed and compression).
const DEFAULT_COMPRESSION_LEVEL: u8 = 6;

/// Archive format options.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveFormat {
    /// ZIP archive format.
    #[default]
    Zip,
    /// Gzipped tar archive format.
    #[serde(rename = "tar.gz")]
    TarGz,
}

impl ArchiveFormat {
    /// Get the default file extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::TarGz => "tar.gz",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::TarGz => "application/gzip",
        }
    }

    /// Detect the format from an archive file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ArchiveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zip" => Ok(Self::Zip),
            "tar.gz" | "tgz" | "targz" => Ok(Self::TarGz),
            other => Err(format!("unsupported archive format '{}'", other)),
        }
    }
}

/// Packs every regular file of a folder into one archive.
#[derive(Debug, Clone)]
pub struct FolderArchiver {
    format: ArchiveFormat,
    compression_level: u8,
}

impl FolderArchiver {
    pub fn new(format: ArchiveFormat) -> Self {
        Self {
            format,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }

    /// Override the compression level (0-9).
    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = level.min(9);
        self
    }
}

#[async_trait]
impl Archiver for FolderArchiver {
    async fn archive(&self, folder: &Path, dest_dir: &Path) -> StageResult<PathBuf> {
        let output = dest_dir.join(format!("{}.{}", ARCHIVE_STEM, self.format.extension()));
        info!(
            folder = %folder.display(),
            output = %output.display(),
            format = %self.format,
            "Creating stems archive"
        );

        let format = self.format;
        let level = self.compression_level;
        let folder = folder.to_path_buf();
        let target = output.clone();

        let result = tokio::task::spawn_blocking(move || {
            let files = collect_files(&folder)?;
            match format {
                ArchiveFormat::Zip => create_zip_archive(&folder, &files, &target, level),
                ArchiveFormat::TarGz => create_tar_gz_archive(&folder, &files, &target, level),
            }
        })
        .await
        .map_err(|e| StageError::Io(format!("archive task failed: {}", e)))?;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(e);
        }
        Ok(output)
    }
}

/// Relative paths of all regular files under `folder`, sorted.
fn collect_files(folder: &Path) -> StageResult<Vec<PathBuf>> {
    fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            let path = entry.path();
            if file_type.is_dir() {
                walk(root, &path, out)?;
            } else if file_type.is_file()
                && let Ok(relative) = path.strip_prefix(root)
            {
                out.push(relative.to_path_buf());
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(folder, folder, &mut files)
        .map_err(|e| StageError::Io(format!("failed to list {}: {}", folder.display(), e)))?;
    files.sort();
    Ok(files)
}

fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn create_zip_archive(
    root: &Path,
    files: &[PathBuf],
    output: &Path,
    level: u8,
) -> StageResult<()> {
    let file = File::create(output)
        .map_err(|e| StageError::Io(format!("Failed to create ZIP archive: {}", e)))?;
    let mut zip = ZipWriter::new(file);

    let options = if level == 0 {
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored)
    } else {
        SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .compression_level(Some(level as i64))
    };

    for relative in files {
        let name = entry_name(relative);
        debug!("Adding to ZIP: {}", name);

        let buffer = std::fs::read(root.join(relative))
            .map_err(|e| StageError::Io(format!("Failed to read {}: {}", name, e)))?;
        zip.start_file(name.as_str(), options)
            .map_err(|e| StageError::Io(format!("Failed to start ZIP entry: {}", e)))?;
        zip.write_all(&buffer)
            .map_err(|e| StageError::Io(format!("Failed to write to ZIP archive: {}", e)))?;
    }

    zip.finish()
        .map_err(|e| StageError::Io(format!("Failed to finalize ZIP archive: {}", e)))?;
    Ok(())
}

fn create_tar_gz_archive(
    root: &Path,
    files: &[PathBuf],
    output: &Path,
    level: u8,
) -> StageResult<()> {
    let file = File::create(output)
        .map_err(|e| StageError::Io(format!("Failed to create tar.gz archive: {}", e)))?;

    let compression = match level {
        0 => Compression::none(),
        1 => Compression::fast(),
        9 => Compression::best(),
        level => Compression::new(level as u32),
    };

    let mut tar = TarBuilder::new(GzEncoder::new(file, compression));

    for relative in files {
        let name = entry_name(relative);
        debug!("Adding to tar.gz: {}", name);

        let mut input = File::open(root.join(relative))
            .map_err(|e| StageError::Io(format!("Failed to open {}: {}", name, e)))?;
        tar.append_file(&name, &mut input)
            .map_err(|e| StageError::Io(format!("Failed to add file to tar archive: {}", e)))?;
    }

    let encoder = tar
        .into_inner()
        .map_err(|e| StageError::Io(format!("Failed to finalize tar archive: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| StageError::Io(format!("Failed to finalize gzip compression: {}", e)))?;
    Ok(())
}
