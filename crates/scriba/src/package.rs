//! Zip upload expansion and downloadable result packaging.

use std::io::{Cursor, Read, Write};
use std::path::Path;

use serde::Deserialize;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PackageError;
use crate::render::TranscriptResult;

/// Audio extensions recognised inside uploaded archives.
const AUDIO_EXTENSIONS: &[&str] = &[".ogg", ".mp3", ".m4a", ".wav", ".opus"];

/// Filename of the concatenated text inside a "complete" package.
const CONCATENATED_NAME: &str = "_combined_transcripts.txt";

/// One audio file recovered from an upload, with its archive-internal path
/// preserved so results can be mapped back to the original structure.
#[derive(Debug, Clone)]
pub struct AudioEntry {
    pub internal_path: String,
    pub bytes: Vec<u8>,
}

/// Which rendering of a transcript a download uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    Raw,
    DialoguePlain,
    #[default]
    DialogueMarkdown,
}

/// Shape of a per-session download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageFormat {
    /// Single text file with all transcripts concatenated.
    Concatenated,
    /// Zip with one text file per job.
    Individual,
    /// Zip with per-job files plus the concatenated text.
    Complete,
}

/// A ready-to-serve download.
#[derive(Debug, Clone)]
pub struct DownloadPackage {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime: &'static str,
}

/// Picks a rendering off a result.
pub fn job_text(result: &TranscriptResult, kind: TextKind) -> &str {
    match kind {
        TextKind::Raw => &result.raw_text,
        TextKind::DialoguePlain => &result.dialogue_plain,
        TextKind::DialogueMarkdown => &result.dialogue_markdown,
    }
}

fn is_audio_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    AUDIO_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// Expands an uploaded zip into its audio entries. Directories, macOS
/// metadata junk and non-audio files are skipped. A corrupt archive is a
/// validation fault for the whole upload.
pub fn extract_audio_entries(zip_bytes: &[u8]) -> Result<Vec<AudioEntry>, PackageError> {
    let mut archive = ZipArchive::new(Cursor::new(zip_bytes))
        .map_err(|e| PackageError::InvalidArchive(e.to_string()))?;

    let mut entries = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| PackageError::InvalidArchive(e.to_string()))?;
        let name = file.name().to_string();
        if file.is_dir() || name.starts_with("__MACOSX") || !is_audio_name(&name) {
            continue;
        }
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)
            .map_err(|e| PackageError::InvalidArchive(e.to_string()))?;
        entries.push(AudioEntry {
            internal_path: name,
            bytes,
        });
    }
    Ok(entries)
}

/// Swaps a path's extension for `.txt`, keeping only the file name.
fn text_filename(internal_path: &str) -> String {
    let path = Path::new(internal_path);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "transcript".to_string());
    format!("{stem}.txt")
}

/// Per-job plain-text download of the chosen rendering.
pub fn package_job(result: &TranscriptResult, kind: TextKind) -> DownloadPackage {
    DownloadPackage {
        data: job_text(result, kind).as_bytes().to_vec(),
        filename: text_filename(&result.filename),
        mime: "text/plain",
    }
}

fn concatenated_content(results: &[TranscriptResult], kind: TextKind) -> String {
    let mut content = String::new();
    for result in results {
        content.push_str(&format!(
            "///// {} /////\n\n{}\n\n\n",
            result.filename,
            job_text(result, kind)
        ));
    }
    content
}

fn build_zip(
    results: &[TranscriptResult],
    kind: TextKind,
    include_concatenated: bool,
) -> Result<Vec<u8>, PackageError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for result in results {
        // Keep the archive-internal directory structure of the upload.
        let name = Path::new(&result.filename)
            .with_extension("txt")
            .to_string_lossy()
            .to_string();
        writer
            .start_file(name.as_str(), options)
            .map_err(|e| PackageError::WriteEntry {
                name: name.clone(),
                source: std::io::Error::other(e),
            })?;
        writer
            .write_all(job_text(result, kind).as_bytes())
            .map_err(|e| PackageError::WriteEntry {
                name: name.clone(),
                source: e,
            })?;
    }

    if include_concatenated {
        writer
            .start_file(CONCATENATED_NAME, options)
            .map_err(|e| PackageError::WriteEntry {
                name: CONCATENATED_NAME.to_string(),
                source: std::io::Error::other(e),
            })?;
        writer
            .write_all(concatenated_content(results, kind).as_bytes())
            .map_err(|e| PackageError::WriteEntry {
                name: CONCATENATED_NAME.to_string(),
                source: e,
            })?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| PackageError::InvalidArchive(e.to_string()))?;
    Ok(cursor.into_inner())
}

/// Builds a session-level download from completed results. Returns `None`
/// when there is nothing to package.
pub fn package_session(
    results: &[TranscriptResult],
    format: PackageFormat,
    kind: TextKind,
) -> Result<Option<DownloadPackage>, PackageError> {
    if results.is_empty() {
        return Ok(None);
    }

    let package = match format {
        PackageFormat::Concatenated => DownloadPackage {
            data: concatenated_content(results, kind).into_bytes(),
            filename: "transcripts_combined.txt".to_string(),
            mime: "text/plain",
        },
        PackageFormat::Individual => DownloadPackage {
            data: build_zip(results, kind, false)?,
            filename: "transcripts_individual.zip".to_string(),
            mime: "application/zip",
        },
        PackageFormat::Complete => DownloadPackage {
            data: build_zip(results, kind, true)?,
            filename: "transcripts_complete.zip".to_string(),
            mime: "application/zip",
        },
    };
    Ok(Some(package))
}
