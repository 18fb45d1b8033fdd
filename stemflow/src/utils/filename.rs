//! Sanitizing client-supplied upload names.
//!
//! Uploaded files are stored under the name the client sent, so the name must
//! not escape the job's upload directory and must be valid on every platform.

/// Characters that are invalid in Windows filenames
const WINDOWS_INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Windows reserved filenames (case-insensitive)
const WINDOWS_RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Longest stored name in bytes.
const MAX_NAME_BYTES: usize = 200;

const FALLBACK_NAME: &str = "upload";

/// Turn a client-supplied filename into a safe file name.
///
/// Only the last path component is kept (browsers may send `C:\fakepath\x.mp4`),
/// invalid characters become `_`, leading dots are stripped so the file is
/// neither hidden nor `..`, and long names are shortened keeping the extension.
///
/// ```
/// use stemflow::utils::filename::upload_filename;
///
/// assert_eq!(upload_filename("C:\\fakepath\\My Song.mp3"), "My Song.mp3");
/// assert_eq!(upload_filename("../../etc/passwd"), "passwd");
/// assert_eq!(upload_filename("what?.wav"), "what_.wav");
/// ```
pub fn upload_filename(input: &str) -> String {
    let base = input
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut result = String::with_capacity(base.len());
    let mut last_was_replacement = false;
    for c in base.chars() {
        if c.is_control() || WINDOWS_INVALID_CHARS.contains(&c) {
            if !last_was_replacement {
                result.push('_');
                last_was_replacement = true;
            }
        } else {
            result.push(c);
            last_was_replacement = false;
        }
    }

    let trimmed = result.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return FALLBACK_NAME.to_string();
    }

    let upper = trimmed.to_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    let name = if WINDOWS_RESERVED_NAMES.contains(&stem) {
        format!("_{}", trimmed)
    } else {
        trimmed.to_string()
    };

    truncate_keeping_extension(&name, MAX_NAME_BYTES)
}

fn truncate_keeping_extension(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }

    let (stem, ext) = match name.rfind('.') {
        Some(idx) if name.len() - idx <= 16 => name.split_at(idx),
        _ => (name, ""),
    };

    let budget = max.saturating_sub(ext.len());
    let mut end = budget.min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &stem[..end], ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keeps_plain_names() {
        assert_eq!(upload_filename("song.wav"), "song.wav");
        assert_eq!(upload_filename("观看一只青蛙.mp4"), "观看一只青蛙.mp4");
    }

    #[test]
    fn test_strips_directories() {
        assert_eq!(upload_filename("/tmp/x/clip.mov"), "clip.mov");
        assert_eq!(upload_filename("C:\\Users\\me\\clip.mov"), "clip.mov");
        assert_eq!(upload_filename("../.."), "upload");
    }

    #[test]
    fn test_empty_and_dots() {
        assert_eq!(upload_filename(""), "upload");
        assert_eq!(upload_filename("..."), "upload");
        assert_eq!(upload_filename(".hidden.wav"), "hidden.wav");
    }

    #[test]
    fn test_invalid_characters_collapse() {
        assert_eq!(upload_filename("a<>b?.wav"), "a_b_.wav");
        assert_eq!(upload_filename("tab\there.wav"), "tab_here.wav");
    }

    #[test]
    fn test_reserved_names() {
        assert_eq!(upload_filename("CON.wav"), "_CON.wav");
        assert_eq!(upload_filename("nul"), "_nul");
        assert_eq!(upload_filename("console.wav"), "console.wav");
    }

    #[test]
    fn test_long_names_keep_extension() {
        let long = format!("{}.flac", "é".repeat(300));
        let name = upload_filename(&long);
        assert!(name.len() <= MAX_NAME_BYTES);
        assert!(name.ends_with(".flac"));
    }
}
