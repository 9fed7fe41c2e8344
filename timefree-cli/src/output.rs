use std::path::{Path, PathBuf};

use timefree_engine::ProgramMetadata;

const FALLBACK_TITLE: &str = "program";
const MAX_TITLE_CHARS: usize = 120;

/// Make a program title usable as a file name component on every platform.
///
/// Runs of whitespace collapse into one space and the length is bounded in
/// characters, since titles are frequently multi-byte.
pub fn sanitize_title(title: &str) -> String {
    let mut cleaned = String::with_capacity(title.len());
    let mut pending_space = false;

    for c in title.chars() {
        if c.is_whitespace() {
            pending_space = !cleaned.is_empty();
            continue;
        }
        if pending_space {
            cleaned.push(' ');
            pending_space = false;
        }
        if matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') || c.is_control() {
            cleaned.push('_');
        } else {
            cleaned.push(c);
        }
    }

    let trimmed: String = cleaned
        .trim_matches(|c| c == '.' || c == ' ')
        .chars()
        .take(MAX_TITLE_CHARS)
        .collect();
    let trimmed = trimmed.trim_end_matches(|c| c == '.' || c == ' ');

    if trimmed.is_empty() {
        FALLBACK_TITLE.to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// `<title>_<station>_<start>.<extension>`
pub fn output_file_name(program: &ProgramMetadata, extension: &str) -> String {
    format!(
        "{}_{}_{}.{extension}",
        sanitize_title(&program.title),
        program.station_id,
        program.start
    )
}

/// Segment directory for a program, hidden next to the output.
pub fn work_dir_for(output_dir: &Path, program: &ProgramMetadata) -> PathBuf {
    output_dir.join(format!(".timefree-{}-{}", program.station_id, program.start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use timefree_engine::Timestamp;

    fn program(title: &str) -> ProgramMetadata {
        ProgramMetadata {
            station_id: "TBS".to_owned(),
            start: Timestamp::parse("20240101120000").unwrap(),
            end: Timestamp::parse("20240101143000").unwrap(),
            title: title.to_owned(),
        }
    }

    #[test]
    fn replaces_reserved_characters() {
        assert_eq!(sanitize_title("A/B: C?"), "A_B_ C_");
        assert_eq!(sanitize_title("  ..hidden.. "), "hidden");
        assert_eq!(sanitize_title("tab\tand\nnewline"), "tab and newline");
        assert_eq!(sanitize_title("..."), FALLBACK_TITLE);
    }

    #[test]
    fn bounds_length_in_characters() {
        let long = "あ".repeat(500);
        assert_eq!(sanitize_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn names_output_after_program() {
        assert_eq!(
            output_file_name(&program("Noon & Beyond"), "m4a"),
            "Noon & Beyond_TBS_20240101120000.m4a"
        );
        assert_eq!(
            work_dir_for(Path::new("/out"), &program("x")),
            PathBuf::from("/out/.timefree-TBS-20240101120000")
        );
    }
}
