//! Deterministic clean-up of model-produced Markdown.
//!
//! Models asked for "Markdown only" still wrap replies in code fences, mix
//! line endings and leave zero-width characters from the OCR source. These
//! passes fix that without touching content, in this order:
//!
//! 1. strip one outer ```` ```markdown ```` fence
//! 2. CRLF / CR → LF
//! 3. drop invisible Unicode (zero-width space, BOM, soft hyphen, joiners)
//! 4. trim trailing whitespace per line
//! 5. collapse runs of blank lines to one
//! 6. blank line before every ATX heading
//! 7. exactly one trailing newline

use once_cell::sync::Lazy;
use regex::Regex;

pub fn clean_markdown(input: &str) -> String {
    let s = strip_outer_fence(input);
    let s = normalise_line_endings(&s);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = space_headings(&s);
    ensure_final_newline(&s)
}

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCE.captures(trimmed) {
        // An inner fence means the outer one is not a wrapper.
        Some(caps) if !caps[1].contains("\n```") => caps[1].to_string(),
        _ => trimmed.to_string(),
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        ['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

static RE_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s").unwrap());

fn space_headings(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 32);
    let mut in_code = false;
    let mut prev_blank = true;
    for line in input.lines() {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
        }
        if !in_code && RE_HEADING.is_match(line) && !prev_blank {
            out.push('\n');
        }
        out.push_str(line);
        out.push('\n');
        prev_blank = line.is_empty();
    }
    out
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{trimmed}\n")
    }
}

/// Keep at most `max_chars` characters, appending `marker` when text was cut.
pub fn limit_text(text: String, max_chars: usize, marker: &str) -> String {
    match text.char_indices().nth(max_chars) {
        None => text,
        Some((cut, _)) => {
            let mut out = text[..cut].to_string();
            out.push_str("\n\n");
            out.push_str(marker);
            out
        }
    }
}
