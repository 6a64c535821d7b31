use std::sync::LazyLock;

use regex::Regex;

const MAX_LOG_CHARS: usize = 4096;

// CSI, OSC (BEL or ST terminated), DCS/SOS/PM/APC (ST terminated), then any
// other two-byte escape.
static ESCAPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\x1b(?:\[[0-?]*[ -/]*[@-~]|\][^\x07\x1b]*(?:\x07|\x1b\\)?|[PX^_][^\x1b]*(?:\x1b\\)?|.)?",
    )
    .expect("valid regex")
});

/// Makes one line of remote output safe to print on the operator's terminal.
pub fn sanitize_log_line(input: &str) -> String {
    let stripped = ESCAPES.replace_all(input, "");
    let mut out = String::with_capacity(stripped.len().min(MAX_LOG_CHARS));
    let mut count = 0usize;

    for c in stripped.chars() {
        let c = match c {
            '\t' => ' ',
            '\r' | '\n' => continue,
            c if c.is_control() || is_format_control(c) => continue,
            c => c,
        };
        if count == MAX_LOG_CHARS {
            out.push_str(" ...[truncated]");
            break;
        }
        out.push(c);
        count += 1;
    }
    out
}

/// Splits captured output into sanitized, non-empty lines.
pub fn sanitize_output(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(sanitize_log_line)
        .filter(|l| !l.trim().is_empty())
}

fn is_format_control(c: char) -> bool {
    matches!(
        c,
        '\u{061C}' | '\u{200E}' | '\u{200F}' | '\u{202A}'..='\u{202E}' | '\u{2066}'..='\u{2069}'
    )
}
