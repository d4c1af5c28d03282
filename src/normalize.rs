//! Canonical text cleanup applied to every extracted document.

/// Normalizes raw extracted text (HTML or PDF) into a canonical form safe
/// for storage and tokenization.
///
/// - strips NUL and other non-printable control characters (newline and
///   tab survive; tabs are then folded by whitespace collapsing),
/// - collapses runs of spaces/tabs within a line to a single space,
/// - collapses runs of two or more newlines to exactly one blank line,
/// - trims leading and trailing whitespace.
///
/// Idempotent: `normalize(normalize(x)) == normalize(x)`. Empty input is
/// returned unchanged.
pub fn normalize(text: &str) -> String {
    let filtered: String = text
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect();

    let mut out = String::with_capacity(filtered.len());
    let mut pending_blank = false;
    for line in filtered.split('\n') {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            // Empty line: remember it so a run of any length renders as
            // one blank line between the surrounding content lines.
            pending_blank = true;
            continue;
        };
        if !out.is_empty() {
            out.push('\n');
            if pending_blank {
                out.push('\n');
            }
        }
        pending_blank = false;
        out.push_str(first);
        for word in words {
            out.push(' ');
            out.push_str(word);
        }
    }
    out
}
