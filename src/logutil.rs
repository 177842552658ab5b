//! Keeps raw modem text on one log line.

/// Longest line an AT modem produces: a full 240-byte `+RCV` payload plus its header fields.
pub const MODEM_LINE_MAX: usize = 256;

/// Render modem text for a single-line log entry. Control characters take Rust escape form
/// (`\r`, `\n`, `\u{7}`); anything past [`MODEM_LINE_MAX`] characters is replaced by a count.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MODEM_LINE_MAX));
    for c in s.chars().take(MODEM_LINE_MAX) {
        if c.is_control() || c == '\\' {
            out.extend(c.escape_default());
        } else {
            out.push(c);
        }
    }
    let rest = s.chars().count().saturating_sub(MODEM_LINE_MAX);
    if rest > 0 {
        out.push_str(&format!("...(+{} chars)", rest));
    }
    out
}
