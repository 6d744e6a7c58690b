//! Control character escaping.

/// Mnemonics for the first 33 character codes. The last entry (`Space`) is
/// reserved; a literal space is never escaped.
pub const CONTROL_NAMES: [&str; 33] = [
    "NUL", "SOH", "STX", "ETX", "EOT", "ENQ", "ACK", "BEL", "BS", "TAB", "LF", "VT", "FF", "CR",
    "SO", "SI", "DLE", "DC1", "DC2", "DC3", "DC4", "NAK", "SYN", "ETB", "CAN", "EM", "SUB", "ESC",
    "FS", "GS", "RS", "US", "Space",
];

/// Returns the printable form of `c`: `<NAME>` for control codes below 32
/// other than horizontal tab, otherwise the character itself.
pub fn escape_char(c: char) -> String {
    match control_name(c) {
        Some(name) => format!("<{}>", name),
        None => c.to_string(),
    }
}

fn control_name(c: char) -> Option<&'static str> {
    let code = c as u32;
    if code < 32 && c != '\t' {
        Some(CONTROL_NAMES[code as usize])
    } else {
        None
    }
}

/// Escapes every character of `text`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if let Some(name) = control_name(c) {
            out.push('<');
            out.push_str(name);
            out.push('>');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_codes_use_mnemonics() {
        assert_eq!(escape("\x00"), "<NUL>");
        assert_eq!(escape("\x01"), "<SOH>");
        assert_eq!(escape("\x1b[0m"), "<ESC>[0m");
        assert_eq!(escape("\x1f"), "<US>");
        assert_eq!(escape_char('\r'), "<CR>");
    }

    #[test]
    fn tab_space_and_printable_pass_through() {
        assert_eq!(escape("a\tb c"), "a\tb c");
        assert_eq!(escape("\x7f"), "\x7f");
        assert_eq!(escape("żółw"), "żółw");
        assert_eq!(escape_char(' '), " ");
    }

    #[test]
    fn escaping_is_idempotent() {
        let once = escape("\x02data\x03\x07");
        assert_eq!(once, "<STX>data<ETX><BEL>");
        assert_eq!(escape(&once), once);
    }

    #[test]
    fn escape_matches_escape_char() {
        let input: String = (0u8..128).map(char::from).collect();
        let by_char: String = input.chars().map(escape_char).collect();
        assert_eq!(escape(&input), by_char);
    }
}
