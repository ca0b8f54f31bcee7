//! `key=value` line parser shared by sensor frames and settings files.

use heapless::String;

/// Longest key or value kept; extra characters are dropped.
pub const FIELD_CAP: usize = 126;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String<FIELD_CAP>,
    pub value: String<FIELD_CAP>,
}

/// Parse one line.
///
/// * `\n`, `>`, `!` and `#` end the line, as does `\r` anywhere but first.
/// * `?` switches to literal mode, in which spaces are kept.
/// * The first `=` after a non-empty key starts the value; later ones are
///   dropped.
/// * Bytes of 127 and above are ignored.
///
/// Yields `None` unless both key and value are non-empty.
pub fn parse_line(line: &[u8]) -> Option<KeyValue> {
    let mut key: String<FIELD_CAP> = String::new();
    let mut value: String<FIELD_CAP> = String::new();
    let mut in_value = false;
    let mut literal = false;

    for (i, &byte) in line.iter().enumerate() {
        if byte >= 127 {
            continue;
        }
        match byte {
            b'\r' if i != 0 => break,
            b'\r' => {}
            b'\n' | b'>' | b'!' | b'#' => break,
            b'?' => literal = true,
            b'=' => {
                if !in_value && !key.is_empty() {
                    in_value = true;
                }
            }
            b' ' if !literal => {}
            _ => {
                let field = if in_value { &mut value } else { &mut key };
                if field.push(char::from(byte)).is_err() {
                    break;
                }
            }
        }
    }

    (in_value && !value.is_empty()).then_some(KeyValue { key, value })
}

/// Leading decimal number of `s`, ignoring trailing garbage (`"12.5V"` → 12.5).
pub fn parse_f32_prefix(s: &str) -> Option<f32> {
    let end = s
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .unwrap_or(s.len());
    s[..end].parse().ok()
}

/// Leading integer of `s`, ignoring trailing garbage (`"45%"` → 45).
pub fn parse_i32_prefix(s: &str) -> Option<i32> {
    let digits_from = usize::from(s.starts_with(['+', '-']));
    let end = s[digits_from..]
        .find(|c: char| !c.is_ascii_digit())
        .map_or(s.len(), |i| i + digits_from);
    s[..end].parse().ok()
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;

    fn pair(line: &str) -> Option<(std::string::String, std::string::String)> {
        parse_line(line.as_bytes()).map(|kv| (kv.key.as_str().into(), kv.value.as_str().into()))
    }

    #[test]
    fn splits_on_first_equals() {
        assert_eq!(pair("WindSpeed=1.3\r\n"), Some(("WindSpeed".into(), "1.3".into())));
        assert_eq!(pair("a=b=c"), Some(("a".into(), "bc".into())));
    }

    #[test]
    fn spaces_are_dropped_unless_literal() {
        assert_eq!(pair("NAME = My Station"), Some(("NAME".into(), "MyStation".into())));
        assert_eq!(pair("?NAME= My Station"), Some(("NAME".into(), " My Station".into())));
    }

    #[test]
    fn terminators_end_the_line() {
        assert_eq!(pair("Light=12#comment"), Some(("Light".into(), "12".into())));
        assert_eq!(pair("# Light=12"), None);
        assert_eq!(pair("\rHumi=40"), Some(("Humi".into(), "40".into())));
        assert_eq!(pair("Humi\r=40"), None);
    }

    #[test]
    fn empty_key_or_value_yields_nothing() {
        assert_eq!(pair("=12"), None);
        assert_eq!(pair("WindDir="), None);
        assert_eq!(pair("==========================================="), None);
        assert_eq!(pair("no separator"), None);
    }

    #[test]
    fn high_bytes_are_ignored() {
        assert_eq!(
            parse_line(b"Wind\xffDir=1\x8080").map(|kv| kv.value),
            Some(String::try_from("180").unwrap())
        );
    }

    #[test]
    fn number_prefixes() {
        assert_eq!(parse_f32_prefix("3.95V"), Some(3.95));
        assert_eq!(parse_f32_prefix("-2.5"), Some(-2.5));
        assert_eq!(parse_f32_prefix("abc"), None);
        assert_eq!(parse_i32_prefix("45%"), Some(45));
        assert_eq!(parse_i32_prefix("-12"), Some(-12));
        assert_eq!(parse_i32_prefix("x"), None);
    }
}
