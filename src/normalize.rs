//! Filename-safe text normalization. Folds diacritics and full-width Latin, transliterates the rest,
//! then keeps only the POSIX portable filename characters (plus space).

use unicode_normalization::UnicodeNormalization;
use unicode_properties::{GeneralCategory, UnicodeGeneralCategory};

/// Normalize `input` into text that is safe to use as part of a file name.
///
/// ASCII input skips the Unicode passes. Every result is trimmed and restricted to
/// `[A-Za-z0-9._- ]`, so `normalize(normalize(x)) == normalize(x)`.
pub fn normalize(input: &str) -> String {
    let input = input.trim();
    if input.is_empty() {
        return String::new();
    }
    if input.is_ascii() {
        return portable(input);
    }

    let mut output: String = strip_nonspacing_marks(input).chars().map(fold_width).collect();
    if output.is_empty() {
        output = input.to_string();
    }

    // Vietnamese đ/Đ carry a stroke, not a combining mark.
    output = output.replace('đ', "d").replace('Đ', "D");

    if !output.is_ascii() {
        output = deunicode::deunicode(&output);
    }

    portable(&output)
}

/// NFD, drop nonspacing marks (Mn), NFC. Spacing marks (Mc) stay for transliteration.
fn strip_nonspacing_marks(s: &str) -> String {
    s.nfd()
        .filter(|c| c.general_category() != GeneralCategory::NonspacingMark)
        .nfc()
        .collect()
}

/// Full-width Latin letters to their ASCII forms.
fn fold_width(c: char) -> char {
    match c {
        '\u{FF21}'..='\u{FF3A}' | '\u{FF41}'..='\u{FF5A}' => {
            char::from_u32(c as u32 - 0xFEE0).unwrap_or(c)
        }
        _ => c,
    }
}

fn portable(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' '))
        .collect::<String>()
        .trim()
        .to_string()
}
