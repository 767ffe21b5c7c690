//! Splitting a response into the minimal units delivered per tick.

use unicode_segmentation::UnicodeSegmentation;
use xsimple_core::UnitGranularity;

/// Split `text` into delivery units, in source order.
///
/// Concatenating the returned slices always reproduces `text`.
pub fn split_units(text: &str, granularity: UnitGranularity) -> Vec<&str> {
    match granularity {
        UnitGranularity::Char => text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect(),
        UnitGranularity::Grapheme => text.graphemes(true).collect(),
    }
}

/// Number of units `text` splits into.
pub fn count_units(text: &str, granularity: UnitGranularity) -> usize {
    match granularity {
        UnitGranularity::Char => text.chars().count(),
        UnitGranularity::Grapheme => text.graphemes(true).count(),
    }
}
