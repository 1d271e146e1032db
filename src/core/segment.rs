//! Chunk segmentation for smooth reveal.
//!
//! A delta is split into runs of one character class and runs are packed greedily into
//! units of bounded size. A run is never split, so unit boundaries land on word or script
//! edges. Sizes are measured in chars.

use unicode_segmentation::UnicodeSegmentation;

/// Default: deltas shorter than this are emitted as a single unit.
pub const DEFAULT_MIN_SPLIT: usize = 20;
/// Default upper bound on packed unit size.
pub const DEFAULT_MAX_UNIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmenterConfig {
    pub min_split: usize,
    pub max_unit: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_split: DEFAULT_MIN_SPLIT,
            max_unit: DEFAULT_MAX_UNIT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CharClass {
    Ideographic,
    Alphanumeric,
    Whitespace,
    Other,
}

fn classify(grapheme: &str) -> CharClass {
    let Some(ch) = grapheme.chars().next() else {
        return CharClass::Other;
    };
    if is_ideographic(ch) {
        CharClass::Ideographic
    } else if ch.is_alphanumeric() || ch == '_' {
        CharClass::Alphanumeric
    } else if ch.is_whitespace() {
        CharClass::Whitespace
    } else {
        CharClass::Other
    }
}

fn is_ideographic(ch: char) -> bool {
    matches!(
        ch as u32,
        0x3040..=0x30FF // hiragana, katakana
            | 0x3400..=0x4DBF
            | 0x4E00..=0x9FFF
            | 0xAC00..=0xD7AF // hangul syllables
            | 0xF900..=0xFAFF
            | 0x20000..=0x2FA1F
    )
}

/// Splits `text` into runs of graphemes sharing one class.
fn runs(text: &str) -> Vec<&str> {
    let mut runs = Vec::new();
    let mut run_start = 0;
    let mut current: Option<CharClass> = None;

    for (offset, grapheme) in text.grapheme_indices(true) {
        let class = classify(grapheme);
        match current {
            Some(previous) if previous == class => {}
            Some(_) => {
                runs.push(&text[run_start..offset]);
                run_start = offset;
                current = Some(class);
            }
            None => current = Some(class),
        }
    }
    if run_start < text.len() {
        runs.push(&text[run_start..]);
    }
    runs
}

/// Segments `delta` into semantic units. Concatenating the result yields `delta`.
#[must_use]
pub fn segment(delta: &str, config: SegmenterConfig) -> Vec<String> {
    if delta.is_empty() {
        return Vec::new();
    }
    if delta.chars().count() < config.min_split {
        return vec![delta.to_string()];
    }

    let mut units = Vec::new();
    let mut unit = String::new();
    let mut unit_len = 0;

    for run in runs(delta) {
        let run_len = run.chars().count();
        if !unit.is_empty() && unit_len + run_len > config.max_unit {
            units.push(std::mem::take(&mut unit));
            unit_len = 0;
        }
        unit.push_str(run);
        unit_len += run_len;
    }
    if !unit.is_empty() {
        units.push(unit);
    }
    units
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_split: usize, max_unit: usize) -> SegmenterConfig {
        SegmenterConfig {
            min_split,
            max_unit,
        }
    }

    #[test]
    fn short_deltas_stay_whole() {
        assert_eq!(
            segment("hello world", SegmenterConfig::default()),
            vec!["hello world"]
        );
        assert!(segment("", SegmenterConfig::default()).is_empty());
    }

    #[test]
    fn ideographic_run_is_never_split() {
        let units = segment("hello世界!", config(0, 3));
        assert_eq!(units, vec!["hello", "世界!"]);
        assert!(units.iter().any(|unit| unit.contains("世界")));
    }

    #[test]
    fn runs_pack_greedily_up_to_max_unit() {
        let units = segment("the quick brown fox jumps over", config(20, 10));
        assert_eq!(
            units,
            vec!["the quick ", "brown fox ", "jumps over"]
        );
        assert_eq!(units.concat(), "the quick brown fox jumps over");
    }

    #[test]
    fn oversized_run_becomes_its_own_unit() {
        let units = segment("a supercalifragilistic b", config(0, 4));
        assert_eq!(units, vec!["a ", "supercalifragilistic", " b"]);
    }

    #[test]
    fn grapheme_clusters_stay_intact() {
        let units = segment("e\u{301}e\u{301} 🇺🇸🇺🇸", config(0, 1));
        assert_eq!(units.concat(), "e\u{301}e\u{301} 🇺🇸🇺🇸");
        assert!(units.iter().all(|unit| !unit.starts_with('\u{301}')));
    }
}
