//! First-letter bucketing.
//!
//! Values are grouped by the primary collation letter of their sort text: case and accents are
//! ignored (`é`, `E` and `e` share a bucket) and the bucket is labelled with the letter as it
//! appears on its first value. Buckets smaller than a configured minimum are then merged into a
//! neighbour until every bucket is large enough or a single bucket remains.

use serde::{Deserialize, Serialize};
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

/// A run of adjacent values whose first letters range from `first` to `last`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LetterInterval {
    pub first: String,
    pub last: String,
    pub length: usize,
}

impl LetterInterval {
    pub fn new(first: &str, last: &str, length: usize) -> LetterInterval {
        LetterInterval {
            first: first.to_string(),
            last: last.to_string(),
            length,
        }
    }

    /// `X` for a single letter, `X - Y` for a merged range.
    pub fn label(&self) -> String {
        if self.first == self.last {
            self.first.clone()
        } else {
            format!("{} - {}", self.first, self.last)
        }
    }
}

/// The first character of `text`, upper-cased. Blank text sorts under a space.
pub fn leading_letter(text: &str) -> String {
    text.chars()
        .next()
        .map(|c| c.to_uppercase().collect::<String>())
        .unwrap_or_else(|| " ".to_string())
}

/// Primary-strength collation key of a leading letter: the upper-cased base character with any
/// combining marks removed.
pub fn collation_key(letter: &str) -> String {
    letter
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .take(1)
        .flat_map(char::to_uppercase)
        .collect()
}

/// Bucket label per value (in input order), plus the intervals of adjacent equal letters.
/// Intervals are only collected when `collect_intervals` is set.
pub fn letter_buckets<'a, I>(sort_texts: I, collect_intervals: bool) -> (Vec<String>, Vec<LetterInterval>)
where
    I: IntoIterator<Item = &'a str>,
{
    let mut labels = Vec::new();
    let mut intervals = Vec::new();
    let mut last_key: Option<String> = None;
    let mut last_letter = " ".to_string();
    let mut run_start = 0;
    for (idx, text) in sort_texts.into_iter().enumerate() {
        let letter = leading_letter(text);
        let key = collation_key(&letter);
        if last_key.as_ref() != Some(&key) {
            if collect_intervals && idx > 0 {
                intervals.push(LetterInterval::new(&last_letter, &last_letter, idx - run_start));
                run_start = idx;
            }
            last_letter = letter;
            last_key = Some(key);
        }
        labels.push(last_letter.clone());
    }
    if collect_intervals && !labels.is_empty() {
        intervals.push(LetterInterval::new(
            &last_letter,
            &last_letter,
            labels.len() - run_start,
        ));
    }
    (labels, intervals)
}

/// Merge intervals shorter than `min_length` into a neighbour, one at a time, until nothing
/// changes or a single interval is left.
///
/// A short interval goes into whichever neighbour is currently shorter; on a tie it joins the
/// following interval. The first interval can only merge forward and the last only backward.
pub fn merge_short_intervals(
    mut intervals: Vec<LetterInterval>,
    min_length: usize,
) -> Vec<LetterInterval> {
    let mut changed = true;
    while changed && intervals.len() > 1 {
        changed = false;
        let short = intervals.iter().position(|i| i.length < min_length);
        if let Some(idx) = short {
            let prev_len = if idx == 0 {
                usize::MAX
            } else {
                intervals[idx - 1].length
            };
            let next_len = intervals
                .get(idx + 1)
                .map(|i| i.length)
                .unwrap_or(usize::MAX);
            let interval = intervals.remove(idx);
            if prev_len < next_len {
                let prev = &mut intervals[idx - 1];
                prev.last = interval.last;
                prev.length += interval.length;
            } else {
                let next = &mut intervals[idx];
                next.first = interval.first;
                next.length += interval.length;
            }
            changed = true;
        }
    }
    intervals
}

/// Final first-letter bucket label of every value. With `min_length > 1`, small buckets are
/// merged into `X - Y` ranges; when merging collapses everything into one range, the plain
/// per-letter buckets are kept instead.
pub fn first_letter_labels<'a, I>(sort_texts: I, min_length: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let merge = min_length > 1;
    let (mut labels, intervals) = letter_buckets(sort_texts, merge);
    if !merge {
        return labels;
    }
    let merged = merge_short_intervals(intervals, min_length);
    tracing::trace!("First letter intervals: {:?}", merged);
    if merged.len() > 1 {
        let mut cursor = 0;
        for interval in merged.iter() {
            let label = interval.label();
            for slot in labels.iter_mut().skip(cursor).take(interval.length) {
                *slot = label.clone();
            }
            cursor += interval.length;
        }
    }
    labels
}
