//! Equal-size partitioning of ordered item lists.
//!
//! A single model call must stay within size limits, so checklists and large
//! documents are split into bounded chunks. Splitting is *equalized*: 137
//! items with a maximum of 50 become 46/46/45, never 50/50/37.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// One partition of a checklist, tagged with its position.
///
/// `chunk_index` is zero-based and flows into cached results so that
/// per-chunk output can be reassembled in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistChunk<T> {
    pub chunk_index: usize,
    pub items: Vec<T>,
}

/// Partition `items` into `ceil(n / max_size)` groups whose sizes differ by
/// at most one.
///
/// The first `n mod k` groups receive `floor(n / k) + 1` items, the rest
/// `floor(n / k)`. Concatenating the groups yields the input order.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `max_size < 1`.
///
/// # Example
///
/// ```
/// use reviewq_core::split_equally;
///
/// let items: Vec<u32> = (0..137).collect();
/// let sizes: Vec<usize> = split_equally(&items, 50)
///     .unwrap()
///     .iter()
///     .map(Vec::len)
///     .collect();
/// assert_eq!(sizes, vec![46, 46, 45]);
/// ```
pub fn split_equally<T: Clone>(items: &[T], max_size: i64) -> Result<Vec<Vec<T>>> {
    if max_size < 1 {
        return Err(Error::InvalidInput(format!(
            "max chunk size must be at least 1, got {max_size}"
        )));
    }

    let n = items.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let max_size = usize::try_from(max_size).unwrap_or(usize::MAX);
    let k = n.div_ceil(max_size);
    let base = n / k;
    let remainder = n % k;

    let mut chunks = Vec::with_capacity(k);
    let mut start = 0;
    for i in 0..k {
        let len = if i < remainder { base + 1 } else { base };
        chunks.push(items[start..start + len].to_vec());
        start += len;
    }
    Ok(chunks)
}

/// [`split_equally`] with each partition tagged by its zero-based index.
pub fn split_into_chunks<T: Clone>(items: &[T], max_size: i64) -> Result<Vec<ChecklistChunk<T>>> {
    Ok(split_equally(items, max_size)?
        .into_iter()
        .enumerate()
        .map(|(chunk_index, items)| ChecklistChunk { chunk_index, items })
        .collect())
}

/// Split document text into at most `parts` near-equal pieces.
///
/// Lines are kept whole when there are at least `parts` of them; otherwise
/// the text is divided on character boundaries. Empty text yields no parts.
pub fn split_text_into_parts(text: &str, parts: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }
    let parts = parts.max(1);
    if parts == 1 {
        return vec![text.to_string()];
    }

    let lines: Vec<&str> = text.split_inclusive('\n').collect();
    if lines.len() >= parts {
        let max = lines.len().div_ceil(parts) as i64;
        return split_equally(&lines, max)
            .unwrap_or_default()
            .into_iter()
            .map(|group| group.concat())
            .collect();
    }

    let chars: Vec<char> = text.chars().collect();
    let max = chars.len().div_ceil(parts) as i64;
    split_equally(&chars, max)
        .unwrap_or_default()
        .into_iter()
        .map(|group| group.into_iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizes<T>(chunks: &[Vec<T>]) -> Vec<usize> {
        chunks.iter().map(Vec::len).collect()
    }

    #[test]
    fn test_137_items_max_50_equalizes_remainder() {
        let items: Vec<usize> = (0..137).collect();
        let chunks = split_equally(&items, 50).unwrap();
        assert_eq!(sizes(&chunks), vec![46, 46, 45]);
    }

    #[test]
    fn test_exact_multiple() {
        let items: Vec<usize> = (0..100).collect();
        assert_eq!(sizes(&split_equally(&items, 50).unwrap()), vec![50, 50]);
    }

    #[test]
    fn test_fewer_items_than_max() {
        let items = vec!["a", "b", "c"];
        let chunks = split_equally(&items, 10).unwrap();
        assert_eq!(chunks, vec![vec!["a", "b", "c"]]);
    }

    #[test]
    fn test_max_size_one() {
        let items = vec![1, 2, 3];
        assert_eq!(
            split_equally(&items, 1).unwrap(),
            vec![vec![1], vec![2], vec![3]]
        );
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let items: Vec<i32> = Vec::new();
        assert!(split_equally(&items, 5).unwrap().is_empty());
        assert!(split_into_chunks(&items, 5).unwrap().is_empty());
    }

    #[test]
    fn test_zero_and_negative_max_rejected() {
        let items = vec![1, 2, 3];
        assert!(matches!(
            split_equally(&items, 0),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            split_equally(&items, -4),
            Err(Error::InvalidInput(_))
        ));
        // Even empty input must reject an invalid size.
        let empty: Vec<i32> = Vec::new();
        assert!(split_equally(&empty, 0).is_err());
    }

    #[test]
    fn test_properties_hold_for_all_small_inputs() {
        for n in 0..=120usize {
            let items: Vec<usize> = (0..n).collect();
            for m in 1..=25i64 {
                let chunks = split_equally(&items, m).unwrap();

                assert_eq!(chunks.len(), n.div_ceil(m as usize), "n={n} m={m}");

                if let (Some(max), Some(min)) = (
                    chunks.iter().map(Vec::len).max(),
                    chunks.iter().map(Vec::len).min(),
                ) {
                    assert!(max - min <= 1, "n={n} m={m}");
                    assert!(max <= m as usize, "n={n} m={m}");
                }

                let flattened: Vec<usize> = chunks.into_iter().flatten().collect();
                assert_eq!(flattened, items, "n={n} m={m}");
            }
        }
    }

    #[test]
    fn test_larger_chunks_come_first() {
        let items: Vec<usize> = (0..11).collect();
        assert_eq!(sizes(&split_equally(&items, 4).unwrap()), vec![4, 4, 3]);
        let items: Vec<usize> = (0..10).collect();
        assert_eq!(sizes(&split_equally(&items, 4).unwrap()), vec![4, 3, 3]);
    }

    #[test]
    fn test_split_into_chunks_indexes_from_zero() {
        let items: Vec<usize> = (0..7).collect();
        let chunks = split_into_chunks(&items, 3).unwrap();
        let indexes: Vec<usize> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(chunks[0].items, vec![0, 1, 2]);
        assert_eq!(chunks[2].items, vec![5, 6]);
    }

    #[test]
    fn test_split_text_by_lines() {
        let text = "one\ntwo\nthree\nfour\nfive\n";
        let parts = split_text_into_parts(text, 2);
        assert_eq!(parts, vec!["one\ntwo\nthree\n", "four\nfive\n"]);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_text_single_line_by_chars() {
        let text = "abcdefghij";
        let parts = split_text_into_parts(text, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn test_split_text_multibyte_safe() {
        let text = "ééééé";
        let parts = split_text_into_parts(text, 2);
        assert_eq!(parts.concat(), text);
        assert_eq!(parts, vec!["ééé", "éé"]);
    }

    #[test]
    fn test_split_text_edge_cases() {
        assert!(split_text_into_parts("", 4).is_empty());
        assert_eq!(split_text_into_parts("abc", 0), vec!["abc"]);
        assert_eq!(split_text_into_parts("abc", 1), vec!["abc"]);
    }
}
