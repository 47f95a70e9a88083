//! Gap filling for sentences the aligner could not locate.
//!
//! Missing sentences between two known ranges share the gap equally. A gap
//! that crosses into a new audio file is placed at the start of the new file.
//! A gap with no room borrows a sliver from the range to its right so no
//! inserted range is empty.

use super::alignment::SentenceRange;

/// Largest slice of a neighbouring range lent to an empty gap.
const MAX_BORROW: f64 = 0.25;

/// Fill every missing id from 0 to the last known range.
///
/// `previous` is the last range of the preceding chapter. When it lies in the
/// same audio file as this chapter's first known range, a leading gap starts
/// where it ended; otherwise the leading gap starts at 0.
///
/// The result is sorted by id, has no missing ids up to the last known one,
/// and neighbouring ranges in the same file touch exactly.
pub fn interpolate_sentence_ranges(ranges: &[SentenceRange], previous: Option<&SentenceRange>) -> Vec<SentenceRange> {
    let mut known = ranges.to_vec();
    known.sort_by_key(|range| range.id);
    known.dedup_by_key(|range| range.id);

    let mut out: Vec<SentenceRange> = Vec::with_capacity(known.last().map(|r| r.id + 1).unwrap_or(0));
    let mut last: Option<SentenceRange> = None;

    for mut range in known {
        let first_missing = last.as_ref().map(|prev| prev.id + 1).unwrap_or(0);

        if range.id > first_missing {
            let gap_start = match last.as_ref().or(if first_missing == 0 { previous } else { None }) {
                Some(prev) if prev.audiofile == range.audiofile => prev.end,
                _ => 0.0,
            };
            fill_gap(&mut out, first_missing..range.id, gap_start, &mut range);
        }

        out.push(range.clone());
        last = Some(range);
    }

    for i in 1..out.len() {
        if out[i - 1].audiofile == out[i].audiofile {
            out[i - 1].end = out[i].start;
        }
    }

    out
}

/// Split `[start, right.start]` equally over `ids`, borrowing from `right`
/// when there is no room.
fn fill_gap(out: &mut Vec<SentenceRange>, ids: std::ops::Range<usize>, start: f64, right: &mut SentenceRange) {
    let count = ids.len();
    let (start, end) = if right.start - start > 0.0 {
        (start, right.start)
    } else {
        let sliver = MAX_BORROW.min((right.end - right.start) / 2.0).max(0.0);
        let start = right.start;
        right.start += sliver;
        (start, right.start)
    };

    let step = (end - start) / count as f64;
    for (k, id) in ids.enumerate() {
        let range_end = if k + 1 == count { end } else { start + step * (k + 1) as f64 };
        out.push(SentenceRange {
            id,
            start: start + step * k as f64,
            end: range_end,
            audiofile: right.audiofile.clone(),
        });
    }
}

/// Give sentences after the last known range consecutive `sliver`-long ranges.
pub fn fill_trailing_sentences(ranges: &[SentenceRange], sentence_count: usize, sliver: f64) -> Vec<SentenceRange> {
    let mut out = ranges.to_vec();
    let Some(last) = out.last().cloned() else {
        return out;
    };

    let mut start = last.end;
    for id in last.id + 1..sentence_count {
        out.push(SentenceRange {
            id,
            start,
            end: start + sliver,
            audiofile: last.audiofile.clone(),
        });
        start += sliver;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(id: usize, start: f64, end: f64, file: &str) -> SentenceRange {
        SentenceRange {
            id,
            start,
            end,
            audiofile: file.to_string(),
        }
    }

    fn assert_well_formed(ranges: &[SentenceRange]) {
        for (i, r) in ranges.iter().enumerate() {
            assert_eq!(r.id, i, "ids must be gap-free: {:?}", ranges);
            assert!(r.end >= r.start, "{:?}", r);
        }
        for pair in ranges.windows(2) {
            if pair[0].audiofile == pair[1].audiofile {
                assert_eq!(pair[0].end, pair[1].start, "{:?}", pair);
            }
        }
    }

    #[test]
    fn test_contiguous_input_is_unchanged() {
        let ranges = vec![range(0, 0.0, 5.0, "1.mp3"), range(1, 5.0, 10.0, "1.mp3")];
        assert_eq!(interpolate_sentence_ranges(&ranges, None), ranges);
    }

    #[test]
    fn test_equal_split_between_known_ranges() {
        let ranges = vec![range(0, 0.0, 2.0, "1.mp3"), range(3, 8.0, 10.0, "1.mp3")];
        let out = interpolate_sentence_ranges(&ranges, None);
        assert_well_formed(&out);
        assert_eq!(out[1], range(1, 2.0, 5.0, "1.mp3"));
        assert_eq!(out[2], range(2, 5.0, 8.0, "1.mp3"));
        assert_eq!(out[3], range(3, 8.0, 10.0, "1.mp3"));
    }

    #[test]
    fn test_leading_gap_uses_previous_chapter() {
        let previous = range(12, 30.0, 34.0, "1.mp3");
        let ranges = vec![range(2, 40.0, 45.0, "1.mp3")];
        let out = interpolate_sentence_ranges(&ranges, Some(&previous));
        assert_well_formed(&out);
        assert_eq!(out[0], range(0, 34.0, 37.0, "1.mp3"));
        assert_eq!(out[1], range(1, 37.0, 40.0, "1.mp3"));

        // a previous range in another file is ignored
        let previous = range(12, 30.0, 34.0, "0.mp3");
        let out = interpolate_sentence_ranges(&ranges, Some(&previous));
        assert_eq!(out[0], range(0, 0.0, 20.0, "1.mp3"));
    }

    #[test]
    fn test_gap_across_file_boundary_restarts_at_zero() {
        let ranges = vec![range(0, 50.0, 60.0, "1.mp3"), range(2, 4.0, 9.0, "2.mp3")];
        let out = interpolate_sentence_ranges(&ranges, None);
        assert_well_formed(&out);
        assert_eq!(out[0], range(0, 50.0, 60.0, "1.mp3"));
        assert_eq!(out[1], range(1, 0.0, 4.0, "2.mp3"));
    }

    #[test]
    fn test_empty_gap_borrows_a_sliver() {
        let ranges = vec![range(0, 0.0, 3.0, "1.mp3"), range(2, 3.0, 6.0, "1.mp3")];
        let out = interpolate_sentence_ranges(&ranges, None);
        assert_well_formed(&out);
        assert_eq!(out[1], range(1, 3.0, 3.25, "1.mp3"));
        assert_eq!(out[2], range(2, 3.25, 6.0, "1.mp3"));

        let ranges = vec![range(1, 0.0, 0.2, "1.mp3")];
        let out = interpolate_sentence_ranges(&ranges, None);
        assert_well_formed(&out);
        assert_eq!(out[0], range(0, 0.0, 0.1, "1.mp3"));
        assert_eq!(out[1], range(1, 0.1, 0.2, "1.mp3"));
    }

    #[test]
    fn test_unsorted_input_and_duplicates() {
        let ranges = vec![range(4, 8.0, 10.0, "1.mp3"), range(0, 0.0, 2.0, "1.mp3"), range(4, 8.0, 10.0, "1.mp3")];
        let out = interpolate_sentence_ranges(&ranges, None);
        assert_well_formed(&out);
        assert_eq!(out.len(), 5);
        assert_eq!(out[4].start, 8.0);
    }

    #[test]
    fn test_empty_input() {
        assert!(interpolate_sentence_ranges(&[], None).is_empty());
    }

    #[test]
    fn test_fill_trailing_sentences() {
        let ranges = vec![range(0, 0.0, 2.0, "1.mp3")];
        let out = fill_trailing_sentences(&ranges, 3, 0.25);
        assert_eq!(out[1], range(1, 2.0, 2.25, "1.mp3"));
        assert_eq!(out[2], range(2, 2.25, 2.5, "1.mp3"));
        assert_well_formed(&out);
        assert!(fill_trailing_sentences(&[], 3, 0.25).is_empty());
    }
}
