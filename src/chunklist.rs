use tinyvec::ArrayVec;

/// Compile-time cap on live ranges tracked per transaction (§4.1, §5: "no
/// separate allocator", chunk arrays embedded in the transaction record).
pub const MAX_CHUNKS: usize = 64;

/// Compile-time cap on NAK segments enumerated in one PDU (§4.5 "NAK
/// generation").
pub const MAX_NAK_SEGMENTS: usize = 16;

/// A non-overlapping, half-open byte range `[offset, offset + length)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ChunkRange {
    pub offset: u64,
    pub length: u64,
}

impl ChunkRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    fn overlaps_or_touches(&self, other: &ChunkRange) -> bool {
        self.offset <= other.end() && other.offset <= self.end()
    }
}

/// Tracks contiguous received byte ranges for one transaction.
///
/// Invariants (P1 in the spec's testable-properties list): the ranges held
/// are sorted by offset, pairwise disjoint (and non-adjacent — adjacent
/// ranges are always merged), and each has `length > 0`.
#[derive(Debug, Clone, Default)]
pub struct ChunkList {
    ranges: ArrayVec<[ChunkRange; MAX_CHUNKS]>,
}

impl ChunkList {
    pub fn new() -> Self {
        ChunkList::default()
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Insert `[offset, offset + length)`, merging with any overlapping or
    /// adjacent existing range. If the insertion would grow the set past
    /// `MAX_CHUNKS`, the smallest range is evicted first (tie-break:
    /// earliest offset) — the spec's O1 resolution.
    pub fn add(&mut self, offset: u64, length: u64) {
        if length == 0 {
            return;
        }
        let incoming = ChunkRange { offset, length };

        let mut merged = incoming;
        let mut i = 0;
        while i < self.ranges.len() {
            if merged.overlaps_or_touches(&self.ranges[i]) {
                let r = self.ranges.remove(i);
                merged = ChunkRange {
                    offset: merged.offset.min(r.offset),
                    length: merged.end().max(r.end()) - merged.offset.min(r.offset),
                };
                // Restart the scan: the merged range may now touch a range
                // we've already passed.
                i = 0;
            } else {
                i += 1;
            }
        }

        let pos = self
            .ranges
            .iter()
            .position(|r| r.offset > merged.offset)
            .unwrap_or(self.ranges.len());

        if self.ranges.len() == MAX_CHUNKS {
            self.evict_smallest();
        }
        self.ranges.insert(pos.min(self.ranges.len()), merged);
    }

    fn evict_smallest(&mut self) {
        if self.ranges.is_empty() {
            return;
        }
        let mut victim = 0;
        for (i, r) in self.ranges.iter().enumerate().skip(1) {
            let current = self.ranges[victim];
            if r.length < current.length || (r.length == current.length && r.offset < current.offset) {
                victim = i;
            }
        }
        self.ranges.remove(victim);
    }

    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }

    /// Whether `[0, len)` is fully covered by the tracked ranges.
    pub fn is_covered(&self, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        let mut cursor = 0u64;
        for r in self.ranges.iter() {
            if r.offset > cursor {
                return false;
            }
            cursor = cursor.max(r.end());
            if cursor >= len {
                return true;
            }
        }
        false
    }

    /// Enumerate gaps in `[start_offset, total_len)` in ascending order,
    /// invoking `cb` for each, stopping after `max_gaps` calls or once the
    /// range is exhausted.
    pub fn compute_gaps<F: FnMut(&ChunkList, ChunkRange)>(
        &self,
        total_len: u64,
        start_offset: u64,
        max_gaps: usize,
        mut cb: F,
    ) {
        if start_offset >= total_len || max_gaps == 0 {
            return;
        }
        let mut cursor = start_offset;
        let mut emitted = 0;
        for r in self.ranges.iter() {
            if emitted >= max_gaps {
                return;
            }
            if r.offset > cursor {
                let gap_end = r.offset.min(total_len);
                if gap_end > cursor {
                    cb(
                        self,
                        ChunkRange {
                            offset: cursor,
                            length: gap_end - cursor,
                        },
                    );
                    emitted += 1;
                }
            }
            cursor = cursor.max(r.end());
            if cursor >= total_len {
                return;
            }
        }
        if emitted < max_gaps && cursor < total_len {
            cb(
                self,
                ChunkRange {
                    offset: cursor,
                    length: total_len - cursor,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(cl: &ChunkList) -> Vec<(u64, u64)> {
        cl.ranges().iter().map(|r| (r.offset, r.length)).collect()
    }

    #[test]
    fn add_merges_adjacent_and_overlapping() {
        let mut cl = ChunkList::new();
        cl.add(0, 5);
        cl.add(5, 5);
        assert_eq!(ranges(&cl), vec![(0, 10)]);

        cl.add(3, 4); // fully inside, no-op effectively
        assert_eq!(ranges(&cl), vec![(0, 10)]);
    }

    #[test]
    fn add_keeps_disjoint_ranges_sorted() {
        let mut cl = ChunkList::new();
        cl.add(10, 5);
        cl.add(0, 5);
        assert_eq!(ranges(&cl), vec![(0, 5), (10, 5)]);
        cl.add(5, 5); // bridges the two
        assert_eq!(ranges(&cl), vec![(0, 15)]);
    }

    #[test]
    fn is_covered_and_total_bytes() {
        let mut cl = ChunkList::new();
        assert!(!cl.is_covered(10));
        cl.add(0, 5);
        cl.add(5, 5);
        assert_eq!(cl.total_bytes(), 10);
        assert!(cl.is_covered(10));
        assert!(cl.is_covered(8));
        assert!(!cl.is_covered(11));
    }

    #[test]
    fn compute_gaps_reports_single_gap() {
        let mut cl = ChunkList::new();
        cl.add(0, 5);
        let mut gaps = vec![];
        cl.compute_gaps(10, 0, MAX_NAK_SEGMENTS, |_, g| gaps.push((g.offset, g.end())));
        assert_eq!(gaps, vec![(5, 10)]);
    }

    #[test]
    fn compute_gaps_reports_multiple_gaps_in_order() {
        let mut cl = ChunkList::new();
        cl.add(2, 2); // [2,4)
        cl.add(6, 2); // [6,8)
        let mut gaps = vec![];
        cl.compute_gaps(10, 0, MAX_NAK_SEGMENTS, |_, g| gaps.push((g.offset, g.end())));
        assert_eq!(gaps, vec![(0, 2), (4, 6), (8, 10)]);
    }

    #[test]
    fn compute_gaps_respects_cap() {
        let mut cl = ChunkList::new();
        cl.add(1, 1);
        cl.add(3, 1);
        cl.add(5, 1);
        let mut gaps = vec![];
        cl.compute_gaps(6, 0, 2, |_, g| gaps.push((g.offset, g.end())));
        assert_eq!(gaps, vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn eviction_removes_smallest_range_tie_break_earliest_offset() {
        let mut cl = ChunkList::new();
        // Fill to capacity with disjoint singleton ranges far apart so none merge.
        for i in 0..MAX_CHUNKS {
            cl.add((i as u64) * 100, 2);
        }
        assert_eq!(cl.ranges().len(), MAX_CHUNKS);

        // Make range at offset 0 the unique smallest, then overflow.
        // First equalize: all ranges currently length 2, tie-break picks
        // the earliest offset (index 0) when we force one more insert.
        cl.add((MAX_CHUNKS as u64) * 100, 2);
        assert_eq!(cl.ranges().len(), MAX_CHUNKS);
        assert!(cl.ranges().iter().all(|r| r.offset != 0));
    }

    #[test]
    fn every_range_has_positive_length_and_is_disjoint() {
        let mut cl = ChunkList::new();
        cl.add(0, 3);
        cl.add(10, 3);
        cl.add(20, 3);
        let rs = cl.ranges();
        for r in rs {
            assert!(r.length > 0);
        }
        for w in rs.windows(2) {
            assert!(w[0].end() <= w[1].offset);
        }
    }
}
