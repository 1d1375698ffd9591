//! Per-catalog match bookkeeping for one query or one streamed table.
//!
//! Hits for a source row all arrive before the next row is searched, so a
//! change of source id is the row boundary. At each boundary every catalog
//! that saw the row gains one matched source, however many of its entries
//! matched.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchState {
    /// Entries matched since the last reset.
    pub match_count: u64,
    pub seen_this_source: bool,
    /// Source rows matched by at least one entry of the catalog.
    pub sources_matched: u64,
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    states: Vec<MatchState>,
    current: Option<u64>,
    nmatch: u64,
    nomatch: u64,
}

impl Aggregator {
    pub fn new(ncatalogs: usize) -> Self { Self { states: vec![MatchState::default(); ncatalogs], ..Self::default() } }

    /// Marks the start of work for `source_id`; closes the previous row if
    /// the id changed.
    pub fn observe(&mut self, source_id: u64) {
        if self.current != Some(source_id) {
            self.flush();
            self.current = Some(source_id);
        }
    }

    /// One matched entry of `catalog` for the current row.
    pub fn record(&mut self, catalog: usize) {
        if let Some(s) = self.states.get_mut(catalog) {
            s.match_count += 1;
            s.seen_this_source = true;
        }
    }

    /// Closes the last row.
    pub fn finish(&mut self) { self.flush(); }

    fn flush(&mut self) {
        if self.current.take().is_none() {
            return;
        }
        let mut any = false;
        for s in &mut self.states {
            if s.seen_this_source {
                s.sources_matched += 1;
                any = true;
            }
            s.seen_this_source = false;
            s.match_count = 0;
        }
        if any { self.nmatch += 1 } else { self.nomatch += 1 }
    }

    pub fn states(&self) -> &[MatchState] { &self.states }

    /// Rows matched by some catalog.
    pub fn nmatch(&self) -> u64 { self.nmatch }

    /// Rows matched by none.
    pub fn nomatch(&self) -> u64 { self.nomatch }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_entries_one_row_count_once() {
        let mut agg = Aggregator::new(2);
        agg.observe(0);
        agg.record(0);
        agg.record(0);
        agg.observe(1);
        agg.observe(2);
        agg.record(0);
        agg.record(1);
        agg.finish();
        assert_eq!(agg.states()[0].sources_matched, 2);
        assert_eq!(agg.states()[1].sources_matched, 1);
        assert_eq!((agg.nmatch(), agg.nomatch()), (2, 1));
        assert!(agg.states().iter().all(|s| !s.seen_this_source && s.match_count == 0));
    }

    #[test]
    fn finish_without_rows_is_empty() {
        let mut agg = Aggregator::new(1);
        agg.finish();
        agg.finish();
        assert_eq!(agg.states()[0], MatchState::default());
        assert_eq!((agg.nmatch(), agg.nomatch()), (0, 0));
    }

    #[test]
    fn region_counts_stay_until_finish() {
        let mut agg = Aggregator::new(1);
        agg.observe(0);
        agg.record(0);
        agg.record(0);
        assert_eq!(agg.states()[0].match_count, 2);
        agg.finish();
        assert_eq!(agg.states()[0].sources_matched, 1);
    }
}
