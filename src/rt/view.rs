//! Read-only facade over the realtime inverted index.
//!
//! Presents the live buckets in the classical `(codes, ids)` shape the
//! scanner expects. The mutating half of the interface is deliberately
//! inert: all insertion goes through the realtime index directly, and the
//! view exists solely to plug the live store into the scan loop.

use std::sync::Arc;

use super::invert::{ListRef, RealtimeInvertIndex};

/// Scanner-facing adapter over [`RealtimeInvertIndex`].
#[derive(Clone)]
pub struct InvertedListView {
    index: Arc<RealtimeInvertIndex>,
}

impl InvertedListView {
    /// Wrap a realtime index.
    #[must_use]
    pub fn new(index: Arc<RealtimeInvertIndex>) -> Self {
        Self { index }
    }

    /// Physical entry count of one list; missing lists read as empty.
    #[must_use]
    pub fn list_size(&self, list_no: usize) -> usize {
        self.index
            .get_ivt_list(list_no)
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Borrow one list's `(ids, codes)` arrays for scanning.
    #[must_use]
    pub fn get_list(&self, list_no: usize) -> Option<ListRef<'_>> {
        self.index.get_ivt_list(list_no)
    }

    /// Disabled: insertion goes through the realtime index. Always 0.
    pub fn add_entries(&self, _list_no: usize, _ids: &[i64], _codes: &[u8]) -> usize {
        0
    }

    /// Disabled: bucket sizing is owned by the realtime index.
    pub fn resize(&self, _list_no: usize, _new_size: usize) {}

    /// Disabled: updates go through the realtime index.
    pub fn update_entries(&self, _list_no: usize, _offset: usize, _ids: &[i64], _codes: &[u8]) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocidBitmap, RawVectorStore};
    use std::collections::HashMap;

    #[test]
    fn view_reads_through_and_mutators_are_inert() {
        let bitmap = Arc::new(DocidBitmap::new());
        let store = Arc::new(RawVectorStore::new(2, 64, 4));
        store.add(0, &[0.0, 0.0], None).unwrap();
        let index = Arc::new(RealtimeInvertIndex::new(
            2,
            1,
            8,
            64,
            bitmap,
            Arc::clone(&store),
        ));

        let mut groups: HashMap<usize, (Vec<i64>, Vec<u8>)> = HashMap::new();
        groups.insert(1, (vec![0], vec![42]));
        index.add_keys(groups).unwrap();

        let view = InvertedListView::new(Arc::clone(&index));
        assert_eq!(view.list_size(0), 0);
        assert_eq!(view.list_size(1), 1);
        assert_eq!(view.list_size(7), 0);

        assert_eq!(view.add_entries(0, &[5], &[9]), 0);
        view.resize(0, 128);
        view.update_entries(1, 0, &[5], &[9]);
        assert_eq!(view.list_size(0), 0);

        let list = view.get_list(1).unwrap();
        assert_eq!(list.ids(), &[0]);
        assert_eq!(list.codes(), &[42]);
    }
}
