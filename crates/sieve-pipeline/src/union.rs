use sieve_core::ResultList;

/// Concatenate `lists` in branch order, keeping the first version of each key.
///
/// Branches are declared in priority order, so an item surfaced by an
/// earlier branch is never reordered or rescored by a later one.
pub fn merge<'a>(lists: impl IntoIterator<Item = &'a ResultList>, k: Option<usize>) -> ResultList {
    let mut merged = ResultList::new();
    for list in lists {
        for item in list {
            merged.push(item.clone());
        }
    }
    merged.cap(k);
    merged
}
