//! Layout diff: turns two fetches of a live query into ordered change events.
//!
//! # Invariants
//! - Section deletes and row deletes/move sources refer to the old layout.
//! - Section inserts, row inserts and move destinations refer to the new
//!   layout.
//! - Rows inside an inserted or deleted section are covered by the section
//!   event and never reported individually.
//! - Events are emitted as section deletes, section inserts, row deletes,
//!   row inserts, row moves, row updates; each group in ascending order.

use super::layout::{IndexPath, Layout};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionChange {
    Insert,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChange {
    Insert,
    Delete,
    /// Same position, changed content.
    Update,
    Move,
}

/// One change event of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreChange {
    Section {
        index: usize,
        change: SectionChange,
    },
    Row {
        old: Option<IndexPath>,
        new: Option<IndexPath>,
        change: RowChange,
    },
}

/// Ordered change events between two consecutive layouts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBatch {
    changes: Vec<StoreChange>,
}

impl ChangeBatch {
    pub fn changes(&self) -> &[StoreChange] {
        &self.changes
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

struct CommonRow {
    old: IndexPath,
    new: IndexPath,
    new_position: usize,
    changed: bool,
}

/// Computes the change events that turn `old` into `new`.
///
/// Sections match by title and ordinal among equal titles, rows by key.
/// Matched sections whose relative order survives (longest increasing
/// subsequence) are kept; the rest are deleted and re-inserted. The same
/// rule applied to rows of kept sections separates untouched rows from moves.
pub fn diff_layouts<T>(old: &Layout<T>, new: &Layout<T>) -> ChangeBatch {
    let old_ids = section_identities(old);
    let new_ids = section_identities(new);
    let new_by_id: HashMap<(&str, usize), usize> = new_ids
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index))
        .collect();

    let matched: Vec<(usize, usize)> = old_ids
        .iter()
        .enumerate()
        .filter_map(|(index, id)| new_by_id.get(id).map(|&target| (index, target)))
        .collect();
    let targets: Vec<usize> = matched.iter().map(|(_, target)| *target).collect();

    let mut old_to_new: Vec<Option<usize>> = vec![None; old_ids.len()];
    let mut new_kept = vec![false; new_ids.len()];
    for position in longest_increasing_subsequence(&targets) {
        let (source, target) = matched[position];
        old_to_new[source] = Some(target);
        new_kept[target] = true;
    }

    let mut changes = Vec::new();
    changes.extend(
        old_to_new
            .iter()
            .enumerate()
            .filter(|(_, target)| target.is_none())
            .map(|(index, _)| StoreChange::Section {
                index,
                change: SectionChange::Delete,
            }),
    );
    changes.extend(
        new_kept
            .iter()
            .enumerate()
            .filter(|(_, kept)| !**kept)
            .map(|(index, _)| StoreChange::Section {
                index,
                change: SectionChange::Insert,
            }),
    );

    let new_rows: HashMap<&str, (IndexPath, usize, &str)> = new
        .rows()
        .enumerate()
        .map(|(position, (path, row))| (row.key_identity(), (path, position, row.body())))
        .collect();

    let mut old_keys: HashSet<&str> = HashSet::new();
    let mut deletes = Vec::new();
    let mut inserts = Vec::new();
    let mut common = Vec::new();

    for (old_path, row) in old.rows() {
        old_keys.insert(row.key_identity());
        let source_kept = old_to_new[old_path.section].is_some();
        let Some(&(new_path, new_position, body)) = new_rows.get(row.key_identity()) else {
            if source_kept {
                deletes.push(old_path);
            }
            continue;
        };

        match (source_kept, new_kept[new_path.section]) {
            (true, true) => common.push(CommonRow {
                old: old_path,
                new: new_path,
                new_position,
                changed: row.body() != body,
            }),
            (true, false) => deletes.push(old_path),
            (false, true) => inserts.push(new_path),
            (false, false) => {}
        }
    }

    for (new_path, row) in new.rows() {
        if !old_keys.contains(row.key_identity()) && new_kept[new_path.section] {
            inserts.push(new_path);
        }
    }
    inserts.sort();

    let positions: Vec<usize> = common.iter().map(|row| row.new_position).collect();
    let mut in_order = vec![false; common.len()];
    for position in longest_increasing_subsequence(&positions) {
        in_order[position] = true;
    }

    let mut moves = Vec::new();
    let mut updates = Vec::new();
    for (position, row) in common.iter().enumerate() {
        let same_section = old_to_new[row.old.section] == Some(row.new.section);
        if in_order[position] && same_section {
            if row.changed {
                updates.push((row.old, row.new));
            }
        } else {
            moves.push((row.old, row.new));
        }
    }
    moves.sort_by_key(|(_, new_path)| *new_path);

    changes.extend(deletes.into_iter().map(|path| StoreChange::Row {
        old: Some(path),
        new: None,
        change: RowChange::Delete,
    }));
    changes.extend(inserts.into_iter().map(|path| StoreChange::Row {
        old: None,
        new: Some(path),
        change: RowChange::Insert,
    }));
    changes.extend(moves.into_iter().map(|(from, to)| StoreChange::Row {
        old: Some(from),
        new: Some(to),
        change: RowChange::Move,
    }));
    changes.extend(updates.into_iter().map(|(at, now)| StoreChange::Row {
        old: Some(at),
        new: Some(now),
        change: RowChange::Update,
    }));

    ChangeBatch { changes }
}

fn section_identities<T>(layout: &Layout<T>) -> Vec<(&str, usize)> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    layout
        .sections()
        .iter()
        .map(|section| {
            let ordinal = seen.entry(section.title()).or_insert(0);
            let id = (section.title(), *ordinal);
            *ordinal += 1;
            id
        })
        .collect()
}

/// Indices into `values` of one longest strictly increasing subsequence.
pub(crate) fn longest_increasing_subsequence(values: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];

    for (index, &value) in values.iter().enumerate() {
        let position = tails.partition_point(|&tail| values[tail] < value);
        if position > 0 {
            previous[index] = Some(tails[position - 1]);
        }
        if position == tails.len() {
            tails.push(index);
        } else {
            tails[position] = index;
        }
    }

    let mut result = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(index) = cursor {
        result.push(index);
        cursor = previous[index];
    }
    result.reverse();
    result
}
