//! Collection differ.
//!
//! Partitions a desired child collection against the persisted one:
//! persisted ids missing from the desired set are deleted, desired items
//! carrying an id are updated, desired items without an id are inserted.
//!
//! # Invariants
//! - Output order follows input order (`to_delete` in persisted order,
//!   `to_update` / `to_insert` in desired order).
//! - The differ never checks that update ids exist; see
//!   [`CollectionDiff::pair_updates`].

use crate::model::resource::{ResourceClaim, ResourceScope, ResourceSecret, RowId, UNSET_ID};
use std::collections::{HashMap, HashSet};

/// Any row addressable by its store id.
pub trait ChildRow {
    fn row_id(&self) -> RowId;
}

impl ChildRow for ResourceClaim {
    fn row_id(&self) -> RowId {
        self.id
    }
}

impl ChildRow for ResourceSecret {
    fn row_id(&self) -> RowId {
        self.id
    }
}

impl ChildRow for ResourceScope {
    fn row_id(&self) -> RowId {
        self.id
    }
}

/// Disposition of every row touched by one collection reconciliation.
#[derive(Debug, PartialEq, Eq)]
pub struct CollectionDiff<'a, T> {
    pub to_delete: Vec<RowId>,
    pub to_update: Vec<&'a T>,
    pub to_insert: Vec<&'a T>,
}

impl<'a, T: ChildRow> CollectionDiff<'a, T> {
    /// Pairs every update target with its persisted row, in desired order.
    ///
    /// Fails with the first update id absent from `persisted`.
    pub fn pair_updates<'p, P: ChildRow>(
        &self,
        persisted: &'p [P],
    ) -> Result<Vec<(&'a T, &'p P)>, RowId> {
        let stored: HashMap<RowId, &'p P> =
            persisted.iter().map(|row| (row.row_id(), row)).collect();
        self.to_update
            .iter()
            .map(|&item| {
                let id = item.row_id();
                stored.get(&id).map(|&row| (item, row)).ok_or(id)
            })
            .collect()
    }
}

/// Computes the diff of `desired` against `persisted`.
///
/// Callers skip the differ entirely for an empty desired collection, which
/// means "leave the collection alone" rather than "delete everything".
pub fn diff_collection<'a, P, T>(persisted: &[P], desired: &'a [T]) -> CollectionDiff<'a, T>
where
    P: ChildRow,
    T: ChildRow,
{
    let kept: HashSet<RowId> = desired
        .iter()
        .map(ChildRow::row_id)
        .filter(|id| *id != UNSET_ID)
        .collect();

    let to_delete = persisted
        .iter()
        .map(ChildRow::row_id)
        .filter(|id| !kept.contains(id))
        .collect();

    let (to_insert, to_update): (Vec<&T>, Vec<&T>) =
        desired.iter().partition(|item| item.row_id() == UNSET_ID);

    CollectionDiff {
        to_delete,
        to_update,
        to_insert,
    }
}
