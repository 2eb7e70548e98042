//! Identity allocation for inserted rows.

use crate::model::resource::RowId;
use crate::reconcile::merge::MergePlan;
use rusqlite::Connection;

/// Inserts a planned row and returns its store-assigned id.
pub trait IdentityAllocator {
    fn allocate_id(&self, conn: &Connection, plan: &MergePlan) -> rusqlite::Result<RowId>;
}

/// Uses SQLite `AUTOINCREMENT` row ids, which are never reused.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowIdAllocator;

impl IdentityAllocator for RowIdAllocator {
    fn allocate_id(&self, conn: &Connection, plan: &MergePlan) -> rusqlite::Result<RowId> {
        plan.apply_insert(conn)?;
        Ok(conn.last_insert_rowid())
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityAllocator, RowIdAllocator};
    use crate::reconcile::merge::MergePlan;
    use rusqlite::Connection;

    #[test]
    fn returns_distinct_increasing_ids() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, owner_id INTEGER, name TEXT);",
        )
        .unwrap();

        let plan = MergePlan::owned("tags", "owner_id", 1).text("name", "a");
        let first = RowIdAllocator.allocate_id(&conn, &plan).unwrap();
        let second = RowIdAllocator.allocate_id(&conn, &plan).unwrap();

        assert!(first > 0);
        assert!(second > first);
    }
}
