use std::collections::BTreeMap;

use uuid::Uuid;

use branchstock_ledger::NewMovement;

use super::state::{Row, RowKey, StoreState};

/// A pending row write: the version it was planned against and the new content
/// (`None` removes the row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub expected: u64,
    pub row: Option<Row>,
}

/// Everything one operation commits: row writes, read assertions and movements.
///
/// A change set is planned against one snapshot. Every write carries the version
/// the planner saw; every row the planner's decision depended on without writing
/// it is recorded as a read assertion. The store rejects the whole set with
/// `ConcurrentConflict` if any of those versions moved.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    correlation_id: Uuid,
    writes: BTreeMap<RowKey, Write>,
    reads: BTreeMap<RowKey, u64>,
    movements: Vec<NewMovement>,
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeSet {
    pub fn new() -> Self {
        Self {
            correlation_id: Uuid::now_v7(),
            writes: BTreeMap::new(),
            reads: BTreeMap::new(),
            movements: Vec::new(),
        }
    }

    /// Operation id shared by every movement of this change set.
    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Write `row`, expecting the version `snapshot` holds for it.
    ///
    /// Writing the same row twice keeps the first expectation.
    pub fn put(&mut self, snapshot: &StoreState, row: Row) {
        let key = row.key();
        let expected = snapshot.version(&key);
        self.writes
            .entry(key)
            .and_modify(|w| w.row = Some(row.clone()))
            .or_insert(Write {
                expected,
                row: Some(row),
            });
    }

    /// Create `row`; the commit fails if it already exists.
    pub fn insert(&mut self, row: Row) {
        let key = row.key();
        self.writes
            .entry(key)
            .and_modify(|w| w.row = Some(row.clone()))
            .or_insert(Write {
                expected: 0,
                row: Some(row),
            });
    }

    /// Physically remove a row.
    pub fn remove(&mut self, snapshot: &StoreState, key: RowKey) {
        let expected = snapshot.version(&key);
        self.writes
            .entry(key)
            .and_modify(|w| w.row = None)
            .or_insert(Write { expected, row: None });
    }

    /// Assert that `key` is still at the version `snapshot` holds at commit time.
    pub fn expect(&mut self, snapshot: &StoreState, key: RowKey) {
        if self.writes.contains_key(&key) {
            return;
        }
        self.reads.entry(key).or_insert_with(|| snapshot.version(&key));
    }

    pub fn record(&mut self, movement: NewMovement) {
        self.movements.push(movement);
    }

    pub fn movements(&self) -> &[NewMovement] {
        &self.movements
    }

    /// The row this change set will write under `key`, if any.
    pub fn pending(&self, key: &RowKey) -> Option<&Row> {
        self.writes.get(key).and_then(|w| w.row.as_ref())
    }

    pub fn writes(&self) -> impl Iterator<Item = (&RowKey, &Write)> {
        self.writes.iter()
    }

    pub fn reads(&self) -> impl Iterator<Item = (&RowKey, u64)> {
        self.reads.iter().map(|(k, v)| (k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.movements.is_empty()
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<RowKey, Write>, BTreeMap<RowKey, u64>, Vec<NewMovement>) {
        (self.writes, self.reads, self.movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use branchstock_branches::{Branch, SharingPolicies};
    use branchstock_core::{BranchId, Entity};

    #[test]
    fn repeated_puts_keep_the_first_expectation() {
        let mut state = StoreState::default();
        let branch = Branch::new(BranchId::new(), "North", SharingPolicies::default()).unwrap();
        state
            .apply(RowKey::Branch(branch.id()), Some(Row::Branch(branch.clone())))
            .unwrap();

        let mut changes = ChangeSet::new();
        changes.put(&state, Row::Branch(branch.clone()));
        let mut renamed = branch.clone();
        renamed.deactivate();
        changes.put(&StoreState::default(), Row::Branch(renamed.clone()));

        let (writes, _, _) = changes.into_parts();
        let write = &writes[&RowKey::Branch(branch.id())];
        assert_eq!(write.expected, 1);
        assert_eq!(write.row, Some(Row::Branch(renamed)));
    }

    #[test]
    fn reads_of_written_rows_are_not_duplicated() {
        let state = StoreState::default();
        let branch = Branch::new(BranchId::new(), "South", SharingPolicies::default()).unwrap();
        let key = RowKey::Branch(branch.id());

        let mut changes = ChangeSet::new();
        changes.insert(Row::Branch(branch));
        changes.expect(&state, key);

        assert_eq!(changes.reads().count(), 0);
        assert!(!changes.is_empty());
    }
}
