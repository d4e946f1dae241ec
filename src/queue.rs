//! Operation queue
//!
//! FIFO of pending loop-body passes. The loop controller is the only
//! consumer; the initial `bind` and the mutation traps are the producers.

use std::collections::VecDeque;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Render a previously unseen index
    Add,
    /// Re-test whether the body still selects an existing index
    Check,
}

/// One required pass of the loop body
#[derive(Debug, Clone)]
pub struct Operation {
    pub item: Value,
    pub index: Option<usize>,
    pub kind: OperationKind,
    /// Set when a check pass reached the body
    pub touched_body: bool,
}

impl Operation {
    pub fn add(item: Value, index: usize) -> Self {
        Self {
            item,
            index: Some(index),
            kind: OperationKind::Add,
            touched_body: false,
        }
    }

    pub fn check(item: Value, index: usize) -> Self {
        Self {
            item,
            index: Some(index),
            kind: OperationKind::Check,
            touched_body: false,
        }
    }

    pub fn is_check(&self) -> bool {
        self.kind == OperationKind::Check
    }
}

#[derive(Debug, Default)]
pub struct OperationQueue {
    operations: VecDeque<Operation>,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push_back(operation);
    }

    pub fn dequeue(&mut self) -> Option<Operation> {
        self.operations.pop_front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter()
    }

    /// Drop everything still queued, returning how many operations were discarded
    pub fn clear(&mut self) -> usize {
        let discarded = self.operations.len();
        self.operations.clear();
        discarded
    }

    /// Queue an `Add` per item, indexed from `start`
    pub fn enqueue_additions(&mut self, items: impl IntoIterator<Item = Value>, start: usize) {
        for (offset, item) in items.into_iter().enumerate() {
            self.push(Operation::add(item, start + offset));
        }
    }

    /// Queue a `Check` for every index of `items`.
    /// Indices that already have a queued operation are skipped.
    pub fn enqueue_checks(&mut self, items: &[Value]) {
        for (index, item) in items.iter().enumerate() {
            let pending = self.operations.iter().any(|op| op.index == Some(index));
            if !pending {
                self.push(Operation::check(item.clone(), index));
            }
        }
    }

    /// Keep queued indices aligned with a splice of the bound collection.
    /// Operations for removed indices are dropped; later ones shift.
    pub fn apply_splice(&mut self, start: usize, removed: usize, inserted: usize) {
        let removed_end = start + removed;
        self.operations.retain(|op| match op.index {
            Some(index) => index < start || index >= removed_end,
            None => true,
        });
        for op in self.operations.iter_mut() {
            if let Some(index) = op.index.as_mut() {
                if *index >= removed_end {
                    *index = *index - removed + inserted;
                }
            }
        }
    }
}
