//! Index-to-element reconciliation
//!
//! Keeps the rendered elements of one loop parallel to its bound collection
//! and decides where a freshly rendered element goes in the document so the
//! loop output stays contiguous and in the original element's position.

use crate::dom::{Document, NodeId};
use crate::error::LoopError;

/// Where the loop element originally sat
#[derive(Debug, Clone, Copy)]
pub struct Anchors {
    pub container: NodeId,
    pub previous: Option<NodeId>,
    pub next: Option<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    After(NodeId),
    Before(NodeId),
    Append(NodeId),
}

/// Rendered elements by collection index; `None` marks a placeholder
/// (queued but not rendered yet, or filtered out by the loop body)
#[derive(Debug, Default)]
pub struct RenderedElements {
    slots: Vec<Option<NodeId>>,
}

impl RenderedElements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.slots.get(index).copied().flatten()
    }

    /// Rendered nodes in index order, skipping placeholders
    pub fn nodes(&self) -> Vec<NodeId> {
        self.slots.iter().flatten().copied().collect()
    }

    pub fn slots(&self) -> &[Option<NodeId>] {
        &self.slots
    }

    pub fn set(&mut self, index: usize, node: NodeId) {
        if self.slots.len() <= index {
            self.slots.resize(index + 1, None);
        }
        if let Some(slot) = self.slots.get_mut(index) {
            *slot = Some(node);
        }
    }

    pub fn extend_placeholders(&mut self, count: usize) {
        self.slots.extend(std::iter::repeat_n(None, count));
    }

    /// Apply a splice: `removed` slots at `start` replaced by `inserted`
    /// placeholders. Returns the rendered nodes that were taken out.
    pub fn splice(&mut self, start: usize, removed: usize, inserted: usize) -> Vec<NodeId> {
        let start = start.min(self.slots.len());
        let end = start.saturating_add(removed).min(self.slots.len());
        self.slots
            .splice(start..end, std::iter::repeat_n(None, inserted))
            .flatten()
            .collect()
    }

    pub fn clear(&mut self) -> Vec<NodeId> {
        let nodes = self.nodes();
        self.slots.clear();
        nodes
    }

    /// Where an element rendered for `index` must be inserted
    pub fn placement(&self, index: usize, anchors: &Anchors) -> Placement {
        let before = self.slots.get(..index.min(self.slots.len())).unwrap_or(&[]);
        if let Some(previous) = before.iter().rev().flatten().next() {
            return Placement::After(*previous);
        }
        let after = self.slots.get(index + 1..).unwrap_or(&[]);
        if let Some(next) = after.iter().flatten().next() {
            return Placement::Before(*next);
        }
        anchor_placement(anchors)
    }

    /// Insert `node` for `index` and record it
    pub fn place(
        &mut self,
        doc: &mut Document,
        index: usize,
        node: NodeId,
        anchors: &Anchors,
    ) -> Result<(), LoopError> {
        insert(doc, self.placement(index, anchors), node)?;
        self.set(index, node);
        Ok(())
    }

    /// Detach every rendered node in `start..start + removed` and splice the
    /// slots. Returns the detached nodes.
    pub fn remove_range(
        &mut self,
        doc: &mut Document,
        start: usize,
        removed: usize,
        inserted: usize,
    ) -> Result<Vec<NodeId>, LoopError> {
        let nodes = self.splice(start, removed, inserted);
        for node in &nodes {
            doc.remove(*node)?;
        }
        Ok(nodes)
    }
}

fn anchor_placement(anchors: &Anchors) -> Placement {
    match (anchors.previous, anchors.next) {
        (Some(previous), _) => Placement::After(previous),
        (None, Some(next)) => Placement::Before(next),
        (None, None) => Placement::Append(anchors.container),
    }
}

pub fn insert(doc: &mut Document, placement: Placement, node: NodeId) -> Result<(), LoopError> {
    match placement {
        Placement::After(reference) => doc.insert_after(reference, node),
        Placement::Before(reference) => doc.insert_before(reference, node),
        Placement::Append(container) => doc.append_child(container, node),
    }
}
