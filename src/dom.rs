//! Rendered document
//!
//! An arena-backed node tree standing in for the host document: elements
//! with ordered attributes, text nodes and fragments. Nodes are addressed by
//! [`NodeId`]. Removing a node only detaches it; [`Document::release`] frees
//! a detached subtree and its ids are handed out again by later allocations.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::LoopError;
use crate::prelude::{IndexMap, index_map_new};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
    },
    Text(String),
    Fragment,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Shared handle used by directives and element evaluators
pub type DocumentRef = Rc<RefCell<Document>>;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Default)]
pub struct Document {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_ref(self) -> DocumentRef {
        Rc::new(RefCell::new(self))
    }

    /// Live (not released) nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Creation
    // ═══════════════════════════════════════════════════════════════════════

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            parent: None,
            children: Vec::new(),
        };
        if let Some(id) = self.free.pop() {
            if let Some(slot) = self.nodes.get_mut(id.0 as usize) {
                *slot = Some(node);
                return id;
            }
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: index_map_new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeKind::Text(text.to_string()))
    }

    pub fn create_fragment(&mut self) -> NodeId {
        self.alloc(NodeKind::Fragment)
    }

    /// Copy a node (and with `deep`, its subtree). The copy is detached.
    pub fn clone_node(&mut self, id: NodeId, deep: bool) -> Result<NodeId, LoopError> {
        let (kind, children) = {
            let node = self.node(id)?;
            (node.kind.clone(), node.children.clone())
        };
        let copy = self.alloc(kind);
        if deep {
            for child in children {
                let child_copy = self.clone_node(child, true)?;
                self.append_child(copy, child_copy)?;
            }
        }
        Ok(copy)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Inspection
    // ═══════════════════════════════════════════════════════════════════════

    fn node(&self, id: NodeId) -> Result<&Node, LoopError> {
        self.nodes
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| LoopError::document(format!("unknown node {}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, LoopError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| LoopError::document(format!("unknown node {}", id)))
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).ok().map(|n| &n.kind)
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { tag, .. } => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.tag(id).is_some()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).ok()?.parent
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id)
            .into_iter()
            .filter(|child| self.is_element(*child))
            .collect()
    }

    /// `id` and all of its descendants, in document order
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let children = self.children(current);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    fn sibling_element(&self, id: NodeId, forward: bool) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|s| *s == id)?;
        if forward {
            siblings
                .iter()
                .skip(position + 1)
                .copied()
                .find(|s| self.is_element(*s))
        } else {
            siblings
                .iter()
                .take(position)
                .rev()
                .copied()
                .find(|s| self.is_element(*s))
        }
    }

    pub fn previous_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.sibling_element(id, false)
    }

    pub fn next_element_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.sibling_element(id, true)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Attributes and text
    // ═══════════════════════════════════════════════════════════════════════

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { attributes, .. } => attributes.get(name).map(String::as_str),
            _ => None,
        }
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.attribute(id, name).is_some()
    }

    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> Result<(), LoopError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Element { attributes, .. } => {
                attributes.insert(name.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(LoopError::document(format!(
                "cannot set attribute '{}' on non-element {}",
                name, id
            ))),
        }
    }

    pub fn remove_attribute(&mut self, id: NodeId, name: &str) -> Option<String> {
        match &mut self.node_mut(id).ok()?.kind {
            NodeKind::Element { attributes, .. } => attributes.shift_remove(name),
            _ => None,
        }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        self.descendants(id)
            .into_iter()
            .filter_map(|n| match self.kind(n) {
                Some(NodeKind::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Replace all children of `id` with a single text node
    pub fn set_text_content(&mut self, id: NodeId, text: &str) -> Result<(), LoopError> {
        if let NodeKind::Text(content) = &mut self.node_mut(id)?.kind {
            *content = text.to_string();
            return Ok(());
        }
        for child in self.children(id) {
            self.remove(child)?;
            self.release(child)?;
        }
        if !text.is_empty() {
            let node = self.create_text(text);
            self.append_child(id, node)?;
        }
        Ok(())
    }

    /// Whether the inline style of `id` carries every hidden declaration
    pub fn is_hidden(&self, id: NodeId, hidden_style: &str) -> bool {
        let current = declarations(self.attribute(id, "style").unwrap_or_default());
        let hidden = declarations(hidden_style);
        !hidden.is_empty() && hidden.iter().all(|declaration| current.contains(declaration))
    }

    /// Add or remove the hidden declarations, leaving the rest of the
    /// inline style alone. Hiding replaces declarations of the same
    /// properties (`display: flex` becomes `display: none`).
    pub fn set_visible(
        &mut self,
        id: NodeId,
        visible: bool,
        hidden_style: &str,
    ) -> Result<(), LoopError> {
        let mut current = declarations(self.attribute(id, "style").unwrap_or_default());
        let hidden = declarations(hidden_style);
        if visible {
            if !self.is_hidden(id, hidden_style) {
                return Ok(());
            }
            current.retain(|declaration| !hidden.contains(declaration));
        } else {
            current.retain(|(property, _)| hidden.iter().all(|(hidden, _)| hidden != property));
            current.extend(hidden);
        }
        if current.is_empty() {
            self.remove_attribute(id, "style");
            return Ok(());
        }
        let style = current
            .iter()
            .map(|(property, value)| format!("{}: {}", property, value))
            .collect::<Vec<_>>()
            .join("; ");
        self.set_attribute(id, "style", &style)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Tree mutation
    // ═══════════════════════════════════════════════════════════════════════

    /// Detach `id` from its parent; a detached node is left as is
    pub fn remove(&mut self, id: NodeId) -> Result<(), LoopError> {
        let Some(parent) = self.node(id)?.parent else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|c| *c != id);
        self.node_mut(id)?.parent = None;
        Ok(())
    }

    /// Free a detached node and its subtree. The ids become invalid and may
    /// be reused by the next allocation.
    pub fn release(&mut self, id: NodeId) -> Result<(), LoopError> {
        if self.node(id)?.parent.is_some() {
            return Err(LoopError::document(format!(
                "cannot release attached node {}",
                id
            )));
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            let node = self
                .nodes
                .get_mut(next.0 as usize)
                .and_then(Option::take)
                .ok_or_else(|| LoopError::document(format!("unknown node {}", next)))?;
            stack.extend(node.children);
            self.free.push(next);
        }
        Ok(())
    }

    fn insert_at(&mut self, parent: NodeId, position: usize, child: NodeId) -> Result<(), LoopError> {
        if self.contains(child, parent) {
            return Err(LoopError::document(format!(
                "cannot insert {} into its own subtree",
                child
            )));
        }
        self.remove(child)?;
        let children = &mut self.node_mut(parent)?.children;
        let position = position.min(children.len());
        children.insert(position, child);
        self.node_mut(child)?.parent = Some(parent);
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), LoopError> {
        self.insert_at(parent, usize::MAX, child)
    }

    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) -> Result<(), LoopError> {
        let parent = self.parent(reference).ok_or_else(|| {
            LoopError::document(format!("reference node {} is detached", reference))
        })?;
        self.remove(node)?;
        let position = self.position_in_parent(parent, reference)?;
        self.insert_at(parent, position, node)
    }

    pub fn insert_after(&mut self, reference: NodeId, node: NodeId) -> Result<(), LoopError> {
        let parent = self.parent(reference).ok_or_else(|| {
            LoopError::document(format!("reference node {} is detached", reference))
        })?;
        self.remove(node)?;
        let position = self.position_in_parent(parent, reference)?;
        self.insert_at(parent, position + 1, node)
    }

    fn position_in_parent(&self, parent: NodeId, child: NodeId) -> Result<usize, LoopError> {
        self.node(parent)?
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or_else(|| LoopError::document(format!("{} is not a child of {}", child, parent)))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Markup
    // ═══════════════════════════════════════════════════════════════════════

    /// Parse markup into a new fragment node
    pub fn parse_fragment(&mut self, source: &str) -> Result<NodeId, LoopError> {
        let fragment = self.create_fragment();
        MarkupParser::new(self, source).parse_into(fragment)?;
        Ok(fragment)
    }

    /// Serialize a node; fragments serialize their children only
    pub fn to_source(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_source(id, &mut out);
        out
    }

    fn write_source(&self, id: NodeId, out: &mut String) {
        let Ok(node) = self.node(id) else {
            return;
        };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(&escape_text(text)),
            NodeKind::Fragment => {
                for child in &node.children {
                    self.write_source(*child, out);
                }
            }
            NodeKind::Element { tag, attributes } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    if !value.is_empty() {
                        out.push_str("=\"");
                        out.push_str(&escape_attribute(value));
                        out.push('"');
                    }
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&tag.as_str()) {
                    return;
                }
                for child in &node.children {
                    self.write_source(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

/// `a: b; c: d` as normalized `(property, value)` pairs
fn declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (property, value) = declaration.split_once(':')?;
            let property = property.trim().to_ascii_lowercase();
            if property.is_empty() {
                return None;
            }
            Some((property, value.trim().to_string()))
        })
        .collect()
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Minimal markup reader: elements, attributes, text. No comments or doctype.
struct MarkupParser<'d, 's> {
    doc: &'d mut Document,
    source: &'s str,
    pos: usize,
}

impl<'d, 's> MarkupParser<'d, 's> {
    fn new(doc: &'d mut Document, source: &'s str) -> Self {
        Self {
            doc,
            source,
            pos: 0,
        }
    }

    fn rest(&self) -> &'s str {
        self.source.get(self.pos..).unwrap_or("")
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, expected: &str) -> bool {
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'s str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
        self.source.get(start..self.pos).unwrap_or("")
    }

    fn error(&self, message: impl Into<String>) -> LoopError {
        LoopError::document(format!("{} at offset {}", message.into(), self.pos))
    }

    fn parse_into(&mut self, root: NodeId) -> Result<(), LoopError> {
        let mut open: Vec<(String, NodeId)> = Vec::new();
        while self.peek().is_some() {
            let parent = open.last().map(|(_, id)| *id).unwrap_or(root);
            if self.eat("</") {
                let name = self.take_while(|c| c != '>').trim().to_ascii_lowercase();
                if !self.eat(">") {
                    return Err(self.error("unterminated closing tag"));
                }
                match open.pop() {
                    Some((tag, _)) if tag == name => {}
                    Some((tag, _)) => {
                        return Err(self.error(format!("expected </{}>, found </{}>", tag, name)));
                    }
                    None => return Err(self.error(format!("unexpected </{}>", name))),
                }
            } else if self.rest().starts_with('<') {
                self.bump();
                let (element, self_closing) = self.parse_open_tag()?;
                self.doc.append_child(parent, element)?;
                let tag = self.doc.tag(element).unwrap_or_default().to_string();
                if !self_closing && !VOID_ELEMENTS.contains(&tag.as_str()) {
                    open.push((tag, element));
                }
            } else {
                let text = self.take_while(|c| c != '<');
                let node = self.doc.create_text(&unescape(text));
                self.doc.append_child(parent, node)?;
            }
        }
        match open.pop() {
            Some((tag, _)) => Err(self.error(format!("unclosed <{}>", tag))),
            None => Ok(()),
        }
    }

    fn parse_open_tag(&mut self) -> Result<(NodeId, bool), LoopError> {
        let name = self.take_while(|c| c.is_alphanumeric() || c == '-' || c == '_');
        if name.is_empty() {
            return Err(self.error("expected tag name"));
        }
        let element = self.doc.create_element(name);
        loop {
            self.skip_whitespace();
            if self.eat("/>") {
                return Ok((element, true));
            }
            if self.eat(">") {
                return Ok((element, false));
            }
            let attr = self.take_while(|c| !c.is_whitespace() && c != '=' && c != '>' && c != '/');
            if attr.is_empty() {
                return Err(self.error("malformed tag"));
            }
            self.skip_whitespace();
            let value = if self.eat("=") {
                self.skip_whitespace();
                self.parse_attribute_value()?
            } else {
                String::new()
            };
            self.doc.set_attribute(element, attr, &value)?;
        }
    }

    fn parse_attribute_value(&mut self) -> Result<String, LoopError> {
        match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                self.bump();
                let value = self.take_while(|c| c != quote);
                if self.bump() != Some(quote) {
                    return Err(self.error("unterminated attribute value"));
                }
                Ok(unescape(value))
            }
            _ => Ok(unescape(
                self.take_while(|c| !c.is_whitespace() && c != '>'),
            )),
        }
    }
}
