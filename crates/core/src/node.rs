//! Read-only view over an elaborated design.
//!
//! A [`Node`] is a cheap handle: the owning [`Design`], an instance id, the
//! array element it stands for (if any) and a shared pointer to the Node it
//! was reached from. Nodes are built on demand and never cache tree state,
//! so two Nodes for the same instance always agree.

use std::rc::Rc;
use std::sync::Arc;

use crate::component::ComponentKind;
use crate::expr::Value;
use crate::instance::{Instance, InstanceId, InstanceTree};
use crate::properties::{PropertyError, PropertyRuleBook};
use crate::walker::element_indices;

/// Result of a successful elaboration.
#[derive(Debug)]
pub struct Design {
    tree: InstanceTree,
    rules: Arc<PropertyRuleBook>,
    root: InstanceId,
}

impl Design {
    pub(crate) fn new(tree: InstanceTree, rules: Arc<PropertyRuleBook>, root: InstanceId) -> Self {
        Design { tree, rules, root }
    }

    pub fn top(&self) -> Node<'_> {
        Node {
            design: self,
            id: self.root,
            index: None,
            parent: None,
        }
    }

    pub fn tree(&self) -> &InstanceTree {
        &self.tree
    }

    pub fn rules(&self) -> &PropertyRuleBook {
        &self.rules
    }

    /// Every node under the top, top included, in pre-order.
    pub fn nodes(&self) -> impl Iterator<Item = Node<'_>> {
        std::iter::once(self.top()).chain(self.top().descendants())
    }
}

#[derive(Debug, Clone)]
pub struct Node<'a> {
    design: &'a Design,
    id: InstanceId,
    /// Element of an array instance this node stands for; `None` means the
    /// instance as a whole (or a scalar).
    index: Option<Vec<u64>>,
    parent: Option<Rc<Node<'a>>>,
}

impl<'a> Node<'a> {
    fn inst(&self) -> &'a Instance {
        self.design.tree.get(self.id)
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        &self.inst().name
    }

    pub fn kind(&self) -> ComponentKind {
        self.inst().kind
    }

    pub fn type_name(&self) -> Option<&'a str> {
        self.inst().type_name.as_deref()
    }

    pub fn current_index(&self) -> Option<&[u64]> {
        self.index.as_deref()
    }

    // ──────────────────────────────────────────────
    // Properties
    // ──────────────────────────────────────────────

    /// Effective value: explicit assignment, then the default-property
    /// context, then the rule-book default.
    pub fn get_property(&self, name: &str) -> Result<Value, PropertyError> {
        let rules = &self.design.rules;
        rules.rule_for(self.kind(), name)?;
        rules
            .effective(&self.design.tree, self.id, name)
            .ok_or_else(|| PropertyError::NotSet {
                name: name.to_owned(),
            })
    }

    pub fn is_present(&self) -> bool {
        self.design
            .rules
            .effective_bool(&self.design.tree, self.id, "ispresent")
    }

    // ──────────────────────────────────────────────
    // Navigation
    // ──────────────────────────────────────────────

    fn child(&self, parent: &Rc<Node<'a>>, id: InstanceId, index: Option<Vec<u64>>) -> Node<'a> {
        Node {
            design: self.design,
            id,
            index,
            parent: Some(parent.clone()),
        }
    }

    /// Direct children in declaration order; arrays appear once.
    pub fn children(&self) -> impl Iterator<Item = Node<'a>> + 'a {
        let me = Rc::new(self.clone());
        let design = self.design;
        self.inst().children.iter().map(move |&id| Node {
            design,
            id,
            index: None,
            parent: Some(me.clone()),
        })
    }

    /// Direct children with every array expanded into one node per element.
    pub fn unrolled_children(&self) -> Vec<Node<'a>> {
        let me = Rc::new(self.clone());
        let mut out = Vec::new();
        for &id in &self.inst().children {
            match element_indices(&self.design.tree, id) {
                Some(indices) => {
                    out.extend(indices.into_iter().map(|i| self.child(&me, id, Some(i))));
                }
                None => out.push(self.child(&me, id, None)),
            }
        }
        out
    }

    /// Every node below this one in pre-order, arrays once.
    pub fn descendants(&self) -> Descendants<'a> {
        let mut stack: Vec<Node<'a>> = self.children().collect();
        stack.reverse();
        Descendants { stack }
    }

    pub fn parent(&self) -> Option<Node<'a>> {
        if let Some(p) = &self.parent {
            return Some((**p).clone());
        }
        let id = self.inst().parent?;
        Some(Node {
            design: self.design,
            id,
            index: None,
            parent: None,
        })
    }

    /// Look up a descendant by relative dotted path, e.g. `regs[2].ctrl`.
    pub fn find(&self, path: &str) -> Option<Node<'a>> {
        let mut cur = self.clone();
        for segment in path.split('.') {
            let (name, index) = parse_segment(segment)?;
            let id = self.design.tree.child_by_name(cur.id, name)?;
            let parent = Rc::new(cur);
            let node = Node {
                design: self.design,
                id,
                index: None,
                parent: Some(parent),
            };
            cur = match index {
                None => node,
                Some(index) => {
                    let dims = node.inst().dims()?;
                    let in_range =
                        index.len() == dims.len() && index.iter().zip(&dims).all(|(i, d)| i < d);
                    if !in_range {
                        return None;
                    }
                    Node {
                        index: Some(index),
                        ..node
                    }
                }
            };
        }
        Some(cur)
    }

    /// Hierarchical path; arrays print their element index, or `[]` when
    /// the node stands for the whole array.
    pub fn path(&self) -> String {
        let mut segment = self.name().to_owned();
        if self.inst().is_array() {
            match &self.index {
                Some(index) => {
                    for i in index {
                        segment.push_str(&format!("[{}]", i));
                    }
                }
                None => segment.push_str("[]"),
            }
        }
        match self.parent() {
            Some(parent) => format!("{}.{}", parent.path(), segment),
            None => segment,
        }
    }

    // ──────────────────────────────────────────────
    // Geometry
    // ──────────────────────────────────────────────

    pub fn is_array(&self) -> bool {
        self.inst().is_array()
    }

    pub fn array_dimensions(&self) -> Option<Vec<u64>> {
        if self.is_array() {
            self.inst().dims()
        } else {
            None
        }
    }

    pub fn array_stride(&self) -> Option<u64> {
        self.inst().placement.stride
    }

    /// Byte offset from the parent; element-aware for array elements.
    pub fn address_offset(&self) -> Option<u64> {
        let base = self.inst().placement.address_offset?;
        Some(base.saturating_add(self.element_offset()))
    }

    /// Absolute byte address; element-aware along the whole path.
    ///
    /// The stored address is that of element 0 of every enclosing array,
    /// so the offsets of the elements this node was reached through are
    /// added on top.
    pub fn absolute_address(&self) -> Option<u64> {
        let base = self.inst().placement.absolute_address?;
        let mut address = base.saturating_add(self.element_offset());
        let mut ancestor = self.parent.as_deref();
        while let Some(node) = ancestor {
            address = address.saturating_add(node.element_offset());
            ancestor = node.parent.as_deref();
        }
        Some(address)
    }

    fn element_offset(&self) -> u64 {
        let (Some(index), Some(dims)) = (&self.index, self.inst().dims()) else {
            return 0;
        };
        let flat = index
            .iter()
            .zip(&dims)
            .fold(0u64, |acc, (i, d)| acc.saturating_mul(*d).saturating_add(*i));
        flat.saturating_mul(self.array_stride().unwrap_or(self.size()))
    }

    /// Size in bytes of one element.
    pub fn size(&self) -> u64 {
        self.inst().placement.size
    }

    /// Bytes occupied by this node: one element when it stands for an
    /// element, the whole array otherwise.
    pub fn total_size(&self) -> u64 {
        if self.index.is_some() {
            self.size()
        } else {
            self.inst().total_size()
        }
    }

    pub fn lsb(&self) -> Option<u64> {
        self.inst().placement.lsb
    }

    pub fn msb(&self) -> Option<u64> {
        self.inst().placement.msb
    }

    pub fn width(&self) -> Option<u64> {
        self.msb()?.checked_sub(self.lsb()?)?.checked_add(1)
    }
}

pub struct Descendants<'a> {
    stack: Vec<Node<'a>>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = Node<'a>;

    fn next(&mut self) -> Option<Node<'a>> {
        let node = self.stack.pop()?;
        let mut children: Vec<Node<'a>> = node.children().collect();
        children.reverse();
        self.stack.extend(children);
        Some(node)
    }
}

/// Split `name[1][2]` into the name and its indices.
fn parse_segment(segment: &str) -> Option<(&str, Option<Vec<u64>>)> {
    let Some(open) = segment.find('[') else {
        return Some((segment, None));
    };
    let name = &segment[..open];
    let mut index = Vec::new();
    for part in segment[open..].split_terminator(']') {
        index.push(part.strip_prefix('[')?.trim().parse().ok()?);
    }
    Some((name, Some(index)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_with_indices() {
        assert_eq!(parse_segment("regs"), Some(("regs", None)));
        assert_eq!(parse_segment("regs[3]"), Some(("regs", Some(vec![3]))));
        assert_eq!(parse_segment("m[1][2]"), Some(("m", Some(vec![1, 2]))));
        assert_eq!(parse_segment("bad[x]"), None);
    }
}
