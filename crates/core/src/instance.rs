//! Instance arena: the owned, mutable tree produced by deep-copying a
//! definition at the start of elaboration.

use std::collections::BTreeMap;

use crate::ast::SourceRef;
use crate::component::{
    BitSpec, ComponentDef, ComponentKind, PlacementSpec, PropAssignment, PropValue,
};
use crate::expr::{Expr, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(usize);

impl InstanceId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamBinding {
    pub name: String,
    pub default: Option<Expr>,
    /// Override written at the instantiation site; evaluated in the parent's scope.
    pub override_expr: Option<Expr>,
    pub value: Option<Value>,
}

/// Concrete geometry assigned by the placement pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Byte offset from the parent's base (addressable components only).
    pub address_offset: Option<u64>,
    /// Absolute byte address of element 0.
    pub absolute_address: Option<u64>,
    /// Size in bytes of a single element.
    pub size: u64,
    /// Distance in bytes between consecutive elements of the innermost dimension.
    pub stride: Option<u64>,
    /// Alignment this component imposes on its own contents.
    pub alignment: u64,
    pub lsb: Option<u64>,
    pub msb: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub name: String,
    pub kind: ComponentKind,
    pub type_name: Option<String>,
    pub parent: Option<InstanceId>,
    pub children: Vec<InstanceId>,
    pub params: Vec<ParamBinding>,
    pub properties: BTreeMap<String, PropAssignment>,
    pub default_props: BTreeMap<String, PropAssignment>,
    pub spec: PlacementSpec<PropValue>,
    pub placement: Placement,
    pub src: SourceRef,
}

impl Instance {
    pub fn param(&self, name: &str) -> Option<&ParamBinding> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn is_array(&self) -> bool {
        !self.spec.dims.is_empty()
    }

    /// Resolved array dimensions; `None` while any dimension is still
    /// pending or not an integer.
    pub fn dims(&self) -> Option<Vec<u64>> {
        self.spec
            .dims
            .iter()
            .map(|d| d.resolved().and_then(Value::as_int))
            .collect()
    }

    /// Number of elements, saturating at `u64::MAX`.
    pub fn element_count(&self) -> u64 {
        self.checked_element_count().unwrap_or(u64::MAX)
    }

    /// Number of elements; `None` when the dimensions multiply past `u64`.
    pub fn checked_element_count(&self) -> Option<u64> {
        match self.dims() {
            Some(dims) => dims.iter().try_fold(1u64, |acc, d| acc.checked_mul(*d)),
            None => Some(1),
        }
    }

    /// Total bytes occupied in the parent.
    pub fn total_size(&self) -> u64 {
        if self.is_array() {
            let stride = self.placement.stride.unwrap_or(self.placement.size);
            stride.saturating_mul(self.element_count())
        } else {
            self.placement.size
        }
    }

    /// Explicit assignment of a property, if resolved.
    pub fn assigned(&self, name: &str) -> Option<&Value> {
        self.properties.get(name).and_then(|a| a.value.resolved())
    }
}

/// Arena of instances; ids are stable for the life of the tree.
#[derive(Debug, Clone, Default)]
pub struct InstanceTree {
    nodes: Vec<Instance>,
}

impl InstanceTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: InstanceId) -> &Instance {
        &self.nodes[id.0]
    }

    pub fn get_mut(&mut self, id: InstanceId) -> &mut Instance {
        &mut self.nodes[id.0]
    }

    pub fn ids(&self) -> impl Iterator<Item = InstanceId> {
        (0..self.nodes.len()).map(InstanceId)
    }

    /// Deep-copy `def` and its whole subtree into the arena.
    pub fn instantiate(
        &mut self,
        def: &ComponentDef,
        name: &str,
        spec: PlacementSpec<Expr>,
        param_overrides: &BTreeMap<String, Expr>,
        parent: Option<InstanceId>,
        src: SourceRef,
    ) -> InstanceId {
        let params = def
            .params
            .iter()
            .map(|p| ParamBinding {
                name: p.name.clone(),
                default: p.default.clone(),
                override_expr: param_overrides.get(&p.name).cloned(),
                value: None,
            })
            .collect();
        let id = InstanceId(self.nodes.len());
        self.nodes.push(Instance {
            name: name.to_owned(),
            kind: def.kind,
            type_name: def.type_name.clone(),
            parent,
            children: Vec::new(),
            params,
            properties: def.properties.clone(),
            default_props: def.default_props.clone(),
            spec: spec.map(PropValue::from_expr),
            placement: Placement::default(),
            src,
        });
        for child in &def.children {
            let child_id = self.instantiate(
                &child.def,
                &child.name,
                child.spec.clone(),
                &child.param_overrides,
                Some(id),
                child.src.clone(),
            );
            self.nodes[id.0].children.push(child_id);
        }
        id
    }

    pub fn ancestors(&self, id: InstanceId) -> impl Iterator<Item = InstanceId> + '_ {
        std::iter::successors(self.get(id).parent, move |p| self.get(*p).parent)
    }

    /// Dotted hierarchical path; arrays render as `name[]`.
    pub fn path(&self, id: InstanceId) -> String {
        let mut segments: Vec<String> = self
            .ancestors(id)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|a| self.segment(a))
            .collect();
        segments.push(self.segment(id));
        segments.join(".")
    }

    fn segment(&self, id: InstanceId) -> String {
        let inst = self.get(id);
        if inst.is_array() {
            format!("{}[]", inst.name)
        } else {
            inst.name.clone()
        }
    }

    pub fn child_by_name(&self, id: InstanceId, name: &str) -> Option<InstanceId> {
        self.get(id)
            .children
            .iter()
            .copied()
            .find(|c| self.get(*c).name == name)
    }

    /// Find an instance by absolute dotted path; array suffixes are ignored.
    pub fn find_by_path(&self, root: InstanceId, path: &str) -> Option<InstanceId> {
        let mut segments = path.split('.').map(strip_index);
        if segments.next()? != self.get(root).name {
            return None;
        }
        segments.try_fold(root, |cur, seg| self.child_by_name(cur, seg))
    }

    /// Resolve a reference written in the body of `scope`: the first segment
    /// is searched among the children of `scope` and then of each ancestor.
    pub fn resolve_ref(&self, scope: InstanceId, path: &[String]) -> Option<InstanceId> {
        let (first, rest) = path.split_first()?;
        let first = strip_index(first);
        let start = std::iter::once(scope)
            .chain(self.ancestors(scope))
            .find_map(|s| self.child_by_name(s, first))?;
        rest.iter()
            .try_fold(start, |cur, seg| self.child_by_name(cur, strip_index(seg)))
    }

    /// Every (instance, description) still holding an unevaluated expression.
    pub fn pending_values(&self) -> Vec<(InstanceId, String)> {
        let mut out = Vec::new();
        for id in self.ids() {
            let inst = self.get(id);
            for (name, a) in inst.properties.iter().chain(inst.default_props.iter()) {
                if a.value.is_pending() {
                    out.push((id, format!("property '{}'", name)));
                }
            }
            let spec = &inst.spec;
            let mut placement_values = spec
                .dims
                .iter()
                .chain(spec.addr.iter())
                .chain(spec.stride.iter())
                .chain(spec.align.iter());
            if placement_values.any(|v| v.is_pending()) {
                out.push((id, "placement expression".to_owned()));
            }
            if let Some(bits) = &spec.bits {
                let pending = match bits {
                    BitSpec::Range { msb, lsb } => {
                        msb.is_pending() || lsb.is_pending()
                    }
                    BitSpec::Width(w) => w.is_pending(),
                };
                if pending {
                    out.push((id, "bit range".to_owned()));
                }
            }
            for p in &inst.params {
                if p.value.is_none() {
                    out.push((id, format!("parameter '{}'", p.name)));
                }
            }
        }
        out
    }
}

fn strip_index(segment: &str) -> &str {
    segment.split('[').next().unwrap_or(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ChildDecl, ParamDef};
    use std::rc::Rc;

    fn def(kind: ComponentKind, name: &str, children: Vec<ChildDecl>) -> Rc<ComponentDef> {
        Rc::new(ComponentDef {
            kind,
            type_name: Some(name.to_owned()),
            params: vec![ParamDef {
                name: "W".into(),
                default: Some(Expr::int(8)),
            }],
            properties: BTreeMap::new(),
            default_props: BTreeMap::new(),
            children,
            src: SourceRef::default(),
        })
    }

    fn child(name: &str, def: Rc<ComponentDef>, dims: Vec<Expr>) -> ChildDecl {
        ChildDecl {
            name: name.to_owned(),
            def,
            spec: PlacementSpec {
                dims,
                ..Default::default()
            },
            param_overrides: BTreeMap::new(),
            src: SourceRef::default(),
        }
    }

    fn sample() -> (InstanceTree, InstanceId) {
        let field = def(ComponentKind::Field, "f_t", vec![]);
        let reg = def(
            ComponentKind::Reg,
            "r_t",
            vec![child("a", field.clone(), vec![]), child("b", field, vec![])],
        );
        let top = def(
            ComponentKind::Addrmap,
            "top_t",
            vec![
                child("r0", reg.clone(), vec![]),
                child("arr", reg, vec![Expr::int(4)]),
            ],
        );
        let mut tree = InstanceTree::new();
        let root = tree.instantiate(
            &top,
            "top",
            PlacementSpec::default(),
            &BTreeMap::new(),
            None,
            SourceRef::default(),
        );
        (tree, root)
    }

    #[test]
    fn instantiation_copies_whole_subtree() {
        let (tree, root) = sample();
        assert_eq!(tree.len(), 7);
        assert_eq!(tree.get(root).children.len(), 2);
        let arr = tree.child_by_name(root, "arr").unwrap();
        assert_eq!(tree.get(arr).dims(), Some(vec![4]));
        assert_eq!(tree.get(arr).params[0].default, Some(Expr::int(8)));
    }

    #[test]
    fn instances_of_one_definition_are_independent() {
        let (mut tree, root) = sample();
        let r0 = tree.child_by_name(root, "r0").unwrap();
        let arr = tree.child_by_name(root, "arr").unwrap();
        tree.get_mut(r0).placement.size = 4;
        assert_eq!(tree.get(arr).placement.size, 0);
    }

    #[test]
    fn paths_and_lookup() {
        let (tree, root) = sample();
        let arr = tree.child_by_name(root, "arr").unwrap();
        let b = tree.child_by_name(arr, "b").unwrap();
        assert_eq!(tree.path(b), "top.arr[].b");
        assert_eq!(tree.find_by_path(root, "top.arr[2].b"), Some(b));
        assert_eq!(tree.find_by_path(root, "top.nope"), None);
    }

    #[test]
    fn references_search_enclosing_scopes() {
        let (tree, root) = sample();
        let r0 = tree.child_by_name(root, "r0").unwrap();
        let a = tree.child_by_name(r0, "a").unwrap();
        let arr = tree.child_by_name(root, "arr").unwrap();
        // from inside field `a`, `arr.b` is found via the addrmap scope
        let target = tree.resolve_ref(a, &["arr".into(), "b".into()]);
        assert_eq!(target, tree.child_by_name(arr, "b"));
        // `b` resolves to the sibling within the same register first
        assert_eq!(
            tree.resolve_ref(a, &["b".into()]),
            tree.child_by_name(r0, "b")
        );
    }

    #[test]
    fn unresolved_params_are_reported_as_pending() {
        let (tree, _) = sample();
        let pending = tree.pending_values();
        assert_eq!(pending.len(), 7);
        assert!(pending.iter().all(|(_, what)| what == "parameter 'W'"));
    }

    #[test]
    fn element_count_saturates_instead_of_overflowing() {
        let (mut tree, root) = sample();
        let arr = tree.child_by_name(root, "arr").unwrap();
        assert_eq!(tree.get(arr).checked_element_count(), Some(4));
        tree.get_mut(arr).spec.dims = vec![PropValue::Resolved(Value::Int(1 << 33)); 2];
        assert_eq!(tree.get(arr).checked_element_count(), None);
        assert_eq!(tree.get(arr).element_count(), u64::MAX);
    }
}
