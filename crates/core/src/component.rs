//! Component definitions: immutable templates built from the parse tree.
//!
//! Definitions are shared as `Rc<ComponentDef>` between the namespace and
//! the child declarations that reference them. Elaboration never mutates a
//! definition; it deep-copies one into an [`crate::instance::InstanceTree`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::SourceRef;
use crate::expr::{Expr, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Field,
    Reg,
    Regfile,
    Addrmap,
    Mem,
    Signal,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 6] = [
        ComponentKind::Field,
        ComponentKind::Reg,
        ComponentKind::Regfile,
        ComponentKind::Addrmap,
        ComponentKind::Mem,
        ComponentKind::Signal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Field => "field",
            ComponentKind::Reg => "reg",
            ComponentKind::Regfile => "regfile",
            ComponentKind::Addrmap => "addrmap",
            ComponentKind::Mem => "mem",
            ComponentKind::Signal => "signal",
        }
    }

    /// Kinds whose children are placed at byte addresses.
    pub fn is_addressable_container(self) -> bool {
        matches!(
            self,
            ComponentKind::Regfile | ComponentKind::Addrmap | ComponentKind::Mem
        )
    }

    /// Kinds that occupy address space inside their parent.
    pub fn is_addressable(self) -> bool {
        matches!(self, ComponentKind::Reg) || self.is_addressable_container()
    }

    /// Whether an instance of `child` may be declared inside `self`.
    pub fn may_contain(self, child: ComponentKind) -> bool {
        use ComponentKind::*;
        match (self, child) {
            (Reg, Field) => true,
            (Regfile | Addrmap | Mem, Reg) => true,
            (Regfile | Addrmap, Regfile) => true,
            (Addrmap, Addrmap | Mem) => true,
            (Reg | Regfile | Addrmap, Signal) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A property or placement value that may still be waiting for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum PropValue {
    Resolved(Value),
    Pending(Expr),
}

impl PropValue {
    pub fn from_expr(expr: Expr) -> Self {
        match expr {
            Expr::Literal(v) => PropValue::Resolved(v),
            other => PropValue::Pending(other),
        }
    }

    pub fn resolved(&self) -> Option<&Value> {
        match self {
            PropValue::Resolved(v) => Some(v),
            PropValue::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PropValue::Pending(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropAssignment {
    pub value: PropValue,
    pub src: SourceRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamDef {
    pub name: String,
    pub default: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BitSpec<T> {
    Range { msb: T, lsb: T },
    Width(T),
}

impl<T> BitSpec<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> BitSpec<U> {
        match self {
            BitSpec::Range { msb, lsb } => BitSpec::Range {
                msb: f(msb),
                lsb: f(lsb),
            },
            BitSpec::Width(w) => BitSpec::Width(f(w)),
        }
    }
}

/// Placement request written at an instantiation site: array dimensions,
/// field bits and the `@`, `+=`, `%=` operators.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementSpec<T> {
    pub dims: Vec<T>,
    pub bits: Option<BitSpec<T>>,
    pub addr: Option<T>,
    pub stride: Option<T>,
    pub align: Option<T>,
}

impl<T> Default for PlacementSpec<T> {
    fn default() -> Self {
        PlacementSpec {
            dims: Vec::new(),
            bits: None,
            addr: None,
            stride: None,
            align: None,
        }
    }
}

impl<T> PlacementSpec<T> {
    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PlacementSpec<U> {
        PlacementSpec {
            dims: self.dims.into_iter().map(&mut f).collect(),
            bits: self.bits.map(|b| b.map(&mut f)),
            addr: self.addr.map(&mut f),
            stride: self.stride.map(&mut f),
            align: self.align.map(&mut f),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComponentDef {
    pub kind: ComponentKind,
    pub type_name: Option<String>,
    pub params: Vec<ParamDef>,
    pub properties: BTreeMap<String, PropAssignment>,
    /// Default-property context in effect where the definition was declared,
    /// filtered to the properties that apply to `kind`.
    pub default_props: BTreeMap<String, PropAssignment>,
    pub children: Vec<ChildDecl>,
    pub src: SourceRef,
}

impl ComponentDef {
    pub fn display_name(&self) -> String {
        match &self.type_name {
            Some(n) => n.clone(),
            None => format!("<anonymous {}>", self.kind),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChildDecl {
    pub name: String,
    pub def: Rc<ComponentDef>,
    pub spec: PlacementSpec<Expr>,
    pub param_overrides: BTreeMap<String, Expr>,
    pub src: SourceRef,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    pub name: String,
    pub members: Vec<(String, u64)>,
    pub src: SourceRef,
}

impl EnumDef {
    pub fn member(&self, name: &str) -> Option<u64> {
        self.members
            .iter()
            .find(|(m, _)| m == name)
            .map(|(_, v)| *v)
    }
}

/// Anything a type name can be bound to in the namespace.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Component(Rc<ComponentDef>),
    Enum(Rc<EnumDef>),
}

impl TypeDef {
    pub fn src(&self) -> &SourceRef {
        match self {
            TypeDef::Component(c) => &c.src,
            TypeDef::Enum(e) => &e.src,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn containment_rules() {
        use ComponentKind::*;
        assert!(Reg.may_contain(Field));
        assert!(Addrmap.may_contain(Mem));
        assert!(Mem.may_contain(Reg));
        assert!(!Addrmap.may_contain(Field));
        assert!(!Regfile.may_contain(Addrmap));
        assert!(!Mem.may_contain(Signal));
        assert!(!Field.may_contain(Signal));
    }

    #[test]
    fn literal_expressions_become_resolved_values() {
        assert_eq!(
            PropValue::from_expr(Expr::int(4)),
            PropValue::Resolved(Value::Int(4))
        );
        assert!(PropValue::from_expr(Expr::Param("W".into())).is_pending());
    }
}
