//! Parse tree handed to the compiler by a front end.
//!
//! Every type here is serde-deserializable so a front end written in any
//! language can emit a unit as JSON. The compiler never mutates these; tree
//! construction lowers them into component definitions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::component::ComponentKind;
use crate::expr::{BinaryOp, UnaryOp};

// ──────────────────────────────────────────────
// Source locations
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub file: String,
    pub line: u32,
}

impl SourceRef {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        SourceRef {
            file: file.into(),
            line,
        }
    }
}

// ──────────────────────────────────────────────
// Units
// ──────────────────────────────────────────────

/// One independently compiled input unit (typically one source file).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseUnit {
    pub file: String,
    /// Syntax errors the front end already reported for this unit.
    #[serde(default)]
    pub syntax_errors: Vec<SyntaxError>,
    #[serde(default)]
    pub items: Vec<RawItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntaxError {
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "item", rename_all = "snake_case")]
pub enum RawItem {
    Component(RawComponent),
    Enum(RawEnum),
    Instance(RawInstance),
    Property(RawPropAssign),
    DefaultProperty(RawPropAssign),
}

// ──────────────────────────────────────────────
// Declarations
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComponent {
    pub kind: ComponentKind,
    /// Type name; `None` for an anonymous inline definition.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub params: Vec<RawParam>,
    #[serde(default)]
    pub body: Vec<RawItem>,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawParam {
    pub name: String,
    #[serde(default)]
    pub default: Option<RawExpr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnum {
    pub name: String,
    pub members: Vec<RawEnumMember>,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEnumMember {
    pub name: String,
    /// Defaults to the previous member's value plus one (zero for the first).
    #[serde(default)]
    pub value: Option<RawExpr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawTypeRef {
    Named(String),
    Inline(Box<RawComponent>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawBits {
    /// `[msb:lsb]`
    Range { msb: RawExpr, lsb: RawExpr },
    /// `[width]`
    Width(RawExpr),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawInstance {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: RawTypeRef,
    /// Array dimensions, outermost first.
    #[serde(default)]
    pub dims: Vec<RawExpr>,
    #[serde(default)]
    pub bits: Option<RawBits>,
    /// `@ addr` (byte address, or bit offset for fields)
    #[serde(default)]
    pub addr: Option<RawExpr>,
    /// `+= stride`
    #[serde(default)]
    pub stride: Option<RawExpr>,
    /// `%= align`
    #[serde(default)]
    pub align: Option<RawExpr>,
    #[serde(default)]
    pub params: BTreeMap<String, RawExpr>,
    #[serde(default)]
    pub line: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPropAssign {
    pub name: String,
    /// A bare `name;` assignment means `true`.
    #[serde(default)]
    pub value: Option<RawExpr>,
    #[serde(default)]
    pub line: u32,
}

// ──────────────────────────────────────────────
// Expressions
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawExpr {
    Int(u64),
    Bool(bool),
    Str(String),
    Keyword(String),
    Param(String),
    Ref(Vec<String>),
    PropRef {
        path: Vec<String>,
        prop: String,
    },
    ArrayCount {
        path: Vec<String>,
        #[serde(default)]
        dim: usize,
    },
    EnumMember {
        ty: String,
        member: String,
    },
    TypeName(String),
    Unary {
        op: UnaryOp,
        operand: Box<RawExpr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<RawExpr>,
        rhs: Box<RawExpr>,
    },
    Ternary {
        cond: Box<RawExpr>,
        then: Box<RawExpr>,
        otherwise: Box<RawExpr>,
    },
}

// ──────────────────────────────────────────────
// Builders
// ──────────────────────────────────────────────

impl RawComponent {
    pub fn new(kind: ComponentKind, name: Option<&str>) -> Self {
        RawComponent {
            kind,
            name: name.map(str::to_owned),
            params: Vec::new(),
            body: Vec::new(),
            line: 0,
        }
    }

    pub fn param(mut self, name: &str, default: Option<RawExpr>) -> Self {
        self.params.push(RawParam {
            name: name.to_owned(),
            default,
        });
        self
    }

    pub fn prop(mut self, name: &str, value: RawExpr) -> Self {
        self.body.push(RawItem::Property(RawPropAssign {
            name: name.to_owned(),
            value: Some(value),
            line: 0,
        }));
        self
    }

    pub fn default_prop(mut self, name: &str, value: RawExpr) -> Self {
        self.body.push(RawItem::DefaultProperty(RawPropAssign {
            name: name.to_owned(),
            value: Some(value),
            line: 0,
        }));
        self
    }

    pub fn child(mut self, inst: RawInstance) -> Self {
        self.body.push(RawItem::Instance(inst));
        self
    }

    pub fn item(mut self, item: RawItem) -> Self {
        self.body.push(item);
        self
    }
}

impl RawInstance {
    pub fn named(name: &str, type_name: &str) -> Self {
        Self::with_type(name, RawTypeRef::Named(type_name.to_owned()))
    }

    pub fn inline(name: &str, def: RawComponent) -> Self {
        Self::with_type(name, RawTypeRef::Inline(Box::new(def)))
    }

    fn with_type(name: &str, ty: RawTypeRef) -> Self {
        RawInstance {
            name: name.to_owned(),
            ty,
            dims: Vec::new(),
            bits: None,
            addr: None,
            stride: None,
            align: None,
            params: BTreeMap::new(),
            line: 0,
        }
    }

    pub fn array(mut self, dims: &[u64]) -> Self {
        self.dims = dims.iter().map(|d| RawExpr::Int(*d)).collect();
        self
    }

    pub fn bits(mut self, msb: u64, lsb: u64) -> Self {
        self.bits = Some(RawBits::Range {
            msb: RawExpr::Int(msb),
            lsb: RawExpr::Int(lsb),
        });
        self
    }

    pub fn width(mut self, width: u64) -> Self {
        self.bits = Some(RawBits::Width(RawExpr::Int(width)));
        self
    }

    pub fn at(mut self, addr: u64) -> Self {
        self.addr = Some(RawExpr::Int(addr));
        self
    }

    pub fn stride(mut self, stride: u64) -> Self {
        self.stride = Some(RawExpr::Int(stride));
        self
    }

    pub fn align(mut self, align: u64) -> Self {
        self.align = Some(RawExpr::Int(align));
        self
    }

    pub fn with_param(mut self, name: &str, value: RawExpr) -> Self {
        self.params.insert(name.to_owned(), value);
        self
    }
}

impl ParseUnit {
    pub fn new(file: &str) -> Self {
        ParseUnit {
            file: file.to_owned(),
            ..Default::default()
        }
    }

    pub fn component(mut self, def: RawComponent) -> Self {
        self.items.push(RawItem::Component(def));
        self
    }

    pub fn item(mut self, item: RawItem) -> Self {
        self.items.push(item);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_deserializes_from_json() {
        let unit: ParseUnit = serde_json::from_value(serde_json::json!({
            "file": "top.rdl",
            "items": [
                { "item": "default_property", "name": "sw", "value": { "keyword": "rw" } },
                {
                    "item": "component", "kind": "addrmap", "name": "top", "line": 3,
                    "body": [
                        {
                            "item": "instance", "name": "r0",
                            "type": { "inline": { "kind": "reg", "body": [
                                { "item": "instance", "name": "f", "type": { "named": "my_field" },
                                  "bits": { "range": { "msb": { "int": 7 }, "lsb": { "int": 0 } } } }
                            ] } },
                            "addr": { "binary": { "op": "+", "lhs": { "int": 4 }, "rhs": { "param": "BASE" } } }
                        },
                        { "item": "property", "name": "desc", "value": { "str": "top map" } }
                    ]
                }
            ]
        }))
        .unwrap();

        assert_eq!(unit.items.len(), 2);
        let RawItem::Component(top) = &unit.items[1] else {
            panic!("expected component");
        };
        assert_eq!(top.kind, ComponentKind::Addrmap);
        assert_eq!(top.line, 3);
        let RawItem::Instance(r0) = &top.body[0] else {
            panic!("expected instance");
        };
        assert!(matches!(r0.ty, RawTypeRef::Inline(_)));
        assert!(matches!(
            r0.addr,
            Some(RawExpr::Binary {
                op: BinaryOp::Add,
                ..
            })
        ));
    }

    #[test]
    fn bare_property_has_no_value() {
        let item: RawItem =
            serde_json::from_value(serde_json::json!({ "item": "property", "name": "counter" }))
                .unwrap();
        let RawItem::Property(p) = item else {
            panic!("expected property");
        };
        assert!(p.value.is_none());
    }
}
