//! Property rule book: the catalog of recognized properties with their
//! value kinds, applicability and default policies.
//!
//! The catalog here is representative rather than exhaustive; every entry
//! goes through the same [`PropertyRule`] contract so adding properties is
//! mechanical.

use std::collections::HashMap;

use crate::component::ComponentKind;
use crate::error::ErrorKind;
use crate::instance::{InstanceId, InstanceTree};
use crate::expr::Value;

use ComponentKind::{Addrmap, Field, Mem, Reg, Regfile, Signal};

const ALL: &[ComponentKind] = &ComponentKind::ALL;
const STRUCTURAL: &[ComponentKind] = &[Field, Reg, Regfile, Addrmap];

const ACCESS: &[&str] = &["rw", "wr", "r", "w", "rw1", "w1", "na"];
const ONREAD: &[&str] = &["rclr", "rset", "ruser"];
const ONWRITE: &[&str] = &[
    "woset", "woclr", "wot", "wzs", "wzc", "wzt", "wclr", "wset", "wuser",
];
const ADDRESSING: &[&str] = &["compact", "regalign", "fullalign"];
const PRECEDENCE: &[&str] = &["sw", "hw"];

/// What kind of value a property accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    Int,
    Str,
    Keyword(&'static [&'static str]),
    /// Reference to an instance of one of the listed kinds.
    InstRef(&'static [ComponentKind]),
    EnumType,
}

impl ValueKind {
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (ValueKind::Bool, Value::Bool(_)) => true,
            (ValueKind::Int, Value::Int(_) | Value::EnumMember { .. }) => true,
            (ValueKind::Str, Value::Str(_)) => true,
            (ValueKind::Keyword(allowed), Value::Keyword(k)) => allowed.contains(&k.as_str()),
            (ValueKind::InstRef(_), Value::InstRef(_)) => true,
            (ValueKind::EnumType, Value::EnumType { .. }) => true,
            _ => false,
        }
    }

    pub fn describe(self) -> String {
        match self {
            ValueKind::Bool => "boolean".to_owned(),
            ValueKind::Int => "integer".to_owned(),
            ValueKind::Str => "string".to_owned(),
            ValueKind::Keyword(allowed) => format!("one of [{}]", allowed.join(", ")),
            ValueKind::InstRef(kinds) => {
                let names: Vec<&str> = kinds.iter().map(|k| k.as_str()).collect();
                format!("reference to {}", names.join("/"))
            }
            ValueKind::EnumType => "enum type".to_owned(),
        }
    }
}

/// Read-only view used by computed defaults.
///
/// Lookups go through the same precedence chain as the Node view, so a
/// computed default only ever sees values that are already resolved.
pub struct DefaultQuery<'a> {
    rules: &'a PropertyRuleBook,
    tree: &'a InstanceTree,
    id: InstanceId,
}

impl DefaultQuery<'_> {
    pub fn kind(&self) -> ComponentKind {
        self.tree.get(self.id).kind
    }

    pub fn property(&self, name: &str) -> Option<Value> {
        self.rules.effective(self.tree, self.id, name)
    }

    pub fn parent_kind(&self) -> Option<ComponentKind> {
        self.tree.get(self.id).parent.map(|p| self.tree.get(p).kind)
    }

    pub fn parent_property(&self, name: &str) -> Option<Value> {
        let parent = self.tree.get(self.id).parent?;
        self.rules.effective(self.tree, parent, name)
    }
}

#[derive(Clone, Copy)]
pub enum DefaultPolicy {
    /// No default; an unset property is absent.
    None,
    Const(fn() -> Value),
    Computed(fn(&DefaultQuery<'_>) -> Option<Value>),
}

impl std::fmt::Debug for DefaultPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefaultPolicy::None => f.write_str("None"),
            DefaultPolicy::Const(v) => write!(f, "Const({})", v()),
            DefaultPolicy::Computed(_) => f.write_str("Computed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropertyRule {
    pub name: &'static str,
    pub kind: ValueKind,
    pub applies_to: &'static [ComponentKind],
    pub default: DefaultPolicy,
    /// Absence on an applicable component is a compile-time error.
    pub mandatory: bool,
}

impl PropertyRule {
    pub fn applies(&self, kind: ComponentKind) -> bool {
        self.applies_to.contains(&kind)
    }
}

/// Property lookup or assignment failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PropertyError {
    #[error("unrecognized property '{name}'")]
    Unknown { name: String },
    #[error("property '{name}' is not applicable to {component} components")]
    NotApplicable {
        name: String,
        component: ComponentKind,
    },
    #[error("property '{name}' expects {expected} but got {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
    #[error("property '{name}' is not set")]
    NotSet { name: String },
}

impl PropertyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PropertyError::Unknown { .. } => ErrorKind::UnknownProperty,
            PropertyError::NotApplicable { .. } => ErrorKind::PropertyNotApplicable,
            PropertyError::TypeMismatch { .. } => ErrorKind::PropertyTypeMismatch,
            PropertyError::NotSet { .. } => ErrorKind::PropertyNotSet,
        }
    }
}

#[derive(Debug)]
pub struct PropertyRuleBook {
    rules: HashMap<&'static str, Vec<PropertyRule>>,
}

impl Default for PropertyRuleBook {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyRuleBook {
    pub fn new() -> Self {
        let mut book = PropertyRuleBook {
            rules: HashMap::new(),
        };
        for rule in catalog() {
            book.add(rule);
        }
        book
    }

    /// Register a rule. A name may carry several rules covering disjoint
    /// component kinds (e.g. `sw` on fields and on memories).
    pub fn add(&mut self, rule: PropertyRule) {
        self.rules.entry(rule.name).or_default().push(rule);
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// The first rule registered under `name`.
    pub fn get_rule(&self, name: &str) -> Result<&PropertyRule, PropertyError> {
        self.rules
            .get(name)
            .and_then(|r| r.first())
            .ok_or_else(|| PropertyError::Unknown {
                name: name.to_owned(),
            })
    }

    /// The rule governing `name` on `kind`.
    pub fn rule_for(&self, kind: ComponentKind, name: &str) -> Result<&PropertyRule, PropertyError> {
        let rules = self.rules.get(name).ok_or_else(|| PropertyError::Unknown {
            name: name.to_owned(),
        })?;
        rules
            .iter()
            .find(|r| r.applies(kind))
            .ok_or_else(|| PropertyError::NotApplicable {
                name: name.to_owned(),
                component: kind,
            })
    }

    pub fn applies(&self, kind: ComponentKind, name: &str) -> bool {
        self.rule_for(kind, name).is_ok()
    }

    pub fn validate_assignment(
        &self,
        kind: ComponentKind,
        name: &str,
        value: &Value,
    ) -> Result<(), PropertyError> {
        let rule = self.rule_for(kind, name)?;
        if rule.kind.accepts(value) {
            Ok(())
        } else {
            Err(PropertyError::TypeMismatch {
                name: name.to_owned(),
                expected: rule.kind.describe(),
                found: format!("{} {}", value.kind_name(), value),
            })
        }
    }

    /// The rule-book default of `name` for the instance `id`.
    pub fn get_default(&self, tree: &InstanceTree, id: InstanceId, name: &str) -> Option<Value> {
        let rule = self.rule_for(tree.get(id).kind, name).ok()?;
        match rule.default {
            DefaultPolicy::None => None,
            DefaultPolicy::Const(f) => Some(f()),
            DefaultPolicy::Computed(f) => f(&DefaultQuery {
                rules: self,
                tree,
                id,
            }),
        }
    }

    /// Effective value of `name` on `id`: explicit assignment, then the
    /// default-property context, then the rule-book default.
    pub fn effective(&self, tree: &InstanceTree, id: InstanceId, name: &str) -> Option<Value> {
        let inst = tree.get(id);
        if let Some(a) = inst.properties.get(name) {
            return a.value.resolved().cloned();
        }
        if let Some(a) = inst.default_props.get(name) {
            return a.value.resolved().cloned();
        }
        self.get_default(tree, id, name)
    }

    pub fn effective_int(&self, tree: &InstanceTree, id: InstanceId, name: &str) -> Option<u64> {
        self.effective(tree, id, name).as_ref().and_then(Value::as_int)
    }

    pub fn effective_bool(&self, tree: &InstanceTree, id: InstanceId, name: &str) -> bool {
        self.effective(tree, id, name)
            .as_ref()
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn mandatory_for(&self, kind: ComponentKind) -> impl Iterator<Item = &PropertyRule> {
        self.rules
            .values()
            .flatten()
            .filter(move |r| r.mandatory && r.applies(kind))
    }
}

// ──────────────────────────────────────────────
// Catalog
// ──────────────────────────────────────────────

fn rule(
    name: &'static str,
    kind: ValueKind,
    applies_to: &'static [ComponentKind],
    default: DefaultPolicy,
) -> PropertyRule {
    PropertyRule {
        name,
        kind,
        applies_to,
        default,
        mandatory: false,
    }
}

fn flag(name: &'static str, applies_to: &'static [ComponentKind]) -> PropertyRule {
    rule(name, ValueKind::Bool, applies_to, DefaultPolicy::Const(|| Value::Bool(false)))
}

fn default_regwidth(q: &DefaultQuery<'_>) -> Option<Value> {
    // registers inside a memory take the memory's word width
    if q.parent_kind() == Some(Mem) {
        if let Some(w) = q.parent_property("memwidth") {
            return Some(w);
        }
    }
    Some(Value::Int(32))
}

fn default_accesswidth(q: &DefaultQuery<'_>) -> Option<Value> {
    q.property("regwidth")
}

fn catalog() -> Vec<PropertyRule> {
    use DefaultPolicy::{Computed, Const, None as NoDefault};
    use ValueKind::*;

    let mut rules = vec![
        // general
        rule("name", Str, ALL, NoDefault),
        rule("desc", Str, ALL, NoDefault),
        rule("ispresent", Bool, ALL, Const(|| Value::Bool(true))),
        flag("donttest", STRUCTURAL),
        flag("dontcompare", STRUCTURAL),
        rule("hdl_path", Str, &[Reg, Regfile, Addrmap], NoDefault),
        // field
        rule("sw", Keyword(ACCESS), &[Field], Const(|| Value::Keyword("rw".into()))),
        rule("hw", Keyword(ACCESS), &[Field], Const(|| Value::Keyword("rw".into()))),
        rule("reset", Int, &[Field], NoDefault),
        rule("resetsignal", InstRef(&[Signal]), &[Field], NoDefault),
        rule("fieldwidth", Int, &[Field], NoDefault),
        rule("onread", Keyword(ONREAD), &[Field], NoDefault),
        rule("onwrite", Keyword(ONWRITE), &[Field], NoDefault),
        flag("woclr", &[Field]),
        flag("woset", &[Field]),
        flag("rclr", &[Field]),
        flag("singlepulse", &[Field]),
        flag("counter", &[Field]),
        rule("incrvalue", Int, &[Field], NoDefault),
        flag("intr", &[Field]),
        rule("encode", EnumType, &[Field], NoDefault),
        rule(
            "precedence",
            Keyword(PRECEDENCE),
            &[Field],
            Const(|| Value::Keyword("sw".into())),
        ),
        flag("swmod", &[Field]),
        flag("swacc", &[Field]),
        flag("we", &[Field]),
        flag("hwclr", &[Field]),
        flag("hwset", &[Field]),
        // reg
        rule("regwidth", Int, &[Reg], Computed(default_regwidth)),
        rule("accesswidth", Int, &[Reg], Computed(default_accesswidth)),
        flag("shared", &[Reg]),
        // regfile / addrmap
        rule("alignment", Int, &[Regfile, Addrmap], NoDefault),
        flag("sharedextbus", &[Regfile, Addrmap]),
        flag("errextbus", &[Regfile, Addrmap]),
        // addrmap
        rule(
            "addressing",
            Keyword(ADDRESSING),
            &[Addrmap],
            Const(|| Value::Keyword("regalign".into())),
        ),
        flag("bigendian", &[Addrmap]),
        flag("littleendian", &[Addrmap]),
        flag("lsb0", &[Addrmap]),
        flag("msb0", &[Addrmap]),
        flag("rsvdset", &[Addrmap]),
        // mem
        rule("memwidth", Int, &[Mem], Const(|| Value::Int(32))),
        rule("sw", Keyword(ACCESS), &[Mem], Const(|| Value::Keyword("rw".into()))),
        // signal
        rule("signalwidth", Int, &[Signal], Const(|| Value::Int(1))),
        flag("sync", &[Signal]),
        flag("async", &[Signal]),
        flag("activehigh", &[Signal]),
        flag("activelow", &[Signal]),
        flag("cpuif_reset", &[Signal]),
        flag("field_reset", &[Signal]),
    ];
    rules.push(PropertyRule {
        mandatory: true,
        ..rule("mementries", Int, &[Mem], NoDefault)
    });
    rules
}
