//! Pass 1: Tree construction -- parse unit -> component definitions.
//!
//! Walks the raw items of one unit in declaration order, binding type names
//! in the namespace, capturing the default-property context for each
//! definition and lowering raw expressions. Constant errors that can be
//! detected without instantiating anything are reported here; everything
//! else is left to elaboration.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ast::*;
use crate::component::{
    BitSpec, ChildDecl, ComponentDef, EnumDef, ParamDef, PlacementSpec,
    PropAssignment, PropValue, TypeDef,
};
use crate::error::ErrorKind;
use crate::expr::{ConstScope, Expr, Value};
use crate::messages::MessageHandler;
use crate::namespace::{NamespaceError, NamespaceRegistry};
use crate::properties::PropertyRuleBook;

/// Lower every item of `unit` into the namespace. Errors are recorded on
/// `msg`; the caller decides whether to abort.
pub fn construct_unit(
    unit: &ParseUnit,
    ns: &mut NamespaceRegistry,
    rules: &PropertyRuleBook,
    msg: &mut MessageHandler,
) {
    let mut builder = Builder {
        file: &unit.file,
        ns,
        rules,
        msg,
    };
    for item in &unit.items {
        builder.root_item(item);
    }
}

struct Builder<'a> {
    file: &'a str,
    ns: &'a mut NamespaceRegistry,
    rules: &'a PropertyRuleBook,
    msg: &'a mut MessageHandler,
}

impl Builder<'_> {
    fn src(&self, line: u32) -> SourceRef {
        SourceRef::new(self.file, line)
    }

    fn namespace_error(&mut self, err: NamespaceError, line: u32) {
        let kind = match err {
            NamespaceError::NameConflict(_) => ErrorKind::NameConflict,
            NamespaceError::UndefinedName(_) => ErrorKind::UndefinedName,
        };
        let src = self.src(line);
        self.msg.error(kind, err.to_string(), Some(&src), None);
    }

    fn error(&mut self, kind: ErrorKind, message: String, line: u32) {
        let src = self.src(line);
        self.msg.error(kind, message, Some(&src), None);
    }

    // ──────────────────────────────────────────────
    // Root scope
    // ──────────────────────────────────────────────

    fn root_item(&mut self, item: &RawItem) {
        match item {
            RawItem::Component(raw) => {
                if raw.name.is_none() {
                    self.error(
                        ErrorKind::InvalidComponent,
                        format!("anonymous {} definition at root scope is never instantiated", raw.kind),
                        raw.line,
                    );
                    return;
                }
                self.named_component(raw);
            }
            RawItem::Enum(raw) => self.enum_def(raw),
            RawItem::DefaultProperty(assign) => self.default_property(assign),
            RawItem::Property(assign) => self.error(
                ErrorKind::InvalidComponent,
                format!("property '{}' assigned outside of any component", assign.name),
                assign.line,
            ),
            RawItem::Instance(inst) => self.error(
                ErrorKind::InvalidComponent,
                format!(
                    "instance '{}' at root scope; only definitions may appear here",
                    inst.name
                ),
                inst.line,
            ),
        }
    }

    /// Build a definition and bind its name in the current scope.
    fn named_component(&mut self, raw: &RawComponent) -> Option<Rc<ComponentDef>> {
        let def = Rc::new(self.component(raw));
        if let Some(name) = &raw.name {
            if let Err(e) = self.ns.define(name, TypeDef::Component(def.clone())) {
                self.namespace_error(e, raw.line);
                return None;
            }
        }
        Some(def)
    }

    fn enum_def(&mut self, raw: &RawEnum) {
        let mut members: Vec<(String, u64)> = Vec::new();
        let mut next = 0u64;
        for m in &raw.members {
            if members.iter().any(|(n, _)| *n == m.name) {
                self.error(
                    ErrorKind::NameConflict,
                    format!("enum '{}' declares member '{}' twice", raw.name, m.name),
                    raw.line,
                );
                continue;
            }
            let value = match &m.value {
                None => next,
                Some(expr) => {
                    let Some(lowered) = self.expr(expr, raw.line) else {
                        continue;
                    };
                    match lowered.eval(&ConstScope).map(|v| v.as_int()) {
                        Ok(Some(v)) => v,
                        Ok(None) => {
                            self.error(
                                ErrorKind::InvalidValue,
                                format!("enum member '{}::{}' must be an integer", raw.name, m.name),
                                raw.line,
                            );
                            continue;
                        }
                        Err(e) => {
                            self.error(
                                ErrorKind::UnresolvableExpression,
                                format!("enum member '{}::{}': {}", raw.name, m.name, e),
                                raw.line,
                            );
                            continue;
                        }
                    }
                }
            };
            members.push((m.name.clone(), value));
            next = value.wrapping_add(1);
        }
        let def = EnumDef {
            name: raw.name.clone(),
            members,
            src: self.src(raw.line),
        };
        if let Err(e) = self.ns.define(&raw.name, TypeDef::Enum(Rc::new(def))) {
            self.namespace_error(e, raw.line);
        }
    }

    fn default_property(&mut self, assign: &RawPropAssign) {
        if !self.rules.is_known(&assign.name) {
            self.error(
                ErrorKind::UnknownProperty,
                format!("unrecognized property '{}'", assign.name),
                assign.line,
            );
            return;
        }
        let Some(value) = self.prop_value(assign) else {
            return;
        };
        let assignment = PropAssignment {
            value,
            src: self.src(assign.line),
        };
        if let Err(e) = self.ns.push_default_property(&assign.name, assignment) {
            self.namespace_error(e, assign.line);
        }
    }

    // ──────────────────────────────────────────────
    // Component bodies
    // ──────────────────────────────────────────────

    fn component(&mut self, raw: &RawComponent) -> ComponentDef {
        // defaults visible where the definition is declared, restricted to
        // what applies to this kind
        let default_props: BTreeMap<String, PropAssignment> = self
            .ns
            .default_properties()
            .into_iter()
            .filter(|(name, _)| self.rules.applies(raw.kind, name))
            .collect();

        let mut params = Vec::new();
        for p in &raw.params {
            if params.iter().any(|d: &ParamDef| d.name == p.name) {
                self.error(
                    ErrorKind::NameConflict,
                    format!("parameter '{}' declared twice", p.name),
                    raw.line,
                );
                continue;
            }
            let default = p.default.as_ref().and_then(|e| self.expr(e, raw.line));
            params.push(ParamDef {
                name: p.name.clone(),
                default,
            });
        }

        let mut def = ComponentDef {
            kind: raw.kind,
            type_name: raw.name.clone(),
            params,
            properties: BTreeMap::new(),
            default_props,
            children: Vec::new(),
            src: self.src(raw.line),
        };

        self.ns.enter_scope();
        for item in &raw.body {
            self.body_item(&mut def, item);
        }
        self.ns.exit_scope();
        def
    }

    fn body_item(&mut self, def: &mut ComponentDef, item: &RawItem) {
        match item {
            RawItem::Component(raw) => {
                if raw.name.is_none() {
                    self.error(
                        ErrorKind::InvalidComponent,
                        format!("anonymous {} definition is never instantiated", raw.kind),
                        raw.line,
                    );
                    return;
                }
                self.named_component(raw);
            }
            RawItem::Enum(raw) => self.enum_def(raw),
            RawItem::DefaultProperty(assign) => self.default_property(assign),
            RawItem::Property(assign) => self.local_property(def, assign),
            RawItem::Instance(inst) => {
                if let Some(child) = self.child(inst) {
                    def.children.push(child);
                }
            }
        }
    }

    fn local_property(&mut self, def: &mut ComponentDef, assign: &RawPropAssign) {
        if let Err(e) = self.rules.rule_for(def.kind, &assign.name) {
            self.error(e.kind(), e.to_string(), assign.line);
            return;
        }
        let Some(value) = self.prop_value(assign) else {
            return;
        };
        if let PropValue::Resolved(v) = &value {
            if let Err(e) = self.rules.validate_assignment(def.kind, &assign.name, v) {
                self.error(e.kind(), e.to_string(), assign.line);
                return;
            }
        }
        if def.properties.contains_key(&assign.name) {
            self.error(
                ErrorKind::NameConflict,
                format!("property '{}' assigned twice in the same body", assign.name),
                assign.line,
            );
            return;
        }
        def.properties.insert(
            assign.name.clone(),
            PropAssignment {
                value,
                src: self.src(assign.line),
            },
        );
    }

    fn prop_value(&mut self, assign: &RawPropAssign) -> Option<PropValue> {
        match &assign.value {
            None => Some(PropValue::Resolved(Value::Bool(true))),
            Some(raw) => self.expr(raw, assign.line).map(PropValue::from_expr),
        }
    }

    fn child(&mut self, inst: &RawInstance) -> Option<ChildDecl> {
        let def = match &inst.ty {
            RawTypeRef::Named(name) => match self.ns.lookup(name) {
                Ok(TypeDef::Component(def)) => def.clone(),
                Ok(TypeDef::Enum(_)) => {
                    self.error(
                        ErrorKind::InvalidComponent,
                        format!("'{}' is an enumeration and cannot be instantiated", name),
                        inst.line,
                    );
                    return None;
                }
                Err(e) => {
                    self.namespace_error(e, inst.line);
                    return None;
                }
            },
            RawTypeRef::Inline(raw) => self.named_component(raw)?,
        };

        let mut param_overrides = BTreeMap::new();
        for (name, raw) in &inst.params {
            if !def.params.iter().any(|p| p.name == *name) {
                self.error(
                    ErrorKind::UndefinedName,
                    format!("{} has no parameter '{}'", def.display_name(), name),
                    inst.line,
                );
                continue;
            }
            if let Some(e) = self.expr(raw, inst.line) {
                param_overrides.insert(name.clone(), e);
            }
        }

        let spec = self.placement(inst)?;

        Some(ChildDecl {
            name: inst.name.clone(),
            def,
            spec,
            param_overrides,
            src: self.src(inst.line),
        })
    }

    fn placement(&mut self, inst: &RawInstance) -> Option<PlacementSpec<Expr>> {
        let line = inst.line;
        let mut dims = Vec::with_capacity(inst.dims.len());
        for d in &inst.dims {
            dims.push(self.expr(d, line)?);
        }
        let bits = match &inst.bits {
            None => None,
            Some(RawBits::Range { msb, lsb }) => Some(BitSpec::Range {
                msb: self.expr(msb, line)?,
                lsb: self.expr(lsb, line)?,
            }),
            Some(RawBits::Width(w)) => Some(BitSpec::Width(self.expr(w, line)?)),
        };
        Some(PlacementSpec {
            dims,
            bits,
            addr: self.optional_expr(inst.addr.as_ref(), line)?,
            stride: self.optional_expr(inst.stride.as_ref(), line)?,
            align: self.optional_expr(inst.align.as_ref(), line)?,
        })
    }

    // ──────────────────────────────────────────────
    // Expressions
    // ──────────────────────────────────────────────

    /// Outer `None` means lowering failed; inner `None` means absent.
    fn optional_expr(&mut self, raw: Option<&RawExpr>, line: u32) -> Option<Option<Expr>> {
        match raw {
            None => Some(None),
            Some(r) => self.expr(r, line).map(Some),
        }
    }

    /// Lower a raw expression, resolving enum and type names against the
    /// namespace. Reports and returns `None` on failure.
    fn expr(&mut self, raw: &RawExpr, line: u32) -> Option<Expr> {
        let lit = |v: Value| Some(Expr::Literal(v));
        match raw {
            RawExpr::Int(v) => lit(Value::Int(*v)),
            RawExpr::Bool(b) => lit(Value::Bool(*b)),
            RawExpr::Str(s) => lit(Value::Str(s.clone())),
            RawExpr::Keyword(k) => lit(Value::Keyword(k.clone())),
            RawExpr::Param(name) => Some(Expr::Param(name.clone())),
            RawExpr::Ref(path) => Some(Expr::InstRef(path.clone())),
            RawExpr::PropRef { path, prop } => {
                if !self.rules.is_known(prop) {
                    self.error(
                        ErrorKind::UnknownProperty,
                        format!("unrecognized property '{}' in reference", prop),
                        line,
                    );
                    return None;
                }
                Some(Expr::PropRef {
                    path: path.clone(),
                    prop: prop.clone(),
                })
            }
            RawExpr::ArrayCount { path, dim } => Some(Expr::ArrayCount {
                path: path.clone(),
                dim: *dim,
            }),
            RawExpr::EnumMember { ty, member } => {
                let found = match self.ns.lookup(ty) {
                    Ok(TypeDef::Enum(e)) => e.member(member).ok_or_else(|| {
                        format!("enum '{}' has no member '{}'", ty, member)
                    }),
                    Ok(TypeDef::Component(_)) => Err(format!("'{}' is not an enumeration", ty)),
                    Err(e) => Err(e.to_string()),
                };
                match found {
                    Ok(value) => lit(Value::EnumMember {
                        ty: ty.clone(),
                        member: member.clone(),
                        value,
                    }),
                    Err(message) => {
                        self.error(ErrorKind::UndefinedName, message, line);
                        None
                    }
                }
            }
            RawExpr::TypeName(name) => match self.ns.lookup(name) {
                Ok(TypeDef::Enum(e)) => self.ns.enum_key(e).and_then(|id| {
                    lit(Value::EnumType {
                        name: name.clone(),
                        id,
                    })
                }),
                Ok(TypeDef::Component(_)) => {
                    self.error(
                        ErrorKind::InvalidValue,
                        format!("component type '{}' cannot be used as a value", name),
                        line,
                    );
                    None
                }
                Err(e) => {
                    self.namespace_error(e, line);
                    None
                }
            },
            RawExpr::Unary { op, operand } => Some(Expr::Unary {
                op: *op,
                operand: Box::new(self.expr(operand, line)?),
            }),
            RawExpr::Binary { op, lhs, rhs } => {
                let lhs = self.expr(lhs, line);
                let rhs = self.expr(rhs, line);
                Some(Expr::Binary {
                    op: *op,
                    lhs: Box::new(lhs?),
                    rhs: Box::new(rhs?),
                })
            }
            RawExpr::Ternary {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.expr(cond, line);
                let then = self.expr(then, line);
                let otherwise = self.expr(otherwise, line);
                Some(Expr::Ternary {
                    cond: Box::new(cond?),
                    then: Box::new(then?),
                    otherwise: Box::new(otherwise?),
                })
            }
        }
    }
}
