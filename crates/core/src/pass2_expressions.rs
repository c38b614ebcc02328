//! Pass 2: Expression resolution.
//!
//! Pre-order walk that evaluates every deferred expression in the instance
//! tree: parameters first, then the placement request (in the parent's
//! scope), then property assignments and captured default properties (in
//! the instance's own scope). Parents are resolved before their children
//! are entered, so a child's overrides can read its parent's parameters.

use std::collections::BTreeSet;

use crate::component::PropValue;
use crate::error::ErrorKind;
use crate::expr::{EvalError, EvalScope, Value};
use crate::instance::{InstanceId, InstanceTree};
use crate::properties::PropertyRuleBook;
use crate::walker::{Listener, WalkContext, Walker, WalkerAction};

/// Resolve every expression under `root`, then report anything still
/// pending.
pub fn resolve_expressions(cx: &mut WalkContext<'_>, root: InstanceId) {
    let mut listener = ExpressionListener::default();
    Walker::elaboration().walk(cx, root, &mut [&mut listener]);

    for (id, what) in cx.tree.pending_values() {
        if listener.failed.contains(&id) {
            continue;
        }
        cx.error(
            ErrorKind::UnresolvableExpression,
            id,
            format!("{} was never resolved", what),
        );
    }
}

/// Name lookups from inside the body of `scope`.
pub struct TreeScope<'t> {
    tree: &'t InstanceTree,
    rules: &'t PropertyRuleBook,
    scope: InstanceId,
}

impl<'t> TreeScope<'t> {
    pub fn new(tree: &'t InstanceTree, rules: &'t PropertyRuleBook, scope: InstanceId) -> Self {
        TreeScope { tree, rules, scope }
    }

    fn target(&self, path: &[String]) -> Result<InstanceId, EvalError> {
        self.tree
            .resolve_ref(self.scope, path)
            .ok_or_else(|| EvalError::UnresolvedReference(path.join(".")))
    }
}

impl EvalScope for TreeScope<'_> {
    fn param(&self, name: &str) -> Result<Value, EvalError> {
        self.tree
            .get(self.scope)
            .param(name)
            .and_then(|p| p.value.clone())
            .ok_or_else(|| EvalError::UnboundParameter(name.to_owned()))
    }

    fn instance_ref(&self, path: &[String]) -> Result<Value, EvalError> {
        let target = self.target(path)?;
        Ok(Value::InstRef(self.tree.path(target)))
    }

    fn property_ref(&self, path: &[String], prop: &str) -> Result<Value, EvalError> {
        let target = self.target(path)?;
        let inst = self.tree.get(target);
        let qualified = || format!("{}->{}", path.join("."), prop);
        if !self.rules.applies(inst.kind, prop) {
            return Err(EvalError::UnknownProperty(qualified()));
        }
        let pending = inst
            .properties
            .get(prop)
            .or_else(|| inst.default_props.get(prop))
            .is_some_and(|a| a.value.is_pending());
        if pending {
            return Err(EvalError::ForwardReference(qualified()));
        }
        self.rules
            .effective(self.tree, target, prop)
            .ok_or_else(|| EvalError::PropertyNotSet(qualified()))
    }

    fn array_count(&self, path: &[String], dim: usize) -> Result<u64, EvalError> {
        let target = self.target(path)?;
        let not_array = || EvalError::NotAnArray(path.join("."), dim);
        match self.tree.get(target).spec.dims.get(dim) {
            None => Err(not_array()),
            Some(PropValue::Pending(_)) => Err(EvalError::ForwardReference(path.join("."))),
            Some(PropValue::Resolved(v)) => v.as_int().ok_or_else(not_array),
        }
    }
}

#[derive(Default)]
struct ExpressionListener {
    /// Instances that already reported a failure; the completeness scan
    /// skips them.
    failed: BTreeSet<InstanceId>,
}

impl ExpressionListener {
    fn fail(&mut self, cx: &mut WalkContext<'_>, id: InstanceId, what: &str, err: EvalError) {
        self.failed.insert(id);
        cx.error(
            ErrorKind::UnresolvableExpression,
            id,
            format!("cannot resolve {}: {}", what, err),
        );
    }

    fn resolve_params(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let parent = cx.tree.get(id).parent;
        for i in 0..cx.tree.get(id).params.len() {
            let (name, result) = {
                let tree: &InstanceTree = cx.tree;
                let p = &tree.get(id).params[i];
                let result = match (&p.override_expr, &p.default) {
                    // overrides are written in the parent's body
                    (Some(e), _) => e.eval(&TreeScope::new(tree, cx.rules, parent.unwrap_or(id))),
                    (None, Some(e)) => e.eval(&TreeScope::new(tree, cx.rules, id)),
                    (None, None) => Err(EvalError::UnboundParameter(p.name.clone())),
                };
                (p.name.clone(), result)
            };
            match result {
                Ok(v) => cx.tree.get_mut(id).params[i].value = Some(v),
                Err(e) => self.fail(cx, id, &format!("parameter '{}'", name), e),
            }
        }
    }

    fn resolve_placement(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let scope = cx.tree.get(id).parent.unwrap_or(id);
        let mut errors = Vec::new();
        let spec = {
            let tree: &InstanceTree = cx.tree;
            let eval_scope = TreeScope::new(tree, cx.rules, scope);
            tree.get(id).spec.clone().map(|v| match v {
                PropValue::Pending(e) => match e.eval(&eval_scope) {
                    Ok(val) => PropValue::Resolved(val),
                    Err(err) => {
                        errors.push(err);
                        PropValue::Pending(e)
                    }
                },
                resolved => resolved,
            })
        };
        cx.tree.get_mut(id).spec = spec;
        for err in errors {
            self.fail(cx, id, "placement expression", err);
        }
    }

    fn resolve_properties(&mut self, cx: &mut WalkContext<'_>, id: InstanceId, defaults: bool) {
        let names: Vec<String> = {
            let inst = cx.tree.get(id);
            let map = if defaults { &inst.default_props } else { &inst.properties };
            map.keys().cloned().collect()
        };
        for name in names {
            let result = {
                let tree: &InstanceTree = cx.tree;
                let inst = tree.get(id);
                let map = if defaults { &inst.default_props } else { &inst.properties };
                match map.get(&name).map(|a| &a.value) {
                    Some(PropValue::Pending(e)) => Some(e.eval(&TreeScope::new(tree, cx.rules, id))),
                    _ => None,
                }
            };
            match result {
                Some(Ok(value)) => {
                    let inst = cx.tree.get_mut(id);
                    let map = if defaults {
                        &mut inst.default_props
                    } else {
                        &mut inst.properties
                    };
                    if let Some(a) = map.get_mut(&name) {
                        a.value = PropValue::Resolved(value);
                    }
                }
                Some(Err(e)) => {
                    self.fail(cx, id, &format!("property '{}'", name), e);
                    continue;
                }
                None => {}
            }
            self.check_type(cx, id, &name, defaults);
        }
    }

    fn check_type(&mut self, cx: &mut WalkContext<'_>, id: InstanceId, name: &str, defaults: bool) {
        let inst = cx.tree.get(id);
        let map = if defaults { &inst.default_props } else { &inst.properties };
        let Some(value) = map.get(name).and_then(|a| a.value.resolved()) else {
            return;
        };
        if let Err(e) = cx.rules.validate_assignment(inst.kind, name, value) {
            cx.error(e.kind(), id, e.to_string());
        }
    }
}

impl Listener for ExpressionListener {
    fn enter_component(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) -> WalkerAction {
        self.resolve_params(cx, id);
        self.resolve_placement(cx, id);
        self.resolve_properties(cx, id, false);
        self.resolve_properties(cx, id, true);
        WalkerAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceRef;
    use crate::component::{
        ChildDecl, ComponentDef, ComponentKind, ParamDef, PlacementSpec, PropAssignment,
    };
    use crate::expr::{BinaryOp, Expr};
    use crate::messages::{CollectingPrinter, MessageHandler};
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn assign(e: Expr) -> PropAssignment {
        PropAssignment {
            value: PropValue::from_expr(e),
            src: SourceRef::default(),
        }
    }

    fn mul(l: Expr, r: Expr) -> Expr {
        Expr::Binary {
            op: BinaryOp::Mul,
            lhs: Box::new(l),
            rhs: Box::new(r),
        }
    }

    fn run(top: &ComponentDef) -> (InstanceTree, InstanceId, MessageHandler) {
        let mut tree = InstanceTree::new();
        let root = tree.instantiate(
            top,
            "top",
            PlacementSpec::default(),
            &BTreeMap::new(),
            None,
            SourceRef::default(),
        );
        let rules = PropertyRuleBook::new();
        let mut msg = MessageHandler::new(Box::new(CollectingPrinter::new()));
        {
            let mut cx = WalkContext::new(&mut tree, &rules, &mut msg);
            resolve_expressions(&mut cx, root);
        }
        (tree, root, msg)
    }

    /// reg #(W = 8) { regwidth = W * 4; }  inside addrmap #(N = 2) with
    /// the register instantiated as `r[N] #(.W(N * 8))`
    fn parameterized() -> ComponentDef {
        let reg = Rc::new(ComponentDef {
            kind: ComponentKind::Reg,
            type_name: Some("r_t".into()),
            params: vec![ParamDef {
                name: "W".into(),
                default: Some(Expr::int(8)),
            }],
            properties: BTreeMap::from([(
                "regwidth".to_owned(),
                assign(mul(Expr::Param("W".into()), Expr::int(4))),
            )]),
            default_props: BTreeMap::new(),
            children: vec![],
            src: SourceRef::default(),
        });
        ComponentDef {
            kind: ComponentKind::Addrmap,
            type_name: Some("top_t".into()),
            params: vec![ParamDef {
                name: "N".into(),
                default: Some(Expr::int(2)),
            }],
            properties: BTreeMap::new(),
            default_props: BTreeMap::new(),
            children: vec![ChildDecl {
                name: "r".into(),
                def: reg,
                spec: PlacementSpec {
                    dims: vec![Expr::Param("N".into())],
                    ..Default::default()
                },
                param_overrides: BTreeMap::from([(
                    "W".to_owned(),
                    mul(Expr::Param("N".into()), Expr::int(8)),
                )]),
                src: SourceRef::default(),
            }],
            src: SourceRef::default(),
        }
    }

    #[test]
    fn overrides_are_evaluated_in_the_parent_scope() {
        let (tree, root, msg) = run(&parameterized());
        assert_eq!(msg.error_count(), 0);
        let r = tree.child_by_name(root, "r").unwrap();
        assert_eq!(tree.get(r).param("W").unwrap().value, Some(Value::Int(16)));
        assert_eq!(tree.get(r).dims(), Some(vec![2]));
        assert_eq!(tree.get(r).assigned("regwidth"), Some(&Value::Int(64)));
        assert!(tree.pending_values().is_empty());
    }

    #[test]
    fn unbound_parameter_is_unresolvable() {
        let mut top = parameterized();
        top.params[0].default = None;
        let (_, _, msg) = run(&top);
        assert!(msg.error_count() > 0);
        assert!(msg
            .diagnostics()
            .iter()
            .all(|d| d.kind == Some(ErrorKind::UnresolvableExpression)));
    }

    #[test]
    fn property_reference_reads_resolved_and_default_values() {
        // r2.regwidth = r1->regwidth; r1 has no explicit regwidth
        let reg = |props: BTreeMap<String, PropAssignment>| {
            Rc::new(ComponentDef {
                kind: ComponentKind::Reg,
                type_name: None,
                params: vec![],
                properties: props,
                default_props: BTreeMap::new(),
                children: vec![],
                src: SourceRef::default(),
            })
        };
        let child = |name: &str, def| ChildDecl {
            name: name.into(),
            def,
            spec: PlacementSpec::default(),
            param_overrides: BTreeMap::new(),
            src: SourceRef::default(),
        };
        let r2_props = BTreeMap::from([(
            "regwidth".to_owned(),
            assign(Expr::PropRef {
                path: vec!["r1".into()],
                prop: "regwidth".into(),
            }),
        )]);
        let top = ComponentDef {
            kind: ComponentKind::Addrmap,
            type_name: None,
            params: vec![],
            properties: BTreeMap::new(),
            default_props: BTreeMap::new(),
            children: vec![child("r1", reg(BTreeMap::new())), child("r2", reg(r2_props))],
            src: SourceRef::default(),
        };
        let (tree, root, msg) = run(&top);
        assert_eq!(msg.error_count(), 0);
        let r2 = tree.child_by_name(root, "r2").unwrap();
        assert_eq!(tree.get(r2).assigned("regwidth"), Some(&Value::Int(32)));
    }

    #[test]
    fn forward_reference_to_pending_property_fails() {
        // r1.regwidth = r2->regwidth where r2's own value is still deferred
        let pending_ref = |target: &str| {
            BTreeMap::from([(
                "regwidth".to_owned(),
                assign(Expr::PropRef {
                    path: vec![target.into()],
                    prop: "regwidth".into(),
                }),
            )])
        };
        let reg = |props| {
            Rc::new(ComponentDef {
                kind: ComponentKind::Reg,
                type_name: None,
                params: vec![],
                properties: props,
                default_props: BTreeMap::new(),
                children: vec![],
                src: SourceRef::default(),
            })
        };
        let child = |name: &str, def| ChildDecl {
            name: name.into(),
            def,
            spec: PlacementSpec::default(),
            param_overrides: BTreeMap::new(),
            src: SourceRef::default(),
        };
        let top = ComponentDef {
            kind: ComponentKind::Addrmap,
            type_name: None,
            params: vec![],
            properties: BTreeMap::new(),
            default_props: BTreeMap::new(),
            children: vec![
                child("r1", reg(pending_ref("r2"))),
                child("r2", reg(pending_ref("r1"))),
            ],
            src: SourceRef::default(),
        };
        let (_, _, msg) = run(&top);
        let first = &msg.diagnostics()[0];
        assert_eq!(first.kind, Some(ErrorKind::UnresolvableExpression));
        assert!(first.message.contains("forward reference"));
    }

    #[test]
    fn resolved_values_are_type_checked() {
        let mut top = parameterized();
        let reg = Rc::make_mut(&mut top.children[0].def);
        reg.properties.insert(
            "desc".into(),
            assign(Expr::Param("W".into())),
        );
        let (_, _, msg) = run(&top);
        assert_eq!(
            msg.diagnostics()[0].kind,
            Some(ErrorKind::PropertyTypeMismatch)
        );
    }
}
