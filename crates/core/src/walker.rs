//! Generic walker: ordered-listener traversal of an instance tree.
//!
//! Every listener sees a node before the walker descends into its children
//! (lock-step), so a later listener can rely on an earlier one having
//! already processed the same node.

use crate::component::ComponentKind;
use crate::error::ErrorKind;
use crate::instance::{InstanceId, InstanceTree};
use crate::messages::MessageHandler;
use crate::properties::PropertyRuleBook;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerAction {
    Continue,
    SkipDescendants,
}

/// State shared by all listeners during one walk.
pub struct WalkContext<'a> {
    pub tree: &'a mut InstanceTree,
    pub rules: &'a PropertyRuleBook,
    pub msg: &'a mut MessageHandler,
    /// Element index of every array on the current path, outermost first.
    /// Only populated when the walker unrolls arrays.
    pub index: Vec<Vec<u64>>,
}

impl<'a> WalkContext<'a> {
    pub fn new(
        tree: &'a mut InstanceTree,
        rules: &'a PropertyRuleBook,
        msg: &'a mut MessageHandler,
    ) -> Self {
        WalkContext {
            tree,
            rules,
            msg,
            index: Vec::new(),
        }
    }

    /// Record an error located at `id`.
    pub fn error(&mut self, kind: ErrorKind, id: InstanceId, message: impl Into<String>) {
        let path = self.tree.path(id);
        let src = self.tree.get(id).src.clone();
        self.msg.error(kind, message, Some(&src), Some(&path));
    }

    pub fn warning(&mut self, id: InstanceId, message: impl Into<String>) {
        let path = self.tree.path(id);
        let src = self.tree.get(id).src.clone();
        self.msg.warning(message, Some(&src), Some(&path));
    }
}

/// Callbacks invoked by [`Walker::walk`]. Every hook defaults to a no-op.
#[allow(unused_variables)]
pub trait Listener {
    fn enter_component(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) -> WalkerAction {
        WalkerAction::Continue
    }
    fn exit_component(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}

    fn enter_field(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn exit_field(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn enter_reg(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn exit_reg(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn enter_regfile(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn exit_regfile(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn enter_addrmap(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn exit_addrmap(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn enter_mem(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn exit_mem(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn enter_signal(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
    fn exit_signal(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {}
}

#[derive(Debug, Clone, Copy)]
pub struct Walker {
    /// Do not visit instances whose `ispresent` is false, nor their subtrees.
    pub skip_not_present: bool,
    /// Visit every element of an array instead of the array once.
    pub unroll: bool,
}

impl Default for Walker {
    fn default() -> Self {
        Walker {
            skip_not_present: true,
            unroll: true,
        }
    }
}

impl Walker {
    /// Walker used by elaboration: sees every instance, arrays once.
    pub fn elaboration() -> Self {
        Walker {
            skip_not_present: false,
            unroll: false,
        }
    }

    pub fn walk(
        &self,
        cx: &mut WalkContext<'_>,
        root: InstanceId,
        listeners: &mut [&mut dyn Listener],
    ) {
        self.visit(cx, root, listeners);
    }

    fn visit(&self, cx: &mut WalkContext<'_>, id: InstanceId, listeners: &mut [&mut dyn Listener]) {
        if self.skip_not_present && !is_present(cx, id) {
            return;
        }
        let elements = if self.unroll { element_indices(cx.tree, id) } else { None };
        match elements {
            Some(indices) => {
                for index in indices {
                    cx.index.push(index);
                    self.visit_one(cx, id, listeners);
                    cx.index.pop();
                }
            }
            None => self.visit_one(cx, id, listeners),
        }
    }

    fn visit_one(
        &self,
        cx: &mut WalkContext<'_>,
        id: InstanceId,
        listeners: &mut [&mut dyn Listener],
    ) {
        let kind = cx.tree.get(id).kind;
        let mut action = WalkerAction::Continue;
        for listener in listeners.iter_mut() {
            if listener.enter_component(cx, id) == WalkerAction::SkipDescendants {
                action = WalkerAction::SkipDescendants;
            }
            dispatch_enter(&mut **listener, kind, cx, id);
        }

        if action == WalkerAction::Continue {
            // listeners may not add or remove children, so the list is stable
            let children = cx.tree.get(id).children.clone();
            for child in children {
                self.visit(cx, child, listeners);
            }
        }

        for listener in listeners.iter_mut() {
            dispatch_exit(&mut **listener, kind, cx, id);
            listener.exit_component(cx, id);
        }
    }
}

fn dispatch_enter(l: &mut dyn Listener, kind: ComponentKind, cx: &mut WalkContext<'_>, id: InstanceId) {
    match kind {
        ComponentKind::Field => l.enter_field(cx, id),
        ComponentKind::Reg => l.enter_reg(cx, id),
        ComponentKind::Regfile => l.enter_regfile(cx, id),
        ComponentKind::Addrmap => l.enter_addrmap(cx, id),
        ComponentKind::Mem => l.enter_mem(cx, id),
        ComponentKind::Signal => l.enter_signal(cx, id),
    }
}

fn dispatch_exit(l: &mut dyn Listener, kind: ComponentKind, cx: &mut WalkContext<'_>, id: InstanceId) {
    match kind {
        ComponentKind::Field => l.exit_field(cx, id),
        ComponentKind::Reg => l.exit_reg(cx, id),
        ComponentKind::Regfile => l.exit_regfile(cx, id),
        ComponentKind::Addrmap => l.exit_addrmap(cx, id),
        ComponentKind::Mem => l.exit_mem(cx, id),
        ComponentKind::Signal => l.exit_signal(cx, id),
    }
}

fn is_present(cx: &WalkContext<'_>, id: InstanceId) -> bool {
    cx.rules.effective_bool(cx.tree, id, "ispresent")
}

/// Row-major element indices of an array instance, `None` for scalars.
pub(crate) fn element_indices(tree: &InstanceTree, id: InstanceId) -> Option<Vec<Vec<u64>>> {
    let dims = tree.get(id).dims()?;
    if dims.is_empty() {
        return None;
    }
    let mut out: Vec<Vec<u64>> = vec![Vec::new()];
    for d in dims {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..d).map(move |i| {
                    let mut next = prefix.clone();
                    next.push(i);
                    next
                })
            })
            .collect();
    }
    Some(out)
}
