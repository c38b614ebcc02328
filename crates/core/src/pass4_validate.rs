//! Pass 4: Final validation of the placed design.
//!
//! Read-only checks over every present instance. Nothing here mutates the
//! tree; every problem is recorded and the walk continues.

use std::rc::Rc;

use crate::component::{ComponentKind, EnumDef};
use crate::error::ErrorKind;
use crate::expr::Value;
use crate::instance::InstanceId;
use crate::properties::ValueKind;
use crate::walker::{Listener, WalkContext, Walker, WalkerAction};

const EXCLUSIVE_FLAGS: &[(&str, &str)] = &[
    ("bigendian", "littleendian"),
    ("lsb0", "msb0"),
    ("sync", "async"),
    ("activehigh", "activelow"),
];

pub fn validate(
    cx: &mut WalkContext<'_>,
    root: InstanceId,
    enums: Vec<Rc<EnumDef>>,
) {
    let mut listener = ValidateListener { root, enums };
    let walker = Walker {
        skip_not_present: true,
        unroll: false,
    };
    walker.walk(cx, root, &mut [&mut listener]);
}

pub struct ValidateListener {
    root: InstanceId,
    /// Every enumeration of the session, indexed by its namespace key.
    enums: Vec<Rc<EnumDef>>,
}

impl ValidateListener {
    fn check_exclusive_flags(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        for (a, b) in EXCLUSIVE_FLAGS {
            let both = cx.rules.effective_bool(cx.tree, id, a)
                && cx.rules.effective_bool(cx.tree, id, b);
            if both {
                cx.error(
                    ErrorKind::InvalidValue,
                    id,
                    format!("'{}' and '{}' are mutually exclusive", a, b),
                );
            }
        }
    }

    fn check_references(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let mut problems = Vec::new();
        let mut not_present = Vec::new();
        {
            let inst = cx.tree.get(id);
            for (name, a) in inst.properties.iter().chain(inst.default_props.iter()) {
                let Some(Value::InstRef(path)) = a.value.resolved() else {
                    continue;
                };
                let Ok(rule) = cx.rules.rule_for(inst.kind, name) else {
                    continue;
                };
                let ValueKind::InstRef(allowed) = rule.kind else {
                    continue;
                };
                match cx.tree.find_by_path(self.root, path) {
                    Some(target) if allowed.contains(&cx.tree.get(target).kind) => {
                        if !cx.rules.effective_bool(cx.tree, target, "ispresent") {
                            not_present.push(format!(
                                "property '{}' references '{}', which is not present",
                                name, path
                            ));
                        }
                    }
                    Some(target) => problems.push(format!(
                        "property '{}' cannot reference the {} '{}'",
                        name,
                        cx.tree.get(target).kind,
                        path
                    )),
                    None => problems.push(format!(
                        "property '{}' references unknown instance '{}'",
                        name, path
                    )),
                }
            }
        }
        for message in problems {
            cx.error(ErrorKind::PropertyTypeMismatch, id, message);
        }
        for message in not_present {
            cx.warning(id, message);
        }
    }

    fn check_field(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let placement = &cx.tree.get(id).placement;
        let width = match (placement.msb, placement.lsb) {
            (Some(m), Some(l)) if m >= l => match (m - l).checked_add(1) {
                Some(w) => w,
                None => return,
            },
            _ => return,
        };
        let fits = |v: u64| width >= 64 || v >> width == 0;

        if let Some(reset) = cx.rules.effective_int(cx.tree, id, "reset") {
            if !fits(reset) {
                cx.error(
                    ErrorKind::InvalidValue,
                    id,
                    format!("reset value {:#x} does not fit in {} bits", reset, width),
                );
            }
        }

        let encode = cx.rules.effective(cx.tree, id, "encode");
        if let Some(Value::EnumType { name: ty, id: key }) = encode {
            if let Some(def) = self.enums.get(key) {
                let too_wide: Vec<String> = def
                    .members
                    .iter()
                    .filter(|(_, v)| !fits(*v))
                    .map(|(m, _)| m.clone())
                    .collect();
                for member in too_wide {
                    cx.error(
                        ErrorKind::InvalidValue,
                        id,
                        format!("encoding '{}::{}' does not fit in {} bits", ty, member, width),
                    );
                }
            }
        }

        let access = |name| {
            cx.rules
                .effective(cx.tree, id, name)
                .and_then(|v| v.as_str().map(str::to_owned))
        };
        if access("sw").as_deref() == Some("na") && access("hw").as_deref() == Some("na") {
            cx.error(
                ErrorKind::InvalidValue,
                id,
                "field is not accessible by software or hardware",
            );
        }
    }

    fn check_mem_register(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let Some(parent) = cx.tree.get(id).parent else {
            return;
        };
        if cx.tree.get(parent).kind != ComponentKind::Mem {
            return;
        }
        let regwidth = cx.rules.effective_int(cx.tree, id, "regwidth");
        let memwidth = cx.rules.effective_int(cx.tree, parent, "memwidth");
        if let (Some(r), Some(m)) = (regwidth, memwidth) {
            if r != m {
                cx.error(
                    ErrorKind::InvalidValue,
                    id,
                    format!("register width {} differs from memory width {}", r, m),
                );
            }
        }
    }
}

impl Listener for ValidateListener {
    fn enter_component(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) -> WalkerAction {
        self.check_exclusive_flags(cx, id);
        self.check_references(cx, id);
        WalkerAction::Continue
    }

    fn enter_field(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        self.check_field(cx, id);
    }

    fn enter_reg(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        self.check_mem_register(cx, id);
    }
}
