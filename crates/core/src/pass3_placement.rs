//! Pass 3: Placement.
//!
//! Two walks. The first runs [`PrePlacementValidateListener`] and
//! [`StructuralPlacementListener`] in lock-step: validation happens on
//! enter, while sizes roll up on exit (post-order), so a container is laid
//! out only after all of its children know their own size. The second walk
//! ([`AbsoluteAddressListener`]) is pre-order and turns relative offsets into
//! absolute addresses.

use std::collections::BTreeSet;

use log::debug;

use crate::component::{BitSpec, ComponentKind, PropValue};
use crate::error::ErrorKind;
use crate::instance::{InstanceId, InstanceTree};
use crate::properties::PropertyRuleBook;
use crate::walker::{Listener, WalkContext, Walker, WalkerAction};

pub fn place(cx: &mut WalkContext<'_>, root: InstanceId) {
    let mut validate = PrePlacementValidateListener;
    let mut structural = StructuralPlacementListener;
    Walker::elaboration().walk(cx, root, &mut [&mut validate, &mut structural]);
}

/// Must run after [`place`] finished without errors.
pub fn assign_absolute_addresses(cx: &mut WalkContext<'_>, root: InstanceId) {
    Walker::elaboration().walk(cx, root, &mut [&mut AbsoluteAddressListener]);
}

fn int_of(v: &PropValue) -> Option<u64> {
    v.resolved().and_then(|v| v.as_int())
}

fn is_pow2_at_least_8(v: u64) -> bool {
    v >= 8 && v.is_power_of_two()
}

fn round_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align).saturating_mul(align)
}

fn next_pow2(v: u64) -> u64 {
    v.max(1).checked_next_power_of_two().unwrap_or(v)
}

// ──────────────────────────────────────────────
// Pre-placement validation
// ──────────────────────────────────────────────

pub struct PrePlacementValidateListener;

impl PrePlacementValidateListener {
    fn check_dims(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let inst = cx.tree.get(id);
        if !inst.is_array() {
            return;
        }
        if inst.kind == ComponentKind::Field {
            cx.error(ErrorKind::InvalidArray, id, "fields cannot be arrays");
            return;
        }
        let bad = inst.spec.dims.iter().any(|d| !matches!(int_of(d), Some(n) if n > 0));
        if bad {
            cx.error(
                ErrorKind::InvalidArray,
                id,
                "array dimensions must be positive integers",
            );
        } else if inst.checked_element_count().is_none() {
            cx.error(
                ErrorKind::InvalidArray,
                id,
                "array has more elements than can be addressed",
            );
        }
    }

    fn check_containment(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let mut problems = Vec::new();
        {
            let tree: &InstanceTree = cx.tree;
            let inst = tree.get(id);
            let kind = inst.kind;
            if let Some(parent) = inst.parent {
                let parent_kind = tree.get(parent).kind;
                if !parent_kind.may_contain(kind) {
                    problems.push(format!(
                        "a {} cannot be instantiated inside a {}",
                        kind, parent_kind
                    ));
                }
            }

            let empty = match kind {
                ComponentKind::Reg => !inst
                    .children
                    .iter()
                    .any(|c| tree.get(*c).kind == ComponentKind::Field),
                ComponentKind::Regfile | ComponentKind::Addrmap => inst.children.is_empty(),
                ComponentKind::Field | ComponentKind::Mem | ComponentKind::Signal => false,
            };
            if empty {
                let what = if kind == ComponentKind::Reg { "field" } else { "child" };
                problems.push(format!("{} must contain at least one {}", kind, what));
            }

            if let Some(ty) = &inst.type_name {
                let recursive = tree.ancestors(id).any(|a| {
                    let anc = tree.get(a);
                    anc.kind == kind && anc.type_name.as_deref() == Some(ty.as_str())
                });
                if recursive {
                    problems.push(format!("'{}' is instantiated inside itself", ty));
                }
            }
        }
        for message in problems {
            cx.error(ErrorKind::InvalidComponent, id, message);
        }
    }

    fn check_sibling_names(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let mut seen = BTreeSet::new();
        let duplicates: Vec<InstanceId> = cx
            .tree
            .get(id)
            .children
            .iter()
            .copied()
            .filter(|c| !seen.insert(cx.tree.get(*c).name.clone()))
            .collect();
        for dup in duplicates {
            let name = cx.tree.get(dup).name.clone();
            cx.error(
                ErrorKind::NameConflict,
                dup,
                format!("another instance named '{}' already exists in this scope", name),
            );
        }
    }

    fn check_properties(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let kind = cx.tree.get(id).kind;
        let missing: Vec<&str> = cx
            .rules
            .mandatory_for(kind)
            .filter(|r| cx.rules.effective(cx.tree, id, r.name).is_none())
            .map(|r| r.name)
            .collect();
        for name in missing {
            cx.error(
                ErrorKind::PropertyNotSet,
                id,
                format!("mandatory property '{}' is not set", name),
            );
        }

        let widths: &[&str] = match kind {
            ComponentKind::Reg => &["regwidth", "accesswidth"],
            ComponentKind::Mem => &["memwidth"],
            _ => &[],
        };
        for name in widths {
            if let Some(w) = cx.rules.effective_int(cx.tree, id, name) {
                if !is_pow2_at_least_8(w) {
                    cx.error(
                        ErrorKind::InvalidValue,
                        id,
                        format!("{} must be a power of two >= 8, got {}", name, w),
                    );
                }
            }
        }
        if let Some(align) = cx.rules.effective_int(cx.tree, id, "alignment") {
            if !align.is_power_of_two() {
                cx.error(
                    ErrorKind::Misaligned,
                    id,
                    format!("alignment {} is not a power of two", align),
                );
            }
        }
        if kind == ComponentKind::Reg {
            let rw = cx.rules.effective_int(cx.tree, id, "regwidth");
            let aw = cx.rules.effective_int(cx.tree, id, "accesswidth");
            if let (Some(rw), Some(aw)) = (rw, aw) {
                if aw > rw {
                    cx.error(
                        ErrorKind::InvalidValue,
                        id,
                        format!("accesswidth ({}) exceeds regwidth ({})", aw, rw),
                    );
                }
            }
        }
    }

    fn check_placement(&self, cx: &mut WalkContext<'_>, id: InstanceId) {
        let inst = cx.tree.get(id);
        let is_field = inst.kind == ComponentKind::Field;
        let spec = inst.spec.clone();
        let is_array = inst.is_array();

        let non_int = spec
            .addr
            .iter()
            .chain(spec.stride.iter())
            .chain(spec.align.iter())
            .any(|v| int_of(v).is_none());
        if non_int {
            cx.error(
                ErrorKind::InvalidValue,
                id,
                "placement expressions must evaluate to integers",
            );
            return;
        }

        if spec.stride.is_some() && !is_array {
            cx.error(
                ErrorKind::InvalidStride,
                id,
                "an address stride is only allowed on arrays",
            );
        }
        if let Some(align) = spec.align.as_ref().and_then(int_of) {
            if is_field {
                cx.error(ErrorKind::InvalidValue, id, "fields cannot be aligned with '%='");
            } else if !align.is_power_of_two() {
                cx.error(
                    ErrorKind::Misaligned,
                    id,
                    format!("alignment {} is not a power of two", align),
                );
            }
        }

        match spec.bits {
            Some(_) if !is_field => cx.error(
                ErrorKind::InvalidValue,
                id,
                "bit ranges are only allowed on fields",
            ),
            Some(BitSpec::Range { msb, lsb }) => match (int_of(&msb), int_of(&lsb)) {
                (Some(m), Some(l)) if m >= l => {}
                (Some(m), Some(l)) => cx.error(
                    ErrorKind::InvalidValue,
                    id,
                    format!("bit range [{}:{}] has msb below lsb", m, l),
                ),
                _ => cx.error(ErrorKind::InvalidValue, id, "bit range must be integers"),
            },
            Some(BitSpec::Width(w)) => {
                if !matches!(int_of(&w), Some(n) if n > 0) {
                    cx.error(ErrorKind::InvalidValue, id, "field width must be a positive integer");
                }
            }
            None => {}
        }
    }
}

impl Listener for PrePlacementValidateListener {
    fn enter_component(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) -> WalkerAction {
        self.check_dims(cx, id);
        self.check_containment(cx, id);
        self.check_sibling_names(cx, id);
        self.check_properties(cx, id);
        self.check_placement(cx, id);
        WalkerAction::Continue
    }
}

// ──────────────────────────────────────────────
// Structural placement
// ──────────────────────────────────────────────

pub struct StructuralPlacementListener;

/// Nearest enclosing addrmap, `id` itself included.
fn enclosing_addrmap(tree: &InstanceTree, id: InstanceId) -> Option<InstanceId> {
    std::iter::once(id)
        .chain(tree.ancestors(id))
        .find(|a| tree.get(*a).kind == ComponentKind::Addrmap)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Addressing {
    Compact,
    RegAlign,
    FullAlign,
}

fn addressing_mode(tree: &InstanceTree, rules: &PropertyRuleBook, id: InstanceId) -> Addressing {
    let mode = enclosing_addrmap(tree, id).and_then(|m| rules.effective(tree, m, "addressing"));
    match mode.as_ref().and_then(|v| v.as_str()) {
        Some("compact") => Addressing::Compact,
        Some("fullalign") => Addressing::FullAlign,
        _ => Addressing::RegAlign,
    }
}

impl StructuralPlacementListener {
    fn place_fields(&self, cx: &mut WalkContext<'_>, reg: InstanceId) {
        let regwidth = cx.rules.effective_int(cx.tree, reg, "regwidth").unwrap_or(32);
        let accesswidth = cx
            .rules
            .effective_int(cx.tree, reg, "accesswidth")
            .unwrap_or(regwidth);
        let msb0 = enclosing_addrmap(cx.tree, reg)
            .is_some_and(|m| cx.rules.effective_bool(cx.tree, m, "msb0"));

        let fields: Vec<InstanceId> = cx
            .tree
            .get(reg)
            .children
            .iter()
            .copied()
            .filter(|c| cx.tree.get(*c).kind == ComponentKind::Field)
            .collect();

        let mut claimed: Vec<(u64, u64, InstanceId)> = Vec::new();
        // lsb0: next free bit going up; msb0: next free bit going down
        let mut cursor: Option<u64> = Some(if msb0 { regwidth.saturating_sub(1) } else { 0 });

        for field in fields {
            let spec = cx.tree.get(field).spec.clone();
            let width = match &spec.bits {
                Some(BitSpec::Range { msb, lsb }) => match (int_of(msb), int_of(lsb)) {
                    (Some(m), Some(l)) if m >= l => match (m - l).checked_add(1) {
                        Some(w) => w,
                        None => {
                            cx.error(
                                ErrorKind::OutOfBounds,
                                field,
                                format!("bits [{}:{}] exceed the {}-bit register", m, l, regwidth),
                            );
                            continue;
                        }
                    },
                    _ => 1,
                },
                Some(BitSpec::Width(w)) => int_of(w).filter(|w| *w > 0).unwrap_or(1),
                None => cx
                    .rules
                    .effective_int(cx.tree, field, "fieldwidth")
                    .filter(|w| *w > 0)
                    .unwrap_or(1),
            };

            let explicit = match (&spec.bits, spec.addr.as_ref().and_then(int_of)) {
                (Some(BitSpec::Range { msb, lsb }), _) => int_of(lsb).zip(int_of(msb)),
                (_, Some(lsb)) => Some((lsb, lsb.saturating_add(width - 1))),
                _ => None,
            };

            let range = match explicit {
                Some((lsb, msb)) => {
                    if let Some((l, m, other)) = claimed
                        .iter()
                        .copied()
                        .find(|(l, m, _)| lsb <= *m && *l <= msb)
                    {
                        let other_name = cx.tree.get(other).name.clone();
                        cx.error(
                            ErrorKind::FieldOverlap,
                            field,
                            format!(
                                "bits [{}:{}] overlap field '{}' at [{}:{}]",
                                msb, lsb, other_name, m, l
                            ),
                        );
                    }
                    Some((lsb, msb))
                }
                None => pack(cursor, width, msb0, &claimed),
            };

            let Some((lsb, msb)) = range else {
                cx.error(
                    ErrorKind::OutOfBounds,
                    field,
                    format!("no room left in the {}-bit register", regwidth),
                );
                continue;
            };
            if msb >= regwidth {
                cx.error(
                    ErrorKind::OutOfBounds,
                    field,
                    format!(
                        "bits [{}:{}] exceed the {}-bit register",
                        msb, lsb, regwidth
                    ),
                );
            }
            debug!("{}: bits [{}:{}]", cx.tree.path(field), msb, lsb);
            let placement = &mut cx.tree.get_mut(field).placement;
            placement.lsb = Some(lsb);
            placement.msb = Some(msb);
            claimed.push((lsb, msb, field));
            cursor = if msb0 { lsb.checked_sub(1) } else { msb.checked_add(1) };
        }

        let placement = &mut cx.tree.get_mut(reg).placement;
        placement.size = regwidth / 8;
        placement.alignment = (accesswidth / 8).max(1);
        debug!(
            "{}: register of {} bytes",
            cx.tree.path(reg),
            regwidth / 8
        );
    }

    fn place_children(&self, cx: &mut WalkContext<'_>, container: InstanceId) {
        let kind = cx.tree.get(container).kind;
        let mode = addressing_mode(cx.tree, cx.rules, container);
        let parent_alignment = cx.rules.effective_int(cx.tree, container, "alignment");
        let children: Vec<InstanceId> = cx
            .tree
            .get(container)
            .children
            .iter()
            .copied()
            .filter(|c| cx.tree.get(*c).kind.is_addressable())
            .collect();

        let mut cursor = 0u64;
        let mut max_end = 0u64;
        let mut max_align = 1u64;
        let mut placed: Vec<(u64, u64, InstanceId)> = Vec::new();

        for child in children {
            let inst = cx.tree.get(child);
            let elem_size = inst.placement.size;
            let natural = inst.placement.alignment.max(1);
            let is_reg = inst.kind == ComponentKind::Reg;
            let count = inst.element_count();
            let is_array = inst.is_array();
            let explicit_addr = inst.spec.addr.as_ref().and_then(int_of);
            let explicit_stride = inst.spec.stride.as_ref().and_then(int_of);
            let explicit_align = inst.spec.align.as_ref().and_then(int_of);

            let stride = match explicit_stride {
                Some(s) if s < elem_size => {
                    cx.error(
                        ErrorKind::InvalidStride,
                        child,
                        format!("stride {} is smaller than the element size {}", s, elem_size),
                    );
                    elem_size
                }
                Some(s) => s,
                None => elem_size,
            };
            let total = if is_array {
                stride.saturating_mul(count)
            } else {
                elem_size
            };

            let align = explicit_align
                .filter(|a| a.is_power_of_two())
                .or(parent_alignment)
                .unwrap_or(match mode {
                    Addressing::Compact => natural,
                    Addressing::RegAlign if is_reg => next_pow2(elem_size),
                    Addressing::RegAlign => natural,
                    Addressing::FullAlign => next_pow2(total),
                })
                .max(1);

            let addr = match explicit_addr {
                Some(a) => {
                    if a % align != 0 {
                        cx.error(
                            ErrorKind::Misaligned,
                            child,
                            format!("address {:#x} is not a multiple of {:#x}", a, align),
                        );
                    }
                    a
                }
                None => round_up(cursor, align),
            };
            let end = addr.saturating_add(total);

            if let Some((a, e, other)) = placed
                .iter()
                .copied()
                .find(|(a, e, _)| addr < *e && *a < end && total > 0)
            {
                let other_name = cx.tree.get(other).name.clone();
                cx.error(
                    ErrorKind::AddressOverlap,
                    child,
                    format!(
                        "range [{:#x}, {:#x}) overlaps '{}' at [{:#x}, {:#x})",
                        addr, end, other_name, a, e
                    ),
                );
            }

            debug!(
                "{}: offset {:#x}, {} bytes (align {:#x})",
                cx.tree.path(child),
                addr,
                total,
                align
            );
            let placement = &mut cx.tree.get_mut(child).placement;
            placement.address_offset = Some(addr);
            if is_array {
                placement.stride = Some(stride);
            }
            placed.push((addr, end, child));
            cursor = end;
            max_end = max_end.max(end);
            max_align = max_align.max(align);
        }

        let own_alignment = parent_alignment.unwrap_or(max_align).max(1);
        let size = if kind == ComponentKind::Mem {
            let entries = cx.rules.effective_int(cx.tree, container, "mementries").unwrap_or(0);
            let width = cx.rules.effective_int(cx.tree, container, "memwidth").unwrap_or(32);
            let size = entries.saturating_mul(width) / 8;
            for (_, end, child) in &placed {
                if *end > size {
                    cx.error(
                        ErrorKind::OutOfBounds,
                        *child,
                        format!("extends past the end of the {}-byte memory", size),
                    );
                }
            }
            size
        } else {
            round_up(max_end, own_alignment)
        };

        debug!("{}: {} bytes", cx.tree.path(container), size);
        let placement = &mut cx.tree.get_mut(container).placement;
        placement.size = size;
        placement.alignment = own_alignment;
    }
}

/// Sequentially pack a field of `width` bits, skipping claimed ranges.
fn pack(
    cursor: Option<u64>,
    width: u64,
    msb0: bool,
    claimed: &[(u64, u64, InstanceId)],
) -> Option<(u64, u64)> {
    let mut cursor = cursor?;
    loop {
        let (lsb, msb) = if msb0 {
            (cursor.checked_sub(width - 1)?, cursor)
        } else {
            (cursor, cursor.checked_add(width - 1)?)
        };
        match claimed.iter().find(|(l, m, _)| lsb <= *m && *l <= msb) {
            None => return Some((lsb, msb)),
            Some((l, m, _)) => {
                cursor = if msb0 { l.checked_sub(1)? } else { m.checked_add(1)? };
            }
        }
    }
}

impl Listener for StructuralPlacementListener {
    fn exit_reg(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        self.place_fields(cx, id);
    }

    fn exit_regfile(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        self.place_children(cx, id);
    }

    fn exit_addrmap(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        self.place_children(cx, id);
    }

    fn exit_mem(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) {
        self.place_children(cx, id);
    }
}

// ──────────────────────────────────────────────
// Absolute addresses
// ──────────────────────────────────────────────

pub struct AbsoluteAddressListener;

impl Listener for AbsoluteAddressListener {
    fn enter_component(&mut self, cx: &mut WalkContext<'_>, id: InstanceId) -> WalkerAction {
        let inst = cx.tree.get(id);
        if !inst.kind.is_addressable() {
            return WalkerAction::Continue;
        }
        let parent = inst.parent;
        let offset = inst.placement.address_offset;
        let absolute = match parent {
            None => Some(0),
            Some(p) => cx
                .tree
                .get(p)
                .placement
                .absolute_address
                .zip(offset)
                .map(|(base, off)| base.saturating_add(off)),
        };
        let placement = &mut cx.tree.get_mut(id).placement;
        if parent.is_none() {
            placement.address_offset = Some(0);
        }
        placement.absolute_address = absolute;
        WalkerAction::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two throwaway ids to tag claimed ranges with.
    fn ids() -> (InstanceId, InstanceId) {
        let def = crate::component::ComponentDef {
            kind: ComponentKind::Field,
            type_name: None,
            params: vec![],
            properties: Default::default(),
            default_props: Default::default(),
            children: vec![],
            src: Default::default(),
        };
        let mut tree = InstanceTree::new();
        let mut add = || {
            tree.instantiate(&def, "f", Default::default(), &Default::default(), None, Default::default())
        };
        (add(), add())
    }

    #[test]
    fn lsb0_packing_skips_claimed_bits() {
        let (a, b) = ids();
        let claimed = [(0, 3, a), (4, 7, b)];
        assert_eq!(pack(Some(0), 4, false, &claimed), Some((8, 11)));
        assert_eq!(pack(Some(0), 1, false, &[]), Some((0, 0)));
    }

    #[test]
    fn msb0_packing_grows_downward() {
        assert_eq!(pack(Some(31), 8, true, &[]), Some((24, 31)));
        let (a, _) = ids();
        let claimed = [(24, 31, a)];
        assert_eq!(pack(Some(31), 4, true, &claimed), Some((20, 23)));
        // no room below bit 0
        assert_eq!(pack(Some(2), 4, true, &[]), None);
        assert_eq!(pack(None, 1, true, &[]), None);
    }

    #[test]
    fn alignment_helpers() {
        assert_eq!(round_up(5, 4), 8);
        assert_eq!(round_up(8, 4), 8);
        assert_eq!(round_up(7, 1), 7);
        assert_eq!(next_pow2(12), 16);
        assert_eq!(next_pow2(0), 1);
        assert!(is_pow2_at_least_8(32));
        assert!(!is_pow2_at_least_8(4));
        assert!(!is_pow2_at_least_8(24));
    }
}
