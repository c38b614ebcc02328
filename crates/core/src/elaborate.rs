//! Elaboration pipeline: definition -> placed, validated instance tree.
//!
//! This is a thin orchestrator that runs each pass module in order. Every
//! pass records its problems on the message handler and keeps going; the
//! phase boundary after it is a hard stop if anything went wrong.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use log::info;

use crate::component::{ComponentDef, EnumDef, PlacementSpec};
use crate::error::CompileError;
use crate::instance::InstanceTree;
use crate::messages::MessageHandler;
use crate::node::Design;
use crate::pass2_expressions;
use crate::pass3_placement;
use crate::pass4_validate;
use crate::properties::PropertyRuleBook;
use crate::walker::WalkContext;

/// Deep-copy `top` into a fresh instance tree named `inst_name` and run
/// the elaboration passes over it.
pub fn elaborate(
    top: &ComponentDef,
    inst_name: &str,
    rules: Arc<PropertyRuleBook>,
    enums: Vec<Rc<EnumDef>>,
    msg: &mut MessageHandler,
) -> Result<Design, CompileError> {
    let mut tree = InstanceTree::new();
    let root = tree.instantiate(
        top,
        inst_name,
        PlacementSpec::default(),
        &BTreeMap::new(),
        None,
        top.src.clone(),
    );
    info!(
        "elaborating {} as '{}' ({} instances)",
        top.display_name(),
        inst_name,
        tree.len()
    );

    {
        let mut cx = WalkContext::new(&mut tree, &rules, msg);

        // Pass 2: expression resolution
        cx.msg.begin_phase();
        pass2_expressions::resolve_expressions(&mut cx, root);
        cx.msg
            .end_phase("Elaborate aborted due to unresolved expressions")?;
        info!("expressions resolved");

        // Pass 3: pre-placement validation + structural placement, then
        // absolute addresses once every relative offset is known
        cx.msg.begin_phase();
        pass3_placement::place(&mut cx, root);
        cx.msg.end_phase("Elaborate aborted due to placement errors")?;
        pass3_placement::assign_absolute_addresses(&mut cx, root);
        info!("placement complete");

        // Pass 4: final validation
        cx.msg.begin_phase();
        pass4_validate::validate(&mut cx, root, enums);
        cx.msg.end_phase("Elaborate aborted due to previous errors")?;
        info!("validation complete");
    }

    Ok(Design::new(tree, rules, root))
}
