//! Compiler session: accumulates definitions from parse units and
//! elaborates a top-level address map on request.

use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::Arc;

use log::info;

use crate::ast::{ParseUnit, SourceRef};
use crate::component::{ComponentDef, ComponentKind, TypeDef};
use crate::elaborate;
use crate::error::{CompileError, Diagnostic, ErrorKind};
use crate::expr::Value;
use crate::messages::{MessageHandler, MessagePrinter};
use crate::namespace::NamespaceRegistry;
use crate::node::Design;
use crate::pass1_construct;
use crate::properties::PropertyRuleBook;

pub struct RdlCompiler {
    namespace: NamespaceRegistry,
    rules: Arc<PropertyRuleBook>,
    msg: MessageHandler,
}

impl Default for RdlCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl RdlCompiler {
    /// Session that prints diagnostics to stderr.
    pub fn new() -> Self {
        RdlCompiler::with_handler(MessageHandler::default())
    }

    pub fn with_printer(printer: Box<dyn MessagePrinter>) -> Self {
        RdlCompiler::with_handler(MessageHandler::new(printer))
    }

    fn with_handler(msg: MessageHandler) -> Self {
        RdlCompiler {
            namespace: NamespaceRegistry::new(),
            rules: Arc::new(PropertyRuleBook::new()),
            msg,
        }
    }

    pub fn namespace(&self) -> &NamespaceRegistry {
        &self.namespace
    }

    pub fn rules(&self) -> &PropertyRuleBook {
        &self.rules
    }

    /// Every diagnostic recorded during this session.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.msg.diagnostics()
    }

    /// Merge the definitions of one unit into the session's root namespace.
    ///
    /// Default properties declared at the root of a unit stop applying at
    /// the end of that unit.
    pub fn compile_unit(&mut self, unit: &ParseUnit) -> Result<(), CompileError> {
        self.msg.begin_phase();
        if !unit.syntax_errors.is_empty() {
            for e in &unit.syntax_errors {
                let src = SourceRef::new(&unit.file, e.line);
                self.msg
                    .error(ErrorKind::SyntaxError, e.message.clone(), Some(&src), None);
            }
            self.msg.end_phase("Parse aborted due to previous errors")?;
        }

        self.namespace.reset_defaults();
        pass1_construct::construct_unit(unit, &mut self.namespace, &self.rules, &mut self.msg);
        self.namespace.reset_defaults();
        self.msg.end_phase("Compile aborted due to previous errors")?;
        info!("compiled {} ({} items)", unit.file, unit.items.len());
        Ok(())
    }

    /// Elaborate `top_def_name`, or the most recently defined addrmap when
    /// `None`. The top instance is named `inst_name`, defaulting to the
    /// definition's type name.
    ///
    /// Every call deep-copies the definition, so repeated elaborations are
    /// independent of each other.
    pub fn elaborate(
        &mut self,
        top_def_name: Option<&str>,
        inst_name: Option<&str>,
        parameters: &BTreeMap<String, Value>,
    ) -> Result<Design, CompileError> {
        self.msg.begin_phase();
        let top = self.select_top(top_def_name)?;

        if !parameters.is_empty() {
            let names: Vec<&str> = parameters.keys().map(String::as_str).collect();
            return Err(self.msg.fatal(
                ErrorKind::NotImplemented,
                format!(
                    "overriding top-level parameters is not supported ({})",
                    names.join(", ")
                ),
                Some(&top.src),
            ));
        }

        let name = inst_name
            .map(str::to_owned)
            .unwrap_or_else(|| top.display_name());
        let enums = self.namespace.enums().to_vec();
        elaborate::elaborate(&top, &name, self.rules.clone(), enums, &mut self.msg)
    }

    fn select_top(&mut self, top_def_name: Option<&str>) -> Result<Rc<ComponentDef>, CompileError> {
        match top_def_name {
            Some(name) => match self.namespace.root_lookup(name) {
                Some(TypeDef::Component(def)) if def.kind == ComponentKind::Addrmap => {
                    Ok(def.clone())
                }
                Some(_) => Err(self.msg.fatal(
                    ErrorKind::NoElaborationTarget,
                    format!("Elaboration target '{}' is not an 'addrmap' component", name),
                    None,
                )),
                None => Err(self.msg.fatal(
                    ErrorKind::NoElaborationTarget,
                    format!("Elaboration target '{}' not found", name),
                    None,
                )),
            },
            None => {
                let last = self.namespace.root_definitions().rev().find_map(|(_, def)| match def {
                    TypeDef::Component(c) if c.kind == ComponentKind::Addrmap => Some(c.clone()),
                    _ => None,
                });
                last.ok_or_else(|| {
                    self.msg.fatal(
                        ErrorKind::NoElaborationTarget,
                        "Could not find any 'addrmap' components to elaborate",
                        None,
                    )
                })
            }
        }
    }
}
