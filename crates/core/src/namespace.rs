//! Namespace registry: lexical scopes of type names and the parallel stack
//! of default-property contexts used while building definitions.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use crate::component::{EnumDef, PropAssignment, TypeDef};

/// Lookup or binding failure in the namespace.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NamespaceError {
    #[error("multiple declarations of '{0}' in the same scope")]
    NameConflict(String),
    #[error("'{0}' is not defined")]
    UndefinedName(String),
}

pub struct NamespaceRegistry {
    type_ns_stack: Vec<HashMap<String, TypeDef>>,
    default_property_ns_stack: Vec<BTreeMap<String, PropAssignment>>,
    /// Root-scope names in declaration order.
    root_order: Vec<String>,
    /// Every enumeration bound in any scope; the index is its key.
    enums: Vec<Rc<EnumDef>>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        NamespaceRegistry {
            type_ns_stack: vec![HashMap::new()],
            default_property_ns_stack: vec![BTreeMap::new()],
            root_order: Vec::new(),
            enums: Vec::new(),
        }
    }

    /// Bind `name` in the innermost scope.
    pub fn define(&mut self, name: &str, def: TypeDef) -> Result<(), NamespaceError> {
        let depth = self.type_ns_stack.len() - 1;
        let scope = &mut self.type_ns_stack[depth];
        if scope.contains_key(name) {
            return Err(NamespaceError::NameConflict(name.to_owned()));
        }
        if let TypeDef::Enum(e) = &def {
            self.enums.push(e.clone());
        }
        scope.insert(name.to_owned(), def);
        if depth == 0 {
            self.root_order.push(name.to_owned());
        }
        Ok(())
    }

    /// Search the scope stack from innermost to outermost.
    pub fn lookup(&self, name: &str) -> Result<&TypeDef, NamespaceError> {
        self.type_ns_stack
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .ok_or_else(|| NamespaceError::UndefinedName(name.to_owned()))
    }

    pub fn enter_scope(&mut self) {
        self.type_ns_stack.push(HashMap::new());
        self.default_property_ns_stack.push(BTreeMap::new());
    }

    pub fn exit_scope(&mut self) {
        if self.type_ns_stack.len() > 1 {
            self.type_ns_stack.pop();
        }
        if self.default_property_ns_stack.len() > 1 {
            self.default_property_ns_stack.pop();
        }
    }

    pub fn push_default_property(
        &mut self,
        name: &str,
        value: PropAssignment,
    ) -> Result<(), NamespaceError> {
        let depth = self.default_property_ns_stack.len() - 1;
        let frame = &mut self.default_property_ns_stack[depth];
        if frame.contains_key(name) {
            return Err(NamespaceError::NameConflict(name.to_owned()));
        }
        frame.insert(name.to_owned(), value);
        Ok(())
    }

    /// All default properties visible from the current scope; inner frames
    /// shadow outer ones.
    pub fn default_properties(&self) -> BTreeMap<String, PropAssignment> {
        let mut merged = BTreeMap::new();
        for frame in &self.default_property_ns_stack {
            for (name, value) in frame {
                merged.insert(name.clone(), value.clone());
            }
        }
        merged
    }

    /// Drop every default-property context. Must be called between
    /// independently compiled units.
    pub fn reset_defaults(&mut self) {
        self.default_property_ns_stack = vec![BTreeMap::new()];
    }

    /// Root-scope definitions in the order they were declared.
    pub fn root_definitions(&self) -> impl DoubleEndedIterator<Item = (&str, &TypeDef)> {
        let root = &self.type_ns_stack[0];
        self.root_order
            .iter()
            .filter_map(move |name| root.get(name).map(|def| (name.as_str(), def)))
    }

    pub fn root_lookup(&self, name: &str) -> Option<&TypeDef> {
        self.type_ns_stack[0].get(name)
    }

    /// Key of a bound enumeration, stable for the life of the session.
    pub fn enum_key(&self, def: &Rc<EnumDef>) -> Option<usize> {
        self.enums.iter().position(|e| Rc::ptr_eq(e, def))
    }

    /// Every enumeration defined so far, indexed by [`Self::enum_key`].
    pub fn enums(&self) -> &[Rc<EnumDef>] {
        &self.enums
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceRef;
    use crate::component::{EnumDef, PropValue};
    use crate::expr::Value;
    use std::rc::Rc;

    fn enum_def(name: &str) -> TypeDef {
        TypeDef::Enum(Rc::new(EnumDef {
            name: name.to_owned(),
            members: vec![],
            src: SourceRef::default(),
        }))
    }

    fn assignment(v: u64) -> PropAssignment {
        PropAssignment {
            value: PropValue::Resolved(Value::Int(v)),
            src: SourceRef::default(),
        }
    }

    #[test]
    fn define_twice_in_same_scope_conflicts() {
        let mut ns = NamespaceRegistry::new();
        ns.define("a", enum_def("a")).unwrap();
        assert_eq!(
            ns.define("a", enum_def("a")).unwrap_err(),
            NamespaceError::NameConflict("a".into())
        );
    }

    #[test]
    fn inner_scope_shadows_and_pops() {
        let mut ns = NamespaceRegistry::new();
        ns.define("a", enum_def("outer")).unwrap();
        ns.enter_scope();
        ns.define("a", enum_def("inner")).unwrap();
        let TypeDef::Enum(e) = ns.lookup("a").unwrap() else {
            panic!("expected enum");
        };
        assert_eq!(e.name, "inner");
        ns.exit_scope();
        let TypeDef::Enum(e) = ns.lookup("a").unwrap() else {
            panic!("expected enum");
        };
        assert_eq!(e.name, "outer");
        assert_eq!(
            ns.lookup("b").unwrap_err(),
            NamespaceError::UndefinedName("b".into())
        );
    }

    #[test]
    fn only_root_definitions_are_ordered() {
        let mut ns = NamespaceRegistry::new();
        ns.define("z", enum_def("z")).unwrap();
        ns.enter_scope();
        ns.define("nested", enum_def("nested")).unwrap();
        ns.exit_scope();
        ns.define("a", enum_def("a")).unwrap();
        let names: Vec<&str> = ns.root_definitions().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn default_properties_merge_inner_over_outer_and_reset() {
        let mut ns = NamespaceRegistry::new();
        ns.push_default_property("regwidth", assignment(32)).unwrap();
        ns.push_default_property("reset", assignment(0)).unwrap();
        ns.enter_scope();
        ns.push_default_property("regwidth", assignment(16)).unwrap();
        let merged = ns.default_properties();
        assert_eq!(merged["regwidth"], assignment(16));
        assert_eq!(merged["reset"], assignment(0));
        ns.exit_scope();
        assert_eq!(ns.default_properties()["regwidth"], assignment(32));
        ns.reset_defaults();
        assert!(ns.default_properties().is_empty());
    }

    #[test]
    fn duplicate_default_in_same_frame_conflicts() {
        let mut ns = NamespaceRegistry::new();
        ns.push_default_property("sw", assignment(1)).unwrap();
        assert!(ns.push_default_property("sw", assignment(2)).is_err());
    }

    #[test]
    fn shadowing_enums_get_distinct_keys() {
        let mut ns = NamespaceRegistry::new();
        ns.define("E", enum_def("outer")).unwrap();
        ns.enter_scope();
        ns.define("E", enum_def("inner")).unwrap();
        let TypeDef::Enum(inner) = ns.lookup("E").unwrap().clone() else {
            panic!("expected enum");
        };
        ns.exit_scope();
        let TypeDef::Enum(outer) = ns.lookup("E").unwrap().clone() else {
            panic!("expected enum");
        };
        assert_eq!(ns.enum_key(&outer), Some(0));
        assert_eq!(ns.enum_key(&inner), Some(1));
        assert_eq!(ns.enums()[1].name, "inner");
        // a rejected duplicate is never registered
        assert!(ns.define("E", enum_def("again")).is_err());
        assert_eq!(ns.enums().len(), 2);
    }
}
