use std::rc::Rc;

use crate::ir::{import_of, Node, Value};

/// Host runtime primitives, handed to the transpiler and the prefab program
/// builders as an explicit value instead of being reached for ambiently.
///
/// Every capability is a `(module, name)` pair the replaying VM resolves in
/// its own namespace. The defaults target the original host; callers aiming
/// at a differently laid out runtime substitute their own table.
#[derive(Debug, Clone)]
pub struct HostCaps {
    pub builtins_module: String,
    pub operator_module: String,
    pub types_module: String,
    pub sys_module: String,
    pub imp_module: String,
    /// Re-enters the VM on a byte string.
    pub replay: (String, String),
    /// Inflates a compressed byte string.
    pub decompress: (String, String),
}

impl Default for HostCaps {
    fn default() -> Self {
        Self {
            builtins_module: "__builtin__".to_string(),
            operator_module: "operator".to_string(),
            types_module: "types".to_string(),
            sys_module: "sys".to_string(),
            imp_module: "imp".to_string(),
            replay: ("pickle".to_string(), "loads".to_string()),
            decompress: ("zlib".to_string(), "decompress".to_string()),
        }
    }
}

/// Names the transpiler resolves against the host namespace when they were
/// never assigned in the program being compiled.
const BUILTIN_NAMES: &[&str] = &[
    "abs",
    "all",
    "any",
    "bool",
    "chr",
    "compile",
    "delattr",
    "dict",
    "divmod",
    "enumerate",
    "eval",
    "float",
    "frozenset",
    "getattr",
    "globals",
    "hasattr",
    "hash",
    "int",
    "isinstance",
    "issubclass",
    "iter",
    "len",
    "list",
    "locals",
    "map",
    "max",
    "min",
    "next",
    "ord",
    "range",
    "reduce",
    "repr",
    "set",
    "setattr",
    "sorted",
    "str",
    "sum",
    "tuple",
    "type",
    "zip",
];

impl HostCaps {
    pub fn is_builtin_name(&self, name: &str) -> bool {
        BUILTIN_NAMES.contains(&name)
    }

    /// A named object in the host's builtin namespace.
    pub fn builtin(&self, name: &str) -> Rc<Node> {
        import_of(&self.builtins_module, name)
    }

    /// A function from the host's operator module.
    pub fn operator_fn(&self, name: &str) -> Rc<Node> {
        import_of(&self.operator_module, name)
    }

    pub fn replay_capability(&self) -> Rc<Node> {
        import_of(&self.replay.0, &self.replay.1)
    }

    pub fn decompress_capability(&self) -> Rc<Node> {
        import_of(&self.decompress.0, &self.decompress.1)
    }

    /// The global namespace of the replay session, as a dict.
    pub fn globals(&self) -> Rc<Node> {
        Node::call(self.builtin("globals"), vec![])
    }

    /// `__import__(name)` — yields the top-level module object.
    pub fn import_module(&self, name: &str) -> Rc<Node> {
        Node::call(self.builtin("__import__"), vec![Value::from(name)])
    }

    pub fn attr(&self, obj: impl Into<Value>, name: &str) -> Rc<Node> {
        Node::call(self.builtin("getattr"), vec![obj.into(), Value::from(name)])
    }

    pub fn set_attr(&self, obj: impl Into<Value>, name: &str, value: impl Into<Value>) -> Rc<Node> {
        Node::call(
            self.builtin("setattr"),
            vec![obj.into(), Value::from(name), value.into()],
        )
    }

    pub fn del_attr(&self, obj: impl Into<Value>, name: &str) -> Rc<Node> {
        Node::call(self.builtin("delattr"), vec![obj.into(), Value::from(name)])
    }

    pub fn get_item(&self, obj: impl Into<Value>, key: impl Into<Value>) -> Rc<Node> {
        Node::call(self.operator_fn("getitem"), vec![obj.into(), key.into()])
    }

    /// `del obj[key]`, routed through the bound method since the statement
    /// form has no stack result to keep.
    pub fn del_item(&self, obj: impl Into<Value>, key: impl Into<Value>) -> Rc<Node> {
        self.call_method(obj, "__delitem__", vec![key.into()])
    }

    pub fn call_method(&self, obj: impl Into<Value>, name: &str, args: Vec<Value>) -> Rc<Node> {
        Node::call(self.attr(obj, name), args)
    }

    /// `compile(source, filename, mode)` on the host.
    pub fn compile_source(&self, source: &str, filename: &str, mode: &str) -> Rc<Node> {
        Node::call(
            self.builtin("compile"),
            vec![
                Value::from(source),
                Value::from(filename),
                Value::from(mode),
            ],
        )
    }

    /// The host's function type, importable only under its public identity.
    pub fn function_type(&self) -> Rc<Node> {
        import_of(&self.builtins_module, "function")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Node;

    #[test]
    fn builtin_table_covers_the_transpiler_names() {
        let caps = HostCaps::default();
        for name in ["list", "getattr", "int", "bool", "reduce"] {
            assert!(caps.is_builtin_name(name), "{name} must be a builtin");
        }
        assert!(!caps.is_builtin_name("my_local"));
    }

    #[test]
    fn function_type_resolves_via_the_identity_table() {
        let caps = HostCaps::default();
        match &*caps.function_type() {
            Node::Global { module, name, .. } => {
                assert_eq!(module, "types");
                assert_eq!(name, "FunctionType");
            }
            other => panic!("expected a global, got {other:?}"),
        }
    }

    #[test]
    fn get_item_goes_through_the_operator_module() {
        let caps = HostCaps::default();
        match &*caps.get_item(Value::from("container"), Value::Int(0)) {
            Node::Call { callee, args } => {
                assert_eq!(args.len(), 2);
                match callee {
                    Value::Node(node) => match &**node {
                        Node::Global { module, name, .. } => {
                            assert_eq!(module, "operator");
                            assert_eq!(name, "getitem");
                        }
                        other => panic!("expected a global, got {other:?}"),
                    },
                    other => panic!("expected a node callee, got {other:?}"),
                }
            }
            other => panic!("expected a call, got {other:?}"),
        }
    }
}
