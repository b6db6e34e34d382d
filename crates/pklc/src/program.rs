//! Prefab reconstruction programs built from the core node kinds: global
//! namespace binding, module creation, and host code execution. Everything
//! here goes through an explicit capability table.

use std::rc::Rc;

use crate::caps::HostCaps;
use crate::error::Result;
use crate::ir::{Node, Value};

/// `globals()[name] = value`, yielding `value`. This is how compiled
/// programs interact with host-executed code blocks.
pub fn assign_global(caps: &HostCaps, name: &str, value: impl Into<Value>) -> Rc<Node> {
    caps.get_item(
        Node::set_item(caps.globals(), Value::from(name), value),
        Value::from(name),
    )
}

/// `globals()[name]`.
pub fn load_global(caps: &HostCaps, name: &str) -> Rc<Node> {
    caps.get_item(caps.globals(), Value::from(name))
}

/// The named top-level module, imported on demand.
pub fn get_module(caps: &HostCaps, name: &str) -> Rc<Node> {
    caps.import_module(name)
}

/// Register an empty module under `name` in the host's module table and
/// yield it, so later lookups (and the import machinery) can see it.
pub fn declare_module(caps: &HostCaps, name: &str) -> Rc<Node> {
    let modules = crate::ir::import_of(&caps.sys_module, "modules");
    let fresh = Node::call(
        crate::ir::import_of(&caps.imp_module, "new_module"),
        vec![Value::from(name)],
    );
    caps.get_item(
        Node::set_item(modules, Value::from(name), Value::Node(fresh)),
        Value::from(name),
    )
}

/// Populate a declared module by executing `code` in its namespace.
///
/// The code body is stripped of blank and comment-only lines first; the
/// remaining text rides the stream as a plain string.
pub fn define_module(caps: &HostCaps, name: &str, code: &str) -> Result<Rc<Node>> {
    let code = strip_comment_lines(code);
    let body = "exec _c in _m.__dict__";
    let filename = format!("<{name}>");
    Node::seq_last(vec![
        Value::Node(assign_global(caps, "_c", Value::Str(code))),
        Value::Node(assign_global(
            caps,
            "_m",
            Value::Node(get_module(caps, name)),
        )),
        Value::Node(Node::call(
            Value::Node(Node::call(
                caps.function_type(),
                vec![
                    Value::Node(caps.compile_source(body, &filename, "exec")),
                    Value::Node(caps.globals()),
                    Value::from("exe"),
                ],
            )),
            vec![],
        )),
    ])
}

/// Create, populate, and yield a module in one program.
pub fn module(caps: &HostCaps, name: &str, code: &str) -> Result<Rc<Node>> {
    Node::seq_last(vec![
        Value::Node(declare_module(caps, name)),
        Value::Node(define_module(caps, name, code)?),
        Value::Node(get_module(caps, name)),
    ])
}

/// Execute `code` in the replay session's global namespace, via an
/// anonymous function compiled on the host. Yields the function's result,
/// which is nothing.
pub fn exec_text(caps: &HostCaps, code: &str) -> Result<Rc<Node>> {
    Node::seq_last(vec![
        Value::Node(assign_global(caps, "_c", Value::from(code))),
        Value::Node(Node::call(
            Value::Node(Node::call(
                caps.function_type(),
                vec![
                    Value::Node(caps.compile_source(
                        "exec _c in globals()",
                        "<stream>",
                        "exec",
                    )),
                    Value::Node(caps.globals()),
                    Value::from("exe"),
                ],
            )),
            vec![],
        )),
    ])
}

/// Evaluate an expression in the replay session's global namespace and
/// yield its value.
pub fn eval_text(caps: &HostCaps, code: &str) -> Rc<Node> {
    Node::call(
        caps.builtin("eval"),
        vec![Value::from(code), Value::Node(caps.globals())],
    )
}

fn strip_comment_lines(code: &str) -> String {
    code.lines()
        .filter(|line| {
            !line
                .split('#')
                .next()
                .unwrap_or("")
                .trim()
                .is_empty()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
