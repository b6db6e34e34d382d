//! Read-only indented rendering of a reconstruction tree, for debugging.

use std::fmt::Write;
use std::rc::Rc;

use crate::ir::{Keep, Node, Value};

pub fn pretty(tree: &Rc<Node>) -> String {
    let mut out = String::new();
    render_node(tree, 0, &mut out);
    out
}

const INDENT: &str = "  ";

fn pad(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn render_node(node: &Node, depth: usize, out: &mut String) {
    pad(depth, out);
    match node {
        Node::Wrap(value) => {
            out.push_str("Wrap\n");
            render_value(value, depth + 1, out);
        }
        Node::Global {
            module,
            name,
            cache,
        } => {
            let suffix = if *cache { "" } else { ", uncached" };
            let _ = writeln!(out, "Global({module}.{name}{suffix})");
        }
        Node::Call { callee, args } => {
            out.push_str("Call\n");
            render_value(callee, depth + 1, out);
            for arg in args {
                render_value(arg, depth + 1, out);
            }
        }
        Node::SetAttrs { target, attrs } => {
            out.push_str("SetAttrs\n");
            render_value(target, depth + 1, out);
            for (name, value) in attrs {
                pad(depth + 1, out);
                let _ = writeln!(out, ".{name} =");
                render_value(value, depth + 2, out);
            }
        }
        Node::SetItem { obj, key, value } => {
            out.push_str("SetItem\n");
            render_value(obj, depth + 1, out);
            render_value(key, depth + 1, out);
            render_value(value, depth + 1, out);
        }
        Node::Sequence { items, keep } => {
            let direction = match keep {
                Keep::First => "first",
                Keep::Last => "last",
            };
            let _ = writeln!(out, "Sequence(keep={direction})");
            for item in items {
                render_value(item, depth + 1, out);
            }
        }
        Node::Assign { name, value } => {
            let _ = writeln!(out, "Assign({name})");
            render_value(value, depth + 1, out);
        }
        Node::Load { name } => {
            let _ = writeln!(out, "Load({name})");
        }
    }
}

fn render_value(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Node(node) => render_node(node, depth, out),
        Value::None => {
            pad(depth, out);
            out.push_str("None\n");
        }
        Value::Bool(b) => {
            pad(depth, out);
            let _ = writeln!(out, "Bool({b})");
        }
        Value::Int(n) => {
            pad(depth, out);
            let _ = writeln!(out, "Int({n})");
        }
        Value::Float(x) => {
            pad(depth, out);
            let _ = writeln!(out, "Float({x})");
        }
        Value::Str(s) => {
            pad(depth, out);
            let _ = writeln!(out, "Str({s:?})");
        }
        Value::Bytes(b) => {
            pad(depth, out);
            let _ = writeln!(out, "Bytes(len={})", b.len());
        }
        Value::Tuple(items) => {
            pad(depth, out);
            let _ = writeln!(out, "Tuple[{}]", items.len());
            for item in items {
                render_value(item, depth + 1, out);
            }
        }
        Value::List(items) => {
            pad(depth, out);
            let _ = writeln!(out, "List[{}]", items.len());
            for item in items {
                render_value(item, depth + 1, out);
            }
        }
        Value::Dict(pairs) => {
            pad(depth, out);
            let _ = writeln!(out, "Dict[{}]", pairs.len());
            for (key, value) in pairs {
                render_value(key, depth + 1, out);
                render_value(value, depth + 2, out);
            }
        }
    }
}
