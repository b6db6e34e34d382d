use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::caps::HostCaps;
use crate::error::{CompileErrorKind, CompilerError, Result};
use crate::ir::{Node, Value};
use crate::program;
use crate::pysrc::{self, BinOp, CmpOp, Expr, Stmt, UnOp};

/// Lower restricted source text into a reconstruction tree.
///
/// The whole program becomes a last-result sequence, so replaying the stream
/// yields the value of the final statement. Structurally identical subtrees
/// are shared afterwards via [`dedup_tree`].
pub fn transpile(source: &str) -> Result<Rc<Node>> {
    transpile_with(&HostCaps::default(), source)
}

pub fn transpile_with(caps: &HostCaps, source: &str) -> Result<Rc<Node>> {
    let stmts = pysrc::parse_program(source)?;
    let mut lower = Lower {
        caps,
        locals: HashSet::new(),
        globals: HashSet::new(),
        line: 0,
    };
    let mut items = Vec::new();
    for stmt in &stmts {
        lower.line = stmt.line();
        if let Some(item) = lower.stmt(stmt)? {
            items.push(item);
        }
    }
    if items.is_empty() {
        return Err(CompilerError::new(
            CompileErrorKind::Parse,
            "program has no executable statements",
        ));
    }
    let tree = Node::seq_last(items)?;
    Ok(dedup_tree(&tree))
}

struct Lower<'a> {
    caps: &'a HostCaps,
    /// Names assigned so far; loads require a prior assignment.
    locals: HashSet<String>,
    /// Names declared `global` in this program.
    globals: HashSet<String>,
    line: u32,
}

impl Lower<'_> {
    fn unsupported(&self, construct: &str, detail: impl std::fmt::Display) -> CompilerError {
        CompilerError::new(
            CompileErrorKind::Unsupported,
            format!("line {}: unsupported {construct}: {detail}", self.line),
        )
    }

    /// A statement lowers to at most one sequence operand; declarations
    /// produce none.
    fn stmt(&mut self, stmt: &Stmt) -> Result<Option<Value>> {
        match stmt {
            Stmt::Expr { value, .. } => Ok(Some(self.expr(value)?)),
            Stmt::Assign { target, value, .. } => {
                let value = self.expr(value)?;
                match target {
                    Expr::Name(name) => {
                        if self.globals.contains(name) {
                            Ok(Some(Value::Node(program::assign_global(
                                self.caps, name, value,
                            ))))
                        } else {
                            self.locals.insert(name.clone());
                            Ok(Some(Value::Node(Node::assign(name.clone(), value)?)))
                        }
                    }
                    Expr::Attribute { value: obj, name } => {
                        let obj = self.expr(obj)?;
                        Ok(Some(Value::Node(self.caps.set_attr(obj, name, value))))
                    }
                    Expr::Subscript { value: obj, index } => {
                        let obj = self.expr(obj)?;
                        let key = self.expr(index)?;
                        Ok(Some(Value::Node(Node::set_item(obj, key, value))))
                    }
                    other => Err(self.unsupported("assignment target", format!("{other:?}"))),
                }
            }
            Stmt::Import { module, alias, .. } => {
                let bound = match alias {
                    Some(alias) => alias.clone(),
                    None => {
                        if module.contains('.') {
                            return Err(self.unsupported(
                                "import",
                                format!("dotted `import {module}` without an alias"),
                            ));
                        }
                        module.clone()
                    }
                };
                // The import capability yields the top-level module; walk
                // down to the named submodule when the path is dotted.
                let mut node = self.caps.import_module(module);
                for segment in module.split('.').skip(1) {
                    node = self.caps.attr(node, segment);
                }
                self.locals.insert(bound.clone());
                Ok(Some(Value::Node(Node::assign(bound, Value::Node(node))?)))
            }
            Stmt::ImportFrom { module, names, .. } => {
                let mut bindings = Vec::new();
                for (name, alias) in names {
                    let bound = alias.clone().unwrap_or_else(|| name.clone());
                    self.locals.insert(bound.clone());
                    bindings.push(Value::Node(Node::assign(
                        bound,
                        Value::Node(crate::ir::import_of(module, name)),
                    )?));
                }
                if bindings.len() == 1 {
                    Ok(Some(bindings.remove(0)))
                } else {
                    Ok(Some(Value::Node(Node::seq_last(bindings)?)))
                }
            }
            Stmt::Global { names, .. } => {
                for name in names {
                    if self.locals.contains(name) {
                        return Err(self.unsupported(
                            "global declaration",
                            format!("`{name}` is declared global after being assigned"),
                        ));
                    }
                    self.globals.insert(name.clone());
                }
                Ok(None)
            }
            Stmt::Del { target, .. } => match target {
                Expr::Attribute { value: obj, name } => {
                    let obj = self.expr(obj)?;
                    Ok(Some(Value::Node(self.caps.del_attr(obj, name))))
                }
                Expr::Subscript { value: obj, index } => {
                    let obj = self.expr(obj)?;
                    let key = self.expr(index)?;
                    Ok(Some(Value::Node(self.caps.del_item(obj, key))))
                }
                other => Err(self.unsupported("del target", format!("{other:?}"))),
            },
        }
    }

    fn expr(&mut self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Int(v) => Ok(Value::Int(*v)),
            Expr::Float(v) => Ok(Value::Float(*v)),
            Expr::Str(s) => Ok(Value::Str(s.clone())),
            Expr::NoneLit => Ok(Value::None),
            Expr::True => Ok(Value::Bool(true)),
            Expr::False => Ok(Value::Bool(false)),
            Expr::Name(name) => self.read_name(name),
            Expr::List(items) => Ok(Value::List(self.expr_all(items)?)),
            Expr::Tuple(items) => Ok(Value::Tuple(self.expr_all(items)?)),
            Expr::Set(items) => Ok(Value::Node(Node::call(
                self.caps.builtin("set"),
                vec![Value::List(self.expr_all(items)?)],
            ))),
            Expr::Dict(pairs) => {
                let mut out = Vec::with_capacity(pairs.len());
                for (key, value) in pairs {
                    out.push((self.expr(key)?, self.expr(value)?));
                }
                Ok(Value::Dict(out))
            }
            Expr::Attribute { value, name } => {
                let obj = self.expr(value)?;
                Ok(Value::Node(self.caps.attr(obj, name)))
            }
            Expr::Subscript { value, index } => {
                let obj = self.expr(value)?;
                let key = self.expr(index)?;
                Ok(Value::Node(self.caps.get_item(obj, key)))
            }
            Expr::Call { func, args, kwargs } => {
                if let Some((name, _)) = kwargs.first() {
                    return Err(self.unsupported(
                        "call",
                        format!("keyword argument `{name}`"),
                    ));
                }
                let callee = self.expr(func)?;
                let args = self.expr_all(args)?;
                Ok(Value::Node(Node::call(callee, args)))
            }
            Expr::Cond { test, body, orelse } => {
                // Both branches evaluate eagerly; the machine has no
                // branching, so selection is indexing with int(bool(test)).
                let test = self.expr(test)?;
                let body = self.expr(body)?;
                let orelse = self.expr(orelse)?;
                let selector = Node::call(
                    self.caps.builtin("int"),
                    vec![Value::Node(Node::call(self.caps.builtin("bool"), vec![test]))],
                );
                Ok(Value::Node(self.caps.get_item(
                    Value::Tuple(vec![orelse, body]),
                    Value::Node(selector),
                )))
            }
            Expr::Binary { op, left, right } => {
                let left = self.expr(left)?;
                let right = self.expr(right)?;
                let func = self.caps.operator_fn(binop_capability(*op));
                Ok(Value::Node(Node::call(func, vec![left, right])))
            }
            Expr::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                let name = match op {
                    UnOp::Neg => "neg",
                    UnOp::Pos => "pos",
                    UnOp::Invert => "invert",
                    UnOp::Not => "not_",
                };
                Ok(Value::Node(Node::call(
                    self.caps.operator_fn(name),
                    vec![operand],
                )))
            }
            Expr::Bool { op, .. } => Err(self.unsupported(
                "operator",
                format!(
                    "short-circuit `{}` needs control flow the target machine cannot express",
                    op.as_str()
                ),
            )),
            Expr::Compare { left, ops, rights } => {
                if ops.len() > 1 {
                    return Err(self.unsupported(
                        "comparison",
                        "chained comparison operators",
                    ));
                }
                let left = self.expr(left)?;
                let right = self.expr(&rights[0])?;
                Ok(Value::Node(self.compare(ops[0], left, right)))
            }
        }
    }

    fn compare(&self, op: CmpOp, left: Value, right: Value) -> Rc<Node> {
        let simple = |name: &str| Node::call(self.caps.operator_fn(name), vec![left.clone(), right.clone()]);
        match op {
            CmpOp::Eq => simple("eq"),
            CmpOp::Ne => simple("ne"),
            CmpOp::Lt => simple("lt"),
            CmpOp::Le => simple("le"),
            CmpOp::Gt => simple("gt"),
            CmpOp::Ge => simple("ge"),
            CmpOp::Is => simple("is_"),
            CmpOp::IsNot => simple("is_not"),
            // operator.contains takes the container first.
            CmpOp::In => Node::call(self.caps.operator_fn("contains"), vec![right, left]),
            CmpOp::NotIn => Node::call(
                self.caps.operator_fn("not_"),
                vec![Value::Node(Node::call(
                    self.caps.operator_fn("contains"),
                    vec![right, left],
                ))],
            ),
        }
    }

    fn read_name(&self, name: &str) -> Result<Value> {
        if self.locals.contains(name) {
            return Ok(Value::Node(Node::load(name)?));
        }
        if self.globals.contains(name) {
            return Ok(Value::Node(program::load_global(self.caps, name)));
        }
        if self.caps.is_builtin_name(name) {
            return Ok(Value::Node(self.caps.builtin(name)));
        }
        Err(self.unsupported("name", format!("`{name}` is not assigned, global, or builtin")))
    }

    fn expr_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }
}

fn binop_capability(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Div => "truediv",
        BinOp::FloorDiv => "floordiv",
        BinOp::Mod => "mod",
        BinOp::Pow => "pow",
        BinOp::LShift => "lshift",
        BinOp::RShift => "rshift",
        BinOp::BitAnd => "and_",
        BinOp::BitOr => "or_",
        BinOp::BitXor => "xor",
    }
}

// --- structural deduplication ---

/// Structural key of an already-interned value. Node children are compared
/// by interned identity, which equals structural equality bottom-up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VKey {
    None,
    Bool(bool),
    Int(i64),
    FloatBits(u64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<VKey>),
    List(Vec<VKey>),
    Dict(Vec<(VKey, VKey)>),
    Node(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NKey {
    Wrap(VKey),
    Global(String, String, bool),
    Call(VKey, Vec<VKey>),
    SetAttrs(VKey, Vec<(String, VKey)>),
    SetItem(VKey, VKey, VKey),
    Sequence(Vec<VKey>, bool),
    Assign(String, VKey),
    Load(String),
}

/// Bottom-up hash-consing: any node whose kind and already-lowered fields
/// exactly match an earlier node is replaced by that node, so repeated
/// subtrees are emitted once and then referenced by slot. The cache lives
/// for one call.
///
/// Runs on an explicit stack; payload trees are routinely machine-generated
/// and arbitrarily deep.
pub fn dedup_tree(root: &Rc<Node>) -> Rc<Node> {
    enum Step<'a> {
        Enter(&'a Value),
        Exit(&'a Value),
    }

    let root_value = Value::Node(root.clone());
    let mut interned: HashMap<NKey, Rc<Node>> = HashMap::new();
    let mut steps = vec![Step::Enter(&root_value)];
    let mut results: Vec<(Value, VKey)> = Vec::new();

    while let Some(step) = steps.pop() {
        match step {
            Step::Enter(value) => match value {
                Value::None => results.push((Value::None, VKey::None)),
                Value::Bool(b) => results.push((Value::Bool(*b), VKey::Bool(*b))),
                Value::Int(n) => results.push((Value::Int(*n), VKey::Int(*n))),
                Value::Float(x) => {
                    results.push((Value::Float(*x), VKey::FloatBits(x.to_bits())))
                }
                Value::Str(s) => results.push((Value::Str(s.clone()), VKey::Str(s.clone()))),
                Value::Bytes(b) => {
                    results.push((Value::Bytes(b.clone()), VKey::Bytes(b.clone())))
                }
                Value::Tuple(_) | Value::List(_) | Value::Dict(_) | Value::Node(_) => {
                    steps.push(Step::Exit(value));
                    for child in value_children(value).into_iter().rev() {
                        steps.push(Step::Enter(child));
                    }
                }
            },
            Step::Exit(value) => {
                let arity = value_children(value).len();
                let children = results.split_off(results.len() - arity);
                results.push(rebuild(value, children, &mut interned));
            }
        }
    }

    let (rebuilt, _) = results.pop().expect("dedup leaves exactly one result");
    match rebuilt {
        Value::Node(node) => node,
        other => unreachable!("root must stay a node, got {other:?}"),
    }
}

/// Child values of a compound value, in emission order.
fn value_children(value: &Value) -> Vec<&Value> {
    match value {
        Value::Tuple(items) | Value::List(items) => items.iter().collect(),
        Value::Dict(pairs) => pairs.iter().flat_map(|(k, v)| [k, v]).collect(),
        Value::Node(node) => match &**node {
            Node::Wrap(v) => vec![v],
            Node::Global { .. } | Node::Load { .. } => vec![],
            Node::Call { callee, args } => {
                let mut out = vec![callee];
                out.extend(args.iter());
                out
            }
            Node::SetAttrs { target, attrs } => {
                let mut out = vec![target];
                out.extend(attrs.iter().map(|(_, v)| v));
                out
            }
            Node::SetItem { obj, key, value } => vec![obj, key, value],
            Node::Sequence { items, .. } => items.iter().collect(),
            Node::Assign { value, .. } => vec![value],
        },
        _ => vec![],
    }
}

fn rebuild(
    value: &Value,
    children: Vec<(Value, VKey)>,
    interned: &mut HashMap<NKey, Rc<Node>>,
) -> (Value, VKey) {
    match value {
        Value::Tuple(_) => {
            let (values, keys) = split(children);
            (Value::Tuple(values), VKey::Tuple(keys))
        }
        Value::List(_) => {
            let (values, keys) = split(children);
            (Value::List(values), VKey::List(keys))
        }
        Value::Dict(_) => {
            let mut values = Vec::with_capacity(children.len() / 2);
            let mut keys = Vec::with_capacity(children.len() / 2);
            let mut iter = children.into_iter();
            while let (Some((kv, kk)), Some((vv, vk))) = (iter.next(), iter.next()) {
                values.push((kv, vv));
                keys.push((kk, vk));
            }
            (Value::Dict(values), VKey::Dict(keys))
        }
        Value::Node(node) => {
            let (nkey, rebuilt) = rebuild_node(node, children);
            let shared = interned
                .entry(nkey)
                .or_insert_with(|| Rc::new(rebuilt))
                .clone();
            let id = Rc::as_ptr(&shared) as usize;
            (Value::Node(shared), VKey::Node(id))
        }
        other => unreachable!("scalar {other:?} never reaches rebuild"),
    }
}

fn rebuild_node(node: &Node, children: Vec<(Value, VKey)>) -> (NKey, Node) {
    match node {
        Node::Wrap(_) => {
            let (mut values, mut keys) = split(children);
            (
                NKey::Wrap(keys.remove(0)),
                Node::Wrap(values.remove(0)),
            )
        }
        Node::Global {
            module,
            name,
            cache,
        } => (
            NKey::Global(module.clone(), name.clone(), *cache),
            Node::Global {
                module: module.clone(),
                name: name.clone(),
                cache: *cache,
            },
        ),
        Node::Call { .. } => {
            let (mut values, mut keys) = split(children);
            let callee = values.remove(0);
            let callee_key = keys.remove(0);
            (
                NKey::Call(callee_key, keys),
                Node::Call {
                    callee,
                    args: values,
                },
            )
        }
        Node::SetAttrs { attrs, .. } => {
            let (mut values, mut keys) = split(children);
            let target = values.remove(0);
            let target_key = keys.remove(0);
            let names: Vec<String> = attrs.iter().map(|(n, _)| n.clone()).collect();
            let rebuilt_attrs: Vec<(String, Value)> =
                names.iter().cloned().zip(values).collect();
            let key_attrs: Vec<(String, VKey)> = names.into_iter().zip(keys).collect();
            (
                NKey::SetAttrs(target_key, key_attrs),
                Node::SetAttrs {
                    target,
                    attrs: rebuilt_attrs,
                },
            )
        }
        Node::SetItem { .. } => {
            let (mut values, mut keys) = split(children);
            let value = values.pop().expect("three children");
            let key = values.pop().expect("three children");
            let obj = values.pop().expect("three children");
            let vk = keys.pop().expect("three children");
            let kk = keys.pop().expect("three children");
            let ok = keys.pop().expect("three children");
            (NKey::SetItem(ok, kk, vk), Node::SetItem { obj, key, value })
        }
        Node::Sequence { keep, .. } => {
            let (values, keys) = split(children);
            (
                NKey::Sequence(keys, *keep == crate::ir::Keep::Last),
                Node::Sequence {
                    items: values,
                    keep: *keep,
                },
            )
        }
        Node::Assign { name, .. } => {
            let (mut values, mut keys) = split(children);
            (
                NKey::Assign(name.clone(), keys.remove(0)),
                Node::Assign {
                    name: name.clone(),
                    value: values.remove(0),
                },
            )
        }
        Node::Load { name } => (
            NKey::Load(name.clone()),
            Node::Load { name: name.clone() },
        ),
    }
}

fn split(children: Vec<(Value, VKey)>) -> (Vec<Value>, Vec<VKey>) {
    children.into_iter().unzip()
}
