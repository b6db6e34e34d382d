use std::rc::Rc;

use crate::error::{CompileErrorKind, CompilerError, Result};

/// Plain data lifted into the opcode stream.
///
/// Containers keep caller-supplied order; nothing is re-sorted anywhere
/// between construction and emission, so generation stays deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    /// A reconstruction operation embedded in a value position.
    Node(Rc<Node>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

impl From<Rc<Node>> for Value {
    fn from(v: Rc<Node>) -> Self {
        Value::Node(v)
    }
}

/// Which operand of a [`Node::Sequence`] survives replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    First,
    Last,
}

/// A reconstruction operation.
///
/// Nodes are immutable once built and shared by `Rc`; every constructor that
/// can produce an invalid node validates eagerly, so a tree that exists can
/// always be lowered.
#[derive(Debug, PartialEq)]
pub enum Node {
    /// An ordinary value used where an operation is expected.
    Wrap(Value),
    /// The object `name` in module `module`, resolved at replay time.
    Global {
        module: String,
        name: String,
        /// Memoize the resolved object under its name pair.
        cache: bool,
    },
    /// Positional call. Zero arguments is legal.
    Call { callee: Value, args: Vec<Value> },
    /// Bulk attribute merge onto `target`; yields `target`.
    ///
    /// An empty mapping serializes to nothing at all.
    SetAttrs {
        target: Value,
        attrs: Vec<(String, Value)>,
    },
    /// `obj[key] = value`; yields `obj`.
    SetItem { obj: Value, key: Value, value: Value },
    /// Evaluate every operand in order, keep one result.
    Sequence { items: Vec<Value>, keep: Keep },
    /// Bind `name` to `value` in the session memo; yields `value`.
    Assign { name: String, value: Value },
    /// Read a previously assigned `name` from the session memo.
    Load { name: String },
}

impl Node {
    /// Lift a value into an operation. Wrapping absorbs: handing it a value
    /// that already carries a node returns that node unchanged.
    pub fn wrap(value: Value) -> Rc<Node> {
        match value {
            Value::Node(node) => node,
            other => Rc::new(Node::Wrap(other)),
        }
    }

    pub fn global(module: impl Into<String>, name: impl Into<String>) -> Rc<Node> {
        Rc::new(Node::Global {
            module: module.into(),
            name: name.into(),
            cache: true,
        })
    }

    pub fn global_uncached(module: impl Into<String>, name: impl Into<String>) -> Rc<Node> {
        Rc::new(Node::Global {
            module: module.into(),
            name: name.into(),
            cache: false,
        })
    }

    pub fn call(callee: impl Into<Value>, args: Vec<Value>) -> Rc<Node> {
        Rc::new(Node::Call {
            callee: callee.into(),
            args,
        })
    }

    /// Combined call-or-merge builder. Positional construction and keyword
    /// attribute assignment are mutually exclusive semantics; a request for
    /// both must be two operations chained through a sequence instead.
    pub fn call_full(
        callee: impl Into<Value>,
        args: Vec<Value>,
        attrs: Vec<(String, Value)>,
    ) -> Result<Rc<Node>> {
        if !args.is_empty() && !attrs.is_empty() {
            return Err(CompilerError::new(
                CompileErrorKind::Construction,
                "a call cannot take both positional arguments and attribute assignments",
            ));
        }
        if attrs.is_empty() {
            Ok(Node::call(callee, args))
        } else {
            Ok(Node::set_attrs(callee, attrs))
        }
    }

    pub fn set_attrs(target: impl Into<Value>, attrs: Vec<(String, Value)>) -> Rc<Node> {
        Rc::new(Node::SetAttrs {
            target: target.into(),
            attrs,
        })
    }

    pub fn set_item(
        obj: impl Into<Value>,
        key: impl Into<Value>,
        value: impl Into<Value>,
    ) -> Rc<Node> {
        Rc::new(Node::SetItem {
            obj: obj.into(),
            key: key.into(),
            value: value.into(),
        })
    }

    /// Evaluate all operands in order, keep the last result.
    pub fn seq_last(items: Vec<Value>) -> Result<Rc<Node>> {
        Node::sequence(items, Keep::Last)
    }

    /// Evaluate all operands in order, keep the first result.
    pub fn seq_first(items: Vec<Value>) -> Result<Rc<Node>> {
        Node::sequence(items, Keep::First)
    }

    pub fn sequence(items: Vec<Value>, keep: Keep) -> Result<Rc<Node>> {
        if items.is_empty() {
            return Err(CompilerError::new(
                CompileErrorKind::Construction,
                "a sequence needs at least one operand",
            ));
        }
        let items = flatten_sequence(items, keep);
        Ok(Rc::new(Node::Sequence { items, keep }))
    }

    pub fn assign(name: impl Into<String>, value: impl Into<Value>) -> Result<Rc<Node>> {
        let name = name.into();
        check_memo_name(&name)?;
        Ok(Rc::new(Node::Assign {
            name,
            value: value.into(),
        }))
    }

    pub fn load(name: impl Into<String>) -> Result<Rc<Node>> {
        let name = name.into();
        check_memo_name(&name)?;
        Ok(Rc::new(Node::Load { name }))
    }
}

fn check_memo_name(name: &str) -> Result<()> {
    if name.contains('\n') || name.contains('\r') {
        return Err(CompilerError::new(
            CompileErrorKind::Construction,
            format!("memo variable name {name:?} contains a line break"),
        ));
    }
    Ok(())
}

/// Splice nested sequences into the parent operand list.
///
/// A child in a discarded slot is always safe to splice: each of its
/// operands contributes one stack value the parent bracket throws away, in
/// the same evaluation order. A child in the kept slot is spliced only when
/// its direction matches the parent's, so its kept operand lands in the
/// parent's kept slot.
fn flatten_sequence(items: Vec<Value>, keep: Keep) -> Vec<Value> {
    let kept_index = match keep {
        Keep::First => 0,
        Keep::Last => items.len() - 1,
    };
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let child = match &item {
            Value::Node(node) => match &**node {
                Node::Sequence {
                    items: inner,
                    keep: inner_keep,
                } if i != kept_index || *inner_keep == keep => Some(inner.clone()),
                _ => None,
            },
            _ => None,
        };
        match child {
            Some(inner) => out.extend(inner),
            None => out.push(item),
        }
    }
    out
}

/// Fixed identity overrides for callables whose public module/name pair
/// differs from the namespace they are actually reachable from. The classic
/// case: the function type reports `__builtin__.function` but is only
/// importable as `types.FunctionType`.
pub fn callable_identity(module: &str, name: &str) -> Option<(&'static str, &'static str)> {
    const SPECIAL_CASES: &[((&str, &str), (&str, &str))] = &[
        (("__builtin__", "function"), ("types", "FunctionType")),
        (
            ("__builtin__", "builtin_function_or_method"),
            ("types", "BuiltinFunctionType"),
        ),
        (("__builtin__", "instancemethod"), ("types", "MethodType")),
        (("__builtin__", "module"), ("types", "ModuleType")),
        (("__builtin__", "code"), ("types", "CodeType")),
    ];
    SPECIAL_CASES
        .iter()
        .find(|((m, n), _)| *m == module && *n == name)
        .map(|(_, target)| *target)
}

/// Reference to a callable by its observed identity, routed through the
/// override table before the name pair is trusted.
pub fn import_of(module: &str, name: &str) -> Rc<Node> {
    match callable_identity(module, name) {
        Some((m, n)) => Node::global(m, n),
        None => Node::global(module, name),
    }
}
