use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use pkl_opcodes::{op, Protocol};

use crate::error::{CompileErrorKind, CompilerError, Result};
use crate::ir::{Keep, Node, Value};

/// Lower a tree of reconstruction operations to an opcode stream.
///
/// The memo table lives for exactly this call; concurrent compilations each
/// own their own. Output is byte-identical for structurally identical trees
/// under the same protocol.
pub fn generate(tree: &Rc<Node>, protocol: Protocol) -> Result<Vec<u8>> {
    let mut session = Session {
        protocol,
        memo: HashMap::new(),
        shared: collect_shared(tree),
        out: vec![op::PROTO, protocol.version()],
    };
    session.run(tree)?;
    session.out.push(op::STOP);
    Ok(session.out)
}

/// Memo cache key: one table, three key families.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MemoKey {
    Global(String, String),
    Var(String),
    NodeId(usize),
}

struct Session {
    protocol: Protocol,
    memo: HashMap<MemoKey, u32>,
    /// Nodes reachable through more than one owner, by pointer identity.
    shared: HashSet<usize>,
    out: Vec<u8>,
}

/// One step of the lowering work stack. The tree walk is iterative so input
/// depth is not bounded by the host call stack.
enum Task<'a> {
    Value(&'a Value),
    Node(&'a Rc<Node>),
    /// Aggregate a slice of values into one tuple.
    Tuple(&'a [Value]),
    /// The `(none-marker, mapping)` operand of an attribute merge.
    AttrsPair(&'a [(String, Value)]),
    Str(&'a str),
    Byte(u8),
    /// Store the finished stack top under a variable name.
    StoreVar(&'a str),
    /// Store the finished stack top under a shared node's identity.
    StoreNode(usize),
}

impl Session {
    fn run(&mut self, root: &Rc<Node>) -> Result<()> {
        let mut tasks: Vec<Task> = vec![Task::Node(root)];
        while let Some(task) = tasks.pop() {
            match task {
                Task::Byte(byte) => self.out.push(byte),
                Task::Str(s) => self.emit_str(s),
                Task::Value(value) => self.step_value(value, &mut tasks),
                Task::Node(node) => self.step_node(node, &mut tasks)?,
                Task::Tuple(items) => {
                    self.step_tuple(items, &mut tasks);
                }
                Task::AttrsPair(attrs) => {
                    // (None, {name: value, ...})
                    self.out.push(op::NONE);
                    tasks.push(Task::Byte(op::TUPLE2));
                    self.out.push(op::EMPTY_DICT);
                    if !attrs.is_empty() {
                        // SETITEMS runs before TUPLE2, so it sits above it
                        // on the task stack.
                        tasks.push(Task::Byte(op::SETITEMS));
                        self.out.push(op::MARK);
                        for (name, value) in attrs.iter().rev() {
                            tasks.push(Task::Value(value));
                            tasks.push(Task::Str(name));
                        }
                    }
                }
                Task::StoreVar(name) => {
                    let slot = self.slot_for(MemoKey::Var(name.to_string()));
                    self.emit_put(slot);
                }
                Task::StoreNode(id) => {
                    let slot = self.slot_for(MemoKey::NodeId(id));
                    self.emit_put(slot);
                }
            }
        }
        Ok(())
    }

    /// Values only ever need work pushed for their children; all prefix
    /// bytes can go out immediately because a task is popped only after
    /// everything that precedes it in the stream is already emitted.
    fn step_value<'a>(&mut self, value: &'a Value, tasks: &mut Vec<Task<'a>>) {
        match value {
            Value::None => self.out.push(op::NONE),
            Value::Bool(true) => self.out.push(op::NEWTRUE),
            Value::Bool(false) => self.out.push(op::NEWFALSE),
            Value::Int(n) => self.emit_int(*n),
            Value::Float(x) => {
                self.out.push(op::BINFLOAT);
                self.out.extend_from_slice(&x.to_be_bytes());
            }
            Value::Str(s) => self.emit_str(s),
            Value::Bytes(b) => self.emit_bytes(b),
            Value::Tuple(items) => self.step_tuple(items, tasks),
            Value::List(items) => {
                self.out.push(op::EMPTY_LIST);
                if !items.is_empty() {
                    self.out.push(op::MARK);
                    tasks.push(Task::Byte(op::APPENDS));
                    for item in items.iter().rev() {
                        tasks.push(Task::Value(item));
                    }
                }
            }
            Value::Dict(pairs) => {
                self.out.push(op::EMPTY_DICT);
                if !pairs.is_empty() {
                    self.out.push(op::MARK);
                    tasks.push(Task::Byte(op::SETITEMS));
                    for (key, value) in pairs.iter().rev() {
                        tasks.push(Task::Value(value));
                        tasks.push(Task::Value(key));
                    }
                }
            }
            Value::Node(node) => tasks.push(Task::Node(node)),
        }
    }

    fn step_tuple<'a>(&mut self, items: &'a [Value], tasks: &mut Vec<Task<'a>>) {
        match items.len() {
            0 => self.out.push(op::EMPTY_TUPLE),
            n @ 1..=3 => {
                let closer = [op::TUPLE1, op::TUPLE2, op::TUPLE3][n - 1];
                tasks.push(Task::Byte(closer));
                for item in items.iter().rev() {
                    tasks.push(Task::Value(item));
                }
            }
            _ => {
                self.out.push(op::MARK);
                tasks.push(Task::Byte(op::TUPLE));
                for item in items.iter().rev() {
                    tasks.push(Task::Value(item));
                }
            }
        }
    }

    fn step_node<'a>(&mut self, node: &'a Rc<Node>, tasks: &mut Vec<Task<'a>>) -> Result<()> {
        let id = Rc::as_ptr(node) as usize;
        if self.shared.contains(&id) && identity_memoizable(node) {
            if let Some(&slot) = self.memo.get(&MemoKey::NodeId(id)) {
                self.emit_get(slot);
                return Ok(());
            }
            tasks.push(Task::StoreNode(id));
        }
        match &**node {
            Node::Wrap(value) => tasks.push(Task::Value(value)),
            Node::Global {
                module,
                name,
                cache,
            } => self.step_global(module, name, *cache)?,
            Node::Call { callee, args } => {
                tasks.push(Task::Byte(op::REDUCE));
                tasks.push(Task::Tuple(args));
                tasks.push(Task::Value(callee));
            }
            Node::SetAttrs { target, attrs } => {
                // An empty mapping merges nothing; the target passes through.
                if !attrs.is_empty() {
                    tasks.push(Task::Byte(op::BUILD));
                    tasks.push(Task::AttrsPair(attrs));
                }
                tasks.push(Task::Value(target));
            }
            Node::SetItem { obj, key, value } => {
                tasks.push(Task::Byte(op::SETITEM));
                tasks.push(Task::Value(value));
                tasks.push(Task::Value(key));
                tasks.push(Task::Value(obj));
            }
            Node::Sequence { items, keep } => self.step_sequence(items, *keep, tasks),
            Node::Assign { name, value } => {
                tasks.push(Task::StoreVar(name));
                tasks.push(Task::Value(value));
            }
            Node::Load { name } => match self.memo.get(&MemoKey::Var(name.clone())) {
                Some(&slot) => self.emit_get(slot),
                None => {
                    return Err(CompilerError::new(
                        CompileErrorKind::Resolution,
                        format!("variable `{name}` is loaded before any assignment"),
                    ));
                }
            },
        }
        Ok(())
    }

    fn step_sequence<'a>(&mut self, items: &'a [Value], keep: Keep, tasks: &mut Vec<Task<'a>>) {
        let (kept, discarded): (&Value, &[Value]) = match keep {
            Keep::Last => (items.last().expect("sequence is never empty"), &items[..items.len() - 1]),
            Keep::First => (&items[0], &items[1..]),
        };
        match (discarded.len(), keep) {
            (0, _) => tasks.push(Task::Value(kept)),
            (1, Keep::Last) => {
                tasks.push(Task::Value(kept));
                tasks.push(Task::Byte(op::POP));
                tasks.push(Task::Value(&discarded[0]));
            }
            (1, Keep::First) => {
                tasks.push(Task::Byte(op::POP));
                tasks.push(Task::Value(&discarded[0]));
                tasks.push(Task::Value(kept));
            }
            (_, Keep::Last) => {
                tasks.push(Task::Value(kept));
                tasks.push(Task::Byte(op::POP_MARK));
                for item in discarded.iter().rev() {
                    tasks.push(Task::Value(item));
                }
                tasks.push(Task::Byte(op::MARK));
            }
            (_, Keep::First) => {
                tasks.push(Task::Byte(op::POP_MARK));
                for item in discarded.iter().rev() {
                    tasks.push(Task::Value(item));
                }
                tasks.push(Task::Byte(op::MARK));
                tasks.push(Task::Value(kept));
            }
        }
    }

    fn step_global(&mut self, module: &str, name: &str, cache: bool) -> Result<()> {
        if cache {
            let key = MemoKey::Global(module.to_string(), name.to_string());
            if let Some(&slot) = self.memo.get(&key) {
                self.emit_get(slot);
                return Ok(());
            }
            self.emit_global_ref(module, name)?;
            let slot = self.slot_for(key);
            self.emit_put(slot);
        } else {
            self.emit_global_ref(module, name)?;
        }
        Ok(())
    }

    fn emit_global_ref(&mut self, module: &str, name: &str) -> Result<()> {
        if module.contains(['\n', '\r']) || name.contains(['\n', '\r']) {
            return Err(CompilerError::new(
                CompileErrorKind::Construction,
                format!("global reference {module}.{name} contains a line break"),
            ));
        }
        if self.protocol.has_stack_global() {
            self.emit_str(module);
            self.emit_str(name);
            self.out.push(op::STACK_GLOBAL);
        } else {
            self.out.push(op::GLOBAL);
            self.out.extend_from_slice(module.as_bytes());
            self.out.push(b'\n');
            self.out.extend_from_slice(name.as_bytes());
            self.out.push(b'\n');
        }
        Ok(())
    }

    /// Existing slot for a key, or the next free index. Re-storing an
    /// existing variable reuses its slot, which is what rebinding means.
    fn slot_for(&mut self, key: MemoKey) -> u32 {
        if let Some(&slot) = self.memo.get(&key) {
            return slot;
        }
        let slot = self.memo.len() as u32;
        self.memo.insert(key, slot);
        slot
    }

    fn emit_get(&mut self, slot: u32) {
        if slot < 256 {
            self.out.push(op::BINGET);
            self.out.push(slot as u8);
        } else {
            self.out.push(op::LONG_BINGET);
            self.out.extend_from_slice(&slot.to_le_bytes());
        }
    }

    fn emit_put(&mut self, slot: u32) {
        if slot < 256 {
            self.out.push(op::BINPUT);
            self.out.push(slot as u8);
        } else {
            self.out.push(op::LONG_BINPUT);
            self.out.extend_from_slice(&slot.to_le_bytes());
        }
    }

    fn emit_int(&mut self, n: i64) {
        if (0..256).contains(&n) {
            self.out.push(op::BININT1);
            self.out.push(n as u8);
        } else if (256..65536).contains(&n) {
            self.out.push(op::BININT2);
            self.out.extend_from_slice(&(n as u16).to_le_bytes());
        } else if i32::try_from(n).is_ok() {
            self.out.push(op::BININT);
            self.out.extend_from_slice(&(n as i32).to_le_bytes());
        } else {
            let bytes = encode_long(n);
            self.out.push(op::LONG1);
            self.out.push(bytes.len() as u8);
            self.out.extend_from_slice(&bytes);
        }
    }

    fn emit_str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        if self.protocol.has_stack_global() && bytes.len() < 256 {
            self.out.push(op::SHORT_BINUNICODE);
            self.out.push(bytes.len() as u8);
        } else {
            self.out.push(op::BINUNICODE);
            self.out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        }
        self.out.extend_from_slice(bytes);
    }

    fn emit_bytes(&mut self, bytes: &[u8]) {
        let (short, long) = match self.protocol {
            Protocol::Legacy => (op::SHORT_BINSTRING, op::BINSTRING),
            Protocol::Modern => (op::SHORT_BINBYTES, op::BINBYTES),
        };
        if bytes.len() < 256 {
            self.out.push(short);
            self.out.push(bytes.len() as u8);
        } else {
            self.out.push(long);
            self.out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        }
        self.out.extend_from_slice(bytes);
    }
}

/// Minimal two's-complement little-endian encoding, as the wide-integer
/// instruction expects.
fn encode_long(n: i64) -> Vec<u8> {
    let mut bytes = n.to_le_bytes().to_vec();
    while bytes.len() > 1 {
        let last = bytes[bytes.len() - 1];
        let prev_high = bytes[bytes.len() - 2] & 0x80 != 0;
        if (last == 0x00 && !prev_high) || (last == 0xff && prev_high) {
            bytes.pop();
        } else {
            break;
        }
    }
    bytes
}

/// Identity memoization applies to node kinds that always leave exactly one
/// fresh value on the stack. Globals and memo variables already dedup
/// through their own key families.
fn identity_memoizable(node: &Node) -> bool {
    match node {
        Node::Wrap(_) | Node::Call { .. } | Node::SetItem { .. } | Node::Sequence { .. } => true,
        Node::SetAttrs { .. } => true,
        Node::Global { .. } | Node::Assign { .. } | Node::Load { .. } => false,
    }
}

/// Pointer-identity occurrence count over the tree, iteratively. A node seen
/// through two or more owners gets a memo slot so later owners emit a cheap
/// slot load.
fn collect_shared(root: &Rc<Node>) -> HashSet<usize> {
    let mut counts: HashMap<usize, u32> = HashMap::new();
    let mut nodes: Vec<&Rc<Node>> = vec![root];
    while let Some(node) = nodes.pop() {
        let id = Rc::as_ptr(node) as usize;
        let seen = counts.entry(id).or_insert(0);
        *seen += 1;
        if *seen > 1 {
            continue;
        }
        let mut values: Vec<&Value> = Vec::new();
        match &**node {
            Node::Wrap(value) => values.push(value),
            Node::Global { .. } | Node::Load { .. } => {}
            Node::Call { callee, args } => {
                values.push(callee);
                values.extend(args.iter());
            }
            Node::SetAttrs { target, attrs } => {
                values.push(target);
                values.extend(attrs.iter().map(|(_, v)| v));
            }
            Node::SetItem { obj, key, value } => {
                values.extend([obj, key, value]);
            }
            Node::Sequence { items, .. } => values.extend(items.iter()),
            Node::Assign { value, .. } => values.push(value),
        }
        while let Some(value) = values.pop() {
            match value {
                Value::Node(inner) => nodes.push(inner),
                Value::Tuple(items) | Value::List(items) => values.extend(items.iter()),
                Value::Dict(pairs) => {
                    for (k, v) in pairs {
                        values.push(k);
                        values.push(v);
                    }
                }
                _ => {}
            }
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count > 1)
        .map(|(id, _)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Node;
    use pkl_opcodes::op;

    fn legacy(tree: &Rc<Node>) -> Vec<u8> {
        generate(tree, Protocol::Legacy).expect("generation must succeed")
    }

    #[test]
    fn assign_then_load_shares_one_slot() {
        let tree = Node::seq_last(vec![
            Value::Node(Node::assign("x", Value::Int(5)).unwrap()),
            Value::Node(Node::load("x").unwrap()),
        ])
        .unwrap();
        assert_eq!(
            legacy(&tree),
            vec![
                op::PROTO,
                2,
                op::BININT1,
                5,
                op::BINPUT,
                0,
                op::POP,
                op::BINGET,
                0,
                op::STOP,
            ],
        );
    }

    #[test]
    fn load_before_assign_is_a_resolution_error() {
        let tree = Node::load("phantom").unwrap();
        let err = generate(&tree, Protocol::Legacy).expect_err("unassigned load");
        assert_eq!(err.kind, CompileErrorKind::Resolution);
        assert!(err.message.contains("phantom"));
    }

    #[test]
    fn repeated_global_pair_becomes_a_slot_load() {
        let pair = Value::Tuple(vec![
            Value::Node(Node::global("__builtin__", "list")),
            Value::Node(Node::global("__builtin__", "list")),
        ]);
        let out = legacy(&Node::wrap(pair));
        let mut expected = vec![op::PROTO, 2, op::GLOBAL];
        expected.extend_from_slice(b"__builtin__\nlist\n");
        expected.extend_from_slice(&[op::BINPUT, 0, op::BINGET, 0, op::TUPLE2, op::STOP]);
        assert_eq!(out, expected);
    }

    #[test]
    fn uncached_global_is_spelled_out_each_time() {
        let pair = Value::Tuple(vec![
            Value::Node(Node::global_uncached("__builtin__", "list")),
            Value::Node(Node::global_uncached("__builtin__", "list")),
        ]);
        let out = legacy(&Node::wrap(pair));
        let needle: &[u8] = b"list\n";
        let count = out.windows(needle.len()).filter(|w| *w == needle).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn modern_globals_use_the_paired_form() {
        let out = generate(&Node::global("__builtin__", "list"), Protocol::Modern)
            .expect("generation must succeed");
        let mut expected = vec![op::PROTO, 4, op::SHORT_BINUNICODE, 11];
        expected.extend_from_slice(b"__builtin__");
        expected.extend_from_slice(&[op::SHORT_BINUNICODE, 4]);
        expected.extend_from_slice(b"list");
        expected.extend_from_slice(&[op::STACK_GLOBAL, op::BINPUT, 0, op::STOP]);
        assert_eq!(out, expected);
    }

    #[test]
    fn call_emits_callee_argument_tuple_then_reduce() {
        let tree = Node::call(
            Node::global("__builtin__", "int"),
            vec![Value::Str("7".to_string())],
        );
        let mut expected = vec![op::PROTO, 2, op::GLOBAL];
        expected.extend_from_slice(b"__builtin__\nint\n");
        expected.extend_from_slice(&[op::BINPUT, 0, op::BINUNICODE, 1, 0, 0, 0]);
        expected.push(b'7');
        expected.extend_from_slice(&[op::TUPLE1, op::REDUCE, op::STOP]);
        assert_eq!(legacy(&tree), expected);
    }

    #[test]
    fn set_attrs_emits_the_none_marker_pair() {
        let tree = Node::set_attrs(
            Node::call(Node::global("__builtin__", "object"), vec![]),
            vec![("x".to_string(), Value::Int(1))],
        );
        let out = legacy(&tree);
        // The full operand layout: target, None, dict of attrs, TUPLE2, BUILD.
        let mut expected = vec![op::PROTO, 2, op::GLOBAL];
        expected.extend_from_slice(b"__builtin__\nobject\n");
        expected.extend_from_slice(&[
            op::BINPUT,
            0,
            op::EMPTY_TUPLE,
            op::REDUCE,
            op::NONE,
            op::EMPTY_DICT,
            op::MARK,
            op::BINUNICODE,
            1,
            0,
            0,
            0,
            b'x',
            op::BININT1,
            1,
            op::SETITEMS,
            op::TUPLE2,
            op::BUILD,
            op::STOP,
        ]);
        assert_eq!(out, expected);
    }

    #[test]
    fn empty_attr_merge_passes_the_target_through() {
        let target = Node::call(Node::global("__builtin__", "object"), vec![]);
        let merged = Node::set_attrs(target.clone(), vec![]);
        let plain = legacy(&target);
        assert_eq!(legacy(&merged), plain);
    }

    #[test]
    fn sequence_of_three_brackets_the_discarded_operands() {
        let tree = Node::seq_last(vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(
            legacy(&tree),
            vec![
                op::PROTO,
                2,
                op::MARK,
                op::BININT1,
                1,
                op::BININT1,
                2,
                op::POP_MARK,
                op::BININT1,
                3,
                op::STOP,
            ],
        );
    }

    #[test]
    fn first_result_sequence_discards_after_the_kept_operand() {
        let tree = Node::seq_first(vec![Value::Int(1), Value::Int(2)]).unwrap();
        assert_eq!(
            legacy(&tree),
            vec![op::PROTO, 2, op::BININT1, 1, op::BININT1, 2, op::POP, op::STOP],
        );
    }

    #[test]
    fn flattened_sequence_matches_the_flat_spelling() {
        let nested = Node::seq_last(vec![
            Value::Node(Node::seq_last(vec![Value::Int(1), Value::Int(2)]).unwrap()),
            Value::Int(3),
        ])
        .unwrap();
        let flat = Node::seq_last(vec![Value::Int(1), Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(legacy(&nested), legacy(&flat));
    }

    #[test]
    fn shared_subtrees_are_stored_once_and_reloaded() {
        let shared = Node::call(Node::global("__builtin__", "list"), vec![]);
        let tree = Node::wrap(Value::Tuple(vec![
            Value::Node(shared.clone()),
            Value::Node(shared),
        ]));
        let out = legacy(&tree);
        // One spelled-out call, then a BINGET for the second owner.
        assert_eq!(out.iter().filter(|&&b| b == op::REDUCE).count(), 1);
        assert!(out.windows(2).any(|w| w == [op::BINGET, 1].as_slice()));
    }

    #[test]
    fn generation_is_deterministic() {
        let build = || {
            Node::call(
                Node::global("collections", "OrderedDict"),
                vec![Value::List(vec![
                    Value::Tuple(vec![Value::from("a"), Value::Int(1)]),
                    Value::Tuple(vec![Value::from("b"), Value::Int(2)]),
                ])],
            )
        };
        assert_eq!(legacy(&build()), legacy(&build()));
    }

    #[test]
    fn wide_integers_use_the_long_form() {
        let out = legacy(&Node::wrap(Value::Int(1 << 40)));
        assert_eq!(out[2], op::LONG1);
        assert_eq!(out[3], 6);
        assert_eq!(&out[4..10], &[0, 0, 0, 0, 0, 1]);
    }

    #[test]
    fn negative_small_integers_take_the_signed_form() {
        let out = legacy(&Node::wrap(Value::Int(-1)));
        assert_eq!(out[2], op::BININT);
        assert_eq!(&out[3..7], &(-1i32).to_le_bytes());
    }

    #[test]
    fn encode_long_trims_to_minimal_twos_complement() {
        assert_eq!(encode_long(255), vec![0xff, 0x00]);
        assert_eq!(encode_long(-256), vec![0x00, 0xff]);
        assert_eq!(encode_long(1 << 40), vec![0, 0, 0, 0, 0, 1]);
    }
}
