//! Reference replayer for integration tests: a small stack machine covering
//! exactly the opcode subset the compiler emits, plus models of the handful
//! of host capabilities the tests reference. This is test support, not a
//! host runtime.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::ZlibDecoder;
use pkl_opcodes::op;

#[derive(Debug, Clone, PartialEq)]
pub enum PyVal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<PyVal>),
    List(Vec<PyVal>),
    Dict(Vec<(PyVal, PyVal)>),
    /// An unresolved host object, by name pair.
    Global(String, String),
}

pub fn replay(stream: &[u8]) -> Result<PyVal, String> {
    Machine::default().run(stream)
}

#[derive(Default)]
struct Machine {
    stack: Vec<PyVal>,
    marks: Vec<usize>,
    memo: HashMap<u32, PyVal>,
}

impl Machine {
    fn pop(&mut self) -> Result<PyVal, String> {
        self.stack.pop().ok_or_else(|| "stack underflow".to_string())
    }

    fn run(&mut self, stream: &[u8]) -> Result<PyVal, String> {
        let mut pos = 0;
        while pos < stream.len() {
            let opcode = stream[pos];
            pos += 1;
            match opcode {
                op::PROTO => pos += 1,
                op::STOP => return self.pop(),
                op::NONE => self.stack.push(PyVal::None),
                op::NEWTRUE => self.stack.push(PyVal::Bool(true)),
                op::NEWFALSE => self.stack.push(PyVal::Bool(false)),
                op::BININT1 => {
                    self.stack.push(PyVal::Int(stream[pos] as i64));
                    pos += 1;
                }
                op::BININT2 => {
                    let raw = [stream[pos], stream[pos + 1]];
                    self.stack.push(PyVal::Int(u16::from_le_bytes(raw) as i64));
                    pos += 2;
                }
                op::BININT => {
                    let raw: [u8; 4] = stream[pos..pos + 4].try_into().unwrap();
                    self.stack.push(PyVal::Int(i32::from_le_bytes(raw) as i64));
                    pos += 4;
                }
                op::LONG1 => {
                    let count = stream[pos] as usize;
                    pos += 1;
                    if count > 8 {
                        return Err("long literal wider than 8 bytes".to_string());
                    }
                    let chunk = &stream[pos..pos + count];
                    pos += count;
                    let negative = chunk.last().is_some_and(|&b| b & 0x80 != 0);
                    let mut raw = [if negative { 0xff } else { 0x00 }; 8];
                    raw[..count].copy_from_slice(chunk);
                    self.stack.push(PyVal::Int(i64::from_le_bytes(raw)));
                }
                op::BINFLOAT => {
                    let raw: [u8; 8] = stream[pos..pos + 8].try_into().unwrap();
                    self.stack.push(PyVal::Float(f64::from_be_bytes(raw)));
                    pos += 8;
                }
                op::BINUNICODE => {
                    let len = read_u32(stream, pos) as usize;
                    pos += 4;
                    let text = std::str::from_utf8(&stream[pos..pos + len])
                        .map_err(|e| e.to_string())?;
                    self.stack.push(PyVal::Str(text.to_string()));
                    pos += len;
                }
                op::SHORT_BINUNICODE => {
                    let len = stream[pos] as usize;
                    pos += 1;
                    let text = std::str::from_utf8(&stream[pos..pos + len])
                        .map_err(|e| e.to_string())?;
                    self.stack.push(PyVal::Str(text.to_string()));
                    pos += len;
                }
                op::SHORT_BINSTRING | op::SHORT_BINBYTES => {
                    let len = stream[pos] as usize;
                    pos += 1;
                    self.stack
                        .push(PyVal::Bytes(stream[pos..pos + len].to_vec()));
                    pos += len;
                }
                op::BINSTRING | op::BINBYTES => {
                    let len = read_u32(stream, pos) as usize;
                    pos += 4;
                    self.stack
                        .push(PyVal::Bytes(stream[pos..pos + len].to_vec()));
                    pos += len;
                }
                op::EMPTY_TUPLE => self.stack.push(PyVal::Tuple(Vec::new())),
                op::TUPLE1 | op::TUPLE2 | op::TUPLE3 => {
                    let n = (opcode - op::TUPLE1) as usize + 1;
                    let items = self.stack.split_off(self.stack.len() - n);
                    self.stack.push(PyVal::Tuple(items));
                }
                op::TUPLE => {
                    let mark = self.pop_mark()?;
                    let items = self.stack.split_off(mark);
                    self.stack.push(PyVal::Tuple(items));
                }
                op::EMPTY_LIST => self.stack.push(PyVal::List(Vec::new())),
                op::APPENDS => {
                    let mark = self.pop_mark()?;
                    let items = self.stack.split_off(mark);
                    match self.stack.last_mut() {
                        Some(PyVal::List(list)) => list.extend(items),
                        other => return Err(format!("APPENDS onto {other:?}")),
                    }
                }
                op::EMPTY_DICT => self.stack.push(PyVal::Dict(Vec::new())),
                op::SETITEMS => {
                    let mark = self.pop_mark()?;
                    let items = self.stack.split_off(mark);
                    match self.stack.last_mut() {
                        Some(PyVal::Dict(dict)) => {
                            let mut iter = items.into_iter();
                            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                                dict.push((k, v));
                            }
                        }
                        other => return Err(format!("SETITEMS onto {other:?}")),
                    }
                }
                op::MARK => self.marks.push(self.stack.len()),
                op::POP => {
                    self.pop()?;
                }
                op::POP_MARK => {
                    let mark = self.pop_mark()?;
                    self.stack.truncate(mark);
                }
                op::SETITEM => {
                    let value = self.pop()?;
                    let key = self.pop()?;
                    match self.stack.last_mut() {
                        Some(PyVal::Dict(dict)) => {
                            if let Some(pair) = dict.iter_mut().find(|(k, _)| *k == key) {
                                pair.1 = value;
                            } else {
                                dict.push((key, value));
                            }
                        }
                        Some(PyVal::List(list)) => {
                            let PyVal::Int(index) = key else {
                                return Err("list index must be an int".to_string());
                            };
                            list[index as usize] = value;
                        }
                        other => return Err(format!("SETITEM onto {other:?}")),
                    }
                }
                op::GLOBAL => {
                    let (module, next) = read_line(stream, pos)?;
                    let (name, next) = read_line(stream, next)?;
                    pos = next;
                    self.stack.push(PyVal::Global(module, name));
                }
                op::STACK_GLOBAL => {
                    let name = self.pop()?;
                    let module = self.pop()?;
                    let (PyVal::Str(module), PyVal::Str(name)) = (module, name) else {
                        return Err("STACK_GLOBAL needs two strings".to_string());
                    };
                    self.stack.push(PyVal::Global(module, name));
                }
                op::REDUCE => {
                    let args = match self.pop()? {
                        PyVal::Tuple(args) => args,
                        other => return Err(format!("REDUCE args must be a tuple, got {other:?}")),
                    };
                    let callee = self.pop()?;
                    let PyVal::Global(module, name) = callee else {
                        return Err(format!("REDUCE of a non-capability callee {callee:?}"));
                    };
                    let result = apply(&module, &name, args)?;
                    self.stack.push(result);
                }
                op::BUILD => {
                    // Attribute state is not modeled structurally; the
                    // target object passes through.
                    self.pop()?;
                }
                op::BINGET => {
                    let slot = stream[pos] as u32;
                    pos += 1;
                    self.push_memo(slot)?;
                }
                op::LONG_BINGET => {
                    let slot = read_u32(stream, pos);
                    pos += 4;
                    self.push_memo(slot)?;
                }
                op::BINPUT => {
                    let slot = stream[pos] as u32;
                    pos += 1;
                    self.store_memo(slot)?;
                }
                op::LONG_BINPUT => {
                    let slot = read_u32(stream, pos);
                    pos += 4;
                    self.store_memo(slot)?;
                }
                other => return Err(format!("replayer does not model opcode {other:#04x}")),
            }
        }
        Err("stream ended without STOP".to_string())
    }

    fn pop_mark(&mut self) -> Result<usize, String> {
        self.marks
            .pop()
            .ok_or_else(|| "no mark on the stack".to_string())
    }

    fn push_memo(&mut self, slot: u32) -> Result<(), String> {
        let value = self
            .memo
            .get(&slot)
            .cloned()
            .ok_or_else(|| format!("memo slot {slot} read before store"))?;
        self.stack.push(value);
        Ok(())
    }

    fn store_memo(&mut self, slot: u32) -> Result<(), String> {
        let value = self
            .stack
            .last()
            .cloned()
            .ok_or_else(|| "memo store on an empty stack".to_string())?;
        self.memo.insert(slot, value);
        Ok(())
    }
}

fn read_u32(stream: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes(stream[pos..pos + 4].try_into().unwrap())
}

fn read_line(stream: &[u8], pos: usize) -> Result<(String, usize), String> {
    let end = stream[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| "unterminated text field".to_string())?;
    let text = std::str::from_utf8(&stream[pos..pos + end]).map_err(|e| e.to_string())?;
    Ok((text.to_string(), pos + end + 1))
}

fn truthy(value: &PyVal) -> bool {
    match value {
        PyVal::None => false,
        PyVal::Bool(b) => *b,
        PyVal::Int(n) => *n != 0,
        PyVal::Float(x) => *x != 0.0,
        PyVal::Str(s) => !s.is_empty(),
        PyVal::Bytes(b) => !b.is_empty(),
        PyVal::Tuple(items) | PyVal::List(items) => !items.is_empty(),
        PyVal::Dict(pairs) => !pairs.is_empty(),
        PyVal::Global(..) => true,
    }
}

fn apply(module: &str, name: &str, args: Vec<PyVal>) -> Result<PyVal, String> {
    match (module, name) {
        ("operator", opname) => apply_operator(opname, args),
        ("__builtin__", "bool") => Ok(PyVal::Bool(truthy(&args[0]))),
        ("__builtin__", "int") => match &args[0] {
            PyVal::Bool(b) => Ok(PyVal::Int(*b as i64)),
            PyVal::Int(n) => Ok(PyVal::Int(*n)),
            PyVal::Str(s) => s
                .parse::<i64>()
                .map(PyVal::Int)
                .map_err(|e| e.to_string()),
            other => Err(format!("int() of {other:?}")),
        },
        ("__builtin__", "list") => match args.into_iter().next() {
            None => Ok(PyVal::List(Vec::new())),
            Some(PyVal::Tuple(items)) | Some(PyVal::List(items)) => Ok(PyVal::List(items)),
            Some(other) => Err(format!("list() of {other:?}")),
        },
        ("__builtin__", "tuple") => match args.into_iter().next() {
            None => Ok(PyVal::Tuple(Vec::new())),
            Some(PyVal::Tuple(items)) | Some(PyVal::List(items)) => Ok(PyVal::Tuple(items)),
            Some(other) => Err(format!("tuple() of {other:?}")),
        },
        ("zlib", "decompress") => match args.into_iter().next() {
            Some(PyVal::Bytes(payload)) => {
                let mut out = Vec::new();
                ZlibDecoder::new(payload.as_slice())
                    .read_to_end(&mut out)
                    .map_err(|e| e.to_string())?;
                Ok(PyVal::Bytes(out))
            }
            other => Err(format!("decompress of {other:?}")),
        },
        ("pickle", "loads") => match args.into_iter().next() {
            Some(PyVal::Bytes(payload)) => replay(&payload),
            other => Err(format!("loads of {other:?}")),
        },
        _ => Err(format!("replayer has no model for {module}.{name}")),
    }
}

fn apply_operator(opname: &str, args: Vec<PyVal>) -> Result<PyVal, String> {
    let int_pair = || match (&args[0], &args[1]) {
        (PyVal::Int(a), PyVal::Int(b)) => Ok((*a, *b)),
        (a, b) => Err(format!("operator.{opname} of ({a:?}, {b:?})")),
    };
    match opname {
        "add" => match (&args[0], &args[1]) {
            (PyVal::Int(a), PyVal::Int(b)) => Ok(PyVal::Int(a + b)),
            (PyVal::Str(a), PyVal::Str(b)) => Ok(PyVal::Str(format!("{a}{b}"))),
            (a, b) => Err(format!("operator.add of ({a:?}, {b:?})")),
        },
        "sub" => int_pair().map(|(a, b)| PyVal::Int(a - b)),
        "mul" => int_pair().map(|(a, b)| PyVal::Int(a * b)),
        "floordiv" => int_pair().map(|(a, b)| PyVal::Int(a.div_euclid(b))),
        "mod" => int_pair().map(|(a, b)| PyVal::Int(a.rem_euclid(b))),
        "truediv" => int_pair().map(|(a, b)| PyVal::Float(a as f64 / b as f64)),
        "eq" => Ok(PyVal::Bool(args[0] == args[1])),
        "ne" => Ok(PyVal::Bool(args[0] != args[1])),
        "lt" => int_pair().map(|(a, b)| PyVal::Bool(a < b)),
        "le" => int_pair().map(|(a, b)| PyVal::Bool(a <= b)),
        "gt" => int_pair().map(|(a, b)| PyVal::Bool(a > b)),
        "ge" => int_pair().map(|(a, b)| PyVal::Bool(a >= b)),
        "not_" => Ok(PyVal::Bool(!truthy(&args[0]))),
        "neg" => match &args[0] {
            PyVal::Int(n) => Ok(PyVal::Int(-n)),
            other => Err(format!("operator.neg of {other:?}")),
        },
        "contains" => match &args[0] {
            PyVal::Tuple(items) | PyVal::List(items) => {
                Ok(PyVal::Bool(items.contains(&args[1])))
            }
            other => Err(format!("operator.contains of {other:?}")),
        },
        "getitem" => match (&args[0], &args[1]) {
            (PyVal::Tuple(items), PyVal::Int(i)) | (PyVal::List(items), PyVal::Int(i)) => items
                .get(*i as usize)
                .cloned()
                .ok_or_else(|| format!("index {i} out of range")),
            (PyVal::Dict(pairs), key) => pairs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| format!("key {key:?} not found")),
            (a, b) => Err(format!("operator.getitem of ({a:?}, {b:?})")),
        },
        _ => Err(format!("replayer has no model for operator.{opname}")),
    }
}
