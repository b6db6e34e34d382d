//! Shared wire-contract constants for the pickle virtual machine.
//!
//! These constants are the single source of truth for the byte-level
//! instruction set the compiler emits and the stream passes re-scan. The
//! replay side of this contract is the host runtime's unpickler; it is not
//! implemented here.

pub const PKLC_REPORT_SCHEMA_VERSION: &str = "pklc.report@0.1.0";

/// Wire-encoding dialect, selected by the caller per compilation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Protocol 2 framing: text `GLOBAL`, py2-era byte-string opcodes.
    Legacy,
    /// Protocol 4 framing: `STACK_GLOBAL`, short unicode, `BINBYTES`.
    Modern,
}

impl Protocol {
    pub fn version(self) -> u8 {
        match self {
            Protocol::Legacy => 2,
            Protocol::Modern => 4,
        }
    }

    /// Whether global references use the paired two-string form.
    pub fn has_stack_global(self) -> bool {
        matches!(self, Protocol::Modern)
    }
}

// One module per opcode family keeps call sites readable: `op::REDUCE`.
pub mod op {
    // Framing.
    pub const PROTO: u8 = 0x80;
    pub const STOP: u8 = b'.';
    pub const FRAME: u8 = 0x95;

    // Stack bookkeeping.
    pub const MARK: u8 = b'(';
    pub const POP: u8 = b'0';
    pub const POP_MARK: u8 = b'1';
    pub const DUP: u8 = b'2';

    // Scalars.
    pub const NONE: u8 = b'N';
    pub const NEWTRUE: u8 = 0x88;
    pub const NEWFALSE: u8 = 0x89;
    pub const INT: u8 = b'I';
    pub const BININT: u8 = b'J';
    pub const BININT1: u8 = b'K';
    pub const BININT2: u8 = b'M';
    pub const LONG: u8 = b'L';
    pub const LONG1: u8 = 0x8a;
    pub const LONG4: u8 = 0x8b;
    pub const FLOAT: u8 = b'F';
    pub const BINFLOAT: u8 = b'G';

    // Strings and bytes.
    pub const STRING: u8 = b'S';
    pub const BINSTRING: u8 = b'T';
    pub const SHORT_BINSTRING: u8 = b'U';
    pub const UNICODE: u8 = b'V';
    pub const BINUNICODE: u8 = b'X';
    pub const SHORT_BINUNICODE: u8 = 0x8c;
    pub const BINUNICODE8: u8 = 0x8d;
    pub const BINBYTES: u8 = b'B';
    pub const SHORT_BINBYTES: u8 = b'C';
    pub const BINBYTES8: u8 = 0x8e;
    pub const BYTEARRAY8: u8 = 0x96;

    // Containers.
    pub const EMPTY_TUPLE: u8 = b')';
    pub const TUPLE: u8 = b't';
    pub const TUPLE1: u8 = 0x85;
    pub const TUPLE2: u8 = 0x86;
    pub const TUPLE3: u8 = 0x87;
    pub const EMPTY_LIST: u8 = b']';
    pub const LIST: u8 = b'l';
    pub const APPEND: u8 = b'a';
    pub const APPENDS: u8 = b'e';
    pub const EMPTY_DICT: u8 = b'}';
    pub const DICT: u8 = b'd';
    pub const SETITEM: u8 = b's';
    pub const SETITEMS: u8 = b'u';
    pub const EMPTY_SET: u8 = 0x8f;
    pub const ADDITEMS: u8 = 0x90;
    pub const FROZENSET: u8 = 0x91;

    // Machine operations.
    pub const GLOBAL: u8 = b'c';
    pub const STACK_GLOBAL: u8 = 0x93;
    pub const REDUCE: u8 = b'R';
    pub const BUILD: u8 = b'b';
    pub const INST: u8 = b'i';
    pub const OBJ: u8 = b'o';
    pub const NEWOBJ: u8 = 0x81;
    pub const NEWOBJ_EX: u8 = 0x92;
    pub const PERSID: u8 = b'P';
    pub const BINPERSID: u8 = b'Q';
    pub const EXT1: u8 = 0x82;
    pub const EXT2: u8 = 0x83;
    pub const EXT4: u8 = 0x84;

    // Memo slots.
    pub const GET: u8 = b'g';
    pub const BINGET: u8 = b'h';
    pub const LONG_BINGET: u8 = b'j';
    pub const PUT: u8 = b'p';
    pub const BINPUT: u8 = b'q';
    pub const LONG_BINPUT: u8 = b'r';
    pub const MEMOIZE: u8 = 0x94;

    // Protocol 5 out-of-band buffers.
    pub const NEXT_BUFFER: u8 = 0x97;
    pub const READONLY_BUFFER: u8 = 0x98;
}

/// Shape of the operand bytes following an opcode.
///
/// This is what a stream pass needs to walk an instruction stream without
/// understanding the instructions it copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    None,
    U8,
    U16Le,
    I32Le,
    U32Le,
    U64Le,
    F64Be,
    /// Decimal digits (optionally signed) terminated by `\n`.
    DecimalNl,
    /// One arbitrary text field terminated by `\n`.
    StringNl,
    /// Two `\n`-terminated text fields back to back.
    StringNl2,
    /// u8 byte count followed by that many payload bytes.
    BytesU8,
    /// u32 le byte count followed by that many payload bytes.
    BytesU32,
    /// u64 le byte count followed by that many payload bytes.
    BytesU64,
}

/// Operand shape for every instruction in the contract, `None` for bytes
/// that are not opcodes of any supported protocol.
pub fn arg_shape(opcode: u8) -> Option<ArgShape> {
    use ArgShape::*;
    Some(match opcode {
        op::PROTO => U8,
        op::FRAME => U64Le,
        op::STOP
        | op::MARK
        | op::POP
        | op::POP_MARK
        | op::DUP
        | op::NONE
        | op::NEWTRUE
        | op::NEWFALSE
        | op::EMPTY_TUPLE
        | op::TUPLE
        | op::TUPLE1
        | op::TUPLE2
        | op::TUPLE3
        | op::EMPTY_LIST
        | op::LIST
        | op::APPEND
        | op::APPENDS
        | op::EMPTY_DICT
        | op::DICT
        | op::SETITEM
        | op::SETITEMS
        | op::EMPTY_SET
        | op::ADDITEMS
        | op::FROZENSET
        | op::STACK_GLOBAL
        | op::REDUCE
        | op::BUILD
        | op::OBJ
        | op::NEWOBJ
        | op::NEWOBJ_EX
        | op::BINPERSID
        | op::MEMOIZE
        | op::NEXT_BUFFER
        | op::READONLY_BUFFER => None,
        op::BININT => I32Le,
        op::BININT1 => U8,
        op::BININT2 => U16Le,
        op::BINFLOAT => F64Be,
        op::INT | op::LONG | op::FLOAT | op::GET | op::PUT => DecimalNl,
        op::STRING | op::UNICODE | op::PERSID => StringNl,
        op::GLOBAL | op::INST => StringNl2,
        op::LONG1 | op::SHORT_BINSTRING | op::SHORT_BINUNICODE | op::SHORT_BINBYTES => BytesU8,
        op::LONG4 | op::BINSTRING | op::BINUNICODE | op::BINBYTES => BytesU32,
        op::BINUNICODE8 | op::BINBYTES8 | op::BYTEARRAY8 => BytesU64,
        op::BINGET | op::BINPUT => U8,
        op::LONG_BINGET | op::LONG_BINPUT => U32Le,
        op::EXT1 => U8,
        op::EXT2 => U16Le,
        op::EXT4 => I32Le,
        _ => return Option::None,
    })
}
