//! Lexer and parser for the restricted source subset the transpiler accepts:
//! simple statements (assignment, expression, import, global, del) and an
//! expression grammar with the usual precedence ladder. Compound block
//! statements are deliberately not part of the grammar; the target machine
//! has no control flow to lower them onto.

use crate::error::{CompileErrorKind, CompilerError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semi,
    Dot,
    Assign,
    Newline,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    LShift,
    RShift,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    KwImport,
    KwFrom,
    KwAs,
    KwGlobal,
    KwDel,
    KwIf,
    KwElse,
    KwAnd,
    KwOr,
    KwNot,
    KwIn,
    KwIs,
    KwNone,
    KwTrue,
    KwFalse,
    Eof,
}

impl Tok {
    fn describe(&self) -> String {
        match self {
            Tok::Name(n) => format!("name `{n}`"),
            Tok::Int(v) => format!("integer {v}"),
            Tok::Float(v) => format!("float {v}"),
            Tok::Str(_) => "string literal".to_string(),
            Tok::Newline => "end of line".to_string(),
            Tok::Eof => "end of input".to_string(),
            other => format!("{other:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitAnd,
    BitOr,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Pos,
    Invert,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn as_str(self) -> &'static str {
        match self {
            BoolOp::And => "and",
            BoolOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Is,
    IsNot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    NoneLit,
    True,
    False,
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    Attribute {
        value: Box<Expr>,
        name: String,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Cond {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    Bool {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        rights: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign {
        target: Expr,
        value: Expr,
        line: u32,
    },
    Expr {
        value: Expr,
        line: u32,
    },
    Import {
        module: String,
        alias: Option<String>,
        line: u32,
    },
    ImportFrom {
        module: String,
        names: Vec<(String, Option<String>)>,
        line: u32,
    },
    Global {
        names: Vec<String>,
        line: u32,
    },
    Del {
        target: Expr,
        line: u32,
    },
}

impl Stmt {
    pub fn line(&self) -> u32 {
        match self {
            Stmt::Assign { line, .. }
            | Stmt::Expr { line, .. }
            | Stmt::Import { line, .. }
            | Stmt::ImportFrom { line, .. }
            | Stmt::Global { line, .. }
            | Stmt::Del { line, .. } => *line,
        }
    }
}

fn parse_err(line: u32, message: impl std::fmt::Display) -> CompilerError {
    CompilerError::new(CompileErrorKind::Parse, format!("line {line}: {message}"))
}

// --- lexer ---

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
    line: u32,
    depth: u32,
}

fn keyword(name: &str) -> Option<Tok> {
    Some(match name {
        "import" => Tok::KwImport,
        "from" => Tok::KwFrom,
        "as" => Tok::KwAs,
        "global" => Tok::KwGlobal,
        "del" => Tok::KwDel,
        "if" => Tok::KwIf,
        "else" => Tok::KwElse,
        "and" => Tok::KwAnd,
        "or" => Tok::KwOr,
        "not" => Tok::KwNot,
        "in" => Tok::KwIn,
        "is" => Tok::KwIs,
        "None" => Tok::KwNone,
        "True" => Tok::KwTrue,
        "False" => Tok::KwFalse,
        _ => return None,
    })
}

pub fn tokenize(src: &str) -> Result<Vec<(Tok, u32)>> {
    let mut lexer = Lexer {
        src: src.as_bytes(),
        pos: 0,
        line: 1,
        depth: 0,
    };
    let mut out = Vec::new();
    while let Some(tok) = lexer.next_token()? {
        // Collapse runs of blank lines and bracket-continuation newlines.
        if tok == Tok::Newline
            && matches!(out.last(), None | Some((Tok::Newline, _)) | Some((Tok::Semi, _)))
        {
            continue;
        }
        out.push((tok, lexer.line));
    }
    out.push((Tok::Eof, lexer.line));
    Ok(out)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn next_token(&mut self) -> Result<Option<Tok>> {
        loop {
            match self.peek() {
                None => return Ok(None),
                Some(b' ') | Some(b'\t') | Some(b'\r') => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    while let Some(b) = self.peek() {
                        if b == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'\\') if self.peek2() == Some(b'\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                    if self.depth == 0 {
                        return Ok(Some(Tok::Newline));
                    }
                }
                Some(_) => break,
            }
        }
        let b = self.peek().expect("loop leaves a byte");
        if b.is_ascii_digit() || (b == b'.' && self.peek2().is_some_and(|c| c.is_ascii_digit())) {
            return self.number().map(Some);
        }
        if b == b'_' || b.is_ascii_alphabetic() {
            let start = self.pos;
            while self
                .peek()
                .is_some_and(|c| c == b'_' || c.is_ascii_alphanumeric())
            {
                self.pos += 1;
            }
            let name = std::str::from_utf8(&self.src[start..self.pos])
                .expect("identifier bytes are ASCII")
                .to_string();
            return Ok(Some(keyword(&name).unwrap_or(Tok::Name(name))));
        }
        if b == b'\'' || b == b'"' {
            return self.string(b).map(Some);
        }
        self.pos += 1;
        let tok = match b {
            b'(' => {
                self.depth += 1;
                Tok::LParen
            }
            b')' => {
                self.depth = self.depth.saturating_sub(1);
                Tok::RParen
            }
            b'[' => {
                self.depth += 1;
                Tok::LBracket
            }
            b']' => {
                self.depth = self.depth.saturating_sub(1);
                Tok::RBracket
            }
            b'{' => {
                self.depth += 1;
                Tok::LBrace
            }
            b'}' => {
                self.depth = self.depth.saturating_sub(1);
                Tok::RBrace
            }
            b',' => Tok::Comma,
            b':' => Tok::Colon,
            b';' => Tok::Semi,
            b'.' => Tok::Dot,
            b'~' => Tok::Tilde,
            b'%' => Tok::Percent,
            b'&' => Tok::Amp,
            b'|' => Tok::Pipe,
            b'^' => Tok::Caret,
            b'+' => Tok::Plus,
            b'-' => Tok::Minus,
            b'*' => {
                if self.peek() == Some(b'*') {
                    self.pos += 1;
                    Tok::DoubleStar
                } else {
                    Tok::Star
                }
            }
            b'/' => {
                if self.peek() == Some(b'/') {
                    self.pos += 1;
                    Tok::DoubleSlash
                } else {
                    Tok::Slash
                }
            }
            b'<' => match self.peek() {
                Some(b'<') => {
                    self.pos += 1;
                    Tok::LShift
                }
                Some(b'=') => {
                    self.pos += 1;
                    Tok::Le
                }
                _ => Tok::Lt,
            },
            b'>' => match self.peek() {
                Some(b'>') => {
                    self.pos += 1;
                    Tok::RShift
                }
                Some(b'=') => {
                    self.pos += 1;
                    Tok::Ge
                }
                _ => Tok::Gt,
            },
            b'=' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Tok::EqEq
                } else {
                    Tok::Assign
                }
            }
            b'!' => {
                if self.peek() == Some(b'=') {
                    self.pos += 1;
                    Tok::NotEq
                } else {
                    return Err(parse_err(self.line, "stray `!`"));
                }
            }
            other => {
                return Err(parse_err(
                    self.line,
                    format!("unexpected character {:?}", other as char),
                ));
            }
        };
        Ok(Some(tok))
    }

    fn number(&mut self) -> Result<Tok> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek2(), Some(b'x') | Some(b'X')) {
            self.pos += 2;
            let digits = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            let text = std::str::from_utf8(&self.src[digits..self.pos]).expect("hex digits");
            return i64::from_str_radix(text, 16)
                .map(Tok::Int)
                .map_err(|_| parse_err(self.line, format!("hex literal out of range: 0x{text}")));
        }
        let mut is_float = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !is_float => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).expect("number bytes");
        if is_float {
            text.parse::<f64>()
                .map(Tok::Float)
                .map_err(|_| parse_err(self.line, format!("bad float literal: {text}")))
        } else {
            text.parse::<i64>()
                .map(Tok::Int)
                .map_err(|_| parse_err(self.line, format!("integer literal out of range: {text}")))
        }
    }

    fn string(&mut self, quote: u8) -> Result<Tok> {
        let line = self.line;
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    return Err(parse_err(line, "unterminated string literal"));
                }
                Some(b) if b == quote => break,
                Some(b'\\') => {
                    let esc = self
                        .bump()
                        .ok_or_else(|| parse_err(line, "unterminated string literal"))?;
                    match esc {
                        b'n' => out.push('\n'),
                        b't' => out.push('\t'),
                        b'r' => out.push('\r'),
                        b'0' => out.push('\0'),
                        b'\\' => out.push('\\'),
                        b'\'' => out.push('\''),
                        b'"' => out.push('"'),
                        b'\n' => self.line += 1,
                        b'x' => {
                            let hi = self.bump();
                            let lo = self.bump();
                            let (Some(hi), Some(lo)) = (hi, lo) else {
                                return Err(parse_err(line, "truncated \\x escape"));
                            };
                            let text = [hi, lo];
                            let text = std::str::from_utf8(&text)
                                .ok()
                                .and_then(|s| u8::from_str_radix(s, 16).ok())
                                .ok_or_else(|| parse_err(line, "bad \\x escape"))?;
                            out.push(text as char);
                        }
                        other => {
                            return Err(parse_err(
                                line,
                                format!("unknown escape \\{}", other as char),
                            ));
                        }
                    }
                }
                Some(b) => out.push(b as char),
            }
        }
        Ok(Tok::Str(out))
    }
}

// --- parser ---

pub fn parse_program(src: &str) -> Result<Vec<Stmt>> {
    let toks = tokenize(src)?;
    let mut parser = Parser { toks, pos: 0 };
    let mut stmts = Vec::new();
    loop {
        while matches!(parser.peek(), Tok::Newline | Tok::Semi) {
            parser.pos += 1;
        }
        if *parser.peek() == Tok::Eof {
            break;
        }
        stmts.push(parser.statement()?);
        match parser.peek() {
            Tok::Newline | Tok::Semi => parser.pos += 1,
            Tok::Eof => {}
            other => {
                let line = parser.line();
                return Err(parse_err(
                    line,
                    format!("expected end of statement, found {}", other.describe()),
                ));
            }
        }
    }
    Ok(stmts)
}

struct Parser {
    toks: Vec<(Tok, u32)>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].0
    }

    fn line(&self) -> u32 {
        self.toks[self.pos].1
    }

    fn bump(&mut self) -> Tok {
        let tok = self.toks[self.pos].0.clone();
        if self.pos < self.toks.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, want: &Tok) -> bool {
        if self.peek() == want {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, want: Tok, what: &str) -> Result<()> {
        if self.eat(&want) {
            Ok(())
        } else {
            Err(parse_err(
                self.line(),
                format!("expected {what}, found {}", self.peek().describe()),
            ))
        }
    }

    fn name(&mut self, what: &str) -> Result<String> {
        match self.bump() {
            Tok::Name(n) => Ok(n),
            other => Err(parse_err(
                self.line(),
                format!("expected {what}, found {}", other.describe()),
            )),
        }
    }

    fn statement(&mut self) -> Result<Stmt> {
        let line = self.line();
        match self.peek() {
            Tok::KwImport => {
                self.bump();
                let module = self.dotted_name()?;
                let alias = if self.eat(&Tok::KwAs) {
                    Some(self.name("alias name")?)
                } else {
                    None
                };
                Ok(Stmt::Import {
                    module,
                    alias,
                    line,
                })
            }
            Tok::KwFrom => {
                self.bump();
                let module = self.dotted_name()?;
                self.expect(Tok::KwImport, "`import`")?;
                let mut names = Vec::new();
                loop {
                    let name = self.name("imported name")?;
                    let alias = if self.eat(&Tok::KwAs) {
                        Some(self.name("alias name")?)
                    } else {
                        None
                    };
                    names.push((name, alias));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                Ok(Stmt::ImportFrom {
                    module,
                    names,
                    line,
                })
            }
            Tok::KwGlobal => {
                self.bump();
                let mut names = vec![self.name("variable name")?];
                while self.eat(&Tok::Comma) {
                    names.push(self.name("variable name")?);
                }
                Ok(Stmt::Global { names, line })
            }
            Tok::KwDel => {
                self.bump();
                let target = self.expression()?;
                Ok(Stmt::Del { target, line })
            }
            _ => {
                let first = self.expression()?;
                if self.eat(&Tok::Assign) {
                    let value = self.expression()?;
                    if *self.peek() == Tok::Assign {
                        return Err(parse_err(line, "chained assignment is not supported"));
                    }
                    match first {
                        Expr::Name(_) | Expr::Attribute { .. } | Expr::Subscript { .. } => {
                            Ok(Stmt::Assign {
                                target: first,
                                value,
                                line,
                            })
                        }
                        _ => Err(parse_err(line, "cannot assign to this expression")),
                    }
                } else {
                    Ok(Stmt::Expr { value: first, line })
                }
            }
        }
    }

    fn dotted_name(&mut self) -> Result<String> {
        let mut out = self.name("module name")?;
        while self.eat(&Tok::Dot) {
            out.push('.');
            out.push_str(&self.name("module name")?);
        }
        Ok(out)
    }

    fn expression(&mut self) -> Result<Expr> {
        let value = self.or_expr()?;
        if self.eat(&Tok::KwIf) {
            let test = self.or_expr()?;
            self.expect(Tok::KwElse, "`else`")?;
            let orelse = self.expression()?;
            return Ok(Expr::Cond {
                test: Box::new(test),
                body: Box::new(value),
                orelse: Box::new(orelse),
            });
        }
        Ok(value)
    }

    fn or_expr(&mut self) -> Result<Expr> {
        let first = self.and_expr()?;
        if *self.peek() != Tok::KwOr {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::KwOr) {
            values.push(self.and_expr()?);
        }
        Ok(Expr::Bool {
            op: BoolOp::Or,
            values,
        })
    }

    fn and_expr(&mut self) -> Result<Expr> {
        let first = self.not_expr()?;
        if *self.peek() != Tok::KwAnd {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat(&Tok::KwAnd) {
            values.push(self.not_expr()?);
        }
        Ok(Expr::Bool {
            op: BoolOp::And,
            values,
        })
    }

    fn not_expr(&mut self) -> Result<Expr> {
        if self.eat(&Tok::KwNot) {
            let operand = self.not_expr()?;
            return Ok(Expr::Unary {
                op: UnOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr> {
        let left = self.bit_or()?;
        let mut ops = Vec::new();
        let mut rights = Vec::new();
        loop {
            let op = match self.peek() {
                Tok::EqEq => CmpOp::Eq,
                Tok::NotEq => CmpOp::Ne,
                Tok::Lt => CmpOp::Lt,
                Tok::Le => CmpOp::Le,
                Tok::Gt => CmpOp::Gt,
                Tok::Ge => CmpOp::Ge,
                Tok::KwIn => CmpOp::In,
                Tok::KwIs => {
                    self.bump();
                    let op = if self.eat(&Tok::KwNot) {
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    };
                    ops.push(op);
                    rights.push(self.bit_or()?);
                    continue;
                }
                Tok::KwNot => {
                    self.bump();
                    self.expect(Tok::KwIn, "`in` after `not`")?;
                    ops.push(CmpOp::NotIn);
                    rights.push(self.bit_or()?);
                    continue;
                }
                _ => break,
            };
            self.bump();
            ops.push(op);
            rights.push(self.bit_or()?);
        }
        if ops.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                ops,
                rights,
            })
        }
    }

    fn bit_or(&mut self) -> Result<Expr> {
        let mut left = self.bit_xor()?;
        while self.eat(&Tok::Pipe) {
            let right = self.bit_xor()?;
            left = binary(BinOp::BitOr, left, right);
        }
        Ok(left)
    }

    fn bit_xor(&mut self) -> Result<Expr> {
        let mut left = self.bit_and()?;
        while self.eat(&Tok::Caret) {
            let right = self.bit_and()?;
            left = binary(BinOp::BitXor, left, right);
        }
        Ok(left)
    }

    fn bit_and(&mut self) -> Result<Expr> {
        let mut left = self.shift()?;
        while self.eat(&Tok::Amp) {
            let right = self.shift()?;
            left = binary(BinOp::BitAnd, left, right);
        }
        Ok(left)
    }

    fn shift(&mut self) -> Result<Expr> {
        let mut left = self.arith()?;
        loop {
            let op = match self.peek() {
                Tok::LShift => BinOp::LShift,
                Tok::RShift => BinOp::RShift,
                _ => break,
            };
            self.bump();
            let right = self.arith()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn arith(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        loop {
            let op = match self.peek() {
                Tok::Plus => BinOp::Add,
                Tok::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let right = self.term()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;
        loop {
            let op = match self.peek() {
                Tok::Star => BinOp::Mul,
                Tok::Slash => BinOp::Div,
                Tok::DoubleSlash => BinOp::FloorDiv,
                Tok::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let right = self.factor()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Tok::Minus => UnOp::Neg,
            Tok::Plus => UnOp::Pos,
            Tok::Tilde => UnOp::Invert,
            _ => return self.power(),
        };
        self.bump();
        let operand = self.factor()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.postfix()?;
        if self.eat(&Tok::DoubleStar) {
            let exp = self.factor()?;
            return Ok(binary(BinOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr> {
        let mut value = self.atom()?;
        loop {
            match self.peek() {
                Tok::Dot => {
                    self.bump();
                    let name = self.name("attribute name")?;
                    value = Expr::Attribute {
                        value: Box::new(value),
                        name,
                    };
                }
                Tok::LBracket => {
                    self.bump();
                    let index = self.expression()?;
                    self.expect(Tok::RBracket, "`]`")?;
                    value = Expr::Subscript {
                        value: Box::new(value),
                        index: Box::new(index),
                    };
                }
                Tok::LParen => {
                    self.bump();
                    let (args, kwargs) = self.call_args()?;
                    value = Expr::Call {
                        func: Box::new(value),
                        args,
                        kwargs,
                    };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Tok::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            // A name directly followed by `=` is a keyword argument. It is
            // parsed so lowering can reject it by kind.
            if let Tok::Name(name) = self.peek().clone() {
                if self.toks[self.pos + 1].0 == Tok::Assign {
                    self.bump();
                    self.bump();
                    let value = self.expression()?;
                    kwargs.push((name, value));
                    if self.eat(&Tok::Comma) {
                        continue;
                    }
                    break;
                }
            }
            args.push(self.expression()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen, "`)`")?;
        Ok((args, kwargs))
    }

    fn atom(&mut self) -> Result<Expr> {
        let line = self.line();
        match self.bump() {
            Tok::Name(n) => Ok(Expr::Name(n)),
            Tok::Int(v) => Ok(Expr::Int(v)),
            Tok::Float(v) => Ok(Expr::Float(v)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::KwNone => Ok(Expr::NoneLit),
            Tok::KwTrue => Ok(Expr::True),
            Tok::KwFalse => Ok(Expr::False),
            Tok::LParen => {
                if self.eat(&Tok::RParen) {
                    return Ok(Expr::Tuple(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat(&Tok::Comma) {
                    let mut items = vec![first];
                    while *self.peek() != Tok::RParen {
                        items.push(self.expression()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(Tok::RParen, "`)`")?;
                    Ok(Expr::Tuple(items))
                } else {
                    self.expect(Tok::RParen, "`)`")?;
                    Ok(first)
                }
            }
            Tok::LBracket => {
                let items = self.expr_list(Tok::RBracket)?;
                Ok(Expr::List(items))
            }
            Tok::LBrace => {
                if self.eat(&Tok::RBrace) {
                    return Ok(Expr::Dict(Vec::new()));
                }
                let first = self.expression()?;
                if self.eat(&Tok::Colon) {
                    let value = self.expression()?;
                    let mut pairs = vec![(first, value)];
                    while self.eat(&Tok::Comma) {
                        if *self.peek() == Tok::RBrace {
                            break;
                        }
                        let key = self.expression()?;
                        self.expect(Tok::Colon, "`:`")?;
                        let value = self.expression()?;
                        pairs.push((key, value));
                    }
                    self.expect(Tok::RBrace, "`}`")?;
                    Ok(Expr::Dict(pairs))
                } else {
                    let mut items = vec![first];
                    while self.eat(&Tok::Comma) {
                        if *self.peek() == Tok::RBrace {
                            break;
                        }
                        items.push(self.expression()?);
                    }
                    self.expect(Tok::RBrace, "`}`")?;
                    Ok(Expr::Set(items))
                }
            }
            other => Err(parse_err(
                line,
                format!("expected an expression, found {}", other.describe()),
            )),
        }
    }

    fn expr_list(&mut self, close: Tok) -> Result<Vec<Expr>> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression()?);
            if !self.eat(&Tok::Comma) {
                break;
            }
            if *self.peek() == close {
                break;
            }
        }
        self.expect(close, "closing bracket")?;
        Ok(items)
    }
}

fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
