//! A three-address intermediate representation for a statically-typeable
//! subset of a dynamic source language.
//!
//! The IR is deliberately low-level: a function is a set of basic blocks,
//! each a list of statements ending in a terminator. Values flow through
//! named variables; there is no nesting of expressions. Type information
//! never appears here -- the IR stores name-level references only, and the
//! inference layer above resolves them.

pub mod body;
pub mod expr;

use std::fmt;
use std::hash::{Hash, Hasher};

use smol_str::SmolStr;

pub use crate::{
    body::{Block, BlockId, BodyBuilder, FuncBody, GeneratorInfo, StmtId},
    expr::{BinOp, Callee, Expr, GlobalVar, IntrinsicOp, RValue, StaticKey, Stmt, UnaryOp, Var},
};

/// Identity of a source-level function being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub u32);

/// Identity of a compilable callable registered with the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DispatcherId(pub u32);

/// A source location, carried by every IR node for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Loc {
    pub file: SmolStr,
    pub line: u32,
}

impl Loc {
    pub fn new(file: impl Into<SmolStr>, line: u32) -> Loc {
        Loc { file: file.into(), line }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Well-known callables of the source language. Rebinding some of these is
/// rejected by the inference layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Range,
    Len,
    Slice,
    Print,
    Set,
    List,
    Abs,
    Zip,
    Enumerate,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Range => "range",
            Builtin::Len => "len",
            Builtin::Slice => "slice",
            Builtin::Print => "print",
            Builtin::Set => "set",
            Builtin::List => "list",
            Builtin::Abs => "abs",
            Builtin::Zip => "zip",
            Builtin::Enumerate => "enumerate",
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A source-level constant or global value, as seen by the IR builder.
///
/// The typing context resolves these to types; the IR itself only carries
/// them around. `Opaque` stands for a binding whose value could not be
/// captured (for example a global that is not bound yet).
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmolStr),
    Builtin(Builtin),
    Dispatcher(DispatcherId),
    Opaque(SmolStr),
}

// `f64` payloads are compared and hashed by bit pattern so that `Value` can
// key hash maps (NaN == NaN here, which is what identity-of-constant needs).
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Dispatcher(a), Value::Dispatcher(b)) => a == b,
            (Value::Opaque(a), Value::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::None => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Float(x) => x.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Builtin(b) => b.hash(state),
            Value::Dispatcher(d) => d.hash(state),
            Value::Opaque(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Builtin(b) => write!(f, "<builtin {}>", b),
            Value::Dispatcher(d) => write!(f, "<dispatcher #{}>", d.0),
            Value::Opaque(s) => write!(f, "<opaque {}>", s),
        }
    }
}
