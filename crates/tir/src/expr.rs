//! Statements, expressions and operators of the IR.

use std::fmt;

use smol_str::SmolStr;

use crate::{body::BlockId, Loc, Value};

/// A named IR variable together with the location of this particular use.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Var {
    pub name: SmolStr,
    pub loc: Loc,
}

impl Var {
    pub fn new(name: impl Into<SmolStr>, loc: Loc) -> Var {
        Var { name: name.into(), loc }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A global or free-variable binding: the name plus the value it was bound
/// to at function-definition time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalVar {
    pub name: SmolStr,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge)
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
    Invert,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Pos => "+",
            UnaryOp::Not => "not",
            UnaryOp::Invert => "~",
        };
        f.write_str(s)
    }
}

/// The op-name callee of an intrinsic call: iteration protocol, indexing
/// and operators all resolve through the same call machinery, with the op
/// itself standing in for the function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicOp {
    GetIter,
    IterNext,
    GetItem,
    Binop(BinOp),
    InplaceBinop(BinOp),
    Unary(UnaryOp),
}

impl fmt::Display for IntrinsicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntrinsicOp::GetIter => f.write_str("getiter"),
            IntrinsicOp::IterNext => f.write_str("iternext"),
            IntrinsicOp::GetItem => f.write_str("getitem"),
            IntrinsicOp::Binop(op) => write!(f, "{}", op),
            IntrinsicOp::InplaceBinop(op) => write!(f, "{}=", op),
            IntrinsicOp::Unary(op) => write!(f, "{}", op),
        }
    }
}

/// A compile-time-known index, as produced by constant propagation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StaticKey {
    Index(i64),
    Slice { start: Option<i64>, stop: Option<i64>, step: Option<i64> },
    Str(SmolStr),
}

impl fmt::Display for StaticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn part(f: &mut fmt::Formatter<'_>, v: &Option<i64>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{}", v),
                None => Ok(()),
            }
        }
        match self {
            StaticKey::Index(i) => write!(f, "{}", i),
            StaticKey::Slice { start, stop, step } => {
                part(f, start)?;
                f.write_str(":")?;
                part(f, stop)?;
                if step.is_some() {
                    f.write_str(":")?;
                    part(f, step)?;
                }
                Ok(())
            }
            StaticKey::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// The call target of a `call` expression.
///
/// `Intrinsic` is a target injected by an earlier rewrite pass whose
/// signature is already final; only its name is stored here and the typing
/// layer materializes the signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    Var(Var),
    Intrinsic(SmolStr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Call { func: Callee, args: Vec<Var>, kws: Vec<(SmolStr, Var)>, vararg: Option<Var> },
    GetIter { value: Var },
    IterNext { value: Var },
    ExhaustIter { value: Var, count: usize },
    PairFirst { value: Var },
    PairSecond { value: Var },
    Binop { op: BinOp, lhs: Var, rhs: Var },
    InplaceBinop { op: BinOp, lhs: Var, rhs: Var },
    Unary { op: UnaryOp, value: Var },
    GetItem { value: Var, index: Var },
    StaticGetItem { value: Var, index: StaticKey, index_var: Option<Var> },
    GetAttr { value: Var, attr: SmolStr },
    BuildTuple { items: Vec<Var> },
    BuildList { items: Vec<Var> },
    BuildSet { items: Vec<Var> },
    Cast { value: Var },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RValue {
    Const(Value),
    Use(Var),
    Global(GlobalVar),
    FreeVar(GlobalVar),
    Arg { name: SmolStr, index: usize },
    Yield(Var),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Stmt {
    Assign { target: Var, value: RValue, loc: Loc },
    SetItem { target: Var, index: Var, value: Var, loc: Loc },
    StaticSetItem { target: Var, index: StaticKey, index_var: Var, value: Var, loc: Loc },
    DelItem { target: Var, index: Var, loc: Loc },
    SetAttr { target: Var, attr: SmolStr, value: Var, loc: Loc },
    Print { args: Vec<Var>, vararg: Option<Var>, loc: Loc },
    Jump { target: BlockId, loc: Loc },
    Branch { cond: Var, if_true: BlockId, if_false: BlockId, loc: Loc },
    Return { value: Var, loc: Loc },
    Del { name: SmolStr, loc: Loc },
    StaticRaise { exc: Option<SmolStr>, loc: Loc },
}

impl Stmt {
    pub fn loc(&self) -> &Loc {
        match self {
            Stmt::Assign { loc, .. }
            | Stmt::SetItem { loc, .. }
            | Stmt::StaticSetItem { loc, .. }
            | Stmt::DelItem { loc, .. }
            | Stmt::SetAttr { loc, .. }
            | Stmt::Print { loc, .. }
            | Stmt::Jump { loc, .. }
            | Stmt::Branch { loc, .. }
            | Stmt::Return { loc, .. }
            | Stmt::Del { loc, .. }
            | Stmt::StaticRaise { loc, .. } => loc,
        }
    }

    /// Terminators end a block; everything else must be followed by more
    /// statements.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Stmt::Jump { .. } | Stmt::Branch { .. } | Stmt::Return { .. } | Stmt::StaticRaise { .. }
        )
    }
}
