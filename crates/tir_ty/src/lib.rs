//! Monotone type inference for the three-address IR, based on the
//! Cartesian Product Algorithm.
//!
//! Every IR variable gets a single cell holding its current type; the cells
//! only ever widen (via the lattice join), so repeated constraint
//! propagation reaches a fixed point. The interesting moving parts:
//!
//! * a constraint network built once from the IR and fired repeatedly until
//!   a state token stops changing;
//! * refinement back-edges that push information learned downstream back to
//!   bound-method receivers and freshly-built empty containers;
//! * a call stack of cooperating inference frames used to type recursive
//!   calls.
//!
//! All lattice decisions (join, convertibility, call resolution) funnel
//! through the [`context::TypingContext`] trait; the engine never takes a
//! type apart except along the distinguished shapes below.

pub mod callstack;
pub mod context;
pub mod debug;
pub mod display;
pub mod infer;
pub mod primitive;

#[cfg(test)]
mod tests;

use smol_str::SmolStr;
use tir::{Builtin, DispatcherId, FuncId, IntrinsicOp, Loc, Value};

use crate::primitive::{IntTy, Scalar};

pub use crate::{
    callstack::{CallStack, Frame, StackGuard},
    context::{Conversion, TypingContext},
    infer::{register_dispatcher, DispatcherRegistration, InferenceResult, TypeInferer, Warning},
};

pub type InferResult<T> = Result<T, TypingError>;

/// Memory layout of a contiguous buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layout {
    C,
    F,
    Any,
}

/// A function type without a receiver: either an op-name intrinsic or a
/// well-known builtin callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionKind {
    Intrinsic(IntrinsicOp),
    Builtin(Builtin),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneratorTy {
    pub func: FuncId,
    pub yield_type: Ty,
    pub arg_types: Vec<Ty>,
    pub state_types: Vec<Ty>,
    pub has_finalizer: bool,
}

/// A concrete inference type.
///
/// The engine treats these as opaque lattice points except for the shapes
/// it matches on by name: tuples, pairs, containers, iterables, bound
/// functions, dispatchers and the `Undefined` bottom.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    Scalar(Scalar),
    /// The unit type.
    None,
    /// Bottom of the container-element lattice; never a final type.
    Undefined,
    /// A defaulted argument; the type is derived from the default value.
    Omitted(Value),
    Tuple(Vec<Ty>),
    UniTuple { dtype: Box<Ty>, count: usize },
    Pair { first: Box<Ty>, second: Box<Ty> },
    List(Box<Ty>),
    Set(Box<Ty>),
    Range(IntTy),
    /// An iterator yielding values of the payload type.
    Iter(Box<Ty>),
    Function(FunctionKind),
    /// A callable carrying an explicit receiver; the receiver itself may be
    /// refined after the fact.
    BoundFunction { method: SmolStr, this: Box<Ty> },
    Dispatcher(DispatcherId),
    /// Placeholder callee for a call to the function currently being
    /// inferred.
    RecursiveCall { dispatcher: DispatcherId, func: FuncId },
    Array { dtype: Box<Ty>, ndim: usize, layout: Layout, readonly: bool },
    Generator(Box<GeneratorTy>),
}

impl Ty {
    pub fn int(int: IntTy) -> Ty {
        Ty::Scalar(Scalar::Int(int))
    }

    pub fn bool() -> Ty {
        Ty::Scalar(Scalar::Bool)
    }

    /// A fully resolved type, fit for code generation. Anything still
    /// containing `Undefined` is not.
    pub fn is_precise(&self) -> bool {
        match self {
            Ty::Undefined => false,
            Ty::Tuple(items) => items.iter().all(Ty::is_precise),
            Ty::UniTuple { dtype, .. } => dtype.is_precise(),
            Ty::Pair { first, second } => first.is_precise() && second.is_precise(),
            Ty::List(elem) | Ty::Set(elem) | Ty::Iter(elem) => elem.is_precise(),
            Ty::BoundFunction { this, .. } => this.is_precise(),
            Ty::Array { dtype, .. } => dtype.is_precise(),
            Ty::Generator(gen) => {
                gen.yield_type.is_precise()
                    && gen.arg_types.iter().all(Ty::is_precise)
                    && gen.state_types.iter().all(Ty::is_precise)
            }
            _ => true,
        }
    }

    pub fn is_base_tuple(&self) -> bool {
        matches!(self, Ty::Tuple(_) | Ty::UniTuple { .. })
    }

    pub fn tuple_len(&self) -> Option<usize> {
        match self {
            Ty::Tuple(items) => Some(items.len()),
            Ty::UniTuple { count, .. } => Some(*count),
            _ => None,
        }
    }

    pub fn tuple_elements(&self) -> Option<Vec<Ty>> {
        match self {
            Ty::Tuple(items) => Some(items.clone()),
            Ty::UniTuple { dtype, count } => Some(vec![(**dtype).clone(); *count]),
            _ => None,
        }
    }

    /// What iterating over this type yields, if it is iterable.
    pub fn yield_type(&self) -> Option<Ty> {
        match self {
            Ty::List(elem) | Ty::Set(elem) => Some((**elem).clone()),
            Ty::Range(int) => Some(Ty::int(*int)),
            Ty::Iter(yield_ty) => Some((**yield_ty).clone()),
            Ty::Array { dtype, ndim: 1, .. } => Some((**dtype).clone()),
            Ty::Generator(gen) => Some(gen.yield_type.clone()),
            _ => None,
        }
    }

    /// For a bound method, the same method rebound to a new receiver.
    pub fn rebind_receiver(&self, this: Ty) -> Option<Ty> {
        match self {
            Ty::BoundFunction { method, .. } => {
                Some(Ty::BoundFunction { method: method.clone(), this: Box::new(this) })
            }
            _ => None,
        }
    }
}

/// Externally supplied parameter-level signature of a callable, used to
/// fold keyword arguments of recursive calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamSig {
    pub params: Vec<SmolStr>,
}

/// A resolved call signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub return_type: Ty,
    pub args: Vec<Ty>,
    /// Present for bound methods whose receiver the callee refined.
    pub recvr: Option<Ty>,
    pub param_sig: Option<ParamSig>,
}

impl Signature {
    pub fn new(return_type: Ty, args: Vec<Ty>) -> Signature {
        Signature { return_type, args, recvr: None, param_sig: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypingErrorKind {
    ConversionForbidden,
    UnificationFailed,
    UndefinedVariable,
    ImpreciseType,
    UntypedAttribute,
    InvalidCall,
    WrongTupleArity,
    VarargsNotTuple,
    RunawayRecursion,
    ModifiedBuiltin,
    NotImplemented,
    Internal,
}

/// A recoverable typing failure, carrying the location it was detected at
/// and the "During: ..." notes accumulated while unwinding out of
/// constraint firings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingError {
    pub kind: TypingErrorKind,
    pub msg: String,
    pub loc: Option<Loc>,
    pub notes: Vec<String>,
}

impl TypingError {
    pub fn new(kind: TypingErrorKind, msg: impl Into<String>) -> TypingError {
        TypingError { kind, msg: msg.into(), loc: None, notes: Vec::new() }
    }

    pub fn at(kind: TypingErrorKind, msg: impl Into<String>, loc: Loc) -> TypingError {
        TypingError { kind, msg: msg.into(), loc: Some(loc), notes: Vec::new() }
    }

    pub fn with_context(mut self, note: impl Into<String>) -> TypingError {
        self.notes.push(note.into());
        self
    }
}

impl std::fmt::Display for TypingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.msg)?;
        if let Some(loc) = &self.loc {
            write!(f, " at {}", loc)?;
        }
        for note in &self.notes {
            write!(f, "\nDuring: {}", note)?;
        }
        Ok(())
    }
}

impl std::error::Error for TypingError {}
