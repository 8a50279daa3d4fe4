//! The typing-context contract: every lattice decision the engine needs is
//! answered through this trait, which keeps the engine independent of the
//! concrete type system it runs against.

use smol_str::SmolStr;
use tir::{DispatcherId, FuncId, StaticKey, Value};

use crate::{callstack::CallStack, InferResult, ParamSig, Signature, Ty};

/// How one type converts into another, from cheapest to most lossy. The
/// engine only cares whether a conversion exists; the rank is recorded for
/// the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Conversion {
    Exact,
    Promote,
    Safe,
    Unsafe,
}

pub trait TypingContext {
    /// The type of a source-level constant or global value. `None` means
    /// the value cannot be typed.
    fn resolve_value_type(&self, value: &Value) -> Option<Ty>;

    /// Resolve a call of `fnty` with the given positional and keyword
    /// argument types. `None` means no overload accepts the arguments.
    fn resolve_function_type(
        &self,
        fnty: &Ty,
        pos: &[Ty],
        kws: &[(SmolStr, Ty)],
    ) -> Option<Signature>;

    /// The already-final signature of an IR-level intrinsic callee.
    fn resolve_intrinsic(&self, name: &str) -> Option<Signature>;

    fn resolve_getattr(&self, ty: &Ty, attr: &str) -> Option<Ty>;

    fn resolve_setattr(&self, ty: &Ty, attr: &str, value: &Ty) -> Option<Signature>;

    fn resolve_setitem(&self, target: &Ty, index: &Ty, value: &Ty) -> Option<Signature>;

    /// Static-index store; implementations usually defer to
    /// [`TypingContext::resolve_setitem`] when they have nothing special.
    fn resolve_static_setitem(
        &self,
        target: &Ty,
        index: &StaticKey,
        value: &Ty,
    ) -> Option<Signature>;

    fn resolve_delitem(&self, target: &Ty, index: &Ty) -> Option<Signature>;

    /// Static-index load. `None` falls back to the dynamic `getitem` path.
    fn resolve_static_getitem(&self, value: &Ty, index: &StaticKey) -> Option<Ty>;

    /// The lattice join of two types; `None` if they have none.
    fn unify_pairs(&self, first: &Ty, second: &Ty) -> Option<Ty>;

    /// The join of a whole sequence; `None` on an empty sequence or a
    /// missing join.
    fn unify_types(&self, tys: &[Ty]) -> Option<Ty> {
        let (head, tail) = match tys.split_first() {
            Some(split) => split,
            None => return None,
        };
        tail.iter().try_fold(head.clone(), |acc, ty| self.unify_pairs(&acc, ty))
    }

    /// Whether `from` converts into `to`, and how.
    fn can_convert(&self, from: &Ty, to: &Ty) -> Option<Conversion>;

    /// A human-readable description of a callable, appended to
    /// invalid-call diagnostics.
    fn explain_function_type(&self, fnty: &Ty) -> String;

    /// The function a dispatcher compiles.
    fn dispatcher_func(&self, disp: DispatcherId) -> FuncId;

    /// Whether the dispatcher is mid-compilation (the recursive-call case).
    fn dispatcher_is_compiling(&self, disp: DispatcherId) -> bool;

    /// Fold positional plus keyword argument types into the dispatcher's
    /// canonical positional form, together with its parameter signature.
    fn fold_dispatcher_args(
        &self,
        disp: DispatcherId,
        pos: &[Ty],
        kws: &[(SmolStr, Ty)],
    ) -> InferResult<(Vec<Ty>, ParamSig)>;

    /// The stack of in-flight inference frames for recursive-call typing.
    fn callstack(&self) -> &CallStack;
}
