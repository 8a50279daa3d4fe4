//! User-facing rendering of types and signatures, used by diagnostics.

use std::fmt;

use crate::{FunctionKind, Layout, Signature, Ty};

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Layout::C => "C",
            Layout::F => "F",
            Layout::Any => "A",
        };
        f.write_str(s)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Scalar(scalar) => write!(f, "{}", scalar),
            Ty::None => f.write_str("none"),
            Ty::Undefined => f.write_str("undefined"),
            Ty::Omitted(value) => write!(f, "omitted(default={})", value),
            Ty::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str(")")
            }
            Ty::UniTuple { dtype, count } => write!(f, "({} x {})", dtype, count),
            Ty::Pair { first, second } => write!(f, "pair<{}, {}>", first, second),
            Ty::List(elem) => write!(f, "list({})", elem),
            Ty::Set(elem) => write!(f, "set({})", elem),
            Ty::Range(int) => write!(f, "range({})", int),
            Ty::Iter(yield_ty) => write!(f, "iter({})", yield_ty),
            Ty::Function(FunctionKind::Intrinsic(op)) => write!(f, "Function({})", op),
            Ty::Function(FunctionKind::Builtin(b)) => write!(f, "Function({})", b),
            Ty::BoundFunction { method, this } => {
                write!(f, "BoundFunction({} for {})", method, this)
            }
            Ty::Dispatcher(d) => write!(f, "Dispatcher(#{})", d.0),
            Ty::RecursiveCall { dispatcher, .. } => write!(f, "recursive(#{})", dispatcher.0),
            Ty::Array { dtype, ndim, layout, readonly } => {
                let ro = if *readonly { ", readonly" } else { "" };
                write!(f, "array({}, {}d, {}{})", dtype, ndim, layout, ro)
            }
            Ty::Generator(gen) => write!(f, "generator(yield {})", gen.yield_type),
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.return_type)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")
    }
}
