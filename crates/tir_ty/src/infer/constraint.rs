//! The constraint network.
//!
//! A constraint is a typed relation between IR variables. Firing one reads
//! the current cells, consults the typing context and widens cells; firing
//! is idempotent at a fixed cell state, so the network can be run over and
//! over until nothing moves. Constraints that cannot make progress yet
//! (some input cell still undefined) simply bail and try again next pass.

use itertools::Itertools;
use la_arena::{Arena, Idx};
use smallvec::SmallVec;
use smol_str::SmolStr;
use tir::{Builtin, IntrinsicOp, Loc, StaticKey, Value, Var};

use crate::{
    infer::{Refiner, TypeInferer},
    FunctionKind, InferResult, Ty, TypingError, TypingErrorKind,
};

pub(crate) type ConstraintId = Idx<Constraint>;

/// How a call constraint finds its callee: through a cell, or as a type
/// known at build time (intrinsic ops).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Callable {
    Cell(SmolStr),
    Known(Ty),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Constraint {
    /// Direct propagation of an assignment `dst = src`.
    Propagate { dst: SmolStr, src: SmolStr, loc: Loc },
    /// `dst = <argument>`, reading the seeded `arg.<name>` cell.
    Arg { dst: SmolStr, src: SmolStr, loc: Loc },
    BuildTuple { target: SmolStr, items: Vec<Var>, loc: Loc },
    BuildList { target: SmolStr, items: Vec<Var>, loc: Loc },
    BuildSet { target: SmolStr, items: Vec<Var>, loc: Loc },
    ExhaustIter { target: SmolStr, count: usize, iterator: Var, loc: Loc },
    PairFirst { target: SmolStr, pair: Var, loc: Loc },
    PairSecond { target: SmolStr, pair: Var, loc: Loc },
    StaticGetItem {
        target: SmolStr,
        value: Var,
        index: StaticKey,
        index_var: Option<Var>,
        loc: Loc,
    },
    Call {
        target: SmolStr,
        func: Callable,
        args: Vec<Var>,
        kws: Vec<(SmolStr, Var)>,
        vararg: Option<Var>,
        loc: Loc,
    },
    GetAttr { target: SmolStr, attr: SmolStr, value: Var, loc: Loc },
    SetItem { target: Var, index: Var, value: Var, loc: Loc },
    StaticSetItem { target: Var, index: StaticKey, index_var: Var, value: Var, loc: Loc },
    DelItem { target: Var, index: Var, loc: Loc },
    SetAttr { target: Var, attr: SmolStr, value: Var, loc: Loc },
    Print { args: Vec<Var>, vararg: Option<Var>, loc: Loc },
}

impl Constraint {
    pub(crate) fn loc(&self) -> &Loc {
        match self {
            Constraint::Propagate { loc, .. }
            | Constraint::Arg { loc, .. }
            | Constraint::BuildTuple { loc, .. }
            | Constraint::BuildList { loc, .. }
            | Constraint::BuildSet { loc, .. }
            | Constraint::ExhaustIter { loc, .. }
            | Constraint::PairFirst { loc, .. }
            | Constraint::PairSecond { loc, .. }
            | Constraint::StaticGetItem { loc, .. }
            | Constraint::Call { loc, .. }
            | Constraint::GetAttr { loc, .. }
            | Constraint::SetItem { loc, .. }
            | Constraint::StaticSetItem { loc, .. }
            | Constraint::DelItem { loc, .. }
            | Constraint::SetAttr { loc, .. }
            | Constraint::Print { loc, .. } => loc,
        }
    }

    /// What to call this constraint in "During: typing of ..." notes.
    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Constraint::Propagate { .. } => "assignment",
            Constraint::Arg { .. } => "argument",
            Constraint::BuildTuple { .. } => "tuple",
            Constraint::BuildList { .. } => "list",
            Constraint::BuildSet { .. } => "set",
            Constraint::ExhaustIter { .. } => "exhaust iter",
            Constraint::PairFirst { .. } => "pair-first",
            Constraint::PairSecond { .. } => "pair-second",
            Constraint::StaticGetItem { .. } => "static-get-item",
            Constraint::Call { func: Callable::Cell(_), .. } => "call",
            Constraint::Call { func: Callable::Known(_), .. } => "intrinsic-call",
            Constraint::GetAttr { .. } => "get attribute",
            Constraint::SetItem { .. } => "setitem",
            Constraint::StaticSetItem { .. } => "static-setitem",
            Constraint::DelItem { .. } => "delitem",
            Constraint::SetAttr { .. } => "set attribute",
            Constraint::Print { .. } => "print",
        }
    }

    pub(crate) fn apply(&self, id: ConstraintId, infer: &mut TypeInferer<'_>) -> InferResult<()> {
        match self {
            Constraint::Propagate { dst, src, loc } => {
                infer.copy_type(src, dst, loc)?;
                // If `dst` is refined later, push the refinement back to us.
                infer.register_refiner(dst.clone(), Refiner::Assign { src: src.clone(), loc: loc.clone() });
                Ok(())
            }
            Constraint::Arg { dst, src, loc } => apply_arg(infer, dst, src, loc),
            Constraint::BuildTuple { target, items, loc } => {
                apply_build_tuple(infer, target, items, loc)
            }
            Constraint::BuildList { target, items, loc } => {
                apply_build_container(infer, target, items, loc, |elem| Ty::List(Box::new(elem)))
            }
            Constraint::BuildSet { target, items, loc } => {
                apply_build_container(infer, target, items, loc, |elem| Ty::Set(Box::new(elem)))
            }
            Constraint::ExhaustIter { target, count, iterator, loc } => {
                apply_exhaust_iter(infer, target, *count, iterator, loc)
            }
            Constraint::PairFirst { target, pair, loc } => {
                for ty in infer.candidate_types(&pair.name) {
                    // Non-pairs are deliberately skipped.
                    if let Ty::Pair { first, .. } = ty {
                        infer.add_type(target, *first, loc, false)?;
                    }
                }
                Ok(())
            }
            Constraint::PairSecond { target, pair, loc } => {
                for ty in infer.candidate_types(&pair.name) {
                    if let Ty::Pair { second, .. } = ty {
                        infer.add_type(target, *second, loc, false)?;
                    }
                }
                Ok(())
            }
            Constraint::StaticGetItem { target, value, index, index_var, loc } => {
                apply_static_getitem(infer, id, target, value, index, index_var.as_ref(), loc)
            }
            Constraint::Call { target, func, args, kws, vararg, loc } => {
                let (fnty, func_cell) = match func {
                    Callable::Cell(name) => match infer.current_type(name) {
                        Some(ty) => (ty, Some(name)),
                        None => {
                            return Err(TypingError::at(
                                TypingErrorKind::Internal,
                                format!("undefined function type for '{}'", name),
                                loc.clone(),
                            ));
                        }
                    },
                    Callable::Known(ty) => (ty.clone(), None),
                };
                resolve_call_like(infer, id, target, &fnty, func_cell, args, kws, vararg.as_ref(), loc)
            }
            Constraint::GetAttr { target, attr, value, loc } => {
                apply_getattr(infer, target, attr, value, loc)
            }
            Constraint::SetItem { target, index, value, loc } => {
                let tys = (
                    infer.current_type(&target.name),
                    infer.current_type(&index.name),
                    infer.current_type(&value.name),
                );
                let (targetty, idxty, valty) = match tys {
                    (Some(t), Some(i), Some(v)) => (t, i, v),
                    _ => return Ok(()),
                };
                match infer.ctx().resolve_setitem(&targetty, &idxty, &valty) {
                    Some(sig) => {
                        infer.record_signature(id, sig);
                        Ok(())
                    }
                    None => Err(TypingError::at(
                        TypingErrorKind::InvalidCall,
                        format!("Cannot resolve setitem: {}[{}] = {}", targetty, idxty, valty),
                        loc.clone(),
                    )),
                }
            }
            Constraint::StaticSetItem { target, index, index_var, value, loc } => {
                let tys = (
                    infer.current_type(&target.name),
                    infer.current_type(&index_var.name),
                    infer.current_type(&value.name),
                );
                let (targetty, idxty, valty) = match tys {
                    (Some(t), Some(i), Some(v)) => (t, i, v),
                    _ => return Ok(()),
                };
                let sig = infer
                    .ctx()
                    .resolve_static_setitem(&targetty, index, &valty)
                    .or_else(|| infer.ctx().resolve_setitem(&targetty, &idxty, &valty));
                match sig {
                    Some(sig) => {
                        infer.record_signature(id, sig);
                        Ok(())
                    }
                    None => Err(TypingError::at(
                        TypingErrorKind::InvalidCall,
                        format!("Cannot resolve setitem: {}[{}] = {}", targetty, index, valty),
                        loc.clone(),
                    )),
                }
            }
            Constraint::DelItem { target, index, loc } => {
                let tys = (infer.current_type(&target.name), infer.current_type(&index.name));
                let (targetty, idxty) = match tys {
                    (Some(t), Some(i)) => (t, i),
                    _ => return Ok(()),
                };
                match infer.ctx().resolve_delitem(&targetty, &idxty) {
                    Some(sig) => {
                        infer.record_signature(id, sig);
                        Ok(())
                    }
                    None => Err(TypingError::at(
                        TypingErrorKind::InvalidCall,
                        format!("Cannot resolve delitem: {}[{}]", targetty, idxty),
                        loc.clone(),
                    )),
                }
            }
            Constraint::SetAttr { target, attr, value, loc } => {
                let tys = (infer.current_type(&target.name), infer.current_type(&value.name));
                let (targetty, valty) = match tys {
                    (Some(t), Some(v)) => (t, v),
                    _ => return Ok(()),
                };
                match infer.ctx().resolve_setattr(&targetty, attr, &valty) {
                    Some(sig) => {
                        infer.record_signature(id, sig);
                        Ok(())
                    }
                    None => Err(TypingError::at(
                        TypingErrorKind::InvalidCall,
                        format!("Cannot resolve setattr: ({}).{} = {}", targetty, attr, valty),
                        loc.clone(),
                    )),
                }
            }
            Constraint::Print { args, vararg, loc } => apply_print(infer, id, args, vararg.as_ref(), loc),
        }
    }
}

fn apply_arg(infer: &mut TypeInferer<'_>, dst: &SmolStr, src: &SmolStr, loc: &Loc) -> InferResult<()> {
    let ty = match infer.current_type(src) {
        Some(ty) => ty,
        None => return Ok(()),
    };
    let ty = match ty {
        Ty::Omitted(value) => {
            cov_mark::hit!(omitted_argument_default);
            match infer.ctx().resolve_value_type(&value) {
                Some(ty) => ty,
                None => {
                    return Err(TypingError::at(
                        TypingErrorKind::Internal,
                        format!("cannot determine the type of default value {}", value),
                        loc.clone(),
                    ));
                }
            }
        }
        other => other,
    };
    infer.add_type(dst, ty, loc, false)
}

fn type_sets(infer: &TypeInferer<'_>, items: &[Var]) -> Vec<SmallVec<[Ty; 1]>> {
    items.iter().map(|item| infer.candidate_types(&item.name)).collect()
}

fn apply_build_tuple(
    infer: &mut TypeInferer<'_>,
    target: &SmolStr,
    items: &[Var],
    loc: &Loc,
) -> InferResult<()> {
    if items.is_empty() {
        return infer.add_type(target, Ty::Tuple(Vec::new()), loc, false);
    }
    let tsets = type_sets(infer, items);
    for vals in tsets.iter().map(|set| set.iter().cloned()).multi_cartesian_product() {
        let homogeneous = vals.windows(2).all(|pair| pair[0] == pair[1]);
        let tup = if homogeneous {
            Ty::UniTuple { dtype: Box::new(vals[0].clone()), count: vals.len() }
        } else {
            Ty::Tuple(vals)
        };
        infer.add_type(target, tup, loc, false)?;
    }
    Ok(())
}

fn apply_build_container(
    infer: &mut TypeInferer<'_>,
    target: &SmolStr,
    items: &[Var],
    loc: &Loc,
    container: fn(Ty) -> Ty,
) -> InferResult<()> {
    if items.is_empty() {
        return infer.add_type(target, container(Ty::Undefined), loc, false);
    }
    let tsets = type_sets(infer, items);
    for tys in tsets.iter().map(|set| set.iter().cloned()).multi_cartesian_product() {
        if let Some(unified) = infer.ctx().unify_types(&tys) {
            infer.add_type(target, container(unified), loc, false)?;
        }
    }
    Ok(())
}

fn apply_exhaust_iter(
    infer: &mut TypeInferer<'_>,
    target: &SmolStr,
    count: usize,
    iterator: &Var,
    loc: &Loc,
) -> InferResult<()> {
    for ty in infer.candidate_types(&iterator.name) {
        if ty.is_base_tuple() {
            let len = ty.tuple_len().unwrap_or(0);
            if len == count {
                infer.add_type(target, ty, loc, false)?;
            } else {
                return Err(TypingError::at(
                    TypingErrorKind::WrongTupleArity,
                    format!(
                        "wrong tuple length for '{}': expected {}, got {}",
                        iterator.name, count, len
                    ),
                    loc.clone(),
                ));
            }
        } else if let Some(yield_ty) = ty.yield_type() {
            cov_mark::hit!(exhaust_iter_over_iterable);
            let tup = Ty::UniTuple { dtype: Box::new(yield_ty), count };
            infer.add_type(target, tup, loc, false)?;
        }
    }
    Ok(())
}

fn apply_static_getitem(
    infer: &mut TypeInferer<'_>,
    id: ConstraintId,
    target: &SmolStr,
    value: &Var,
    index: &StaticKey,
    index_var: Option<&Var>,
    loc: &Loc,
) -> InferResult<()> {
    for ty in infer.candidate_types(&value.name) {
        match infer.ctx().resolve_static_getitem(&ty, index) {
            Some(item) => infer.add_type(target, item, loc, false)?,
            None => {
                if let Some(index_var) = index_var {
                    cov_mark::hit!(static_getitem_fallback);
                    let getitem = Ty::Function(FunctionKind::Intrinsic(IntrinsicOp::GetItem));
                    let args = [value.clone(), index_var.clone()];
                    resolve_call_like(infer, id, target, &getitem, None, &args, &[], None, loc)?;
                }
            }
        }
    }
    Ok(())
}

fn apply_getattr(
    infer: &mut TypeInferer<'_>,
    target: &SmolStr,
    attr: &SmolStr,
    value: &Var,
    loc: &Loc,
) -> InferResult<()> {
    for ty in infer.candidate_types(&value.name) {
        match infer.ctx().resolve_getattr(&ty, attr) {
            Some(attr_ty) => infer.add_type(target, attr_ty, loc, false)?,
            None => {
                return Err(TypingError::at(
                    TypingErrorKind::UntypedAttribute,
                    format!("Unknown attribute '{}' of type {}", attr, ty),
                    loc.clone(),
                ));
            }
        }
    }
    infer.register_refiner(
        target.clone(),
        Refiner::Attr { value: value.name.clone(), loc: loc.clone() },
    );
    Ok(())
}

fn apply_print(
    infer: &mut TypeInferer<'_>,
    id: ConstraintId,
    args: &[Var],
    vararg: Option<&Var>,
    loc: &Loc,
) -> InferResult<()> {
    let folded = fold_arg_vars(infer, args, vararg, &[], loc)?;
    let (pos_args, kw_args) = match folded {
        Some(folded) => folded,
        None => return Ok(()),
    };
    let fnty = match infer.ctx().resolve_value_type(&Value::Builtin(Builtin::Print)) {
        Some(ty) => ty,
        None => {
            return Err(TypingError::at(
                TypingErrorKind::Internal,
                "the print builtin is not typed",
                loc.clone(),
            ));
        }
    };
    if let Some(sig) = infer.resolve_call(&fnty, &pos_args, &kw_args, loc)? {
        infer.record_signature(id, sig);
    }
    Ok(())
}

/// Fold and resolve the argument cells of a call. Returns `None` while any
/// argument is still undefined (the call retries next pass). A `*args`
/// tuple is spliced into the positional arguments.
pub(crate) fn fold_arg_vars(
    infer: &TypeInferer<'_>,
    args: &[Var],
    vararg: Option<&Var>,
    kws: &[(SmolStr, Var)],
    loc: &Loc,
) -> InferResult<Option<(Vec<Ty>, Vec<(SmolStr, Ty)>)>> {
    let n_pos = args.len();
    let mut cells: Vec<&Var> = args.iter().collect();
    cells.extend(kws.iter().map(|(_, var)| var));
    if let Some(vararg) = vararg {
        cells.push(vararg);
    }

    let mut tys: Vec<Ty> = Vec::with_capacity(cells.len());
    for var in cells {
        match infer.current_type(&var.name) {
            Some(ty) => tys.push(ty),
            None => return Ok(None),
        }
    }

    let mut pos_args: Vec<Ty> = tys[..n_pos].to_vec();
    let kw_tys: &[Ty] = if vararg.is_some() {
        let (last, rest) = match tys.split_last() {
            Some(split) => split,
            None => return Ok(None),
        };
        match last.tuple_elements() {
            Some(elems) => pos_args.extend(elems),
            None => {
                return Err(TypingError::at(
                    TypingErrorKind::VarargsNotTuple,
                    format!("*args in function call should be a tuple, got {}", last),
                    loc.clone(),
                ));
            }
        }
        &rest[n_pos..]
    } else {
        &tys[n_pos..]
    };
    let kw_args: Vec<(SmolStr, Ty)> =
        kws.iter().map(|(name, _)| name.clone()).zip(kw_tys.iter().cloned()).collect();
    Ok(Some((pos_args, kw_args)))
}

/// The shared body of call-like constraints: fold arguments, resolve the
/// signature, write the return type, run both refinement rules, and store
/// the signature under the constraint.
fn resolve_call_like(
    infer: &mut TypeInferer<'_>,
    id: ConstraintId,
    target: &SmolStr,
    fnty: &Ty,
    func_cell: Option<&SmolStr>,
    args: &[Var],
    kws: &[(SmolStr, Var)],
    vararg: Option<&Var>,
    loc: &Loc,
) -> InferResult<()> {
    let folded = fold_arg_vars(infer, args, vararg, kws, loc)?;
    let (pos_args, kw_args) = match folded {
        // Cannot resolve the call until all argument types are known.
        Some(folded) => folded,
        None => return Ok(()),
    };

    let mut sig = match infer.resolve_call(fnty, &pos_args, &kw_args, loc)? {
        Some(sig) => sig,
        None => {
            let mut parts: Vec<String> = pos_args.iter().map(|ty| ty.to_string()).collect();
            let mut kw_sorted = kw_args.clone();
            kw_sorted.sort_by(|a, b| a.0.cmp(&b.0));
            parts.extend(kw_sorted.iter().map(|(name, ty)| format!("{}={}", name, ty)));
            let head =
                format!("Invalid usage of {} with parameters ({})", fnty, parts.join(", "));
            let desc = infer.ctx().explain_function_type(fnty);
            return Err(TypingError::at(
                TypingErrorKind::InvalidCall,
                format!("{}\n{}", head, desc),
                loc.clone(),
            ));
        }
    };

    infer.add_type(target, sig.return_type.clone(), loc, false)?;

    // If the callee is a bound method whose receiver the signature refined,
    // push the sharpened receiver back towards its source.
    if let (Ty::BoundFunction { this, .. }, Some(func_cell)) = (fnty, func_cell) {
        if let Some(recvr) = &sig.recvr {
            if recvr != &**this {
                if let Some(refined) = infer.ctx().unify_pairs(recvr, this) {
                    if refined.is_precise() {
                        cov_mark::hit!(bound_method_receiver_refined);
                        if let Some(refined_fnty) = fnty.rebind_receiver(refined) {
                            infer.propagate_refined_type(func_cell, &refined_fnty)?;
                        }
                    }
                }
            }
        }
    }

    // An imprecise return type absorbed by the target's inferred type takes
    // the target's type instead. This is what types
    //     s = set(); s.add(1)
    // as set(int64) rather than set(undefined).
    if !sig.return_type.is_precise() {
        if let Some(target_ty) = infer.current_type(target) {
            if infer.ctx().unify_pairs(&target_ty, &sig.return_type).as_ref() == Some(&target_ty) {
                cov_mark::hit!(imprecise_call_return_refined);
                sig.return_type = target_ty;
            }
        }
    }

    infer.record_signature(id, sig);
    Ok(())
}

/// Insertion-ordered constraint collection; never removes or reorders.
#[derive(Debug, Default)]
pub(crate) struct ConstraintNetwork {
    constraints: Arena<Constraint>,
}

impl ConstraintNetwork {
    pub(crate) fn append(&mut self, constraint: Constraint) -> ConstraintId {
        self.constraints.alloc(constraint)
    }

    /// Fire every constraint once, in order. Recoverable errors are
    /// collected and returned: a failing constraint may just be missing
    /// information that a later pass supplies.
    pub(crate) fn propagate(&self, infer: &mut TypeInferer<'_>) -> Vec<TypingError> {
        let mut errors = Vec::new();
        for (id, constraint) in self.constraints.iter() {
            let loc = constraint.loc().clone();
            infer.push_warning_scope(loc.clone());
            if let Err(err) = constraint.apply(id, infer) {
                errors.push(
                    err.with_context(format!("typing of {} at {}", constraint.describe(), loc)),
                );
            }
            infer.pop_warning_scope();
        }
        errors
    }
}
