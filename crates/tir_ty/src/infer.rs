//! The inference orchestrator.
//!
//! Lifecycle: construct over an IR function, seed the argument cells (and
//! optionally the return), build one constraint per statement, run the
//! constraint network to a fixed point, then unify: every cell must end up
//! defined and precise, the return type is the join of all `Return`
//! operands, and every recorded call gets its resolved signature.

use std::cell::{Ref, RefCell};
use std::mem;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use la_arena::ArenaMap;
use once_cell::sync::Lazy;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use smol_str::SmolStr;
use tir::{
    Builtin, Callee, DispatcherId, Expr, FuncBody, GeneratorInfo, GlobalVar, IntrinsicOp, Loc,
    RValue, Stmt, StmtId, Value, Var,
};

use crate::{
    callstack::Frame,
    context::TypingContext,
    debug::{InferDebug, NullDebug},
    FunctionKind, GeneratorTy, InferResult, Layout, Signature, Ty, TypingError, TypingErrorKind,
};

use self::constraint::{Callable, Constraint, ConstraintId, ConstraintNetwork};

mod constraint;
mod typevar;

pub use typevar::{TypeVar, TypeVarMap};

/// Cap on chained refinements per cell update. The refinement graph can in
/// principle contain cycles; each step widens some unlocked cell, so the
/// finite lattice bounds real cascades well below this.
const REFINE_DEPTH_CAP: usize = 64;

/// A non-fatal observation recorded while constraints fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub msg: String,
    pub loc: Option<Loc>,
}

/// Dedup-on-push warning collector, scoped by the firing location.
#[derive(Debug, Default)]
struct Warnings {
    scope: Vec<Loc>,
    entries: Vec<Warning>,
}

impl Warnings {
    fn warn(&mut self, msg: String) {
        let warning = Warning { msg, loc: self.scope.last().cloned() };
        if !self.entries.contains(&warning) {
            self.entries.push(warning);
        }
    }
}

// Dispatchers of functions that are mid-compilation and not yet stored as
// global bindings, keyed by function name.
static TEMPORARY_DISPATCHERS: Lazy<Mutex<FxHashMap<SmolStr, DispatcherId>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

fn temporary_dispatchers() -> MutexGuard<'static, FxHashMap<SmolStr, DispatcherId>> {
    TEMPORARY_DISPATCHERS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Register a dispatcher for inference while it is not yet reachable as a
/// global or closure binding (eager compilation). This is what lets a
/// recursive call find the currently-compiling callable. The registration
/// is removed when the returned guard drops, on every exit path.
pub fn register_dispatcher(name: impl Into<SmolStr>, disp: DispatcherId) -> DispatcherRegistration {
    let name = name.into();
    temporary_dispatchers().insert(name.clone(), disp);
    DispatcherRegistration { name }
}

pub struct DispatcherRegistration {
    name: SmolStr,
}

impl Drop for DispatcherRegistration {
    fn drop(&mut self) {
        temporary_dispatchers().remove(&self.name);
    }
}

fn lookup_temporary_dispatcher(name: &str) -> Option<DispatcherId> {
    temporary_dispatchers().get(name).copied()
}

/// Where a refined target type gets pushed back to. Only assignment and
/// attribute constraints register here.
#[derive(Debug, Clone)]
pub(crate) enum Refiner {
    /// `dst = src`: push the refined `dst` type back into `src`.
    Assign { src: SmolStr, loc: Loc },
    /// `target = value.attr`: a refined bound method re-types `value`.
    Attr { value: SmolStr, loc: Loc },
}

/// The result of inference: a precise type per variable, the return type
/// and a signature per call-like instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResult {
    pub type_map: FxHashMap<SmolStr, Ty>,
    pub return_type: Ty,
    pub call_types: ArenaMap<StmtId, Option<Signature>>,
    pub warnings: Vec<Warning>,
}

impl InferenceResult {
    pub fn var_type(&self, name: &str) -> Option<&Ty> {
        self.type_map.get(name)
    }
}

pub struct TypeInferer<'a> {
    ctx: &'a dyn TypingContext,
    body: &'a FuncBody,
    // Shared with the call-stack frame of this inference, so that a
    // recursive call can read our partial return types.
    typevars: Rc<RefCell<TypeVarMap>>,
    constraints: ConstraintNetwork,
    warnings: Warnings,
    /// argument index -> mangled `arg.<name>` cell.
    arg_names: FxHashMap<usize, SmolStr>,
    /// Statements typed under the globals-are-immutable assumption.
    assumed_immutables: FxHashSet<StmtId>,
    /// Call-like statements and the constraint that will type them.
    calls: Vec<(StmtId, ConstraintId)>,
    /// Signatures resolved so far, per constraint; later passes overwrite.
    call_sigs: FxHashMap<ConstraintId, Signature>,
    /// Signatures of build-time-resolved intrinsic callees.
    calltypes: ArenaMap<StmtId, Option<Signature>>,
    refine_map: FxHashMap<SmolStr, Refiner>,
    debug: Box<dyn InferDebug>,
}

impl<'a> TypeInferer<'a> {
    pub fn new(ctx: &'a dyn TypingContext, body: &'a FuncBody) -> TypeInferer<'a> {
        TypeInferer {
            ctx,
            body,
            typevars: Rc::new(RefCell::new(TypeVarMap::default())),
            constraints: ConstraintNetwork::default(),
            warnings: Warnings::default(),
            arg_names: FxHashMap::default(),
            assumed_immutables: FxHashSet::default(),
            calls: Vec::new(),
            call_sigs: FxHashMap::default(),
            calltypes: ArenaMap::default(),
            refine_map: FxHashMap::default(),
            debug: Box::new(NullDebug),
        }
    }

    pub fn with_debug(mut self, debug: Box<dyn InferDebug>) -> TypeInferer<'a> {
        self.debug = debug;
        self
    }

    pub fn typevars(&self) -> Ref<'_, TypeVarMap> {
        self.typevars.borrow()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings.entries
    }

    pub fn assumed_immutables(&self) -> &FxHashSet<StmtId> {
        &self.assumed_immutables
    }

    /// The frame other inferences use to type recursive calls into us.
    pub fn call_frame(&self, args: Vec<Ty>) -> Frame {
        let return_vars = self.body.return_vars().iter().map(|var| var.name.clone()).collect();
        Frame::new(self.body.func, args, Rc::clone(&self.typevars), return_vars)
    }

    fn mangle_arg_name(name: &str) -> SmolStr {
        SmolStr::new(format!("arg.{}", name))
    }

    /// Seed (lock) an argument cell under its mangled name.
    pub fn seed_argument(&mut self, name: &str, index: usize, ty: Ty) -> InferResult<()> {
        let mangled = Self::mangle_arg_name(name);
        self.seed_type(&mangled, ty)?;
        self.arg_names.insert(index, mangled);
        Ok(())
    }

    /// All arguments must be seeded before constraints are built.
    pub fn seed_type(&mut self, name: &str, ty: Ty) -> InferResult<()> {
        self.lock_type(name, ty, None)
    }

    /// Seeding the return type is optional.
    pub fn seed_return(&mut self, ty: Ty) -> InferResult<()> {
        let body = self.body;
        for var in body.return_vars() {
            self.lock_type(&var.name, ty.clone(), None)?;
        }
        Ok(())
    }

    pub fn build_constraints(&mut self) -> InferResult<()> {
        let body = self.body;
        for (id, stmt) in body.iter_stmts() {
            self.constrain_statement(id, stmt)?;
        }
        Ok(())
    }

    /// Repeat constraint propagation until the state token stabilizes.
    /// Since the set of types reachable from the program is finite and
    /// every non-error cell update is a widening, this terminates.
    pub fn propagate(&mut self) -> InferResult<()> {
        let mut newtoken = self.state_token();
        let mut oldtoken: Option<Vec<(SmolStr, Option<Ty>)>> = None;
        let mut errors = Vec::new();
        while oldtoken.as_ref() != Some(&newtoken) {
            self.debug.propagate_started();
            oldtoken = Some(newtoken);
            // Errors can appear while the type sets are incomplete; only
            // the errors of the final, no-progress pass count.
            errors = self.propagate_one_pass();
            newtoken = self.state_token();
            self.debug.propagate_finished(&self.typevars.borrow());
        }
        match errors.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub(crate) fn propagate_one_pass(&mut self) -> Vec<TypingError> {
        let network = mem::take(&mut self.constraints);
        let errors = network.propagate(self);
        self.constraints = network;
        errors
    }

    pub(crate) fn state_token(&self) -> Vec<(SmolStr, Option<Ty>)> {
        self.typevars.borrow().state_token()
    }

    pub(crate) fn ctx(&self) -> &dyn TypingContext {
        self.ctx
    }

    pub(crate) fn push_warning_scope(&mut self, loc: Loc) {
        self.warnings.scope.push(loc);
    }

    pub(crate) fn pop_warning_scope(&mut self) {
        self.warnings.scope.pop();
    }

    pub(crate) fn register_refiner(&mut self, target: SmolStr, refiner: Refiner) {
        self.refine_map.insert(target, refiner);
    }

    pub(crate) fn record_signature(&mut self, id: ConstraintId, sig: Signature) {
        self.call_sigs.insert(id, sig);
    }

    pub(crate) fn current_type(&self, name: &str) -> Option<Ty> {
        self.typevars.borrow_mut().var_mut(name).current().cloned()
    }

    pub(crate) fn candidate_types(&self, name: &str) -> SmallVec<[Ty; 1]> {
        self.typevars.borrow_mut().var_mut(name).get()
    }

    pub(crate) fn add_type(
        &mut self,
        var: &str,
        ty: Ty,
        loc: &Loc,
        unless_locked: bool,
    ) -> InferResult<()> {
        self.add_type_depth(var, ty, loc, unless_locked, 0)
    }

    fn add_type_depth(
        &mut self,
        var: &str,
        ty: Ty,
        loc: &Loc,
        unless_locked: bool,
        depth: usize,
    ) -> InferResult<()> {
        let refined = {
            let mut typevars = self.typevars.borrow_mut();
            let tv = typevars.var_mut(var);
            if unless_locked && tv.is_locked() {
                return Ok(());
            }
            let old = tv.current().cloned();
            let unified = tv.add_type(self.ctx, ty, loc)?;
            if old.as_ref() != Some(&unified) {
                Some(unified)
            } else {
                None
            }
        };
        if let Some(new_ty) = refined {
            self.propagate_refined_depth(var, &new_ty, depth)?;
        }
        Ok(())
    }

    pub(crate) fn lock_type(&mut self, var: &str, ty: Ty, loc: Option<Loc>) -> InferResult<()> {
        self.typevars.borrow_mut().var_mut(var).lock(self.ctx, ty, loc)
    }

    pub(crate) fn copy_type(&mut self, src: &str, dst: &str, loc: &Loc) -> InferResult<()> {
        self.typevars.borrow_mut().union_into(self.ctx, dst, src, loc)
    }

    /// A cell's type just changed; give the constraint registered as its
    /// refiner a chance to push the change back towards its sources.
    pub(crate) fn propagate_refined_type(&mut self, var: &str, ty: &Ty) -> InferResult<()> {
        self.propagate_refined_depth(var, ty, 0)
    }

    fn propagate_refined_depth(&mut self, var: &str, ty: &Ty, depth: usize) -> InferResult<()> {
        if depth > REFINE_DEPTH_CAP {
            self.warnings
                .warn(format!("refinement of '{}' stopped at the cascade depth cap", var));
            return Ok(());
        }
        let refiner = match self.refine_map.get(var) {
            Some(refiner) => refiner.clone(),
            None => return Ok(()),
        };
        self.refine(&refiner, ty, depth)
    }

    fn refine(&mut self, refiner: &Refiner, target_type: &Ty, depth: usize) -> InferResult<()> {
        match refiner {
            // Never back-propagate into locked cells (constants).
            Refiner::Assign { src, loc } => {
                self.add_type_depth(src, target_type.clone(), loc, true, depth + 1)
            }
            Refiner::Attr { value, loc } => {
                if let Ty::BoundFunction { this, .. } = target_type {
                    let recvr = (**this).clone();
                    self.add_type_depth(value, recvr.clone(), loc, false, depth + 1)?;
                    // Chain into the receiver's own refiner.
                    if let Some(next) = self.refine_map.get(value.as_str()).cloned() {
                        self.refine(&next, &recvr, depth + 1)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Resolve a call. Recursive calls are answered from the call stack;
    /// everything else is delegated to the typing context.
    pub(crate) fn resolve_call(
        &self,
        fnty: &Ty,
        pos: &[Ty],
        kws: &[(SmolStr, Ty)],
        loc: &Loc,
    ) -> InferResult<Option<Signature>> {
        if let Ty::RecursiveCall { dispatcher, .. } = fnty {
            let disp = *dispatcher;
            let (args, param_sig) = self.ctx.fold_dispatcher_args(disp, pos, kws)?;
            let func = self.ctx.dispatcher_func(disp);
            let frame = match self.ctx.callstack().match_frame(func, &args) {
                Some(frame) => frame,
                None => {
                    return Err(TypingError::at(
                        TypingErrorKind::Internal,
                        format!("no active inference frame for dispatcher #{}", disp.0),
                        loc.clone(),
                    ));
                }
            };
            // Unify the return types the frame's inference has seen so far.
            let rettypes = frame.defined_return_types();
            if rettypes.is_empty() {
                return Err(TypingError::at(
                    TypingErrorKind::RunawayRecursion,
                    "cannot type infer runaway recursion",
                    loc.clone(),
                ));
            }
            let return_type = self.unify_return_types(&rettypes)?;
            let mut sig = Signature::new(return_type, args);
            sig.param_sig = Some(param_sig);
            Ok(Some(sig))
        } else {
            Ok(self.ctx.resolve_function_type(fnty, pos, kws))
        }
    }

    fn unify_return_types(&self, rettypes: &[Ty]) -> InferResult<Ty> {
        if rettypes.is_empty() {
            // No successful return path.
            return Ok(Ty::None);
        }
        match self.ctx.unify_types(rettypes) {
            Some(unified) if unified.is_precise() => Ok(unified),
            _ => {
                let mut names: Vec<String> = rettypes.iter().map(|ty| ty.to_string()).collect();
                names.sort();
                Err(TypingError::new(
                    TypingErrorKind::UnificationFailed,
                    format!(
                        "Can't unify return type from the following types: {}",
                        names.join(", ")
                    ),
                ))
            }
        }
    }

    // ---- build phase -----------------------------------------------------

    fn constrain_statement(&mut self, id: StmtId, stmt: &Stmt) -> InferResult<()> {
        match stmt {
            Stmt::Assign { target, value, loc } => self.typeof_assign(id, target, value, loc),
            Stmt::SetItem { target, index, value, loc } => {
                let cid = self.constraints.append(Constraint::SetItem {
                    target: target.clone(),
                    index: index.clone(),
                    value: value.clone(),
                    loc: loc.clone(),
                });
                self.calls.push((id, cid));
                Ok(())
            }
            Stmt::StaticSetItem { target, index, index_var, value, loc } => {
                let cid = self.constraints.append(Constraint::StaticSetItem {
                    target: target.clone(),
                    index: index.clone(),
                    index_var: index_var.clone(),
                    value: value.clone(),
                    loc: loc.clone(),
                });
                self.calls.push((id, cid));
                Ok(())
            }
            Stmt::DelItem { target, index, loc } => {
                let cid = self.constraints.append(Constraint::DelItem {
                    target: target.clone(),
                    index: index.clone(),
                    loc: loc.clone(),
                });
                self.calls.push((id, cid));
                Ok(())
            }
            Stmt::SetAttr { target, attr, value, loc } => {
                let cid = self.constraints.append(Constraint::SetAttr {
                    target: target.clone(),
                    attr: attr.clone(),
                    value: value.clone(),
                    loc: loc.clone(),
                });
                self.calls.push((id, cid));
                Ok(())
            }
            Stmt::Print { args, vararg, loc } => {
                let cid = self.constraints.append(Constraint::Print {
                    args: args.clone(),
                    vararg: vararg.clone(),
                    loc: loc.clone(),
                });
                self.calls.push((id, cid));
                Ok(())
            }
            // Control flow and scope management carry no typing content.
            Stmt::Jump { .. }
            | Stmt::Branch { .. }
            | Stmt::Return { .. }
            | Stmt::Del { .. }
            | Stmt::StaticRaise { .. } => Ok(()),
        }
    }

    fn typeof_assign(
        &mut self,
        id: StmtId,
        target: &Var,
        value: &RValue,
        loc: &Loc,
    ) -> InferResult<()> {
        match value {
            RValue::Const(value) => self.typeof_const(target, value, loc),
            RValue::Use(src) => {
                self.constraints.append(Constraint::Propagate {
                    dst: target.name.clone(),
                    src: src.name.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            RValue::Global(gvar) | RValue::FreeVar(gvar) => {
                self.typeof_global(id, target, gvar, loc)
            }
            RValue::Arg { name, .. } => {
                self.constraints.append(Constraint::Arg {
                    dst: target.name.clone(),
                    src: Self::mangle_arg_name(name),
                    loc: loc.clone(),
                });
                Ok(())
            }
            // Sending values into generators is not supported, so a yield
            // expression itself is unit-typed.
            RValue::Yield(_) => self.add_type(&target.name, Ty::None, loc, false),
            RValue::Expr(expr) => self.typeof_expr(id, target, expr, loc),
        }
    }

    fn resolve_value_type(&self, value: &Value, loc: &Loc) -> InferResult<Ty> {
        self.ctx.resolve_value_type(value).ok_or_else(|| {
            TypingError::at(
                TypingErrorKind::Internal,
                format!("cannot determine the type of value {}", value),
                loc.clone(),
            )
        })
    }

    fn typeof_const(&mut self, target: &Var, value: &Value, loc: &Loc) -> InferResult<()> {
        let ty = self.resolve_value_type(value, loc)?;
        self.lock_type(&target.name, ty, Some(loc.clone()))
    }

    fn typeof_global(
        &mut self,
        id: StmtId,
        target: &Var,
        gvar: &GlobalVar,
        loc: &Loc,
    ) -> InferResult<()> {
        let mut ty = match self.ctx.resolve_value_type(&gvar.value) {
            Some(ty) => ty,
            None => {
                // Self-recursion where the dispatcher is not (yet) known as
                // a global binding.
                match lookup_temporary_dispatcher(&gvar.name) {
                    Some(disp) if gvar.name == self.body.name => {
                        cov_mark::hit!(temporary_dispatcher_global);
                        Ty::Dispatcher(disp)
                    }
                    _ => {
                        return Err(TypingError::at(
                            TypingErrorKind::Internal,
                            format!("Untyped global name '{}'", gvar.name),
                            loc.clone(),
                        ));
                    }
                }
            }
        };

        let disp = match &ty {
            Ty::Dispatcher(disp) => Some(*disp),
            _ => None,
        };
        if let Some(disp) = disp {
            if self.ctx.dispatcher_is_compiling(disp) {
                // A call to this global would be recursive; tie the knot
                // through the active inference frame.
                match self.ctx.callstack().findfirst(self.ctx.dispatcher_func(disp)) {
                    Some(frame) => {
                        ty = Ty::RecursiveCall { dispatcher: disp, func: frame.func() };
                    }
                    None => {
                        return Err(TypingError::at(
                            TypingErrorKind::NotImplemented,
                            format!("call to dispatcher #{}: unsupported recursion", disp.0),
                            loc.clone(),
                        ));
                    }
                }
            }
        }

        // A global array is assumed constant.
        ty = match ty {
            Ty::Array { dtype, ndim, .. } => {
                Ty::Array { dtype, ndim, layout: Layout::C, readonly: true }
            }
            other => other,
        };

        self.sentry_modified_builtin(gvar, loc)?;
        self.lock_type(&target.name, ty, Some(loc.clone()))?;
        self.assumed_immutables.insert(id);
        Ok(())
    }

    /// Reject rebinding the builtins the rest of the pipeline relies on.
    fn sentry_modified_builtin(&self, gvar: &GlobalVar, loc: &Loc) -> InferResult<()> {
        let bad = match gvar.name.as_str() {
            "range" | "xrange" => gvar.value != Value::Builtin(Builtin::Range),
            "slice" => gvar.value != Value::Builtin(Builtin::Slice),
            "len" => gvar.value != Value::Builtin(Builtin::Len),
            _ => false,
        };
        if bad {
            return Err(TypingError::at(
                TypingErrorKind::ModifiedBuiltin,
                format!("Modified builtin '{}'", gvar.name),
                loc.clone(),
            ));
        }
        Ok(())
    }

    fn typeof_expr(
        &mut self,
        id: StmtId,
        target: &Var,
        expr: &Expr,
        loc: &Loc,
    ) -> InferResult<()> {
        match expr {
            Expr::Call { func, args, kws, vararg } => match func {
                Callee::Var(func_var) => {
                    let cid = self.constraints.append(Constraint::Call {
                        target: target.name.clone(),
                        func: Callable::Cell(func_var.name.clone()),
                        args: args.clone(),
                        kws: kws.clone(),
                        vararg: vararg.clone(),
                        loc: loc.clone(),
                    });
                    self.calls.push((id, cid));
                    Ok(())
                }
                Callee::Intrinsic(name) => {
                    // The callee already carries its final signature; no
                    // constraint is needed.
                    let sig = self.ctx.resolve_intrinsic(name).ok_or_else(|| {
                        TypingError::at(
                            TypingErrorKind::Internal,
                            format!("unknown intrinsic '{}'", name),
                            loc.clone(),
                        )
                    })?;
                    self.add_type(&target.name, sig.return_type.clone(), loc, false)?;
                    self.calltypes.insert(id, Some(sig));
                    Ok(())
                }
            },
            Expr::GetIter { value } => {
                self.intrinsic_call(id, target, IntrinsicOp::GetIter, vec![value.clone()], loc)
            }
            Expr::IterNext { value } => {
                self.intrinsic_call(id, target, IntrinsicOp::IterNext, vec![value.clone()], loc)
            }
            Expr::ExhaustIter { value, count } => {
                self.constraints.append(Constraint::ExhaustIter {
                    target: target.name.clone(),
                    count: *count,
                    iterator: value.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            Expr::PairFirst { value } => {
                self.constraints.append(Constraint::PairFirst {
                    target: target.name.clone(),
                    pair: value.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            Expr::PairSecond { value } => {
                self.constraints.append(Constraint::PairSecond {
                    target: target.name.clone(),
                    pair: value.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            Expr::Binop { op, lhs, rhs } => self.intrinsic_call(
                id,
                target,
                IntrinsicOp::Binop(*op),
                vec![lhs.clone(), rhs.clone()],
                loc,
            ),
            Expr::InplaceBinop { op, lhs, rhs } => self.intrinsic_call(
                id,
                target,
                IntrinsicOp::InplaceBinop(*op),
                vec![lhs.clone(), rhs.clone()],
                loc,
            ),
            Expr::Unary { op, value } => self.intrinsic_call(
                id,
                target,
                IntrinsicOp::Unary(*op),
                vec![value.clone()],
                loc,
            ),
            Expr::GetItem { value, index } => self.intrinsic_call(
                id,
                target,
                IntrinsicOp::GetItem,
                vec![value.clone(), index.clone()],
                loc,
            ),
            Expr::StaticGetItem { value, index, index_var } => {
                let cid = self.constraints.append(Constraint::StaticGetItem {
                    target: target.name.clone(),
                    value: value.clone(),
                    index: index.clone(),
                    index_var: index_var.clone(),
                    loc: loc.clone(),
                });
                self.calls.push((id, cid));
                Ok(())
            }
            Expr::GetAttr { value, attr } => {
                self.constraints.append(Constraint::GetAttr {
                    target: target.name.clone(),
                    attr: attr.clone(),
                    value: value.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            Expr::BuildTuple { items } => {
                self.constraints.append(Constraint::BuildTuple {
                    target: target.name.clone(),
                    items: items.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            Expr::BuildList { items } => {
                self.constraints.append(Constraint::BuildList {
                    target: target.name.clone(),
                    items: items.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            Expr::BuildSet { items } => {
                self.constraints.append(Constraint::BuildSet {
                    target: target.name.clone(),
                    items: items.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
            Expr::Cast { value } => {
                self.constraints.append(Constraint::Propagate {
                    dst: target.name.clone(),
                    src: value.name.clone(),
                    loc: loc.clone(),
                });
                Ok(())
            }
        }
    }

    fn intrinsic_call(
        &mut self,
        id: StmtId,
        target: &Var,
        op: IntrinsicOp,
        args: Vec<Var>,
        loc: &Loc,
    ) -> InferResult<()> {
        let cid = self.constraints.append(Constraint::Call {
            target: target.name.clone(),
            func: Callable::Known(Ty::Function(FunctionKind::Intrinsic(op))),
            args,
            kws: Vec::new(),
            vararg: None,
            loc: loc.clone(),
        });
        self.calls.push((id, cid));
        Ok(())
    }

    // ---- unify phase -----------------------------------------------------

    /// The final pass: every cell must be defined and precise. Produces the
    /// variable type map, the return (or generator) type and the
    /// call-signature map.
    pub fn unify(&mut self) -> InferResult<InferenceResult> {
        let mut type_map: FxHashMap<SmolStr, Ty> = FxHashMap::default();
        {
            let typevars = self.typevars.borrow();
            let mut names: Vec<SmolStr> = typevars.names().cloned().collect();
            // Check user-visible variables before temporaries so that error
            // messages lead with names the user wrote.
            names.sort_by_key(|name| {
                let temp = !name.chars().next().map_or(false, |c| c.is_alphabetic());
                (temp, name.clone())
            });
            for name in names {
                let ty = match typevars.get(&name).and_then(|tv| tv.current()) {
                    Some(ty) => ty,
                    None => {
                        return Err(TypingError::new(
                            TypingErrorKind::UndefinedVariable,
                            format!("Undefined variable '{}'", name),
                        ));
                    }
                };
                if !ty.is_precise() {
                    return Err(TypingError::new(
                        TypingErrorKind::ImpreciseType,
                        format!("Can't infer type of variable '{}': {}", name, ty),
                    ));
                }
                type_map.insert(name, ty.clone());
            }
        }

        let mut return_type = self.return_type(&type_map)?;
        if let Some(info) = &self.body.generator {
            return_type = self.generator_type(info, &type_map)?;
        }
        let call_types = self.function_types();

        self.debug.unify_finished(&type_map, &return_type, &call_types);

        Ok(InferenceResult {
            type_map,
            return_type,
            call_types,
            warnings: mem::take(&mut self.warnings).entries,
        })
    }

    fn return_type(&self, type_map: &FxHashMap<SmolStr, Ty>) -> InferResult<Ty> {
        let mut rettypes: Vec<Ty> = Vec::new();
        for var in self.body.return_vars() {
            match type_map.get(&var.name) {
                Some(ty) => {
                    if !rettypes.contains(ty) {
                        rettypes.push(ty.clone());
                    }
                }
                None => {
                    return Err(TypingError::new(
                        TypingErrorKind::UndefinedVariable,
                        format!("Undefined variable '{}'", var.name),
                    ));
                }
            }
        }
        self.unify_return_types(&rettypes)
    }

    fn generator_type(
        &self,
        info: &GeneratorInfo,
        type_map: &FxHashMap<SmolStr, Ty>,
    ) -> InferResult<Ty> {
        let mut arg_types = vec![Ty::None; self.arg_names.len()];
        for (&index, name) in &self.arg_names {
            if let (Some(slot), Some(ty)) = (arg_types.get_mut(index), type_map.get(name)) {
                *slot = ty.clone();
            }
        }
        let state_types = info
            .state_vars
            .iter()
            .map(|name| {
                type_map.get(name).cloned().ok_or_else(|| {
                    TypingError::new(
                        TypingErrorKind::UndefinedVariable,
                        format!("Undefined variable '{}'", name),
                    )
                })
            })
            .collect::<InferResult<Vec<Ty>>>()?;

        let mut yield_types: Vec<Ty> = Vec::new();
        for &stmt in &info.yield_points {
            let var = self.body.yield_value(stmt).ok_or_else(|| {
                TypingError::new(
                    TypingErrorKind::Internal,
                    "yield point is not a yield assignment",
                )
            })?;
            match type_map.get(&var.name) {
                Some(ty) => {
                    if !yield_types.contains(ty) {
                        yield_types.push(ty.clone());
                    }
                }
                None => {
                    return Err(TypingError::new(
                        TypingErrorKind::UndefinedVariable,
                        format!("Undefined variable '{}'", var.name),
                    ));
                }
            }
        }
        if yield_types.is_empty() {
            return Err(TypingError::new(
                TypingErrorKind::UnificationFailed,
                "Cannot type generator: it does not yield any value",
            ));
        }
        let yield_type = self.ctx.unify_types(&yield_types).ok_or_else(|| {
            let names: Vec<String> = yield_types.iter().map(|ty| ty.to_string()).collect();
            TypingError::new(
                TypingErrorKind::UnificationFailed,
                format!("Cannot type generator: cannot unify yielded types {}", names.join(", ")),
            )
        })?;

        Ok(Ty::Generator(Box::new(GeneratorTy {
            func: self.body.func,
            yield_type,
            arg_types,
            state_types,
            has_finalizer: true,
        })))
    }

    /// Fill the call-signature map from the recorded call list.
    fn function_types(&mut self) -> ArenaMap<StmtId, Option<Signature>> {
        let mut calltypes = mem::take(&mut self.calltypes);
        for (stmt, cid) in &self.calls {
            calltypes.insert(*stmt, self.call_sigs.get(cid).cloned());
        }
        calltypes
    }
}
