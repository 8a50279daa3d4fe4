//! Engine tests against the fixture context in `ctx`.


use expect_test::expect;
use smol_str::SmolStr;
use tir::{
    BinOp, BlockId, BodyBuilder, Builtin, Callee, Expr, FuncBody, FuncId, GeneratorInfo,
    GlobalVar, Loc, RValue, StaticKey, Stmt, StmtId, Value, Var,
};

use crate::{
    context::TypingContext,
    infer::{register_dispatcher, TypeInferer, TypeVar, TypeVarMap},
    primitive::{FloatTy, IntTy, Scalar},
    tests::ctx::TestContext,
    GeneratorTy, InferResult, InferenceResult, Signature, Ty, TypingErrorKind,
};

fn loc(line: u32) -> Loc {
    Loc::new("<test>", line)
}

/// A variable use; the location does not matter for operands.
fn u(name: &str) -> Var {
    Var::new(name, loc(0))
}

fn i64t() -> Ty {
    Ty::int(IntTy::I64)
}

fn f64t() -> Ty {
    Ty::Scalar(Scalar::Float(FloatTy::F64))
}

fn cint(value: i64) -> RValue {
    RValue::Const(Value::Int(value))
}

fn cfloat(value: f64) -> RValue {
    RValue::Const(Value::Float(value))
}

fn cnone() -> RValue {
    RValue::Const(Value::None)
}

fn use_(name: &str) -> RValue {
    RValue::Use(u(name))
}

fn arg(name: &str, index: usize) -> RValue {
    RValue::Arg { name: SmolStr::new(name), index }
}

fn global(name: &str, value: Value) -> RValue {
    RValue::Global(GlobalVar { name: SmolStr::new(name), value })
}

fn binop(op: BinOp, lhs: &str, rhs: &str) -> RValue {
    RValue::Expr(Expr::Binop { op, lhs: u(lhs), rhs: u(rhs) })
}

fn call(func: &str, args: &[&str]) -> RValue {
    RValue::Expr(Expr::Call {
        func: Callee::Var(u(func)),
        args: args.iter().map(|&a| u(a)).collect(),
        kws: Vec::new(),
        vararg: None,
    })
}

fn call_vararg(func: &str, args: &[&str], vararg: &str) -> RValue {
    RValue::Expr(Expr::Call {
        func: Callee::Var(u(func)),
        args: args.iter().map(|&a| u(a)).collect(),
        kws: Vec::new(),
        vararg: Some(u(vararg)),
    })
}

fn call_intrinsic(name: &str, args: &[&str]) -> RValue {
    RValue::Expr(Expr::Call {
        func: Callee::Intrinsic(SmolStr::new(name)),
        args: args.iter().map(|&a| u(a)).collect(),
        kws: Vec::new(),
        vararg: None,
    })
}

fn getattr(value: &str, attr: &str) -> RValue {
    RValue::Expr(Expr::GetAttr { value: u(value), attr: SmolStr::new(attr) })
}

fn build_tuple(items: &[&str]) -> RValue {
    RValue::Expr(Expr::BuildTuple { items: items.iter().map(|&i| u(i)).collect() })
}

fn build_list(items: &[&str]) -> RValue {
    RValue::Expr(Expr::BuildList { items: items.iter().map(|&i| u(i)).collect() })
}

fn build_set(items: &[&str]) -> RValue {
    RValue::Expr(Expr::BuildSet { items: items.iter().map(|&i| u(i)).collect() })
}

fn exhaust(value: &str, count: usize) -> RValue {
    RValue::Expr(Expr::ExhaustIter { value: u(value), count })
}

fn static_getitem(value: &str, index: i64, index_var: Option<&str>) -> RValue {
    RValue::Expr(Expr::StaticGetItem {
        value: u(value),
        index: StaticKey::Index(index),
        index_var: index_var.map(u),
    })
}

fn getiter(value: &str) -> RValue {
    RValue::Expr(Expr::GetIter { value: u(value) })
}

fn iternext(value: &str) -> RValue {
    RValue::Expr(Expr::IterNext { value: u(value) })
}

fn pair_first(value: &str) -> RValue {
    RValue::Expr(Expr::PairFirst { value: u(value) })
}

fn pair_second(value: &str) -> RValue {
    RValue::Expr(Expr::PairSecond { value: u(value) })
}

/// Incremental body builder keeping a current block and a line counter.
struct Prog {
    builder: BodyBuilder,
    block: BlockId,
    line: u32,
}

impl Prog {
    fn new(name: &str) -> Prog {
        Prog::with_func(name, FuncId(0))
    }

    fn with_func(name: &str, func: FuncId) -> Prog {
        let mut builder = BodyBuilder::new(name, func);
        let block = builder.block();
        Prog { builder, block, line: 0 }
    }

    fn add_block(&mut self) -> BlockId {
        self.builder.block()
    }

    fn switch(&mut self, block: BlockId) {
        self.block = block;
    }

    fn next_loc(&mut self) -> Loc {
        self.line += 1;
        loc(self.line)
    }

    fn assign(&mut self, target: &str, value: RValue) -> StmtId {
        let l = self.next_loc();
        let target = Var::new(target, l.clone());
        self.builder.push(self.block, Stmt::Assign { target, value, loc: l })
    }

    fn setitem(&mut self, target: &str, index: &str, value: &str) -> StmtId {
        let l = self.next_loc();
        self.builder.push(
            self.block,
            Stmt::SetItem { target: u(target), index: u(index), value: u(value), loc: l },
        )
    }

    fn static_setitem(&mut self, target: &str, index: i64, index_var: &str, value: &str) -> StmtId {
        let l = self.next_loc();
        self.builder.push(
            self.block,
            Stmt::StaticSetItem {
                target: u(target),
                index: StaticKey::Index(index),
                index_var: u(index_var),
                value: u(value),
                loc: l,
            },
        )
    }

    fn delitem(&mut self, target: &str, index: &str) -> StmtId {
        let l = self.next_loc();
        self.builder
            .push(self.block, Stmt::DelItem { target: u(target), index: u(index), loc: l })
    }

    fn print(&mut self, args: &[&str]) -> StmtId {
        let l = self.next_loc();
        self.builder.push(
            self.block,
            Stmt::Print { args: args.iter().map(|&a| u(a)).collect(), vararg: None, loc: l },
        )
    }

    fn jump(&mut self, target: BlockId) -> StmtId {
        let l = self.next_loc();
        self.builder.push(self.block, Stmt::Jump { target, loc: l })
    }

    fn branch(&mut self, cond: &str, if_true: BlockId, if_false: BlockId) -> StmtId {
        let l = self.next_loc();
        self.builder.push(self.block, Stmt::Branch { cond: u(cond), if_true, if_false, loc: l })
    }

    fn ret(&mut self, name: &str) -> StmtId {
        let l = self.next_loc();
        self.builder.push(self.block, Stmt::Return { value: u(name), loc: l })
    }

    fn finish(self) -> FuncBody {
        self.builder.finish()
    }

    fn finish_generator(mut self, state_vars: &[&str], yield_points: Vec<StmtId>) -> FuncBody {
        self.builder.set_generator(GeneratorInfo {
            state_vars: state_vars.iter().map(|&v| SmolStr::new(v)).collect(),
            yield_points,
        });
        self.builder.finish()
    }
}

fn try_infer(
    ctx: &TestContext,
    body: &FuncBody,
    args: &[(&str, Ty)],
) -> InferResult<InferenceResult> {
    let mut inferer = TypeInferer::new(ctx, body);
    for (index, (name, ty)) in args.iter().enumerate() {
        inferer.seed_argument(name, index, ty.clone())?;
    }
    inferer.build_constraints()?;
    inferer.propagate()?;
    inferer.unify()
}

fn check_infer(ctx: &TestContext, body: &FuncBody, args: &[(&str, Ty)]) -> InferenceResult {
    try_infer(ctx, body, args).expect("inference failed")
}

#[test]
fn add_two_constants() {
    let mut p = Prog::new("add");
    p.assign("x", cint(1));
    p.assign("y", cint(2));
    let z = p.assign("z", binop(BinOp::Add, "x", "y"));
    p.ret("z");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[]);
    assert_eq!(result.var_type("x"), Some(&i64t()));
    assert_eq!(result.var_type("y"), Some(&i64t()));
    assert_eq!(result.var_type("z"), Some(&i64t()));
    assert_eq!(result.return_type, i64t());
    let sig = result.call_types.get(z).and_then(|sig| sig.as_ref()).expect("binop signature");
    assert_eq!(sig.return_type, i64t());
}

#[test]
fn argument_chain() {
    let mut p = Prog::new("chain");
    p.assign("n", arg("n", 0));
    p.assign("m", use_("n"));
    p.ret("m");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("n", i64t())]);
    assert_eq!(result.var_type("m"), Some(&i64t()));
    assert_eq!(result.return_type, i64t());
}

#[test]
fn float_promotion() {
    let mut p = Prog::new("promote");
    p.assign("x", cint(1));
    p.assign("y", cfloat(1.5));
    p.assign("z", binop(BinOp::Add, "x", "y"));
    p.ret("z");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[]);
    assert_eq!(result.var_type("z"), Some(&f64t()));
    assert_eq!(result.return_type, f64t());
}

#[test]
fn set_constructor_is_refined_by_add() {
    cov_mark::check!(imprecise_call_return_refined);
    cov_mark::check!(bound_method_receiver_refined);

    let mut p = Prog::new("mkset");
    p.assign("$f", global("set", Value::Builtin(Builtin::Set)));
    let mkset = p.assign("s", call("$f", &[]));
    p.assign("$m", getattr("s", "add"));
    p.assign("$one", cint(1));
    p.assign("$t", call("$m", &["$one"]));
    p.ret("s");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[]);
    let set_int = Ty::Set(Box::new(i64t()));
    assert_eq!(result.var_type("s"), Some(&set_int));
    assert_eq!(result.return_type, set_int);
    assert_eq!(
        result.var_type("$m"),
        Some(&Ty::BoundFunction { method: SmolStr::new("set.add"), this: Box::new(set_int.clone()) })
    );
    // The `set()` call itself must be typed as returning set(int64), not
    // set(undefined).
    let sig = result.call_types.get(mkset).and_then(|sig| sig.as_ref()).expect("set() signature");
    assert_eq!(sig.return_type, set_int);
}

#[test]
fn list_constructor_is_refined_by_append() {
    let mut p = Prog::new("mklist");
    p.assign("$f", global("list", Value::Builtin(Builtin::List)));
    p.assign("l", call("$f", &[]));
    p.assign("$m", getattr("l", "append"));
    p.assign("$x", cfloat(2.5));
    p.assign("$t", call("$m", &["$x"]));
    p.ret("l");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[]);
    assert_eq!(result.return_type, Ty::List(Box::new(f64t())));
}

#[test]
fn empty_container_stays_imprecise() {
    let mut p = Prog::new("justset");
    p.assign("s", build_set(&[]));
    p.ret("s");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::ImpreciseType);
    assert!(err.msg.contains("'s'"), "unexpected message: {}", err.msg);
}

#[test]
fn heterogeneous_tuple() {
    let mut p = Prog::new("tup");
    p.assign("a", arg("a", 0));
    p.assign("b", arg("b", 1));
    p.assign("c", arg("c", 2));
    p.assign("t", build_tuple(&["a", "b", "c"]));
    p.ret("t");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("a", i64t()), ("b", i64t()), ("c", f64t())]);
    assert_eq!(result.return_type, Ty::Tuple(vec![i64t(), i64t(), f64t()]));
}

#[test]
fn homogeneous_tuple_compresses() {
    let mut p = Prog::new("unituple");
    p.assign("a", arg("a", 0));
    p.assign("t", build_tuple(&["a", "a", "a"]));
    p.ret("t");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("a", i64t())]);
    assert_eq!(result.return_type, Ty::UniTuple { dtype: Box::new(i64t()), count: 3 });
}

#[test]
fn empty_tuple() {
    let mut p = Prog::new("unit");
    p.assign("t", build_tuple(&[]));
    p.ret("t");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[]);
    assert_eq!(result.return_type, Ty::Tuple(Vec::new()));
}

#[test]
fn container_literals() {
    let mut p = Prog::new("literals");
    p.assign("a", cint(1));
    p.assign("b", cint(2));
    p.assign("s", build_set(&["a", "b"]));
    p.assign("l", build_list(&["a", "b"]));
    p.ret("s");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[]);
    assert_eq!(result.return_type, Ty::Set(Box::new(i64t())));
    assert_eq!(result.var_type("l"), Some(&Ty::List(Box::new(i64t()))));
}

#[test]
fn exhaust_iter_over_iterable() {
    cov_mark::check!(exhaust_iter_over_iterable);

    let mut p = Prog::new("unpack");
    p.assign("it", arg("it", 0));
    p.assign("$t", exhaust("it", 2));
    p.assign("x", static_getitem("$t", 0, None));
    p.assign("y", static_getitem("$t", 1, None));
    p.assign("z", binop(BinOp::Add, "x", "y"));
    p.ret("z");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("it", Ty::List(Box::new(i64t())))]);
    assert_eq!(result.var_type("$t"), Some(&Ty::UniTuple { dtype: Box::new(i64t()), count: 2 }));
    assert_eq!(result.var_type("x"), Some(&i64t()));
    assert_eq!(result.var_type("y"), Some(&i64t()));
    assert_eq!(result.return_type, i64t());
}

#[test]
fn exhaust_iter_passes_tuples_through() {
    let mut p = Prog::new("unpack2");
    p.assign("t", arg("t", 0));
    p.assign("$u", exhaust("t", 2));
    p.assign("x", static_getitem("$u", 0, None));
    p.assign("y", static_getitem("$u", 1, None));
    p.ret("y");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("t", Ty::Tuple(vec![i64t(), f64t()]))]);
    assert_eq!(result.var_type("x"), Some(&i64t()));
    assert_eq!(result.var_type("y"), Some(&f64t()));
}

#[test]
fn exhaust_iter_wrong_arity() {
    let mut p = Prog::new("unpack3");
    p.assign("t", arg("t", 0));
    p.assign("$u", exhaust("t", 3));
    p.ret("t");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[("t", Ty::Tuple(vec![i64t(), f64t()]))]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::WrongTupleArity);
}

#[test]
fn static_getitem_falls_back_to_getitem() {
    cov_mark::check!(static_getitem_fallback);

    let mut p = Prog::new("sgi");
    p.assign("lst", arg("lst", 0));
    p.assign("$i", cint(0));
    let get = p.assign("x", static_getitem("lst", 0, Some("$i")));
    p.ret("x");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("lst", Ty::List(Box::new(i64t())))]);
    assert_eq!(result.var_type("x"), Some(&i64t()));
    // The fallback records a dynamic getitem signature for lowering.
    let sig = result.call_types.get(get).and_then(|sig| sig.as_ref()).expect("fallback signature");
    assert_eq!(sig.return_type, i64t());
    assert_eq!(sig.args, vec![Ty::List(Box::new(i64t())), i64t()]);
}

#[test]
fn iteration_protocol() {
    let mut p = Prog::new("loopsum");
    p.assign("$r", global("range", Value::Builtin(Builtin::Range)));
    p.assign("$ten", cint(10));
    p.assign("r", call("$r", &["$ten"]));
    p.assign("$it", getiter("r"));
    p.assign("acc", cint(0));
    let b1 = p.add_block();
    let b2 = p.add_block();
    p.jump(b1);
    p.switch(b1);
    p.assign("$p", iternext("$it"));
    p.assign("i", pair_first("$p"));
    p.assign("$c", pair_second("$p"));
    p.assign("acc", binop(BinOp::Add, "acc", "i"));
    p.branch("$c", b1, b2);
    p.switch(b2);
    p.ret("acc");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[]);
    assert_eq!(result.var_type("r"), Some(&Ty::Range(IntTy::I64)));
    assert_eq!(result.var_type("$it"), Some(&Ty::Iter(Box::new(i64t()))));
    assert_eq!(
        result.var_type("$p"),
        Some(&Ty::Pair { first: Box::new(i64t()), second: Box::new(Ty::bool()) })
    );
    assert_eq!(result.var_type("i"), Some(&i64t()));
    assert_eq!(result.var_type("$c"), Some(&Ty::bool()));
    assert_eq!(result.return_type, i64t());
}

#[test]
fn recursive_factorial() {
    cov_mark::check!(temporary_dispatcher_global);

    let func = FuncId(7);
    let mut p = Prog::with_func("fact", func);
    p.assign("n", arg("n", 0));
    p.assign("$c0", cint(0));
    p.assign("$cmp", binop(BinOp::Eq, "n", "$c0"));
    let b1 = p.add_block();
    let b2 = p.add_block();
    p.branch("$cmp", b1, b2);
    p.switch(b1);
    p.assign("$r1", cint(1));
    p.ret("$r1");
    p.switch(b2);
    p.assign("$f", global("fact", Value::Opaque(SmolStr::new("fact"))));
    p.assign("$c1", cint(1));
    p.assign("$sub", binop(BinOp::Sub, "n", "$c1"));
    let rec = p.assign("$rec", call("$f", &["$sub"]));
    p.assign("$mul", binop(BinOp::Mul, "n", "$rec"));
    p.ret("$mul");
    let body = p.finish();

    let mut ctx = TestContext::new();
    let disp = ctx.add_dispatcher(func, &["n"], true);
    let _registration = register_dispatcher("fact", disp);

    let mut inferer = TypeInferer::new(&ctx, &body);
    inferer.seed_argument("n", 0, i64t()).unwrap();
    let _frame = ctx.callstack().enter(inferer.call_frame(vec![i64t()]));
    inferer.build_constraints().unwrap();
    inferer.propagate().unwrap();
    let result = inferer.unify().unwrap();

    assert_eq!(result.return_type, i64t());
    assert_eq!(result.var_type("$rec"), Some(&i64t()));
    let sig = result.call_types.get(rec).and_then(|sig| sig.as_ref()).expect("call signature");
    assert_eq!(sig.return_type, i64t());
    assert_eq!(sig.args, vec![i64t()]);
    let params = &sig.param_sig.as_ref().expect("parameter signature").params;
    assert_eq!(params, &vec![SmolStr::new("n")]);
}

#[test]
fn runaway_recursion() {
    let func = FuncId(9);
    let mut p = Prog::with_func("forever", func);
    p.assign("n", arg("n", 0));
    p.assign("$f", global("forever", Value::Opaque(SmolStr::new("forever"))));
    p.assign("$rec", call("$f", &["n"]));
    p.ret("$rec");
    let body = p.finish();

    let mut ctx = TestContext::new();
    let disp = ctx.add_dispatcher(func, &["n"], true);
    let _registration = register_dispatcher("forever", disp);

    let mut inferer = TypeInferer::new(&ctx, &body);
    inferer.seed_argument("n", 0, i64t()).unwrap();
    let _frame = ctx.callstack().enter(inferer.call_frame(vec![i64t()]));
    inferer.build_constraints().unwrap();
    let err = inferer.propagate().unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::RunawayRecursion);
}

#[test]
fn modified_builtin_is_rejected() {
    let mut p = Prog::new("shadow");
    p.assign("r", global("range", Value::Int(0)));
    p.ret("r");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::ModifiedBuiltin);
    assert!(err.msg.contains("range"), "unexpected message: {}", err.msg);
}

#[test]
fn seeded_return_rejects_unconvertible_value() {
    let mut p = Prog::new("badret");
    p.assign("x", arg("x", 0));
    p.assign("y", use_("x"));
    p.ret("y");
    let body = p.finish();

    let ctx = TestContext::new();
    let mut inferer = TypeInferer::new(&ctx, &body);
    inferer.seed_argument("x", 0, f64t()).unwrap();
    inferer.seed_return(i64t()).unwrap();
    inferer.build_constraints().unwrap();
    let err = inferer.propagate().unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::ConversionForbidden);
}

#[test]
fn join_less_types_fail_unification() {
    let mut p = Prog::new("conflict");
    p.assign("x", arg("x", 0));
    p.assign("y", arg("y", 1));
    p.assign("z", use_("x"));
    p.assign("z", use_("y"));
    p.ret("z");
    let body = p.finish();

    let ctx = TestContext::new();
    let args = [("x", Ty::Tuple(vec![i64t()])), ("y", Ty::List(Box::new(i64t())))];
    let err = try_infer(&ctx, &body, &args).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::UnificationFailed);
}

#[test]
fn undefined_variable_is_reported() {
    let mut p = Prog::new("undef");
    p.assign("x", use_("y"));
    p.ret("x");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::UndefinedVariable);
    assert!(err.msg.contains("'x'"), "unexpected message: {}", err.msg);
}

#[test]
fn untyped_attribute() {
    let mut p = Prog::new("noattr");
    p.assign("x", arg("x", 0));
    p.assign("$m", getattr("x", "foo"));
    p.ret("x");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[("x", i64t())]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::UntypedAttribute);
}

#[test]
fn invalid_call_is_explained() {
    let mut p = Prog::new("badcall");
    p.assign("$len", global("len", Value::Builtin(Builtin::Len)));
    p.assign("a", arg("a", 0));
    p.assign("b", arg("b", 1));
    p.assign("r", call("$len", &["a", "b"]));
    p.ret("r");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[("a", i64t()), ("b", i64t())]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::InvalidCall);
    assert!(err.msg.starts_with("Invalid usage of"), "unexpected message: {}", err.msg);
    assert!(err.msg.contains("int64, int64"), "unexpected message: {}", err.msg);
}

#[test]
fn vararg_must_be_a_tuple() {
    let mut p = Prog::new("badstar");
    p.assign("$len", global("len", Value::Builtin(Builtin::Len)));
    p.assign("va", arg("va", 0));
    p.assign("r", call_vararg("$len", &[], "va"));
    p.ret("r");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[("va", i64t())]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::VarargsNotTuple);
}

#[test]
fn vararg_tuple_is_spliced() {
    let mut p = Prog::new("star");
    p.assign("lst", arg("lst", 0));
    p.assign("$t", build_tuple(&["lst"]));
    p.assign("$len", global("len", Value::Builtin(Builtin::Len)));
    p.assign("n", call_vararg("$len", &[], "$t"));
    p.ret("n");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("lst", Ty::List(Box::new(i64t())))]);
    assert_eq!(result.return_type, i64t());
}

#[test]
fn print_is_typed() {
    let mut p = Prog::new("shout");
    p.assign("x", arg("x", 0));
    let print = p.print(&["x"]);
    p.assign("$r", cnone());
    p.ret("$r");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("x", i64t())]);
    let sig = result.call_types.get(print).and_then(|sig| sig.as_ref()).expect("print signature");
    assert_eq!(sig.return_type, Ty::None);
    assert_eq!(sig.args, vec![i64t()]);
}

#[test]
fn setitem_and_delitem() {
    let mut p = Prog::new("store");
    p.assign("lst", arg("lst", 0));
    p.assign("$i", cint(0));
    p.assign("$w", cint(2));
    let set = p.setitem("lst", "$i", "$w");
    let sset = p.static_setitem("lst", 1, "$i", "$w");
    let del = p.delitem("lst", "$i");
    p.assign("$r", cnone());
    p.ret("$r");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("lst", Ty::List(Box::new(i64t())))]);
    for id in [set, sset, del].iter() {
        let sig = result.call_types.get(*id).and_then(|sig| sig.as_ref());
        assert!(sig.is_some(), "missing signature for store statement");
    }
}

#[test]
fn unresolvable_setitem() {
    let mut p = Prog::new("badstore");
    p.assign("lst", arg("lst", 0));
    p.assign("$i", cint(0));
    p.assign("$w", cfloat(0.5));
    p.setitem("lst", "$i", "$w");
    p.assign("$r", cnone());
    p.ret("$r");
    let body = p.finish();

    let ctx = TestContext::new();
    let err = try_infer(&ctx, &body, &[("lst", Ty::List(Box::new(i64t())))]).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::InvalidCall);
    assert!(err.msg.contains("Cannot resolve setitem"), "unexpected message: {}", err.msg);
}

#[test]
fn intrinsic_callee_carries_its_signature() {
    let mut p = Prog::new("probe");
    p.assign("x", arg("x", 0));
    let probe = p.assign("$t", call_intrinsic("truthy", &["x"]));
    p.ret("$t");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("x", i64t())]);
    assert_eq!(result.return_type, Ty::bool());
    let sig = result.call_types.get(probe).and_then(|sig| sig.as_ref()).expect("intrinsic sig");
    assert_eq!(sig.return_type, Ty::bool());
}

#[test]
fn omitted_argument_defaults() {
    cov_mark::check!(omitted_argument_default);

    let mut p = Prog::new("defaulted");
    p.assign("x", arg("x", 0));
    p.ret("x");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("x", Ty::Omitted(Value::Int(3)))]);
    assert_eq!(result.var_type("x"), Some(&i64t()));
    assert_eq!(result.var_type("arg.x"), Some(&Ty::Omitted(Value::Int(3))));
    assert_eq!(result.return_type, i64t());
}

#[test]
fn generator_function() {
    let mut p = Prog::new("counter");
    p.assign("n", arg("n", 0));
    p.assign("i", cint(0));
    let y = p.assign("$y", RValue::Yield(u("i")));
    p.ret("$y");
    let body = p.finish_generator(&["i"], vec![y]);

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("n", i64t())]);
    assert_eq!(result.var_type("$y"), Some(&Ty::None));
    assert_eq!(
        result.return_type,
        Ty::Generator(Box::new(GeneratorTy {
            func: FuncId(0),
            yield_type: i64t(),
            arg_types: vec![i64t()],
            state_types: vec![i64t()],
            has_finalizer: true,
        }))
    );
}

#[test]
fn propagation_is_confluent_under_statement_order() {
    // Same dataflow, forward and backward statement order; the fixed point
    // must not depend on how many passes it takes to get there.
    let mut fwd = Prog::new("fwd");
    fwd.assign("c", cint(1));
    fwd.assign("b", use_("c"));
    fwd.assign("a", use_("b"));
    fwd.ret("a");
    let fwd = fwd.finish();

    let mut bwd = Prog::new("bwd");
    bwd.assign("a", use_("b"));
    bwd.assign("b", use_("c"));
    bwd.assign("c", cint(1));
    bwd.ret("a");
    let bwd = bwd.finish();

    let ctx = TestContext::new();
    let fwd = check_infer(&ctx, &fwd, &[]);
    let bwd = check_infer(&ctx, &bwd, &[]);
    for name in ["a", "b", "c"].iter() {
        assert_eq!(fwd.var_type(name), bwd.var_type(name));
        assert_eq!(fwd.var_type(name), Some(&i64t()));
    }
}

#[test]
fn propagation_is_idempotent_at_fixed_point() {
    let mut p = Prog::new("steady");
    p.assign("x", cint(1));
    p.assign("y", use_("x"));
    p.ret("y");
    let body = p.finish();

    let ctx = TestContext::new();
    let mut inferer = TypeInferer::new(&ctx, &body);
    inferer.build_constraints().unwrap();
    inferer.propagate().unwrap();

    let token = inferer.state_token();
    let errors = inferer.propagate_one_pass();
    assert!(errors.is_empty());
    assert_eq!(inferer.state_token(), token);
}

#[test]
fn seeded_arguments_stay_locked() {
    let mut p = Prog::new("locked");
    p.assign("n", arg("n", 0));
    p.ret("n");
    let body = p.finish();

    let ctx = TestContext::new();
    let mut inferer = TypeInferer::new(&ctx, &body);
    inferer.seed_argument("n", 0, i64t()).unwrap();
    inferer.build_constraints().unwrap();
    inferer.propagate().unwrap();
    inferer.unify().unwrap();

    let typevars = inferer.typevars();
    let cell = typevars.get("arg.n").expect("seeded cell");
    assert!(cell.is_locked());
    assert_eq!(cell.current(), Some(&i64t()));
}

#[test]
fn every_recorded_call_gets_a_signature() {
    let mut p = Prog::new("coverage");
    p.assign("lst", arg("lst", 0));
    p.assign("$i", cint(0));
    let calls = vec![
        p.assign("x", static_getitem("lst", 0, Some("$i"))),
        p.assign("$it", getiter("lst")),
        p.assign("y", binop(BinOp::Add, "x", "x")),
        p.setitem("lst", "$i", "x"),
        p.print(&["y"]),
    ];
    p.ret("y");
    let body = p.finish();

    let ctx = TestContext::new();
    let result = check_infer(&ctx, &body, &[("lst", Ty::List(Box::new(i64t())))]);
    for id in calls {
        assert!(result.call_types.get(id).is_some(), "call statement lacks a calltypes entry");
    }
}

#[test]
fn typevar_map_rejects_rebinding() {
    let mut map = TypeVarMap::default();
    map.insert(SmolStr::new("x"), TypeVar::new(SmolStr::new("x"))).unwrap();
    let err = map.insert(SmolStr::new("x"), TypeVar::new(SmolStr::new("x"))).unwrap_err();
    assert_eq!(err.kind, TypingErrorKind::Internal);
}

#[test]
fn global_reads_are_assumed_immutable() {
    let mut p = Prog::new("flagged");
    let read = p.assign("g", global("flag", Value::Bool(true)));
    p.ret("g");
    let body = p.finish();

    let ctx = TestContext::new();
    let mut inferer = TypeInferer::new(&ctx, &body);
    inferer.build_constraints().unwrap();
    inferer.propagate().unwrap();
    let result = inferer.unify().unwrap();

    assert_eq!(result.return_type, Ty::bool());
    assert!(inferer.assumed_immutables().contains(&read));
}

#[test]
fn display_of_types_and_signatures() {
    expect![["(int64 x 3)"]]
        .assert_eq(&Ty::UniTuple { dtype: Box::new(i64t()), count: 3 }.to_string());
    expect![["(int64, float64)"]].assert_eq(&Ty::Tuple(vec![i64t(), f64t()]).to_string());
    expect![["set(undefined)"]].assert_eq(&Ty::Set(Box::new(Ty::Undefined)).to_string());
    expect![["BoundFunction(set.add for set(int64))"]].assert_eq(
        &Ty::BoundFunction { method: SmolStr::new("set.add"), this: Box::new(Ty::Set(Box::new(i64t()))) }
            .to_string(),
    );
    expect![["none (int64, float64)"]]
        .assert_eq(&Signature::new(Ty::None, vec![i64t(), f64t()]).to_string());
}

#[test]
fn error_display_carries_context_notes() {
    let err = crate::TypingError::at(TypingErrorKind::InvalidCall, "boom", loc(3))
        .with_context("typing of call at <test>:3");
    assert_eq!(err.to_string(), "boom at <test>:3\nDuring: typing of call at <test>:3");
}
