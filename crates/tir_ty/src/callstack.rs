//! The stack of in-flight inference frames.
//!
//! Typing a recursive call needs the partial results of the inference that
//! is already running for the callee. Each active inference registers a
//! frame sharing its cell map; a recursive call looks the frame up by
//! `(function, argument types)` and unifies whatever return types that
//! inference has produced so far.

use std::cell::RefCell;
use std::rc::Rc;

use smol_str::SmolStr;
use tir::FuncId;

use crate::{infer::TypeVarMap, Ty};

/// One active inference, sharing the inferer's live cell map.
#[derive(Debug, Clone)]
pub struct Frame {
    func: FuncId,
    args: Vec<Ty>,
    typevars: Rc<RefCell<TypeVarMap>>,
    return_vars: Vec<SmolStr>,
}

impl Frame {
    pub fn new(
        func: FuncId,
        args: Vec<Ty>,
        typevars: Rc<RefCell<TypeVarMap>>,
        return_vars: Vec<SmolStr>,
    ) -> Frame {
        Frame { func, args, typevars, return_vars }
    }

    pub fn func(&self) -> FuncId {
        self.func
    }

    pub fn args(&self) -> &[Ty] {
        &self.args
    }

    /// The distinct types of the frame's return variables that are defined
    /// so far. Empty means the recursion has produced no anchor yet.
    pub fn defined_return_types(&self) -> Vec<Ty> {
        let typevars = self.typevars.borrow();
        let mut tys: Vec<Ty> = Vec::new();
        for name in &self.return_vars {
            if let Some(ty) = typevars.get(name).and_then(|tv| tv.current()) {
                if !tys.contains(ty) {
                    tys.push(ty.clone());
                }
            }
        }
        tys
    }
}

/// Per-thread stack of frames; the top is the innermost inference.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: RefCell<Vec<Frame>>,
}

impl CallStack {
    pub fn new() -> CallStack {
        CallStack::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Push a frame; it is popped again when the guard drops.
    pub fn enter(&self, frame: Frame) -> StackGuard<'_> {
        self.frames.borrow_mut().push(frame);
        StackGuard { stack: self }
    }

    /// The innermost frame for `func` with exactly these argument types.
    pub fn match_frame(&self, func: FuncId, args: &[Ty]) -> Option<Frame> {
        self.frames
            .borrow()
            .iter()
            .rev()
            .find(|frame| frame.func == func && frame.args == args)
            .cloned()
    }

    /// The innermost frame for `func`, whatever its arguments.
    pub fn findfirst(&self, func: FuncId) -> Option<Frame> {
        self.frames.borrow().iter().rev().find(|frame| frame.func == func).cloned()
    }
}

pub struct StackGuard<'a> {
    stack: &'a CallStack,
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.stack.frames.borrow_mut().pop();
    }
}
