//! The per-function container: blocks of statements in execution order.

use std::ops::Index;

use la_arena::{Arena, Idx};
use smol_str::SmolStr;

use crate::{
    expr::{RValue, Stmt, Var},
    FuncId, Loc,
};

pub type StmtId = Idx<Stmt>;
pub type BlockId = Idx<Block>;

/// A basic block: an ordered body whose last statement is the terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub body: Vec<StmtId>,
}

/// Generator bookkeeping attached to a function that yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorInfo {
    /// Variables live across a yield, in resume-state order.
    pub state_vars: Vec<SmolStr>,
    /// The `Assign` statements whose right-hand side is a `Yield`.
    pub yield_points: Vec<StmtId>,
}

/// A function body in three-address form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncBody {
    pub name: SmolStr,
    pub func: FuncId,
    pub stmts: Arena<Stmt>,
    pub blocks: Arena<Block>,
    /// Blocks in the order they were emitted; iteration follows this.
    pub block_order: Vec<BlockId>,
    pub generator: Option<GeneratorInfo>,
}

impl FuncBody {
    /// Statements of every block, in block order.
    pub fn iter_stmts(&self) -> impl Iterator<Item = (StmtId, &Stmt)> + '_ {
        self.block_order
            .iter()
            .flat_map(move |&block| self.blocks[block].body.iter())
            .map(move |&id| (id, &self.stmts[id]))
    }

    /// The operands of all `Return` terminators.
    pub fn return_vars(&self) -> Vec<&Var> {
        self.block_order
            .iter()
            .filter_map(|&block| self.blocks[block].body.last())
            .filter_map(|&id| match &self.stmts[id] {
                Stmt::Return { value, .. } => Some(value),
                _ => None,
            })
            .collect()
    }

    /// The variable yielded at a recorded yield point, if the statement is
    /// indeed a yield assignment.
    pub fn yield_value(&self, stmt: StmtId) -> Option<&Var> {
        match &self.stmts[stmt] {
            Stmt::Assign { value: RValue::Yield(v), .. } => Some(v),
            _ => None,
        }
    }
}

impl Index<StmtId> for FuncBody {
    type Output = Stmt;

    fn index(&self, id: StmtId) -> &Stmt {
        &self.stmts[id]
    }
}

impl Index<BlockId> for FuncBody {
    type Output = Block;

    fn index(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }
}

/// Convenience builder for assembling bodies programmatically.
pub struct BodyBuilder {
    body: FuncBody,
}

impl BodyBuilder {
    pub fn new(name: impl Into<SmolStr>, func: FuncId) -> BodyBuilder {
        BodyBuilder {
            body: FuncBody {
                name: name.into(),
                func,
                stmts: Arena::default(),
                blocks: Arena::default(),
                block_order: Vec::new(),
                generator: None,
            },
        }
    }

    /// Opens a new (empty) block and appends it to the block order.
    pub fn block(&mut self) -> BlockId {
        let block = self.body.blocks.alloc(Block::default());
        self.body.block_order.push(block);
        block
    }

    pub fn push(&mut self, block: BlockId, stmt: Stmt) -> StmtId {
        let id = self.body.stmts.alloc(stmt);
        self.body.blocks[block].body.push(id);
        id
    }

    pub fn set_generator(&mut self, info: GeneratorInfo) {
        self.body.generator = Some(info);
    }

    pub fn finish(self) -> FuncBody {
        self.body
    }
}

/// A location inside a synthetic body, handy for tests and lowering stubs.
pub fn synthetic_loc(line: u32) -> Loc {
    Loc::new("<string>", line)
}
