//! Pluggable inference observers. Purely observational: nothing here may
//! influence the inferred types.

use la_arena::ArenaMap;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;
use tir::StmtId;

use crate::{infer::TypeVarMap, Signature, Ty};

pub trait InferDebug {
    fn propagate_started(&self) {}

    fn propagate_finished(&self, _typevars: &TypeVarMap) {}

    fn unify_finished(
        &self,
        _type_map: &FxHashMap<SmolStr, Ty>,
        _return_type: &Ty,
        _call_types: &ArenaMap<StmtId, Option<Signature>>,
    ) {
    }
}

/// The default observer: does nothing.
#[derive(Debug, Default)]
pub struct NullDebug;

impl InferDebug for NullDebug {}

/// Dumps the cell state after every pass through the `log` facade.
#[derive(Debug, Default)]
pub struct LogDebug;

impl InferDebug for LogDebug {
    fn propagate_started(&self) {
        log::debug!("---- propagate ----");
    }

    fn propagate_finished(&self, typevars: &TypeVarMap) {
        for (name, ty) in typevars.state_token() {
            match ty {
                Some(ty) => log::trace!("{} := {}", name, ty),
                None => log::trace!("{} := <undefined>", name),
            }
        }
    }

    fn unify_finished(
        &self,
        type_map: &FxHashMap<SmolStr, Ty>,
        return_type: &Ty,
        call_types: &ArenaMap<StmtId, Option<Signature>>,
    ) {
        log::debug!("---- variable types ----");
        let mut names: Vec<_> = type_map.keys().collect();
        names.sort();
        for name in names {
            log::debug!("{}: {}", name, type_map[name]);
        }
        log::debug!("---- return type ----");
        log::debug!("{}", return_type);
        log::debug!("---- call types ----");
        for (stmt, sig) in call_types.iter() {
            match sig {
                Some(sig) => log::debug!("{:?}: {}", stmt, sig),
                None => log::debug!("{:?}: <unresolved>", stmt),
            }
        }
    }
}
