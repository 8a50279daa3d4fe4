//! Per-variable inference cells.
//!
//! A cell only ever widens: new candidate types are folded in with the
//! lattice join, and a locked cell never changes at all. This is what makes
//! the whole propagation loop monotone.

use smallvec::SmallVec;
use smol_str::SmolStr;
use tir::Loc;

use crate::{
    context::TypingContext, InferResult, Ty, TypingError, TypingErrorKind,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeVar {
    var: SmolStr,
    ty: Option<Ty>,
    locked: bool,
    /// Source location of the first definition.
    define_loc: Option<Loc>,
}

impl TypeVar {
    pub(crate) fn new(var: SmolStr) -> TypeVar {
        TypeVar { var, ty: None, locked: false, define_loc: None }
    }

    pub fn current(&self) -> Option<&Ty> {
        self.ty.as_ref()
    }

    pub fn is_defined(&self) -> bool {
        self.ty.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn define_loc(&self) -> Option<&Loc> {
        self.define_loc.as_ref()
    }

    /// The candidate type set: empty while undefined, a single type after.
    pub fn get(&self) -> SmallVec<[Ty; 1]> {
        self.ty.iter().cloned().collect()
    }

    fn defined_at(&self) -> String {
        match &self.define_loc {
            Some(loc) => loc.to_string(),
            None => "<unknown>".to_string(),
        }
    }

    /// Fold a new candidate type into the cell and return the resulting
    /// type. Locked cells require a conversion to exist and keep their
    /// type; unlocked cells take the lattice join.
    pub(crate) fn add_type(
        &mut self,
        ctx: &dyn TypingContext,
        ty: Ty,
        loc: &Loc,
    ) -> InferResult<Ty> {
        if self.locked {
            let current = match &self.ty {
                Some(current) => current,
                None => {
                    return Err(TypingError::at(
                        TypingErrorKind::Internal,
                        format!("locked type variable '{}' has no type", self.var),
                        loc.clone(),
                    ));
                }
            };
            if ty != *current && ctx.can_convert(&ty, current).is_none() {
                return Err(TypingError::at(
                    TypingErrorKind::ConversionForbidden,
                    format!(
                        "No conversion from {} to {} for '{}', defined at {}",
                        ty,
                        current,
                        self.var,
                        self.defined_at()
                    ),
                    loc.clone(),
                ));
            }
            Ok(current.clone())
        } else {
            let unified = match &self.ty {
                Some(current) => match ctx.unify_pairs(current, &ty) {
                    Some(unified) => unified,
                    None => {
                        return Err(TypingError::at(
                            TypingErrorKind::UnificationFailed,
                            format!(
                                "cannot unify {} and {} for '{}', defined at {}",
                                current,
                                ty,
                                self.var,
                                self.defined_at()
                            ),
                            loc.clone(),
                        ));
                    }
                },
                None => {
                    // First definition.
                    self.define_loc = Some(loc.clone());
                    ty
                }
            };
            self.ty = Some(unified.clone());
            Ok(unified)
        }
    }

    /// Pin the cell to `ty`. A cell may be locked at most once, and any
    /// type it already has must convert into the lock target.
    pub(crate) fn lock(
        &mut self,
        ctx: &dyn TypingContext,
        ty: Ty,
        loc: Option<Loc>,
    ) -> InferResult<()> {
        if self.locked {
            return Err(TypingError::new(
                TypingErrorKind::Internal,
                format!("type variable '{}' is already locked", self.var),
            ));
        }
        if let Some(current) = &self.ty {
            if ctx.can_convert(current, &ty).is_none() {
                return Err(TypingError::new(
                    TypingErrorKind::ConversionForbidden,
                    format!("No conversion from {} to {} for '{}'", ty, current, self.var),
                ));
            }
        }
        self.ty = Some(ty);
        self.locked = true;
        if self.define_loc.is_none() {
            self.define_loc = loc;
        }
        Ok(())
    }
}

/// Name -> cell map. Cells are created on first access; rebinding an
/// existing cell is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeVarMap {
    map: rustc_hash::FxHashMap<SmolStr, TypeVar>,
}

impl TypeVarMap {
    pub fn get(&self, name: &str) -> Option<&TypeVar> {
        self.map.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &SmolStr> {
        self.map.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SmolStr, &TypeVar)> {
        self.map.iter()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub(crate) fn var_mut(&mut self, name: &str) -> &mut TypeVar {
        self.map
            .entry(SmolStr::new(name))
            .or_insert_with(|| TypeVar::new(SmolStr::new(name)))
    }

    /// Insert a pre-made cell; a name maps to at most one cell, ever.
    pub fn insert(&mut self, name: SmolStr, var: TypeVar) -> InferResult<()> {
        if self.map.contains_key(&name) {
            return Err(TypingError::new(
                TypingErrorKind::Internal,
                format!("cannot redefine type variable '{}'", name),
            ));
        }
        self.map.insert(name, var);
        Ok(())
    }

    /// Fold `src`'s current type (if any) into `dst`.
    pub(crate) fn union_into(
        &mut self,
        ctx: &dyn TypingContext,
        dst: &str,
        src: &str,
        loc: &Loc,
    ) -> InferResult<()> {
        let src_ty = self.var_mut(src).current().cloned();
        match src_ty {
            Some(ty) => {
                self.var_mut(dst).add_type(ctx, ty, loc)?;
            }
            None => {
                // Materialize the destination cell anyway.
                self.var_mut(dst);
            }
        }
        Ok(())
    }

    /// The monotone state snapshot: `(name, current type)` sorted by name.
    /// Propagation stops once two consecutive snapshots are equal.
    pub fn state_token(&self) -> Vec<(SmolStr, Option<Ty>)> {
        let mut token: Vec<_> =
            self.map.iter().map(|(name, tv)| (name.clone(), tv.current().cloned())).collect();
        token.sort_by(|a, b| a.0.cmp(&b.0));
        token
    }
}
