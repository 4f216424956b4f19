//! Program variables and the factory that mints them.
//!
//! A [`Variable`] is a stable identity: two variables are the same variable
//! exactly when their indices are equal, and indices are injective across one
//! [`VarFactory`]. The factory is the per-analysis context: it is created once,
//! handed to the domains, and never destroyed while any of its variables is
//! alive. Variables keep a weak handle to their factory so domains that need
//! to materialise temporaries (the array functors) can mint them without
//! threading the factory through every call.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors the variable factory can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VarError {
    #[error("variable {name} re-declared as {requested:?}, previously {existing:?}")]
    TypeMismatch {
        name: String,
        existing: VarType,
        requested: VarType,
    },
}

/// Type of a scalar value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    /// Fixed-width integer. The width is informational: the domains reason
    /// over mathematical integers.
    Int { bits: u32 },
    Bool,
    Real,
    Ptr,
}

/// Type of a program variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VarType {
    Scalar(ScalarType),
    Array(ScalarType),
}

impl VarType {
    pub fn is_array(&self) -> bool {
        matches!(self, VarType::Array(_))
    }

    /// The scalar type itself, or the element type for arrays.
    pub fn element(&self) -> ScalarType {
        match self {
            VarType::Scalar(s) | VarType::Array(s) => *s,
        }
    }
}

#[derive(Debug)]
struct VarData {
    index: u64,
    name: String,
    ty: VarType,
    factory: Weak<RefCell<FactoryInner>>,
}

/// A program variable. Cheap to clone; compared, ordered, and hashed by its
/// factory-assigned index only.
#[derive(Clone)]
pub struct Variable {
    data: Rc<VarData>,
}

impl Variable {
    pub fn index(&self) -> u64 {
        self.data.index
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn ty(&self) -> VarType {
        self.data.ty
    }

    pub fn is_array(&self) -> bool {
        self.data.ty.is_array()
    }

    /// The factory this variable was minted by.
    ///
    /// Panics if the factory has been dropped; the factory is expected to
    /// outlive the analysis (spec'd lifecycle: created once, never destroyed).
    pub fn factory(&self) -> VarFactory {
        VarFactory {
            inner: self
                .data
                .factory
                .upgrade()
                .expect("variable outlived its factory"),
        }
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.data.index == other.data.index
    }
}

impl Eq for Variable {}

impl PartialOrd for Variable {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Variable {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.data.index.cmp(&other.data.index)
    }
}

impl std::hash::Hash for Variable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.data.index.hash(state);
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.data.name, self.data.index)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.data.name)
    }
}

#[derive(Debug, Default)]
struct FactoryInner {
    by_name: BTreeMap<String, Variable>,
    next_index: u64,
    next_fresh: u64,
}

/// Mints [`Variable`]s with stable identities.
///
/// `get` is idempotent per name: the same name always returns the same
/// variable, which is what gives array-expansion cell scalars a stable
/// identity across every abstract state of one analysis.
#[derive(Clone, Debug, Default)]
pub struct VarFactory {
    inner: Rc<RefCell<FactoryInner>>,
}

impl VarFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the variable called `name`.
    ///
    /// Panics if `name` already exists with a different type; variable
    /// identity includes its type and a mismatch is a caller bug. Use
    /// [`VarFactory::try_get`] where the caller wants the error instead.
    pub fn get(&self, name: &str, ty: VarType) -> Variable {
        match self.try_get(name, ty) {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }

    /// Fallible variant of [`VarFactory::get`].
    pub fn try_get(&self, name: &str, ty: VarType) -> Result<Variable, VarError> {
        let mut inner = self.inner.borrow_mut();
        if let Some(v) = inner.by_name.get(name) {
            if v.ty() != ty {
                return Err(VarError::TypeMismatch {
                    name: name.to_string(),
                    existing: v.ty(),
                    requested: ty,
                });
            }
            return Ok(v.clone());
        }
        let index = inner.next_index;
        inner.next_index += 1;
        let var = Variable {
            data: Rc::new(VarData {
                index,
                name: name.to_string(),
                ty,
                factory: Rc::downgrade(&self.inner),
            }),
        };
        inner.by_name.insert(name.to_string(), var.clone());
        Ok(var)
    }

    /// Convenience: a scalar integer variable.
    pub fn int(&self, name: &str, bits: u32) -> Variable {
        self.get(name, VarType::Scalar(ScalarType::Int { bits }))
    }

    /// Convenience: an array-of-integer variable.
    pub fn array_int(&self, name: &str, bits: u32) -> Variable {
        self.get(name, VarType::Array(ScalarType::Int { bits }))
    }

    /// Mint a variable with a name no caller has used. Used for the shadow
    /// temporaries the array functors materialise.
    pub fn fresh(&self, prefix: &str, ty: VarType) -> Variable {
        let n = {
            let mut inner = self.inner.borrow_mut();
            let n = inner.next_fresh;
            inner.next_fresh += 1;
            n
        };
        self.get(&format!("{prefix}.{n}"), ty)
    }

    /// Number of variables minted so far.
    pub fn len(&self) -> usize {
        self.inner.borrow().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_per_name() {
        let vfac = VarFactory::new();
        let x1 = vfac.int("x", 32);
        let x2 = vfac.int("x", 32);
        let y = vfac.int("y", 32);
        assert_eq!(x1, x2);
        assert_eq!(x1.index(), x2.index());
        assert_ne!(x1, y);
    }

    #[test]
    fn fresh_names_do_not_collide() {
        let vfac = VarFactory::new();
        let a = vfac.fresh("shadow", VarType::Scalar(ScalarType::Int { bits: 32 }));
        let b = vfac.fresh("shadow", VarType::Scalar(ScalarType::Int { bits: 32 }));
        assert_ne!(a, b);
    }

    #[test]
    fn variables_reach_their_factory() {
        let vfac = VarFactory::new();
        let a = vfac.array_int("a", 8);
        let t = a.factory().fresh("tmp", VarType::Scalar(a.ty().element()));
        assert_eq!(vfac.len(), 2);
        assert!(!t.is_array());
    }

    #[test]
    #[should_panic(expected = "re-declared")]
    fn type_mismatch_is_a_bug() {
        let vfac = VarFactory::new();
        vfac.int("x", 32);
        vfac.get("x", VarType::Scalar(ScalarType::Bool));
    }

    #[test]
    fn try_get_reports_the_mismatch() {
        let vfac = VarFactory::new();
        vfac.int("x", 32);
        let err = vfac
            .try_get("x", VarType::Scalar(ScalarType::Bool))
            .unwrap_err();
        assert!(matches!(err, VarError::TypeMismatch { .. }));
    }
}
