//! The trusted core: declarations, reduction, definitional equality and type checking.
//!
//! Every declaration enters [Env] through one of the `add_*` methods, each of which
//! re-checks its input. Nothing elaborated is trusted until it passes through here.

mod env;
mod inductive;
mod reduce;
mod typing;

pub use env::{CtorInfo, Decl, DeclKind, Env, InductiveInfo, Instance};
pub use inductive::InductiveDecl;

use thiserror::Error;

use crate::tt::{Id, LocalEnv, Name, Term};

#[derive(Debug, Clone, Error)]
pub enum TypeErrorKind {
    #[error("unbound local variable {0}")]
    UnboundVariable(Id),
    #[error("loose bound variable #{0}")]
    LooseBoundVariable(usize),
    #[error("unknown constant {0}")]
    UnknownConstant(Name),
    #[error("unknown inductive type {0}")]
    UnknownInductive(Name),
    #[error("{name} expects {expected} universe arguments, but {got} were given")]
    LevelArityMismatch {
        name: Name,
        expected: usize,
        got: usize,
    },
    #[error("undeclared universe parameter {0}")]
    UndeclaredLevelParam(Name),
    #[error("unexpected universe metavariable")]
    UnexpectedLevelMeta,
    #[error("unexpected hole ?{0}")]
    UnexpectedHole(Id),
    #[error("type expected, but the term has type {ty}")]
    SortExpected { ty: Term },
    #[error("function expected, but the term has type {ty}")]
    FunctionExpected { ty: Term },
    #[error("type mismatch: expected {expected}, but inferred {inferred}")]
    TypeMismatch { expected: Term, inferred: Term },
    #[error("theorem statement has type {ty}, which is not Prop")]
    NotAProposition { ty: Term },
    #[error("{0} has already been declared")]
    AlreadyDeclared(Name),
    #[error("invalid declaration name {0:?}")]
    InvalidName(Name),
    #[error("{inductive} occurs in a non-positive position in {ctor}")]
    NonPositive { inductive: Name, ctor: Name },
    #[error("a field of {ctor} lives in a universe larger than its inductive type")]
    UniverseTooBig { ctor: Name },
    #[error("malformed declaration: {0}")]
    Malformed(String),
}

/// A kernel rejection, carrying the offending term and the context it was checked in.
#[derive(Debug, Clone, Error)]
#[error("{kind}\n  in: {}", crate::print::pretty(.term, .local_env))]
pub struct TypeError {
    pub kind: TypeErrorKind,
    pub term: Term,
    pub local_env: LocalEnv,
}

impl TypeError {
    pub fn new(kind: TypeErrorKind, term: &Term, local_env: &LocalEnv) -> TypeError {
        TypeError {
            kind,
            term: term.clone(),
            local_env: local_env.clone(),
        }
    }
}
