use thiserror::Error;

use crate::calc::ChainError;
use crate::elab::ElabError;
use crate::kernel::TypeError;
use crate::recursion::CompileError;
use crate::tactic::TacticError;

/// Any failure surfaced by elaboration. Each variant keeps the context it failed in.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Elab(#[from] ElabError),
    #[error(transparent)]
    Tactic(#[from] TacticError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Chain(#[from] ChainError),
}
