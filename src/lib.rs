use anyhow::Context;

pub mod calc;
pub mod cmd;
pub mod elab;
pub mod error;
pub mod expr;
pub mod kernel;
pub mod library;
pub mod prelude;
pub mod print;
pub mod recursion;
pub mod state;
pub mod tactic;
pub mod tt;

pub use elab::{Elaborated, Elaborator, Options};
pub use error::Error;
pub use kernel::Env;

/// Loads the prelude and checks the built-in library on top of it.
pub fn process(options: Options) -> anyhow::Result<Env> {
    let mut eval = cmd::Eval::new(options);
    eval.run(prelude::cmds()).context("prelude error")?;
    eval.run(library::showcase()).context("library error")?;
    Ok(eval.env)
}
