use thiserror::Error;

use crate::elab::{Elaborated, Elaborator};
use crate::error::Error;
use crate::expr::{app, Expr};
use crate::print::pretty;
use crate::state::MetaCtx;
use crate::tt::{LocalEnv, Name, Term};

/// `_ relation rhs := proof`, where `_` is the right-hand side of the previous step.
#[derive(Debug, Clone)]
pub struct CalcStep {
    pub relation: Expr,
    pub rhs: Expr,
    pub proof: Expr,
}

#[derive(Debug, Clone)]
pub struct CalcBlock {
    pub start: Expr,
    pub steps: Vec<CalcStep>,
}

pub fn step(relation: Expr, rhs: Expr, proof: Expr) -> CalcStep {
    CalcStep {
        relation,
        rhs,
        proof,
    }
}

#[derive(Debug, Clone)]
pub enum ChainErrorKind {
    Empty,
    NotARelation { ty: Term },
    UnregisteredRelation { left: Name, right: Name },
    StepType { source: Box<Error> },
}

#[derive(Debug, Clone, Error)]
#[error("{}", explain(.kind, *.step, .local_env))]
pub struct ChainError {
    pub kind: ChainErrorKind,
    /// Index of the failing step.
    pub step: usize,
    pub local_env: LocalEnv,
}

fn explain(kind: &ChainErrorKind, step: usize, local_env: &LocalEnv) -> String {
    match kind {
        ChainErrorKind::Empty => "calc block without steps".to_owned(),
        ChainErrorKind::NotARelation { ty } => {
            format!("step {step}: {} is not a relation", pretty(ty, local_env))
        }
        ChainErrorKind::UnregisteredRelation { left, right } => {
            format!("step {step}: no transitivity rule for {left} followed by {right}")
        }
        ChainErrorKind::StepType { source } => format!("step {step}: {source}"),
    }
}

/// Elaborates a calc block to a proof of `start R rhsₙ`, where `R` is obtained by
/// composing the step relations with the registered transitivity rules.
pub fn chain(elab: &Elaborator, local_env: &LocalEnv, block: &CalcBlock) -> Result<Elaborated, Error> {
    let mut mctx = MetaCtx::default();
    let (m, ty) = visit_calc(elab, &mut mctx, local_env, block)?;
    elab.finish(mctx, local_env, &m, &ty)
}

pub(crate) fn visit_calc(
    elab: &Elaborator,
    mctx: &mut MetaCtx,
    local_env: &LocalEnv,
    block: &CalcBlock,
) -> Result<(Term, Term), Error> {
    let error = |kind, step| -> Error {
        ChainError {
            kind,
            step,
            local_env: local_env.clone(),
        }
        .into()
    };
    if block.steps.is_empty() {
        return Err(error(ChainErrorKind::Empty, 0));
    }
    let (mut lhs, _) = elab.visit_expr(mctx, local_env, &block.start, None)?;
    let mut acc: Option<(Name, Term, Term)> = None;
    for (i, step) in block.steps.iter().enumerate() {
        let wrap = |err: Error| {
            error(
                ChainErrorKind::StepType {
                    source: Box::new(err),
                },
                i,
            )
        };
        let (rhs, _) = elab
            .visit_expr(mctx, local_env, &step.rhs, None)
            .map_err(wrap)?;
        let statement = app(
            step.relation.clone(),
            [Expr::Term(lhs.clone()), Expr::Term(rhs.clone())],
        );
        let (statement, _) = elab
            .visit_type(mctx, local_env, &statement)
            .map_err(wrap)?;
        let statement = mctx.instantiate(&statement);
        let Term::Const(relation) = statement.head() else {
            return Err(error(ChainErrorKind::NotARelation { ty: statement }, i));
        };
        let relation = relation.name.clone();
        let (proof, _) = elab
            .elab(mctx, local_env, &step.proof, Some(&statement))
            .map_err(wrap)?;
        acc = Some(match acc {
            None => (relation, proof, statement),
            Some((acc_relation, acc_proof, _)) => {
                let Some(rule) = elab.env().trans_rule(&acc_relation, &relation) else {
                    return Err(error(
                        ChainErrorKind::UnregisteredRelation {
                            left: acc_relation,
                            right: relation,
                        },
                        i,
                    ));
                };
                let combined = app(
                    Expr::Ident(rule.clone()),
                    [Expr::Term(acc_proof), Expr::Term(proof)],
                );
                let (combined, ty) = elab
                    .elab(mctx, local_env, &combined, None)
                    .map_err(wrap)?;
                let ty = mctx.instantiate(&ty);
                let Term::Const(head) = ty.head() else {
                    return Err(error(ChainErrorKind::NotARelation { ty }, i));
                };
                (head.name.clone(), combined, ty)
            }
        });
        lhs = rhs;
    }
    match acc {
        Some((_, proof, statement)) => Ok((proof, statement)),
        None => Err(error(ChainErrorKind::Empty, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{calc, ident};
    use crate::prelude;
    use crate::tt::{mk_arrow, mk_const, mk_prop, Level, Local};

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
    }

    /// `a b c : Nat` with `h₁ : a = b` and `h₂ : b ≤ c`.
    fn context() -> LocalEnv {
        let nat = c("Nat");
        let [a, b, c_] = ["a", "b", "c"].map(|x| Local::fresh(Name::from_str(x), nat.clone()));
        let eq = mk_const(Name::from_str("Eq"), vec![Level::one()]).apply([
            nat.clone(),
            a.term(),
            b.term(),
        ]);
        let le = c("Nat.le").apply([b.term(), c_.term()]);
        LocalEnv::new(vec![
            a,
            b,
            c_,
            Local::fresh(Name::from_str("h₁"), eq),
            Local::fresh(Name::from_str("h₂"), le),
        ])
    }

    #[test]
    fn mixed_chain() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = context();
        let block = CalcBlock {
            start: ident("a"),
            steps: vec![
                step(ident("Eq"), ident("b"), ident("h₁")),
                step(ident("Nat.le"), ident("c"), ident("h₂")),
            ],
        };
        let res = chain(&elab, &local_env, &block).unwrap();
        assert_eq!(pretty(&res.ty, &local_env).to_string(), "a ≤ c");
        assert!(res.term.contains_const(&Name::from_str("Nat.le_of_eq_of_le")));

        let nested = elab
            .elaborate(&calc(block), None, &local_env)
            .unwrap();
        assert!(nested.term.alpha_eq(&res.term));
    }

    #[test]
    fn step_errors_carry_the_index() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = context();
        let wrong = CalcBlock {
            start: ident("a"),
            steps: vec![
                step(ident("Eq"), ident("b"), ident("h₁")),
                step(ident("Nat.le"), ident("c"), ident("h₁")),
            ],
        };
        let err = chain(&elab, &local_env, &wrong).unwrap_err();
        let Error::Chain(err) = err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(err.step, 1);
        assert!(matches!(err.kind, ChainErrorKind::StepType { .. }));

        let err = chain(
            &elab,
            &local_env,
            &CalcBlock {
                start: ident("a"),
                steps: vec![],
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Chain(ChainError {
                kind: ChainErrorKind::Empty,
                ..
            })
        ));
    }

    #[test]
    fn unregistered_and_non_relations() {
        let mut env = prelude::env().unwrap();
        let nat = c("Nat");
        let rel_ty = mk_arrow(nat.clone(), mk_arrow(nat, mk_prop()));
        env.add_axiom(Name::from_str("R"), vec![], rel_ty.clone())
            .unwrap();
        let elab = Elaborator::new(&env);
        let local_env = context();
        let r = c("R").apply([local_env.locals[1].term(), local_env.locals[2].term()]);
        let local_env = local_env.extended([
            Local::fresh(Name::from_str("h₃"), r),
            Local::fresh(Name::from_str("r"), rel_ty),
        ]);
        let block = CalcBlock {
            start: ident("a"),
            steps: vec![
                step(ident("Eq"), ident("b"), ident("h₁")),
                step(ident("R"), ident("c"), ident("h₃")),
            ],
        };
        let err = chain(&elab, &local_env, &block).unwrap_err();
        insta::assert_snapshot!(err.to_string(), @"step 1: no transitivity rule for Eq followed by R");

        let block = CalcBlock {
            start: ident("a"),
            steps: vec![step(ident("r"), ident("b"), Expr::Hole)],
        };
        let err = chain(&elab, &local_env, &block).unwrap_err();
        assert!(matches!(
            err,
            Error::Chain(ChainError {
                kind: ChainErrorKind::NotARelation { .. },
                step: 0,
                ..
            })
        ));
    }
}
