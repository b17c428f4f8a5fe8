//! Tactics transform a [ProofState] into a new one.
//!
//! A primitive tactic solves the first goal by assigning its hole, possibly in terms of
//! fresh goals that take its place. States are values, so a failed tactic leaves the
//! state it was given untouched.

use std::fmt::Display;
use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::elab::Elaborator;
use crate::error::Error;
use crate::expr::Expr;
use crate::kernel::{Env, InductiveInfo};
use crate::print::{as_numeral, pretty};
use crate::state::{Goal, MetaCtx, ProofState};
use crate::tt::{
    mk_abs, mk_app, mk_const, mk_ctor, Id, Level, Local, LocalEnv, Name, Term,
};

#[derive(Debug, Clone)]
pub enum Tactic {
    /// Moves leading binders of the target into the context, one per name (at least one).
    Intro(Vec<Name>),
    Cases {
        hyp: Name,
        names: Vec<Name>,
    },
    Induction {
        var: Name,
        names: Vec<Name>,
    },
    Rewrite {
        eq: Expr,
        reverse: bool,
        occurrence: Option<usize>,
    },
    Split,
    Assumption,
    Exact(Expr),
    Apply(Expr),
    Simp(Vec<Expr>),
    Rfl,
    Decide,
    Sorry,
    Seq(Vec<Tactic>),
    Repeat(Box<Tactic>),
    Focus(Box<Tactic>),
    All(Box<Tactic>),
    OrElse(Box<Tactic>, Box<Tactic>),
}

fn names(names: &[&str]) -> Vec<Name> {
    names.iter().map(|name| Name::from_str(name)).collect()
}

pub fn intro(xs: &[&str]) -> Tactic {
    Tactic::Intro(names(xs))
}

pub fn cases(hyp: &str, with: &[&str]) -> Tactic {
    Tactic::Cases {
        hyp: Name::from_str(hyp),
        names: names(with),
    }
}

pub fn induction(var: &str, with: &[&str]) -> Tactic {
    Tactic::Induction {
        var: Name::from_str(var),
        names: names(with),
    }
}

pub fn rewrite(eq: Expr) -> Tactic {
    Tactic::Rewrite {
        eq,
        reverse: false,
        occurrence: None,
    }
}

pub fn rewrite_rev(eq: Expr) -> Tactic {
    Tactic::Rewrite {
        eq,
        reverse: true,
        occurrence: None,
    }
}

pub fn exact(e: Expr) -> Tactic {
    Tactic::Exact(e)
}

pub fn apply(e: Expr) -> Tactic {
    Tactic::Apply(e)
}

pub fn simp(lemmas: impl IntoIterator<Item = Expr>) -> Tactic {
    Tactic::Simp(lemmas.into_iter().collect())
}

pub fn seq(tactics: impl IntoIterator<Item = Tactic>) -> Tactic {
    Tactic::Seq(tactics.into_iter().collect())
}

pub fn repeat(tactic: Tactic) -> Tactic {
    Tactic::Repeat(Box::new(tactic))
}

pub fn focus(tactic: Tactic) -> Tactic {
    Tactic::Focus(Box::new(tactic))
}

pub fn all(tactic: Tactic) -> Tactic {
    Tactic::All(Box::new(tactic))
}

pub fn or_else(first: Tactic, second: Tactic) -> Tactic {
    Tactic::OrElse(Box::new(first), Box::new(second))
}

impl Display for Tactic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let with = |f: &mut std::fmt::Formatter<'_>, names: &[Name]| {
            if !names.is_empty() {
                write!(f, " with")?;
                for name in names {
                    write!(f, " {name}")?;
                }
            }
            Ok(())
        };
        let block = |f: &mut std::fmt::Formatter<'_>, name: &str, tactic: &Tactic| match tactic {
            Tactic::Seq(_) | Tactic::OrElse(..) => write!(f, "{name} ({tactic})"),
            _ => write!(f, "{name} {tactic}"),
        };
        match self {
            Tactic::Intro(xs) => {
                write!(f, "intro")?;
                for x in xs {
                    write!(f, " {x}")?;
                }
                Ok(())
            }
            Tactic::Cases { hyp, names } => {
                write!(f, "cases {hyp}")?;
                with(f, names)
            }
            Tactic::Induction { var, names } => {
                write!(f, "induction {var}")?;
                with(f, names)
            }
            Tactic::Rewrite {
                eq,
                reverse,
                occurrence,
            } => {
                write!(f, "rw [{}{eq}]", if *reverse { "← " } else { "" })?;
                if let Some(k) = occurrence {
                    write!(f, " (occurrence {k})")?;
                }
                Ok(())
            }
            Tactic::Split => write!(f, "split"),
            Tactic::Assumption => write!(f, "assumption"),
            Tactic::Exact(e) => write!(f, "exact {e}"),
            Tactic::Apply(e) => write!(f, "apply {e}"),
            Tactic::Simp(lemmas) => {
                write!(f, "simp")?;
                if !lemmas.is_empty() {
                    let lemmas = lemmas.iter().map(|e| e.to_string()).collect::<Vec<_>>();
                    write!(f, " [{}]", lemmas.join(", "))?;
                }
                Ok(())
            }
            Tactic::Rfl => write!(f, "rfl"),
            Tactic::Decide => write!(f, "decide"),
            Tactic::Sorry => write!(f, "sorry"),
            Tactic::Seq(tactics) => {
                let tactics = tactics.iter().map(|t| t.to_string()).collect::<Vec<_>>();
                write!(f, "{}", tactics.join("; "))
            }
            Tactic::Repeat(tactic) => block(f, "repeat", tactic),
            Tactic::Focus(tactic) => write!(f, "{{ {tactic} }}"),
            Tactic::All(tactic) => block(f, "all", tactic),
            Tactic::OrElse(first, second) => write!(f, "first | {first} | {second}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum TacticErrorKind {
    NoGoals,
    NothingToIntroduce,
    NoMatch { pattern: Term },
    NoAssumptionFound,
    NotInductive { ty: Term },
    WrongGoalShape { expected: &'static str },
    UnknownHypothesis(Name),
    TypeMismatch { expected: Term, inferred: Term },
    NotDefEq { lhs: Term, rhs: Term },
    LargeElimination { target: Term },
    NoProgress,
    DecisionFailed,
    NotAnEquation { ty: Term },
}

/// A tactic whose preconditions do not hold, with the goal it was applied to.
#[derive(Debug, Clone, Error)]
#[error("{}", explain(.kind, .goal))]
pub struct TacticError {
    pub kind: TacticErrorKind,
    pub goal: Option<Goal>,
}

impl TacticError {
    fn new(kind: TacticErrorKind, goal: &Goal) -> TacticError {
        TacticError {
            kind,
            goal: Some(goal.clone()),
        }
    }
}

fn explain(kind: &TacticErrorKind, goal: &Option<Goal>) -> String {
    let empty = LocalEnv::default();
    let local_env = goal.as_ref().map_or(&empty, |goal| &goal.local_env);
    let p = |m: &Term| pretty(m, local_env).to_string();
    let msg = match kind {
        TacticErrorKind::NoGoals => "no goals".to_owned(),
        TacticErrorKind::NothingToIntroduce => "nothing to introduce".to_owned(),
        TacticErrorKind::NoMatch { pattern } => {
            format!("did not find an instance of {} in the target", p(pattern))
        }
        TacticErrorKind::NoAssumptionFound => "no hypothesis matches the target".to_owned(),
        TacticErrorKind::NotInductive { ty } => format!("{} is not an inductive type", p(ty)),
        TacticErrorKind::WrongGoalShape { expected } => {
            format!("the target is not {expected}")
        }
        TacticErrorKind::UnknownHypothesis(name) => format!("unknown hypothesis {name}"),
        TacticErrorKind::TypeMismatch { expected, inferred } => format!(
            "type mismatch: expected {}, but the term has type {}",
            p(expected),
            p(inferred)
        ),
        TacticErrorKind::NotDefEq { lhs, rhs } => {
            format!("{} and {} are not definitionally equal", p(lhs), p(rhs))
        }
        TacticErrorKind::LargeElimination { target } => format!(
            "cannot eliminate a proposition into {}, which is not a proposition",
            p(target)
        ),
        TacticErrorKind::NoProgress => "simp made no progress".to_owned(),
        TacticErrorKind::DecisionFailed => "no decision procedure proved the target".to_owned(),
        TacticErrorKind::NotAnEquation { ty } => format!("{} is not an equation", p(ty)),
    };
    match goal {
        Some(goal) => format!("{msg}\n{goal}"),
        None => msg,
    }
}

/// An external decision procedure. Its proofs are kernel-checked before they are used.
pub trait Decider: Send + Sync {
    fn name(&self) -> &str;

    fn decide(&self, env: &Env, local_env: &LocalEnv, target: &Term) -> Option<Term>;
}

/// Closes `a = b` when both sides are definitionally equal.
pub struct Reflexivity;

impl Decider for Reflexivity {
    fn name(&self) -> &str {
        "reflexivity"
    }

    fn decide(&self, env: &Env, _local_env: &LocalEnv, target: &Term) -> Option<Term> {
        let (level, ty, lhs, rhs) = as_eq(target)?;
        if !env.is_def_eq(&lhs, &rhs) {
            return None;
        }
        Some(mk_const(Name::from_str("Eq.refl"), vec![level]).apply([ty, lhs]))
    }
}

/// Proves `m ≤ n` between numerals with `Nat.le_refl` and `Nat.le_step`.
pub struct NatLe;

impl Decider for NatLe {
    fn name(&self) -> &str {
        "nat_le"
    }

    fn decide(&self, env: &Env, _local_env: &LocalEnv, target: &Term) -> Option<Term> {
        let target = env.whnf(target);
        let Term::Const(head) = target.head() else {
            return None;
        };
        let [lhs, rhs] = target.args()[..] else {
            return None;
        };
        if head.name.as_str() != "Nat.le" {
            return None;
        }
        let m = as_numeral(&env.whnf(lhs))?;
        let n = as_numeral(&env.whnf(rhs))?;
        if m > n {
            return None;
        }
        let succ = mk_ctor(Name::from_str("Nat"), 1, Name::from_str("Nat.succ"), vec![]);
        let mut k = lhs.clone();
        let mut proof = mk_const(Name::from_str("Nat.le_refl"), vec![]).apply([k.clone()]);
        for _ in m..n {
            proof = mk_const(Name::from_str("Nat.le_step"), vec![]).apply([
                lhs.clone(),
                k.clone(),
                proof,
            ]);
            k = mk_app(succ.clone(), k);
        }
        Some(proof)
    }
}

pub fn default_deciders() -> Vec<Arc<dyn Decider>> {
    vec![Arc::new(Reflexivity), Arc::new(NatLe)]
}

/// Splits `@Eq.{u} α a b` into `(u, α, a, b)`.
pub(crate) fn as_eq(m: &Term) -> Option<(Level, Term, Term, Term)> {
    let Term::Const(head) = m.head() else {
        return None;
    };
    if head.name.as_str() != "Eq" || head.levels.len() != 1 {
        return None;
    }
    match m.args()[..] {
        [ty, lhs, rhs] => Some((head.levels[0].clone(), ty.clone(), lhs.clone(), rhs.clone())),
        _ => None,
    }
}

/// The first goal, with its target and hypotheses instantiated.
fn main_goal(state: &ProofState) -> Result<Goal, Error> {
    let Some(goal) = state.goals.first() else {
        return Err(TacticError {
            kind: TacticErrorKind::NoGoals,
            goal: None,
        }
        .into());
    };
    let mut goal = goal.clone();
    goal.target = state.mctx.instantiate(&goal.target);
    for local in &mut goal.local_env.locals {
        local.ty = state.mctx.instantiate(&local.ty);
    }
    Ok(goal)
}

/// Replaces the first goal by `new_goals`.
fn replace_main_goal(state: ProofState, new_goals: Vec<Goal>) -> ProofState {
    let goals = new_goals
        .into_iter()
        .chain(state.goals.iter().skip(1).cloned())
        .collect();
    state.with_goals(goals).prune()
}

impl Tactic {
    pub fn run(&self, elab: &Elaborator, state: ProofState) -> Result<ProofState, Error> {
        if !matches!(self, Tactic::Seq(_)) {
            debug!("{self}");
        }
        match self {
            Tactic::Intro(xs) => {
                if xs.is_empty() {
                    return intro_one(elab, state, None);
                }
                xs.iter()
                    .try_fold(state, |state, x| intro_one(elab, state, Some(x)))
            }
            Tactic::Cases { hyp, names } => eliminate(elab, state, hyp, names, false),
            Tactic::Induction { var, names } => eliminate(elab, state, var, names, true),
            Tactic::Rewrite {
                eq,
                reverse,
                occurrence,
            } => rewrite_target(elab, state, eq, *reverse, *occurrence),
            Tactic::Split => split(elab, state),
            Tactic::Assumption => assumption(elab, state),
            Tactic::Exact(e) => exact_term(elab, state, e),
            Tactic::Apply(e) => apply_term(elab, state, e),
            Tactic::Simp(lemmas) => simplify(elab, state, lemmas),
            Tactic::Rfl => rfl(elab, state),
            Tactic::Decide => decide(elab, state),
            Tactic::Sorry => {
                let goal = main_goal(&state)?;
                let mut state = state;
                let m = state.mctx.new_deferred(&goal.local_env, goal.target.clone());
                state.mctx.assign_goal(&goal, m);
                Ok(replace_main_goal(state, vec![]))
            }
            Tactic::Seq(tactics) => tactics
                .iter()
                .try_fold(state, |state, tactic| tactic.run(elab, state)),
            Tactic::Repeat(tactic) => {
                let mut state = state;
                loop {
                    let before = state.fingerprint();
                    match tactic.run(elab, state.clone()) {
                        Ok(next) if next.fingerprint() == before => return Ok(next),
                        Ok(next) => state = next,
                        Err(Error::Tactic(_)) => return Ok(state),
                        Err(err) => return Err(err),
                    }
                }
            }
            Tactic::Focus(tactic) => {
                let goal = main_goal(&state)?;
                let rest = state.goals[1..].to_vec();
                let next = tactic.run(elab, state.with_goals(vec![goal]))?;
                let goals = next.goals.iter().cloned().chain(rest).collect();
                Ok(next.with_goals(goals).prune())
            }
            Tactic::All(tactic) => {
                let originals = state.goals.clone();
                let mut state = state;
                let mut goals = vec![];
                for goal in originals {
                    if state.mctx.is_assigned(goal.id) {
                        continue;
                    }
                    let next = tactic.run(elab, state.with_goals(vec![goal]))?;
                    goals.extend(next.goals.iter().cloned());
                    state = next;
                }
                Ok(state.with_goals(goals).prune())
            }
            Tactic::OrElse(first, second) => match first.run(elab, state.clone()) {
                Err(Error::Tactic(_)) => {
                    debug!("{first} failed, trying {second}");
                    second.run(elab, state)
                }
                result => result,
            },
        }
    }
}

fn intro_one(elab: &Elaborator, mut state: ProofState, name: Option<&Name>) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    let Term::Pi(pi) = elab.whnf(&state.mctx, &goal.target) else {
        return Err(TacticError::new(TacticErrorKind::NothingToIntroduce, &goal).into());
    };
    let name = match name {
        Some(name) => name.clone(),
        None if pi.binder_name.as_str() == "_" => Name::from_str("h"),
        None => pi.binder_name.clone(),
    };
    let x = Local::fresh(name, pi.binder_type.clone());
    let new_goal = Goal::new(
        goal.local_env.extended([x.clone()]),
        pi.body.open(&[x.term()], 0),
    );
    state.mctx.assign_goal(&goal, new_goal.hole().abs(&[x]));
    Ok(replace_main_goal(state, vec![new_goal]))
}

fn exact_term(elab: &Elaborator, mut state: ProofState, e: &Expr) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    let mut mctx = state.mctx.clone();
    let (m, ty) = elab.visit_expr(&mut mctx, &goal.local_env, e, Some(&goal.target))?;
    if !elab.unify(&mut mctx, &goal.local_env, &ty, &goal.target) {
        let inferred = mctx.instantiate(&ty);
        return Err(TacticError::new(
            TacticErrorKind::TypeMismatch {
                expected: goal.target.clone(),
                inferred,
            },
            &goal,
        )
        .into());
    }
    close_with(elab, &mut mctx, &goal, m)?;
    let new_goals = elab.new_goals(&mctx, &goal.hole());
    state.mctx = mctx;
    Ok(replace_main_goal(state, new_goals))
}

fn close_with(elab: &Elaborator, mctx: &mut MetaCtx, goal: &Goal, m: Term) -> Result<(), Error> {
    elab.synthesize_instances(mctx, false)?;
    let m = mctx.instantiate(&m);
    mctx.assign_goal(goal, m);
    Ok(())
}

fn apply_term(elab: &Elaborator, mut state: ProofState, e: &Expr) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    let local_env = &goal.local_env;
    let mut mctx = state.mctx.clone();
    let (mut m, mut ty) = elab.visit_expr(&mut mctx, local_env, e, None)?;
    loop {
        let mut trial = mctx.clone();
        if elab.unify(&mut trial, local_env, &ty, &goal.target) {
            mctx = trial;
            break;
        }
        let Term::Pi(pi) = elab.whnf(&mctx, &ty) else {
            let inferred = mctx.instantiate(&ty);
            return Err(TacticError::new(
                TacticErrorKind::TypeMismatch {
                    expected: goal.target.clone(),
                    inferred,
                },
                &goal,
            )
            .into());
        };
        let hole = if elab.is_class(&mctx, &pi.binder_type) {
            mctx.new_instance_hole(local_env, pi.binder_type.clone())
        } else {
            mctx.new_hole(local_env, pi.binder_type.clone())
        };
        ty = pi.body.open(&[hole.clone()], 0);
        m = mk_app(m, hole);
    }
    close_with(elab, &mut mctx, &goal, m)?;
    let new_goals = elab.new_goals(&mctx, &goal.hole());
    state.mctx = mctx;
    Ok(replace_main_goal(state, new_goals))
}

fn assumption(elab: &Elaborator, mut state: ProofState) -> Result<ProofState, Error> {
    if state.goals.is_empty() {
        return Ok(state);
    }
    let goal = main_goal(&state)?;
    for local in goal.local_env.locals.iter().rev() {
        let mut trial = state.mctx.clone();
        if elab.unify(&mut trial, &goal.local_env, &local.ty, &goal.target) {
            trial.assign_goal(&goal, local.term());
            state.mctx = trial;
            return Ok(replace_main_goal(state, vec![]));
        }
    }
    Err(TacticError::new(TacticErrorKind::NoAssumptionFound, &goal).into())
}

/// The inductive type `ty` unfolds to, with its universe levels and parameters.
pub(crate) fn inductive_of<'e>(elab: &Elaborator<'e>, mctx: &MetaCtx, ty: &Term) -> Option<(&'e InductiveInfo, Vec<Level>, Vec<Term>)> {
    let ty = elab.whnf(mctx, ty);
    let Term::Const(head) = ty.head() else {
        return None;
    };
    let info = elab.env().inductive(&head.name)?;
    let args = ty.args();
    if args.len() != info.num_params {
        return None;
    }
    Some((
        info,
        head.levels.clone(),
        args.into_iter().cloned().collect(),
    ))
}

/// Peels the parameters off a constructor type.
pub(crate) fn ctor_fields_type(elab: &Elaborator, info: &InductiveInfo, index: usize, levels: &[Level], params: &[Term]) -> Term {
    let mut ty = info.ctors[index]
        .ty
        .instantiate_level_params(&info.level_params, levels);
    for param in params {
        if let Term::Pi(pi) = elab.env().whnf(&ty) {
            ty = pi.body.open(&[param.clone()], 0);
        }
    }
    ty
}

fn split(elab: &Elaborator, mut state: ProofState) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    let wrong_shape = || -> Error {
        TacticError::new(
            TacticErrorKind::WrongGoalShape {
                expected: "an inductive type with a single constructor",
            },
            &goal,
        )
        .into()
    };
    let Some((info, levels, params)) = inductive_of(elab, &state.mctx, &goal.target) else {
        return Err(wrong_shape());
    };
    if info.ctors.len() != 1 {
        return Err(wrong_shape());
    }
    let ctor = &info.ctors[0];
    let mut m = mk_ctor(info.name.clone(), 0, ctor.name.clone(), levels.clone()).apply(params.clone());
    let mut ty = ctor_fields_type(elab, info, 0, &levels, &params);
    let mut goals = vec![];
    for _ in 0..ctor.num_fields {
        let Term::Pi(pi) = ty.clone() else {
            return Err(wrong_shape());
        };
        let field_goal = Goal::new(goal.local_env.clone(), pi.binder_type.clone());
        let hole = field_goal.hole();
        goals.push(field_goal);
        ty = pi.body.open(&[hole.clone()], 0);
        m = mk_app(m, hole);
    }
    state.mctx.assign_goal(&goal, m);
    Ok(replace_main_goal(state, goals))
}

/// Case analysis (and, with `induction`, recursion) on the hypothesis `major`.
///
/// Hypotheses depending on `major` are reverted into the motive and reintroduced in every
/// new goal. Names are consumed in order: the fields of each constructor, then its
/// induction hypotheses.
fn eliminate(
    elab: &Elaborator,
    mut state: ProofState,
    major: &Name,
    names: &[Name],
    induction: bool,
) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    let local_env = &goal.local_env;
    let Some(x) = local_env.find(major).cloned() else {
        return Err(TacticError::new(TacticErrorKind::UnknownHypothesis(major.clone()), &goal).into());
    };
    let Some((info, levels, params)) = inductive_of(elab, &state.mctx, &x.ty) else {
        let ty = x.ty.clone();
        return Err(TacticError::new(TacticErrorKind::NotInductive { ty }, &goal).into());
    };

    let Some(position) = local_env.position(x.id) else {
        return Err(TacticError::new(TacticErrorKind::UnknownHypothesis(major.clone()), &goal).into());
    };
    let mut reverted: Vec<Id> = vec![x.id];
    let mut deps: Vec<Local> = vec![];
    for local in &local_env.locals[position + 1..] {
        if reverted.iter().any(|id| local.ty.contains_local(*id)) {
            reverted.push(local.id);
            deps.push(local.clone());
        }
    }
    let motive_body = goal.target.pi(&deps);
    let motive = motive_body.abs(&[x.clone()]);

    let target_level = elab.infer_sort(&state.mctx, local_env, &motive_body)?;
    let target_level = state.mctx.instantiate_level(&target_level);
    let rec_levels = match &info.elim_level {
        Some(_) => std::iter::once(target_level)
            .chain(levels.iter().cloned())
            .collect::<Vec<_>>(),
        None => {
            if !target_level.is_zero() {
                return Err(TacticError::new(
                    TacticErrorKind::LargeElimination {
                        target: goal.target.clone(),
                    },
                    &goal,
                )
                .into());
            }
            levels.clone()
        }
    };

    let kept = LocalEnv::new(
        local_env
            .locals
            .iter()
            .filter(|local| !reverted.contains(&local.id))
            .cloned()
            .collect(),
    );
    let mut names = names.iter();
    let mut minors = vec![];
    let mut new_goals = vec![];
    for (index, ctor) in info.ctors.iter().enumerate() {
        let mut fields: Vec<Local> = vec![];
        let mut ty = ctor_fields_type(elab, info, index, &levels, &params);
        while let Term::Pi(pi) = ty.clone() {
            let name = match names.next() {
                Some(name) => name.clone(),
                None if pi.binder_name.as_str() == "_" => Name::from_str("a"),
                None => pi.binder_name.clone(),
            };
            let field = Local::fresh(name, pi.binder_type.clone());
            ty = pi.body.open(&[field.term()], 0);
            fields.push(field);
        }
        let num_recursive = ctor.recursive.iter().filter(|r| **r).count();
        let ihs = fields
            .iter()
            .zip(&ctor.recursive)
            .filter(|(_, recursive)| **recursive)
            .map(|(field, _)| {
                let given = if induction { names.next() } else { None };
                let name = match given {
                    Some(name) => name.clone(),
                    None if num_recursive == 1 => Name::from_str("ih"),
                    None => Name::from_str(&format!("{}_ih", field.name)),
                };
                Local::fresh(name, motive_body.subst(&[(x.id, field.term())]))
            })
            .collect::<Vec<_>>();

        let ctor_app = mk_ctor(info.name.clone(), index, ctor.name.clone(), levels.clone())
            .apply(params.iter().cloned().chain(fields.iter().map(Local::term)));
        let mut subst = vec![(x.id, ctor_app)];
        let mut new_deps = vec![];
        for dep in &deps {
            let new_dep = Local::fresh(dep.name.clone(), dep.ty.subst(&subst));
            subst.push((dep.id, new_dep.term()));
            new_deps.push(new_dep);
        }

        let ih_hyps: &[Local] = if induction { &ihs } else { &[] };
        let hyps = fields.iter().chain(ih_hyps).chain(&new_deps).cloned();
        let new_goal = Goal::new(kept.extended(hyps), goal.target.subst(&subst));
        let binders = fields
            .iter()
            .chain(&ihs)
            .chain(&new_deps)
            .cloned()
            .collect::<Vec<_>>();
        minors.push(new_goal.hole().abs(&binders));
        new_goals.push(new_goal);
    }

    let proof = mk_const(info.rec.clone(), rec_levels)
        .apply(params)
        .apply([motive])
        .apply(minors)
        .apply([x.term()])
        .apply(deps.iter().map(Local::term));
    state.mctx.assign_goal(&goal, proof);
    Ok(replace_main_goal(state, new_goals))
}

fn rewrite_target(
    elab: &Elaborator,
    mut state: ProofState,
    e: &Expr,
    reverse: bool,
    occurrence: Option<usize>,
) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    let local_env = &goal.local_env;
    let mut mctx = state.mctx.clone();
    let (mut h, mut h_ty) = elab.visit_expr(&mut mctx, local_env, e, None)?;
    while let Term::Pi(pi) = elab.whnf(&mctx, &h_ty) {
        let hole = if elab.is_class(&mctx, &pi.binder_type) {
            mctx.new_instance_hole(local_env, pi.binder_type.clone())
        } else {
            mctx.new_hole(local_env, pi.binder_type.clone())
        };
        h_ty = pi.body.open(&[hole.clone()], 0);
        h = mk_app(h, hole);
    }
    let h_ty = mctx.instantiate(&h_ty);
    let Some((level, ty, lhs, rhs)) = as_eq(&h_ty) else {
        return Err(TacticError::new(TacticErrorKind::NotAnEquation { ty: h_ty }, &goal).into());
    };
    let target_level = elab.infer_sort(&mctx, local_env, &goal.target)?;
    if !mctx.instantiate_level(&target_level).is_zero() {
        return Err(TacticError::new(
            TacticErrorKind::WrongGoalShape {
                expected: "a proposition",
            },
            &goal,
        )
        .into());
    }

    let (from, to) = if reverse { (&rhs, &lhs) } else { (&lhs, &rhs) };
    // Fix the holes of the pattern at its first match.
    if from.metadata().has_hole {
        for subterm in goal.target.closed_subterms() {
            if !same_head(&subterm, from) {
                continue;
            }
            let mut trial = mctx.clone();
            if elab.unify(&mut trial, local_env, from, &subterm) {
                mctx = trial;
                break;
            }
        }
    }
    let from = mctx.instantiate(from);
    let to = mctx.instantiate(to);
    let ty = mctx.instantiate(&ty);
    let level = mctx.instantiate_level(&level);
    let Some(body) = goal.target.abstract_occurrences(&from, occurrence) else {
        return Err(TacticError::new(TacticErrorKind::NoMatch { pattern: from }, &goal).into());
    };
    let motive = mk_abs(Name::from_str("x"), ty.clone(), body.clone());
    let new_goal = Goal::new(local_env.clone(), body.open(&[to], 0));

    let eq_subst = mk_const(Name::from_str("Eq.subst"), vec![level.clone()]);
    let proof = if reverse {
        eq_subst.apply([ty, lhs, rhs, motive, h.clone(), new_goal.hole()])
    } else {
        let symm = mk_const(Name::from_str("Eq.symm"), vec![level]).apply([
            ty.clone(),
            lhs.clone(),
            rhs.clone(),
            h.clone(),
        ]);
        eq_subst.apply([ty, rhs, lhs, motive, symm, new_goal.hole()])
    };
    close_with(elab, &mut mctx, &goal, proof)?;
    let side_goals = elab.new_goals(&mctx, &h);
    state.mctx = mctx;
    let goals = std::iter::once(new_goal).chain(side_goals).collect();
    Ok(replace_main_goal(state, goals))
}

fn same_head(m1: &Term, m2: &Term) -> bool {
    if m1.args().len() != m2.args().len() {
        return false;
    }
    match (m1.head(), m2.head()) {
        (Term::Const(c1), Term::Const(c2)) => c1.name == c2.name,
        (Term::Ctor(c1), Term::Ctor(c2)) => c1.inductive == c2.inductive && c1.index == c2.index,
        (Term::Local(x1), Term::Local(x2)) => x1.id == x2.id,
        (_, Term::Hole(_)) => true,
        _ => false,
    }
}

fn simplify(elab: &Elaborator, state: ProofState, lemmas: &[Expr]) -> Result<ProofState, Error> {
    if state.goals.is_empty() {
        return Ok(state);
    }
    let mut state = state;
    let mut steps = 0;
    'rewrite: while elab.options().simp_max_steps.map_or(true, |max| steps < max) {
        let before = main_goal(&state)?;
        for lemma in lemmas {
            match rewrite_target(elab, state.clone(), lemma, false, None) {
                Ok(next) if next.goals.len() == state.goals.len() => {
                    let after = main_goal(&next)?;
                    if after.target.alpha_eq(&before.target) {
                        continue;
                    }
                    state = next;
                    steps += 1;
                    continue 'rewrite;
                }
                Ok(_) | Err(Error::Tactic(_)) => continue,
                Err(err) => return Err(err),
            }
        }
        break;
    }
    match rfl(elab, state.clone()) {
        Ok(next) => return Ok(next),
        Err(Error::Tactic(_)) => {}
        Err(err) => return Err(err),
    }
    if steps == 0 {
        let goal = main_goal(&state)?;
        return Err(TacticError::new(TacticErrorKind::NoProgress, &goal).into());
    }
    Ok(state)
}

fn rfl(elab: &Elaborator, mut state: ProofState) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    let target = elab.whnf(&state.mctx, &goal.target);
    let Some((level, ty, lhs, rhs)) = as_eq(&target) else {
        return Err(TacticError::new(
            TacticErrorKind::WrongGoalShape {
                expected: "an equation",
            },
            &goal,
        )
        .into());
    };
    let mut mctx = state.mctx.clone();
    if !elab.unify(&mut mctx, &goal.local_env, &lhs, &rhs) {
        return Err(TacticError::new(TacticErrorKind::NotDefEq { lhs, rhs }, &goal).into());
    }
    let proof = mk_const(Name::from_str("Eq.refl"), vec![level]).apply([ty, lhs]);
    mctx.assign_goal(&goal, mctx.instantiate(&proof));
    state.mctx = mctx;
    Ok(replace_main_goal(state, vec![]))
}

fn decide(elab: &Elaborator, mut state: ProofState) -> Result<ProofState, Error> {
    let goal = main_goal(&state)?;
    if !goal.target.metadata().has_hole {
        for decider in elab.deciders() {
            let Some(proof) = decider.decide(elab.env(), &goal.local_env, &goal.target) else {
                continue;
            };
            match elab
                .env()
                .check_in(elab.level_params(), &goal.local_env, &proof, &goal.target)
            {
                Ok(()) => {
                    debug!("{} decided {}", decider.name(), pretty(&goal.target, &goal.local_env));
                    state.mctx.assign_goal(&goal, proof);
                    return Ok(replace_main_goal(state, vec![]));
                }
                Err(err) => debug!("{} produced an ill-typed proof: {err}", decider.name()),
            }
        }
    }
    Err(TacticError::new(TacticErrorKind::DecisionFailed, &goal).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{app, ident};
    use crate::prelude;
    use crate::tt::{mk_arrow, mk_prop};

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
    }

    fn and(a: Term, b: Term) -> Term {
        c("And").apply([a, b])
    }

    fn props(names: &[&str]) -> LocalEnv {
        LocalEnv::new(
            names
                .iter()
                .map(|name| Local::fresh(Name::from_str(name), mk_prop()))
                .collect(),
        )
    }

    #[test]
    fn and_swap() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a", "b"]);
        let a = local_env.locals[0].term();
        let b = local_env.locals[1].term();
        let target = mk_arrow(and(a.clone(), b.clone()), and(b, a));
        let script = seq([
            intro(&["h"]),
            cases("h", &["ha", "hb"]),
            Tactic::Split,
            focus(exact(ident("hb"))),
            focus(exact(ident("ha"))),
        ]);
        let res = elab.prove(&local_env, &target, &script).unwrap();
        let ty = env.infer(&local_env, &res.term).unwrap();
        assert!(env.is_def_eq(&ty, &target));
        assert!(res.ty.alpha_eq(&target));
    }

    #[test]
    fn cases_yields_one_goal_per_constructor() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a", "b", "p"]);
        let [a, b, p] = [0, 1, 2].map(|i| local_env.locals[i].term());
        let target = mk_arrow(c("Or").apply([a, b]), p);
        let state = ProofState::new(local_env, target);
        let state = seq([intro(&["h"]), cases("h", &[])]).run(&elab, state).unwrap();
        assert_eq!(state.goals.len(), 2);
        insta::assert_snapshot!(state.to_string(), @r"
        a : Prop
        b : Prop
        p : Prop
        h : a
        ⊢ p

        a : Prop
        b : Prop
        p : Prop
        h : b
        ⊢ p
        ");
    }

    #[test]
    fn intro_without_binder_fails() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a"]);
        let state = ProofState::new(local_env.clone(), local_env.locals[0].term());
        let err = intro(&[]).run(&elab, state).unwrap_err();
        assert!(matches!(
            err,
            Error::Tactic(TacticError {
                kind: TacticErrorKind::NothingToIntroduce,
                ..
            })
        ));
    }

    #[test]
    fn empty_state_is_left_alone() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a"]);
        let a = local_env.locals[0].term();
        let state = ProofState::new(local_env, mk_arrow(a.clone(), a));
        let done = seq([intro(&["h"]), Tactic::Assumption]).run(&elab, state).unwrap();
        assert!(done.is_done());
        let again = Tactic::Assumption.run(&elab, done.clone()).unwrap();
        assert!(again.is_done());
        assert!(again.proof().alpha_eq(&done.proof()));
        let again = simp([ident("Nat.zero_add")]).run(&elab, done.clone()).unwrap();
        assert!(again.is_done());
        let err = Tactic::Split.run(&elab, done).unwrap_err();
        assert!(matches!(
            err,
            Error::Tactic(TacticError {
                kind: TacticErrorKind::NoGoals,
                ..
            })
        ));
    }

    #[test]
    fn rewrite_there_and_back() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let nat = c("Nat");
        let x = Local::fresh(Name::from_str("x"), nat.clone());
        let y = Local::fresh(Name::from_str("y"), nat.clone());
        let local_env = LocalEnv::new(vec![x.clone(), y.clone()]);
        let eq = |a: Term, b: Term| {
            mk_const(Name::from_str("Eq"), vec![Level::one()]).apply([nat.clone(), a, b])
        };
        let h = Local::fresh(Name::from_str("h"), eq(x.term(), y.term()));
        let local_env = local_env.extended([h]);
        let add = |a: Term, b: Term| c("Nat.add").apply([a, b]);
        let target = eq(add(x.term(), x.term()), x.term());
        let state = ProofState::new(local_env.clone(), target.clone());

        let state = rewrite(ident("h")).run(&elab, state).unwrap();
        assert_eq!(state.goals.len(), 1);
        assert_eq!(
            pretty(&state.goals[0].target, &local_env).to_string(),
            "y + y = y"
        );
        let state = rewrite_rev(ident("h")).run(&elab, state).unwrap();
        assert!(state.goals[0].target.alpha_eq(&target));

        let only_second = Tactic::Rewrite {
            eq: ident("h"),
            reverse: false,
            occurrence: Some(2),
        };
        let state = ProofState::new(local_env.clone(), target);
        let state = only_second.run(&elab, state).unwrap();
        assert_eq!(
            pretty(&state.goals[0].target, &local_env).to_string(),
            "x + y = x"
        );

        let state = ProofState::new(local_env, eq(y.term(), y.term()));
        let err = rewrite(ident("h")).run(&elab, state).unwrap_err();
        assert!(matches!(
            err,
            Error::Tactic(TacticError {
                kind: TacticErrorKind::NoMatch { .. },
                ..
            })
        ));
    }

    #[test]
    fn induction_reverts_dependent_hypotheses() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let nat = c("Nat");
        let n = Local::fresh(Name::from_str("n"), nat.clone());
        let eq0 = mk_const(Name::from_str("Eq"), vec![Level::one()]).apply([
            nat.clone(),
            n.term(),
            n.term(),
        ]);
        let h = Local::fresh(Name::from_str("h"), eq0.clone());
        let local_env = LocalEnv::new(vec![n.clone(), h]);
        let state = ProofState::new(local_env, eq0);
        let state = induction("n", &["m", "hm"]).run(&elab, state).unwrap();
        insta::assert_snapshot!(state.to_string(), @r"
        h : 0 = 0
        ⊢ 0 = 0

        m : Nat
        hm : m = m → m = m
        h : Nat.succ m = Nat.succ m
        ⊢ Nat.succ m = Nat.succ m
        ");
        let done = all(Tactic::Rfl).run(&elab, state).unwrap();
        let res = elab.qed(done).unwrap();
        assert!(res.obligations.is_empty());
    }

    #[test]
    fn apply_leaves_premises_as_goals() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a", "b"]);
        let a = local_env.locals[0].term();
        let b = local_env.locals[1].term();
        let local_env = local_env.extended([
            Local::fresh(Name::from_str("ha"), a.clone()),
            Local::fresh(Name::from_str("hb"), b.clone()),
        ]);
        let state = ProofState::new(local_env, and(a, b));
        let state = apply(ident("And.intro")).run(&elab, state).unwrap();
        assert_eq!(state.goals.len(), 2);
        let state = all(Tactic::Assumption).run(&elab, state).unwrap();
        assert!(state.is_done());
        elab.qed(state).unwrap();
    }

    #[test]
    fn or_else_recovers_from_tactic_errors_only() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a"]);
        let a = local_env.locals[0].term();
        let local_env = local_env.extended([Local::fresh(Name::from_str("ha"), a.clone())]);
        let state = ProofState::new(local_env, a);
        let done = or_else(Tactic::Split, Tactic::Assumption)
            .run(&elab, state.clone())
            .unwrap();
        assert!(done.is_done());
        let err = or_else(exact(ident("missing")), Tactic::Assumption)
            .run(&elab, state)
            .unwrap_err();
        assert!(matches!(err, Error::Elab(_)));
    }

    #[test]
    fn repeat_stops_without_progress() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a", "b"]);
        let a = local_env.locals[0].term();
        let b = local_env.locals[1].term();
        let target = mk_arrow(a.clone(), mk_arrow(b, a));
        let state = ProofState::new(local_env, target);
        let state = repeat(intro(&[])).run(&elab, state).unwrap();
        assert_eq!(state.goals.len(), 1);
        assert_eq!(state.goals[0].local_env.len(), 4);
        let state = repeat(Tactic::Assumption).run(&elab, state).unwrap();
        assert!(state.is_done());
    }

    #[test]
    fn decide_numeral_inequalities() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let num = |n: usize| {
            (0..n).fold(
                mk_ctor(Name::from_str("Nat"), 0, Name::from_str("Nat.zero"), vec![]),
                |m, _| mk_ctor(Name::from_str("Nat"), 1, Name::from_str("Nat.succ"), vec![]).apply([m]),
            )
        };
        let le = |m, n| c("Nat.le").apply([num(m), num(n)]);
        let res = elab
            .prove(&LocalEnv::default(), &le(1, 3), &Tactic::Decide)
            .unwrap();
        assert!(res.term.contains_const(&Name::from_str("Nat.le_step")));
        let err = elab
            .prove(&LocalEnv::default(), &le(3, 1), &Tactic::Decide)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Tactic(TacticError {
                kind: TacticErrorKind::DecisionFailed,
                ..
            })
        ));
        let zero_plus_zero = app(ident("Nat.add"), [ident("Nat.zero"), ident("Nat.zero")]);
        let goal = crate::expr::eq(zero_plus_zero, ident("Nat.zero"));
        let goal = elab
            .elaborate_type(&goal, &LocalEnv::default())
            .unwrap()
            .term;
        elab.prove(&LocalEnv::default(), &goal, &Tactic::Decide).unwrap();
    }
}
