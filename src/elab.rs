//! Bidirectional elaboration of [Expr] trees into kernel terms.
//!
//! Holes stand for unknown subterms and are solved by higher-order pattern
//! unification. Tactic blocks open a nested [ProofState] that shares the metavariable
//! context of the enclosing term, so terms and tactics can nest freely. Every result is
//! handed to the kernel before it is returned.

use std::iter::zip;
use std::sync::Arc;

use log::{debug, log_enabled, trace};
use thiserror::Error;

use crate::calc;
use crate::error::Error;
use crate::expr::{Expr, ExprLam};
use crate::kernel::{DeclKind, Env};
use crate::print::pretty;
use crate::state::{Goal, MetaCtx, ProofState};
use crate::tactic::{default_deciders, Decider, Tactic};
use crate::tt::{
    mk_app, mk_const, mk_ctor, mk_pi, mk_sort, Id, Level, Local, LocalEnv, Name, Term, TermAbs,
};

/// Name of the axiom `sorryAx.{u} : Π (α : Sort u), α` that stands in for deferred proofs.
pub const SORRY_AX: &str = "sorryAx";

#[derive(Debug, Clone)]
pub struct Options {
    /// Report-only mode: deferred holes become `sorryAx` instead of an error.
    pub allow_deferred: bool,
    pub max_instance_depth: usize,
    /// Upper bound on rewrites performed by a single `simp`; unbounded when `None`.
    pub simp_max_steps: Option<usize>,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            allow_deferred: false,
            max_instance_depth: 8,
            simp_max_steps: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ElabErrorKind {
    UnknownIdentifier(Name),
    TypeMismatch {
        term: Term,
        expected: Term,
        inferred: Term,
    },
    FunctionExpected {
        term: Term,
        ty: Term,
    },
    TypeExpected {
        term: Term,
        ty: Term,
    },
    CannotInferType {
        expr: String,
    },
    UnresolvedHole {
        goal: Goal,
    },
    UnresolvedLevel {
        term: Term,
    },
    InstanceNotFound {
        ty: Term,
    },
    AmbiguousInstance {
        ty: Term,
        candidates: Vec<Name>,
    },
    NoThis,
    AssumptionNotFound {
        prop: Term,
    },
    UnsolvedGoals {
        goals: Vec<Goal>,
    },
    IncompleteProof {
        obligations: Vec<Goal>,
    },
    MissingDeclaration(Name),
}

/// An elaboration failure together with the context it happened in.
#[derive(Debug, Clone, Error)]
#[error("{}", explain(.kind, .local_env))]
pub struct ElabError {
    pub kind: ElabErrorKind,
    pub local_env: LocalEnv,
}

fn explain(kind: &ElabErrorKind, local_env: &LocalEnv) -> String {
    let p = |m: &Term| pretty(m, local_env).to_string();
    let goals = |goals: &[Goal]| {
        goals
            .iter()
            .map(|goal| goal.to_string())
            .collect::<Vec<_>>()
            .join("\n\n")
    };
    match kind {
        ElabErrorKind::UnknownIdentifier(name) => format!("unknown identifier {name}"),
        ElabErrorKind::TypeMismatch {
            term,
            expected,
            inferred,
        } => format!(
            "type mismatch: {} has type {} but is expected to have type {}",
            p(term),
            p(inferred),
            p(expected)
        ),
        ElabErrorKind::FunctionExpected { term, ty } => {
            format!("function expected: {} has type {}", p(term), p(ty))
        }
        ElabErrorKind::TypeExpected { term, ty } => {
            format!("type expected: {} has type {}", p(term), p(ty))
        }
        ElabErrorKind::CannotInferType { expr } => format!("cannot infer the type of {expr}"),
        ElabErrorKind::UnresolvedHole { goal } => {
            format!("could not determine a placeholder\n{goal}")
        }
        ElabErrorKind::UnresolvedLevel { term } => {
            format!("could not determine a universe level in {}", p(term))
        }
        ElabErrorKind::InstanceNotFound { ty } => format!("no instance of {}", p(ty)),
        ElabErrorKind::AmbiguousInstance { ty, candidates } => format!(
            "ambiguous instances of {}: {}",
            p(ty),
            candidates
                .iter()
                .map(|name| name.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
        ElabErrorKind::NoThis => "`this` used in an empty context".to_owned(),
        ElabErrorKind::AssumptionNotFound { prop } => {
            format!("no hypothesis of type {}", p(prop))
        }
        ElabErrorKind::UnsolvedGoals { goals: remaining } => {
            format!("unsolved goals:\n{}", goals(remaining))
        }
        ElabErrorKind::IncompleteProof { obligations } => format!(
            "incomplete proof, {} deferred obligation(s):\n{}",
            obligations.len(),
            goals(obligations)
        ),
        ElabErrorKind::MissingDeclaration(name) => {
            format!("{name} must be declared before it can be used")
        }
    }
}

/// A checked term and its type, plus the obligations that were deferred with `sorry`.
#[derive(Debug, Clone)]
pub struct Elaborated {
    pub term: Term,
    pub ty: Term,
    pub obligations: Vec<Goal>,
}

pub struct Elaborator<'a> {
    env: &'a Env,
    options: Options,
    level_params: Vec<Name>,
    deciders: Vec<Arc<dyn Decider>>,
}

impl<'a> Elaborator<'a> {
    pub fn new(env: &'a Env) -> Self {
        Elaborator {
            env,
            options: Options::default(),
            level_params: vec![],
            deciders: default_deciders(),
        }
    }

    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn with_level_params(mut self, level_params: Vec<Name>) -> Self {
        self.level_params = level_params;
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.deciders.push(decider);
        self
    }

    pub fn env(&self) -> &'a Env {
        self.env
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn level_params(&self) -> &[Name] {
        &self.level_params
    }

    pub fn deciders(&self) -> &[Arc<dyn Decider>] {
        &self.deciders
    }

    pub(crate) fn error(&self, kind: ElabErrorKind, local_env: &LocalEnv) -> ElabError {
        ElabError {
            kind,
            local_env: local_env.clone(),
        }
    }

    /// Elaborates `expr` against `expected` (or infers its type) and kernel-checks the result.
    pub fn elaborate(
        &self,
        expr: &Expr,
        expected: Option<&Term>,
        local_env: &LocalEnv,
    ) -> Result<Elaborated, Error> {
        let mut mctx = MetaCtx::default();
        let (m, ty) = self.elab(&mut mctx, local_env, expr, expected)?;
        self.finish(mctx, local_env, &m, &ty)
    }

    /// Elaborates a type; the result's `ty` is the sort it lives in.
    pub fn elaborate_type(&self, expr: &Expr, local_env: &LocalEnv) -> Result<Elaborated, Error> {
        let mut mctx = MetaCtx::default();
        let (m, level) = self.visit_type(&mut mctx, local_env, expr)?;
        self.finish(mctx, local_env, &m, &mk_sort(level))
    }

    /// Runs `tactic` on the single goal `local_env ⊢ target` and checks the proof.
    pub fn prove(
        &self,
        local_env: &LocalEnv,
        target: &Term,
        tactic: &Tactic,
    ) -> Result<Elaborated, Error> {
        let state = ProofState::new(local_env.clone(), target.clone());
        let state = tactic.run(self, state)?;
        self.qed(state)
    }

    /// Extracts the proof of a finished proof state and kernel-checks it.
    pub fn qed(&self, state: ProofState) -> Result<Elaborated, Error> {
        let root = state.root().clone();
        if !state.is_done() {
            return Err(self
                .error(
                    ElabErrorKind::UnsolvedGoals { goals: state.goals },
                    &root.local_env,
                )
                .into());
        }
        let proof = state.proof();
        self.finish(state.mctx, &root.local_env, &proof, &root.target)
    }

    pub(crate) fn finish(
        &self,
        mut mctx: MetaCtx,
        local_env: &LocalEnv,
        m: &Term,
        ty: &Term,
    ) -> Result<Elaborated, Error> {
        self.synthesize_instances(&mut mctx, true)?;
        let term = mctx.instantiate(m);
        let ty = mctx.instantiate(ty);
        let unresolved = mctx
            .open_goals(&term)
            .into_iter()
            .chain(mctx.open_goals(&ty))
            .next();
        if let Some(goal) = unresolved {
            let local_env = goal.local_env.clone();
            return Err(self
                .error(ElabErrorKind::UnresolvedHole { goal }, &local_env)
                .into());
        }
        let obligations = mctx.deferred_goals(&term);
        if !obligations.is_empty() && !self.options.allow_deferred {
            return Err(self
                .error(ElabErrorKind::IncompleteProof { obligations }, local_env)
                .into());
        }
        let term = if obligations.is_empty() {
            term
        } else {
            self.fill_deferred(&mctx, &term, &obligations)?
        };
        if term.has_level_meta() || ty.has_level_meta() {
            return Err(self
                .error(ElabErrorKind::UnresolvedLevel { term }, local_env)
                .into());
        }
        self.env.check_in(&self.level_params, local_env, &term, &ty)?;
        Ok(Elaborated {
            term,
            ty,
            obligations,
        })
    }

    /// Replaces deferred holes by `sorryAx` so the term can be kernel-checked.
    fn fill_deferred(
        &self,
        mctx: &MetaCtx,
        term: &Term,
        obligations: &[Goal],
    ) -> Result<Term, Error> {
        let sorry = Name::from_str(SORRY_AX);
        if self.env.get(&sorry).is_none() {
            return Err(self
                .error(ElabErrorKind::MissingDeclaration(sorry), &LocalEnv::default())
                .into());
        }
        let mut fills: Vec<(Id, Term)> = vec![];
        for goal in obligations {
            let level = self.infer_sort(mctx, &goal.local_env, &goal.target)?;
            let level = mctx.instantiate_level(&level);
            let value = mk_const(sorry.clone(), vec![level])
                .apply([goal.target.clone()])
                .abs(&goal.local_env.locals);
            fills.push((goal.id, value));
        }
        Ok(term.replace_hole(&|hole| {
            fills
                .iter()
                .find(|(id, _)| *id == hole.id)
                .map(|(_, value)| value.clone())
        }))
    }

    pub(crate) fn whnf(&self, mctx: &MetaCtx, m: &Term) -> Term {
        self.env.whnf(&mctx.instantiate(m))
    }

    pub(crate) fn is_class(&self, mctx: &MetaCtx, ty: &Term) -> bool {
        matches!(mctx.instantiate(ty).head(), Term::Const(head) if self.env.is_class(&head.name))
    }

    /// Elaborates `expr`; when `expected` is given the result is unified with it.
    pub(crate) fn elab(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        expr: &Expr,
        expected: Option<&Term>,
    ) -> Result<(Term, Term), Error> {
        let (m, ty) = self.visit_expr(mctx, local_env, expr, expected)?;
        let Some(expected) = expected else {
            return Ok((m, ty));
        };
        if !self.unify(mctx, local_env, &ty, expected) {
            return Err(self
                .error(
                    ElabErrorKind::TypeMismatch {
                        term: mctx.instantiate(&m),
                        expected: mctx.instantiate(expected),
                        inferred: mctx.instantiate(&ty),
                    },
                    local_env,
                )
                .into());
        }
        Ok((m, expected.clone()))
    }

    /// Elaborates `expr` using `expected` only as a hint; the caller unifies.
    pub(crate) fn visit_expr(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        expr: &Expr,
        expected: Option<&Term>,
    ) -> Result<(Term, Term), Error> {
        match expr {
            Expr::Ident(_) | Expr::Explicit(_) | Expr::App(_) => {
                self.visit_app(mctx, local_env, expr)
            }
            Expr::Lam(inner) => self.visit_lam(mctx, local_env, inner, expected),
            Expr::Pi(inner) => {
                let (binder_type, l1) = self.visit_type(mctx, local_env, &inner.binder_type)?;
                let x = Local::fresh(inner.binder_name.clone(), binder_type.clone());
                let body_env = local_env.extended([x.clone()]);
                let (body, l2) = self.visit_type(mctx, &body_env, &inner.body)?;
                Ok((
                    mk_pi(
                        inner.binder_name.clone(),
                        binder_type,
                        body.close(&[x.id], 0),
                        inner.implicit,
                    ),
                    mk_sort(l1.imax(&l2)),
                ))
            }
            Expr::Sort(level) => Ok((mk_sort(level.clone()), mk_sort(level.succ()))),
            Expr::Hole => {
                let ty = match expected {
                    Some(ty) => ty.clone(),
                    None => self.new_type_hole(mctx, local_env),
                };
                Ok((mctx.new_hole(local_env, ty.clone()), ty))
            }
            Expr::Sorry => {
                let Some(ty) = expected else {
                    return Err(self.cannot_infer(expr, local_env));
                };
                Ok((mctx.new_deferred(local_env, ty.clone()), ty.clone()))
            }
            Expr::This => match local_env.locals.last() {
                Some(local) => Ok((local.term(), local.ty.clone())),
                None => Err(self.error(ElabErrorKind::NoThis, local_env).into()),
            },
            Expr::Assumption(prop) => {
                let (prop, _) = self.visit_type(mctx, local_env, prop)?;
                for local in local_env.locals.iter().rev() {
                    let mut trial = mctx.clone();
                    if self.unify(&mut trial, local_env, &local.ty, &prop) {
                        *mctx = trial;
                        return Ok((local.term(), prop));
                    }
                }
                let prop = mctx.instantiate(&prop);
                Err(self
                    .error(ElabErrorKind::AssumptionNotFound { prop }, local_env)
                    .into())
            }
            Expr::Annot(inner) => {
                let (ty, _) = self.visit_type(mctx, local_env, &inner.ty)?;
                let (m, _) = self.elab(mctx, local_env, &inner.expr, Some(&ty))?;
                Ok((m, ty))
            }
            Expr::Term(m) => {
                let ty = self.infer(mctx, local_env, m)?;
                Ok((m.clone(), ty))
            }
            Expr::By(tactic) => {
                let Some(target) = expected else {
                    return Err(self.cannot_infer(expr, local_env));
                };
                self.visit_by(mctx, local_env, tactic, target)
            }
            Expr::Calc(block) => calc::visit_calc(self, mctx, local_env, block),
        }
    }

    fn cannot_infer(&self, expr: &Expr, local_env: &LocalEnv) -> Error {
        self.error(
            ElabErrorKind::CannotInferType {
                expr: expr.to_string(),
            },
            local_env,
        )
        .into()
    }

    fn new_type_hole(&self, mctx: &mut MetaCtx, local_env: &LocalEnv) -> Term {
        let level = mctx.new_level();
        mctx.new_hole(local_env, mk_sort(level))
    }

    /// Elaborates `expr` as a type and returns the level of its sort.
    pub(crate) fn visit_type(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        expr: &Expr,
    ) -> Result<(Term, Level), Error> {
        let (m, ty) = self.visit_expr(mctx, local_env, expr, None)?;
        match self.whnf(mctx, &ty) {
            Term::Sort(inner) => Ok((m, inner.level.clone())),
            ty => {
                let level = mctx.new_level();
                if ty.is_pattern().is_some()
                    && self.unify(mctx, local_env, &ty, &mk_sort(level.clone()))
                {
                    return Ok((m, level));
                }
                Err(self
                    .error(ElabErrorKind::TypeExpected { term: m, ty }, local_env)
                    .into())
            }
        }
    }

    fn visit_ident(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        name: &Name,
    ) -> Result<(Term, Term), Error> {
        if let Some(local) = local_env.find(name) {
            return Ok((local.term(), local.ty.clone()));
        }
        let Some(decl) = self.env.get(name) else {
            return Err(self
                .error(ElabErrorKind::UnknownIdentifier(name.clone()), local_env)
                .into());
        };
        let levels = decl
            .level_params
            .iter()
            .map(|_| mctx.new_level())
            .collect::<Vec<_>>();
        let ty = decl.ty.instantiate_level_params(&decl.level_params, &levels);
        let m = match &decl.kind {
            DeclKind::Constructor { inductive, index } => {
                mk_ctor(inductive.clone(), *index, name.clone(), levels)
            }
            _ => mk_const(name.clone(), levels),
        };
        Ok((m, ty))
    }

    /// Fills the implicit binder `ty` exposes with a fresh hole.
    fn insert_implicit(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        m: Term,
        binder_type: &Term,
        body: &Term,
    ) -> (Term, Term) {
        let hole = if self.is_class(mctx, binder_type) {
            mctx.new_instance_hole(local_env, binder_type.clone())
        } else {
            mctx.new_hole(local_env, binder_type.clone())
        };
        (mk_app(m, hole.clone()), body.open(&[hole], 0))
    }

    fn insert_implicits(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        mut m: Term,
        mut ty: Term,
    ) -> (Term, Term) {
        loop {
            let Term::Pi(pi) = self.whnf(mctx, &ty) else {
                return (m, ty);
            };
            if !pi.implicit {
                return (m, ty);
            }
            (m, ty) = self.insert_implicit(mctx, local_env, m, &pi.binder_type, &pi.body);
        }
    }

    fn visit_app(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        expr: &Expr,
    ) -> Result<(Term, Term), Error> {
        let (head, args) = expr.unapply();
        let (mut m, mut ty, explicit) = match head {
            Expr::Ident(name) => {
                let (m, ty) = self.visit_ident(mctx, local_env, name)?;
                (m, ty, false)
            }
            Expr::Explicit(name) => {
                let (m, ty) = self.visit_ident(mctx, local_env, name)?;
                (m, ty, true)
            }
            _ => {
                let (m, ty) = self.visit_expr(mctx, local_env, head, None)?;
                (m, ty, true)
            }
        };
        for arg in args {
            loop {
                let fun_ty = self.whnf(mctx, &ty);
                let Term::Pi(pi) = &fun_ty else {
                    return Err(self
                        .error(
                            ElabErrorKind::FunctionExpected {
                                term: mctx.instantiate(&m),
                                ty: fun_ty,
                            },
                            local_env,
                        )
                        .into());
                };
                if pi.implicit && !explicit {
                    (m, ty) = self.insert_implicit(mctx, local_env, m, &pi.binder_type, &pi.body);
                    continue;
                }
                let (a, _) = self.elab(mctx, local_env, arg, Some(&pi.binder_type))?;
                ty = pi.body.open(&[a.clone()], 0);
                m = mk_app(m, a);
                break;
            }
        }
        if !explicit {
            (m, ty) = self.insert_implicits(mctx, local_env, m, ty);
        }
        Ok((m, ty))
    }

    fn visit_lam(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        lam: &ExprLam,
        expected: Option<&Term>,
    ) -> Result<(Term, Term), Error> {
        let expected_pi = match expected.map(|ty| self.whnf(mctx, ty)) {
            Some(Term::Pi(pi)) => Some(pi),
            _ => None,
        };
        let binder_type = match (&lam.binder_type, &expected_pi) {
            (Some(ty), pi) => {
                let (ty, _) = self.visit_type(mctx, local_env, ty)?;
                if let Some(pi) = pi {
                    if !self.unify(mctx, local_env, &ty, &pi.binder_type) {
                        return Err(self
                            .error(
                                ElabErrorKind::TypeMismatch {
                                    term: mctx.instantiate(&ty),
                                    expected: mctx.instantiate(&pi.binder_type),
                                    inferred: mctx.instantiate(&ty),
                                },
                                local_env,
                            )
                            .into());
                    }
                }
                ty
            }
            (None, Some(pi)) => pi.binder_type.clone(),
            (None, None) => self.new_type_hole(mctx, local_env),
        };
        let x = Local::fresh(lam.binder_name.clone(), binder_type.clone());
        let body_env = local_env.extended([x.clone()]);
        let body_expected = expected_pi
            .as_ref()
            .map(|pi| pi.body.open(&[x.term()], 0));
        let (body, body_ty) = self.elab(mctx, &body_env, &lam.body, body_expected.as_ref())?;
        let implicit = expected_pi.map_or(false, |pi| pi.implicit);
        Ok((
            body.abs(&[x.clone()]),
            mk_pi(
                lam.binder_name.clone(),
                binder_type,
                body_ty.close(&[x.id], 0),
                implicit,
            ),
        ))
    }

    fn visit_by(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        tactic: &Tactic,
        target: &Term,
    ) -> Result<(Term, Term), Error> {
        let goal = Goal::new(local_env.clone(), mctx.instantiate(target));
        debug!(
            "tactic block for {} with {tactic}",
            pretty(&goal.target, local_env)
        );
        let state = ProofState::with_mctx(goal.clone(), mctx.clone());
        let state = tactic.run(self, state)?;
        if !state.is_done() {
            return Err(self
                .error(ElabErrorKind::UnsolvedGoals { goals: state.goals }, local_env)
                .into());
        }
        *mctx = state.mctx;
        Ok((goal.hole(), goal.target))
    }

    /// Type inference that tolerates holes and does not check arguments.
    pub(crate) fn infer(
        &self,
        mctx: &MetaCtx,
        local_env: &LocalEnv,
        m: &Term,
    ) -> Result<Term, ElabError> {
        match m {
            Term::Var(_) => Err(self.error(
                ElabErrorKind::CannotInferType {
                    expr: m.to_string(),
                },
                local_env,
            )),
            Term::Sort(inner) => Ok(mk_sort(inner.level.succ())),
            Term::Local(inner) => match local_env.get(inner.id) {
                Some(local) => Ok(local.ty.clone()),
                None => Err(self.error(
                    ElabErrorKind::CannotInferType {
                        expr: m.to_string(),
                    },
                    local_env,
                )),
            },
            Term::Const(inner) => match self.env.get(&inner.name) {
                Some(decl) => Ok(decl
                    .ty
                    .instantiate_level_params(&decl.level_params, &inner.levels)),
                None => Err(self.error(
                    ElabErrorKind::MissingDeclaration(inner.name.clone()),
                    local_env,
                )),
            },
            Term::Ctor(inner) => {
                let ctor = self
                    .env
                    .inductive(&inner.inductive)
                    .and_then(|info| Some((info, info.ctors.get(inner.index)?)));
                match ctor {
                    Some((info, ctor)) => Ok(ctor
                        .ty
                        .instantiate_level_params(&info.level_params, &inner.levels)),
                    None => Err(self.error(
                        ElabErrorKind::MissingDeclaration(inner.name.clone()),
                        local_env,
                    )),
                }
            }
            Term::App(inner) => {
                let fun_ty = self.infer(mctx, local_env, &inner.fun)?;
                match self.whnf(mctx, &fun_ty) {
                    Term::Pi(pi) => Ok(pi.body.open(&[inner.arg.clone()], 0)),
                    ty => Err(self.error(
                        ElabErrorKind::FunctionExpected {
                            term: inner.fun.clone(),
                            ty,
                        },
                        local_env,
                    )),
                }
            }
            Term::Abs(inner) => {
                let x = Local::fresh(inner.binder_name.clone(), inner.binder_type.clone());
                let body = inner.body.open(&[x.term()], 0);
                let body_ty = self.infer(mctx, &local_env.extended([x.clone()]), &body)?;
                Ok(mk_pi(
                    inner.binder_name.clone(),
                    inner.binder_type.clone(),
                    body_ty.close(&[x.id], 0),
                    false,
                ))
            }
            Term::Pi(inner) => {
                let l1 = self.infer_sort(mctx, local_env, &inner.binder_type)?;
                let x = Local::fresh(inner.binder_name.clone(), inner.binder_type.clone());
                let body = inner.body.open(&[x.term()], 0);
                let l2 = self.infer_sort(mctx, &local_env.extended([x]), &body)?;
                Ok(mk_sort(l1.imax(&l2)))
            }
            Term::Hole(inner) => Ok(mctx.instantiate(&inner.ty).pi(&inner.local_env.locals)),
        }
    }

    pub(crate) fn infer_sort(
        &self,
        mctx: &MetaCtx,
        local_env: &LocalEnv,
        ty: &Term,
    ) -> Result<Level, ElabError> {
        let sort = self.infer(mctx, local_env, ty)?;
        match self.whnf(mctx, &sort) {
            Term::Sort(inner) => Ok(inner.level.clone()),
            sort => Err(self.error(
                ElabErrorKind::TypeExpected {
                    term: ty.clone(),
                    ty: sort,
                },
                local_env,
            )),
        }
    }

    /// Solves `m1 ≡ m2`, assigning holes and universe metavariables in `mctx`.
    /// On failure `mctx` may hold partial assignments; callers snapshot it when that matters.
    pub(crate) fn unify(&self, mctx: &mut MetaCtx, local_env: &LocalEnv, m1: &Term, m2: &Term) -> bool {
        let m1 = mctx.instantiate(m1);
        let m2 = mctx.instantiate(m2);
        if m1.alpha_eq(&m2) {
            return true;
        }
        if log_enabled!(log::Level::Trace) {
            trace!(
                "unify {} =?= {}",
                pretty(&m1, local_env),
                pretty(&m2, local_env)
            );
        }
        if let Some(result) = self.try_assign(mctx, local_env, &m1, &m2) {
            return result;
        }
        if let Some(result) = self.try_assign(mctx, local_env, &m2, &m1) {
            return result;
        }
        let w1 = self.env.whnf_core(&m1);
        let w2 = self.env.whnf_core(&m2);
        if !w1.alpha_eq(&m1) || !w2.alpha_eq(&m2) {
            return self.unify(mctx, local_env, &w1, &w2);
        }
        match (&w1, &w2) {
            (Term::Sort(s1), Term::Sort(s2)) => return self.unify_level(mctx, &s1.level, &s2.level),
            (Term::Pi(p1), Term::Pi(p2)) => {
                return self.unify_binder(
                    mctx,
                    local_env,
                    &p1.binder_name,
                    (&p1.binder_type, &p1.body),
                    (&p2.binder_type, &p2.body),
                );
            }
            (Term::Abs(a1), Term::Abs(a2)) => {
                return self.unify_binder(
                    mctx,
                    local_env,
                    &a1.binder_name,
                    (&a1.binder_type, &a1.body),
                    (&a2.binder_type, &a2.body),
                );
            }
            (Term::Abs(abs), _) => return self.unify_eta(mctx, local_env, abs, &w2),
            (_, Term::Abs(abs)) => return self.unify_eta(mctx, local_env, abs, &w1),
            _ => {}
        }
        if self.unify_spine(mctx, local_env, &w1, &w2) {
            return true;
        }
        // Lazy delta: unfold the side defined later first.
        let h1 = self.env.head_height(&w1);
        let h2 = self.env.head_height(&w2);
        let u1 = if h1 > 0 && h1 >= h2 {
            self.env.unfold_definition(&w1)
        } else {
            None
        };
        let u2 = if h2 > 0 && h2 >= h1 {
            self.env.unfold_definition(&w2)
        } else {
            None
        };
        match (u1, u2) {
            (None, None) => false,
            (u1, u2) => self.unify(
                mctx,
                local_env,
                &u1.unwrap_or(w1),
                &u2.unwrap_or(w2),
            ),
        }
    }

    fn unify_binder(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        name: &Name,
        (ty1, body1): (&Term, &Term),
        (ty2, body2): (&Term, &Term),
    ) -> bool {
        if !self.unify(mctx, local_env, ty1, ty2) {
            return false;
        }
        let x = Local::fresh(name.clone(), mctx.instantiate(ty1));
        let body1 = body1.open(&[x.term()], 0);
        let body2 = body2.open(&[x.term()], 0);
        self.unify(mctx, &local_env.extended([x]), &body1, &body2)
    }

    // λ x, f x ≡ f
    fn unify_eta(&self, mctx: &mut MetaCtx, local_env: &LocalEnv, abs: &TermAbs, other: &Term) -> bool {
        let x = Local::fresh(abs.binder_name.clone(), mctx.instantiate(&abs.binder_type));
        let body = abs.body.open(&[x.term()], 0);
        let applied = mk_app(other.clone(), x.term());
        self.unify(mctx, &local_env.extended([x]), &body, &applied)
    }

    fn unify_spine(&self, mctx: &mut MetaCtx, local_env: &LocalEnv, m1: &Term, m2: &Term) -> bool {
        let args1 = m1.args();
        let args2 = m2.args();
        if args1.len() != args2.len() {
            return false;
        }
        let snapshot = mctx.clone();
        let heads_match = match (m1.head(), m2.head()) {
            (Term::Const(c1), Term::Const(c2)) => {
                c1.name == c2.name && self.unify_levels(mctx, &c1.levels, &c2.levels)
            }
            (Term::Ctor(c1), Term::Ctor(c2)) => {
                c1.inductive == c2.inductive
                    && c1.index == c2.index
                    && self.unify_levels(mctx, &c1.levels, &c2.levels)
            }
            (Term::Local(x1), Term::Local(x2)) => x1.id == x2.id,
            (Term::Hole(h1), Term::Hole(h2)) => h1.id == h2.id,
            (Term::Var(v1), Term::Var(v2)) => v1.index == v2.index,
            _ => false,
        };
        if heads_match && zip(args1, args2).all(|(a1, a2)| self.unify(mctx, local_env, a1, a2)) {
            return true;
        }
        *mctx = snapshot;
        false
    }

    fn unify_levels(&self, mctx: &mut MetaCtx, ls1: &[Level], ls2: &[Level]) -> bool {
        ls1.len() == ls2.len() && zip(ls1, ls2).all(|(l1, l2)| self.unify_level(mctx, l1, l2))
    }

    pub(crate) fn unify_level(&self, mctx: &mut MetaCtx, l1: &Level, l2: &Level) -> bool {
        let l1 = mctx.instantiate_level(l1);
        let l2 = mctx.instantiate_level(l2);
        if l1.is_equiv(&l2) {
            return true;
        }
        match (&l1, &l2) {
            (Level::Meta(id), l) | (l, Level::Meta(id)) => {
                if l.contains_meta(*id) {
                    return false;
                }
                mctx.assign_level(*id, l.clone());
                true
            }
            (Level::Succ(a1), Level::Succ(a2)) => self.unify_level(mctx, a1, a2),
            (Level::Max(a1, b1), Level::Max(a2, b2)) | (Level::IMax(a1, b1), Level::IMax(a2, b2)) => {
                let snapshot = mctx.clone();
                if self.unify_level(mctx, a1, a2) && self.unify_level(mctx, b1, b2) {
                    return true;
                }
                *mctx = snapshot;
                false
            }
            _ => false,
        }
    }

    /// Solves `?M x₁ ⋯ xₙ ≡ rhs` when the xᵢ are distinct locals.
    /// Returns None when `lhs` is not such a pattern or `rhs` cannot be abstracted.
    fn try_assign(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        lhs: &Term,
        rhs: &Term,
    ) -> Option<bool> {
        let (hole, spine) = lhs.is_pattern()?;
        if hole.deferred || mctx.is_assigned(hole.id) {
            return None;
        }
        let ctx = &hole.local_env.locals;
        if spine.len() < ctx.len() || rhs.contains_hole(hole.id) || !rhs.is_supported_by(&spine) {
            return None;
        }
        let mut binders = ctx.clone();
        let mut renaming = zip(&spine, ctx)
            .map(|(&id, local)| (id, local.term()))
            .collect::<Vec<_>>();
        let mut inverse = zip(ctx, &spine)
            .map(|(local, &id)| (local.id, crate::tt::mk_local(id)))
            .collect::<Vec<_>>();
        let mut ty = mctx.instantiate(&hole.ty);
        for &id in &spine[ctx.len()..] {
            let Term::Pi(pi) = self.whnf(mctx, &ty) else {
                return None;
            };
            let x = Local::fresh(pi.binder_name.clone(), pi.binder_type.clone());
            ty = pi.body.open(&[x.term()], 0);
            renaming.push((id, x.term()));
            inverse.push((x.id, crate::tt::mk_local(id)));
            binders.push(x);
        }
        let inferred = self.infer(mctx, local_env, rhs).ok()?;
        let expected = ty.subst(&inverse);
        if !self.unify(mctx, local_env, &inferred, &expected) {
            return Some(false);
        }
        if mctx.is_assigned(hole.id) {
            return Some(self.unify(mctx, local_env, lhs, rhs));
        }
        let value = rhs.subst(&renaming).abs(&binders);
        trace!("?{} := {}", hole.id, value);
        mctx.assign(hole.id, value);
        Some(true)
    }

    /// Resolves pending instance holes. Without `strict`, holes whose class type is
    /// still undetermined are left for later.
    pub(crate) fn synthesize_instances(&self, mctx: &mut MetaCtx, strict: bool) -> Result<(), Error> {
        loop {
            let mut progress = false;
            let mut remaining = vec![];
            for goal in mctx.pending_instances() {
                if mctx.is_assigned(goal.id) {
                    continue;
                }
                let ty = mctx.instantiate(&goal.target);
                if ty.metadata().has_hole {
                    remaining.push(goal);
                    continue;
                }
                let m = self.resolve_class(mctx, &goal.local_env, &ty, 0)?;
                mctx.assign_goal(&goal, m);
                progress = true;
            }
            let done = remaining.is_empty();
            mctx.set_pending_instances(remaining);
            if done {
                return Ok(());
            }
            if !progress {
                break;
            }
        }
        if !strict {
            return Ok(());
        }
        for goal in mctx.pending_instances() {
            if mctx.is_assigned(goal.id) {
                continue;
            }
            let ty = mctx.instantiate(&goal.target);
            let m = self.resolve_class(mctx, &goal.local_env, &ty, 0)?;
            mctx.assign_goal(&goal, m);
        }
        mctx.set_pending_instances(vec![]);
        Ok(())
    }

    /// Finds the unique best instance of the class type `ty`.
    ///
    /// Hypotheses of class type take precedence over registered instances.
    pub(crate) fn resolve_class(
        &self,
        mctx: &mut MetaCtx,
        local_env: &LocalEnv,
        ty: &Term,
        depth: usize,
    ) -> Result<Term, ElabError> {
        let not_found = || self.error(ElabErrorKind::InstanceNotFound { ty: ty.clone() }, local_env);
        if depth > self.options.max_instance_depth {
            return Err(not_found());
        }
        let Term::Const(class) = ty.head() else {
            return Err(not_found());
        };
        let mut candidates: Vec<(u32, Name, MetaCtx, Term)> = vec![];
        for local in local_env.locals.iter().rev() {
            let local_ty = mctx.instantiate(&local.ty);
            if !matches!(local_ty.head(), Term::Const(head) if head.name == class.name) {
                continue;
            }
            let mut trial = mctx.clone();
            if self.unify(&mut trial, local_env, &local_ty, ty) {
                candidates.push((u32::MAX, local.name.clone(), trial, local.term()));
            }
        }
        'next_instance: for instance in self.env.instances(&class.name) {
            let Some(decl) = self.env.get(&instance.name) else {
                continue;
            };
            let mut trial = mctx.clone();
            let levels = decl
                .level_params
                .iter()
                .map(|_| trial.new_level())
                .collect::<Vec<_>>();
            let mut m = mk_const(instance.name.clone(), levels.clone());
            let mut inst_ty = decl.ty.instantiate_level_params(&decl.level_params, &levels);
            let mut subgoals = vec![];
            while let Term::Pi(pi) = self.whnf(&trial, &inst_ty) {
                let hole = trial.new_hole(local_env, pi.binder_type.clone());
                if self.is_class(&trial, &pi.binder_type) {
                    subgoals.push((hole.clone(), pi.binder_type.clone()));
                }
                inst_ty = pi.body.open(&[hole.clone()], 0);
                m = mk_app(m, hole);
            }
            if !self.unify(&mut trial, local_env, &inst_ty, ty) {
                continue;
            }
            for (hole, sub_ty) in subgoals {
                let sub_ty = trial.instantiate(&sub_ty);
                let Ok(sub) = self.resolve_class(&mut trial, local_env, &sub_ty, depth + 1) else {
                    continue 'next_instance;
                };
                if !self.unify(&mut trial, local_env, &hole, &sub) {
                    continue 'next_instance;
                }
            }
            candidates.push((instance.priority, instance.name.clone(), trial, m));
        }
        let Some(top) = candidates.iter().map(|candidate| candidate.0).max() else {
            return Err(not_found());
        };
        let mut best = candidates
            .into_iter()
            .filter(|candidate| candidate.0 == top)
            .collect::<Vec<_>>();
        if best.len() > 1 {
            return Err(self.error(
                ElabErrorKind::AmbiguousInstance {
                    ty: ty.clone(),
                    candidates: best.into_iter().map(|candidate| candidate.1).collect(),
                },
                local_env,
            ));
        }
        let Some((_, name, trial, m)) = best.pop() else {
            return Err(not_found());
        };
        debug!("instance {name} for {}", pretty(ty, local_env));
        *mctx = trial;
        Ok(mctx.instantiate(&m))
    }

    /// Unassigned holes of `m` that should become goals, in order of occurrence.
    pub(crate) fn new_goals(&self, mctx: &MetaCtx, m: &Term) -> Vec<Goal> {
        let pending = mctx
            .pending_instances()
            .into_iter()
            .map(|goal| goal.id)
            .collect::<Vec<_>>();
        mctx.open_goals(m)
            .into_iter()
            .filter(|goal| !pending.contains(&goal.id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{self, app, assumption, by, ident, lam};
    use crate::kernel::Instance;
    use crate::prelude;
    use crate::tt::{mk_arrow, mk_hole, mk_prop};

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
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
    fn implicit_arguments_and_levels_are_solved() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let res = elab
            .elaborate(&app(ident("Eq.refl"), [ident("Nat.zero")]), None, &LocalEnv::default())
            .unwrap();
        assert_eq!(res.ty.to_string(), "0 = 0");
        assert!(res.obligations.is_empty());
    }

    #[test]
    fn unknown_identifier() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let err = elab
            .elaborate(&ident("nope"), None, &LocalEnv::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Elab(ElabError {
                kind: ElabErrorKind::UnknownIdentifier(_),
                ..
            })
        ));
    }

    #[test]
    fn this_and_assumption_refer_to_hypotheses() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let mut local_env = props(&["a", "b"]);
        let a = local_env.locals[0].clone();
        let b = local_env.locals[1].clone();
        local_env.push(Local::fresh(Name::from_str("ha"), a.term()));
        local_env.push(Local::fresh(Name::from_str("hb"), b.term()));
        let res = elab
            .elaborate(&assumption(ident("a")), None, &local_env)
            .unwrap();
        assert!(res.term.alpha_eq(&local_env.locals[2].term()));
        let res = elab.elaborate(&Expr::This, None, &local_env).unwrap();
        assert!(res.term.alpha_eq(&local_env.locals[3].term()));
        let err = elab
            .elaborate(&Expr::This, None, &LocalEnv::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Elab(ElabError {
                kind: ElabErrorKind::NoThis,
                ..
            })
        ));
    }

    #[test]
    fn tactic_block_inside_lambda() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let local_env = props(&["a"]);
        let a = local_env.locals[0].term();
        let target = mk_arrow(a.clone(), a);
        let e = lam("h", by(Tactic::Exact(ident("h"))));
        let res = elab.elaborate(&e, Some(&target), &local_env).unwrap();
        assert!(env.is_def_eq(&res.ty, &target));
    }

    #[test]
    fn deferred_holes_are_reported() {
        let env = prelude::env().unwrap();
        let local_env = props(&["a"]);
        let a = local_env.locals[0].term();
        let err = Elaborator::new(&env)
            .elaborate(&Expr::Sorry, Some(&a), &local_env)
            .unwrap_err();
        let Error::Elab(ElabError {
            kind: ElabErrorKind::IncompleteProof { obligations },
            ..
        }) = err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(obligations.len(), 1);
        assert!(obligations[0].target.alpha_eq(&a));

        let options = Options {
            allow_deferred: true,
            ..Options::default()
        };
        let res = Elaborator::new(&env)
            .with_options(options)
            .elaborate(&Expr::Sorry, Some(&a), &local_env)
            .unwrap();
        assert_eq!(res.obligations.len(), 1);
        assert!(res.term.contains_const(&Name::from_str(SORRY_AX)));
    }

    #[test]
    fn pattern_unification_abstracts_locals() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let nat = c("Nat");
        let x = Local::fresh(Name::from_str("x"), nat.clone());
        let local_env = LocalEnv::new(vec![x.clone()]);
        let id = Id::fresh();
        let hole = mk_hole(id, nat.clone(), Arc::new(local_env.clone()), false).apply([x.term()]);
        let succ_x = mk_ctor(Name::from_str("Nat"), 1, Name::from_str("Nat.succ"), vec![])
            .apply([x.term()]);
        let mut mctx = MetaCtx::default();
        assert!(elab.unify(&mut mctx, &local_env, &hole, &succ_x));
        assert!(mctx.instantiate(&hole).alpha_eq(&succ_x));
        // The solution must not mention locals outside the hole's context.
        let y = Local::fresh(Name::from_str("y"), nat);
        let other = LocalEnv::new(vec![x.clone(), y.clone()]);
        let id = Id::fresh();
        let hole = mk_hole(id, c("Nat"), Arc::new(local_env), false).apply([x.term()]);
        assert!(!elab.unify(&mut mctx, &other, &hole, &y.term()));
    }

    #[test]
    fn holes_are_not_assigned_untyped_terms() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let x = Local::fresh(Name::from_str("x"), c("Nat"));
        let local_env = LocalEnv::new(vec![x.clone()]);
        let id = Id::fresh();
        let hole = mk_hole(id, c("Nat"), Arc::new(local_env.clone()), false).apply([x.term()]);
        let mut mctx = MetaCtx::default();
        assert!(!elab.unify(&mut mctx, &local_env, &hole, &c("Undeclared")));
        assert!(!mctx.is_assigned(id));
    }

    #[test]
    fn instances_are_resolved_by_priority() {
        let env = prelude::env().unwrap();
        let e = app(ident("Mul.mul"), [ident("Nat.zero"), ident("Nat.zero")]);
        let res = Elaborator::new(&env)
            .elaborate(&e, None, &LocalEnv::default())
            .unwrap();
        assert!(res.term.contains_const(&Name::from_str("instMulNat")));

        let mut env = env;
        let mul_nat = c("Mul").apply([c("Nat")]);
        env.add_axiom(Name::from_str("otherMulNat"), vec![], mul_nat.clone())
            .unwrap();
        env.add_instance(Name::from_str("otherMulNat"), 100).unwrap();
        let err = Elaborator::new(&env)
            .elaborate(&e, None, &LocalEnv::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Elab(ElabError {
                kind: ElabErrorKind::AmbiguousInstance { .. },
                ..
            })
        ));

        env.add_axiom(Name::from_str("preferredMulNat"), vec![], mul_nat)
            .unwrap();
        env.add_instance(Name::from_str("preferredMulNat"), 200).unwrap();
        assert!(env
            .instances(&Name::from_str("Mul"))
            .contains(&Instance {
                name: Name::from_str("preferredMulNat"),
                priority: 200
            }));
        let res = Elaborator::new(&env)
            .elaborate(&e, None, &LocalEnv::default())
            .unwrap();
        assert!(res.term.contains_const(&Name::from_str("preferredMulNat")));
    }

    #[test]
    fn missing_instance() {
        let env = prelude::env().unwrap();
        let nil = app(expr::explicit("List.nil"), [ident("Nat")]);
        let e = app(ident("Mul.mul"), [nil.clone(), nil]);
        let err = Elaborator::new(&env)
            .elaborate(&e, None, &LocalEnv::default())
            .unwrap_err();
        let Error::Elab(ElabError {
            kind: ElabErrorKind::InstanceNotFound { ty },
            ..
        }) = err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(ty.to_string(), "Mul (List Nat)");
    }

    #[test]
    fn type_mismatch_carries_context() {
        let env = prelude::env().unwrap();
        let local_env = props(&["a", "b"]);
        let local_env = local_env.extended([Local::fresh(
            Name::from_str("ha"),
            local_env.locals[0].term(),
        )]);
        let b = local_env.locals[1].term();
        let err = Elaborator::new(&env)
            .elaborate(&expr::ident("ha"), Some(&b), &local_env)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "type mismatch: ha has type a but is expected to have type b"
        );
    }
}
