//! Compilation of pattern-matching definitions to recursor applications.
//!
//! A definition is given by clauses whose patterns cover its leading binders. At most one
//! argument position may be matched against constructors, and those patterns may only
//! bind variables. Recursive calls must be made on a field of the matched constructor
//! with the preceding arguments unchanged; they are replaced by the corresponding
//! induction hypothesis. Every (clause, constructor) pair that is selected yields an
//! equation `f.eq_k` proved by `Eq.refl`, so the equations hold by computation.

use std::fmt::Display;
use std::iter::zip;

use log::{debug, log_enabled, trace};
use thiserror::Error;

use crate::elab::{Elaborator, Options};
use crate::error::Error;
use crate::expr::Expr;
use crate::kernel::{Env, InductiveInfo};
use crate::print::pretty;
use crate::state::MetaCtx;
use crate::tactic::{ctor_fields_type, inductive_of};
use crate::tt::{mk_abs, mk_app, mk_const, mk_ctor, mk_pi, Id, Level, Local, LocalEnv, Name, Term};

#[derive(Debug, Clone)]
pub enum Pattern {
    Var(Name),
    Wildcard,
    Ctor(Name, Vec<Pattern>),
}

pub fn pvar(name: &str) -> Pattern {
    Pattern::Var(Name::from_str(name))
}

pub fn pctor(name: &str, args: impl IntoIterator<Item = Pattern>) -> Pattern {
    Pattern::Ctor(Name::from_str(name), args.into_iter().collect())
}

impl Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pattern::Var(name) => write!(f, "{name}"),
            Pattern::Wildcard => write!(f, "_"),
            Pattern::Ctor(name, args) if args.is_empty() => write!(f, "{name}"),
            Pattern::Ctor(name, args) => {
                write!(f, "({name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub patterns: Vec<Pattern>,
    pub rhs: Expr,
}

pub fn clause(patterns: impl IntoIterator<Item = Pattern>, rhs: Expr) -> Clause {
    Clause {
        patterns: patterns.into_iter().collect(),
        rhs,
    }
}

/// `def name.{level_params} : ty` followed by its clauses.
#[derive(Debug, Clone)]
pub struct RecDef {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Expr,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone)]
pub struct Equation {
    pub name: Name,
    pub ty: Term,
    pub proof: Term,
}

#[derive(Debug, Clone)]
pub struct Compiled {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Term,
    pub value: Term,
    pub equations: Vec<Equation>,
}

#[derive(Debug, Clone)]
pub enum CompileErrorKind {
    NoClauses,
    PatternArity { expected: usize, got: usize },
    /// Constructor patterns may appear in a single argument position only.
    MultipleScrutinees,
    /// Constructor patterns are matched one level deep, so every field pattern is a
    /// variable or `_`. Recursion on a deeper sub-datum, as in `succ (succ n) => f n`,
    /// needs an auxiliary definition or an explicit recursor.
    NestedPattern,
    NotInductive { ty: Term },
    WrongConstructor { ctor: Name, inductive: Name },
    FieldArity { ctor: Name, expected: usize, got: usize },
    NonExhaustiveMatch { missing: Vec<Name> },
    UnreachableClause,
    NonStructuralRecursion,
    LargeElimination { inductive: Name },
    MissingDeclaration(Name),
}

#[derive(Debug, Clone, Error)]
#[error("{}", explain(.name, .kind, .clause, .term, .local_env))]
pub struct CompileError {
    pub name: Name,
    pub kind: CompileErrorKind,
    /// Index of the offending clause.
    pub clause: Option<usize>,
    pub term: Option<Term>,
    pub local_env: LocalEnv,
}

fn explain(
    name: &Name,
    kind: &CompileErrorKind,
    clause: &Option<usize>,
    term: &Option<Term>,
    local_env: &LocalEnv,
) -> String {
    let mut msg = format!("{name}: ");
    match kind {
        CompileErrorKind::NoClauses => msg.push_str("no clauses"),
        CompileErrorKind::PatternArity { expected, got } => {
            msg.push_str(&format!("{got} patterns given, but {expected} expected"))
        }
        CompileErrorKind::MultipleScrutinees => {
            msg.push_str("constructor patterns are only supported in one argument position")
        }
        CompileErrorKind::NestedPattern => msg.push_str("nested patterns are not supported"),
        CompileErrorKind::NotInductive { ty } => msg.push_str(&format!(
            "cannot match on a value of type {}",
            pretty(ty, local_env)
        )),
        CompileErrorKind::WrongConstructor { ctor, inductive } => {
            msg.push_str(&format!("{ctor} is not a constructor of {inductive}"))
        }
        CompileErrorKind::FieldArity {
            ctor,
            expected,
            got,
        } => msg.push_str(&format!("{ctor} has {expected} fields, but {got} patterns were given")),
        CompileErrorKind::NonExhaustiveMatch { missing } => msg.push_str(&format!(
            "non-exhaustive match, missing {}",
            missing
                .iter()
                .map(|name| name.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        CompileErrorKind::UnreachableClause => msg.push_str("redundant clause"),
        CompileErrorKind::NonStructuralRecursion => {
            msg.push_str("recursive call is not on a constructor field")
        }
        CompileErrorKind::LargeElimination { inductive } => {
            msg.push_str(&format!("{inductive} can only be eliminated into Prop"))
        }
        CompileErrorKind::MissingDeclaration(decl) => {
            msg.push_str(&format!("{decl} must be declared to state equations"))
        }
    }
    if let Some(k) = clause {
        msg.push_str(&format!(" (clause {})", k + 1));
    }
    if let Some(term) = term {
        msg.push_str(&format!("\n  in: {}", pretty(term, local_env)));
    }
    msg
}

struct Compiler<'a, 'e> {
    elab: &'a Elaborator<'e>,
    def: &'a RecDef,
    ty: Term,
    /// `f` as a hypothesis while the right-hand sides are elaborated.
    this: Local,
    levels: Vec<Level>,
}

impl<'a, 'e> Compiler<'a, 'e> {
    fn error(&self, kind: CompileErrorKind, clause: Option<usize>) -> Error {
        CompileError {
            name: self.def.name.clone(),
            kind,
            clause,
            term: None,
            local_env: LocalEnv::default(),
        }
        .into()
    }

    fn error_at(&self, kind: CompileErrorKind, clause: usize, term: &Term, local_env: &LocalEnv) -> Error {
        CompileError {
            name: self.def.name.clone(),
            kind,
            clause: Some(clause),
            term: Some(term.clone()),
            local_env: local_env.clone(),
        }
        .into()
    }

    fn constant(&self) -> Term {
        mk_const(self.def.name.clone(), self.levels.clone())
    }

    /// The binders matched by the patterns, and the type that remains.
    fn binders(&self, arity: usize) -> Result<(Vec<Local>, Term), Error> {
        let mut xs: Vec<Local> = vec![];
        let mut rest = self.ty.clone();
        for _ in 0..arity {
            let Term::Pi(pi) = self.elab.env().whnf(&rest) else {
                return Err(self.error(
                    CompileErrorKind::PatternArity {
                        expected: xs.len(),
                        got: arity,
                    },
                    None,
                ));
            };
            let x = Local::fresh(pi.binder_name.clone(), pi.binder_type.clone());
            rest = pi.body.open(&[x.term()], 0);
            xs.push(x);
        }
        Ok((xs, rest))
    }

    /// The context a clause's right-hand side is elaborated in.
    fn clause_env(&self, locals: impl IntoIterator<Item = Local>) -> LocalEnv {
        LocalEnv::new(vec![self.this.clone()]).extended(locals)
    }

    fn elaborate_rhs(&self, k: usize, local_env: &LocalEnv, expected: &Term) -> Result<Term, Error> {
        let rhs = self
            .elab
            .elaborate(&self.def.clauses[k].rhs, Some(expected), local_env)?;
        Ok(rhs.term)
    }

    /// `Π binders, f args = rhs`, proved by reflexivity.
    fn equation(
        &self,
        index: usize,
        binders: &[Local],
        args: Vec<Term>,
        rhs: &Term,
        ty: &Term,
        level: &Level,
    ) -> Equation {
        let lhs = self.constant().apply(args);
        let rhs = rhs.subst(&[(self.this.id, self.constant())]);
        let eq = mk_const(Name::from_str("Eq"), vec![level.clone()]).apply([ty.clone(), lhs.clone(), rhs]);
        let refl = mk_const(Name::from_str("Eq.refl"), vec![level.clone()]).apply([ty.clone(), lhs]);
        Equation {
            name: self.def.name.extend(format!("eq_{index}")),
            ty: eq.pi(binders),
            proof: refl.abs(binders),
        }
    }
}

fn renamed(x: &Local, pattern: &Pattern) -> Local {
    let name = match pattern {
        Pattern::Var(name) => name.clone(),
        _ => Name::from_str("_"),
    };
    Local {
        id: x.id,
        name,
        ty: x.ty.clone(),
    }
}

/// Replaces structural recursive calls by induction hypotheses.
struct Calls<'a> {
    target: Id,
    position: usize,
    fixed: &'a [Term],
    ihs: &'a [(Id, Term)],
}

impl<'a> Calls<'a> {
    /// Fails with the offending call.
    fn replace(&self, m: &Term) -> Result<Term, Term> {
        if let Term::Local(head) = m.head() {
            if head.id == self.target {
                return self.replace_call(m);
            }
        }
        match m {
            Term::App(inner) => Ok(mk_app(self.replace(&inner.fun)?, self.replace(&inner.arg)?)),
            Term::Abs(inner) => Ok(mk_abs(
                inner.binder_name.clone(),
                self.replace(&inner.binder_type)?,
                self.replace(&inner.body)?,
            )),
            Term::Pi(inner) => Ok(mk_pi(
                inner.binder_name.clone(),
                self.replace(&inner.binder_type)?,
                self.replace(&inner.body)?,
                inner.implicit,
            )),
            _ => Ok(m.clone()),
        }
    }

    fn replace_call(&self, m: &Term) -> Result<Term, Term> {
        let args = m.args();
        if args.len() <= self.position {
            return Err(m.clone());
        }
        if !zip(&args[..self.position], self.fixed).all(|(arg, fixed)| arg.alpha_eq(fixed)) {
            return Err(m.clone());
        }
        let Term::Local(major) = args[self.position] else {
            return Err(m.clone());
        };
        let Some((_, ih)) = self.ihs.iter().find(|(id, _)| *id == major.id) else {
            return Err(m.clone());
        };
        let rest = args[self.position + 1..]
            .iter()
            .map(|arg| self.replace(arg))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ih.apply(rest))
    }
}

/// Compiles `def` against the elaborator's environment without adding anything to it.
pub fn compile(elab: &Elaborator, def: &RecDef) -> Result<Compiled, Error> {
    let ty = elab.elaborate_type(&def.ty, &LocalEnv::default())?.term;
    let compiler = Compiler {
        elab,
        def,
        this: Local::fresh(def.name.clone(), ty.clone()),
        levels: def
            .level_params
            .iter()
            .map(|param| Level::Param(param.clone()))
            .collect(),
        ty,
    };
    let Some(first) = def.clauses.first() else {
        return Err(compiler.error(CompileErrorKind::NoClauses, None));
    };
    let arity = first.patterns.len();
    for (k, clause) in def.clauses.iter().enumerate() {
        if clause.patterns.len() != arity {
            return Err(compiler.error(
                CompileErrorKind::PatternArity {
                    expected: arity,
                    got: clause.patterns.len(),
                },
                Some(k),
            ));
        }
    }
    let (xs, body) = compiler.binders(arity)?;
    if elab.env().get(&Name::from_str("Eq")).is_none() {
        return Err(compiler.error(
            CompileErrorKind::MissingDeclaration(Name::from_str("Eq")),
            None,
        ));
    }
    let body_level = elab.infer_sort(&MetaCtx::default(), &LocalEnv::new(xs.clone()), &body)?;

    let position = def
        .clauses
        .iter()
        .find_map(|clause| {
            clause
                .patterns
                .iter()
                .position(|pattern| matches!(pattern, Pattern::Ctor(..)))
        });
    for (k, clause) in def.clauses.iter().enumerate() {
        for (i, pattern) in clause.patterns.iter().enumerate() {
            match pattern {
                Pattern::Ctor(_, args) if Some(i) == position => {
                    if args.iter().any(|arg| matches!(arg, Pattern::Ctor(..))) {
                        return Err(compiler.error(CompileErrorKind::NestedPattern, Some(k)));
                    }
                }
                Pattern::Ctor(..) => {
                    return Err(compiler.error(CompileErrorKind::MultipleScrutinees, Some(k)))
                }
                _ => {}
            }
        }
    }

    let compiled = match position {
        None => compile_plain(&compiler, &xs, &body, &body_level)?,
        Some(position) => compile_structural(&compiler, &xs, &body, &body_level, position)?,
    };
    if log_enabled!(log::Level::Trace) {
        trace!("{} := {}", compiled.name, compiled.value);
    }
    Ok(compiled)
}

/// A single catch-all clause.
fn compile_plain(compiler: &Compiler, xs: &[Local], body: &Term, body_level: &Level) -> Result<Compiled, Error> {
    if compiler.def.clauses.len() > 1 {
        return Err(compiler.error(CompileErrorKind::UnreachableClause, Some(1)));
    }
    let binders = zip(xs, &compiler.def.clauses[0].patterns)
        .map(|(x, pattern)| renamed(x, pattern))
        .collect::<Vec<_>>();
    let local_env = compiler.clause_env(binders.clone());
    let rhs = compiler.elaborate_rhs(0, &local_env, body)?;
    if rhs.contains_local(compiler.this.id) {
        return Err(compiler.error_at(CompileErrorKind::NonStructuralRecursion, 0, &rhs, &local_env));
    }
    let args = xs.iter().map(Local::term).collect();
    let equation = compiler.equation(1, &binders, args, &rhs, body, body_level);
    Ok(Compiled {
        name: compiler.def.name.clone(),
        level_params: compiler.def.level_params.clone(),
        ty: compiler.ty.clone(),
        value: rhs.abs(xs),
        equations: vec![equation],
    })
}

fn resolve_ctor(compiler: &Compiler, info: &InductiveInfo, name: &Name, k: usize) -> Result<usize, Error> {
    info.ctors
        .iter()
        .position(|ctor| ctor.name == *name || ctor.name.last_component() == name.as_str())
        .ok_or_else(|| {
            compiler.error(
                CompileErrorKind::WrongConstructor {
                    ctor: name.clone(),
                    inductive: info.name.clone(),
                },
                Some(k),
            )
        })
}

fn compile_structural(
    compiler: &Compiler,
    xs: &[Local],
    body: &Term,
    body_level: &Level,
    position: usize,
) -> Result<Compiled, Error> {
    let elab = compiler.elab;
    let def = compiler.def;
    let mctx = MetaCtx::default();
    let x = &xs[position];
    let ys = &xs[position + 1..];
    let Some((info, levels, params)) = inductive_of(elab, &mctx, &x.ty) else {
        return Err(compiler.error(CompileErrorKind::NotInductive { ty: x.ty.clone() }, None));
    };

    // Which constructor each clause matches; None for a catch-all.
    let mut heads: Vec<Option<usize>> = vec![];
    for (k, clause) in def.clauses.iter().enumerate() {
        let head = match &clause.patterns[position] {
            Pattern::Ctor(name, args) => {
                let index = resolve_ctor(compiler, info, name, k)?;
                let expected = info.ctors[index].num_fields;
                if args.len() != expected {
                    return Err(compiler.error(
                        CompileErrorKind::FieldArity {
                            ctor: info.ctors[index].name.clone(),
                            expected,
                            got: args.len(),
                        },
                        Some(k),
                    ));
                }
                Some(index)
            }
            _ => None,
        };
        heads.push(head);
    }
    let mut selected = vec![];
    let mut missing = vec![];
    for (index, ctor) in info.ctors.iter().enumerate() {
        match heads.iter().position(|head| head.map_or(true, |h| h == index)) {
            Some(k) => selected.push(k),
            None => missing.push(ctor.name.clone()),
        }
    }
    if !missing.is_empty() {
        return Err(compiler.error(CompileErrorKind::NonExhaustiveMatch { missing }, None));
    }
    if let Some(k) = (0..def.clauses.len()).find(|k| !selected.contains(k)) {
        return Err(compiler.error(CompileErrorKind::UnreachableClause, Some(k)));
    }

    let motive_body = body.pi(ys);
    let motive = motive_body.abs(&[x.clone()]);
    let target_level = elab.infer_sort(&mctx, &LocalEnv::new(xs.to_vec()), &motive_body)?;
    let rec_levels = match &info.elim_level {
        Some(_) => std::iter::once(target_level)
            .chain(levels.iter().cloned())
            .collect::<Vec<_>>(),
        None if target_level.is_zero() => levels.clone(),
        None => {
            return Err(compiler.error(
                CompileErrorKind::LargeElimination {
                    inductive: info.name.clone(),
                },
                None,
            ))
        }
    };

    let mut minors = vec![];
    let mut equations = vec![];
    for (index, (ctor, &k)) in zip(&info.ctors, &selected).enumerate() {
        let clause = &def.clauses[k];
        let before = zip(&xs[..position], &clause.patterns[..position])
            .map(|(x, pattern)| renamed(x, pattern))
            .collect::<Vec<_>>();
        let field_patterns = match &clause.patterns[position] {
            Pattern::Ctor(_, args) => Some(args),
            _ => None,
        };

        let mut fields: Vec<Local> = vec![];
        let mut ty = ctor_fields_type(elab, info, index, &levels, &params);
        while let Term::Pi(pi) = ty.clone() {
            let name = match field_patterns.map(|args| &args[fields.len()]) {
                Some(Pattern::Var(name)) => name.clone(),
                Some(_) => Name::from_str("_"),
                None if pi.binder_name.as_str() == "_" => Name::from_str("a").inaccessible(),
                None => pi.binder_name.inaccessible(),
            };
            let field = Local::fresh(name, pi.binder_type.clone());
            ty = pi.body.open(&[field.term()], 0);
            fields.push(field);
        }
        let ihs = zip(&fields, &ctor.recursive)
            .filter(|(_, recursive)| **recursive)
            .map(|(field, _)| {
                Local::fresh(
                    Name::from_str(&format!("{}_ih", field.name)),
                    motive_body.subst(&[(x.id, field.term())]),
                )
            })
            .collect::<Vec<_>>();

        let ctor_app = mk_ctor(info.name.clone(), index, ctor.name.clone(), levels.clone())
            .apply(params.iter().cloned().chain(fields.iter().map(Local::term)));
        let mut subst = vec![(x.id, ctor_app.clone())];
        let mut new_ys = vec![];
        for (y, pattern) in zip(ys, &clause.patterns[position + 1..]) {
            let new_y = Local::fresh(renamed(y, pattern).name, y.ty.subst(&subst));
            subst.push((y.id, new_y.term()));
            new_ys.push(new_y);
        }
        let expected = body.subst(&subst);

        let rhs = match field_patterns {
            Some(_) => {
                let local_env = compiler.clause_env(before.iter().chain(&fields).chain(&new_ys).cloned());
                compiler.elaborate_rhs(k, &local_env, &expected)?
            }
            None => {
                let locals = before
                    .iter()
                    .cloned()
                    .chain(zip(&xs[position..], &clause.patterns[position..]).map(|(x, pattern)| renamed(x, pattern)));
                let local_env = compiler.clause_env(locals);
                compiler.elaborate_rhs(k, &local_env, body)?.subst(&subst)
            }
        };
        let local_env = compiler.clause_env(before.iter().chain(&fields).chain(&new_ys).cloned());

        let fixed = before.iter().map(Local::term).collect::<Vec<_>>();
        let ih_terms = zip(
            fields.iter().zip(&ctor.recursive).filter(|(_, r)| **r),
            &ihs,
        )
        .map(|((field, _), ih)| (field.id, ih.term()))
        .collect::<Vec<_>>();
        let calls = Calls {
            target: compiler.this.id,
            position,
            fixed: &fixed,
            ihs: &ih_terms,
        };
        let minor = calls.replace(&rhs).map_err(|call| {
            compiler.error_at(CompileErrorKind::NonStructuralRecursion, k, &call, &local_env)
        })?;
        let binders = fields
            .iter()
            .chain(&ihs)
            .chain(&new_ys)
            .cloned()
            .collect::<Vec<_>>();
        minors.push(minor.abs(&binders));

        let eq_binders = before
            .iter()
            .chain(&fields)
            .chain(&new_ys)
            .cloned()
            .collect::<Vec<_>>();
        let args = fixed
            .iter()
            .cloned()
            .chain([ctor_app])
            .chain(new_ys.iter().map(Local::term))
            .collect();
        equations.push(compiler.equation(index + 1, &eq_binders, args, &rhs, &expected, body_level));
    }

    let value = mk_const(info.rec.clone(), rec_levels)
        .apply(params)
        .apply([motive])
        .apply(minors)
        .apply([x.term()])
        .apply(ys.iter().map(Local::term))
        .abs(xs);
    debug!(
        "{} recurses structurally on argument {} ({})",
        def.name,
        position + 1,
        info.name
    );
    Ok(Compiled {
        name: def.name.clone(),
        level_params: def.level_params.clone(),
        ty: compiler.ty.clone(),
        value,
        equations,
    })
}

/// Compiles `def` and adds it to `env` together with its equations.
pub fn define(env: &mut Env, options: &Options, def: &RecDef) -> Result<Compiled, Error> {
    let compiled = {
        let elab = Elaborator::new(env)
            .with_options(options.clone())
            .with_level_params(def.level_params.clone());
        compile(&elab, def)?
    };
    env.add_definition(
        compiled.name.clone(),
        compiled.level_params.clone(),
        compiled.ty.clone(),
        compiled.value.clone(),
    )?;
    for equation in &compiled.equations {
        env.add_theorem(
            equation.name.clone(),
            compiled.level_params.clone(),
            equation.ty.clone(),
            equation.proof.clone(),
        )?;
    }
    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{app, arrow, ident};
    use crate::kernel::DeclKind;
    use crate::prelude;

    fn nat_to_nat(name: &str, clauses: Vec<Clause>) -> RecDef {
        RecDef {
            name: Name::from_str(name),
            level_params: vec![],
            ty: arrow(ident("Nat"), ident("Nat")),
            clauses,
        }
    }

    fn kind_of(err: Error) -> CompileErrorKind {
        match err {
            Error::Compile(err) => err.kind,
            err => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn append_equations_hold_by_computation() {
        let env = prelude::env().unwrap();
        for name in ["List.append.eq_1", "List.append.eq_2"] {
            let decl = env.get(&Name::from_str(name)).unwrap();
            assert!(matches!(decl.kind, DeclKind::Theorem { .. }));
        }

        let nat = mk_const(Name::from_str("Nat"), vec![]);
        let list = |levels: Vec<Level>, index: usize, name: &str| {
            mk_ctor(Name::from_str("List"), index, Name::from_str(name), levels)
        };
        let nil = list(vec![Level::Zero], 0, "List.nil").apply([nat.clone()]);
        let cons = |head: Term, tail: Term| {
            list(vec![Level::Zero], 1, "List.cons").apply([nat.clone(), head, tail])
        };
        let append = mk_const(Name::from_str("List.append"), vec![Level::Zero]);
        let xs = cons(zero(), nil.clone());
        let ys = cons(app_succ(zero()), nil.clone());
        let both = append.apply([nat.clone(), xs.clone(), ys.clone()]);
        assert!(env.is_def_eq(&both, &cons(zero(), ys.clone())));
        assert!(env.is_def_eq(&append.apply([nat, nil, ys.clone()]), &ys));
    }

    #[test]
    fn catch_all_after_constructor() {
        let mut env = prelude::env().unwrap();
        let def = nat_to_nat(
            "isZero",
            vec![
                clause([pctor("zero", [])], ident("Nat.zero")),
                clause([pvar("n")], app(ident("Nat.succ"), [ident("Nat.zero")])),
            ],
        );
        let compiled = define(&mut env, &Options::default(), &def).unwrap();
        assert_eq!(compiled.equations.len(), 2);
        let one = mk_const(Name::from_str("isZero"), vec![]).apply([app_succ(zero())]);
        assert!(env.is_def_eq(&one, &app_succ(zero())));
    }

    fn zero() -> Term {
        mk_ctor(Name::from_str("Nat"), 0, Name::from_str("Nat.zero"), vec![])
    }

    fn app_succ(m: Term) -> Term {
        mk_ctor(Name::from_str("Nat"), 1, Name::from_str("Nat.succ"), vec![]).apply([m])
    }

    #[test]
    fn recursive_calls_must_be_structural() {
        let mut env = prelude::env().unwrap();
        let def = nat_to_nat(
            "loop",
            vec![
                clause([pctor("zero", [])], ident("Nat.zero")),
                clause(
                    [pctor("succ", [pvar("n")])],
                    app(ident("loop"), [app(ident("Nat.succ"), [ident("n")])]),
                ),
            ],
        );
        let err = define(&mut env, &Options::default(), &def).unwrap_err();
        assert!(err.to_string().starts_with("loop: recursive call is not on a constructor field (clause 2)"));
        assert!(env.get(&Name::from_str("loop")).is_none());
    }

    #[test]
    fn coverage_is_checked() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let partial = nat_to_nat("partial", vec![clause([pctor("zero", [])], ident("Nat.zero"))]);
        let kind = kind_of(compile(&elab, &partial).unwrap_err());
        assert!(matches!(
            kind,
            CompileErrorKind::NonExhaustiveMatch { missing } if missing == vec![Name::from_str("Nat.succ")]
        ));

        let redundant = nat_to_nat(
            "redundant",
            vec![
                clause([pvar("n")], ident("n")),
                clause([pctor("zero", [])], ident("Nat.zero")),
            ],
        );
        let err = compile(&elab, &redundant).unwrap_err();
        assert!(matches!(
            err,
            Error::Compile(CompileError {
                kind: CompileErrorKind::UnreachableClause,
                clause: Some(1),
                ..
            })
        ));
    }

    #[test]
    fn malformed_patterns() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let nested = nat_to_nat(
            "nested",
            vec![
                clause([pctor("succ", [pctor("zero", [])])], ident("Nat.zero")),
                clause([pvar("n")], ident("n")),
            ],
        );
        assert!(matches!(
            kind_of(compile(&elab, &nested).unwrap_err()),
            CompileErrorKind::NestedPattern
        ));
        let deep = nat_to_nat(
            "deep",
            vec![
                clause(
                    [pctor("succ", [pctor("succ", [pvar("n")])])],
                    app(ident("deep"), [ident("n")]),
                ),
                clause([pvar("n")], ident("n")),
            ],
        );
        assert!(matches!(
            kind_of(compile(&elab, &deep).unwrap_err()),
            CompileErrorKind::NestedPattern
        ));
        let foreign = nat_to_nat(
            "foreign",
            vec![clause([pctor("List.nil", [])], ident("Nat.zero"))],
        );
        assert!(matches!(
            kind_of(compile(&elab, &foreign).unwrap_err()),
            CompileErrorKind::WrongConstructor { .. }
        ));
        let too_many = nat_to_nat(
            "tooMany",
            vec![clause([pvar("a"), pvar("b")], ident("a"))],
        );
        assert!(matches!(
            kind_of(compile(&elab, &too_many).unwrap_err()),
            CompileErrorKind::PatternArity { expected: 1, got: 2 }
        ));
    }

    #[test]
    fn plain_definitions_cannot_recurse() {
        let env = prelude::env().unwrap();
        let elab = Elaborator::new(&env);
        let def = nat_to_nat("spin", vec![clause([pvar("n")], app(ident("spin"), [ident("n")]))]);
        assert!(matches!(
            kind_of(compile(&elab, &def).unwrap_err()),
            CompileErrorKind::NonStructuralRecursion
        ));
    }

    #[test]
    fn pow_unfolds_through_the_instance() {
        let env = prelude::env().unwrap();
        let two = app_succ(app_succ(zero()));
        let pow = mk_const(Name::from_str("pow"), vec![]).apply([two.clone(), two]);
        let four = (0..4).fold(zero(), |m, _| app_succ(m));
        assert!(env.is_def_eq(&pow, &four));
    }
}
