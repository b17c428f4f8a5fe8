use anyhow::{bail, Context};
use log::{info, warn};

use crate::elab::{Elaborator, Options};
use crate::expr::{self, app, implicit_pi, pi, sort, Expr};
use crate::kernel::{Env, InductiveDecl};
use crate::recursion::{self, RecDef};
use crate::tt::{Level, LocalEnv, Name};

#[derive(Debug, Clone)]
pub enum Cmd {
    Axiom(CmdAxiom),
    Def(CmdDef),
    Theorem(CmdTheorem),
    Inductive(CmdInductive),
    Recursive(RecDef),
    Class(CmdClass),
    Instance(CmdInstance),
    Trans(CmdTrans),
}

#[derive(Clone, Debug)]
pub struct CmdAxiom {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Expr,
}

#[derive(Clone, Debug)]
pub struct CmdDef {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Expr,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub struct CmdTheorem {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Expr,
    pub proof: Expr,
}

#[derive(Clone, Debug)]
pub struct Binder {
    pub name: Name,
    pub ty: Expr,
    pub implicit: bool,
}

pub fn binder(name: &str, ty: Expr) -> Binder {
    Binder {
        name: Name::from_str(name),
        ty,
        implicit: false,
    }
}

pub fn implicit_binder(name: &str, ty: Expr) -> Binder {
    Binder {
        name: Name::from_str(name),
        ty,
        implicit: true,
    }
}

/// `inductive name params : Sort sort` with constructors `name.ctor fields`.
#[derive(Clone, Debug)]
pub struct CmdInductive {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub params: Vec<Binder>,
    pub sort: Level,
    pub ctors: Vec<CmdCtor>,
}

#[derive(Clone, Debug)]
pub struct CmdCtor {
    /// Unqualified; the constructor is declared as `inductive.name`.
    pub name: Name,
    pub fields: Vec<Binder>,
}

pub fn ctor(name: &str, fields: impl IntoIterator<Item = Binder>) -> CmdCtor {
    CmdCtor {
        name: Name::from_str(name),
        fields: fields.into_iter().collect(),
    }
}

#[derive(Clone, Debug)]
pub struct CmdClass {
    pub name: Name,
}

#[derive(Clone, Debug)]
pub struct CmdInstance {
    pub name: Name,
    pub priority: u32,
}

/// Registers `rule` for chaining a `left` step with a `right` step in calc blocks.
#[derive(Clone, Debug)]
pub struct CmdTrans {
    pub left: Name,
    pub right: Name,
    pub rule: Name,
}

impl Cmd {
    pub fn name(&self) -> &Name {
        match self {
            Cmd::Axiom(inner) => &inner.name,
            Cmd::Def(inner) => &inner.name,
            Cmd::Theorem(inner) => &inner.name,
            Cmd::Inductive(inner) => &inner.name,
            Cmd::Recursive(inner) => &inner.name,
            Cmd::Class(inner) => &inner.name,
            Cmd::Instance(inner) => &inner.name,
            Cmd::Trans(inner) => &inner.rule,
        }
    }
}

fn fold_binders(binders: &[Binder], body: Expr, force_implicit: bool) -> Expr {
    binders.iter().rev().fold(body, |body, binder| {
        if binder.implicit || force_implicit {
            implicit_pi(binder.name.as_str(), binder.ty.clone(), body)
        } else {
            pi(binder.name.as_str(), binder.ty.clone(), body)
        }
    })
}

/// Checks commands one by one against a growing environment.
#[derive(Debug, Default)]
pub struct Eval {
    pub env: Env,
    pub options: Options,
}

impl Eval {
    pub fn new(options: Options) -> Self {
        Eval {
            env: Env::new(),
            options,
        }
    }

    fn elaborator(&self, level_params: &[Name]) -> Elaborator<'_> {
        Elaborator::new(&self.env)
            .with_options(self.options.clone())
            .with_level_params(level_params.to_vec())
    }

    pub fn run(&mut self, cmds: impl IntoIterator<Item = Cmd>) -> anyhow::Result<()> {
        for cmd in cmds {
            let name = cmd.name().clone();
            self.run_cmd(cmd)
                .with_context(|| format!("while checking {name}"))?;
        }
        Ok(())
    }

    pub fn run_cmd(&mut self, cmd: Cmd) -> anyhow::Result<()> {
        match cmd {
            Cmd::Axiom(inner) => {
                let CmdAxiom {
                    name,
                    level_params,
                    ty,
                } = inner;
                let ty = self
                    .elaborator(&level_params)
                    .elaborate_type(&ty, &LocalEnv::default())?
                    .term;
                self.env.add_axiom(name.clone(), level_params, ty)?;
                info!("axiom {name}");
                Ok(())
            }
            Cmd::Def(inner) => {
                let CmdDef {
                    name,
                    level_params,
                    ty,
                    value,
                } = inner;
                let (ty, value) = {
                    let elab = self.elaborator(&level_params);
                    let ty = elab.elaborate_type(&ty, &LocalEnv::default())?.term;
                    let value = elab.elaborate(&value, Some(&ty), &LocalEnv::default())?;
                    if !value.obligations.is_empty() {
                        warn!("{name} is defined using sorry");
                    }
                    (ty, value.term)
                };
                self.env
                    .add_definition(name.clone(), level_params, ty, value)?;
                info!("def {name}");
                Ok(())
            }
            Cmd::Theorem(inner) => {
                let CmdTheorem {
                    name,
                    level_params,
                    ty,
                    proof,
                } = inner;
                let (ty, proof) = {
                    let elab = self.elaborator(&level_params);
                    let ty = elab.elaborate_type(&ty, &LocalEnv::default())?.term;
                    let proof = elab.elaborate(&proof, Some(&ty), &LocalEnv::default())?;
                    if !proof.obligations.is_empty() {
                        warn!(
                            "{name} has {} deferred obligation(s)",
                            proof.obligations.len()
                        );
                    }
                    (ty, proof.term)
                };
                self.env
                    .add_theorem(name.clone(), level_params, ty, proof)?;
                info!("theorem {name}");
                Ok(())
            }
            Cmd::Inductive(inner) => {
                let decl = self.elaborate_inductive(&inner)?;
                let num_ctors = decl.ctors.len();
                self.env.add_inductive(decl)?;
                info!("inductive {} with {num_ctors} constructor(s)", inner.name);
                Ok(())
            }
            Cmd::Recursive(def) => {
                let compiled = recursion::define(&mut self.env, &self.options, &def)?;
                info!(
                    "def {} with {} equation(s)",
                    compiled.name,
                    compiled.equations.len()
                );
                Ok(())
            }
            Cmd::Class(inner) => {
                self.env.add_class(inner.name.clone())?;
                info!("class {}", inner.name);
                Ok(())
            }
            Cmd::Instance(inner) => {
                let CmdInstance { name, priority } = inner;
                self.env.add_instance(name.clone(), priority)?;
                info!("instance {name} (priority {priority})");
                Ok(())
            }
            Cmd::Trans(inner) => {
                let CmdTrans { left, right, rule } = inner;
                if self.env.trans_rule(&left, &right).is_some() {
                    bail!("a transitivity rule for {left} and {right} already exists");
                }
                self.env
                    .add_trans(left.clone(), right.clone(), rule.clone())?;
                info!("trans {left} {right} := {rule}");
                Ok(())
            }
        }
    }

    /// Elaborates the type and constructor types against a copy of the environment in
    /// which the inductive type is provisionally an axiom.
    fn elaborate_inductive(&self, cmd: &CmdInductive) -> anyhow::Result<InductiveDecl> {
        let ty = fold_binders(&cmd.params, sort(cmd.sort.clone()), false);
        let ty = self
            .elaborator(&cmd.level_params)
            .elaborate_type(&ty, &LocalEnv::default())?
            .term;
        let mut scratch = self.env.clone();
        scratch.add_axiom(cmd.name.clone(), cmd.level_params.clone(), ty.clone())?;
        let elab = Elaborator::new(&scratch)
            .with_options(self.options.clone())
            .with_level_params(cmd.level_params.clone());
        let result = app(
            Expr::Explicit(cmd.name.clone()),
            cmd.params
                .iter()
                .map(|param| Expr::Ident(param.name.clone())),
        );
        let mut ctors = vec![];
        for ctor in &cmd.ctors {
            let fields = fold_binders(&ctor.fields, result.clone(), false);
            let ctor_ty = fold_binders(&cmd.params, fields, true);
            let ctor_ty = elab
                .elaborate_type(&ctor_ty, &LocalEnv::default())?
                .term;
            ctors.push((cmd.name.extend(ctor.name.as_str()), ctor_ty));
        }
        Ok(InductiveDecl {
            name: cmd.name.clone(),
            level_params: cmd.level_params.clone(),
            num_params: cmd.params.len(),
            ty,
            ctors,
        })
    }
}

/// `Π binders, body` for writing declarations.
pub fn telescope(binders: &[Binder], body: Expr) -> Expr {
    fold_binders(binders, body, false)
}

pub fn axiom(name: &str, level_params: &[&str], ty: Expr) -> Cmd {
    Cmd::Axiom(CmdAxiom {
        name: Name::from_str(name),
        level_params: level_params.iter().map(|p| Name::from_str(p)).collect(),
        ty,
    })
}

pub fn def(name: &str, level_params: &[&str], ty: Expr, value: Expr) -> Cmd {
    Cmd::Def(CmdDef {
        name: Name::from_str(name),
        level_params: level_params.iter().map(|p| Name::from_str(p)).collect(),
        ty,
        value,
    })
}

pub fn theorem(name: &str, level_params: &[&str], ty: Expr, proof: Expr) -> Cmd {
    Cmd::Theorem(CmdTheorem {
        name: Name::from_str(name),
        level_params: level_params.iter().map(|p| Name::from_str(p)).collect(),
        ty,
        proof,
    })
}

pub fn inductive(
    name: &str,
    level_params: &[&str],
    params: impl IntoIterator<Item = Binder>,
    sort: Level,
    ctors: impl IntoIterator<Item = CmdCtor>,
) -> Cmd {
    Cmd::Inductive(CmdInductive {
        name: Name::from_str(name),
        level_params: level_params.iter().map(|p| Name::from_str(p)).collect(),
        params: params.into_iter().collect(),
        sort,
        ctors: ctors.into_iter().collect(),
    })
}

pub fn recursive(
    name: &str,
    level_params: &[&str],
    ty: Expr,
    clauses: impl IntoIterator<Item = recursion::Clause>,
) -> Cmd {
    Cmd::Recursive(RecDef {
        name: Name::from_str(name),
        level_params: level_params.iter().map(|p| Name::from_str(p)).collect(),
        ty,
        clauses: clauses.into_iter().collect(),
    })
}

pub fn class(name: &str) -> Cmd {
    Cmd::Class(CmdClass {
        name: Name::from_str(name),
    })
}

pub fn instance(name: &str, priority: u32) -> Cmd {
    Cmd::Instance(CmdInstance {
        name: Name::from_str(name),
        priority,
    })
}

pub fn trans(left: &str, right: &str, rule: &str) -> Cmd {
    Cmd::Trans(CmdTrans {
        left: Name::from_str(left),
        right: Name::from_str(right),
        rule: Name::from_str(rule),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{arrow, ident, prop};
    use crate::prelude;

    #[test]
    fn errors_name_the_declaration() {
        let mut eval = Eval::new(Options::default());
        let err = eval
            .run([axiom("bad", &[], ident("Undefined"))])
            .unwrap_err();
        assert_eq!(err.to_string(), "while checking bad");
        assert!(format!("{err:#}").contains("unknown identifier Undefined"));
    }

    #[test]
    fn inductive_parameters_are_implicit_in_constructors() {
        let mut eval = Eval::new(Options::default());
        eval.run(prelude::cmds()).unwrap();
        eval.run([inductive(
            "Box",
            &[],
            [binder("α", expr::ty())],
            Level::one(),
            [ctor("mk", [binder("val", ident("α"))])],
        )])
        .unwrap();
        let decl = eval.env.get(&Name::from_str("Box.mk")).unwrap();
        assert_eq!(decl.ty.to_string(), "Π {α : Type}, α → Box α");
        assert!(eval.env.inductive(&Name::from_str("Box")).is_some());
    }

    #[test]
    fn duplicate_trans_rules_are_rejected() {
        let mut eval = Eval::new(Options::default());
        eval.run(prelude::cmds()).unwrap();
        let version = eval.env.version();
        assert!(eval.run([trans("Eq", "Eq", "Eq.trans")]).is_err());
        assert_eq!(eval.env.version(), version);
    }

    #[test]
    fn theorems_must_be_propositions() {
        let mut eval = Eval::new(Options::default());
        eval.run(prelude::cmds()).unwrap();
        let err = eval
            .run([theorem("notProp", &[], arrow(prop(), prop()), expr::lam("p", ident("p")))])
            .unwrap_err();
        assert!(format!("{err:#}").contains("not Prop"));
    }
}
