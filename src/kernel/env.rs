use std::sync::Arc;

use log::debug;

use super::{TypeError, TypeErrorKind};
use crate::tt::{mk_const, Level, LocalEnv, Name, Term};

#[derive(Debug, Clone)]
pub struct Decl {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub ty: Term,
    pub kind: DeclKind,
}

#[derive(Debug, Clone)]
pub enum DeclKind {
    Axiom,
    Definition {
        value: Term,
        /// One more than the largest height of a definition `value` refers to.
        height: usize,
    },
    Theorem {
        proof: Term,
    },
    Inductive,
    Constructor {
        inductive: Name,
        index: usize,
    },
    Recursor {
        inductive: Name,
    },
}

#[derive(Debug, Clone)]
pub struct InductiveInfo {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub num_params: usize,
    /// The sort the type lives in.
    pub sort: Level,
    pub ctors: Vec<CtorInfo>,
    pub rec: Name,
    /// Universe parameter of the motive; `None` when the type only eliminates into Prop.
    pub elim_level: Option<Name>,
}

#[derive(Debug, Clone)]
pub struct CtorInfo {
    pub name: Name,
    /// Full type, parameters included.
    pub ty: Term,
    pub num_fields: usize,
    /// Whether each field is a recursive occurrence `T params`.
    pub recursive: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: Name,
    pub priority: u32,
}

/// Append-only store of checked declarations.
///
/// Cloning is cheap, so a clone serves as a snapshot that later additions do not affect.
#[derive(Debug, Clone, Default)]
pub struct Env {
    decls: im::HashMap<Name, Arc<Decl>>,
    inductives: im::HashMap<Name, Arc<InductiveInfo>>,
    classes: im::HashSet<Name>,
    instances: im::HashMap<Name, im::Vector<Instance>>,
    trans_rules: im::HashMap<(Name, Name), Name>,
    order: im::Vector<Name>,
    version: usize,
}

impl Env {
    pub fn new() -> Self {
        Default::default()
    }

    /// Bumped by every successful addition.
    pub fn version(&self) -> usize {
        self.version
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, name: &Name) -> Option<&Decl> {
        self.decls.get(name).map(|decl| decl.as_ref())
    }

    /// Declarations in the order they were added.
    pub fn declarations(&self) -> impl Iterator<Item = &Decl> + '_ {
        self.order.iter().filter_map(|name| self.get(name))
    }

    pub fn inductive(&self, name: &Name) -> Option<&InductiveInfo> {
        self.inductives.get(name).map(|info| info.as_ref())
    }

    /// The inductive type whose recursor is `name`.
    pub fn recursor_of(&self, name: &Name) -> Option<&InductiveInfo> {
        match &self.get(name)?.kind {
            DeclKind::Recursor { inductive } => self.inductive(inductive),
            _ => None,
        }
    }

    pub fn is_class(&self, name: &Name) -> bool {
        self.classes.contains(name)
    }

    pub fn instances(&self, class: &Name) -> Vec<Instance> {
        self.instances
            .get(class)
            .map(|instances| instances.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn trans_rule(&self, left: &Name, right: &Name) -> Option<&Name> {
        self.trans_rules.get(&(left.clone(), right.clone()))
    }

    pub(super) fn insert(&mut self, decl: Decl) {
        debug!("declared {} : {}", decl.name, decl.ty);
        self.order.push_back(decl.name.clone());
        self.decls.insert(decl.name.clone(), Arc::new(decl));
        self.version += 1;
    }

    pub(super) fn insert_inductive(&mut self, info: InductiveInfo) {
        self.inductives.insert(info.name.clone(), Arc::new(info));
    }

    pub(super) fn check_fresh_name(&self, name: &Name, term: &Term) -> Result<(), TypeError> {
        if !name.is_valid_ident() {
            return Err(TypeError::new(
                TypeErrorKind::InvalidName(name.clone()),
                term,
                &LocalEnv::default(),
            ));
        }
        if self.decls.contains_key(name) {
            return Err(TypeError::new(
                TypeErrorKind::AlreadyDeclared(name.clone()),
                term,
                &LocalEnv::default(),
            ));
        }
        Ok(())
    }

    pub fn add_axiom(
        &mut self,
        name: Name,
        level_params: Vec<Name>,
        ty: Term,
    ) -> Result<(), TypeError> {
        self.check_fresh_name(&name, &ty)?;
        self.infer_sort_in(&level_params, &LocalEnv::default(), &ty)?;
        self.insert(Decl {
            name,
            level_params,
            ty,
            kind: DeclKind::Axiom,
        });
        Ok(())
    }

    pub fn add_definition(
        &mut self,
        name: Name,
        level_params: Vec<Name>,
        ty: Term,
        value: Term,
    ) -> Result<(), TypeError> {
        self.check_fresh_name(&name, &ty)?;
        let local_env = LocalEnv::default();
        self.infer_sort_in(&level_params, &local_env, &ty)?;
        self.check_in(&level_params, &local_env, &value, &ty)?;
        let height = self.height(&value) + 1;
        self.insert(Decl {
            name,
            level_params,
            ty,
            kind: DeclKind::Definition { value, height },
        });
        Ok(())
    }

    pub fn add_theorem(
        &mut self,
        name: Name,
        level_params: Vec<Name>,
        ty: Term,
        proof: Term,
    ) -> Result<(), TypeError> {
        self.check_fresh_name(&name, &ty)?;
        let local_env = LocalEnv::default();
        let level = self.infer_sort_in(&level_params, &local_env, &ty)?;
        if !level.is_zero() {
            return Err(TypeError::new(
                TypeErrorKind::NotAProposition {
                    ty: crate::tt::mk_sort(level),
                },
                &ty,
                &local_env,
            ));
        }
        self.check_in(&level_params, &local_env, &proof, &ty)?;
        self.insert(Decl {
            name,
            level_params,
            ty,
            kind: DeclKind::Theorem { proof },
        });
        Ok(())
    }

    /// Marks the inductive type `name` as a type class.
    pub fn add_class(&mut self, name: Name) -> Result<(), TypeError> {
        let term = mk_const(name.clone(), vec![]);
        if self.inductive(&name).is_none() {
            return Err(TypeError::new(
                TypeErrorKind::UnknownInductive(name),
                &term,
                &LocalEnv::default(),
            ));
        }
        self.classes.insert(name);
        self.version += 1;
        Ok(())
    }

    /// Registers the declaration `name` as an instance; its type must conclude in a class.
    pub fn add_instance(&mut self, name: Name, priority: u32) -> Result<(), TypeError> {
        let term = mk_const(name.clone(), vec![]);
        let Some(decl) = self.get(&name) else {
            return Err(TypeError::new(
                TypeErrorKind::UnknownConstant(name),
                &term,
                &LocalEnv::default(),
            ));
        };
        let mut ty = decl.ty.clone();
        while let Term::Pi(inner) = &ty {
            ty = inner.body.clone();
        }
        let class = match ty.head() {
            Term::Const(head) if self.is_class(&head.name) => head.name.clone(),
            _ => {
                return Err(TypeError::new(
                    TypeErrorKind::Malformed(format!("{name} does not produce a class instance")),
                    &decl.ty,
                    &LocalEnv::default(),
                ))
            }
        };
        debug!("instance {name} of {class} with priority {priority}");
        self.instances
            .entry(class)
            .or_insert_with(im::Vector::new)
            .push_back(Instance { name, priority });
        self.version += 1;
        Ok(())
    }

    /// Registers `rule : R₁ a b → R₂ b c → R₃ a c` for chaining `R₁` and `R₂` steps.
    pub fn add_trans(&mut self, left: Name, right: Name, rule: Name) -> Result<(), TypeError> {
        let term = mk_const(rule.clone(), vec![]);
        for name in [&left, &right, &rule] {
            if self.get(name).is_none() {
                return Err(TypeError::new(
                    TypeErrorKind::UnknownConstant(name.clone()),
                    &term,
                    &LocalEnv::default(),
                ));
            }
        }
        self.trans_rules.insert((left, right), rule);
        self.version += 1;
        Ok(())
    }

    /// Height of a definition; 0 for everything that does not unfold.
    pub fn const_height(&self, name: &Name) -> usize {
        match self.get(name).map(|decl| &decl.kind) {
            Some(DeclKind::Definition { height, .. }) => *height,
            _ => 0,
        }
    }

    pub fn height(&self, m: &Term) -> usize {
        match m {
            Term::Const(inner) => self.const_height(&inner.name),
            Term::App(inner) => self.height(&inner.fun).max(self.height(&inner.arg)),
            Term::Abs(inner) => self.height(&inner.binder_type).max(self.height(&inner.body)),
            Term::Pi(inner) => self.height(&inner.binder_type).max(self.height(&inner.body)),
            _ => 0,
        }
    }

    /// Height of the head constant if it is an unfoldable definition.
    pub fn head_height(&self, m: &Term) -> usize {
        match m.head() {
            Term::Const(inner) => self.const_height(&inner.name),
            _ => 0,
        }
    }

    /// δ-unfolds the head constant and β-reduces the result.
    pub fn unfold_definition(&self, m: &Term) -> Option<Term> {
        let Term::Const(head) = m.head() else {
            return None;
        };
        let decl = self.get(&head.name)?;
        let DeclKind::Definition { value, .. } = &decl.kind else {
            return None;
        };
        if decl.level_params.len() != head.levels.len() {
            return None;
        }
        let value = value.instantiate_level_params(&decl.level_params, &head.levels);
        let args = m.args().into_iter().cloned().collect::<Vec<_>>();
        Some(value.beta(&args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::{mk_arrow, mk_prop, mk_type};

    #[test]
    fn snapshots_are_unaffected_by_later_additions() {
        let mut env = Env::new();
        env.add_axiom(Name::from_str("A"), vec![], mk_prop()).unwrap();
        let snapshot = env.clone();
        env.add_axiom(Name::from_str("B"), vec![], mk_prop()).unwrap();
        assert!(snapshot.get(&Name::from_str("B")).is_none());
        assert!(env.get(&Name::from_str("B")).is_some());
        assert!(env.version() > snapshot.version());
        let names = env
            .declarations()
            .map(|decl| decl.name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, ["A", "B"]);
    }

    #[test]
    fn redeclaration_is_rejected() {
        let mut env = Env::new();
        env.add_axiom(Name::from_str("A"), vec![], mk_prop()).unwrap();
        let err = env
            .add_axiom(Name::from_str("A"), vec![], mk_prop())
            .unwrap_err();
        assert!(matches!(err.kind, TypeErrorKind::AlreadyDeclared(_)));
        let err = env
            .add_axiom(Name::from_str("1A"), vec![], mk_prop())
            .unwrap_err();
        assert!(matches!(err.kind, TypeErrorKind::InvalidName(_)));
    }

    #[test]
    fn theorem_statement_must_be_a_proposition() {
        let mut env = Env::new();
        env.add_axiom(Name::from_str("A"), vec![], mk_type()).unwrap();
        env.add_axiom(
            Name::from_str("a"),
            vec![],
            mk_const(Name::from_str("A"), vec![]),
        )
        .unwrap();
        let err = env
            .add_theorem(
                Name::from_str("t"),
                vec![],
                mk_const(Name::from_str("A"), vec![]),
                mk_const(Name::from_str("a"), vec![]),
            )
            .unwrap_err();
        assert!(matches!(err.kind, TypeErrorKind::NotAProposition { .. }));
    }

    #[test]
    fn definitions_record_heights() {
        let mut env = Env::new();
        env.add_axiom(Name::from_str("P"), vec![], mk_prop()).unwrap();
        let p = mk_const(Name::from_str("P"), vec![]);
        env.add_definition(Name::from_str("Q"), vec![], mk_prop(), mk_arrow(p.clone(), p))
            .unwrap();
        env.add_definition(
            Name::from_str("R"),
            vec![],
            mk_prop(),
            mk_const(Name::from_str("Q"), vec![]),
        )
        .unwrap();
        assert_eq!(env.const_height(&Name::from_str("P")), 0);
        assert_eq!(env.const_height(&Name::from_str("Q")), 1);
        assert_eq!(env.const_height(&Name::from_str("R")), 2);
    }
}
