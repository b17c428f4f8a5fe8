use super::{DeclKind, Env, TypeError, TypeErrorKind};
use crate::tt::{mk_pi, mk_sort, Level, Local, LocalEnv, Name, Term};

struct TypeChecker<'a> {
    env: &'a Env,
    level_params: &'a [Name],
    local_env: LocalEnv,
}

impl<'a> TypeChecker<'a> {
    fn error(&self, kind: TypeErrorKind, term: &Term) -> TypeError {
        TypeError::new(kind, term, &self.local_env)
    }

    fn check_level(&self, level: &Level, term: &Term) -> Result<(), TypeError> {
        if level.has_meta() {
            return Err(self.error(TypeErrorKind::UnexpectedLevelMeta, term));
        }
        match find_undeclared(level, self.level_params) {
            Some(name) => Err(self.error(TypeErrorKind::UndeclaredLevelParam(name), term)),
            None => Ok(()),
        }
    }

    fn instantiate_levels(
        &self,
        name: &Name,
        params: &[Name],
        levels: &[Level],
        ty: &Term,
        term: &Term,
    ) -> Result<Term, TypeError> {
        if params.len() != levels.len() {
            return Err(self.error(
                TypeErrorKind::LevelArityMismatch {
                    name: name.clone(),
                    expected: params.len(),
                    got: levels.len(),
                },
                term,
            ));
        }
        for level in levels {
            self.check_level(level, term)?;
        }
        Ok(ty.instantiate_level_params(params, levels))
    }

    fn infer(&mut self, m: &Term) -> Result<Term, TypeError> {
        match m {
            Term::Var(inner) => Err(self.error(TypeErrorKind::LooseBoundVariable(inner.index), m)),
            Term::Local(inner) => match self.local_env.get(inner.id) {
                Some(local) => Ok(local.ty.clone()),
                None => Err(self.error(TypeErrorKind::UnboundVariable(inner.id), m)),
            },
            Term::Sort(inner) => {
                self.check_level(&inner.level, m)?;
                Ok(mk_sort(inner.level.succ()))
            }
            Term::Const(inner) => {
                let Some(decl) = self.env.get(&inner.name) else {
                    return Err(self.error(TypeErrorKind::UnknownConstant(inner.name.clone()), m));
                };
                if let DeclKind::Constructor { .. } = decl.kind {
                    return Err(self.error(
                        TypeErrorKind::Malformed(format!(
                            "constructor {} must be referenced as a constructor term",
                            inner.name
                        )),
                        m,
                    ));
                }
                self.instantiate_levels(&inner.name, &decl.level_params, &inner.levels, &decl.ty, m)
            }
            Term::Ctor(inner) => {
                let Some(info) = self.env.inductive(&inner.inductive) else {
                    return Err(
                        self.error(TypeErrorKind::UnknownInductive(inner.inductive.clone()), m)
                    );
                };
                let Some(ctor) = info.ctors.get(inner.index) else {
                    return Err(self.error(
                        TypeErrorKind::Malformed(format!(
                            "{} has no constructor #{}",
                            inner.inductive, inner.index
                        )),
                        m,
                    ));
                };
                self.instantiate_levels(&ctor.name, &info.level_params, &inner.levels, &ctor.ty, m)
            }
            Term::App(inner) => {
                let fun_ty = self.infer(&inner.fun)?;
                let fun_ty = self.env.whnf(&fun_ty);
                let Term::Pi(pi) = &fun_ty else {
                    return Err(self.error(TypeErrorKind::FunctionExpected { ty: fun_ty.clone() }, m));
                };
                self.check(&inner.arg, &pi.binder_type)?;
                Ok(pi.body.open(std::slice::from_ref(&inner.arg), 0))
            }
            Term::Abs(inner) => {
                self.infer_sort(&inner.binder_type)?;
                let x = Local::fresh(inner.binder_name.clone(), inner.binder_type.clone());
                let body = inner.body.open(&[x.term()], 0);
                self.local_env.locals.push(x.clone());
                let body_ty = self.infer(&body);
                self.local_env.locals.pop();
                let body_ty = body_ty?;
                Ok(mk_pi(
                    inner.binder_name.clone(),
                    inner.binder_type.clone(),
                    body_ty.close(&[x.id], 0),
                    false,
                ))
            }
            Term::Pi(inner) => {
                let l1 = self.infer_sort(&inner.binder_type)?;
                let x = Local::fresh(inner.binder_name.clone(), inner.binder_type.clone());
                let body = inner.body.open(&[x.term()], 0);
                self.local_env.locals.push(x);
                let l2 = self.infer_sort(&body);
                self.local_env.locals.pop();
                Ok(mk_sort(l1.imax(&l2?)))
            }
            Term::Hole(inner) => Err(self.error(TypeErrorKind::UnexpectedHole(inner.id), m)),
        }
    }

    fn infer_sort(&mut self, m: &Term) -> Result<Level, TypeError> {
        let ty = self.infer(m)?;
        match self.env.whnf(&ty) {
            Term::Sort(inner) => Ok(inner.level.clone()),
            ty => Err(self.error(TypeErrorKind::SortExpected { ty }, m)),
        }
    }

    fn check(&mut self, m: &Term, expected: &Term) -> Result<(), TypeError> {
        let inferred = self.infer(m)?;
        if !self.env.is_def_eq(&inferred, expected) {
            return Err(self.error(
                TypeErrorKind::TypeMismatch {
                    expected: expected.clone(),
                    inferred,
                },
                m,
            ));
        }
        Ok(())
    }
}

fn find_undeclared(level: &Level, level_params: &[Name]) -> Option<Name> {
    match level {
        Level::Zero | Level::Meta(_) => None,
        Level::Param(name) => (!level_params.contains(name)).then(|| name.clone()),
        Level::Succ(l) => find_undeclared(l, level_params),
        Level::Max(l1, l2) | Level::IMax(l1, l2) => {
            find_undeclared(l1, level_params).or_else(|| find_undeclared(l2, level_params))
        }
    }
}

impl Env {
    fn checker<'a>(&'a self, level_params: &'a [Name], local_env: &LocalEnv) -> TypeChecker<'a> {
        TypeChecker {
            env: self,
            level_params,
            local_env: local_env.clone(),
        }
    }

    /// Infers the type of `m`; universe parameters must be among `level_params`.
    pub fn infer_in(
        &self,
        level_params: &[Name],
        local_env: &LocalEnv,
        m: &Term,
    ) -> Result<Term, TypeError> {
        self.checker(level_params, local_env).infer(m)
    }

    pub fn check_in(
        &self,
        level_params: &[Name],
        local_env: &LocalEnv,
        m: &Term,
        ty: &Term,
    ) -> Result<(), TypeError> {
        self.checker(level_params, local_env).check(m, ty)
    }

    /// The universe level of the type `ty`.
    pub fn infer_sort_in(
        &self,
        level_params: &[Name],
        local_env: &LocalEnv,
        ty: &Term,
    ) -> Result<Level, TypeError> {
        self.checker(level_params, local_env).infer_sort(ty)
    }

    pub fn infer(&self, local_env: &LocalEnv, m: &Term) -> Result<Term, TypeError> {
        self.infer_in(&[], local_env, m)
    }

    pub fn check(&self, local_env: &LocalEnv, m: &Term, ty: &Term) -> Result<(), TypeError> {
        self.check_in(&[], local_env, m, ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::{mk_app, mk_arrow, mk_const, mk_local, mk_prop, mk_type, Id};

    fn env_with_p() -> Env {
        let mut env = Env::new();
        env.add_axiom(Name::from_str("P"), vec![], mk_prop()).unwrap();
        env
    }

    #[test]
    fn identity_on_propositions() {
        let env = env_with_p();
        let p = mk_const(Name::from_str("P"), vec![]);
        let h = Local::fresh(Name::from_str("h"), p.clone());
        let id = h.term().abs(&[h.clone()]);
        let ty = env.infer(&LocalEnv::default(), &id).unwrap();
        assert!(env.is_def_eq(&ty, &mk_arrow(p.clone(), p)));
    }

    #[test]
    fn application_checks_argument() {
        let env = env_with_p();
        let p = mk_const(Name::from_str("P"), vec![]);
        let h = Local::fresh(Name::from_str("h"), p.clone());
        let id = h.term().abs(&[h.clone()]);
        let err = env
            .infer(&LocalEnv::default(), &mk_app(id, mk_type()))
            .unwrap_err();
        assert!(matches!(err.kind, TypeErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn pi_into_prop_is_prop() {
        let env = env_with_p();
        let a = Local::fresh(Name::from_str("α"), mk_type());
        let ty = mk_const(Name::from_str("P"), vec![]).pi(&[a]);
        let sort = env
            .infer_sort_in(&[], &LocalEnv::default(), &ty)
            .unwrap();
        assert!(sort.is_zero());
    }

    #[test]
    fn undeclared_universe_parameters_are_rejected() {
        let env = Env::new();
        let ty = mk_sort(Level::param("u"));
        let err = env.infer(&LocalEnv::default(), &ty).unwrap_err();
        assert!(matches!(err.kind, TypeErrorKind::UndeclaredLevelParam(_)));
        assert!(env
            .infer_in(&[Name::from_str("u")], &LocalEnv::default(), &ty)
            .is_ok());
    }

    #[test]
    fn unbound_local_reports_context() {
        let env = Env::new();
        let err = env
            .infer(&LocalEnv::default(), &mk_local(Id::fresh()))
            .unwrap_err();
        assert!(matches!(err.kind, TypeErrorKind::UnboundVariable(_)));
    }
}
