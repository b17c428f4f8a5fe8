use log::debug;

use super::{CtorInfo, Decl, DeclKind, Env, InductiveInfo, TypeError, TypeErrorKind};
use crate::tt::{mk_app, mk_const, mk_ctor, mk_pi, mk_prop, mk_sort, Level, Local, LocalEnv, Name, Term};

/// An inductive type with uniform parameters and no indices.
///
/// `ty` is `Π params, Sort l` and every constructor type has the shape
/// `Π params fields, T params`, where `T` may occur in a field only as `T params`.
#[derive(Debug, Clone)]
pub struct InductiveDecl {
    pub name: Name,
    pub level_params: Vec<Name>,
    pub num_params: usize,
    pub ty: Term,
    pub ctors: Vec<(Name, Term)>,
}

impl Env {
    /// Checks an inductive declaration and adds the type, its constructors and `T.rec`.
    pub fn add_inductive(&mut self, decl: InductiveDecl) -> Result<(), TypeError> {
        let InductiveDecl {
            name,
            level_params,
            num_params,
            ty,
            ctors,
        } = decl;
        let rec_name = name.extend("rec");
        self.check_fresh_name(&name, &ty)?;
        self.check_fresh_name(&rec_name, &ty)?;
        for (ctor_name, ctor_ty) in &ctors {
            self.check_fresh_name(ctor_name, ctor_ty)?;
            if ctors.iter().filter(|(other, _)| other == ctor_name).count() > 1 {
                return Err(TypeError::new(
                    TypeErrorKind::AlreadyDeclared(ctor_name.clone()),
                    ctor_ty,
                    &LocalEnv::default(),
                ));
            }
        }
        self.infer_sort_in(&level_params, &LocalEnv::default(), &ty)?;

        // Π params, Sort l
        let mut params: Vec<Local> = vec![];
        let mut target = ty.clone();
        for _ in 0..num_params {
            let Term::Pi(inner) = self.whnf(&target) else {
                return Err(TypeError::new(
                    TypeErrorKind::Malformed(format!("{name} expects {num_params} parameters")),
                    &ty,
                    &LocalEnv::default(),
                ));
            };
            let x = Local::fresh(inner.binder_name.clone(), inner.binder_type.clone());
            target = inner.body.open(&[x.term()], 0);
            params.push(x);
        }
        let Term::Sort(sort) = self.whnf(&target) else {
            return Err(TypeError::new(
                TypeErrorKind::Malformed(format!(
                    "the type of {name} must end in a sort; indexed families are not supported"
                )),
                &ty,
                &LocalEnv::default(),
            ));
        };
        let sort = sort.level.clone();
        let is_prop = sort.is_zero();
        let param_levels = level_params
            .iter()
            .map(|param| Level::Param(param.clone()))
            .collect::<Vec<_>>();
        let self_app = mk_const(name.clone(), param_levels.clone())
            .apply(params.iter().map(Local::term));

        // Constructor types may mention the type being defined.
        let mut scratch = self.clone();
        scratch.insert(Decl {
            name: name.clone(),
            level_params: level_params.clone(),
            ty: ty.clone(),
            kind: DeclKind::Inductive,
        });
        let params_env = LocalEnv::new(params.clone());

        let mut ctor_infos = vec![];
        let mut ctor_fields = vec![];
        for (ctor_name, ctor_ty) in &ctors {
            scratch.infer_sort_in(&level_params, &LocalEnv::default(), ctor_ty)?;
            let mut local_env = params_env.clone();
            let mut rest = ctor_ty.clone();
            for param in &params {
                let Term::Pi(inner) = scratch.whnf(&rest) else {
                    return Err(TypeError::new(
                        TypeErrorKind::Malformed(format!(
                            "{ctor_name} must take the parameters of {name}"
                        )),
                        ctor_ty,
                        &local_env,
                    ));
                };
                if !scratch.is_def_eq(&inner.binder_type, &param.ty) {
                    return Err(TypeError::new(
                        TypeErrorKind::TypeMismatch {
                            expected: param.ty.clone(),
                            inferred: inner.binder_type.clone(),
                        },
                        ctor_ty,
                        &local_env,
                    ));
                }
                rest = inner.body.open(&[param.term()], 0);
            }
            let mut recursive = vec![];
            while let Term::Pi(inner) = &rest {
                let field_ty = inner.binder_type.clone();
                if field_ty.contains_const(&name) {
                    let is_self = matches!(
                        field_ty.head(),
                        Term::Const(head) if head.name == name
                    ) && field_ty.alpha_eq(&self_app);
                    if !is_self {
                        return Err(TypeError::new(
                            TypeErrorKind::NonPositive {
                                inductive: name.clone(),
                                ctor: ctor_name.clone(),
                            },
                            &field_ty,
                            &local_env,
                        ));
                    }
                    recursive.push(true);
                } else {
                    recursive.push(false);
                }
                if !is_prop {
                    let field_level = scratch.infer_sort_in(&level_params, &local_env, &field_ty)?;
                    if !field_level.is_leq(&sort) {
                        return Err(TypeError::new(
                            TypeErrorKind::UniverseTooBig {
                                ctor: ctor_name.clone(),
                            },
                            &field_ty,
                            &local_env,
                        ));
                    }
                }
                let x = Local::fresh(inner.binder_name.clone(), field_ty);
                rest = inner.body.open(&[x.term()], 0);
                local_env.locals.push(x);
            }
            if !rest.alpha_eq(&self_app) {
                return Err(TypeError::new(
                    TypeErrorKind::Malformed(format!(
                        "{ctor_name} must construct {self_app}"
                    )),
                    &rest,
                    &local_env,
                ));
            }
            ctor_infos.push(CtorInfo {
                name: ctor_name.clone(),
                ty: ctor_ty.clone(),
                num_fields: recursive.len(),
                recursive,
            });
            ctor_fields.push(local_env.locals.split_off(num_params));
        }

        // The motive universe gets a fresh parameter unless the type is a proposition.
        let elim_level = if is_prop {
            None
        } else {
            let mut candidate = Name::from_str("u");
            let mut i = 0;
            while level_params.contains(&candidate) {
                i += 1;
                candidate = Name::from_str(&format!("u_{i}"));
            }
            Some(candidate)
        };
        let motive_sort = match &elim_level {
            Some(u) => mk_sort(Level::Param(u.clone())),
            None => mk_prop(),
        };
        let motive = Local::fresh(
            Name::from_str("motive"),
            mk_pi(
                Name::from_str("t"),
                self_app.clone(),
                motive_sort,
                false,
            ),
        );
        let mut minors = vec![];
        for (index, (ctor, fields)) in ctor_infos.iter().zip(&ctor_fields).enumerate() {
            let ihs = fields
                .iter()
                .zip(&ctor.recursive)
                .filter(|(_, recursive)| **recursive)
                .map(|(field, _)| {
                    let ih_name = match field.name.as_str() {
                        "_" => Name::from_str("ih"),
                        field_name => Name::from_str(&format!("{field_name}_ih")),
                    };
                    Local::fresh(ih_name, mk_app(motive.term(), field.term()))
                })
                .collect::<Vec<_>>();
            let ctor_app = mk_ctor(name.clone(), index, ctor.name.clone(), param_levels.clone())
                .apply(params.iter().chain(fields.iter()).map(Local::term));
            let minor_ty = mk_app(motive.term(), ctor_app)
                .pi(&fields.iter().chain(&ihs).cloned().collect::<Vec<_>>());
            minors.push(Local::fresh(
                Name::from_str(ctor.name.last_component()),
                minor_ty,
            ));
        }
        let major = Local::fresh(Name::from_str("t"), self_app.clone());
        let mut binders = params.clone();
        binders.push(motive.clone());
        binders.extend(minors);
        binders.push(major.clone());
        let rec_ty = mk_app(motive.term(), major.term()).pi(&binders);
        let rec_level_params = elim_level
            .iter()
            .cloned()
            .chain(level_params.iter().cloned())
            .collect::<Vec<_>>();
        let mut with_ctors = scratch.clone();
        with_ctors.insert_inductive(InductiveInfo {
            name: name.clone(),
            level_params: level_params.clone(),
            num_params,
            sort: sort.clone(),
            ctors: ctor_infos.clone(),
            rec: rec_name.clone(),
            elim_level: elim_level.clone(),
        });
        with_ctors.infer_sort_in(&rec_level_params, &LocalEnv::default(), &rec_ty)?;

        debug!("inductive {name} with recursor {rec_name} : {rec_ty}");
        self.insert(Decl {
            name: name.clone(),
            level_params: level_params.clone(),
            ty,
            kind: DeclKind::Inductive,
        });
        for (index, ctor) in ctor_infos.iter().enumerate() {
            self.insert(Decl {
                name: ctor.name.clone(),
                level_params: level_params.clone(),
                ty: ctor.ty.clone(),
                kind: DeclKind::Constructor {
                    inductive: name.clone(),
                    index,
                },
            });
        }
        self.insert(Decl {
            name: rec_name.clone(),
            level_params: rec_level_params,
            ty: rec_ty,
            kind: DeclKind::Recursor {
                inductive: name.clone(),
            },
        });
        self.insert_inductive(InductiveInfo {
            name,
            level_params,
            num_params,
            sort,
            ctors: ctor_infos,
            rec: rec_name,
            elim_level,
        });
        Ok(())
    }
}
