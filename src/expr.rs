use std::fmt::Display;
use std::sync::Arc;

use crate::calc::CalcBlock;
use crate::tactic::Tactic;
use crate::tt::{Level, Name, Term};

/// The elaborator's input: a name-resolved surface tree in which term-mode nodes,
/// tactic blocks and calc blocks nest freely.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A hypothesis or a global declaration; implicit arguments are inserted.
    Ident(Name),
    /// `@c`: a declaration whose implicit arguments are given explicitly.
    Explicit(Name),
    App(Arc<ExprApp>),
    Lam(Arc<ExprLam>),
    Pi(Arc<ExprPi>),
    Sort(Level),
    /// `_`, solved by unification.
    Hole,
    /// An incomplete proof, reported as a deferred obligation.
    Sorry,
    /// The most recent hypothesis.
    This,
    /// `‹φ›`: a hypothesis whose type matches `φ`.
    Assumption(Arc<Expr>),
    Annot(Arc<ExprAnnot>),
    /// An already elaborated term.
    Term(Term),
    By(Arc<Tactic>),
    Calc(Arc<CalcBlock>),
}

#[derive(Debug, Clone)]
pub struct ExprApp {
    pub fun: Expr,
    pub arg: Expr,
}

#[derive(Debug, Clone)]
pub struct ExprLam {
    pub binder_name: Name,
    pub binder_type: Option<Expr>,
    pub body: Expr,
}

#[derive(Debug, Clone)]
pub struct ExprPi {
    pub binder_name: Name,
    pub binder_type: Expr,
    pub body: Expr,
    pub implicit: bool,
}

#[derive(Debug, Clone)]
pub struct ExprAnnot {
    pub expr: Expr,
    pub ty: Expr,
}

pub fn ident(name: &str) -> Expr {
    Expr::Ident(Name::from_str(name))
}

pub fn explicit(name: &str) -> Expr {
    Expr::Explicit(Name::from_str(name))
}

/// `f a₁ ⋯ aₙ`
pub fn app(fun: Expr, args: impl IntoIterator<Item = Expr>) -> Expr {
    args.into_iter()
        .fold(fun, |fun, arg| Expr::App(Arc::new(ExprApp { fun, arg })))
}

/// `λ x, body` with the binder type taken from the expected type.
pub fn lam(name: &str, body: Expr) -> Expr {
    Expr::Lam(Arc::new(ExprLam {
        binder_name: Name::from_str(name),
        binder_type: None,
        body,
    }))
}

pub fn lam_typed(name: &str, ty: Expr, body: Expr) -> Expr {
    Expr::Lam(Arc::new(ExprLam {
        binder_name: Name::from_str(name),
        binder_type: Some(ty),
        body,
    }))
}

pub fn pi(name: &str, ty: Expr, body: Expr) -> Expr {
    Expr::Pi(Arc::new(ExprPi {
        binder_name: Name::from_str(name),
        binder_type: ty,
        body,
        implicit: false,
    }))
}

pub fn implicit_pi(name: &str, ty: Expr, body: Expr) -> Expr {
    Expr::Pi(Arc::new(ExprPi {
        binder_name: Name::from_str(name),
        binder_type: ty,
        body,
        implicit: true,
    }))
}

/// `Π (x₁ : A₁) ⋯ (xₙ : Aₙ), body`
pub fn pis<'a>(binders: impl IntoIterator<Item = (&'a str, Expr)>, body: Expr) -> Expr {
    let binders = binders.into_iter().collect::<Vec<_>>();
    binders
        .into_iter()
        .rev()
        .fold(body, |body, (name, ty)| pi(name, ty, body))
}

pub fn arrow(dom: Expr, cod: Expr) -> Expr {
    pi("_", dom, cod)
}

pub fn sort(level: Level) -> Expr {
    Expr::Sort(level)
}

pub fn prop() -> Expr {
    Expr::Sort(Level::Zero)
}

pub fn ty() -> Expr {
    Expr::Sort(Level::one())
}

/// `a = b`
pub fn eq(a: Expr, b: Expr) -> Expr {
    app(ident("Eq"), [a, b])
}

pub fn annot(expr: Expr, ty: Expr) -> Expr {
    Expr::Annot(Arc::new(ExprAnnot { expr, ty }))
}

pub fn assumption(prop: Expr) -> Expr {
    Expr::Assumption(Arc::new(prop))
}

pub fn by(tactic: Tactic) -> Expr {
    Expr::By(Arc::new(tactic))
}

pub fn calc(block: CalcBlock) -> Expr {
    Expr::Calc(Arc::new(block))
}

impl Expr {
    /// Splits `f a₁ ⋯ aₙ` into its head and arguments.
    pub fn unapply(&self) -> (&Expr, Vec<&Expr>) {
        let mut e = self;
        let mut args = vec![];
        while let Expr::App(inner) = e {
            args.push(&inner.arg);
            e = &inner.fun;
        }
        args.reverse();
        (e, args)
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Explicit(name) => write!(f, "@{name}"),
            Expr::App(_) => {
                let (head, args) = self.unapply();
                write!(f, "{head}")?;
                for arg in args {
                    match arg {
                        Expr::App(_) | Expr::Lam(_) | Expr::Pi(_) | Expr::By(_) => {
                            write!(f, " ({arg})")?
                        }
                        _ => write!(f, " {arg}")?,
                    }
                }
                Ok(())
            }
            Expr::Lam(inner) => match &inner.binder_type {
                Some(ty) => write!(f, "λ ({} : {ty}), {}", inner.binder_name, inner.body),
                None => write!(f, "λ {}, {}", inner.binder_name, inner.body),
            },
            Expr::Pi(inner) => {
                if inner.binder_name.as_str() == "_" && !inner.implicit {
                    match inner.binder_type {
                        Expr::Pi(_) | Expr::Lam(_) => {
                            write!(f, "({}) → {}", inner.binder_type, inner.body)
                        }
                        _ => write!(f, "{} → {}", inner.binder_type, inner.body),
                    }
                } else if inner.implicit {
                    write!(
                        f,
                        "Π {{{} : {}}}, {}",
                        inner.binder_name, inner.binder_type, inner.body
                    )
                } else {
                    write!(
                        f,
                        "Π ({} : {}), {}",
                        inner.binder_name, inner.binder_type, inner.body
                    )
                }
            }
            Expr::Sort(level) => write!(f, "{}", crate::tt::mk_sort(level.clone())),
            Expr::Hole => write!(f, "_"),
            Expr::Sorry => write!(f, "sorry"),
            Expr::This => write!(f, "this"),
            Expr::Assumption(prop) => write!(f, "‹{prop}›"),
            Expr::Annot(inner) => write!(f, "({} : {})", inner.expr, inner.ty),
            Expr::Term(m) => write!(f, "{m}"),
            Expr::By(tactic) => write!(f, "by {tactic}"),
            Expr::Calc(_) => write!(f, "calc …"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn application_spines() {
        let e = app(ident("f"), [ident("a"), app(ident("g"), [ident("b")])]);
        let (head, args) = e.unapply();
        assert!(matches!(head, Expr::Ident(name) if name.as_str() == "f"));
        assert_eq!(args.len(), 2);
        assert_eq!(e.to_string(), "f a (g b)");
    }

    #[test]
    fn binders_display() {
        let e = pis([("a", ident("Nat")), ("n", ident("Nat"))], eq(ident("a"), ident("n")));
        assert_eq!(e.to_string(), "Π (a : Nat), Π (n : Nat), Eq a n");
        let imp = arrow(ident("P"), ident("Q"));
        assert_eq!(imp.to_string(), "P → Q");
        assert_eq!(arrow(imp.clone(), imp).to_string(), "(P → Q) → P → Q");
    }
}
