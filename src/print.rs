use std::collections::HashMap;
use std::fmt::Display;

use once_cell::sync::Lazy;

use crate::state::{Goal, ProofState};
use crate::tt::{Level, LocalEnv, Name, Term};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixity {
    Infix,
    Infixl,
    Infixr,
    Prefix,
}

#[derive(Debug, Clone)]
pub struct Operator {
    pub symbol: &'static str,
    pub fixity: Fixity,
    pub prec: usize,
    /// Leading implicit arguments that are not shown.
    pub implicit_args: usize,
}

impl Operator {
    fn arity(&self) -> usize {
        match self.fixity {
            Fixity::Infix | Fixity::Infixl | Fixity::Infixr => 2,
            Fixity::Prefix => 1,
        }
    }
}

static NOTATION: Lazy<HashMap<Name, Operator>> = Lazy::new(|| {
    let op = |symbol, fixity, prec, implicit_args| Operator {
        symbol,
        fixity,
        prec,
        implicit_args,
    };
    HashMap::from([
        (Name::from_str("Eq"), op("=", Fixity::Infix, 50, 1)),
        (Name::from_str("Nat.le"), op("≤", Fixity::Infix, 50, 0)),
        (Name::from_str("And"), op("∧", Fixity::Infixr, 35, 0)),
        (Name::from_str("Or"), op("∨", Fixity::Infixr, 30, 0)),
        (Name::from_str("Not"), op("¬", Fixity::Prefix, 40, 0)),
        (Name::from_str("Nat.add"), op("+", Fixity::Infixl, 65, 0)),
        (Name::from_str("Nat.mul"), op("*", Fixity::Infixl, 70, 0)),
        (Name::from_str("Mul.mul"), op("*", Fixity::Infixl, 70, 2)),
    ])
});

const PREC_BINDER: usize = 0;
const PREC_ARROW: usize = 25;
const PREC_APP: usize = 1024;
const PREC_ARG: usize = 1025;

struct Printer<'a> {
    local_env: Option<&'a LocalEnv>,
}

impl<'a> Printer<'a> {
    fn fmt_term(&self, m: &Term, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut local_names = vec![];
        let res = self.fmt_term_help(m, PREC_BINDER, &mut local_names, f);
        assert!(local_names.is_empty());
        res
    }

    fn fmt_term_help(
        &self,
        m: &Term,
        prec: usize,
        local_names: &mut Vec<Name>,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        if let Some(n) = as_numeral(m) {
            return write!(f, "{n}");
        }
        if let Term::Const(head) = m.head() {
            if let Some(op) = NOTATION.get(&head.name) {
                let args = m.args();
                if args.len() == op.implicit_args + op.arity() {
                    return self.fmt_operator(op, &args[op.implicit_args..], prec, local_names, f);
                }
            }
        }
        match m {
            Term::Var(inner) => {
                if inner.index < local_names.len() {
                    write!(f, "{}", local_names[local_names.len() - inner.index - 1])
                } else {
                    write!(f, "#{}", inner.index)
                }
            }
            Term::Sort(inner) => fmt_sort(&inner.level, prec, f),
            Term::Const(inner) => write!(f, "{}", inner.name),
            Term::Ctor(inner) => write!(f, "{}", inner.name),
            Term::Local(inner) => {
                match self.local_env.and_then(|local_env| local_env.get(inner.id)) {
                    Some(local) => write!(f, "{}", local.name),
                    None => write!(f, "{}", inner.id),
                }
            }
            Term::Hole(inner) => write!(f, "?{}", inner.id),
            Term::App(_) => {
                if prec > PREC_APP {
                    write!(f, "(")?;
                }
                self.fmt_term_help(m.head(), PREC_APP, local_names, f)?;
                for arg in m.args() {
                    write!(f, " ")?;
                    self.fmt_term_help(arg, PREC_ARG, local_names, f)?;
                }
                if prec > PREC_APP {
                    write!(f, ")")?;
                }
                Ok(())
            }
            Term::Abs(_) => {
                if prec > PREC_BINDER {
                    write!(f, "(")?;
                }
                write!(f, "λ")?;
                let mut m = m;
                let mut pushed = 0;
                while let Term::Abs(inner) = m {
                    write!(f, " ({} : ", inner.binder_name)?;
                    self.fmt_term_help(&inner.binder_type, PREC_BINDER, local_names, f)?;
                    write!(f, ")")?;
                    local_names.push(inner.binder_name.clone());
                    pushed += 1;
                    m = &inner.body;
                }
                write!(f, ", ")?;
                self.fmt_term_help(m, PREC_BINDER, local_names, f)?;
                local_names.truncate(local_names.len() - pushed);
                if prec > PREC_BINDER {
                    write!(f, ")")?;
                }
                Ok(())
            }
            Term::Pi(inner) if !inner.implicit && !inner.body.contains_var(0) => {
                if prec > PREC_ARROW {
                    write!(f, "(")?;
                }
                self.fmt_term_help(&inner.binder_type, PREC_ARROW + 1, local_names, f)?;
                write!(f, " → ")?;
                local_names.push(inner.binder_name.clone());
                let res = self.fmt_term_help(&inner.body, PREC_ARROW, local_names, f);
                local_names.pop();
                res?;
                if prec > PREC_ARROW {
                    write!(f, ")")?;
                }
                Ok(())
            }
            Term::Pi(_) => {
                if prec > PREC_BINDER {
                    write!(f, "(")?;
                }
                write!(f, "Π")?;
                let mut m = m;
                let mut pushed = 0;
                while let Term::Pi(inner) = m {
                    if pushed > 0 && !inner.implicit && !inner.body.contains_var(0) {
                        break;
                    }
                    let (open, close) = if inner.implicit { ("{", "}") } else { ("(", ")") };
                    write!(f, " {open}{} : ", inner.binder_name)?;
                    self.fmt_term_help(&inner.binder_type, PREC_BINDER, local_names, f)?;
                    write!(f, "{close}")?;
                    local_names.push(inner.binder_name.clone());
                    pushed += 1;
                    m = &inner.body;
                }
                write!(f, ", ")?;
                self.fmt_term_help(m, PREC_BINDER, local_names, f)?;
                local_names.truncate(local_names.len() - pushed);
                if prec > PREC_BINDER {
                    write!(f, ")")?;
                }
                Ok(())
            }
        }
    }

    fn fmt_operator(
        &self,
        op: &Operator,
        args: &[&Term],
        prec: usize,
        local_names: &mut Vec<Name>,
        f: &mut std::fmt::Formatter,
    ) -> std::fmt::Result {
        if prec > op.prec {
            write!(f, "(")?;
        }
        match op.fixity {
            Fixity::Prefix => {
                write!(f, "{}", op.symbol)?;
                self.fmt_term_help(args[0], op.prec, local_names, f)?;
            }
            Fixity::Infix | Fixity::Infixl | Fixity::Infixr => {
                let (lhs_prec, rhs_prec) = match op.fixity {
                    Fixity::Infixl => (op.prec, op.prec + 1),
                    Fixity::Infixr => (op.prec + 1, op.prec),
                    _ => (op.prec + 1, op.prec + 1),
                };
                self.fmt_term_help(args[0], lhs_prec, local_names, f)?;
                write!(f, " {} ", op.symbol)?;
                self.fmt_term_help(args[1], rhs_prec, local_names, f)?;
            }
        }
        if prec > op.prec {
            write!(f, ")")?;
        }
        Ok(())
    }
}

fn fmt_sort(level: &Level, prec: usize, f: &mut std::fmt::Formatter) -> std::fmt::Result {
    let (base, offset) = level.to_offset();
    let (keyword, shown) = match (base, offset) {
        (Level::Zero, 0) => return write!(f, "Prop"),
        (Level::Zero, 1) => return write!(f, "Type"),
        (_, 0) => ("Sort", level.clone()),
        (_, _) => {
            let mut shown = base.clone();
            for _ in 1..offset {
                shown = shown.succ();
            }
            ("Type", shown)
        }
    };
    if prec > PREC_APP {
        write!(f, "(")?;
    }
    match shown {
        Level::Zero | Level::Param(_) | Level::Meta(_) => write!(f, "{keyword} {shown}")?,
        Level::Succ(_) if shown.to_offset().0 == &Level::Zero => write!(f, "{keyword} {shown}")?,
        _ => write!(f, "{keyword} ({shown})")?,
    }
    if prec > PREC_APP {
        write!(f, ")")?;
    }
    Ok(())
}

/// Closed chains of `Nat.succ` over `Nat.zero`.
pub(crate) fn as_numeral(m: &Term) -> Option<usize> {
    let mut m = m;
    let mut n = 0;
    loop {
        let Term::Ctor(head) = m.head() else {
            return None;
        };
        if head.inductive.as_str() != "Nat" {
            return None;
        }
        let args = m.args();
        match (head.index, args.as_slice()) {
            (0, []) => return Some(n),
            (1, [arg]) => {
                n += 1;
                m = *arg;
            }
            _ => return None,
        }
    }
}

impl Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Printer { local_env: None }.fmt_term(self, f)
    }
}

/// A term displayed with the hypothesis names of `local_env`.
pub struct Pretty<'a> {
    term: &'a Term,
    local_env: &'a LocalEnv,
}

pub fn pretty<'a>(term: &'a Term, local_env: &'a LocalEnv) -> Pretty<'a> {
    Pretty { term, local_env }
}

impl<'a> Display for Pretty<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Printer {
            local_env: Some(self.local_env),
        }
        .fmt_term(self.term, f)
    }
}

impl Display for Goal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for local in &self.local_env.locals {
            writeln!(f, "{} : {}", local.name, pretty(&local.ty, &self.local_env))?;
        }
        write!(f, "⊢ {}", pretty(&self.target, &self.local_env))
    }
}

impl Display for ProofState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.goals.is_empty() {
            return write!(f, "no goals");
        }
        for (i, goal) in self.goals.iter().enumerate() {
            if i > 0 {
                write!(f, "\n\n")?;
            }
            write!(f, "{goal}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::{mk_arrow, mk_const, mk_ctor, mk_pi, mk_prop, mk_sort, mk_var, Local};

    fn c(name: &str) -> Term {
        mk_const(Name::from_str(name), vec![])
    }

    #[test]
    fn arrows_and_binders() {
        let p = c("P");
        let q = c("Q");
        let ty = mk_arrow(mk_arrow(p.clone(), q.clone()), mk_arrow(p.clone(), q.clone()));
        assert_eq!(ty.to_string(), "(P → Q) → P → Q");
        let all = mk_pi(
            Name::from_str("α"),
            mk_sort(Level::param("u")),
            mk_pi(Name::from_str("a"), mk_var(0), c("R").apply([mk_var(0)]), false),
            true,
        );
        assert_eq!(all.to_string(), "Π {α : Sort u} (a : α), R a");
        assert_eq!(mk_sort(Level::param("u").succ()).to_string(), "Type u");
        assert_eq!(mk_prop().to_string(), "Prop");
    }

    #[test]
    fn notation_and_numerals() {
        let nat = c("Nat");
        let zero = mk_ctor(Name::from_str("Nat"), 0, Name::from_str("Nat.zero"), vec![]);
        let succ = mk_ctor(Name::from_str("Nat"), 1, Name::from_str("Nat.succ"), vec![]);
        let a = Local::fresh(Name::from_str("a"), nat.clone());
        let local_env = LocalEnv::new(vec![a.clone()]);
        let lhs = c("pow").apply([a.term(), succ.apply([zero.clone()])]);
        let rhs = c("Nat.mul").apply([c("pow").apply([a.term(), zero]), a.term()]);
        let eq = mk_const(Name::from_str("Eq"), vec![Level::one()]).apply([nat, lhs, rhs]);
        assert_eq!(pretty(&eq, &local_env).to_string(), "pow a 1 = pow a 0 * a");
        let and = c("And").apply([c("A"), c("Or").apply([c("B"), c("C")])]);
        assert_eq!(and.to_string(), "A ∧ (B ∨ C)");
    }

    #[test]
    fn goal_lists_hypotheses() {
        let a = Local::fresh(Name::from_str("a"), mk_prop());
        let b = Local::fresh(Name::from_str("b"), mk_prop());
        let local_env = LocalEnv::new(vec![a.clone(), b.clone()]);
        let goal = Goal::new(
            local_env,
            mk_arrow(c("And").apply([a.term(), b.term()]), c("And").apply([b.term(), a.term()])),
        );
        insta::assert_snapshot!(goal.to_string(), @r"
        a : Prop
        b : Prop
        ⊢ a ∧ b → b ∧ a
        ");
    }
}
