use log::trace;

use super::Env;
use crate::tt::{mk_local, Id, Term, TermAbs, TermConst};

impl Env {
    /// Weak head normal form with respect to β and ι.
    pub fn whnf_core(&self, m: &Term) -> Term {
        let mut m = m.clone();
        loop {
            match m.head() {
                Term::Abs(_) if matches!(m, Term::App(_)) => {
                    let (head, args) = m.unapply();
                    m = head.beta(&args);
                }
                Term::Const(head) => {
                    let Some(reduced) = self.iota(head, &m) else {
                        return m;
                    };
                    m = reduced;
                }
                _ => return m,
            }
        }
    }

    /// Weak head normal form with respect to β, ι and δ.
    pub fn whnf(&self, m: &Term) -> Term {
        let mut m = self.whnf_core(m);
        while let Some(unfolded) = self.unfold_definition(&m) {
            m = self.whnf_core(&unfolded);
        }
        m
    }

    /// `T.rec params motive minors (cᵢ params fields) extra` ⟶ `minorᵢ fields ihs extra`
    fn iota(&self, head: &TermConst, m: &Term) -> Option<Term> {
        let info = self.recursor_of(&head.name)?;
        let args = m.args();
        let major_index = info.num_params + 1 + info.ctors.len();
        if args.len() <= major_index {
            return None;
        }
        let major = self.whnf(args[major_index]);
        let Term::Ctor(ctor) = major.head() else {
            return None;
        };
        if ctor.inductive != info.name {
            return None;
        }
        let ctor_info = info.ctors.get(ctor.index)?;
        let ctor_args = major.args();
        if ctor_args.len() != info.num_params + ctor_info.num_fields {
            return None;
        }
        let fields = &ctor_args[info.num_params..];
        let rec_prefix = m
            .head()
            .apply(args[..major_index].iter().map(|&arg| arg.clone()));
        let mut minor_args = fields.iter().map(|&field| field.clone()).collect::<Vec<_>>();
        for (field, recursive) in fields.iter().zip(&ctor_info.recursive) {
            if *recursive {
                minor_args.push(mk_app_one(&rec_prefix, field));
            }
        }
        minor_args.extend(args[major_index + 1..].iter().map(|&arg| arg.clone()));
        let minor = args[info.num_params + 1 + ctor.index];
        trace!("iota {} on {}", head.name, ctor.name);
        Some(minor.beta(&minor_args))
    }

    /// Definitional equality up to β, ι, δ and η.
    pub fn is_def_eq(&self, m1: &Term, m2: &Term) -> bool {
        if m1.alpha_eq(m2) {
            return true;
        }
        let mut m1 = self.whnf_core(m1);
        let mut m2 = self.whnf_core(m2);
        loop {
            trace!("def_eq {m1} =?= {m2}");
            if m1.alpha_eq(&m2) {
                return true;
            }
            match (&m1, &m2) {
                (Term::Sort(s1), Term::Sort(s2)) => return s1.level.is_equiv(&s2.level),
                (Term::Pi(p1), Term::Pi(p2)) => {
                    return self.is_def_eq(&p1.binder_type, &p2.binder_type)
                        && self.binder_bodies_def_eq(&p1.body, &p2.body);
                }
                (Term::Abs(a1), Term::Abs(a2)) => {
                    return self.is_def_eq(&a1.binder_type, &a2.binder_type)
                        && self.binder_bodies_def_eq(&a1.body, &a2.body);
                }
                (Term::Abs(a), _) => return self.eta_def_eq(a, &m2),
                (_, Term::Abs(a)) => return self.eta_def_eq(a, &m1),
                _ => {}
            }
            if self.spine_def_eq(&m1, &m2) {
                return true;
            }
            let h1 = self.head_height(&m1);
            let h2 = self.head_height(&m2);
            if h1 == 0 && h2 == 0 {
                return false;
            }
            // Unfold the side that is defined later first.
            let mut progress = false;
            if h1 >= h2 {
                if let Some(m) = self.unfold_definition(&m1) {
                    m1 = self.whnf_core(&m);
                    progress = true;
                }
            }
            if h2 >= h1 {
                if let Some(m) = self.unfold_definition(&m2) {
                    m2 = self.whnf_core(&m);
                    progress = true;
                }
            }
            if !progress {
                return false;
            }
        }
    }

    fn binder_bodies_def_eq(&self, body1: &Term, body2: &Term) -> bool {
        let x = mk_local(Id::fresh());
        self.is_def_eq(
            &body1.open(std::slice::from_ref(&x), 0),
            &body2.open(std::slice::from_ref(&x), 0),
        )
    }

    /// (λ x, b) ≡ n  iff  b[x] ≡ n x
    fn eta_def_eq(&self, abs: &TermAbs, other: &Term) -> bool {
        let x = mk_local(Id::fresh());
        let body = abs.body.open(std::slice::from_ref(&x), 0);
        self.is_def_eq(&body, &mk_app_one(other, &x))
    }

    fn spine_def_eq(&self, m1: &Term, m2: &Term) -> bool {
        let (head1, args1) = (m1.head(), m1.args());
        let (head2, args2) = (m2.head(), m2.args());
        if args1.len() != args2.len() {
            return false;
        }
        let heads_eq = match (head1, head2) {
            (Term::Local(x1), Term::Local(x2)) => x1.id == x2.id,
            (Term::Const(c1), Term::Const(c2)) => {
                c1.name == c2.name
                    && c1.levels.len() == c2.levels.len()
                    && c1
                        .levels
                        .iter()
                        .zip(&c2.levels)
                        .all(|(l1, l2)| l1.is_equiv(l2))
            }
            (Term::Ctor(c1), Term::Ctor(c2)) => {
                c1.inductive == c2.inductive
                    && c1.index == c2.index
                    && c1
                        .levels
                        .iter()
                        .zip(&c2.levels)
                        .all(|(l1, l2)| l1.is_equiv(l2))
            }
            (Term::Var(v1), Term::Var(v2)) => v1.index == v2.index,
            (Term::Hole(h1), Term::Hole(h2)) => h1.id == h2.id,
            _ => false,
        };
        heads_eq
            && args1
                .iter()
                .zip(&args2)
                .all(|(a1, a2)| self.is_def_eq(a1, a2))
    }
}

fn mk_app_one(fun: &Term, arg: &Term) -> Term {
    crate::tt::mk_app(fun.clone(), arg.clone())
}

#[cfg(test)]
mod tests {
    use crate::kernel::{Env, InductiveDecl};
    use crate::tt::{mk_arrow, mk_const, mk_ctor, mk_type, Local, Name, Term};

    fn nat_env() -> Env {
        let mut env = Env::new();
        let nat = mk_const(Name::from_str("Nat"), vec![]);
        env.add_inductive(InductiveDecl {
            name: Name::from_str("Nat"),
            level_params: vec![],
            num_params: 0,
            ty: mk_type(),
            ctors: vec![
                (Name::from_str("Nat.zero"), nat.clone()),
                (Name::from_str("Nat.succ"), mk_arrow(nat.clone(), nat)),
            ],
        })
        .unwrap();
        env
    }

    fn zero() -> Term {
        mk_ctor(Name::from_str("Nat"), 0, Name::from_str("Nat.zero"), vec![])
    }

    fn succ(n: Term) -> Term {
        mk_ctor(Name::from_str("Nat"), 1, Name::from_str("Nat.succ"), vec![]).apply([n])
    }

    #[test]
    fn iota_reduces_recursor_on_constructor() {
        let env = nat_env();
        let nat = mk_const(Name::from_str("Nat"), vec![]);
        let t = Local::fresh(Name::from_str("t"), nat.clone());
        let motive = nat.clone().abs(&[t]);
        // double := Nat.rec (λ _, Nat) zero (λ n ih, succ (succ ih))
        let n = Local::fresh(Name::from_str("n"), nat.clone());
        let ih = Local::fresh(Name::from_str("ih"), nat.clone());
        let step = succ(succ(ih.term())).abs(&[n, ih]);
        let rec = mk_const(
            Name::from_str("Nat.rec"),
            vec![crate::tt::Level::one()],
        )
        .apply([motive, zero(), step]);
        let two = succ(succ(zero()));
        let four = succ(succ(succ(succ(zero()))));
        let result = rec.apply([two]);
        assert!(env.is_def_eq(&result, &four));
        assert!(!env.is_def_eq(&result, &succ(zero())));
    }

    #[test]
    fn stuck_recursor_stays_neutral() {
        let env = nat_env();
        let nat = mk_const(Name::from_str("Nat"), vec![]);
        let t = Local::fresh(Name::from_str("t"), nat.clone());
        let x = Local::fresh(Name::from_str("x"), nat.clone());
        let motive = nat.clone().abs(&[t]);
        let n = Local::fresh(Name::from_str("n"), nat.clone());
        let ih = Local::fresh(Name::from_str("ih"), nat.clone());
        let rec = mk_const(
            Name::from_str("Nat.rec"),
            vec![crate::tt::Level::one()],
        )
        .apply([motive, zero(), ih.term().abs(&[n, ih.clone()]), x.term()]);
        let whnf = env.whnf(&rec);
        assert!(whnf.alpha_eq(&rec));
    }

    #[test]
    fn eta_equivalence() {
        let env = nat_env();
        let nat = mk_const(Name::from_str("Nat"), vec![]);
        let f = Local::fresh(Name::from_str("f"), mk_arrow(nat.clone(), nat.clone()));
        let x = Local::fresh(Name::from_str("x"), nat);
        let expanded = f.term().apply([x.term()]).abs(&[x]);
        assert!(env.is_def_eq(&expanded, &f.term()));
        assert!(env.is_def_eq(&f.term(), &expanded));
    }
}
