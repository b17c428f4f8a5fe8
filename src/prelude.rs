//! The declarations every development starts from: equality, the logical connectives,
//! natural numbers with their order, lists and the `Mul` class.

use crate::cmd::{
    axiom, binder, class, ctor, def, implicit_binder, inductive, instance, recursive, telescope,
    trans, Cmd, Eval,
};
use crate::elab::{Options, SORRY_AX};
use crate::expr::{app, arrow, eq, ident, lam, prop, sort, ty, Expr};
use crate::kernel::Env;
use crate::recursion::{clause, pctor, pvar};
use crate::tt::Level;

fn u() -> Expr {
    sort(Level::param("u"))
}

fn le(a: Expr, b: Expr) -> Expr {
    app(ident("Nat.le"), [a, b])
}

fn mul(a: Expr, b: Expr) -> Expr {
    app(ident("Mul.mul"), [a, b])
}

fn nat() -> Expr {
    ident("Nat")
}

fn equality() -> Vec<Cmd> {
    let alpha = || implicit_binder("α", u());
    let a = || ident("a");
    let b = || ident("b");
    let c = || ident("c");
    vec![
        axiom("Eq", &["u"], telescope(&[alpha()], arrow(ident("α"), arrow(ident("α"), prop())))),
        axiom("Eq.refl", &["u"], telescope(&[alpha(), binder("a", ident("α"))], eq(a(), a()))),
        axiom(
            "Eq.subst",
            &["u"],
            telescope(
                &[
                    alpha(),
                    implicit_binder("a", ident("α")),
                    implicit_binder("b", ident("α")),
                    binder("motive", arrow(ident("α"), prop())),
                ],
                arrow(
                    eq(a(), b()),
                    arrow(app(ident("motive"), [a()]), app(ident("motive"), [b()])),
                ),
            ),
        ),
        axiom(
            "Eq.symm",
            &["u"],
            telescope(
                &[
                    alpha(),
                    implicit_binder("a", ident("α")),
                    implicit_binder("b", ident("α")),
                ],
                arrow(eq(a(), b()), eq(b(), a())),
            ),
        ),
        axiom(
            "Eq.trans",
            &["u"],
            telescope(
                &[
                    alpha(),
                    implicit_binder("a", ident("α")),
                    implicit_binder("b", ident("α")),
                    implicit_binder("c", ident("α")),
                ],
                arrow(eq(a(), b()), arrow(eq(b(), c()), eq(a(), c()))),
            ),
        ),
        axiom(
            "congrArg",
            &["u", "v"],
            telescope(
                &[
                    alpha(),
                    implicit_binder("β", sort(Level::param("v"))),
                    implicit_binder("a", ident("α")),
                    implicit_binder("b", ident("α")),
                    binder("f", arrow(ident("α"), ident("β"))),
                ],
                arrow(
                    eq(a(), b()),
                    eq(app(ident("f"), [a()]), app(ident("f"), [b()])),
                ),
            ),
        ),
        axiom(SORRY_AX, &["u"], telescope(&[binder("α", u())], ident("α"))),
        trans("Eq", "Eq", "Eq.trans"),
    ]
}

fn logic() -> Vec<Cmd> {
    let props = || [binder("a", prop()), binder("b", prop())];
    vec![
        inductive("True", &[], [], Level::Zero, [ctor("intro", [])]),
        inductive("False", &[], [], Level::Zero, []),
        inductive(
            "And",
            &[],
            props(),
            Level::Zero,
            [ctor(
                "intro",
                [binder("left", ident("a")), binder("right", ident("b"))],
            )],
        ),
        inductive(
            "Or",
            &[],
            props(),
            Level::Zero,
            [
                ctor("inl", [binder("h", ident("a"))]),
                ctor("inr", [binder("h", ident("b"))]),
            ],
        ),
        def(
            "Not",
            &[],
            arrow(prop(), prop()),
            lam("a", arrow(ident("a"), ident("False"))),
        ),
        inductive(
            "Exists",
            &["u"],
            [
                implicit_binder("α", u()),
                binder("p", arrow(ident("α"), prop())),
            ],
            Level::Zero,
            [ctor(
                "intro",
                [
                    binder("w", ident("α")),
                    binder("h", app(ident("p"), [ident("w")])),
                ],
            )],
        ),
    ]
}

fn naturals() -> Vec<Cmd> {
    let zero = || ident("Nat.zero");
    let succ = |n: Expr| app(ident("Nat.succ"), [n]);
    let binary = || arrow(nat(), arrow(nat(), nat()));
    let implicit_nats = |names: &[&str]| {
        names
            .iter()
            .map(|name| implicit_binder(name, nat()))
            .collect::<Vec<_>>()
    };
    let [a, b, c, m, n] = ["a", "b", "c", "m", "n"].map(ident);
    vec![
        inductive(
            "Nat",
            &[],
            [],
            Level::one(),
            [ctor("zero", []), ctor("succ", [binder("n", nat())])],
        ),
        recursive(
            "Nat.add",
            &[],
            binary(),
            [
                clause([pvar("n"), pctor("zero", [])], n.clone()),
                clause(
                    [pvar("n"), pctor("succ", [pvar("m")])],
                    succ(app(ident("Nat.add"), [n.clone(), m.clone()])),
                ),
            ],
        ),
        recursive(
            "Nat.mul",
            &[],
            binary(),
            [
                clause([pvar("n"), pctor("zero", [])], zero()),
                clause(
                    [pvar("n"), pctor("succ", [pvar("m")])],
                    app(
                        ident("Nat.add"),
                        [app(ident("Nat.mul"), [n.clone(), m.clone()]), n.clone()],
                    ),
                ),
            ],
        ),
        axiom(
            "Nat.zero_add",
            &[],
            telescope(
                &[binder("n", nat())],
                eq(app(ident("Nat.add"), [zero(), n.clone()]), n.clone()),
            ),
        ),
        axiom("Nat.le", &[], arrow(nat(), arrow(nat(), prop()))),
        axiom(
            "Nat.le_refl",
            &[],
            telescope(&[binder("n", nat())], le(n.clone(), n.clone())),
        ),
        axiom(
            "Nat.le_step",
            &[],
            telescope(
                &implicit_nats(&["n", "m"]),
                arrow(le(n.clone(), m.clone()), le(n.clone(), succ(m.clone()))),
            ),
        ),
        axiom(
            "Nat.le_trans",
            &[],
            telescope(
                &implicit_nats(&["a", "b", "c"]),
                arrow(le(a.clone(), b.clone()), arrow(le(b.clone(), c.clone()), le(a.clone(), c.clone()))),
            ),
        ),
        axiom(
            "Nat.le_of_eq_of_le",
            &[],
            telescope(
                &implicit_nats(&["a", "b", "c"]),
                arrow(eq(a.clone(), b.clone()), arrow(le(b.clone(), c.clone()), le(a.clone(), c.clone()))),
            ),
        ),
        axiom(
            "Nat.le_of_le_of_eq",
            &[],
            telescope(
                &implicit_nats(&["a", "b", "c"]),
                arrow(le(a.clone(), b.clone()), arrow(eq(b.clone(), c.clone()), le(a, c))),
            ),
        ),
        trans("Nat.le", "Nat.le", "Nat.le_trans"),
        trans("Eq", "Nat.le", "Nat.le_of_eq_of_le"),
        trans("Nat.le", "Eq", "Nat.le_of_le_of_eq"),
    ]
}

fn lists() -> Vec<Cmd> {
    let list = |e: Expr| app(ident("List"), [e]);
    let alpha = ident("α");
    vec![
        inductive(
            "List",
            &["u"],
            [binder("α", sort(Level::param("u").succ()))],
            Level::param("u").succ(),
            [
                ctor("nil", []),
                ctor(
                    "cons",
                    [
                        binder("head", alpha.clone()),
                        binder("tail", list(alpha.clone())),
                    ],
                ),
            ],
        ),
        recursive(
            "List.append",
            &["u"],
            telescope(
                &[implicit_binder("α", sort(Level::param("u").succ()))],
                arrow(list(alpha.clone()), arrow(list(alpha.clone()), list(alpha))),
            ),
            [
                clause([pvar("α"), pctor("nil", []), pvar("l")], ident("l")),
                clause(
                    [pvar("α"), pctor("cons", [pvar("h"), pvar("s")]), pvar("t")],
                    app(
                        ident("List.cons"),
                        [ident("h"), app(ident("List.append"), [ident("s"), ident("t")])],
                    ),
                ),
            ],
        ),
    ]
}

fn multiplication() -> Vec<Cmd> {
    let [a, b, n] = ["a", "b", "n"].map(ident);
    vec![
        inductive(
            "Mul",
            &[],
            [binder("α", ty())],
            Level::one(),
            [ctor(
                "mk",
                [binder("mul", arrow(ident("α"), arrow(ident("α"), ident("α"))))],
            )],
        ),
        class("Mul"),
        recursive(
            "Mul.mul",
            &[],
            telescope(
                &[
                    implicit_binder("α", ty()),
                    implicit_binder("inst", app(ident("Mul"), [ident("α")])),
                ],
                arrow(ident("α"), arrow(ident("α"), ident("α"))),
            ),
            [clause([pvar("α"), pctor("mk", [pvar("f")])], ident("f"))],
        ),
        def(
            "instMulNat",
            &[],
            app(ident("Mul"), [nat()]),
            app(ident("Mul.mk"), [ident("Nat.mul")]),
        ),
        instance("instMulNat", 100),
        axiom(
            "Nat.mul_comm",
            &[],
            telescope(
                &[binder("a", nat()), binder("b", nat())],
                eq(mul(a.clone(), b.clone()), mul(b, a.clone())),
            ),
        ),
        recursive(
            "pow",
            &[],
            arrow(nat(), arrow(nat(), nat())),
            [
                clause(
                    [pvar("a"), pctor("zero", [])],
                    app(ident("Nat.succ"), [ident("Nat.zero")]),
                ),
                clause(
                    [pvar("a"), pctor("succ", [pvar("n")])],
                    mul(a.clone(), app(ident("pow"), [a, n])),
                ),
            ],
        ),
    ]
}

/// All prelude commands, in dependency order.
pub fn cmds() -> Vec<Cmd> {
    [equality(), logic(), naturals(), lists(), multiplication()]
        .into_iter()
        .flatten()
        .collect()
}

/// A fresh environment containing the prelude.
pub fn env() -> anyhow::Result<Env> {
    let mut eval = Eval::new(Options::default());
    eval.run(cmds())?;
    Ok(eval.env)
}
