//! Worked examples checked on top of the prelude. Each one exercises a different part of
//! the elaborator: tactic scripts, structural induction, calc chains and computation.

use crate::calc::{step, CalcBlock};
use crate::cmd::{binder, telescope, theorem, Cmd};
use crate::expr::{app, arrow, by, calc, eq, ident, lam, prop, Expr};
use crate::tactic::{
    all, apply, cases, exact, focus, induction, intro, or_else, rewrite_rev, seq, simp, Tactic,
};

fn nat() -> Expr {
    ident("Nat")
}

fn and(a: Expr, b: Expr) -> Expr {
    app(ident("And"), [a, b])
}

fn or(a: Expr, b: Expr) -> Expr {
    app(ident("Or"), [a, b])
}

fn props() -> [crate::cmd::Binder; 2] {
    [binder("a", prop()), binder("b", prop())]
}

pub fn and_swap() -> Cmd {
    let [a, b] = ["a", "b"].map(ident);
    theorem(
        "and_swap",
        &[],
        telescope(&props(), arrow(and(a.clone(), b.clone()), and(b, a))),
        by(seq([
            intro(&["a", "b", "h"]),
            cases("h", &["ha", "hb"]),
            Tactic::Split,
            exact(ident("hb")),
            exact(ident("ha")),
        ])),
    )
}

pub fn or_swap() -> Cmd {
    let [a, b] = ["a", "b"].map(ident);
    let swap = or_else(
        seq([apply(ident("Or.inl")), Tactic::Assumption]),
        seq([apply(ident("Or.inr")), Tactic::Assumption]),
    );
    theorem(
        "or_swap",
        &[],
        telescope(&props(), arrow(or(a.clone(), b.clone()), or(b, a))),
        by(seq([intro(&["a", "b", "h"]), cases("h", &[]), all(swap)])),
    )
}

/// `pow a (n + 1) = pow a n * a`, by induction on `n`.
pub fn pow_succ() -> Cmd {
    let [a, n] = ["a", "n"].map(ident);
    let lhs = app(ident("pow"), [a.clone(), app(ident("Nat.succ"), [n.clone()])]);
    let rhs = app(ident("Mul.mul"), [app(ident("pow"), [a.clone(), n]), a]);
    theorem(
        "pow_succ'",
        &[],
        telescope(&[binder("a", nat()), binder("n", nat())], eq(lhs, rhs)),
        by(pow_succ_script()),
    )
}

pub fn pow_succ_script() -> Tactic {
    seq([
        intro(&["a", "n"]),
        induction("n", &["n", "ih"]),
        all(apply(ident("Nat.mul_comm"))),
    ])
}

pub fn append_nil() -> Cmd {
    let l = ident("l");
    let list_nat = app(ident("List"), [nat()]);
    theorem(
        "List.nil_append",
        &[],
        telescope(
            &[binder("l", list_nat)],
            eq(app(ident("List.append"), [ident("List.nil"), l.clone()]), l),
        ),
        by(seq([intro(&["l"]), Tactic::Rfl])),
    )
}

pub fn add_congr() -> Cmd {
    let [a, b] = ["a", "b"].map(ident);
    let add_zero = |m: Expr| app(ident("Nat.add"), [m, ident("Nat.zero")]);
    theorem(
        "add_zero_of_eq",
        &[],
        telescope(
            &[binder("a", nat()), binder("b", nat())],
            arrow(eq(a.clone(), b.clone()), eq(add_zero(b), a)),
        ),
        by(seq([
            intro(&["a", "b", "h"]),
            rewrite_rev(ident("h")),
            Tactic::Rfl,
        ])),
    )
}

pub fn zero_add_simp() -> Cmd {
    let n = ident("n");
    theorem(
        "zero_add_self",
        &[],
        telescope(
            &[binder("n", nat())],
            eq(app(ident("Nat.add"), [ident("Nat.zero"), n.clone()]), n),
        ),
        by(seq([intro(&["n"]), simp([ident("Nat.zero_add")])])),
    )
}

/// `a = b → b ≤ c → a ≤ c` as a calc chain.
pub fn le_chain() -> Cmd {
    let [a, b, c] = ["a", "b", "c"].map(ident);
    let le = |x: Expr, y: Expr| app(ident("Nat.le"), [x, y]);
    let block = CalcBlock {
        start: a.clone(),
        steps: vec![
            step(ident("Eq"), b.clone(), ident("h₁")),
            step(ident("Nat.le"), c.clone(), ident("h₂")),
        ],
    };
    let body = ["a", "b", "c", "h₁", "h₂"]
        .iter()
        .rev()
        .fold(calc(block), |body, x| lam(x, body));
    theorem(
        "le_of_eq_of_le'",
        &[],
        telescope(
            &[binder("a", nat()), binder("b", nat()), binder("c", nat())],
            arrow(eq(a.clone(), b.clone()), arrow(le(b, c.clone()), le(a, c))),
        ),
        body,
    )
}

pub fn two_le_four() -> Cmd {
    let num = |n: usize| {
        (0..n).fold(ident("Nat.zero"), |m, _| app(ident("Nat.succ"), [m]))
    };
    theorem(
        "two_le_four",
        &[],
        app(ident("Nat.le"), [num(2), num(4)]),
        by(Tactic::Decide),
    )
}

pub fn focus_example() -> Cmd {
    let a = ident("a");
    theorem(
        "and_self_intro",
        &[],
        telescope(&[binder("a", prop())], arrow(a.clone(), and(a.clone(), a))),
        by(seq([
            intro(&["a", "h"]),
            Tactic::Split,
            focus(or_else(Tactic::Split, exact(ident("h")))),
            Tactic::Assumption,
        ])),
    )
}

/// Everything the binary checks after the prelude.
pub fn showcase() -> Vec<Cmd> {
    vec![
        and_swap(),
        or_swap(),
        pow_succ(),
        append_nil(),
        add_congr(),
        zero_add_simp(),
        le_chain(),
        two_le_four(),
        focus_example(),
    ]
}
