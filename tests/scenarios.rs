use hashi::cmd::{binder, telescope, theorem, Cmd, Eval};
use hashi::expr::{app, arrow, by, ident, prop};
use hashi::kernel::DeclKind;
use hashi::state::ProofState;
use hashi::tactic::{all, apply, exact, induction, intro, seq, Tactic};
use hashi::tt::{LocalEnv, Name};
use hashi::{library, prelude, Elaborator, Options};

#[ctor::ctor]
fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn format_error(err: &anyhow::Error) -> String {
    let mut lines = vec!["error chain:".to_string()];
    for cause in err.chain() {
        lines.push(format!("  - {cause}"));
    }
    lines.join("\n")
}

fn eval_with_prelude(options: Options) -> Eval {
    let mut eval = Eval::new(options);
    eval.run(prelude::cmds()).expect("prelude checks");
    eval
}

#[test]
fn whole_library_checks() {
    let env = hashi::process(Options::default()).unwrap();
    for cmd in library::showcase() {
        let decl = env.get(cmd.name()).unwrap();
        let DeclKind::Theorem { proof } = &decl.kind else {
            panic!("{} is not a theorem", decl.name);
        };
        env.check_in(&decl.level_params, &LocalEnv::default(), proof, &decl.ty)
            .unwrap();
        assert!(!proof.contains_const(&Name::from_str("sorryAx")));
    }
}

#[test]
fn and_swap_proves_its_statement() {
    let mut eval = eval_with_prelude(Options::default());
    eval.run([library::and_swap()]).unwrap();
    let decl = eval.env.get(&Name::from_str("and_swap")).unwrap();
    assert_eq!(decl.ty.to_string(), "Π (a : Prop) (b : Prop), a ∧ b → b ∧ a");
    let DeclKind::Theorem { proof } = &decl.kind else {
        panic!("and_swap is not a theorem");
    };
    let ty = eval.env.infer(&LocalEnv::default(), proof).unwrap();
    assert!(eval.env.is_def_eq(&ty, &decl.ty));
}

#[test]
fn pow_succ_by_induction() {
    let env = prelude::env().unwrap();
    let elab = Elaborator::new(&env);
    let Cmd::Theorem(thm) = library::pow_succ() else {
        panic!("pow_succ' is not a theorem");
    };
    let target = elab
        .elaborate_type(&thm.ty, &LocalEnv::default())
        .unwrap()
        .term;

    let state = ProofState::new(LocalEnv::default(), target.clone());
    let state = seq([intro(&["a", "n"]), induction("n", &["n", "ih"])])
        .run(&elab, state)
        .unwrap();
    assert_eq!(state.goals.len(), 2);
    insta::assert_snapshot!(state.to_string(), @r"
    a : Nat
    ⊢ pow a 1 = pow a 0 * a

    a : Nat
    n : Nat
    ih : pow a (Nat.succ n) = pow a n * a
    ⊢ pow a (Nat.succ (Nat.succ n)) = pow a (Nat.succ n) * a
    ");

    let state = all(apply(ident("Nat.mul_comm"))).run(&elab, state).unwrap();
    let res = elab.qed(state).unwrap();
    assert!(res.ty.alpha_eq(&target));
    let ty = env.infer(&LocalEnv::default(), &res.term).unwrap();
    assert!(env.is_def_eq(&ty, &target));
}

#[test]
fn append_equations_hold_by_computation() {
    let env = prelude::env().unwrap();
    for name in ["List.append.eq_1", "List.append.eq_2"] {
        let decl = env.get(&Name::from_str(name)).unwrap();
        let DeclKind::Theorem { proof } = &decl.kind else {
            panic!("{name} is not a theorem");
        };
        assert!(proof.contains_const(&Name::from_str("Eq.refl")));
        assert!(decl.ty.contains_const(&Name::from_str("List.append")));
        env.check_in(&decl.level_params, &LocalEnv::default(), proof, &decl.ty)
            .unwrap();
    }
}

fn half_done() -> Cmd {
    let a = ident("a");
    theorem(
        "half_done",
        &[],
        telescope(
            &[binder("a", prop())],
            arrow(a.clone(), app(ident("And"), [a.clone(), a])),
        ),
        by(seq([
            intro(&["a", "h"]),
            Tactic::Split,
            exact(ident("h")),
            Tactic::Sorry,
        ])),
    )
}

#[test]
fn sorry_is_rejected_by_default() {
    let mut eval = eval_with_prelude(Options::default());
    let version = eval.env.version();
    let err = eval.run([half_done()]).unwrap_err();
    insta::assert_snapshot!(format_error(&err), @r"
    error chain:
      - while checking half_done
      - incomplete proof, 1 deferred obligation(s):
    a : Prop
    h : a
    ⊢ a
    ");
    assert_eq!(eval.env.version(), version);
}

#[test]
fn sorry_is_reported_when_allowed() {
    let mut eval = eval_with_prelude(Options {
        allow_deferred: true,
        ..Options::default()
    });
    eval.run([half_done()]).unwrap();
    let decl = eval.env.get(&Name::from_str("half_done")).unwrap();
    let DeclKind::Theorem { proof } = &decl.kind else {
        panic!("half_done is not a theorem");
    };
    assert!(proof.contains_const(&Name::from_str("sorryAx")));
}
