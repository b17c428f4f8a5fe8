use std::collections::HashMap;
use std::fmt::Display;
use std::hash::{Hash, Hasher};
use std::iter::zip;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Ord, PartialOrd, Default)]
pub struct Name(Arc<String>);

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd, Default)]
pub struct Id(usize);

static NAME_TABLE: Lazy<Mutex<HashMap<String, Weak<String>>>> = Lazy::new(Default::default);

static ID_COUNTER: AtomicUsize = AtomicUsize::new(0);
static ID_NAME_TABLE: Lazy<Mutex<HashMap<Id, Name>>> = Lazy::new(Default::default);

impl Display for Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Name {
    pub fn from_str(value: &str) -> Name {
        let mut table = NAME_TABLE.lock().unwrap();
        if let Some(existing) = table.get(value).and_then(|weak| weak.upgrade()) {
            return Name(existing);
        }

        let owned = Arc::new(value.to_owned());
        table.insert(value.to_owned(), Arc::downgrade(&owned));
        Name(owned)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Dotted identifiers such as `Nat.succ` or `pow_succ'`.
    pub fn is_valid_ident(&self) -> bool {
        static RE: Lazy<Regex> = Lazy::new(|| {
            Regex::new(r"^[\p{Cased_Letter}_][\p{Cased_Letter}\p{Number}_']*(\.[\p{Cased_Letter}\p{Number}_][\p{Cased_Letter}\p{Number}_']*)*$").unwrap()
        });
        RE.is_match(self.as_str())
    }

    /// The last dot-separated component, e.g. `succ` for `Nat.succ`.
    pub fn last_component(&self) -> &str {
        self.as_str().rsplit('.').next().unwrap_or(self.as_str())
    }

    /// Adds a dotted suffix: `Nat` + `rec` = `Nat.rec`.
    pub fn extend(&self, suffix: impl AsRef<str>) -> Name {
        Name::from_str(&format!("{}.{}", self, suffix.as_ref()))
    }

    /// The name a shadowed hypothesis is displayed with.
    pub fn inaccessible(&self) -> Name {
        Name::from_str(&format!("{}✝", self))
    }
}

impl From<&str> for Name {
    fn from(value: &str) -> Self {
        Name::from_str(value)
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(name) = self.name() {
            return write!(f, "{}{}", name, self.0);
        }
        write!(f, "{}", self.0)
    }
}

impl Id {
    pub fn fresh() -> Self {
        let id = ID_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Id(id)
    }

    pub fn fresh_with_name(name: Name) -> Self {
        let new_id = Id::fresh();
        ID_NAME_TABLE.lock().unwrap().insert(new_id, name);
        new_id
    }

    pub fn name(&self) -> Option<Name> {
        ID_NAME_TABLE.lock().unwrap().get(self).cloned()
    }
}

/// Universe levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Level {
    #[default]
    Zero,
    Succ(Arc<Level>),
    Max(Arc<Level>, Arc<Level>),
    /// `imax u v` is `0` when `v` is `0` and `max u v` otherwise.
    IMax(Arc<Level>, Arc<Level>),
    Param(Name),
    Meta(Id),
}

impl Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (base, offset) = self.to_offset();
        match base {
            Level::Zero => write!(f, "{offset}"),
            Level::Param(name) if offset == 0 => write!(f, "{name}"),
            Level::Meta(id) if offset == 0 => write!(f, "?u{}", id.0),
            Level::Max(l1, l2) if offset == 0 => write!(f, "max ({l1}) ({l2})"),
            Level::IMax(l1, l2) if offset == 0 => write!(f, "imax ({l1}) ({l2})"),
            _ => write!(f, "{base}+{offset}"),
        }
    }
}

impl Level {
    pub fn one() -> Level {
        Level::Zero.succ()
    }

    pub fn of_nat(n: usize) -> Level {
        let mut l = Level::Zero;
        for _ in 0..n {
            l = l.succ();
        }
        l
    }

    pub fn param(name: impl AsRef<str>) -> Level {
        Level::Param(Name::from_str(name.as_ref()))
    }

    pub fn succ(&self) -> Level {
        Level::Succ(Arc::new(self.clone()))
    }

    /// `max self other`.
    pub fn max_with(&self, other: &Level) -> Level {
        Level::Max(Arc::new(self.clone()), Arc::new(other.clone()))
    }

    pub fn imax(&self, other: &Level) -> Level {
        Level::IMax(Arc::new(self.clone()), Arc::new(other.clone()))
    }

    /// Splits `l+k` into `(l, k)`.
    pub fn to_offset(&self) -> (&Level, usize) {
        let mut l = self;
        let mut k = 0;
        while let Level::Succ(inner) = l {
            l = inner;
            k += 1;
        }
        (l, k)
    }

    pub fn is_never_zero(&self) -> bool {
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) => false,
            Level::Succ(_) => true,
            Level::Max(l1, l2) => l1.is_never_zero() || l2.is_never_zero(),
            Level::IMax(_, l2) => l2.is_never_zero(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.normalize() == Level::Zero
    }

    pub fn replace(&self, f: &impl Fn(&Level) -> Option<Level>) -> Level {
        if let Some(l) = f(self) {
            return l;
        }
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) => self.clone(),
            Level::Succ(l) => l.replace(f).succ(),
            Level::Max(l1, l2) => l1.replace(f).max_with(&l2.replace(f)),
            Level::IMax(l1, l2) => l1.replace(f).imax(&l2.replace(f)),
        }
    }

    pub fn instantiate_params(&self, params: &[Name], levels: &[Level]) -> Level {
        self.replace(&|l| match l {
            Level::Param(name) => zip(params, levels)
                .find(|(param, _)| *param == name)
                .map(|(_, level)| level.clone()),
            _ => None,
        })
    }

    pub fn any(&self, f: &impl Fn(&Level) -> bool) -> bool {
        if f(self) {
            return true;
        }
        match self {
            Level::Zero | Level::Param(_) | Level::Meta(_) => false,
            Level::Succ(l) => l.any(f),
            Level::Max(l1, l2) | Level::IMax(l1, l2) => l1.any(f) || l2.any(f),
        }
    }

    pub fn has_meta(&self) -> bool {
        self.any(&|l| matches!(l, Level::Meta(_)))
    }

    pub fn contains_meta(&self, id: Id) -> bool {
        self.any(&|l| *l == Level::Meta(id))
    }

    /// Rewrites the level into `max c (a₁+k₁) ⋯ (aₙ+kₙ)` with sorted atoms.
    pub fn normalize(&self) -> Level {
        let mut entries = vec![];
        self.collect_max_entries(0, &mut entries);
        let mut constant = 0;
        let mut atoms: Vec<(Level, usize)> = vec![];
        for (atom, k) in entries {
            if atom == Level::Zero {
                constant = constant.max(k);
            } else if let Some(entry) = atoms.iter_mut().find(|(a, _)| *a == atom) {
                entry.1 = entry.1.max(k);
            } else {
                atoms.push((atom, k));
            }
        }
        atoms.sort();
        let mut terms = vec![];
        if constant > 0 && atoms.iter().all(|(_, k)| *k < constant) {
            terms.push(Level::of_nat(constant));
        }
        for (atom, k) in atoms {
            let mut l = atom;
            for _ in 0..k {
                l = l.succ();
            }
            terms.push(l);
        }
        let mut terms = terms.into_iter();
        let Some(first) = terms.next() else {
            return Level::Zero;
        };
        terms.fold(first, |acc, l| acc.max_with(&l))
    }

    fn collect_max_entries(&self, k: usize, entries: &mut Vec<(Level, usize)>) {
        match self {
            Level::Zero => entries.push((Level::Zero, k)),
            Level::Succ(l) => l.collect_max_entries(k + 1, entries),
            Level::Max(l1, l2) => {
                l1.collect_max_entries(k, entries);
                l2.collect_max_entries(k, entries);
            }
            Level::IMax(l1, l2) => {
                let l2 = l2.normalize();
                if l2.is_never_zero() {
                    l1.collect_max_entries(k, entries);
                    l2.collect_max_entries(k, entries);
                } else if l2 == Level::Zero {
                    entries.push((Level::Zero, k));
                } else {
                    entries.push((l1.normalize().imax(&l2), k));
                }
            }
            Level::Param(_) | Level::Meta(_) => entries.push((self.clone(), k)),
        }
    }

    pub fn is_equiv(&self, other: &Level) -> bool {
        self == other || self.normalize() == other.normalize()
    }

    /// `self ≤ other` for every assignment of the parameters.
    pub fn is_leq(&self, other: &Level) -> bool {
        self.max_with(other).is_equiv(other)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermMetadata {
    pub is_closed: bool,
    pub bound: usize,
    pub has_hole: bool,
}

impl Default for TermMetadata {
    fn default() -> Self {
        TermMetadata {
            is_closed: true,
            bound: 0,
            has_hole: false,
        }
    }
}

impl TermMetadata {
    fn join(&self, other: &TermMetadata) -> TermMetadata {
        TermMetadata {
            is_closed: self.is_closed && other.is_closed,
            bound: self.bound.max(other.bound),
            has_hole: self.has_hole || other.has_hole,
        }
    }

    fn join_binder(&self, body: &TermMetadata) -> TermMetadata {
        TermMetadata {
            is_closed: self.is_closed && body.is_closed,
            bound: self.bound.max(body.bound.saturating_sub(1)),
            has_hole: self.has_hole || body.has_hole,
        }
    }
}

/// Locally nameless representation. See [Charguéraud, 2012].
/// Use syn's convention [https://docs.rs/syn/latest/syn/enum.Expr.html#syntax-tree-enums].
#[derive(Clone, Debug)]
pub enum Term {
    Var(Arc<TermVar>),
    Sort(Arc<TermSort>),
    Const(Arc<TermConst>),
    Ctor(Arc<TermCtor>),
    App(Arc<TermApp>),
    Abs(Arc<TermAbs>),
    Pi(Arc<TermPi>),
    Local(Arc<TermLocal>),
    Hole(Arc<TermHole>),
}

#[derive(Clone, Debug)]
pub struct TermVar {
    pub metadata: TermMetadata,
    pub index: usize,
}

#[derive(Clone, Debug)]
pub struct TermSort {
    pub metadata: TermMetadata,
    pub level: Level,
}

#[derive(Clone, Debug)]
pub struct TermConst {
    pub metadata: TermMetadata,
    pub name: Name,
    pub levels: Vec<Level>,
}

/// The `index`-th constructor of `inductive`. Arguments live in the surrounding application spine.
#[derive(Clone, Debug)]
pub struct TermCtor {
    pub metadata: TermMetadata,
    pub inductive: Name,
    pub index: usize,
    // for pretty-printing
    pub name: Name,
    pub levels: Vec<Level>,
}

#[derive(Clone, Debug)]
pub struct TermApp {
    pub metadata: TermMetadata,
    pub fun: Term,
    pub arg: Term,
}

#[derive(Clone, Debug)]
pub struct TermAbs {
    pub metadata: TermMetadata,
    // for pretty-printing
    pub binder_name: Name,
    pub binder_type: Term,
    pub body: Term,
}

#[derive(Clone, Debug)]
pub struct TermPi {
    pub metadata: TermMetadata,
    pub binder_name: Name,
    pub binder_type: Term,
    pub body: Term,
    pub implicit: bool,
}

#[derive(Clone, Debug)]
pub struct TermLocal {
    pub metadata: TermMetadata,
    pub id: Id,
}

/// A metavariable. `ty` is its type in `local_env`; occurrences are applied to the
/// locals of `local_env`, and assignments are stored as `λ local_env, m`.
#[derive(Clone, Debug)]
pub struct TermHole {
    pub metadata: TermMetadata,
    pub id: Id,
    pub ty: Term,
    pub local_env: Arc<LocalEnv>,
    /// Set for holes that were explicitly postponed with `sorry`.
    pub deferred: bool,
}

impl Default for Term {
    fn default() -> Self {
        mk_sort(Level::Zero)
    }
}

pub fn mk_var(index: usize) -> Term {
    let metadata = TermMetadata {
        is_closed: true,
        bound: index + 1,
        has_hole: false,
    };
    Term::Var(Arc::new(TermVar { metadata, index }))
}

pub fn mk_sort(level: Level) -> Term {
    Term::Sort(Arc::new(TermSort {
        metadata: TermMetadata::default(),
        level,
    }))
}

pub fn mk_prop() -> Term {
    mk_sort(Level::Zero)
}

pub fn mk_type() -> Term {
    mk_sort(Level::one())
}

pub fn mk_const(name: Name, levels: Vec<Level>) -> Term {
    Term::Const(Arc::new(TermConst {
        metadata: TermMetadata::default(),
        name,
        levels,
    }))
}

pub fn mk_ctor(inductive: Name, index: usize, name: Name, levels: Vec<Level>) -> Term {
    Term::Ctor(Arc::new(TermCtor {
        metadata: TermMetadata::default(),
        inductive,
        index,
        name,
        levels,
    }))
}

pub fn mk_app(fun: Term, arg: Term) -> Term {
    let metadata = fun.metadata().join(arg.metadata());
    Term::App(Arc::new(TermApp { metadata, fun, arg }))
}

pub fn mk_abs(binder_name: Name, binder_type: Term, body: Term) -> Term {
    let metadata = binder_type.metadata().join_binder(body.metadata());
    Term::Abs(Arc::new(TermAbs {
        metadata,
        binder_name,
        binder_type,
        body,
    }))
}

pub fn mk_pi(binder_name: Name, binder_type: Term, body: Term, implicit: bool) -> Term {
    let metadata = binder_type.metadata().join_binder(body.metadata());
    Term::Pi(Arc::new(TermPi {
        metadata,
        binder_name,
        binder_type,
        body,
        implicit,
    }))
}

/// `dom → cod`; `cod` must not refer to the new binder.
pub fn mk_arrow(dom: Term, cod: Term) -> Term {
    mk_pi(Name::from_str("_"), dom, cod, false)
}

pub fn mk_local(id: Id) -> Term {
    let metadata = TermMetadata {
        is_closed: false,
        bound: 0,
        has_hole: false,
    };
    Term::Local(Arc::new(TermLocal { metadata, id }))
}

pub fn mk_hole(id: Id, ty: Term, local_env: Arc<LocalEnv>, deferred: bool) -> Term {
    let metadata = TermMetadata {
        is_closed: true,
        bound: 0,
        has_hole: true,
    };
    Term::Hole(Arc::new(TermHole {
        metadata,
        id,
        ty,
        local_env,
        deferred,
    }))
}

#[derive(Debug, Clone)]
pub struct Local {
    pub id: Id,
    pub name: Name,
    pub ty: Term,
}

impl Local {
    pub fn fresh(name: Name, ty: Term) -> Local {
        Local {
            id: Id::fresh_with_name(name.clone()),
            name,
            ty,
        }
    }

    pub fn term(&self) -> Term {
        mk_local(self.id)
    }
}

#[derive(Debug, Default, Clone)]
pub struct LocalEnv {
    pub locals: Vec<Local>,
}

impl LocalEnv {
    pub fn new(locals: Vec<Local>) -> LocalEnv {
        LocalEnv { locals }
    }

    pub fn get(&self, id: Id) -> Option<&Local> {
        self.locals.iter().rev().find(|local| local.id == id)
    }

    /// Later bindings shadow earlier ones.
    pub fn find(&self, name: &Name) -> Option<&Local> {
        self.locals.iter().rev().find(|local| local.name == *name)
    }

    pub fn position(&self, id: Id) -> Option<usize> {
        self.locals.iter().position(|local| local.id == id)
    }

    /// Pushes `local`; an older hypothesis with the same name becomes inaccessible.
    pub fn push(&mut self, local: Local) {
        if local.name.as_str() != "_" {
            let taken = self
                .locals
                .iter()
                .map(|l| l.name.clone())
                .collect::<Vec<_>>();
            if let Some(old) = self.locals.iter_mut().rev().find(|l| l.name == local.name) {
                let mut renamed = old.name.inaccessible();
                while taken.contains(&renamed) {
                    renamed = renamed.inaccessible();
                }
                old.name = renamed;
            }
        }
        self.locals.push(local);
    }

    pub fn extended(&self, locals: impl IntoIterator<Item = Local>) -> LocalEnv {
        let mut local_env = self.clone();
        for local in locals {
            local_env.push(local);
        }
        local_env
    }

    pub fn ids(&self) -> Vec<Id> {
        self.locals.iter().map(|local| local.id).collect()
    }

    pub fn terms(&self) -> Vec<Term> {
        self.locals.iter().map(Local::term).collect()
    }

    pub fn len(&self) -> usize {
        self.locals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locals.is_empty()
    }
}

impl Term {
    #[inline]
    pub fn metadata(&self) -> &TermMetadata {
        match self {
            Term::Var(inner) => &inner.metadata,
            Term::Sort(inner) => &inner.metadata,
            Term::Const(inner) => &inner.metadata,
            Term::Ctor(inner) => &inner.metadata,
            Term::App(inner) => &inner.metadata,
            Term::Abs(inner) => &inner.metadata,
            Term::Pi(inner) => &inner.metadata,
            Term::Local(inner) => &inner.metadata,
            Term::Hole(inner) => &inner.metadata,
        }
    }

    fn ptr_eq(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Var(a), Term::Var(b)) => Arc::ptr_eq(a, b),
            (Term::Sort(a), Term::Sort(b)) => Arc::ptr_eq(a, b),
            (Term::Const(a), Term::Const(b)) => Arc::ptr_eq(a, b),
            (Term::Ctor(a), Term::Ctor(b)) => Arc::ptr_eq(a, b),
            (Term::App(a), Term::App(b)) => Arc::ptr_eq(a, b),
            (Term::Abs(a), Term::Abs(b)) => Arc::ptr_eq(a, b),
            (Term::Pi(a), Term::Pi(b)) => Arc::ptr_eq(a, b),
            (Term::Local(a), Term::Local(b)) => Arc::ptr_eq(a, b),
            (Term::Hole(a), Term::Hole(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Rebuilds the node from its rewritten children. `f` receives each child
    /// and the number of binders crossed to reach it.
    fn map_children(&self, f: &mut impl FnMut(&Term, usize) -> Term) -> Term {
        match self {
            Term::Var(_)
            | Term::Sort(_)
            | Term::Const(_)
            | Term::Ctor(_)
            | Term::Local(_)
            | Term::Hole(_) => self.clone(),
            Term::App(inner) => {
                let fun = f(&inner.fun, 0);
                let arg = f(&inner.arg, 0);
                if inner.fun.ptr_eq(&fun) && inner.arg.ptr_eq(&arg) {
                    self.clone()
                } else {
                    mk_app(fun, arg)
                }
            }
            Term::Abs(inner) => {
                let binder_type = f(&inner.binder_type, 0);
                let body = f(&inner.body, 1);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_abs(inner.binder_name.clone(), binder_type, body)
                }
            }
            Term::Pi(inner) => {
                let binder_type = f(&inner.binder_type, 0);
                let body = f(&inner.body, 1);
                if inner.binder_type.ptr_eq(&binder_type) && inner.body.ptr_eq(&body) {
                    self.clone()
                } else {
                    mk_pi(
                        inner.binder_name.clone(),
                        binder_type,
                        body,
                        inner.implicit,
                    )
                }
            }
        }
    }

    /// self.open([x, y], k) == [x/k+1,y/k]self
    ///
    /// Loose variables of `xs` are shifted when they are substituted under binders,
    /// and variables past the opened ones drop by `xs.len()`.
    pub fn open(&self, xs: &[Term], level: usize) -> Term {
        if self.metadata().bound <= level {
            return self.clone();
        }
        match self {
            Term::Var(inner) => {
                if inner.index >= level {
                    let i = inner.index - level;
                    if i < xs.len() {
                        return xs[xs.len() - i - 1].lift(level, 0);
                    }
                    return mk_var(inner.index - xs.len());
                }
                self.clone()
            }
            _ => self.map_children(&mut |m, k| m.open(xs, level + k)),
        }
    }

    /// Shifts loose variables at or above `cutoff` by `k`.
    pub fn lift(&self, k: usize, cutoff: usize) -> Term {
        if k == 0 || self.metadata().bound <= cutoff {
            return self.clone();
        }
        match self {
            Term::Var(inner) => mk_var(inner.index + k),
            _ => self.map_children(&mut |m, shift| m.lift(k, cutoff + shift)),
        }
    }

    /// self.close([x, y], k) == [k+1/x, k/y]self
    pub fn close(&self, xs: &[Id], level: usize) -> Term {
        if self.metadata().is_closed {
            return self.clone();
        }
        match self {
            Term::Local(inner) => {
                let id = inner.id;
                for (i, &x) in xs.iter().rev().enumerate() {
                    if id == x {
                        return mk_var(level + i);
                    }
                }
                self.clone()
            }
            _ => self.map_children(&mut |m, k| m.close(xs, level + k)),
        }
    }

    pub fn replace_local(&self, f: &impl Fn(Id) -> Option<Term>) -> Term {
        if self.metadata().is_closed {
            return self.clone();
        }
        match self {
            Term::Local(inner) => f(inner.id).unwrap_or_else(|| self.clone()),
            _ => self.map_children(&mut |m, _| m.replace_local(f)),
        }
    }

    pub fn subst(&self, subst: &[(Id, Term)]) -> Term {
        self.replace_local(&|x| {
            for (y, m) in subst {
                if *y == x {
                    return Some(m.clone());
                }
            }
            None
        })
    }

    /// Replaces holes by `f`, beta-reducing the spine an assigned hole is applied to.
    pub fn replace_hole(&self, f: &impl Fn(&TermHole) -> Option<Term>) -> Term {
        if !self.metadata().has_hole {
            return self.clone();
        }
        match self {
            Term::Hole(inner) => match f(inner) {
                Some(m) => m.replace_hole(f),
                None => self.clone(),
            },
            Term::App(_) => {
                if let Term::Hole(inner) = self.head() {
                    if let Some(m) = f(inner) {
                        let m = m.replace_hole(f);
                        let args = self
                            .args()
                            .into_iter()
                            .map(|arg| arg.replace_hole(f))
                            .collect::<Vec<_>>();
                        return m.beta(&args);
                    }
                }
                self.map_children(&mut |m, _| m.replace_hole(f))
            }
            _ => self.map_children(&mut |m, _| m.replace_hole(f)),
        }
    }

    pub fn replace_level(&self, f: &impl Fn(&Level) -> Level) -> Term {
        match self {
            Term::Sort(inner) => mk_sort(f(&inner.level)),
            Term::Const(inner) => mk_const(
                inner.name.clone(),
                inner.levels.iter().map(f).collect(),
            ),
            Term::Ctor(inner) => mk_ctor(
                inner.inductive.clone(),
                inner.index,
                inner.name.clone(),
                inner.levels.iter().map(f).collect(),
            ),
            _ => self.map_children(&mut |m, _| m.replace_level(f)),
        }
    }

    pub fn instantiate_level_params(&self, params: &[Name], levels: &[Level]) -> Term {
        if params.is_empty() {
            return self.clone();
        }
        self.replace_level(&|l| l.instantiate_params(params, levels))
    }

    pub fn any_level(&self, f: &impl Fn(&Level) -> bool) -> bool {
        match self {
            Term::Var(_) | Term::Local(_) | Term::Hole(_) => false,
            Term::Sort(inner) => f(&inner.level),
            Term::Const(inner) => inner.levels.iter().any(f),
            Term::Ctor(inner) => inner.levels.iter().any(f),
            Term::App(inner) => inner.fun.any_level(f) || inner.arg.any_level(f),
            Term::Abs(inner) => inner.binder_type.any_level(f) || inner.body.any_level(f),
            Term::Pi(inner) => inner.binder_type.any_level(f) || inner.body.any_level(f),
        }
    }

    pub fn has_level_meta(&self) -> bool {
        self.any_level(&Level::has_meta)
    }

    /// Head beta reduction of `self args`.
    pub fn beta(&self, args: &[Term]) -> Term {
        let mut m = self.clone();
        let mut i = 0;
        while i < args.len() {
            let Term::Abs(inner) = &m else {
                break;
            };
            let body = inner.body.open(&args[i..i + 1], 0);
            m = body;
            i += 1;
        }
        m.apply(args[i..].iter().cloned())
    }

    /// FV(self) ⊆ {x₁, ⋯, xₙ}
    /// The term is borrowed from nominal set theory.
    pub fn is_supported_by(&self, free_list: &[Id]) -> bool {
        if self.metadata().is_closed {
            return true;
        }
        match self {
            Term::Local(inner) => free_list.contains(&inner.id),
            Term::App(inner) => {
                inner.fun.is_supported_by(free_list) && inner.arg.is_supported_by(free_list)
            }
            Term::Abs(inner) => {
                inner.binder_type.is_supported_by(free_list)
                    && inner.body.is_supported_by(free_list)
            }
            Term::Pi(inner) => {
                inner.binder_type.is_supported_by(free_list)
                    && inner.body.is_supported_by(free_list)
            }
            _ => true,
        }
    }

    pub fn contains_local(&self, id: Id) -> bool {
        if self.metadata().is_closed {
            return false;
        }
        match self {
            Term::Local(inner) => inner.id == id,
            Term::App(inner) => inner.fun.contains_local(id) || inner.arg.contains_local(id),
            Term::Abs(inner) => {
                inner.binder_type.contains_local(id) || inner.body.contains_local(id)
            }
            Term::Pi(inner) => inner.binder_type.contains_local(id) || inner.body.contains_local(id),
            _ => false,
        }
    }

    pub fn contains_var(&self, i: usize) -> bool {
        if self.metadata().bound <= i {
            return false;
        }
        match self {
            Term::Var(inner) => i == inner.index,
            Term::App(inner) => inner.fun.contains_var(i) || inner.arg.contains_var(i),
            Term::Abs(inner) => inner.binder_type.contains_var(i) || inner.body.contains_var(i + 1),
            Term::Pi(inner) => inner.binder_type.contains_var(i) || inner.body.contains_var(i + 1),
            _ => false,
        }
    }

    pub fn contains_const(&self, name: &Name) -> bool {
        match self {
            Term::Const(inner) => inner.name == *name,
            Term::Ctor(inner) => inner.inductive == *name,
            Term::App(inner) => inner.fun.contains_const(name) || inner.arg.contains_const(name),
            Term::Abs(inner) => {
                inner.binder_type.contains_const(name) || inner.body.contains_const(name)
            }
            Term::Pi(inner) => {
                inner.binder_type.contains_const(name) || inner.body.contains_const(name)
            }
            _ => false,
        }
    }

    pub fn contains_hole(&self, id: Id) -> bool {
        if !self.metadata().has_hole {
            return false;
        }
        match self {
            Term::Hole(inner) => inner.id == id,
            Term::App(inner) => inner.fun.contains_hole(id) || inner.arg.contains_hole(id),
            Term::Abs(inner) => inner.binder_type.contains_hole(id) || inner.body.contains_hole(id),
            Term::Pi(inner) => inner.binder_type.contains_hole(id) || inner.body.contains_hole(id),
            _ => false,
        }
    }

    /// Holes in pre-order, each reported once.
    pub fn holes(&self) -> Vec<Arc<TermHole>> {
        let mut holes = vec![];
        self.collect_holes(&mut holes);
        holes
    }

    fn collect_holes(&self, holes: &mut Vec<Arc<TermHole>>) {
        if !self.metadata().has_hole {
            return;
        }
        match self {
            Term::Hole(inner) => {
                if holes.iter().all(|h| h.id != inner.id) {
                    holes.push(inner.clone());
                }
            }
            Term::App(inner) => {
                inner.fun.collect_holes(holes);
                inner.arg.collect_holes(holes);
            }
            Term::Abs(inner) => {
                inner.binder_type.collect_holes(holes);
                inner.body.collect_holes(holes);
            }
            Term::Pi(inner) => {
                inner.binder_type.collect_holes(holes);
                inner.body.collect_holes(holes);
            }
            _ => {}
        }
    }

    pub fn head(&self) -> &Term {
        let mut m = self;
        while let Term::App(inner) = m {
            m = &inner.fun;
        }
        m
    }

    pub fn args(&self) -> Vec<&Term> {
        let mut m = self;
        let mut args = vec![];
        while let Term::App(inner) = m {
            m = &inner.fun;
            args.push(&inner.arg);
        }
        args.reverse();
        args
    }

    /// Owned version of `(head, args)`.
    pub fn unapply(&self) -> (Term, Vec<Term>) {
        (
            self.head().clone(),
            self.args().into_iter().cloned().collect(),
        )
    }

    /// Returns the application `self l₁ ⋯ lₙ`.
    pub fn apply(&self, args: impl IntoIterator<Item = Term>) -> Term {
        let mut fun = self.clone();
        for arg in args {
            fun = mk_app(fun, arg);
        }
        fun
    }

    /// Returns the abstraction `λ xs, self`.
    pub fn abs(&self, xs: &[Local]) -> Term {
        let ids = xs.iter().map(|x| x.id).collect::<Vec<_>>();
        let mut m = self.close(&ids, 0);
        for (i, x) in xs.iter().enumerate().rev() {
            m = mk_abs(x.name.clone(), x.ty.close(&ids[..i], 0), m);
        }
        m
    }

    /// Returns the product `Π xs, self` with explicit binders.
    pub fn pi(&self, xs: &[Local]) -> Term {
        let ids = xs.iter().map(|x| x.id).collect::<Vec<_>>();
        let mut m = self.close(&ids, 0);
        for (i, x) in xs.iter().enumerate().rev() {
            m = mk_pi(x.name.clone(), x.ty.close(&ids[..i], 0), m, false);
        }
        m
    }

    /// Replaces occurrences of `pattern` by a variable bound just outside `self`.
    /// Only the `occurrence`-th match (1-based) is replaced when given.
    /// Returns None when nothing was replaced.
    pub fn abstract_occurrences(&self, pattern: &Term, occurrence: Option<usize>) -> Option<Term> {
        let mut seen = 0;
        let mut replaced = 0;
        let body = self.abstract_at(pattern, 0, occurrence, &mut seen, &mut replaced);
        (replaced > 0).then_some(body)
    }

    fn abstract_at(
        &self,
        pattern: &Term,
        depth: usize,
        occurrence: Option<usize>,
        seen: &mut usize,
        replaced: &mut usize,
    ) -> Term {
        if self.alpha_eq(pattern) {
            *seen += 1;
            if occurrence.map_or(true, |k| k == *seen) {
                *replaced += 1;
                return mk_var(depth);
            }
            return self.lift(1, depth);
        }
        match self {
            Term::Var(inner) if inner.index >= depth => mk_var(inner.index + 1),
            _ => self.map_children(&mut |m, k| {
                m.abstract_at(pattern, depth + k, occurrence, seen, replaced)
            }),
        }
    }

    /// Subterms without loose bound variables, in pre-order.
    pub fn closed_subterms(&self) -> Vec<Term> {
        let mut subterms = vec![];
        self.collect_closed_subterms(&mut subterms);
        subterms
    }

    fn collect_closed_subterms(&self, subterms: &mut Vec<Term>) {
        if self.metadata().bound == 0 {
            subterms.push(self.clone());
        }
        match self {
            Term::App(inner) => {
                inner.fun.collect_closed_subterms(subterms);
                inner.arg.collect_closed_subterms(subterms);
            }
            Term::Abs(inner) => {
                inner.binder_type.collect_closed_subterms(subterms);
                inner.body.collect_closed_subterms(subterms);
            }
            Term::Pi(inner) => {
                inner.binder_type.collect_closed_subterms(subterms);
                inner.body.collect_closed_subterms(subterms);
            }
            _ => {}
        }
    }

    pub fn is_hole(&self) -> bool {
        matches!(self, Term::Hole(_))
    }

    /// Checks if self ≡ (?M l₁ ⋯ lₙ) where l₁ ⋯ lₙ are pairwise distinct locals.
    pub fn is_pattern(&self) -> Option<(Arc<TermHole>, Vec<Id>)> {
        let Term::Hole(hole) = self.head() else {
            return None;
        };
        let mut arg_locals: Vec<Id> = vec![];
        for arg in self.args() {
            let Term::Local(arg) = arg else {
                return None;
            };
            if arg_locals.contains(&arg.id) {
                return None;
            }
            arg_locals.push(arg.id);
        }
        Some((hole.clone(), arg_locals))
    }

    /// Syntactic equality up to binder names. Levels are compared structurally.
    pub fn alpha_eq(&self, other: &Term) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self, other) {
            (Term::Var(inner1), Term::Var(inner2)) => inner1.index == inner2.index,
            (Term::Sort(inner1), Term::Sort(inner2)) => inner1.level == inner2.level,
            (Term::Const(inner1), Term::Const(inner2)) => {
                inner1.name == inner2.name && inner1.levels == inner2.levels
            }
            (Term::Ctor(inner1), Term::Ctor(inner2)) => {
                inner1.inductive == inner2.inductive
                    && inner1.index == inner2.index
                    && inner1.levels == inner2.levels
            }
            (Term::App(inner1), Term::App(inner2)) => {
                inner1.fun.alpha_eq(&inner2.fun) && inner1.arg.alpha_eq(&inner2.arg)
            }
            (Term::Abs(inner1), Term::Abs(inner2)) => {
                inner1.binder_type.alpha_eq(&inner2.binder_type)
                    && inner1.body.alpha_eq(&inner2.body)
            }
            (Term::Pi(inner1), Term::Pi(inner2)) => {
                inner1.binder_type.alpha_eq(&inner2.binder_type)
                    && inner1.body.alpha_eq(&inner2.body)
            }
            (Term::Local(inner1), Term::Local(inner2)) => inner1.id == inner2.id,
            (Term::Hole(inner1), Term::Hole(inner2)) => inner1.id == inner2.id,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nat() -> Term {
        mk_const(Name::from_str("Nat"), vec![])
    }

    #[test]
    fn names_are_interned() {
        let a = Name::from_str("Nat.succ");
        let b = Name::from_str("Nat.succ");
        assert_eq!(a, b);
        assert_eq!(a.last_component(), "succ");
        assert_eq!(Name::from_str("Nat").extend("rec"), Name::from_str("Nat.rec"));
    }

    #[test]
    fn ident_validation() {
        assert!(Name::from_str("pow_succ'").is_valid_ident());
        assert!(Name::from_str("List.append").is_valid_ident());
        assert!(!Name::from_str("1abc").is_valid_ident());
        assert!(!Name::from_str("a..b").is_valid_ident());
        assert!(!Name::from_str("").is_valid_ident());
    }

    #[test]
    fn level_normalization() {
        let u = Level::param("u");
        let v = Level::param("v");
        assert_eq!(u.max_with(&u).normalize(), u);
        assert!(u.max_with(&v).is_equiv(&v.max_with(&u)));
        assert!(u.succ().max_with(&Level::one()).is_equiv(&u.succ()));
        assert!(Level::one().imax(&Level::Zero).is_zero());
        assert!(u.imax(&v.succ()).is_equiv(&u.max_with(&v.succ())));
        assert!(!u.imax(&v).is_equiv(&u.max_with(&v)));
        assert!(u.is_leq(&u.max_with(&v)));
        assert!(!u.succ().is_leq(&u));
        assert_eq!(Level::of_nat(2).to_string(), "2");
        assert_eq!(u.succ().to_string(), "u+1");
    }

    #[test]
    fn open_close_roundtrip() {
        let x = Local::fresh(Name::from_str("x"), nat());
        let m = mk_app(mk_const(Name::from_str("f"), vec![]), x.term());
        let body = m.close(&[x.id], 0);
        assert_eq!(body.metadata().bound, 1);
        assert!(body.open(&[x.term()], 0).alpha_eq(&m));
    }

    #[test]
    fn open_lifts_under_binders() {
        // (λ y, #1 #0) opened with #0 must keep #0 pointing past the inner binder.
        let body = mk_abs(
            Name::from_str("y"),
            nat(),
            mk_app(mk_var(1), mk_var(0)),
        );
        let opened = body.open(&[mk_var(0)], 0);
        let expected = mk_abs(Name::from_str("y"), nat(), mk_app(mk_var(1), mk_var(0)));
        assert!(opened.alpha_eq(&expected));
    }

    #[test]
    fn beta_with_loose_arguments() {
        // (λ x y, x) #1 #0 ~> #1
        let k = mk_abs(
            Name::from_str("x"),
            nat(),
            mk_abs(Name::from_str("y"), nat(), mk_var(1)),
        );
        let reduced = k.beta(&[mk_var(1), mk_var(0)]);
        assert!(reduced.alpha_eq(&mk_var(1)));

        // Variables past the opened binder drop by one.
        let body = mk_app(mk_var(0), mk_var(3));
        assert!(body.open(&[nat()], 0).alpha_eq(&mk_app(nat(), mk_var(2))));
    }

    #[test]
    fn abs_closes_dependent_binder_types() {
        let a = Local::fresh(Name::from_str("α"), mk_type());
        let x = Local::fresh(Name::from_str("x"), a.term());
        let m = x.term().abs(&[a.clone(), x.clone()]);
        let Term::Abs(outer) = &m else { panic!() };
        let Term::Abs(inner) = &outer.body else { panic!() };
        assert!(inner.binder_type.alpha_eq(&mk_var(0)));
        assert!(inner.body.alpha_eq(&mk_var(0)));
        assert!(m.metadata().is_closed);
    }

    #[test]
    fn beta_reduces_assigned_spines() {
        let id = Id::fresh();
        let x = Local::fresh(Name::from_str("x"), nat());
        let local_env = Arc::new(LocalEnv::new(vec![x.clone()]));
        let hole = mk_hole(id, nat(), local_env, false).apply([x.term()]);
        let succ = mk_ctor(Name::from_str("Nat"), 1, Name::from_str("Nat.succ"), vec![]);
        let assignment = mk_app(succ.clone(), x.term()).abs(&[x.clone()]);
        let y = Local::fresh(Name::from_str("y"), nat());
        let m = hole.subst(&[(x.id, y.term())]);
        let m = m.replace_hole(&|h| (h.id == id).then(|| assignment.clone()));
        assert!(m.alpha_eq(&mk_app(succ, y.term())));
    }

    #[test]
    fn abstract_selected_occurrence() {
        let a = mk_const(Name::from_str("a"), vec![]);
        let f = mk_const(Name::from_str("f"), vec![]);
        let m = f.apply([a.clone(), a.clone()]);
        let all = m.abstract_occurrences(&a, None).unwrap();
        assert!(all.alpha_eq(&f.apply([mk_var(0), mk_var(0)])));
        let second = m.abstract_occurrences(&a, Some(2)).unwrap();
        assert!(second.alpha_eq(&f.apply([a.clone(), mk_var(0)])));
        assert!(m.abstract_occurrences(&f.apply([a.clone()]), None).is_some());
        assert!(m.abstract_occurrences(&nat(), None).is_none());
    }

    #[test]
    fn shadowed_hypotheses_become_inaccessible() {
        let mut local_env = LocalEnv::default();
        let h1 = Local::fresh(Name::from_str("h"), nat());
        let h2 = Local::fresh(Name::from_str("h"), nat());
        local_env.push(h1.clone());
        local_env.push(h2.clone());
        assert_eq!(local_env.find(&Name::from_str("h")).unwrap().id, h2.id);
        assert_eq!(local_env.get(h1.id).unwrap().name.as_str(), "h✝");
    }
}
