use std::sync::Arc;

use crate::tt::{mk_hole, Id, Level, LocalEnv, Term, TermHole};

/// An open proof obligation: a hole together with its context and target.
#[derive(Debug, Clone)]
pub struct Goal {
    pub id: Id,
    pub local_env: LocalEnv,
    pub target: Term,
}

impl Goal {
    pub fn new(local_env: LocalEnv, target: Term) -> Goal {
        Goal {
            id: Id::fresh(),
            local_env,
            target,
        }
    }

    fn hole_with(&self, deferred: bool) -> Term {
        mk_hole(
            self.id,
            self.target.clone(),
            Arc::new(self.local_env.clone()),
            deferred,
        )
        .apply(self.local_env.terms())
    }

    /// The occurrence `?id Γ` of this goal in its own context.
    pub fn hole(&self) -> Term {
        self.hole_with(false)
    }

    pub(crate) fn from_hole(hole: &TermHole, target: Term) -> Goal {
        Goal {
            id: hole.id,
            local_env: hole.local_env.as_ref().clone(),
            target,
        }
    }
}

/// Assignments of holes and universe metavariables.
///
/// Backed by persistent maps so that a tactic can snapshot the context and roll back.
#[derive(Debug, Clone, Default)]
pub struct MetaCtx {
    assignments: im::HashMap<Id, Term>,
    level_assignments: im::HashMap<Id, Level>,
    /// Holes of class type waiting for instance resolution.
    pending_instances: im::Vector<Goal>,
}

impl MetaCtx {
    pub fn new_hole(&mut self, local_env: &LocalEnv, ty: Term) -> Term {
        Goal::new(local_env.clone(), ty).hole()
    }

    /// A hole postponed with `sorry`; it never becomes a goal again.
    pub fn new_deferred(&mut self, local_env: &LocalEnv, ty: Term) -> Term {
        Goal::new(local_env.clone(), ty).hole_with(true)
    }

    pub fn new_instance_hole(&mut self, local_env: &LocalEnv, ty: Term) -> Term {
        let goal = Goal::new(local_env.clone(), ty);
        let hole = goal.hole();
        self.pending_instances.push_back(goal);
        hole
    }

    pub fn new_level(&mut self) -> Level {
        Level::Meta(Id::fresh())
    }

    pub fn is_assigned(&self, id: Id) -> bool {
        self.assignments.contains_key(&id)
    }

    /// `value` must already be abstracted over the hole's context.
    pub fn assign(&mut self, id: Id, value: Term) {
        self.assignments.insert(id, value);
    }

    /// Solves `goal` with `m`, a term in the goal's context.
    pub fn assign_goal(&mut self, goal: &Goal, m: Term) {
        self.assign(goal.id, m.abs(&goal.local_env.locals));
    }

    pub fn assign_level(&mut self, id: Id, level: Level) {
        self.level_assignments.insert(id, level);
    }

    pub fn is_level_assigned(&self, id: Id) -> bool {
        self.level_assignments.contains_key(&id)
    }

    pub fn instantiate_level(&self, level: &Level) -> Level {
        if !level.has_meta() {
            return level.clone();
        }
        level.replace(&|l| match l {
            Level::Meta(id) => self
                .level_assignments
                .get(id)
                .map(|l| self.instantiate_level(l)),
            _ => None,
        })
    }

    /// Substitutes every assigned hole and universe metavariable.
    pub fn instantiate(&self, m: &Term) -> Term {
        let m = if self.assignments.is_empty() {
            m.clone()
        } else {
            m.replace_hole(&|hole| self.assignments.get(&hole.id).cloned())
        };
        if self.level_assignments.is_empty() || !m.has_level_meta() {
            return m;
        }
        m.replace_level(&|l| self.instantiate_level(l))
    }

    pub fn pending_instances(&self) -> Vec<Goal> {
        self.pending_instances.iter().cloned().collect()
    }

    pub(crate) fn set_pending_instances(&mut self, goals: Vec<Goal>) {
        self.pending_instances = goals.into_iter().collect();
    }

    /// Unassigned, non-deferred holes of `m` as goals, in order of occurrence.
    pub fn open_goals(&self, m: &Term) -> Vec<Goal> {
        self.instantiate(m)
            .holes()
            .into_iter()
            .filter(|hole| !hole.deferred && !self.is_assigned(hole.id))
            .map(|hole| {
                let target = self.instantiate(&hole.ty);
                Goal::from_hole(&hole, target)
            })
            .collect()
    }

    /// Deferred holes of `m` as goals, in order of occurrence.
    pub fn deferred_goals(&self, m: &Term) -> Vec<Goal> {
        self.instantiate(m)
            .holes()
            .into_iter()
            .filter(|hole| hole.deferred)
            .map(|hole| {
                let target = self.instantiate(&hole.ty);
                Goal::from_hole(&hole, target)
            })
            .collect()
    }
}

/// Goals still to be proved, the metavariable context, and the root hole the
/// eventual proof term is read from.
#[derive(Debug, Clone)]
pub struct ProofState {
    pub goals: Vec<Goal>,
    pub mctx: MetaCtx,
    root: Goal,
}

impl ProofState {
    pub fn new(local_env: LocalEnv, target: Term) -> ProofState {
        ProofState::with_mctx(Goal::new(local_env, target), MetaCtx::default())
    }

    pub(crate) fn with_mctx(root: Goal, mctx: MetaCtx) -> ProofState {
        ProofState {
            goals: vec![root.clone()],
            mctx,
            root,
        }
    }

    pub fn root(&self) -> &Goal {
        &self.root
    }

    pub fn is_done(&self) -> bool {
        self.goals.is_empty()
    }

    /// Replaces the goal list, keeping the root and the metavariable context.
    pub fn with_goals(&self, goals: Vec<Goal>) -> ProofState {
        ProofState {
            goals,
            mctx: self.mctx.clone(),
            root: self.root.clone(),
        }
    }

    /// Drops goals that were solved as a side effect of unification.
    pub(crate) fn prune(mut self) -> ProofState {
        let mctx = &self.mctx;
        self.goals.retain(|goal| !mctx.is_assigned(goal.id));
        self
    }

    /// The proof term built so far, with remaining goals left as holes.
    pub fn proof(&self) -> Term {
        self.mctx.instantiate(&self.root.hole())
    }

    /// Ids of the open goals; equal fingerprints mean a tactic made no progress.
    pub(crate) fn fingerprint(&self) -> Vec<Id> {
        self.goals.iter().map(|goal| goal.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tt::{mk_const, mk_prop, Local, Name};

    #[test]
    fn assignment_is_visible_through_instantiate() {
        let p = mk_const(Name::from_str("P"), vec![]);
        let h = Local::fresh(Name::from_str("h"), p.clone());
        let local_env = LocalEnv::new(vec![h.clone()]);
        let mut state = ProofState::new(local_env, p);
        let goal = state.goals[0].clone();
        assert_eq!(state.mctx.open_goals(&state.proof()).len(), 1);
        state.mctx.assign_goal(&goal, h.term());
        let state = state.prune();
        assert!(state.is_done());
        assert!(state.proof().alpha_eq(&h.term()));
    }

    #[test]
    fn deferred_holes_are_not_goals() {
        let mut mctx = MetaCtx::default();
        let m = mctx.new_deferred(&LocalEnv::default(), mk_prop());
        assert!(mctx.open_goals(&m).is_empty());
        assert_eq!(mctx.deferred_goals(&m).len(), 1);
    }

    #[test]
    fn level_metas_chain() {
        let mut mctx = MetaCtx::default();
        let u = mctx.new_level();
        let v = mctx.new_level();
        let Level::Meta(u_id) = u else { panic!() };
        let Level::Meta(v_id) = v.clone() else { panic!() };
        mctx.assign_level(u_id, v.succ());
        mctx.assign_level(v_id, Level::Zero);
        assert!(mctx.instantiate_level(&u).is_equiv(&Level::one()));
    }
}
