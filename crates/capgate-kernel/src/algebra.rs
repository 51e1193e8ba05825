//! Capability algebra – implication and composition.
//!
//! Every capability type declares a fixed table of *direct* implications over
//! its operations (`admin ⇒ [read, write, delete]`, `write ⇒ [read]`).  The
//! table is assembled once at startup with [`ImplicationTable::builder`],
//! cycle-checked, and its transitive closure is precomputed so that
//! [`CapabilityAlgebra::implies`] is a pair of hash lookups at dispatch time.
//!
//! # Example
//!
//! ```
//! use capgate_kernel::algebra::{CapabilityAlgebra, ImplicationTable};
//! use capgate_types::{FileCap, FileOp};
//!
//! let table = ImplicationTable::builder()
//!     .grant(FileOp::Admin, [FileOp::Read, FileOp::Write, FileOp::Delete])
//!     .grant(FileOp::Write, [FileOp::Read])
//!     .build()
//!     .unwrap();
//! let algebra = CapabilityAlgebra::new(table);
//!
//! assert!(algebra.implies(&FileCap::write("/x"), &FileCap::read("/x")));
//! assert!(!algebra.implies(&FileCap::write("/x"), &FileCap::delete("/x")));
//! assert!(!algebra.implies(&FileCap::write("/x"), &FileCap::read("/y")));
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use capgate_types::{Capability, FileCap, FileOp, GateError};
use thiserror::Error;

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Raised by [`ImplicationTableBuilder::build`] when the declared
/// implications loop back on themselves.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("implication table contains a cycle: {path:?}")]
pub struct ImplicationCycle<Op: fmt::Debug> {
    /// The operations on the cycle, first element repeated at the end.
    pub path: Vec<Op>,
}

impl<Op: fmt::Debug, C> From<ImplicationCycle<Op>> for GateError<C> {
    fn from(cycle: ImplicationCycle<Op>) -> Self {
        GateError::Configuration(cycle.to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ImplicationTable
// ────────────────────────────────────────────────────────────────────────────

/// Direct implications plus their precomputed transitive closure.
#[derive(Debug, Clone)]
pub struct ImplicationTable<Op> {
    direct: HashMap<Op, Vec<Op>>,
    closure: HashMap<Op, HashSet<Op>>,
}

/// Accumulates direct implications before the closure is computed.
#[derive(Debug, Clone)]
pub struct ImplicationTableBuilder<Op> {
    direct: HashMap<Op, Vec<Op>>,
}

impl<Op> ImplicationTable<Op>
where
    Op: Clone + Eq + Hash + fmt::Debug,
{
    pub fn builder() -> ImplicationTableBuilder<Op> {
        ImplicationTableBuilder {
            direct: HashMap::new(),
        }
    }

    /// A table with no implications: every capability implies only itself.
    pub fn empty() -> Self {
        Self::builder().build_lenient()
    }

    /// Operations `op` grants directly.  Empty when none are declared.
    pub fn direct(&self, op: &Op) -> &[Op] {
        self.direct.get(op).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every operation reachable from `op`, excluding `op` itself unless a
    /// (lenient) cycle leads back to it.
    pub fn closure(&self, op: &Op) -> Option<&HashSet<Op>> {
        self.closure.get(op)
    }

    /// Reflexive-transitive implication between two operations.
    pub fn op_implies(&self, held: &Op, required: &Op) -> bool {
        held == required
            || self
                .closure
                .get(held)
                .is_some_and(|reachable| reachable.contains(required))
    }

    /// Number of operations with at least one declared implication.
    pub fn len(&self) -> usize {
        self.direct.len()
    }

    pub fn is_empty(&self) -> bool {
        self.direct.is_empty()
    }
}

impl<Op> ImplicationTableBuilder<Op>
where
    Op: Clone + Eq + Hash + fmt::Debug,
{
    /// Declare that `op` directly implies every operation in `implied`.
    ///
    /// Repeated declarations for the same `op` accumulate; duplicates and
    /// self-edges are dropped since implication is already reflexive.
    pub fn grant(mut self, op: Op, implied: impl IntoIterator<Item = Op>) -> Self {
        let edges = self.direct.entry(op.clone()).or_default();
        for target in implied {
            if target != op && !edges.contains(&target) {
                edges.push(target);
            }
        }
        self
    }

    /// Validate the table and precompute its closure.
    ///
    /// # Errors
    ///
    /// [`ImplicationCycle`] when some operation transitively implies itself.
    pub fn build(self) -> Result<ImplicationTable<Op>, ImplicationCycle<Op>> {
        if let Some(path) = find_cycle(&self.direct) {
            return Err(ImplicationCycle { path });
        }
        Ok(self.build_lenient())
    }

    /// Precompute the closure without rejecting cycles.  A revisited node is
    /// treated as already closed, so construction always terminates.
    pub fn build_lenient(self) -> ImplicationTable<Op> {
        let closure = self
            .direct
            .keys()
            .map(|op| (op.clone(), reachable_from(&self.direct, op)))
            .collect();
        ImplicationTable {
            direct: self.direct,
            closure,
        }
    }
}

fn reachable_from<Op>(direct: &HashMap<Op, Vec<Op>>, start: &Op) -> HashSet<Op>
where
    Op: Clone + Eq + Hash,
{
    let mut seen = HashSet::new();
    let mut stack: Vec<&Op> = direct
        .get(start)
        .map(|edges| edges.iter().collect())
        .unwrap_or_default();
    while let Some(op) = stack.pop() {
        if seen.insert(op.clone())
            && let Some(next) = direct.get(op)
        {
            stack.extend(next.iter());
        }
    }
    seen
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

fn find_cycle<Op>(direct: &HashMap<Op, Vec<Op>>) -> Option<Vec<Op>>
where
    Op: Clone + Eq + Hash,
{
    fn visit<Op: Clone + Eq + Hash>(
        op: &Op,
        direct: &HashMap<Op, Vec<Op>>,
        marks: &mut HashMap<Op, Mark>,
        path: &mut Vec<Op>,
    ) -> Option<Vec<Op>> {
        match marks.get(op) {
            Some(Mark::Done) => return None,
            Some(Mark::InProgress) => {
                let start = path.iter().position(|p| p == op).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(op.clone());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(op.clone(), Mark::InProgress);
        path.push(op.clone());
        for next in direct.get(op).into_iter().flatten() {
            if let Some(cycle) = visit(next, direct, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(op.clone(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut path = Vec::new();
    direct
        .keys()
        .find_map(|op| visit(op, direct, &mut marks, &mut path))
}

// ────────────────────────────────────────────────────────────────────────────
// CapabilityAlgebra
// ────────────────────────────────────────────────────────────────────────────

/// Implication and composition for one capability type.
#[derive(Debug, Clone)]
pub struct CapabilityAlgebra<C: Capability> {
    table: ImplicationTable<C::Op>,
}

impl<C: Capability> CapabilityAlgebra<C> {
    pub fn new(table: ImplicationTable<C::Op>) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &ImplicationTable<C::Op> {
        &self.table
    }

    /// `true` iff `held == required`, or `required` shares `held`'s scope and
    /// its operation lies in the closure of `held`'s operation.
    pub fn implies(&self, held: &C, required: &C) -> bool {
        if held == required {
            return true;
        }
        let required_op = required.op();
        if held.with_op(required_op.clone()) != *required {
            return false;
        }
        self.table.op_implies(&held.op(), &required_op)
    }

    /// Capabilities `cap` grants directly, bound to `cap`'s scope.
    pub fn grants(&self, cap: &C) -> Vec<C> {
        self.table
            .direct(&cap.op())
            .iter()
            .map(|op| cap.with_op(op.clone()))
            .collect()
    }

    /// Union of every input capability and everything it transitively
    /// grants.  Idempotent and monotonic in its input.
    pub fn compose<'a>(&self, caps: impl IntoIterator<Item = &'a C>) -> HashSet<C> {
        let mut out = HashSet::new();
        for cap in caps {
            if let Some(reachable) = self.table.closure(&cap.op()) {
                out.extend(reachable.iter().map(|op| cap.with_op(op.clone())));
            }
            out.insert(cap.clone());
        }
        out
    }

    /// Whether some capability in `held` implies `required`.
    pub fn satisfied_by(&self, held: &HashSet<C>, required: &C) -> bool {
        held.contains(required) || held.iter().any(|h| self.implies(h, required))
    }
}

/// The standard [`FileCap`] algebra:
/// `admin ⇒ [read, write, delete]`, `write ⇒ [read]`.
pub fn file_algebra() -> CapabilityAlgebra<FileCap> {
    CapabilityAlgebra::new(file_implications().build_lenient())
}

fn file_implications() -> ImplicationTableBuilder<FileOp> {
    ImplicationTable::builder()
        .grant(FileOp::Admin, [FileOp::Read, FileOp::Write, FileOp::Delete])
        .grant(FileOp::Write, [FileOp::Read])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Nullary role tags: the capability is its own operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Role {
        Owner,
        Maintainer,
        Reader,
        Guest,
    }

    impl Capability for Role {
        type Op = Role;
        fn op(&self) -> Role {
            *self
        }
        fn with_op(&self, op: Role) -> Role {
            op
        }
    }

    fn role_algebra() -> CapabilityAlgebra<Role> {
        let table = ImplicationTable::builder()
            .grant(Role::Owner, [Role::Maintainer])
            .grant(Role::Maintainer, [Role::Reader])
            .build()
            .unwrap();
        CapabilityAlgebra::new(table)
    }

    #[test]
    fn implication_is_reflexive() {
        let files = file_algebra();
        for cap in [
            FileCap::admin("/x"),
            FileCap::read("/x"),
            FileCap::write("/y"),
            FileCap::delete("/z"),
        ] {
            assert!(files.implies(&cap, &cap));
        }
        let roles = role_algebra();
        for role in [Role::Owner, Role::Maintainer, Role::Reader, Role::Guest] {
            assert!(roles.implies(&role, &role));
        }
    }

    #[test]
    fn implication_is_transitive_through_closure() {
        let roles = role_algebra();
        assert!(roles.implies(&Role::Owner, &Role::Reader));
        assert!(roles.compose([&Role::Owner]).contains(&Role::Reader));
        assert!(!roles.implies(&Role::Reader, &Role::Owner));
    }

    #[test]
    fn write_implies_read_on_same_path_only() {
        let files = file_algebra();
        assert!(files.implies(&FileCap::write("/x"), &FileCap::read("/x")));
        assert!(!files.implies(&FileCap::write("/x"), &FileCap::read("/y")));
        assert!(!files.implies(&FileCap::read("/x"), &FileCap::write("/x")));
    }

    #[test]
    fn grants_returns_direct_implications_only() {
        let roles = role_algebra();
        assert_eq!(roles.grants(&Role::Owner), vec![Role::Maintainer]);
        assert!(roles.grants(&Role::Guest).is_empty());

        let files = file_algebra();
        let mut granted = files.grants(&FileCap::admin("/x"));
        granted.sort();
        assert_eq!(
            granted,
            vec![
                FileCap::read("/x"),
                FileCap::write("/x"),
                FileCap::delete("/x")
            ]
        );
    }

    #[test]
    fn compose_is_idempotent() {
        let files = file_algebra();
        let input = [FileCap::write("/a"), FileCap::admin("/b")];
        let once = files.compose(input.iter());
        let twice = files.compose(once.iter());
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2 + 4);
    }

    #[test]
    fn compose_is_monotonic() {
        let files = file_algebra();
        let small = [FileCap::write("/a")];
        let large = [FileCap::write("/a"), FileCap::delete("/b")];
        let s = files.compose(small.iter());
        let t = files.compose(large.iter());
        assert!(s.is_subset(&t));
    }

    #[test]
    fn build_rejects_cycles() {
        let result = ImplicationTable::builder()
            .grant("a", ["b"])
            .grant("b", ["c"])
            .grant("c", ["a"])
            .build();
        let cycle = result.unwrap_err();
        assert_eq!(cycle.path.first(), cycle.path.last());
        assert_eq!(cycle.path.len(), 4);

        let err: GateError<FileCap> = cycle.into();
        assert_eq!(err.code(), "configuration");
    }

    #[test]
    fn file_implications_are_acyclic() {
        let table = file_implications().build().expect("file table has no cycle");
        let files = CapabilityAlgebra::new(table);
        assert!(files.implies(&FileCap::admin("/x"), &FileCap::read("/x")));
        assert!(!files.implies(&FileCap::read("/x"), &FileCap::write("/x")));
    }

    #[test]
    fn lenient_build_terminates_on_cycles() {
        let table = ImplicationTable::builder()
            .grant("a", ["b"])
            .grant("b", ["a", "c"])
            .build_lenient();
        assert!(table.op_implies(&"a", &"c"));
        assert!(table.op_implies(&"b", &"a"));
        assert!(!table.op_implies(&"c", &"a"));
    }

    #[test]
    fn self_edges_are_ignored() {
        let table = ImplicationTable::builder().grant("a", ["a", "b"]).build();
        assert!(table.is_ok());
    }

    #[test]
    fn satisfied_by_checks_every_held_capability() {
        let files = file_algebra();
        let held: HashSet<FileCap> = [FileCap::read("/a"), FileCap::admin("/x")].into();
        assert!(files.satisfied_by(&held, &FileCap::delete("/x")));
        assert!(!files.satisfied_by(&held, &FileCap::delete("/a")));
    }

    #[test]
    fn empty_table_only_reflexive() {
        let algebra: CapabilityAlgebra<FileCap> = CapabilityAlgebra::new(ImplicationTable::empty());
        assert!(algebra.implies(&FileCap::admin("/x"), &FileCap::admin("/x")));
        assert!(!algebra.implies(&FileCap::admin("/x"), &FileCap::read("/x")));
    }
}
