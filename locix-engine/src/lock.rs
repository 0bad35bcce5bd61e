//! Lock groups: persistent relationships that propagate one member's
//! transform (or value-scale) changes to the rest of its group.
//!
//! Each member's state is snapshotted when the lock is formed. Propagation
//! works on *relative* deltas against those snapshots, so two locked views
//! keep their own absolute zoom and position while moving in lockstep.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type LockUid = String;

/// A lockable participant: a view uid, or `"viewUid.trackUid"` for
/// track-level value-scale locks.
pub type MemberUid = String;

/// The member uid of a track within a view.
pub fn track_member_uid(view_uid: &str, track_uid: &str) -> MemberUid {
    format!("{view_uid}.{track_uid}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockKind {
    Zoom,
    Location,
    ZoomAndLocation,
    ValueScale,
}

impl LockKind {
    /// Whether propagation carries a geometric transform rather than a
    /// numeric value range.
    pub fn is_geometric(&self) -> bool {
        !matches!(self, LockKind::ValueScale)
    }
}

/// A member's state as seen by lock propagation: the `(center, scale)`
/// form of a viewport transform, or a track's value domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LockState {
    Scales { center_x: f64, center_y: f64, k: f64 },
    ValueRange { min: f64, max: f64 },
}

/// Per-gesture guard against re-entrant propagation over cyclic lock
/// graphs. Discarded when the gesture completes.
#[derive(Debug, Default)]
pub struct PropagationContext {
    visited: HashSet<MemberUid>,
    cycle_guard_hits: u64,
}

impl PropagationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a member visited. Returns `false` if it already was, in which
    /// case the caller must skip it.
    pub fn visit(&mut self, member: &str) -> bool {
        self.visited.insert(member.to_string())
    }

    pub fn was_visited(&self, member: &str) -> bool {
        self.visited.contains(member)
    }

    /// How often the cycle guard fired. Cyclic lock graphs are a
    /// legitimate configuration; this exists for tests and logging.
    pub fn cycle_guard_hits(&self) -> u64 {
        self.cycle_guard_hits
    }

    pub fn visited(&self) -> impl Iterator<Item = &MemberUid> {
        self.visited.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockGroup {
    pub uid: LockUid,
    pub kind: LockKind,
    members: HashMap<MemberUid, LockState>,
}

impl LockGroup {
    pub fn members(&self) -> impl Iterator<Item = (&MemberUid, &LockState)> {
        self.members.iter()
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.contains_key(member)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Compute the states to apply to the other members after `member`
    /// changed to `new_state`.
    ///
    /// `lookup` reads a member's *current* state so that zoom locks can
    /// preserve each member's own center and location locks each member's
    /// own zoom. Members already visited in this gesture are skipped (the
    /// cycle guard), as are members with no current state.
    pub fn on_member_changed(
        &self,
        member: &str,
        new_state: LockState,
        lookup: &dyn Fn(&str) -> Option<LockState>,
        ctx: &mut PropagationContext,
    ) -> Vec<(MemberUid, LockState)> {
        let Some(snap_changed) = self.members.get(member) else {
            return Vec::new();
        };

        let mut applied = Vec::new();
        for (other, snap_other) in &self.members {
            if other == member {
                continue;
            }
            if ctx.was_visited(other) {
                ctx.cycle_guard_hits += 1;
                log::debug!("lock {}: cycle guard skipped {other}", self.uid);
                continue;
            }
            // Value-scale locks carry the range itself; geometric locks
            // need the other member's current state to preserve its own
            // center (zoom lock) or its own scale (location lock).
            let next = if self.kind == LockKind::ValueScale {
                match new_state {
                    LockState::ValueRange { .. } => Some(new_state),
                    LockState::Scales { .. } => None,
                }
            } else {
                let Some(current) = lookup(other) else {
                    continue;
                };
                propagate(self.kind, snap_changed, snap_other, &new_state, &current)
            };
            let Some(next) = next else {
                continue;
            };
            ctx.visit(other);
            applied.push((other.clone(), next));
        }
        applied
    }
}

/// The geometric propagation rule, relative to the lock-formation snapshots.
fn propagate(
    kind: LockKind,
    snap_changed: &LockState,
    snap_other: &LockState,
    new_state: &LockState,
    current_other: &LockState,
) -> Option<LockState> {
    match kind {
        LockKind::ValueScale => None,
        LockKind::Zoom | LockKind::Location | LockKind::ZoomAndLocation => {
            let (LockState::Scales { center_x: sc_cx, center_y: sc_cy, k: sc_k },
                 LockState::Scales { center_x: so_cx, center_y: so_cy, k: so_k }) =
                (snap_changed, snap_other)
            else {
                return None;
            };
            let LockState::Scales { center_x: new_cx, center_y: new_cy, k: new_k } = new_state
            else {
                return None;
            };
            let LockState::Scales { center_x: cur_cx, center_y: cur_cy, k: cur_k } = current_other
            else {
                return None;
            };

            // Scale ratio and center offset recorded when the lock formed.
            let rk = so_k / sc_k;
            let dx = so_cx - sc_cx;
            let dy = so_cy - sc_cy;

            let (center_x, center_y) = if matches!(kind, LockKind::Zoom) {
                (*cur_cx, *cur_cy)
            } else {
                (new_cx + dx, new_cy + dy)
            };
            let k = if matches!(kind, LockKind::Location) {
                *cur_k
            } else {
                new_k * rk
            };
            Some(LockState::Scales { center_x, center_y, k })
        }
    }
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("a lock needs at least two members, got {0}")]
    TooFewMembers(usize),

    #[error("unknown lock {0}")]
    UnknownLock(LockUid),

    #[error("no state available for member {0}")]
    UnknownMember(MemberUid),
}

/// All lock groups, indexed by uid and by `(member, kind)` membership.
///
/// Membership is mutated only by explicit link/unlink calls, never during
/// propagation. A member holds at most one lock per kind: linking members
/// that already belong to groups of the same kind merges those groups.
#[derive(Debug, Default)]
pub struct LockRegistry {
    groups: HashMap<LockUid, LockGroup>,
    membership: HashMap<(MemberUid, LockKind), LockUid>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or extend by merging) a lock over the given members, whose
    /// current states become the group snapshots. Returns the group uid.
    pub fn create_lock(
        &mut self,
        uid: LockUid,
        kind: LockKind,
        members: Vec<(MemberUid, LockState)>,
    ) -> Result<LockUid, LockError> {
        if members.len() < 2 {
            return Err(LockError::TooFewMembers(members.len()));
        }

        // Absorb any existing groups of this kind the members belong to.
        // Absorbed members keep their original snapshots; the named
        // members get fresh ones.
        let mut merged: HashMap<MemberUid, LockState> = HashMap::new();
        for (member, _) in &members {
            if let Some(existing_uid) = self.membership.get(&(member.clone(), kind)).cloned() {
                if let Some(existing) = self.groups.remove(&existing_uid) {
                    for (m, state) in existing.members {
                        self.membership.remove(&(m.clone(), kind));
                        merged.insert(m, state);
                    }
                }
            }
        }
        for (member, state) in members {
            merged.insert(member, state);
        }

        for member in merged.keys() {
            self.membership
                .insert((member.clone(), kind), uid.clone());
        }
        log::debug!("lock {uid} ({kind:?}) over {} members", merged.len());
        self.groups.insert(
            uid.clone(),
            LockGroup {
                uid: uid.clone(),
                kind,
                members: merged,
            },
        );
        Ok(uid)
    }

    pub fn remove_lock(&mut self, uid: &str) -> Result<LockGroup, LockError> {
        let group = self
            .groups
            .remove(uid)
            .ok_or_else(|| LockError::UnknownLock(uid.to_string()))?;
        for member in group.members.keys() {
            self.membership.remove(&(member.clone(), group.kind));
        }
        Ok(group)
    }

    pub fn group(&self, uid: &str) -> Option<&LockGroup> {
        self.groups.get(uid)
    }

    /// The group of `kind` that `member` belongs to, if any.
    pub fn group_for(&self, member: &str, kind: LockKind) -> Option<&LockGroup> {
        self.membership
            .get(&(member.to_string(), kind))
            .and_then(|uid| self.groups.get(uid))
    }

    /// Every group containing `member`, across kinds.
    pub fn groups_containing<'a>(&'a self, member: &'a str) -> impl Iterator<Item = &'a LockGroup> {
        self.groups
            .values()
            .filter(move |group| group.contains(member))
    }

    /// Drop a single member from every group it belongs to, dissolving
    /// groups that fall below two members.
    pub fn remove_member(&mut self, member: &str) {
        let uids: Vec<LockUid> = self
            .membership
            .iter()
            .filter(|((m, _), _)| m == member)
            .map(|(_, uid)| uid.clone())
            .collect();
        for uid in uids {
            if let Some(group) = self.groups.get_mut(&uid) {
                group.members.remove(member);
                self.membership.remove(&(member.to_string(), group.kind));
                if group.members.len() < 2 {
                    let _ = self.remove_lock(&uid);
                }
            }
        }
    }
}
