//! Membership state machine (spec §3, §4.2).
//!
//! Applies `GroupCreate`, `MemberInvite`, `MemberAccept`, and `MemberRemove`
//! ops into a per-group roster. Authorization is checked against the roster
//! *as of the op being applied*, not against some later converged view —
//! two replicas that see the same ops in different orders can temporarily
//! disagree on whether an op was authorized, but the roster after all ops
//! are applied converges identically (spec §4.2 invariant 4).
use std::collections::BTreeMap;

use thiserror::Error;

use crate::crdt::ids::OpId;
use crate::crdt::ops::{
    GroupCreatePayload, MemberAcceptPayload, MemberInvitePayload, MemberRemovePayload, OpEnvelope,
    Role,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MembershipError {
    #[error("group create op is not well-formed")]
    MalformedGroupCreate,
    #[error("inviter {0} is not an active member")]
    InviterNotActive(String),
    #[error("only admins may invite members")]
    InviterNotAdmin,
    #[error("target is already a member")]
    AlreadyMember,
    #[error("no matching invite for this accept")]
    NoMatchingInvite,
    #[error("accept author does not match invite target")]
    AcceptAuthorMismatch,
    #[error("remover {0} is not an active admin")]
    RemoverNotAdmin(String),
    #[error("remove target is not an active member")]
    TargetNotActive,
}

/// A single member's state. `accepted` tracks the engine-level acceptance
/// recorded by a `MemberAccept` op; UI layers additionally track a
/// "pending" flag (set the instant an invite's bootstrap bundle is sent,
/// before the auto-accept round-trips) that is presentation-only and does
/// not live here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberRecord {
    pub pubkey: [u8; 32],
    pub role: Role,
    pub accepted: bool,
    pub removed: bool,
    pub invited_by: OpId,
    pub wrapped_group_secret: Vec<u8>,
}

impl MemberRecord {
    pub fn is_active(&self) -> bool {
        self.accepted && !self.removed
    }
}

#[derive(Clone, Debug, Default)]
pub struct MembershipState {
    pub group_name: String,
    pub created: bool,
    /// `op_id` of the `GroupCreate` currently recognized as the founding op.
    /// Set on the first `GroupCreate` and only ever replaced by a later one
    /// with a smaller `op_id`, so concurrent `GroupCreate`s for the same
    /// `GroupId` converge regardless of arrival order.
    created_by: Option<OpId>,
    members: BTreeMap<[u8; 32], MemberRecord>,
    /// `MemberInvite` ops keyed by their `op_id`, kept so `MemberAccept` can
    /// look up who was invited and with what role.
    pending_invites: BTreeMap<OpId, (MemberInvitePayload, [u8; 32])>,
}

impl MembershipState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, pubkey: &[u8; 32]) -> Option<&MemberRecord> {
        self.members.get(pubkey)
    }

    pub fn get_active_member(&self, pubkey: &[u8; 32]) -> Option<&MemberRecord> {
        self.members.get(pubkey).filter(|m| m.is_active())
    }

    pub fn is_active_admin(&self, pubkey: &[u8; 32]) -> bool {
        self.get_active_member(pubkey)
            .map(|m| m.role == Role::Admin)
            .unwrap_or(false)
    }

    pub fn active_members(&self) -> impl Iterator<Item = &MemberRecord> {
        self.members.values().filter(|m| m.is_active())
    }

    /// Apply a `GroupCreate` op. The creator becomes the sole initial member
    /// with `Admin` role, auto-accepted (there is no invite to accept).
    ///
    /// A concurrently-issued second `GroupCreate` for the same `GroupId` is
    /// not an error: it is resolved against the recorded founding op by
    /// `op_id`, smaller wins, so the result doesn't depend on which one a
    /// replica happened to see first.
    pub fn apply_group_create(
        &mut self,
        op: &OpEnvelope,
        payload: &GroupCreatePayload,
    ) -> Result<(), MembershipError> {
        if payload.group_name.is_empty() {
            return Err(MembershipError::MalformedGroupCreate);
        }

        if self.created {
            let current = self.created_by.expect("created implies created_by is set");
            if op.op_id >= current {
                return Ok(());
            }
        }

        self.created = true;
        self.created_by = Some(op.op_id);
        self.group_name = payload.group_name.clone();
        self.members.insert(
            op.author_pubkey,
            MemberRecord {
                pubkey: op.author_pubkey,
                role: Role::Admin,
                accepted: true,
                removed: false,
                invited_by: op.op_id,
                wrapped_group_secret: Vec::new(),
            },
        );
        Ok(())
    }

    /// Apply a `MemberInvite` op. Only an active admin may invite (spec
    /// §4.2); inviting an already-active member is rejected.
    pub fn apply_member_invite(
        &mut self,
        op: &OpEnvelope,
        payload: &MemberInvitePayload,
    ) -> Result<(), MembershipError> {
        let inviter = self
            .get_active_member(&op.author_pubkey)
            .ok_or_else(|| MembershipError::InviterNotActive(hex::encode(op.author_pubkey)))?;
        if inviter.role != Role::Admin {
            return Err(MembershipError::InviterNotAdmin);
        }
        if self
            .members
            .get(&payload.invited_pubkey)
            .map(|m| m.is_active())
            .unwrap_or(false)
        {
            return Err(MembershipError::AlreadyMember);
        }

        self.members.insert(
            payload.invited_pubkey,
            MemberRecord {
                pubkey: payload.invited_pubkey,
                role: payload.role,
                accepted: false,
                removed: false,
                invited_by: op.op_id,
                wrapped_group_secret: payload.wrapped_group_secret.clone(),
            },
        );
        self.pending_invites
            .insert(op.op_id, (payload.clone(), op.author_pubkey));
        Ok(())
    }

    /// Apply a `MemberAccept` op. The accepting author must match the
    /// invite's target; this flips `accepted` on the existing record rather
    /// than creating a new one.
    pub fn apply_member_accept(
        &mut self,
        op: &OpEnvelope,
        payload: &MemberAcceptPayload,
    ) -> Result<(), MembershipError> {
        let (invite, _inviter) = self
            .pending_invites
            .get(&payload.invite_op_id)
            .ok_or(MembershipError::NoMatchingInvite)?;
        if invite.invited_pubkey != op.author_pubkey {
            return Err(MembershipError::AcceptAuthorMismatch);
        }
        if let Some(record) = self.members.get_mut(&op.author_pubkey) {
            record.accepted = true;
        }
        Ok(())
    }

    /// Apply a `MemberRemove` op. Authorized if the author is an active
    /// admin, or if the author is removing themself (a voluntary leave).
    /// Only an active (possibly not-yet-accepted) member may be removed.
    ///
    /// When a `MemberInvite` and a `MemberRemove` targeting the same invitee
    /// are concurrent, the op with the larger lamport wins (spec §4.2
    /// invariant 5); on an exact lamport tie the smaller `op_id` wins, same
    /// rule as everywhere else in this engine.
    pub fn apply_member_remove(
        &mut self,
        op: &OpEnvelope,
        payload: &MemberRemovePayload,
    ) -> Result<(), MembershipError> {
        let is_self_leave = payload.target_pubkey == op.author_pubkey;
        if !is_self_leave && !self.is_active_admin(&op.author_pubkey) {
            return Err(MembershipError::RemoverNotAdmin(hex::encode(op.author_pubkey)));
        }
        let target = self
            .members
            .get_mut(&payload.target_pubkey)
            .filter(|m| !m.removed)
            .ok_or(MembershipError::TargetNotActive)?;

        match target.invited_by.lamport.cmp(&op.lamport) {
            std::cmp::Ordering::Less => {
                target.removed = true;
            }
            std::cmp::Ordering::Greater => {
                // The invite happened causally after this remove was issued
                // elsewhere; the invite wins, remove is a no-op here.
            }
            std::cmp::Ordering::Equal => {
                if op.op_id < target.invited_by {
                    target.removed = true;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::ids::GroupId;
    use crate::crdt::ops::{MemberRemovePayload, OpType, RemoveReason};
    use crate::crypto::signing::generate_keypair;

    fn make_op(
        group: GroupId,
        op_type: OpType,
        payload: &impl serde::Serialize,
        lamport: u64,
        nonce: u64,
        author_pub: [u8; 32],
        author_priv: [u8; 32],
    ) -> OpEnvelope {
        OpEnvelope::create_signed(group, op_type, payload, lamport, nonce, author_pub, &author_priv)
            .unwrap()
    }

    fn group_of(pubkey: [u8; 32]) -> GroupId {
        GroupId::new(&crate::crdt::ids::DeviceId::from_pubkey(&pubkey), &[0x09; 32])
    }

    #[test]
    fn create_then_invite_then_accept() {
        let (admin_pub, admin_priv) = generate_keypair();
        let (member_pub, member_priv) = generate_keypair();
        let gid = group_of(admin_pub);
        let mut state = MembershipState::new();

        let create_payload = GroupCreatePayload {
            group_name: "book club".into(),
            initial_group_secret: [0x01; 32],
        };
        let create_op = make_op(gid, OpType::GroupCreate, &create_payload, 1, 1, admin_pub, admin_priv);
        state.apply_group_create(&create_op, &create_payload).unwrap();
        assert!(state.is_active_admin(&admin_pub));

        let invite_payload = MemberInvitePayload {
            invited_device_id: crate::crdt::ids::DeviceId::from_pubkey(&member_pub),
            invited_pubkey: member_pub,
            role: Role::Member,
            wrapped_group_secret: vec![1, 2, 3],
        };
        let invite_op = make_op(gid, OpType::MemberInvite, &invite_payload, 2, 1, admin_pub, admin_priv);
        state.apply_member_invite(&invite_op, &invite_payload).unwrap();
        assert!(!state.get(&member_pub).unwrap().is_active());

        let accept_payload = MemberAcceptPayload {
            invite_op_id: invite_op.op_id,
        };
        let accept_op = make_op(gid, OpType::MemberAccept, &accept_payload, 3, 1, member_pub, member_priv);
        state.apply_member_accept(&accept_op, &accept_payload).unwrap();
        assert!(state.get_active_member(&member_pub).is_some());
    }

    #[test]
    fn non_admin_cannot_invite() {
        let (admin_pub, admin_priv) = generate_keypair();
        let (member_pub, member_priv) = generate_keypair();
        let (outsider_pub, _) = generate_keypair();
        let gid = group_of(admin_pub);
        let mut state = MembershipState::new();

        let create_payload = GroupCreatePayload {
            group_name: "g".into(),
            initial_group_secret: [0x02; 32],
        };
        let create_op = make_op(gid, OpType::GroupCreate, &create_payload, 1, 1, admin_pub, admin_priv);
        state.apply_group_create(&create_op, &create_payload).unwrap();

        let invite_payload = MemberInvitePayload {
            invited_device_id: crate::crdt::ids::DeviceId::from_pubkey(&member_pub),
            invited_pubkey: member_pub,
            role: Role::Member,
            wrapped_group_secret: vec![],
        };
        let invite_op = make_op(gid, OpType::MemberInvite, &invite_payload, 2, 1, admin_pub, admin_priv);
        state.apply_member_invite(&invite_op, &invite_payload).unwrap();
        let accept_payload = MemberAcceptPayload {
            invite_op_id: invite_op.op_id,
        };
        let accept_op = make_op(gid, OpType::MemberAccept, &accept_payload, 3, 1, member_pub, member_priv);
        state.apply_member_accept(&accept_op, &accept_payload).unwrap();

        let bad_invite_payload = MemberInvitePayload {
            invited_device_id: crate::crdt::ids::DeviceId::from_pubkey(&outsider_pub),
            invited_pubkey: outsider_pub,
            role: Role::Member,
            wrapped_group_secret: vec![],
        };
        let bad_invite_op = make_op(gid, OpType::MemberInvite, &bad_invite_payload, 4, 1, member_pub, member_priv);
        let err = state
            .apply_member_invite(&bad_invite_op, &bad_invite_payload)
            .unwrap_err();
        assert_eq!(err, MembershipError::InviterNotAdmin);
    }

    #[test]
    fn concurrent_invite_and_remove_resolve_by_lamport() {
        let (admin_pub, admin_priv) = generate_keypair();
        let (member_pub, _) = generate_keypair();
        let gid = group_of(admin_pub);
        let mut state = MembershipState::new();

        let create_payload = GroupCreatePayload {
            group_name: "g".into(),
            initial_group_secret: [0x03; 32],
        };
        let create_op = make_op(gid, OpType::GroupCreate, &create_payload, 1, 1, admin_pub, admin_priv);
        state.apply_group_create(&create_op, &create_payload).unwrap();

        let invite_payload = MemberInvitePayload {
            invited_device_id: crate::crdt::ids::DeviceId::from_pubkey(&member_pub),
            invited_pubkey: member_pub,
            role: Role::Member,
            wrapped_group_secret: vec![],
        };
        // Invite at lamport 5.
        let invite_op = make_op(gid, OpType::MemberInvite, &invite_payload, 5, 1, admin_pub, admin_priv);
        state.apply_member_invite(&invite_op, &invite_payload).unwrap();

        // Remove issued at lamport 3 (causally before the invite) is a no-op.
        let remove_payload = MemberRemovePayload {
            target_pubkey: member_pub,
            reason: RemoveReason::Kick,
        };
        let remove_op = make_op(gid, OpType::MemberRemove, &remove_payload, 3, 1, admin_pub, admin_priv);
        state.apply_member_remove(&remove_op, &remove_payload).unwrap();
        assert!(!state.get(&member_pub).unwrap().removed);

        // Remove issued at lamport 9 (after the invite) takes effect.
        let remove_op2 = make_op(gid, OpType::MemberRemove, &remove_payload, 9, 1, admin_pub, admin_priv);
        state.apply_member_remove(&remove_op2, &remove_payload).unwrap();
        assert!(state.get(&member_pub).unwrap().removed);
    }

    #[test]
    fn concurrent_group_create_resolves_by_op_id() {
        let (first_pub, first_priv) = generate_keypair();
        let (second_pub, second_priv) = generate_keypair();
        let gid = group_of(first_pub);

        let payload_first = GroupCreatePayload {
            group_name: "first".into(),
            initial_group_secret: [0x04; 32],
        };
        let payload_second = GroupCreatePayload {
            group_name: "second".into(),
            initial_group_secret: [0x05; 32],
        };

        let op_first = make_op(gid, OpType::GroupCreate, &payload_first, 1, 1, first_pub, first_priv);
        let op_second = make_op(gid, OpType::GroupCreate, &payload_second, 1, 1, second_pub, second_priv);

        let winner = if op_first.op_id < op_second.op_id {
            "first"
        } else {
            "second"
        };

        let mut forward = MembershipState::new();
        forward.apply_group_create(&op_first, &payload_first).unwrap();
        forward.apply_group_create(&op_second, &payload_second).unwrap();

        let mut reverse = MembershipState::new();
        reverse.apply_group_create(&op_second, &payload_second).unwrap();
        reverse.apply_group_create(&op_first, &payload_first).unwrap();

        assert_eq!(forward.group_name, reverse.group_name);
        assert_eq!(forward.members.len(), reverse.members.len());
        if winner == "first" {
            assert_eq!(forward.group_name, "first");
        } else {
            assert_eq!(forward.group_name, "second");
        }
    }

    #[test]
    fn member_can_remove_self_without_admin() {
        let (admin_pub, admin_priv) = generate_keypair();
        let (member_pub, member_priv) = generate_keypair();
        let gid = group_of(admin_pub);
        let mut state = MembershipState::new();

        let create_payload = GroupCreatePayload {
            group_name: "g".into(),
            initial_group_secret: [0x06; 32],
        };
        let create_op = make_op(gid, OpType::GroupCreate, &create_payload, 1, 1, admin_pub, admin_priv);
        state.apply_group_create(&create_op, &create_payload).unwrap();

        let invite_payload = MemberInvitePayload {
            invited_device_id: crate::crdt::ids::DeviceId::from_pubkey(&member_pub),
            invited_pubkey: member_pub,
            role: Role::Member,
            wrapped_group_secret: vec![],
        };
        let invite_op = make_op(gid, OpType::MemberInvite, &invite_payload, 2, 1, admin_pub, admin_priv);
        state.apply_member_invite(&invite_op, &invite_payload).unwrap();

        let accept_payload = MemberAcceptPayload {
            invite_op_id: invite_op.op_id,
        };
        let accept_op = make_op(gid, OpType::MemberAccept, &accept_payload, 3, 1, member_pub, member_priv);
        state.apply_member_accept(&accept_op, &accept_payload).unwrap();

        let leave_payload = MemberRemovePayload {
            target_pubkey: member_pub,
            reason: RemoveReason::Leave,
        };
        let leave_op = make_op(gid, OpType::MemberRemove, &leave_payload, 4, 1, member_pub, member_priv);
        state.apply_member_remove(&leave_op, &leave_payload).unwrap();

        assert!(state.get(&member_pub).unwrap().removed);
    }

    #[test]
    fn non_admin_non_self_remove_rejected() {
        let (admin_pub, admin_priv) = generate_keypair();
        let (alice_pub, alice_priv) = generate_keypair();
        let (bob_pub, _) = generate_keypair();
        let gid = group_of(admin_pub);
        let mut state = MembershipState::new();

        let create_payload = GroupCreatePayload {
            group_name: "g".into(),
            initial_group_secret: [0x07; 32],
        };
        let create_op = make_op(gid, OpType::GroupCreate, &create_payload, 1, 1, admin_pub, admin_priv);
        state.apply_group_create(&create_op, &create_payload).unwrap();

        let invite_alice = MemberInvitePayload {
            invited_device_id: crate::crdt::ids::DeviceId::from_pubkey(&alice_pub),
            invited_pubkey: alice_pub,
            role: Role::Member,
            wrapped_group_secret: vec![],
        };
        let invite_op = make_op(gid, OpType::MemberInvite, &invite_alice, 2, 1, admin_pub, admin_priv);
        state.apply_member_invite(&invite_op, &invite_alice).unwrap();
        let accept_payload = MemberAcceptPayload {
            invite_op_id: invite_op.op_id,
        };
        let accept_op = make_op(gid, OpType::MemberAccept, &accept_payload, 3, 1, alice_pub, alice_priv);
        state.apply_member_accept(&accept_op, &accept_payload).unwrap();

        let invite_bob = MemberInvitePayload {
            invited_device_id: crate::crdt::ids::DeviceId::from_pubkey(&bob_pub),
            invited_pubkey: bob_pub,
            role: Role::Member,
            wrapped_group_secret: vec![],
        };
        let invite_bob_op = make_op(gid, OpType::MemberInvite, &invite_bob, 4, 1, admin_pub, admin_priv);
        state.apply_member_invite(&invite_bob_op, &invite_bob).unwrap();

        let remove_payload = MemberRemovePayload {
            target_pubkey: bob_pub,
            reason: RemoveReason::Kick,
        };
        let remove_op = make_op(gid, OpType::MemberRemove, &remove_payload, 5, 1, alice_pub, alice_priv);
        let err = state.apply_member_remove(&remove_op, &remove_payload).unwrap_err();
        assert_eq!(err, MembershipError::RemoverNotAdmin(hex::encode(alice_pub)));
    }
}
