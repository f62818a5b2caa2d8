//! State Engine — replays a group's signed op log into converged state
//! (spec §4, §5).
//!
//! `GroupState::apply` is the single entry point every op passes through,
//! whether it was just created locally or received over sync. Ops are
//! applied independently: a malformed or unauthorized op is rejected and
//! counted, but never poisons the rest of the batch (spec §7). Applying the
//! same op twice, or the same set of ops in a different order, always
//! converges to the same `state_hash` (spec §8).
use std::collections::BTreeSet;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::crdt::clock::LamportClock;
use crate::crdt::ids::{GroupId, OpId};
use crate::crdt::membership::{MembershipError, MembershipState};
use crate::crdt::messages::{MessageError, MessageState};
use crate::crdt::metadata::{MetadataError, MetadataState};
use crate::crdt::ops::{
    GroupCreatePayload, MemberAcceptPayload, MemberInvitePayload, MemberRemovePayload, OpEnvelope,
    OpError, OpType,
};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("signature verification failed")]
    BadSignature,
    #[error("op's group_id does not match this engine's group")]
    WrongGroup,
    #[error("op already applied")]
    DuplicateOp,
}

/// Outcome of applying a batch of ops (spec §5 `apply`).
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub applied: usize,
    /// Ops rejected for any reason, including soft duplicate-op_id skips.
    pub rejected: usize,
    pub rejections: Vec<(OpId, String)>,
}

/// Converged state for a single group: membership, messages, and metadata,
/// replayed from its op log.
#[derive(Clone, Debug)]
pub struct GroupState {
    pub group_id: GroupId,
    pub membership: MembershipState,
    pub messages: MessageState,
    pub metadata: MetadataState,
    clock: LamportClock,
    applied_ops: BTreeSet<OpId>,
}

impl GroupState {
    pub fn new(group_id: GroupId) -> Self {
        GroupState {
            group_id,
            membership: MembershipState::new(),
            messages: MessageState::new(),
            metadata: MetadataState::new(),
            clock: LamportClock::new(),
            applied_ops: BTreeSet::new(),
        }
    }

    pub fn max_lamport(&self) -> u64 {
        self.clock.max_lamport(&self.group_id)
    }

    pub fn next_lamport(&self) -> u64 {
        self.clock.next_lamport(&self.group_id)
    }

    /// Apply a batch of ops in the order given. Every op is independently
    /// verified and dispatched; failures are recorded and skipped rather
    /// than aborting the batch.
    pub fn apply(&mut self, ops: &[OpEnvelope]) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        for op in ops {
            match self.apply_one(op) {
                Ok(()) => {
                    outcome.applied += 1;
                    log::trace!("applied op {} ({:?})", op.op_id, op.op_type);
                }
                Err(e) => {
                    outcome.rejected += 1;
                    log::debug!("rejected op {}: {}", op.op_id, e);
                    outcome.rejections.push((op.op_id, e.to_string()));
                }
            }
        }
        outcome
    }

    fn apply_one(&mut self, op: &OpEnvelope) -> Result<(), EngineError> {
        if op.group_id != self.group_id {
            return Err(EngineError::WrongGroup);
        }
        if !op.verify_signature() {
            return Err(EngineError::BadSignature);
        }
        // Idempotent: re-applying an already-seen op is a silent no-op,
        // not an error (spec §7: duplicate is soft, folded into rejected).
        if self.applied_ops.contains(&op.op_id) {
            return Err(EngineError::DuplicateOp);
        }

        self.dispatch(op)?;

        self.applied_ops.insert(op.op_id);
        self.clock.observe(self.group_id, op.lamport);
        Ok(())
    }

    fn dispatch(&mut self, op: &OpEnvelope) -> Result<(), EngineError> {
        match op.op_type {
            OpType::GroupCreate => {
                let payload: GroupCreatePayload = op.decode_payload()?;
                self.membership.apply_group_create(op, &payload)?;
            }
            OpType::MemberInvite => {
                let payload: MemberInvitePayload = op.decode_payload()?;
                self.membership.apply_member_invite(op, &payload)?;
            }
            OpType::MemberAccept => {
                let payload: MemberAcceptPayload = op.decode_payload()?;
                self.membership.apply_member_accept(op, &payload)?;
            }
            OpType::MemberRemove => {
                let payload: MemberRemovePayload = op.decode_payload()?;
                self.membership.apply_member_remove(op, &payload)?;
            }
            OpType::MsgAdd => {
                self.messages.apply_msg_add(op, &self.membership)?;
            }
            OpType::MsgEdit => {
                self.messages.apply_msg_edit(op)?;
            }
            OpType::MsgDelete => {
                self.messages.apply_msg_delete(op, &self.membership)?;
            }
            OpType::ReactionSet => {
                self.messages.apply_reaction_set(op, &self.membership)?;
            }
            OpType::MetadataSet => {
                self.metadata.apply_metadata_set(op, &self.membership)?;
            }
        }
        Ok(())
    }

    /// Deterministic digest over the converged state (not the op log
    /// order), usable to prove two replicas converged (spec §8).
    pub fn state_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();

        for member in self.membership.active_members() {
            hasher.update(member.pubkey);
            hasher.update([member.role as u8]);
            hasher.update([member.accepted as u8, member.removed as u8]);
        }

        for (msg_id, entry) in self.messages.messages() {
            hasher.update(msg_id);
            hasher.update(entry.author.as_bytes());
            hasher.update(&entry.ciphertext);
            hasher.update([entry.deleted as u8]);
            hasher.update(entry.last_edit_lamport.to_be_bytes());
            for ((reactor, emoji), reaction) in &entry.reactions {
                hasher.update(reactor.as_bytes());
                hasher.update(emoji.as_bytes());
                hasher.update([reaction.present as u8]);
            }
        }

        for (key, reg) in self.metadata.registers() {
            hasher.update([*key as u8]);
            hasher.update(&reg.value);
            hasher.update(reg.lamport.to_be_bytes());
        }

        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::crdt::ids::DeviceId;
    use crate::crdt::ops::{MsgAddPayload, Role};
    use crate::crypto::signing::generate_keypair;
    use proptest::prelude::*;

    fn group_of(pubkey: [u8; 32]) -> GroupId {
        GroupId::new(&DeviceId::from_pubkey(&pubkey), &[0x55; 32])
    }

    /// A small, fixed op set spanning every module (membership, message,
    /// metadata isn't needed here — covered by its own unit tests) used to
    /// check permutation invariance and idempotence of `apply`.
    fn fixed_ops() -> (GroupId, Vec<OpEnvelope>) {
        let (admin_pub, admin_priv) = generate_keypair();
        let (member_pub, member_priv) = generate_keypair();
        let gid = group_of(admin_pub);

        let create_op = OpEnvelope::create_signed(
            gid,
            OpType::GroupCreate,
            &GroupCreatePayload {
                group_name: "g".into(),
                initial_group_secret: [0x01; 32],
            },
            1,
            1,
            admin_pub,
            &admin_priv,
        )
        .unwrap();
        let invite_op = OpEnvelope::create_signed(
            gid,
            OpType::MemberInvite,
            &MemberInvitePayload {
                invited_device_id: DeviceId::from_pubkey(&member_pub),
                invited_pubkey: member_pub,
                role: Role::Member,
                wrapped_group_secret: vec![1, 2, 3],
            },
            2,
            1,
            admin_pub,
            &admin_priv,
        )
        .unwrap();
        let accept_op = OpEnvelope::create_signed(
            gid,
            OpType::MemberAccept,
            &MemberAcceptPayload {
                invite_op_id: invite_op.op_id,
            },
            3,
            1,
            member_pub,
            &member_priv,
        )
        .unwrap();
        let msg_op = OpEnvelope::create_signed(
            gid,
            OpType::MsgAdd,
            &MsgAddPayload {
                ciphertext: vec![9, 9],
                nonce: [0x02; 24],
            },
            4,
            1,
            member_pub,
            &member_priv,
        )
        .unwrap();
        let msg_op2 = OpEnvelope::create_signed(
            gid,
            OpType::MsgAdd,
            &MsgAddPayload {
                ciphertext: vec![1],
                nonce: [0x03; 24],
            },
            5,
            2,
            member_pub,
            &member_priv,
        )
        .unwrap();

        (gid, vec![create_op, invite_op, accept_op, msg_op, msg_op2])
    }

    proptest! {
        /// spec §8: convergence must not depend on apply order.
        #[test]
        fn state_hash_is_permutation_invariant(swaps in proptest::collection::vec(0usize..5, 0..20)) {
            let (gid, ops) = fixed_ops();
            let mut shuffled = ops.clone();
            for (i, s) in swaps.iter().enumerate() {
                let a = i % shuffled.len();
                let b = (i + s) % shuffled.len();
                shuffled.swap(a, b);
            }

            let mut canonical = GroupState::new(gid);
            canonical.apply(&ops);
            let mut permuted = GroupState::new(gid);
            permuted.apply(&shuffled);

            prop_assert_eq!(canonical.state_hash(), permuted.state_hash());
        }

        /// spec §8: re-applying any prefix of an already-applied log is a no-op.
        #[test]
        fn reapplying_a_prefix_twice_is_idempotent(prefix_len in 0usize..6) {
            let (gid, ops) = fixed_ops();
            let prefix_len = prefix_len.min(ops.len());
            let prefix = &ops[..prefix_len];

            let mut state = GroupState::new(gid);
            state.apply(prefix);
            let once = state.state_hash();
            state.apply(prefix);
            prop_assert_eq!(state.state_hash(), once);
        }
    }
}
