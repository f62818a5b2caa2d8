//! Message CRDT — add, edit, delete, and react to messages (spec §4.4).
//!
//! Messages are stored as immutable entries keyed by `msg_id`, which is
//! derived deterministically from the `MsgAdd` op's `op_id` rather than
//! carried as a separate wire field. Edits use LWW (Last-Writer-Wins)
//! semantics by lamport with `op_id` tie-break (smaller wins). Deletes are
//! permanent tombstones — once deleted, edits are silently ignored.
//!
//! Reactions are a per-(device, emoji) map with boolean present/absent state.
use std::collections::BTreeMap;
use thiserror::Error;

use crate::crdt::ids::{DeviceId, OpId};
use crate::crdt::membership::MembershipState;
use crate::crdt::ops::{
    MsgAddPayload, MsgDeletePayload, MsgEditPayload, OpEnvelope, ReactionSetPayload, Role,
};

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("only the original author can edit this message")]
    NotMessageAuthor,

    #[error("not authorized to delete this message")]
    DeleteNotAuthorized,

    #[error("payload decode error: {0}")]
    PayloadDecode(String),

    #[error("author is not an active member of the group")]
    AuthorNotActive,
}

#[derive(Clone, Debug)]
pub struct MessageEntry {
    pub msg_id: [u8; 32],
    pub author: DeviceId,
    /// The `MsgAdd` op that created this message.
    pub create_op: OpId,
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; 24],
    /// Monotonic rank from the create op's lamport (spec §4.4: timestamp is
    /// not encoded in-op; it is presented as this rank, never wall-clock).
    pub timestamp_ms: u64,
    /// Tombstone flag — once true, edits are silently ignored.
    pub deleted: bool,
    /// Lamport of the last applied edit (for LWW).
    pub last_edit_lamport: u64,
    /// `op_id` of the last applied edit (for LWW tie-break).
    pub last_edit_op: Option<OpId>,
    /// Reactions: (reactor device, emoji string) → resolved LWW state.
    pub reactions: BTreeMap<(DeviceId, String), ReactionState>,
}

/// LWW-resolved state of a single (reactor, emoji) reaction: the same
/// lamport-then-`op_id` tie-break used for edits and metadata, so two
/// replicas that see the same reactions in different network orders
/// converge on the same `present` value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReactionState {
    pub present: bool,
    pub lamport: u64,
    pub op_id: OpId,
}

#[derive(Clone, Debug, Default)]
pub struct MessageState {
    pub(crate) messages: BTreeMap<[u8; 32], MessageEntry>,
}

impl MessageState {
    pub fn new() -> Self {
        MessageState::default()
    }

    pub fn messages(&self) -> &BTreeMap<[u8; 32], MessageEntry> {
        &self.messages
    }

    pub fn get_message(&self, msg_id: &[u8; 32]) -> Option<&MessageEntry> {
        self.messages.get(msg_id)
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Apply a `MsgAdd` op. Creates a new entry if its derived `msg_id`
    /// hasn't been seen yet; duplicate application is a silent no-op.
    /// Author must be an active member of the group.
    pub fn apply_msg_add(
        &mut self,
        op: &OpEnvelope,
        membership: &MembershipState,
    ) -> Result<(), MessageError> {
        if membership.get_active_member(&op.author_pubkey).is_none() {
            return Err(MessageError::AuthorNotActive);
        }

        let payload: MsgAddPayload = op
            .decode_payload()
            .map_err(|e| MessageError::PayloadDecode(e.to_string()))?;

        let msg_id = op.derived_msg_id();
        if self.messages.contains_key(&msg_id) {
            return Ok(());
        }

        let entry = MessageEntry {
            msg_id,
            author: DeviceId::from_pubkey(&op.author_pubkey),
            create_op: op.op_id,
            ciphertext: payload.ciphertext,
            nonce: payload.nonce,
            timestamp_ms: op.lamport,
            deleted: false,
            last_edit_lamport: op.lamport,
            last_edit_op: None,
            reactions: BTreeMap::new(),
        };

        self.messages.insert(msg_id, entry);
        Ok(())
    }

    /// Apply a `MsgEdit` op. LWW: only applies if this op supersedes the
    /// last edit. Author must be the original message author. Silently
    /// ignored if the message is deleted or this op is dominated by a
    /// newer edit.
    pub fn apply_msg_edit(&mut self, op: &OpEnvelope) -> Result<(), MessageError> {
        let payload: MsgEditPayload = op
            .decode_payload()
            .map_err(|e| MessageError::PayloadDecode(e.to_string()))?;

        let msg = self
            .messages
            .get(&payload.target_msg_id)
            .ok_or_else(|| MessageError::MessageNotFound(hex::encode(payload.target_msg_id)))?;

        let author = DeviceId::from_pubkey(&op.author_pubkey);
        if author != msg.author {
            return Err(MessageError::NotMessageAuthor);
        }

        if msg.deleted {
            return Ok(());
        }

        // Dominated (stale) if an existing edit (or the create op, absent
        // any edit) is newer by lamport, or ties and wins the tie-break —
        // smaller op_id wins, consistent with the rest of this engine.
        let dominated = op.lamport < msg.last_edit_lamport
            || (op.lamport == msg.last_edit_lamport
                && match &msg.last_edit_op {
                    Some(existing_op) => op.op_id >= *existing_op,
                    None => op.op_id >= msg.create_op,
                });

        if dominated {
            return Ok(());
        }

        let msg = self.messages.get_mut(&payload.target_msg_id).unwrap();
        msg.ciphertext = payload.new_ciphertext;
        msg.nonce = payload.new_nonce;
        msg.last_edit_lamport = op.lamport;
        msg.last_edit_op = Some(op.op_id);

        Ok(())
    }

    /// Apply a `MsgDelete` op. Tombstones the message permanently.
    /// Author must be the original message author or an active admin.
    /// Silently ignored if already deleted.
    pub fn apply_msg_delete(
        &mut self,
        op: &OpEnvelope,
        membership: &MembershipState,
    ) -> Result<(), MessageError> {
        let payload: MsgDeletePayload = op
            .decode_payload()
            .map_err(|e| MessageError::PayloadDecode(e.to_string()))?;

        let msg = self
            .messages
            .get(&payload.target_msg_id)
            .ok_or_else(|| MessageError::MessageNotFound(hex::encode(payload.target_msg_id)))?;

        if msg.deleted {
            return Ok(());
        }

        let author = DeviceId::from_pubkey(&op.author_pubkey);
        if author != msg.author {
            let is_admin = membership
                .get_active_member(&op.author_pubkey)
                .map(|m| m.role == Role::Admin)
                .unwrap_or(false);
            if !is_admin {
                return Err(MessageError::DeleteNotAuthorized);
            }
        }

        let msg = self.messages.get_mut(&payload.target_msg_id).unwrap();
        msg.deleted = true;

        Ok(())
    }

    /// Apply a `ReactionSet` op. LWW per (author, emoji): only applies if
    /// this op supersedes whatever is already recorded for that key (newer
    /// lamport wins, smaller `op_id` wins an exact tie — same rule as
    /// `apply_msg_edit`). Silently ignored if the message doesn't exist, is
    /// deleted, or the author isn't an active member.
    pub fn apply_reaction_set(
        &mut self,
        op: &OpEnvelope,
        membership: &MembershipState,
    ) -> Result<(), MessageError> {
        if membership.get_active_member(&op.author_pubkey).is_none() {
            return Err(MessageError::AuthorNotActive);
        }

        let payload: ReactionSetPayload = op
            .decode_payload()
            .map_err(|e| MessageError::PayloadDecode(e.to_string()))?;

        let msg = match self.messages.get_mut(&payload.target_msg_id) {
            Some(m) => m,
            None => return Ok(()),
        };

        if msg.deleted {
            return Ok(());
        }

        let author = DeviceId::from_pubkey(&op.author_pubkey);
        let key = (author, payload.emoji);

        let dominated = match msg.reactions.get(&key) {
            Some(existing) => {
                op.lamport < existing.lamport
                    || (op.lamport == existing.lamport && op.op_id >= existing.op_id)
            }
            None => false,
        };
        if dominated {
            return Ok(());
        }

        msg.reactions.insert(
            key,
            ReactionState {
                present: payload.present,
                lamport: op.lamport,
                op_id: op.op_id,
            },
        );

        Ok(())
    }
}
