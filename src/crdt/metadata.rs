//! Metadata CRDT — LWW (Last-Writer-Wins) registers for group properties
//! (spec §4.4).
//!
//! Tracks group name, avatar, and topic as independent LWW registers. Each
//! register stores the latest value, the lamport of the writer, and the
//! `op_id` for deterministic tie-breaking.
use std::collections::BTreeMap;
use thiserror::Error;

use crate::crdt::ids::OpId;
use crate::crdt::membership::MembershipState;
use crate::crdt::ops::{MetadataKey, MetadataSetPayload, OpEnvelope};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("payload decode error: {0}")]
    PayloadDecode(String),

    #[error("author is not an active member of the group")]
    AuthorNotActive,
}

#[derive(Clone, Debug)]
pub struct LWWRegister {
    pub value: Vec<u8>,
    pub lamport: u64,
    pub writer_op: OpId,
}

#[derive(Clone, Debug, Default)]
pub struct MetadataState {
    registers: BTreeMap<MetadataKey, LWWRegister>,
}

impl MetadataState {
    pub fn new() -> Self {
        MetadataState::default()
    }

    pub fn registers(&self) -> &BTreeMap<MetadataKey, LWWRegister> {
        &self.registers
    }

    pub fn get(&self, key: &MetadataKey) -> Option<&LWWRegister> {
        self.registers.get(key)
    }

    pub fn name(&self) -> Option<&str> {
        self.registers
            .get(&MetadataKey::Name)
            .and_then(|r| std::str::from_utf8(&r.value).ok())
    }

    pub fn topic(&self) -> Option<&str> {
        self.registers
            .get(&MetadataKey::Topic)
            .and_then(|r| std::str::from_utf8(&r.value).ok())
    }

    /// Apply a `MetadataSet` op. LWW: updates only if this op supersedes the
    /// current writer — newer lamport wins; on an exact lamport tie the
    /// smaller `op_id` wins (smaller author pubkey first). Author must be an
    /// active member of the group.
    pub fn apply_metadata_set(
        &mut self,
        op: &OpEnvelope,
        membership: &MembershipState,
    ) -> Result<(), MetadataError> {
        if membership.get_active_member(&op.author_pubkey).is_none() {
            return Err(MetadataError::AuthorNotActive);
        }

        let payload: MetadataSetPayload = op
            .decode_payload()
            .map_err(|e| MetadataError::PayloadDecode(e.to_string()))?;

        let should_update = match self.registers.get(&payload.key) {
            None => true,
            Some(reg) => {
                op.lamport > reg.lamport || (op.lamport == reg.lamport && op.op_id < reg.writer_op)
            }
        };

        if should_update {
            self.registers.insert(
                payload.key,
                LWWRegister {
                    value: payload.value,
                    lamport: op.lamport,
                    writer_op: op.op_id,
                },
            );
        }

        Ok(())
    }
}
