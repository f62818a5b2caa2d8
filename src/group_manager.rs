//! Orchestration: local identity, op creation, and the
//! fetch-lamport → sign → persist → apply → broadcast pipeline (spec §4.5, §5).
//!
//! `GroupManager` is the surface an embedding application actually talks
//! to. It owns the set of currently loaded `GroupState`s, generates and
//! signs ops on behalf of the local identity, and pushes them to whatever
//! store and transport the application supplied.
use std::collections::HashMap;

use log::{debug, info, warn};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::config::GroupCrdtConfig;
use crate::crdt::engine::GroupState;
use crate::crdt::ids::{ContentHash, DeviceId, GroupId, OpNonce};
use crate::crdt::ops::{
    GroupCreatePayload, MemberAcceptPayload, MemberInvitePayload, MemberRemovePayload,
    MetadataKey, MetadataSetPayload, MsgAddPayload, MsgDeletePayload, MsgEditPayload, OpEnvelope,
    OpType, ReactionSetPayload, RemoveReason, Role,
};
use crate::crypto::{csprng, encrypt_message, signing, wrap_group_secret};
use crate::error::CrdtError;
use crate::store::OpLogStore;
use crate::sync::{encode_broadcast, SyncChunk};
use crate::transport::Transport;

/// The local device's long-term keys: Ed25519 for signing ops, X25519 for
/// receiving wrapped group secrets.
pub struct Identity {
    pub device_id: DeviceId,
    pub signing_pub: [u8; 32],
    signing_priv: [u8; 32],
    pub x25519_pub: [u8; 32],
    x25519_priv: StaticSecret,
}

impl Identity {
    pub fn generate() -> Self {
        let (signing_pub, signing_priv) = signing::generate_keypair();
        let x25519_priv = StaticSecret::random_from_rng(rand::rngs::OsRng);
        let x25519_pub = PublicKey::from(&x25519_priv);
        Identity {
            device_id: DeviceId::from_pubkey(&signing_pub),
            signing_pub,
            signing_priv,
            x25519_pub: *x25519_pub.as_bytes(),
            x25519_priv,
        }
    }
}

/// Orchestrates one local identity's view across however many groups are
/// currently loaded, backed by an application-supplied `OpLogStore`.
pub struct GroupManager<S: OpLogStore> {
    identity: Identity,
    store: S,
    config: GroupCrdtConfig,
    loaded: HashMap<GroupId, GroupState>,
}

impl<S: OpLogStore> GroupManager<S> {
    pub fn new(identity: Identity, store: S) -> Self {
        GroupManager {
            identity,
            store,
            config: GroupCrdtConfig::default(),
            loaded: HashMap::new(),
        }
    }

    pub fn with_config(identity: Identity, store: S, config: GroupCrdtConfig) -> Self {
        GroupManager {
            identity,
            store,
            config,
            loaded: HashMap::new(),
        }
    }

    pub fn config(&self) -> &GroupCrdtConfig {
        &self.config
    }

    /// Load a group's full op log from the store and replay it, if not
    /// already loaded. Idempotent.
    pub fn ensure_loaded(&mut self, group_id: GroupId) -> Result<&mut GroupState, CrdtError> {
        if !self.loaded.contains_key(&group_id) {
            let ops = self.store.scan(&group_id)?;
            let mut state = GroupState::new(group_id);
            let outcome = state.apply(&ops);
            info!(
                "loaded group {}: {} ops applied, {} rejected",
                group_id, outcome.applied, outcome.rejected
            );
            for (op_id, reason) in &outcome.rejections {
                warn!("rejected op {} on load: {}", op_id, reason);
            }
            self.loaded.insert(group_id, state);
        }
        Ok(self.loaded.get_mut(&group_id).unwrap())
    }

    pub fn unload(&mut self, group_id: &GroupId) {
        self.loaded.remove(group_id);
    }

    pub fn group_state(&self, group_id: &GroupId) -> Option<&GroupState> {
        self.loaded.get(group_id)
    }

    /// Persist, apply locally, and broadcast a freshly created op. This is
    /// the single pipeline every mutating operation below funnels through.
    fn commit(
        &mut self,
        group_id: GroupId,
        op: OpEnvelope,
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        self.store.insert(group_id, &op)?;

        let state = self.ensure_loaded(group_id)?;
        let outcome = state.apply(std::slice::from_ref(&op));
        if outcome.applied == 0 {
            let reason = outcome
                .rejections
                .first()
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| "rejected".to_string());
            return Err(CrdtError::GroupNotLoaded(reason));
        }
        debug!("committed op {} (lamport {})", op.op_id, op.lamport);

        let wire = encode_broadcast(&op)?;
        for peer in peers {
            if !transport.send(peer, &wire) {
                warn!("broadcast to {} failed, relying on sync to catch up", peer);
            }
        }

        Ok(op)
    }

    fn next_nonce(&self) -> OpNonce {
        OpNonce(csprng::random_16())
    }

    pub fn create_group(
        &mut self,
        group_name: String,
        transport: &mut dyn Transport,
    ) -> Result<(GroupId, OpEnvelope), CrdtError> {
        let seed = csprng::random_32();
        let group_id = GroupId::new(&self.identity.device_id, &seed);
        let secret = csprng::random_32();

        let payload = GroupCreatePayload {
            group_name,
            initial_group_secret: secret,
        };
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::GroupCreate,
            &payload,
            1,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        let op = self.commit(group_id, op, &[], transport)?;
        Ok((group_id, op))
    }

    /// Invite a device to the group, broadcast the `MemberInvite` op to
    /// `peers`, then bootstrap the invitee directly at `invitee_address`
    /// with a `SyncChunk` carrying the group's entire op log so far — the
    /// invitee has no prior ops to sync from, so a regular incremental round
    /// can't get them started.
    #[allow(clippy::too_many_arguments)]
    pub fn invite(
        &mut self,
        group_id: GroupId,
        invited_device_id: DeviceId,
        invited_signing_pub: [u8; 32],
        invited_x25519_pub: [u8; 32],
        role: Role,
        group_secret: &[u8; 32],
        peers: &[&str],
        invitee_address: &str,
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let wrapped = wrap_group_secret(group_secret, &invited_x25519_pub)?;
        let payload = MemberInvitePayload {
            invited_device_id,
            invited_pubkey: invited_signing_pub,
            role,
            wrapped_group_secret: wrapped.0,
        };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::MemberInvite,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        let op = self.commit(group_id, op, peers, transport)?;

        let full_log = self.store.scan(&group_id)?;
        let chunk = SyncChunk::build(group_id, full_log)?;
        let bootstrap = chunk.encode()?;
        if !transport.send(invitee_address, &bootstrap) {
            warn!(
                "invite bootstrap to {} failed, invitee will need an explicit sync",
                invitee_address
            );
        }

        Ok(op)
    }

    pub fn accept_invite(
        &mut self,
        group_id: GroupId,
        invite_op_id: crate::crdt::ids::OpId,
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let payload = MemberAcceptPayload { invite_op_id };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::MemberAccept,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        self.commit(group_id, op, peers, transport)
    }

    pub fn remove_member(
        &mut self,
        group_id: GroupId,
        target_pubkey: [u8; 32],
        reason: RemoveReason,
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let payload = MemberRemovePayload {
            target_pubkey,
            reason,
        };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::MemberRemove,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        self.commit(group_id, op, peers, transport)
    }

    /// Encrypt `plaintext` under the group secret and append it as a
    /// `MsgAdd` op. Returns the created op; `op.derived_msg_id()` gives the
    /// message's id for later edit/delete/react calls.
    pub fn send_message(
        &mut self,
        group_id: GroupId,
        plaintext: &[u8],
        group_secret: &[u8; 32],
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let (ciphertext, nonce) = encrypt_message(plaintext, group_secret)?;
        let payload = MsgAddPayload { ciphertext, nonce };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::MsgAdd,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        self.commit(group_id, op, peers, transport)
    }

    pub fn edit_message(
        &mut self,
        group_id: GroupId,
        target_msg_id: [u8; 32],
        new_plaintext: &[u8],
        group_secret: &[u8; 32],
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let (new_ciphertext, new_nonce) = encrypt_message(new_plaintext, group_secret)?;
        let payload = MsgEditPayload {
            target_msg_id,
            new_ciphertext,
            new_nonce,
        };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::MsgEdit,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        self.commit(group_id, op, peers, transport)
    }

    pub fn delete_message(
        &mut self,
        group_id: GroupId,
        target_msg_id: [u8; 32],
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let payload = MsgDeletePayload { target_msg_id };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::MsgDelete,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        self.commit(group_id, op, peers, transport)
    }

    pub fn react(
        &mut self,
        group_id: GroupId,
        target_msg_id: [u8; 32],
        emoji: String,
        present: bool,
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let payload = ReactionSetPayload {
            target_msg_id,
            emoji,
            present,
        };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::ReactionSet,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        self.commit(group_id, op, peers, transport)
    }

    pub fn set_metadata(
        &mut self,
        group_id: GroupId,
        key: MetadataKey,
        value: Vec<u8>,
        peers: &[&str],
        transport: &mut dyn Transport,
    ) -> Result<OpEnvelope, CrdtError> {
        let payload = MetadataSetPayload { key, value };
        let lamport = self.ensure_loaded(group_id)?.next_lamport();
        let op = OpEnvelope::from_parts(
            group_id,
            OpType::MetadataSet,
            &payload,
            lamport,
            self.next_nonce(),
            self.identity.signing_pub,
            &self.identity.signing_priv,
        )?;
        self.commit(group_id, op, peers, transport)
    }

    /// Ingest an op received from a peer (broadcast or sync chunk): persist
    /// if new, then apply to the loaded state.
    pub fn ingest_remote_op(&mut self, group_id: GroupId, op: OpEnvelope) -> Result<(), CrdtError> {
        let inserted = self.store.insert(group_id, &op)?;
        if !inserted {
            debug!("duplicate op {} (content hash already stored)", op.op_id);
        }
        let state = self.ensure_loaded(group_id)?;
        let outcome = state.apply(std::slice::from_ref(&op));
        for (op_id, reason) in &outcome.rejections {
            warn!("rejected remote op {} for group {}: {}", op_id, group_id, reason);
        }
        Ok(())
    }

    /// Content hash an application can use to check an op it's about to
    /// ingest isn't a duplicate before paying to decode it.
    pub fn content_hash_of(op: &OpEnvelope) -> Result<ContentHash, CrdtError> {
        Ok(ContentHash::of(&op.encode()?))
    }
}
