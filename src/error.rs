//! Crate-wide error type (spec §7 error policy).
//!
//! Individual modules define focused `thiserror` enums (`CodecError`,
//! `OpError`, `MembershipError`, `MessageError`, `MetadataError`,
//! `StoreError`, `SyncError`, `SecretWrapError`, `AeadError`,
//! `SigningError`, `EngineError`); `CrdtError` unifies them for call sites
//! — like `GroupManager` — that cut across more than one subsystem.
use thiserror::Error;

use crate::crdt::codec::CodecError;
use crate::crdt::engine::EngineError;
use crate::crdt::membership::MembershipError;
use crate::crdt::messages::MessageError;
use crate::crdt::metadata::MetadataError;
use crate::crdt::ops::OpError;
use crate::crypto::{AeadError, SecretWrapError, SigningError};
use crate::store::StoreError;
use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum CrdtError {
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Op(#[from] OpError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Membership(#[from] MembershipError),
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Aead(#[from] AeadError),
    #[error(transparent)]
    SecretWrap(#[from] SecretWrapError),
    #[error(transparent)]
    Signing(#[from] SigningError),
    #[error("group {0} is not loaded")]
    GroupNotLoaded(String),
    #[error("local identity is not an active member of this group")]
    NotAMember,
}
