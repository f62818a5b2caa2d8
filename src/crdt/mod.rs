//! CRDT-based group messaging — conflict-free replicated state for
//! membership, messages, and metadata (spec §3, §4).
pub mod clock;
pub mod codec;
pub mod engine;
pub mod ids;
pub mod limits;
pub mod membership;
pub mod messages;
pub mod metadata;
pub mod ops;

pub use clock::LamportClock;
pub use codec::{CodecError, RawEnvelope, ENVELOPE_VERSION, MAX_OP_BYTES};
pub use engine::{ApplyOutcome, EngineError, GroupState};
pub use ids::{ContentHash, DeviceId, GroupId, OpId, OpNonce};
pub use membership::{MemberRecord, MembershipError, MembershipState};
pub use messages::{MessageEntry, MessageError, MessageState};
pub use metadata::{LWWRegister, MetadataError, MetadataState};
pub use ops::{
    GroupCreatePayload, MemberAcceptPayload, MemberInvitePayload, MemberRemovePayload,
    MetadataKey, MetadataSetPayload, MsgAddPayload, MsgDeletePayload, MsgEditPayload, OpEnvelope,
    OpError, OpType, ReactionSetPayload, RemoveReason, Role,
};
