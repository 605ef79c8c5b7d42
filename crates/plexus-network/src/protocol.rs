//! Mesh wire messages and the fail-closed schema validator.
//!
//! Every inbound payload is a JSON object with a `type` discriminant. The
//! validator turns untyped input into a [`MeshMessage`] or a
//! [`ValidationError`] naming the failing field path and the rule it broke.
//! Nothing downstream ever sees a partially valid message.
//!
//! Outbound messages go through [`MeshMessage::encode`], which runs the same
//! validator over the serialized bytes so we never send what we would reject.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bytes::Bytes;
use plexus_core::constants::{GOSSIP_TTL_MAX, MAX_ENVELOPE_DEPTH, MAX_ID_LIST, MAX_MESSAGE_SIZE, MAX_PEER_LIST};
use plexus_core::error::{Constraint, ValidationError};
use plexus_core::types::{PeerId, TimestampMs, UserId};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::fmt::Hyphenated;
use uuid::Uuid;

/// Discriminant values accepted in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    GossipPeers,
    Pex,
    PostSyncRequest,
    PostSyncResponse,
    CommentSyncRequest,
    CommentSyncResponse,
    CommentNew,
    ChunkRequest,
    ChunkResponse,
    PresenceTicket,
    SignedEnvelope,
}

impl MessageKind {
    pub const ALL: [MessageKind; 11] = [
        Self::GossipPeers,
        Self::Pex,
        Self::PostSyncRequest,
        Self::PostSyncResponse,
        Self::CommentSyncRequest,
        Self::CommentSyncResponse,
        Self::CommentNew,
        Self::ChunkRequest,
        Self::ChunkResponse,
        Self::PresenceTicket,
        Self::SignedEnvelope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GossipPeers => "gossip_peers",
            Self::Pex => "pex",
            Self::PostSyncRequest => "post_sync_request",
            Self::PostSyncResponse => "post_sync_response",
            Self::CommentSyncRequest => "comment_sync_request",
            Self::CommentSyncResponse => "comment_sync_response",
            Self::CommentNew => "comment_new",
            Self::ChunkRequest => "chunk_request",
            Self::ChunkResponse => "chunk_response",
            Self::PresenceTicket => "presence_ticket",
            Self::SignedEnvelope => "signed_envelope",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

// ------------------------------------------------------------------
// Message bodies
// ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipPeer {
    pub peer_id: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub last_seen: TimestampMs,
    /// Sender's estimate of link quality in `[0, 1]`.
    pub quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GossipPeers {
    pub from: PeerId,
    pub peers: Vec<GossipPeer>,
    /// Remaining hops, `0..=10`.
    pub ttl: u8,
    pub timestamp: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pex {
    pub from: PeerId,
    pub peers: Vec<PeerId>,
    pub timestamp: TimestampMs,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSyncRequest {
    pub request_id: Uuid,
    pub from: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<TimestampMs>,
    pub known_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedPost {
    pub id: String,
    pub author_id: UserId,
    pub created_at: TimestampMs,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSyncResponse {
    pub request_id: Uuid,
    pub from: PeerId,
    pub posts: Vec<SyncedPost>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentSyncRequest {
    pub request_id: Uuid,
    pub from: PeerId,
    pub post_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<TimestampMs>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncedComment {
    pub id: String,
    pub post_id: String,
    pub author_id: UserId,
    pub created_at: TimestampMs,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentSyncResponse {
    pub request_id: Uuid,
    pub from: PeerId,
    pub post_id: String,
    pub comments: Vec<SyncedComment>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentNew {
    pub from: PeerId,
    pub comment: SyncedComment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkRequest {
    pub request_id: Uuid,
    pub from: PeerId,
    pub manifest_id: String,
    pub chunk_index: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub request_id: Uuid,
    pub from: PeerId,
    pub manifest_id: String,
    pub chunk_index: u32,
    /// Decoded chunk bytes. Base64 on the wire.
    #[serde(serialize_with = "serialize_base64")]
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceTicket {
    pub peer_id: PeerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub community: String,
    pub issued_at: TimestampMs,
    pub expires_at: TimestampMs,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub public_key: String,
    /// Base64 signature, kept in its wire encoding.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEnvelope {
    pub from: PeerId,
    pub timestamp: TimestampMs,
    pub payload: Box<MeshMessage>,
    pub public_key: String,
    /// Base64 signature, kept in its wire encoding.
    pub signature: String,
}

/// A validated mesh message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MeshMessage {
    GossipPeers(GossipPeers),
    Pex(Pex),
    PostSyncRequest(PostSyncRequest),
    PostSyncResponse(PostSyncResponse),
    CommentSyncRequest(CommentSyncRequest),
    CommentSyncResponse(CommentSyncResponse),
    CommentNew(CommentNew),
    ChunkRequest(ChunkRequest),
    ChunkResponse(ChunkResponse),
    PresenceTicket(PresenceTicket),
    SignedEnvelope(SignedEnvelope),
}

fn serialize_base64<S: Serializer>(data: &Bytes, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&BASE64.encode(data))
}

impl MeshMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::GossipPeers(_) => MessageKind::GossipPeers,
            Self::Pex(_) => MessageKind::Pex,
            Self::PostSyncRequest(_) => MessageKind::PostSyncRequest,
            Self::PostSyncResponse(_) => MessageKind::PostSyncResponse,
            Self::CommentSyncRequest(_) => MessageKind::CommentSyncRequest,
            Self::CommentSyncResponse(_) => MessageKind::CommentSyncResponse,
            Self::CommentNew(_) => MessageKind::CommentNew,
            Self::ChunkRequest(_) => MessageKind::ChunkRequest,
            Self::ChunkResponse(_) => MessageKind::ChunkResponse,
            Self::PresenceTicket(_) => MessageKind::PresenceTicket,
            Self::SignedEnvelope(_) => MessageKind::SignedEnvelope,
        }
    }

    /// The peer that claims to have produced this message.
    pub fn sender(&self) -> &PeerId {
        match self {
            Self::GossipPeers(m) => &m.from,
            Self::Pex(m) => &m.from,
            Self::PostSyncRequest(m) => &m.from,
            Self::PostSyncResponse(m) => &m.from,
            Self::CommentSyncRequest(m) => &m.from,
            Self::CommentSyncResponse(m) => &m.from,
            Self::CommentNew(m) => &m.from,
            Self::ChunkRequest(m) => &m.from,
            Self::ChunkResponse(m) => &m.from,
            Self::PresenceTicket(m) => &m.peer_id,
            Self::SignedEnvelope(m) => &m.from,
        }
    }

    /// Serialize to JSON bytes, refusing anything the inbound validator would reject.
    pub fn encode(&self) -> Result<Vec<u8>, ValidationError> {
        let bytes = serde_json::to_vec(self).map_err(|e| ValidationError::Malformed(e.to_string()))?;
        validate(self.kind(), &bytes)?;
        Ok(bytes)
    }
}

// ------------------------------------------------------------------
// Entry points
// ------------------------------------------------------------------

/// Returns `true` if a raw frame of `size` bytes may be parsed at all.
///
/// Oversized frames are rejected before deserialization.
pub fn check_message_size(size: usize) -> bool {
    size <= MAX_MESSAGE_SIZE
}

/// Validate a raw frame that must be a message of `kind`.
pub fn validate(kind: MessageKind, raw: &[u8]) -> Result<MeshMessage, ValidationError> {
    validate_value(Some(kind), &parse_json(raw)?)
}

/// Validate a raw frame of any kind.
pub fn validate_bytes(raw: &[u8]) -> Result<MeshMessage, ValidationError> {
    validate_value(None, &parse_json(raw)?)
}

/// Validate an already parsed JSON value. When `expected` is set, a different
/// discriminant is rejected.
pub fn validate_value(expected: Option<MessageKind>, value: &Value) -> Result<MeshMessage, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;
    validate_object(expected, obj, "", 0)
}

fn parse_json(raw: &[u8]) -> Result<Value, ValidationError> {
    if !check_message_size(raw.len()) {
        return Err(ValidationError::TooLarge { size: raw.len(), max: MAX_MESSAGE_SIZE });
    }
    serde_json::from_slice(raw).map_err(|e| ValidationError::Malformed(e.to_string()))
}

fn validate_object(
    expected: Option<MessageKind>,
    obj: &Map<String, Value>,
    prefix: &str,
    depth: usize,
) -> Result<MeshMessage, ValidationError> {
    let f = Fields::new(obj, prefix);
    let tag = match obj.get("type") {
        None | Some(Value::Null) => return Err(ValidationError::MissingType),
        Some(Value::String(s)) => s.as_str(),
        Some(_) => return Err(ValidationError::field(f.path("type"), Constraint::Type("a string"))),
    };
    let kind = MessageKind::parse(tag).ok_or_else(|| ValidationError::UnknownType(tag.to_string()))?;
    if let Some(want) = expected {
        if want != kind {
            return Err(ValidationError::KindMismatch {
                expected: want.as_str().to_string(),
                got: kind.as_str().to_string(),
            });
        }
    }

    let msg = match kind {
        MessageKind::GossipPeers => {
            let items = f.array("peers", MAX_PEER_LIST)?;
            let mut peers = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let p = f.item(item, "peers", i)?;
                peers.push(GossipPeer {
                    peer_id: PeerId::new(p.non_empty("peerId")?),
                    user_id: p.opt_non_empty("userId")?.map(UserId::new),
                    last_seen: p.timestamp("lastSeen")?,
                    quality: p.unit("quality")?,
                });
            }
            MeshMessage::GossipPeers(GossipPeers {
                from: f.peer("from")?,
                peers,
                ttl: f.int_in("ttl", 0, GOSSIP_TTL_MAX)? as u8,
                timestamp: f.timestamp("timestamp")?,
            })
        }
        MessageKind::Pex => {
            let items = f.array("peers", MAX_PEER_LIST)?;
            let mut peers = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                peers.push(PeerId::new(f.string_item(item, "peers", i)?));
            }
            MeshMessage::Pex(Pex {
                from: f.peer("from")?,
                peers,
                timestamp: f.timestamp("timestamp")?,
            })
        }
        MessageKind::PostSyncRequest => {
            let known_ids = match f.opt("knownIds") {
                None => Vec::new(),
                Some(_) => {
                    let items = f.array("knownIds", MAX_ID_LIST)?;
                    let mut ids = Vec::with_capacity(items.len());
                    for (i, item) in items.iter().enumerate() {
                        ids.push(f.string_item(item, "knownIds", i)?);
                    }
                    ids
                }
            };
            MeshMessage::PostSyncRequest(PostSyncRequest {
                request_id: f.uuid("requestId")?,
                from: f.peer("from")?,
                since: f.opt_timestamp("since")?,
                known_ids,
            })
        }
        MessageKind::PostSyncResponse => {
            let items = f.array("posts", MAX_ID_LIST)?;
            let mut posts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let p = f.item(item, "posts", i)?;
                posts.push(SyncedPost {
                    id: p.non_empty("id")?,
                    author_id: UserId::new(p.non_empty("authorId")?),
                    created_at: p.timestamp("createdAt")?,
                    content: p.string("content")?.to_string(),
                });
            }
            MeshMessage::PostSyncResponse(PostSyncResponse {
                request_id: f.uuid("requestId")?,
                from: f.peer("from")?,
                posts,
            })
        }
        MessageKind::CommentSyncRequest => MeshMessage::CommentSyncRequest(CommentSyncRequest {
            request_id: f.uuid("requestId")?,
            from: f.peer("from")?,
            post_id: f.non_empty("postId")?,
            since: f.opt_timestamp("since")?,
        }),
        MessageKind::CommentSyncResponse => {
            let items = f.array("comments", MAX_ID_LIST)?;
            let mut comments = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                comments.push(comment(&f.item(item, "comments", i)?)?);
            }
            MeshMessage::CommentSyncResponse(CommentSyncResponse {
                request_id: f.uuid("requestId")?,
                from: f.peer("from")?,
                post_id: f.non_empty("postId")?,
                comments,
            })
        }
        MessageKind::CommentNew => MeshMessage::CommentNew(CommentNew {
            from: f.peer("from")?,
            comment: comment(&f.object("comment")?)?,
        }),
        MessageKind::ChunkRequest => MeshMessage::ChunkRequest(ChunkRequest {
            request_id: f.uuid("requestId")?,
            from: f.peer("from")?,
            manifest_id: f.non_empty("manifestId")?,
            chunk_index: f.int_in("chunkIndex", 0, u32::MAX as u64)? as u32,
        }),
        MessageKind::ChunkResponse => MeshMessage::ChunkResponse(ChunkResponse {
            request_id: f.uuid("requestId")?,
            from: f.peer("from")?,
            manifest_id: f.non_empty("manifestId")?,
            chunk_index: f.int_in("chunkIndex", 0, u32::MAX as u64)? as u32,
            data: Bytes::from(f.base64("data")?),
        }),
        MessageKind::PresenceTicket => {
            let issued_at = f.timestamp("issuedAt")?;
            let expires_at = f.timestamp("expiresAt")?;
            if expires_at <= issued_at {
                return Err(ValidationError::field(f.path("expiresAt"), Constraint::After("issuedAt")));
            }
            let signature = f.non_empty("signature")?;
            f.check_base64("signature", &signature)?;
            MeshMessage::PresenceTicket(PresenceTicket {
                peer_id: f.peer("peerId")?,
                user_id: f.opt_non_empty("userId")?.map(UserId::new),
                community: f.non_empty("community")?,
                issued_at,
                expires_at,
                confidence: f.opt_unit("confidence")?,
                public_key: f.non_empty("publicKey")?,
                signature,
            })
        }
        MessageKind::SignedEnvelope => {
            if depth >= MAX_ENVELOPE_DEPTH {
                return Err(ValidationError::field(f.path("type"), Constraint::NestedEnvelope));
            }
            let payload_path = f.path("payload");
            let inner = f.get("payload")?.as_object().ok_or_else(|| {
                ValidationError::field(payload_path.clone(), Constraint::Type("an object"))
            })?;
            let payload = validate_object(None, inner, &payload_path, depth + 1)?;
            let signature = f.non_empty("signature")?;
            f.check_base64("signature", &signature)?;
            MeshMessage::SignedEnvelope(SignedEnvelope {
                from: f.peer("from")?,
                timestamp: f.timestamp("timestamp")?,
                payload: Box::new(payload),
                public_key: f.non_empty("publicKey")?,
                signature,
            })
        }
    };
    Ok(msg)
}

fn comment(c: &Fields<'_>) -> Result<SyncedComment, ValidationError> {
    Ok(SyncedComment {
        id: c.non_empty("id")?,
        post_id: c.non_empty("postId")?,
        author_id: UserId::new(c.non_empty("authorId")?),
        created_at: c.timestamp("createdAt")?,
        content: c.string("content")?.to_string(),
    })
}

// ------------------------------------------------------------------
// Field reader
// ------------------------------------------------------------------

/// Typed accessors over one JSON object, tracking the path for errors.
struct Fields<'a> {
    obj: &'a Map<String, Value>,
    prefix: String,
}

impl<'a> Fields<'a> {
    fn new(obj: &'a Map<String, Value>, prefix: &str) -> Self {
        Self { obj, prefix: prefix.to_string() }
    }

    fn path(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}.{key}", self.prefix)
        }
    }

    fn err(&self, key: &str, constraint: Constraint) -> ValidationError {
        ValidationError::field(self.path(key), constraint)
    }

    /// Absent and `null` are the same thing.
    fn opt(&self, key: &str) -> Option<&'a Value> {
        self.obj.get(key).filter(|v| !v.is_null())
    }

    fn get(&self, key: &str) -> Result<&'a Value, ValidationError> {
        self.opt(key).ok_or_else(|| self.err(key, Constraint::Required))
    }

    fn string(&self, key: &str) -> Result<&'a str, ValidationError> {
        self.get(key)?
            .as_str()
            .ok_or_else(|| self.err(key, Constraint::Type("a string")))
    }

    fn non_empty(&self, key: &str) -> Result<String, ValidationError> {
        let s = self.string(key)?;
        if s.trim().is_empty() {
            return Err(self.err(key, Constraint::NonEmpty));
        }
        Ok(s.to_string())
    }

    fn opt_non_empty(&self, key: &str) -> Result<Option<String>, ValidationError> {
        match self.opt(key) {
            None => Ok(None),
            Some(_) => self.non_empty(key).map(Some),
        }
    }

    fn peer(&self, key: &str) -> Result<PeerId, ValidationError> {
        self.non_empty(key).map(PeerId::new)
    }

    fn timestamp(&self, key: &str) -> Result<TimestampMs, ValidationError> {
        let v = self.get(key)?;
        match v.as_u64() {
            Some(0) => Err(self.err(key, Constraint::PositiveTimestamp)),
            Some(n) => Ok(n),
            None if v.is_number() => Err(self.err(key, Constraint::PositiveTimestamp)),
            None => Err(self.err(key, Constraint::Type("a number"))),
        }
    }

    fn opt_timestamp(&self, key: &str) -> Result<Option<TimestampMs>, ValidationError> {
        match self.opt(key) {
            None => Ok(None),
            Some(_) => self.timestamp(key).map(Some),
        }
    }

    fn int_in(&self, key: &str, min: u64, max: u64) -> Result<u64, ValidationError> {
        let v = self.get(key)?;
        let range = Constraint::Range { min: min as f64, max: max as f64 };
        match v.as_u64() {
            Some(n) if (min..=max).contains(&n) => Ok(n),
            Some(_) => Err(self.err(key, range)),
            None if v.is_number() => Err(self.err(key, range)),
            None => Err(self.err(key, Constraint::Type("an integer"))),
        }
    }

    fn unit(&self, key: &str) -> Result<f64, ValidationError> {
        let x = self
            .get(key)?
            .as_f64()
            .ok_or_else(|| self.err(key, Constraint::Type("a number")))?;
        if !(0.0..=1.0).contains(&x) {
            return Err(self.err(key, Constraint::Range { min: 0.0, max: 1.0 }));
        }
        Ok(x)
    }

    fn opt_unit(&self, key: &str) -> Result<Option<f64>, ValidationError> {
        match self.opt(key) {
            None => Ok(None),
            Some(_) => self.unit(key).map(Some),
        }
    }

    /// Hyphenated form only; simple, braced and `urn:` spellings are rejected.
    fn uuid(&self, key: &str) -> Result<Uuid, ValidationError> {
        let s = self.string(key)?;
        if s.len() != Hyphenated::LENGTH {
            return Err(self.err(key, Constraint::Uuid));
        }
        Uuid::parse_str(s).map_err(|_| self.err(key, Constraint::Uuid))
    }

    fn check_base64(&self, key: &str, s: &str) -> Result<(), ValidationError> {
        BASE64
            .decode(s)
            .map(|_| ())
            .map_err(|_| self.err(key, Constraint::Base64))
    }

    fn base64(&self, key: &str) -> Result<Vec<u8>, ValidationError> {
        BASE64
            .decode(self.string(key)?)
            .map_err(|_| self.err(key, Constraint::Base64))
    }

    fn array(&self, key: &str, max: usize) -> Result<&'a Vec<Value>, ValidationError> {
        let items = self
            .get(key)?
            .as_array()
            .ok_or_else(|| self.err(key, Constraint::Type("an array")))?;
        if items.len() > max {
            return Err(self.err(key, Constraint::MaxItems(max)));
        }
        Ok(items)
    }

    fn object(&self, key: &str) -> Result<Fields<'a>, ValidationError> {
        let obj = self
            .get(key)?
            .as_object()
            .ok_or_else(|| self.err(key, Constraint::Type("an object")))?;
        Ok(Fields::new(obj, &self.path(key)))
    }

    fn item(&self, item: &'a Value, key: &str, index: usize) -> Result<Fields<'a>, ValidationError> {
        let path = format!("{}[{index}]", self.path(key));
        let obj = item
            .as_object()
            .ok_or_else(|| ValidationError::field(path.clone(), Constraint::Type("an object")))?;
        Ok(Fields::new(obj, &path))
    }

    fn string_item(&self, item: &Value, key: &str, index: usize) -> Result<String, ValidationError> {
        let path = format!("{}[{index}]", self.path(key));
        match item.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
            Some(_) => Err(ValidationError::field(path, Constraint::NonEmpty)),
            None => Err(ValidationError::field(path, Constraint::Type("a string"))),
        }
    }
}
