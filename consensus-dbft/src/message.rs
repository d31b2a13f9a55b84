//! Wire format for dBFT consensus messages.
//!
//! Every message on the consensus channel has the same shape:
//!
//! ```text
//! [block_index: u32-le][validator_index: u8][view_number: u8][kind: u8]
//! [payload: kind-specific, bincode fixint little-endian]
//! [signature: 64 bytes]
//! ```
//!
//! The trailing signature is the sender's signature over
//! `network_magic (u32-le) || header || payload` and doubles as the
//! "invocation script" that recovery messages carry for each compacted
//! entry. Variable-length arrays are prefixed with a u64 length; decoding
//! checks every length against the configured maxima and rejects unknown
//! kind or reason bytes instead of defaulting.

use {
    crate::{
        config::DbftConfig,
        error::WireError,
        types::{BlockIndex, BlockProposal, ChangeViewReason, ValidatorIndex, ViewNumber},
    },
    bincode::Options,
    serde::{Deserialize, Serialize},
    solana_hash::Hash,
    solana_signature::Signature,
    std::fmt,
};

/// Length of the trailing ed25519 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of the fixed envelope header in bytes.
pub const HEADER_LENGTH: usize = 7;

/// Smallest possible encoded message: header plus signature. Real
/// payloads are never empty, so this is a strict lower bound.
pub const MIN_MESSAGE_SIZE: usize = HEADER_LENGTH + SIGNATURE_LENGTH;

// ── Message kinds ───────────────────────────────────────────────────────────

/// One-byte discriminant identifying the payload that follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    ChangeView = 0x00,
    PrepareRequest = 0x20,
    PrepareResponse = 0x21,
    Commit = 0x30,
    RecoveryRequest = 0x40,
    RecoveryMessage = 0x41,
}

impl TryFrom<u8> for MessageKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0x00 => MessageKind::ChangeView,
            0x20 => MessageKind::PrepareRequest,
            0x21 => MessageKind::PrepareResponse,
            0x30 => MessageKind::Commit,
            0x40 => MessageKind::RecoveryRequest,
            0x41 => MessageKind::RecoveryMessage,
            other => return Err(WireError::UnknownKind(other)),
        })
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::ChangeView => write!(f, "ChangeView"),
            MessageKind::PrepareRequest => write!(f, "PrepareRequest"),
            MessageKind::PrepareResponse => write!(f, "PrepareResponse"),
            MessageKind::Commit => write!(f, "Commit"),
            MessageKind::RecoveryRequest => write!(f, "RecoveryRequest"),
            MessageKind::RecoveryMessage => write!(f, "RecoveryMessage"),
        }
    }
}

// ── Payloads ────────────────────────────────────────────────────────────────

/// Request to leave the sender's current view for `new_view_number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeView {
    pub new_view_number: ViewNumber,
    pub timestamp: u64,
    pub reason: ChangeViewReason,
}

/// The primary's block proposal for a view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareRequest {
    pub version: u32,
    pub prev_hash: Hash,
    pub timestamp: u64,
    pub nonce: u64,
    pub transaction_hashes: Vec<Hash>,
}

impl PrepareRequest {
    /// The block skeleton this request proposes at `block_index`.
    pub fn to_proposal(&self, block_index: BlockIndex, primary_index: ValidatorIndex) -> BlockProposal {
        BlockProposal {
            version: self.version,
            prev_hash: self.prev_hash,
            block_index,
            primary_index,
            timestamp: self.timestamp,
            nonce: self.nonce,
            transaction_hashes: self.transaction_hashes.clone(),
        }
    }
}

impl From<&BlockProposal> for PrepareRequest {
    fn from(proposal: &BlockProposal) -> Self {
        Self {
            version: proposal.version,
            prev_hash: proposal.prev_hash,
            timestamp: proposal.timestamp,
            nonce: proposal.nonce,
            transaction_hashes: proposal.transaction_hashes.clone(),
        }
    }
}

/// A backup's acceptance of the proposal with the given hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareResponse {
    pub preparation_hash: Hash,
}

/// Signature over the finalized block hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub signature: Signature,
}

/// Asks peers to send their view of the current height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub timestamp: u64,
}

/// A ChangeView stripped of its envelope. `original_view_number` is the
/// view the sender was in when it signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeViewCompact {
    pub validator_index: ValidatorIndex,
    pub original_view_number: ViewNumber,
    pub new_view_number: ViewNumber,
    pub timestamp: u64,
    pub reason: ChangeViewReason,
    pub invocation: Signature,
}

/// A PrepareRequest or PrepareResponse stripped of its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparationCompact {
    pub validator_index: ValidatorIndex,
    pub invocation: Signature,
}

/// A Commit stripped of its envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCompact {
    pub view_number: ViewNumber,
    pub validator_index: ValidatorIndex,
    pub signature: Signature,
    pub invocation: Signature,
}

/// Batched resend of everything the sender knows about the current height.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryMessage {
    pub change_views: Vec<ChangeViewCompact>,
    /// Present when the sender knows the proposal for its view.
    pub prepare_request: Option<PrepareRequest>,
    /// Present when the proposal is unknown but PrepareResponses were seen.
    pub preparation_hash: Option<Hash>,
    pub preparations: Vec<PreparationCompact>,
    pub commits: Vec<CommitCompact>,
}

/// Kind-specific message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    ChangeView(ChangeView),
    PrepareRequest(PrepareRequest),
    PrepareResponse(PrepareResponse),
    Commit(Commit),
    RecoveryRequest(RecoveryRequest),
    RecoveryMessage(RecoveryMessage),
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::ChangeView(_) => MessageKind::ChangeView,
            Payload::PrepareRequest(_) => MessageKind::PrepareRequest,
            Payload::PrepareResponse(_) => MessageKind::PrepareResponse,
            Payload::Commit(_) => MessageKind::Commit,
            Payload::RecoveryRequest(_) => MessageKind::RecoveryRequest,
            Payload::RecoveryMessage(_) => MessageKind::RecoveryMessage,
        }
    }
}

// ── Envelope ────────────────────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct Header {
    block_index: BlockIndex,
    validator_index: ValidatorIndex,
    view_number: ViewNumber,
    kind: u8,
}

/// An unsigned consensus message: envelope plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusMessage {
    pub block_index: BlockIndex,
    pub validator_index: ValidatorIndex,
    pub view_number: ViewNumber,
    pub payload: Payload,
}

impl ConsensusMessage {
    pub fn new(
        block_index: BlockIndex,
        validator_index: ValidatorIndex,
        view_number: ViewNumber,
        payload: Payload,
    ) -> Self {
        Self {
            block_index,
            validator_index,
            view_number,
            payload,
        }
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Header and payload bytes, without the signature.
    pub fn encode_unsigned(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(64);
        let header = Header {
            block_index: self.block_index,
            validator_index: self.validator_index,
            view_number: self.view_number,
            kind: self.kind() as u8,
        };
        write_options().serialize_into(&mut buf, &header)?;
        let options = write_options();
        match &self.payload {
            Payload::ChangeView(p) => options.serialize_into(&mut buf, p)?,
            Payload::PrepareRequest(p) => options.serialize_into(&mut buf, p)?,
            Payload::PrepareResponse(p) => options.serialize_into(&mut buf, p)?,
            Payload::Commit(p) => options.serialize_into(&mut buf, p)?,
            Payload::RecoveryRequest(p) => options.serialize_into(&mut buf, p)?,
            Payload::RecoveryMessage(p) => options.serialize_into(&mut buf, p)?,
        }
        Ok(buf)
    }

    /// The exact bytes a sender signs: network magic followed by the
    /// unsigned encoding.
    pub fn sign_data(&self, network_magic: u32) -> Result<Vec<u8>, WireError> {
        let unsigned = self.encode_unsigned()?;
        let mut data = Vec::with_capacity(unsigned.len().saturating_add(4));
        data.extend_from_slice(&network_magic.to_le_bytes());
        data.extend_from_slice(&unsigned);
        Ok(data)
    }
}

/// Bytes a validator signs to commit to a block.
pub fn commit_sign_data(network_magic: u32, block_hash: &Hash) -> Vec<u8> {
    let mut data = Vec::with_capacity(36);
    data.extend_from_slice(&network_magic.to_le_bytes());
    data.extend_from_slice(block_hash.as_ref());
    data
}

/// A consensus message together with its sender's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub message: ConsensusMessage,
    pub signature: Signature,
}

impl SignedMessage {
    pub fn new(message: ConsensusMessage, signature: Signature) -> Self {
        Self { message, signature }
    }

    pub fn kind(&self) -> MessageKind {
        self.message.kind()
    }

    pub fn block_index(&self) -> BlockIndex {
        self.message.block_index
    }

    pub fn validator_index(&self) -> ValidatorIndex {
        self.message.validator_index
    }

    pub fn view_number(&self) -> ViewNumber {
        self.message.view_number
    }

    /// Full wire encoding: unsigned bytes followed by the signature.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = self.message.encode_unsigned()?;
        buf.extend_from_slice(self.signature.as_ref());
        Ok(buf)
    }

    /// Identity of this exact message, used to answer each recovery
    /// request only once.
    pub fn hash(&self) -> Result<Hash, WireError> {
        let unsigned = self.message.encode_unsigned()?;
        Ok(solana_sha256_hasher::hashv(&[
            &unsigned,
            self.signature.as_ref(),
        ]))
    }

    /// Decode a message, enforcing `limits` before any consensus logic sees
    /// it.
    pub fn decode(bytes: &[u8], limits: &DecodeLimits) -> Result<Self, WireError> {
        if bytes.len() > limits.max_message_size {
            return Err(WireError::MessageTooLarge {
                size: bytes.len(),
                max: limits.max_message_size,
            });
        }
        if bytes.len() < MIN_MESSAGE_SIZE {
            return Err(WireError::Truncated {
                len: bytes.len(),
                min: MIN_MESSAGE_SIZE,
            });
        }
        let (body, signature) = bytes.split_at(bytes.len().saturating_sub(SIGNATURE_LENGTH));
        let signature = <[u8; SIGNATURE_LENGTH]>::try_from(signature)
            .map(Signature::from)
            .map_err(|_| WireError::Truncated {
                len: bytes.len(),
                min: MIN_MESSAGE_SIZE,
            })?;

        let options = read_options(limits.max_message_size);
        let mut reader = body;
        let header: Header = options.deserialize_from(&mut reader)?;
        let kind = MessageKind::try_from(header.kind)?;
        let payload = match kind {
            MessageKind::ChangeView => Payload::ChangeView(options.deserialize_from(&mut reader)?),
            MessageKind::PrepareRequest => {
                let request: PrepareRequest = options.deserialize_from(&mut reader)?;
                limits.check_transactions(&request)?;
                Payload::PrepareRequest(request)
            }
            MessageKind::PrepareResponse => {
                Payload::PrepareResponse(options.deserialize_from(&mut reader)?)
            }
            MessageKind::Commit => Payload::Commit(options.deserialize_from(&mut reader)?),
            MessageKind::RecoveryRequest => {
                Payload::RecoveryRequest(options.deserialize_from(&mut reader)?)
            }
            MessageKind::RecoveryMessage => {
                let recovery: RecoveryMessage = options.deserialize_from(&mut reader)?;
                limits.check_recovery(&recovery)?;
                Payload::RecoveryMessage(recovery)
            }
        };
        if !reader.is_empty() {
            return Err(WireError::TrailingBytes(reader.len()));
        }

        Ok(Self {
            message: ConsensusMessage {
                block_index: header.block_index,
                validator_index: header.validator_index,
                view_number: header.view_number,
                payload,
            },
            signature,
        })
    }
}

/// Upper bounds enforced while decoding untrusted bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    pub max_message_size: usize,
    pub max_transactions: usize,
    pub max_validators: usize,
}

impl DecodeLimits {
    fn check_transactions(&self, request: &PrepareRequest) -> Result<(), WireError> {
        check_len(
            "transaction_hashes",
            request.transaction_hashes.len(),
            self.max_transactions,
        )
    }

    fn check_recovery(&self, recovery: &RecoveryMessage) -> Result<(), WireError> {
        check_len("change_views", recovery.change_views.len(), self.max_validators)?;
        check_len("preparations", recovery.preparations.len(), self.max_validators)?;
        check_len("commits", recovery.commits.len(), self.max_validators)?;
        if let Some(request) = &recovery.prepare_request {
            self.check_transactions(request)?;
        }
        Ok(())
    }
}

impl From<&DbftConfig> for DecodeLimits {
    fn from(config: &DbftConfig) -> Self {
        Self {
            max_message_size: config.max_message_size,
            max_transactions: config.max_transactions_per_block,
            max_validators: config.max_validators,
        }
    }
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), WireError> {
    if len > max {
        return Err(WireError::TooManyEntries { field, len, max });
    }
    Ok(())
}

fn write_options() -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn read_options(limit: usize) -> impl Options + Copy {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(limit as u64)
}
