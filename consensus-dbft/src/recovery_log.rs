//! Crash-safe record of the local Commit.
//!
//! A validator that restarts after broadcasting its Commit must come back
//! bound to the same proposal, or it could commit a second block at the
//! same height. Before a Commit leaves the engine, the proposal, the
//! preparations behind it and the Commit itself are written to a
//! [`RecoveryLog`]. [`ConsensusEngine::start`](crate::ConsensusEngine::start)
//! reads the record back and, when it belongs to the height being started,
//! rebuilds the committed context.

use {
    crate::{
        message::{DecodeLimits, MessageKind, SignedMessage},
        types::{BlockIndex, ViewNumber},
    },
    serde::{Deserialize, Serialize},
    std::{
        fs,
        io::{self, Write},
        path::{Path, PathBuf},
    },
    thiserror::Error,
};

/// The recovery log could not be written or read back.
#[derive(Error, Debug)]
pub enum RecoveryLogError {
    #[error("recovery log I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("recovery log is corrupt: {0}")]
    Corrupt(String),
}

/// Everything needed to resume a committed height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedContext {
    pub block_index: BlockIndex,
    pub view_number: ViewNumber,
    /// The primary's PrepareRequest followed by every PrepareResponse
    /// recorded when the Commit was made.
    pub preparations: Vec<SignedMessage>,
    /// The local Commit.
    pub commit: SignedMessage,
}

/// On-disk layout: messages are stored in their wire encoding.
#[derive(Serialize, Deserialize)]
struct Record {
    block_index: BlockIndex,
    view_number: ViewNumber,
    preparations: Vec<Vec<u8>>,
    commit: Vec<u8>,
}

impl SavedContext {
    pub fn encode(&self) -> Result<Vec<u8>, RecoveryLogError> {
        let encode = |message: &SignedMessage| {
            message
                .encode()
                .map_err(|err| RecoveryLogError::Corrupt(err.to_string()))
        };
        let record = Record {
            block_index: self.block_index,
            view_number: self.view_number,
            preparations: self
                .preparations
                .iter()
                .map(encode)
                .collect::<Result<_, _>>()?,
            commit: encode(&self.commit)?,
        };
        bincode::serialize(&record).map_err(|err| RecoveryLogError::Corrupt(err.to_string()))
    }

    pub fn decode(bytes: &[u8], limits: &DecodeLimits) -> Result<Self, RecoveryLogError> {
        let record: Record =
            bincode::deserialize(bytes).map_err(|err| RecoveryLogError::Corrupt(err.to_string()))?;
        let decode = |bytes: &Vec<u8>| {
            SignedMessage::decode(bytes, limits)
                .map_err(|err| RecoveryLogError::Corrupt(err.to_string()))
        };
        let saved = Self {
            block_index: record.block_index,
            view_number: record.view_number,
            preparations: record
                .preparations
                .iter()
                .map(decode)
                .collect::<Result<_, _>>()?,
            commit: decode(&record.commit)?,
        };
        if saved.commit.kind() != MessageKind::Commit {
            return Err(RecoveryLogError::Corrupt(format!(
                "expected a Commit, found {}",
                saved.commit.kind()
            )));
        }
        Ok(saved)
    }

    /// The PrepareRequest the Commit was made for.
    pub fn prepare_request(&self) -> Option<&SignedMessage> {
        self.preparations
            .iter()
            .find(|m| m.kind() == MessageKind::PrepareRequest)
    }
}

/// Durable storage for the latest [`SavedContext`]. Only the most recent
/// record matters; each save replaces the previous one.
pub trait RecoveryLog: Send {
    /// Durably store `saved`. The Commit is not broadcast unless this
    /// succeeds.
    fn save(&mut self, saved: &SavedContext) -> Result<(), RecoveryLogError>;

    /// The last saved record, if any.
    fn load(&self) -> Result<Option<SavedContext>, RecoveryLogError>;
}

/// Keeps the record in a single file, replaced atomically on every save.
#[derive(Debug)]
pub struct FileRecoveryLog {
    path: PathBuf,
    limits: DecodeLimits,
}

impl FileRecoveryLog {
    pub fn new(path: impl Into<PathBuf>, limits: DecodeLimits) -> Self {
        Self {
            path: path.into(),
            limits,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecoveryLog for FileRecoveryLog {
    fn save(&mut self, saved: &SavedContext) -> Result<(), RecoveryLogError> {
        let bytes = saved.encode()?;
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<SavedContext>, RecoveryLogError> {
        match fs::read(&self.path) {
            Ok(bytes) => SavedContext::decode(&bytes, &self.limits).map(Some),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            config::DbftConfig,
            message::{commit_sign_data, Commit, Payload, PrepareRequest, PrepareResponse},
            test_utils::{make_committee, sign_message},
        },
        assert_matches::assert_matches,
        solana_hash::Hash,
        solana_signer::Signer,
    };

    fn saved() -> SavedContext {
        let (keypairs, _) = make_committee(4);
        let magic = DbftConfig::default().network_magic;
        let request = PrepareRequest {
            version: 0,
            prev_hash: Hash::new_from_array([3; 32]),
            timestamp: 42,
            nonce: 9,
            transaction_hashes: vec![Hash::new_from_array([1; 32])],
        };
        let hash = request.to_proposal(7, 3).hash();
        SavedContext {
            block_index: 7,
            view_number: 0,
            preparations: vec![
                sign_message(&keypairs[3], magic, 7, 3, 0, Payload::PrepareRequest(request)),
                sign_message(
                    &keypairs[1],
                    magic,
                    7,
                    1,
                    0,
                    Payload::PrepareResponse(PrepareResponse {
                        preparation_hash: hash,
                    }),
                ),
            ],
            commit: sign_message(
                &keypairs[1],
                magic,
                7,
                1,
                0,
                Payload::Commit(Commit {
                    signature: keypairs[1].sign_message(&commit_sign_data(magic, &hash)),
                }),
            ),
        }
    }

    fn limits() -> DecodeLimits {
        DecodeLimits::from(&DbftConfig::default())
    }

    #[test]
    fn test_file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consensus.log");
        let record = saved();

        let mut log = FileRecoveryLog::new(&path, limits());
        assert_matches!(log.load(), Ok(None));
        log.save(&record).unwrap();

        let reopened = FileRecoveryLog::new(&path, limits());
        let loaded = reopened.load().unwrap().unwrap();
        assert_eq!(loaded, record);
        assert_eq!(
            loaded.prepare_request().map(SignedMessage::validator_index),
            Some(3)
        );
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_save_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = FileRecoveryLog::new(dir.path().join("consensus.log"), limits());
        let mut record = saved();
        log.save(&record).unwrap();
        record.preparations.truncate(1);
        log.save(&record).unwrap();
        assert_eq!(log.load().unwrap().unwrap().preparations.len(), 1);
    }

    #[test]
    fn test_corrupt_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("consensus.log");
        fs::write(&path, [0xFF; 7]).unwrap();
        let log = FileRecoveryLog::new(&path, limits());
        assert_matches!(log.load(), Err(RecoveryLogError::Corrupt(_)));
    }

    #[test]
    fn test_non_commit_record_rejected() {
        let mut record = saved();
        record.commit = record.preparations[1].clone();
        let bytes = record.encode().unwrap();
        assert_matches!(
            SavedContext::decode(&bytes, &limits()),
            Err(RecoveryLogError::Corrupt(_))
        );
    }
}
