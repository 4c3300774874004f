// src/errors.rs
//! Error taxonomy for the anoncreds engine.
//!
//! Every failure surfaces as an [`AnoncredsError`], which maps onto a stable
//! numeric [`ErrorCode`] grouped by range:
//! - 100s: common (invalid parameter, invalid state, invalid structure, I/O)
//! - 200s: wallet
//! - 300s: pool / ledger
//! - 400s: anoncreds
//! - 500s: crypto

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ursa::errors::{UrsaCryptoError, UrsaCryptoErrorKind};

/// Numeric error codes shared by every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,

    CommonInvalidParam1 = 100,
    CommonInvalidParam2 = 101,
    CommonInvalidParam3 = 102,
    CommonInvalidParam4 = 103,
    CommonInvalidParam5 = 104,
    CommonInvalidParam6 = 105,
    CommonInvalidParam7 = 106,
    CommonInvalidParam8 = 107,
    CommonInvalidParam9 = 108,
    CommonInvalidParam10 = 109,
    CommonInvalidParam11 = 110,
    CommonInvalidParam12 = 111,
    CommonInvalidState = 112,
    CommonInvalidStructure = 113,
    CommonIOError = 114,

    WalletInvalidHandle = 200,
    WalletUnknownTypeError = 201,
    WalletTypeAlreadyRegisteredError = 202,
    WalletAlreadyExistsError = 203,
    WalletNotFoundError = 204,
    WalletIncompatiblePoolError = 205,
    WalletAlreadyOpenedError = 206,
    WalletAccessFailed = 207,
    WalletInputError = 208,
    WalletDecodingError = 209,
    WalletStorageError = 210,
    WalletEncryptionError = 211,
    WalletItemNotFound = 212,
    WalletItemAlreadyExists = 213,
    WalletQueryError = 214,

    PoolLedgerNotCreatedError = 300,
    PoolLedgerInvalidPoolHandle = 301,
    PoolLedgerTerminated = 302,
    LedgerNoConsensusError = 303,
    LedgerInvalidTransaction = 304,
    LedgerSecurityError = 305,

    AnoncredsRevocationRegistryFullError = 400,
    AnoncredsInvalidUserRevocId = 401,
    AnoncredsAccumulatorIsFull = 402,
    AnoncredsNotIssuedError = 403,
    AnoncredsMasterSecretDuplicateNameError = 404,
    AnoncredsProofRejected = 405,
    AnoncredsCredentialRevoked = 406,
    AnoncredsCredDefAlreadyExistsError = 407,

    UnknownCryptoTypeError = 500,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Maps a 1-based parameter position onto `CommonInvalidParamN`.
    pub fn invalid_param(position: u32) -> ErrorCode {
        match position {
            1 => ErrorCode::CommonInvalidParam1,
            2 => ErrorCode::CommonInvalidParam2,
            3 => ErrorCode::CommonInvalidParam3,
            4 => ErrorCode::CommonInvalidParam4,
            5 => ErrorCode::CommonInvalidParam5,
            6 => ErrorCode::CommonInvalidParam6,
            7 => ErrorCode::CommonInvalidParam7,
            8 => ErrorCode::CommonInvalidParam8,
            9 => ErrorCode::CommonInvalidParam9,
            10 => ErrorCode::CommonInvalidParam10,
            11 => ErrorCode::CommonInvalidParam11,
            _ => ErrorCode::CommonInvalidParam12,
        }
    }
}

/// Every failure the engine can report.
#[derive(Debug, Error)]
pub enum AnoncredsError {
    #[error("invalid parameter {0}: {1}")]
    InvalidParam(u32, String),

    #[error("invalid library state: {0}")]
    InvalidState(String),

    #[error("invalid structure: {0}")]
    InvalidStructure(String),

    #[error("io error: {0}")]
    IOError(String),

    #[error("invalid wallet handle")]
    WalletInvalidHandle,

    #[error("unknown wallet storage type: {0}")]
    WalletUnknownType(String),

    #[error("wallet storage type already registered: {0}")]
    WalletTypeAlreadyRegistered(String),

    #[error("wallet already exists: {0}")]
    WalletAlreadyExists(String),

    #[error("wallet not found: {0}")]
    WalletNotFound(String),

    #[error("wallet already opened: {0}")]
    WalletAlreadyOpened(String),

    #[error("wallet storage error: {0}")]
    WalletStorage(String),

    #[error("wallet item not found: {0}")]
    WalletItemNotFound(String),

    #[error("wallet item already exists: {0}")]
    WalletItemAlreadyExists(String),

    #[error("wallet query error: {0}")]
    WalletQuery(String),

    #[error("revocation registry is full: {0}")]
    RevocationRegistryFull(String),

    #[error("invalid revocation index: {0}")]
    InvalidUserRevocId(String),

    #[error("accumulator is full: {0}")]
    AccumulatorIsFull(String),

    #[error("credential not issued: {0}")]
    NotIssued(String),

    #[error("master secret already exists: {0}")]
    MasterSecretDuplicateName(String),

    #[error("proof rejected: {0}")]
    ProofRejected(String),

    #[error("credential revoked: {0}")]
    CredentialRevoked(String),

    #[error("credential definition already exists: {0}")]
    CredDefAlreadyExists(String),

    #[error("unknown crypto type: {0}")]
    UnknownCryptoType(String),
}

impl AnoncredsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AnoncredsError::InvalidParam(position, _) => ErrorCode::invalid_param(*position),
            AnoncredsError::InvalidState(_) => ErrorCode::CommonInvalidState,
            AnoncredsError::InvalidStructure(_) => ErrorCode::CommonInvalidStructure,
            AnoncredsError::IOError(_) => ErrorCode::CommonIOError,
            AnoncredsError::WalletInvalidHandle => ErrorCode::WalletInvalidHandle,
            AnoncredsError::WalletUnknownType(_) => ErrorCode::WalletUnknownTypeError,
            AnoncredsError::WalletTypeAlreadyRegistered(_) => ErrorCode::WalletTypeAlreadyRegisteredError,
            AnoncredsError::WalletAlreadyExists(_) => ErrorCode::WalletAlreadyExistsError,
            AnoncredsError::WalletNotFound(_) => ErrorCode::WalletNotFoundError,
            AnoncredsError::WalletAlreadyOpened(_) => ErrorCode::WalletAlreadyOpenedError,
            AnoncredsError::WalletStorage(_) => ErrorCode::WalletStorageError,
            AnoncredsError::WalletItemNotFound(_) => ErrorCode::WalletItemNotFound,
            AnoncredsError::WalletItemAlreadyExists(_) => ErrorCode::WalletItemAlreadyExists,
            AnoncredsError::WalletQuery(_) => ErrorCode::WalletQueryError,
            AnoncredsError::RevocationRegistryFull(_) => ErrorCode::AnoncredsRevocationRegistryFullError,
            AnoncredsError::InvalidUserRevocId(_) => ErrorCode::AnoncredsInvalidUserRevocId,
            AnoncredsError::AccumulatorIsFull(_) => ErrorCode::AnoncredsAccumulatorIsFull,
            AnoncredsError::NotIssued(_) => ErrorCode::AnoncredsNotIssuedError,
            AnoncredsError::MasterSecretDuplicateName(_) => ErrorCode::AnoncredsMasterSecretDuplicateNameError,
            AnoncredsError::ProofRejected(_) => ErrorCode::AnoncredsProofRejected,
            AnoncredsError::CredentialRevoked(_) => ErrorCode::AnoncredsCredentialRevoked,
            AnoncredsError::CredDefAlreadyExists(_) => ErrorCode::AnoncredsCredDefAlreadyExistsError,
            AnoncredsError::UnknownCryptoType(_) => ErrorCode::UnknownCryptoTypeError,
        }
    }

    /// `InvalidState` signals a defect in the engine; retrying will not help.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AnoncredsError::InvalidState(_))
    }
}

impl From<serde_json::Error> for AnoncredsError {
    fn from(err: serde_json::Error) -> Self {
        AnoncredsError::InvalidStructure(err.to_string())
    }
}

impl From<std::io::Error> for AnoncredsError {
    fn from(err: std::io::Error) -> Self {
        AnoncredsError::IOError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AnoncredsError {
    fn from(err: tokio::task::JoinError) -> Self {
        AnoncredsError::InvalidState(format!("background task failed: {}", err))
    }
}

impl From<UrsaCryptoError> for AnoncredsError {
    fn from(err: UrsaCryptoError) -> Self {
        let message = err.to_string();
        match err.kind() {
            UrsaCryptoErrorKind::InvalidState => AnoncredsError::InvalidState(message),
            UrsaCryptoErrorKind::InvalidStructure => AnoncredsError::InvalidStructure(message),
            UrsaCryptoErrorKind::IOError => AnoncredsError::IOError(message),
            UrsaCryptoErrorKind::InvalidRevocationAccumulatorIndex => {
                AnoncredsError::InvalidUserRevocId(message)
            }
            UrsaCryptoErrorKind::RevocationAccumulatorIsFull => {
                AnoncredsError::RevocationRegistryFull(message)
            }
            UrsaCryptoErrorKind::ProofRejected => AnoncredsError::ProofRejected(message),
            UrsaCryptoErrorKind::CredentialRevoked => AnoncredsError::CredentialRevoked(message),
            _ => AnoncredsError::InvalidStructure(message),
        }
    }
}

pub type AnoncredsResult<T> = Result<T, AnoncredsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_ranges() {
        assert_eq!(AnoncredsError::InvalidStructure("x".into()).code().as_i32(), 113);
        assert_eq!(AnoncredsError::WalletItemNotFound("x".into()).code().as_i32(), 212);
        assert_eq!(AnoncredsError::InvalidUserRevocId("x".into()).code().as_i32(), 401);
        assert_eq!(AnoncredsError::CredDefAlreadyExists("x".into()).code().as_i32(), 407);
        assert_eq!(AnoncredsError::InvalidParam(3, "x".into()).code().as_i32(), 102);
        assert_eq!(AnoncredsError::InvalidParam(40, "x".into()).code().as_i32(), 111);
    }

    #[test]
    fn only_invalid_state_is_fatal() {
        assert!(AnoncredsError::InvalidState("bug".into()).is_fatal());
        assert!(!AnoncredsError::ProofRejected("no".into()).is_fatal());
        assert!(!AnoncredsError::WalletInvalidHandle.is_fatal());
    }

    #[test]
    fn json_errors_become_invalid_structure() {
        let err: AnoncredsError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::CommonInvalidStructure);
    }

    #[test]
    fn crypto_errors_map_by_kind() {
        let err: AnoncredsError = ursa::errors::err_msg(
            UrsaCryptoErrorKind::InvalidRevocationAccumulatorIndex,
            "index out of range",
        )
        .into();
        assert_eq!(err.code(), ErrorCode::AnoncredsInvalidUserRevocId);

        let err: AnoncredsError =
            ursa::errors::err_msg(UrsaCryptoErrorKind::RevocationAccumulatorIsFull, "full").into();
        assert_eq!(err.code(), ErrorCode::AnoncredsRevocationRegistryFullError);
    }
}
