// src/wallet/records.rs
//! Wallet record types for every anoncreds artifact kept in a wallet.

use crate::models::credential::{Credential, CredentialAttrTagPolicy, MasterSecret};
use crate::models::credential_definition::{
    CredentialDefinition, CredentialDefinitionPrivate, CredentialKeyCorrectnessProof,
    TemporaryCredentialDefinition,
};
use crate::models::revocation::{
    RevocationRegistry, RevocationRegistryDefinition, RevocationRegistryDefinitionPrivate,
    RevocationRegistryInfo,
};
use crate::models::schema::Schema;
use crate::wallet::WalletRecord;
use serde::{Deserialize, Serialize};

/// Schema id a credential definition was created for, stored under the
/// credential definition id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SchemaId(pub String);

macro_rules! wallet_record {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl WalletRecord for $ty {
                const TYPE: &'static str = $name;
            }
        )*
    };
}

wallet_record! {
    Schema => "Anoncreds::Schema",
    SchemaId => "Anoncreds::SchemaId",
    CredentialDefinition => "Anoncreds::CredentialDefinition",
    CredentialDefinitionPrivate => "Anoncreds::CredentialDefinitionPrivateKey",
    CredentialKeyCorrectnessProof => "Anoncreds::CredentialDefinitionCorrectnessProof",
    TemporaryCredentialDefinition => "Anoncreds::TemporaryCredentialDefinition",
    RevocationRegistryDefinition => "Anoncreds::RevocationRegistryDefinition",
    RevocationRegistryDefinitionPrivate => "Anoncreds::RevocationRegistryDefinitionPrivate",
    RevocationRegistry => "Anoncreds::RevocationRegistry",
    RevocationRegistryInfo => "Anoncreds::RevocationRegistryInfo",
    MasterSecret => "Anoncreds::MasterSecret",
    Credential => "Anoncreds::Credential",
    CredentialAttrTagPolicy => "Anoncreds::CredentialAttrTagPolicy",
}
