// src/wallet/key_management.rs
//! Secret key material kept in the wallet.
//!
//! - prover master secrets, addressed by name
//! - issuer credential-definition keys: public definition, private key and
//!   key-correctness proof, all stored under the credential definition id,
//!   plus staged replacements while a key rotation is in progress

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::credential::MasterSecret;
use crate::models::credential_definition::{
    CredentialDefinition, CredentialDefinitionPrivate, CredentialKeyCorrectnessProof,
    TemporaryCredentialDefinition,
};
use crate::models::schema::Schema;
use crate::wallet::records::SchemaId;
use crate::wallet::Wallet;
use crate::zkp::{CryptoProver, MasterSecret as CryptoMasterSecret};
use std::collections::HashMap;
use uuid::Uuid;

/// Everything the issuer keeps for one credential definition.
pub struct CredentialDefinitionKeys {
    pub cred_def: CredentialDefinition,
    pub cred_def_priv: CredentialDefinitionPrivate,
    pub key_correctness_proof: CredentialKeyCorrectnessProof,
}

pub struct KeyManager<'a> {
    wallet: &'a Wallet,
}

impl<'a> KeyManager<'a> {
    pub fn new(wallet: &'a Wallet) -> Self {
        KeyManager { wallet }
    }

    /// Generates and stores a new master secret.
    ///
    /// # Arguments
    /// * `id` - Name to store it under; a random UUID when `None`
    ///
    /// # Errors
    /// `MasterSecretDuplicateName` if a master secret with that name exists.
    pub fn create_master_secret(&self, id: Option<&str>) -> AnoncredsResult<String> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.wallet.record_exists::<MasterSecret>(&id)? {
            return Err(AnoncredsError::MasterSecretDuplicateName(id));
        }

        let value = CryptoProver::new_master_secret()?;
        self.wallet
            .add_object(&id, &MasterSecret { value }, HashMap::new())
            .map_err(|err| match err {
                AnoncredsError::WalletItemAlreadyExists(_) => AnoncredsError::MasterSecretDuplicateName(id.clone()),
                other => other,
            })?;
        Ok(id)
    }

    /// # Errors
    /// `WalletItemNotFound` if no master secret has that name.
    pub fn get_master_secret(&self, id: &str) -> AnoncredsResult<CryptoMasterSecret> {
        Ok(self.wallet.get_object::<MasterSecret>(id)?.value)
    }

    pub fn has_master_secret(&self, id: &str) -> AnoncredsResult<bool> {
        self.wallet.record_exists::<MasterSecret>(id)
    }

    /// Persists a new credential definition with its keys, the schema it was
    /// built for and the mapping between the two.
    ///
    /// # Errors
    /// `CredDefAlreadyExists` if another definition was stored under the same id first.
    pub fn store_credential_definition(&self, schema: &Schema, keys: &CredentialDefinitionKeys) -> AnoncredsResult<()> {
        let id = keys.cred_def.id();
        self.wallet
            .add_object(id, &keys.cred_def, HashMap::new())
            .map_err(|err| match err {
                AnoncredsError::WalletItemAlreadyExists(_) => AnoncredsError::CredDefAlreadyExists(id.to_string()),
                other => other,
            })?;
        self.wallet.add_object(id, &keys.cred_def_priv, HashMap::new())?;
        self.wallet.add_object(id, &keys.key_correctness_proof, HashMap::new())?;
        self.wallet.add_object(id, &SchemaId(schema.id().to_string()), HashMap::new())?;
        self.wallet.upsert_object(schema.id(), schema)
    }

    pub fn has_credential_definition(&self, id: &str) -> AnoncredsResult<bool> {
        self.wallet.record_exists::<CredentialDefinition>(id)
    }

    pub fn credential_definition(&self, id: &str) -> AnoncredsResult<CredentialDefinition> {
        self.wallet.get_object(id)
    }

    pub fn credential_definition_private(&self, id: &str) -> AnoncredsResult<CredentialDefinitionPrivate> {
        self.wallet.get_object(id)
    }

    pub fn key_correctness_proof(&self, id: &str) -> AnoncredsResult<CredentialKeyCorrectnessProof> {
        self.wallet.get_object(id)
    }

    pub fn schema_id(&self, cred_def_id: &str) -> AnoncredsResult<String> {
        Ok(self.wallet.get_object::<SchemaId>(cred_def_id)?.0)
    }

    /// Schema a credential definition was created for.
    pub fn schema(&self, cred_def_id: &str) -> AnoncredsResult<Schema> {
        let schema_id = self.schema_id(cred_def_id)?;
        self.wallet.get_object(&schema_id)
    }

    /// Stages replacement keys for `id`; a previously staged set is discarded.
    pub fn stage_rotation(&self, id: &str, keys: CredentialDefinitionKeys) -> AnoncredsResult<()> {
        let staged = TemporaryCredentialDefinition {
            cred_def: keys.cred_def,
            cred_def_priv: keys.cred_def_priv,
            cred_def_correctness_proof: keys.key_correctness_proof,
        };
        self.wallet.upsert_object(id, &staged)
    }

    /// Replaces the live keys of `id` with the staged ones.
    ///
    /// # Errors
    /// `WalletItemNotFound` if no rotation was started for `id`.
    pub fn apply_rotation(&self, id: &str) -> AnoncredsResult<()> {
        let staged = self.wallet.get_object::<TemporaryCredentialDefinition>(id)?;
        self.wallet.update_object(id, &staged.cred_def)?;
        self.wallet.update_object(id, &staged.cred_def_priv)?;
        self.wallet.update_object(id, &staged.cred_def_correctness_proof)?;
        self.wallet.delete_record::<TemporaryCredentialDefinition>(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::{WalletConfig, WalletService};

    fn test_wallet() -> Wallet {
        let service = WalletService::new();
        let config = WalletConfig::new("keys");
        service.create_wallet(&config).unwrap();
        let handle = service.open_wallet(&config).unwrap();
        service.get_wallet(handle).unwrap()
    }

    #[test]
    fn test_master_secret_names() {
        let wallet = test_wallet();
        let keys = KeyManager::new(&wallet);

        let named = keys.create_master_secret(Some("main")).unwrap();
        assert_eq!(named, "main");
        assert!(matches!(
            keys.create_master_secret(Some("main")),
            Err(AnoncredsError::MasterSecretDuplicateName(_))
        ));

        let generated = keys.create_master_secret(None).unwrap();
        assert!(Uuid::parse_str(&generated).is_ok());
        assert!(keys.has_master_secret(&generated).unwrap());
        assert!(keys.get_master_secret("main").is_ok());
        assert!(matches!(
            keys.get_master_secret("other"),
            Err(AnoncredsError::WalletItemNotFound(_))
        ));
    }

    #[test]
    fn test_concurrent_master_secrets_with_one_name() {
        let wallet = test_wallet();
        let results: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| scope.spawn(|| KeyManager::new(&wallet).create_master_secret(Some("shared"))))
                .collect();
            workers.into_iter().map(|worker| worker.join().unwrap()).collect()
        });

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, AnoncredsError::MasterSecretDuplicateName(name) if name == "shared")));
    }

    #[test]
    fn test_apply_rotation_requires_start() {
        let wallet = test_wallet();
        assert!(matches!(
            KeyManager::new(&wallet).apply_rotation("cred-def"),
            Err(AnoncredsError::WalletItemNotFound(_))
        ));
    }
}
