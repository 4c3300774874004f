// src/services/credential_issuer.rs
//! Credential Issuer Service
//!
//! Covers everything an issuer does with its wallet:
//! - schemas and credential definitions (including key rotation)
//! - revocation registries, with tails written through blob storage
//! - offers, signed credentials and revocation
//!
//! Key generation is CPU-bound and runs on the blocking pool. Issuance and
//! revocation against a registry are serialized per service, since both are a
//! read-modify-write of the registry's index bookkeeping.

use crate::errors::{AnoncredsError, AnoncredsResult};
use crate::models::credential::{Credential, CredentialOffer, CredentialRequest, CredentialValues};
use crate::models::credential_definition::{
    CredentialDefinition, CredentialDefinitionConfig, CredentialDefinitionData,
    CredentialDefinitionPrivate, CredentialDefinitionV1, CredentialKeyCorrectnessProof,
    SignatureType,
};
use crate::models::did::validate_did;
use crate::models::revocation::{
    IssuanceType, RegistryType, RevocationRegistry, RevocationRegistryConfig,
    RevocationRegistryDefinition, RevocationRegistryDefinitionPrivate,
    RevocationRegistryDefinitionV1, RevocationRegistryDefinitionValue,
    RevocationRegistryDefinitionValuePublicKeys, RevocationRegistryDelta, RevocationRegistryInfo,
};
use crate::models::schema::{AttributeNames, Schema, SchemaV1};
use crate::storage::{BlobReaderHandle, BlobStorageService, BlobWriterHandle};
use crate::utils::serialization::clone_via_json;
use crate::wallet::key_management::{CredentialDefinitionKeys, KeyManager};
use crate::wallet::Wallet;
use crate::zkp::tails::{build_tails_blob, TailsReader};
use crate::zkp::{
    build_credential_schema, build_credential_values, build_non_credential_schema,
    check_values_cover_schema, new_nonce, CredentialPublicKey, CredentialSignature,
    CryptoCredentialValues, CryptoIssuer, RevocationRegistry as CryptoRevocationRegistry,
    RevocationRegistryDelta as CryptoRevocationRegistryDelta, SignatureCorrectnessProof, Witness,
};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task;

/// Issuer role over a shared blob storage service.
pub struct CredentialIssuer {
    blob_storage: Arc<BlobStorageService>,
    /// Serializes registry index allocation and revocation.
    revocation_lock: Mutex<()>,
}

impl CredentialIssuer {
    pub fn new(blob_storage: Arc<BlobStorageService>) -> Self {
        CredentialIssuer {
            blob_storage,
            revocation_lock: Mutex::new(()),
        }
    }

    /// Creates a schema for the given attributes. Nothing is stored.
    ///
    /// # Arguments
    /// * `issuer_did` - DID of the schema author
    /// * `name` / `version` - Schema name and version
    /// * `attr_names` - Attribute names, unique after normalization
    ///
    /// # Returns
    /// `(schema_id, schema)` where the id is `{did}:2:{name}:{version}`.
    pub fn create_schema(
        &self,
        issuer_did: &str,
        name: &str,
        version: &str,
        attr_names: AttributeNames,
    ) -> AnoncredsResult<(String, Schema)> {
        debug!("create_schema >>> issuer_did: {}, name: {}, version: {}", issuer_did, name, version);

        validate_did(issuer_did)?;
        attr_names.validate()?;

        let id = Schema::build_id(issuer_did, name, version);
        let schema = Schema::SchemaV1(SchemaV1 {
            id: id.clone(),
            name: name.to_string(),
            version: version.to_string(),
            attr_names,
            seq_no: None,
        });

        debug!("create_schema <<< id: {}", id);
        Ok((id, schema))
    }

    /// Generates CL keys for `schema` and stores them in the wallet.
    ///
    /// # Errors
    /// - `CredDefAlreadyExists` if the wallet already holds the resulting id
    /// - `InvalidStructure` for an unknown signature type
    pub async fn create_and_store_credential_def(
        &self,
        wallet: &Wallet,
        issuer_did: &str,
        schema: &Schema,
        tag: &str,
        signature_type: Option<&str>,
        config: &CredentialDefinitionConfig,
    ) -> AnoncredsResult<(String, CredentialDefinition)> {
        debug!(
            "create_and_store_credential_def >>> issuer_did: {}, schema_id: {}, tag: {}, config: {:?}",
            issuer_did,
            schema.id(),
            tag,
            config
        );

        validate_did(issuer_did)?;
        let signature_type = SignatureType::parse(signature_type)?;

        let Schema::SchemaV1(schema_v1) = schema;
        let schema_ref = schema_v1
            .seq_no
            .map(|seq_no| seq_no.to_string())
            .unwrap_or_else(|| schema_v1.id.clone());
        let id = CredentialDefinition::build_id(issuer_did, &schema_ref, signature_type, tag);

        let keys = KeyManager::new(wallet);
        if keys.has_credential_definition(&id)? {
            return Err(AnoncredsError::CredDefAlreadyExists(id));
        }

        let generated = generate_keys(
            &id,
            schema_v1,
            signature_type,
            tag,
            config.support_revocation,
        )
        .await?;
        let cred_def = clone_via_json(&generated.cred_def)?;
        keys.store_credential_definition(schema, &generated)?;

        info!("Created credential definition {}", id);
        Ok((id, cred_def))
    }

    /// Generates replacement keys for an existing credential definition and
    /// stages them until [`rotate_credential_def_apply`](Self::rotate_credential_def_apply).
    ///
    /// Revocation support is kept unless `config` says otherwise.
    pub async fn rotate_credential_def_start(
        &self,
        wallet: &Wallet,
        cred_def_id: &str,
        config: Option<&CredentialDefinitionConfig>,
    ) -> AnoncredsResult<CredentialDefinition> {
        debug!("rotate_credential_def_start >>> cred_def_id: {}", cred_def_id);

        let keys = KeyManager::new(wallet);
        let current = keys.credential_definition(cred_def_id)?;
        let Schema::SchemaV1(schema) = keys.schema(cred_def_id)?;
        let support_revocation = config
            .map(|config| config.support_revocation)
            .unwrap_or_else(|| current.supports_revocation());

        let current = current.v1();
        let generated = generate_keys(
            cred_def_id,
            &schema,
            current.signature_type,
            &current.tag,
            support_revocation,
        )
        .await?;
        let cred_def = clone_via_json(&generated.cred_def)?;
        keys.stage_rotation(cred_def_id, generated)?;

        debug!("rotate_credential_def_start <<<");
        Ok(cred_def)
    }

    /// Replaces the live keys of `cred_def_id` with the staged ones.
    pub async fn rotate_credential_def_apply(&self, wallet: &Wallet, cred_def_id: &str) -> AnoncredsResult<()> {
        debug!("rotate_credential_def_apply >>> cred_def_id: {}", cred_def_id);
        KeyManager::new(wallet).apply_rotation(cred_def_id)?;
        info!("Rotated keys of credential definition {}", cred_def_id);
        Ok(())
    }

    /// Creates a revocation registry for a revocable credential definition,
    /// writing its tails through `tails_writer`.
    ///
    /// # Returns
    /// `(rev_reg_id, definition, initial registry entry)`
    ///
    /// # Errors
    /// - `WalletItemAlreadyExists` if the registry id is taken
    /// - `InvalidStructure` if the credential definition is not revocable
    pub async fn create_and_store_revoc_reg(
        &self,
        wallet: &Wallet,
        issuer_did: &str,
        revoc_def_type: Option<&str>,
        tag: &str,
        cred_def_id: &str,
        config: &RevocationRegistryConfig,
        tails_writer: BlobWriterHandle,
    ) -> AnoncredsResult<(String, RevocationRegistryDefinition, RevocationRegistry)> {
        debug!(
            "create_and_store_revoc_reg >>> issuer_did: {}, tag: {}, cred_def_id: {}, config: {:?}",
            issuer_did, tag, cred_def_id, config
        );

        validate_did(issuer_did)?;
        let rev_reg_type = RegistryType::parse(revoc_def_type)?;
        let id = RevocationRegistryDefinition::build_id(issuer_did, cred_def_id, rev_reg_type, tag);

        if wallet.record_exists::<RevocationRegistryDefinition>(&id)? {
            return Err(AnoncredsError::WalletItemAlreadyExists(id));
        }

        let cred_def = KeyManager::new(wallet).credential_definition(cred_def_id)?;
        if !cred_def.supports_revocation() {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Credential definition {} does not support revocation",
                cred_def_id
            )));
        }

        let issuance_type = config.issuance_type();
        let max_cred_num = config.max_cred_num();
        let credential_pub_key = cred_def.public_key()?;

        let (rev_key_pub, rev_key_priv, rev_reg, tails_blob) = task::spawn_blocking(move || -> AnoncredsResult<_> {
            let (rev_key_pub, rev_key_priv, rev_reg, mut generator) =
                CryptoIssuer::new_revocation_registry_def(&credential_pub_key, max_cred_num, issuance_type.to_bool())?;
            let blob = build_tails_blob(&mut generator)?;
            Ok((rev_key_pub, rev_key_priv, rev_reg, blob))
        })
        .await??;

        let (tails_location, tails_hash) = self.blob_storage.write_blob(tails_writer, tails_blob).await?;

        let definition = RevocationRegistryDefinition::RevocationRegistryDefinitionV1(RevocationRegistryDefinitionV1 {
            id: id.clone(),
            revoc_def_type: rev_reg_type,
            tag: tag.to_string(),
            cred_def_id: cred_def_id.to_string(),
            value: RevocationRegistryDefinitionValue {
                issuance_type,
                max_cred_num,
                public_keys: RevocationRegistryDefinitionValuePublicKeys { accum_key: rev_key_pub },
                tails_hash,
                tails_location,
            },
        });
        let registry = RevocationRegistry::new(rev_reg);

        wallet.add_object(&id, &definition, HashMap::new())?;
        wallet.add_object(&id, &RevocationRegistryDefinitionPrivate { value: rev_key_priv }, HashMap::new())?;
        wallet.add_object(&id, &registry, HashMap::new())?;
        wallet.add_object(&id, &RevocationRegistryInfo::new(&id), HashMap::new())?;

        info!(
            "Created revocation registry {} ({:?}, max_cred_num {})",
            id, issuance_type, max_cred_num
        );
        Ok((id, clone_via_json(&definition)?, RevocationRegistry::new(registry.value().clone())))
    }

    /// Offers a credential of `cred_def_id` with a fresh nonce.
    pub async fn create_credential_offer(&self, wallet: &Wallet, cred_def_id: &str) -> AnoncredsResult<CredentialOffer> {
        debug!("create_credential_offer >>> cred_def_id: {}", cred_def_id);

        let keys = KeyManager::new(wallet);
        if !keys.has_credential_definition(cred_def_id)? {
            return Err(AnoncredsError::WalletItemNotFound(format!(
                "Credential definition {} not found",
                cred_def_id
            )));
        }
        let key_correctness_proof = keys.key_correctness_proof(cred_def_id)?.value;
        let schema_id = keys.schema_id(cred_def_id)?;

        let offer = CredentialOffer {
            schema_id,
            cred_def_id: cred_def_id.to_string(),
            key_correctness_proof,
            nonce: new_nonce()?,
        };

        debug!("create_credential_offer <<<");
        Ok(offer)
    }

    /// Signs a credential answering `request`.
    ///
    /// With `rev_reg_id` the credential takes the next index of that registry,
    /// whose tails are read through `tails_reader`.
    ///
    /// # Returns
    /// `(credential, cred_rev_id, delta)`; the delta is only returned for
    /// `ISSUANCE_ON_DEMAND` registries.
    ///
    /// # Errors
    /// - `InvalidStructure` if the request was not made for this offer, or the
    ///   values do not cover the schema
    /// - `RevocationRegistryFull` once every index has been issued
    pub async fn create_credential(
        &self,
        wallet: &Wallet,
        offer: &CredentialOffer,
        request: &CredentialRequest,
        values: &CredentialValues,
        rev_reg_id: Option<&str>,
        tails_reader: Option<BlobReaderHandle>,
    ) -> AnoncredsResult<(Credential, Option<String>, Option<RevocationRegistryDelta>)> {
        debug!(
            "create_credential >>> cred_def_id: {}, rev_reg_id: {:?}",
            offer.cred_def_id, rev_reg_id
        );

        if request.cred_def_id != offer.cred_def_id {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Credential request is for {} but the offer is for {}",
                request.cred_def_id, offer.cred_def_id
            )));
        }

        let keys = KeyManager::new(wallet);
        let cred_def = keys.credential_definition(&offer.cred_def_id)?;
        let cred_def_priv = keys.credential_definition_private(&offer.cred_def_id)?;
        let schema = keys.schema(&offer.cred_def_id)?;
        check_values_cover_schema(values, schema.attr_names())?;

        let credential_values = build_credential_values(values, None)?;
        let credential_pub_key = cred_def.public_key()?;

        let issued = match rev_reg_id {
            None => {
                let (signature, signature_correctness_proof) = CryptoIssuer::sign_credential(
                    &request.prover_did,
                    &request.blinded_ms,
                    &request.blinded_ms_correctness_proof,
                    &offer.nonce,
                    &request.nonce,
                    &credential_values,
                    &credential_pub_key,
                    &cred_def_priv.value,
                )?;
                Signed {
                    signature,
                    signature_correctness_proof,
                    revocation: None,
                }
            }
            Some(rev_reg_id) => {
                let tails_reader = tails_reader.ok_or_else(|| {
                    AnoncredsError::InvalidStructure("Tails reader handle is required for revocable credentials".to_string())
                })?;
                self.sign_revocable(
                    wallet,
                    rev_reg_id,
                    tails_reader,
                    request,
                    offer,
                    &credential_values,
                    &credential_pub_key,
                    &cred_def_priv,
                )
                .await?
            }
        };

        let (rev_reg, witness, cred_rev_id, delta) = match issued.revocation {
            Some(revocation) => (
                Some(revocation.rev_reg),
                Some(revocation.witness),
                Some(revocation.index.to_string()),
                revocation.delta.map(RevocationRegistryDelta::new),
            ),
            None => (None, None, None, None),
        };

        let credential = Credential {
            schema_id: schema.id().to_string(),
            cred_def_id: offer.cred_def_id.clone(),
            rev_reg_id: rev_reg_id.map(str::to_string),
            values: values.clone(),
            signature: issued.signature,
            signature_correctness_proof: issued.signature_correctness_proof,
            rev_reg,
            witness,
        };

        debug!("create_credential <<< cred_rev_id: {:?}", cred_rev_id);
        Ok((credential, cred_rev_id, delta))
    }

    #[allow(clippy::too_many_arguments)]
    async fn sign_revocable(
        &self,
        wallet: &Wallet,
        rev_reg_id: &str,
        tails_reader: BlobReaderHandle,
        request: &CredentialRequest,
        offer: &CredentialOffer,
        credential_values: &CryptoCredentialValues,
        credential_pub_key: &CredentialPublicKey,
        cred_def_priv: &CredentialDefinitionPrivate,
    ) -> AnoncredsResult<Signed> {
        let definition: RevocationRegistryDefinition = wallet.get_object(rev_reg_id)?;
        let definition = definition.v1();
        if definition.cred_def_id != offer.cred_def_id {
            return Err(AnoncredsError::InvalidStructure(format!(
                "Revocation registry {} belongs to {}, not {}",
                rev_reg_id, definition.cred_def_id, offer.cred_def_id
            )));
        }
        let tails = self.read_tails(tails_reader, definition).await?;
        let rev_key_priv: RevocationRegistryDefinitionPrivate = wallet.get_object(rev_reg_id)?;

        let issuance_type = definition.value.issuance_type;
        let max_cred_num = definition.value.max_cred_num;

        let _guard = self.revocation_lock.lock().await;
        let mut registry: RevocationRegistry = wallet.get_object(rev_reg_id)?;
        let mut info: RevocationRegistryInfo = wallet.get_object(rev_reg_id)?;

        let index = info.curr_id + 1;
        if index > max_cred_num {
            return Err(AnoncredsError::RevocationRegistryFull(format!(
                "Revocation registry {} has issued all {} indices",
                rev_reg_id, max_cred_num
            )));
        }

        let (signature, signature_correctness_proof, delta) = CryptoIssuer::sign_credential_with_revoc(
            &request.prover_did,
            &request.blinded_ms,
            &request.blinded_ms_correctness_proof,
            &offer.nonce,
            &request.nonce,
            credential_values,
            credential_pub_key,
            &cred_def_priv.value,
            index,
            max_cred_num,
            issuance_type.to_bool(),
            registry.value_mut(),
            &rev_key_priv.value,
            &tails,
        )?;

        info.curr_id = index;
        if issuance_type == IssuanceType::ISSUANCE_ON_DEMAND {
            info.used_ids.insert(index);
        }

        let (issued, revoked) = info.index_sets(issuance_type, max_cred_num);
        let genesis = CryptoRevocationRegistryDelta::from_parts(None, registry.value(), &issued, &revoked);
        let witness = Witness::new(index, max_cred_num, issuance_type.to_bool(), &genesis, &tails)?;

        wallet.update_object(rev_reg_id, &registry)?;
        wallet.update_object(rev_reg_id, &info)?;

        Ok(Signed {
            signature,
            signature_correctness_proof,
            revocation: Some(IssuedRevocation {
                index,
                rev_reg: registry.value().clone(),
                witness,
                delta: delta.filter(|_| issuance_type == IssuanceType::ISSUANCE_ON_DEMAND),
            }),
        })
    }

    /// Revokes the credential issued at `cred_rev_id` in `rev_reg_id`.
    ///
    /// # Errors
    /// `InvalidUserRevocId` if the index was never issued or is already revoked.
    pub async fn revoke_credential(
        &self,
        wallet: &Wallet,
        tails_reader: BlobReaderHandle,
        rev_reg_id: &str,
        cred_rev_id: &str,
    ) -> AnoncredsResult<RevocationRegistryDelta> {
        debug!("revoke_credential >>> rev_reg_id: {}, cred_rev_id: {}", rev_reg_id, cred_rev_id);

        let index: u32 = cred_rev_id.parse().map_err(|_| {
            AnoncredsError::InvalidStructure(format!("Cannot parse credential revocation id: {}", cred_rev_id))
        })?;

        let definition: RevocationRegistryDefinition = wallet.get_object(rev_reg_id)?;
        let definition = definition.v1();
        let tails = self.read_tails(tails_reader, definition).await?;

        let _guard = self.revocation_lock.lock().await;
        let mut registry: RevocationRegistry = wallet.get_object(rev_reg_id)?;
        let mut info: RevocationRegistryInfo = wallet.get_object(rev_reg_id)?;

        if index == 0 || index > info.curr_id {
            return Err(AnoncredsError::InvalidUserRevocId(format!(
                "Index {} was never issued by {}",
                index, rev_reg_id
            )));
        }
        let updated = match definition.value.issuance_type {
            IssuanceType::ISSUANCE_ON_DEMAND => info.used_ids.remove(&index),
            IssuanceType::ISSUANCE_BY_DEFAULT => info.used_ids.insert(index),
        };
        if !updated {
            return Err(AnoncredsError::InvalidUserRevocId(format!(
                "Index {} of {} is already revoked",
                index, rev_reg_id
            )));
        }

        let delta = CryptoIssuer::revoke_credential(
            registry.value_mut(),
            definition.value.max_cred_num,
            index,
            &tails,
        )?;

        wallet.update_object(rev_reg_id, &registry)?;
        wallet.update_object(rev_reg_id, &info)?;

        info!("Revoked index {} of {}", index, rev_reg_id);
        Ok(RevocationRegistryDelta::new(delta))
    }

    /// Folds `next` onto `first`. See [`RevocationRegistryDelta::merge`].
    pub fn merge_revocation_registry_deltas(
        &self,
        first: &RevocationRegistryDelta,
        next: &RevocationRegistryDelta,
    ) -> AnoncredsResult<RevocationRegistryDelta> {
        first.merge(next)
    }

    async fn read_tails(
        &self,
        reader: BlobReaderHandle,
        definition: &RevocationRegistryDefinitionV1,
    ) -> AnoncredsResult<TailsReader> {
        let blob = self
            .blob_storage
            .read_blob(reader, &definition.value.tails_location, &definition.value.tails_hash)
            .await?;
        TailsReader::from_blob(blob)
    }
}

struct Signed {
    signature: CredentialSignature,
    signature_correctness_proof: SignatureCorrectnessProof,
    revocation: Option<IssuedRevocation>,
}

struct IssuedRevocation {
    index: u32,
    rev_reg: CryptoRevocationRegistry,
    witness: Witness,
    delta: Option<CryptoRevocationRegistryDelta>,
}

/// Runs CL key generation for `schema` on the blocking pool.
async fn generate_keys(
    id: &str,
    schema: &SchemaV1,
    signature_type: SignatureType,
    tag: &str,
    support_revocation: bool,
) -> AnoncredsResult<CredentialDefinitionKeys> {
    let attr_names = schema.attr_names.clone();
    let (public_key, private_key, correctness_proof) = task::spawn_blocking(move || -> AnoncredsResult<_> {
        let credential_schema = build_credential_schema(&attr_names)?;
        let non_credential_schema = build_non_credential_schema()?;
        Ok(CryptoIssuer::new_credential_def(
            &credential_schema,
            &non_credential_schema,
            support_revocation,
        )?)
    })
    .await??;

    let cred_def = CredentialDefinition::CredentialDefinitionV1(CredentialDefinitionV1 {
        id: id.to_string(),
        schema_id: schema.id.clone(),
        signature_type,
        tag: tag.to_string(),
        value: CredentialDefinitionData {
            primary: public_key.get_primary_key()?,
            revocation: public_key.get_revocation_key()?,
        },
    });

    Ok(CredentialDefinitionKeys {
        cred_def,
        cred_def_priv: CredentialDefinitionPrivate { value: private_key },
        key_correctness_proof: CredentialKeyCorrectnessProof { value: correctness_proof },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DID: &str = "NcYxiDXkpYi6ov5FcYDi1e";

    fn issuer() -> CredentialIssuer {
        CredentialIssuer::new(Arc::new(BlobStorageService::new()))
    }

    #[test]
    fn test_create_schema() {
        let (id, schema) = issuer()
            .create_schema(DID, "gvt", "1.0", ["name", "age"].into_iter().collect())
            .unwrap();
        assert_eq!(id, "NcYxiDXkpYi6ov5FcYDi1e:2:gvt:1.0");
        assert_eq!(schema.attr_names().len(), 2);
    }

    #[test]
    fn test_create_schema_rejects_bad_input() {
        let issuer = issuer();
        assert!(issuer.create_schema(DID, "gvt", "1.0", AttributeNames::new()).is_err());
        assert!(issuer
            .create_schema("not a did", "gvt", "1.0", ["name"].into_iter().collect())
            .is_err());
    }

    #[tokio::test]
    async fn test_concurrent_cred_defs_with_one_id() {
        use crate::wallet::{WalletConfig, WalletService};

        let service = WalletService::new();
        let config = WalletConfig::new("issuer");
        service.create_wallet(&config).unwrap();
        let wallet = service.get_wallet(service.open_wallet(&config).unwrap()).unwrap();

        let issuer = issuer();
        let (_, schema) = issuer
            .create_schema(DID, "gvt", "1.0", ["name", "age"].into_iter().collect())
            .unwrap();
        let config = CredentialDefinitionConfig::default();

        let (first, second) = tokio::join!(
            issuer.create_and_store_credential_def(&wallet, DID, &schema, "tag", None, &config),
            issuer.create_and_store_credential_def(&wallet, DID, &schema, "tag", None, &config),
        );

        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|err| matches!(err, AnoncredsError::CredDefAlreadyExists(_))));
    }
}
