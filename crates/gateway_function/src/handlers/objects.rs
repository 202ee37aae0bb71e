//! Object storage operations.
//!
//! Tenant-private containers live in the private storage account and are
//! reached only with the broker's container-scoped access string. Public
//! containers live in the public account and are reached with this
//! service's own identity.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use gateway_core::contract::{PresignedUrlResponse, StatusResponse, UploadFromUrlResponse};
use gateway_core::registry::BucketVisibility;
use gateway_core::signing::{sign_blob_read, SasWindow, DEFAULT_READ_URL_TTL_SECS};
use gateway_core::GatewayError;

use super::Gateway;
use crate::adapters::blob_store::{
    BlobContent, BlobCredential, BlobLocation, PutOutcome, WriteMode,
};
use crate::config::required;

impl Gateway {
    /// Decodes and writes the object, replacing whatever is stored at `key`.
    pub fn upload_inline(
        &self,
        bucket: &str,
        key: &str,
        base64_content: &str,
        principal: &str,
    ) -> Result<StatusResponse, GatewayError> {
        let container = self.registry.bucket(bucket)?;
        let content = STANDARD
            .decode(base64_content.trim())
            .map_err(|error| GatewayError::BadRequest(format!("Invalid base64_content: {error}")))?;
        let (location, credential) = self.object_access(container, key, principal)?;

        self.backends
            .blobs
            .put(
                &location,
                BlobContent::from_bytes(content),
                WriteMode::Overwrite,
                &credential,
            )?;
        tracing::info!(component = "objects", event = "object_uploaded", container, key);
        Ok(StatusResponse {
            status: format!("Blob {key} uploaded to container {container} successfully."),
        })
    }

    /// Streams `source_url` into `(bucket, key)` unless an object is already
    /// there. Never overwrites: a concurrent writer that wins the race turns
    /// this call into an "already exists" answer.
    pub fn upload_from_url(
        &self,
        bucket: &str,
        key: &str,
        source_url: &str,
        principal: &str,
    ) -> Result<UploadFromUrlResponse, GatewayError> {
        let container = self.registry.bucket(bucket)?;
        let (location, credential) = self.object_access(container, key, principal)?;

        if self.backends.blobs.exists(&location, &credential)? {
            tracing::info!(component = "objects", event = "object_exists", container, key);
            return Ok(UploadFromUrlResponse {
                object_already_exists: true,
            });
        }

        let content = self.backends.fetcher.fetch(source_url)?;
        let outcome =
            self.backends
                .blobs
                .put(&location, content, WriteMode::CreateIfAbsent, &credential)?;
        tracing::info!(
            component = "objects",
            event = "object_copied",
            container,
            key,
            raced = outcome == PutOutcome::AlreadyExists,
        );
        Ok(UploadFromUrlResponse {
            object_already_exists: outcome == PutOutcome::AlreadyExists,
        })
    }

    /// Read URL for one object. Private containers reuse the broker's
    /// pre-computed access string; public ones are signed locally with a
    /// delegation key, valid from one minute ago until `expires_in` seconds
    /// from now.
    pub fn presign_read(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Option<u64>,
        principal: &str,
    ) -> Result<PresignedUrlResponse, GatewayError> {
        let container = self.registry.bucket(bucket)?;
        let ttl_secs = expires_in.unwrap_or(DEFAULT_READ_URL_TTL_SECS);
        if ttl_secs == 0 {
            return Err(GatewayError::BadRequest(
                "expires_in must be positive".to_string(),
            ));
        }

        let (location, credential) = self.object_access(container, key, principal)?;
        let mut url = location.url()?;
        let query = match credential {
            BlobCredential::Sas(sas) => sas,
            BlobCredential::ServiceIdentity => {
                let window = SasWindow::starting_at(Utc::now(), ttl_secs);
                let delegation_key = self
                    .backends
                    .blobs
                    .user_delegation_key(&location.account, window)?;
                sign_blob_read(&location.account, container, key, &delegation_key, window)?
            }
        };
        url.set_query(Some(query.trim_start_matches('?')));

        tracing::info!(component = "objects", event = "read_url_issued", container, key);
        Ok(PresignedUrlResponse { url: url.into() })
    }

    fn object_access(
        &self,
        container: &str,
        key: &str,
        principal: &str,
    ) -> Result<(BlobLocation, BlobCredential), GatewayError> {
        if key.is_empty() {
            return Err(GatewayError::missing_field("key"));
        }
        match self.registry.container_visibility(container) {
            BucketVisibility::TenantPrivate => {
                let account = required(&self.config.storage_account, "STORAGE_ACCOUNT_NAME")?;
                let sas = self.backends.broker.scoped_token(principal, container)?;
                Ok((
                    BlobLocation::new(account, container, key),
                    BlobCredential::Sas(sas),
                ))
            }
            BucketVisibility::Public => {
                let account = required(
                    &self.config.public_storage_account,
                    "PUBLIC_STORAGE_ACCOUNT_NAME",
                )?;
                Ok((
                    BlobLocation::new(account, container, key),
                    BlobCredential::ServiceIdentity,
                ))
            }
        }
    }
}
