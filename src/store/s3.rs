//! S3-based blob storage backend.
//!
//! Blobs live at `<prefix><namespace>/<name>`; labels are carried as JSON in
//! a single object metadata entry so their keys keep their case.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{ReconcilerError, Result, StoreError};

use super::blob::{BlobKey, BlobStore, Labels, PutOutcome, StoredBlob};

/// Object metadata entry holding the labels.
const LABELS_METADATA: &str = "labels";

/// S3 error codes meaning a conditional create lost against an existing object.
const PRECONDITION_CODES: &[&str] = &["PreconditionFailed", "ConditionalRequestConflict"];

/// S3-based blob store.
#[derive(Debug)]
pub struct S3BlobStore {
    /// S3 client.
    client: Client,
    /// Bucket name.
    bucket: String,
    /// Key prefix.
    prefix: String,
}

fn normalize_prefix(prefix: Option<&str>) -> String {
    prefix
        .map(|p| {
            let p = p.trim_matches('/');
            if p.is_empty() {
                String::new()
            } else {
                format!("{p}/")
            }
        })
        .unwrap_or_default()
}

fn s3_error(message: String) -> ReconcilerError {
    ReconcilerError::Store(StoreError::s3(message))
}

impl S3BlobStore {
    /// Creates a new S3 blob store.
    ///
    /// # Errors
    ///
    /// Returns an error if the S3 client cannot be initialized.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Result<Self> {
        let config = if let Some(region_str) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        info!("Using S3 blob store s3://{bucket}/{}", normalize_prefix(prefix));
        Ok(Self::with_client(Client::new(&config), bucket, prefix))
    }

    /// Creates a new S3 blob store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        }
    }

    /// Gets the full S3 key for a blob.
    fn object_key(&self, key: &BlobKey) -> String {
        format!("{}{}/{}", self.prefix, key.namespace, key.name)
    }

    fn metadata(key: &BlobKey, labels: &Labels) -> Result<HashMap<String, String>> {
        let encoded = serde_json::to_string(labels).map_err(|e| {
            StoreError::serialization(format!("Failed to serialize labels of {key}: {e}"))
        })?;
        Ok(HashMap::from([(LABELS_METADATA.to_string(), encoded)]))
    }

    /// Gets an object from S3.
    async fn get_object(&self, key: &BlobKey) -> Result<Option<StoredBlob>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;

        match result {
            Ok(response) => {
                let labels = match response
                    .metadata()
                    .and_then(|m| m.get(LABELS_METADATA))
                {
                    Some(encoded) => serde_json::from_str(encoded).map_err(|e| {
                        StoreError::corrupted(format!("Invalid labels on {key}: {e}"))
                    })?,
                    None => Labels::new(),
                };

                let bytes = response
                    .body
                    .collect()
                    .await
                    .map_err(|e| s3_error(format!("Failed to read S3 object {key}: {e}")))?;

                Ok(Some(StoredBlob {
                    data: bytes.to_vec(),
                    labels,
                }))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(s3_error(format!("S3 get error: {service_err}")))
                }
            }
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<PutOutcome> {
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .if_none_match("*")
            .set_metadata(Some(Self::metadata(key, labels)?))
            .body(data.to_vec().into())
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Created s3://{}/{}", self.bucket, self.object_key(key));
                Ok(PutOutcome::Created)
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if !service_err
                    .code()
                    .is_some_and(|code| PRECONDITION_CODES.contains(&code))
                {
                    return Err(s3_error(format!("S3 put error: {service_err}")));
                }

                let existing = self
                    .get_object(key)
                    .await?
                    .ok_or_else(|| StoreError::conflict(key.to_string()))?;
                if existing.data == data {
                    Ok(PutOutcome::Unchanged)
                } else {
                    Err(StoreError::conflict(key.to_string()).into())
                }
            }
        }
    }

    async fn replace(&self, key: &BlobKey, data: &[u8], labels: &Labels) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .set_metadata(Some(Self::metadata(key, labels)?))
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| s3_error(format!("S3 put error: {e}")))?;

        debug!("Replaced s3://{}/{}", self.bucket, self.object_key(key));
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<StoredBlob> {
        self.get_object(key)
            .await?
            .ok_or_else(|| StoreError::not_found(key.to_string()).into())
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(s3_error(format!("S3 head error: {service_err}")))
                }
            }
        }
    }

    async fn list(&self, namespace: &str, prefix: &str) -> Result<Vec<BlobKey>> {
        let namespace_prefix = format!("{}{namespace}/", self.prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(format!("{namespace_prefix}{prefix}"))
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| s3_error(format!("S3 list error: {e}")))?;

            for object in response.contents() {
                if let Some(name) = object
                    .key()
                    .and_then(|k| k.strip_prefix(&namespace_prefix))
                    .filter(|name| !name.contains('/'))
                {
                    keys.push(BlobKey::new(namespace, name));
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| s3_error(format!("S3 delete error: {e}")))?;
        Ok(())
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(None), "");
        assert_eq!(normalize_prefix(Some("/")), "");
        assert_eq!(normalize_prefix(Some("/prod/plans/")), "prod/plans/");
    }
}
