use async_trait::async_trait;
use bytes::Bytes;
use object_store::{
    memory::InMemory,
    multipart::{MultipartStore, PartId},
    path::Path as ObjectPath,
    signer::Signer,
    Attribute, Attributes, ObjectStore as ObjectStoreBackend, PutOptions, PutPayload,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    domain::{
        errors::{StorageError, StorageResult},
        models::CompletedPart,
        value_objects::ObjectLocation,
    },
    ports::storage::{ObjectHead, ObjectStorageClient},
};

/// How upload URLs are produced for a bucket
#[derive(Clone)]
enum UrlSigner {
    /// Provider-signed URL (S3 and compatibles)
    Provider(Arc<dyn Signer>),
    /// `memory://` URL for the in-process store; nothing listens on it
    Local,
    Unsupported,
}

#[derive(Clone)]
struct BucketBackend {
    objects: Arc<dyn ObjectStoreBackend>,
    multipart: Arc<dyn MultipartStore>,
    signer: UrlSigner,
}

/// Adapter that implements the ObjectStorageClient port on top of Apache object_store.
///
/// One backend store per bucket; locations in any other bucket are rejected.
#[derive(Clone, Default)]
pub struct ObjectStoreStorageAdapter {
    buckets: HashMap<String, BucketBackend>,
}

/// Configuration for the S3 backend
#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

fn backend_error(action: &str, e: object_store::Error) -> StorageError {
    StorageError::InfrastructureError {
        message: format!("Failed to {}: {}", action, e),
        source: Some(e.to_string()),
    }
}

fn required_etag(etag: Option<String>, location: &ObjectLocation) -> StorageResult<String> {
    etag.filter(|etag| !etag.is_empty())
        .ok_or_else(|| StorageError::MissingEtag {
            location: location.clone(),
        })
}

impl ObjectStoreStorageAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `bucket` from `store`, without presigning support
    pub fn with_bucket<S>(mut self, bucket: impl Into<String>, store: Arc<S>) -> Self
    where
        S: ObjectStoreBackend + MultipartStore,
    {
        self.buckets.insert(
            bucket.into(),
            BucketBackend {
                objects: store.clone(),
                multipart: store,
                signer: UrlSigner::Unsupported,
            },
        );
        self
    }

    /// Serve `bucket` from a store that can also sign URLs
    pub fn with_signing_bucket<S>(mut self, bucket: impl Into<String>, store: Arc<S>) -> Self
    where
        S: ObjectStoreBackend + MultipartStore + Signer,
    {
        self.buckets.insert(
            bucket.into(),
            BucketBackend {
                objects: store.clone(),
                multipart: store.clone(),
                signer: UrlSigner::Provider(store),
            },
        );
        self
    }

    /// In-process stores for development and tests
    pub fn in_memory(buckets: &[&str]) -> Self {
        let mut adapter = Self::new();
        for bucket in buckets {
            let store = Arc::new(InMemory::new());
            adapter.buckets.insert(
                bucket.to_string(),
                BucketBackend {
                    objects: store.clone(),
                    multipart: store,
                    signer: UrlSigner::Local,
                },
            );
        }
        adapter
    }

    /// One S3 client per bucket
    pub fn s3(config: &S3Config, buckets: &[String]) -> StorageResult<Self> {
        let mut adapter = Self::new();
        for bucket in buckets {
            let mut builder = object_store::aws::AmazonS3Builder::new()
                .with_bucket_name(bucket)
                .with_region(&config.region)
                .with_allow_http(config.allow_http);

            if let Some(access_key) = &config.access_key {
                builder = builder.with_access_key_id(access_key);
            }
            if let Some(secret_key) = &config.secret_key {
                builder = builder.with_secret_access_key(secret_key);
            }
            if let Some(endpoint) = &config.endpoint {
                builder = builder.with_endpoint(endpoint);
            }

            let store = builder
                .build()
                .map_err(|e| backend_error("build S3 client", e))?;
            adapter = adapter.with_signing_bucket(bucket.clone(), Arc::new(store));
        }
        Ok(adapter)
    }

    pub fn buckets(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.buckets.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn backend(&self, location: &ObjectLocation) -> StorageResult<(&BucketBackend, ObjectPath)> {
        let backend = self
            .buckets
            .get(location.bucket.as_str())
            .ok_or_else(|| StorageError::BucketNotConfigured {
                bucket: location.bucket.to_string(),
            })?;
        Ok((backend, ObjectPath::from(location.key.as_str())))
    }

    /// Upload one part the way a client holding the upload id would.
    /// Returns the part's etag.
    pub async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> StorageResult<String> {
        let (backend, path) = self.backend(location)?;
        let part_idx = part_index(part_number)?;
        let part = backend
            .multipart
            .put_part(&path, &upload_id.to_string(), part_idx, PutPayload::from(data))
            .await
            .map_err(|e| multipart_error("upload part", upload_id, e))?;
        Ok(part.content_id)
    }
}

fn part_index(part_number: u32) -> StorageResult<usize> {
    if part_number == 0 {
        return Err(StorageError::ValidationError {
            message: "Part numbers start at 1".to_string(),
        });
    }
    Ok(part_number as usize - 1)
}

fn multipart_error(action: &str, upload_id: &str, e: object_store::Error) -> StorageError {
    match e {
        object_store::Error::NotFound { .. } => StorageError::UploadNotFound {
            upload_id: upload_id.to_string(),
        },
        _ => backend_error(action, e),
    }
}

#[async_trait]
impl ObjectStorageClient for ObjectStoreStorageAdapter {
    async fn presign_upload(&self, location: &ObjectLocation, ttl: Duration) -> StorageResult<String> {
        let (backend, path) = self.backend(location)?;

        match &backend.signer {
            UrlSigner::Provider(signer) => {
                let url = signer
                    .signed_url(http::Method::PUT, &path, ttl)
                    .await
                    .map_err(|e| backend_error("presign upload", e))?;
                Ok(url.to_string())
            }
            UrlSigner::Local => Ok(format!(
                "memory://{}/{}?expires_in={}",
                location.bucket,
                path,
                ttl.as_secs()
            )),
            UrlSigner::Unsupported => Err(StorageError::UnsupportedOperation {
                operation: "presign_upload".to_string(),
                reason: format!("Bucket '{}' has no URL signer", location.bucket),
            }),
        }
    }

    async fn initiate_multipart(&self, location: &ObjectLocation) -> StorageResult<String> {
        let (backend, path) = self.backend(location)?;
        backend
            .multipart
            .create_multipart(&path)
            .await
            .map_err(|e| backend_error("create multipart upload", e))
    }

    async fn abort_multipart(&self, location: &ObjectLocation, upload_id: &str) -> StorageResult<()> {
        let (backend, path) = self.backend(location)?;
        match backend
            .multipart
            .abort_multipart(&path, &upload_id.to_string())
            .await
        {
            Ok(()) => Ok(()),
            // Already aborted or completed
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(backend_error("abort multipart upload", e)),
        }
    }

    async fn complete_multipart(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> StorageResult<String> {
        let (backend, path) = self.backend(location)?;
        let parts: Vec<PartId> = parts
            .iter()
            .map(|p| PartId {
                content_id: p.etag.clone(),
            })
            .collect();

        let result = backend
            .multipart
            .complete_multipart(&path, &upload_id.to_string(), parts)
            .await
            .map_err(|e| multipart_error("complete multipart upload", upload_id, e))?;
        required_etag(result.e_tag, location)
    }

    async fn put_object(
        &self,
        location: &ObjectLocation,
        data: Bytes,
        content_type: Option<&str>,
    ) -> StorageResult<String> {
        let (backend, path) = self.backend(location)?;

        let mut attributes = Attributes::new();
        if let Some(ct) = content_type {
            attributes.insert(Attribute::ContentType, ct.to_string().into());
        }
        let options = PutOptions {
            attributes,
            ..Default::default()
        };

        let result = backend
            .objects
            .put_opts(&path, PutPayload::from(data), options)
            .await
            .map_err(|e| backend_error("put object", e))?;
        required_etag(result.e_tag, location)
    }

    async fn head_object(&self, location: &ObjectLocation) -> StorageResult<ObjectHead> {
        let (backend, path) = self.backend(location)?;
        let meta = backend.objects.head(&path).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => StorageError::ObjectNotFound {
                location: location.clone(),
            },
            _ => backend_error("get object metadata", e),
        })?;

        Ok(ObjectHead {
            etag: meta.e_tag,
            size: meta.size,
        })
    }
}
