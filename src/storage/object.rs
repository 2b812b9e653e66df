//! Object Store Adapter
//!
//! The distributed path keeps raw image payloads and result documents in an
//! S3-compatible object store (MinIO in the reference deployment). The store
//! is a capability the rest of the system consumes through the `ObjectStore`
//! trait; the server constructs one implementation at boot and passes it down.
//!
//! `MemoryObjectStore` backs tests and local runs without a MinIO endpoint.

use crate::config::Config;
use crate::error::ClusterError;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), ClusterError>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, ClusterError>;

    async fn list_objects(&self, bucket: &str, prefix: &str)
        -> Result<Vec<ObjectInfo>, ClusterError>;

    async fn presigned_get_object(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, ClusterError>;

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ClusterError>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClusterError>;

    async fn make_bucket(&self, bucket: &str, region: &str) -> Result<(), ClusterError>;

    async fn set_bucket_policy(&self, bucket: &str, policy_json: &str)
        -> Result<(), ClusterError>;
}

/// S3/MinIO-backed implementation.
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    /// Builds a client against the configured MinIO endpoint, path-style.
    pub async fn connect(config: &Config) -> Result<Self, ClusterError> {
        let endpoint = config.minio_url().ok_or_else(|| {
            ClusterError::StorageUnavailable("MINIO_ENDPOINT is not configured".to_string())
        })?;

        let credentials = Credentials::new(
            config.minio_access_key.clone(),
            config.minio_secret_key.clone(),
            None,
            None,
            "minio-static",
        );

        let base = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .load()
            .await;

        let s3_config = aws_sdk_s3::config::Builder::from(&base)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
        })
    }
}

fn storage_err(context: &str, err: impl std::fmt::Display) -> ClusterError {
    ClusterError::StorageUnavailable(format!("{}: {}", context, err))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), ClusterError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .set_metadata(Some(metadata))
            .send()
            .await
            .map_err(|e| storage_err("put_object", e))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, ClusterError> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service = e.into_service_error();
                if service.is_no_such_key() {
                    ClusterError::NotFound(key.to_string())
                } else {
                    storage_err("get_object", service)
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| storage_err("get_object body", e))?;
        Ok(data.into_bytes())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, ClusterError> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| storage_err("list_objects", e))?;
            for object in page.contents() {
                objects.push(ObjectInfo {
                    key: object.key().unwrap_or_default().to_string(),
                    size: object.size().unwrap_or(0).max(0) as u64,
                });
            }
        }
        Ok(objects)
    }

    async fn presigned_get_object(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, ClusterError> {
        let presigning = PresigningConfig::expires_in(expiry)
            .map_err(|e| ClusterError::InvalidInput(format!("bad presign expiry: {}", e)))?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| storage_err("presign", e))?;
        Ok(request.uri().to_string())
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ClusterError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_err("remove_object", e))?;
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClusterError> {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service = e.into_service_error();
                if service.is_not_found() {
                    Ok(false)
                } else {
                    Err(storage_err("bucket_exists", service))
                }
            }
        }
    }

    async fn make_bucket(&self, bucket: &str, region: &str) -> Result<(), ClusterError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(region))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| storage_err("make_bucket", e))?;
        tracing::info!("Created bucket {}", bucket);
        Ok(())
    }

    async fn set_bucket_policy(
        &self,
        bucket: &str,
        policy_json: &str,
    ) -> Result<(), ClusterError> {
        self.client
            .put_bucket_policy()
            .bucket(bucket)
            .policy(policy_json)
            .send()
            .await
            .map_err(|e| storage_err("set_bucket_policy", e))?;
        Ok(())
    }
}

struct StoredObject {
    bytes: Bytes,
    #[allow(dead_code)]
    content_type: String,
    #[allow(dead_code)]
    metadata: HashMap<String, String>,
}

/// In-memory implementation for tests and MinIO-less local runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    buckets: DashMap<String, DashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        bytes: Bytes,
        content_type: &str,
        metadata: HashMap<String, String>,
    ) -> Result<(), ClusterError> {
        let bucket = self
            .buckets
            .entry(bucket.to_string())
            .or_insert_with(DashMap::new);
        bucket.insert(
            key.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
                metadata,
            },
        );
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes, ClusterError> {
        self.buckets
            .get(bucket)
            .and_then(|b| b.get(key).map(|o| o.bytes.clone()))
            .ok_or_else(|| ClusterError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<ObjectInfo>, ClusterError> {
        let Some(bucket) = self.buckets.get(bucket) else {
            return Ok(vec![]);
        };
        let mut objects: Vec<ObjectInfo> = bucket
            .iter()
            .filter(|o| o.key().starts_with(prefix))
            .map(|o| ObjectInfo {
                key: o.key().clone(),
                size: o.value().bytes.len() as u64,
            })
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    async fn presigned_get_object(
        &self,
        bucket: &str,
        key: &str,
        expiry: Duration,
    ) -> Result<String, ClusterError> {
        Ok(format!(
            "memory://{}/{}?expires={}",
            bucket,
            key,
            expiry.as_secs()
        ))
    }

    async fn remove_object(&self, bucket: &str, key: &str) -> Result<(), ClusterError> {
        if let Some(bucket) = self.buckets.get(bucket) {
            bucket.remove(key);
        }
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool, ClusterError> {
        Ok(self.buckets.contains_key(bucket))
    }

    async fn make_bucket(&self, bucket: &str, _region: &str) -> Result<(), ClusterError> {
        self.buckets
            .entry(bucket.to_string())
            .or_insert_with(DashMap::new);
        Ok(())
    }

    async fn set_bucket_policy(
        &self,
        _bucket: &str,
        _policy_json: &str,
    ) -> Result<(), ClusterError> {
        Ok(())
    }
}
