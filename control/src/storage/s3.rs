//! S3-compatible object storage.
//!
//! Path-style addressing against a configurable endpoint. The copy source is
//! `<bucket>/<key>` with no URL-encoding, which is what S3-compatible spaces
//! expect.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use tracing::{info, warn};

use super::{ObjectStorage, StorageError, StorageResult};

#[derive(Debug, Clone)]
pub struct S3Config {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub bucket: String,
    pub endpoint: String,
}

pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Storage {
    pub fn new(config: S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            "environment",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .endpoint_url(config.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.bucket,
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> StorageResult<(Vec<String>, Option<String>)> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_string))
            .collect();
        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok((keys, next))
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
    async fn copy_prefix(&self, src: &str, dst: &str) -> StorageResult<()> {
        let mut continuation = None;
        let mut copied = 0usize;

        loop {
            let (keys, next) = self.list_page(src, continuation).await?;
            if keys.is_empty() && copied == 0 && next.is_none() {
                return Err(StorageError::EmptyPrefix(src.to_string()));
            }

            for key in keys {
                if key.ends_with('/') {
                    continue;
                }
                let relative = key.strip_prefix(src).unwrap_or(&key);
                let destination = format!("{}{}", dst, relative);
                let copy_source = format!("{}/{}", self.bucket, key);

                self.client
                    .copy_object()
                    .bucket(&self.bucket)
                    .copy_source(copy_source)
                    .key(&destination)
                    .send()
                    .await
                    .map_err(|err| {
                        StorageError::Backend(format!("copying {key} -> {destination}: {err}"))
                    })?;
                copied += 1;
            }

            continuation = next;
            if continuation.is_none() {
                break;
            }
        }

        info!(src, dst, copied, "copied storage prefix");
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<()> {
        let mut continuation = None;
        let mut deleted = 0usize;

        loop {
            let (keys, next) = self.list_page(prefix, continuation).await?;
            for key in keys {
                match self
                    .client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&key)
                    .send()
                    .await
                {
                    Ok(_) => deleted += 1,
                    Err(err) => warn!(%key, %err, "failed to delete object"),
                }
            }

            continuation = next;
            if continuation.is_none() {
                break;
            }
        }

        info!(prefix, deleted, "deleted storage prefix");
        Ok(())
    }
}
