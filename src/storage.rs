// Bronze object store over OpenDAL
//
// One abstraction across backends: S3 (including MinIO/R2 via endpoint
// override) for real deployments, filesystem for local runs, memory in
// tests. Batch objects are write-once; nothing here mutates after a
// successful put.

use anyhow::{Context, Result};
use opendal::{services, Operator};
use tracing::info;

use crate::config::{StorageBackend, StorageSection};

#[derive(Clone)]
pub struct BronzeStore {
    op: Operator,
}

impl BronzeStore {
    pub fn from_config(config: &StorageSection) -> Result<Self> {
        match config.backend {
            StorageBackend::S3 => {
                let s3 = config
                    .s3
                    .as_ref()
                    .context("storage.s3 section required for the s3 backend")?;
                info!(bucket = %s3.bucket, region = %s3.region, "using s3 bronze storage");
                Self::new_s3(&s3.bucket, &s3.region, s3.endpoint.as_deref())
            }
            StorageBackend::Fs => {
                let root = config
                    .fs
                    .as_ref()
                    .map(|fs| fs.root.as_str())
                    .unwrap_or("./data");
                info!(root = %root, "using filesystem bronze storage");
                Self::new_fs(root)
            }
        }
    }

    /// S3-compatible backend. Credentials come from the environment or an
    /// IAM role; the endpoint override targets MinIO and friends.
    pub fn new_s3(bucket: &str, region: &str, endpoint: Option<&str>) -> Result<Self> {
        let mut builder = services::S3::default().bucket(bucket).region(region);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint(endpoint);
        }
        let op = Operator::new(builder)?.finish();
        Ok(Self { op })
    }

    pub fn new_fs(root: &str) -> Result<Self> {
        let builder = services::Fs::default().root(root);
        let op = Operator::new(builder)?.finish();
        Ok(Self { op })
    }

    /// Wrap an already-built operator (tests use the memory service).
    pub fn from_operator(op: Operator) -> Self {
        Self { op }
    }

    /// Write one batch object. Content headers advertise the gzip encoding
    /// and the NDJSON payload type.
    pub async fn put_batch(&self, key: &str, body: Vec<u8>) -> Result<()> {
        self.op
            .write_with(key, body)
            .content_type("application/x-ndjson")
            .content_encoding("gzip")
            .await
            .with_context(|| format!("failed to write batch object {key}"))?;
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let buf = self
            .op
            .read(key)
            .await
            .with_context(|| format!("failed to read batch object {key}"))?;
        Ok(buf.to_vec())
    }

    /// Batch Lister leg: object keys under one hour-bucket prefix. The
    /// OpenDAL lister pages through truncated listings transparently; no
    /// ordering is guaranteed across partitions.
    pub async fn list_hour(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = match self.op.list(prefix).await {
            Ok(entries) => entries,
            // An hour bucket with no batches may not exist at all (fs backend).
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to list bronze prefix {prefix}"))
            }
        };
        Ok(entries
            .into_iter()
            .filter(|entry| entry.metadata().mode().is_file())
            .map(|entry| entry.path().to_string())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> BronzeStore {
        let op = Operator::new(services::Memory::default()).unwrap().finish();
        BronzeStore::from_operator(op)
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = memory_store();
        let key = "bronze/yyyy=2024/mm=01/dd=15/hh=14/part-abc.ndjson.gz";
        store.put_batch(key, b"payload".to_vec()).await.unwrap();
        assert_eq!(store.get(key).await.unwrap(), b"payload");
    }

    #[tokio::test]
    async fn list_hour_sees_only_its_prefix() {
        let store = memory_store();
        store
            .put_batch("bronze/yyyy=2024/mm=01/dd=15/hh=14/part-a.ndjson.gz", vec![1])
            .await
            .unwrap();
        store
            .put_batch("bronze/yyyy=2024/mm=01/dd=15/hh=14/part-b.ndjson.gz", vec![2])
            .await
            .unwrap();
        store
            .put_batch("bronze/yyyy=2024/mm=01/dd=15/hh=15/part-c.ndjson.gz", vec![3])
            .await
            .unwrap();

        let mut keys = store
            .list_hour("bronze/yyyy=2024/mm=01/dd=15/hh=14/")
            .await
            .unwrap();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "bronze/yyyy=2024/mm=01/dd=15/hh=14/part-a.ndjson.gz",
                "bronze/yyyy=2024/mm=01/dd=15/hh=14/part-b.ndjson.gz",
            ]
        );
    }
}
