//! `ContentPins` backed by a trustless HTTP gateway and a local directory.
//!
//! Content is downloaded as a CAR file from `{gateway}/ipfs/{cid}` and kept
//! under `blob_dir`. Reference counts and metadata are kept in a
//! `Datastore` under `/<index_prefix>/<cid>`.

use anyhow::{Context, bail};
use bytes::Bytes;
use futures::StreamExt;
use minicbor::{Decode, Encode};
use reqwest::header::ACCEPT;
use s5_pins_core::{Cid, ContentPins, Datastore, LocalPin, PinMeta};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CAR_CONTENT_TYPE: &str = "application/vnd.ipld.car";

#[derive(Debug, Clone, Encode, Decode)]
struct IndexEntry {
    #[n(0)]
    ref_count: u64,
    #[n(1)]
    metadata: PinMeta,
}

#[derive(Debug, Clone)]
pub struct GatewayPins {
    http_client: reqwest::Client,
    gateway: String,
    blob_dir: PathBuf,
    index: Arc<dyn Datastore>,
    index_prefix: String,
    timeout: Duration,
}

impl GatewayPins {
    pub fn create(
        gateway: impl Into<String>,
        blob_dir: PathBuf,
        index: Arc<dyn Datastore>,
        index_prefix: impl Into<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let index_prefix = index_prefix.into();
        if index_prefix.is_empty() || index_prefix.contains('/') {
            bail!("invalid index prefix {index_prefix:?}");
        }
        std::fs::create_dir_all(&blob_dir)
            .with_context(|| format!("could not create blob dir {blob_dir:?}"))?;
        Ok(Self {
            http_client: reqwest::Client::new(),
            gateway: gateway.into().trim_end_matches('/').to_owned(),
            blob_dir,
            index,
            index_prefix,
            timeout,
        })
    }

    fn index_key(&self, cid: &Cid) -> String {
        format!("/{}/{cid}", self.index_prefix)
    }

    pub fn blob_path(&self, cid: &Cid) -> PathBuf {
        self.blob_dir.join(format!("{cid}.car"))
    }

    async fn read_entry(&self, cid: &Cid) -> anyhow::Result<Option<IndexEntry>> {
        self.index
            .get(&self.index_key(cid))
            .await?
            .map(|bytes| {
                minicbor::decode::<IndexEntry>(&bytes)
                    .map_err(|e| anyhow::anyhow!("CBOR decode failed: {}", e))
            })
            .transpose()
    }

    async fn write_entry(&self, cid: &Cid, entry: &IndexEntry) -> anyhow::Result<()> {
        let bytes = minicbor::to_vec(entry)?;
        self.index.put(&self.index_key(cid), Bytes::from(bytes)).await
    }

    async fn download(&self, cid: &Cid, tmp_path: &Path) -> anyhow::Result<()> {
        let url = format!("{}/ipfs/{}?format=car", self.gateway, cid);
        let res = self
            .http_client
            .get(&url)
            .header(ACCEPT, CAR_CONTENT_TYPE)
            .timeout(self.timeout)
            .send()
            .await?;
        if !res.status().is_success() {
            bail!("gateway returned {} for {}", res.status(), cid);
        }

        let mut file = tokio::fs::File::create(tmp_path).await?;
        let mut body = res.bytes_stream();
        while let Some(chunk) = body.next().await {
            file.write_all(&chunk?).await?;
        }
        file.sync_all().await?;
        tokio::fs::rename(tmp_path, self.blob_path(cid)).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ContentPins for GatewayPins {
    async fn get(&self, cid: &Cid) -> anyhow::Result<Option<LocalPin>> {
        Ok(self.read_entry(cid).await?.map(|entry| LocalPin {
            ref_count: entry.ref_count,
            metadata: entry.metadata,
        }))
    }

    async fn add(
        &self,
        cid: &Cid,
        ref_count: u64,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let tmp_path = self.blob_dir.join(format!("{cid}.car.tmp"));
        debug!(%cid, gateway = %self.gateway, "fetching content");
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(anyhow::anyhow!("fetch of {cid} cancelled")),
            result = self.download(cid, &tmp_path) => result,
        };
        if let Err(err) = result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err);
        }
        self.write_entry(
            cid,
            &IndexEntry {
                ref_count,
                metadata: PinMeta::new(),
            },
        )
        .await
    }

    async fn set_ref_count(&self, cid: &Cid, ref_count: u64) -> anyhow::Result<()> {
        let Some(mut entry) = self.read_entry(cid).await? else {
            bail!("{cid} is not pinned");
        };
        entry.ref_count = ref_count;
        self.write_entry(cid, &entry).await
    }

    async fn rm(&self, cid: &Cid) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.blob_path(cid)).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        self.index.delete(&self.index_key(cid)).await
    }
}
