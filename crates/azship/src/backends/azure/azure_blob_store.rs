// ai
//! 🪣📡 Azure Blob Store: `object_store` does the blobs, we do the container.
//!
//! COLD OPEN, 3:12 AM. Four megabytes of gzipped nginx logs sit in memory.
//! The container was deleted by someone "cleaning up the dev subscription".
//! The next attempt notices, recreates it, and puts the blob anyway.
//!
//! 🧠 Knowledge graph:
//! - `AzureBlobConfig`: account, container, SAS or access key, optional endpoint, auto-create flag
//! - `AzureBlobStore`: a `MicrosoftAzure` store with retries turned off (the flusher retries)
//! - Upload: one `put_opts` for ≤ 4 MiB, else `put_multipart_opts` in 4 MiB parts, 4 in flight
//! - Existence: `object_store` has no container API, so `GET ?restype=container` → 404 →
//!   `PUT ?restype=container` goes out over reqwest, signed by `AzureAuthorizer` (409 is fine)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use object_store::azure::{
    AzureAccessKey, AzureAuthorizer, AzureCredential, MicrosoftAzure, MicrosoftAzureBuilder,
};
use object_store::client::{HttpRequest, HttpRequestBody};
use object_store::path::Path;
use object_store::{
    Attribute, AttributeValue, Attributes, ClientOptions, ObjectStore as _, PutMultipartOpts,
    PutOptions, PutPayload, RetryConfig, WriteMultipart,
};
use reqwest::{Method, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::backends::{ContentOptions, ObjectStore};

/// Bodies above this go up as multipart blocks.
const BLOCK_SIZE: usize = 4 * 1024 * 1024;
/// Blocks in flight at once.
const PARALLELISM: usize = 4;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// 🔧 Where the container lives and how to get in.
#[derive(Debug, Deserialize, Clone)]
pub struct AzureBlobConfig {
    /// 🏷️ the storage account name, the part before `.blob.core.windows.net`
    pub storage_account: String,
    /// 🪣 the container. Required, non-empty.
    pub container: String,
    /// 🔒 SAS token. Wins over `access_key` when both are set.
    #[serde(default)]
    pub sas_token: Option<String>,
    /// 🔒 base64 account key for Shared Key signing.
    #[serde(default)]
    pub access_key: Option<String>,
    /// 🧭 account endpoint override, e.g. `http://127.0.0.1:10000/devstoreaccount1` for Azurite.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 🏗️ create the container before uploads if it's missing
    #[serde(default)]
    pub auto_create_container: bool,
}

/// 📡 The Azure side of the store boundary. I/O only, no retries. The flusher handles retries.
#[derive(Clone)]
pub struct AzureBlobStore {
    blobs: Arc<MicrosoftAzure>,
    // -- 🏗️ container management rides on a plain client, signed with the same credential
    client: reqwest::Client,
    credential: Arc<AzureCredential>,
    account: String,
    container_url: Url,
    block_size: usize,
    parallelism: usize,
}

// -- 🎭 manual Debug: the credential is a password wearing a struct costume
impl std::fmt::Debug for AzureBlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureBlobStore")
            .field("container_url", &self.container_url.as_str())
            .field("block_size", &self.block_size)
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl AzureBlobStore {
    /// 🚀 Validates the config and builds the clients. No network calls yet.
    pub fn new(config: &AzureBlobConfig) -> Result<Self> {
        if config.container.trim().is_empty() {
            anyhow::bail!("💀 cannot specify empty string to container. Blobs need a home.");
        }
        if config.storage_account.trim().is_empty() {
            anyhow::bail!("💀 storage_account is empty. Azure needs to know whose bill this goes on.");
        }

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://{}.blob.core.windows.net", config.storage_account));
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let container_url = Url::parse(&format!("{endpoint}/{}", config.container)).context(format!(
            "💀 '{endpoint}' plus container '{}' does not make a URL anyone can reach",
            config.container
        ))?;

        let client_options = ClientOptions::new()
            .with_connect_timeout(CONNECT_TIMEOUT)
            .with_timeout(REQUEST_TIMEOUT)
            .with_allow_http(container_url.scheme() == "http");
        let builder = MicrosoftAzureBuilder::new()
            .with_account(&config.storage_account)
            .with_container_name(&config.container)
            .with_endpoint(endpoint.clone())
            .with_client_options(client_options)
            .with_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            });

        let (builder, credential) = match (&config.sas_token, &config.access_key) {
            (Some(sas), _) if !sas.trim().is_empty() => {
                let pairs = sas_pairs(sas)?;
                (
                    builder.with_sas_authorization(pairs.clone()),
                    AzureCredential::SASToken(pairs),
                )
            }
            (_, Some(key)) if !key.trim().is_empty() => {
                let key = key.trim();
                let access_key = AzureAccessKey::try_new(key)
                    .context("💀 access_key is not a valid base64 account key")?;
                (
                    builder.with_access_key(key),
                    AzureCredential::AccessKey(access_key),
                )
            }
            _ => anyhow::bail!(
                "💀 invalid credential: set either sas_token or access_key for account '{}'",
                config.storage_account
            ),
        };

        let blobs = builder
            .build()
            .context("💀 Failed to build Azure Blob Storage object store")?;

        // 🔧 same fences as the blob client: 10s to connect, 30s per request
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("💀 The HTTP client refused to be born. Probably TLS. It's always TLS.")?;

        Ok(Self {
            blobs: Arc::new(blobs),
            client,
            credential: Arc::new(credential),
            account: config.storage_account.clone(),
            container_url,
            block_size: BLOCK_SIZE,
            parallelism: PARALLELISM,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_block_size(mut self, block_size: usize, parallelism: usize) -> Self {
        self.block_size = block_size;
        self.parallelism = parallelism;
        self
    }

    /// 📡 `?restype=container` on the container URL, signed, then sent.
    async fn container_request(&self, method: Method) -> Result<Response> {
        let mut url = self.container_url.clone();
        url.query_pairs_mut().append_pair("restype", "container");

        let mut request = HttpRequest::new(HttpRequestBody::empty());
        *request.method_mut() = method;
        *request.uri_mut() = url
            .as_str()
            .parse()
            .context(format!("💀 '{url}' is not a URI the blob client accepts"))?;
        AzureAuthorizer::new(&self.credential, &self.account).authorize(&mut request);

        let (parts, _) = request.into_parts();
        trace!("📡 {} {}", parts.method, url.path());
        self.client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .send()
            .await
            .context(
                "💀 The request never made it to Azure. Check connectivity, DNS, and whether the endpoint is real.",
            )
    }

    async fn container_exists(&self) -> Result<bool> {
        let response = self.container_request(Method::GET).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("💀 container properties check answered {status}: {body}")
            }
        }
    }

    async fn create_container(&self) -> Result<()> {
        let response = self.container_request(Method::PUT).await?;
        match response.status() {
            status if status.is_success() => {
                debug!("🏗️ created container {}", self.container_url);
                Ok(())
            }
            // -- 🏁 another writer created it between our GET and our PUT. same outcome, less work.
            StatusCode::CONFLICT => {
                debug!("🏁 container {} already exists, someone beat us to it", self.container_url);
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("💀 creating container {} answered {status}: {body}", self.container_url)
            }
        }
    }

    /// 🧱 Big bodies: fixed-size parts, a few in flight, committed in order on `finish`.
    async fn put_blocks(&self, location: &Path, body: Vec<u8>, attributes: Attributes) -> Result<()> {
        let upload = self
            .blobs
            .put_multipart_opts(
                location,
                PutMultipartOpts {
                    attributes,
                    ..PutMultipartOpts::default()
                },
            )
            .await?;
        let mut writer = WriteMultipart::new_with_chunk_size(upload, self.block_size);
        let mut blocks = 0usize;
        for chunk in body.chunks(self.block_size) {
            writer.wait_for_capacity(self.parallelism).await?;
            writer.write(chunk);
            blocks += 1;
        }
        writer.finish().await?;
        debug!("🧱 committed {blocks} blocks for blob={location}");
        Ok(())
    }
}

/// 🔒 `?sv=...&sig=abc%3D` → decoded `(name, value)` pairs.
fn sas_pairs(sas: &str) -> Result<Vec<(String, String)>> {
    let token = sas.trim().trim_start_matches('?');
    let url = Url::parse(&format!("https://sas.invalid/?{token}"))
        .context("💀 sas_token does not look like a query string")?;
    Ok(url.query_pairs().into_owned().collect())
}

#[async_trait]
impl ObjectStore for AzureBlobStore {
    async fn ensure_destination_exists(&self) -> Result<()> {
        if self.container_exists().await? {
            return Ok(());
        }
        self.create_container().await
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, options: &ContentOptions) -> Result<()> {
        let location = Path::from(key);
        let attributes = Attributes::from_iter([(
            Attribute::ContentType,
            AttributeValue::from(options.content_type.clone()),
        )]);
        let uploaded = if body.len() > self.block_size {
            self.put_blocks(&location, body, attributes).await
        } else {
            self.blobs
                .put_opts(
                    &location,
                    PutPayload::from(body),
                    PutOptions {
                        attributes,
                        ..PutOptions::default()
                    },
                )
                .await
                .map(|_| ())
                .map_err(anyhow::Error::from)
        };
        uploaded.context(format!("💀 upload to blob error: blob={key}"))
    }

    fn describe(&self) -> String {
        self.container_url.to_string()
    }
}
