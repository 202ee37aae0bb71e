//! Object storage (blob REST) and the source fetcher used by URL uploads.

use std::fmt;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::Duration;

use gateway_core::signing::{sas_timestamp, SasWindow, UserDelegationKey};
use gateway_core::GatewayError;
use reqwest::blocking::{Body, Client, RequestBuilder};
use reqwest::StatusCode;
use url::Url;

use super::credential::{AccessTokenSource, STORAGE_RESOURCE};
use super::{describe_rejection, http_client, BACKEND_TIMEOUT};

const API_VERSION: &str = "2021-08-06";
/// Upper bound for one source download streamed into a blob upload.
pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobCredential {
    /// Broker-issued access query string for one container.
    Sas(String),
    ServiceIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobLocation {
    pub account: String,
    pub container: String,
    pub blob: String,
}

impl BlobLocation {
    pub fn new(
        account: impl Into<String>,
        container: impl Into<String>,
        blob: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            container: container.into(),
            blob: blob.into(),
        }
    }

    pub fn url(&self) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&format!("https://{}.blob.core.windows.net/", self.account))
            .map_err(|error| GatewayError::Blob(format!("invalid account name: {error}")))?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::Blob("blob url cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(&self.container)
            .extend(self.blob.split('/'));
        Ok(url)
    }
}

/// Object bytes on their way into storage: either in memory or a reader
/// streaming from a source download.
pub struct BlobContent {
    reader: Box<dyn Read + Send>,
    length: Option<u64>,
}

impl BlobContent {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let length = bytes.len() as u64;
        Self {
            reader: Box::new(Cursor::new(bytes)),
            length: Some(length),
        }
    }

    pub fn from_reader(reader: impl Read + Send + 'static, length: Option<u64>) -> Self {
        Self {
            reader: Box::new(reader),
            length,
        }
    }

    pub fn length(&self) -> Option<u64> {
        self.length
    }

    /// Drains the content into memory.
    pub fn into_bytes(mut self) -> Result<Vec<u8>, GatewayError> {
        let mut bytes = Vec::new();
        self.reader
            .read_to_end(&mut bytes)
            .map_err(|error| GatewayError::Blob(format!("failed to read content: {error}")))?;
        Ok(bytes)
    }

    /// Request body for a single-shot blob upload. The service needs a
    /// length up front, so content of unknown size is buffered first.
    fn into_body(self) -> Result<Body, GatewayError> {
        match self.length {
            Some(length) => Ok(Body::sized(self.reader, length)),
            None => self.into_bytes().map(Body::from),
        }
    }
}

impl fmt::Debug for BlobContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobContent")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Overwrite,
    CreateIfAbsent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Written,
    /// Create-if-absent lost to an existing object; nothing was written.
    AlreadyExists,
}

pub trait BlobStore: Send + Sync {
    fn exists(
        &self,
        location: &BlobLocation,
        credential: &BlobCredential,
    ) -> Result<bool, GatewayError>;

    fn put(
        &self,
        location: &BlobLocation,
        content: BlobContent,
        mode: WriteMode,
        credential: &BlobCredential,
    ) -> Result<PutOutcome, GatewayError>;

    /// Delegation key obtained with this service's own identity.
    fn user_delegation_key(
        &self,
        account: &str,
        window: SasWindow,
    ) -> Result<UserDelegationKey, GatewayError>;
}

pub trait SourceFetcher: Send + Sync {
    /// Opens the source for reading. The body is consumed by the upload.
    fn fetch(&self, source_url: &str) -> Result<BlobContent, GatewayError>;
}

pub struct HttpSourceFetcher {
    client: Client,
}

impl HttpSourceFetcher {
    pub fn new() -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(TRANSFER_TIMEOUT).map_err(GatewayError::Blob)?,
        })
    }
}

impl SourceFetcher for HttpSourceFetcher {
    fn fetch(&self, source_url: &str) -> Result<BlobContent, GatewayError> {
        let response = self
            .client
            .get(source_url)
            .send()
            .map_err(|error| GatewayError::Blob(format!("failed to fetch {source_url}: {error}")))?;
        if !response.status().is_success() {
            return Err(GatewayError::Blob(format!(
                "failed to fetch {source_url}: {}",
                describe_rejection(response)
            )));
        }
        let length = response.content_length();
        Ok(BlobContent::from_reader(response, length))
    }
}

pub struct AzureBlobRest {
    client: Client,
    identity: Arc<dyn AccessTokenSource>,
}

impl AzureBlobRest {
    pub fn new(identity: Arc<dyn AccessTokenSource>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(BACKEND_TIMEOUT).map_err(GatewayError::Blob)?,
            identity,
        })
    }

    fn request(
        &self,
        method: reqwest::Method,
        location: &BlobLocation,
        credential: &BlobCredential,
    ) -> Result<RequestBuilder, GatewayError> {
        let mut url = location.url()?;
        let request = match credential {
            BlobCredential::Sas(sas) => {
                url.set_query(Some(sas.trim_start_matches('?')));
                self.client.request(method, url)
            }
            BlobCredential::ServiceIdentity => self
                .client
                .request(method, url)
                .bearer_auth(self.identity.access_token(STORAGE_RESOURCE)?),
        };
        Ok(request.header("x-ms-version", API_VERSION))
    }
}

fn transport(error: reqwest::Error) -> GatewayError {
    GatewayError::Blob(error.to_string())
}

impl BlobStore for AzureBlobRest {
    fn exists(
        &self,
        location: &BlobLocation,
        credential: &BlobCredential,
    ) -> Result<bool, GatewayError> {
        let response = self
            .request(reqwest::Method::HEAD, location, credential)?
            .send()
            .map_err(transport)?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(GatewayError::Blob(describe_rejection(response))),
        }
    }

    fn put(
        &self,
        location: &BlobLocation,
        content: BlobContent,
        mode: WriteMode,
        credential: &BlobCredential,
    ) -> Result<PutOutcome, GatewayError> {
        let mut request = self
            .request(reqwest::Method::PUT, location, credential)?
            .timeout(TRANSFER_TIMEOUT)
            .header("x-ms-blob-type", "BlockBlob")
            .header("content-type", "application/octet-stream")
            .body(content.into_body()?);
        if mode == WriteMode::CreateIfAbsent {
            request = request.header("if-none-match", "*");
        }

        let response = request.send().map_err(transport)?;
        match put_outcome(response.status(), mode) {
            Some(outcome) => Ok(outcome),
            None => Err(GatewayError::Blob(describe_rejection(response))),
        }
    }

    fn user_delegation_key(
        &self,
        account: &str,
        window: SasWindow,
    ) -> Result<UserDelegationKey, GatewayError> {
        let body = format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?><KeyInfo><Start>{}</Start><Expiry>{}</Expiry></KeyInfo>",
            sas_timestamp(window.start),
            sas_timestamp(window.expiry),
        );
        let response = self
            .client
            .post(format!(
                "https://{account}.blob.core.windows.net/?restype=service&comp=userdelegationkey"
            ))
            .bearer_auth(self.identity.access_token(STORAGE_RESOURCE)?)
            .header("x-ms-version", API_VERSION)
            .header("content-type", "application/xml")
            .body(body)
            .send()
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(GatewayError::Blob(describe_rejection(response)));
        }
        let text = response.text().map_err(transport)?;
        parse_delegation_key(&text)
    }
}

/// Result of a put from its status; `None` is a rejection. A conditional
/// create that finds an object in place reports it instead of failing.
fn put_outcome(status: StatusCode, mode: WriteMode) -> Option<PutOutcome> {
    match status {
        status if status.is_success() => Some(PutOutcome::Written),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED
            if mode == WriteMode::CreateIfAbsent =>
        {
            Some(PutOutcome::AlreadyExists)
        }
        _ => None,
    }
}

fn parse_delegation_key(xml: &str) -> Result<UserDelegationKey, GatewayError> {
    let field = |tag: &str| {
        element_text(xml, tag)
            .map(str::to_string)
            .ok_or_else(|| GatewayError::Blob(format!("delegation key response lacks {tag}")))
    };
    Ok(UserDelegationKey {
        signed_oid: field("SignedOid")?,
        signed_tid: field("SignedTid")?,
        signed_start: field("SignedStart")?,
        signed_expiry: field("SignedExpiry")?,
        signed_service: field("SignedService")?,
        signed_version: field("SignedVersion")?,
        value: field("Value")?,
    })
}

/// Text of the first `<tag>…</tag>` element. The delegation key document is
/// flat and unescaped, so no general XML parsing is needed.
fn element_text<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = start + xml[start..].find(&close)?;
    Some(xml[start..end].trim())
}
