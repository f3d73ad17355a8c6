use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context as TaskContext, Poll};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::debug;
use rusoto_core::signature::{SignedRequest, SignedRequestPayload};
use rusoto_core::{ByteStream, DispatchSignedRequest, HttpClient, Region};
use rusoto_credential::{AwsCredentials, ProvideAwsCredentials};
use rusoto_glacier::{
    CompleteMultipartUploadInput, Glacier, GlacierClient, InitiateMultipartUploadInput,
    UploadMultipartPartError,
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::io::ReaderStream;

use crate::cloud::client::{CredentialSource, GlacierConnection};
use crate::cloud::target::{ArchiveTarget, PartBody, PartRange, PartReader};
use crate::constants::{DEFAULT_ACCOUNT_ID, GLACIER_API_VERSION, SOURCE_READ_SIZE};

/// [`ArchiveTarget`] backed by the Glacier multipart upload API.
pub struct GlacierTarget {
    client: GlacierClient,
    dispatcher: HttpClient,
    credentials: Arc<CredentialSource>,
    region: Region,
    account_id: String,
}

impl GlacierTarget {
    pub fn new(connection: GlacierConnection) -> Self {
        Self {
            client: connection.client,
            dispatcher: connection.dispatcher,
            credentials: connection.credentials,
            region: connection.region,
            account_id: DEFAULT_ACCOUNT_ID.to_string(),
        }
    }

    /// Use an explicit account id instead of the credentials' own account.
    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = account_id.into();
        self
    }
}

/// Request body that can be cut loose from the staging buffer.
///
/// The HTTP client may keep the body alive after the response arrives.
/// Releasing drops the part reader right away so the next part can be
/// buffered.
#[derive(Clone)]
pub(crate) struct ReleasableBody(Arc<Mutex<Option<PartReader>>>);

impl ReleasableBody {
    fn new(reader: PartReader) -> Self {
        Self(Arc::new(Mutex::new(Some(reader))))
    }

    fn lock(&self) -> MutexGuard<'_, Option<PartReader>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn release(&self) {
        self.lock().take();
    }
}

impl AsyncRead for ReleasableBody {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.lock().as_mut() {
            Some(reader) => Pin::new(reader).poll_read(cx, buf),
            None => Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "part body already released",
            ))),
        }
    }
}

/// Build a signed UploadMultipartPart request whose body is the paced pass.
///
/// The Glacier API needs the linear SHA-256 of the payload inside the
/// signature, and the signer only computes it for buffered payloads. So the
/// request is signed over an unpaced copy of the part, then the copy is
/// swapped for the paced stream before anything is sent.
pub(crate) async fn part_request(
    region: &Region,
    path: &str,
    range: PartRange,
    tree_hash: &str,
    body: &PartBody<'_>,
    credentials: &AwsCredentials,
) -> Result<(SignedRequest, ReleasableBody)> {
    let mut signing_copy = Vec::with_capacity(body.len() as usize);
    body.open_unpaced()?
        .read_to_end(&mut signing_copy)
        .await
        .context("Failed to read part from staging buffer")?;
    let len = signing_copy.len();

    let mut request = SignedRequest::new("PUT", "glacier", region, path);
    request.set_content_type("application/x-amz-json-1.1".to_owned());
    request.add_header("x-amz-glacier-version", GLACIER_API_VERSION);
    request.add_header("x-amz-sha256-tree-hash", tree_hash);
    request.add_header("Content-Range", &range.content_range());
    request.set_payload(Some(signing_copy));
    request.sign(credentials);

    // content-length and x-amz-content-sha256 are fixed now
    let paced = ReleasableBody::new(body.open()?);
    let stream = ReaderStream::with_capacity(paced.clone(), SOURCE_READ_SIZE);
    request.payload = Some(SignedRequestPayload::Stream(ByteStream::new_with_size(stream, len)));

    Ok((request, paced))
}

#[async_trait]
impl ArchiveTarget for GlacierTarget {
    async fn begin_multipart_upload(
        &self,
        vault: &str,
        description: &str,
        part_size: u64,
    ) -> Result<String> {
        let request = InitiateMultipartUploadInput {
            account_id: self.account_id.clone(),
            vault_name: vault.to_string(),
            archive_description: Some(description.to_string()),
            part_size: Some(part_size.to_string()),
        };

        let output = self
            .client
            .initiate_multipart_upload(request)
            .await
            .with_context(|| format!("Failed to initiate multipart upload in vault {}", vault))?;

        debug!("Multipart upload location: {:?}", output.location);
        output
            .upload_id
            .ok_or_else(|| anyhow!("Service returned no upload id"))
    }

    async fn upload_part(
        &self,
        vault: &str,
        upload_id: &str,
        range: PartRange,
        tree_hash: &str,
        body: PartBody<'_>,
    ) -> Result<String> {
        let credentials = self
            .credentials
            .credentials()
            .await
            .context("Failed to load AWS credentials")?;
        let path = format!(
            "/{}/vaults/{}/multipart-uploads/{}",
            self.account_id, vault, upload_id
        );

        let (request, paced) =
            part_request(&self.region, &path, range, tree_hash, &body, &credentials).await?;
        let outcome = self.dispatcher.dispatch(request, None).await;
        paced.release();

        let mut response =
            outcome.with_context(|| format!("Failed to upload bytes {}", range))?;
        if response.status.as_u16() == 204 {
            return response
                .headers
                .remove("x-amz-sha256-tree-hash")
                .ok_or_else(|| anyhow!("Service returned no checksum for bytes {}", range));
        }

        let response = response
            .buffer()
            .await
            .with_context(|| format!("Failed to read error response for bytes {}", range))?;
        Err(anyhow!(UploadMultipartPartError::from_response(response)))
            .with_context(|| format!("Failed to upload bytes {}", range))
    }

    async fn complete_multipart_upload(
        &self,
        vault: &str,
        upload_id: &str,
        archive_size: u64,
        tree_hash: &str,
    ) -> Result<String> {
        let request = CompleteMultipartUploadInput {
            account_id: self.account_id.clone(),
            vault_name: vault.to_string(),
            upload_id: upload_id.to_string(),
            archive_size: Some(archive_size.to_string()),
            checksum: Some(tree_hash.to_string()),
        };

        let output = self
            .client
            .complete_multipart_upload(request)
            .await
            .with_context(|| format!("Failed to complete multipart upload {}", upload_id))?;

        debug!("Archive id: {:?}", output.archive_id);
        output
            .location
            .ok_or_else(|| anyhow!("Service returned no archive location"))
    }
}
