//! AWS S3 backend
//!
//! Works against AWS and S3-compatible services (MinIO, localstack) when an
//! endpoint override is given. SDK retries are turned off: the engine owns
//! the retry policy.

use super::{ByteStream, ObjectStore, PartBody};
use crate::error::{StoreError, TransferError};
use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream as SdkByteStream, Length};
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart as SdkCompletedPart, ServerSideEncryption,
};
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use s3pump_types::{CompletedPart, ObjectLocation, TransferConfig};
use std::fmt::Debug;
use tracing::info;

/// Static access key pair
#[derive(Clone)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl Debug for StaticCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Object store talking to S3
#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
}

impl S3Store {
    /// Build a client from the transfer config.
    /// Without `credentials` the default AWS provider chain is used.
    pub async fn connect(
        config: &TransferConfig,
        credentials: Option<StaticCredentials>,
    ) -> Result<Self, TransferError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .operation_attempt_timeout(config.timeout)
                    .build(),
            );

        if let Some(creds) = credentials {
            loader = loader.credentials_provider(Credentials::new(
                creds.access_key_id,
                creds.secret_access_key,
                None,
                None,
                "s3pump",
            ));
        }

        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);

        if let Some(endpoint) = &config.endpoint_url {
            let parsed = url::Url::parse(endpoint).map_err(|e| {
                TransferError::InvalidConfig(format!("endpoint url {}: {}", endpoint, e))
            })?;
            info!("Using custom S3 endpoint {}", parsed);
            builder = builder
                .endpoint_url(parsed.as_str().trim_end_matches('/'))
                .force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }

    /// Wrap an already configured SDK client
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

fn service_error<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> StoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|r| r.status().as_u16());
    let code = err.as_service_error().and_then(|e| e.code());
    classify(operation, status, code, DisplayErrorContext(&err).to_string())
}

/// Only server-side failures, throttling and request timeouts are worth
/// another attempt. Every other 4xx is final.
fn classify(
    operation: &'static str,
    status: Option<u16>,
    code: Option<&str>,
    message: String,
) -> StoreError {
    if matches!(code, Some("NoSuchKey") | Some("NotFound")) {
        return StoreError::NotFound(message);
    }
    match status {
        Some(status) if (400..500).contains(&status) && status != 408 && status != 429 => {
            StoreError::Rejected {
                operation,
                status,
                message,
            }
        }
        _ => StoreError::service(operation, message),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head_object(&self, location: &ObjectLocation) -> Result<u64, StoreError> {
        let output = self
            .client
            .head_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .send()
            .await
            .map_err(|e| service_error("HeadObject", e))?;

        let length = output
            .content_length()
            .ok_or(StoreError::MissingField("Content-Length"))?;
        u64::try_from(length).map_err(|_| StoreError::InvalidSize(length))
    }

    async fn get_object_range(
        &self,
        location: &ObjectLocation,
        start: u64,
        end: u64,
    ) -> Result<ByteStream, StoreError> {
        let output = self
            .client
            .get_object()
            .bucket(&location.bucket)
            .key(&location.key)
            .range(format!("bytes={}-{}", start, end))
            .send()
            .await
            .map_err(|e| service_error("GetObject", e))?;

        let body = futures::stream::try_unfold(output.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(StoreError::Stream(e.to_string())),
            }
        });
        Ok(Box::pin(body))
    }

    async fn create_multipart_upload(
        &self,
        location: &ObjectLocation,
        encrypt: bool,
    ) -> Result<String, StoreError> {
        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key);
        if encrypt {
            request = request.server_side_encryption(ServerSideEncryption::Aes256);
        }

        let output = request
            .send()
            .await
            .map_err(|e| service_error("CreateMultipartUpload", e))?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or(StoreError::MissingField("UploadId"))
    }

    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        part_number: u32,
        body: &PartBody,
    ) -> Result<String, StoreError> {
        let length = i64::try_from(body.length)
            .map_err(|_| StoreError::InvalidUpload(format!("part of {} bytes", body.length)))?;
        let stream = SdkByteStream::read_from()
            .path(&body.path)
            .offset(body.offset)
            .length(Length::Exact(body.length))
            .build()
            .await
            .map_err(|e| StoreError::Source(format!("{:?}: {}", body.path, e)))?;

        let output = self
            .client
            .upload_part()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .part_number(part_number as i32)
            .content_length(length)
            .body(stream)
            .send()
            .await
            .map_err(|e| service_error("UploadPart", e))?;

        output
            .e_tag()
            .map(str::to_string)
            .ok_or(StoreError::MissingField("ETag"))
    }

    async fn complete_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), StoreError> {
        let parts = parts
            .iter()
            .map(|p| {
                SdkCompletedPart::builder()
                    .e_tag(&p.token)
                    .part_number(p.part_number() as i32)
                    .build()
            })
            .collect::<Vec<_>>();

        self.client
            .complete_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| service_error("CompleteMultipartUpload", e))?;
        Ok(())
    }

    async fn abort_multipart_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &str,
    ) -> Result<(), StoreError> {
        self.client
            .abort_multipart_upload()
            .bucket(&location.bucket)
            .key(&location.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| service_error("AbortMultipartUpload", e))?;
        Ok(())
    }
}
