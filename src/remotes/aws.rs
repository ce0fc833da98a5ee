// Copyright 2021 Paolo Galeone <nessuno@nerdz.eu>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use aws_config::environment::credentials::EnvironmentVariableCredentialsProvider;
use aws_config::imds::credentials::ImdsCredentialsProvider;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError;
use aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError;
use aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError;
use aws_sdk_s3::operation::get_object::GetObjectError;
use aws_sdk_s3::operation::list_objects_v2::ListObjectsV2Error;
use aws_sdk_s3::operation::put_object::PutObjectError;
use aws_sdk_s3::operation::upload_part::UploadPartError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use aws_types::region::Region;

use crate::config::{AwsConfig, CredentialsMode};
use crate::remotes::remote::{self, Body, PutRequest};

use async_trait::async_trait;

use log::{debug, warn};

use std::fmt;

pub const DEFAULT_REGION: &str = "ap-northeast-1";

/// Smallest part S3 accepts in a multipart upload, except for the last one.
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

#[derive(Debug)]
pub enum Error {
    InvalidCredentials(String),
    ListError(SdkError<ListObjectsV2Error>),
    PutError(SdkError<PutObjectError>),
    CreateMultipartError(SdkError<CreateMultipartUploadError>),
    UploadPartError(SdkError<UploadPartError>),
    CompleteMultipartError(SdkError<CompleteMultipartUploadError>),
    AbortMultipartError(SdkError<AbortMultipartUploadError>),
    GetError(SdkError<GetObjectError>),
    MissingUploadId(String),
}

impl From<SdkError<GetObjectError>> for Error {
    fn from(error: SdkError<GetObjectError>) -> Self {
        Error::GetError(error)
    }
}

impl From<SdkError<ListObjectsV2Error>> for Error {
    fn from(error: SdkError<ListObjectsV2Error>) -> Self {
        Error::ListError(error)
    }
}

impl From<SdkError<PutObjectError>> for Error {
    fn from(error: SdkError<PutObjectError>) -> Self {
        Error::PutError(error)
    }
}

impl From<SdkError<CreateMultipartUploadError>> for Error {
    fn from(error: SdkError<CreateMultipartUploadError>) -> Self {
        Error::CreateMultipartError(error)
    }
}

impl From<SdkError<UploadPartError>> for Error {
    fn from(error: SdkError<UploadPartError>) -> Self {
        Error::UploadPartError(error)
    }
}

impl From<SdkError<CompleteMultipartUploadError>> for Error {
    fn from(error: SdkError<CompleteMultipartUploadError>) -> Self {
        Error::CompleteMultipartError(error)
    }
}

impl From<SdkError<AbortMultipartUploadError>> for Error {
    fn from(error: SdkError<AbortMultipartUploadError>) -> Self {
        Error::AbortMultipartError(error)
    }
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidCredentials(msg) => write!(f, "Invalid credentials: {}", msg),
            Error::ListError(error) => {
                write!(f, "AWS List V2 error: {}", DisplayErrorContext(error))
            }
            Error::PutError(error) => {
                write!(f, "AWS Put object error: {}", DisplayErrorContext(error))
            }
            Error::CreateMultipartError(error) => write!(
                f,
                "AWS create multipart upload error: {}",
                DisplayErrorContext(error)
            ),
            Error::UploadPartError(error) => {
                write!(f, "AWS upload part error: {}", DisplayErrorContext(error))
            }
            Error::CompleteMultipartError(error) => write!(
                f,
                "AWS complete multipart upload error: {}",
                DisplayErrorContext(error)
            ),
            Error::AbortMultipartError(error) => write!(
                f,
                "AWS abort multipart upload error: {}",
                DisplayErrorContext(error)
            ),
            Error::GetError(error) => {
                write!(f, "AWS Get object error: {}", DisplayErrorContext(error))
            }
            Error::MissingUploadId(key) => {
                write!(f, "AWS returned no upload id for {}", key)
            }
        }
    }
}

#[derive(Clone)]
pub struct AwsBucket {
    name: String,
    bucket: Bucket,
}

#[derive(Clone)]
struct Bucket {
    client: Client,
    bucket_name: String,
}

fn object_key(remote_path: &str) -> &str {
    remote_path.trim_start_matches('/')
}

/// Size of every part but the last, for the given hint.
fn part_size(hint: usize) -> usize {
    hint.max(MIN_PART_SIZE)
}

/// A body whose first chunk is shorter than a part has already been read
/// whole, and goes out as a single `PutObject`.
fn fits_single_request(first_len: usize, part_size: usize) -> bool {
    first_len < part_size
}

impl Bucket {
    pub async fn list(&self, prefix: &str, max_keys: Option<i32>) -> Result<Vec<String>, Error> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket_name)
            .prefix(object_key(prefix))
            .set_max_keys(max_keys)
            .send()
            .await?;
        Ok(response
            .contents()
            .iter()
            .filter_map(|object| object.key().map(str::to_owned))
            .collect())
    }

    pub async fn put_object(
        &self,
        remote_path: &str,
        content_type: &str,
        content: Vec<u8>,
    ) -> Result<(), Error> {
        self.client
            .put_object()
            .bucket(&self.bucket_name)
            .key(object_key(remote_path))
            .content_type(content_type)
            .body(ByteStream::from(content))
            .send()
            .await?;
        Ok(())
    }

    pub async fn get_object(&self, remote_path: &str) -> Result<Body, remote::Error> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket_name)
            .key(object_key(remote_path))
            .send()
            .await;
        match response {
            Ok(output) => Ok(Box::new(Box::pin(output.body.into_async_read()))),
            Err(error) => {
                let missing = error
                    .as_service_error()
                    .map(|service_error| service_error.is_no_such_key())
                    .unwrap_or(false);
                if missing {
                    Err(remote::Error::NotFound(String::from(remote_path)))
                } else {
                    Err(Error::from(error).into())
                }
            }
        }
    }

    /// Streams `body` as a multipart upload, `first` being the already read
    /// first part. The upload is aborted if any part fails.
    pub async fn put_object_multipart(
        &self,
        remote_path: &str,
        content_type: &str,
        first: Vec<u8>,
        mut body: Body,
        part_size: usize,
    ) -> Result<u64, remote::Error> {
        let key = object_key(remote_path);
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(Error::from)?;
        let upload_id = match upload.upload_id() {
            Some(id) => id.to_owned(),
            None => return Err(Error::MissingUploadId(key.to_owned()).into()),
        };

        let result = self
            .upload_parts(key, &upload_id, first, &mut body, part_size)
            .await;
        let (parts, written) = match result {
            Ok(uploaded) => uploaded,
            Err(error) => {
                if let Err(abort) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket_name)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        "Unable to abort upload {} of {}: {}",
                        upload_id,
                        key,
                        Error::from(abort)
                    );
                }
                return Err(error);
            }
        };

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket_name)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(Error::from)?;
        Ok(written)
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        body: &mut Body,
        part_size: usize,
    ) -> Result<(Vec<CompletedPart>, u64), remote::Error> {
        let mut parts = vec![];
        let mut written: u64 = 0;
        let mut part_number: i32 = 1;
        let mut chunk = first;

        while !chunk.is_empty() {
            let len = chunk.len() as u64;
            let part = self
                .client
                .upload_part()
                .bucket(&self.bucket_name)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(Error::from)?;
            debug!("Uploaded part {} of {} ({} bytes)", part_number, key, len);

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(part.e_tag().map(str::to_owned))
                    .part_number(part_number)
                    .build(),
            );
            written += len;
            part_number += 1;
            chunk = remote::read_chunk(body, part_size).await?;
        }
        Ok((parts, written))
    }
}

impl AwsBucket {
    pub async fn new(config: AwsConfig, bucket_name: &str) -> Result<AwsBucket, Error> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| String::from(DEFAULT_REGION));
        let loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region));

        let loader = match config.credentials {
            CredentialsMode::Chain => loader,
            CredentialsMode::Static => match (&config.access_key, &config.secret_key) {
                (Some(access_key), Some(secret_key)) => loader.credentials_provider(
                    Credentials::from_keys(access_key, secret_key, None),
                ),
                _ => {
                    return Err(Error::InvalidCredentials(String::from(
                        "static credentials require both access_key and secret_key",
                    )))
                }
            },
            CredentialsMode::Profile => match &config.profile {
                Some(profile) => loader.profile_name(profile),
                None => {
                    return Err(Error::InvalidCredentials(String::from(
                        "profile credentials require a profile name",
                    )))
                }
            },
            CredentialsMode::Instance => {
                loader.credentials_provider(ImdsCredentialsProvider::builder().build())
            }
            CredentialsMode::Environment => {
                loader.credentials_provider(EnvironmentVariableCredentialsProvider::new())
            }
        };

        let sdk_config = loader.load().await;
        let mut s3_config = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config = s3_config
                .endpoint_url(endpoint.as_str())
                .force_path_style(true);
        }

        let bucket = Bucket {
            client: Client::from_conf(s3_config.build()),
            bucket_name: bucket_name.to_owned(),
        };

        // Perform a listing request to check if the configuration is ok
        bucket.list("", Some(1)).await?;
        Ok(AwsBucket {
            name: String::from(bucket_name),
            bucket,
        })
    }
}

#[async_trait]
impl remote::ObjectStore for AwsBucket {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn exists(&self, key: &str) -> Result<bool, remote::Error> {
        let listed = self.bucket.list(key, Some(1)).await?;
        Ok(listed.iter().any(|found| found == object_key(key)))
    }

    async fn get_object(&self, key: &str) -> Result<Body, remote::Error> {
        self.bucket.get_object(key).await
    }

    async fn put_object(
        &self,
        request: PutRequest<'_>,
        mut body: Body,
    ) -> Result<u64, remote::Error> {
        let part_size = part_size(request.part_size_hint);
        let first = remote::read_chunk(&mut body, part_size).await?;

        if fits_single_request(first.len(), part_size) {
            let written = first.len() as u64;
            self.bucket
                .put_object(request.key, request.content_type, first)
                .await?;
            return Ok(written);
        }

        self.bucket
            .put_object_multipart(request.key, request.content_type, first, body, part_size)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_trims_leading_separator() {
        assert_eq!(object_key("/site/a/b.txt"), "site/a/b.txt");
        assert_eq!(object_key("site/a/b.txt"), "site/a/b.txt");
        assert_eq!(object_key("//a"), "a");
    }

    #[test]
    fn test_part_size() {
        assert_eq!(part_size(0), MIN_PART_SIZE);
        assert_eq!(part_size(1024), MIN_PART_SIZE);
        assert_eq!(part_size(MIN_PART_SIZE), MIN_PART_SIZE);
        assert_eq!(part_size(10 * 1024 * 1024), 10 * 1024 * 1024);
    }

    #[test]
    fn test_single_request_or_multipart() {
        let size = part_size(0);
        assert!(fits_single_request(0, size));
        assert!(fits_single_request(size - 1, size));
        // A first chunk that fills a whole part may be followed by more data.
        assert!(!fits_single_request(size, size));
        assert!(!fits_single_request(size + 1, size));
    }

    #[tokio::test]
    async fn test_static_credentials_require_keys() {
        let config = AwsConfig {
            region: None,
            credentials: CredentialsMode::Static,
            access_key: Some(String::from("key")),
            secret_key: None,
            profile: None,
            endpoint: None,
        };
        assert!(matches!(
            AwsBucket::new(config, "bucket").await,
            Err(Error::InvalidCredentials(_))
        ));
    }

    #[tokio::test]
    async fn test_profile_credentials_require_name() {
        let config = AwsConfig {
            region: Some(String::from("eu-west-1")),
            credentials: CredentialsMode::Profile,
            access_key: None,
            secret_key: None,
            profile: None,
            endpoint: None,
        };
        assert!(matches!(
            AwsBucket::new(config, "bucket").await,
            Err(Error::InvalidCredentials(_))
        ));
    }
}
