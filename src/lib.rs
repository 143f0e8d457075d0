#![cfg_attr(docsrs, feature(doc_cfg))]

//! # Description
//!
//! Resumable, concurrent multipart transfers between local data and object
//! storage.
//!
//! An upload cuts a [`DataSource`] into parts, sends them concurrently, and
//! assembles them into one object. A download fetches an object as ranges
//! written concurrently into a [`Destination`]. Both record each finished
//! part in a ledger, so an interrupted transfer started again with the same
//! configuration only moves what is missing.
//!
//! Two upload protocols are supported: the session protocol of S3-style
//! multipart uploads ([`MultipartApi`]), and a block-chaining protocol where
//! fixed-size blocks are uploaded independently and then assembled from
//! their contexts ([`BlockApi`]).
//!
//! # Examples
//!
//! ```rust,no_run
//! use resumable_transfer::{ByteSize, SdkClient, UploadBuilder};
//! use resumable_transfer::ledger::FileRecorder;
//! use resumable_transfer::source::FileSource;
//!
//! # async fn f() -> resumable_transfer::error::Result<()> {
//! /// For convenience `aws_config` is re-exported, as is `aws_sdk_s3` under
//! /// the symbol `aws_sdk`.
//! let client = SdkClient::defaults().await;
//!
//! /// Upload in 8 MiB parts, four at a time, recording finished parts in
//! /// files under the temp directory.
//! let uploader = UploadBuilder::new(client)
//!     .part_size(ByteSize::mib(8))
//!     .concurrency(4)
//!     .recorder(FileRecorder::in_temp_dir())
//!     .build_session();
//!
//! /// Running this again after an interruption skips the parts that were
//! /// already uploaded.
//! let source = FileSource::open("data/archive.tar").await?;
//! let object = uploader
//!     .upload(("a-bucket-us-east-1", "backups/archive.tar"), &source)
//!     .await?;
//! println!("created {} with entity tag {}", object.uri, object.etag);
//! #     Ok(())
//! # }
//! ```
//!
//! [`DataSource`]: crate::source::DataSource
//! [`Destination`]: crate::destination::Destination
use self::ledger::{Ledger, NoopRecorder, ResumableRecorder};
use self::progress::OnProgress;
use self::uri::Endpoints;

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

#[doc(hidden)]
pub extern crate aws_config;
#[doc(hidden)]
pub extern crate aws_sdk_s3 as aws_sdk;

pub use bytesize::ByteSize;

#[macro_use]
mod trace;

pub mod cancel;
pub mod checksum;

mod client;
pub use client::{BlockApi, DownloadApi, MultipartApi, SdkClient};

pub mod destination;
pub mod download;
#[doc(inline)]
pub use download::{DownloadedObject, Downloader};

pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod progress;
pub mod scheduler;
pub mod source;

pub mod upload;
#[doc(inline)]
pub use upload::{ChainedUploader, MultipartUploader, SessionUploader, Uploader};

pub mod request {
    //! Request and response objects of the remote APIs.
    //!
    //! A client implementing [`MultipartApi`], [`BlockApi`], or
    //! [`DownloadApi`] receives these and answers with them.
    //!
    //! [`MultipartApi`]: crate::MultipartApi
    //! [`BlockApi`]: crate::BlockApi
    //! [`DownloadApi`]: crate::DownloadApi
    pub use super::client::request::*;
}

pub mod uri;
#[doc(inline)]
pub use uri::ObjectUri;

const MIN_PART_SIZE: ByteSize = ByteSize::mib(1);
const MAX_PART_SIZE: ByteSize = ByteSize::gib(1);
const DEFAULT_PART_SIZE: ByteSize = ByteSize::mib(4);
const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_PART_ATTEMPTS: usize = 3;

/// Settings shared by uploads and downloads.
#[derive(Clone)]
pub(crate) struct TransferConfig {
    pub(crate) part_size: u64,
    pub(crate) concurrency: usize,
    pub(crate) part_attempts: usize,
    pub(crate) single_part_threshold: u64,
    pub(crate) on_progress: Option<Arc<dyn OnProgress>>,
    pub(crate) endpoints: Endpoints,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE.as_u64(),
            concurrency: DEFAULT_CONCURRENCY,
            part_attempts: DEFAULT_PART_ATTEMPTS,
            single_part_threshold: 0,
            on_progress: None,
            endpoints: Endpoints::default(),
        }
    }
}

impl TransferConfig {
    fn part_size(self, limit: ByteSize) -> Self {
        Self {
            // Clamp to MIN <= part_size <= min(MAX, usize::MAX).
            part_size: limit
                .max(MIN_PART_SIZE)
                .min(MAX_PART_SIZE)
                .min(ByteSize::b(usize::MAX as u64))
                .as_u64(),
            ..self
        }
    }
}

impl Debug for TransferConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferConfig")
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .field("part_attempts", &self.part_attempts)
            .field("single_part_threshold", &self.single_part_threshold)
            .field("on_progress", &self.on_progress.is_some())
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// Configures and builds an [`Uploader`].
#[derive(Debug)]
pub struct UploadBuilder<C> {
    client: C,
    config: TransferConfig,
    recorder: Arc<dyn ResumableRecorder>,
}

impl<C> UploadBuilder<C> {
    /// Create an `UploadBuilder` from a client.
    ///
    /// By default nothing is recorded, so uploads are not resumable until a
    /// recorder is set.
    pub fn new(client: C) -> Self {
        Self {
            client,
            config: TransferConfig::default(),
            recorder: Arc::new(NoopRecorder),
        }
    }

    /// Set the size of a part, between 1 MiB and 1 GiB.
    ///
    /// The block-chaining protocol ignores this: its blocks are always
    /// [`BLOCK_SIZE`](upload::BLOCK_SIZE).
    pub fn part_size(self, limit: ByteSize) -> Self {
        Self {
            config: self.config.part_size(limit),
            ..self
        }
    }

    /// Set the maximum number of parts in flight at one time.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.config.concurrency = limit.max(1);
        self
    }

    /// Set how many times a part is sent before a retryable failure fails
    /// the upload.
    pub fn part_attempts(mut self, attempts: usize) -> Self {
        self.config.part_attempts = attempts.max(1);
        self
    }

    /// Sources of known size up to `limit` are uploaded as a single part.
    ///
    /// The threshold is at most 1 GiB, the largest part there can be.
    pub fn single_part_threshold(mut self, limit: ByteSize) -> Self {
        self.config.single_part_threshold = limit.min(MAX_PART_SIZE).as_u64();
        self
    }

    /// Record finished parts with `recorder`, which makes uploads resumable.
    pub fn recorder<R: ResumableRecorder + 'static>(self, recorder: R) -> Self {
        Self {
            recorder: Arc::new(recorder),
            ..self
        }
    }

    /// Report progress to `callback`.
    pub fn on_progress<F: OnProgress + 'static>(mut self, callback: F) -> Self {
        self.config.on_progress = Some(Arc::new(callback));
        self
    }

    /// Send requests to these endpoints, in order of preference.
    pub fn endpoints<I, T>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.config.endpoints = Endpoints::new(endpoints);
        self
    }
}

impl<C: MultipartApi> UploadBuilder<C> {
    /// Build an [`Uploader`] speaking the session protocol.
    pub fn build_session(self) -> Uploader<SessionUploader<C>> {
        let ledger = Ledger::new(self.recorder);
        let protocol = SessionUploader::new(self.client, ledger, self.config.endpoints.clone());
        Uploader::new(protocol, self.config)
    }
}

impl<C: BlockApi> UploadBuilder<C> {
    /// Build an [`Uploader`] speaking the block-chaining protocol.
    pub fn build_chained(self) -> Uploader<ChainedUploader<C>> {
        let ledger = Ledger::new(self.recorder);
        let protocol = ChainedUploader::new(self.client, ledger, self.config.endpoints.clone());
        Uploader::new(protocol, self.config)
    }
}

/// Configures and builds a [`Downloader`].
#[derive(Debug)]
pub struct DownloadBuilder<C> {
    client: C,
    config: TransferConfig,
    recorder: Arc<dyn ResumableRecorder>,
}

impl<C: DownloadApi> DownloadBuilder<C> {
    /// Create a `DownloadBuilder` from a client.
    pub fn new(client: C) -> Self {
        Self {
            client,
            config: TransferConfig::default(),
            recorder: Arc::new(NoopRecorder),
        }
    }

    /// Set the size of the ranges an object is fetched in, between 1 MiB and
    /// 1 GiB.
    pub fn part_size(self, limit: ByteSize) -> Self {
        Self {
            config: self.config.part_size(limit),
            ..self
        }
    }

    /// Set the maximum number of ranges in flight at one time.
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.config.concurrency = limit.max(1);
        self
    }

    /// Set how many requests are made for a range before a retryable
    /// failure fails the download.
    pub fn part_attempts(mut self, attempts: usize) -> Self {
        self.config.part_attempts = attempts.max(1);
        self
    }

    /// Record how far each range got with `recorder`.
    pub fn recorder<R: ResumableRecorder + 'static>(self, recorder: R) -> Self {
        Self {
            recorder: Arc::new(recorder),
            ..self
        }
    }

    /// Report progress to `callback`.
    ///
    /// Objects fetched in one stream report no total.
    pub fn on_progress<F: OnProgress + 'static>(mut self, callback: F) -> Self {
        self.config.on_progress = Some(Arc::new(callback));
        self
    }

    /// Send requests to these endpoints, in order of preference.
    pub fn endpoints<I, T>(mut self, endpoints: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.config.endpoints = Endpoints::new(endpoints);
        self
    }

    /// Build the [`Downloader`].
    pub fn build(self) -> Downloader<C> {
        Downloader::new(self.client, Ledger::new(self.recorder), self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn part_limits_are_clamped() {
        let builder = UploadBuilder::new(())
            .part_size(ByteSize::kib(1))
            .single_part_threshold(ByteSize::gib(5));
        assert_eq!(builder.config.part_size, MIN_PART_SIZE.as_u64());
        assert_eq!(
            builder.config.single_part_threshold,
            MAX_PART_SIZE.as_u64()
        );
    }
}
