//! Artifact download pipeline: fetch with the authenticated context, verify
//! the image signature, store by content hash.

pub mod artifact;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod format;
pub mod retry;
pub mod store;

pub use {
    artifact::ImageArtifact,
    downloader::{ArtifactDownloader, DownloadReport},
    error::{Error, Result},
    fetch::{HttpFetcher, PageFetcher, ResourceFetcher, RoutedFetcher},
    format::{ImageKind, verify},
    retry::RetryPolicy,
    store::{ArtifactStore, StoredFile, content_hash, prompt_dir_name},
};
