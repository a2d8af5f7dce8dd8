//! Resumable HTTP transfer engine
//!
//! Downloads single files, audio streams and video/audio streams with
//! byte-range resume, MD5 verification and per-kind completion pipelines
//! (tagging, demuxing, muxing). Torrent metadata fetches share the same
//! [`Transfer`] interface.
//!
//! ```no_run
//! use transfer_core::{GenericHttpDownload, Transfer, TransferConfig, TransferContext};
//!
//! # async fn run() -> transfer_core::Result<()> {
//! let ctx = TransferContext::new(TransferConfig::with_save_directory("/data/Downloads"))?;
//! let transfer = GenericHttpDownload::new("https://example.org/file.iso", "file.iso")
//!     .with_md5("5eb63bbbe01eeed093cb22bb8f5acdc3")
//!     .start(&ctx)?;
//! println!("{}", transfer.snapshot().display_string());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod file;
pub mod logging;
pub mod media;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use config::TransferConfig;
pub use error::{FailureKind, Result, TransferError};
pub use logging::{init_logging, LogFormat, LoggingConfig};
pub use transfer::{
    AudioSearchResult, AudioStreamDownload, AvMode, AvStreamDownload, GenericHttpDownload,
    HttpTransfer, SourceDetails, StreamLink, StreamSearchResult, Transfer, TransferContext,
    TransferSnapshot, TransferState, UriFetchTransfer,
};
