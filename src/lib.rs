//! reelcast: on-demand media transcoding and background maintenance.
//!
//! The binary drives the `rc-av` pipeline from the command line; this
//! library exposes the pieces it is built from for integration testing.

pub mod maintenance;
pub mod transcode;
