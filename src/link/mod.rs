//! Link Client
//!
//! Producer-side transport to the ingest listener: a permanent, registered
//! connection per machine plus Fourier downsampling of waveform batches.

pub mod client;
pub mod resample;

pub use client::{spawn_link, LinkConnection, LinkError, LinkHandle};
pub use resample::{downsample, resample};
