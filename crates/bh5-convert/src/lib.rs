//! # bh5-convert
//!
//! Converts proprietary neural-recording containers — an event-stream
//! format ("NEV") and two revisions of a continuous-sampling format
//! ("NSx" 2.1 and 2.2) — into the self-describing BH5 container.
//!
//! ## Pipeline
//!
//! 1. **Sniff** the 8-byte magic token and select a decoding pipeline.
//! 2. **Decode headers** into the canonical descriptor model
//!    ([`descriptor`]): channels, digital lines, trackable objects, the
//!    synchronization source, and session root metadata.
//! 3. **Build the schema** ([`schema`]): destination groups, attributes,
//!    and pre-declared record streams.
//! 4. **Route records**: stream every data packet or sample tuple into
//!    the right destination stream with chunked, buffered appends,
//!    lazily creating streams the header never declared.
//!
//! The pipeline is strictly sequential and owns all of its state for the
//! duration of one [`convert`] call.
//!
//! ## Example
//! ```rust,no_run
//! use bh5_convert::{convert, ConvertOptions};
//!
//! let report = convert(
//!     "session.nev".as_ref(),
//!     "session.nev.bh5".as_ref(),
//!     &ConvertOptions::default(),
//! )
//! .unwrap();
//! println!("{} records", report.records);
//! ```

pub mod convert;
pub mod descriptor;
pub mod error;
pub mod nev;
pub mod nsx21;
pub mod nsx22;
pub mod schema;
pub mod source;

pub use convert::{convert, ConversionReport, ConvertOptions};
pub use descriptor::{
    ChannelDescriptor, ChannelExtDescriptor, DigitalLineDescriptor, FilterSpec, RootMetadata,
    SignalRangeDescriptor, SpikeSortDescriptor, SynchDescriptor, TrackingDescriptor, TrackingKind,
    MAX_ANALOG_CHANNELS, MAX_TRACK_OBJECTS,
};
pub use error::{ConvertError, Result};
pub use source::{sniff, SourceKind, MAGIC_SIZE, NEV_MAGIC, NSX21_MAGIC, NSX22_MAGIC};
