//! MPEG-DASH fragment scheduling with client-side ad insertion.
//!
//! ```text
//!  ┌──────────┐  refresh   ┌─────────────────┐  fragments  ┌───────────┐
//!  │ Manifest ├───────────►│                 ├────────────►│ MediaSink │
//!  └──────────┘            │                 │             └───────────┘
//!                          │FragmentCollector│
//!  ┌──────────┐  ad break  │                 │   events    ┌───────────┐
//!  │   CDAI   ├───────────►│                 ├────────────►│ Embedder  │
//!  └──────────┘            └───────┬─────────┘             └───────────┘
//!                                  │ walker::step per track
//!                           ┌──────▼──────┐
//!                           │ TrackCursor │
//!                           └─────────────┘
//! ```

pub mod cache;
pub mod cdai;
pub mod clock;
pub mod collector;
pub mod config;
pub mod culling;
pub mod cursor;
pub mod drm;
pub mod error;
pub mod event;
pub mod fetch;
pub mod manifest;
pub mod refresh;
pub mod selector;
pub mod sidx;
pub mod sink;
pub mod template;
pub mod util;
pub mod walker;

mod url;

pub use collector::{FragmentCollector, TickOutcome};

pub use cache::{CacheKind, FragmentCache, MemoryCache};
pub use cdai::{AdState, CdaiHandle};
pub use config::DashConfig;
pub use drm::{DrmCollaborator, DrmHelper, KeySystemDrm};
pub use error::{ErrorKind, IoriError, IoriResult};
pub use event::CollectorEvent;
pub use fetch::{FetchResponse, Fetcher, HttpFetcher};
pub use manifest::{DashMpdParser, Manifest, ManifestParser, MediaType};
pub use sink::{FileSink, MediaSink, MemorySink};
pub use util::{http::HttpClient, range::ByteRange};
