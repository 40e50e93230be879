//! Boundary to the schedule scraping collaborator.
//!
//! - [`ScheduleSource`] - fetches one raw record per call
//! - [`RawScheduleRecord`] - the record as printed by the scraper
//! - [`normalize_record`] - coercion and interval normalization
//! - [`SourceError`] - error type with retry classification
//!
//! ```text
//! scraper program ──stdout──▶ CommandSource ─┐
//! record.json ──────────────▶ FileSource ────┤ ScheduleSource
//!                                            ▼
//!                                  RawScheduleRecord
//!                                            │ normalize_record()
//!                                            ▼
//!                                   NormalizedRecord
//! ```

pub mod command;
pub mod error;
pub mod file;
pub mod normalize;
pub mod raw;
pub mod source;

pub use command::{CommandSource, DEFAULT_COMMAND_TIMEOUT};
pub use error::{SourceError, SourceErrorCode, SourceResult};
pub use file::FileSource;
pub use normalize::{NormalizedRecord, normalize_record, shutdown_reason};
pub use raw::{RawDay, RawGroup, RawSchedule, RawScheduleRecord, RawShutdown, RawShutdownKind};
pub use source::{BoxFuture, ErrorSource, ScheduleSource, StaticSource};
