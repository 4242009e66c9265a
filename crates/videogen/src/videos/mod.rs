pub mod memory;
pub mod model;
pub mod repo;
pub mod retry;
pub mod service;
pub mod status;
pub mod store;
pub mod sweep;
pub mod update;

pub use memory::MemoryVideoStore;
pub use model::{ReportKind, Video, VideoReport, VideoResult};
pub use repo::PgVideoStore;
pub use service::{CreateVideo, ServiceDeps, ServiceSettings, VideoService};
pub use status::VideoStatus;
pub use store::{ListCursor, ListFilter, StoreError, VideoStore};
pub use sweep::{PollSweeper, SweepConfig, SweepSummary};
pub use update::{ProviderUpdate, UpdateOutcome, WebhookPayload};
