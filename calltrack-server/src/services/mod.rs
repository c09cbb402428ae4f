//! Core services
//!
//! Assembled once at the composition root (`AppState::new`) from narrow
//! client traits; tests assemble them the same way with fakes.

pub mod call_gateway;
pub mod pipeline;
pub mod provisioner;
pub mod retry_sweeper;
pub mod rollup;

pub use call_gateway::{CallLifecycleGateway, RecordingOutcome, StatusOutcome, VoiceInstructions};
pub use pipeline::{PipelineReport, PipelineSettings, RecordingIngestPipeline};
pub use provisioner::{NumberProvisioner, ReleaseResult};
pub use retry_sweeper::RetrySweeper;
pub use rollup::{HourlyRollupAggregator, VolumeTotals};
