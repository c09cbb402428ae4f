//! HTTP API handlers

pub mod health;
pub mod media;
pub mod rollups;
pub mod tenant;
pub mod tracking_numbers;
pub mod webhooks;

pub use health::health_routes;
pub use media::media_routes;
pub use rollups::rollup_routes;
pub use tenant::TenantId;
pub use tracking_numbers::tracking_number_routes;
pub use webhooks::webhook_routes;
