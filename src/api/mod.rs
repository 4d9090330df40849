//! API layer
//!
//! HTTP handlers for:
//! - Public resolution API (unauthenticated, viewer-facing)
//! - Admin API (CRUD, multipart upload)
//! - Cloud-disk storage OAuth callback
//! - Metrics (Prometheus)

pub mod admin;
pub mod metrics;
pub mod oauth;
pub mod public;

pub use admin::admin_router;
pub use metrics::metrics_router;
pub use oauth::oauth_router;
pub use public::public_router;
