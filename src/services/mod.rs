//! Service layer: data access, caching and external integrations.

pub mod ai_client;
pub mod analysis;
pub mod analysis_pipeline;
pub mod cache;
pub mod dms;
pub mod file_cache;
pub mod tender_actions;
pub mod tender_filter;

pub use ai_client::AiClient;
pub use analysis::AnalysisService;
pub use cache::RedisCache;
pub use dms::DmsService;
pub use file_cache::{RemoteFileCache, RetryPolicy};
pub use tender_actions::TenderActionService;
pub use tender_filter::TenderFilterService;
