pub mod browser;
pub mod config;
pub mod error;
pub mod export;
pub mod harvest;
pub mod pattern;

pub use browser::{
    BrowserAutomation, BrowserError, BrowserLauncher, BrowserResult, CapturedLink,
    DiscoveryStrategy, LinkExtractor, PageSession, SessionSnapshot,
};
pub use config::{load_config, BrowserSection, HarvesterConfig};
pub use error::{ConfigError, Result};
pub use export::{ExportArtifacts, ExportError, ExportWriter, ScriptPlatform};
pub use harvest::{
    AggregateLinkSet, BrowserPageVisitor, HarvestError, HarvestOrchestrator, HarvestReport,
    HarvestResult, HarvestStats, HarvestStatus, PageVisitor, RateLimiter,
};
pub use pattern::{PatternError, PatternSet};
