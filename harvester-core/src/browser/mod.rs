mod automation;
mod error;
mod extractor;
mod session;

pub use automation::{BrowserAutomation, BrowserLauncher, IsolatedContext};
pub use error::{BrowserError, BrowserResult};
pub use extractor::{CapturedLink, DiscoveryStrategy, LinkExtractor};
pub use session::{PageSession, SessionSnapshot};
