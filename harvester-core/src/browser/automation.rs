use std::sync::Arc;

use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::BrowserSection;

use super::error::{BrowserError, BrowserResult};

const VIEWPORT_WIDTH: u32 = 1280;
const VIEWPORT_HEIGHT: u32 = 800;

/// JS installed before any document script runs. Wraps fetch/XMLHttpRequest
/// so every outgoing request URL lands in a page-owned ordered bucket that
/// the session reads back after navigation settles.
const NETWORK_HOOK: &str = r#"
(() => {
    const bucket = [];
    const push = (url) => {
        try {
            bucket.push(String(url || ''));
        } catch (_) {
            // ignore
        }
    };
    Object.defineProperty(window, '__harvesterNetworkLog', {
        value: bucket,
        writable: false,
        configurable: false,
    });

    const originalFetch = window.fetch;
    window.fetch = async (...args) => {
        try {
            const request = args[0];
            push(typeof request === 'string' ? request : request.url);
        } catch (_) {}
        return originalFetch(...args);
    };

    const OriginalXHR = window.XMLHttpRequest;
    window.XMLHttpRequest = function() {
        const xhr = new OriginalXHR();
        const open = xhr.open;
        xhr.open = function(method, url) {
            push(url);
            return open.apply(xhr, arguments);
        };
        return xhr;
    };
})();
"#;

#[derive(Debug, Clone)]
pub struct BrowserLauncher {
    config: Arc<BrowserSection>,
}

impl BrowserLauncher {
    pub fn new(config: BrowserSection) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub async fn launch(&self) -> BrowserResult<BrowserAutomation> {
        let user_agent = self.select_user_agent();
        let chromium_config = self.build_chromium_config(&user_agent)?;
        info!(
            ua = %user_agent,
            headless = self.config.headless,
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        Ok(BrowserAutomation {
            browser,
            handler_task: Some(handler_task),
            user_agent,
        })
    }

    fn select_user_agent(&self) -> String {
        let mut rng = rand::thread_rng();
        self.config
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| {
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
                 Chrome/120.0.0.0 Safari/537.36"
                    .to_string()
            })
    }

    fn build_chromium_config(&self, user_agent: &str) -> BrowserResult<ChromiumConfig> {
        let mut builder = ChromiumConfig::builder().viewport(ChromiumViewport {
            width: VIEWPORT_WIDTH,
            height: VIEWPORT_HEIGHT,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        });

        if let Some(path) = &self.config.executable_path {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }

        let args = vec![
            format!("--user-agent={user_agent}"),
            format!("--window-size={VIEWPORT_WIDTH},{VIEWPORT_HEIGHT}"),
            "--mute-audio".to_string(),
            "--autoplay-policy=no-user-gesture-required".to_string(),
            "--no-first-run".to_string(),
            "--disable-background-timer-throttling".to_string(),
            "--password-store=basic".to_string(),
        ];
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[derive(Debug)]
pub struct BrowserAutomation {
    browser: Browser,
    handler_task: Option<JoinHandle<()>>,
    user_agent: String,
}

impl BrowserAutomation {
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Opens a page inside a fresh incognito browsing context, so cookies
    /// and cache from earlier sources never leak into this one. The network
    /// capture hook is installed before any navigation. A context whose page
    /// setup fails is disposed before the error propagates.
    pub async fn new_context(&self) -> BrowserResult<IsolatedContext> {
        let created = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await?;
        let context_id = created.result.browser_context_id.clone();

        match self.open_page_in(context_id.clone()).await {
            Ok(page) => Ok(IsolatedContext {
                page,
                context_id: Some(context_id),
            }),
            Err(err) => {
                if let Err(dispose_err) = self
                    .browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await
                {
                    warn!(error = %dispose_err, "failed to dispose context after setup error");
                }
                Err(err)
            }
        }
    }

    async fn open_page_in(&self, context_id: BrowserContextId) -> BrowserResult<Page> {
        let params = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = self.browser.new_page(params).await?;
        self.configure_page(&page).await?;
        Ok(page)
    }

    /// Disposing the browsing context tears down every target inside it.
    pub async fn dispose_context(&self, mut context: IsolatedContext) -> BrowserResult<()> {
        if let Some(id) = context.context_id.take() {
            self.browser
                .execute(DisposeBrowserContextParams::new(id))
                .await?;
        }
        Ok(())
    }

    pub async fn shutdown(mut self) -> BrowserResult<()> {
        info!("Shutting down Chromium instance");
        if let Err(err) = self.browser.close().await {
            warn!(error = %err, "Failed to close browser gracefully");
        }
        if let Some(handle) = self.handler_task.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Browser handler join error");
            }
        }
        Ok(())
    }

    async fn configure_page(&self, page: &Page) -> BrowserResult<()> {
        let params = SetUserAgentOverrideParams::builder()
            .user_agent(self.user_agent.clone())
            .build()
            .map_err(BrowserError::Configuration)?;
        page.set_user_agent(params).await?;

        page.evaluate_on_new_document(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(NETWORK_HOOK)
                .build()
                .map_err(BrowserError::Configuration)?,
        )
        .await?;
        Ok(())
    }
}

impl Drop for BrowserAutomation {
    fn drop(&mut self) {
        if let Some(handle) = &self.handler_task {
            if !handle.is_finished() {
                warn!("BrowserAutomation dropped without explicit shutdown");
            }
        }
    }
}

#[derive(Debug)]
pub struct IsolatedContext {
    page: Page,
    context_id: Option<BrowserContextId>,
}

impl IsolatedContext {
    pub fn page(&self) -> &Page {
        &self.page
    }
}
