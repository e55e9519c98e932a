//! Scoped headless-browser resource for the rendered-DOM sources.
//!
//! The browser is acquired at run start and torn down when the session value
//! drops, including on error paths. A failed extraction recreates only the
//! tab (`reset`), not the whole browser.

use std::ffi::OsStr;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::debug;

use crate::config::ScraperConfig;

use super::ScrapeError;

const COOKIE_CLICK_JS: &str = r#"
(() => {
    const labels = ['Alles accepteren', 'Accepteer', 'Akkoord'];
    for (const b of document.querySelectorAll('button')) {
        const t = (b.innerText || '').trim();
        if (labels.some(l => t.includes(l))) { b.click(); return true; }
    }
    const cb = document.querySelector('#CybotCookiebotDialogBodyLevelButtonLevelOptinAllowAll');
    if (cb) { cb.click(); return true; }
    return false;
})()
"#;

pub struct BrowserSession {
    browser: Browser,
    tab: Arc<Tab>,
    timeout: Duration,
    user_agent: String,
}

impl BrowserSession {
    pub fn launch(cfg: &ScraperConfig) -> Result<Self, ScrapeError> {
        debug!("Launching headless Chrome");
        let options = LaunchOptions::default_builder()
            .headless(cfg.headless)
            .window_size(Some((1920, 1080)))
            .args(vec![
                OsStr::new("--disable-blink-features=AutomationControlled"),
                OsStr::new("--no-sandbox"),
            ])
            .build()
            .map_err(|e| ScrapeError::Browser(format!("launch options: {e}")))?;

        let browser =
            Browser::new(options).map_err(|e| ScrapeError::Browser(format!("launch: {e}")))?;

        let timeout = Duration::from_secs(cfg.timeout_secs);
        let tab = Self::open_tab(&browser, timeout, &cfg.user_agent)?;

        Ok(Self {
            browser,
            tab,
            timeout,
            user_agent: cfg.user_agent.clone(),
        })
    }

    fn open_tab(
        browser: &Browser,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Arc<Tab>, ScrapeError> {
        let tab = browser
            .new_tab()
            .map_err(|e| ScrapeError::Browser(format!("new tab: {e}")))?;
        tab.set_default_timeout(timeout);
        tab.set_user_agent(user_agent, Some("nl-NL"), None)
            .map_err(|e| ScrapeError::Browser(format!("user agent: {e}")))?;
        Ok(tab)
    }

    /// Replace the tab after a mid-extraction failure to clear corrupted
    /// page state.
    pub fn reset(&mut self) -> Result<(), ScrapeError> {
        debug!("Recreating browser tab");
        self.tab = Self::open_tab(&self.browser, self.timeout, &self.user_agent)?;
        Ok(())
    }

    pub fn goto(&self, url: &str) -> Result<(), ScrapeError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| ScrapeError::Browser(format!("navigate {url}: {e}")))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| ScrapeError::Timeout(format!("navigation to {url}: {e}")))?;
        Ok(())
    }

    /// Wait for a selector to appear. A miss is a timeout by definition.
    pub fn wait_for(&self, selector: &str) -> Result<(), ScrapeError> {
        self.tab
            .wait_for_element(selector)
            .map(|_| ())
            .map_err(|e| ScrapeError::Timeout(format!("waiting for {selector}: {e}")))
    }

    /// The fully rendered document, for parsing with the `scraper` crate.
    pub fn html(&self) -> Result<String, ScrapeError> {
        let result = self
            .tab
            .evaluate("document.documentElement.outerHTML", false)
            .map_err(|e| ScrapeError::Browser(format!("capture html: {e}")))?;
        result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| ScrapeError::Browser("empty document".into()))
    }

    /// Click the first match; false when the element is absent.
    pub fn click(&self, selector: &str) -> Result<bool, ScrapeError> {
        match self.tab.find_element(selector) {
            Ok(element) => {
                element
                    .click()
                    .map_err(|e| ScrapeError::Browser(format!("click {selector}: {e}")))?;
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Dismiss the usual Dutch consent banners. Best effort; absence of a
    /// banner is not an error.
    pub fn accept_cookies(&self) {
        match self.tab.evaluate(COOKIE_CLICK_JS, false) {
            Ok(result) => {
                if result.value.as_ref().and_then(|v| v.as_bool()) == Some(true) {
                    debug!("Cookie banner accepted");
                }
            }
            Err(e) => debug!("Cookie handling: {e}"),
        }
    }
}
