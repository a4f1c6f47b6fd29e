use async_trait::async_trait;
use regex::Regex;

use crate::cookies::BrowserCookie;

#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    #[error("no element matching {0}")]
    NotFound(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("driver error: {0}")]
    Other(String),
}

/// Contract the entitlement resolver expects from a browser-automation
/// driver.
///
/// One driver instance owns one page in one signed-in browser context;
/// the resolver walks it through login and ticket selection strictly
/// sequentially. Implementations are expected to bound every wait and
/// return [`DriverError::Timeout`] rather than hang, the resolver applies
/// its own bound on top regardless.
#[async_trait]
pub trait PageDriver: Send {
    /// Navigate the page to `url` and wait for the document to load.
    async fn goto(&mut self, url: &str) -> Result<(), DriverError>;

    /// Wait until in-flight network requests have settled.
    async fn wait_until_idle(&mut self) -> Result<(), DriverError>;

    async fn click(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Click the first element rendering the given visible text.
    async fn click_text(&mut self, text: &str) -> Result<(), DriverError>;

    async fn hover(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Fill the input matching `selector` with `value`.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), DriverError>;

    /// Wait for an element matching `selector` to appear.
    async fn wait_for(&mut self, selector: &str) -> Result<(), DriverError>;

    /// Probe for `selector` without waiting for it to appear.
    async fn is_present(&mut self, selector: &str) -> Result<bool, DriverError>;

    /// Inner text of every element matching `selector`, in document order.
    async fn inner_texts(&mut self, selector: &str) -> Result<Vec<String>, DriverError>;

    /// Wait until the page URL contains `fragment`.
    async fn wait_for_url_contains(&mut self, fragment: &str) -> Result<(), DriverError>;

    /// Click `selector`, then resolve with the URL of the first network
    /// response whose URL matches `pattern`.
    async fn click_and_capture_response(
        &mut self,
        selector: &str,
        pattern: &Regex,
    ) -> Result<String, DriverError>;

    /// Cookies currently held by the browser context for `domain`.
    async fn cookies(&mut self, domain: &str) -> Result<Vec<BrowserCookie>, DriverError>;

    /// Add cookies to the browser context.
    async fn add_cookies(&mut self, cookies: &[BrowserCookie]) -> Result<(), DriverError>;

    /// The user-agent string the browser presents to sites.
    async fn user_agent(&mut self) -> Result<String, DriverError>;
}
