use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug)]
pub enum CookieFileError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    #[error("malformed cookie file")]
    MalformedError(#[from] serde_json::Error),
}

/// Single cookie record as exported by the browser-automation driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

/// Read a cookie cache file written by [`save`] or exported from a
/// previous browser run.
pub async fn load(path: &Path) -> Result<Vec<BrowserCookie>, CookieFileError> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

/// Persist a cookie jar so a later run can skip the interactive login.
pub async fn save(path: &Path, cookies: &[BrowserCookie]) -> Result<(), CookieFileError> {
    let raw = serde_json::to_string_pretty(cookies)?;
    tokio::fs::write(path, raw).await?;
    Ok(())
}

/// Keep only cookies scoped to `domain` or one of its dotted parents.
pub fn scoped_to_domain(cookies: Vec<BrowserCookie>, domain: &str) -> Vec<BrowserCookie> {
    cookies
        .into_iter()
        .filter(|cookie| {
            let cookie_domain = cookie.domain.trim_start_matches('.');
            cookie_domain == domain || cookie_domain.ends_with(&format!(".{}", domain))
        })
        .collect()
}
