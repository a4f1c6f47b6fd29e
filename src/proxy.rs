use axum::body::Body;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::TryStreamExt;

use crate::download_session::DownloadSession;
use crate::session::Session;

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    UpstreamRequestFailed(#[from] reqwest::Error),
}

/// Build the upstream URL for a forwarded request. Download hosts serve
/// HTTPS only, so the inbound scheme is deliberately ignored.
pub fn upstream_url(host: &str, path_and_query: &str) -> String {
    format!("https://{}{}", host, path_and_query)
}

/// Cookie header replaying the captured identity, in the fixed order the
/// download hosts expect.
pub fn cookie_header(view: &DownloadSession<'_>) -> String {
    format!(
        "keep=1; hl=en; did={}; fftc_id={}; tc_ss={}",
        view.user_id(),
        view.user_friendly_id(),
        view.session_id()
    )
}

/// Forward an inbound request to the download host, authenticating with
/// the given session, and stream the response back without buffering.
///
/// The upstream status and body pass through untouched; the session is
/// only ever read. Empty session fields produce a failing request, not a
/// panic.
pub async fn forward(
    client: &reqwest::Client,
    method: &Method,
    path_and_query: &str,
    session: &Session,
) -> Result<Response, ProxyError> {
    let view = DownloadSession::new(session);
    let url = upstream_url(&view.host(), path_and_query);
    debug!("forwarding {} {}", method, url);

    // method names are byte-identical across the two http crate versions
    let method = reqwest::Method::from_bytes(method.as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);

    let mut request = client
        .request(method, url.as_str())
        .header(reqwest::header::HOST, view.host())
        .header(reqwest::header::COOKIE, cookie_header(&view));

    // captured user-agent strings may not satisfy strict header grammar
    match reqwest::header::HeaderValue::from_bytes(view.user_agent().as_bytes()) {
        Ok(value) => request = request.header(reqwest::header::USER_AGENT, value),
        Err(_) => warn!("dropping unrepresentable user-agent {:?}", view.user_agent()),
    }

    let upstream = request.send().await?;

    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let stream = upstream
        .bytes_stream()
        .inspect_err(|err| warn!("upstream body copy failed: {}", err));

    let mut response = Body::from_stream(stream).into_response();
    *response.status_mut() = status;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStore;

    #[test]
    fn upstream_urls_hardcode_https() {
        assert_eq!(
            upstream_url("dl999.example.tv", "/foo/master.m3u8?a=1"),
            "https://dl999.example.tv/foo/master.m3u8?a=1"
        );
        assert_eq!(upstream_url("dl999.example.tv", "/"), "https://dl999.example.tv/");
    }

    #[test]
    fn cookie_header_uses_fixed_order() {
        let store = SessionStore::new();
        let session = store.get_or_create("80");
        let view = DownloadSession::new(&session);
        view.set_user_id("8c1f6d2e40a94d7");
        view.set_user_friendly_id("operator_taro");
        view.set_session_id("4f1fc6");

        assert_eq!(
            cookie_header(&view),
            "keep=1; hl=en; did=8c1f6d2e40a94d7; fftc_id=operator_taro; tc_ss=4f1fc6"
        );
    }

    #[test]
    fn cookie_header_tolerates_empty_fields() {
        let store = SessionStore::new();
        let session = store.get_or_create("80");
        let view = DownloadSession::new(&session);

        assert_eq!(cookie_header(&view), "keep=1; hl=en; did=; fftc_id=; tc_ss=");
    }

    #[tokio::test]
    async fn forwarding_with_empty_session_fails_without_panicking() {
        let store = SessionStore::new();
        let session = store.get_or_create("80");
        let client = reqwest::Client::new();

        // empty host makes the upstream URL unparseable, the request
        // errors before any network traffic
        let result = forward(&client, &Method::GET, "/foo/master.m3u8", &session).await;
        assert!(matches!(result, Err(ProxyError::UpstreamRequestFailed(_))));
    }
}
