use std::sync::Arc;

use axum::extract::{Form, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::download_session::DownloadSession;
use crate::proxy;
use crate::session::SessionStore;

const CONFIG_PATH: &str = "/config";

/// Shared state handed to every handler. The target session is addressed
/// by an explicit key rather than through process-wide state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SessionStore>,
    pub http: reqwest::Client,
    pub session_key: String,
}

/// Inbound surface: the configuration endpoint, and a catch-all that
/// forwards everything else to the download host.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(CONFIG_PATH, get(show_config).post(save_config))
        .fallback(forward_request)
        .with_state(state)
}

async fn forward_request(State(state): State<AppState>, method: Method, uri: Uri) -> Response {
    let session = state.store.get_or_create(&state.session_key);
    if session.is_empty() {
        // nothing to authenticate with yet
        return Redirect::temporary(CONFIG_PATH).into_response();
    }

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    match proxy::forward(&state.http, &method, path_and_query, &session).await {
        Ok(response) => response,
        Err(err) => {
            error!("{} {}: {}", method, uri, err);
            (StatusCode::BAD_GATEWAY, err.to_string()).into_response()
        }
    }
}

/// Form fields mirror the five download-session fields, minus the user
/// agent, which is taken from the request's own header on submit.
#[derive(Debug, Default, Deserialize)]
struct ConfigForm {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    userid: Option<String>,
    #[serde(default)]
    userfriendlyid: Option<String>,
    #[serde(default)]
    sessionid: Option<String>,
}

async fn show_config(State(state): State<AppState>) -> Html<String> {
    let session = state.store.get_or_create(&state.session_key);
    let view = DownloadSession::new(&session);
    Html(render_form(&view))
}

async fn save_config(
    State(state): State<AppState>,
    headers: HeaderMap,
    Form(form): Form<ConfigForm>,
) -> Redirect {
    let session = state.store.get_or_create(&state.session_key);
    let view = DownloadSession::new(&session);

    // blank submitted values mean "leave unchanged"
    if let Some(host) = submitted(form.host) {
        view.set_host(&host);
    }
    if let Some(userid) = submitted(form.userid) {
        view.set_user_id(&userid);
    }
    if let Some(userfriendlyid) = submitted(form.userfriendlyid) {
        view.set_user_friendly_id(&userfriendlyid);
    }
    if let Some(sessionid) = submitted(form.sessionid) {
        view.set_session_id(&sessionid);
    }

    if let Some(user_agent) = headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok()) {
        view.set_user_agent(user_agent);
    }

    info!("download session {} reconfigured", session.key());
    Redirect::to(CONFIG_PATH)
}

fn submitted(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn render_form(view: &DownloadSession<'_>) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>tca-rs</title></head>
<body>
<h1>Download session</h1>
<p>Leave a field blank to keep its current value. The user agent is taken from this browser on save.</p>
<form method="post" action="{}">
<label>Host <input name="host" value="{}"></label><br>
<label>User id <input name="userid" value="{}"></label><br>
<label>User friendly id <input name="userfriendlyid" value="{}"></label><br>
<label>Session id <input name="sessionid" value="{}"></label><br>
<button type="submit">Save</button>
</form>
</body>
</html>"#,
        CONFIG_PATH,
        escape_attr(&view.host()),
        escape_attr(&view.user_id()),
        escape_attr(&view.user_friendly_id()),
        escape_attr(&view.session_id()),
    )
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Command line for saving the resolved stream through the local proxy.
pub fn ffmpeg_hint(port: u16, playlist_url: &str) -> Option<String> {
    let url = reqwest::Url::parse(playlist_url).ok()?;
    let mut path_and_query = url.path().to_string();
    if let Some(query) = url.query() {
        path_and_query.push('?');
        path_and_query.push_str(query);
    }
    Some(format!(
        "ffmpeg -i \"http://localhost:{}{}\" -c copy output.mkv",
        port, path_and_query
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        AppState {
            store: Arc::new(SessionStore::new()),
            http: reqwest::Client::new(),
            session_key: "5000".to_string(),
        }
    }

    #[tokio::test]
    async fn blank_fields_leave_session_unchanged() {
        let state = test_state();
        let session = state.store.get_or_create(&state.session_key);
        DownloadSession::new(&session).set_session_id("4f1fc6");

        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, "TestAgent/1.0".parse().expect("valid header"));
        let form = ConfigForm {
            host: Some("x.example.tv".to_string()),
            userid: None,
            userfriendlyid: Some("".to_string()),
            sessionid: Some("  ".to_string()),
        };

        save_config(State(state.clone()), headers, Form(form)).await;

        let view = DownloadSession::new(&session);
        assert_eq!(view.host(), "x.example.tv");
        assert_eq!(view.session_id(), "4f1fc6");
        assert_eq!(view.user_friendly_id(), "");
        assert_eq!(view.user_agent(), "TestAgent/1.0");
    }

    #[tokio::test]
    async fn config_form_prefills_current_values() {
        let state = test_state();
        let session = state.store.get_or_create(&state.session_key);
        let view = DownloadSession::new(&session);
        view.set_host("dl193250.twitcasting.tv");
        view.set_user_id("8c1f6d2e40a94d7");

        let Html(page) = show_config(State(state.clone())).await;
        assert!(page.contains(r#"name="host" value="dl193250.twitcasting.tv""#));
        assert!(page.contains(r#"name="userid" value="8c1f6d2e40a94d7""#));
    }

    #[tokio::test]
    async fn empty_session_redirects_to_config() {
        let state = test_state();

        let response = forward_request(
            State(state),
            Method::GET,
            Uri::from_static("/foo/master.m3u8"),
        )
        .await;

        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(
            response
                .headers()
                .get(header::LOCATION)
                .and_then(|v| v.to_str().ok()),
            Some(CONFIG_PATH)
        );
    }

    #[test]
    fn form_values_are_escaped() {
        assert_eq!(
            escape_attr(r#""><script>alert(1)</script>"#),
            "&quot;&gt;&lt;script&gt;alert(1)&lt;/script&gt;"
        );
    }

    #[test]
    fn ffmpeg_hint_points_at_the_local_proxy() {
        assert_eq!(
            ffmpeg_hint(5000, "https://dl999.example.tv/foo/master.m3u8?a=1"),
            Some(r#"ffmpeg -i "http://localhost:5000/foo/master.m3u8?a=1" -c copy output.mkv"#.to_string())
        );
        assert!(ffmpeg_hint(5000, "not a url").is_none());
    }
}
