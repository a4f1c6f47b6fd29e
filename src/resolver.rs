use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::{
    cookies::{self, BrowserCookie},
    download_session::DownloadSession,
    driver::{DriverError, PageDriver},
    session::Session,
};

const BASE_URL: &str = "https://twitcasting.tv";
const LOGIN_WINDOW_URL: &str = "https://twitcasting.tv/indexloginwindow.php";
const SITE_DOMAIN: &str = "twitcasting.tv";

const COOKIE_USER_ID: &str = "did";
const COOKIE_USER_FRIENDLY_ID: &str = "tc_id";
const COOKIE_SESSION_ID: &str = "tc_ss";

const SEL_TICKET_TITLE: &str = ".tw-shop-ticket-card2 .tw-shop-ticket-card2-title";
const SEL_ARCHIVE_TITLE: &str = ".tw-movie-thumbnail2-title";
const SEL_PLAY_BUTTON: &str = ".vjs-big-play-button";
const SEL_TWITTER_LOGIN: &str = ".tw-casaccount-button[aria-label=\"Twitter\"]";
const SEL_OAUTH_ALLOW: &str = "#allow";
const SEL_USERNAME_INPUT: &str = "[autocomplete=\"username\"]";
const SEL_VERIFICATION_INPUT: &str = "[data-testid=\"ocfEnterTextTextInput\"]";
const SEL_PASSWORD_INPUT: &str = "[name=\"password\"]";
const ARCHIVE_LINK_TEXT: &str = "Go to archive page";

/// Archive listings ellipsize long titles; this many leading characters
/// are assumed sufficient to identify a recording.
const TITLE_MATCH_CHARS: usize = 10;

/// Login steps, in the order a fresh sign-in visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    RestoringCookies,
    OAuthHandshake,
    CredentialEntry,
    TwoFactorChallenge,
    PasswordEntry,
    AwaitingRedirect,
    Authenticated,
    Failed,
}

/// Ticket-to-playlist steps, entered only once authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    ListingTickets,
    SelectingTicket,
    NavigatingToEventPage,
    NavigatingToArchivePage,
    LocatingArchiveEntry,
    ResolvingPlaylist,
    Resolved,
    Failed,
}

/// Which ticket to resolve when the listing holds more than one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketSelection {
    /// First ticket in document order, the unattended default.
    First,
    Named(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ResolverError {
    #[error("login flow failed during {step:?}: {source}")]
    AuthenticationFailed { step: AuthState, source: DriverError },
    #[error("account holds no tickets")]
    NoEntitlements,
    #[error("no archive entry matching {0:?}")]
    TicketNotLocatable(String),
    #[error("no playlist response observed during playback start")]
    PlaylistNotFound,
    #[error("cookie cache unusable")]
    CookieFile(#[from] cookies::CookieFileError),
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    #[error("malformed credentials file")]
    MalformedCredentials(#[from] serde_json::Error),
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),
}

/// Twitter credentials consumed by the fresh-login branch.
#[derive(Debug, Deserialize)]
struct Credentials {
    email: String,
    phonenumber: String,
    password: String,
}

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Cookie cache; present means interactive login can be skipped,
    /// and a successful fresh login writes the jar back here.
    pub cookie_file: PathBuf,
    pub credentials_file: PathBuf,
    /// Upper bound on any single navigation or DOM wait.
    pub step_timeout: Duration,
    /// Identifies the playlist response observed during playback start.
    pub playlist_pattern: Regex,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cookie_file: PathBuf::from(".data/cookies.json"),
            credentials_file: PathBuf::from(".data/credentials.json"),
            step_timeout: Duration::from_secs(30),
            playlist_pattern: Regex::new(r"master\.m3u8").expect("pattern is valid"),
        }
    }
}

/// Outcome of a full resolver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Signed media-playlist URL; its path can be fetched through the
    /// proxy for as long as the captured identity stays valid.
    pub playlist_url: String,
}

/// Identity material read from the signed-in browser context. Fields for
/// cookies absent from the jar are empty, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_friendly_id: String,
    pub session_id: String,
    pub user_agent: String,
}

/// Drives a [`PageDriver`] through sign-in, ticket selection and playlist
/// extraction, then populates a [`Session`] with the captured identity.
///
/// A resolver run is strictly sequential and never retried; any step that
/// cannot reach the next state within [`ResolverConfig::step_timeout`]
/// fails the run.
pub struct Resolver<D> {
    driver: D,
    config: ResolverConfig,
    auth_state: AuthState,
    auth_trace: Vec<AuthState>,
    resolve_trace: Vec<ResolveState>,
}

impl<D: PageDriver> Resolver<D> {
    pub fn new(driver: D, config: ResolverConfig) -> Self {
        Self {
            driver,
            config,
            auth_state: AuthState::Unauthenticated,
            auth_trace: vec![AuthState::Unauthenticated],
            resolve_trace: Vec::new(),
        }
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    /// Login states visited so far, in order.
    pub fn auth_trace(&self) -> &[AuthState] {
        &self.auth_trace
    }

    /// Resolution states visited so far, in order.
    pub fn resolve_trace(&self) -> &[ResolveState] {
        &self.resolve_trace
    }

    fn enter(&mut self, state: AuthState) {
        info!("auth: {:?} -> {:?}", self.auth_state, state);
        self.auth_state = state;
        self.auth_trace.push(state);
    }

    fn enter_resolve(&mut self, state: ResolveState) {
        info!("resolve: {:?}", state);
        self.resolve_trace.push(state);
    }

    /// Sign the driven browser in to twitcasting.tv, restoring the cached
    /// cookie jar when one exists and walking the Twitter OAuth flow
    /// otherwise.
    pub async fn authenticate(&mut self) -> Result<(), ResolverError> {
        match self.authenticate_inner().await {
            Ok(()) => {
                self.enter(AuthState::Authenticated);
                Ok(())
            }
            Err(err) => {
                error!("authentication failed: {}", err);
                self.enter(AuthState::Failed);
                Err(err)
            }
        }
    }

    async fn authenticate_inner(&mut self) -> Result<(), ResolverError> {
        let timeout = self.config.step_timeout;
        let step = self.auth_state;
        bounded(timeout, "initial navigation", self.driver.goto(BASE_URL))
            .await
            .map_err(|source| fail(step, source))?;

        let have_cookie_cache = tokio::fs::try_exists(&self.config.cookie_file)
            .await
            .unwrap_or(false);
        if have_cookie_cache {
            self.restore_cookies().await
        } else {
            self.login_fresh().await
        }
    }

    async fn restore_cookies(&mut self) -> Result<(), ResolverError> {
        self.enter(AuthState::RestoringCookies);
        let timeout = self.config.step_timeout;

        let cached = cookies::load(&self.config.cookie_file).await?;
        let scoped = cookies::scoped_to_domain(cached, SITE_DOMAIN);
        info!("restoring {} cached cookies", scoped.len());

        bounded(timeout, "cookie restore", self.driver.add_cookies(&scoped))
            .await
            .map_err(|source| fail(AuthState::RestoringCookies, source))?;
        Ok(())
    }

    async fn login_fresh(&mut self) -> Result<(), ResolverError> {
        let timeout = self.config.step_timeout;
        let credentials = self.read_credentials().await?;

        self.enter(AuthState::OAuthHandshake);
        let step = AuthState::OAuthHandshake;
        bounded(timeout, "login window", self.driver.goto(LOGIN_WINDOW_URL))
            .await
            .map_err(|e| fail(step, e))?;
        bounded(timeout, "network idle", self.driver.wait_until_idle())
            .await
            .map_err(|e| fail(step, e))?;
        bounded(timeout, "twitter login button", self.driver.click(SEL_TWITTER_LOGIN))
            .await
            .map_err(|e| fail(step, e))?;

        // consent page
        bounded(timeout, "network idle", self.driver.wait_until_idle())
            .await
            .map_err(|e| fail(step, e))?;
        bounded(timeout, "consent button", self.driver.hover(SEL_OAUTH_ALLOW))
            .await
            .map_err(|e| fail(step, e))?;
        bounded(timeout, "consent button", self.driver.click(SEL_OAUTH_ALLOW))
            .await
            .map_err(|e| fail(step, e))?;
        bounded(timeout, "network idle", self.driver.wait_until_idle())
            .await
            .map_err(|e| fail(step, e))?;
        // the consent form only submits on the second click
        bounded(timeout, "consent button", self.driver.click(SEL_OAUTH_ALLOW))
            .await
            .map_err(|e| fail(step, e))?;

        self.enter(AuthState::CredentialEntry);
        let step = AuthState::CredentialEntry;
        bounded(
            timeout,
            "username input",
            self.driver.fill(SEL_USERNAME_INPUT, &credentials.email),
        )
        .await
        .map_err(|e| fail(step, e))?;
        bounded(timeout, "next button", self.driver.click_text("Next"))
            .await
            .map_err(|e| fail(step, e))?;

        // the verification challenge is only presented for some accounts
        let challenged = bounded(
            timeout,
            "verification probe",
            self.driver.is_present(SEL_VERIFICATION_INPUT),
        )
        .await
        .map_err(|e| fail(step, e))?;
        if challenged {
            self.enter(AuthState::TwoFactorChallenge);
            let step = AuthState::TwoFactorChallenge;
            bounded(
                timeout,
                "verification input",
                self.driver.fill(SEL_VERIFICATION_INPUT, &credentials.phonenumber),
            )
            .await
            .map_err(|e| fail(step, e))?;
            bounded(timeout, "next button", self.driver.click_text("Next"))
                .await
                .map_err(|e| fail(step, e))?;
        } else {
            debug!("verification challenge not presented, continuing to password entry");
        }

        self.enter(AuthState::PasswordEntry);
        let step = AuthState::PasswordEntry;
        bounded(timeout, "password input", self.driver.wait_for(SEL_PASSWORD_INPUT))
            .await
            .map_err(|e| fail(step, e))?;
        bounded(
            timeout,
            "password input",
            self.driver.fill(SEL_PASSWORD_INPUT, &credentials.password),
        )
        .await
        .map_err(|e| fail(step, e))?;
        bounded(timeout, "login button", self.driver.click_text("Log in"))
            .await
            .map_err(|e| fail(step, e))?;

        self.enter(AuthState::AwaitingRedirect);
        let step = AuthState::AwaitingRedirect;
        bounded(timeout, "network idle", self.driver.wait_until_idle())
            .await
            .map_err(|e| fail(step, e))?;
        bounded(
            timeout,
            "redirect back to site",
            self.driver.wait_for_url_contains(SITE_DOMAIN),
        )
        .await
        .map_err(|e| fail(step, e))?;

        // persist the fresh jar so the next run can skip this flow
        let jar = bounded(timeout, "cookie jar", self.driver.cookies(SITE_DOMAIN))
            .await
            .map_err(|e| fail(step, e))?;
        cookies::save(&self.config.cookie_file, &jar).await?;
        info!("saved {} cookies to {:?}", jar.len(), self.config.cookie_file);

        Ok(())
    }

    async fn read_credentials(&self) -> Result<Credentials, ResolverError> {
        let raw = tokio::fs::read_to_string(&self.config.credentials_file).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Display names of all tickets belonging to the signed-in user, in
    /// document order.
    pub async fn list_tickets(&mut self) -> Result<Vec<String>, ResolverError> {
        self.enter_resolve(ResolveState::ListingTickets);
        match self.list_tickets_inner().await {
            Ok(names) => Ok(names),
            Err(err) => {
                self.enter_resolve(ResolveState::Failed);
                Err(err)
            }
        }
    }

    async fn list_tickets_inner(&mut self) -> Result<Vec<String>, ResolverError> {
        let timeout = self.config.step_timeout;
        let listing = self.ticket_listing_url().await?;
        bounded(timeout, "ticket listing", self.driver.goto(&listing)).await?;

        let names = bounded(timeout, "ticket titles", self.driver.inner_texts(SEL_TICKET_TITLE)).await?;
        if names.is_empty() {
            return Err(ResolverError::NoEntitlements);
        }
        info!("found {} tickets", names.len());
        Ok(names)
    }

    /// Resolve the playlist URL behind the given ticket by walking the
    /// ticket page, its event page and the event's archive listing.
    pub async fn resolve_playlist(&mut self, ticket_name: &str) -> Result<String, ResolverError> {
        match self.resolve_playlist_inner(ticket_name).await {
            Ok(url) => {
                self.enter_resolve(ResolveState::Resolved);
                info!("resolved playlist {}", url);
                Ok(url)
            }
            Err(err) => {
                error!("playlist resolution failed: {}", err);
                self.enter_resolve(ResolveState::Failed);
                Err(err)
            }
        }
    }

    async fn resolve_playlist_inner(&mut self, ticket_name: &str) -> Result<String, ResolverError> {
        let timeout = self.config.step_timeout;

        self.enter_resolve(ResolveState::SelectingTicket);
        let listing = self.ticket_listing_url().await?;
        bounded(timeout, "ticket listing", self.driver.goto(&listing)).await?;
        bounded(timeout, "ticket card", self.driver.click_text(ticket_name)).await?;

        self.enter_resolve(ResolveState::NavigatingToEventPage);
        bounded(timeout, "archive page link", self.driver.click_text(ARCHIVE_LINK_TEXT)).await?;

        self.enter_resolve(ResolveState::NavigatingToArchivePage);
        bounded(timeout, "network idle", self.driver.wait_until_idle()).await?;

        self.enter_resolve(ResolveState::LocatingArchiveEntry);
        let entries =
            bounded(timeout, "archive entries", self.driver.inner_texts(SEL_ARCHIVE_TITLE)).await?;
        // entry titles may be cut off, match on the leading characters
        let wanted = title_match_key(ticket_name);
        let entry = entries
            .into_iter()
            .find(|title| title.starts_with(&wanted))
            .ok_or_else(|| ResolverError::TicketNotLocatable(ticket_name.to_string()))?;
        bounded(timeout, "archive entry", self.driver.click_text(&entry)).await?;

        self.enter_resolve(ResolveState::ResolvingPlaylist);
        let playlist_url = bounded(
            timeout,
            "playlist response",
            self.driver
                .click_and_capture_response(SEL_PLAY_BUTTON, &self.config.playlist_pattern),
        )
        .await
        .map_err(|_| ResolverError::PlaylistNotFound)?;

        Ok(playlist_url)
    }

    async fn ticket_listing_url(&mut self) -> Result<String, ResolverError> {
        let my_id = self.read_site_cookie(COOKIE_USER_FRIENDLY_ID).await?;
        Ok(format!("{}/{}/shopmytickets", BASE_URL, my_id))
    }

    async fn read_site_cookie(&mut self, name: &str) -> Result<String, ResolverError> {
        let timeout = self.config.step_timeout;
        let jar = bounded(timeout, "cookie jar", self.driver.cookies(SITE_DOMAIN)).await?;
        Ok(jar
            .into_iter()
            .find(|cookie| cookie.name == name)
            .map(|cookie| cookie.value)
            .unwrap_or_default())
    }

    /// Read the three auth cookies and the live user-agent string from
    /// the browser context.
    pub async fn harvest_identity(&mut self) -> Result<Identity, ResolverError> {
        let timeout = self.config.step_timeout;
        let jar: Vec<BrowserCookie> =
            bounded(timeout, "cookie jar", self.driver.cookies(SITE_DOMAIN)).await?;
        let pick = |name: &str| {
            jar.iter()
                .find(|cookie| cookie.name == name)
                .map(|cookie| cookie.value.clone())
                .unwrap_or_default()
        };

        let identity = Identity {
            user_id: pick(COOKIE_USER_ID),
            user_friendly_id: pick(COOKIE_USER_FRIENDLY_ID),
            session_id: pick(COOKIE_SESSION_ID),
            user_agent: bounded(timeout, "user agent", self.driver.user_agent()).await?,
        };
        Ok(identity)
    }

    /// Populate `session` with the harvested identity and the playlist
    /// host, making it eligible for authenticated downloads.
    pub async fn populate(
        &mut self,
        session: &Session,
        playlist_url: &str,
    ) -> Result<(), ResolverError> {
        let identity = self.harvest_identity().await?;
        let host = match reqwest::Url::parse(playlist_url) {
            Ok(url) => url.host_str().unwrap_or_default().to_string(),
            Err(err) => {
                warn!("unparseable playlist url {:?}: {}", playlist_url, err);
                String::new()
            }
        };

        let view = DownloadSession::new(session);
        view.set_host(&host);
        view.set_user_agent(&identity.user_agent);
        view.set_user_id(&identity.user_id);
        view.set_user_friendly_id(&identity.user_friendly_id);
        view.set_session_id(&identity.session_id);
        Ok(())
    }

    /// Full unattended flow: authenticate, pick a ticket, resolve its
    /// playlist and populate `session`.
    pub async fn run(
        &mut self,
        session: &Session,
        selection: TicketSelection,
    ) -> Result<Resolution, ResolverError> {
        self.authenticate().await?;

        let tickets = self.list_tickets().await?;
        let ticket = match selection {
            TicketSelection::First => match tickets.into_iter().next() {
                Some(ticket) => ticket,
                None => return Err(ResolverError::NoEntitlements),
            },
            TicketSelection::Named(name) => match tickets.into_iter().find(|t| *t == name) {
                Some(ticket) => ticket,
                None => return Err(ResolverError::TicketNotLocatable(name)),
            },
        };
        info!("selected ticket {:?}", ticket);

        let playlist_url = self.resolve_playlist(&ticket).await?;
        self.populate(session, &playlist_url).await?;

        Ok(Resolution { playlist_url })
    }
}

fn fail(step: AuthState, source: DriverError) -> ResolverError {
    ResolverError::AuthenticationFailed { step, source }
}

fn title_match_key(title: &str) -> String {
    title.chars().take(TITLE_MATCH_CHARS).collect()
}

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DriverError::Timeout(what.to_string())),
    }
}
