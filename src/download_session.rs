use crate::session::Session;

const KEY_HOST: &str = "twitcasting.host";
const KEY_USER_AGENT: &str = "twitcasting.useragent";
const KEY_USER_ID: &str = "twitcasting.userid";
const KEY_USER_FRIENDLY_ID: &str = "twitcasting.userfriendlyid";
const KEY_SESSION_ID: &str = "twitcasting.sessionid";

/// Typed wrapper around a twitcasting session.
///
/// Reads and writes pass straight through to the backing [`Session`], so
/// any number of views over the same session observe each other's writes
/// immediately. No validation is performed; empty values are stored and
/// surfaced as-is.
pub struct DownloadSession<'a> {
    session: &'a Session,
}

impl<'a> DownloadSession<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// Hostname to use for forwarded requests. Download hosts are
    /// per-broadcast subdomains, eg. dl193250.twitcasting.tv.
    pub fn host(&self) -> String {
        self.session.read(KEY_HOST)
    }

    pub fn set_host(&self, value: &str) {
        self.session.write(KEY_HOST, value);
    }

    /// UserAgent header to replay on forwarded requests.
    pub fn user_agent(&self) -> String {
        self.session.read(KEY_USER_AGENT)
    }

    pub fn set_user_agent(&self, value: &str) {
        self.session.write(KEY_USER_AGENT, value);
    }

    /// Device/user identifier, harvested from the `did` cookie.
    pub fn user_id(&self) -> String {
        self.session.read(KEY_USER_ID)
    }

    pub fn set_user_id(&self, value: &str) {
        self.session.write(KEY_USER_ID, value);
    }

    /// Display identifier, harvested from the `tc_id` cookie. Replayed
    /// upstream under the `fftc_id` cookie name.
    pub fn user_friendly_id(&self) -> String {
        self.session.read(KEY_USER_FRIENDLY_ID)
    }

    pub fn set_user_friendly_id(&self, value: &str) {
        self.session.write(KEY_USER_FRIENDLY_ID, value);
    }

    /// Session token, harvested from the `tc_ss` cookie.
    pub fn session_id(&self) -> String {
        self.session.read(KEY_SESSION_ID)
    }

    pub fn set_session_id(&self, value: &str) {
        self.session.write(KEY_SESSION_ID, value);
    }
}
