use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = concat!("timebill/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

pub const ENV_BASE_URL: &str = "JIRA_BASE_URL";
pub const ENV_EMAIL: &str = "JIRA_EMAIL";
pub const ENV_API_TOKEN: &str = "JIRA_API_TOKEN";
pub const ENV_COOLDOWN_MS: &str = "JIRA_COOLDOWN_MS";

/// `app_config` keys that may stand in for the environment.
pub const CONFIG_BASE_URL: &str = "jira.base_url";
pub const CONFIG_EMAIL: &str = "jira.email";
pub const CONFIG_COOLDOWN_MS: &str = "jira.cooldown_ms";

/// Every stored key `JiraConfig::from_sources` reads.
pub const STORED_KEYS: [&str; 3] = [CONFIG_BASE_URL, CONFIG_EMAIL, CONFIG_COOLDOWN_MS];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JiraAuth {
    /// Account email plus API token.
    Basic { email: String, token: String },
    /// Personal access token.
    Bearer { token: String },
}

#[derive(Clone, Debug)]
pub struct JiraConfig {
    pub base_url: String,
    pub auth: JiraAuth,
    pub user_agent: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Minimum gap between two requests.
    pub cooldown: Duration,
}

impl JiraConfig {
    pub fn new(base_url: impl Into<String>, auth: JiraAuth) -> Self {
        Self {
            base_url: base_url.into(),
            auth,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            cooldown: Duration::ZERO,
        }
    }

    /// Assemble a config from an environment lookup and stored settings.
    ///
    /// The environment wins over stored values. Returns `None` when no base
    /// URL or no token is available, which callers treat as "integration not
    /// configured".
    pub fn from_sources<E, S>(env: E, stored: S) -> Option<Self>
    where
        E: Fn(&str) -> Option<String>,
        S: Fn(&str) -> Option<String>,
    {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let base_url = non_empty(env(ENV_BASE_URL)).or_else(|| non_empty(stored(CONFIG_BASE_URL)))?;
        let token = non_empty(env(ENV_API_TOKEN))?;
        let email = non_empty(env(ENV_EMAIL)).or_else(|| non_empty(stored(CONFIG_EMAIL)));

        let auth = match email {
            Some(email) => JiraAuth::Basic { email, token },
            None => JiraAuth::Bearer { token },
        };

        let cooldown = match non_empty(env(ENV_COOLDOWN_MS))
            .or_else(|| non_empty(stored(CONFIG_COOLDOWN_MS)))
        {
            Some(raw) => match parse_cooldown_ms(&raw) {
                Some(cooldown) => cooldown,
                None => {
                    log::warn!("Ignoring request cooldown {raw:?}: not a number of milliseconds");
                    Duration::ZERO
                }
            },
            None => Duration::ZERO,
        };
        Some(Self::new(base_url.trim(), auth).with_cooldown(cooldown))
    }

    pub fn with_cooldown(mut self, duration: Duration) -> Self {
        self.cooldown = duration;
        self
    }

    /// `https://site/rest/api/3/` with exactly one slash between parts.
    pub fn api_root(&self) -> String {
        format!("{}/rest/api/3/", self.base_url.trim_end_matches('/'))
    }
}

/// Parse a cooldown given in whole milliseconds.
pub fn parse_cooldown_ms(raw: &str) -> Option<Duration> {
    raw.trim().parse::<u64>().ok().map(Duration::from_millis)
}
