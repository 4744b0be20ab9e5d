use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// One cookie from an exported browser session.
///
/// Accepts the field spellings used by the common exporters (WebDriver
/// `expiry`, extension `expirationDate`, Playwright `expires`); unknown
/// fields such as `hostOnly` or `storeId` are dropped.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    #[serde(serialize_with = "serialize_secret")]
    pub value: Secret<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "httpOnly", alias = "http_only")]
    pub http_only: bool,
    /// Seconds since the Unix epoch. Absent or non-positive means a session cookie.
    #[serde(
        default,
        alias = "expiry",
        alias = "expirationDate",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires: Option<f64>,
    #[serde(
        default,
        rename = "sameSite",
        alias = "same_site",
        skip_serializing_if = "Option::is_none"
    )]
    pub same_site: Option<String>,
}

fn serialize_secret<S: Serializer>(secret: &Secret<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(secret.expose_secret())
}

impl std::fmt::Debug for Cookie {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cookie")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("expires", &self.expires)
            .finish()
    }
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Secret::new(value.into()),
            domain: None,
            path: None,
            secure: false,
            http_only: false,
            expires: None,
            same_site: None,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Expiry as epoch seconds, `None` for session cookies.
    pub fn expiry(&self) -> Option<f64> {
        self.expires.filter(|e| *e > 0.0)
    }

    /// Domain without the leading dot that marks domain-wide cookies.
    pub fn bare_domain(&self) -> Option<&str> {
        self.domain
            .as_deref()
            .map(|d| d.trim_start_matches('.'))
            .filter(|d| !d.is_empty())
    }

    /// Whether a request to `host` would carry this cookie.
    ///
    /// Cookies without a domain are assumed to belong to the surface host.
    pub fn matches_host(&self, host: &str) -> bool {
        let Some(domain) = self.bare_domain() else {
            return true;
        };
        let host = host.to_ascii_lowercase();
        let domain = domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    }

    /// Normalised `SameSite` value (`Strict`, `Lax`, `None`), if recognisable.
    pub fn same_site_policy(&self) -> Option<&'static str> {
        match self.same_site.as_deref()?.to_ascii_lowercase().as_str() {
            "strict" => Some("Strict"),
            "lax" => Some("Lax"),
            "none" | "no_restriction" => Some("None"),
            _ => None,
        }
    }
}

/// Build a `Cookie` header value for `host`, or `None` if no cookie applies.
pub fn cookie_header(cookies: &[Cookie], host: &str) -> Option<String> {
    let pairs: Vec<String> = cookies
        .iter()
        .filter(|c| c.matches_host(host))
        .map(|c| format!("{}={}", c.name, c.value.expose_secret()))
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}
