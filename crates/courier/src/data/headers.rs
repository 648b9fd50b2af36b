use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use once_cell::sync::Lazy;

/// An ordered header list with case-insensitive, last-write-wins names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self { Self(Vec::new()) }

    /// Set `name`, replacing any existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(index) => self.0[index].1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.0[index].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool { self.position(name).is_some() }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|index| self.0.remove(index).1)
    }

    /// Merge `other` into `self`; on overlapping names `other` wins.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in &other.0 {
            self.insert(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize { self.0.len() }

    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Join values with descending quality factors: `a;q=1.0, b;q=0.9, ...`.
///
/// The factor bottoms out at `0.1`.
pub fn quality_encoded<I, S>(values: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            let quality = (10usize.saturating_sub(index)).max(1) as f64 / 10.0;
            format!("{};q={:.1}", value.as_ref(), quality)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `Accept-Encoding`, `Accept-Language` and `User-Agent`, computed once per process.
pub static DEFAULT_HEADERS: Lazy<Headers> = Lazy::new(|| {
    let mut headers = Headers::new();
    headers.insert("Accept-Encoding", quality_encoded(["br", "gzip", "deflate"]));
    headers.insert("Accept-Language", quality_encoded(preferred_languages()));
    headers.insert("User-Agent", user_agent());
    headers
});

/// Locale preferences from `LANGUAGE`, `LC_ALL`, `LC_MESSAGES` and `LANG`, at most six.
fn preferred_languages() -> Vec<String> {
    let mut languages: Vec<String> = Vec::new();

    let language_list = std::env::var("LANGUAGE").unwrap_or_default();
    let singles = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok());

    for raw in language_list.split(':').map(str::to_string).chain(singles) {
        let Some(tag) = language_tag(&raw) else { continue };
        if !languages.contains(&tag) {
            languages.push(tag);
        }
    }

    if languages.is_empty() {
        languages.push("en".to_string());
    }
    languages.truncate(6);
    languages
}

/// `en_US.UTF-8@euro` -> `en-US`. `C` and `POSIX` carry no preference.
fn language_tag(raw: &str) -> Option<String> {
    let tag = raw.split(['.', '@']).next()?.trim();
    if tag.is_empty() || tag == "C" || tag == "POSIX" {
        return None;
    }
    Some(tag.replace('_', "-"))
}

fn user_agent() -> String {
    let executable = std::env::current_exe()
        .ok()
        .and_then(|path| path.file_stem().map(|stem| stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "Unknown".to_string());

    format!(
        "{executable} ({}; {}) courier/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        env!("CARGO_PKG_VERSION")
    )
}

/// Value of the `Authorization` header.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Authorization {
    #[default]
    None,
    Basic {
        user:     String,
        password: String,
    },
    Bearer(String),
    /// Sent verbatim.
    Raw(String),
}

impl Authorization {
    pub fn basic(user: impl Into<String>, password: impl Into<String>) -> Self {
        Authorization::Basic {
            user:     user.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self { Authorization::Bearer(token.into()) }

    pub fn header_value(&self) -> Option<String> {
        match self {
            Authorization::None => None,
            Authorization::Basic { user, password } => {
                Some(format!("Basic {}", STANDARD.encode(format!("{user}:{password}"))))
            }
            Authorization::Bearer(token) => Some(format!("Bearer {token}")),
            Authorization::Raw(value) => Some(value.clone()),
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::None => f.write_str("None"),
            Authorization::Basic { user, .. } => write!(f, "Basic({user}, ***)"),
            Authorization::Bearer(_) => f.write_str("Bearer(***)"),
            Authorization::Raw(_) => f.write_str("Raw(***)"),
        }
    }
}

/// User/password pair answered to HTTP authentication challenges.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user:     String,
    password: String,
}

impl Credential {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user:     user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str { &self.user }

    pub fn password(&self) -> &str { &self.password }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}
