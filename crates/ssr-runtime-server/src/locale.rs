//! Locale and theme resolution.
//!
//! Locale candidates are taken from the cookie, the query parameter,
//! `Accept-Language` (highest quality first) and the default, in that order.
//! Each candidate is normalized and expanded into its region-stripping
//! fallback chain (`fr-ca` then `fr`). The first supported candidate wins.
//!
//! Themes follow the same order without `Accept-Language` and without
//! fallback chains.

use ssr_runtime_common::{I18nConfig, ThemeConfig};

const FALLBACK_LOCALE: &str = "en";
const FALLBACK_THEME: &str = "ocean";

/// Normalize a locale tag: trimmed, `_` to `-`, lowercase, only alphanumerics
/// and single inner dashes.
pub fn normalize_locale(raw: &str) -> String {
    let mut normalized = String::with_capacity(raw.len());
    let mut previous_dash = false;

    for ch in raw.trim().chars() {
        let ch = if ch == '_' { '-' } else { ch.to_ascii_lowercase() };
        if ch.is_ascii_alphanumeric() {
            normalized.push(ch);
            previous_dash = false;
        } else if ch == '-' && !previous_dash && !normalized.is_empty() {
            normalized.push(ch);
            previous_dash = true;
        }
    }

    while normalized.ends_with('-') {
        normalized.pop();
    }
    normalized
}

/// Normalize a theme name: trimmed, lowercase, only alphanumerics, `-` and `_`.
pub fn normalize_theme(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|ch| ch.to_ascii_lowercase())
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect()
}

/// Region-stripping chain of a normalized locale: `zh-hant-tw`, `zh-hant`, `zh`.
pub fn fallback_chain(locale: &str) -> Vec<String> {
    let mut chain = Vec::new();
    let mut current = locale;
    while !current.is_empty() {
        chain.push(current.to_string());
        match current.rfind('-') {
            Some(separator) => current = &current[..separator],
            None => break,
        }
    }
    chain
}

/// Languages of an `Accept-Language` header, highest quality first.
///
/// Ties keep header order. `*`, zero and unparseable qualities are dropped.
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut parsed: Vec<(String, f64)> = Vec::new();

    for item in header.split(',') {
        let mut parts = item.split(';');
        let language = parts.next().unwrap_or_default().trim();

        let mut quality = 1.0;
        for param in parts {
            if let Some((key, value)) = param.split_once('=') {
                if key.trim().eq_ignore_ascii_case("q") {
                    quality = value.trim().parse().unwrap_or(0.0);
                }
            }
        }

        if !language.is_empty() && language != "*" && quality > 0.0 {
            parsed.push((language.to_string(), quality));
        }
    }

    parsed.sort_by(|a, b| b.1.total_cmp(&a.1));
    parsed.into_iter().map(|(language, _)| language).collect()
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !value.is_empty() && !values.contains(&value) {
        values.push(value);
    }
}

/// Outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// The chosen value.
    pub value: String,
    /// Every normalized candidate considered, in order.
    pub candidates: Vec<String>,
}

/// Resolves the request locale.
#[derive(Debug, Clone)]
pub struct LocaleResolver {
    default: String,
    supported: Vec<String>,
}

impl LocaleResolver {
    /// Create a resolver. The default is always part of the supported set.
    pub fn new<I, S>(default: &str, supported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut default = normalize_locale(default);
        if default.is_empty() {
            default = FALLBACK_LOCALE.to_string();
        }

        let mut locales = Vec::new();
        for locale in supported {
            push_unique(&mut locales, normalize_locale(locale.as_ref()));
        }
        push_unique(&mut locales, default.clone());

        Self {
            default,
            supported: locales,
        }
    }

    /// Create a resolver from configuration.
    pub fn from_config(config: &I18nConfig) -> Self {
        Self::new(&config.default_locale, &config.supported_locales)
    }

    /// The normalized default locale.
    pub fn default_locale(&self) -> &str {
        &self.default
    }

    /// Supported locales in configuration order.
    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    /// Resolve from the cookie value, query value and `Accept-Language` header.
    pub fn resolve(
        &self,
        cookie: Option<&str>,
        query: Option<&str>,
        accept_language: Option<&str>,
    ) -> Resolution {
        let accepted = accept_language.map(parse_accept_language).unwrap_or_default();
        let raw = cookie
            .into_iter()
            .chain(query)
            .chain(accepted.iter().map(String::as_str))
            .chain(std::iter::once(self.default.as_str()));

        let mut candidates = Vec::new();
        for candidate in raw {
            for locale in fallback_chain(&normalize_locale(candidate)) {
                push_unique(&mut candidates, locale);
            }
        }

        let value = candidates
            .iter()
            .find(|c| self.supported.contains(c))
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        Resolution { value, candidates }
    }
}

/// Resolves the request theme.
#[derive(Debug, Clone)]
pub struct ThemeResolver {
    default: String,
    supported: Vec<String>,
}

impl ThemeResolver {
    /// Create a resolver. The default is always part of the supported set.
    pub fn new<I, S>(default: &str, supported: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut default = normalize_theme(default);
        if default.is_empty() {
            default = FALLBACK_THEME.to_string();
        }

        let mut themes = Vec::new();
        for theme in supported {
            push_unique(&mut themes, normalize_theme(theme.as_ref()));
        }
        push_unique(&mut themes, default.clone());

        Self {
            default,
            supported: themes,
        }
    }

    /// Create a resolver from configuration.
    pub fn from_config(config: &ThemeConfig) -> Self {
        Self::new(&config.default_theme, &config.supported_themes)
    }

    /// The normalized default theme.
    pub fn default_theme(&self) -> &str {
        &self.default
    }

    /// Supported themes in configuration order.
    pub fn supported(&self) -> &[String] {
        &self.supported
    }

    /// Resolve from the cookie value and query value.
    pub fn resolve(&self, cookie: Option<&str>, query: Option<&str>) -> Resolution {
        let mut candidates = Vec::new();
        for raw in cookie.into_iter().chain(query).chain([self.default.as_str()]) {
            push_unique(&mut candidates, normalize_theme(raw));
        }

        let value = candidates
            .iter()
            .find(|c| self.supported.contains(c))
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        Resolution { value, candidates }
    }
}
