use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::locale::Locale;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Position {
    BottomRight,
    BottomLeft,
}

impl Position {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "bottom-right" => Ok(Self::BottomRight),
            "bottom-left" => Ok(Self::BottomLeft),
            other => Err(ConfigError::invalid("position", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Floating,
    Inline,
}

impl Mode {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim() {
            "floating" => Ok(Self::Floating),
            "inline" => Ok(Self::Inline),
            other => Err(ConfigError::invalid("mode", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Theme {
    pub primary: String,
    pub user_message_bg: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub title: String,
    pub bot_avatar: String,
}

/// Effective configuration for one page load. Never mutated after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetConfig {
    pub position: Position,
    pub mode: Mode,
    pub theme: Theme,
    pub header: Header,
    pub asset_base_path: String,
    pub welcome_message: String,
    pub initial_quick_replies: Vec<String>,
    pub locale: Locale,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            position: Position::BottomRight,
            mode: Mode::Floating,
            theme: Theme {
                primary: "#0b5cff".to_string(),
                user_message_bg: "#e8f0ff".to_string(),
            },
            header: Header {
                title: "Assistant".to_string(),
                bot_avatar: "assets/images/bot-avatar.png".to_string(),
            },
            asset_base_path: "assets/".to_string(),
            welcome_message: Locale::En.default_welcome().to_string(),
            initial_quick_replies: vec![
                "Our services".to_string(),
                "Get a quote".to_string(),
                "Contact us".to_string(),
            ],
            locale: Locale::En,
        }
    }
}

impl WidgetConfig {
    /// Resolves an image name against `{assetBasePath}images/`. Absolute
    /// references are returned untouched.
    pub fn image_url(&self, name: &str) -> String {
        let name = name.trim();
        if is_absolute_ref(name) {
            return name.to_string();
        }
        format!("{}images/{}", self.asset_base_path, name.trim_start_matches("./"))
    }

    fn apply_page(mut self, page: &PageConfig) -> Result<Self, ConfigError> {
        if let Some(position) = &page.position {
            self.position = Position::parse(position)?;
        }
        if let Some(mode) = &page.mode {
            self.mode = Mode::parse(mode)?;
        }
        if let Some(theme) = &page.theme {
            if let Some(primary) = &theme.primary {
                self.theme.primary = normalize_color("theme.primary", primary)?;
            }
            if let Some(bg) = &theme.user_message_bg {
                self.theme.user_message_bg = normalize_color("theme.userMessageBg", bg)?;
            }
        }
        if let Some(header) = &page.header {
            if let Some(title) = &header.title {
                self.header.title = title.clone();
            }
            if let Some(avatar) = &header.bot_avatar {
                self.header.bot_avatar = avatar.clone();
            }
        }
        if let Some(base) = &page.asset_base_path {
            self.asset_base_path = normalize_base_path(base);
        }
        if let Some(welcome) = &page.welcome_message {
            self.welcome_message = welcome.clone();
        }
        if let Some(replies) = &page.initial_quick_replies {
            self.initial_quick_replies = replies.clone();
        }
        if let Some(locale) = &page.locale {
            self.locale = Locale::parse(locale)?;
        }
        Ok(self)
    }

    fn apply_query(mut self, query: &QueryParams) -> Result<Self, ConfigError> {
        if let Some(color) = non_empty(&query.primary_color) {
            self.theme.primary = normalize_color("primaryColor", color)?;
        }
        if let Some(position) = non_empty(&query.position) {
            self.position = Position::parse(position)?;
        }
        if let Some(title) = non_empty(&query.title) {
            self.header.title = title.to_string();
        }
        if let Some(avatar) = non_empty(&query.avatar) {
            self.header.bot_avatar = avatar.to_string();
        }
        if let Some(base) = non_empty(&query.base_path) {
            self.asset_base_path = normalize_base_path(base);
        }
        if let Some(lang) = non_empty(&query.lang) {
            self.locale = Locale::parse(lang)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ThemeOverride {
    pub primary: Option<String>,
    pub user_message_bg: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct HeaderOverride {
    pub title: Option<String>,
    pub bot_avatar: Option<String>,
}

/// Override object supplied by the embedding page. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PageConfig {
    pub position: Option<String>,
    pub mode: Option<String>,
    pub theme: Option<ThemeOverride>,
    pub header: Option<HeaderOverride>,
    pub asset_base_path: Option<String>,
    pub welcome_message: Option<String>,
    pub initial_quick_replies: Option<Vec<String>>,
    pub locale: Option<String>,
}

impl PageConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Page(err.to_string()))
    }
}

/// Iframe URL parameters. Unknown parameters are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub primary_color: Option<String>,
    pub position: Option<String>,
    pub title: Option<String>,
    pub avatar: Option<String>,
    pub base_path: Option<String>,
    pub lang: Option<String>,
}

impl QueryParams {
    pub fn parse(query: &str) -> Result<Self, ConfigError> {
        serde_urlencoded::from_str(query.trim_start_matches('?'))
            .map_err(|err| ConfigError::Query(err.to_string()))
    }
}

/// Merges `defaults <- page <- query`. Every key of `defaults` survives unless
/// a higher layer supplies a valid replacement.
pub fn resolve(
    defaults: &WidgetConfig,
    page: Option<&PageConfig>,
    query: &QueryParams,
) -> Result<WidgetConfig, ConfigError> {
    let mut config = defaults.clone();
    if let Some(page) = page {
        config = config.apply_page(page)?;
    }
    config = config.apply_query(query)?;

    let welcome_set = page.is_some_and(|p| p.welcome_message.is_some());
    if !welcome_set
        && config.locale != defaults.locale
        && defaults.welcome_message == defaults.locale.default_welcome()
    {
        config.welcome_message = config.locale.default_welcome().to_string();
    }
    Ok(config)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Accepts `abc`, `#abc`, `a1b2c3` or `#a1b2c3`; returns lowercase with a `#`.
pub fn normalize_color(key: &'static str, value: &str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    Regex::new(r"^#?([0-9a-fA-F]{3}|[0-9a-fA-F]{6})$")
        .ok()
        .and_then(|re| re.captures(trimmed))
        .and_then(|caps| caps.get(1))
        .map(|hex| format!("#{}", hex.as_str().to_ascii_lowercase()))
        .ok_or_else(|| ConfigError::invalid(key, value))
}

fn normalize_base_path(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

fn is_absolute_ref(value: &str) -> bool {
    value.starts_with("http://")
        || value.starts_with("https://")
        || value.starts_with("//")
        || value.starts_with('/')
        || value.starts_with("data:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_inputs_yield_defaults() {
        let defaults = WidgetConfig::default();
        let resolved =
            resolve(&defaults, Some(&PageConfig::default()), &QueryParams::default()).unwrap();
        assert_eq!(resolved, defaults);
    }

    #[test]
    fn url_beats_page_beats_defaults() {
        let page = PageConfig::from_json(
            r##"{"header": {"title": "A"}, "theme": {"primary": "#112233"}}"##,
        )
        .unwrap();
        let query = QueryParams::parse("title=B").unwrap();
        let resolved = resolve(&WidgetConfig::default(), Some(&page), &query).unwrap();
        assert_eq!(resolved.header.title, "B");
        assert_eq!(resolved.theme.primary, "#112233");
        assert_eq!(resolved.header.bot_avatar, WidgetConfig::default().header.bot_avatar);
    }

    #[test]
    fn nested_objects_merge_key_by_key() {
        let page = PageConfig::from_json(r#"{"theme": {"userMessageBg": "fff"}}"#).unwrap();
        let resolved =
            resolve(&WidgetConfig::default(), Some(&page), &QueryParams::default()).unwrap();
        assert_eq!(resolved.theme.user_message_bg, "#fff");
        assert_eq!(resolved.theme.primary, WidgetConfig::default().theme.primary);
    }

    #[test]
    fn empty_url_values_do_not_blank() {
        let page = PageConfig::from_json(r#"{"header": {"title": "A"}}"#).unwrap();
        let query = QueryParams::parse("?title=&primaryColor=%20&position=").unwrap();
        let resolved = resolve(&WidgetConfig::default(), Some(&page), &query).unwrap();
        assert_eq!(resolved.header.title, "A");
        assert_eq!(resolved.theme.primary, WidgetConfig::default().theme.primary);
    }

    #[test]
    fn url_values_are_percent_decoded() {
        let query = QueryParams::parse(
            "avatar=https%3A%2F%2Fcdn.example.org%2Fbot.png&primaryColor=FF8800&utm_source=x",
        )
        .unwrap();
        let resolved = resolve(&WidgetConfig::default(), None, &query).unwrap();
        assert_eq!(resolved.header.bot_avatar, "https://cdn.example.org/bot.png");
        assert_eq!(resolved.theme.primary, "#ff8800");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let query = QueryParams::parse("position=top-center").unwrap();
        assert!(matches!(
            resolve(&WidgetConfig::default(), None, &query),
            Err(ConfigError::InvalidValue { key: "position", .. })
        ));

        let query = QueryParams::parse("primaryColor=blue").unwrap();
        assert!(resolve(&WidgetConfig::default(), None, &query).is_err());
    }

    #[test]
    fn unknown_page_keys_are_rejected() {
        assert!(PageConfig::from_json(r#"{"colour": "red"}"#).is_err());
        assert!(PageConfig::from_json(r##"{"theme": {"accent": "#fff"}}"##).is_err());
    }

    #[test]
    fn locale_switch_updates_default_welcome() {
        let query = QueryParams::parse("lang=fr").unwrap();
        let resolved = resolve(&WidgetConfig::default(), None, &query).unwrap();
        assert_eq!(resolved.locale, Locale::Fr);
        assert_eq!(resolved.welcome_message, Locale::Fr.default_welcome());
    }

    #[test]
    fn image_urls_resolve_against_base_path() {
        let query = QueryParams::parse("basePath=/static/widget").unwrap();
        let resolved = resolve(&WidgetConfig::default(), None, &query).unwrap();
        assert_eq!(resolved.image_url("team.jpg"), "/static/widget/images/team.jpg");
        assert_eq!(
            resolved.image_url("https://cdn.example.org/a.png"),
            "https://cdn.example.org/a.png"
        );
    }
}
