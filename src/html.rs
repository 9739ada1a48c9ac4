use minijinja::{context, Environment};

use crate::config::WidgetConfig;
use crate::render::Patch;

const MESSAGE_TEMPLATE: &str = include_str!("templates/message.html");
const QUICK_REPLIES_TEMPLATE: &str = include_str!("templates/quick_replies.html");
const WIDGET_PAGE_TEMPLATE: &str = include_str!("templates/widget.html");

/// Markup for the iframe page and for patches that insert DOM nodes.
/// Template names end in `.html`, so every interpolation is HTML-escaped.
pub struct Markup {
    env: Environment<'static>,
}

impl Markup {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("message.html", MESSAGE_TEMPLATE)?;
        env.add_template("quick_replies.html", QUICK_REPLIES_TEMPLATE)?;
        env.add_template("widget.html", WIDGET_PAGE_TEMPLATE)?;
        Ok(Self { env })
    }

    /// HTML for patches that add nodes; `None` for the rest.
    pub fn patch_html(
        &self,
        patch: &Patch,
        config: &WidgetConfig,
    ) -> Result<Option<String>, minijinja::Error> {
        match patch {
            Patch::Append(message) => self
                .env
                .get_template("message.html")?
                .render(context! {
                    m => message,
                    avatar => &config.header.bot_avatar,
                })
                .map(Some),
            Patch::QuickReplies(replies) => self
                .env
                .get_template("quick_replies.html")?
                .render(context! { replies => replies })
                .map(Some),
            _ => Ok(None),
        }
    }

    pub fn widget_page(&self, config: &WidgetConfig) -> Result<String, minijinja::Error> {
        let config_json = serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string());
        self.env.get_template("widget.html")?.render(context! {
            config => config,
            config_json => config_json,
        })
    }
}
