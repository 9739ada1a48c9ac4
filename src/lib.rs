pub mod backend;
pub mod config;
pub mod directives;
pub mod error;
pub mod host;
pub mod html;
pub mod lead;
pub mod locale;
pub mod render;
pub mod session;
pub mod settings;
pub mod storage;
pub mod store;
pub mod types;
pub mod visitor;

pub use backend::{Backend, HttpBackend};
pub use config::{resolve, PageConfig, QueryParams, WidgetConfig};
pub use session::{ChatSession, ConversationStep, TurnOutcome};
