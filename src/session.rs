use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::{normalize_color, WidgetConfig};
use crate::error::ConfigError;
use crate::lead::{is_refusal, lead_summary, missing_fields_prompt, Lead, LeadField};
use crate::render::{Patch, RenderedMessage};
use crate::storage::{Storage, OPEN_KEY, THEME_KEY};
use crate::store::MessageStore;
use crate::types::{now_iso, ChatRequest, LeadRequest, Message, MessageOptions, Sender, TrackEvent};
use crate::visitor::{ensure_visitor_id, fetch_record, reconcile};

pub const LEAD_THRESHOLD: u32 = 2;
pub const LEAD_PROMPT_DELAY: Duration = Duration::from_secs(1);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConversationStep {
    FreeChat,
    CollectingLead,
    PostCollection,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Blank input.
    Ignored,
    Replied,
    LeadIncomplete(Vec<LeadField>),
    LeadComplete,
    Refused,
    /// The proxy call failed; an apology was shown and nothing advanced.
    Failed,
}

pub struct ChatSession<B, S> {
    config: WidgetConfig,
    backend: Arc<B>,
    storage: S,
    store: MessageStore,
    lead: Lead,
    step: ConversationStep,
    exchanges: u32,
    visitor_id: String,
    input_enabled: bool,
    engaged: bool,
    idle_deadline: Option<Instant>,
    awaiting_idle_answer: bool,
    lead_prompt_at: Option<Instant>,
    lead_prompt_sent: bool,
    quick_replies: Vec<String>,
    open: bool,
    theme: Option<String>,
    patches: Vec<Patch>,
}

impl<B: Backend + 'static, S: Storage> ChatSession<B, S> {
    pub fn new(config: WidgetConfig, backend: B, mut storage: S) -> Self {
        let visitor_id = ensure_visitor_id(&mut storage);
        Self {
            config,
            backend: Arc::new(backend),
            storage,
            store: MessageStore::new(),
            lead: Lead::default(),
            step: ConversationStep::FreeChat,
            exchanges: 0,
            visitor_id,
            input_enabled: true,
            engaged: false,
            idle_deadline: None,
            awaiting_idle_answer: false,
            lead_prompt_at: None,
            lead_prompt_sent: false,
            quick_replies: Vec::new(),
            open: false,
            theme: None,
            patches: Vec::new(),
        }
    }

    /// Restores local state, reconciles with the server and greets the
    /// visitor if there is nothing to show yet.
    pub async fn start(&mut self) {
        if let Some(open) = self.storage.load(OPEN_KEY) {
            self.open = open.trim() == "true";
            self.patches.push(Patch::Open { open: self.open });
        }
        if let Some(theme) = self.storage.load(THEME_KEY) {
            match normalize_color("theme", &theme) {
                Ok(primary) => {
                    self.patches.push(Patch::Theme {
                        primary: primary.clone(),
                    });
                    self.theme = Some(primary);
                }
                Err(err) => warn!(error = %err, "ignoring stored theme"),
            }
        }

        self.store = MessageStore::restore(&self.storage);
        self.render_history();
        self.sync_visitor().await;

        if self.store.is_empty() {
            self.add_welcome();
        }
        info!(
            visitor_id = %self.visitor_id,
            messages = self.store.len(),
            step = ?self.step,
            "widget session started"
        );
    }

    pub async fn submit(&mut self, input: &str) -> TurnOutcome {
        let text = input.trim();
        if text.is_empty() {
            return TurnOutcome::Ignored;
        }

        self.set_quick_replies(Vec::new());
        self.engaged = true;
        self.idle_deadline = None;
        let answers_idle_prompt = std::mem::take(&mut self.awaiting_idle_answer);
        self.push_message(Message::new(text, Sender::User, MessageOptions::default()), None);

        match self.step {
            // A reply to "anything else?" is small talk, not a lead answer.
            ConversationStep::CollectingLead if answers_idle_prompt => self.chat_turn().await,
            ConversationStep::CollectingLead => {
                // An answer before the lead request fires cancels it.
                self.lead_prompt_at = None;
                self.lead_turn(text).await
            }
            ConversationStep::FreeChat | ConversationStep::PostCollection => self.chat_turn().await,
        }
    }

    pub async fn click_quick_reply(&mut self, value: &str) -> TurnOutcome {
        self.track("quick_reply", json!({ "value": value }));
        self.submit(value).await
    }

    pub fn click_link(&mut self, url: &str) {
        self.track("link_click", json!({ "url": url }));
    }

    pub fn set_open(&mut self, open: bool) {
        self.open = open;
        self.storage
            .save(OPEN_KEY, if open { "true" } else { "false" });
        self.patches.push(Patch::Open { open });
        let event = if open { "widget_open" } else { "widget_close" };
        self.track(event, Value::Null);
    }

    pub fn set_theme(&mut self, color: &str) -> Result<(), ConfigError> {
        let primary = normalize_color("theme", color)?;
        self.storage.save(THEME_KEY, &primary);
        self.patches.push(Patch::Theme {
            primary: primary.clone(),
        });
        self.theme = Some(primary);
        Ok(())
    }

    /// Forgets the conversation and the lead. The visitor id survives.
    pub fn reset(&mut self) {
        self.store.clear(&mut self.storage);
        self.lead = Lead::default();
        self.step = ConversationStep::FreeChat;
        self.exchanges = 0;
        self.engaged = false;
        self.idle_deadline = None;
        self.awaiting_idle_answer = false;
        self.lead_prompt_at = None;
        self.lead_prompt_sent = false;
        self.quick_replies.clear();
        self.input_enabled = true;
        self.patches.push(Patch::Reset);
        self.add_welcome();
        info!(visitor_id = %self.visitor_id, "widget session reset");
    }

    /// Re-renders the whole session for a page that reloaded while it was live.
    pub fn replay(&mut self) {
        self.patches.clear();
        self.render_history();
        self.patches.push(Patch::Open { open: self.open });
        if let Some(primary) = &self.theme {
            self.patches.push(Patch::Theme {
                primary: primary.clone(),
            });
        }
        self.patches.push(Patch::Input {
            enabled: self.input_enabled,
        });
    }

    /// Fires every timer due at `now`. Returns how many fired.
    pub fn fire_due_timers(&mut self, now: Instant) -> usize {
        let mut fired = 0;

        if self.lead_prompt_at.is_some_and(|at| at <= now) {
            self.lead_prompt_at = None;
            if self.step == ConversationStep::CollectingLead && !self.lead_prompt_sent {
                self.lead_prompt_sent = true;
                let text = self.config.locale.lead_request();
                self.push_message(
                    Message::new(text, Sender::Bot, MessageOptions::default()),
                    Some(now),
                );
                fired += 1;
            }
        }

        if self.idle_deadline.is_some_and(|at| at <= now) {
            self.idle_deadline = None;
            self.engaged = false;
            self.awaiting_idle_answer = true;
            let locale = self.config.locale;
            let options = MessageOptions::quick_replies(locale.yes_no());
            self.push_message(Message::new(locale.idle_prompt(), Sender::Bot, options), None);
            fired += 1;
        }

        fired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.lead_prompt_at, self.idle_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn drain_patches(&mut self) -> Vec<Patch> {
        std::mem::take(&mut self.patches)
    }

    pub fn config(&self) -> &WidgetConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn lead(&self) -> &Lead {
        &self.lead
    }

    pub fn step(&self) -> ConversationStep {
        self.step
    }

    pub fn exchanges(&self) -> u32 {
        self.exchanges
    }

    pub fn visitor_id(&self) -> &str {
        &self.visitor_id
    }

    pub fn input_enabled(&self) -> bool {
        self.input_enabled
    }

    pub fn quick_replies(&self) -> &[String] {
        &self.quick_replies
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn theme(&self) -> &str {
        self.theme.as_deref().unwrap_or(&self.config.theme.primary)
    }

    async fn chat_turn(&mut self) -> TurnOutcome {
        let request = ChatRequest {
            history: self.store.history(),
            visitor_id: Some(self.visitor_id.clone()),
        };
        self.set_input_enabled(false);
        let result = self.backend.chat(&request).await;
        self.set_input_enabled(true);

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                warn!(visitor_id = %self.visitor_id, error = %err, "chat request failed");
                self.apologize();
                return TurnOutcome::Failed;
            }
        };
        let Some(text) = reply.response.filter(|text| !text.trim().is_empty()) else {
            warn!(visitor_id = %self.visitor_id, "chat reply had no text");
            self.apologize();
            return TurnOutcome::Failed;
        };

        let now = Instant::now();
        self.push_message(
            Message::new(text, Sender::Bot, reply.options.unwrap_or_default()),
            Some(now),
        );

        if self.step == ConversationStep::FreeChat {
            self.exchanges += 1;
            if self.exchanges >= LEAD_THRESHOLD {
                self.step = ConversationStep::CollectingLead;
                self.lead_prompt_at = Some(now + LEAD_PROMPT_DELAY);
                info!(visitor_id = %self.visitor_id, "starting lead collection");
            }
        }
        TurnOutcome::Replied
    }

    async fn lead_turn(&mut self, text: &str) -> TurnOutcome {
        let locale = self.config.locale;
        if is_refusal(text) {
            info!(visitor_id = %self.visitor_id, "visitor declined lead collection");
            self.step = ConversationStep::PostCollection;
            self.push_message(
                Message::new(locale.refusal_ack(), Sender::Bot, MessageOptions::default()),
                Some(Instant::now()),
            );
            return TurnOutcome::Refused;
        }

        let request = LeadRequest {
            input: text.to_string(),
            current_lead: self.lead.to_fields(),
            visitor_id: Some(self.visitor_id.clone()),
        };
        self.set_input_enabled(false);
        let result = self.backend.lead(&request).await;
        self.set_input_enabled(true);

        let reply = match result {
            Ok(reply) => reply,
            Err(err) => {
                warn!(visitor_id = %self.visitor_id, error = %err, "lead request failed");
                self.apologize();
                return TurnOutcome::Failed;
            }
        };

        self.lead.merge(&reply.lead);
        let missing = self.lead.missing_fields();
        if reply.complete != missing.is_empty() {
            debug!(
                server_complete = reply.complete,
                missing = ?missing,
                "server completeness differs from local check"
            );
        }

        let now = Some(Instant::now());
        match missing_fields_prompt(&missing, locale) {
            None => {
                info!(visitor_id = %self.visitor_id, "lead collected");
                self.step = ConversationStep::PostCollection;
                let summary = lead_summary(&self.lead, locale);
                self.push_message(
                    Message::new(summary, Sender::Bot, MessageOptions::default()),
                    now,
                );
                TurnOutcome::LeadComplete
            }
            Some(prompt) => {
                self.push_message(
                    Message::new(prompt, Sender::Bot, MessageOptions::default()),
                    now,
                );
                TurnOutcome::LeadIncomplete(missing)
            }
        }
    }

    async fn sync_visitor(&mut self) {
        let Some(record) = fetch_record(self.backend.as_ref(), &self.visitor_id).await else {
            return;
        };
        let outcome = reconcile(record, &mut self.lead);
        if outcome.lead_complete && self.step != ConversationStep::PostCollection {
            info!(visitor_id = %self.visitor_id, "stored lead already complete");
            self.step = ConversationStep::PostCollection;
            self.lead_prompt_at = None;
        }
        if let Some(history) = outcome.history {
            debug!(count = history.len(), "replacing local history with server history");
            self.store.replace(history, &mut self.storage);
            self.render_history();
        }
    }

    fn track(&self, event: &str, data: Value) {
        let backend = Arc::clone(&self.backend);
        let event = TrackEvent {
            event: event.to_string(),
            visitor_id: Some(self.visitor_id.clone()),
            data,
            timestamp: now_iso(),
        };
        tokio::spawn(async move {
            if let Err(err) = backend.track(&event).await {
                warn!(event = %event.event, error = %err, "track event failed");
            }
        });
    }

    fn add_welcome(&mut self) {
        let options = MessageOptions::quick_replies(self.config.initial_quick_replies.clone());
        let text = self.config.welcome_message.clone();
        self.push_message(Message::new(text, Sender::Bot, options), None);
    }

    fn apologize(&mut self) {
        let text = self.config.locale.apology();
        self.push_message(
            Message::new(text, Sender::Bot, MessageOptions::default()),
            Some(Instant::now()),
        );
    }

    /// Appends, persists and renders a live message. `idle_from` arms the idle
    /// timer relative to that instant when the message is from the bot and the
    /// visitor has engaged since the last idle prompt.
    fn push_message(&mut self, message: Message, idle_from: Option<Instant>) {
        let rendered = RenderedMessage::from_message(&message, &self.config, false);
        let sender = message.sender;
        let quick_replies = message.options.quick_replies.clone();
        self.store.push(message, &mut self.storage);
        self.patches.push(Patch::Append(rendered));

        if sender == Sender::Bot {
            self.set_quick_replies(quick_replies);
            if let Some(from) = idle_from {
                if self.engaged {
                    self.idle_deadline = Some(from + IDLE_TIMEOUT);
                }
            }
        }
    }

    /// Re-renders the whole log as history: no quick replies, no network.
    fn render_history(&mut self) {
        self.quick_replies.clear();
        self.patches.push(Patch::Reset);
        for message in self.store.messages() {
            self.patches.push(Patch::Append(RenderedMessage::from_message(
                message,
                &self.config,
                true,
            )));
        }
    }

    fn set_quick_replies(&mut self, replies: Vec<String>) {
        if replies.is_empty() {
            if !self.quick_replies.is_empty() {
                self.quick_replies.clear();
                self.patches.push(Patch::ClearQuickReplies);
            }
            return;
        }
        self.quick_replies = replies.clone();
        self.patches.push(Patch::QuickReplies(replies));
    }

    fn set_input_enabled(&mut self, enabled: bool) {
        self.input_enabled = enabled;
        self.patches.push(Patch::Input { enabled });
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::error::{BackendError, BackendResult};
    use crate::lead::{SENTINEL_EMAIL, SENTINEL_PHONE};
    use crate::storage::{MemoryStorage, HISTORY_KEY};
    use crate::types::{ChatReply, LeadFields, LeadReply, VisitorRecord};

    #[derive(Default)]
    struct FakeBackend {
        chat_replies: Mutex<VecDeque<BackendResult<ChatReply>>>,
        lead_replies: Mutex<VecDeque<BackendResult<LeadReply>>>,
        record: Mutex<Option<VisitorRecord>>,
        calls: Mutex<Vec<String>>,
        track_delay: Option<Duration>,
    }

    impl FakeBackend {
        fn with_record(record: VisitorRecord) -> Self {
            let backend = Self::default();
            *backend.record.lock().unwrap() = Some(record);
            backend
        }

        fn queue_chat(&self, reply: BackendResult<ChatReply>) {
            self.chat_replies.lock().unwrap().push_back(reply);
        }

        fn queue_lead(&self, reply: BackendResult<LeadReply>) {
            self.lead_replies.lock().unwrap().push_back(reply);
        }

        fn calls(&self, name: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| call.as_str() == name)
                .count()
        }
    }

    #[async_trait]
    impl Backend for FakeBackend {
        async fn chat(&self, _request: &ChatRequest) -> BackendResult<ChatReply> {
            self.calls.lock().unwrap().push("chat".into());
            self.chat_replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(chat_reply("Sure, happy to help.")))
        }

        async fn lead(&self, request: &LeadRequest) -> BackendResult<LeadReply> {
            self.calls.lock().unwrap().push("lead".into());
            self.lead_replies.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(LeadReply {
                    status: "success".into(),
                    lead: request.current_lead.clone(),
                    message: None,
                    complete: false,
                })
            })
        }

        async fn lookup_visitor(&self, _visitor_id: &str) -> BackendResult<VisitorRecord> {
            self.calls.lock().unwrap().push("lookup".into());
            self.record
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| BackendError::Status {
                    status: 404,
                    body: String::new(),
                })
        }

        async fn track(&self, event: &TrackEvent) -> BackendResult<()> {
            if let Some(delay) = self.track_delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.lock().unwrap().push(format!("track:{}", event.event));
            Ok(())
        }
    }

    fn chat_reply(text: &str) -> ChatReply {
        ChatReply {
            status: "success".into(),
            response: Some(text.into()),
            options: None,
        }
    }

    fn lead_reply(name: &str, email: &str, phone: &str, complete: bool) -> LeadReply {
        LeadReply {
            status: "success".into(),
            lead: LeadFields {
                name: Some(name.into()),
                email: Some(email.into()),
                phone: Some(phone.into()),
            },
            message: None,
            complete,
        }
    }

    fn session(backend: FakeBackend) -> ChatSession<FakeBackend, MemoryStorage> {
        ChatSession::new(WidgetConfig::default(), backend, MemoryStorage::new())
    }

    fn later(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    fn last_text(session: &ChatSession<FakeBackend, MemoryStorage>) -> String {
        session.messages().last().unwrap().text.clone()
    }

    /// Lets spawned track calls run on the test runtime.
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn start_greets_with_initial_quick_replies() {
        let mut session = session(FakeBackend::default());
        session.start().await;

        assert_eq!(session.messages().len(), 1);
        assert_eq!(last_text(&session), WidgetConfig::default().welcome_message);
        assert_eq!(
            session.quick_replies(),
            WidgetConfig::default().initial_quick_replies.as_slice()
        );
        assert_eq!(session.backend().calls("lookup"), 1);
        assert_eq!(session.backend().calls("chat"), 0);
    }

    #[tokio::test]
    async fn two_exchanges_start_lead_collection() {
        let mut session = session(FakeBackend::default());
        session.start().await;

        assert_eq!(session.submit("What do you offer?").await, TurnOutcome::Replied);
        assert_eq!(session.step(), ConversationStep::FreeChat);
        assert_eq!(session.submit("And pricing?").await, TurnOutcome::Replied);
        assert_eq!(session.step(), ConversationStep::CollectingLead);
        assert!(session.next_deadline().is_some());

        assert_eq!(session.fire_due_timers(later(2)), 1);
        assert_eq!(last_text(&session), session.config().locale.lead_request());
        assert_eq!(session.fire_due_timers(later(3)), 0);

        session.submit("I'm Jane").await;
        assert_eq!(session.backend().calls("chat"), 2);
        assert_eq!(session.backend().calls("lead"), 1);
    }

    #[tokio::test]
    async fn failed_chat_apologizes_without_advancing() {
        let backend = FakeBackend::default();
        backend.queue_chat(Err(BackendError::Network("connection refused".into())));
        let mut session = session(backend);
        session.start().await;

        assert_eq!(session.submit("hello").await, TurnOutcome::Failed);
        assert_eq!(last_text(&session), session.config().locale.apology());
        assert_eq!(session.exchanges(), 0);
        assert!(session.input_enabled());

        assert_eq!(session.submit("hello again").await, TurnOutcome::Replied);
        assert_eq!(session.exchanges(), 1);
    }

    #[tokio::test]
    async fn empty_chat_reply_counts_as_failure() {
        let backend = FakeBackend::default();
        backend.queue_chat(Ok(ChatReply {
            status: "success".into(),
            response: Some("  ".into()),
            options: None,
        }));
        let mut session = session(backend);
        assert_eq!(session.submit("hello").await, TurnOutcome::Failed);
        assert_eq!(session.exchanges(), 0);
    }

    #[tokio::test]
    async fn refusal_skips_lead_endpoint() {
        let mut session = session(FakeBackend::default());
        session.submit("one").await;
        session.submit("two").await;

        assert_eq!(session.submit("Not now!").await, TurnOutcome::Refused);
        assert_eq!(session.step(), ConversationStep::PostCollection);
        assert_eq!(session.backend().calls("lead"), 0);
        assert_eq!(session.fire_due_timers(later(2)), 0);
    }

    #[tokio::test]
    async fn lead_collection_asks_for_missing_then_summarizes() {
        let backend = FakeBackend::default();
        backend.queue_lead(Ok(lead_reply("Jane Doe", SENTINEL_EMAIL, SENTINEL_PHONE, false)));
        backend.queue_lead(Ok(lead_reply("", "jane@corp.io", "", false)));
        backend.queue_lead(Ok(lead_reply("", "", "0612345678", true)));
        let mut session = session(backend);
        session.submit("one").await;
        session.submit("two").await;

        assert_eq!(
            session.submit("Jane Doe").await,
            TurnOutcome::LeadIncomplete(vec![LeadField::Email, LeadField::Phone])
        );
        assert_eq!(
            last_text(&session),
            "Could you give me your email and phone number?"
        );

        assert_eq!(
            session.submit("jane@corp.io").await,
            TurnOutcome::LeadIncomplete(vec![LeadField::Phone])
        );
        assert_eq!(last_text(&session), "Could you give me your phone number?");

        assert_eq!(session.submit("0612345678").await, TurnOutcome::LeadComplete);
        assert_eq!(session.step(), ConversationStep::PostCollection);
        assert!(last_text(&session).contains("jane@corp.io"));
        assert_eq!(session.lead().name, "Jane Doe");

        session.submit("thanks").await;
        session.submit("bye").await;
        assert_eq!(session.step(), ConversationStep::PostCollection);
        assert_eq!(session.exchanges(), 2);
    }

    #[tokio::test]
    async fn failed_lead_call_keeps_collecting() {
        let backend = FakeBackend::default();
        backend.queue_lead(Err(BackendError::Malformed("eof".into())));
        let mut session = session(backend);
        session.submit("one").await;
        session.submit("two").await;

        assert_eq!(session.submit("Jane").await, TurnOutcome::Failed);
        assert_eq!(session.step(), ConversationStep::CollectingLead);
        assert_eq!(last_text(&session), session.config().locale.apology());
    }

    fn complete_lead_record() -> VisitorRecord {
        VisitorRecord {
            status: "success".into(),
            lead: Some(LeadFields {
                name: Some("Jane".into()),
                email: Some("jane@corp.io".into()),
                phone: Some("0612345678".into()),
            }),
            history: None,
        }
    }

    #[tokio::test]
    async fn idle_prompt_needs_engagement_and_fires_once() {
        let mut session = session(FakeBackend::with_record(complete_lead_record()));
        session.start().await;
        assert_eq!(session.step(), ConversationStep::PostCollection);
        assert_eq!(session.fire_due_timers(later(120)), 0);

        session.submit("hello").await;
        assert_eq!(session.fire_due_timers(later(30)), 0);
        assert_eq!(session.fire_due_timers(later(61)), 1);
        assert_eq!(last_text(&session), session.config().locale.idle_prompt());
        assert_eq!(session.quick_replies(), ["Yes", "No"]);
        assert_eq!(session.fire_due_timers(later(600)), 0);

        session.submit("Yes").await;
        assert_eq!(session.fire_due_timers(later(61)), 1);
    }

    #[tokio::test]
    async fn user_message_clears_quick_replies() {
        let mut session = session(FakeBackend::default());
        session.start().await;
        session.drain_patches();

        session.submit("Our services").await;
        let patches = session.drain_patches();
        assert_eq!(patches[0], Patch::ClearQuickReplies);
        assert!(matches!(&patches[1], Patch::Append(m) if m.sender == Sender::User));
        assert!(patches.contains(&Patch::Input { enabled: false }));
        assert!(patches.contains(&Patch::Input { enabled: true }));
        assert!(session.quick_replies().is_empty());
    }

    #[tokio::test]
    async fn restored_history_renders_without_quick_replies_or_calls() {
        let mut storage = MemoryStorage::new();
        let stored = vec![
            Message::new("hi", Sender::User, MessageOptions::default()),
            Message::new("Pick one", Sender::Bot, MessageOptions::quick_replies(["A", "B"])),
        ];
        storage.save(HISTORY_KEY, &serde_json::to_string(&stored).unwrap());
        let mut session =
            ChatSession::new(WidgetConfig::default(), FakeBackend::default(), storage);
        session.start().await;

        let patches = session.drain_patches();
        assert!(patches
            .iter()
            .all(|p| !matches!(p, Patch::QuickReplies(_))));
        let appended = patches
            .iter()
            .filter_map(|p| match p {
                Patch::Append(m) => Some(m),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(appended.len(), 2);
        assert!(appended.iter().all(|m| m.from_history));
        assert_eq!(session.backend().calls("chat"), 0);
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test]
    async fn server_history_and_complete_lead_win() {
        let backend = FakeBackend::with_record(VisitorRecord {
            history: Some(vec![
                Message::new("earlier question", Sender::User, MessageOptions::default()),
                Message::new("earlier answer", Sender::Bot, MessageOptions::default()),
                Message::new("follow-up", Sender::User, MessageOptions::default()),
            ]),
            ..complete_lead_record()
        });
        let mut storage = MemoryStorage::new();
        let local = vec![Message::new("local only", Sender::User, MessageOptions::default())];
        storage.save(HISTORY_KEY, &serde_json::to_string(&local).unwrap());

        let mut session = ChatSession::new(WidgetConfig::default(), backend, storage);
        session.start().await;

        assert_eq!(session.step(), ConversationStep::PostCollection);
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[0].text, "earlier question");

        session.submit("one").await;
        session.submit("two").await;
        assert_eq!(session.step(), ConversationStep::PostCollection);
    }

    #[tokio::test]
    async fn quick_reply_click_tracks_then_submits() {
        let mut session = session(FakeBackend::default());
        session.start().await;
        assert_eq!(session.click_quick_reply("Get a quote").await, TurnOutcome::Replied);
        settle().await;
        assert_eq!(session.backend().calls("track:quick_reply"), 1);
        assert_eq!(session.messages()[1].text, "Get a quote");
    }

    #[tokio::test]
    async fn slow_tracking_does_not_hold_up_the_turn() {
        let mut session = session(FakeBackend {
            track_delay: Some(Duration::from_secs(5)),
            ..FakeBackend::default()
        });
        session.start().await;

        let started = Instant::now();
        assert_eq!(session.click_quick_reply("Get a quote").await, TurnOutcome::Replied);
        session.click_link("https://example.org/quote");
        session.set_open(true);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(session.backend().calls("chat"), 1);
        assert_eq!(session.backend().calls("track:quick_reply"), 0);
    }

    #[tokio::test]
    async fn answering_idle_prompt_does_not_decline_lead_collection() {
        let mut session = session(FakeBackend::default());
        session.start().await;
        session.submit("What do you offer?").await;
        session.submit("And pricing?").await;
        assert_eq!(session.fire_due_timers(later(2)), 1);
        assert_eq!(session.fire_due_timers(later(70)), 1);
        assert_eq!(last_text(&session), session.config().locale.idle_prompt());

        assert_eq!(session.click_quick_reply("No").await, TurnOutcome::Replied);
        assert_eq!(session.step(), ConversationStep::CollectingLead);
        assert_eq!(session.backend().calls("chat"), 3);
        assert_eq!(session.backend().calls("lead"), 0);

        assert_eq!(session.submit("no").await, TurnOutcome::Refused);
        assert_eq!(session.step(), ConversationStep::PostCollection);
    }

    #[tokio::test]
    async fn open_state_and_theme_persist() {
        let mut session = session(FakeBackend::default());
        session.set_open(true);
        session.set_theme("FF8800").unwrap();
        assert!(session.set_theme("orange").is_err());
        assert_eq!(session.theme(), "#ff8800");
        assert_eq!(session.storage().load(OPEN_KEY).as_deref(), Some("true"));
        settle().await;
        assert_eq!(session.backend().calls("track:widget_open"), 1);
    }

    #[tokio::test]
    async fn reset_starts_over_but_keeps_visitor() {
        let mut session = session(FakeBackend::default());
        session.start().await;
        let visitor = session.visitor_id().to_string();
        session.submit("one").await;
        session.submit("two").await;

        session.reset();
        assert_eq!(session.step(), ConversationStep::FreeChat);
        assert_eq!(session.exchanges(), 0);
        assert_eq!(session.messages().len(), 1);
        assert_eq!(session.visitor_id(), visitor);
        assert_eq!(session.next_deadline(), None);
    }

    #[tokio::test]
    async fn replay_rerenders_a_live_session() {
        let mut session = session(FakeBackend::default());
        session.start().await;
        session.set_theme("#123456").unwrap();
        session.submit("What do you offer?").await;

        session.replay();
        let patches = session.drain_patches();
        assert_eq!(patches[0], Patch::Reset);
        let appended = patches
            .iter()
            .filter(|p| matches!(p, Patch::Append(m) if m.from_history))
            .count();
        assert_eq!(appended, 3);
        assert!(patches.contains(&Patch::Theme {
            primary: "#123456".into()
        }));
        assert!(!patches.iter().any(|p| matches!(p, Patch::QuickReplies(_))));
        assert_eq!(patches.last(), Some(&Patch::Input { enabled: true }));
    }

    #[tokio::test]
    async fn blank_input_is_ignored() {
        let mut session = session(FakeBackend::default());
        assert_eq!(session.submit("   ").await, TurnOutcome::Ignored);
        assert!(session.messages().is_empty());
    }
}
