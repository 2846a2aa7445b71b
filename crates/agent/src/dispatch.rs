//! The dispatch loop implementation.

use crate::history_cache::HistoryCache;
use crate::stream_event::AgentStreamEvent;
use campusd_core::error::{Error, ReasonerError};
use campusd_core::message::{Message, SessionId};
use campusd_core::reasoner::{Reasoner, ReasonerReply, ReasonerRequest};
use campusd_core::store::ConversationStore;
use campusd_core::tool::{ToolCallRequest, ToolCallResult, ToolRegistry};
use campusd_guard::{Guardrail, GuardrailVerdict};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The result of one chat turn.
#[derive(Debug, Clone)]
pub struct TurnReply {
    /// The session this turn belongs to (generated when none was supplied,
    /// so the caller can address follow-up turns).
    pub session_id: SessionId,
    pub outcome: TurnOutcome,
}

/// What the turn produced.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// The guardrail stopped the turn; nothing was persisted.
    Blocked { refusal: String },

    /// A completed turn: the final assistant text, plus the tool exchange
    /// when one happened.
    Reply {
        text: String,
        tool_invocation: Option<ToolInvocation>,
    },
}

/// The tool exchange of a tool turn.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub name: String,
    pub result: ToolCallResult,
}

/// The core loop that orchestrates guardrails, reasoning calls, and tool
/// execution for one chat turn at a time.
///
/// Turns for different sessions run concurrently; within a turn every step
/// strictly follows the previous one.
pub struct DispatchLoop {
    reasoner: Arc<dyn Reasoner>,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn ConversationStore>,
    guardrail: Arc<dyn Guardrail>,

    /// System preamble prepended to every working message list
    system_prompt: String,

    temperature: f32,
    max_tokens: Option<u32>,

    /// Bounded wait for each reasoning-service call
    call_timeout: Duration,

    /// Fast path for session history; the store is the source of truth
    history_cache: HistoryCache,
}

const BLOCKED_REFUSAL: &str = "Message blocked by guardrails";

impl DispatchLoop {
    pub fn new(
        reasoner: Arc<dyn Reasoner>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
        guardrail: Arc<dyn Guardrail>,
    ) -> Self {
        Self {
            reasoner,
            tools,
            store,
            guardrail,
            system_prompt: String::new(),
            temperature: 0.7,
            max_tokens: None,
            call_timeout: Duration::from_secs(60),
            history_cache: HistoryCache::new(256),
        }
    }

    /// Set the system preamble.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the max tokens per reasoning reply.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    /// Set the bounded wait for each reasoning-service call.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the history cache capacity (sessions).
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_cache = HistoryCache::new(capacity);
        self
    }

    /// Process one chat turn and return the complete reply.
    pub async fn run(
        &self,
        session_id: Option<&str>,
        user_text: &str,
    ) -> Result<TurnReply, Error> {
        let session_id = Self::resolve_session(session_id);

        // Guardrail first: a blocked turn makes no reasoning call and
        // persists nothing.
        if let GuardrailVerdict::Blocked { term } = self.guardrail.inspect(user_text) {
            info!(session_id = %session_id, term = %term, "Turn blocked by guardrail");
            return Ok(TurnReply {
                session_id,
                outcome: TurnOutcome::Blocked {
                    refusal: BLOCKED_REFUSAL.into(),
                },
            });
        }

        let mut working = self.build_working_list(&session_id, user_text).await?;

        let ReasonerReply {
            content,
            function_call,
        } = self.reason(working.clone(), true).await?;

        // A function call takes precedence even when content rides along —
        // that content is discarded for the hop.
        let Some(call) = function_call else {
            let text = Self::reply_text(content);
            self.persist(&session_id, Message::assistant(&text)).await;
            return Ok(TurnReply {
                session_id,
                outcome: TurnOutcome::Reply {
                    text,
                    tool_invocation: None,
                },
            });
        };

        let result = self
            .execute_and_record(&session_id, &mut working, &call)
            .await;

        let second = self.reason(working, false).await?;
        let text = Self::reply_text(second.content);
        self.persist(&session_id, Message::assistant(&text)).await;

        Ok(TurnReply {
            session_id,
            outcome: TurnOutcome::Reply {
                text,
                tool_invocation: Some(ToolInvocation {
                    name: call.name,
                    result,
                }),
            },
        })
    }

    /// Process one chat turn, streaming the final reply incrementally.
    ///
    /// Events arrive on the returned channel; a terminal `Done` (or
    /// `Blocked`/`Error`) always closes the stream. Dropping the receiver
    /// cancels the turn cooperatively between fragment emissions — the
    /// incomplete reply is then not persisted.
    pub fn run_stream(
        self: Arc<Self>,
        session_id: Option<&str>,
        user_text: &str,
    ) -> mpsc::Receiver<AgentStreamEvent> {
        let (tx, rx) = mpsc::channel::<AgentStreamEvent>(128);
        let session_id = session_id.map(str::to_owned);
        let user_text = user_text.to_owned();

        tokio::spawn(async move {
            self.run_stream_inner(session_id.as_deref(), &user_text, tx)
                .await;
        });

        rx
    }

    async fn run_stream_inner(
        &self,
        session_id: Option<&str>,
        user_text: &str,
        tx: mpsc::Sender<AgentStreamEvent>,
    ) {
        let session_id = Self::resolve_session(session_id);

        if let GuardrailVerdict::Blocked { term } = self.guardrail.inspect(user_text) {
            info!(session_id = %session_id, term = %term, "Turn blocked by guardrail");
            let _ = tx
                .send(AgentStreamEvent::Blocked {
                    reason: BLOCKED_REFUSAL.into(),
                })
                .await;
            return;
        }

        let mut working = match self.build_working_list(&session_id, user_text).await {
            Ok(list) => list,
            Err(e) => {
                let _ = tx
                    .send(AgentStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        // Tool-selection hops are never streamed; only the final phrasing is.
        let ReasonerReply {
            content,
            function_call,
        } = match self.reason(working.clone(), true).await {
            Ok(reply) => reply,
            Err(e) => {
                let _ = tx
                    .send(AgentStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let Some(call) = function_call else {
            // Direct reply: the full text is already in hand; forward it as
            // one fragment so concatenation matches the batch reply.
            let text = Self::reply_text(content);
            if tx
                .send(AgentStreamEvent::Chunk {
                    content: text.clone(),
                })
                .await
                .is_err()
            {
                debug!(session_id = %session_id, "Client disconnected; abandoning turn");
                return;
            }
            self.persist(&session_id, Message::assistant(&text)).await;
            let _ = tx
                .send(AgentStreamEvent::Done {
                    session_id: session_id.to_string(),
                })
                .await;
            return;
        };

        if tx
            .send(AgentStreamEvent::ToolCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await
            .is_err()
        {
            debug!(session_id = %session_id, "Client disconnected before tool dispatch");
            return;
        }

        let result = self
            .execute_and_record(&session_id, &mut working, &call)
            .await;

        if tx
            .send(AgentStreamEvent::ToolResult {
                name: call.name.clone(),
                success: result.success,
                payload: result.payload.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        // Second call: stream the phrasing, forwarding fragments as produced.
        let stream_result = tokio::time::timeout(
            self.call_timeout,
            self.reasoner.stream(self.build_request(working, false)),
        )
        .await;

        let mut fragments = match stream_result {
            Ok(Ok(rx)) => rx,
            Ok(Err(e)) => {
                let _ = tx
                    .send(AgentStreamEvent::Error {
                        message: Error::from(e).to_string(),
                    })
                    .await;
                return;
            }
            Err(_) => {
                let _ = tx
                    .send(AgentStreamEvent::Error {
                        message: Error::from(ReasonerError::Timeout(
                            self.call_timeout.as_secs(),
                        ))
                        .to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut full_text = String::new();
        while let Some(fragment) = fragments.recv().await {
            match fragment {
                Ok(fragment) => {
                    if let Some(content) = fragment.content {
                        if !content.is_empty() {
                            full_text.push_str(&content);
                            if tx
                                .send(AgentStreamEvent::Chunk { content })
                                .await
                                .is_err()
                            {
                                debug!(
                                    session_id = %session_id,
                                    "Client disconnected mid-stream; abandoning turn"
                                );
                                return;
                            }
                        }
                    }
                    if fragment.done {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx
                        .send(AgentStreamEvent::Error {
                            message: Error::from(e).to_string(),
                        })
                        .await;
                    return;
                }
            }
        }

        self.persist(&session_id, Message::assistant(&full_text))
            .await;
        let _ = tx
            .send(AgentStreamEvent::Done {
                session_id: session_id.to_string(),
            })
            .await;
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn resolve_session(session_id: Option<&str>) -> SessionId {
        match session_id {
            Some(id) if !id.is_empty() => SessionId::from(id),
            _ => SessionId::new(),
        }
    }

    /// System preamble + history + the new user message.
    async fn build_working_list(
        &self,
        session_id: &SessionId,
        user_text: &str,
    ) -> Result<Vec<Message>, Error> {
        let history = self.load_history(session_id).await?;

        let mut working = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.is_empty() {
            working.push(Message::system(&self.system_prompt));
        }
        working.extend(history);
        working.push(Message::user(user_text));
        Ok(working)
    }

    /// Cache-first history load; a read failure fails the turn.
    async fn load_history(&self, session_id: &SessionId) -> Result<Vec<Message>, Error> {
        if let Some(history) = self.history_cache.get(session_id) {
            debug!(session_id = %session_id, messages = history.len(), "History cache hit");
            return Ok(history);
        }

        let history = self.store.find_history(session_id).await?;
        self.history_cache.put(session_id, history.clone());
        Ok(history)
    }

    fn build_request(&self, messages: Vec<Message>, with_tools: bool) -> ReasonerRequest {
        ReasonerRequest {
            messages,
            tools: if with_tools { self.tools.specs() } else { vec![] },
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    /// Timeout-bounded synchronous reasoning call.
    async fn reason(
        &self,
        messages: Vec<Message>,
        with_tools: bool,
    ) -> Result<ReasonerReply, Error> {
        let request = self.build_request(messages, with_tools);
        debug!(
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Invoking reasoning service"
        );
        match tokio::time::timeout(self.call_timeout, self.reasoner.complete(request)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ReasonerError::Timeout(self.call_timeout.as_secs()).into()),
        }
    }

    /// Dispatch the tool and persist the intent/result pair, extending the
    /// working list so the second reasoning call sees the exchange.
    async fn execute_and_record(
        &self,
        session_id: &SessionId,
        working: &mut Vec<Message>,
        call: &ToolCallRequest,
    ) -> ToolCallResult {
        info!(session_id = %session_id, tool = %call.name, "Dispatching tool");

        let intent = Message::function_call(&call.name, &call.arguments);
        self.persist(session_id, intent.clone()).await;
        working.push(intent);

        let result = self.tools.dispatch(call).await;

        let tool_message = Message::tool_result(&call.name, result.to_message_content());
        self.persist(session_id, tool_message.clone()).await;
        working.push(tool_message);

        result
    }

    /// Append to the store, mirroring into the cache on success.
    ///
    /// A failed append is a consistency gap, not a turn failure: the reply
    /// still goes out, the gap is logged, and the cache entry is dropped so
    /// the next turn re-reads the store.
    async fn persist(&self, session_id: &SessionId, message: Message) {
        match self.store.append(session_id, message.clone()).await {
            Ok(()) => self.history_cache.append(session_id, message),
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "History append failed — reply returned without persistence (consistency gap)"
                );
                self.history_cache.invalidate(session_id);
            }
        }
    }

    fn reply_text(content: Option<String>) -> String {
        match content {
            Some(text) if !text.is_empty() => text,
            _ => {
                debug!("Reasoning service returned empty content");
                String::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campusd_core::error::StoreError;
    use campusd_core::store::CampusStore;
    use campusd_guard::{AllowAll, DenylistFilter};
    use campusd_store::InMemoryStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A reasoner that replays scripted replies and records every request.
    struct ScriptedReasoner {
        replies: Mutex<VecDeque<ReasonerReply>>,
        requests: Mutex<Vec<ReasonerRequest>>,
    }

    impl ScriptedReasoner {
        fn new(replies: Vec<ReasonerReply>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(vec![]),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, index: usize) -> ReasonerRequest {
            self.requests.lock().unwrap()[index].clone()
        }
    }

    #[async_trait::async_trait]
    impl Reasoner for ScriptedReasoner {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(
            &self,
            request: ReasonerRequest,
        ) -> Result<ReasonerReply, ReasonerError> {
            self.requests.lock().unwrap().push(request);
            Ok(self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ReasonerReply::text("(script exhausted)")))
        }
    }

    /// A reasoner that sleeps past any reasonable timeout.
    struct SlowReasoner;

    #[async_trait::async_trait]
    impl Reasoner for SlowReasoner {
        fn name(&self) -> &str {
            "slow"
        }

        async fn complete(
            &self,
            _request: ReasonerRequest,
        ) -> Result<ReasonerReply, ReasonerError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ReasonerReply::text("too late"))
        }
    }

    /// Wraps an InMemoryStore, counting reads and optionally failing I/O.
    struct InstrumentedStore {
        inner: InMemoryStore,
        reads: AtomicUsize,
        fail_reads: bool,
        fail_appends: bool,
    }

    impl InstrumentedStore {
        fn new() -> Self {
            Self {
                inner: InMemoryStore::new(),
                reads: AtomicUsize::new(0),
                fail_reads: false,
                fail_appends: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl ConversationStore for InstrumentedStore {
        fn name(&self) -> &str {
            "instrumented"
        }

        async fn find_history(
            &self,
            session_id: &SessionId,
        ) -> Result<Vec<Message>, StoreError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.fail_reads {
                return Err(StoreError::Storage("read refused".into()));
            }
            self.inner.find_history(session_id).await
        }

        async fn append(
            &self,
            session_id: &SessionId,
            message: Message,
        ) -> Result<(), StoreError> {
            if self.fail_appends {
                return Err(StoreError::Storage("append refused".into()));
            }
            self.inner.append(session_id, message).await
        }
    }

    fn campus_registry(store: Arc<InMemoryStore>) -> Arc<ToolRegistry> {
        Arc::new(campusd_tools::default_registry(store))
    }

    fn loop_with(
        reasoner: Arc<dyn Reasoner>,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn ConversationStore>,
    ) -> DispatchLoop {
        DispatchLoop::new(reasoner, tools, store, Arc::new(DenylistFilter::default()))
            .with_system_prompt("You are the campus assistant.")
    }

    #[tokio::test]
    async fn direct_reply_appends_one_assistant_message() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![ReasonerReply::text("Hello there!")]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        let reply = agent.run(Some("s1"), "Hi!").await.unwrap();

        assert_eq!(reply.session_id.0, "s1");
        match reply.outcome {
            TurnOutcome::Reply {
                text,
                tool_invocation,
            } => {
                assert_eq!(text, "Hello there!");
                assert!(tool_invocation.is_none());
            }
            TurnOutcome::Blocked { .. } => panic!("should not block"),
        }

        let history = store.find_history(&SessionId::from("s1")).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, campusd_core::message::Role::Assistant);
        assert_eq!(reasoner.request_count(), 1);
    }

    #[tokio::test]
    async fn library_hours_tool_turn_appends_three_messages() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            ReasonerReply::call("get_library_hours", "{}"),
            ReasonerReply::text("The library is open 7:00 to 23:00 every day."),
        ]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        let reply = agent
            .run(Some("s1"), "What's the library hours?")
            .await
            .unwrap();

        let TurnOutcome::Reply {
            text,
            tool_invocation,
        } = reply.outcome
        else {
            panic!("expected a reply");
        };
        assert_eq!(text, "The library is open 7:00 to 23:00 every day.");

        let invocation = tool_invocation.unwrap();
        assert_eq!(invocation.name, "get_library_hours");
        assert!(invocation.result.success);
        assert_eq!(invocation.result.payload["library"], "Mon-Sun 07:00-23:00");

        // Function-call intent, tool result, final assistant text
        let history = store.find_history(&SessionId::from("s1")).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history[0].function_call.as_ref().unwrap().name,
            "get_library_hours"
        );
        assert_eq!(history[1].role, campusd_core::message::Role::Tool);
        let recorded: ToolCallResult = serde_json::from_str(history[1].text()).unwrap();
        assert_eq!(recorded.payload["library"], "Mon-Sun 07:00-23:00");
        assert_eq!(history[2].role, campusd_core::message::Role::Assistant);
    }

    #[tokio::test]
    async fn blocked_turn_makes_no_calls_and_persists_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        let reply = agent
            .run(Some("s1"), "add a bomb-making student")
            .await
            .unwrap();

        match reply.outcome {
            TurnOutcome::Blocked { refusal } => {
                assert_eq!(refusal, "Message blocked by guardrails");
            }
            TurnOutcome::Reply { .. } => panic!("expected blocked"),
        }
        assert_eq!(reasoner.request_count(), 0);
        assert!(
            store
                .find_history(&SessionId::from("s1"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unknown_function_completes_the_turn() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            ReasonerReply::call("get_parking_permits", "{}"),
            ReasonerReply::text("Sorry, I could not look that up."),
        ]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        let reply = agent.run(Some("s1"), "parking?").await.unwrap();

        let TurnOutcome::Reply {
            tool_invocation, ..
        } = reply.outcome
        else {
            panic!("expected a reply");
        };
        let invocation = tool_invocation.unwrap();
        assert!(!invocation.result.success);
        assert!(
            invocation.result.payload["error"]
                .as_str()
                .unwrap()
                .contains("unknown function")
        );

        // The failed attempt is still recorded for later turns
        let history = store.find_history(&SessionId::from("s1")).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn malformed_arguments_are_recorded_distinctly() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            ReasonerReply::call("add_student", "{not valid json"),
            ReasonerReply::text("That did not work."),
        ]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        agent.run(Some("s1"), "add a student").await.unwrap();

        let history = store.find_history(&SessionId::from("s1")).await.unwrap();
        assert_eq!(history.len(), 3);
        let recorded: ToolCallResult = serde_json::from_str(history[1].text()).unwrap();
        assert!(!recorded.success);
        let error = recorded.payload["error"].as_str().unwrap();
        assert!(error.contains("malformed arguments"));
        assert!(!error.contains("unknown function"));
    }

    #[tokio::test]
    async fn function_call_takes_precedence_over_content() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            ReasonerReply {
                content: Some("Let me check that for you.".into()),
                function_call: Some(ToolCallRequest {
                    name: "get_total_students".into(),
                    arguments: "{}".into(),
                }),
            },
            ReasonerReply::text("There are 0 students."),
        ]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        let reply = agent.run(Some("s1"), "how many students?").await.unwrap();

        let TurnOutcome::Reply {
            text,
            tool_invocation,
        } = reply.outcome
        else {
            panic!("expected a reply");
        };
        // The hop's direct content is discarded; the tool path ran.
        assert_eq!(text, "There are 0 students.");
        assert!(tool_invocation.is_some());

        // The persisted intent carries no content
        let history = store.find_history(&SessionId::from("s1")).await.unwrap();
        assert!(history[0].content.is_none());
    }

    #[tokio::test]
    async fn second_call_never_sees_tool_schemas() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            ReasonerReply::call("get_total_students", "{}"),
            ReasonerReply::text("Zero."),
        ]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        agent.run(Some("s1"), "count?").await.unwrap();

        assert_eq!(reasoner.request_count(), 2);
        assert!(!reasoner.request(0).tools.is_empty());
        assert!(reasoner.request(1).tools.is_empty());

        // The second call's message list includes the tool exchange
        let second = reasoner.request(1);
        let roles: Vec<_> = second.messages.iter().map(|m| m.role.clone()).collect();
        assert_eq!(
            roles,
            vec![
                campusd_core::message::Role::System,
                campusd_core::message::Role::User,
                campusd_core::message::Role::Assistant,
                campusd_core::message::Role::Tool,
            ]
        );
    }

    #[tokio::test]
    async fn session_id_is_generated_when_absent() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![ReasonerReply::text("Hi!")]);
        let agent = loop_with(reasoner, campus_registry(store.clone()), store.clone());

        let reply = agent.run(None, "hello").await.unwrap();
        assert!(!reply.session_id.0.is_empty());

        // The turn is addressable afterward
        let history = store.find_history(&reply.session_id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn history_is_replayed_in_chronological_order() {
        let store = Arc::new(InMemoryStore::new());
        let session = SessionId::from("s1");
        store
            .append(&session, Message::user("earlier question"))
            .await
            .unwrap();
        store
            .append(&session, Message::assistant("earlier answer"))
            .await
            .unwrap();

        let reasoner = ScriptedReasoner::new(vec![ReasonerReply::text("Hello again!")]);
        let agent = loop_with(reasoner.clone(), campus_registry(store.clone()), store.clone());

        agent.run(Some("s1"), "follow-up").await.unwrap();

        let request = reasoner.request(0);
        let texts: Vec<_> = request.messages.iter().map(|m| m.text()).collect();
        assert_eq!(
            texts,
            vec![
                "You are the campus assistant.",
                "earlier question",
                "earlier answer",
                "follow-up",
            ]
        );
    }

    #[tokio::test]
    async fn history_cache_avoids_repeat_store_reads() {
        let store = Arc::new(InstrumentedStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            ReasonerReply::text("one"),
            ReasonerReply::text("two"),
        ]);
        let tools = Arc::new(ToolRegistry::new());
        let agent = DispatchLoop::new(reasoner, tools, store.clone(), Arc::new(AllowAll));

        agent.run(Some("s1"), "first").await.unwrap();
        agent.run(Some("s1"), "second").await.unwrap();

        assert_eq!(store.reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn history_read_failure_fails_the_turn() {
        let mut failing = InstrumentedStore::new();
        failing.fail_reads = true;
        let store = Arc::new(failing);
        let reasoner = ScriptedReasoner::new(vec![ReasonerReply::text("unused")]);
        let agent = DispatchLoop::new(
            reasoner.clone(),
            Arc::new(ToolRegistry::new()),
            store,
            Arc::new(AllowAll),
        );

        let err = agent.run(Some("s1"), "hello").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        // The failure happened before any reasoning call
        assert_eq!(reasoner.request_count(), 0);
    }

    #[tokio::test]
    async fn append_failure_still_returns_the_reply() {
        let mut failing = InstrumentedStore::new();
        failing.fail_appends = true;
        let store = Arc::new(failing);
        let reasoner = ScriptedReasoner::new(vec![ReasonerReply::text("Still here.")]);
        let agent = DispatchLoop::new(
            reasoner,
            Arc::new(ToolRegistry::new()),
            store,
            Arc::new(AllowAll),
        );

        let reply = agent.run(Some("s1"), "hello").await.unwrap();
        match reply.outcome {
            TurnOutcome::Reply { text, .. } => assert_eq!(text, "Still here."),
            TurnOutcome::Blocked { .. } => panic!("expected reply"),
        }
    }

    #[tokio::test]
    async fn reasoner_timeout_is_a_turn_level_error() {
        let store = Arc::new(InMemoryStore::new());
        let agent = DispatchLoop::new(
            Arc::new(SlowReasoner),
            Arc::new(ToolRegistry::new()),
            store.clone(),
            Arc::new(AllowAll),
        )
        .with_call_timeout(Duration::from_millis(20));

        let err = agent.run(Some("s1"), "hello").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Reasoner(ReasonerError::Timeout(_))
        ));
        // Nothing persisted for the failed turn
        assert!(
            store
                .find_history(&SessionId::from("s1"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    async fn collect_stream(
        mut rx: mpsc::Receiver<AgentStreamEvent>,
    ) -> (String, Vec<AgentStreamEvent>) {
        let mut text = String::new();
        let mut events = vec![];
        while let Some(event) = rx.recv().await {
            if let AgentStreamEvent::Chunk { content } = &event {
                text.push_str(content);
            }
            events.push(event);
        }
        (text, events)
    }

    #[tokio::test]
    async fn streamed_fragments_concatenate_to_the_batch_reply() {
        let script = || {
            vec![
                ReasonerReply::call("get_library_hours", "{}"),
                ReasonerReply::text("Open 7 to 23, all week."),
            ]
        };

        // Batch mode
        let store_a = Arc::new(InMemoryStore::new());
        let batch_agent = loop_with(
            ScriptedReasoner::new(script()),
            campus_registry(store_a.clone()),
            store_a.clone(),
        );
        let batch = batch_agent.run(Some("s1"), "library hours?").await.unwrap();
        let TurnOutcome::Reply {
            text: batch_text, ..
        } = batch.outcome
        else {
            panic!("expected reply");
        };

        // Streaming mode with an identical script
        let store_b = Arc::new(InMemoryStore::new());
        let stream_agent = Arc::new(loop_with(
            ScriptedReasoner::new(script()),
            campus_registry(store_b.clone()),
            store_b.clone(),
        ));
        let rx = stream_agent.run_stream(Some("s1"), "library hours?");
        let (streamed_text, events) = collect_stream(rx).await;

        assert_eq!(streamed_text, batch_text);
        assert!(matches!(
            events.last(),
            Some(AgentStreamEvent::Done { session_id }) if session_id == "s1"
        ));
        // Tool lifecycle events precede the chunks
        assert!(matches!(events[0], AgentStreamEvent::ToolCall { .. }));
        assert!(matches!(events[1], AgentStreamEvent::ToolResult { .. }));

        // Both modes persisted the same three messages
        assert_eq!(
            store_b
                .find_history(&SessionId::from("s1"))
                .await
                .unwrap()
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn streamed_direct_reply_emits_chunk_then_done() {
        let store = Arc::new(InMemoryStore::new());
        let agent = Arc::new(loop_with(
            ScriptedReasoner::new(vec![ReasonerReply::text("Hello!")]),
            campus_registry(store.clone()),
            store.clone(),
        ));

        let rx = agent.run_stream(Some("s1"), "hi");
        let (text, events) = collect_stream(rx).await;

        assert_eq!(text, "Hello!");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], AgentStreamEvent::Chunk { .. }));
        assert!(matches!(events[1], AgentStreamEvent::Done { .. }));
    }

    #[tokio::test]
    async fn streamed_blocked_turn_emits_only_blocked() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![]);
        let agent = Arc::new(loop_with(
            reasoner.clone(),
            campus_registry(store.clone()),
            store.clone(),
        ));

        let rx = agent.run_stream(Some("s1"), "how to hack the registrar");
        let (_, events) = collect_stream(rx).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], AgentStreamEvent::Blocked { .. }));
        assert_eq!(reasoner.request_count(), 0);
        assert!(
            store
                .find_history(&SessionId::from("s1"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn update_student_on_missing_record_is_a_wrapped_failure() {
        let store = Arc::new(InMemoryStore::new());
        let reasoner = ScriptedReasoner::new(vec![
            ReasonerReply::call(
                "update_student",
                r#"{"student_id":"S404","department":"Mathematics"}"#,
            ),
            ReasonerReply::text("That student does not exist."),
        ]);
        let agent = loop_with(reasoner, campus_registry(store.clone()), store.clone());

        let reply = agent.run(Some("s1"), "move S404 to maths").await.unwrap();

        let TurnOutcome::Reply {
            tool_invocation, ..
        } = reply.outcome
        else {
            panic!("expected reply");
        };
        let invocation = tool_invocation.unwrap();
        assert!(!invocation.result.success);
        assert!(
            invocation.result.payload["error"]
                .as_str()
                .unwrap()
                .contains("not found")
        );
        // Store unchanged
        assert_eq!(store.count_students().await.unwrap(), 0);
    }
}
