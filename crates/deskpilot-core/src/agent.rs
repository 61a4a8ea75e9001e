//! The tool-calling loop.
//!
//! `Idle -> Extracting -> Thinking -> (ToolDispatch -> Extracting -> Thinking)* -> Done`,
//! or `Cancelled` / `Fatal`. One run at a time; a second `run()` while one is
//! active fails with [`AgentError::Busy`] and leaves the first untouched.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use deskpilot_computer_control::{
    process::with_timeout, HostAutomation, ScreenGeometry, VisionLimits,
};
use deskpilot_config::Config;
use deskpilot_providers::{
    CompletionRequest, ImageContent, LLMProvider, Message, MessageRole, ProviderRegistry, ToolCall,
};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::action_sequencer::{ActionSequencer, Clock, TokioClock};
use crate::approval::{
    ApprovalDecision, ApprovalGate, ApprovalPolicy, ApprovalRequest, AuthGate, GateError,
};
use crate::context_window::{ContextWindow, MemoryFlushPolicy};
use crate::coordinates::{CoordinateMapper, PointerSpace};
use crate::error::AgentError;
use crate::error_handling::{retry_with_backoff, ErrorContext, RetryConfig};
use crate::history::{ActionLogEntry, HistoryStore, JsonlHistoryStore, RunRecord};
use crate::memory::{MemoryFlusher, MemoryStore};
use crate::prompts;
use crate::settings::{FileSettingsStore, RunSettings, SettingsStore};
use crate::state_extractor::{AppState, StateExtractor};
use crate::tool_dispatch::dispatch_tool;
use crate::tools::executor::{ToolContext, ToolResult};
use crate::tools::integrations::{AuthRequired, IntegrationRouter};
use crate::tools::registry::{BuiltinTool, ToolKind, ToolRegistry};
use crate::tools::screenshot_image;
use crate::ui_writer::UiWriter;

/// Geometry assumed when the host cannot report one.
const FALLBACK_GEOMETRY: (u32, u32, f64) = (1920, 1080, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Extracting,
    Thinking,
    ToolDispatch,
    Done,
    Cancelled,
    Fatal,
}

/// One user request, from `run()` entry until it is persisted.
#[derive(Debug, Clone)]
pub struct Run {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub query: String,
    pub target_app: Option<String>,
    pub selected_text: Option<String>,
    pub cancelled: bool,
    pub tools_used: Vec<String>,
    pub action_log: Vec<ActionLogEntry>,
}

impl Run {
    fn new(query: &str, target_app: Option<&str>, selected_text: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            query: query.to_string(),
            target_app: target_app.map(str::to_string),
            selected_text: selected_text.map(str::to_string),
            cancelled: false,
            tools_used: Vec::new(),
            action_log: Vec::new(),
        }
    }

    fn record_tool(&mut self, call: &ToolCall) {
        if !self.tools_used.contains(&call.tool) {
            self.tools_used.push(call.tool.clone());
        }
        self.action_log.push(ActionLogEntry {
            tool: call.tool.clone(),
            args: call.args.clone(),
            timestamp: Utc::now(),
        });
    }

    fn into_record(self, response: &str) -> RunRecord {
        RunRecord {
            id: self.id,
            timestamp: self.started_at,
            query: self.query,
            target_app: self.target_app,
            response: response.to_string(),
            tools_used: self.tools_used,
            actions: self.action_log,
            cancelled: self.cancelled,
        }
    }
}

/// Everything built fresh for a run.
struct RunContext {
    provider: Arc<dyn LLMProvider>,
    token: CancellationToken,
    session: u64,
    sequencer: ActionSequencer,
    extractor: StateExtractor,
    pointer: PointerSpace,
    registry: ToolRegistry,
    policy: ApprovalPolicy,
    window: ContextWindow,
    flush_policy: MemoryFlushPolicy,
    target_app: Option<String>,
    run: Run,
}

/// Clears the `active` flag when the run ends, however it ends.
struct ActiveGuard<'a>(&'a AtomicBool);

impl<'a> ActiveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct Agent<W: UiWriter> {
    config: Config,
    providers: ProviderRegistry,
    host: Arc<dyn HostAutomation>,
    ui_writer: W,
    clock: Arc<dyn Clock>,
    memory: Arc<MemoryStore>,
    history: Arc<dyn HistoryStore>,
    settings: Arc<dyn SettingsStore>,
    integrations: Option<Arc<dyn IntegrationRouter>>,
    approval: Arc<ApprovalGate>,
    auth: Arc<AuthGate>,
    active: AtomicBool,
    session: AtomicU64,
    cancel_token: Mutex<CancellationToken>,
    state: Mutex<LoopState>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
}

pub struct AgentBuilder<W: UiWriter> {
    config: Config,
    providers: ProviderRegistry,
    host: Arc<dyn HostAutomation>,
    ui_writer: W,
    clock: Option<Arc<dyn Clock>>,
    memory: Option<Arc<MemoryStore>>,
    history: Option<Arc<dyn HistoryStore>>,
    settings: Option<Arc<dyn SettingsStore>>,
    integrations: Option<Arc<dyn IntegrationRouter>>,
}

impl<W: UiWriter> AgentBuilder<W> {
    pub fn new(
        config: Config,
        providers: ProviderRegistry,
        host: Arc<dyn HostAutomation>,
        ui_writer: W,
    ) -> Self {
        Self {
            config,
            providers,
            host,
            ui_writer,
            clock: None,
            memory: None,
            history: None,
            settings: None,
            integrations: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_memory_store(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_history_store(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn with_settings_store(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_integrations(mut self, router: Arc<dyn IntegrationRouter>) -> Self {
        self.integrations = Some(router);
        self
    }

    /// Stores not supplied are file-backed at the configured storage paths.
    pub fn build(self) -> Agent<W> {
        let storage = &self.config.storage;
        let memory = self
            .memory
            .unwrap_or_else(|| Arc::new(MemoryStore::new(storage.memory_file())));
        let history = self
            .history
            .unwrap_or_else(|| Arc::new(JsonlHistoryStore::new(storage.history_file())));
        let settings = self
            .settings
            .unwrap_or_else(|| Arc::new(FileSettingsStore::new(storage.settings_file())));

        Agent {
            config: self.config,
            providers: self.providers,
            host: self.host,
            ui_writer: self.ui_writer,
            clock: self.clock.unwrap_or_else(|| Arc::new(TokioClock)),
            memory,
            history,
            settings,
            integrations: self.integrations,
            approval: Arc::new(ApprovalGate::new()),
            auth: Arc::new(AuthGate::new()),
            active: AtomicBool::new(false),
            session: AtomicU64::new(0),
            cancel_token: Mutex::new(CancellationToken::new()),
            state: Mutex::new(LoopState::Idle),
            background_tasks: Mutex::new(Vec::new()),
        }
    }
}

impl<W: UiWriter> Agent<W> {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ui_writer(&self) -> &W {
        &self.ui_writer
    }

    pub fn state(&self) -> LoopState {
        *lock(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Gate the front end answers approval prompts through.
    pub fn approval_gate(&self) -> Arc<ApprovalGate> {
        Arc::clone(&self.approval)
    }

    pub fn auth_gate(&self) -> Arc<AuthGate> {
        Arc::clone(&self.auth)
    }

    /// Stop the active run at its next checkpoint. Pending approval and
    /// authentication prompts resolve as denied. Harmless when idle.
    pub fn cancel(&self) {
        {
            let token = lock(&self.cancel_token);
            self.session.fetch_add(1, Ordering::SeqCst);
            token.cancel();
        }
        self.approval.cancel();
        self.auth.cancel();
        if self.is_running() {
            info!("Cancellation requested");
        }
    }

    /// Wait for spawned memory flushes to finish.
    pub async fn wait_for_background_tasks(&self) {
        let tasks: Vec<JoinHandle<()>> = lock(&self.background_tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task failed: {}", e);
            }
        }
    }

    /// Handle one user request. Returns the final answer, or an empty string
    /// if the run was cancelled.
    pub async fn run(
        &self,
        query: &str,
        target_app: Option<&str>,
        selected_text: Option<&str>,
    ) -> Result<String, AgentError> {
        let _guard = ActiveGuard::acquire(&self.active).ok_or(AgentError::Busy)?;
        let (session, token) = self.begin_session();
        self.set_state(LoopState::Idle);
        info!("Run started: {}", query);

        let mut rc = match self
            .prepare_run(query, target_app, selected_text, session, token)
            .await
        {
            Ok(rc) => rc,
            Err(e) => {
                self.set_state(LoopState::Fatal);
                return Err(e);
            }
        };

        match self.drive(&mut rc).await {
            Ok(Some(answer)) => {
                self.set_state(LoopState::Done);
                self.ui_writer.print_final_response(&answer);
                self.ui_writer.flush();
                self.spawn_memory_flush(&rc.provider, rc.window.messages());
                self.persist(rc.run, &answer);
                Ok(answer)
            }
            Ok(None) => {
                self.set_state(LoopState::Cancelled);
                self.ui_writer.print_notice("Cancelled.");
                self.ui_writer.flush();
                rc.run.cancelled = true;
                self.persist(rc.run, "");
                Ok(String::new())
            }
            Err(e) => {
                warn!("Run failed: {}", e);
                self.set_state(LoopState::Fatal);
                Err(e)
            }
        }
    }

    fn begin_session(&self) -> (u64, CancellationToken) {
        let mut token = lock(&self.cancel_token);
        *token = CancellationToken::new();
        (self.session.load(Ordering::SeqCst), token.clone())
    }

    fn set_state(&self, state: LoopState) {
        debug!("Loop state: {:?}", state);
        *lock(&self.state) = state;
    }

    fn is_cancelled(&self, rc: &RunContext) -> bool {
        rc.token.is_cancelled() || self.session.load(Ordering::SeqCst) != rc.session
    }

    /// Settings, provider and per-run machinery. Fails before any state is read.
    async fn prepare_run(
        &self,
        query: &str,
        target_app: Option<&str>,
        selected_text: Option<&str>,
        session: u64,
        token: CancellationToken,
    ) -> Result<RunContext, AgentError> {
        let settings = self.settings.load().unwrap_or_else(|e| {
            warn!("Using default settings: {:#}", e);
            RunSettings::default()
        });

        let provider = self
            .providers
            .get(settings.provider.as_deref())
            .map_err(|e| AgentError::Configuration(format!("{:#}", e)))?;
        provider
            .validate_credentials()
            .map_err(|e| AgentError::Configuration(format!("{:#}", e)))?;
        debug!("Using provider {} ({})", provider.name(), provider.model());

        let cc = &self.config.computer_control;
        let action_timeout = Duration::from_millis(cc.action_timeout_ms);
        let script_timeout = Duration::from_millis(cc.script_timeout_ms);
        let screenshot_timeout = Duration::from_millis(cc.screenshot_timeout_ms);
        let limits = VisionLimits::with_max_edge(cc.max_screenshot_edge);

        let geometry = match with_timeout("screen_geometry", action_timeout, self.host.screen_geometry()).await {
            Ok(geometry) => geometry,
            Err(e) => {
                warn!("Could not read screen geometry, assuming 1920x1080: {:#}", e);
                let (w, h, scale) = FALLBACK_GEOMETRY;
                ScreenGeometry::new(w, h, scale)
            }
        };
        let pointer = PointerSpace::new(
            CoordinateMapper::new(geometry, limits),
            provider.coordinate_convention(),
        );

        let sequencer = ActionSequencer::new(
            Arc::clone(&self.host),
            Arc::clone(&self.clock),
            self.config.sequencer.clone(),
            action_timeout,
            script_timeout,
            limits,
        );
        let extractor = StateExtractor::new(
            Arc::clone(&self.host),
            self.config.extraction.clone(),
            limits,
            script_timeout,
            screenshot_timeout,
        );

        let external_tools = match self.integrations {
            Some(ref router) => router.list_tools().await.unwrap_or_else(|e| {
                warn!("Integration tools unavailable: {:#}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };
        let registry = ToolRegistry::new(
            cc.enabled,
            &settings.disabled_tools(&self.config.tools),
            external_tools,
        );
        let policy = ApprovalPolicy::new(
            &settings.auto_approved_tools(&self.config.tools),
            &self.config.tools.integration_safe,
        );

        let agent_config = &self.config.agent;
        let budget = agent_config
            .max_context_length
            .or_else(|| provider.context_window_size())
            .unwrap_or(agent_config.fallback_context_length);
        debug!("Context budget: {} tokens", budget);

        Ok(RunContext {
            provider,
            token,
            session,
            sequencer,
            extractor,
            pointer,
            registry,
            policy,
            window: ContextWindow::new(budget),
            flush_policy: MemoryFlushPolicy::new(
                agent_config.memory_flush_threshold_percent,
                agent_config.memory_flush_growth_percent,
            ),
            target_app: target_app.map(str::to_string),
            run: Run::new(query, target_app, selected_text),
        })
    }

    /// The loop proper. `Ok(None)` means the run was cancelled.
    async fn drive(&self, rc: &mut RunContext) -> Result<Option<String>, AgentError> {
        self.set_state(LoopState::Extracting);
        self.ui_writer.print_status("Reading the screen...");
        if self.is_cancelled(rc) {
            return Ok(None);
        }
        let state = rc
            .extractor
            .extract(rc.target_app.as_deref(), rc.run.selected_text.as_deref())
            .await?;
        if let Some(ref screenshot) = state.screenshot {
            rc.pointer.observe(screenshot);
        }
        if rc.target_app.is_none() {
            rc.target_app = state.app.clone();
        }

        let memories = self
            .memory
            .search(&rc.run.query, self.config.agent.memory_search_limit)
            .unwrap_or_else(|e| {
                warn!("Memory search failed: {:#}", e);
                Vec::new()
            });
        rc.window.track(Message::new(
            MessageRole::System,
            prompts::system_prompt(&memories),
        ));
        rc.window.track(Message::with_images(
            MessageRole::User,
            prompts::user_prompt(&rc.run.query, &state),
            state_images(&state),
        ));

        let max_iterations = self.config.agent.max_iterations.max(1);
        let mut last_text = String::new();

        for iteration in 1..=max_iterations {
            debug!("Iteration {}/{}", iteration, max_iterations);
            self.set_state(LoopState::Thinking);
            self.ui_writer.print_status("Thinking...");
            if self.is_cancelled(rc) {
                return Ok(None);
            }

            let Some((content, tool_calls)) = self.stream_turn(rc).await? else {
                return Ok(None);
            };
            if self.is_cancelled(rc) {
                return Ok(None);
            }

            if tool_calls.is_empty() {
                rc.window
                    .track(Message::new(MessageRole::Assistant, content.clone()));
                return Ok(Some(content.trim().to_string()));
            }
            if !content.trim().is_empty() {
                last_text = content.trim().to_string();
            }
            rc.window
                .track(Message::assistant_with_tool_calls(content, tool_calls.clone()));

            self.set_state(LoopState::ToolDispatch);
            let mut final_answer = None;
            for call in &tool_calls {
                if self.is_cancelled(rc) {
                    return Ok(None);
                }
                rc.run.record_tool(call);

                let result = self.handle_tool_call(rc, call).await;
                let summary = result.content();
                self.ui_writer
                    .print_tool_result(&call.tool, result.success, &summary);

                if call.tool == BuiltinTool::FinalAnswer.name() && result.success {
                    final_answer = Some(result.output.clone());
                }
                let evicted = rc.window.track(result.into_message(&call.id));
                if evicted > 0 {
                    self.ui_writer.print_context_status(&format!(
                        "Context {:.0}% full, dropped {} old message(s)",
                        rc.window.usage_percent(),
                        evicted
                    ));
                }
            }

            if let Some(answer) = final_answer {
                return Ok(Some(answer));
            }

            if rc.flush_policy.should_flush(&rc.window) {
                self.spawn_memory_flush(&rc.provider, rc.window.messages());
                rc.flush_policy.record_flush(&rc.window);
            }

            self.set_state(LoopState::Extracting);
            if self.is_cancelled(rc) {
                return Ok(None);
            }
            let state = rc.extractor.extract(rc.target_app.as_deref(), None).await?;
            if let Some(ref screenshot) = state.screenshot {
                rc.pointer.observe(screenshot);
            }
            rc.window.track(Message::with_images(
                MessageRole::User,
                prompts::state_update(&state),
                state_images(&state),
            ));
        }

        let notice = format!(
            "Stopped after {} steps without finishing the task.",
            max_iterations
        );
        warn!("{}", notice);
        self.ui_writer.print_notice(&notice);
        if last_text.is_empty() {
            Ok(Some(notice))
        } else {
            Ok(Some(last_text))
        }
    }

    /// One provider turn. Returns the streamed text and tool calls, or `None`
    /// if cancelled while waiting.
    async fn stream_turn(
        &self,
        rc: &RunContext,
    ) -> Result<Option<(String, Vec<ToolCall>)>, AgentError> {
        let provider = Arc::clone(&rc.provider);
        let tools = (provider.has_native_tool_calling() && !rc.registry.is_empty())
            .then(|| rc.registry.definitions());
        let request = CompletionRequest {
            messages: rc.window.messages(),
            max_tokens: Some(provider.max_tokens()),
            temperature: Some(provider.temperature()),
            stream: true,
            tools,
        };
        debug!(
            "Request has {} messages (~{} tokens)",
            request.messages.len(),
            rc.window.current_tokens()
        );

        let error_context = ErrorContext::new(
            "stream",
            provider.name(),
            provider.model(),
            &rc.run.query,
            Some(rc.run.id.clone()),
            rc.window.current_tokens(),
        );
        let retry = RetryConfig::new(self.config.agent.max_retry_attempts);
        let start = retry_with_backoff(
            "stream",
            || {
                let provider = Arc::clone(&provider);
                let request = request.clone();
                async move { provider.stream(request).await }
            },
            &error_context,
            &retry,
        );

        let mut stream = tokio::select! {
            _ = rc.token.cancelled() => return Ok(None),
            result = start => result.map_err(AgentError::Provider)?,
        };

        let mut content = String::new();
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        loop {
            let next = tokio::select! {
                _ = rc.token.cancelled() => return Ok(None),
                next = stream.next() => next,
            };
            let Some(chunk) = next else { break };

            match chunk {
                Ok(chunk) => {
                    if !chunk.content.is_empty() {
                        self.ui_writer.print_agent_response(&chunk.content);
                        content.push_str(&chunk.content);
                    }
                    if let Some(calls) = chunk.tool_calls {
                        tool_calls.extend(calls);
                    }
                    if let Some(ref name) = chunk.tool_call_streaming {
                        debug!("Receiving tool call {}", name);
                    }
                    if chunk.finished {
                        debug!("Stream finished: {:?}", chunk.stop_reason);
                        break;
                    }
                }
                Err(e) if content.is_empty() && tool_calls.is_empty() => {
                    error_context.log_error(&e);
                    return Err(AgentError::Provider(e));
                }
                Err(e) => {
                    warn!("Stream failed after a partial response: {:#}", e);
                    break;
                }
            }
        }
        self.ui_writer.flush();

        for call in tool_calls.iter_mut().filter(|c| c.id.is_empty()) {
            call.id = format!("call_{}", uuid::Uuid::new_v4().simple());
        }
        Ok(Some((content, tool_calls)))
    }

    async fn handle_tool_call(&self, rc: &mut RunContext, call: &ToolCall) -> ToolResult {
        let Some(kind) = rc.registry.lookup(&call.tool) else {
            warn!("Unknown tool: {}", call.tool);
            return ToolResult::error(format!("Unknown tool: {}", call.tool));
        };
        self.ui_writer.print_tool_header(&call.tool, Some(&call.args));

        if let ApprovalDecision::Required(category) = rc.policy.check(&call.tool, kind.is_external()) {
            match self.request_approval(rc, call, &kind).await {
                Ok(true) => rc.policy.record_approval(category),
                Ok(false) => {
                    info!("User denied {}", call.tool);
                    return ToolResult::error(format!(
                        "The user denied permission for {}. Do not retry it.",
                        call.tool
                    ));
                }
                Err(e) => return ToolResult::error(format!("Approval unavailable: {}", e)),
            }
        }

        let result = self.execute_tool(rc, call, &kind).await;
        let Some(auth) = result.auth_required.clone() else {
            return result;
        };

        // Suspend until the user connects the account, then retry once
        if !self.await_authentication(rc, auth.clone()).await {
            return ToolResult::error(format!(
                "Authentication with {} was not completed",
                auth.toolkit
            ));
        }
        let retried = self.execute_tool(rc, call, &kind).await;
        if retried.auth_required.is_some() {
            return ToolResult::error(format!(
                "{} still requires authentication with {}. Ask the user to connect it and try again later.",
                call.tool, auth.toolkit
            ));
        }
        retried
    }

    async fn execute_tool(&self, rc: &mut RunContext, call: &ToolCall, kind: &ToolKind) -> ToolResult {
        let mut pending_images: Vec<ImageContent> = Vec::new();
        let mut ctx = ToolContext {
            config: &self.config,
            ui_writer: &self.ui_writer,
            host: &self.host,
            sequencer: &rc.sequencer,
            extractor: &rc.extractor,
            pointer: &mut rc.pointer,
            memory: self.memory.as_ref(),
            integrations: self.integrations.as_deref(),
            target_app: &mut rc.target_app,
            pending_images: &mut pending_images,
        };
        dispatch_tool(call, kind, &mut ctx).await
    }

    async fn request_approval(
        &self,
        rc: &RunContext,
        call: &ToolCall,
        kind: &ToolKind,
    ) -> Result<bool, GateError> {
        if self.is_cancelled(rc) {
            return Ok(false);
        }
        let request = ApprovalRequest {
            tool_name: call.tool.clone(),
            description: describe_call(call),
            args: call.args.clone(),
            is_external_integration: kind.is_external(),
            display_name: display_name(&call.tool),
            details: call_details(call),
        };
        let pending = self.approval.open(request.clone())?;
        self.ui_writer.notify_approval_required(&request);

        Ok(tokio::select! {
            approved = pending.wait() => approved,
            _ = rc.token.cancelled() => false,
        })
    }

    async fn await_authentication(&self, rc: &RunContext, auth: AuthRequired) -> bool {
        if self.is_cancelled(rc) {
            return false;
        }
        let pending = match self.auth.open(auth.clone()) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Cannot request authentication: {}", e);
                return false;
            }
        };
        self.ui_writer.notify_auth_required(&auth);

        tokio::select! {
            completed = pending.wait() => completed,
            _ = rc.token.cancelled() => false,
        }
    }

    fn spawn_memory_flush(&self, provider: &Arc<dyn LLMProvider>, messages: Vec<Message>) {
        let flusher = MemoryFlusher::new(Arc::clone(provider), Arc::clone(&self.memory));
        let handle = tokio::spawn(async move {
            match flusher.flush(&messages).await {
                Ok(added) => debug!("Memory flush added {} fact(s)", added),
                Err(e) => warn!("Memory flush failed: {:#}", e),
            }
        });
        let mut tasks = lock(&self.background_tasks);
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);
    }

    fn persist(&self, run: Run, response: &str) {
        let record = run.into_record(response);
        if let Err(e) = self.history.append(&record) {
            warn!("Failed to save run history: {:#}", e);
        }
    }
}

fn state_images(state: &AppState) -> Vec<ImageContent> {
    state.screenshot.iter().map(screenshot_image).collect()
}

/// "type_text" -> "Type Text", "GMAIL_SEND_EMAIL" -> "Gmail Send Email".
fn display_name(tool: &str) -> String {
    tool.split('_')
        .filter(|w| !w.is_empty())
        .map(|word| {
            let lower = word.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe_call(call: &ToolCall) -> String {
    let arg = |key: &str| call.args.get(key).map(|v| v.to_string()).unwrap_or_default();
    match call.tool.as_str() {
        "click" | "right_click" | "double_click" | "mouse_move" => {
            format!("{} at ({}, {})", display_name(&call.tool), arg("x"), arg("y"))
        }
        "type_text" => "Type text into the focused field".to_string(),
        "press_key" => format!("Press {}", arg("keys")),
        "open_app" => format!("Open {}", arg("app")),
        "run_script" => "Run a script on your computer".to_string(),
        "run_actions" => {
            let count = call.args.get("actions").and_then(|a| a.as_array()).map_or(0, Vec::len);
            format!("Run {} UI action(s)", count)
        }
        "replace_text" => "Replace the selected text".to_string(),
        "insert_image" => format!("Insert image {}", arg("path")),
        other => format!("Use {}", display_name(other)),
    }
}

/// Long-form content the user should see before approving.
fn call_details(call: &ToolCall) -> Option<String> {
    let key = match call.tool.as_str() {
        "run_script" => "script",
        "type_text" | "replace_text" => "text",
        "run_actions" => {
            return call
                .args
                .get("actions")
                .and_then(|a| serde_json::to_string_pretty(a).ok());
        }
        _ => return None,
    };
    call.args.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(tool: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            tool: tool.to_string(),
            args,
        }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("type_text"), "Type Text");
        assert_eq!(display_name("GMAIL_SEND_EMAIL"), "Gmail Send Email");
        assert_eq!(display_name("wait"), "Wait");
    }

    #[test]
    fn test_describe_and_details() {
        let click = call("click", json!({"x": 10, "y": 20}));
        assert_eq!(describe_call(&click), "Click at (10, 20)");
        assert_eq!(call_details(&click), None);

        let script = call("run_script", json!({"script": "tell application \"Finder\" to quit"}));
        assert_eq!(
            call_details(&script).as_deref(),
            Some("tell application \"Finder\" to quit")
        );

        let actions = call("run_actions", json!({"actions": [{"action": "screenshot"}]}));
        assert_eq!(describe_call(&actions), "Run 1 UI action(s)");
    }

    #[test]
    fn test_active_guard_releases() {
        let flag = AtomicBool::new(false);
        {
            let _guard = ActiveGuard::acquire(&flag).unwrap();
            assert!(ActiveGuard::acquire(&flag).is_none());
        }
        assert!(ActiveGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_run_record_keeps_tool_order() {
        let mut run = Run::new("open notes", None, None);
        run.record_tool(&call("open_app", json!({"app": "Notes"})));
        run.record_tool(&call("click", json!({"x": 1, "y": 2})));
        run.record_tool(&call("click", json!({"x": 3, "y": 4})));

        let record = run.into_record("done");
        assert_eq!(record.tools_used, vec!["open_app", "click"]);
        assert_eq!(record.actions.len(), 3);
        assert_eq!(record.actions[2].args, json!({"x": 3, "y": 4}));
    }
}
