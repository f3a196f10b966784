use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use taskdeck_shared::{Credentials, Priority, Registration, Task, TaskDraft, TaskPatch};
use tracing::{debug, instrument};

use crate::confirm::{DeleteConfirmation, DeleteOutcome};
use crate::datetime::parse_due_input;
use crate::navigation::BrowserHistory;
use crate::render::Renderer;
use crate::reset::{ResetPasswordFlow, TokenValidity};
use crate::routes::{DASHBOARD_PATH, RouteDecision, RouteGuard, reset_token};
use crate::session::SessionManager;
use crate::tasks::{PriorityFilter, StatusFilter, TaskController, TaskFilter};
use crate::theme::{Theme, ThemeController};
use crate::transport::{LOGIN_PATH, NavigateMode, Navigator};
use crate::validate::{validate_forgot_password, validate_login, validate_registration, FieldErrors};

const HELP: &str = "\
session
  login <email> <password>           sign in
  register <username> <email> <pw>   create an account and sign in
  logout                             sign out
  whoami                             show the signed-in user
  forgot <email>                     request a password reset link
  open <path>                        go to a page, e.g. /reset-password/<token>
  reset <password> <confirm>         set a new password on the reset page
  back                               previous page
tasks
  ls | tasks                         show tasks matching the filters
  refresh                            reload tasks from the server
  show <ref>                         task details
  add <title..> --due <date> [--priority p] [--desc text]
  edit <ref> [--title t] [--desc d] [--due date] [--priority p]
  toggle <ref> | done <ref> | undo <ref>
  delete <ref>, then confirm | cancel
filters
  search [term..] | status <all|pending|completed> | priority <all|low|medium|high>
  filters | clear-filters
other
  theme [light|dark|toggle] | help | quit

<ref> is a row number from the last listing, a task id or a unique id prefix.
Dates: YYYY-MM-DD, today, tomorrow, a weekday or +3d.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Line-oriented front end over the session and task controllers. It plays
/// the browser: it owns the history stack and reacts to forced reloads.
pub struct Shell {
    session: Arc<SessionManager>,
    tasks: Arc<TaskController>,
    theme: ThemeController,
    history: Arc<BrowserHistory>,
    renderer: Renderer,
    confirm: DeleteConfirmation,
    filter: TaskFilter,
    reset: Option<ResetPasswordFlow>,
    seen_reloads: usize,
    clock: fn() -> DateTime<Utc>,
}

impl Shell {
    pub fn new(
        session: Arc<SessionManager>,
        tasks: Arc<TaskController>,
        theme: ThemeController,
        history: Arc<BrowserHistory>,
        renderer: Renderer,
    ) -> Self {
        let seen_reloads = history.reloads();
        Self {
            session,
            tasks,
            theme,
            history,
            renderer,
            confirm: DeleteConfirmation::new(),
            filter: TaskFilter::default(),
            reset: None,
            seen_reloads,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn filter(&self) -> &TaskFilter {
        &self.filter
    }

    pub fn confirmation(&self) -> &DeleteConfirmation {
        &self.confirm
    }

    pub fn prompt(&self) -> String {
        format!("taskdeck {}> ", self.history.current_path())
    }

    /// Routes the starting location once the session has been restored.
    pub async fn start<W: Write>(&mut self, out: &mut W) -> anyhow::Result<()> {
        self.session.wait_restored().await;
        let start = self.history.current_path();
        self.open(&start, out).await
    }

    #[instrument(skip_all)]
    pub async fn execute<W: Write>(&mut self, line: &str, out: &mut W) -> anyhow::Result<Flow> {
        let words = match split_words(line) {
            Ok(words) => words,
            Err(message) => {
                self.renderer.write_error(out, &message)?;
                return Ok(Flow::Continue);
            }
        };
        let Some((command, args)) = words.split_first() else {
            return Ok(Flow::Continue);
        };
        debug!(command = %command, argc = args.len(), "dispatching");

        match command.as_str() {
            "help" | "?" => writeln!(out, "{HELP}")?,
            "quit" | "exit" => return Ok(Flow::Quit),
            "whoami" => self.renderer.write_user(out, self.session.user().as_ref())?,
            "login" => self.login(args, out).await?,
            "register" => self.register(args, out).await?,
            "logout" => self.logout(out).await?,
            "forgot" => self.forgot(args, out).await?,
            "reset" => self.submit_reset(args, out).await?,
            "open" => match args {
                [path] => self.open(path, out).await?,
                _ => self.usage(out, "open <path>")?,
            },
            "back" => {
                let path = self.history.back();
                self.open(&path, out).await?;
            }
            "theme" => self.theme(args, out)?,
            "ls" | "tasks" => {
                if self.dashboard(out).await? {
                    self.list(out)?;
                }
            }
            "refresh" => {
                if self.dashboard(out).await? {
                    self.refresh(out).await?;
                }
            }
            "show" => {
                if self.dashboard(out).await?
                    && let Some(task) = self.resolve_single(args, "show <ref>", out)?
                {
                    self.renderer.write_task_detail(out, &task, (self.clock)())?;
                }
            }
            "search" => {
                if self.dashboard(out).await? {
                    self.filter.search_term = args.join(" ");
                    self.list(out)?;
                }
            }
            "status" => {
                if self.dashboard(out).await? {
                    match args.first().map(|raw| raw.parse::<StatusFilter>()) {
                        Some(Ok(status)) => {
                            self.filter.status = status;
                            self.list(out)?;
                        }
                        Some(Err(message)) => self.renderer.write_error(out, &message)?,
                        None => self.usage(out, "status <all|pending|completed>")?,
                    }
                }
            }
            "priority" => {
                if self.dashboard(out).await? {
                    match args.first().map(|raw| raw.parse::<PriorityFilter>()) {
                        Some(Ok(priority)) => {
                            self.filter.priority = priority;
                            self.list(out)?;
                        }
                        Some(Err(message)) => self.renderer.write_error(out, &message)?,
                        None => self.usage(out, "priority <all|low|medium|high>")?,
                    }
                }
            }
            "filters" => self.renderer.write_filters(out, &self.filter)?,
            "clear-filters" => {
                self.filter = TaskFilter::default();
                self.renderer.write_filters(out, &self.filter)?;
            }
            "add" => {
                if self.dashboard(out).await? {
                    self.add(args, out).await?;
                }
            }
            "edit" => {
                if self.dashboard(out).await? {
                    self.edit(args, out).await?;
                }
            }
            "toggle" => {
                if self.dashboard(out).await?
                    && let Some(task) = self.resolve_single(args, "toggle <ref>", out)?
                {
                    let outcome = self.tasks.toggle_complete(&task.id).await;
                    self.report_task(outcome, out)?;
                }
            }
            "done" | "undo" => {
                let completed = command == "done";
                if self.dashboard(out).await?
                    && let Some(task) = self.resolve_single(args, "done|undo <ref>", out)?
                {
                    let outcome = self.tasks.set_completed(&task.id, completed).await;
                    self.report_task(outcome, out)?;
                }
            }
            "delete" | "rm" => {
                if self.dashboard(out).await?
                    && let Some(task) = self.resolve_single(args, "delete <ref>", out)?
                {
                    match self.confirm.request(task) {
                        Ok(()) => {
                            if let Some(prompt) = self.confirm.prompt() {
                                self.renderer.write_prompt(out, &prompt)?;
                            }
                        }
                        Err(err) => self.renderer.write_error(out, &err.to_string())?,
                    }
                }
            }
            "confirm" => match self.confirm.confirm(&self.tasks).await {
                Ok(DeleteOutcome::Deleted(task)) => {
                    self.renderer
                        .write_success(out, &format!("Deleted \"{}\".", task.title))?;
                }
                Ok(DeleteOutcome::Failed(message)) => self.renderer.write_error(out, &message)?,
                Err(err) => self.renderer.write_error(out, &err.to_string())?,
            },
            "cancel" => match self.confirm.cancel() {
                Ok(()) => writeln!(out, "Nothing was deleted.")?,
                Err(err) => self.renderer.write_error(out, &err.to_string())?,
            },
            other => self
                .renderer
                .write_error(out, &format!("unknown command `{other}`; try `help`"))?,
        }

        self.settle_reload(out)?;
        Ok(Flow::Continue)
    }

    /// A 401 outside the exempt pages forces a reload onto the login page.
    /// A reload discards everything held in memory for the old session.
    fn settle_reload<W: Write>(&mut self, out: &mut W) -> anyhow::Result<()> {
        let reloads = self.history.reloads();
        if reloads == self.seen_reloads {
            return Ok(());
        }
        self.seen_reloads = reloads;

        self.session.discard();
        self.tasks.reset();
        let _ = self.confirm.cancel();
        self.filter = TaskFilter::default();
        self.reset = None;
        self.renderer
            .write_error(out, "Your session has expired. Please log in again.")?;
        Ok(())
    }

    async fn open<W: Write>(&mut self, path: &str, out: &mut W) -> anyhow::Result<()> {
        if self.session.is_loading() {
            self.session.wait_restored().await;
        }

        let target = match RouteGuard::decide(path, &self.session) {
            RouteDecision::Render => {
                if self.history.current_path() != path {
                    self.history.navigate(path, NavigateMode::Push);
                }
                path.to_string()
            }
            RouteDecision::Redirect(to) => {
                self.history.navigate(&to, NavigateMode::Replace);
                to
            }
            RouteDecision::NotFound => {
                self.renderer.write_error(out, &format!("404: no page at {path}"))?;
                return Ok(());
            }
            RouteDecision::Pending => {
                writeln!(out, "Loading...")?;
                return Ok(());
            }
        };

        self.enter(&target, out).await
    }

    async fn enter<W: Write>(&mut self, path: &str, out: &mut W) -> anyhow::Result<()> {
        if path == DASHBOARD_PATH {
            return self.refresh(out).await;
        }

        if let Some(token) = reset_token(path) {
            let mut flow = ResetPasswordFlow::new(token);
            match flow.verify(&self.session).await {
                TokenValidity::Valid => writeln!(out, "Choose a new password with `reset <password> <confirm>`.")?,
                TokenValidity::Invalid(message) => self.renderer.write_error(out, message)?,
                TokenValidity::Unknown => {}
            }
            self.reset = Some(flow);
            return Ok(());
        }

        match path {
            LOGIN_PATH => writeln!(out, "Sign in with `login <email> <password>`.")?,
            "/register" => writeln!(out, "Create an account with `register <username> <email> <password>`.")?,
            "/forgot-password" => writeln!(out, "Request a reset link with `forgot <email>`.")?,
            _ => {}
        }
        Ok(())
    }

    /// Enters the dashboard, or explains why not. Returns whether task
    /// commands may proceed.
    async fn dashboard<W: Write>(&mut self, out: &mut W) -> anyhow::Result<bool> {
        if self.session.is_loading() {
            self.session.wait_restored().await;
        }
        match RouteGuard::decide(DASHBOARD_PATH, &self.session) {
            RouteDecision::Render => {
                if self.history.current_path() != DASHBOARD_PATH {
                    self.history.navigate(DASHBOARD_PATH, NavigateMode::Push);
                    if let Err(err) = self.tasks.list().await {
                        self.renderer.write_error(out, &err.message)?;
                    }
                }
                Ok(true)
            }
            RouteDecision::Redirect(to) => {
                self.history.navigate(&to, NavigateMode::Replace);
                self.renderer.write_error(out, "Please log in first.")?;
                Ok(false)
            }
            RouteDecision::Pending | RouteDecision::NotFound => Ok(false),
        }
    }

    fn visit_public(&self, path: &str) {
        if self.history.current_path() != path {
            self.history.navigate(path, NavigateMode::Push);
        }
    }

    async fn login<W: Write>(&mut self, args: &[String], out: &mut W) -> anyhow::Result<()> {
        let [email, password] = args else {
            return self.usage(out, "login <email> <password>");
        };
        if let Some(user) = self.session.user() {
            self.renderer
                .write_error(out, &format!("Already signed in as {}.", user.username))?;
            return Ok(());
        }
        if self.field_errors(validate_login(email, password), out)? {
            return Ok(());
        }

        self.visit_public(LOGIN_PATH);
        let credentials = Credentials {
            email: email.trim().to_string(),
            password: password.clone(),
        };
        match self.session.login(&credentials).await {
            Ok(outcome) => {
                self.renderer
                    .write_success(out, &format!("Welcome back, {}!", outcome.user.username))?;
                self.open(DASHBOARD_PATH, out).await?;
            }
            Err(err) => self.renderer.write_error(out, &err.user_message("Login failed"))?,
        }
        Ok(())
    }

    async fn register<W: Write>(&mut self, args: &[String], out: &mut W) -> anyhow::Result<()> {
        let [username, email, password] = args else {
            return self.usage(out, "register <username> <email> <password>");
        };
        if let Some(user) = self.session.user() {
            self.renderer
                .write_error(out, &format!("Already signed in as {}.", user.username))?;
            return Ok(());
        }
        if self.field_errors(validate_registration(username, email, password), out)? {
            return Ok(());
        }

        self.visit_public("/register");
        let registration = Registration {
            username: username.trim().to_string(),
            email: email.trim().to_string(),
            password: password.clone(),
        };
        match self.session.register(&registration).await {
            Ok(outcome) => {
                self.renderer
                    .write_success(out, &format!("Welcome, {}!", outcome.user.username))?;
                self.open(DASHBOARD_PATH, out).await?;
            }
            Err(err) => self
                .renderer
                .write_error(out, &err.user_message("Registration failed"))?,
        }
        Ok(())
    }

    async fn logout<W: Write>(&mut self, out: &mut W) -> anyhow::Result<()> {
        if !self.session.is_authenticated() {
            self.renderer.write_error(out, "Not signed in.")?;
            return Ok(());
        }

        let server_ok = self.session.logout().await;
        self.tasks.reset();
        let _ = self.confirm.cancel();
        self.filter = TaskFilter::default();
        if server_ok {
            writeln!(out, "Signed out.")?;
        } else {
            self.renderer
                .write_error(out, "Signed out locally; the server did not confirm.")?;
        }
        Ok(())
    }

    async fn forgot<W: Write>(&mut self, args: &[String], out: &mut W) -> anyhow::Result<()> {
        let [email] = args else {
            return self.usage(out, "forgot <email>");
        };
        if self.field_errors(validate_forgot_password(email), out)? {
            return Ok(());
        }

        self.visit_public("/forgot-password");
        let result = self.session.forgot_password(email.trim()).await;
        if result.success {
            let message = if result.message.is_empty() {
                "Check your inbox for a reset link."
            } else {
                result.message.as_str()
            };
            self.renderer.write_success(out, message)?;
        } else {
            self.renderer.write_error(out, &result.message)?;
        }
        Ok(())
    }

    async fn submit_reset<W: Write>(&mut self, args: &[String], out: &mut W) -> anyhow::Result<()> {
        let [password, confirm] = args else {
            return self.usage(out, "reset <password> <confirm>");
        };
        let Some(flow) = self.reset.as_ref() else {
            self.renderer
                .write_error(out, "Open your reset link first: open /reset-password/<token>")?;
            return Ok(());
        };

        let result = flow.submit(&self.session, password, confirm).await;
        if !result.success {
            self.renderer.write_error(out, &result.message)?;
            return Ok(());
        }

        self.reset = None;
        let message = if result.message.is_empty() {
            "Password reset successful."
        } else {
            result.message.as_str()
        };
        self.renderer.write_success(out, message)?;
        self.open(LOGIN_PATH, out).await
    }

    fn theme<W: Write>(&mut self, args: &[String], out: &mut W) -> anyhow::Result<()> {
        let palette = self.renderer.palette();
        let theme = match args.first().map(String::as_str) {
            None => self.theme.current(),
            Some("toggle") => self.theme.toggle(palette),
            Some(raw) => match Theme::from_storage(raw) {
                Some(theme) => {
                    self.theme.set(theme, palette);
                    theme
                }
                None => return self.usage(out, "theme [light|dark|toggle]"),
            },
        };
        writeln!(out, "theme: {theme}")?;
        Ok(())
    }

    fn list<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        let view = self.tasks.view(&self.filter);
        self.renderer.write_task_table(out, &view, (self.clock)())?;
        if !self.filter.is_default() {
            writeln!(out, "{} of {} tasks shown", view.len(), self.tasks.len())?;
        }
        Ok(())
    }

    async fn refresh<W: Write>(&self, out: &mut W) -> anyhow::Result<()> {
        match self.tasks.list().await {
            Ok(_) => self.list(out),
            Err(err) => self.renderer.write_error(out, &err.message),
        }
    }

    async fn add<W: Write>(&mut self, args: &[String], out: &mut W) -> anyhow::Result<()> {
        let (words, options) = match parse_options(args, &["due", "priority", "desc"]) {
            Ok(parsed) => parsed,
            Err(message) => return self.renderer.write_error(out, &message),
        };

        let mut draft = TaskDraft {
            title: words.join(" "),
            ..TaskDraft::default()
        };
        if let Some(raw) = options.get("due") {
            match parse_due_input(raw, (self.clock)(), self.renderer.timezone()) {
                Ok(due) => draft.due_date = Some(due),
                Err(err) => return self.renderer.write_error(out, &err.to_string()),
            }
        }
        if let Some(raw) = options.get("priority") {
            match raw.parse::<Priority>() {
                Ok(priority) => draft.priority = Some(priority),
                Err(message) => return self.renderer.write_error(out, &message),
            }
        }
        draft.description = options.get("desc").cloned();

        match self.tasks.create(&draft).await {
            Ok(task) => {
                self.renderer
                    .write_success(out, &format!("Created \"{}\".", task.title))?;
                if let Some(message) = self.tasks.last_error() {
                    self.renderer.write_error(out, &message)?;
                }
                self.list(out)
            }
            Err(err) => self.renderer.write_error(out, &err.message),
        }
    }

    async fn edit<W: Write>(&mut self, args: &[String], out: &mut W) -> anyhow::Result<()> {
        let (words, options) = match parse_options(args, &["title", "desc", "due", "priority"]) {
            Ok(parsed) => parsed,
            Err(message) => return self.renderer.write_error(out, &message),
        };
        let Some(task) = self.resolve_single(&words, "edit <ref> [--title t] [--desc d] [--due date] [--priority p]", out)?
        else {
            return Ok(());
        };

        let mut patch = TaskPatch {
            title: options.get("title").cloned(),
            description: options
                .get("desc")
                .map(|desc| Some(desc.clone()).filter(|d| !d.trim().is_empty())),
            ..TaskPatch::default()
        };
        if let Some(raw) = options.get("due") {
            match parse_due_input(raw, (self.clock)(), self.renderer.timezone()) {
                Ok(due) => patch.due_date = Some(due),
                Err(err) => return self.renderer.write_error(out, &err.to_string()),
            }
        }
        if let Some(raw) = options.get("priority") {
            match raw.parse::<Priority>() {
                Ok(priority) => patch.priority = Some(priority),
                Err(message) => return self.renderer.write_error(out, &message),
            }
        }
        if patch.is_empty() {
            return self.renderer.write_error(out, "Nothing to change.");
        }
        if patch.title.as_deref().is_some_and(|title| title.trim().is_empty()) {
            return self.renderer.write_error(out, "Title is required");
        }

        let outcome = self.tasks.update(&task.id, &patch).await;
        self.report_task(outcome, out)
    }

    fn report_task<W: Write>(
        &self,
        outcome: Result<Task, crate::tasks::SyncError>,
        out: &mut W,
    ) -> anyhow::Result<()> {
        match outcome {
            Ok(task) => {
                self.renderer.write_success(
                    out,
                    &format!("\"{}\" is now {}.", task.title, task.status_label().to_lowercase()),
                )?;
                self.list(out)
            }
            Err(err) => self.renderer.write_error(out, &err.message),
        }
    }

    fn resolve_single<W: Write>(
        &self,
        args: &[String],
        usage: &str,
        out: &mut W,
    ) -> anyhow::Result<Option<Task>> {
        let [reference] = args else {
            self.usage(out, usage)?;
            return Ok(None);
        };
        match resolve_task(&self.tasks.view(&self.filter), &self.tasks.tasks(), reference) {
            Ok(task) => Ok(Some(task)),
            Err(message) => {
                self.renderer.write_error(out, &message)?;
                Ok(None)
            }
        }
    }

    fn field_errors<W: Write>(&self, errors: FieldErrors, out: &mut W) -> anyhow::Result<bool> {
        for (field, message) in &errors {
            self.renderer.write_error(out, &format!("{field}: {message}"))?;
        }
        Ok(!errors.is_empty())
    }

    fn usage<W: Write>(&self, out: &mut W, usage: &str) -> anyhow::Result<()> {
        self.renderer.write_error(out, &format!("usage: {usage}"))
    }
}

/// Row number in the current view, exact id, or unique id prefix, in that
/// order.
pub fn resolve_task(view: &[Task], all: &[Task], reference: &str) -> Result<Task, String> {
    let reference = reference.trim();
    if let Ok(row) = reference.parse::<usize>()
        && row >= 1
        && let Some(task) = view.get(row - 1)
    {
        return Ok(task.clone());
    }

    if let Some(task) = all.iter().find(|task| task.id == reference) {
        return Ok(task.clone());
    }

    let mut matches = all.iter().filter(|task| task.id.starts_with(reference));
    match (matches.next(), matches.next()) {
        (Some(task), None) if !reference.is_empty() => Ok(task.clone()),
        (Some(_), Some(_)) => Err(format!("`{reference}` matches more than one task")),
        _ => Err(format!("no task matches `{reference}`")),
    }
}

/// Splits `--name value` pairs off the positional words.
fn parse_options(
    args: &[String],
    allowed: &[&str],
) -> Result<(Vec<String>, BTreeMap<String, String>), String> {
    let mut words = Vec::new();
    let mut options = BTreeMap::new();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let Some(name) = arg.strip_prefix("--") else {
            words.push(arg.clone());
            continue;
        };
        if !allowed.contains(&name) {
            return Err(format!("unknown option --{name}"));
        }
        let value = iter
            .next()
            .ok_or_else(|| format!("--{name} needs a value"))?;
        options.insert(name.to_string(), value.clone());
    }

    Ok((words, options))
}

/// Whitespace splitting with single and double quotes and backslash escapes.
pub fn split_words(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some('"') | None, '\\') => {
                let escaped = chars.next().ok_or("trailing backslash")?;
                current.push(escaped);
                in_word = true;
            }
            (Some(_), c) => current.push(c),
            (None, '"' | '\'') => {
                quote = Some(ch);
                in_word = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}
