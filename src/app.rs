use crate::api::{Authenticator, RemoteStore};
use crate::board::{self, TaskBoard};
use crate::calendar;
use crate::error::Error;
use crate::filter::{FilterOptions, SortBy};
use crate::models::{Notation, NotationSummary, Task, TaskDraft};
use crate::notes;
use crate::parser::{due_at_noon, parse_due_date, parse_task_input};
use crate::reorder::reconcile;
use crate::session::{self, Session};
use crate::worker::{Outcome, Worker};
use chrono::{DateTime, Local, NaiveDate, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::widgets::ListState;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Screen {
    SignIn,
    Tasks,
    Calendar,
    Notations,
    Notation,
    Settings,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Register,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub label: &'static str,
    pub value: String,
    pub masked: bool,
    pub multiline: bool,
    pub max_chars: Option<usize>,
}

impl Field {
    pub fn new(label: &'static str) -> Self {
        Field {
            label,
            value: String::new(),
            masked: false,
            multiline: false,
            max_chars: None,
        }
    }

    fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = value.into();
        self
    }

    fn masked(mut self) -> Self {
        self.masked = true;
        self
    }

    fn multiline(mut self) -> Self {
        self.multiline = true;
        self
    }

    fn max_chars(mut self, max: usize) -> Self {
        self.max_chars = Some(max);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Form {
    pub fields: Vec<Field>,
    pub active: usize,
}

impl Form {
    pub fn new(fields: Vec<Field>) -> Self {
        Form { fields, active: 0 }
    }

    pub fn value(&self, index: usize) -> &str {
        self.fields
            .get(index)
            .map(|f| f.value.as_str())
            .unwrap_or("")
    }

    fn active_field(&mut self) -> Option<&mut Field> {
        self.fields.get_mut(self.active)
    }

    fn push(&mut self, c: char) {
        if let Some(field) = self.active_field() {
            if field.max_chars.is_some_and(|max| field.value.chars().count() >= max) {
                return;
            }
            field.value.push(c);
        }
    }

    fn pop(&mut self) {
        if let Some(field) = self.active_field() {
            field.value.pop();
        }
    }

    fn next_field(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + 1) % self.fields.len();
        }
    }

    fn previous_field(&mut self) {
        if !self.fields.is_empty() {
            self.active = (self.active + self.fields.len() - 1) % self.fields.len();
        }
    }

    fn active_is_multiline(&self) -> bool {
        self.fields.get(self.active).is_some_and(|f| f.multiline)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteTarget {
    Task(i64),
    Notation(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PasswordPurpose {
    Rename(String),
    Deactivate,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Overlay {
    None,
    Search,
    TaskForm {
        form: Form,
        editing: Option<i64>,
        submitting: bool,
    },
    Filter {
        draft: FilterOptions,
        cursor: usize,
    },
    ConfirmDelete(DeleteTarget),
    Rename(Form),
    Password {
        purpose: PasswordPurpose,
        form: Form,
    },
    NotationEditor {
        form: Form,
        saving: bool,
    },
}

pub const FILTER_ROWS: usize = 4;

enum FormKey {
    Submit,
    Cancel,
    Edited,
}

pub struct App {
    pub screen: Screen,
    pub session: Option<Session>,
    pub board: TaskBoard,
    pub task_state: ListState,
    pub query: String,
    pub filters: Option<FilterOptions>,
    pub overlay: Overlay,
    pub alert: Option<String>,
    pub auth_mode: AuthMode,
    pub auth_form: Form,
    pub calendar_date: NaiveDate,
    pub day_state: ListState,
    pub notations: Vec<NotationSummary>,
    pub notation_state: ListState,
    pub notation: Option<Notation>,
    pub in_flight: usize,
    worker: Worker,
    default_email: Option<String>,
}

fn auth_form(mode: AuthMode, email: Option<&str>) -> Form {
    let mut fields = Vec::new();
    if mode == AuthMode::Register {
        fields.push(Field::new("Name"));
    }
    fields.push(Field::new("E-mail").with_value(email.unwrap_or("")));
    fields.push(Field::new("Password").masked());
    Form::new(fields)
}

fn step(state: &mut ListState, len: usize, forward: bool) {
    if len == 0 {
        state.select(None);
        return;
    }
    let i = match state.selected() {
        Some(i) if forward => {
            if i >= len - 1 {
                0
            } else {
                i + 1
            }
        }
        Some(i) => {
            if i == 0 {
                len - 1
            } else {
                i - 1
            }
        }
        None => 0,
    };
    state.select(Some(i));
}

fn clamp_selection(state: &mut ListState, len: usize) {
    match state.selected() {
        _ if len == 0 => state.select(None),
        Some(i) if i >= len => state.select(Some(len - 1)),
        None => state.select(Some(0)),
        _ => {}
    }
}

impl App {
    pub fn new(worker: Worker, default_email: Option<String>) -> App {
        App {
            screen: Screen::SignIn,
            session: None,
            board: TaskBoard::new(),
            task_state: ListState::default(),
            query: String::new(),
            filters: None,
            overlay: Overlay::None,
            alert: None,
            auth_mode: AuthMode::Login,
            auth_form: auth_form(AuthMode::Login, default_email.as_deref()),
            calendar_date: Local::now().date_naive(),
            day_state: ListState::default(),
            notations: Vec::new(),
            notation_state: ListState::default(),
            notation: None,
            in_flight: 0,
            worker,
            default_email,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight > 0
    }

    /// The arranged view shows the board order and allows reordering; any
    /// search text or applied filter switches to the filtered view.
    pub fn is_arranged(&self) -> bool {
        self.filters.is_none() && self.query.is_empty()
    }

    pub fn task_view(&self, now: DateTime<Utc>) -> Vec<Task> {
        if self.is_arranged() {
            self.board.tasks()
        } else {
            let filters = self.filters.unwrap_or_default();
            self.board.visible(&self.query, &filters, now)
        }
    }

    pub fn day_tasks(&self) -> Vec<Task> {
        calendar::tasks_on(&self.board.tasks(), self.calendar_date, &Local)
    }

    fn selected_in(tasks: &[Task], state: &ListState) -> Option<Task> {
        state.selected().and_then(|i| tasks.get(i)).cloned()
    }

    fn show_alert(&mut self, message: impl Display) {
        let message = message.to_string();
        warn!(%message, "alert");
        self.alert = Some(message);
    }

    fn spawn<F, Fut>(&mut self, job: F)
    where
        F: FnOnce(Arc<dyn RemoteStore>, Arc<dyn Authenticator>) -> Fut,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        self.in_flight += 1;
        self.worker.spawn(job);
    }

    fn refresh_tasks(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let generation = self.board.generation();
        self.spawn(move |store, _| async move {
            let result = board::fetch_tasks(store.as_ref(), &session).await;
            Outcome::TasksLoaded { generation, result }
        });
    }

    fn refresh_notations(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        self.spawn(move |store, _| async move {
            Outcome::NotationsLoaded(notes::list_notations(store.as_ref(), &session).await)
        });
    }

    fn switch_to(&mut self, screen: Screen) {
        if screen == Screen::Tasks && self.screen != Screen::Tasks {
            self.filters = None;
            self.query.clear();
        }
        self.screen = screen;
        match screen {
            Screen::Tasks | Screen::Calendar if !self.board.is_loaded() => self.refresh_tasks(),
            Screen::Notations => self.refresh_notations(),
            _ => {}
        }
    }

    fn logout(&mut self) {
        if let Some(session) = self.session.take() {
            info!(user_id = session.user.id, "signed out");
        }
        self.board = TaskBoard::new();
        self.notations.clear();
        self.notation = None;
        self.query.clear();
        self.filters = None;
        self.overlay = Overlay::None;
        self.auth_mode = AuthMode::Login;
        self.auth_form = auth_form(AuthMode::Login, self.default_email.as_deref());
        self.screen = Screen::SignIn;
    }

    /// Folds a finished background job into the state.
    pub fn apply(&mut self, outcome: Outcome) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match outcome {
            Outcome::SignedIn(Ok(session)) => {
                self.session = Some(session);
                self.auth_form = auth_form(AuthMode::Login, self.default_email.as_deref());
                self.switch_to(Screen::Tasks);
            }
            Outcome::SignedIn(Err(err)) => self.show_alert(err),
            Outcome::TasksLoaded {
                generation,
                result: Ok(tasks),
            } => {
                if self.board.is_reordering() || generation != self.board.generation() {
                    info!(generation, "dropping task list fetched before a reorder");
                    return;
                }
                self.board.load(tasks);
                let len = self.task_view(Utc::now()).len();
                clamp_selection(&mut self.task_state, len);
            }
            Outcome::TasksLoaded {
                result: Err(err), ..
            } => {
                warn!(error = %err, "background task refresh failed");
            }
            Outcome::TaskSaved(Ok(task)) => {
                info!(task_id = task.id, "task saved");
                self.overlay = Overlay::None;
                self.refresh_tasks();
            }
            Outcome::TaskSaved(Err(err)) => {
                if let Overlay::TaskForm { submitting, .. } = &mut self.overlay {
                    *submitting = false;
                }
                self.show_alert(err);
            }
            Outcome::StatusSettled { id, result } => {
                self.board.settle(id, &result);
                if let Err(err) = result {
                    self.show_alert(err);
                }
            }
            Outcome::TaskDeleted { id, result } => match result {
                Ok(()) => {
                    self.board.remove(id);
                    self.refresh_tasks();
                }
                Err(err) => self.show_alert(err),
            },
            Outcome::Reordered { report, refreshed } => {
                self.board.finish_reorder(&report, refreshed);
                if !report.is_clean() {
                    self.show_alert(format!(
                        "{} position update(s) failed; the order may be partially saved.",
                        report.failed.len()
                    ));
                }
            }
            Outcome::NotationsLoaded(Ok(notations)) => {
                self.notations = notations;
                clamp_selection(&mut self.notation_state, self.notations.len());
            }
            Outcome::NotationsLoaded(Err(err)) => {
                warn!(error = %err, "background notation refresh failed");
            }
            Outcome::NotationOpened(Ok(notation)) => {
                self.notation = Some(notation);
                self.screen = Screen::Notation;
            }
            Outcome::NotationSaved(Ok(notation)) => {
                self.notation = Some(notation);
                if matches!(self.overlay, Overlay::NotationEditor { .. }) {
                    self.overlay = Overlay::None;
                }
            }
            Outcome::NotationSaved(Err(err)) => {
                if let Overlay::NotationEditor { saving, .. } = &mut self.overlay {
                    *saving = false;
                }
                self.show_alert(err);
            }
            Outcome::NotationOpened(Err(err)) => self.show_alert(err),
            Outcome::NotationDeleted(Ok(())) => {
                self.notation = None;
                self.switch_to(Screen::Notations);
            }
            Outcome::NotationDeleted(Err(err)) => self.show_alert(err),
            Outcome::ProfileSaved(Ok(user)) => {
                if let Some(session) = self.session.as_mut() {
                    session.user = user;
                }
                self.show_alert("Changes saved.");
            }
            Outcome::ProfileSaved(Err(err)) => self.show_alert(err),
            Outcome::Deactivated(Ok(())) => {
                self.logout();
                self.show_alert(
                    "Account deactivated. Your tasks were deleted and the account will be removed permanently.",
                );
            }
            Outcome::Deactivated(Err(err)) => self.show_alert(err),
        }
    }

    /// Returns `true` when the application should quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> bool {
        if self.alert.is_some() {
            self.alert = None;
            return false;
        }
        if self.overlay != Overlay::None {
            self.handle_overlay_key(key);
            return false;
        }
        match self.screen {
            Screen::SignIn => return self.handle_sign_in_key(key),
            _ if key.code == KeyCode::Char('q') => return true,
            _ => {}
        }
        match key.code {
            KeyCode::Char('1') => return self.enter(Screen::Tasks),
            KeyCode::Char('2') => return self.enter(Screen::Calendar),
            KeyCode::Char('3') => return self.enter(Screen::Notations),
            KeyCode::Char('4') => return self.enter(Screen::Settings),
            _ => {}
        }
        match self.screen {
            Screen::Tasks => self.handle_tasks_key(key),
            Screen::Calendar => self.handle_calendar_key(key),
            Screen::Notations => self.handle_notations_key(key),
            Screen::Notation => self.handle_notation_key(key),
            Screen::Settings => self.handle_settings_key(key),
            Screen::SignIn => {}
        }
        false
    }

    fn enter(&mut self, screen: Screen) -> bool {
        self.switch_to(screen);
        false
    }

    fn handle_sign_in_key(&mut self, key: KeyEvent) -> bool {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if key.code == KeyCode::Char('r') {
                self.auth_mode = match self.auth_mode {
                    AuthMode::Login => AuthMode::Register,
                    AuthMode::Register => AuthMode::Login,
                };
                self.auth_form = auth_form(self.auth_mode, self.default_email.as_deref());
            }
            return false;
        }
        match edit_form(&mut self.auth_form, key) {
            Some(FormKey::Cancel) => return true,
            Some(FormKey::Submit) => self.submit_auth(),
            _ => {}
        }
        false
    }

    fn submit_auth(&mut self) {
        let mode = self.auth_mode;
        let values: Vec<String> = self
            .auth_form
            .fields
            .iter()
            .map(|f| f.value.clone())
            .collect();
        self.spawn(move |store, auth| async move {
            let result = match mode {
                AuthMode::Login => {
                    session::login(auth.as_ref(), store.as_ref(), &values[0], &values[1]).await
                }
                AuthMode::Register => {
                    session::register(
                        auth.as_ref(),
                        store.as_ref(),
                        &values[0],
                        &values[1],
                        &values[2],
                    )
                    .await
                }
            };
            Outcome::SignedIn(result)
        });
    }

    fn handle_tasks_key(&mut self, key: KeyEvent) {
        let tasks = self.task_view(Utc::now());
        let selected = App::selected_in(&tasks, &self.task_state);
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => step(&mut self.task_state, tasks.len(), true),
            KeyCode::Char('k') | KeyCode::Up => step(&mut self.task_state, tasks.len(), false),
            KeyCode::Char('J') => self.move_selected(selected.as_ref(), 1),
            KeyCode::Char('K') => self.move_selected(selected.as_ref(), -1),
            KeyCode::Char('/') => self.overlay = Overlay::Search,
            KeyCode::Char('f') => {
                self.overlay = Overlay::Filter {
                    draft: self.filters.unwrap_or_default(),
                    cursor: 0,
                }
            }
            KeyCode::Char('c') => {
                self.filters = None;
                self.query.clear();
                self.task_state.select(Some(0));
            }
            KeyCode::Char('r') => self.refresh_tasks(),
            KeyCode::Char('a') => self.open_task_form(None, None),
            KeyCode::Char('e') | KeyCode::Enter => {
                if let Some(task) = selected {
                    self.open_task_form(Some(&task), None);
                }
            }
            KeyCode::Char(' ') => {
                if let Some(task) = selected {
                    self.toggle(task.id);
                }
            }
            KeyCode::Char('d') => {
                if let Some(task) = selected {
                    self.overlay = Overlay::ConfirmDelete(DeleteTarget::Task(task.id));
                }
            }
            _ => {}
        }
    }

    fn handle_calendar_key(&mut self, key: KeyEvent) {
        let tasks = self.day_tasks();
        let selected = App::selected_in(&tasks, &self.day_state);
        let mut date = self.calendar_date;
        match key.code {
            KeyCode::Char('h') | KeyCode::Left => date = date.pred_opt().unwrap_or(date),
            KeyCode::Char('l') | KeyCode::Right => date = date.succ_opt().unwrap_or(date),
            KeyCode::Char('H') => date = calendar::shift_month(date, -1),
            KeyCode::Char('L') => date = calendar::shift_month(date, 1),
            KeyCode::Char('t') => date = Local::now().date_naive(),
            KeyCode::Char('j') | KeyCode::Down => step(&mut self.day_state, tasks.len(), true),
            KeyCode::Char('k') | KeyCode::Up => step(&mut self.day_state, tasks.len(), false),
            KeyCode::Char('a') => self.open_task_form(None, Some(date)),
            KeyCode::Char('e') | KeyCode::Enter => {
                if let Some(task) = selected {
                    self.open_task_form(Some(&task), None);
                }
            }
            KeyCode::Char(' ') => {
                if let Some(task) = selected {
                    self.toggle(task.id);
                }
            }
            KeyCode::Char('d') => {
                if let Some(task) = selected {
                    self.overlay = Overlay::ConfirmDelete(DeleteTarget::Task(task.id));
                }
            }
            _ => {}
        }
        if date != self.calendar_date {
            self.calendar_date = date;
            let len = self.day_tasks().len();
            self.day_state.select(if len == 0 { None } else { Some(0) });
        }
    }

    fn handle_notations_key(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Char('j') | KeyCode::Down => {
                step(&mut self.notation_state, self.notations.len(), true)
            }
            KeyCode::Char('k') | KeyCode::Up => {
                step(&mut self.notation_state, self.notations.len(), false)
            }
            KeyCode::Char('r') => self.refresh_notations(),
            KeyCode::Char('a') => {
                let Some(session) = self.session.clone() else {
                    return;
                };
                self.spawn(move |store, _| async move {
                    Outcome::NotationOpened(notes::create_notation(store.as_ref(), &session).await)
                });
            }
            KeyCode::Enter => {
                let id = self
                    .notation_state
                    .selected()
                    .and_then(|i| self.notations.get(i))
                    .map(|n| n.id);
                if let (Some(id), Some(session)) = (id, self.session.clone()) {
                    self.spawn(move |store, _| async move {
                        Outcome::NotationOpened(
                            notes::open_notation(store.as_ref(), &session, id).await,
                        )
                    });
                }
            }
            _ => {}
        }
    }

    fn handle_notation_key(&mut self, key: KeyEvent) {
        let Some(notation) = self.notation.clone() else {
            self.switch_to(Screen::Notations);
            return;
        };
        match key.code {
            KeyCode::Esc | KeyCode::Char('b') | KeyCode::Backspace => {
                self.switch_to(Screen::Notations)
            }
            KeyCode::Char('e') | KeyCode::Enter => {
                let form = Form::new(vec![
                    Field::new("Title")
                        .with_value(notation.title.clone().unwrap_or_default())
                        .max_chars(notes::TITLE_MAX_CHARS),
                    Field::new("Text")
                        .with_value(notation.message.clone().unwrap_or_default())
                        .multiline(),
                ]);
                self.overlay = Overlay::NotationEditor {
                    form,
                    saving: false,
                };
            }
            KeyCode::Char('d') => {
                self.overlay = Overlay::ConfirmDelete(DeleteTarget::Notation(notation.id))
            }
            _ => {}
        }
    }

    fn handle_settings_key(&mut self, key: KeyEvent) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match key.code {
            KeyCode::Char('n') => {
                self.overlay = Overlay::Rename(Form::new(vec![
                    Field::new("Name").with_value(session.user.name.clone())
                ]));
            }
            KeyCode::Char('x') => {
                self.overlay = Overlay::Password {
                    purpose: PasswordPurpose::Deactivate,
                    form: Form::new(vec![Field::new("Password").masked()]),
                };
            }
            KeyCode::Char('o') => self.logout(),
            _ => {}
        }
    }

    fn open_task_form(&mut self, task: Option<&Task>, date: Option<NaiveDate>) {
        let due = task
            .and_then(|t| t.do_at)
            .map(|at| calendar::local_date(at, &Local))
            .or(date)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        let form = Form::new(vec![
            Field::new("Title").with_value(task.map(|t| t.title.clone()).unwrap_or_default()),
            Field::new("Description")
                .with_value(task.and_then(|t| t.message.clone()).unwrap_or_default()),
            Field::new("Due date").with_value(due),
        ]);
        self.overlay = Overlay::TaskForm {
            form,
            editing: task.map(|t| t.id),
            submitting: false,
        };
    }

    fn toggle(&mut self, id: i64) {
        let status = match self.board.stage_toggle(id) {
            Ok(status) => status,
            Err(err) => return self.show_alert(err),
        };
        let Some(session) = self.session.clone() else {
            return;
        };
        self.spawn(move |store, _| async move {
            let result = board::set_status(store.as_ref(), &session, id, status).await;
            Outcome::StatusSettled { id, result }
        });
    }

    fn move_selected(&mut self, selected: Option<&Task>, offset: isize) {
        if !self.is_arranged() || self.board.is_reordering() {
            return;
        }
        let Some(task) = selected else {
            return;
        };
        let Some(new_order) = self.board.moved(task.id, offset) else {
            return;
        };
        let updates = match self.board.begin_reorder(&new_order) {
            Ok(updates) => updates,
            Err(err) => return self.show_alert(err),
        };
        if let Some(index) = new_order.iter().position(|t| t.id == task.id) {
            self.task_state.select(Some(index));
        }
        if updates.is_empty() {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        self.spawn(move |store, _| async move {
            let (report, refreshed) = reconcile(store.as_ref(), &session, &updates).await;
            Outcome::Reordered { report, refreshed }
        });
    }

    fn handle_overlay_key(&mut self, key: KeyEvent) {
        let overlay = std::mem::replace(&mut self.overlay, Overlay::None);
        self.overlay = match overlay {
            Overlay::None => Overlay::None,
            Overlay::Search => match key.code {
                KeyCode::Enter | KeyCode::Esc => Overlay::None,
                KeyCode::Backspace => {
                    self.query.pop();
                    Overlay::Search
                }
                KeyCode::Char(c) => {
                    self.query.push(c);
                    self.task_state.select(Some(0));
                    Overlay::Search
                }
                _ => Overlay::Search,
            },
            Overlay::Filter { mut draft, mut cursor } => match key.code {
                KeyCode::Esc => Overlay::None,
                KeyCode::Enter => {
                    self.filters = Some(draft);
                    self.task_state.select(Some(0));
                    Overlay::None
                }
                KeyCode::Char('j') | KeyCode::Down => {
                    cursor = (cursor + 1) % FILTER_ROWS;
                    Overlay::Filter { draft, cursor }
                }
                KeyCode::Char('k') | KeyCode::Up => {
                    cursor = (cursor + FILTER_ROWS - 1) % FILTER_ROWS;
                    Overlay::Filter { draft, cursor }
                }
                KeyCode::Char('r') => Overlay::Filter {
                    draft: FilterOptions::default(),
                    cursor,
                },
                KeyCode::Char(' ') => {
                    match cursor {
                        0 => draft.show_completed = !draft.show_completed,
                        1 => draft.show_pending = !draft.show_pending,
                        2 => draft.show_overdue = !draft.show_overdue,
                        _ => {
                            let i = SortBy::ALL
                                .iter()
                                .position(|s| *s == draft.sort_by)
                                .unwrap_or(0);
                            draft.sort_by = SortBy::ALL[(i + 1) % SortBy::ALL.len()];
                        }
                    }
                    Overlay::Filter { draft, cursor }
                }
                _ => Overlay::Filter { draft, cursor },
            },
            Overlay::ConfirmDelete(target) => {
                if key.code == KeyCode::Char('y') {
                    self.confirm_delete(target);
                }
                Overlay::None
            }
            Overlay::TaskForm {
                mut form,
                editing,
                submitting,
            } => {
                if submitting {
                    Overlay::TaskForm {
                        form,
                        editing,
                        submitting,
                    }
                } else {
                    match edit_form(&mut form, key) {
                        Some(FormKey::Cancel) => Overlay::None,
                        Some(FormKey::Submit) => {
                            let submitting = self.submit_task_form(&form, editing);
                            Overlay::TaskForm {
                                form,
                                editing,
                                submitting,
                            }
                        }
                        _ => Overlay::TaskForm {
                            form,
                            editing,
                            submitting,
                        },
                    }
                }
            }
            Overlay::Rename(mut form) => match edit_form(&mut form, key) {
                Some(FormKey::Cancel) => Overlay::None,
                Some(FormKey::Submit) => {
                    let name = form.value(0).trim().to_string();
                    if name.is_empty() {
                        self.show_alert(Error::Validation("Name is required.".into()));
                        Overlay::Rename(form)
                    } else {
                        Overlay::Password {
                            purpose: PasswordPurpose::Rename(name),
                            form: Form::new(vec![Field::new("Password").masked()]),
                        }
                    }
                }
                _ => Overlay::Rename(form),
            },
            Overlay::Password { purpose, mut form } => match edit_form(&mut form, key) {
                Some(FormKey::Cancel) => Overlay::None,
                Some(FormKey::Submit) => {
                    self.submit_password(purpose, form.value(0).to_string());
                    Overlay::None
                }
                _ => Overlay::Password { purpose, form },
            },
            Overlay::NotationEditor { form, saving: true } => {
                Overlay::NotationEditor { form, saving: true }
            }
            // Ctrl-D leaves without writing anything
            Overlay::NotationEditor { .. }
                if key.modifiers.contains(KeyModifiers::CONTROL)
                    && key.code == KeyCode::Char('d') =>
            {
                info!("notation edits discarded");
                Overlay::None
            }
            Overlay::NotationEditor { mut form, saving } => match edit_form(&mut form, key) {
                // leaving the editor saves, like the back button
                Some(FormKey::Cancel) => {
                    let saving = self.save_notation(&form);
                    Overlay::NotationEditor { form, saving }
                }
                Some(FormKey::Submit) => {
                    form.next_field();
                    Overlay::NotationEditor { form, saving }
                }
                _ => Overlay::NotationEditor { form, saving },
            },
        };
    }

    /// Returns whether the request went out; on a local validation failure
    /// the form stays editable.
    fn submit_task_form(&mut self, form: &Form, editing: Option<i64>) -> bool {
        if let Err(err) = self.board.ensure_idle() {
            self.show_alert(err);
            return false;
        }
        let today = Local::now().date_naive();
        let parsed = parse_task_input(form.value(0), today);
        let due = match parse_due_date(form.value(2), today) {
            Ok(due) => due.or(parsed.due),
            Err(err) => {
                self.show_alert(err);
                return false;
            }
        };
        let draft = TaskDraft {
            title: parsed.title,
            message: Some(form.value(1).to_string()),
            do_at: due.and_then(|d| due_at_noon(d, &Local)),
        };
        let draft = match draft.validated() {
            Ok(draft) => draft,
            Err(err) => {
                self.show_alert(err);
                return false;
            }
        };
        let Some(session) = self.session.clone() else {
            return false;
        };
        self.spawn(move |store, _| async move {
            let result = match editing {
                Some(id) => board::edit_task(store.as_ref(), &session, id, draft).await,
                None => board::create_task(store.as_ref(), &session, draft).await,
            };
            Outcome::TaskSaved(result)
        });
        true
    }

    fn confirm_delete(&mut self, target: DeleteTarget) {
        let Some(session) = self.session.clone() else {
            return;
        };
        match target {
            DeleteTarget::Task(id) => {
                if let Err(err) = self.board.ensure_idle() {
                    return self.show_alert(err);
                }
                self.spawn(move |store, _| async move {
                    let result = board::delete_task(store.as_ref(), &session, id).await;
                    Outcome::TaskDeleted { id, result }
                });
            }
            DeleteTarget::Notation(id) => {
                self.spawn(move |store, _| async move {
                    Outcome::NotationDeleted(
                        notes::delete_notation(store.as_ref(), &session, id).await,
                    )
                });
            }
        }
    }

    fn submit_password(&mut self, purpose: PasswordPurpose, password: String) {
        let Some(session) = self.session.clone() else {
            return;
        };
        match purpose {
            PasswordPurpose::Rename(name) => self.spawn(move |store, auth| async move {
                Outcome::ProfileSaved(
                    session::rename(auth.as_ref(), store.as_ref(), &session, &password, &name)
                        .await,
                )
            }),
            PasswordPurpose::Deactivate => self.spawn(move |store, auth| async move {
                Outcome::Deactivated(
                    session::deactivate(auth.as_ref(), store.as_ref(), &session, &password).await,
                )
            }),
        }
    }

    fn save_notation(&mut self, form: &Form) -> bool {
        let (Some(session), Some(notation)) = (self.session.clone(), self.notation.as_ref()) else {
            return false;
        };
        let id = notation.id;
        let title = form.value(0).to_string();
        let message = form.value(1).to_string();
        self.spawn(move |store, _| async move {
            Outcome::NotationSaved(
                notes::save_notation(store.as_ref(), &session, id, &title, &message, Utc::now())
                    .await,
            )
        });
        true
    }
}

fn edit_form(form: &mut Form, key: KeyEvent) -> Option<FormKey> {
    match key.code {
        KeyCode::Esc => return Some(FormKey::Cancel),
        KeyCode::Enter if form.active_is_multiline() => form.push('\n'),
        KeyCode::Enter => return Some(FormKey::Submit),
        KeyCode::Tab => form.next_field(),
        KeyCode::BackTab => form.previous_field(),
        KeyCode::Backspace => form.pop(),
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => form.push(c),
        _ => return None,
    }
    Some(FormKey::Edited)
}
