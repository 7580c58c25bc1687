use crate::app::{App, AuthMode, DeleteTarget, Form, Overlay, PasswordPurpose, Screen};
use crate::board::TaskBoard;
use crate::calendar;
use crate::filter::{is_overdue, FilterOptions};
use crate::models::Task;
use crate::notes;
use crate::worker::Outcome;
use chrono::{Datelike, Local, Utc};
use crossterm::event::{self, Event as CEvent, KeyEventKind};
use ratatui::{
    backend::Backend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap},
    Frame, Terminal,
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn centered_rect_absolute(width: u16, height: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length((r.height.saturating_sub(height)) / 2),
                Constraint::Length(height),
                Constraint::Length((r.height.saturating_sub(height) + 1) / 2),
            ]
            .as_ref(),
        )
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints(
            [
                Constraint::Length((r.width.saturating_sub(width)) / 2),
                Constraint::Length(width),
                Constraint::Length((r.width.saturating_sub(width) + 1) / 2),
            ]
            .as_ref(),
        )
        .split(popup_layout[1])[1]
}

fn key_hint(key: &'static str, action: &'static str) -> Vec<Span<'static>> {
    vec![
        Span::styled(format!(" {} ", key), Style::default().fg(Color::Red)),
        Span::raw(format!(": {} ", action)),
    ]
}

fn get_legend(app: &App) -> Text<'static> {
    let hints: &[(&'static str, &'static str)] = match (&app.overlay, app.screen) {
        (Overlay::None, Screen::SignIn) => &[
            ("Tab", "Next Field"),
            ("Enter", "Submit"),
            ("Ctrl-R", "Login / Register"),
            ("Esc", "Quit"),
        ],
        (Overlay::None, Screen::Tasks) if app.board.is_reordering() => &[
            ("q", "Quit"),
            ("j/k", "Move"),
            ("wait", "Saving order"),
        ],
        (Overlay::None, Screen::Tasks) if app.is_arranged() => &[
            ("q", "Quit"),
            ("1-4", "Screens"),
            ("j/k", "Move"),
            ("space", "Toggle Done"),
            ("a", "Add"),
            ("e", "Edit"),
            ("d", "Delete"),
            ("J/K", "Reorder"),
            ("/", "Search"),
            ("f", "Filter"),
            ("r", "Refresh"),
        ],
        (Overlay::None, Screen::Tasks) => &[
            ("q", "Quit"),
            ("j/k", "Move"),
            ("space", "Toggle Done"),
            ("a", "Add"),
            ("e", "Edit"),
            ("d", "Delete"),
            ("/", "Search"),
            ("f", "Filter"),
            ("c", "Clear Filters"),
        ],
        (Overlay::None, Screen::Calendar) => &[
            ("q", "Quit"),
            ("h/l", "Day"),
            ("H/L", "Month"),
            ("t", "Today"),
            ("j/k", "Move"),
            ("space", "Toggle Done"),
            ("a", "Add"),
            ("e", "Edit"),
            ("d", "Delete"),
        ],
        (Overlay::None, Screen::Notations) => &[
            ("q", "Quit"),
            ("1-4", "Screens"),
            ("j/k", "Move"),
            ("Enter", "Open"),
            ("a", "New"),
            ("r", "Refresh"),
        ],
        (Overlay::None, Screen::Notation) => &[
            ("e", "Edit"),
            ("d", "Delete"),
            ("Esc", "Back"),
        ],
        (Overlay::None, Screen::Settings) => &[
            ("q", "Quit"),
            ("1-4", "Screens"),
            ("n", "Change Name"),
            ("x", "Deactivate Account"),
            ("o", "Sign Out"),
        ],
        (Overlay::Search, _) => &[("Enter", "Done"), ("Esc", "Done")],
        (Overlay::Filter { .. }, _) => &[
            ("j/k", "Move"),
            ("space", "Change"),
            ("r", "Reset"),
            ("Enter", "Apply"),
            ("Esc", "Cancel"),
        ],
        (Overlay::ConfirmDelete(_), _) => &[("y", "Delete"), ("any", "Cancel")],
        (Overlay::NotationEditor { saving: true, .. }, _) => &[("wait", "Saving")],
        (Overlay::NotationEditor { .. }, _) => &[
            ("Tab", "Next Field"),
            ("Esc", "Save and Close"),
            ("Ctrl-D", "Discard"),
        ],
        _ => &[
            ("Tab", "Next Field"),
            ("Enter", "Submit"),
            ("Esc", "Cancel"),
        ],
    };
    let spans: Vec<Span> = hints
        .iter()
        .flat_map(|&(key, action)| key_hint(key, action))
        .collect();
    Text::from(Line::from(spans))
}

fn calculate_wrapped_lines(text: &str, max_width: u16) -> usize {
    let max_width = max_width.max(1);
    let mut line_count = 0;
    for line in text.split('\n') {
        let line_width = line.chars().count() as u16;
        line_count += std::cmp::max(1, line_width.div_ceil(max_width)) as usize;
    }
    line_count
}

fn percent_of(width: u16, percent: u16) -> u16 {
    (u32::from(width) * u32::from(percent) / 100) as u16
}

fn highlight() -> Style {
    Style::default()
        .fg(Color::Green)
        .add_modifier(Modifier::BOLD)
}

fn due_label(task: &Task) -> String {
    match task.do_at {
        Some(at) => at.with_timezone(&Local).format("%d/%m/%Y").to_string(),
        None => "No due date".to_string(),
    }
}

fn task_item(task: &Task, staged: bool) -> ListItem<'static> {
    let now = Utc::now();
    let mut spans = Vec::new();
    if staged {
        spans.push(Span::styled("~ ", Style::default().fg(Color::Yellow)));
    }
    if task.status.is_completed() {
        spans.push(Span::styled("DONE ", Style::default().fg(Color::Green)));
    } else if is_overdue(task, now) {
        spans.push(Span::styled("LATE ", Style::default().fg(Color::Red)));
    }
    spans.push(Span::raw(task.title.clone()));
    if let Some(at) = task.do_at {
        spans.push(Span::styled(
            format!("  {}", at.with_timezone(&Local).format("%d/%m")),
            Style::default().fg(Color::DarkGray),
        ));
    }
    ListItem::new(Line::from(spans))
}

fn task_list<'a>(board: &TaskBoard, tasks: &[Task], title: String, empty: &'a str) -> List<'a> {
    let block = Block::default().borders(Borders::ALL).title(title);
    if tasks.is_empty() {
        return List::new(vec![ListItem::new(empty)]).block(block);
    }
    let items: Vec<ListItem> = tasks
        .iter()
        .map(|task| task_item(task, board.is_staged(task.id)))
        .collect();
    List::new(items)
        .block(block)
        .highlight_style(highlight())
        .highlight_symbol(">> ")
}

fn task_details(f: &mut Frame, task: Option<&Task>, area: Rect) {
    let detail_block = Block::default().borders(Borders::ALL).title("Task Details");
    let Some(task) = task else {
        let paragraph = Paragraph::new("No task selected")
            .block(detail_block)
            .wrap(Wrap { trim: true });
        f.render_widget(paragraph, area);
        return;
    };

    let bold = Style::default().add_modifier(Modifier::BOLD);
    let status = if task.status.is_completed() {
        "Completed"
    } else {
        "Pending"
    };
    let mut lines: Vec<Line<'static>> = vec![
        Line::from(Span::styled(task.title.clone(), bold)),
        Line::from(vec![Span::styled("Status: ", bold), Span::raw(status)]),
        Line::from(vec![Span::styled("Due Date: ", bold), Span::raw(due_label(task))]),
        Line::from(Span::styled("Description: ", bold)),
    ];
    match task.message.as_deref() {
        Some(message) if !message.trim().is_empty() => {
            lines.extend(message.lines().map(|l| Line::from(l.to_string())));
        }
        _ => lines.push(Line::from("No description")),
    }

    let paragraph = Paragraph::new(lines)
        .block(detail_block)
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn filter_summary(filters: &FilterOptions) -> String {
    let mut shown = Vec::new();
    if filters.show_pending {
        shown.push("pending");
    }
    if filters.show_completed {
        shown.push("completed");
    }
    if filters.show_overdue {
        shown.push("overdue");
    }
    format!(
        "showing {}, by {}",
        if shown.is_empty() {
            "nothing".to_string()
        } else {
            shown.join("/")
        },
        filters.sort_by.label()
    )
}

fn draw_tasks(f: &mut Frame, app: &mut App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)].as_ref())
        .split(area);

    let tasks = app.task_view(Utc::now());
    let mut title = match &app.filters {
        None if app.query.is_empty() => "Tasks".to_string(),
        None => format!("Tasks (search: {})", app.query),
        Some(filters) if app.query.is_empty() => format!("Tasks ({})", filter_summary(filters)),
        Some(filters) => format!(
            "Tasks (search: {}; {})",
            app.query,
            filter_summary(filters)
        ),
    };
    if app.board.is_reordering() {
        title.push_str(" [saving order...]");
    }

    let empty = if app.board.is_loaded() {
        "No tasks"
    } else {
        "Loading..."
    };
    let list = task_list(&app.board, &tasks, title, empty);
    f.render_stateful_widget(list, chunks[0], &mut app.task_state);

    let selected = app.task_state.selected().and_then(|i| tasks.get(i));
    task_details(f, selected, chunks[1]);
}

fn draw_calendar(f: &mut Frame, app: &mut App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(30), Constraint::Min(0)].as_ref())
        .split(area);

    let all = app.board.tasks();
    let marked = calendar::marked_dates(&all, &Local);
    let today = Local::now().date_naive();

    let mut lines = vec![
        Line::from(Span::styled(
            app.calendar_date.format("%B %Y").to_string(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            " Mo Tu We Th Fr Sa Su",
            Style::default().fg(Color::DarkGray),
        )),
    ];
    for week in calendar::month_grid(app.calendar_date) {
        let mut spans = Vec::new();
        for day in week {
            let Some(day) = day else {
                spans.push(Span::raw("   "));
                continue;
            };
            let mut style = Style::default();
            if marked.contains(&day) {
                style = style.fg(Color::Yellow);
            }
            if day == today {
                style = style.add_modifier(Modifier::UNDERLINED);
            }
            if day == app.calendar_date {
                style = style.bg(Color::Green).fg(Color::Black);
            }
            spans.push(Span::raw(" "));
            spans.push(Span::styled(format!("{:>2}", day.day()), style));
        }
        lines.push(Line::from(spans));
    }

    let month = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Calendar"));
    f.render_widget(month, chunks[0]);

    let day_tasks = app.day_tasks();
    let list = task_list(
        &app.board,
        &day_tasks,
        calendar::long_date(app.calendar_date),
        "No tasks for this day",
    );
    f.render_stateful_widget(list, chunks[1], &mut app.day_state);
}

fn draw_notations(f: &mut Frame, app: &mut App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Notations");
    if app.notations.is_empty() {
        f.render_widget(
            List::new(vec![ListItem::new("No notations yet, press a to create one")]).block(block),
            area,
        );
        return;
    }
    let items: Vec<ListItem> = app
        .notations
        .iter()
        .map(|n| ListItem::new(notes::display_title(n.title.as_deref()).to_string()))
        .collect();
    let list = List::new(items)
        .block(block)
        .highlight_style(highlight())
        .highlight_symbol(">> ");
    f.render_stateful_widget(list, area, &mut app.notation_state);
}

fn draw_notation(f: &mut Frame, app: &App, area: Rect) {
    let Some(notation) = &app.notation else {
        return;
    };
    let updated = notation
        .updated_at
        .map(|at| format!("Last updated: {}", notes::format_updated(at, &Local)))
        .unwrap_or_else(|| "Never saved".to_string());
    let mut lines = vec![
        Line::from(Span::styled(updated, Style::default().fg(Color::DarkGray))),
        Line::from(""),
    ];
    lines.extend(
        notation
            .message
            .as_deref()
            .unwrap_or("")
            .lines()
            .map(|l| Line::from(l.to_string())),
    );
    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(notes::display_title(notation.title.as_deref()).to_string()),
        )
        .wrap(Wrap { trim: false });
    f.render_widget(paragraph, area);
}

fn draw_settings(f: &mut Frame, app: &App, area: Rect) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let lines = match &app.session {
        Some(session) => vec![
            Line::from(vec![Span::styled("Name: ", bold), Span::raw(session.user.name.clone())]),
            Line::from(vec![
                Span::styled("E-mail: ", bold),
                Span::raw(session.user.email.clone()),
            ]),
        ],
        None => vec![Line::from("Not signed in")],
    };
    let paragraph = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Settings"))
        .wrap(Wrap { trim: true });
    f.render_widget(paragraph, area);
}

fn form_lines(form: &Form) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    for (i, field) in form.fields.iter().enumerate() {
        let label_style = if i == form.active {
            highlight()
        } else {
            Style::default().fg(Color::DarkGray)
        };
        let label = match field.max_chars {
            Some(max) => format!("{} ({}/{})", field.label, field.value.chars().count(), max),
            None => field.label.to_string(),
        };
        lines.push(Line::from(Span::styled(label, label_style)));
        let value = if field.masked {
            "*".repeat(field.value.chars().count())
        } else {
            field.value.clone()
        };
        let cursor = if i == form.active { "_" } else { "" };
        let mut value_lines: Vec<String> = value.split('\n').map(str::to_string).collect();
        if let Some(last) = value_lines.last_mut() {
            last.push_str(cursor);
        }
        lines.extend(value_lines.into_iter().map(Line::from));
        lines.push(Line::from(""));
    }
    lines
}

fn draw_form(f: &mut Frame, title: &str, form: &Form, area: Rect) {
    let popup_width = percent_of(area.width, 60).max(30).min(area.width);
    let inner_width = popup_width.saturating_sub(2);
    let required: usize = form
        .fields
        .iter()
        .map(|field| 2 + calculate_wrapped_lines(&field.value, inner_width))
        .sum();
    let popup_height = std::cmp::min(required as u16 + 2, area.height);
    let popup_area = centered_rect_absolute(popup_width, popup_height, area);

    let popup_block = Block::default()
        .title(title.to_string())
        .borders(Borders::ALL)
        .style(Style::default().fg(Color::Green));
    let input = Paragraph::new(form_lines(form))
        .style(Style::default().fg(Color::White))
        .block(popup_block)
        .wrap(Wrap { trim: false });

    f.render_widget(Clear, popup_area);
    f.render_widget(input, popup_area);
}

fn draw_message(f: &mut Frame, title: &str, message: &str, color: Color, area: Rect) {
    let popup_width = percent_of(area.width, 50).max(30).min(area.width);
    let lines = calculate_wrapped_lines(message, popup_width.saturating_sub(2));
    let popup_height = std::cmp::min(lines as u16 + 2, area.height);
    let popup_area = centered_rect_absolute(popup_width, popup_height, area);
    let paragraph = Paragraph::new(message.to_string())
        .block(
            Block::default()
                .title(title.to_string())
                .borders(Borders::ALL)
                .style(Style::default().fg(color)),
        )
        .wrap(Wrap { trim: true });
    f.render_widget(Clear, popup_area);
    f.render_widget(paragraph, popup_area);
}

fn draw_filter(f: &mut Frame, draft: &FilterOptions, cursor: usize, area: Rect) {
    let check = |on: bool| if on { "[x]" } else { "[ ]" };
    let rows = [
        format!("{} Show completed", check(draft.show_completed)),
        format!("{} Show pending", check(draft.show_pending)),
        format!("{} Show overdue", check(draft.show_overdue)),
        format!("Sort by: {}", draft.sort_by.label()),
    ];
    let lines: Vec<Line> = rows
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            if i == cursor {
                Line::from(Span::styled(format!(">> {}", row), highlight()))
            } else {
                Line::from(format!("   {}", row))
            }
        })
        .collect();
    let popup_area = centered_rect_absolute(34, lines.len() as u16 + 2, area);
    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .title("Filter")
            .borders(Borders::ALL)
            .style(Style::default().fg(Color::Green)),
    );
    f.render_widget(Clear, popup_area);
    f.render_widget(paragraph, popup_area);
}

fn draw_overlay(f: &mut Frame, app: &App, area: Rect) {
    match &app.overlay {
        Overlay::None => {}
        Overlay::Search => {
            let popup_area = centered_rect_absolute(area.width.min(50), 3, area);
            let input = Paragraph::new(format!("{}_", app.query)).block(
                Block::default()
                    .title("Search")
                    .borders(Borders::ALL)
                    .style(Style::default().fg(Color::Green)),
            );
            f.render_widget(Clear, popup_area);
            f.render_widget(input, popup_area);
        }
        Overlay::Filter { draft, cursor } => draw_filter(f, draft, *cursor, area),
        Overlay::TaskForm {
            form,
            editing,
            submitting,
        } => {
            let title = match (editing, submitting) {
                (_, true) => "Saving...",
                (Some(_), false) => "Edit Task",
                (None, false) => "New Task (@date in the title sets the due date)",
            };
            draw_form(f, title, form, area);
        }
        Overlay::ConfirmDelete(target) => {
            let message = match target {
                DeleteTarget::Task(_) => "Delete this task? (y/n)",
                DeleteTarget::Notation(_) => "Delete this notation? (y/n)",
            };
            draw_message(f, "Confirm", message, Color::Yellow, area);
        }
        Overlay::Rename(form) => draw_form(f, "Change Name", form, area),
        Overlay::Password { purpose, form } => {
            let title = match purpose {
                PasswordPurpose::Rename(_) => "Confirm your password to save",
                PasswordPurpose::Deactivate => "Confirm your password to deactivate",
            };
            draw_form(f, title, form, area);
        }
        Overlay::NotationEditor { form, saving } => {
            let title = if *saving { "Saving..." } else { "Edit Notation" };
            draw_form(f, title, form, area);
        }
    }
}

fn draw_sign_in(f: &mut Frame, app: &App, area: Rect) {
    let title = match app.auth_mode {
        AuthMode::Login => "Sign In",
        AuthMode::Register => "Create Account",
    };
    draw_form(f, title, &app.auth_form, area);
}

fn draw_tabs(f: &mut Frame, app: &App, area: Rect) {
    let tabs = [
        ("1", "Tasks", Screen::Tasks),
        ("2", "Calendar", Screen::Calendar),
        ("3", "Notations", Screen::Notations),
        ("4", "Settings", Screen::Settings),
    ];
    let mut spans = Vec::new();
    for (key, label, screen) in tabs {
        let active = app.screen == screen
            || (screen == Screen::Notations && app.screen == Screen::Notation);
        let style = if active {
            highlight()
        } else {
            Style::default().fg(Color::DarkGray)
        };
        spans.push(Span::styled(format!(" {} {} ", key, label), style));
    }
    if app.is_busy() {
        spans.push(Span::styled(" working...", Style::default().fg(Color::Yellow)));
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}

pub fn draw(f: &mut Frame, app: &mut App) {
    let size = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(0)
        .constraints([Constraint::Length(1), Constraint::Min(0), Constraint::Length(2)].as_ref())
        .split(size);
    let (tabs_chunk, body_chunk, footer_chunk) = (chunks[0], chunks[1], chunks[2]);

    match app.screen {
        Screen::SignIn => draw_sign_in(f, app, body_chunk),
        Screen::Tasks => draw_tasks(f, app, body_chunk),
        Screen::Calendar => draw_calendar(f, app, body_chunk),
        Screen::Notations => draw_notations(f, app, body_chunk),
        Screen::Notation => draw_notation(f, app, body_chunk),
        Screen::Settings => draw_settings(f, app, body_chunk),
    }
    if app.screen != Screen::SignIn {
        draw_tabs(f, app, tabs_chunk);
    }
    draw_overlay(f, app, body_chunk);

    if let Some(alert) = &app.alert {
        draw_message(f, "Notice (any key)", alert, Color::Red, body_chunk);
    }

    let legend = Paragraph::new(get_legend(app))
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Left)
        .wrap(Wrap { trim: true });
    f.render_widget(legend, footer_chunk);
}

pub async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    mut app: App,
    mut outcomes: UnboundedReceiver<Outcome>,
) -> io::Result<()> {
    loop {
        while let Ok(outcome) = outcomes.try_recv() {
            app.apply(outcome);
        }

        terminal.draw(|f| draw(f, &mut app))?;

        // Handle input
        if event::poll(Duration::from_millis(100))? {
            if let CEvent::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press && app.handle_key(key) {
                    return Ok(());
                }
            }
        }
        tokio::task::yield_now().await;
    }
}
