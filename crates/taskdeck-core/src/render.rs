use std::io::Write;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use parking_lot::Mutex;
use taskdeck_shared::{Priority, Task, User};
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::confirm::ConfirmPrompt;
use crate::tasks::{DueLabel, TaskFilter, is_overdue_styled};
use crate::theme::{Theme, ThemeSurface};

/// Terminal palette driven by the theme preference.
#[derive(Debug)]
pub struct TerminalTheme {
    current: Mutex<Option<Theme>>,
}

impl Default for TerminalTheme {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalTheme {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }

    /// `None` until a theme has been applied.
    pub fn current(&self) -> Option<Theme> {
        *self.current.lock()
    }

    fn accent(&self) -> &'static str {
        match self.current() {
            Some(Theme::Dark) => "96",
            _ => "34",
        }
    }

    fn muted(&self) -> &'static str {
        match self.current() {
            Some(Theme::Dark) => "37",
            _ => "90",
        }
    }
}

impl ThemeSurface for TerminalTheme {
    fn apply_theme(&self, theme: Theme) {
        *self.current.lock() = Some(theme);
    }
}

/// Stand-in for the system colour-scheme query. `COLORFGBG` is `fg;bg` as
/// exported by most terminals.
pub fn terminal_prefers_dark() -> bool {
    std::env::var("COLORFGBG")
        .ok()
        .is_some_and(|raw| background_is_dark(&raw))
}

fn background_is_dark(raw: &str) -> bool {
    raw.rsplit(';')
        .next()
        .and_then(|bg| bg.trim().parse::<u8>().ok())
        .is_some_and(|bg| bg < 7 || bg == 8)
}

#[derive(Debug)]
pub struct Renderer {
    color: bool,
    tz: Tz,
    palette: TerminalTheme,
}

impl Renderer {
    pub fn new(cfg: &Config, color_capable: bool) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && color_capable,
            tz: cfg.display_timezone()?,
            palette: TerminalTheme::new(),
        })
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn palette(&self) -> &TerminalTheme {
        &self.palette
    }

    /// Row numbers are 1-based positions in `tasks`, which is how the shell
    /// addresses tasks.
    #[tracing::instrument(skip(self, out, tasks, now))]
    pub fn write_task_table<W: Write>(
        &self,
        out: &mut W,
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if tasks.is_empty() {
            writeln!(out, "{}", self.paint("No tasks found.", self.palette.muted()))?;
            return Ok(());
        }

        let headers = ["#", "Title", "Status", "Priority", "Due"]
            .into_iter()
            .map(|h| self.paint(h, self.palette.accent()))
            .collect();

        let mut rows = Vec::with_capacity(tasks.len());
        for (idx, task) in tasks.iter().enumerate() {
            let number = self.paint(&(idx + 1).to_string(), "33");

            let title = if task.completed {
                self.paint(&task.title, self.palette.muted())
            } else {
                task.title.clone()
            };

            let status = if task.completed {
                self.paint(task.status_label(), "32")
            } else {
                task.status_label().to_string()
            };

            let priority = self.paint(task.priority.label(), priority_code(task.priority));

            let due_text = DueLabel::for_task(task, now, self.tz).to_string();
            let due = if is_overdue_styled(task, now) {
                self.paint(&due_text, "31")
            } else {
                due_text
            };

            rows.push(vec![number, title, status, priority, due]);
        }

        write_table(out, headers, rows)
    }

    pub fn write_task_detail<W: Write>(
        &self,
        out: &mut W,
        task: &Task,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(
            out,
            "description {}",
            task.description.as_deref().unwrap_or("")
        )?;
        writeln!(out, "status      {}", task.status_label())?;
        writeln!(out, "priority    {}", task.priority.label())?;
        writeln!(out, "due         {}", DueLabel::for_task(task, now, self.tz))?;
        if let Some(done) = task.completed_at {
            writeln!(
                out,
                "completed   {}",
                done.with_timezone(&self.tz).format("%b %-d, %Y %H:%M")
            )?;
        }
        Ok(())
    }

    pub fn write_filters<W: Write>(&self, out: &mut W, filter: &TaskFilter) -> anyhow::Result<()> {
        let search = if filter.search_term.is_empty() {
            "-".to_string()
        } else {
            format!("\"{}\"", filter.search_term)
        };
        writeln!(
            out,
            "search {search}  status {}  priority {}",
            filter.status.as_str(),
            filter.priority
        )?;
        Ok(())
    }

    pub fn write_user<W: Write>(&self, out: &mut W, user: Option<&User>) -> anyhow::Result<()> {
        match user {
            Some(user) => writeln!(
                out,
                "{} <{}>",
                self.paint(&user.username, self.palette.accent()),
                user.email
            )?,
            None => writeln!(out, "{}", self.paint("not signed in", self.palette.muted()))?,
        }
        Ok(())
    }

    pub fn write_prompt<W: Write>(&self, out: &mut W, prompt: &ConfirmPrompt) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(&prompt.title, "1;31"))?;
        writeln!(out, "{}", prompt.message)?;
        writeln!(out, "Type `confirm` to delete or `cancel` to keep it.")?;
        Ok(())
    }

    pub fn write_error<W: Write>(&self, out: &mut W, message: &str) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(message, "31"))?;
        Ok(())
    }

    pub fn write_success<W: Write>(&self, out: &mut W, message: &str) -> anyhow::Result<()> {
        writeln!(out, "{}", self.paint(message, "32"))?;
        Ok(())
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn priority_code(priority: Priority) -> &'static str {
    match priority {
        Priority::High => "31",
        Priority::Medium => "33",
        Priority::Low => "32",
    }
}

fn write_table<W: Write>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(header).as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    for (idx, header) in headers.iter().enumerate() {
        write_cell(writer, header, widths[idx])?;
    }
    writeln!(writer)?;

    for width in &widths {
        write!(writer, "{:-<width$} ", "", width = *width)?;
    }
    writeln!(writer)?;

    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(column_count) {
            write_cell(writer, cell, widths[idx])?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn write_cell<W: Write>(writer: &mut W, cell: &str, width: usize) -> anyhow::Result<()> {
    let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
    let padding = width.saturating_sub(visible_width);
    write!(writer, "{}{} ", cell, " ".repeat(padding))?;
    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use taskdeck_shared::Task;

    use super::{Renderer, TerminalTheme, background_is_dark, strip_ansi};
    use crate::config::Config;
    use crate::theme::{Theme, ThemeSurface};

    fn task(value: serde_json::Value) -> Task {
        serde_json::from_value(value).expect("task json")
    }

    #[test]
    fn table_aligns_wide_titles_and_flags_overdue() {
        let mut cfg = Config::default();
        cfg.apply_overrides([("color".to_string(), "off".to_string())]);
        let renderer = Renderer::new(&cfg, true).expect("renderer");
        let now = Utc
            .with_ymd_and_hms(2025, 1, 10, 12, 0, 0)
            .single()
            .expect("now");

        let tasks = vec![
            task(json!({"_id": "a", "title": "買い物", "priority": "high",
                        "dueDate": "2025-01-05T00:00:00Z"})),
            task(json!({"_id": "b", "title": "Ship", "completed": true,
                        "completedAt": "2025-01-09T00:00:00Z"})),
        ];

        let mut out = Vec::new();
        renderer
            .write_task_table(&mut out, &tasks, now)
            .expect("render table");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("# Title "));
        assert!(lines[2].contains("Overdue"));
        assert!(lines[2].contains("High"));
        assert!(lines[3].contains("Completed"));
        assert!(lines[3].contains("No due date"));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn empty_list_has_a_message() {
        let renderer = Renderer::new(&Config::default(), false).expect("renderer");
        let mut out = Vec::new();
        renderer
            .write_task_table(&mut out, &[], Utc::now())
            .expect("render");
        assert_eq!(String::from_utf8(out).expect("utf8"), "No tasks found.\n");
    }

    #[test]
    fn palette_tracks_applied_theme() {
        let palette = TerminalTheme::new();
        assert_eq!(palette.current(), None);
        palette.apply_theme(Theme::Dark);
        assert_eq!(palette.current(), Some(Theme::Dark));
    }

    #[test]
    fn colorfgbg_background_decides_darkness() {
        assert!(background_is_dark("15;0"));
        assert!(background_is_dark("default;default;8"));
        assert!(!background_is_dark("0;15"));
        assert!(!background_is_dark("garbage"));
    }

    #[test]
    fn strip_ansi_removes_sgr_sequences() {
        assert_eq!(strip_ansi("\x1b[31mred\x1b[0m plain"), "red plain");
    }
}
