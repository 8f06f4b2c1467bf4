//! Aggregate statistics over the active todo set.

use chrono::{DateTime, Duration, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{Result, TodoError};
use crate::todo::{parse_checklist, ChecklistStatus, ListFilter, Todo, TodoBody, TodoStatus, TodoStore};

/// Sections consulted, in order, when computing per-todo test coverage.
const COVERAGE_SECTIONS: [&str; 2] = ["test_list", "checklist"];

/// Time window applied to the `started` timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    #[default]
    All,
    Week,
    Month,
    Quarter,
    Year,
}

impl StatsPeriod {
    /// Length of the window, `None` for [`StatsPeriod::All`].
    #[must_use]
    pub fn window(&self) -> Option<Duration> {
        match self {
            Self::All => None,
            Self::Week => Some(Duration::days(7)),
            Self::Month => Some(Duration::days(30)),
            Self::Quarter => Some(Duration::days(90)),
            Self::Year => Some(Duration::days(365)),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

impl fmt::Display for StatsPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StatsPeriod {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "all" => Ok(Self::All),
            "week" => Ok(Self::Week),
            "month" => Ok(Self::Month),
            "quarter" => Ok(Self::Quarter),
            "year" => Ok(Self::Year),
            other => Err(TodoError::validation(
                "period",
                format!("'{other}' is not one of all, week, month, quarter, year"),
            )),
        }
    }
}

/// Completion counts for one bucket (a type or a priority).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionRate {
    pub total: usize,
    pub completed: usize,
    /// Percentage in `0.0..=100.0`.
    pub rate: f64,
}

impl CompletionRate {
    fn record(&mut self, completed: bool) {
        self.total += 1;
        if completed {
            self.completed += 1;
        }
        self.rate = percentage(self.completed, self.total);
    }
}

/// Statistics for one period.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TodoStats {
    pub period: StatsPeriod,
    pub total: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
    pub completion_rate: f64,
    pub completion_rate_by_type: BTreeMap<String, CompletionRate>,
    pub completion_rate_by_priority: BTreeMap<String, CompletionRate>,
    /// Mean of `completed - started` over completed todos, in hours.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_completion_hours: Option<f64>,
    /// Percentage of checked test items per todo that has any.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub test_coverage: BTreeMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_test_coverage: Option<f64>,
}

impl TodoStats {
    /// Fold a set of todos (and their bodies, when available) into stats.
    #[must_use]
    pub fn from_todos<'a>(
        period: StatsPeriod,
        todos: impl IntoIterator<Item = (&'a Todo, Option<&'a str>)>,
    ) -> Self {
        let mut stats = Self {
            period,
            ..Self::default()
        };
        let mut durations = Vec::new();

        for (todo, body) in todos {
            stats.total += 1;
            let done = todo.status == TodoStatus::Completed;
            match todo.status {
                TodoStatus::InProgress => stats.in_progress += 1,
                TodoStatus::Blocked => stats.blocked += 1,
                TodoStatus::Completed => stats.completed += 1,
            }
            stats
                .completion_rate_by_type
                .entry(todo.todo_type.to_string())
                .or_default()
                .record(done);
            stats
                .completion_rate_by_priority
                .entry(todo.priority.to_string())
                .or_default()
                .record(done);

            if let Some(duration) = todo.duration().filter(|_| done) {
                durations.push(duration.num_seconds() as f64 / 3600.0);
            }
            if let Some(coverage) = body.and_then(test_coverage) {
                stats.test_coverage.insert(todo.id.clone(), coverage);
            }
        }

        stats.completion_rate = percentage(stats.completed, stats.total);
        stats.average_completion_hours = mean(&durations);
        let coverages: Vec<f64> = stats.test_coverage.values().copied().collect();
        stats.average_test_coverage = mean(&coverages);
        stats
    }
}

/// Computes [`TodoStats`] for one working directory.
#[derive(Debug, Clone)]
pub struct StatsEngine {
    store: TodoStore,
}

impl StatsEngine {
    #[must_use]
    pub fn new(store: TodoStore) -> Self {
        Self { store }
    }

    /// Stats across every active todo.
    ///
    /// # Errors
    ///
    /// Fails when the todos directory cannot be listed.
    pub fn generate(&self) -> Result<TodoStats> {
        self.generate_for_period(StatsPeriod::All)
    }

    /// Stats restricted to todos started within `period`.
    ///
    /// # Errors
    ///
    /// Fails when the todos directory cannot be listed.
    pub fn generate_for_period(&self, period: StatsPeriod) -> Result<TodoStats> {
        self.generate_cancellable(period, &|| false)
    }

    /// Like [`generate_for_period`](Self::generate_for_period), checking
    /// `is_cancelled` between todos.
    ///
    /// # Errors
    ///
    /// Returns `Operation("cancelled")` when cancellation is observed.
    pub fn generate_cancellable(
        &self,
        period: StatsPeriod,
        is_cancelled: &dyn Fn() -> bool,
    ) -> Result<TodoStats> {
        let now = Local::now();
        let todos: Vec<Todo> = self
            .store
            .list_cancellable(&ListFilter::default(), is_cancelled)?
            .into_iter()
            .filter(|todo| in_period(todo, period, now))
            .collect();

        let mut bodies = Vec::with_capacity(todos.len());
        for todo in &todos {
            if is_cancelled() {
                return Err(TodoError::cancelled());
            }
            match self.store.read_content(&todo.id) {
                Ok(body) => bodies.push(Some(body)),
                Err(e) => {
                    warn!(id = %todo.id, "Skipping coverage for unreadable todo: {}", e);
                    bodies.push(None);
                }
            }
        }

        let stats = TodoStats::from_todos(
            period,
            todos.iter().zip(bodies.iter().map(Option::as_deref)),
        );
        debug!(period = %period, total = stats.total, "Generated stats");
        Ok(stats)
    }
}

fn in_period(todo: &Todo, period: StatsPeriod, now: DateTime<Local>) -> bool {
    period.window().map_or(true, |window| todo.started >= now - window)
}

/// Checked share of the first non-empty test checklist, as a percentage.
fn test_coverage(body: &str) -> Option<f64> {
    let parsed = TodoBody::parse(body);
    COVERAGE_SECTIONS.iter().find_map(|key| {
        let items = parse_checklist(parsed.get(key, None)?);
        if items.is_empty() {
            return None;
        }
        let done = items
            .iter()
            .filter(|item| item.status == ChecklistStatus::Completed)
            .count();
        Some(percentage(done, items.len()))
    })
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        (part as f64 / total as f64 * 1000.0).round() / 10.0
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}
