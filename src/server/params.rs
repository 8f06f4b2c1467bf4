//! Typed parameter records for every tool.
//!
//! Arguments arrive as a JSON object. Each tool gets one record, built by a
//! `parse` function that enforces required fields, closed enumerations and
//! numeric coercion (integers, fractions truncated toward zero, numeric
//! strings). Every failure is a validation error naming the parameter by its
//! full path, e.g. `filter.days`.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{Result, TodoError};
use crate::index::SearchFilters;
use crate::stats::StatsPeriod;
use crate::todo::{
    normalize_key, parse_timestamp, LinkKind, ListFilter, MetadataUpdate, Priority,
    SectionOperation, SectionSchema, TodoStatus, TodoType,
};

/// Default number of search hits.
pub const DEFAULT_SEARCH_LIMIT: usize = 10;
/// Upper bound on search hits.
pub const MAX_SEARCH_LIMIT: usize = 100;
/// Default age for `todo_clean` archive_old.
pub const DEFAULT_CLEAN_DAYS: u32 = 90;
/// Default order for sections added with `todo_add_section`.
pub const DEFAULT_SECTION_ORDER: i64 = 100;

// ============================================================================
// Argument access
// ============================================================================

/// A view over one JSON object with path-aware accessors.
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    map: Option<&'a Map<String, Value>>,
    prefix: &'a str,
}

static EMPTY_PREFIX: &str = "";

impl<'a> Args<'a> {
    /// Wrap the top-level arguments. `null` is treated as `{}`.
    ///
    /// # Errors
    ///
    /// Fails when `value` is neither an object nor null.
    pub fn new(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                map: Some(map),
                prefix: EMPTY_PREFIX,
            }),
            Value::Null => Ok(Self {
                map: None,
                prefix: EMPTY_PREFIX,
            }),
            _ => Err(TodoError::validation("arguments", "must be an object")),
        }
    }

    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{name}", self.prefix)
        }
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.and_then(|m| m.get(name)).filter(|v| !v.is_null())
    }

    /// Names of every argument present.
    pub fn keys(&self) -> impl Iterator<Item = &'a String> {
        self.map.into_iter().flat_map(Map::keys)
    }

    /// Required non-empty string.
    ///
    /// # Errors
    ///
    /// Fails when missing, blank or not a string.
    pub fn required_str(&self, name: &str) -> Result<String> {
        self.optional_str(name)?
            .ok_or_else(|| TodoError::validation(self.path(name), "is required"))
    }

    /// Optional string; blank values count as absent.
    ///
    /// # Errors
    ///
    /// Fails when present but not a string.
    pub fn optional_str(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            Some(_) => Err(TodoError::validation(self.path(name), "must be a string")),
        }
    }

    /// Optional string kept verbatim (no trimming); used for content.
    ///
    /// # Errors
    ///
    /// Fails when present but not a string.
    pub fn raw_str(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(TodoError::validation(self.path(name), "must be a string")),
        }
    }

    /// Optional member of a closed set.
    ///
    /// # Errors
    ///
    /// Fails when present but not a member.
    pub fn enumerated<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr<Err = TodoError>,
    {
        match self.optional_str(name)? {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|e| self.rename(e, name)),
        }
    }

    /// Like [`enumerated`](Self::enumerated) with a default.
    ///
    /// # Errors
    ///
    /// Fails when present but not a member.
    pub fn enumerated_or<T>(&self, name: &str, default: T) -> Result<T>
    where
        T: FromStr<Err = TodoError>,
    {
        Ok(self.enumerated(name)?.unwrap_or(default))
    }

    /// Optional integer. Fractions are truncated; numeric strings accepted.
    ///
    /// # Errors
    ///
    /// Fails when present but not numeric.
    pub fn integer(&self, name: &str) -> Result<Option<i64>> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        coerce_integer(value)
            .map(Some)
            .ok_or_else(|| TodoError::validation(self.path(name), "must be a number"))
    }

    /// Optional non-negative integer that fits `u32`.
    ///
    /// # Errors
    ///
    /// Fails when present but negative, too large, or not numeric.
    pub fn count(&self, name: &str) -> Result<Option<u32>> {
        match self.integer(name)? {
            None => Ok(None),
            Some(n) => u32::try_from(n)
                .map(Some)
                .map_err(|_| TodoError::validation(self.path(name), "must be a non-negative number")),
        }
    }

    /// Optional boolean; `"true"`/`"false"` strings accepted.
    ///
    /// # Errors
    ///
    /// Fails when present but not boolean.
    pub fn boolean(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(TodoError::validation(self.path(name), "must be a boolean")),
            },
            Some(_) => Err(TodoError::validation(self.path(name), "must be a boolean")),
        }
    }

    /// Optional calendar date in `YYYY-MM-DD` form.
    ///
    /// # Errors
    ///
    /// Fails when present but not a date.
    pub fn date(&self, name: &str) -> Result<Option<NaiveDate>> {
        match self.optional_str(name)? {
            None => Ok(None),
            Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| TodoError::validation(self.path(name), "must be a date (YYYY-MM-DD)")),
        }
    }

    /// Run `f` on a nested object, if present.
    ///
    /// # Errors
    ///
    /// Fails when present but not an object, or when `f` fails.
    pub fn nested<T>(&self, name: &str, f: impl FnOnce(Args<'_>) -> Result<T>) -> Result<Option<T>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Object(map)) => {
                let prefix = self.path(name);
                f(Args {
                    map: Some(map),
                    prefix: &prefix,
                })
                .map(Some)
            }
            Some(_) => Err(TodoError::validation(self.path(name), "must be an object")),
        }
    }

    /// Run `f` on every object of an array.
    ///
    /// # Errors
    ///
    /// Fails when present but not an array of objects, or when `f` fails.
    pub fn objects<T>(&self, name: &str, mut f: impl FnMut(Args<'_>) -> Result<T>) -> Result<Vec<T>> {
        let items = match self.get(name) {
            None => return Ok(Vec::new()),
            Some(Value::Array(items)) => items,
            Some(_) => return Err(TodoError::validation(self.path(name), "must be an array")),
        };
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let prefix = format!("{}[{i}]", self.path(name));
                match item {
                    Value::Object(map) => f(Args {
                        map: Some(map),
                        prefix: &prefix,
                    }),
                    _ => Err(TodoError::validation(prefix.clone(), "must be an object")),
                }
            })
            .collect()
    }

    /// Optional list of strings.
    ///
    /// # Errors
    ///
    /// Fails when present but not an array of strings.
    pub fn strings(&self, name: &str) -> Result<Vec<String>> {
        match self.get(name) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.trim().to_string()),
                    _ => Err(TodoError::validation(self.path(name), "must contain only strings")),
                })
                .filter(|s| s.as_ref().map_or(true, |s| !s.is_empty()))
                .collect(),
            Some(_) => Err(TodoError::validation(self.path(name), "must be an array")),
        }
    }

    /// Optional object of scalar values, stringified.
    ///
    /// # Errors
    ///
    /// Fails when present but not an object of scalars.
    pub fn string_map(&self, name: &str) -> Result<BTreeMap<String, String>> {
        let map = match self.get(name) {
            None => return Ok(BTreeMap::new()),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(TodoError::validation(self.path(name), "must be an object")),
        };
        map.iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => {
                        return Err(TodoError::validation(
                            format!("{}.{key}", self.path(name)),
                            "must be a string, number or boolean",
                        ))
                    }
                };
                Ok((key.clone(), text))
            })
            .collect()
    }

    /// Optional object of integers.
    ///
    /// # Errors
    ///
    /// Fails when present but any value is not numeric.
    pub fn integer_map(&self, name: &str) -> Result<Option<BTreeMap<String, i64>>> {
        let map = match self.get(name) {
            None => return Ok(None),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(TodoError::validation(self.path(name), "must be an object")),
        };
        map.iter()
            .map(|(key, value)| {
                coerce_integer(value).map(|n| (key.clone(), n)).ok_or_else(|| {
                    TodoError::validation(format!("{}.{key}", self.path(name)), "must be a number")
                })
            })
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Some)
    }

    fn rename(&self, err: TodoError, name: &str) -> TodoError {
        match err {
            TodoError::Validation { reason, .. } => TodoError::validation(self.path(name), reason),
            other => other,
        }
    }
}

fn coerce_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

// ============================================================================
// Records
// ============================================================================

/// `todo_create`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateParams {
    pub task: String,
    pub priority: Priority,
    pub todo_type: TodoType,
    pub parent_id: Option<String>,
    pub template: Option<String>,
    pub tags: Vec<String>,
}

impl CreateParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        Ok(Self {
            task: args.required_str("task")?,
            priority: args.enumerated_or("priority", Priority::High)?,
            todo_type: args.enumerated_or("type", TodoType::Feature)?,
            parent_id: args.optional_str("parent_id")?,
            template: args.optional_str("template")?,
            tags: args.strings("tags")?,
        })
    }
}

/// One entry of `todo_create_multi`.
#[derive(Debug, Clone, PartialEq)]
pub struct TodoSpec {
    pub task: String,
    pub priority: Priority,
    pub todo_type: TodoType,
}

impl TodoSpec {
    fn parse(args: Args<'_>, default_type: TodoType) -> Result<Self> {
        Ok(Self {
            task: args.required_str("task")?,
            priority: args.enumerated_or("priority", Priority::High)?,
            todo_type: args.enumerated_or("type", default_type)?,
        })
    }
}

/// `todo_create_multi`
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMultiParams {
    pub parent: TodoSpec,
    pub children: Vec<TodoSpec>,
}

impl CreateMultiParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        let parent = args
            .nested("parent", |a| TodoSpec::parse(a, TodoType::MultiPhase))?
            .ok_or_else(|| TodoError::validation("parent", "is required"))?;
        let children = args.objects("children", |a| TodoSpec::parse(a, TodoType::Phase))?;
        if children.is_empty() {
            return Err(TodoError::validation("children", "must contain at least one child"));
        }
        Ok(Self { parent, children })
    }
}

/// Output format of `todo_read`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadFormat {
    #[default]
    Summary,
    List,
    Full,
}

impl FromStr for ReadFormat {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "summary" => Ok(Self::Summary),
            "list" => Ok(Self::List),
            "full" => Ok(Self::Full),
            other => Err(TodoError::validation(
                "format",
                format!("'{other}' is not one of summary, list, full"),
            )),
        }
    }
}

/// `todo_read`
#[derive(Debug, Clone, PartialEq)]
pub struct ReadParams {
    pub id: Option<String>,
    pub format: ReadFormat,
    pub filter: ListFilter,
    pub include_archived: bool,
}

impl ReadParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        let filter = args
            .nested("filter", |f| {
                Ok(ListFilter {
                    status: f.enumerated::<TodoStatus>("status")?,
                    priority: f.enumerated::<Priority>("priority")?,
                    days: f.count("days")?.unwrap_or(0),
                })
            })?
            .unwrap_or_default();
        Ok(Self {
            id: args.optional_str("id")?,
            format: args.enumerated_or("format", ReadFormat::Summary)?,
            filter,
            include_archived: args.boolean("include_archived")?.unwrap_or(false),
        })
    }
}

/// A section write carried by `todo_update`.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionUpdate {
    pub section: String,
    pub operation: SectionOperation,
    pub content: String,
}

/// `todo_update`
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateParams {
    pub id: String,
    pub section: Option<SectionUpdate>,
    pub metadata: MetadataUpdate,
}

impl UpdateParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        let id = args.required_str("id")?;
        let metadata = args
            .nested("metadata", |m| {
                let completed = match m.optional_str("completed")? {
                    Some(raw) => Some(parse_timestamp(&raw, "metadata.completed")?),
                    None => None,
                };
                Ok(MetadataUpdate {
                    status: m.enumerated::<TodoStatus>("status")?,
                    priority: m.enumerated::<Priority>("priority")?,
                    parent_id: m.raw_str("parent_id")?.map(|p| p.trim().to_string()),
                    current_test: m.raw_str("current_test")?.map(|c| c.trim().to_string()),
                    completed,
                })
            })?
            .unwrap_or_default();

        let section = match args.optional_str("section")? {
            Some(section) => {
                let operation = args.enumerated_or("operation", SectionOperation::Append)?;
                let content = args.raw_str("content")?.unwrap_or_default();
                if operation == SectionOperation::Toggle && content.trim().is_empty() {
                    return Err(TodoError::validation("content", "toggle needs the item text"));
                }
                Some(SectionUpdate {
                    section: normalize_key(&section),
                    operation,
                    content,
                })
            }
            None => None,
        };

        if section.is_none() && metadata.is_empty() {
            return Err(TodoError::validation(
                "section",
                "nothing to update: provide a section or metadata",
            ));
        }
        Ok(Self {
            id,
            section,
            metadata,
        })
    }
}

/// `todo_search`
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub query: String,
    pub filters: SearchFilters,
    pub limit: usize,
}

impl SearchParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        let filters = args
            .nested("filters", |f| {
                Ok(SearchFilters {
                    status: f.enumerated::<TodoStatus>("status")?,
                    date_from: f.date("date_from")?,
                    date_to: f.date("date_to")?,
                })
            })?
            .unwrap_or_default();
        if let (Some(from), Some(to)) = (filters.date_from, filters.date_to) {
            if from > to {
                return Err(TodoError::validation("filters.date_from", "is after date_to"));
            }
        }
        let limit = match args.count("limit")? {
            None => DEFAULT_SEARCH_LIMIT,
            Some(0) => return Err(TodoError::validation("limit", "must be at least 1")),
            Some(n) => (n as usize).min(MAX_SEARCH_LIMIT),
        };
        Ok(Self {
            query: args.required_str("query")?,
            filters,
            limit,
        })
    }
}

/// `todo_archive`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveParams {
    pub id: String,
    pub quarter: Option<String>,
}

impl ArchiveParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        Ok(Self {
            id: args.required_str("id")?,
            quarter: args.optional_str("quarter")?,
        })
    }
}

/// `todo_link`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkParams {
    pub parent_id: String,
    pub child_id: String,
    pub kind: LinkKind,
}

impl LinkParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        Ok(Self {
            parent_id: args.required_str("parent_id")?,
            child_id: args.required_str("child_id")?,
            kind: args.enumerated_or("link_type", LinkKind::ParentChild)?,
        })
    }
}

/// `todo_stats`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsParams {
    pub period: StatsPeriod,
}

impl StatsParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        Ok(Self {
            period: args.enumerated_or("period", StatsPeriod::All)?,
        })
    }
}

/// Sub-operation of `todo_clean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanOperation {
    #[default]
    ArchiveOld,
    FindDuplicates,
}

impl FromStr for CleanOperation {
    type Err = TodoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "archive_old" => Ok(Self::ArchiveOld),
            "find_duplicates" => Ok(Self::FindDuplicates),
            other => Err(TodoError::validation(
                "operation",
                format!("'{other}' is not one of archive_old, find_duplicates"),
            )),
        }
    }
}

/// `todo_clean`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanParams {
    pub operation: CleanOperation,
    pub days: u32,
}

impl CleanParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        Ok(Self {
            operation: args.enumerated_or("operation", CleanOperation::ArchiveOld)?,
            days: args.count("days")?.unwrap_or(DEFAULT_CLEAN_DAYS),
        })
    }
}

/// `todo_template`
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParams {
    pub template: Option<String>,
    pub task: Option<String>,
    pub priority: Priority,
    pub todo_type: TodoType,
    pub parent_id: Option<String>,
    pub variables: BTreeMap<String, String>,
}

impl TemplateParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        let params = Self {
            template: args.optional_str("template")?,
            task: args.optional_str("task")?,
            priority: args.enumerated_or("priority", Priority::High)?,
            todo_type: args.enumerated_or("type", TodoType::Feature)?,
            parent_id: args.optional_str("parent_id")?,
            variables: args.string_map("variables")?,
        };
        if params.template.is_some() && params.task.is_none() {
            return Err(TodoError::validation("task", "is required when a template is given"));
        }
        Ok(params)
    }
}

/// `todo_sections`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionsParams {
    pub id: String,
}

impl SectionsParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        Ok(Self {
            id: args.required_str("id")?,
        })
    }
}

/// `todo_add_section`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddSectionParams {
    pub id: String,
    pub key: String,
    pub title: String,
    pub schema: SectionSchema,
    pub required: bool,
    pub order: i64,
}

impl AddSectionParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        let raw_key = args.required_str("key")?;
        let key = normalize_key(&raw_key);
        if key.is_empty() {
            return Err(TodoError::validation("key", "must contain a letter or digit"));
        }
        let title = args.required_str("title")?;
        if title.chars().any(char::is_control) {
            return Err(TodoError::validation(
                "title",
                "must be a single line without control characters",
            ));
        }
        Ok(Self {
            id: args.required_str("id")?,
            key,
            title,
            schema: args.enumerated_or("schema", SectionSchema::Freeform)?,
            required: args.boolean("required")?.unwrap_or(false),
            order: args.integer("order")?.unwrap_or(DEFAULT_SECTION_ORDER),
        })
    }
}

/// `todo_reorder_sections`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReorderSectionsParams {
    pub id: String,
    pub order: BTreeMap<String, i64>,
}

impl ReorderSectionsParams {
    pub fn parse(args: Args<'_>) -> Result<Self> {
        let order = args
            .integer_map("order")?
            .ok_or_else(|| TodoError::validation("order", "is required"))?;
        if order.is_empty() {
            return Err(TodoError::validation("order", "must name at least one section"));
        }
        Ok(Self {
            id: args.required_str("id")?,
            order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_of(err: TodoError) -> String {
        match err {
            TodoError::Validation { field, .. } => field,
            other => panic!("expected validation, got {other:?}"),
        }
    }

    #[test]
    fn test_create_defaults_and_required_task() {
        let v = json!({"task": "  Build it "});
        let p = CreateParams::parse(Args::new(&v).unwrap()).unwrap();
        assert_eq!(p.task, "Build it");
        assert_eq!(p.priority, Priority::High);
        assert_eq!(p.todo_type, TodoType::Feature);

        let v = json!({"task": ""});
        assert_eq!(field_of(CreateParams::parse(Args::new(&v).unwrap()).unwrap_err()), "task");
    }

    #[test]
    fn test_enum_errors_name_the_field() {
        let v = json!({"task": "x", "priority": "urgent"});
        assert_eq!(field_of(CreateParams::parse(Args::new(&v).unwrap()).unwrap_err()), "priority");

        let v = json!({"filter": {"status": "done"}});
        assert_eq!(field_of(ReadParams::parse(Args::new(&v).unwrap()).unwrap_err()), "filter.status");
    }

    #[test]
    fn test_numeric_coercion() {
        let v = json!({"filter": {"days": 7.9}});
        assert_eq!(ReadParams::parse(Args::new(&v).unwrap()).unwrap().filter.days, 7);

        let v = json!({"operation": "archive_old", "days": "30"});
        assert_eq!(CleanParams::parse(Args::new(&v).unwrap()).unwrap().days, 30);

        let v = json!({"days": "soon"});
        assert_eq!(field_of(CleanParams::parse(Args::new(&v).unwrap()).unwrap_err()), "days");

        let v = json!({"days": -1});
        assert!(CleanParams::parse(Args::new(&v).unwrap()).is_err());
    }

    #[test]
    fn test_null_arguments_are_empty() {
        let p = StatsParams::parse(Args::new(&Value::Null).unwrap()).unwrap();
        assert_eq!(p.period, StatsPeriod::All);
        assert!(Args::new(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_multi_children_paths() {
        let v = json!({
            "parent": {"task": "Build API", "type": "multi-phase"},
            "children": [{"task": "Design"}, {"priority": "low"}]
        });
        let err = CreateMultiParams::parse(Args::new(&v).unwrap()).unwrap_err();
        assert_eq!(field_of(err), "children[1].task");

        let v = json!({"parent": {"task": "P"}, "children": [{"task": "C"}]});
        let p = CreateMultiParams::parse(Args::new(&v).unwrap()).unwrap();
        assert_eq!(p.parent.todo_type, TodoType::MultiPhase);
        assert_eq!(p.children[0].todo_type, TodoType::Phase);
    }

    #[test]
    fn test_update_requires_something() {
        let v = json!({"id": "x"});
        assert!(UpdateParams::parse(Args::new(&v).unwrap()).is_err());

        let v = json!({"id": "x", "section": "Checklist", "operation": "toggle", "content": "A"});
        let p = UpdateParams::parse(Args::new(&v).unwrap()).unwrap();
        let section = p.section.unwrap();
        assert_eq!(section.section, "checklist");
        assert_eq!(section.operation, SectionOperation::Toggle);

        let v = json!({"id": "x", "metadata": {"status": "completed", "current_test": "t1"}});
        let p = UpdateParams::parse(Args::new(&v).unwrap()).unwrap();
        assert_eq!(p.metadata.status, Some(TodoStatus::Completed));
        assert_eq!(p.metadata.current_test.as_deref(), Some("t1"));
    }

    #[test]
    fn test_search_limits_and_dates() {
        let v = json!({"query": "auth"});
        assert_eq!(SearchParams::parse(Args::new(&v).unwrap()).unwrap().limit, DEFAULT_SEARCH_LIMIT);

        let v = json!({"query": "auth", "limit": 5000});
        assert_eq!(SearchParams::parse(Args::new(&v).unwrap()).unwrap().limit, MAX_SEARCH_LIMIT);

        let v = json!({"query": "auth", "filters": {"date_from": "2025-13-01"}});
        assert_eq!(
            field_of(SearchParams::parse(Args::new(&v).unwrap()).unwrap_err()),
            "filters.date_from"
        );
    }

    #[test]
    fn test_reorder_rejects_non_numeric() {
        let v = json!({"id": "x", "order": {"checklist": "first"}});
        assert_eq!(
            field_of(ReorderSectionsParams::parse(Args::new(&v).unwrap()).unwrap_err()),
            "order.checklist"
        );

        let v = json!({"id": "x", "order": {"checklist": 1.0, "findings": "2"}});
        let p = ReorderSectionsParams::parse(Args::new(&v).unwrap()).unwrap();
        assert_eq!(p.order["findings"], 2);
    }

    #[test]
    fn test_add_section_defaults() {
        let v = json!({"id": "x", "key": "Risk Log", "title": "Risk Log"});
        let p = AddSectionParams::parse(Args::new(&v).unwrap()).unwrap();
        assert_eq!(p.key, "risk_log");
        assert_eq!(p.schema, SectionSchema::Freeform);
        assert_eq!(p.order, DEFAULT_SECTION_ORDER);

        let v = json!({"id": "x", "key": "k", "title": "T", "schema": "tabular"});
        assert_eq!(field_of(AddSectionParams::parse(Args::new(&v).unwrap()).unwrap_err()), "schema");
    }

    #[test]
    fn test_add_section_title_single_line() {
        let v = json!({"id": "x", "key": "notes", "title": "Notes\n## Checklist"});
        assert_eq!(field_of(AddSectionParams::parse(Args::new(&v).unwrap()).unwrap_err()), "title");
    }

    #[test]
    fn test_template_needs_task() {
        let v = json!({"template": "bug"});
        assert_eq!(field_of(TemplateParams::parse(Args::new(&v).unwrap()).unwrap_err()), "task");
        let v = json!({"template": "bug", "task": "t", "variables": {"n": 3}});
        let p = TemplateParams::parse(Args::new(&v).unwrap()).unwrap();
        assert_eq!(p.variables["n"], "3");
    }
}
