use super::source::{QuerySource, Resolvable, ScanSession, ScanTarget};
use super::state::WindowRequest;
use crate::error::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Table {
    id_field: String,
    rows: Vec<Value>,
}

#[derive(Default)]
struct Shared {
    tables: RwLock<HashMap<String, Table>>,
    requests: Mutex<Vec<WindowRequest>>,
    targets: Mutex<Vec<ScanTarget>>,
    open_sessions: AtomicUsize,
    closed_sessions: AtomicUsize,
    references_loaded: Arc<AtomicUsize>,
}

/// In-process [`QuerySource`] over JSON rows keyed by an integer
/// identifier field.
///
/// Query targets accept a small statement form,
/// `from <Entity> [where <field> <op> ? [and <field> <op> ?]...]`, where
/// `<op>` is one of `=`, `<`, `<=`, `>`, `>=` and each `?` binds the next
/// positional parameter.
///
/// Writes are visible to open sessions, so windows are not isolated from
/// concurrent inserts, just like a real store.
#[derive(Clone, Default)]
pub struct MemorySource {
    shared: Arc<Shared>,
    lazy_references: bool,
    fail_window: Option<u64>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(entity_type: &str, id_field: &str, rows: Vec<Value>) -> Self {
        let source = Self::new();
        source.create_entity(entity_type, id_field);
        for row in rows {
            source.insert(entity_type, row);
        }
        source
    }

    /// Hand records out as deferred references instead of direct values.
    pub fn with_lazy_references(mut self, lazy: bool) -> Self {
        self.lazy_references = lazy;
        self
    }

    /// Make the fetch of window `window_index` fail.
    pub fn fail_on_window(mut self, window_index: u64) -> Self {
        self.fail_window = Some(window_index);
        self
    }

    pub fn create_entity(&self, entity_type: &str, id_field: &str) {
        self.shared.tables.write().insert(
            entity_type.to_string(),
            Table {
                id_field: id_field.to_string(),
                rows: Vec::new(),
            },
        );
    }

    pub fn insert(&self, entity_type: &str, row: Value) -> bool {
        match self.shared.tables.write().get_mut(entity_type) {
            Some(table) => {
                table.rows.push(row);
                true
            }
            None => false,
        }
    }

    pub fn len(&self, entity_type: &str) -> usize {
        self.shared
            .tables
            .read()
            .get(entity_type)
            .map_or(0, |t| t.rows.len())
    }

    pub fn requests(&self) -> Vec<WindowRequest> {
        self.shared.requests.lock().clone()
    }

    /// Every target passed to `open`, as received.
    pub fn targets(&self) -> Vec<ScanTarget> {
        self.shared.targets.lock().clone()
    }

    pub fn open_sessions(&self) -> usize {
        self.shared.open_sessions.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.shared.closed_sessions.load(Ordering::SeqCst)
    }

    pub fn references_loaded(&self) -> usize {
        self.shared.references_loaded.load(Ordering::SeqCst)
    }
}

impl QuerySource for MemorySource {
    type Record = Value;
    type Session = MemorySession;

    fn open(&self, target: &ScanTarget, _order_by_id: bool) -> Result<MemorySession> {
        self.shared.targets.lock().push(target.clone());
        let (entity_type, filter) = match target {
            ScanTarget::Entity { entity_type } => (entity_type.clone(), Vec::new()),
            ScanTarget::Query {
                statement,
                parameters,
            } => parse_query(statement, parameters)?,
        };
        if !self.shared.tables.read().contains_key(&entity_type) {
            return Err(Error::Initialization {
                reason: format!("unknown entity type {}", entity_type),
            });
        }

        self.shared.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(MemorySession {
            shared: self.shared.clone(),
            entity_type,
            filter,
            lazy_references: self.lazy_references,
            fail_window: self.fail_window,
            closed: false,
        })
    }
}

pub struct MemorySession {
    shared: Arc<Shared>,
    entity_type: String,
    filter: Vec<Predicate>,
    lazy_references: bool,
    fail_window: Option<u64>,
    closed: bool,
}

impl ScanSession for MemorySession {
    type Record = Value;

    fn fetch_window(&mut self, request: &WindowRequest) -> Result<Vec<Resolvable<Value>>> {
        self.shared.requests.lock().push(*request);
        if self.closed {
            return Err(Error::InvalidOperation {
                reason: "fetch on a closed session".to_string(),
            });
        }
        if self.fail_window == Some(request.window_index) {
            return Err(Error::WindowFetch {
                window_index: request.window_index,
                offset: request.offset,
                reason: "query execution failed".to_string(),
            });
        }

        let tables = self.shared.tables.read();
        let table = tables
            .get(&self.entity_type)
            .ok_or_else(|| Error::WindowFetch {
                window_index: request.window_index,
                offset: request.offset,
                reason: format!("entity type {} was dropped", self.entity_type),
            })?;

        let mut rows: Vec<&Value> = table
            .rows
            .iter()
            .filter(|row| self.filter.iter().all(|p| p.matches(row)))
            .collect();
        if request.order_by_id {
            rows.sort_by_key(|row| row.get(&table.id_field).and_then(Value::as_u64));
        }

        let window = rows
            .into_iter()
            .skip(usize::try_from(request.offset).unwrap_or(usize::MAX))
            .take(usize::try_from(request.limit).unwrap_or(usize::MAX))
            .cloned();

        Ok(if self.lazy_references {
            window
                .map(|row| {
                    let loaded = self.shared.references_loaded.clone();
                    Resolvable::deferred(move || {
                        loaded.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, Error>(row.clone())
                    })
                })
                .collect()
        } else {
            window.map(Resolvable::Direct).collect()
        })
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidOperation {
                reason: "session closed twice".to_string(),
            });
        }
        self.closed = true;
        self.shared.open_sessions.fetch_sub(1, Ordering::SeqCst);
        self.shared.closed_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(Comparison::Eq),
            "<" => Some(Comparison::Lt),
            "<=" => Some(Comparison::Le),
            ">" => Some(Comparison::Gt),
            ">=" => Some(Comparison::Ge),
            _ => None,
        }
    }

    fn holds(self, ordering: CmpOrdering) -> bool {
        match self {
            Comparison::Eq => ordering == CmpOrdering::Equal,
            Comparison::Lt => ordering == CmpOrdering::Less,
            Comparison::Le => ordering != CmpOrdering::Greater,
            Comparison::Gt => ordering == CmpOrdering::Greater,
            Comparison::Ge => ordering != CmpOrdering::Less,
        }
    }
}

#[derive(Debug, Clone)]
struct Predicate {
    field: String,
    comparison: Comparison,
    value: Value,
}

impl Predicate {
    fn matches(&self, row: &Value) -> bool {
        let Some(actual) = row.get(&self.field) else {
            return false;
        };
        let ordering = match (actual, &self.value) {
            (Value::Number(a), Value::Number(b)) => a
                .as_f64()
                .zip(b.as_f64())
                .and_then(|(a, b)| a.partial_cmp(&b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (a, b) => (a == b).then_some(CmpOrdering::Equal),
        };
        ordering.is_some_and(|o| self.comparison.holds(o))
    }
}

fn parse_query(statement: &str, parameters: &[Value]) -> Result<(String, Vec<Predicate>)> {
    let invalid = |reason: &str| Error::Initialization {
        reason: format!("unsupported query `{}`: {}", statement, reason),
    };

    let tokens: Vec<&str> = statement.split_whitespace().collect();
    let (entity_type, mut rest) = match tokens.as_slice() {
        [from, entity_type, rest @ ..] if from.eq_ignore_ascii_case("from") => {
            (entity_type.to_string(), rest)
        }
        _ => return Err(invalid("expected `from <entity>`")),
    };

    let mut bound = parameters.iter();
    let mut predicates = Vec::new();
    let mut keyword = "where";
    while let [kw, field, op, placeholder, tail @ ..] = rest {
        if !kw.eq_ignore_ascii_case(keyword) || *placeholder != "?" {
            return Err(invalid("expected `<field> <op> ?`"));
        }
        let comparison = Comparison::parse(op).ok_or_else(|| invalid("unknown operator"))?;
        let value = bound
            .next()
            .ok_or_else(|| invalid("fewer parameters than placeholders"))?;
        predicates.push(Predicate {
            field: field.to_string(),
            comparison,
            value: value.clone(),
        });
        keyword = "and";
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(invalid("trailing tokens"));
    }
    if bound.next().is_some() {
        return Err(invalid("more parameters than placeholders"));
    }
    Ok((entity_type, predicates))
}
