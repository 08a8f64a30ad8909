use super::state::WindowRequest;
use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

/// What a cursor scans.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanTarget {
    /// Every record of an entity type, as used by an initial load.
    Entity { entity_type: String },
    /// An ad-hoc query with positional parameters.
    Query {
        statement: String,
        parameters: Vec<serde_json::Value>,
    },
}

impl ScanTarget {
    pub fn entity(entity_type: impl Into<String>) -> Self {
        ScanTarget::Entity {
            entity_type: entity_type.into(),
        }
    }

    pub fn query(statement: impl Into<String>, parameters: Vec<serde_json::Value>) -> Self {
        ScanTarget::Query {
            statement: statement.into(),
            parameters,
        }
    }
}

impl fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTarget::Entity { entity_type } => write!(f, "entity {}", entity_type),
            ScanTarget::Query { statement, .. } => write!(f, "query `{}`", statement),
        }
    }
}

/// Backing store able to serve bounded windows of a scan.
pub trait QuerySource {
    type Record;
    type Session: ScanSession<Record = Self::Record>;

    /// Open a session with the scan for `target` prepared. Any failure here
    /// is reported by the cursor as an initialization error.
    fn open(&self, target: &ScanTarget, order_by_id: bool) -> Result<Self::Session>;
}

impl<S: QuerySource + ?Sized> QuerySource for &S {
    type Record = S::Record;
    type Session = S::Session;

    fn open(&self, target: &ScanTarget, order_by_id: bool) -> Result<Self::Session> {
        (**self).open(target, order_by_id)
    }
}

impl<S: QuerySource + ?Sized> QuerySource for Arc<S> {
    type Record = S::Record;
    type Session = S::Session;

    fn open(&self, target: &ScanTarget, order_by_id: bool) -> Result<Self::Session> {
        (**self).open(target, order_by_id)
    }
}

/// An open backing-store session.
pub trait ScanSession {
    type Record;

    /// Fetch at most `request.limit` records starting at `request.offset`.
    fn fetch_window(&mut self, request: &WindowRequest) -> Result<Vec<Resolvable<Self::Record>>>;

    /// Release the session. Called at most once by the cursor.
    fn close(&mut self) -> Result<()>;
}

/// Loads the concrete value behind a deferred reference.
pub trait Loader<T> {
    fn load(&mut self) -> Result<T>;
}

impl<T, F> Loader<T> for F
where
    F: FnMut() -> Result<T>,
{
    fn load(&mut self) -> Result<T> {
        self()
    }
}

/// A record as returned by a window: either the value itself or a lazy
/// reference that has to be loaded before use.
pub enum Resolvable<T> {
    Direct(T),
    Deferred(Box<dyn Loader<T>>),
}

impl<T> Resolvable<T> {
    pub fn deferred<L>(loader: L) -> Self
    where
        L: Loader<T> + 'static,
    {
        Resolvable::Deferred(Box::new(loader))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Resolvable::Deferred(_))
    }

    /// Resolve in place. Once resolved the value is cached and every later
    /// call returns the same instance without loading again.
    pub fn resolve(&mut self) -> Result<&T> {
        self.resolve_loaded().map(|(value, _)| value)
    }

    /// Like [`resolve`](Self::resolve), also reporting whether this call ran
    /// the loader.
    pub fn resolve_loaded(&mut self) -> Result<(&T, bool)> {
        let mut loaded = false;
        if let Resolvable::Deferred(loader) = self {
            let value = loader.load()?;
            *self = Resolvable::Direct(value);
            loaded = true;
        }
        match self {
            Resolvable::Direct(value) => Ok((value, loaded)),
            Resolvable::Deferred(_) => Err(Error::ReferenceResolution(
                "reference left unresolved".to_string(),
            )),
        }
    }

    pub fn into_resolved(mut self) -> Result<T> {
        self.resolve()?;
        match self {
            Resolvable::Direct(value) => Ok(value),
            Resolvable::Deferred(_) => Err(Error::ReferenceResolution(
                "reference left unresolved".to_string(),
            )),
        }
    }
}

impl<T> From<T> for Resolvable<T> {
    fn from(value: T) -> Self {
        Resolvable::Direct(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolvable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolvable::Direct(value) => f.debug_tuple("Direct").field(value).finish(),
            Resolvable::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}
