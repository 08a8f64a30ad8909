//! Space Relay
//!
//! Moves data out of an in-memory data grid: a windowed cursor pages
//! through entity scans and query results, and a publish pipeline turns
//! batches of change operations into JSON messages on a durable queue,
//! tracking broker acknowledgments by correlation id.

pub mod change;
pub mod config;
pub mod cursor;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod publish;
pub mod retry;
pub mod schema;
pub mod serializer;
pub mod transport;

pub use change::{ChangeBatch, ChangeItem, FieldValue, Operation};
pub use config::{ConnectRetries, CursorConfig, RelayConfig, TransportConfig};
pub use cursor::{CursorEnumerator, CursorStats, QuerySource, Resolvable, ScanSession, ScanTarget};
pub use error::{Error, Result};
pub use publish::{AckState, CorrelationId, CorrelationTracker, PublishPipeline, PublishReceipt};
pub use schema::{EntitySchema, FieldDescriptor, SchemaProvider, SchemaRegistry};
pub use serializer::ChangeBatchSerializer;
pub use transport::{AckEvent, AckListener, SendOutcome, Transport};
