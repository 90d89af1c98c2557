//! Table schema resolution.
//!
//! The remote store describes a table as a JSON field tree. This module
//! converts it into a [`TableSchema`]: a numbered descriptor tree the encoder
//! walks, plus the serialized descriptor sent as the stream handshake.

mod descriptor;
mod handshake;
mod remote;
mod resolver;

pub use descriptor::{FieldDescriptor, FieldMode, FieldType, MessageDescriptor, ScalarKind, TableSchema};
pub use handshake::SchemaHandshake;
pub use remote::{RemoteField, RemoteTableSchema};
pub use resolver::SchemaResolver;
