//! Knowledge-base chat: lexical retrieval over local documents, prompt
//! templates, and the CSV column-mapping batch.

pub mod chat;
pub mod error;
pub mod fields;
pub mod prompts;
pub mod service;

pub use chat::{
    build_column_query, ColumnResult, KbChatEngine, KbChatParams, KbChatResult, NO_DOCS_NOTICE,
    QUERY_TEMPLATE_ALL_IN_ONE,
};
pub use error::KbError;
pub use fields::{read_fields, FieldMap};
pub use service::{Document, KbRegistry, KbService, MemoryKbService, ScoredDocument};
