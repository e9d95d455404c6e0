pub mod clock;
pub mod collection;
pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod ids;
pub mod options;
pub mod query;
pub mod schema;
pub mod store;
pub mod transaction;
pub mod validation;

pub use clock::{Clock, SystemClock};
pub use collection::{
    Collection, DeleteResult, FindAndModifyOptions, InsertManyResult, ReplaceOptions,
    ReturnDocument, UpdateResult,
};
pub use config::{IdStrategy, JournalMode, StoreConfig};
pub use document::Document;
pub use error::{DocliteError, Result};
pub use ids::IdGenerator;
pub use options::{CursorPosition, QueryOptions, SortDirection, SortKey};
pub use query::{op, Field, Filter, Query};
pub use schema::{FieldDef, IndexDef, SchemaDef, SqlType};
pub use store::{Store, StoreBuilder};
pub use transaction::transact;
