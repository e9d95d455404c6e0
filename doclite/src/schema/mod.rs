pub mod ddl;
pub mod names;
pub mod parser;
pub mod types;

pub use ddl::{build_table_ddl, GeneratedColumn, IndexPlan, TableDdl};
pub use names::{CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
pub use parser::{parse_schema, parse_schema_str};
pub use types::{FieldDef, IndexDef, SchemaBuilder, SchemaDef, SqlType, Validator};
