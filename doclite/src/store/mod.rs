use crate::clock::{Clock, SystemClock};
use crate::collection::{Collection, CollectionInner};
use crate::config::StoreConfig;
use crate::engine::Engine;
use crate::error::{DocliteError, Result};
use crate::ids::IdGenerator;
use crate::schema::names::quote_ident;
use crate::schema::{build_table_ddl, SchemaDef, TableDdl};
use crate::transaction::transact;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

type Registry = HashMap<String, Arc<dyn Any + Send + Sync>>;

/// The main entry point for doclite.
/// Owns the database connection and the registry of open collections.
/// Cloning is cheap; clones share the connection and registry.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    engine: Arc<Engine>,
    config: StoreConfig,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
}

impl Store {
    /// Open (or create) the database described by `config`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Store::builder().config(config).open()
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Store::open(StoreConfig::in_memory())
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn engine(&self) -> &Engine {
        &self.inner.engine
    }

    /// Get the collection `name`, creating its table and indexes on first
    /// use. The first schema registered for a name wins; later calls get
    /// the existing handle. Asking for a registered name with a different
    /// payload type is an `InvalidOperation`.
    pub fn collection<T>(&self, name: &str, schema: SchemaDef<T>) -> Result<Collection<T>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        if let Some(existing) = self.registered(name) {
            return downcast(name, existing);
        }

        // DDL runs without the registry lock held; two racing callers both
        // run it and the IF NOT EXISTS statements converge.
        let ddl = build_table_ddl(name, &schema)?;
        self.materialize(&ddl)?;

        let created: Arc<dyn Any + Send + Sync> = Arc::new(CollectionInner::new(
            ddl,
            schema,
            Arc::clone(&self.inner.engine),
            Arc::clone(&self.inner.ids),
            Arc::clone(&self.inner.clock),
        ));
        let winner = Arc::clone(
            self.inner
                .registry
                .lock()
                .entry(name.to_string())
                .or_insert(created),
        );
        downcast(name, winner)
    }

    /// The already-open collection `name`, if it holds `T` payloads.
    pub fn get_collection<T>(&self, name: &str) -> Option<Collection<T>>
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        let existing = self.registered(name)?;
        match downcast(name, existing) {
            Ok(collection) => Some(collection),
            Err(e) => {
                log::debug!("{e}");
                None
            }
        }
    }

    /// Names of the collections opened through this store, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.registry.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop the table behind `name` and forget its handle. Returns whether
    /// a table existed. Handles already given out fail on their next use.
    pub fn drop_collection(&self, name: &str) -> Result<bool> {
        self.inner.registry.lock().remove(name);
        let existed = !self.inner.engine.table_columns(name)?.is_empty();
        if existed {
            self.inner
                .engine
                .execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(name)))?;
            log::info!("dropped collection '{name}'");
        }
        Ok(existed)
    }

    /// Run `body` in a transaction scope: committed on `Ok`, rolled back on
    /// `Err`. Collection operations inside `body` join the scope.
    pub fn transact<R, E, F>(&self, body: F) -> std::result::Result<R, E>
    where
        E: From<DocliteError>,
        F: FnOnce() -> std::result::Result<R, E>,
    {
        transact(&self.inner.engine, body)
    }

    fn registered(&self, name: &str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.inner.registry.lock().get(name).cloned()
    }

    /// Create the table, or bring an existing one up to the schema by adding
    /// missing generated columns, then create the indexes.
    fn materialize(&self, ddl: &TableDdl) -> Result<()> {
        let engine = &self.inner.engine;
        transact(engine, || {
            let existing = engine.table_columns(&ddl.table)?;
            if existing.is_empty() {
                engine.execute_batch(&ddl.create_table)?;
                log::info!("created collection table '{}'", ddl.table);
            } else {
                let missing = ddl
                    .generated_columns
                    .iter()
                    .filter(|c| !existing.contains(&c.field));
                for column in missing {
                    match engine.execute_batch(&ddl.add_column_statement(column)) {
                        Ok(()) => log::info!(
                            "added generated column '{}' to '{}'",
                            column.field,
                            ddl.table
                        ),
                        Err(e) if e.to_string().contains("duplicate column") => log::warn!(
                            "generated column '{}' on '{}' was added concurrently",
                            column.field,
                            ddl.table
                        ),
                        Err(e) => return Err(e),
                    }
                }
            }
            for sql in ddl.create_index_statements() {
                engine.execute_batch(sql)?;
            }
            Ok(())
        })
    }
}

fn downcast<T>(name: &str, entry: Arc<dyn Any + Send + Sync>) -> Result<Collection<T>>
where
    T: 'static,
{
    entry
        .downcast::<CollectionInner<T>>()
        .map(Collection::from_inner)
        .map_err(|_| {
            DocliteError::InvalidOperation(format!(
                "Collection '{name}' is already open with a different document type"
            ))
        })
}

/// Builder for a [`Store`] with a custom id generator or clock.
#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    id_generator: Option<Arc<dyn IdGenerator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl StoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Overrides the generator picked by `config.id_strategy`.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(ids);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn open(self) -> Result<Store> {
        let engine = Engine::open(&self.config)?;
        let ids = self
            .id_generator
            .unwrap_or_else(|| self.config.id_strategy.generator());
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        Ok(Store {
            inner: Arc::new(StoreInner {
                engine: Arc::new(engine),
                config: self.config,
                ids,
                clock,
                registry: Mutex::new(HashMap::new()),
            }),
        })
    }
}
