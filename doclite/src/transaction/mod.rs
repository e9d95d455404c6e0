//! All-or-nothing scopes over the store connection.
//!
//! The outermost scope issues `BEGIN IMMEDIATE`, taking SQLite's write lock
//! up front so a read and the write that depends on it cannot be split by
//! another connection's commit. Scopes opened while one is active become
//! savepoints. The engine lock is held for the life of the scope, so other
//! threads sharing the store wait until it finishes.

use crate::engine::{Engine, EngineState};
use crate::error::{DocliteError, Result};
use parking_lot::ReentrantMutexGuard;

enum ScopeKind {
    Root,
    Savepoint(String),
}

/// An open transaction or savepoint. Dropping it without calling
/// [`TxScope::commit`] rolls it back.
pub struct TxScope<'e> {
    state: ReentrantMutexGuard<'e, EngineState>,
    kind: ScopeKind,
    finished: bool,
}

impl<'e> TxScope<'e> {
    pub fn begin(engine: &'e Engine) -> Result<Self> {
        let state = engine.lock();
        let kind = if state.conn().is_autocommit() {
            run(&state, "BEGIN IMMEDIATE")?;
            ScopeKind::Root
        } else {
            let name = state.next_savepoint();
            run(&state, &format!("SAVEPOINT {name}"))?;
            ScopeKind::Savepoint(name)
        };
        log::trace!("transaction scope opened ({})", describe(&kind));
        Ok(TxScope {
            state,
            kind,
            finished: false,
        })
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, ScopeKind::Savepoint(_))
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        let sql = match &self.kind {
            ScopeKind::Root => "COMMIT".to_string(),
            ScopeKind::Savepoint(name) => format!("RELEASE {name}"),
        };
        if let Err(e) = run(&self.state, &sql) {
            if let Err(rb) = self.undo() {
                log::warn!("rollback after failed commit also failed: {rb}");
            }
            return Err(e);
        }
        log::trace!("transaction scope committed ({})", describe(&self.kind));
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.undo()
    }

    fn undo(&self) -> Result<()> {
        match &self.kind {
            ScopeKind::Root => {
                // A failed COMMIT or an engine-initiated abort may already
                // have ended the transaction.
                if self.state.conn().is_autocommit() {
                    return Ok(());
                }
                run(&self.state, "ROLLBACK")?;
            }
            ScopeKind::Savepoint(name) => {
                run(&self.state, &format!("ROLLBACK TO {name}"))?;
                run(&self.state, &format!("RELEASE {name}"))?;
            }
        }
        log::trace!("transaction scope rolled back ({})", describe(&self.kind));
        Ok(())
    }
}

impl Drop for TxScope<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.undo() {
                log::warn!("failed to roll back abandoned transaction scope: {e}");
            }
        }
    }
}

fn run(state: &EngineState, sql: &str) -> Result<()> {
    log::debug!("{sql}");
    state
        .conn()
        .execute_batch(sql)
        .map_err(|e| DocliteError::Transaction(format!("{sql} failed: {e}")))
}

fn describe(kind: &ScopeKind) -> &str {
    match kind {
        ScopeKind::Root => "root",
        ScopeKind::Savepoint(name) => name,
    }
}

/// Run `body` atomically. Commits when it returns `Ok`; otherwise rolls
/// back and hands back the body's error unchanged.
pub fn transact<R, E, F>(engine: &Engine, body: F) -> std::result::Result<R, E>
where
    F: FnOnce() -> std::result::Result<R, E>,
    E: From<DocliteError>,
{
    let scope = TxScope::begin(engine)?;
    match body() {
        Ok(value) => {
            scope.commit()?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = scope.rollback() {
                log::warn!("rollback failed: {rb}");
            }
            Err(e)
        }
    }
}
