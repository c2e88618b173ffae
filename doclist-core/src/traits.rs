use async_trait::async_trait;

use crate::domain::{Doctype, ListQuery, PermissionType, Row, SavepointName, SessionUser};
use crate::error::Result;

/// Decides whether a user may perform `ptype` on a doctype.
///
/// `parent` is set for child-table access, where rights derive from the
/// parent doctype.
#[async_trait]
pub trait PermissionChecker: Send + Sync {
    async fn has_permission(
        &self,
        user: &SessionUser,
        doctype: &Doctype,
        ptype: PermissionType,
        parent: Option<&Doctype>,
    ) -> Result<bool>;
}

/// Per-doctype extension hooks.
///
/// Every hook has a default that leaves behaviour unchanged, so handlers
/// only implement what they need.
pub trait DoctypeHandler: Send + Sync {
    /// Returns a replacement for `query`, or `None` to keep it.
    fn rewrite_list_query(
        &self,
        query: &ListQuery,
        user: &SessionUser,
    ) -> Result<Option<ListQuery>> {
        let _ = (query, user);
        Ok(None)
    }
}

/// One database transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait Transaction: Send {
    async fn savepoint(&mut self, name: &SavepointName) -> Result<()>;

    async fn release_savepoint(&mut self, name: &SavepointName) -> Result<()>;

    /// Undoes everything since `name` was created. The savepoint stays
    /// usable afterwards.
    async fn rollback_to_savepoint(&mut self, name: &SavepointName) -> Result<()>;

    /// Executes a list query. `debug` raises query logging to `info`.
    async fn fetch_list(&mut self, query: &ListQuery, debug: bool) -> Result<Vec<Row>>;

    /// Inserts a document and returns it as stored.
    async fn insert_doc(&mut self, doctype: &Doctype, doc: Row) -> Result<Row>;

    /// Updates the named document and returns it as stored.
    async fn update_doc(&mut self, doctype: &Doctype, name: &str, values: Row) -> Result<Row>;

    async fn delete_doc(&mut self, doctype: &Doctype, name: &str) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Source of transactions.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;
}
