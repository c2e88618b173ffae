//! Document methods under `doclist.client.*`.

use async_trait::async_trait;
use doclist_core::domain::{
    apply_custom_filters, get_query, parse_order_by, prepare_insert, prepare_update, Doctype,
    ListQuery, PermissionType, QuerySpec, Row, SessionUser,
};
use doclist_core::traits::Transaction;
use doclist_core::CoreError;
use serde_json::Value;

use crate::context::RequestContext;
use crate::dispatch::Method;
use crate::dto::ListArgs;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

pub const GET_LIST: &str = "doclist.client.get_list";
pub const GET_COUNT: &str = "doclist.client.get_count";
pub const INSERT: &str = "doclist.client.insert";
pub const SET_VALUE: &str = "doclist.client.set_value";
pub const DELETE: &str = "doclist.client.delete";
pub const PING: &str = "doclist.ping";

async fn has_permission(
    state: &AppState,
    user: &SessionUser,
    doctype: &Doctype,
    ptype: PermissionType,
    parent: Option<&Doctype>,
) -> ApiResult<bool> {
    Ok(state
        .permissions
        .has_permission(user, doctype, ptype, parent)
        .await?)
}

async fn require_permission(
    state: &AppState,
    user: &SessionUser,
    doctype: &Doctype,
    ptype: PermissionType,
) -> ApiResult<()> {
    if has_permission(state, user, doctype, ptype, None).await? {
        Ok(())
    } else {
        Err(CoreError::insufficient_permission(doctype).into())
    }
}

/// Listing needs `select` or `read`, evaluated on the parent for child
/// tables.
async fn check_list_permission(
    state: &AppState,
    user: &SessionUser,
    doctype: &Doctype,
    parent: Option<&Doctype>,
) -> ApiResult<()> {
    if has_permission(state, user, doctype, PermissionType::Select, parent).await?
        || has_permission(state, user, doctype, PermissionType::Read, parent).await?
    {
        return Ok(());
    }
    Err(CoreError::insufficient_permission(doctype).into())
}

/// Builds the query for `args`, applies each `order_by` declaration in
/// turn, then lets the doctype's handler rewrite it.
fn build_list_query(state: &AppState, user: &SessionUser, args: &ListArgs) -> ApiResult<ListQuery> {
    let mut query = get_query(
        args.doctype.clone(),
        QuerySpec {
            fields: args.fields.clone(),
            filters: args.filters.clone(),
            start: args.start(),
            limit: args.limit(),
            parent: args.parent.clone(),
        },
    )?;

    if let Some(order_by) = &args.order_by {
        for clause in parse_order_by(order_by) {
            query = query.order_by(clause.field, clause.direction);
        }
    }

    Ok(apply_custom_filters(&state.doctypes, &args.doctype, query, user)?)
}

/// Lists documents the user may see.
///
/// Fails with a permission error before anything is executed when the user
/// has neither `select` nor `read` on the doctype.
#[tracing::instrument(skip_all, fields(doctype = %args.doctype, user = %user.user_id))]
pub async fn get_list(
    state: &AppState,
    user: &SessionUser,
    args: ListArgs,
    tx: &mut dyn Transaction,
) -> ApiResult<Vec<Row>> {
    check_list_permission(state, user, &args.doctype, args.parent.as_ref()).await?;

    let query = build_list_query(state, user, &args)?;
    let rows = tx.fetch_list(&query, args.debug).await?;

    tracing::debug!(rows = rows.len(), "List query executed");
    Ok(rows)
}

/// Number of documents `get_list` would return without paging.
#[tracing::instrument(skip_all, fields(doctype = %args.doctype, user = %user.user_id))]
pub async fn get_count(
    state: &AppState,
    user: &SessionUser,
    args: ListArgs,
    tx: &mut dyn Transaction,
) -> ApiResult<u64> {
    check_list_permission(state, user, &args.doctype, args.parent.as_ref()).await?;

    let query = build_list_query(state, user, &args)?.to_count_query();
    let rows = tx.fetch_list(&query, args.debug).await?;

    rows.first()
        .and_then(|row| row.get("count"))
        .and_then(Value::as_u64)
        .ok_or_else(|| ApiError::Internal("count query returned no rows".to_string()))
}

fn object_arg(ctx: &RequestContext, key: &str) -> ApiResult<Row> {
    match ctx.json_arg(key)? {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(ApiError::Validation(format!(
            "{} must be an object, got {}",
            key, other
        ))),
        None => Err(ApiError::BadRequest(format!("{} is required", key))),
    }
}

pub struct GetList;

#[async_trait]
impl Method for GetList {
    async fn call(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
    ) -> ApiResult<Value> {
        let args = ListArgs::from_context(ctx)?;
        let rows = get_list(state, ctx.user(), args, tx).await?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }
}

pub struct GetCount;

#[async_trait]
impl Method for GetCount {
    async fn call(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
    ) -> ApiResult<Value> {
        let args = ListArgs::from_context(ctx)?;
        Ok(Value::from(get_count(state, ctx.user(), args, tx).await?))
    }
}

/// Inserts `doc`, whose `doctype` key names the target.
pub struct Insert;

#[async_trait]
impl Method for Insert {
    async fn call(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
    ) -> ApiResult<Value> {
        let doc = object_arg(ctx, "doc")?;
        let doctype = doc
            .get("doctype")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Validation("doc.doctype is required".to_string()))
            .and_then(|name| Doctype::new(name).map_err(ApiError::from))?;

        require_permission(state, ctx.user(), &doctype, PermissionType::Create).await?;

        let doc = prepare_insert(doc, ctx.user())?;
        let stored = tx.insert_doc(&doctype, doc).await?;
        tracing::info!(doctype = %doctype, user = %ctx.user().user_id, "Document inserted");
        Ok(Value::Object(stored))
    }
}

/// Sets one field (`fieldname` + `value`) or several (`fieldname` as an
/// object) on a document.
pub struct SetValue;

#[async_trait]
impl Method for SetValue {
    async fn call(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
    ) -> ApiResult<Value> {
        let doctype = Doctype::new(ctx.require_str("doctype")?)?;
        let name = ctx.require_str("name")?;

        let values = match ctx.json_arg("fieldname")? {
            Some(Value::Object(values)) => values,
            Some(Value::String(fieldname)) => {
                let value = ctx.get("value").cloned().unwrap_or(Value::Null);
                Row::from_iter([(fieldname, value)])
            }
            Some(other) => {
                return Err(ApiError::Validation(format!(
                    "fieldname must be a string or an object, got {}",
                    other
                )))
            }
            None => return Err(ApiError::BadRequest("fieldname is required".to_string())),
        };

        require_permission(state, ctx.user(), &doctype, PermissionType::Write).await?;

        let values = prepare_update(values, ctx.user())?;
        let stored = tx.update_doc(&doctype, &name, values).await?;
        Ok(Value::Object(stored))
    }
}

pub struct Delete;

#[async_trait]
impl Method for Delete {
    async fn call(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
    ) -> ApiResult<Value> {
        let doctype = Doctype::new(ctx.require_str("doctype")?)?;
        let name = ctx.require_str("name")?;

        require_permission(state, ctx.user(), &doctype, PermissionType::Delete).await?;

        tx.delete_doc(&doctype, &name).await?;
        tracing::info!(
            doctype = %doctype,
            name = %name,
            user = %ctx.user().user_id,
            "Document deleted"
        );
        Ok(Value::Null)
    }
}

pub struct Ping;

#[async_trait]
impl Method for Ping {
    fn allow_guest(&self) -> bool {
        true
    }

    async fn call(
        &self,
        _state: &AppState,
        _ctx: &RequestContext,
        _tx: &mut dyn Transaction,
    ) -> ApiResult<Value> {
        Ok(Value::from("pong"))
    }
}
