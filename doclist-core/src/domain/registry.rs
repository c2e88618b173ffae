//! Registry of per-doctype handlers and the list-query hook.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::doctype::Doctype;
use crate::domain::document::OWNER_FIELD;
use crate::domain::filter::Filter;
use crate::domain::ids::SessionUser;
use crate::domain::query::ListQuery;
use crate::error::Result;
use crate::traits::DoctypeHandler;

/// Maps doctype names to their handlers.
#[derive(Default, Clone)]
pub struct DoctypeRegistry {
    handlers: HashMap<Doctype, Arc<dyn DoctypeHandler>>,
}

impl DoctypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, doctype: Doctype, handler: Arc<dyn DoctypeHandler>) {
        self.handlers.insert(doctype, handler);
    }

    pub fn with_handler(mut self, doctype: Doctype, handler: Arc<dyn DoctypeHandler>) -> Self {
        self.register(doctype, handler);
        self
    }

    pub fn get(&self, doctype: &Doctype) -> Option<&Arc<dyn DoctypeHandler>> {
        self.handlers.get(doctype)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for DoctypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoctypeRegistry")
            .field("doctypes", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Lets the doctype's handler rewrite `query`.
///
/// The handler's replacement wins when it returns one; otherwise, or when no
/// handler is registered, `query` is returned unchanged.
pub fn apply_custom_filters(
    registry: &DoctypeRegistry,
    doctype: &Doctype,
    query: ListQuery,
    user: &SessionUser,
) -> Result<ListQuery> {
    let Some(handler) = registry.get(doctype) else {
        return Ok(query);
    };

    match handler.rewrite_list_query(&query, user)? {
        Some(rewritten) => {
            tracing::debug!(doctype = %doctype, "List query rewritten by doctype handler");
            Ok(rewritten)
        }
        None => Ok(query),
    }
}

/// Configuration of an [`OwnerScopedHandler`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerScopedRule {
    pub doctype: Doctype,
    #[serde(default)]
    pub bypass_roles: Vec<String>,
}

/// Restricts list queries to documents the session user owns, unless the
/// user holds one of the bypass roles.
#[derive(Debug, Clone, Default)]
pub struct OwnerScopedHandler {
    bypass_roles: Vec<String>,
}

impl OwnerScopedHandler {
    pub fn new(bypass_roles: Vec<String>) -> Self {
        Self { bypass_roles }
    }
}

impl DoctypeHandler for OwnerScopedHandler {
    fn rewrite_list_query(
        &self,
        query: &ListQuery,
        user: &SessionUser,
    ) -> Result<Option<ListQuery>> {
        if user.is_administrator() || user.has_any_role(&self.bypass_roles) {
            return Ok(None);
        }

        let scoped = query
            .clone()
            .where_filter(Filter::eq(OWNER_FIELD, user.user_id.as_str())?);
        Ok(Some(scoped))
    }
}

/// Builds a registry from owner-scoping rules.
pub fn registry_from_rules(rules: &[OwnerScopedRule]) -> DoctypeRegistry {
    rules.iter().fold(DoctypeRegistry::new(), |registry, rule| {
        registry.with_handler(
            rule.doctype.clone(),
            Arc::new(OwnerScopedHandler::new(rule.bypass_roles.clone())),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::query::OrderDirection;
    use crate::error::CoreError;
    use pretty_assertions::assert_eq;

    fn note() -> Doctype {
        Doctype::new("Note").unwrap()
    }

    struct Replace(ListQuery);

    impl DoctypeHandler for Replace {
        fn rewrite_list_query(
            &self,
            _query: &ListQuery,
            _user: &SessionUser,
        ) -> Result<Option<ListQuery>> {
            Ok(Some(self.0.clone()))
        }
    }

    struct Keep;

    impl DoctypeHandler for Keep {}

    struct Fails;

    impl DoctypeHandler for Fails {
        fn rewrite_list_query(
            &self,
            _query: &ListQuery,
            _user: &SessionUser,
        ) -> Result<Option<ListQuery>> {
            Err(CoreError::Internal("hook failed".to_string()))
        }
    }

    #[test]
    fn test_no_handler_keeps_query() {
        let query = ListQuery::new(note());
        let result = apply_custom_filters(
            &DoctypeRegistry::new(),
            &note(),
            query.clone(),
            &SessionUser::guest(),
        )
        .unwrap();
        assert_eq!(result, query);
    }

    #[test]
    fn test_handler_returning_none_keeps_query() {
        let registry = DoctypeRegistry::new().with_handler(note(), Arc::new(Keep));
        let query = ListQuery::new(note()).order_by("title", OrderDirection::Asc);
        let result =
            apply_custom_filters(&registry, &note(), query.clone(), &SessionUser::guest()).unwrap();
        assert_eq!(result, query);
    }

    #[test]
    fn test_handler_replacement_wins() {
        let replacement = ListQuery::new(note()).paginate(0, Some(1));
        let registry =
            DoctypeRegistry::new().with_handler(note(), Arc::new(Replace(replacement.clone())));
        let result = apply_custom_filters(
            &registry,
            &note(),
            ListQuery::new(note()),
            &SessionUser::guest(),
        )
        .unwrap();
        assert_eq!(result, replacement);
    }

    #[test]
    fn test_handler_error_propagates() {
        let registry = DoctypeRegistry::new().with_handler(note(), Arc::new(Fails));
        let result =
            apply_custom_filters(&registry, &note(), ListQuery::new(note()), &SessionUser::guest());
        assert!(result.is_err());
    }

    #[test]
    fn test_owner_scoped_handler() {
        let registry = registry_from_rules(&[OwnerScopedRule {
            doctype: note(),
            bypass_roles: vec!["Moderator".to_string()],
        }]);
        let user = SessionUser::new("jane@example.com", vec!["Member".to_string()]);
        let moderator = SessionUser::new("mod@example.com", vec!["Moderator".to_string()]);

        let scoped =
            apply_custom_filters(&registry, &note(), ListQuery::new(note()), &user).unwrap();
        assert_eq!(scoped.filters().len(), 1);
        assert_eq!(scoped.filters()[0].field, OWNER_FIELD);
        assert_eq!(scoped.filters()[0].value, serde_json::json!("jane@example.com"));

        let unscoped =
            apply_custom_filters(&registry, &note(), ListQuery::new(note()), &moderator).unwrap();
        assert!(unscoped.filters().is_empty());
    }
}
