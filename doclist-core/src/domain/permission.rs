use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::domain::doctype::Doctype;
use crate::domain::ids::SessionUser;
use crate::error::Result;
use crate::traits::PermissionChecker;

/// Document-level permission types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionType {
    /// May list documents (only the requested columns)
    Select,
    /// May read full documents
    Read,
    Write,
    Create,
    Delete,
}

impl PermissionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionType::Select => "select",
            PermissionType::Read => "read",
            PermissionType::Write => "write",
            PermissionType::Create => "create",
            PermissionType::Delete => "delete",
        }
    }
}

impl fmt::Display for PermissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grants a role a set of permission types on one doctype.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocPermRule {
    pub doctype: Doctype,
    pub role: String,
    #[serde(default)]
    pub select: bool,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub delete: bool,
}

impl DocPermRule {
    pub fn read_only(doctype: Doctype, role: impl Into<String>) -> Self {
        Self {
            doctype,
            role: role.into(),
            select: true,
            read: true,
            write: false,
            create: false,
            delete: false,
        }
    }

    pub fn full(doctype: Doctype, role: impl Into<String>) -> Self {
        Self {
            doctype,
            role: role.into(),
            select: true,
            read: true,
            write: true,
            create: true,
            delete: true,
        }
    }

    /// `read` implies `select`.
    pub fn grants(&self, ptype: PermissionType) -> bool {
        match ptype {
            PermissionType::Select => self.select || self.read,
            PermissionType::Read => self.read,
            PermissionType::Write => self.write,
            PermissionType::Create => self.create,
            PermissionType::Delete => self.delete,
        }
    }
}

/// Role-based permission checker backed by a static rule table.
///
/// `Administrator` passes every check. When a parent doctype is supplied
/// the rules of the parent apply, since child-table rows are only reachable
/// through their parent document.
#[derive(Debug, Clone, Default)]
pub struct RolePermissionChecker {
    rules: HashMap<Doctype, Vec<DocPermRule>>,
}

impl RolePermissionChecker {
    pub fn new(rules: impl IntoIterator<Item = DocPermRule>) -> Self {
        let mut by_doctype: HashMap<Doctype, Vec<DocPermRule>> = HashMap::new();
        for rule in rules {
            by_doctype.entry(rule.doctype.clone()).or_default().push(rule);
        }
        Self { rules: by_doctype }
    }

    pub fn rules_for(&self, doctype: &Doctype) -> &[DocPermRule] {
        self.rules.get(doctype).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn check(
        &self,
        user: &SessionUser,
        doctype: &Doctype,
        ptype: PermissionType,
        parent: Option<&Doctype>,
    ) -> bool {
        if user.is_administrator() {
            return true;
        }

        let target = parent.unwrap_or(doctype);
        self.rules_for(target)
            .iter()
            .any(|rule| user.has_role(&rule.role) && rule.grants(ptype))
    }
}

#[async_trait]
impl PermissionChecker for RolePermissionChecker {
    async fn has_permission(
        &self,
        user: &SessionUser,
        doctype: &Doctype,
        ptype: PermissionType,
        parent: Option<&Doctype>,
    ) -> Result<bool> {
        let allowed = self.check(user, doctype, ptype, parent);
        tracing::debug!(
            user = %user.user_id,
            doctype = %doctype,
            ptype = %ptype,
            parent = parent.map(|p| p.as_str()),
            allowed,
            "Permission check"
        );
        Ok(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note() -> Doctype {
        Doctype::new("Note").unwrap()
    }

    #[test]
    fn test_read_implies_select() {
        let rule = DocPermRule {
            doctype: note(),
            role: "Reader".to_string(),
            select: false,
            read: true,
            write: false,
            create: false,
            delete: false,
        };
        assert!(rule.grants(PermissionType::Select));
        assert!(!rule.grants(PermissionType::Write));
    }

    #[test]
    fn test_role_match_required() {
        let checker = RolePermissionChecker::new(vec![DocPermRule::read_only(note(), "Reader")]);
        let reader = SessionUser::new("r@example.com", vec!["Reader".to_string()]);
        let other = SessionUser::new("o@example.com", vec!["Sales".to_string()]);

        assert!(checker.check(&reader, &note(), PermissionType::Read, None));
        assert!(!checker.check(&reader, &note(), PermissionType::Delete, None));
        assert!(!checker.check(&other, &note(), PermissionType::Read, None));
    }

    #[test]
    fn test_administrator_bypasses_rules() {
        let checker = RolePermissionChecker::default();
        assert!(checker.check(
            &SessionUser::administrator(),
            &note(),
            PermissionType::Delete,
            None
        ));
    }

    #[test]
    fn test_parent_rules_apply_to_child_table() {
        let child = Doctype::new("Note Item").unwrap();
        let checker = RolePermissionChecker::new(vec![DocPermRule::read_only(note(), "Reader")]);
        let reader = SessionUser::new("r@example.com", vec!["Reader".to_string()]);

        assert!(!checker.check(&reader, &child, PermissionType::Read, None));
        assert!(checker.check(&reader, &child, PermissionType::Read, Some(&note())));
    }
}
