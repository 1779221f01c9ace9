//! AM source for this service's own namespace

use super::catalog::{self, ActionFamily};
use super::AmSource;
use crate::error::Result;
use crate::permission::{SEPARATOR, WILDCARD};
use crate::store::RolesStore;
use crate::types::AmEntry;
use async_trait::async_trait;
use std::sync::Arc;

/// Enumerates the built-in action catalog and, for role-scoped actions, roles
pub struct LocalAmSource {
    roles: Arc<dyn RolesStore>,
    role_suggestion_limit: usize,
}

impl LocalAmSource {
    pub fn new(roles: Arc<dyn RolesStore>, role_suggestion_limit: usize) -> Self {
        Self {
            roles,
            role_suggestion_limit,
        }
    }

    fn list_actions(&self, action_prefix: &str) -> Vec<AmEntry> {
        catalog::all_actions()
            .filter(|action| action.starts_with(action_prefix))
            .map(AmEntry::partial)
            .collect()
    }

    async fn list_resources(&self, action: &str, resource_prefix: &str) -> Result<Vec<AmEntry>> {
        if ActionFamily::of(action).is_none() {
            return Ok(Vec::new());
        }

        let mut entries = vec![AmEntry::complete(format!(
            "{}{}{}",
            action, SEPARATOR, WILDCARD
        ))];

        if catalog::is_role_scoped(action) {
            let roles = self
                .roles
                .with_name_prefix(resource_prefix, self.role_suggestion_limit)
                .await?;
            entries.extend(roles.into_iter().map(|role| {
                AmEntry::complete(format!("{}{}{}", action, SEPARATOR, role.id))
                    .with_alias(role.name)
            }));
        }

        Ok(entries)
    }
}

#[async_trait]
impl AmSource for LocalAmSource {
    async fn list(&self, prefix: &str) -> Result<Vec<AmEntry>> {
        let parts: Vec<&str> = prefix.split(SEPARATOR).collect();
        match parts.as_slice() {
            [action_prefix] => Ok(self.list_actions(action_prefix)),
            [action, resource_prefix] => self.list_resources(action, resource_prefix).await,
            _ => Ok(Vec::new()),
        }
    }
}
