//! Actions this service defines on its own namespace

/// Create roles
pub const CREATE_ROLES: &str = "CreateRoles";
/// Edit a role's name, permissions and bindings
pub const EDIT_ROLE: &str = "EditRole";
/// Create service accounts
pub const CREATE_SERVICE_ACCOUNTS: &str = "CreateServiceAccounts";
/// Edit a service account
pub const EDIT_SERVICE_ACCOUNT: &str = "EditServiceAccount";
/// Register services
pub const CREATE_SERVICES: &str = "CreateServices";
/// Edit a registered service
pub const EDIT_SERVICE: &str = "EditService";

pub const ROLES_ACTIONS: &[&str] = &[CREATE_ROLES, EDIT_ROLE];
pub const SERVICE_ACCOUNTS_ACTIONS: &[&str] = &[CREATE_SERVICE_ACCOUNTS, EDIT_SERVICE_ACCOUNT];
pub const SERVICES_ACTIONS: &[&str] = &[CREATE_SERVICES, EDIT_SERVICE];

/// Entity type an action applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionFamily {
    Roles,
    ServiceAccounts,
    Services,
}

impl ActionFamily {
    pub fn of(action: &str) -> Option<Self> {
        if ROLES_ACTIONS.contains(&action) {
            Some(Self::Roles)
        } else if SERVICE_ACCOUNTS_ACTIONS.contains(&action) {
            Some(Self::ServiceAccounts)
        } else if SERVICES_ACTIONS.contains(&action) {
            Some(Self::Services)
        } else {
            None
        }
    }
}

/// Every action in declaration order
pub fn all_actions() -> impl Iterator<Item = &'static str> {
    ROLES_ACTIONS
        .iter()
        .chain(SERVICE_ACCOUNTS_ACTIONS)
        .chain(SERVICES_ACTIONS)
        .copied()
}

/// Whether the action's resources are individual roles
pub fn is_role_scoped(action: &str) -> bool {
    action == EDIT_ROLE
}
