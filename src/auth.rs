use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

use crate::model::ResourceInfo;

/// Shared cleartext password for every login; the login name becomes the
/// requester identity.
#[derive(Debug)]
pub struct CampoAuthSource {
    password: String,
}

impl CampoAuthSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for CampoAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Permission checks consulted before every mutation.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// May `requester` reserve slots on this resource?
    async fn can_book(&self, requester: &str, resource: &ResourceInfo) -> bool;

    /// Does `requester` own or administer this resource?
    async fn can_administer(&self, requester: &str, resource: &ResourceInfo) -> bool;
}

/// Owners administer their resources; anyone may book an active one.
#[derive(Debug, Default, Clone)]
pub struct OwnerAuthorizer {
    admins: Vec<String>,
}

impl OwnerAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Users allowed to administer every resource.
    pub fn with_admins(admins: Vec<String>) -> Self {
        Self { admins }
    }
}

#[async_trait]
impl Authorizer for OwnerAuthorizer {
    async fn can_book(&self, requester: &str, _resource: &ResourceInfo) -> bool {
        !requester.is_empty()
    }

    async fn can_administer(&self, requester: &str, resource: &ResourceInfo) -> bool {
        resource.owner == requester || self.admins.iter().any(|a| a == requester)
    }
}
