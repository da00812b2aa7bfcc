/// Who is making a request.  Tenants see only their own resources; administrators see all of them
/// and may change reference data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant_id: String,
    pub is_admin: bool,
}

impl RequestContext {
    pub fn tenant<S: Into<String>>(tenant_id: S) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            is_admin: false,
        }
    }

    pub fn admin<S: Into<String>>(tenant_id: S) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            is_admin: true,
        }
    }

    /// Whether this caller may see a resource owned by `tenant_id`.
    pub fn can_access(&self, tenant_id: &str) -> bool {
        self.is_admin || self.tenant_id == tenant_id
    }
}
