//! Tenant of the request currently being handled.
//!
//! The pool never consults this; request handlers set it once and read it
//! back when asking for a client.

use std::future::Future;

tokio::task_local! {
    static TENANT_ID: String;
}

/// Run `future` with `tenant_id` as the current tenant.
pub async fn with_tenant<F>(tenant_id: impl Into<String>, future: F) -> F::Output
where
    F: Future,
{
    TENANT_ID.scope(tenant_id.into(), future).await
}

/// The tenant set by the innermost enclosing [`with_tenant`], if any.
pub fn current_tenant_id() -> Option<String> {
    TENANT_ID.try_with(Clone::clone).ok()
}
