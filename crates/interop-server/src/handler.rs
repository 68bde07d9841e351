//! Role handlers behind the dispatcher
//!
//! Handlers see authenticated, fully parsed requests. They return the typed
//! answer or an error; the dispatcher turns either into a well-formed answer
//! and always sets the answer header itself.

use async_trait::async_trait;

use interop_common::protocol::{AppSKeyAns, AppSKeyReq, HomeNsAns, HomeNsReq, JoinAns, JoinReq};
use interop_common::{CallContext, Result};

use crate::auth::Authenticated;

#[async_trait]
pub trait JoinServer: Send + Sync {
    async fn join(&self, ctx: &CallContext, auth: &Authenticated, req: JoinReq) -> Result<JoinAns>;

    async fn rejoin(&self, ctx: &CallContext, auth: &Authenticated, req: JoinReq) -> Result<JoinAns>;

    async fn app_s_key(
        &self,
        ctx: &CallContext,
        auth: &Authenticated,
        req: AppSKeyReq,
    ) -> Result<AppSKeyAns>;

    async fn home_ns(&self, ctx: &CallContext, auth: &Authenticated, req: HomeNsReq) -> Result<HomeNsAns>;
}

/// Home network lookup by device registry; preferred over the Join Server
#[async_trait]
pub trait IdentityServer: Send + Sync {
    async fn home_ns(&self, ctx: &CallContext, auth: &Authenticated, req: HomeNsReq) -> Result<HomeNsAns>;
}
