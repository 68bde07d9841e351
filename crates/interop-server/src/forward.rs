//! Join Server role that relays to upstream Join Servers
//!
//! Requests are re-issued through the client router under the identity the
//! caller authenticated as, so the upstream Join Server sees the original
//! NetID or AS-ID. Session key IDs the router made up for upstreams that did
//! not send one are not relayed.

use async_trait::async_trait;
use tracing::debug;

use interop_client::{AppSKeyRequest, ClientRouter, HomeNsRequest, JoinRequest, JoinResponse};
use interop_common::protocol::session_key::is_generated_session_key_id;
use interop_common::protocol::{
    AnswerResult, AppSKeyAns, AppSKeyReq, HomeNsAns, HomeNsReq, JoinAns, JoinReq,
};
use interop_common::{Buffer, CallContext, ErrorKind, InteropError, ProtocolVersion, Result};

use crate::auth::Authenticated;
use crate::handler::JoinServer;

pub struct ForwardingJoinServer {
    router: ClientRouter,
}

/// Unroutable JoinEUIs are unknown to this receiver
fn map_route_error(err: InteropError) -> InteropError {
    if err.kind() == ErrorKind::NotRegistered {
        InteropError::new(ErrorKind::UnknownReceiver, err.message().to_string())
            .with_cause(err.message().to_string())
    } else {
        err
    }
}

fn relayed_session_key_id(id: Buffer) -> Buffer {
    if is_generated_session_key_id(id.as_slice()) {
        Buffer::default()
    } else {
        id
    }
}

fn wrong_role(expected: &str) -> InteropError {
    InteropError::new(
        ErrorKind::CallerNotAuthorized,
        format!("caller is not authenticated as {}", expected),
    )
}

impl ForwardingJoinServer {
    pub fn new(router: ClientRouter) -> Self {
        Self { router }
    }

    fn join_request(req: &JoinReq) -> Result<JoinRequest> {
        Ok(JoinRequest {
            transaction_id: req.header.transaction_id,
            join_eui: req.header.receiver_eui()?,
            dev_eui: req.dev_eui,
            dev_addr: req.dev_addr,
            mac_version: req.mac_version,
            phy_payload: req.phy_payload.clone(),
            dl_settings: req.dl_settings.clone(),
            rx_delay: req.rx_delay,
            cf_list: req.cf_list.clone(),
        })
    }

    fn join_answer(req: &JoinReq, response: JoinResponse) -> Result<JoinAns> {
        let keys = response.session_keys;
        let mut ans = JoinAns::new(req.header.answer_header()?, AnswerResult::success());
        ans.phy_payload = response.phy_payload;
        ans.lifetime = response.lifetime;
        if req.mac_version.is_legacy() {
            ans.nwk_s_key = keys.f_nwk_s_int_key;
        } else {
            ans.f_nwk_s_int_key = keys.f_nwk_s_int_key;
            ans.s_nwk_s_int_key = keys.s_nwk_s_int_key;
            ans.nwk_s_enc_key = keys.nwk_s_enc_key;
        }
        ans.app_s_key = keys.app_s_key;
        ans.session_key_id = relayed_session_key_id(keys.session_key_id);
        Ok(ans)
    }

    async fn relay_join(&self, ctx: &CallContext, auth: &Authenticated, req: JoinReq, rejoin: bool) -> Result<JoinAns> {
        let Authenticated::Network(_) = auth else {
            return Err(wrong_role("a Network Server"));
        };
        let net_id = req.header.sender_net_id()?;
        let request = Self::join_request(&req)?;
        debug!(
            correlation_id = %ctx.correlation_id(),
            join_eui = %request.join_eui,
            dev_eui = %request.dev_eui,
            rejoin,
            "Relaying join"
        );
        let response = if rejoin {
            self.router
                .do_rejoin(ctx, net_id, req.header.sender_ns_id, &request)
                .await
        } else {
            self.router
                .do_join(ctx, net_id, req.header.sender_ns_id, &request)
                .await
        }
        .map_err(map_route_error)?;
        Self::join_answer(&req, response)
    }
}

#[async_trait]
impl JoinServer for ForwardingJoinServer {
    async fn join(&self, ctx: &CallContext, auth: &Authenticated, req: JoinReq) -> Result<JoinAns> {
        self.relay_join(ctx, auth, req, false).await
    }

    async fn rejoin(&self, ctx: &CallContext, auth: &Authenticated, req: JoinReq) -> Result<JoinAns> {
        self.relay_join(ctx, auth, req, true).await
    }

    async fn app_s_key(&self, ctx: &CallContext, auth: &Authenticated, req: AppSKeyReq) -> Result<AppSKeyAns> {
        let Authenticated::Application(identity) = auth else {
            return Err(wrong_role("an Application Server"));
        };
        let request = AppSKeyRequest {
            transaction_id: req.header.transaction_id,
            join_eui: req.header.receiver_eui()?,
            dev_eui: req.dev_eui,
            session_key_id: req.session_key_id.clone(),
        };
        let response = self
            .router
            .do_app_s_key(ctx, &identity.as_id, &request)
            .await
            .map_err(map_route_error)?;

        let mut ans = AppSKeyAns::new(req.header.answer_header()?, AnswerResult::success());
        ans.dev_eui = Some(req.dev_eui);
        ans.app_s_key = Some(response.app_s_key);
        ans.session_key_id = response.session_key_id;
        Ok(ans)
    }

    async fn home_ns(&self, ctx: &CallContext, auth: &Authenticated, req: HomeNsReq) -> Result<HomeNsAns> {
        let Authenticated::Network(_) = auth else {
            return Err(wrong_role("a Network Server"));
        };
        let join_eui = req.header.receiver_eui()?;
        let request = HomeNsRequest {
            transaction_id: req.header.transaction_id,
            join_eui,
            dev_eui: req.dev_eui,
        };
        let response = self
            .router
            .do_home_ns(ctx, req.header.sender_net_id()?, req.header.sender_ns_id, &request)
            .await
            .map_err(map_route_error)?;

        let mut ans = HomeNsAns::new(req.header.answer_header()?, AnswerResult::success());
        ans.h_net_id = Some(response.h_net_id);
        // HNSID does not exist in 1.0
        if req.header.protocol_version == ProtocolVersion::V1_1 {
            ans.h_ns_id = response.h_ns_id;
        }
        Ok(ans)
    }
}
