//! Requests and responses of the client RPCs
//!
//! These are what the application works with; the router turns them into
//! protocol messages for the version each Join Server speaks.

use interop_common::protocol::session_key::generate_session_key_id;
use interop_common::protocol::{AppSKeyAns, HomeNsAns, JoinAns};
use interop_common::types::{KeyEnvelope, RxDelay};
use interop_common::{Buffer, DevAddr, Eui64, InteropError, MacVersion, NetId, ProtocolVersion, Result};

/// Join or rejoin request of a Network Server
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRequest {
    pub transaction_id: u32,
    pub join_eui: Eui64,
    pub dev_eui: Eui64,
    pub dev_addr: DevAddr,
    pub mac_version: MacVersion,
    pub phy_payload: Buffer,
    pub dl_settings: Buffer,
    pub rx_delay: RxDelay,
    pub cf_list: Buffer,
}

/// Session keys derived by the Join Server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionKeys {
    pub session_key_id: Buffer,
    /// FNwkSIntKey; NwkSKey for LoRaWAN 1.0.x devices
    pub f_nwk_s_int_key: Option<KeyEnvelope>,
    pub s_nwk_s_int_key: Option<KeyEnvelope>,
    pub nwk_s_enc_key: Option<KeyEnvelope>,
    pub app_s_key: Option<KeyEnvelope>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinResponse {
    /// Join-accept
    pub phy_payload: Buffer,
    /// Session lifetime in seconds
    pub lifetime: Option<u32>,
    pub session_keys: SessionKeys,
}

impl JoinResponse {
    pub(crate) fn from_answer(
        ans: JoinAns,
        mac_version: MacVersion,
        protocol: ProtocolVersion,
    ) -> Result<Self> {
        if ans.phy_payload.is_empty() {
            return Err(InteropError::malformed("JoinAns without PHYPayload"));
        }
        let f_nwk_s_int_key = if mac_version.is_legacy() {
            ans.nwk_s_key
        } else {
            ans.f_nwk_s_int_key
        };
        let session_key_id = if ans.session_key_id.is_empty() && protocol == ProtocolVersion::V1_1 {
            generate_session_key_id()
        } else {
            ans.session_key_id
        };
        Ok(Self {
            phy_payload: ans.phy_payload,
            lifetime: ans.lifetime,
            session_keys: SessionKeys {
                session_key_id,
                f_nwk_s_int_key,
                s_nwk_s_int_key: ans.s_nwk_s_int_key,
                nwk_s_enc_key: ans.nwk_s_enc_key,
                app_s_key: ans.app_s_key,
            },
        })
    }
}

/// Application session key request of an Application Server
#[derive(Debug, Clone, PartialEq)]
pub struct AppSKeyRequest {
    pub transaction_id: u32,
    pub join_eui: Eui64,
    pub dev_eui: Eui64,
    pub session_key_id: Buffer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppSKeyResponse {
    pub app_s_key: KeyEnvelope,
    pub session_key_id: Buffer,
}

impl AppSKeyResponse {
    pub(crate) fn from_answer(ans: AppSKeyAns, request: &AppSKeyRequest) -> Result<Self> {
        let app_s_key = ans
            .app_s_key
            .ok_or_else(|| InteropError::malformed("AppSKeyAns without AppSKey"))?;
        let session_key_id = if ans.session_key_id.is_empty() {
            request.session_key_id.clone()
        } else {
            ans.session_key_id
        };
        Ok(Self {
            app_s_key,
            session_key_id,
        })
    }
}

/// Home Network lookup of a Network Server
#[derive(Debug, Clone, PartialEq)]
pub struct HomeNsRequest {
    pub transaction_id: u32,
    pub join_eui: Eui64,
    pub dev_eui: Eui64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HomeNsResponse {
    pub h_net_id: NetId,
    /// Home Network Server ID, 1.1 only
    pub h_ns_id: Option<Eui64>,
}

impl HomeNsResponse {
    pub(crate) fn from_answer(ans: HomeNsAns) -> Result<Self> {
        let h_net_id = ans
            .h_net_id
            .ok_or_else(|| InteropError::malformed("HomeNSAns without HNetID"))?;
        Ok(Self {
            h_net_id,
            h_ns_id: ans.h_ns_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use interop_common::protocol::session_key::is_generated_session_key_id;
    use interop_common::protocol::{AnswerResult, MessageHeader};
    use interop_common::MessageType;

    fn join_ans() -> JoinAns {
        let header = MessageHeader::new(ProtocolVersion::V1_1, MessageType::JoinAns, "70B3D57ED0000000", "000013");
        let mut ans = JoinAns::new(header, AnswerResult::success());
        ans.phy_payload = Buffer(vec![0x20, 0x01]);
        ans.nwk_s_key = Some(KeyEnvelope::Plain { key: [0x01; 16] });
        ans.f_nwk_s_int_key = Some(KeyEnvelope::Plain { key: [0x02; 16] });
        ans
    }

    #[test]
    fn test_f_nwk_s_int_key_alias() {
        let legacy = JoinResponse::from_answer(join_ans(), MacVersion::V1_0_3, ProtocolVersion::V1_1).unwrap();
        assert_eq!(legacy.session_keys.f_nwk_s_int_key, Some(KeyEnvelope::Plain { key: [0x01; 16] }));

        let modern = JoinResponse::from_answer(join_ans(), MacVersion::V1_1, ProtocolVersion::V1_1).unwrap();
        assert_eq!(modern.session_keys.f_nwk_s_int_key, Some(KeyEnvelope::Plain { key: [0x02; 16] }));
    }

    #[test]
    fn test_session_key_id_synthesis() {
        let res = JoinResponse::from_answer(join_ans(), MacVersion::V1_1, ProtocolVersion::V1_1).unwrap();
        assert!(is_generated_session_key_id(res.session_keys.session_key_id.as_slice()));

        let res = JoinResponse::from_answer(join_ans(), MacVersion::V1_1, ProtocolVersion::V1_0).unwrap();
        assert!(res.session_keys.session_key_id.is_empty());

        let mut ans = join_ans();
        ans.session_key_id = Buffer(vec![0xAB]);
        let res = JoinResponse::from_answer(ans, MacVersion::V1_1, ProtocolVersion::V1_1).unwrap();
        assert_eq!(res.session_keys.session_key_id, Buffer(vec![0xAB]));
    }
}
