//! Relay wire protocol
//!
//! Every frame exchanged with the relay is a JSON object tagged by a `type`
//! discriminator. Peer-addressed messages carry a `targetId` set by the
//! sending client; the relay stamps the source into `clientId` before
//! fanning the message out.

use serde::{Deserialize, Serialize};

/// Response to (or withdrawal of) a transfer offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferAction {
    Accept,
    Reject,
    Cancel,
}

/// One entry in a network roster snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_name: Option<String>,
}

/// An SDP session description as carried over the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptionModel {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

/// An ICE candidate as carried over the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidateModel {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Subset of an RTCConfiguration the relay may suggest in its welcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcConfigurationModel {
    #[serde(default)]
    pub ice_servers: Vec<IceServerModel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerModel {
    pub urls: UrlList,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// `urls` may be a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UrlList {
    One(String),
    Many(Vec<String>),
}

impl UrlList {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            UrlList::One(url) => vec![url.clone()],
            UrlList::Many(urls) => urls.clone(),
        }
    }
}

/// Messages exchanged with the relay, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RelayMessage {
    /// Initial handshake from the relay.
    #[serde(rename_all = "camelCase")]
    Welcome {
        client_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        suggested_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rtc_configuration: Option<RtcConfigurationModel>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notice_url: Option<String>,
    },

    /// Sent by a client to claim a network name.
    #[serde(rename_all = "camelCase")]
    NetworkName { network_name: String },

    /// Current roster snapshot for the joined network.
    Network { clients: Vec<ClientInfo> },

    /// Offer a file to a peer.
    #[serde(rename_all = "camelCase")]
    Transfer {
        transfer_id: String,
        file_name: String,
        file_size: u64,
        file_type: String,
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Respond to, or withdraw, a transfer offer.
    #[serde(rename_all = "camelCase")]
    Action {
        transfer_id: String,
        action: TransferAction,
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Exchange connection descriptors for one transfer.
    #[serde(rename_all = "camelCase")]
    RtcDescription {
        transfer_id: String,
        target_id: String,
        data: SessionDescriptionModel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Exchange connectivity candidates for one transfer.
    #[serde(rename_all = "camelCase")]
    RtcCandidate {
        transfer_id: String,
        target_id: String,
        data: IceCandidateModel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Keepalive; echoed back verbatim.
    Ping { timestamp: f64 },

    /// Opaque envelope wrapping any of the above; encryption is handled
    /// outside this client, so the payload is never inspected here.
    #[serde(rename_all = "camelCase")]
    Encrypted {
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Out-of-band text, logged only.
    #[serde(rename_all = "camelCase")]
    Chat {
        message: String,
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },
}
