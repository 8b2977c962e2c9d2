use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// Inbound realtime events from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    /// Identity comes from the upgrade token; a mismatching id is ignored
    #[serde(rename = "registrar_usuario")]
    RegisterUser {
        #[serde(default)]
        usuario_id: Option<Uuid>,
    },

    #[serde(rename = "suscribir_conversacion")]
    Subscribe { conversacion_id: Uuid },

    #[serde(rename = "typing")]
    Typing {
        conversacion_id: Uuid,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },

    #[serde(rename = "incoming_call")]
    IncomingCall {
        conversacion_id: Uuid,
        to: Uuid,
        #[serde(default)]
        tipo: Option<String>,
        #[serde(default)]
        foto: Option<String>,
    },

    #[serde(rename = "rtc_join")]
    RtcJoin { conversacion_id: Uuid },

    #[serde(rename = "rtc_leave")]
    RtcLeave { conversacion_id: Uuid },

    #[serde(rename = "rtc_offer")]
    RtcOffer {
        to: Uuid,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },

    #[serde(rename = "rtc_answer")]
    RtcAnswer {
        to: Uuid,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },

    #[serde(rename = "rtc_ice_candidate")]
    RtcIceCandidate {
        to: Uuid,
        #[serde(flatten)]
        rest: Map<String, Value>,
    },
}
