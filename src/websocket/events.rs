//! Outbound realtime events
//!
//! Every frame is `{"event": <name>, "data": <payload>}`. Payload field
//! names and enumerated values follow the established client protocol.

use crate::error::AppResult;
use crate::models::{DeleteMode, DeliveryState, Message};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "mensaje_recibido")]
    MessageReceived(MessagePayload),

    #[serde(rename = "mensaje_editado")]
    MessageEdited {
        tipo: &'static str,
        mensaje_id: Uuid,
        conversacion_id: Uuid,
        cuerpo: String,
        editado_en: Option<DateTime<Utc>>,
    },

    #[serde(rename = "mensaje_eliminado")]
    MessageDeleted {
        tipo: &'static str,
        modo: &'static str,
        mensaje_id: Uuid,
        conversacion_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        usuario_id: Option<Uuid>,
        #[serde(skip_serializing_if = "Option::is_none")]
        texto: Option<String>,
    },

    #[serde(rename = "estado_mensaje_inicial")]
    InitialDeliveryStates {
        mensaje_id: Uuid,
        conversacion_id: Uuid,
        estados: Vec<RecipientState>,
    },

    #[serde(rename = "reaccion_recibida")]
    ReactionReceived {
        mensaje_id: Uuid,
        usuario_id: Uuid,
        /// `None` when the reaction was removed
        emoji: Option<String>,
    },

    #[serde(rename = "usuario_salio_grupo")]
    MemberLeft {
        conversacion_id: Uuid,
        usuario_id: Uuid,
        nombre_salida: String,
        actor_id: Uuid,
        actor_nombre: String,
        es_salida_propia: bool,
        nuevo_admin_id: Option<Uuid>,
    },

    #[serde(rename = "nuevo_admin_grupo")]
    AdminChanged {
        conversacion_id: Uuid,
        nuevo_admin_id: Uuid,
        nombre: String,
    },

    #[serde(rename = "miembro_agregado")]
    MemberAdded {
        conversacion_id: Uuid,
        nuevo_id: Uuid,
        admin_id: Uuid,
        admin_visible: String,
        nuevo_visible: String,
    },

    #[serde(rename = "nuevo_chat")]
    NewChat {
        id: Uuid,
        titulo: Option<String>,
        es_grupo: bool,
    },

    #[serde(rename = "conversacion_creada")]
    ConversationCreated {
        tipo: &'static str,
        creador_id: Uuid,
        conversacion: ConversationRef,
    },

    #[serde(rename = "usuario_estado")]
    PresenceChanged {
        usuario_id: Uuid,
        online: bool,
        last_seen: DateTime<Utc>,
    },

    /// Client payload relayed as-is with `usuario_id` forced to the sender
    #[serde(rename = "typing")]
    Typing(Value),

    #[serde(rename = "incoming_call")]
    IncomingCall {
        conversacion_id: Uuid,
        from: Uuid,
        to: Uuid,
        tipo: Option<String>,
        foto: Option<String>,
        nombre: String,
    },

    #[serde(rename = "rtc_offer")]
    RtcOffer(Value),

    #[serde(rename = "rtc_answer")]
    RtcAnswer(Value),

    #[serde(rename = "rtc_ice_candidate")]
    RtcIceCandidate(Value),

    #[serde(rename = "rtc_peer_joined")]
    RtcPeerJoined(RtcPeer),

    #[serde(rename = "rtc_user_joined")]
    RtcUserJoined(RtcPeer),

    #[serde(rename = "rtc_user_left")]
    RtcUserLeft(RtcPeer),
}

#[derive(Debug, Clone, Serialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub usuario_id: Option<Uuid>,
    pub conversacion_id: Uuid,
    pub cuerpo: String,
    pub tipo: &'static str,
    pub creado_en: DateTime<Utc>,
    pub mensaje_id_respuesta: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_adjunto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tipo_adjunto: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tamano_adjunto: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nombre_archivo: Option<String>,
}

impl From<&Message> for MessagePayload {
    fn from(message: &Message) -> Self {
        let attachment = message.attachment.as_ref();
        Self {
            id: message.id,
            usuario_id: message.sender_id,
            conversacion_id: message.conversation_id,
            cuerpo: message.body.clone(),
            tipo: message.kind.wire_name(),
            creado_en: message.created_at,
            mensaje_id_respuesta: message.reply_to_id,
            url_adjunto: attachment.map(|a| a.url.clone()),
            tipo_adjunto: attachment.map(|a| a.category.clone()),
            tamano_adjunto: attachment.map(|a| a.size),
            nombre_archivo: attachment.map(|a| a.file_name.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientState {
    pub usuario_id: Uuid,
    pub estado: &'static str,
}

impl RecipientState {
    pub fn new(usuario_id: Uuid, state: DeliveryState) -> Self {
        Self {
            usuario_id,
            estado: state.wire_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationRef {
    pub id: Uuid,
    pub es_grupo: bool,
    pub titulo: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RtcPeer {
    pub conversacion_id: Uuid,
    pub user_id: Uuid,
}

impl OutboundEvent {
    pub fn message_edited(message: &Message) -> Self {
        OutboundEvent::MessageEdited {
            tipo: "mensaje_editado",
            mensaje_id: message.id,
            conversacion_id: message.conversation_id,
            cuerpo: message.body.clone(),
            editado_en: message.edited_at,
        }
    }

    pub fn message_deleted(message: &Message, mode: DeleteMode, actor_id: Uuid) -> Self {
        let (usuario_id, texto) = match mode {
            DeleteMode::ForSelf => (Some(actor_id), None),
            DeleteMode::ForEveryone => (None, Some(message.body.clone())),
        };
        OutboundEvent::MessageDeleted {
            tipo: "mensaje_eliminado",
            modo: mode.wire_name(),
            mensaje_id: message.id,
            conversacion_id: message.conversation_id,
            usuario_id,
            texto,
        }
    }

    pub fn to_frame(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
