//! Realtime Fan-out Integration Tests
//!
//! Exercises the connection registry together with the services and the
//! inbound event handler, reading frames straight off registry channels.
//!
//! Run: cargo test --test realtime_fanout_test

use realtime_messaging_service::{
    error::AppError,
    services::{
        ContactService, ConversationService, MembershipService, MessageService, PresenceService,
    },
    websocket::{handlers::handle_inbound, message_types::InboundEvent},
};
use serde_json::json;
use uuid::Uuid;

mod test_harness;
use test_harness::{drain, events_named, tick, TestEnvironment};

fn inbound(value: serde_json::Value) -> InboundEvent {
    serde_json::from_value(value).expect("Invalid inbound event")
}

#[tokio::test]
async fn test_send_reaches_recipients_and_reports_initial_states() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let c = env.user("+5215550000003", "Caro").await;
    let g = env.group(a.id, &[b.id, c.id], "Equipo").await;

    let (a_conn, mut a_rx) = env.registry().connect(a.id).await;
    let (b_conn, mut b_rx) = env.registry().connect(b.id).await;
    PresenceService::register(env.store(), env.registry(), a_conn).await;
    PresenceService::register(env.store(), env.registry(), b_conn).await;
    drain(&mut a_rx);
    drain(&mut b_rx);

    let sent = MessageService::send(env.store(), env.registry(), g, a.id, "hola", None, &[])
        .await
        .unwrap();

    let b_frames = drain(&mut b_rx);
    let received = events_named(&b_frames, "mensaje_recibido");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["id"], json!(sent.message.id));
    assert_eq!(received[0]["cuerpo"], "hola");
    assert_eq!(received[0]["tipo"], "normal");
    assert_eq!(received[0]["usuario_id"], json!(a.id));

    let a_frames = drain(&mut a_rx);
    assert!(events_named(&a_frames, "mensaje_recibido").is_empty());
    let initial = events_named(&a_frames, "estado_mensaje_inicial");
    assert_eq!(initial.len(), 1);
    let estados = initial[0]["estados"].as_array().unwrap();
    assert_eq!(estados.len(), 2);
    let estado_of = |user: Uuid| {
        estados
            .iter()
            .find(|e| e["usuario_id"] == json!(user))
            .map(|e| e["estado"].clone())
    };
    assert_eq!(estado_of(b.id), Some(json!("enviado")));
    assert_eq!(estado_of(c.id), Some(json!("pendiente")));
}

#[tokio::test]
async fn test_presence_broadcast_and_stale_disconnect() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;

    let (observer, mut observer_rx) = env.registry().connect(b.id).await;
    PresenceService::register(env.store(), env.registry(), observer).await;
    drain(&mut observer_rx);

    let (old, _old_rx) = env.registry().connect(a.id).await;
    PresenceService::register(env.store(), env.registry(), old).await;
    let (new, _new_rx) = env.registry().connect(a.id).await;
    PresenceService::register(env.store(), env.registry(), new).await;

    let frames = drain(&mut observer_rx);
    let presence = events_named(&frames, "usuario_estado");
    assert_eq!(presence.len(), 2);
    assert!(presence
        .iter()
        .all(|p| p["usuario_id"] == json!(a.id) && p["online"] == json!(true)));

    // the superseded connection closing late leaves a online
    let stale = PresenceService::disconnect(env.store(), env.registry(), old).await;
    assert!(stale.is_none());
    assert!(env.registry().is_online(a.id).await);
    assert!(env.store().get_user(a.id).await.unwrap().unwrap().online);
    assert!(events_named(&drain(&mut observer_rx), "usuario_estado").is_empty());

    let change = PresenceService::disconnect(env.store(), env.registry(), new)
        .await
        .unwrap();
    assert!(!change.online);
    assert!(!env.registry().is_online(a.id).await);

    let stored = env.store().get_user(a.id).await.unwrap().unwrap();
    assert!(!stored.online);
    assert!(stored.last_seen_at.is_some());

    let offline = events_named(&drain(&mut observer_rx), "usuario_estado");
    assert_eq!(offline.len(), 1);
    assert_eq!(offline[0]["online"], json!(false));
}

#[tokio::test]
async fn test_register_for_another_user_is_ignored() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;

    let (conn, _rx) = env.registry().connect(a.id).await;
    handle_inbound(
        &env.state,
        conn,
        a.id,
        inbound(json!({"event": "registrar_usuario", "data": {"usuario_id": b.id}})),
    )
    .await
    .unwrap();
    assert!(!env.registry().is_online(a.id).await);
    assert!(!env.registry().is_online(b.id).await);

    handle_inbound(
        &env.state,
        conn,
        a.id,
        inbound(json!({"event": "registrar_usuario", "data": {}})),
    )
    .await
    .unwrap();
    assert!(env.registry().is_online(a.id).await);
}

#[tokio::test]
async fn test_subscribe_requires_membership_row() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let outsider = env.user("+5215550000009", "Otro").await;
    let chat = env.direct(a.id, b.id).await;

    let (conn, _rx) = env.registry().connect(outsider.id).await;
    let err = handle_inbound(
        &env.state,
        conn,
        outsider.id,
        inbound(json!({"event": "suscribir_conversacion", "data": {"conversacion_id": chat}})),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    assert!(!env.registry().is_subscribed(conn, chat).await);

    let (member_conn, _member_rx) = env.registry().connect(a.id).await;
    handle_inbound(
        &env.state,
        member_conn,
        a.id,
        inbound(json!({"event": "suscribir_conversacion", "data": {"conversacion_id": chat}})),
    )
    .await
    .unwrap();
    assert!(env.registry().is_subscribed(member_conn, chat).await);
}

#[tokio::test]
async fn test_typing_skips_the_sending_connection() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let chat = env.direct(a.id, b.id).await;

    let (a_conn, mut a_rx) = env.registry().connect(a.id).await;
    let (b_conn, mut b_rx) = env.registry().connect(b.id).await;
    env.registry().subscribe(a_conn, chat).await;
    env.registry().subscribe(b_conn, chat).await;

    handle_inbound(
        &env.state,
        a_conn,
        a.id,
        inbound(json!({
            "event": "typing",
            "data": {"conversacion_id": chat, "usuario_id": b.id, "escribiendo": true}
        })),
    )
    .await
    .unwrap();

    assert!(drain(&mut a_rx).is_empty());
    let typing = events_named(&drain(&mut b_rx), "typing");
    assert_eq!(typing.len(), 1);
    assert_eq!(typing[0]["usuario_id"], json!(a.id), "Sender id is forced");
    assert_eq!(typing[0]["escribiendo"], json!(true));
    assert_eq!(typing[0]["conversacion_id"], json!(chat));
}

#[tokio::test]
async fn test_rtc_signal_relayed_with_authenticated_sender() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let forged = Uuid::new_v4();

    let (a_conn, _a_rx) = env.registry().connect(a.id).await;
    let (_b_conn, mut b_rx) = env.registry().connect(b.id).await;

    handle_inbound(
        &env.state,
        a_conn,
        a.id,
        inbound(json!({
            "event": "rtc_offer",
            "data": {"to": b.id, "from": forged, "sdp": "v=0"}
        })),
    )
    .await
    .unwrap();

    let offers = events_named(&drain(&mut b_rx), "rtc_offer");
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0]["from"], json!(a.id));
    assert_eq!(offers[0]["to"], json!(b.id));
    assert_eq!(offers[0]["sdp"], "v=0");

    // no live connection: dropped without error
    handle_inbound(
        &env.state,
        a_conn,
        a.id,
        inbound(json!({"event": "rtc_answer", "data": {"to": forged, "sdp": "v=0"}})),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_incoming_call_uses_callee_alias_for_caller() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    ContactService::add(env.store(), b.id, &a.phone, Some("Anita"))
        .await
        .unwrap();
    let chat = env.direct(a.id, b.id).await;

    let (a_conn, mut a_rx) = env.registry().connect(a.id).await;
    let (_b_conn, mut b_rx) = env.registry().connect(b.id).await;

    handle_inbound(
        &env.state,
        a_conn,
        a.id,
        inbound(json!({
            "event": "incoming_call",
            "data": {"conversacion_id": chat, "to": b.id, "tipo": "video"}
        })),
    )
    .await
    .unwrap();

    let calls = events_named(&drain(&mut b_rx), "incoming_call");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["nombre"], "Anita");
    assert_eq!(calls[0]["from"], json!(a.id));
    assert_eq!(calls[0]["tipo"], "video");
    assert!(drain(&mut a_rx).is_empty());
}

#[tokio::test]
async fn test_rtc_join_subscribes_and_announces() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let chat = env.direct(a.id, b.id).await;

    let (a_conn, _a_rx) = env.registry().connect(a.id).await;
    let (b_conn, mut b_rx) = env.registry().connect(b.id).await;
    env.registry().subscribe(b_conn, chat).await;

    handle_inbound(
        &env.state,
        a_conn,
        a.id,
        inbound(json!({"event": "rtc_join", "data": {"conversacion_id": chat}})),
    )
    .await
    .unwrap();
    assert!(env.registry().is_subscribed(a_conn, chat).await);

    let frames = drain(&mut b_rx);
    assert_eq!(events_named(&frames, "rtc_peer_joined").len(), 1);
    let joined = events_named(&frames, "rtc_user_joined");
    assert_eq!(joined[0]["user_id"], json!(a.id));

    handle_inbound(
        &env.state,
        a_conn,
        a.id,
        inbound(json!({"event": "rtc_leave", "data": {"conversacion_id": chat}})),
    )
    .await
    .unwrap();
    assert_eq!(events_named(&drain(&mut b_rx), "rtc_user_left").len(), 1);
}

#[tokio::test]
async fn test_departure_rendered_with_each_viewers_aliases() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let c = env.user("+5215550000003", "Caro").await;
    let g = env.group(a.id, &[b.id, c.id], "Equipo").await;
    ContactService::add(env.store(), b.id, &c.phone, Some("Carito"))
        .await
        .unwrap();

    let (a_conn, mut a_rx) = env.registry().connect(a.id).await;
    let (b_conn, mut b_rx) = env.registry().connect(b.id).await;
    env.registry().subscribe(a_conn, g).await;
    env.registry().subscribe(b_conn, g).await;

    MembershipService::remove_member(env.store(), env.registry(), g, a.id, c.id)
        .await
        .unwrap();

    let for_b = events_named(&drain(&mut b_rx), "usuario_salio_grupo");
    assert_eq!(for_b.len(), 1);
    assert_eq!(for_b[0]["nombre_salida"], "Carito");
    assert_eq!(for_b[0]["es_salida_propia"], json!(false));
    assert_eq!(for_b[0]["actor_id"], json!(a.id));

    let for_a = events_named(&drain(&mut a_rx), "usuario_salio_grupo");
    assert_eq!(for_a.len(), 1);
    assert_eq!(for_a[0]["nombre_salida"], json!(c.phone));
}

#[tokio::test]
async fn test_added_member_notified_with_new_chat() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let d = env.user("+5215550000004", "Dani").await;
    let g = env.group(a.id, &[b.id], "Equipo").await;

    let (b_conn, mut b_rx) = env.registry().connect(b.id).await;
    env.registry().subscribe(b_conn, g).await;
    let (_d_conn, mut d_rx) = env.registry().connect(d.id).await;

    MembershipService::add_members(env.store(), env.registry(), g, a.id, &[d.id])
        .await
        .unwrap();

    let added = events_named(&drain(&mut b_rx), "miembro_agregado");
    assert_eq!(added.len(), 1);
    assert_eq!(added[0]["nuevo_id"], json!(d.id));
    assert_eq!(added[0]["nuevo_visible"], json!(d.phone));

    let new_chat = events_named(&drain(&mut d_rx), "nuevo_chat");
    assert_eq!(new_chat.len(), 1);
    assert_eq!(new_chat[0]["id"], json!(g));
    assert_eq!(new_chat[0]["titulo"], "Equipo");
    assert_eq!(new_chat[0]["es_grupo"], json!(true));
}

#[tokio::test]
async fn test_edit_and_delete_reach_every_member() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let chat = env.direct(a.id, b.id).await;
    let (_b_conn, mut b_rx) = env.registry().connect(b.id).await;

    let id = MessageService::send(env.store(), env.registry(), chat, a.id, "hola", None, &[])
        .await
        .unwrap()
        .message
        .id;
    MessageService::edit(env.store(), env.registry(), id, a.id, "hola!")
        .await
        .unwrap();
    MessageService::delete(
        env.store(),
        env.registry(),
        id,
        a.id,
        realtime_messaging_service::models::DeleteMode::ForEveryone,
    )
    .await
    .unwrap();

    let frames = drain(&mut b_rx);
    let edited = events_named(&frames, "mensaje_editado");
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0]["cuerpo"], "hola!");
    let deleted = events_named(&frames, "mensaje_eliminado");
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0]["modo"], "para_todos");
}

#[tokio::test]
async fn test_dead_connections_are_pruned_on_publish() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let chat = env.direct(a.id, b.id).await;

    let (_conn, rx) = env.registry().connect(b.id).await;
    drop(rx);
    assert_eq!(env.registry().connection_count().await, 1);

    // fan-out failure never fails the send
    MessageService::send(env.store(), env.registry(), chat, a.id, "hola", None, &[])
        .await
        .unwrap();
    assert_eq!(env.registry().connection_count().await, 0);
}

#[tokio::test]
async fn test_removed_member_stops_receiving_group_traffic() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let c = env.user("+5215550000003", "Caro").await;
    let g = env.group(a.id, &[b.id, c.id], "Equipo").await;

    let (b_conn, mut b_rx) = env.registry().connect(b.id).await;
    let (c_conn, _c_rx) = env.registry().connect(c.id).await;
    env.registry().subscribe(b_conn, g).await;
    env.registry().subscribe(c_conn, g).await;

    let before = MessageService::send(env.store(), env.registry(), g, c.id, "antes", None, &[])
        .await
        .unwrap()
        .message
        .id;
    tick().await;
    MembershipService::remove_member(env.store(), env.registry(), g, a.id, b.id)
        .await
        .unwrap();

    // the leaver still hears about their own departure
    assert_eq!(events_named(&drain(&mut b_rx), "usuario_salio_grupo").len(), 1);
    assert!(!env.registry().is_subscribed(b_conn, g).await);
    tick().await;

    let after = MessageService::send(env.store(), env.registry(), g, c.id, "despues", None, &[])
        .await
        .unwrap()
        .message
        .id;
    MessageService::edit(env.store(), env.registry(), after, c.id, "despues!")
        .await
        .unwrap();
    MessageService::react(env.store(), env.registry(), after, a.id, "👍")
        .await
        .unwrap();
    handle_inbound(
        &env.state,
        c_conn,
        c.id,
        inbound(json!({"event": "typing", "data": {"conversacion_id": g, "escribiendo": true}})),
    )
    .await
    .unwrap();
    assert!(drain(&mut b_rx).is_empty(), "Post-departure traffic leaked");

    // edits to history inside the window still arrive
    MessageService::edit(env.store(), env.registry(), before, c.id, "antes!")
        .await
        .unwrap();
    let edited = events_named(&drain(&mut b_rx), "mensaje_editado");
    assert_eq!(edited.len(), 1);
    assert_eq!(edited[0]["mensaje_id"], json!(before));

    let err = handle_inbound(
        &env.state,
        b_conn,
        b.id,
        inbound(json!({"event": "suscribir_conversacion", "data": {"conversacion_id": g}})),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));
    assert!(!env.registry().is_subscribed(b_conn, g).await);
}

#[tokio::test]
async fn test_delete_for_self_unsubscribes_and_announces_new_admin() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let g = env.group(a.id, &[b.id], "Equipo").await;

    let (a_conn, mut a_rx) = env.registry().connect(a.id).await;
    let (b_conn, mut b_rx) = env.registry().connect(b.id).await;
    env.registry().subscribe(a_conn, g).await;
    env.registry().subscribe(b_conn, g).await;

    ConversationService::delete_for_self(env.store(), env.registry(), g, a.id)
        .await
        .unwrap();
    assert!(!env.registry().is_subscribed(a_conn, g).await);

    let changed = events_named(&drain(&mut b_rx), "nuevo_admin_grupo");
    assert_eq!(changed.len(), 1);
    assert_eq!(changed[0]["nuevo_admin_id"], json!(b.id));

    MessageService::send(env.store(), env.registry(), g, b.id, "sigo aqui", None, &[])
        .await
        .unwrap();
    assert!(drain(&mut a_rx).is_empty());
}
