// Re-export route modules
pub mod calls;
pub mod contacts;
pub mod conversations;
pub mod health;
pub mod members;
pub mod messages;
pub mod wsroute;

use actix_web::web;

/// Register every HTTP and websocket endpoint
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(conversations::create_conversation)
        .service(conversations::list_conversations)
        .service(conversations::get_conversation)
        .service(conversations::delete_conversation)
        .service(conversations::list_members)
        .service(conversations::list_messages)
        .service(conversations::send_message)
        .service(conversations::clear_messages)
        .service(conversations::upload_attachment)
        .service(conversations::mark_read)
        .service(conversations::mark_delivered)
        .service(conversations::list_states)
        .service(members::remove_member)
        .service(members::add_members)
        .service(messages::edit_message)
        .service(messages::delete_message)
        .service(messages::add_reaction)
        .service(messages::remove_reaction)
        .service(contacts::list_contacts)
        .service(contacts::add_contact)
        .service(contacts::update_contact)
        .service(contacts::delete_contact)
        .service(calls::start_call)
        .service(wsroute::ws_handler)
        .service(health::health)
        .service(health::metrics_handler);
}
