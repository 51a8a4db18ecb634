//! RPC method handlers organized by domain.

use std::sync::Arc;

use veil_auth::SessionCache;
use veil_core::events::{LiveChannel, ServerEvent};
use veil_core::identity::Identity;
use veil_core::ids::{NotificationId, UserId, WhisperId};
use veil_core::rooms::RoomId;
use veil_core::whisper::Whisper;
use veil_engine::{DisclosureEngine, GuessOutcome};
use veil_store::notifications::NotificationRepo;
use veil_store::users::UserRepo;
use veil_store::whispers::WhisperRepo;

use crate::hub::RoomHub;
use crate::presence::PresenceRegistry;
use crate::router::WhisperRouter;
use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub users: UserRepo,
    pub whispers: WhisperRepo,
    pub notifications: NotificationRepo,
    pub disclosure: DisclosureEngine,
    pub router: WhisperRouter,
    pub presence: Arc<PresenceRegistry>,
    pub cache: Arc<SessionCache>,
    pub hub: Arc<RoomHub>,
}

/// Dispatch an authenticated RPC method. `caller` resolved at connect
/// time; `conn` is the socket the request arrived on.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    caller: &Identity,
    conn: &veil_core::ids::ConnId,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        // Whispers
        "whisper.send" => whisper_send(state, caller, params, id).await,
        "whisper.history" => whisper_history(state, caller, params, id),
        "whisper.read" => whisper_read(state, caller, params, id),
        "whisper.edit" => whisper_edit(state, caller, params, id),
        "whisper.delete" => whisper_delete(state, caller, params, id),

        // Recognition
        "recognition.guess" => recognition_guess(state, caller, params, id),
        "recognition.revoke" => recognition_revoke(state, caller, params, id),
        "recognition.list" => recognition_list(state, caller, id),

        // Rooms
        "room.join" => room_join(state, conn, params, id),
        "room.leave" => room_leave(state, conn, params, id),

        // Notifications
        "notification.list" => notification_list(state, caller, params, id),
        "notification.read" => notification_read(state, caller, params, id),
        "notification.delete" => notification_delete(state, caller, params, id),

        // Presence + device
        "presence.get" => presence_get(state, params, id),
        "push.register" => push_register(state, caller, params, id),

        "health" => RpcResponse::success(id, serde_json::json!({"status": "healthy"})),

        other => RpcResponse::method_not_found(id, other),
    }
}

fn counterparty(whisper: &Whisper, caller: &UserId) -> UserId {
    if whisper.sender_id == *caller {
        whisper.receiver_id.clone()
    } else {
        whisper.sender_id.clone()
    }
}

async fn whisper_send(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let receiver_id = match rpc::require_str(params, "receiver_id") {
        Ok(v) => UserId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let content = match rpc::require_str(params, "content") {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) => return RpcResponse::invalid_params(id, "content must not be empty"),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };

    if let Err(e) = state.users.find_by_id(&receiver_id) {
        return RpcResponse::store_error(id, e);
    }

    let tier = match state.disclosure.tier_for_new_whisper(&caller.id, &receiver_id) {
        Ok(tier) => tier,
        Err(e) => return RpcResponse::engine_error(id, &e),
    };
    let whisper = match state
        .whispers
        .create(&caller.id, &receiver_id, content, tier)
    {
        Ok(w) => w,
        Err(e) => return RpcResponse::store_error(id, e),
    };

    state.router.deliver_new(&whisper, caller).await;

    match state.disclosure.annotate(whisper, &caller.id) {
        Ok(view) => RpcResponse::success(id, serde_json::json!({ "whisper": view })),
        Err(e) => RpcResponse::engine_error(id, &e),
    }
}

fn whisper_history(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let partner_id = match rpc::require_str(params, "partner_id") {
        Ok(v) => UserId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let limit = rpc::optional_u32(params, "limit").unwrap_or(50);

    let partner = match state.users.find_by_id(&partner_id) {
        Ok(p) => p,
        Err(e) => return RpcResponse::store_error(id, e),
    };
    let whispers = match state.whispers.conversation(&caller.id, &partner_id, limit) {
        Ok(w) => w,
        Err(e) => return RpcResponse::store_error(id, e),
    };
    match state
        .disclosure
        .annotate_conversation(whispers, &caller.id, &partner)
    {
        Ok(views) => RpcResponse::success(id, serde_json::json!({ "whispers": views })),
        Err(e) => RpcResponse::engine_error(id, &e),
    }
}

fn whisper_read(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let whisper_id = match rpc::require_str(params, "whisper_id") {
        Ok(v) => WhisperId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };

    let whisper = match state.whispers.get(&whisper_id) {
        Ok(w) => w,
        Err(e) => return RpcResponse::store_error(id, e),
    };
    if let Err(e) = state.whispers.mark_read(&whisper_id, &caller.id) {
        return RpcResponse::store_error(id, e);
    }

    // mark_read is receiver-only, so the counterparty is the sender
    state.router.deliver_update(
        &caller.id,
        &whisper.sender_id,
        &ServerEvent::WhisperRead {
            whisper_id,
            reader_id: caller.id.clone(),
        },
    );
    RpcResponse::success(id, serde_json::json!({ "ok": true }))
}

fn whisper_edit(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let whisper_id = match rpc::require_str(params, "whisper_id") {
        Ok(v) => WhisperId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let content = match rpc::require_str(params, "content") {
        Ok(v) if !v.trim().is_empty() => v,
        Ok(_) => return RpcResponse::invalid_params(id, "content must not be empty"),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };

    if let Err(e) = state.whispers.edit(&whisper_id, &caller.id, content) {
        return RpcResponse::store_error(id, e);
    }
    let whisper = match state.whispers.get(&whisper_id) {
        Ok(w) => w,
        Err(e) => return RpcResponse::store_error(id, e),
    };

    state.router.deliver_update(
        &caller.id,
        &whisper.receiver_id,
        &ServerEvent::WhisperEdited {
            whisper_id,
            content: content.to_string(),
        },
    );
    RpcResponse::success(id, serde_json::json!({ "ok": true }))
}

fn whisper_delete(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let whisper_id = match rpc::require_str(params, "whisper_id") {
        Ok(v) => WhisperId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };

    // The pair is needed for routing after the row is gone
    let whisper = match state.whispers.get(&whisper_id) {
        Ok(w) => w,
        Err(e) => return RpcResponse::store_error(id, e),
    };
    if let Err(e) = state.whispers.delete(&whisper_id, &caller.id) {
        return RpcResponse::store_error(id, e);
    }

    let other = counterparty(&whisper, &caller.id);
    state.router.deliver_update(
        &caller.id,
        &other,
        &ServerEvent::WhisperDeleted { whisper_id },
    );
    RpcResponse::success(id, serde_json::json!({ "ok": true }))
}

fn recognition_guess(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let target_id = match rpc::require_str(params, "target_id") {
        Ok(v) => UserId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let guessed_name = match rpc::require_str(params, "guessed_name") {
        Ok(v) => v,
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };

    match state.disclosure.guess(&caller.id, &target_id, guessed_name) {
        Ok(GuessOutcome::Correct) => match state.users.find_by_id(&target_id) {
            Ok(target) => RpcResponse::success(
                id,
                serde_json::json!({ "outcome": "correct", "username": target.username }),
            ),
            Err(e) => RpcResponse::store_error(id, e),
        },
        Ok(GuessOutcome::Incorrect) => {
            RpcResponse::success(id, serde_json::json!({ "outcome": "incorrect" }))
        }
        Err(e) => RpcResponse::engine_error(id, &e),
    }
}

fn recognition_revoke(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let target_id = match rpc::require_str(params, "target_id") {
        Ok(v) => UserId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    match state.disclosure.revoke(&caller.id, &target_id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "ok": true })),
        Err(e) => RpcResponse::engine_error(id, &e),
    }
}

fn recognition_list(
    state: &Arc<HandlerState>,
    caller: &Identity,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let recognized = match state.disclosure.recognized(&caller.id) {
        Ok(ids) => ids,
        Err(e) => return RpcResponse::engine_error(id, &e),
    };
    let recognizers = match state.disclosure.recognizers(&caller.id) {
        Ok(ids) => ids,
        Err(e) => return RpcResponse::engine_error(id, &e),
    };
    RpcResponse::success(
        id,
        serde_json::json!({ "recognized": recognized, "recognizers": recognizers }),
    )
}

fn room_join(
    state: &Arc<HandlerState>,
    conn: &veil_core::ids::ConnId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let room = match rpc::require_str(params, "room") {
        Ok(v) => RoomId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    state.hub.join(conn, room);
    RpcResponse::success(id, serde_json::json!({ "ok": true }))
}

fn room_leave(
    state: &Arc<HandlerState>,
    conn: &veil_core::ids::ConnId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let room = match rpc::require_str(params, "room") {
        Ok(v) => RoomId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    state.hub.leave(conn, &room);
    RpcResponse::success(id, serde_json::json!({ "ok": true }))
}

fn notification_list(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let limit = rpc::optional_u32(params, "limit").unwrap_or(50);
    let notifications = match state.notifications.list_for_user(&caller.id, limit) {
        Ok(n) => n,
        Err(e) => return RpcResponse::store_error(id, e),
    };
    let unread = match state.notifications.unread_count(&caller.id) {
        Ok(n) => n,
        Err(e) => return RpcResponse::store_error(id, e),
    };
    RpcResponse::success(
        id,
        serde_json::json!({ "notifications": notifications, "unread_count": unread }),
    )
}

fn notification_read(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let notification_id = match rpc::require_str(params, "notification_id") {
        Ok(v) => NotificationId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    match state.notifications.mark_read(&notification_id, &caller.id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "ok": true })),
        Err(e) => RpcResponse::store_error(id, e),
    }
}

fn notification_delete(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let notification_id = match rpc::require_str(params, "notification_id") {
        Ok(v) => NotificationId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    match state.notifications.delete(&notification_id, &caller.id) {
        Ok(()) => RpcResponse::success(id, serde_json::json!({ "ok": true })),
        Err(e) => RpcResponse::store_error(id, e),
    }
}

fn presence_get(
    state: &Arc<HandlerState>,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let user_id = match rpc::require_str(params, "user_id") {
        Ok(v) => UserId::from_raw(v),
        Err(msg) => return RpcResponse::invalid_params(id, msg),
    };
    let identity = match state.users.find_by_id(&user_id) {
        Ok(identity) => identity,
        Err(e) => return RpcResponse::store_error(id, e),
    };
    let mut profile = identity.anon_profile();
    // Live presence comes from the registry, not the persisted flag
    profile.is_online = state.presence.is_online(&user_id);
    RpcResponse::success(
        id,
        serde_json::json!({ "profile": profile, "last_seen": identity.last_seen }),
    )
}

fn push_register(
    state: &Arc<HandlerState>,
    caller: &Identity,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let token = rpc::optional_str(params, "token");
    if let Err(e) = state.users.set_push_token(&caller.id, token) {
        return RpcResponse::store_error(id, e);
    }
    // The cached identity carries the token; drop it so the next resolve
    // sees the new value
    state.cache.invalidate(&caller.id);
    RpcResponse::success(id, serde_json::json!({ "ok": true }))
}
