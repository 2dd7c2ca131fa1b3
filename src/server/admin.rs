//! 管理者向けユーザー管理

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use burn::tensor::backend::Backend;

use crate::recognition::{Role, User};
use crate::server::handlers::{fail, ok, request_id, require_admin, store_status, ApiResult};
use crate::server::{AppState, CreateAdminRequest, UserStatusRequest};

pub async fn list_users<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
) -> ApiResult<Vec<User>> {
    let req_id = request_id();

    if let Err((status, message)) = require_admin(&state, &headers) {
        return fail(status, &message, &req_id);
    }
    ok(StatusCode::OK, state.service.store().list_users(), &req_id)
}

/// 管理者を作成（既存の名前は 409）
pub async fn create_admin<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    Json(payload): Json<CreateAdminRequest>,
) -> ApiResult<User> {
    let req_id = request_id();

    let caller = match require_admin(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };

    match state
        .service
        .store()
        .register_user(&payload.username, Role::Admin)
    {
        Ok(user) => {
            tracing::info!(user_id = user.id, created_by = caller.id, "管理者を作成しました");
            ok(StatusCode::CREATED, user, &req_id)
        }
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// ユーザーの封禁・解除
pub async fn update_user_status<B: Backend>(
    State(state): State<AppState<B>>,
    Path(user_id): Path<u64>,
    headers: HeaderMap,
    Json(payload): Json<UserStatusRequest>,
) -> ApiResult<User> {
    let req_id = request_id();

    if let Err((status, message)) = require_admin(&state, &headers) {
        return fail(status, &message, &req_id);
    }

    match state.service.store().set_user_status(user_id, payload.status) {
        Ok(user) => ok(StatusCode::OK, user, &req_id),
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}
