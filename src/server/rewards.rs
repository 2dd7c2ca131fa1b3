//! 景品交換のハンドラー

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use burn::tensor::backend::Backend;

use crate::recognition::{NewReward, RedemptionContact, Reward};
use crate::server::handlers::{
    authenticate, fail, ok, request_id, require_admin, store_status, ApiResult,
};
use crate::server::{AppState, RedeemResponse, RedemptionHistoryResponse};

/// 在庫のある景品一覧（要ログイン）
pub async fn list_rewards<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
) -> ApiResult<Vec<Reward>> {
    let req_id = request_id();

    if let Err((status, message)) = authenticate(&state, &headers) {
        return fail(status, &message, &req_id);
    }
    ok(StatusCode::OK, state.service.store().available_rewards(), &req_id)
}

/// 景品の追加（管理者のみ）
pub async fn create_reward<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    Json(payload): Json<NewReward>,
) -> ApiResult<Reward> {
    let req_id = request_id();

    if let Err((status, message)) = require_admin(&state, &headers) {
        return fail(status, &message, &req_id);
    }

    match state.service.store().add_reward(payload) {
        Ok(reward) => {
            tracing::info!(reward_id = reward.id, stock = reward.stock, "景品を追加しました");
            ok(StatusCode::CREATED, reward, &req_id)
        }
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// 景品交換
///
/// 存在しない景品は 404、在庫切れ・ポイント不足は 400。
pub async fn redeem_reward<B: Backend>(
    State(state): State<AppState<B>>,
    Path(reward_id): Path<u64>,
    headers: HeaderMap,
    Json(contact): Json<RedemptionContact>,
) -> ApiResult<RedeemResponse> {
    let req_id = request_id();

    let user = match authenticate(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };

    match state.service.store().redeem_reward(user.id, reward_id, contact) {
        Ok((user, redemption)) => ok(
            StatusCode::OK,
            RedeemResponse {
                user_id: user.id,
                remaining_points: user.points,
                redemption,
            },
            &req_id,
        ),
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// 自分の交換履歴（新しい順）
pub async fn my_redemptions<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
) -> ApiResult<RedemptionHistoryResponse> {
    let req_id = request_id();

    let user = match authenticate(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };
    redemption_history(&state, user.id, &req_id)
}

/// 任意ユーザーの交換履歴（管理者のみ）
pub async fn user_redemptions<B: Backend>(
    State(state): State<AppState<B>>,
    Path(user_id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<RedemptionHistoryResponse> {
    let req_id = request_id();

    if let Err((status, message)) = require_admin(&state, &headers) {
        return fail(status, &message, &req_id);
    }
    redemption_history(&state, user_id, &req_id)
}

fn redemption_history<B: Backend>(
    state: &AppState<B>,
    user_id: u64,
    req_id: &str,
) -> ApiResult<RedemptionHistoryResponse> {
    match state.service.store().redemptions_for_user(user_id) {
        Ok(redemptions) => ok(
            StatusCode::OK,
            RedemptionHistoryResponse {
                user_id,
                redemptions,
            },
            req_id,
        ),
        Err(e) => fail(store_status(&e), &e.to_string(), req_id),
    }
}
