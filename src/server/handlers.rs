//! HTTPリクエストハンドラー

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use burn::tensor::backend::Backend;

use crate::ml::ClassifyError;
use crate::recognition::{
    is_stored_name, RecognitionError, Role, StoreError, UploadError, User, UserStatus,
};
use crate::server::{
    ApiResponse, AppState, HealthResponse, HistoryParams, HistoryResponse,
    ImageRecognitionResponse, PointsResponse, RegisterUserRequest, TextQueryRequest,
    TextRecognitionResponse, TextSearchParams, TextSearchResponse,
};

/// 呼び出し元ユーザーを示すヘッダー
pub const USER_ID_HEADER: &str = "x-user-id";

/// multipart のファイルフィールド名
pub const UPLOAD_FIELD: &str = "file";

pub(crate) type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

/// 認証・権限チェックの失敗（ステータスとメッセージ）
pub(crate) type Rejection = (StatusCode, String);

pub(crate) fn request_id() -> String {
    format!("req-{:016x}", rand::random::<u64>())
}

pub(crate) fn ok<T>(status: StatusCode, data: T, req_id: &str) -> ApiResult<T> {
    (status, Json(ApiResponse::success(data, req_id)))
}

pub(crate) fn fail<T>(status: StatusCode, message: &str, req_id: &str) -> ApiResult<T> {
    (status, Json(ApiResponse::error(message, req_id)))
}

pub(crate) fn store_status(e: &StoreError) -> StatusCode {
    match e {
        StoreError::UserNotFound(_)
        | StoreError::HistoryNotFound(_)
        | StoreError::ArticleNotFound(_)
        | StoreError::RewardNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::UsernameTaken(_) => StatusCode::CONFLICT,
        StoreError::EmptyUsername
        | StoreError::EmptyField(_)
        | StoreError::InvalidPointsCost(_)
        | StoreError::OutOfStock(_)
        | StoreError::InsufficientPoints { .. } => StatusCode::BAD_REQUEST,
        StoreError::Forbidden { .. } | StoreError::UserBanned(_) => StatusCode::FORBIDDEN,
        StoreError::Catalog(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// 認識エラーのHTTPステータス
pub fn recognition_status(e: &RecognitionError) -> StatusCode {
    match e {
        RecognitionError::Store(StoreError::UserNotFound(_)) => StatusCode::UNAUTHORIZED,
        RecognitionError::Store(e) => store_status(e),
        RecognitionError::Upload(UploadError::Missing) => StatusCode::BAD_REQUEST,
        RecognitionError::Upload(UploadError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        RecognitionError::Classify(ClassifyError::ImageDecode(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        RecognitionError::Classify(ClassifyError::ModelLoad(_)) => StatusCode::SERVICE_UNAVAILABLE,
        RecognitionError::Classify(ClassifyError::Inference(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        RecognitionError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        RecognitionError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RecognitionError::EmptyQuery => StatusCode::BAD_REQUEST,
    }
}

/// `X-User-Id` から呼び出し元ユーザーを解決する
///
/// ヘッダーが無い、数値でない、または未登録なら 401。封禁中なら 403。
pub(crate) fn authenticate<B: Backend>(
    state: &AppState<B>,
    headers: &HeaderMap,
) -> Result<User, Rejection> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "X-User-Id ヘッダーが必要です".to_string(),
            )
        })?;

    let user = state
        .service
        .store()
        .user(user_id)
        .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

    if user.status == UserStatus::Banned {
        return Err((
            StatusCode::FORBIDDEN,
            StoreError::UserBanned(user.id).to_string(),
        ));
    }
    Ok(user)
}

/// 管理者のみ許可（未認証は 401、一般ユーザーは 403）
pub(crate) fn require_admin<B: Backend>(
    state: &AppState<B>,
    headers: &HeaderMap,
) -> Result<User, Rejection> {
    let user = authenticate(state, headers)?;
    if !user.is_admin() {
        return Err((StatusCode::FORBIDDEN, "管理者権限が必要です".to_string()));
    }
    Ok(user)
}

/// ヘルスチェック
pub async fn health_check<B: Backend>(
    State(state): State<AppState<B>>,
) -> (StatusCode, Json<HealthResponse>) {
    let store = state.service.store();
    let health = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        model_loaded: state.service.loader().is_loaded(),
        users_count: store.users_count(),
        catalog_size: store.catalog_len(),
    };

    (StatusCode::OK, Json(health))
}

/// ユーザー登録（常に一般ユーザー。管理者は設定か管理者APIで作る）
pub async fn register_user<B: Backend>(
    State(state): State<AppState<B>>,
    Json(payload): Json<RegisterUserRequest>,
) -> ApiResult<User> {
    let req_id = request_id();

    match state.service.store().register_user(&payload.username, Role::User) {
        Ok(user) => {
            tracing::info!(user_id = user.id, "ユーザーを登録しました");
            ok(StatusCode::CREATED, user, &req_id)
        }
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// ポイント照会
pub async fn user_points<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<u64>,
) -> ApiResult<PointsResponse> {
    let req_id = request_id();

    match state.service.store().user(id) {
        Ok(user) => ok(
            StatusCode::OK,
            PointsResponse {
                user_id: user.id,
                username: user.username,
                points: user.points,
            },
            &req_id,
        ),
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// multipart から `file` フィールドを取り出す
async fn read_upload(mut multipart: Multipart) -> Result<(Option<String>, Vec<u8>), String> {
    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_owned);
        let bytes = field.bytes().await.map_err(|e| e.to_string())?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(UploadError::Missing.to_string())
}

/// 画像認識
pub async fn recognize_image<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    multipart: Multipart,
) -> ApiResult<ImageRecognitionResponse> {
    let req_id = request_id();

    let user = match authenticate(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };

    let (file_name, bytes) = match read_upload(multipart).await {
        Ok(upload) => upload,
        Err(message) => return fail(StatusCode::BAD_REQUEST, &message, &req_id),
    };

    recognize_upload(&state, user.id, file_name.as_deref(), &bytes, &req_id).await
}

/// 受信済みアップロードを認識する
pub async fn recognize_upload<B: Backend>(
    state: &AppState<B>,
    user_id: u64,
    file_name: Option<&str>,
    bytes: &[u8],
    req_id: &str,
) -> ApiResult<ImageRecognitionResponse> {
    match state.service.recognize_image(user_id, file_name, bytes).await {
        Ok(result) => ok(StatusCode::OK, result, req_id),
        Err(e) => fail(recognition_status(&e), &e.to_string(), req_id),
    }
}

/// 文字検索（履歴なし）
pub async fn search_text<B: Backend>(
    State(state): State<AppState<B>>,
    Query(params): Query<TextSearchParams>,
) -> ApiResult<TextSearchResponse> {
    let req_id = request_id();

    match state.service.search_text(&params.q) {
        Ok(items) if items.is_empty() => fail(
            StatusCode::NOT_FOUND,
            &format!("該当する品目がありません: {}", params.q.trim()),
            &req_id,
        ),
        Ok(items) => ok(
            StatusCode::OK,
            TextSearchResponse {
                query: params.q.trim().to_string(),
                items,
            },
            &req_id,
        ),
        Err(e) => fail(recognition_status(&e), &e.to_string(), &req_id),
    }
}

/// 文字認識（ポイント加算と履歴記録あり）
pub async fn recognize_text<B: Backend>(
    State(state): State<AppState<B>>,
    headers: HeaderMap,
    Json(payload): Json<TextQueryRequest>,
) -> ApiResult<TextRecognitionResponse> {
    let req_id = request_id();

    let user = match authenticate(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };

    match state.service.recognize_text(user.id, &payload.query) {
        Ok(result) => ok(StatusCode::OK, result, &req_id),
        Err(e) => fail(recognition_status(&e), &e.to_string(), &req_id),
    }
}

/// 履歴一覧
///
/// 本人か管理者のみ。`all=true` は管理者の場合だけ論理削除済みを含める。
pub async fn list_history<B: Backend>(
    State(state): State<AppState<B>>,
    Path(user_id): Path<u64>,
    Query(params): Query<HistoryParams>,
    headers: HeaderMap,
) -> ApiResult<HistoryResponse> {
    let req_id = request_id();

    let caller = match authenticate(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };
    if caller.id != user_id && !caller.is_admin() {
        return fail(
            StatusCode::FORBIDDEN,
            "他のユーザーの履歴は閲覧できません",
            &req_id,
        );
    }

    let include_deleted = params.all && caller.is_admin();
    match state.service.store().history_for_user(user_id, include_deleted) {
        Ok(records) => ok(StatusCode::OK, HistoryResponse { user_id, records }, &req_id),
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// 履歴削除（論理削除、本人のみ）
pub async fn delete_history<B: Backend>(
    State(state): State<AppState<B>>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> ApiResult<u64> {
    let req_id = request_id();

    let user = match authenticate(&state, &headers) {
        Ok(user) => user,
        Err((status, message)) => return fail(status, &message, &req_id),
    };

    match state.service.store().delete_history(id, user.id) {
        Ok(()) => ok(StatusCode::OK, id, &req_id),
        Err(e) => fail(store_status(&e), &e.to_string(), &req_id),
    }
}

/// 保存済みアップロード画像の配信
pub async fn serve_upload<B: Backend>(
    State(state): State<AppState<B>>,
    Path(name): Path<String>,
) -> Response {
    if !is_stored_name(&name) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = state.service.settings().upload_dir.join(&name);
    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            let mime = image::ImageFormat::from_path(&path)
                .map(|f| f.to_mime_type())
                .unwrap_or("application/octet-stream");
            ([(header::CONTENT_TYPE, mime)], bytes).into_response()
        }
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
