use axum::response::IntoResponse;
use serde_json::json;

pub async fn healthz() -> impl IntoResponse {
    crate::responses::json_ok(json!({"ok": true}))
}
