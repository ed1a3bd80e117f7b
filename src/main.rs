// =============================================================================
// rust-trading-game - マルチプレイヤー取引シミュレーションサーバ
// =============================================================================
//
// クライアントはWebSocketで接続し、ロビー単位に分かれて合成価格フィードを
// 相手に取引します。ロビーごとに独立した価格時計・ポートフォリオ・
// 残り時間カウントダウンを持ちます。
//
// 【アーキテクチャの概要】
// ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
// │  境界層          │────▶│   チャネル       │────▶│  ロビーアクター  │
// │  (axum /ws)     │◀────│   (mpsc)        │◀────│  (状態を専有)    │
// └─────────────────┘     └─────────────────┘     └─────────────────┘
//
// - models: ドメイン型 (Asset, Position, PlayerState, ...)
// - messages: ワイヤプロトコル（タグ付きユニオン）
// - pricing: シード付き価格エンジン
// - execution: 約定エンジン
// - portfolio: スナップショット/ランキングの読み取り射影
// - directory: 接続・ユーザー・ロビーのルーティング台帳
// - lobby: ロビーごとのアクターとティックループ
// - ws: 接続ごとの受信ループとディスパッチ
//
// 永続化は意図的に持たない。全状態はメモリ上にあり、再起動で消える。
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rust_trading_game::config;
use rust_trading_game::directory::Directory;
use rust_trading_game::lobby::LobbyMessage;
use rust_trading_game::ws::{ws_handler, AppState};

// =============================================================================
// APIハンドラー
// =============================================================================

/// GET /health - 稼働確認
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let lobbies = state.directory.lobby_count().await;
    Json(serde_json::json!({ "status": "ok", "lobbies": lobbies }))
}

/// GET /lobbies/{code} - ロビーの読み取り専用サマリを取得
///
/// ロビーアクターにGetStateクエリを投げて結果を返すだけ。状態は変更しない。
async fn get_lobby(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    let code = code.trim().to_uppercase();
    let Some(handle) = state.directory.lobby_handle(&code).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let (resp_tx, resp_rx) = oneshot::channel();
    if handle
        .send(LobbyMessage::GetState {
            respond_to: resp_tx,
        })
        .await
        .is_err()
    {
        // アクターがすでに終了している（回収済み）
        return StatusCode::NOT_FOUND.into_response();
    }

    match resp_rx.await {
        Ok(summary) => Json(summary).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

// =============================================================================
// メイン関数
// =============================================================================

#[tokio::main]
async fn main() {
    // ---- ログ ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- 設定 ----
    let config = config::load();

    // ---- ルーティング台帳（プロセスで1つだけ） ----
    let directory = Arc::new(Directory::new());

    let state = AppState {
        directory,
        lobby_ttl: Duration::from_secs(config.lobby_ttl_secs),
    };

    // ---- ルーター ----
    let index_path = format!("{}/index.html", config.static_dir);
    let app = Router::new()
        .route("/health", get(health))
        .route("/lobbies/{code}", get(get_lobby))
        .route("/ws", get(ws_handler))
        .route_service("/", ServeFile::new(index_path))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!(port = config.port, "server starting");

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .expect("待ち受けポートのバインドに失敗しました");
    axum::serve(listener, app)
        .await
        .expect("サーバの起動に失敗しました");
}
