use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::directory::{ConnTx, Directory};
use crate::error::GameError;
use crate::lobby::{spawn_lobby, LobbyMessage};
use crate::messages::{ClientMessage, ServerMessage};
use crate::models::{now_millis, Asset, LobbyRules, Side};

// =============================================================================
// 境界/ディスパッチ層
// =============================================================================
//
// 接続1本につき受信ループを1タスク。インバウンドは到着順に逐次処理され、
// 同一接続内で並行に捌かれることはありません。
//
// ここでやるのは「パースとバリデーションと宛先解決」まで。状態の変更は
// すべてロビーアクターへのメッセージ送信に翻訳されます。

/// APIハンドラーが持つ共有状態
#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<Directory>,
    /// 終了したロビーを台帳から回収するまでの猶予
    pub lobby_ttl: Duration,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// 再接続時に以前のuserIdを引き継ぐための接続パラメータ
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

/// WebSocketハンドラ（GET /ws）
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    // 有効なuserIdが来ていれば引き継ぎ、なければ新規採番
    let user_id = query
        .user_id
        .as_deref()
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4);

    // 招待URLの組み立てに使う（スキームは配備前提に合わせてhttp固定）
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id, host))
}

/// WebSocket接続の実体
async fn handle_socket(mut socket: WebSocket, state: AppState, user_id: Uuid, host: String) {
    // 接続専用の送信キュー。ロビーアクターはディレクトリ経由でここに積む
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.directory.register(user_id, out_tx.clone()).await;
    info!(%user_id, "client connected");

    let _ = out_tx.send(ServerMessage::Hello { user_id });

    loop {
        tokio::select! {
            // 1. 送信キュー → ソケット
            out = out_rx.recv() => {
                match out {
                    Some(msg) => {
                        let Ok(json) = serde_json::to_string(&msg) else { continue };
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break; // 送信失敗は切断扱い
                        }
                    }
                    None => break,
                }
            }
            // 2. クライアントからの受信
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => dispatch(&state, user_id, &out_tx, &host, msg).await,
                            // 未知のtypeや壊れたJSONは前方互換のため黙って無視
                            Err(e) => debug!(%user_id, error = %e, "ignoring unparseable message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // Ping/Pong/Binaryフレームは無視
                    Some(Err(_)) => break,
                }
            }
        }
    }

    // 接続の対応だけを消す。ロビー所属とポートフォリオは再接続に備えて残る
    state.directory.unregister(&user_id, &out_tx).await;
    info!(%user_id, "client disconnected");
}

/// インバウンドメッセージ1件をバリデーションして振り分ける
async fn dispatch(
    state: &AppState,
    user_id: Uuid,
    out_tx: &ConnTx,
    host: &str,
    msg: ClientMessage,
) {
    match msg {
        ClientMessage::CreateLobby { name, rules } => {
            let rules = LobbyRules::with_patch(rules.unwrap_or_default());
            let (code, handle) =
                spawn_lobby(&state.directory, user_id, rules, state.lobby_ttl).await;
            let invite_url = format!("http://{}/?join={}", host, code);
            let _ = out_tx.send(ServerMessage::InviteCode {
                lobby_id: code,
                invite_url,
            });
            // ホストの入室もJoin経由（ready=falseで登録される）
            let name = display_name(name, &user_id);
            let _ = handle.send(LobbyMessage::Join { user_id, name }).await;
        }

        ClientMessage::JoinLobby { lobby_id, name } => {
            let code = lobby_id.trim().to_uppercase();
            let Some(handle) = state.directory.lobby_handle(&code).await else {
                let _ = out_tx.send(ServerMessage::Error {
                    code: GameError::LobbyNotFound.to_string(),
                });
                return;
            };
            let name = display_name(name, &user_id);
            let _ = handle.send(LobbyMessage::Join { user_id, name }).await;
        }

        ClientMessage::SetReady { ready } => {
            if let Some(handle) = state.directory.handle_for_user(&user_id).await {
                let _ = handle.send(LobbyMessage::SetReady { user_id, ready }).await;
            }
        }

        ClientMessage::StartGame {} => {
            if let Some(handle) = state.directory.handle_for_user(&user_id).await {
                let _ = handle.send(LobbyMessage::Start { user_id }).await;
            }
        }

        ClientMessage::Order { asset, side, qty } => {
            // 境界バリデーション: 未知の資産・不正なside・0以下の数量は
            // 状態に触る前にrejectする
            match (Asset::parse(&asset), Side::parse(&side)) {
                (Some(asset), Some(side)) if qty > 0 => {
                    if let Some(handle) = state.directory.handle_for_user(&user_id).await {
                        let _ = handle
                            .send(LobbyMessage::Order {
                                user_id,
                                asset,
                                side,
                                qty,
                            })
                            .await;
                    }
                }
                _ => {
                    let _ = out_tx.send(ServerMessage::OrderReject {
                        reason: GameError::InvalidOrder.to_string(),
                    });
                }
            }
        }

        ClientMessage::LeaveLobby {} => {
            if let Some(handle) = state.directory.handle_for_user(&user_id).await {
                let _ = handle.send(LobbyMessage::Leave { user_id }).await;
            }
        }

        ClientMessage::Ping {} => {
            let _ = out_tx.send(ServerMessage::Pong { ts: now_millis() });
        }
    }
}

/// 表示名が未指定/空ならuserIdの先頭から briefな名前を作る
fn display_name(name: Option<String>, user_id: &Uuid) -> String {
    name.filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| format!("User-{}", &user_id.to_string()[..4]))
}
