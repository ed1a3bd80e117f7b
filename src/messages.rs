use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Asset, ClosedTrade, LobbyRules, LobbyStatus, RulesPatch, Side};

// =============================================================================
// ワイヤプロトコル
// =============================================================================
//
// クライアントとの間を流れるJSONメッセージの全集合。
// どちらの方向も "type" フィールドで判別するタグ付きユニオンとして表現し、
// 境界でパース/バリデーションしてからドメインロジックに渡します。
//
// 金額系フィールドは精度を保つため文字列としてシリアライズされます
// （Decimalのデフォルト表現）。

/// クライアント → サーバ
///
/// ORDERのasset/side/qtyは生のまま受けて、ディスパッチ層でバリデーションする
/// （未知のtypeはデシリアライズ失敗となり、前方互換のため黙って無視される）
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    CreateLobby {
        name: Option<String>,
        rules: Option<RulesPatch>,
    },
    JoinLobby {
        lobby_id: String,
        name: Option<String>,
    },
    SetReady {
        #[serde(default)]
        ready: bool,
    },
    StartGame {},
    Order {
        #[serde(default)]
        asset: String,
        #[serde(default)]
        side: String,
        #[serde(default)]
        qty: i64,
    },
    LeaveLobby {},
    Ping {},
}

/// サーバ → クライアント
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Hello {
        user_id: Uuid,
    },
    InviteCode {
        lobby_id: String,
        invite_url: String,
    },
    LobbyState {
        lobby_id: String,
        status: LobbyStatus,
        host_id: Uuid,
        rules: LobbyRules,
        players: Vec<PlayerInfo>,
        seed: u64,
    },
    GameStarted {
        start_ts: i64,
        end_ts: i64,
    },
    Tick {
        ts: i64,
        prices: BTreeMap<Asset, Decimal>,
        remaining_sec: i64,
    },
    Portfolio {
        #[serde(with = "rust_decimal::serde::str")]
        cash: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        equity: Decimal,
        #[serde(rename = "uPnL", with = "rust_decimal::serde::str")]
        u_pnl: Decimal,
        #[serde(rename = "realizedPnL", with = "rust_decimal::serde::str")]
        realized_pnl: Decimal,
        positions: Vec<PositionRow>,
        trades: Vec<ClosedTrade>,
    },
    Leaderboard {
        rows: Vec<LeaderboardRow>,
    },
    GameEnded {
        lobby_id: String,
    },
    OrderAccepted {
        asset: Asset,
        side: Side,
        qty: i64,
        #[serde(with = "rust_decimal::serde::str")]
        price: Decimal,
    },
    OrderReject {
        reason: String,
    },
    Error {
        code: String,
    },
    Pong {
        ts: i64,
    },
}

/// LOBBY_STATEに載せるプレイヤーの公開情報
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub user_id: Uuid,
    pub name: String,
    pub ready: bool,
}

/// PORTFOLIOの資産別行
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRow {
    pub asset: Asset,
    pub qty: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub avg: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub mkt_value: Decimal,
    #[serde(rename = "uPnL", with = "rust_decimal::serde::str")]
    pub u_pnl: Decimal,
}

/// LEADERBOARDの1行（equity降順でソート済み）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardRow {
    pub user_id: Uuid,
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
    #[serde(rename = "realizedPnL", with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
}

/// GET /lobbies/{code} が返す読み取り専用サマリ
///
/// ロビーアクターへのGetStateクエリの応答でもある（テストでも使う）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    pub lobby_id: String,
    pub status: LobbyStatus,
    pub host_id: Uuid,
    pub rules: LobbyRules,
    pub seed: u64,
    pub players: Vec<PlayerInfo>,
    pub prices: BTreeMap<Asset, Decimal>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
}
