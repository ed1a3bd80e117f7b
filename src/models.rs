use std::collections::{HashMap, VecDeque};

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 1プレイヤーが保持できる約定履歴の上限（古いものから捨てるリングバッファ）
pub const MAX_TRADE_HISTORY: usize = 200;

/// ルール未指定時のデフォルト値
pub const DEFAULT_STARTING_CAPITAL: Decimal = dec!(10000);
pub const DEFAULT_TICK_SECONDS: u64 = 2;
pub const DEFAULT_DURATION_SEC: u64 = 300;

/// 現在時刻をUNIXエポックからのミリ秒で返す
///
/// ワイヤ上のタイムスタンプはすべてこの単位に統一する
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

// =============================================================================
// 資産
// =============================================================================

/// 取引可能な資産（5種類固定、プロセス生存中は不変）
///
/// 各資産は独立したドリフト/ボラティリティのパラメータを持ちます。
/// GOLDは「安全資産」としてドリフトが小さく、GOLDとRICEは低ボラティリティ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Asset {
    Oil,
    Gold,
    Electronics,
    Rice,
    Plumber,
}

impl Asset {
    pub const ALL: [Asset; 5] = [
        Asset::Oil,
        Asset::Gold,
        Asset::Electronics,
        Asset::Rice,
        Asset::Plumber,
    ];

    /// ワイヤ表記（"OIL" など）から資産をパースする
    ///
    /// 未知のシンボルはNone（注文バリデーションで reject される）
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OIL" => Some(Asset::Oil),
            "GOLD" => Some(Asset::Gold),
            "ELECTRONICS" => Some(Asset::Electronics),
            "RICE" => Some(Asset::Rice),
            "PLUMBER" => Some(Asset::Plumber),
            _ => None,
        }
    }

    /// 1ティックあたりのドリフト係数（1/30単位時間スケール適用前）
    pub fn drift(&self) -> f64 {
        match self {
            Asset::Gold => 0.02,
            _ => 0.05,
        }
    }

    /// ボラティリティ（標準偏差スケール）
    pub fn volatility(&self) -> f64 {
        match self {
            Asset::Gold | Asset::Rice => 0.15,
            _ => 0.30,
        }
    }
}

// =============================================================================
// 注文・ポジション
// =============================================================================

/// 注文の売買方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Side::Buy),
            "SELL" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// 決済された建玉の向き（ロングを閉じたのかショートを閉じたのか）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

/// 1資産に対するプレイヤーの建玉
///
/// # フィールド
/// - qty: 符号付き数量（正=ロング、負=ショート、0=フラット）
/// - avg_price: 平均取得価格
/// - open_ts: 建玉を開いた時刻（ミリ秒）
///
/// 不変条件: qty == 0 のとき avg_price == 0 かつ open_ts == None
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Position {
    pub qty: i64,
    pub avg_price: Decimal,
    pub open_ts: Option<i64>,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.qty == 0
    }

    /// フラットに戻す（不変条件を回復する）
    pub fn reset(&mut self) {
        self.qty = 0;
        self.avg_price = Decimal::ZERO;
        self.open_ts = None;
    }
}

/// 決済1回分の不変レコード
///
/// フィールド名はそのままJSONに出る（クライアントの取引履歴表示用）
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub ts: i64,
    pub asset: Asset,
    pub side_open: PositionSide,
    pub qty: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub entry_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub exit_price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub realized_pnl: Decimal,
    pub duration_sec: Option<f64>,
}

// =============================================================================
// ロビーとプレイヤー
// =============================================================================

/// ロビーのライフサイクル状態（一方向にしか進まない）
///
/// ワイヤ表記は旧クライアント互換のため LOBBY / RUNNING / ENDED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LobbyStatus {
    #[serde(rename = "LOBBY")]
    Open,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "ENDED")]
    Ended,
}

/// ロビー作成時に確定するルール（以後不変）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyRules {
    #[serde(with = "rust_decimal::serde::str")]
    pub starting_capital: Decimal,
    pub tick_seconds: u64,
    pub duration_sec: u64,
}

impl Default for LobbyRules {
    fn default() -> Self {
        Self {
            starting_capital: DEFAULT_STARTING_CAPITAL,
            tick_seconds: DEFAULT_TICK_SECONDS,
            duration_sec: DEFAULT_DURATION_SEC,
        }
    }
}

/// CREATE_LOBBYで任意指定できる部分ルール
///
/// 未指定フィールドはデフォルト値のまま。0以下の時間は1に切り上げ、
/// 正でない資本はデフォルトに戻す（サーバ権威で正規化する）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesPatch {
    pub starting_capital: Option<Decimal>,
    pub tick_seconds: Option<u64>,
    pub duration_sec: Option<u64>,
}

impl LobbyRules {
    pub fn with_patch(patch: RulesPatch) -> Self {
        let defaults = Self::default();
        let starting_capital = patch
            .starting_capital
            .filter(|c| *c > Decimal::ZERO)
            .unwrap_or(defaults.starting_capital);
        Self {
            starting_capital,
            tick_seconds: patch.tick_seconds.unwrap_or(defaults.tick_seconds).max(1),
            duration_sec: patch.duration_sec.unwrap_or(defaults.duration_sec).max(1),
        }
    }
}

/// 1ロビー内の1プレイヤーの全状態
///
/// ロビーアクターだけが可変参照を持つ。切断されてもロビーが生きている限り
/// 破棄されない（同じuserIdで再接続すればポートフォリオはそのまま）
#[derive(Debug, Clone)]
pub struct PlayerState {
    pub user_id: Uuid,
    pub name: String,
    pub ready: bool,
    pub cash: Decimal,
    pub positions: HashMap<Asset, Position>,
    pub realized_pnl: Decimal,
    pub trades: VecDeque<ClosedTrade>,
}

impl PlayerState {
    pub fn new(user_id: Uuid, name: String, starting_capital: Decimal) -> Self {
        // 全資産をフラットで初期化しておく（以後のルックアップを単純にする）
        let positions = Asset::ALL
            .iter()
            .map(|a| (*a, Position::default()))
            .collect();
        Self {
            user_id,
            name,
            ready: false,
            cash: starting_capital,
            positions,
            realized_pnl: Decimal::ZERO,
            trades: VecDeque::new(),
        }
    }

    /// 決済を記録する
    ///
    /// 実現損益を累積し、履歴リングに追加する。上限を超えたら最古を捨てる。
    pub fn record_trade(
        &mut self,
        asset: Asset,
        side_open: PositionSide,
        qty: i64,
        entry_price: Decimal,
        exit_price: Decimal,
        entry_ts: Option<i64>,
    ) {
        let realized = match side_open {
            PositionSide::Long => (exit_price - entry_price) * Decimal::from(qty),
            PositionSide::Short => (entry_price - exit_price) * Decimal::from(qty),
        };
        self.realized_pnl += realized;

        let now = now_millis();
        let duration_sec = entry_ts.map(|t| {
            let secs = (now - t) as f64 / 1000.0;
            (secs * 100.0).round() / 100.0
        });
        self.trades.push_back(ClosedTrade {
            ts: now,
            asset,
            side_open,
            qty,
            entry_price: entry_price.round_dp(4),
            exit_price: exit_price.round_dp(4),
            realized_pnl: realized.round_dp(2),
            duration_sec,
        });
        while self.trades.len() > MAX_TRADE_HISTORY {
            self.trades.pop_front();
        }
    }
}
