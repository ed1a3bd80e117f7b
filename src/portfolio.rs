use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::messages::{LeaderboardRow, PositionRow, ServerMessage};
use crate::models::{Asset, PlayerState};

/// スナップショットに含める直近トレード数（保持上限200のうち表示分だけ）
const SNAPSHOT_TRADES: usize = 50;

/// 建玉の含み損益を計算する
///
/// ロング: (現値 - 建値)·qty、ショート: (建値 - 現値)·|qty|、フラット: 0
pub fn unrealized_pnl(qty: i64, avg: Decimal, price: Decimal) -> Decimal {
    if qty > 0 {
        (price - avg) * Decimal::from(qty)
    } else if qty < 0 {
        (avg - price) * Decimal::from(-qty)
    } else {
        Decimal::ZERO
    }
}

/// 1プレイヤーのポートフォリオを読み取り専用で射影する
///
/// 資産ごとの行 + 合計（equity = cash + Σ時価総額）。状態は一切変更しない。
pub fn snapshot_portfolio(prices: &BTreeMap<Asset, Decimal>, pl: &PlayerState) -> ServerMessage {
    let mut upnl_total = Decimal::ZERO;
    let mut mkt_value_total = Decimal::ZERO;
    let mut rows = Vec::with_capacity(Asset::ALL.len());

    for asset in Asset::ALL {
        let pos = pl.positions.get(&asset).copied().unwrap_or_default();
        let price = prices.get(&asset).copied().unwrap_or_default();
        let upnl = unrealized_pnl(pos.qty, pos.avg_price, price);
        let mkt_value = Decimal::from(pos.qty) * price;
        upnl_total += upnl;
        mkt_value_total += mkt_value;
        rows.push(PositionRow {
            asset,
            qty: pos.qty,
            avg: pos.avg_price.round_dp(2),
            price: price.round_dp(2),
            mkt_value: mkt_value.round_dp(2),
            u_pnl: upnl.round_dp(2),
        });
    }

    let equity = pl.cash + mkt_value_total;
    let trades = pl
        .trades
        .iter()
        .skip(pl.trades.len().saturating_sub(SNAPSHOT_TRADES))
        .cloned()
        .collect();

    ServerMessage::Portfolio {
        cash: pl.cash.round_dp(2),
        equity: equity.round_dp(2),
        u_pnl: upnl_total.round_dp(2),
        realized_pnl: pl.realized_pnl.round_dp(2),
        positions: rows,
        trades,
    }
}

/// ロビー全員の時価評価ランキングを作る
///
/// equity降順。毎回その場で再計算する（キャッシュしない）。
pub fn leaderboard(
    prices: &BTreeMap<Asset, Decimal>,
    players: &HashMap<Uuid, PlayerState>,
) -> ServerMessage {
    let mut rows: Vec<LeaderboardRow> = players
        .values()
        .map(|pl| {
            let mut mv = Decimal::ZERO;
            for asset in Asset::ALL {
                let qty = pl.positions.get(&asset).map(|p| p.qty).unwrap_or(0);
                let price = prices.get(&asset).copied().unwrap_or_default();
                mv += Decimal::from(qty) * price;
            }
            LeaderboardRow {
                user_id: pl.user_id,
                name: pl.name.clone(),
                equity: (pl.cash + mv).round_dp(2),
                realized_pnl: pl.realized_pnl.round_dp(2),
            }
        })
        .collect();

    rows.sort_by(|a, b| b.equity.cmp(&a.equity));
    ServerMessage::Leaderboard { rows }
}
