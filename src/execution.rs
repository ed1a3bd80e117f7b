use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::error::GameError;
use crate::models::{now_millis, Asset, PlayerState, PositionSide, Side};

// =============================================================================
// 約定エンジン
// =============================================================================
//
// 成行注文1件をプレイヤーのポジション/現金/実現損益に反映します。
// 反対方向の建玉が先に決済され（買いはショートカバー、売りはロング決済）、
// 残量で新規建て/積み増しが行われます。
//
// ロビーの現在値とプレイヤー状態だけの関数なので、同一ティック内の
// 異なるプレイヤーの注文同士は順序を問わず結果が変わりません。
// 同一プレイヤーの注文列だけが（ロビーアクターの所有によって）直列化されます。

/// 成行注文を執行する
///
/// # 引数
/// - prices: ロビーの現在値（サーバ権威の約定価格）
/// - pl: 注文者の状態（成功時のみ末端まで反映される。下記の部分約定を除く）
/// - qty: 正の数量（境界でバリデーション済み）
///
/// # 戻り値
/// - Ok(約定価格) / Err(InsufficientCash)
///
/// 買い注文でショートカバーの後にロング建ての現金が足りない場合、
/// カバー側の決済（ポジション・現金・実現損益・履歴）は確定したまま
/// ロング側だけが丸ごと拒否される。「カバーは約定、残りは資金不足」という
/// 部分約定の扱いで、カバー分の状態は内部的に一貫している。
pub fn execute_market(
    prices: &BTreeMap<Asset, Decimal>,
    pl: &mut PlayerState,
    asset: Asset,
    side: Side,
    qty: i64,
) -> Result<Decimal, GameError> {
    let price = *prices.get(&asset).ok_or(GameError::InvalidOrder)?;
    let mut rest = qty;
    let mut cash = pl.cash;
    let mut pos = pl.positions.get(&asset).copied().unwrap_or_default();

    match side {
        Side::Buy => {
            // ショートがあればまずカバー（1単位ごとに実現損益 = 建値 - 現値）
            if pos.qty < 0 {
                let cover = rest.min(-pos.qty);
                if cover > 0 {
                    pl.record_trade(
                        asset,
                        PositionSide::Short,
                        cover,
                        pos.avg_price,
                        price,
                        pos.open_ts,
                    );
                    cash -= price * Decimal::from(cover);
                    pos.qty += cover;
                    if pos.qty == 0 {
                        pos.reset();
                    }
                    rest -= cover;
                }
            }

            // 残量でロングを開く/積み増す
            if rest > 0 {
                let cost = price * Decimal::from(rest);
                if cash < cost {
                    // カバー分だけ確定し、ロング側は全量拒否
                    pl.positions.insert(asset, pos);
                    pl.cash = cash;
                    return Err(GameError::InsufficientCash);
                }
                if pos.qty > 0 {
                    // 平均取得価格をブレンド
                    pos.avg_price = (pos.avg_price * Decimal::from(pos.qty)
                        + price * Decimal::from(rest))
                        / Decimal::from(pos.qty + rest);
                } else {
                    pos.avg_price = price;
                }
                pos.qty += rest;
                cash -= cost;
                if pos.open_ts.is_none() {
                    pos.open_ts = Some(now_millis());
                }
            }
        }
        Side::Sell => {
            // ロングがあればまず決済（実現損益 = 現値 - 建値）
            if pos.qty > 0 {
                let close_qty = rest.min(pos.qty);
                if close_qty > 0 {
                    pl.record_trade(
                        asset,
                        PositionSide::Long,
                        close_qty,
                        pos.avg_price,
                        price,
                        pos.open_ts,
                    );
                    cash += price * Decimal::from(close_qty);
                    pos.qty -= close_qty;
                    if pos.qty == 0 {
                        pos.reset();
                    }
                    rest -= close_qty;
                }
            }

            // 残量でショートを開く/積み増す（売り建ては現金が入るのでチェック不要）
            if rest > 0 {
                if pos.qty < 0 {
                    // 絶対数量で平均をブレンド
                    pos.avg_price = (pos.avg_price * Decimal::from(-pos.qty)
                        + price * Decimal::from(rest))
                        / Decimal::from(-pos.qty + rest);
                } else {
                    pos.avg_price = price;
                }
                pos.qty -= rest;
                cash += price * Decimal::from(rest);
                if pos.open_ts.is_none() {
                    pos.open_ts = Some(now_millis());
                }
            }
        }
    }

    pl.positions.insert(asset, pos);
    pl.cash = cash;
    Ok(price)
}
