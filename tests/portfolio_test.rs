use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rust_trading_game::execution::execute_market;
use rust_trading_game::messages::ServerMessage;
use rust_trading_game::models::{Asset, PlayerState, Side};
use rust_trading_game::portfolio::{leaderboard, snapshot_portfolio, unrealized_pnl};

fn prices_at(p: Decimal) -> BTreeMap<Asset, Decimal> {
    Asset::ALL.iter().map(|a| (*a, p)).collect()
}

#[test]
fn test_unrealized_pnl_by_direction() {
    // ロング: (現値 - 建値)·qty
    assert_eq!(unrealized_pnl(10, dec!(100), dec!(110)), dec!(100));
    // ショート: (建値 - 現値)·|qty|
    assert_eq!(unrealized_pnl(-10, dec!(100), dec!(90)), dec!(100));
    assert_eq!(unrealized_pnl(-10, dec!(100), dec!(110)), dec!(-100));
    // フラットは常に0
    assert_eq!(unrealized_pnl(0, Decimal::ZERO, dec!(123.45)), Decimal::ZERO);
}

#[test]
fn test_snapshot_totals() {
    let mut pl = PlayerState::new(Uuid::new_v4(), "alice".to_string(), dec!(10000));
    execute_market(&prices_at(dec!(100)), &mut pl, Asset::Oil, Side::Buy, 10).unwrap();

    // 価格が110に動いた時点のスナップショット
    let snap = snapshot_portfolio(&prices_at(dec!(110)), &pl);
    let ServerMessage::Portfolio {
        cash,
        equity,
        u_pnl,
        realized_pnl,
        positions,
        trades,
    } = snap
    else {
        panic!("expected PORTFOLIO");
    };

    assert_eq!(cash, dec!(9000));
    assert_eq!(equity, dec!(10100)); // 9000 + 10*110
    assert_eq!(u_pnl, dec!(100));
    assert_eq!(realized_pnl, Decimal::ZERO);
    assert_eq!(positions.len(), Asset::ALL.len());
    assert!(trades.is_empty());

    let oil = positions.iter().find(|r| r.asset == Asset::Oil).unwrap();
    assert_eq!(oil.qty, 10);
    assert_eq!(oil.avg, dec!(100));
    assert_eq!(oil.mkt_value, dec!(1100));
    assert_eq!(oil.u_pnl, dec!(100));
}

#[test]
fn test_snapshot_includes_only_recent_50_trades() {
    let mut pl = PlayerState::new(Uuid::new_v4(), "bob".to_string(), dec!(1000000));

    // 60回の往復決済を作る
    for i in 0..60i64 {
        let p = Decimal::from(100 + i);
        execute_market(&prices_at(p), &mut pl, Asset::Gold, Side::Buy, 1).unwrap();
        execute_market(&prices_at(p), &mut pl, Asset::Gold, Side::Sell, 1).unwrap();
    }
    assert_eq!(pl.trades.len(), 60);

    let snap = snapshot_portfolio(&prices_at(dec!(100)), &pl);
    let ServerMessage::Portfolio { trades, .. } = snap else {
        panic!("expected PORTFOLIO");
    };

    // 直近50件だけが時系列順で入る
    assert_eq!(trades.len(), 50);
    assert_eq!(trades.first().unwrap().entry_price, Decimal::from(110));
    assert_eq!(trades.last().unwrap().entry_price, Decimal::from(159));
}

#[test]
fn test_leaderboard_sorted_by_equity_desc() {
    let prices = prices_at(dec!(100));
    let mut players = HashMap::new();

    for (name, cash) in [("low", dec!(150)), ("high", dec!(300)), ("mid", dec!(200))] {
        let pl = PlayerState::new(Uuid::new_v4(), name.to_string(), cash);
        players.insert(pl.user_id, pl);
    }

    let ServerMessage::Leaderboard { rows } = leaderboard(&prices, &players) else {
        panic!("expected LEADERBOARD");
    };

    let equities: Vec<Decimal> = rows.iter().map(|r| r.equity).collect();
    assert_eq!(equities, vec![dec!(300), dec!(200), dec!(150)]);
    assert_eq!(rows[0].name, "high");
}

#[test]
fn test_leaderboard_marks_positions_to_market() {
    let prices = prices_at(dec!(120));
    let mut players = HashMap::new();

    // 100で10枚買った後、価格120: equity = 9000 + 1200 = 10200
    let mut pl = PlayerState::new(Uuid::new_v4(), "carol".to_string(), dec!(10000));
    execute_market(&prices_at(dec!(100)), &mut pl, Asset::Oil, Side::Buy, 10).unwrap();
    players.insert(pl.user_id, pl);

    let ServerMessage::Leaderboard { rows } = leaderboard(&prices, &players) else {
        panic!("expected LEADERBOARD");
    };
    assert_eq!(rows[0].equity, dec!(10200));
}
