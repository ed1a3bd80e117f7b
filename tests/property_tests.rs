//! ランダム入力の下で帳簿の不変条件が保たれることを確認する性質テスト

use std::collections::BTreeMap;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use rust_trading_game::execution::execute_market;
use rust_trading_game::models::{Asset, PlayerState, Side};
use rust_trading_game::pricing::{initial_prices, step_prices, PRICE_TICK};

fn mk_prices(p: Decimal) -> BTreeMap<Asset, Decimal> {
    Asset::ALL.iter().map(|a| (*a, p)).collect()
}

fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Buy), Just(Side::Sell)]
}

// $0.01 〜 $1000.00
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000i64).prop_map(|x| Decimal::new(x, 2))
}

fn ops_strategy() -> impl Strategy<Value = Vec<(Side, i64, Decimal)>> {
    prop::collection::vec((side_strategy(), 1i64..50, price_strategy()), 1..40)
}

proptest! {
    /// フラット不変条件: qty=0 なら常に avg=0 かつ open_ts=None
    #[test]
    fn flat_invariant_under_random_orders(ops in ops_strategy()) {
        let mut pl = PlayerState::new(Uuid::new_v4(), "p".to_string(), dec!(1000000));
        for (side, qty, price) in ops {
            let prices = mk_prices(price);
            let _ = execute_market(&prices, &mut pl, Asset::Oil, side, qty);

            let pos = pl.positions[&Asset::Oil];
            if pos.qty == 0 {
                prop_assert_eq!(pos.avg_price, Decimal::ZERO);
                prop_assert!(pos.open_ts.is_none());
            } else {
                prop_assert!(pos.open_ts.is_some());
            }
        }
    }

    /// 現金保存則: 約定した数量×価格の分だけしか現金は動かない。
    /// 買いが資金不足で弾かれた場合もカバー約定分だけが動く。
    #[test]
    fn cash_moves_exactly_with_fills(ops in ops_strategy()) {
        let mut pl = PlayerState::new(Uuid::new_v4(), "p".to_string(), dec!(1000000));
        let mut expected = dec!(1000000);

        for (side, qty, price) in ops {
            let prices = mk_prices(price);
            let short_before = (-pl.positions[&Asset::Oil].qty).max(0);

            match execute_market(&prices, &mut pl, Asset::Oil, side, qty) {
                Ok(_) => match side {
                    Side::Buy => expected -= price * Decimal::from(qty),
                    Side::Sell => expected += price * Decimal::from(qty),
                },
                Err(_) => {
                    // 拒否されるのはロング建ての脚だけ。カバー分は確定済み
                    let cover = qty.min(short_before);
                    expected -= price * Decimal::from(cover);
                }
            }
            prop_assert_eq!(pl.cash, expected);
        }
    }

    /// 価格フロア: どのシードでも価格は1ティックを下回らない
    #[test]
    fn price_floor_for_any_seed(seed in any::<u64>(), steps in 1usize..300) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut prices = initial_prices();
        for _ in 0..steps {
            step_prices(&mut prices, &mut rng);
        }
        for asset in Asset::ALL {
            prop_assert!(prices[&asset] >= PRICE_TICK);
        }
    }
}
