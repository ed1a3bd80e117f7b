use std::collections::BTreeMap;
use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::Rng;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::models::Asset;

/// 価格の最小刻み。価格はこれ未満には決して落ちない（ゼロ・負値の防止）
pub const PRICE_TICK: Decimal = dec!(0.01);

/// 全資産の初期価格
pub const BASE_PRICE: Decimal = dec!(100.00);

/// ロビー作成時に採番する価格パスのシード（LOBBY_STATEで公開される）
pub fn gen_seed() -> u64 {
    rand::rng().random_range(1..=10_000)
}

/// 全資産を初期価格で埋めた価格マップを作る
pub fn initial_prices() -> BTreeMap<Asset, Decimal> {
    Asset::ALL.iter().map(|a| (*a, BASE_PRICE)).collect()
}

/// 最寄りの価格刻みに丸め、1刻みを下限としてクランプする
///
/// round_dpは銀行丸め（偶数丸め）なのでPythonクライアント時代の挙動とも一致する
pub fn round_tick(x: f64) -> Decimal {
    let d = Decimal::from_f64(x).unwrap_or(PRICE_TICK);
    d.round_dp(2).max(PRICE_TICK)
}

/// 全資産の価格を1ティック進める
///
/// 資産ごとにドリフト + ノイズのランダムウォーク:
/// Box-Muller法で標準正規乱数 z を1つ作り、
/// ε = z·σ/√30、新価格 = p·(1 + d/30 + ε) とする。
/// 乱数源はロビー専用のシード済みRNG（ロビー間で共有しない。
/// 再現性と隔離の両方がこれに依存している）。
pub fn step_prices(prices: &mut BTreeMap<Asset, Decimal>, rng: &mut StdRng) {
    for asset in Asset::ALL {
        let p = prices
            .get(&asset)
            .and_then(|d| d.to_f64())
            .unwrap_or(0.01);

        let drift = asset.drift();
        let sigma = asset.volatility();

        // log(0)を避けるためu1は下から離しておく
        let u1: f64 = rng.random::<f64>().max(1e-9);
        let u2: f64 = rng.random();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();

        // 1単位時間=30ステップ相当にスケールする
        let eps = z * sigma / 30f64.sqrt();
        let newp = p * (1.0 + drift / 30.0 + eps);

        prices.insert(asset, round_tick(newp));
    }
}
