use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::directory::{Directory, LobbyHandle};
use crate::error::GameError;
use crate::execution::execute_market;
use crate::messages::{LobbySummary, PlayerInfo, ServerMessage};
use crate::models::{now_millis, Asset, LobbyRules, LobbyStatus, PlayerState, Side};
use crate::portfolio::{leaderboard, snapshot_portfolio};
use crate::pricing::{gen_seed, initial_prices, step_prices};

// =============================================================================
// ロビーアクター
// =============================================================================
//
// ロビー1つにつきタスクを1つ立て、そのタスクがLobbyStateを専有します。
// 価格・プレイヤー・ステータスへの書き込みはすべてこのタスク経由なので、
// ティックループと注文処理が同じロビーを同時に触って帳簿を壊すことは
// 構造的に起きません。ロビー同士は完全に独立で、調整は不要です。
//
// ゲームプレイ系のメッセージは応答チャネルを持ちません。結果のワイヤ
// メッセージ（ERROR / ORDER_ACCEPTED / 各種ブロードキャスト）はアクター
// 自身がディレクトリ経由で送るため、クライアントから見た配信順序が
// ハンドラ内の処理順と常に一致します。oneshotでの応答はGetStateクエリ
// （HTTPの照会ルートとテスト）だけが使います。

/// ロビーアクターに送るメッセージ
pub enum LobbyMessage {
    /// 参加（再参加なら表示名を更新してready解除）
    Join { user_id: Uuid, name: String },
    /// 準備完了フラグの更新（Open中のメンバーのみ有効）
    SetReady { user_id: Uuid, ready: bool },
    /// ゲーム開始（ホストのみ、全員readyが条件）
    Start { user_id: Uuid },
    /// 成行注文（境界でバリデーション済みの値が来る）
    Order {
        user_id: Uuid,
        asset: Asset,
        side: Side,
        qty: i64,
    },
    /// 退出
    Leave { user_id: Uuid },
    /// ティッカータスクからの周期信号
    Tick,
    /// 終了済みロビーの回収（TTL経過後に自分宛てに届く）
    Reap,
    /// 現在状態のスナップショットを見せてください
    GetState {
        respond_to: oneshot::Sender<LobbySummary>,
    },
}

/// 1ロビーの全状態。アクタータスクだけが所有する。
pub struct LobbyState {
    pub lobby_id: String,
    pub status: LobbyStatus,
    pub host_id: Uuid,
    pub rules: LobbyRules,
    pub seed: u64,
    rng: StdRng,
    pub prices: BTreeMap<Asset, Decimal>,
    pub players: HashMap<Uuid, PlayerState>,
    pub start_ts: Option<i64>,
    pub end_ts: Option<i64>,
    /// Running中だけ存在するティッカータスクのハンドル
    ticker_task: Option<JoinHandle<()>>,
    reap_ttl: Duration,
}

impl LobbyState {
    pub fn new(lobby_id: String, host_id: Uuid, rules: LobbyRules, reap_ttl: Duration) -> Self {
        let seed = gen_seed();
        Self {
            lobby_id,
            status: LobbyStatus::Open,
            host_id,
            rules,
            seed,
            // ロビー専用のシード済み乱数源。価格パスの再現性はこれで決まる
            rng: StdRng::seed_from_u64(seed),
            prices: initial_prices(),
            players: HashMap::new(),
            start_ts: None,
            end_ts: None,
            ticker_task: None,
            reap_ttl,
        }
    }

    fn member_ids(&self) -> Vec<Uuid> {
        self.players.keys().copied().collect()
    }

    fn lobby_state_payload(&self) -> ServerMessage {
        ServerMessage::LobbyState {
            lobby_id: self.lobby_id.clone(),
            status: self.status,
            host_id: self.host_id,
            rules: self.rules.clone(),
            players: self
                .players
                .values()
                .map(|pl| PlayerInfo {
                    user_id: pl.user_id,
                    name: pl.name.clone(),
                    ready: pl.ready,
                })
                .collect(),
            seed: self.seed,
        }
    }

    fn summary(&self) -> LobbySummary {
        LobbySummary {
            lobby_id: self.lobby_id.clone(),
            status: self.status,
            host_id: self.host_id,
            rules: self.rules.clone(),
            seed: self.seed,
            players: self
                .players
                .values()
                .map(|pl| PlayerInfo {
                    user_id: pl.user_id,
                    name: pl.name.clone(),
                    ready: pl.ready,
                })
                .collect(),
            prices: self.prices.clone(),
            start_ts: self.start_ts,
            end_ts: self.end_ts,
        }
    }
}

/// 新しいロビーを立ち上げる
///
/// コードの採番・台帳への登録・アクターの起動までを行い、
/// (招待コード, メールボックス) を返す。ホストの入室は呼び出し側が
/// Joinメッセージで行う（参加処理を1箇所に集約するため）。
pub async fn spawn_lobby(
    directory: &Arc<Directory>,
    host_id: Uuid,
    rules: LobbyRules,
    reap_ttl: Duration,
) -> (String, LobbyHandle) {
    let (tx, rx) = mpsc::channel(64);
    let code = directory.insert_lobby(tx.clone()).await;
    let lobby = LobbyState::new(code.clone(), host_id, rules, reap_ttl);
    info!(lobby = %code, host = %host_id, "lobby created");
    tokio::spawn(run_lobby(lobby, rx, tx.clone(), directory.clone()));
    (code, tx)
}

async fn broadcast_lobby(directory: &Directory, lobby: &LobbyState, msg: ServerMessage) {
    directory.broadcast(&lobby.member_ids(), &msg).await;
}

/// ロビーアクターを実行する（Actor Loop）
///
/// メールボックスが閉じるか、ロビーが解体されるまで回り続ける
pub async fn run_lobby(
    mut lobby: LobbyState,
    mut rx: mpsc::Receiver<LobbyMessage>,
    tx: mpsc::Sender<LobbyMessage>,
    directory: Arc<Directory>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            LobbyMessage::Join { user_id, name } => {
                if lobby.status != LobbyStatus::Open {
                    directory
                        .send_to_user(
                            &user_id,
                            ServerMessage::Error {
                                code: GameError::LobbyNotJoinable.to_string(),
                            },
                        )
                        .await;
                    continue;
                }
                let starting_capital = lobby.rules.starting_capital;
                let pl = lobby
                    .players
                    .entry(user_id)
                    .or_insert_with(|| PlayerState::new(user_id, name.clone(), starting_capital));
                // 再参加は表示名の更新のみ。readyは毎回取り直し
                pl.name = name;
                pl.ready = false;
                directory.bind_lobby(user_id, lobby.lobby_id.clone()).await;
                broadcast_lobby(&directory, &lobby, lobby.lobby_state_payload()).await;
            }

            LobbyMessage::SetReady { user_id, ready } => {
                if lobby.status != LobbyStatus::Open {
                    continue;
                }
                // メンバーでなければ何もしない
                if let Some(pl) = lobby.players.get_mut(&user_id) {
                    pl.ready = ready;
                    broadcast_lobby(&directory, &lobby, lobby.lobby_state_payload()).await;
                }
            }

            LobbyMessage::Start { user_id } => {
                // Open以外からのStartは黙殺。Running中の二重Startもここで
                // 吸収されるので、ティッカーが重複して立つことはない
                if lobby.status != LobbyStatus::Open {
                    continue;
                }
                if user_id != lobby.host_id {
                    directory
                        .send_to_user(
                            &user_id,
                            ServerMessage::Error {
                                code: GameError::NotHost.to_string(),
                            },
                        )
                        .await;
                    continue;
                }
                if lobby.players.is_empty() || !lobby.players.values().all(|p| p.ready) {
                    directory
                        .send_to_user(
                            &user_id,
                            ServerMessage::Error {
                                code: GameError::PlayersNotReady.to_string(),
                            },
                        )
                        .await;
                    continue;
                }

                lobby.status = LobbyStatus::Running;
                let now = now_millis();
                let end = now + lobby.rules.duration_sec as i64 * 1000;
                lobby.start_ts = Some(now);
                lobby.end_ts = Some(end);
                broadcast_lobby(&directory, &lobby, lobby.lobby_state_payload()).await;
                broadcast_lobby(
                    &directory,
                    &lobby,
                    ServerMessage::GameStarted {
                        start_ts: now,
                        end_ts: end,
                    },
                )
                .await;

                if lobby.ticker_task.is_none() {
                    let period = Duration::from_secs(lobby.rules.tick_seconds);
                    let ticker_tx = tx.clone();
                    lobby.ticker_task = Some(tokio::spawn(async move {
                        let mut interval = tokio::time::interval(period);
                        loop {
                            // 初回は即時に発火する（開始直後に最初のティックが届く）
                            interval.tick().await;
                            if ticker_tx.send(LobbyMessage::Tick).await.is_err() {
                                break;
                            }
                        }
                    }));
                }
                info!(lobby = %lobby.lobby_id, "game started");
            }

            LobbyMessage::Order {
                user_id,
                asset,
                side,
                qty,
            } => {
                // Running以外での注文は黙って無視する
                if lobby.status != LobbyStatus::Running {
                    continue;
                }
                let Some(pl) = lobby.players.get_mut(&user_id) else {
                    continue;
                };
                match execute_market(&lobby.prices, pl, asset, side, qty) {
                    Ok(price) => {
                        directory
                            .send_to_user(
                                &user_id,
                                ServerMessage::OrderAccepted {
                                    asset,
                                    side,
                                    qty,
                                    price: price.round_dp(2),
                                },
                            )
                            .await;
                        let snap = snapshot_portfolio(&lobby.prices, pl);
                        directory.send_to_user(&user_id, snap).await;
                        broadcast_lobby(
                            &directory,
                            &lobby,
                            leaderboard(&lobby.prices, &lobby.players),
                        )
                        .await;
                    }
                    Err(e) => {
                        directory
                            .send_to_user(
                                &user_id,
                                ServerMessage::OrderReject {
                                    reason: e.to_string(),
                                },
                            )
                            .await;
                    }
                }
            }

            LobbyMessage::Leave { user_id } => {
                lobby.players.remove(&user_id);
                directory.unbind_lobby(&user_id).await;
                broadcast_lobby(&directory, &lobby, lobby.lobby_state_payload()).await;

                // 全員去ったロビーは残しておく理由がないので即座に畳む
                if lobby.players.is_empty() {
                    if let Some(h) = lobby.ticker_task.take() {
                        h.abort();
                    }
                    directory.remove_lobby(&lobby.lobby_id).await;
                    info!(lobby = %lobby.lobby_id, "lobby emptied, torn down");
                    break;
                }
            }

            LobbyMessage::Tick => {
                // Ended後にキューへ残っていたTickは捨てる
                if lobby.status != LobbyStatus::Running {
                    continue;
                }
                let now = now_millis();
                let end_ts = lobby.end_ts.unwrap_or(now);

                if now >= end_ts {
                    lobby.status = LobbyStatus::Ended;
                    if let Some(h) = lobby.ticker_task.take() {
                        h.abort();
                    }
                    broadcast_lobby(
                        &directory,
                        &lobby,
                        ServerMessage::GameEnded {
                            lobby_id: lobby.lobby_id.clone(),
                        },
                    )
                    .await;
                    broadcast_lobby(
                        &directory,
                        &lobby,
                        leaderboard(&lobby.prices, &lobby.players),
                    )
                    .await;

                    // TTL経過後に自分宛てへ回収信号を送る
                    let reap_tx = tx.clone();
                    let ttl = lobby.reap_ttl;
                    tokio::spawn(async move {
                        tokio::time::sleep(ttl).await;
                        let _ = reap_tx.send(LobbyMessage::Reap).await;
                    });
                    info!(lobby = %lobby.lobby_id, "game ended");
                    continue;
                }

                step_prices(&mut lobby.prices, &mut lobby.rng);
                broadcast_lobby(
                    &directory,
                    &lobby,
                    ServerMessage::Tick {
                        ts: now,
                        prices: lobby.prices.clone(),
                        remaining_sec: (end_ts - now) / 1000,
                    },
                )
                .await;

                // ポートフォリオは個別配信、ランキングは全員へ
                for (uid, pl) in &lobby.players {
                    directory
                        .send_to_user(uid, snapshot_portfolio(&lobby.prices, pl))
                        .await;
                }
                broadcast_lobby(
                    &directory,
                    &lobby,
                    leaderboard(&lobby.prices, &lobby.players),
                )
                .await;
            }

            LobbyMessage::Reap => {
                // 残っているメンバーの所属を外し、台帳から消えて終了
                for uid in lobby.players.keys() {
                    directory.unbind_lobby_from(uid, &lobby.lobby_id).await;
                }
                directory.remove_lobby(&lobby.lobby_id).await;
                debug!(lobby = %lobby.lobby_id, "ended lobby reaped");
                break;
            }

            LobbyMessage::GetState { respond_to } => {
                let _ = respond_to.send(lobby.summary());
            }
        }
    }
}
