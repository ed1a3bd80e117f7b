use std::collections::HashMap;

use futures::future::join_all;
use rand::Rng;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use crate::lobby::LobbyMessage;
use crate::messages::ServerMessage;

/// 接続ごとの送信キュー（WebSocketタスクがもう一端を持つ）
pub type ConnTx = mpsc::UnboundedSender<ServerMessage>;

/// ロビーアクターへのメールボックス
pub type LobbyHandle = mpsc::Sender<LobbyMessage>;

// 紛らわしい文字（0/O, 1/I）を除いた招待コード用アルファベット
const LOBBY_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ23456789";
const LOBBY_CODE_LEN: usize = 6;

// =============================================================================
// セッション/ルーティングディレクトリ
// =============================================================================
//
// プロセス全体で1つだけ構築され、接続・ユーザー・ロビーの対応を握る台帳。
// ここにあるのは純粋なルーティング情報だけで、ドメイン状態（ポートフォリオ等）
// は各ロビーアクターが所有します。
//
// - userId → 接続送信キュー: 最後に認証した接続が勝つ（再接続対応）
// - userId → ロビーコード: ユーザーは同時に1ロビーまで
// - ロビーコード → アクターのメールボックス
//
// 切断時は接続の対応だけを消し、ロビー所属とポートフォリオは残します。
// 同じuserIdで繋ぎ直せばゲーム状態を失わずに復帰できます。

#[derive(Default)]
pub struct Directory {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    conn_by_user: HashMap<Uuid, ConnTx>,
    lobby_by_user: HashMap<Uuid, String>,
    lobbies: HashMap<String, LobbyHandle>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接続を登録する（同じuserIdの既存エントリは黙って置き換える）
    ///
    /// 置き換えられた古い接続は閉じない。古い側のソケットはそのまま残り、
    /// ルーティングからだけ外れる。
    pub async fn register(&self, user_id: Uuid, tx: ConnTx) {
        let mut inner = self.inner.write().await;
        inner.conn_by_user.insert(user_id, tx);
    }

    /// 接続を解除する
    ///
    /// チャネルの同一性を確認してから消す: 再接続で置き換えられた後に
    /// 古い接続の後始末が走っても、新しい接続のエントリを消してしまわない。
    /// ロビー所属はここでは触らない（再接続のために維持する）。
    pub async fn unregister(&self, user_id: &Uuid, tx: &ConnTx) {
        let mut inner = self.inner.write().await;
        if inner
            .conn_by_user
            .get(user_id)
            .map(|t| t.same_channel(tx))
            .unwrap_or(false)
        {
            inner.conn_by_user.remove(user_id);
        }
    }

    /// 1ユーザーに送信する
    ///
    /// 送信失敗（受信側タスク消滅）はここで握りつぶし、死んだエントリを
    /// 台帳から外す。呼び出し側にエラーは伝播しない。
    pub async fn send_to_user(&self, user_id: &Uuid, msg: ServerMessage) {
        let tx = {
            let inner = self.inner.read().await;
            inner.conn_by_user.get(user_id).cloned()
        };
        let Some(tx) = tx else { return };

        if tx.send(msg).is_err() {
            debug!(%user_id, "send to closed connection, dropping routing entry");
            self.unregister(user_id, &tx).await;
        }
    }

    /// 複数ユーザーへ同じメッセージを配る
    ///
    /// 1宛先の失敗が他の配送を止めることはない
    pub async fn broadcast(&self, user_ids: &[Uuid], msg: &ServerMessage) {
        join_all(
            user_ids
                .iter()
                .map(|uid| self.send_to_user(uid, msg.clone())),
        )
        .await;
    }

    pub async fn bind_lobby(&self, user_id: Uuid, code: String) {
        let mut inner = self.inner.write().await;
        inner.lobby_by_user.insert(user_id, code);
    }

    pub async fn unbind_lobby(&self, user_id: &Uuid) {
        let mut inner = self.inner.write().await;
        inner.lobby_by_user.remove(user_id);
    }

    /// 指定ロビーに所属している場合だけ所属を外す
    ///
    /// 終了ロビーの回収時に使う: すでに別ロビーへ移ったユーザーの
    /// 新しい所属を巻き添えにしない
    pub async fn unbind_lobby_from(&self, user_id: &Uuid, code: &str) {
        let mut inner = self.inner.write().await;
        if inner.lobby_by_user.get(user_id).map(String::as_str) == Some(code) {
            inner.lobby_by_user.remove(user_id);
        }
    }

    /// ユーザーの所属ロビーコード
    pub async fn lobby_of(&self, user_id: &Uuid) -> Option<String> {
        let inner = self.inner.read().await;
        inner.lobby_by_user.get(user_id).cloned()
    }

    /// コードからロビーアクターのメールボックスを引く
    pub async fn lobby_handle(&self, code: &str) -> Option<LobbyHandle> {
        let inner = self.inner.read().await;
        inner.lobbies.get(code).cloned()
    }

    /// ユーザーの所属ロビーのメールボックスを引く（未所属ならNone）
    pub async fn handle_for_user(&self, user_id: &Uuid) -> Option<LobbyHandle> {
        let inner = self.inner.read().await;
        let code = inner.lobby_by_user.get(user_id)?;
        inner.lobbies.get(code).cloned()
    }

    /// 新しいロビーを登録し、採番した招待コードを返す
    ///
    /// コードの採番と登録を1つの書き込みロックの中で行うので、
    /// 同時作成でも衝突しない（生存中のコード集合と照合する）
    pub async fn insert_lobby(&self, handle: LobbyHandle) -> String {
        let mut inner = self.inner.write().await;
        // rand::rng()は!Sendなのでawaitをまたがないスコープで使い切る
        let code = {
            let mut rng = rand::rng();
            loop {
                let candidate: String = (0..LOBBY_CODE_LEN)
                    .map(|_| {
                        let i = rng.random_range(0..LOBBY_CODE_ALPHABET.len());
                        LOBBY_CODE_ALPHABET[i] as char
                    })
                    .collect();
                if !inner.lobbies.contains_key(&candidate) {
                    break candidate;
                }
            }
        };
        inner.lobbies.insert(code.clone(), handle);
        code
    }

    /// ロビーを台帳から外す（終了後のリープ・空ロビーの即時解体で使う）
    pub async fn remove_lobby(&self, code: &str) {
        let mut inner = self.inner.write().await;
        inner.lobbies.remove(code);
    }

    /// 登録中のロビー数（/health と運用ログ用）
    pub async fn lobby_count(&self) -> usize {
        self.inner.read().await.lobbies.len()
    }
}
