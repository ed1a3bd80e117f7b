use std::env;

use dotenvy::dotenv;

/// サーバの起動設定
///
/// すべて環境変数（または.env）から読み、未指定はデフォルトに落ちる
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP/WebSocketの待ち受けポート
    pub port: u16,
    /// デモクライアントを置く静的ファイルディレクトリ
    pub static_dir: String,
    /// ENDEDになったロビーを台帳から回収するまでの秒数
    pub lobby_ttl_secs: u64,
}

pub fn load() -> ServerConfig {
    // .envがあれば読み込む（なくてもよい）
    let _ = dotenv();

    let port = env::var("PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(8000);
    let static_dir = env::var("STATIC_DIR").unwrap_or_else(|_| "static".to_string());
    let lobby_ttl_secs = env::var("LOBBY_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(300);

    ServerConfig {
        port,
        static_dir,
        lobby_ttl_secs,
    }
}
