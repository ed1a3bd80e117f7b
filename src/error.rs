use thiserror::Error;

/// ゲームのビジネスルール違反
///
/// Displayの文字列がそのままワイヤ上のreasonコードになる
/// （ERROR / ORDER_REJECT のペイロードに載る）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("lobby_not_found")]
    LobbyNotFound,

    #[error("lobby_not_joinable")]
    LobbyNotJoinable,

    #[error("not_host")]
    NotHost,

    #[error("players_not_ready")]
    PlayersNotReady,

    #[error("insufficient_cash")]
    InsufficientCash,

    /// 不正な注文（未知の資産、不正なside、数量0以下）
    #[error("invalid")]
    InvalidOrder,
}
