//! Chat front-end: trade cards (OK/SKIP) and best-effort notices. No real bot wiring;
//! the trait and its call sites in the orchestrator are the real surface.

use async_trait::async_trait;

use crate::domain::enums::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserResponse {
    Ok,
    Skip,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Sends a trade card for a trade awaiting a day-mode OK/SKIP decision.
    /// Must be sent exactly once per trade, at the SIGNALLED -> WAITING_CONFIRM edge.
    async fn send_trade_card(&self, trade_id: i64, direction: Direction, quality: f64);

    /// Polls for a user response to a previously-sent trade card. Returns `None`
    /// while no response has arrived yet.
    async fn poll_response(&self, trade_id: i64) -> Option<UserResponse>;

    /// Best-effort notice; callers swallow errors and never propagate them to cycle
    /// failure (day-end reminders, non-fatal warnings).
    async fn send_notice(&self, text: &str);
}

/// In-process stub: records sent cards and lets tests inject responses. No network I/O.
pub struct StubChatClient {
    responses: std::sync::Mutex<std::collections::HashMap<i64, UserResponse>>,
    sent_cards: std::sync::Mutex<std::collections::HashSet<i64>>,
}

impl StubChatClient {
    pub fn new() -> Self {
        Self { responses: std::sync::Mutex::new(std::collections::HashMap::new()), sent_cards: std::sync::Mutex::new(std::collections::HashSet::new()) }
    }

    /// Test/ops hook: inject the response a user would have sent.
    pub fn inject_response(&self, trade_id: i64, response: UserResponse) {
        self.responses.lock().unwrap().insert(trade_id, response);
    }

    pub fn card_was_sent(&self, trade_id: i64) -> bool {
        self.sent_cards.lock().unwrap().contains(&trade_id)
    }
}

impl Default for StubChatClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatClient for StubChatClient {
    async fn send_trade_card(&self, trade_id: i64, _direction: Direction, _quality: f64) {
        self.sent_cards.lock().unwrap().insert(trade_id);
    }

    async fn poll_response(&self, trade_id: i64) -> Option<UserResponse> {
        self.responses.lock().unwrap().get(&trade_id).copied()
    }

    async fn send_notice(&self, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trade_card_is_recorded_exactly_once() {
        let chat = StubChatClient::new();
        assert!(!chat.card_was_sent(1));
        chat.send_trade_card(1, Direction::Up, 80.0).await;
        assert!(chat.card_was_sent(1));
    }

    #[tokio::test]
    async fn poll_response_returns_none_until_injected() {
        let chat = StubChatClient::new();
        assert_eq!(chat.poll_response(1).await, None);
        chat.inject_response(1, UserResponse::Ok);
        assert_eq!(chat.poll_response(1).await, Some(UserResponse::Ok));
    }
}
