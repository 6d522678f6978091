use std::sync::Arc;

use tracing::instrument;

use crate::db::prelude::{ActivationStore, GroupId, ScoreStore, UserId};
use crate::engine::policy::ScoringPolicy;

pub mod policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Direct,
    Group,
}

/// Transport-agnostic inbound message, stripped of envelope fields the
/// engine has no use for.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub group: GroupId,
    pub kind: ChatKind,
    pub sender: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DirectChat,
    Command,
    InactiveGroup,
    ZeroXp,
    StoreWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Scored { delta: i64, current_xp: i64 },
    Skipped(SkipReason),
}

/// Orchestrates one message end to end: activation gate, policy, durable
/// increment. Each step short-circuits; the first rejection wins and causes
/// no further side effects.
pub struct ScoringEngine {
    activation: Arc<dyn ActivationStore>,
    scores: Arc<dyn ScoreStore>,
    policy: ScoringPolicy,
}

impl ScoringEngine {
    pub fn new(
        activation: Arc<dyn ActivationStore>,
        scores: Arc<dyn ScoreStore>,
        policy: ScoringPolicy,
    ) -> Self {
        Self {
            activation,
            scores,
            policy,
        }
    }

    /// Never fails: a store failure while saving one message's XP drops that
    /// single increment and must not disturb subsequent messages.
    #[instrument(skip(self, event), fields(group = %event.group, sender = %event.sender))]
    pub async fn handle(&self, event: &MessageEvent) -> Outcome {
        if event.kind == ChatKind::Direct {
            return Outcome::Skipped(SkipReason::DirectChat);
        }

        // commands never earn XP, whatever their line count
        if event.text.starts_with('/') {
            return Outcome::Skipped(SkipReason::Command);
        }

        if !self.activation.is_active(&event.group).await {
            return Outcome::Skipped(SkipReason::InactiveGroup);
        }

        let delta = self.policy.compute(&event.text);
        if delta <= 0 {
            return Outcome::Skipped(SkipReason::ZeroXp);
        }

        match self
            .scores
            .apply_delta(
                &event.sender,
                event.username.as_deref(),
                event.first_name.as_deref(),
                delta,
            )
            .await
        {
            Ok(current_xp) => {
                tracing::info!(delta, current_xp, "message scored");
                Outcome::Scored { delta, current_xp }
            }
            Err(e) => {
                tracing::error!(error = ?e, delta, "dropping one increment after store failure");
                Outcome::Skipped(SkipReason::StoreWrite)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::activation::MemoryActivationStore;
    use crate::db::scores::MemoryScoreStore;

    fn engine_with_stores() -> (Arc<MemoryActivationStore>, Arc<MemoryScoreStore>, ScoringEngine) {
        let activation = Arc::new(MemoryActivationStore::new());
        let scores = Arc::new(MemoryScoreStore::new());
        let engine = ScoringEngine::new(
            activation.clone(),
            scores.clone(),
            ScoringPolicy::LineBlock,
        );

        (activation, scores, engine)
    }

    fn event(kind: ChatKind, text: &str) -> MessageEvent {
        MessageEvent {
            group: GroupId::from(-1001),
            kind,
            sender: UserId(7),
            username: Some("someone".into()),
            first_name: Some("Some".into()),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_direct_chat_never_scores() {
        let (activation, scores, engine) = engine_with_stores();
        activation
            .activate(&GroupId::from(-1001), "g", UserId(1))
            .await
            .unwrap();

        let outcome = engine.handle(&event(ChatKind::Direct, "a\nb\nc\nd")).await;

        assert_eq!(outcome, Outcome::Skipped(SkipReason::DirectChat));
        assert!(scores.get(&UserId(7)).await.is_none());
    }

    #[tokio::test]
    async fn test_commands_never_score() {
        let (activation, scores, engine) = engine_with_stores();
        activation
            .activate(&GroupId::from(-1001), "g", UserId(1))
            .await
            .unwrap();

        let outcome = engine
            .handle(&event(ChatKind::Group, "/start\na\nb\nc\nd\ne\nf\ng"))
            .await;

        assert_eq!(outcome, Outcome::Skipped(SkipReason::Command));
        assert!(scores.get(&UserId(7)).await.is_none());
    }

    #[tokio::test]
    async fn test_inactive_group_then_activation() {
        let (activation, scores, engine) = engine_with_stores();
        let eight_lines = "a\nb\nc\nd\ne\nf\ng\nh";

        // group not activated yet: nothing reaches the score store
        let outcome = engine.handle(&event(ChatKind::Group, eight_lines)).await;
        assert_eq!(outcome, Outcome::Skipped(SkipReason::InactiveGroup));
        assert!(scores.list_all(0).await.unwrap().is_empty());

        // owner activates, the same message now earns two blocks
        activation
            .activate(&GroupId::from(-1001), "g", UserId(1))
            .await
            .unwrap();

        let outcome = engine.handle(&event(ChatKind::Group, eight_lines)).await;
        assert_eq!(
            outcome,
            Outcome::Scored {
                delta: 40,
                current_xp: 40
            }
        );
        assert_eq!(scores.get(&UserId(7)).await.unwrap().current_xp, 40);
    }

    #[tokio::test]
    async fn test_short_message_earns_nothing() {
        let (activation, _, engine) = engine_with_stores();
        activation
            .activate(&GroupId::from(-1001), "g", UserId(1))
            .await
            .unwrap();

        let outcome = engine.handle(&event(ChatKind::Group, "hello")).await;
        assert_eq!(outcome, Outcome::Skipped(SkipReason::ZeroXp));
    }

    #[tokio::test]
    async fn test_concurrent_messages_from_one_user() {
        let (activation, scores, engine) = engine_with_stores();
        activation
            .activate(&GroupId::from(-1001), "g", UserId(1))
            .await
            .unwrap();

        let engine = Arc::new(engine);
        let a = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.handle(&event(ChatKind::Group, "a\nb\nc\nd")).await })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.handle(&event(ChatKind::Group, "a\nb\nc\nd")).await })
        };

        let (a, b) = tokio::join!(a, b);
        a.unwrap();
        b.unwrap();

        let row = scores.get(&UserId(7)).await.unwrap();
        assert_eq!(row.current_xp, 40);
        assert_eq!(row.message_count, 2);
    }
}
