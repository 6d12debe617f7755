//! Save/unsave toggle guarded by the idempotent write coordinator.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{IdempotentWriteCoordinator, WriteError, WriteOutcome};
use crate::domain::error::DomainError;

use super::articles::ArticleService;
use super::origin::{OriginError, OriginStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveAction {
    Save,
    Unsave,
    /// Flip whatever the current state is.
    Toggle,
}

impl SaveAction {
    pub fn from_flag(saved: bool) -> Self {
        if saved {
            Self::Save
        } else {
            Self::Unsave
        }
    }

    pub fn target(self, current: bool) -> bool {
        match self {
            SaveAction::Save => true,
            SaveAction::Unsave => false,
            SaveAction::Toggle => !current,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SaveAction::Save => "save",
            SaveAction::Unsave => "unsave",
            SaveAction::Toggle => "toggle",
        }
    }
}

impl FromStr for SaveAction {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "save" | "add" => Ok(SaveAction::Save),
            "unsave" | "remove" => Ok(SaveAction::Unsave),
            "toggle" => Ok(SaveAction::Toggle),
            other => Err(DomainError::validation(format!(
                "unknown save action `{other}`"
            ))),
        }
    }
}

/// Response body of a save request, replayed verbatim to duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    pub article_id: String,
    pub saved: bool,
    pub save_count: i64,
    pub changed: bool,
}

#[derive(Clone)]
pub struct SaveService {
    origin: Arc<dyn OriginStore>,
    coordinator: IdempotentWriteCoordinator,
    articles: ArticleService,
}

impl SaveService {
    pub fn new(
        origin: Arc<dyn OriginStore>,
        coordinator: IdempotentWriteCoordinator,
        articles: ArticleService,
    ) -> Self {
        Self {
            origin,
            coordinator,
            articles,
        }
    }

    pub async fn apply(
        &self,
        actor_id: &str,
        article_id: &str,
        action: SaveAction,
        client_request_id: Option<&str>,
    ) -> Result<WriteOutcome<SaveResponse>, WriteError> {
        let origin = self.origin.clone();
        let actor = actor_id.to_string();
        let article = article_id.to_string();

        let outcome = self
            .coordinator
            .execute(actor_id, article_id, client_request_id, move || async move {
                apply_save(origin.as_ref(), &actor, &article, action).await
            })
            .await?;

        if let WriteOutcome::Applied(response) = &outcome
            && response.changed
        {
            self.articles.invalidate_article(article_id).await;
            info!(
                target = "newsdesk::application::saves",
                actor_id,
                article_id,
                action = action.as_str(),
                saved = response.saved,
                save_count = response.save_count,
                "save state changed"
            );
        }
        Ok(outcome)
    }
}

/// Resolve the target flag from the current state, then hand the flag and
/// counter change to the store as one atomic write. A retry after an attempt
/// whose outcome was lost finds the flag already at its target and leaves the
/// counter alone.
async fn apply_save(
    origin: &dyn OriginStore,
    actor_id: &str,
    article_id: &str,
    action: SaveAction,
) -> Result<SaveResponse, OriginError> {
    let target = match action {
        SaveAction::Save => true,
        SaveAction::Unsave => false,
        SaveAction::Toggle => action.target(origin.saved_state(actor_id, article_id).await?),
    };

    let transition = origin.apply_saved_state(actor_id, article_id, target).await?;

    Ok(SaveResponse {
        article_id: article_id.to_string(),
        saved: target,
        save_count: transition.save_count.max(0),
        changed: transition.changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_resolve_against_current_state() {
        assert!(SaveAction::Save.target(false));
        assert!(SaveAction::Save.target(true));
        assert!(!SaveAction::Unsave.target(true));
        assert!(SaveAction::Toggle.target(false));
        assert!(!SaveAction::Toggle.target(true));
    }

    #[test]
    fn actions_parse_from_text_and_flags() {
        assert_eq!("save".parse::<SaveAction>().expect("save"), SaveAction::Save);
        assert_eq!(" Remove ".parse::<SaveAction>().expect("remove"), SaveAction::Unsave);
        assert_eq!("toggle".parse::<SaveAction>().expect("toggle"), SaveAction::Toggle);
        assert!("like".parse::<SaveAction>().is_err());
        assert_eq!(SaveAction::from_flag(false), SaveAction::Unsave);
    }
}
