use serde::Serialize;
use thiserror::Error;

/// Lifecycle of one item as it moves through the fabric.
///
/// `Received → Normalized → Routed → Grouped → Delivered | Failed`.
/// Steps may be skipped (only ordered targets pass through `Grouped`) but
/// never revisited, and both terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemState {
    Received,
    Normalized,
    Routed,
    Grouped,
    Delivered,
    Failed,
}

impl ItemState {
    fn rank(self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Normalized => 1,
            Self::Routed => 2,
            Self::Grouped => 3,
            Self::Delivered | Self::Failed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid item transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: ItemState,
    pub to: ItemState,
}

/// Tracks one item's state and rejects backward moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemLifecycle {
    state: ItemState,
    history: Vec<ItemState>,
}

impl ItemLifecycle {
    pub fn new() -> Self {
        Self::starting_at(ItemState::Received)
    }

    pub fn starting_at(state: ItemState) -> Self {
        Self {
            state,
            history: vec![state],
        }
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    /// Every state visited so far, oldest first.
    pub fn history(&self) -> &[ItemState] {
        &self.history
    }

    pub fn advance(&mut self, next: ItemState) -> Result<ItemState, InvalidTransition> {
        if self.state.is_terminal() || next.rank() <= self.state.rank() {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.history.push(next);
        Ok(next)
    }
}

impl Default for ItemLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_mt_path() {
        let mut item = ItemLifecycle::new();
        for next in [
            ItemState::Normalized,
            ItemState::Routed,
            ItemState::Grouped,
            ItemState::Delivered,
        ] {
            assert_eq!(item.advance(next), Ok(next));
        }
        assert!(item.state().is_terminal());
        assert_eq!(item.history().len(), 5);
        assert_eq!(item.history()[0], ItemState::Received);
    }

    #[test]
    fn test_skipping_grouped_is_allowed() {
        let mut item = ItemLifecycle::starting_at(ItemState::Routed);
        assert!(item.advance(ItemState::Failed).is_ok());
    }

    #[test]
    fn test_no_backward_or_post_terminal_moves() {
        let mut item = ItemLifecycle::starting_at(ItemState::Grouped);
        assert!(item.advance(ItemState::Routed).is_err());
        assert!(item.advance(ItemState::Grouped).is_err());

        item.advance(ItemState::Failed).unwrap();
        assert_eq!(item.history(), &[ItemState::Grouped, ItemState::Failed]);
        assert_eq!(
            item.advance(ItemState::Delivered),
            Err(InvalidTransition {
                from: ItemState::Failed,
                to: ItemState::Delivered
            })
        );
    }
}
