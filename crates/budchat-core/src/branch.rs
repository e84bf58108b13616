// Conversation branching
//
// Forks a new, independent conversation from a prefix of an existing one.
// The fork is published locally under a temporary id before the server
// round-trip, then either committed (every reference atomically rebound to
// the real id) or rolled back (source restored from its pre-branch
// snapshot). A compensating-transaction state machine, not ad hoc
// exception handling: concurrent update sources consult the branch status
// and the exclusion set before applying themselves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ChatError, Result};
use crate::event::Event;
use crate::event_log::EventLog;
use crate::traits::EventStore;

/// One locally cached conversation
#[derive(Debug, Clone, PartialEq)]
pub struct Conversation {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub persona_id: Option<Uuid>,
    pub log: EventLog,
}

/// State of one branch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchStatus {
    Pending,
    Committed,
    RolledBack,
}

/// Local cache of conversations, the active view, and ids excluded from
/// unrelated concurrent update sources
#[derive(Debug, Default)]
pub struct ConversationCache {
    conversations: HashMap<Uuid, Conversation>,
    active: Option<Uuid>,
    excluded: HashSet<Uuid>,
}

impl ConversationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conversation: Conversation) {
        self.conversations.insert(conversation.id, conversation);
    }

    pub fn remove(&mut self, id: Uuid) -> Option<Conversation> {
        self.conversations.remove(&id)
    }

    pub fn get(&self, id: Uuid) -> Option<&Conversation> {
        self.conversations.get(&id)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.conversations.contains_key(&id)
    }

    pub fn set_active(&mut self, id: Option<Uuid>) {
        self.active = id;
    }

    pub fn active(&self) -> Option<Uuid> {
        self.active
    }

    pub fn exclude(&mut self, id: Uuid) {
        self.excluded.insert(id);
    }

    pub fn lift_exclusion(&mut self, id: Uuid) {
        self.excluded.remove(&id);
    }

    pub fn is_excluded(&self, id: Uuid) -> bool {
        self.excluded.contains(&id)
    }

    /// Entry point for unrelated concurrent update sources
    ///
    /// Returns false without touching anything when the target id is
    /// excluded (a branch is in flight for it) or unknown.
    pub fn apply_external_update(&mut self, id: Uuid, event: Event) -> bool {
        if self.is_excluded(id) {
            return false;
        }
        match self.conversations.get_mut(&id) {
            Some(conversation) => {
                conversation.log.push(event);
                true
            }
            None => false,
        }
    }
}

/// Outcome of one branch attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchOutcome {
    pub status: BranchStatus,
    /// Real conversation id on commit, source id on rollback
    pub conversation_id: Uuid,
}

/// Creates rollback-safe forks of conversation prefixes
pub struct BranchManager<S: EventStore> {
    store: Arc<S>,
    cache: ConversationCache,
    attempts: HashMap<Uuid, BranchStatus>,
}

impl<S: EventStore> BranchManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            cache: ConversationCache::new(),
            attempts: HashMap::new(),
        }
    }

    pub fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ConversationCache {
        &mut self.cache
    }

    /// Status of the attempt keyed by its temporary id
    pub fn attempt_status(&self, temp_id: Uuid) -> Option<BranchStatus> {
        self.attempts.get(&temp_id).copied()
    }

    /// Fork a new conversation from the source's prefix through `at_index`
    ///
    /// The source's event list is never observably mutated, success or
    /// failure.
    pub async fn branch(&mut self, source_id: Uuid, at_index: usize) -> Result<BranchOutcome> {
        // 1. snapshot the source for rollback
        let snapshot = self
            .cache
            .get(source_id)
            .cloned()
            .ok_or(ChatError::ConversationNotFound(source_id))?;

        // 2. publish the truncated prefix immediately under a temporary id
        let temp_id = Uuid::now_v7();
        let prefix = snapshot.log.branch_prefix(at_index);
        self.cache.insert(Conversation {
            id: temp_id,
            workspace_id: snapshot.workspace_id,
            persona_id: snapshot.persona_id,
            log: prefix.clone(),
        });
        self.cache.set_active(Some(temp_id));
        self.cache.exclude(temp_id);
        self.attempts.insert(temp_id, BranchStatus::Pending);
        info!(%source_id, %temp_id, events = prefix.len(), "branch pending");

        // 3. server-side materialization, matched by event position
        let created = self
            .store
            .create_conversation(
                prefix.events(),
                snapshot.workspace_id,
                snapshot.persona_id,
            )
            .await;

        match created {
            Ok(real_id) => {
                // 4. atomically rebind every reference from temp to real
                self.cache.remove(temp_id);
                self.cache.insert(Conversation {
                    id: real_id,
                    workspace_id: snapshot.workspace_id,
                    persona_id: snapshot.persona_id,
                    log: prefix,
                });
                self.cache.set_active(Some(real_id));
                self.cache.lift_exclusion(temp_id);
                self.attempts.insert(temp_id, BranchStatus::Committed);
                info!(%temp_id, %real_id, "branch committed");
                Ok(BranchOutcome {
                    status: BranchStatus::Committed,
                    conversation_id: real_id,
                })
            }
            Err(error) => {
                // 5. discard temp state, restore the source everywhere
                self.cache.remove(temp_id);
                self.cache.lift_exclusion(temp_id);
                self.cache.insert(snapshot);
                self.cache.set_active(Some(source_id));
                self.attempts.insert(temp_id, BranchStatus::RolledBack);
                warn!(%source_id, %temp_id, %error, "branch rolled back");
                Err(ChatError::branch(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::memory::InMemoryEventStore;

    fn conversation(n: usize) -> Conversation {
        let mut log = EventLog::new();
        for i in 0..n {
            log.push(Event::user(format!("turn {i}")));
        }
        Conversation {
            id: Uuid::now_v7(),
            workspace_id: Uuid::now_v7(),
            persona_id: None,
            log,
        }
    }

    #[tokio::test]
    async fn branch_at_index_two_of_five_yields_three_events() {
        let store = Arc::new(InMemoryEventStore::new());
        let mut manager = BranchManager::new(store.clone());

        let source = conversation(5);
        let source_id = source.id;
        let pre_branch = source.clone();
        manager.cache_mut().insert(source);

        let outcome = manager.branch(source_id, 2).await.unwrap();
        assert_eq!(outcome.status, BranchStatus::Committed);

        let branched = manager.cache().get(outcome.conversation_id).unwrap();
        assert_eq!(branched.log.len(), 3);
        for (src, copy) in pre_branch.log.iter().zip(branched.log.iter()) {
            assert_eq!(src.segments, copy.segments);
            assert_ne!(src.id, copy.id);
        }

        // original retains all five events, byte-for-byte
        assert_eq!(manager.cache().get(source_id), Some(&pre_branch));
        assert_eq!(manager.cache().active(), Some(outcome.conversation_id));

        // server side holds the same three events
        let stored = store.events(outcome.conversation_id).await;
        assert_eq!(stored.len(), 3);
    }

    #[tokio::test]
    async fn failed_materialization_rolls_back_to_the_snapshot() {
        let store = Arc::new(InMemoryEventStore::new());
        store.fail_creates(true);
        let mut manager = BranchManager::new(store.clone());

        let source = conversation(4);
        let source_id = source.id;
        let pre_branch = source.clone();
        manager.cache_mut().insert(source);
        manager.cache_mut().set_active(Some(source_id));

        let result = manager.branch(source_id, 1).await;
        assert!(matches!(result, Err(ChatError::BranchFailed(_))));

        // source restored deep-equal, view redirected back, no temp left
        assert_eq!(manager.cache().get(source_id), Some(&pre_branch));
        assert_eq!(manager.cache().active(), Some(source_id));
        assert_eq!(store.conversation_ids().await.len(), 0);
    }

    #[tokio::test]
    async fn pending_branch_blocks_external_updates_to_the_temp_id() {
        let mut cache = ConversationCache::new();
        let conversation = conversation(2);
        let id = conversation.id;
        cache.insert(conversation);
        cache.exclude(id);

        assert!(!cache.apply_external_update(id, Event::user("late update")));
        assert_eq!(cache.get(id).unwrap().log.len(), 2);

        cache.lift_exclusion(id);
        assert!(cache.apply_external_update(id, Event::user("applies now")));
        assert_eq!(cache.get(id).unwrap().log.len(), 3);
    }
}
