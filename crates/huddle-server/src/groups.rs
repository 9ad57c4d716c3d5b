//! In-memory group registry and interest matching.

use std::collections::{BTreeMap, HashMap, HashSet};

use huddle_core::ids::{AccountId, GroupId};
use parking_lot::Mutex;

use crate::client::ClientId;

/// Hard cap on concurrently admitted members per group.
pub const MAX_GROUP_MEMBERS: usize = 5;

const ADJECTIVES: &[&str] = &[
    "Cosmic",
    "Chaotic",
    "Legendary",
    "Sneaky",
    "Turbo",
    "Spicy",
    "Cursed",
    "Sleepy",
    "Hyper",
    "Feral",
    "Glitchy",
    "Sus",
    "Unhinged",
    "Crispy",
    "Vibing",
    "Caffeinated",
    "Mysterious",
    "Absurd",
];

const NOUNS: &[&str] = &[
    "Penguins",
    "Potatoes",
    "Ninjas",
    "Raccoons",
    "Gremlins",
    "Noodles",
    "Wizards",
    "Goblins",
    "Pandas",
    "Tacos",
    "Ducks",
    "Gnomes",
    "Bots",
    "Monkeys",
    "Hamsters",
    "Pirates",
    "Sloths",
    "Flamingos",
    "Otters",
    "Waffles",
];

/// Generate a random "Adjective Nouns" display name for a fresh group.
fn random_display_name() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let adj = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    format!("{adj} {noun}")
}

/// A chat group, held entirely in memory.
#[derive(Clone, Debug)]
pub struct Group {
    pub id: GroupId,
    pub display_name: String,
    /// Connections admitted by matching. Capacity checks and empty-group
    /// reaping look at this list, not at socket subscriptions.
    pub members: Vec<ClientId>,
    pub member_interests: HashMap<ClientId, Vec<String>>,
    /// Durable identities seen in this group. Grows monotonically; gone
    /// only when the group is deleted.
    pub member_accounts: Vec<AccountId>,
    /// Interests that caused admissions, deduplicated, in admission order.
    pub shared_tags: Vec<String>,
    pub locked: bool,
    /// Epoch millis of the scheduled lock. None until the first timer reset.
    pub expires_at: Option<i64>,
}

impl Group {
    fn new(id: GroupId) -> Self {
        Self {
            id,
            display_name: random_display_name(),
            members: Vec::new(),
            member_interests: HashMap::new(),
            member_accounts: Vec::new(),
            shared_tags: Vec::new(),
            locked: false,
            expires_at: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.members.len() >= MAX_GROUP_MEMBERS
    }
}

/// Outcome of a match attempt.
#[derive(Debug)]
pub enum MatchOutcome {
    /// The requester was admitted. Fields mirror the `matched` event payload.
    Admitted {
        group_id: GroupId,
        display_name: String,
        shared_tags: Vec<String>,
        expires_at: Option<i64>,
    },
    /// The chosen group was at capacity when admission was attempted.
    Full,
}

/// Registry of live groups.
///
/// Every operation takes the one mutex, so the candidate scan and the
/// admission it leads to are a single atomic step. The BTreeMap is keyed
/// by monotonic ids, so iteration visits groups in creation order.
pub struct GroupRegistry {
    groups: Mutex<BTreeMap<GroupId, Group>>,
}

impl Default for GroupRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(BTreeMap::new()),
        }
    }

    /// Match a connection into the best open group, creating a fresh one
    /// when nothing overlaps.
    ///
    /// A candidate group must share at least one interest with the pooled
    /// interests of its current members and must beat the best score seen
    /// so far strictly, so the earliest-created group wins ties. The first
    /// overlapping interest (in the requester's order) of the winning
    /// candidate is appended to the group's shared tags.
    pub fn match_or_create(&self, client_id: &ClientId, interests: &[String]) -> MatchOutcome {
        let mut groups = self.groups.lock();

        let mut target: Option<GroupId> = None;
        let mut best_score = 0usize;
        let mut shared_interest: Option<String> = None;

        for (id, group) in groups.iter() {
            if group.is_full() || group.locked {
                continue;
            }

            let pooled: HashSet<&str> = group
                .member_interests
                .values()
                .flatten()
                .map(String::as_str)
                .collect();

            let common: Vec<&String> = interests
                .iter()
                .filter(|i| pooled.contains(i.as_str()))
                .collect();

            if !common.is_empty() && common.len() > best_score {
                best_score = common.len();
                target = Some(id.clone());
                shared_interest = Some(common[0].clone());
            }
        }

        let group_id = target.unwrap_or_else(GroupId::new);
        let group = groups
            .entry(group_id.clone())
            .or_insert_with(|| Group::new(group_id.clone()));

        if group.is_full() {
            return MatchOutcome::Full;
        }

        if !group.members.contains(client_id) {
            group.members.push(client_id.clone());
            group
                .member_interests
                .insert(client_id.clone(), interests.to_vec());
        }

        if let Some(tag) = shared_interest {
            if !group.shared_tags.contains(&tag) {
                group.shared_tags.push(tag);
            }
        }

        MatchOutcome::Admitted {
            group_id: group.id.clone(),
            display_name: group.display_name.clone(),
            shared_tags: group.shared_tags.clone(),
            expires_at: group.expires_at,
        }
    }

    /// Snapshot a group by id.
    pub fn get(&self, id: &GroupId) -> Option<Group> {
        self.groups.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &GroupId) -> bool {
        self.groups.lock().contains_key(id)
    }

    /// Remove a group outright. Returns whether it existed.
    pub fn delete(&self, id: &GroupId) -> bool {
        self.groups.lock().remove(id).is_some()
    }

    /// Associate a durable account with a group, once.
    pub fn record_account(&self, id: &GroupId, account_id: &AccountId) {
        let mut groups = self.groups.lock();
        if let Some(group) = groups.get_mut(id) {
            if !group.member_accounts.contains(account_id) {
                group.member_accounts.push(account_id.clone());
            }
        }
    }

    /// Stamp the scheduled lock time. Returns false when the group is gone.
    pub fn stamp_expiry(&self, id: &GroupId, expires_at: i64) -> bool {
        let mut groups = self.groups.lock();
        match groups.get_mut(id) {
            Some(group) => {
                group.expires_at = Some(expires_at);
                true
            }
            None => false,
        }
    }

    /// Mark a group locked and return the accounts associated with it, or
    /// None when the group no longer exists. Existence check, lock flag and
    /// account snapshot happen under one lock acquisition.
    pub fn lock_group(&self, id: &GroupId) -> Option<Vec<AccountId>> {
        let mut groups = self.groups.lock();
        groups.get_mut(id).map(|group| {
            group.locked = true;
            group.member_accounts.clone()
        })
    }

    /// Strip a connection from every group's member list. Groups left with
    /// zero members are removed and returned so the caller can cancel their
    /// timers.
    pub fn remove_member(&self, client_id: &ClientId) -> Vec<GroupId> {
        let mut groups = self.groups.lock();
        let mut emptied = Vec::new();
        groups.retain(|id, group| {
            group.members.retain(|m| m != client_id);
            group.member_interests.remove(client_id);
            if group.members.is_empty() {
                emptied.push(id.clone());
                false
            } else {
                true
            }
        });
        emptied
    }

    /// Number of live groups.
    pub fn count(&self) -> usize {
        self.groups.lock().len()
    }
}
