//! Public trie handles
//!
//! [`MerkleTrie`] owns an arena and the canonical trie in it.
//! [`SerialTrie`] is a single-threaded scratch trie built in the same arena,
//! typically one per worker, and later merged into the canonical trie
//! without copying.

use super::batch::BatchMergeRange;
use super::hash::committed_count;
use super::node::TrieNode;
use super::policy::{InsertPolicy, MergePolicy, OverwriteInsert, OverwriteMerge, RollbackInsert};
use super::proof::{empty_proof, Proof};
use crate::arena::{AllocCursor, Arena, CursorPool, NodeRef};
use crate::config::{HashSettings, TrieConfig};
use crate::model::{AccountId, Hash, Metadata, PrefixLenBits, TrieKey, TrieValue, BRANCH_BITS};
use crate::{Error, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::debug;

/// Canonical trie over 64-bit account ids
pub type AccountTrie<V> = MerkleTrie<AccountId, V>;

/// Merge `incoming` into `root`, adopting it outright when `root` is empty
fn absorb<'a, K: TrieKey, V: TrieValue, M: MergePolicy<V>>(
    root: TrieNode<'a, K, V>,
    cursor: &mut AllocCursor,
    incoming: TrieNode<'a, K, V>,
) -> Metadata {
    if !std::ptr::eq(root.arena(), incoming.arena()) {
        panic!("merging tries owned by different arenas");
    }
    if incoming.lock().is_cleared() {
        return Metadata::ZERO;
    }
    if root.lock().is_cleared() {
        incoming.relocate(root.at());
        return root.metadata();
    }
    root.merge_from::<M>(cursor, incoming)
}

fn check_query_len<K: TrieKey>(len: PrefixLenBits) {
    if len > K::key_len() || len.bits() % BRANCH_BITS != 0 {
        panic!(
            "metadata query of {} bits on {}-bit keys; lengths must be whole branch selectors",
            len.bits(),
            K::KEY_BITS
        );
    }
}

struct RootState {
    /// Allocation cursor for single-threaded mutations
    cursor: AllocCursor,
    /// Cached root commitment
    commitment: Option<Hash>,
}

/// The canonical trie.
///
/// Every operation takes `&self`. Mutations and hashing serialize on a
/// single root lock; lookups and parallel passes rely on per-node locks.
/// The root node never moves, so a root-to-node walk always starts from
/// the same cell.
pub struct MerkleTrie<K, V> {
    arena: Arena<K, V>,
    root: NodeRef,
    state: Mutex<RootState>,
    cursors: CursorPool,
    config: TrieConfig,
}

impl<K: TrieKey, V: TrieValue> MerkleTrie<K, V> {
    pub fn new(config: TrieConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    pub fn with_default_config() -> Self {
        Self::from_valid_config(TrieConfig::default())
    }

    fn from_valid_config(config: TrieConfig) -> Self {
        let arena = Arena::new(config.buffer_size, config.max_buffers as usize);
        let mut cursor = AllocCursor::default();
        let root = arena.allocate(&mut cursor, 1);
        TrieNode::new(&arena, root).init_empty();
        MerkleTrie {
            arena,
            root,
            state: Mutex::new(RootState {
                cursor,
                commitment: None,
            }),
            cursors: CursorPool::new(),
            config,
        }
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    fn root_node(&self) -> TrieNode<'_, K, V> {
        TrieNode::new(&self.arena, self.root)
    }

    fn settings(&self) -> HashSettings {
        self.config.hash_settings()
    }

    /// Take the root lock for a mutation, dropping the cached commitment
    fn modify(&self) -> parking_lot::MutexGuard<'_, RootState> {
        let mut state = self.state.lock();
        state.commitment = None;
        state
    }

    // === Insert and merge ===

    pub fn insert(&self, key: K, value: V) {
        self.insert_with::<OverwriteInsert>(key, value);
    }

    /// Insert and mark the leaf so that `do_rollback` removes it
    pub fn insert_rollback(&self, key: K, value: V) {
        self.insert_with::<RollbackInsert>(key, value);
    }

    pub fn insert_with<P: InsertPolicy<V>>(&self, key: K, input: P::Input) {
        let mut state = self.modify();
        self.root_node().insert::<P>(&mut state.cursor, key, input);
    }

    /// Insert many entries on every worker at once. Each worker fills a
    /// scratch trie with a chunk of `entries`, then the scratch tries are
    /// batch-merged. If a key repeats, which of its values survives is
    /// unspecified.
    pub fn parallel_insert(&self, entries: Vec<(K, V)>) {
        self.parallel_insert_by::<OverwriteInsert>(entries);
    }

    /// [`parallel_insert`](Self::parallel_insert) with every new leaf marked
    /// for rollback
    pub fn parallel_insert_rollback(&self, entries: Vec<(K, V)>) {
        self.parallel_insert_by::<RollbackInsert>(entries);
    }

    fn parallel_insert_by<P: InsertPolicy<V, Input = V>>(&self, entries: Vec<(K, V)>) {
        if entries.is_empty() {
            return;
        }
        let chunk = entries.len().div_ceil(rayon::current_num_threads()).max(1);
        let serials: Vec<SerialTrie<'_, K, V>> = entries
            .into_par_iter()
            .chunks(chunk)
            .map(|part| {
                let mut serial = self.open_serial_subsidiary();
                for (key, value) in part {
                    serial.insert_with::<P>(key, value);
                }
                serial
            })
            .collect();
        debug!(tries = serials.len(), "parallel insert");
        self.batch_merge_in(serials);
    }

    /// A scratch trie in this trie's arena
    pub fn open_serial_subsidiary(&self) -> SerialTrie<'_, K, V> {
        let mut state = self.state.lock();
        SerialTrie::new(&self.arena, &mut state.cursor, self.settings())
    }

    pub fn merge_in(&self, trie: SerialTrie<'_, K, V>) {
        self.merge_in_with::<OverwriteMerge>(trie);
    }

    pub fn merge_in_with<M: MergePolicy<V>>(&self, trie: SerialTrie<'_, K, V>) {
        let mut state = self.modify();
        absorb::<K, V, M>(self.root_node(), &mut state.cursor, trie.node_in(&self.arena));
    }

    pub fn batch_merge_in(&self, tries: Vec<SerialTrie<'_, K, V>>) {
        self.batch_merge_in_with::<OverwriteMerge>(tries);
    }

    /// Merge many scratch tries at once, in parallel over disjoint subtrees
    pub fn batch_merge_in_with<M: MergePolicy<V>>(&self, tries: Vec<SerialTrie<'_, K, V>>) {
        let mut state = self.modify();
        let mut incoming: Vec<NodeRef> = tries
            .iter()
            .map(|trie| trie.node_in(&self.arena))
            .filter(|node| !node.lock().is_cleared())
            .map(|node| node.at())
            .collect();
        if incoming.is_empty() {
            return;
        }

        let root = self.root_node();
        if root.lock().is_cleared() {
            let first = incoming.remove(0);
            absorb::<K, V, M>(root, &mut state.cursor, TrieNode::new(&self.arena, first));
        }
        if incoming.is_empty() {
            return;
        }

        let range = BatchMergeRange::new(
            &self.arena,
            self.root,
            &self.cursors,
            incoming,
            self.config.batch_split_threshold,
        );
        debug!(
            tries = tries.len(),
            leaves = range.num_children(),
            "batch merge"
        );
        range.run::<M>();
    }

    // === Hashing ===

    /// Root commitment, hashing stale subtrees in parallel first. Cached
    /// until the next mutation.
    pub fn freeze_and_hash(&self) -> Hash {
        let mut state = self.state.lock();
        if let Some(commitment) = state.commitment {
            return commitment;
        }
        let settings = self.settings();
        let root = self.root_node();
        root.precompute_hashes_parallel(settings, self.config.hash_grain);
        let commitment = root.commitment(settings);
        debug!(%commitment, size = root.size(), "froze trie");
        state.commitment = Some(commitment);
        commitment
    }

    /// Root commitment computed on the calling thread
    pub fn hash_serial(&self) -> Hash {
        let mut state = self.state.lock();
        if let Some(commitment) = state.commitment {
            return commitment;
        }
        let commitment = self.root_node().commitment(self.settings());
        state.commitment = Some(commitment);
        commitment
    }

    // === Lookups ===

    pub fn get_value(&self, key: &K) -> Option<V> {
        self.root_node().get_value(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.root_node().contains_key(key)
    }

    /// Whether the leaf under `key` is marked for deletion; `None` if absent
    pub fn is_marked_deleted(&self, key: &K) -> Option<bool> {
        self.root_node().is_marked_deleted(key)
    }

    /// Number of leaves, marked or not
    pub fn size(&self) -> i64 {
        self.root_node().size()
    }

    /// Number of leaves not marked for deletion
    pub fn live_size(&self) -> i64 {
        self.metadata().live_size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn metadata(&self) -> Metadata {
        let _state = self.state.lock();
        self.root_node().metadata()
    }

    pub fn get_lowest_key(&self) -> Option<K> {
        self.root_node().get_lowest_key()
    }

    pub fn accumulate_values(&self) -> Vec<V> {
        let mut out = Vec::with_capacity(self.size().max(0) as usize);
        self.root_node().accumulate_values(&mut out);
        out
    }

    pub fn accumulate_values_parallel(&self) -> Vec<V> {
        self.root_node()
            .accumulate_values_parallel(self.config.apply_grain)
    }

    pub fn accumulate_keys(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.size().max(0) as usize);
        self.root_node().accumulate_keys(&mut out);
        out
    }

    /// Visit every leaf in key order
    pub fn apply<F: FnMut(&K, &V)>(&self, mut f: F) {
        self.root_node().apply(&mut f);
    }

    pub fn apply_geq_key<F: FnMut(&K, &V)>(&self, mut f: F, min_key: &K) {
        self.root_node().apply_geq_key(&mut f, min_key);
    }

    pub fn apply_lt_key<F: FnMut(&K, &V)>(&self, mut f: F, max_key: &K) {
        self.root_node().apply_lt_key(&mut f, max_key);
    }

    /// Modify every value in place, in parallel
    pub fn parallel_batch_value_modify<F>(&self, f: F)
    where
        F: Fn(&mut V) + Sync,
    {
        let _state = self.modify();
        self.root_node()
            .parallel_batch_value_modify(&f, self.config.apply_grain);
    }

    /// Endowment held by leaves with key strictly below `max_key`
    pub fn endow_lt_key(&self, max_key: &K) -> i64 {
        self.root_node().endow_lt_key(max_key)
    }

    /// Metadata of every leaf whose first `len` bits are at or below those
    /// of `query`. At full key length that is every leaf with key `<= query`.
    pub fn metadata_query(&self, query: &K, len: PrefixLenBits) -> Metadata {
        check_query_len::<K>(len);
        let _state = self.state.lock();
        self.root_node().metadata_query(query, len)
    }

    /// Running metadata totals over the subtrees cut at `len` bits, in key
    /// order. Each entry pairs a subtree's prefix, truncated to `len`, with
    /// the metadata of that subtree and every subtree before it. The first
    /// entry is the zero key with empty metadata.
    pub fn metadata_traversal(&self, len: PrefixLenBits) -> Vec<(K, Metadata)> {
        check_query_len::<K>(len);
        let _state = self.state.lock();
        let mut out = Vec::with_capacity(self.root_node().size().max(0) as usize + 1);
        out.push((K::default(), Metadata::ZERO));
        let mut acc = Metadata::ZERO;
        self.root_node().metadata_traversal(len, &mut acc, &mut out);
        out
    }

    /// Move the lowest-keyed leaves, as many as fit in `threshold` total
    /// endowment, into a new scratch trie.
    pub fn endow_split(&self, threshold: i64) -> Result<SerialTrie<'_, K, V>> {
        if threshold < 0 {
            return Err(Error::NegativeEndowment(threshold));
        }
        let mut state = self.modify();
        let mut out = SerialTrie::new(&self.arena, &mut state.cursor, self.settings());
        if threshold == 0 {
            return Ok(out);
        }

        let root = self.root_node();
        let available = root.metadata().endow;
        if threshold > available {
            return Err(Error::InsufficientEndowment {
                requested: threshold,
                available,
            });
        }
        if threshold == available {
            root.relocate(out.root);
            root.init_empty();
            return Ok(out);
        }

        let mut pieces = Vec::new();
        let removed = root.endow_split(threshold, &mut pieces);
        debug!(threshold, taken = removed.endow, subtrees = pieces.len(), "endowment split");
        for piece in pieces {
            out.absorb_node::<OverwriteMerge>(piece);
        }
        Ok(out)
    }

    // === Proofs ===

    pub fn generate_proof(&self, key: &K) -> Proof {
        let mut state = self.state.lock();
        let settings = self.settings();
        let root = self.root_node();
        let commitment = match state.commitment {
            Some(commitment) => commitment,
            None => root.commitment(settings),
        };
        state.commitment = Some(commitment);

        let trie_size = committed_count(&root.metadata(), settings.mode);
        if trie_size == 0 {
            return empty_proof(settings.scheme, key.to_key_bytes());
        }
        let mut nodes = Vec::new();
        let terminal = root.prove(settings, key, &mut nodes);
        Proof {
            scheme: settings.scheme,
            key: key.to_key_bytes(),
            trie_size,
            root_node_hash: root.compute_hash(settings),
            nodes,
            terminal,
        }
    }

    // === Deletion ===

    /// Remove `key` now, returning its value
    pub fn perform_deletion(&self, key: &K) -> Option<V> {
        let _state = self.modify();
        self.root_node().perform_deletion(key).value
    }

    /// Mark `key` for a later `perform_marked_deletions`. Returns the value
    /// if the mark is new.
    pub fn mark_for_deletion(&self, key: &K) -> Option<V> {
        let _state = self.modify();
        self.root_node().mark_for_deletion(key)
    }

    pub fn unmark_for_deletion(&self, key: &K) -> Option<V> {
        let _state = self.modify();
        self.root_node().unmark_for_deletion(key)
    }

    /// Mark every leaf with key strictly below `max_key`; returns how many
    /// marks were new
    pub fn mark_subtree_lt_key_for_deletion(&self, max_key: &K) -> i64 {
        let _state = self.modify();
        self.root_node().mark_subtree_lt_key(max_key)
    }

    pub fn mark_entire_tree_for_deletion(&self) -> i64 {
        let _state = self.modify();
        self.root_node().mark_entire_subtree()
    }

    /// Remove every marked leaf, calling `side_effect` once per removal
    pub fn perform_marked_deletions<F: FnMut(&K, &V)>(&self, mut side_effect: F) {
        let _state = self.modify();
        let removal = self.root_node().sweep_marked_deletions(&mut side_effect);
        debug!(removed = -removal.delta.size, "performed marked deletions");
    }

    /// Forget every deletion mark
    pub fn clear_marked_deletions(&self) {
        let _state = self.modify();
        self.root_node().clear_deletion_marks();
    }

    /// Remove every leaf inserted with `insert_rollback`
    pub fn do_rollback(&self) {
        let _state = self.modify();
        let removal = self.root_node().sweep_rollback();
        debug!(removed = -removal.delta.size, "rolled back");
    }

    pub fn clear_rollback(&self) {
        let _state = self.modify();
        self.root_node().clear_rollback_marks();
    }

    pub fn clear_rollback_parallel(&self) {
        let _state = self.modify();
        self.root_node().clear_rollback_parallel(self.config.apply_grain);
    }

    // === Integrity ===

    pub fn metadata_integrity_check(&self) -> bool {
        let _state = self.state.lock();
        self.root_node().check_metadata()
    }

    pub fn shape_integrity_check(&self) -> bool {
        let _state = self.state.lock();
        self.root_node().check_shape()
    }

    /// Drop every node and start over with an empty trie
    pub fn clear(&mut self) {
        self.arena.reset();
        self.cursors.reset();
        let state = self.state.get_mut();
        state.cursor = AllocCursor::default();
        state.commitment = None;
        self.root = self.arena.allocate(&mut state.cursor, 1);
        TrieNode::new(&self.arena, self.root).init_empty();
    }

    /// Arena buffers claimed so far
    pub fn buffers_claimed(&self) -> usize {
        self.arena.buffers_claimed()
    }
}

/// A single-threaded trie sharing a [`MerkleTrie`]'s arena.
///
/// Built independently (one per thread), then merged into the canonical
/// trie or into another scratch trie of the same arena. Merging hands over
/// the nodes themselves; the merged-in trie is consumed.
pub struct SerialTrie<'a, K, V> {
    arena: &'a Arena<K, V>,
    root: NodeRef,
    cursor: AllocCursor,
    settings: HashSettings,
}

impl<'a, K: TrieKey, V: TrieValue> SerialTrie<'a, K, V> {
    fn new(arena: &'a Arena<K, V>, root_cursor: &mut AllocCursor, settings: HashSettings) -> Self {
        let root = arena.allocate(root_cursor, 1);
        TrieNode::new(arena, root).init_empty();
        SerialTrie {
            arena,
            root,
            cursor: AllocCursor::default(),
            settings,
        }
    }

    fn root_node(&self) -> TrieNode<'a, K, V> {
        TrieNode::new(self.arena, self.root)
    }

    /// This trie's root as a node of `arena`, which must be the arena it
    /// was built in
    fn node_in<'b>(&self, arena: &'b Arena<K, V>) -> TrieNode<'b, K, V> {
        if !std::ptr::eq(self.arena, arena) {
            panic!("merging a scratch trie into a trie with a different arena");
        }
        TrieNode::new(arena, self.root)
    }

    fn absorb_node<M: MergePolicy<V>>(&mut self, incoming: NodeRef) {
        absorb::<K, V, M>(
            self.root_node(),
            &mut self.cursor,
            TrieNode::new(self.arena, incoming),
        );
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.insert_with::<OverwriteInsert>(key, value);
    }

    pub fn insert_rollback(&mut self, key: K, value: V) {
        self.insert_with::<RollbackInsert>(key, value);
    }

    pub fn insert_with<P: InsertPolicy<V>>(&mut self, key: K, input: P::Input) {
        self.root_node().insert::<P>(&mut self.cursor, key, input);
    }

    pub fn merge_in(&mut self, other: SerialTrie<'_, K, V>) {
        self.merge_in_with::<OverwriteMerge>(other);
    }

    pub fn merge_in_with<M: MergePolicy<V>>(&mut self, other: SerialTrie<'_, K, V>) {
        let incoming = other.node_in(self.arena);
        absorb::<K, V, M>(self.root_node(), &mut self.cursor, incoming);
    }

    pub fn get_value(&self, key: &K) -> Option<V> {
        self.root_node().get_value(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.root_node().contains_key(key)
    }

    pub fn size(&self) -> i64 {
        self.root_node().size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn metadata(&self) -> Metadata {
        self.root_node().metadata()
    }

    pub fn perform_deletion(&mut self, key: &K) -> Option<V> {
        self.root_node().perform_deletion(key).value
    }

    pub fn mark_for_deletion(&mut self, key: &K) -> Option<V> {
        self.root_node().mark_for_deletion(key)
    }

    pub fn accumulate_keys(&self) -> Vec<K> {
        let mut out = Vec::new();
        self.root_node().accumulate_keys(&mut out);
        out
    }

    pub fn accumulate_values(&self) -> Vec<V> {
        let mut out = Vec::new();
        self.root_node().accumulate_values(&mut out);
        out
    }

    /// Root commitment; equal to what the canonical trie would report for
    /// the same leaves
    pub fn hash(&self) -> Hash {
        self.root_node().commitment(self.settings)
    }

    pub fn metadata_integrity_check(&self) -> bool {
        self.root_node().check_metadata()
    }

    pub fn shape_integrity_check(&self) -> bool {
        self.root_node().check_shape()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HashMode;

    fn trie() -> AccountTrie<u64> {
        MerkleTrie::new(TrieConfig::compact()).unwrap()
    }

    #[test]
    fn test_insert_and_lookup() {
        let trie = trie();
        assert!(trie.is_empty());
        for i in 0..100u64 {
            trie.insert(AccountId(i << 4), i);
        }
        assert_eq!(trie.size(), 100);
        assert_eq!(trie.get_value(&AccountId(0x50)), Some(5));
        assert_eq!(trie.get_lowest_key(), Some(AccountId(0)));
        assert!(trie.metadata_integrity_check());
        assert!(trie.shape_integrity_check());
    }

    #[test]
    fn test_commitment_is_cached_until_mutation() {
        let trie = trie();
        trie.insert(AccountId(1), 1);
        let first = trie.freeze_and_hash();
        assert_eq!(trie.hash_serial(), first);
        trie.insert(AccountId(2), 2);
        assert_ne!(trie.freeze_and_hash(), first);
        trie.perform_deletion(&AccountId(2));
        assert_eq!(trie.freeze_and_hash(), first);
    }

    #[test]
    fn test_serial_merge_and_overwrite() {
        let trie = trie();
        let mut a = trie.open_serial_subsidiary();
        let mut b = trie.open_serial_subsidiary();
        let key = AccountId(0xFF00_0000_0000_0000);
        a.insert(key, 1);
        b.insert(key, 2);
        a.merge_in(b);
        assert_eq!(a.size(), 1);
        trie.merge_in(a);
        assert_eq!(trie.size(), 1);
        assert_eq!(trie.get_value(&key), Some(2));
    }

    #[test]
    fn test_serial_hash_matches_canonical() {
        let trie = trie();
        let mut serial = trie.open_serial_subsidiary();
        for i in 0..50u64 {
            serial.insert(AccountId(i * 7919), i);
        }
        let serial_hash = serial.hash();
        trie.merge_in(serial);
        assert_eq!(trie.freeze_and_hash(), serial_hash);
    }

    #[test]
    #[should_panic(expected = "different arena")]
    fn test_merge_across_arenas_is_fatal() {
        let first = trie();
        let second = trie();
        let mut serial = second.open_serial_subsidiary();
        serial.insert(AccountId(1), 1);
        first.merge_in(serial);
    }

    #[test]
    fn test_batch_merge_into_empty_trie() {
        let trie = trie();
        let tries: Vec<_> = (0..4u64)
            .map(|shard| {
                let mut serial = trie.open_serial_subsidiary();
                for i in 0..100u64 {
                    serial.insert(AccountId((shard << 60) | i), i);
                }
                serial
            })
            .collect();
        trie.batch_merge_in(tries);
        assert_eq!(trie.size(), 400);
        assert!(trie.metadata_integrity_check());
        assert!(trie.shape_integrity_check());
    }

    #[test]
    fn test_endow_split_errors() {
        let trie: AccountTrie<crate::model::Endowed<u64>> =
            MerkleTrie::new(TrieConfig::compact()).unwrap();
        trie.insert(AccountId(1), crate::model::Endowed { endow: 5, value: 0 });
        assert!(matches!(
            trie.endow_split(6),
            Err(Error::InsufficientEndowment { requested: 6, available: 5 })
        ));
        assert!(matches!(trie.endow_split(-1), Err(Error::NegativeEndowment(-1))));
        assert!(trie.endow_split(0).unwrap().is_empty());

        let all = trie.endow_split(5).unwrap();
        assert_eq!(all.size(), 1);
        assert!(trie.is_empty());
    }

    #[test]
    fn test_full_mode_counts_marked_leaves() {
        let config = TrieConfig::compact().with_hash_mode(HashMode::Full);
        let trie: AccountTrie<u64> = MerkleTrie::new(config).unwrap();
        trie.insert(AccountId(1), 1);
        trie.insert(AccountId(2), 2);
        let before = trie.freeze_and_hash();
        trie.mark_for_deletion(&AccountId(2));
        assert_eq!(trie.live_size(), 1);
        assert_eq!(trie.freeze_and_hash(), before);
    }

    #[test]
    fn test_clear_resets_arena() {
        let mut trie = trie();
        for i in 0..500u64 {
            trie.insert(AccountId(i.wrapping_mul(0x9E37_79B9_7F4A_7C15)), i);
        }
        trie.clear();
        assert!(trie.is_empty());
        assert_eq!(trie.buffers_claimed(), 1);
        trie.insert(AccountId(3), 3);
        assert_eq!(trie.size(), 1);
    }

    #[test]
    fn test_parallel_insert_matches_serial_insert() {
        let keys: Vec<u64> = (0..3000u64).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect();
        let serial = trie();
        for &k in &keys {
            serial.insert(AccountId(k), k);
        }

        let parallel = trie();
        parallel.insert(AccountId(keys[0]), 1);
        parallel.parallel_insert(keys.iter().map(|k| (AccountId(*k), *k)).collect());
        assert_eq!(parallel.size(), 3000);
        assert_eq!(parallel.get_value(&AccountId(keys[0])), Some(keys[0]));
        assert!(parallel.metadata_integrity_check());
        assert!(parallel.shape_integrity_check());
        assert_eq!(parallel.freeze_and_hash(), serial.freeze_and_hash());

        parallel.parallel_insert(Vec::new());
        assert_eq!(parallel.size(), 3000);
    }

    #[test]
    fn test_parallel_insert_rollback_is_undone() {
        let trie = trie();
        for i in 0..100u64 {
            trie.insert(AccountId(i << 32), i);
        }
        let before = trie.freeze_and_hash();
        trie.parallel_insert_rollback((0..500u64).map(|i| (AccountId((i << 8) | 1), i)).collect());
        assert_eq!(trie.size(), 600);
        trie.do_rollback();
        assert_eq!(trie.size(), 100);
        assert_eq!(trie.freeze_and_hash(), before);
    }

    #[test]
    fn test_metadata_queries_on_canonical_trie() {
        let trie = trie();
        assert_eq!(
            trie.metadata_traversal(PrefixLenBits(8)),
            vec![(AccountId(0), Metadata::ZERO)]
        );
        for i in 0..40u64 {
            trie.insert(AccountId(i << 56), i);
        }
        let below = trie.metadata_query(&AccountId(9 << 56), PrefixLenBits(8));
        assert_eq!(below.size, 10);
        assert_eq!(trie.metadata_query(&AccountId(9 << 56), PrefixLenBits(0)).size, 40);

        let totals = trie.metadata_traversal(PrefixLenBits(8));
        assert_eq!(totals.len(), 41);
        assert_eq!(totals[10], (AccountId(9 << 56), below));
        assert_eq!(totals[40].1, trie.metadata());
    }

    #[test]
    #[should_panic(expected = "whole branch selectors")]
    fn test_metadata_query_rejects_partial_selector() {
        trie().metadata_query(&AccountId(0), PrefixLenBits(6));
    }
}
