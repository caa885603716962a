//! The chain acceptor: the single writer of chain state.
//!
//! Every mutation of the ledger, the chain index flags, and the
//! best-chain pointer funnels through one mutex-guarded state object.
//! Pure work (decoding, self-checks, proof checks) runs outside the
//! lock, and block persistence is staged before the lock is taken, so
//! the serialized section covers only the actual state transition.

use crate::core::block::{
    maximum_size_median220, Block, CheckContext, CheckFlags, ValidationError,
};
use crate::core::chain_index::{ChainIndex, IndexNode};
use crate::core::genesis::Network;
use crate::core::proof::{
    self, DifficultyOracle, StakeFault, StakedOutput,
};
use crate::core::transaction::{Transaction, TransactionVerifier};
use crate::network::relay::TipBroadcast;
use crate::storage::block_store::BlockStore;
use crate::storage::ledger_store::LedgerStore;
use crate::types::hash::Hash;
use crate::types::target::Target;
use crate::{error, info, warn};
use std::collections::HashMap;
use std::sync::Mutex;

/// Orphans held pending their parent; beyond this, new ones are dropped.
const MAX_ORPHANS: usize = 1024;

/// Outcome of accepting a block that was not rejected outright.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acceptance {
    /// The block extended the best chain (possibly via reorganization).
    Connected { hash: Hash, height: u64 },
    /// Valid and indexed, but its branch does not overtake the best tip.
    SideChain { hash: Hash },
    /// Predecessor unknown; stored pending its parent.
    Orphaned { missing_parent: Hash },
    /// The block was already indexed.
    AlreadyKnown { hash: Hash },
}

/// Mutable chain state, owned by the acceptor's mutex.
struct ChainState<L> {
    ledger: L,
    best_tip: Hash,
    best_height: u64,
    best_proof: u128,
    /// Serialized sizes of best-chain blocks, genesis first. Pushed on
    /// connect, popped on disconnect; feeds the median-220 size cap.
    recent_sizes: Vec<usize>,
    /// Set when a rollback failed; every further mutation is refused.
    corrupt: bool,
}

/// Validates candidate blocks and maintains the best chain.
pub struct ChainAcceptor<L, B, D, V, N> {
    network: Network,
    index: ChainIndex,
    store: B,
    difficulty: D,
    verifier: V,
    broadcast: N,
    state: Mutex<ChainState<L>>,
    orphans: Mutex<HashMap<Hash, Vec<Block>>>,
}

impl<L, B, D, V, N> ChainAcceptor<L, B, D, V, N>
where
    L: LedgerStore,
    B: BlockStore,
    D: DifficultyOracle,
    V: TransactionVerifier,
    N: TipBroadcast,
{
    /// Creates an acceptor rooted at the network's genesis block.
    pub fn new(
        network: Network,
        mut ledger: L,
        store: B,
        difficulty: D,
        verifier: V,
        broadcast: N,
    ) -> Result<Self, ValidationError> {
        let genesis = network.genesis().clone();
        let hash = genesis.hash();

        let position = store
            .append(&genesis)
            .map_err(|e| ValidationError::Storage(e.to_string()))?;
        let stored = store
            .read(position, false)
            .map_err(|e| ValidationError::Storage(e.to_string()))?;
        if stored.hash() != network.genesis_hash() {
            return Err(ValidationError::ChainStateCorrupt);
        }

        for tx in &genesis.transactions {
            ledger
                .apply(tx, 0)
                .map_err(ValidationError::LedgerConflict)?;
        }

        let entropy_bit = proof::stake_entropy_bit(&hash, 0);
        let index = ChainIndex::new();
        index.insert(IndexNode {
            hash,
            parent: Hash::zero(),
            height: 0,
            cumulative_proof: block_work(&genesis),
            proof_of_stake: false,
            stake_modifier: proof::next_stake_modifier(0, &hash, entropy_bit, 0),
            entropy_bit,
            on_best_chain: true,
            header: genesis.header,
            position,
        });

        info!("chain initialized at genesis {hash}");

        Ok(ChainAcceptor {
            network,
            index,
            store,
            difficulty,
            verifier,
            broadcast,
            state: Mutex::new(ChainState {
                ledger,
                best_tip: hash,
                best_height: 0,
                best_proof: block_work(&genesis),
                recent_sizes: vec![genesis.size()],
                corrupt: false,
            }),
            orphans: Mutex::new(HashMap::new()),
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Current best tip hash and height.
    pub fn best_tip(&self) -> (Hash, u64) {
        let state = self.state.lock().unwrap();
        (state.best_tip, state.best_height)
    }

    /// Cumulative proof of the best chain.
    pub fn best_proof(&self) -> u128 {
        self.state.lock().unwrap().best_proof
    }

    /// Current adaptive block size cap.
    pub fn max_block_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        maximum_size_median220(&state.recent_sizes)
    }

    pub fn contains_block(&self, hash: &Hash) -> bool {
        self.index.contains(hash)
    }

    pub fn index_node(&self, hash: &Hash) -> Option<IndexNode> {
        self.index.get(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.orphans.lock().unwrap().values().map(Vec::len).sum()
    }

    /// Accepts a block using the local wall clock for drift checks.
    pub fn accept_block(&self, block: Block) -> Result<Acceptance, ValidationError> {
        self.accept_block_at(block, unix_time())
    }

    /// Accepts a block, then retries any orphans it unblocked.
    pub fn accept_block_at(&self, block: Block, now: u32) -> Result<Acceptance, ValidationError> {
        let acceptance = self.accept_one(block, now)?;

        // A newly indexed block may be the missing parent of stored
        // orphans; accept them breadth-first.
        let mut parents = match &acceptance {
            Acceptance::Connected { hash, .. } | Acceptance::SideChain { hash } => vec![*hash],
            _ => Vec::new(),
        };
        while let Some(parent) = parents.pop() {
            let children = self.orphans.lock().unwrap().remove(&parent);
            for child in children.unwrap_or_default() {
                let child_hash = child.hash();
                match self.accept_one(child, now) {
                    Ok(Acceptance::Connected { .. }) | Ok(Acceptance::SideChain { .. }) => {
                        parents.push(child_hash);
                    }
                    Ok(_) => {}
                    Err(err) => warn!("orphan {child_hash} rejected: {err}"),
                }
            }
        }

        Ok(acceptance)
    }

    /// Single-block acceptance: validation, persistence, indexing, and
    /// best-chain selection. No orphan processing.
    fn accept_one(&self, block: Block, now: u32) -> Result<Acceptance, ValidationError> {
        let hash = block.hash();
        if self.index.contains(&hash) {
            return Ok(Acceptance::AlreadyKnown { hash });
        }

        let Some(parent) = self.index.get(&block.header.previous_block) else {
            let missing_parent = block.header.previous_block;
            self.stash_orphan(block);
            return Ok(Acceptance::Orphaned { missing_parent });
        };
        let height = parent.height + 1;

        let expected = self
            .difficulty
            .expected_bits(height, block.is_proof_of_stake());
        if block.header.bits != expected {
            return Err(ValidationError::WrongDifficulty {
                expected,
                found: block.header.bits,
            });
        }

        // Pure self-checks run outside the serialized section.
        let ctx = CheckContext {
            max_size: self.max_block_size(),
            now,
        };
        block.check_block(&ctx, CheckFlags::full(), &self.verifier)?;

        // Stage persistence before taking the lock. A block that then
        // fails the under-lock stake check leaves an unreferenced record
        // behind, which an append-only store tolerates.
        let position = self
            .store
            .append(&block)
            .map_err(|e| ValidationError::Storage(e.to_string()))?;

        let mut state = self.state.lock().unwrap();
        if state.corrupt {
            return Err(ValidationError::ChainStateCorrupt);
        }

        let proof_of_stake = self.check_stake_under_lock(&state, &block)?;

        let entropy_bit = proof::stake_entropy_bit(&hash, height);
        let node = IndexNode {
            hash,
            parent: parent.hash,
            height,
            cumulative_proof: parent.cumulative_proof.saturating_add(block_work(&block)),
            proof_of_stake,
            stake_modifier: proof::next_stake_modifier(
                parent.stake_modifier,
                &hash,
                entropy_bit,
                height,
            ),
            entropy_bit,
            on_best_chain: false,
            header: block.header,
            position,
        };
        self.index.insert(node.clone());

        let became_best = self.set_best_chain(&mut state, &node, Some(&block))?;
        drop(state);

        if became_best {
            info!("new best tip {hash} at height {height}");
            self.broadcast.notify_new_best_tip(hash);
            Ok(Acceptance::Connected { hash, height })
        } else {
            Ok(Acceptance::SideChain { hash })
        }
    }

    /// Verifies the stake kernel against the current ledger view.
    ///
    /// Runs under the chain-state lock because it reads the ledger. The
    /// modifier and entropy bit come from the parent node, so the values
    /// were fixed before the kernel output could have been chosen.
    fn check_stake_under_lock(
        &self,
        state: &ChainState<L>,
        block: &Block,
    ) -> Result<bool, ValidationError> {
        let crate::core::block::ProofKind::Stake { kernel, stake_time } = block.proof_kind()
        else {
            return Ok(false);
        };

        let parent = self
            .index
            .get(&block.header.previous_block)
            .ok_or(ValidationError::ChainStateCorrupt)?;

        let Some(entry) = state.ledger.lookup(&kernel) else {
            return Err(ValidationError::BadProofOfStake(StakeFault::UnknownKernel));
        };

        proof::check_proof_of_stake(
            block.header.bits,
            parent.stake_modifier,
            parent.entropy_bit,
            &kernel,
            &StakedOutput {
                value: entry.value,
                funding_time: entry.funding_time,
            },
            stake_time,
        )?;

        Ok(true)
    }

    fn stash_orphan(&self, block: Block) {
        let mut orphans = self.orphans.lock().unwrap();
        let total: usize = orphans.values().map(Vec::len).sum();
        if total >= MAX_ORPHANS {
            warn!("orphan pool full, dropping block {}", block.hash());
            return;
        }
        orphans
            .entry(block.header.previous_block)
            .or_default()
            .push(block);
    }

    /// Activates `tip` if its cumulative proof beats the best chain.
    ///
    /// Returns whether the best-chain pointer moved. `block` carries the
    /// tip's transactions when the caller already holds them, avoiding a
    /// store read on the common extend-the-tip path.
    fn set_best_chain(
        &self,
        state: &mut ChainState<L>,
        tip: &IndexNode,
        block: Option<&Block>,
    ) -> Result<bool, ValidationError> {
        if tip.cumulative_proof <= state.best_proof {
            return Ok(false);
        }

        if tip.parent == state.best_tip {
            // Plain extension of the current tip.
            let owned;
            let block = match block {
                Some(b) => b,
                None => {
                    owned = self.read_block(tip)?;
                    &owned
                }
            };
            connect_block(&mut state.ledger, block, tip.height)?;
            state.recent_sizes.push(block.size());
            self.index.set_best_flag(&tip.hash, true);
            state.best_tip = tip.hash;
            state.best_height = tip.height;
            state.best_proof = tip.cumulative_proof;
            return Ok(true);
        }

        self.set_best_chain_inner(state, tip)
    }

    /// Full reorganization onto the branch ending at `tip`.
    ///
    /// Transactional at the chain level: either the switch completes and
    /// all bookkeeping moves, or the prior best chain is restored
    /// exactly. A rollback that itself fails poisons the chain state.
    fn set_best_chain_inner(
        &self,
        state: &mut ChainState<L>,
        tip: &IndexNode,
    ) -> Result<bool, ValidationError> {
        let fork = self
            .index
            .fork_point(&state.best_tip, &tip.hash)
            .ok_or(ValidationError::ChainStateCorrupt)?;
        let old_path = self
            .index
            .path_from(&fork, &state.best_tip)
            .ok_or(ValidationError::ChainStateCorrupt)?;
        let new_path = self
            .index
            .path_from(&fork, &tip.hash)
            .ok_or(ValidationError::ChainStateCorrupt)?;

        info!(
            "reorganizing: fork {fork}, disconnecting {}, connecting {}",
            old_path.len(),
            new_path.len()
        );

        // Read both branches from the store up front. The path is only
        // known inside the serialized section, but prefetching keeps the
        // ledger out of any half-reorganized state while I/O runs, and a
        // read failure here aborts before anything has been mutated.
        let mut old_blocks = Vec::with_capacity(old_path.len());
        for hash in old_path.iter().rev() {
            let node = self
                .index
                .get(hash)
                .ok_or(ValidationError::ChainStateCorrupt)?;
            old_blocks.push(self.read_block(&node)?);
        }
        let mut new_blocks = Vec::with_capacity(new_path.len());
        for hash in &new_path {
            let node = self
                .index
                .get(hash)
                .ok_or(ValidationError::ChainStateCorrupt)?;
            new_blocks.push((self.read_block(&node)?, node.height));
        }

        // Undo the old branch, tip first.
        for block in &old_blocks {
            if let Err(err) = disconnect_block(&mut state.ledger, block) {
                state.corrupt = true;
                error!("rollback of {} failed, chain state is corrupt", block.hash());
                return Err(err);
            }
        }

        // Connect the new branch, fork first.
        let mut connected: Vec<&Block> = Vec::with_capacity(new_blocks.len());
        for (block, height) in &new_blocks {
            match connect_block(&mut state.ledger, block, *height) {
                Ok(()) => connected.push(block),
                Err(err) => {
                    self.invalid_chain_found(&block.hash(), &err);
                    self.restore_old_chain(state, &connected, &old_blocks)?;
                    return Err(ValidationError::ReorgFailed);
                }
            }
        }

        // Success: move every piece of bookkeeping at once.
        for _ in &old_path {
            state.recent_sizes.pop();
        }
        for block in &connected {
            state.recent_sizes.push(block.size());
        }
        for hash in &old_path {
            self.index.set_best_flag(hash, false);
        }
        for hash in &new_path {
            self.index.set_best_flag(hash, true);
        }
        state.best_tip = tip.hash;
        state.best_height = tip.height;
        state.best_proof = tip.cumulative_proof;

        Ok(true)
    }

    /// Unwinds a partially-connected new branch and reconnects the old
    /// chain. Any failure here leaves no consistent state to return to.
    fn restore_old_chain(
        &self,
        state: &mut ChainState<L>,
        connected: &[&Block],
        old_blocks: &[Block],
    ) -> Result<(), ValidationError> {
        for block in connected.iter().rev() {
            if disconnect_block(&mut state.ledger, block).is_err() {
                state.corrupt = true;
                error!("reorg rollback failed, chain state is corrupt");
                return Err(ValidationError::ChainStateCorrupt);
            }
        }
        // old_blocks were disconnected tip-first; reconnect fork-first.
        for block in old_blocks.iter().rev() {
            let node = self
                .index
                .get(&block.hash())
                .ok_or(ValidationError::ChainStateCorrupt)?;
            if connect_block(&mut state.ledger, block, node.height).is_err() {
                state.corrupt = true;
                error!("reorg rollback failed, chain state is corrupt");
                return Err(ValidationError::ChainStateCorrupt);
            }
        }
        Ok(())
    }

    fn invalid_chain_found(&self, hash: &Hash, err: &ValidationError) {
        error!("invalid chain: block {hash} cannot be connected: {err}");
    }

    fn read_block(&self, node: &IndexNode) -> Result<Block, ValidationError> {
        self.store
            .read(node.position, true)
            .map_err(|e| ValidationError::Storage(e.to_string()))
    }

    /// Assembles a candidate proof-of-work block on the current tip.
    ///
    /// The caller owns the nonce search: iterate the header nonce until
    /// the hash satisfies the target, then submit via `accept_block`.
    pub fn build_block(
        &self,
        timestamp: u32,
        reward: u64,
        recipient: Hash,
        txs: Vec<Transaction>,
    ) -> Block {
        let (tip, height) = self.best_tip();

        let mut transactions = vec![Transaction::coinbase(timestamp, reward, recipient)];
        transactions.extend(txs);

        let mut block = Block::new(
            crate::core::block::Header {
                version: 1,
                previous_block: tip,
                merkle_root: Hash::zero(),
                timestamp,
                bits: self.difficulty.expected_bits(height + 1, false),
                nonce: 0,
            },
            transactions,
        );
        block.header.merkle_root = block.compute_merkle_root();
        block
    }
}

/// Proof contribution of one block: expected attempts for its target.
fn block_work(block: &Block) -> u128 {
    block
        .header
        .bits
        .expand()
        .unwrap_or(Target::ZERO)
        .work()
}

/// Applies every transaction of a block to the ledger, in order.
///
/// All-or-nothing: if any transaction conflicts, the ones already
/// applied are undone and the ledger is exactly as before.
fn connect_block<L: LedgerStore>(
    ledger: &mut L,
    block: &Block,
    height: u64,
) -> Result<(), ValidationError> {
    for (i, tx) in block.transactions.iter().enumerate() {
        if let Err(conflict) = ledger.apply(tx, height) {
            for done in block.transactions[..i].iter().rev() {
                if ledger.undo(done).is_err() {
                    return Err(ValidationError::ChainStateCorrupt);
                }
            }
            return Err(ValidationError::LedgerConflict(conflict));
        }
    }
    Ok(())
}

/// Exact inverse of [`connect_block`]: undoes transactions in reverse.
fn disconnect_block<L: LedgerStore>(ledger: &mut L, block: &Block) -> Result<(), ValidationError> {
    for tx in block.transactions.iter().rev() {
        if ledger.undo(tx).is_err() {
            return Err(ValidationError::ChainStateCorrupt);
        }
    }
    Ok(())
}

fn unix_time() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}
