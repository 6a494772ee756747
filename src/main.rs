use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::Parser;

use cn_blockchain_sync::sync::node::mock::{mock_transaction, MockCurrency, MockNode};
use cn_blockchain_sync::types::{BlockHeight, Hash, SyncStart, Transaction};
use cn_blockchain_sync::{
    BlockchainConsumer, BlockchainSynchronizer, CompleteBlock, DeletionReason, SyncConfig,
    SyncError, SyncEvent,
};

const WAIT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    /// Number of in-memory wallets sharing the synchronizer.
    #[arg(long, default_value_t = 2)]
    consumers: usize,

    /// Blocks mined on the mock node before starting.
    #[arg(long, default_value_t = 250)]
    blocks: u32,

    /// Depth of the reorganization applied after the first sync.
    #[arg(long, default_value_t = 3)]
    reorg_depth: u32,

    /// Transactions placed in the mock pool before starting.
    #[arg(long, default_value_t = 4)]
    pool_txs: u32,

    /// JSON file with synchronizer settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where the synchronizer state (genesis hash) is saved and reloaded.
    #[arg(long)]
    state_file: Option<PathBuf>,
}

#[derive(Default)]
struct WalletState {
    height: BlockHeight,
    transactions: usize,
    pool: HashSet<Hash>,
    unconfirmed: HashSet<Hash>,
}

/// Minimal consumer: counts what it is given.
#[derive(Default)]
struct DemoWallet {
    state: Mutex<WalletState>,
}

impl DemoWallet {
    fn state(&self) -> std::sync::MutexGuard<'_, WalletState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl BlockchainConsumer for DemoWallet {
    fn sync_start(&self) -> SyncStart {
        SyncStart::default()
    }

    fn known_pool_tx_ids(&self) -> HashSet<Hash> {
        self.state().pool.clone()
    }

    fn on_blockchain_detach(&self, height: BlockHeight) {
        self.state().height = height;
    }

    fn on_new_blocks(&self, blocks: &[CompleteBlock], start_height: BlockHeight) -> usize {
        let mut state = self.state();
        state.height = start_height + blocks.len() as BlockHeight;
        state.transactions += blocks.iter().map(|b| b.transactions.len()).sum::<usize>();
        blocks.len()
    }

    fn on_pool_updated(
        &self,
        added: &[Transaction],
        deleted: &[(Hash, DeletionReason)],
    ) -> anyhow::Result<()> {
        let mut state = self.state();
        state.pool.extend(added.iter().map(|tx| tx.hash));
        for (id, _) in deleted {
            state.pool.remove(id);
        }
        Ok(())
    }

    fn add_unconfirmed_transaction(&self, transaction: &Transaction) -> anyhow::Result<()> {
        self.state().unconfirmed.insert(transaction.hash);
        Ok(())
    }

    fn remove_unconfirmed_transaction(&self, transaction_hash: &Hash) {
        self.state().unconfirmed.remove(transaction_hash);
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SyncConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => SyncConfig::default(),
    };

    println!("[MAIN] Mining {} blocks, {} pool transactions", args.blocks, args.pool_txs);
    let node = Arc::new(MockNode::with_blocks(args.blocks));
    for n in 0..args.pool_txs {
        node.add_pool_transaction(mock_transaction(n));
    }

    let currency = Arc::new(MockCurrency::new(MockNode::genesis_hash()));
    let sync = BlockchainSynchronizer::new(node.clone(), currency, config);

    if let Some(path) = &args.state_file {
        if path.exists() {
            let mut file = File::open(path)?;
            sync.load(&mut file)
                .with_context(|| format!("state file {} belongs to another chain", path.display()))?;
            println!("[MAIN] Loaded synchronizer state from {}", path.display());
        }
    }

    let wallets: Vec<Arc<DemoWallet>> = (0..args.consumers)
        .map(|_| Arc::new(DemoWallet::default()))
        .collect();
    let mut ids = Vec::with_capacity(wallets.len());
    for wallet in &wallets {
        ids.push(sync.add_consumer(wallet.clone())?);
    }

    let (tx, completions) = mpsc::channel();
    let tx = Mutex::new(tx);
    sync.add_observer(move |event| match event {
        SyncEvent::ProgressUpdated { processed, total } => {
            log::info!("[MAIN] Progress {}/{}", processed, total);
        }
        SyncEvent::Completed(result) => {
            let outcome = result.as_ref().map_err(|e| e.to_string()).map(|_| ());
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(outcome);
            }
        }
    });

    let t0 = Instant::now();
    sync.start()?;
    wait_for_success(&completions)?;
    println!("[MAIN] Initial sync finished in {:?}", t0.elapsed());

    println!("[MAIN] Reorganizing the top {} blocks", args.reorg_depth);
    node.reorganize(args.reorg_depth, args.reorg_depth + 2);
    wait_for_success(&completions)?;

    println!("[MAIN] Mining the pool");
    node.mine_pool();
    wait_for_success(&completions)?;

    let unconfirmed = mock_transaction(args.pool_txs + 1);
    sync.add_unconfirmed_transaction(unconfirmed.clone())?.wait()?;
    sync.remove_unconfirmed_transaction(unconfirmed.hash)?.wait()?;

    sync.stop();

    if let Some(path) = &args.state_file {
        sync.save(&mut File::create(path)?)?;
        sync.load(&mut File::open(path)?)?;
        println!("[MAIN] Saved and verified synchronizer state in {}", path.display());
    }

    println!("-----------------------------------");
    println!("Node height:      {}", node.height());
    println!("Last block id:    {}", sync.last_block_id());
    for (id, wallet) in ids.iter().zip(&wallets) {
        let known = sync.get_consumer_known_blocks(*id)?;
        let state = wallet.state();
        println!(
            "{}: tracker {} blocks, wallet height {}, {} txs, pool {}",
            id,
            known.len(),
            state.height,
            state.transactions,
            state.pool.len()
        );
    }
    println!("-----------------------------------");

    Ok(())
}

/// Waits for the next completion, skipping interrupted ones.
fn wait_for_success(completions: &mpsc::Receiver<Result<(), String>>) -> Result<()> {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match completions.recv_timeout(remaining) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) if e == SyncError::Interrupted.to_string() => continue,
            Ok(Err(e)) => return Err(anyhow!("synchronization failed: {}", e)),
            Err(_) => return Err(anyhow!("no completion within {:?}", WAIT_TIMEOUT)),
        }
    }
}
