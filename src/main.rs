//! Single-node chain driver.
//!
//! Runs the validation engine without a peer-to-peer layer: mines
//! proof-of-work blocks on the configured network, feeds them through
//! chain acceptance, and logs every best-tip change.
//!
//! # Usage
//! ```text
//! chaincore [OPTIONS]
//! ```
//!
//! # Options
//! - `--network <main|test>`: Chain variant (default: test)
//! - `--data-dir <path>`: Persist blocks under this directory
//! - `--blocks <n>`: Stop after mining n blocks (default: 10)

use chaincore::core::acceptor::ChainAcceptor;
use chaincore::core::genesis::Network;
use chaincore::core::proof::ConstantDifficulty;
use chaincore::core::transaction::BasicVerifier;
use chaincore::network::relay::BroadcastChannel;
use chaincore::storage::block_store::{BlockStore, FileBlockStore, MemoryBlockStore};
use chaincore::storage::ledger_store::MemoryLedger;
use chaincore::types::hash::Hash;
use chaincore::types::target::POW_LIMIT;
use chaincore::{error, info};
use std::env;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();

    let mut network = Network::Test;
    let mut data_dir: Option<String> = None;
    let mut blocks: u64 = 10;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--network" => {
                i += 1;
                network = match args.get(i).map(String::as_str) {
                    Some("main") => Network::Main,
                    Some("test") => Network::Test,
                    other => {
                        eprintln!("invalid network: {:?}", other);
                        process::exit(1);
                    }
                };
                i += 1;
            }
            "--data-dir" => {
                i += 1;
                let Some(dir) = args.get(i) else {
                    eprintln!("--data-dir requires an argument");
                    process::exit(1);
                };
                data_dir = Some(dir.clone());
                i += 1;
            }
            "--blocks" => {
                i += 1;
                blocks = match args.get(i).and_then(|n| n.parse().ok()) {
                    Some(n) => n,
                    None => {
                        eprintln!("--blocks requires a number");
                        process::exit(1);
                    }
                };
                i += 1;
            }
            "--help" | "-h" => {
                print_usage(&args[0]);
                process::exit(0);
            }
            other => {
                eprintln!("unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    let store: Box<dyn BlockStore> = match data_dir {
        Some(dir) => match FileBlockStore::open(&dir) {
            Ok(store) => Box::new(store),
            Err(e) => {
                eprintln!("cannot open block store in {dir}: {e}");
                process::exit(1);
            }
        },
        None => Box::new(MemoryBlockStore::new()),
    };

    let broadcast = BroadcastChannel::new(64);
    let mut tips = broadcast.subscribe();
    tokio::spawn(async move {
        while let Ok(tip) = tips.recv().await {
            info!("relayed new best tip {tip}");
        }
    });

    let acceptor = match ChainAcceptor::new(
        network,
        MemoryLedger::new(),
        store,
        ConstantDifficulty(POW_LIMIT),
        BasicVerifier,
        broadcast,
    ) {
        Ok(acceptor) => acceptor,
        Err(e) => {
            eprintln!("cannot initialize chain: {e}");
            process::exit(1);
        }
    };

    info!(
        "mining {blocks} blocks on {:?} from genesis {}",
        network,
        network.genesis_hash()
    );

    let mut reward_recipient = Hash::sha3();
    reward_recipient.update(b"local-miner");
    let reward_recipient = reward_recipient.finalize();

    for _ in 0..blocks {
        let now = unix_time();
        let mut block = acceptor.build_block(now, 50, reward_recipient, Vec::new());

        // Nonce search against the declared target.
        loop {
            if chaincore::core::proof::check_proof_of_work(&block.hash(), block.header.bits)
                .is_ok()
            {
                break;
            }
            block.header.nonce = block.header.nonce.wrapping_add(1);
        }

        match acceptor.accept_block(block) {
            Ok(acceptance) => info!("accepted: {acceptance:?}"),
            Err(e) => {
                error!("mined block rejected: {e}");
                if e.is_fatal() {
                    process::exit(1);
                }
            }
        }
    }

    let (tip, height) = acceptor.best_tip();
    info!("done: best tip {tip} at height {height}");
}

fn unix_time() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

const USAGE: &str = "\
chaincore - block validation and chain acceptance engine

USAGE:
    {program} [OPTIONS]

OPTIONS:
    --network <main|test>    Chain variant (default: test)
    --data-dir <path>        Persist blocks under this directory
    --blocks <n>             Stop after mining n blocks (default: 10)
    -h, --help               Print this help message
";

fn print_usage(program: &str) {
    eprintln!("{}", USAGE.replace("{program}", program));
}
