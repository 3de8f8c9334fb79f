use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

use crate::error::{ClientError, Result};
use crate::payload::{Block, BlockBatch, BlockData, PayloadGenerator, Transaction};
use crate::scheduler::Mode;

const DEFAULT_MAX_TRANSACTIONS: usize = 8;
const DEFAULT_MAX_TX_IO: usize = 4;
const GENESIS_TIME: u64 = 1_231_006_505;

/// Deterministic stand-in for a chain data source.
///
/// Each block is derived from `seed` and its height only, so the same height
/// yields the same block regardless of which batch it lands in.
#[derive(Debug, Clone)]
pub struct SyntheticPayloadGenerator {
    seed: u64,
    max_transactions: usize,
    max_tx_io: usize,
}

impl Default for SyntheticPayloadGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl SyntheticPayloadGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            max_transactions: DEFAULT_MAX_TRANSACTIONS,
            max_tx_io: DEFAULT_MAX_TX_IO,
        }
    }

    pub fn with_max_transactions(mut self, max_transactions: usize) -> Self {
        self.max_transactions = max_transactions.max(1);
        self
    }

    pub fn with_max_tx_io(mut self, max_tx_io: usize) -> Self {
        self.max_tx_io = max_tx_io.max(1);
        self
    }

    fn rng_for(&self, height: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ height.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    fn block(&self, mode: Mode, height: u64, fast: bool) -> Block {
        let mut rng = self.rng_for(height);

        let mut extra = Map::new();
        extra.insert("height".to_string(), json!(height));
        extra.insert("hash".to_string(), json!(hex_word(&mut rng)));
        extra.insert(
            "time".to_string(),
            json!(GENESIS_TIME.saturating_add(height.saturating_mul(600))),
        );
        extra.insert("bits".to_string(), json!("1d00ffff"));

        let data = match mode {
            Mode::Light => BlockData::default(),
            Mode::Full => {
                let count = rng.gen_range(1..=self.max_transactions);
                let transactions = (0..count)
                    .map(|_| self.transaction(&mut rng, fast))
                    .collect();
                BlockData {
                    transactions,
                    extra: Map::new(),
                }
            }
        };

        Block { data, extra }
    }

    fn transaction(&self, rng: &mut StdRng, fast: bool) -> Transaction {
        let inputs = (0..rng.gen_range(1..=self.max_tx_io))
            .map(|_| {
                json!({
                    "txid": hex_word(rng),
                    "vout": rng.gen_range(0u32..8),
                })
            })
            .collect();
        let outputs = (0..rng.gen_range(1..=self.max_tx_io))
            .map(|_| {
                json!({
                    "value": rng.gen_range(546u64..5_000_000_000),
                    "script_pubkey": hex_word(rng),
                })
            })
            .collect();

        let mut extra = Map::new();
        if !fast {
            extra.insert(
                "witness".to_string(),
                Value::Array(vec![json!(hex_word(rng)), json!(hex_word(rng))]),
            );
        }

        Transaction {
            inputs,
            outputs,
            extra,
        }
    }
}

fn hex_word(rng: &mut StdRng) -> String {
    let words: [u64; 4] = rng.gen();
    words.iter().map(|w| format!("{:016x}", w)).collect()
}

impl PayloadGenerator for SyntheticPayloadGenerator {
    fn generate(
        &self,
        mode: Mode,
        initial_height: u64,
        block_span: u64,
        fast: bool,
    ) -> Result<BlockBatch> {
        if block_span == 0 {
            return Err(ClientError::Generation {
                height: initial_height,
                reason: "block span must be positive".to_string(),
            });
        }
        let end = initial_height
            .checked_add(block_span)
            .ok_or_else(|| ClientError::Generation {
                height: initial_height,
                reason: "height range overflows".to_string(),
            })?;

        let blocks = (initial_height..end)
            .map(|height| self.block(mode, height, fast))
            .collect();

        let mut extra = Map::new();
        extra.insert(
            "chain_state".to_string(),
            json!({ "block_height": initial_height.checked_sub(1) }),
        );

        Ok(BlockBatch { blocks, extra })
    }
}
