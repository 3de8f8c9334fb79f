//! Collaborators that produce and serialize job payloads.
//!
//! The pipeline only depends on the two traits here:
//!
//! - [`PayloadGenerator`]: builds the block batch for a `(mode, height, span)`
//! - [`ArgumentFormatter`]: turns a staged batch into the tool's arguments
//!
//! # Implementations
//!
//! - [`SyntheticPayloadGenerator`]: deterministic, seeded batches
//! - [`CommandPayloadGenerator`]: batches read from an external program
//! - [`FeltArgumentFormatter`]: Cairo `ByteArray` encoding of the staging file

pub mod arguments;
pub mod command;
pub mod synthetic;

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::scheduler::Mode;

pub use arguments::FeltArgumentFormatter;
pub use command::CommandPayloadGenerator;
pub use synthetic::SyntheticPayloadGenerator;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default)]
    pub inputs: Vec<Value>,
    #[serde(default)]
    pub outputs: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockData {
    #[serde(default)]
    pub transactions: Vec<Transaction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub data: BlockData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A generated batch of consecutive blocks.
///
/// Fields this crate does not interpret are kept in `extra` so batches from
/// external generators are staged unchanged.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BlockBatch {
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl BlockBatch {
    /// Cost estimate used for admission.
    ///
    /// `light` batches are charged one unit per block. `full` batches are
    /// charged one unit per transaction input and output.
    pub fn weight(&self, mode: Mode) -> u64 {
        match mode {
            Mode::Light => self.blocks.len() as u64,
            Mode::Full => self
                .blocks
                .iter()
                .flat_map(|block| block.data.transactions.iter())
                .map(|tx| (tx.inputs.len() + tx.outputs.len()) as u64)
                .sum(),
        }
    }
}

/// Produces the payload for one job.
pub trait PayloadGenerator: Send + Sync {
    fn generate(
        &self,
        mode: Mode,
        initial_height: u64,
        block_span: u64,
        fast: bool,
    ) -> Result<BlockBatch>;
}

/// Arguments handed to the external tool, one felt per entry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArgumentsPayload(pub Vec<String>);

impl ArgumentsPayload {
    /// Serialize as a JSON array to `path`.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Serializes a staged batch into the external tool's input format.
pub trait ArgumentFormatter: Send + Sync {
    fn format(
        &self,
        staging_file: &Path,
        execute_scripts: bool,
        other_flag: bool,
    ) -> Result<ArgumentsPayload>;
}
