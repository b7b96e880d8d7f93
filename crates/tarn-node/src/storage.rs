//! RocksDB-backed persistent chain storage.
//!
//! Implements [`ChainStore`] using RocksDB column families for block bodies,
//! the height index, difficulty metadata, address states, the transaction
//! index, and chain-wide markers. All batched mutations commit through an
//! atomic [`WriteBatch`] for crash safety.
//!
//! Unlike the in-memory store, nothing here bootstraps genesis on open; the
//! chain core drives the cold start so that the whole bootstrap lands in one
//! batch.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, Options, WriteBatch, DB};

use tarn_core::address_state::{AddressState, AddressStateMap};
use tarn_core::error::StoreError;
use tarn_core::metadata::{BlockMetadata, BlockNumberMapping, ForkState, TxMetadata};
use tarn_core::store::ChainStore;
use tarn_core::types::{Address, Block, Hash256};

// --- Column family names ---

const CF_BLOCKS: &str = "blocks";
const CF_NUMBER_INDEX: &str = "number_index";
const CF_METADATA: &str = "block_metadata";
const CF_ADDRESS_STATES: &str = "address_states";
const CF_TX_INDEX: &str = "tx_index";
const CF_CHAIN: &str = "chain";

/// All column family names.
const ALL_CFS: &[&str] = &[
    CF_BLOCKS,
    CF_NUMBER_INDEX,
    CF_METADATA,
    CF_ADDRESS_STATES,
    CF_TX_INDEX,
    CF_CHAIN,
];

// --- Chain-wide keys ---

const CHAIN_HEIGHT: &[u8] = b"chain_height";
const FORK_STATE: &[u8] = b"fork_state";

/// RocksDB-backed persistent chain storage.
pub struct RocksStore {
    db: DB,
}

impl RocksStore {
    /// Open or create a RocksDB database at the given path.
    ///
    /// Creates all column families if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { db })
    }

    /// Flush all in-memory buffers to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError::Backend(e.to_string()))
    }

    // --- Internal helpers ---

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::MissingColumnFamily(name.to_string()))
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, StoreError> {
        bincode::encode_to_vec(value, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, StoreError> {
        bincode::decode_from_slice(bytes, bincode::config::standard())
            .map(|(value, _)| value)
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Read and decode a record from a column family.
    fn get_record<T: bincode::Decode<()>>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>, StoreError> {
        let cf = self.cf_handle(cf_name)?;
        match self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Encode and buffer a record into a batch.
    fn put_record<T: bincode::Encode>(
        &self,
        cf_name: &str,
        key: &[u8],
        value: &T,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        let cf = self.cf_handle(cf_name)?;
        batch.put_cf(cf, key, Self::encode(value)?);
        Ok(())
    }
}

impl ChainStore for RocksStore {
    type Batch = WriteBatch;

    fn batch(&self) -> WriteBatch {
        WriteBatch::default()
    }

    fn write_batch(&mut self, batch: WriteBatch) -> Result<(), StoreError> {
        self.db
            .write(batch)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn chain_height(&self) -> Result<Option<u64>, StoreError> {
        let cf = self.cf_handle(CF_CHAIN)?;
        match self
            .db
            .get_cf(&cf, CHAIN_HEIGHT)
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => {
                Ok(Some(u64::from_le_bytes(bytes.try_into().unwrap())))
            }
            Some(_) => Err(StoreError::CorruptRecord("chain_height".into())),
            None => Ok(None),
        }
    }

    fn put_chain_height(&self, height: u64, batch: &mut WriteBatch) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_CHAIN)?;
        batch.put_cf(cf, CHAIN_HEIGHT, height.to_le_bytes());
        Ok(())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        self.get_record(CF_BLOCKS, hash.as_bytes())
    }

    fn put_block(&self, block: &Block, batch: &mut WriteBatch) -> Result<(), StoreError> {
        self.put_record(CF_BLOCKS, block.header.hash().as_bytes(), block, batch)
    }

    fn get_block_number_mapping(
        &self,
        number: u64,
    ) -> Result<Option<BlockNumberMapping>, StoreError> {
        self.get_record(CF_NUMBER_INDEX, &Self::height_key(number))
    }

    fn put_block_number_mapping(
        &self,
        number: u64,
        mapping: &BlockNumberMapping,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        self.put_record(CF_NUMBER_INDEX, &Self::height_key(number), mapping, batch)
    }

    fn remove_block_number_mapping(&mut self, number: u64) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_NUMBER_INDEX)?;
        self.db
            .delete_cf(&cf, Self::height_key(number))
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn get_block_metadata(&self, hash: &Hash256) -> Result<Option<BlockMetadata>, StoreError> {
        self.get_record(CF_METADATA, hash.as_bytes())
    }

    fn put_block_metadata(
        &self,
        hash: &Hash256,
        metadata: &BlockMetadata,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        self.put_record(CF_METADATA, hash.as_bytes(), metadata, batch)
    }

    fn get_address_state(&self, address: &Address) -> Result<Option<AddressState>, StoreError> {
        self.get_record(CF_ADDRESS_STATES, address.as_bytes())
    }

    fn put_addresses_state(
        &self,
        map: &AddressStateMap,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        for (address, state) in map.iter() {
            self.put_record(CF_ADDRESS_STATES, address.as_bytes(), state, batch)?;
        }
        Ok(())
    }

    fn get_fork_state(&self) -> Result<Option<ForkState>, StoreError> {
        self.get_record(CF_CHAIN, FORK_STATE)
    }

    fn put_fork_state(
        &mut self,
        fork_state: &ForkState,
        batch: Option<&mut WriteBatch>,
    ) -> Result<(), StoreError> {
        match batch {
            Some(batch) => self.put_record(CF_CHAIN, FORK_STATE, fork_state, batch),
            None => {
                let cf = self.cf_handle(CF_CHAIN)?;
                self.db
                    .put_cf(&cf, FORK_STATE, Self::encode(fork_state)?)
                    .map_err(|e| StoreError::Backend(e.to_string()))
            }
        }
    }

    fn delete_fork_state(&mut self) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_CHAIN)?;
        self.db
            .delete_cf(&cf, FORK_STATE)
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    fn get_tx_metadata(&self, tx_hash: &Hash256) -> Result<Option<TxMetadata>, StoreError> {
        self.get_record(CF_TX_INDEX, tx_hash.as_bytes())
    }

    fn update_tx_metadata(&self, block: &Block, batch: &mut WriteBatch) -> Result<(), StoreError> {
        let header_hash = block.header.hash();
        for tx in &block.transactions {
            let tx_hash = tx
                .hash()
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            self.put_record(
                CF_TX_INDEX,
                tx_hash.as_bytes(),
                &TxMetadata {
                    header_hash,
                    block_number: block.header.block_number,
                },
                batch,
            )?;
        }
        Ok(())
    }

    fn rollback_tx_metadata(
        &self,
        block: &Block,
        batch: &mut WriteBatch,
    ) -> Result<(), StoreError> {
        let cf = self.cf_handle(CF_TX_INDEX)?;
        for tx in &block.transactions {
            let tx_hash = tx
                .hash()
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            batch.delete_cf(cf, tx_hash.as_bytes());
        }
        Ok(())
    }
}
