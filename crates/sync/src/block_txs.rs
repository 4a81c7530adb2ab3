use std::collections::{HashMap, HashSet};

use spvd_consensus::Hash256;
use spvd_primitives::merkleblock::MerkleBlock;
use spvd_primitives::transaction::Transaction;

use crate::error::RequestError;
use crate::request::Request;

/// A filtered block together with the requests for its matched transactions.
#[derive(Debug)]
pub struct BlockTxsRequest {
    block: MerkleBlock,
    /// Matched txids in block order.
    order: Vec<Hash256>,
    requests: HashMap<Hash256, Request>,
    received: HashMap<Hash256, Transaction>,
}

impl BlockTxsRequest {
    pub fn new(block: MerkleBlock, txids: Vec<Hash256>, requests: HashMap<Hash256, Request>) -> Self {
        let mut order = txids;
        let mut seen = HashSet::with_capacity(order.len());
        order.retain(|txid| seen.insert(*txid));
        Self {
            block,
            order,
            requests,
            received: HashMap::new(),
        }
    }

    /// A block with no matched transactions; complete as soon as it exists.
    pub fn without_transactions(block: MerkleBlock) -> Self {
        Self::new(block, Vec::new(), HashMap::new())
    }

    pub fn block(&self) -> &MerkleBlock {
        &self.block
    }

    pub fn block_hash(&self) -> Hash256 {
        self.block.block_hash()
    }

    /// Received transactions in block order.
    pub fn transactions(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.order.iter().filter_map(|txid| self.received.get(txid))
    }

    pub fn outstanding(&self) -> usize {
        self.requests.len()
    }

    pub fn is_complete(&self) -> bool {
        self.requests.is_empty()
    }

    /// Finishes the request for `tx` and keeps the transaction. Returns
    /// whether every requested transaction has now arrived.
    pub fn on_tx_received(&mut self, tx: Transaction) -> Result<bool, RequestError> {
        let txid = tx.txid();
        let Some(mut request) = self.requests.remove(&txid) else {
            return Err(RequestError::UnknownTransaction(txid));
        };
        request.finish();
        self.received.insert(txid, tx);
        Ok(self.requests.is_empty())
    }

    /// Cancels every outstanding transaction request.
    pub fn finish(&mut self) {
        for request in self.requests.values_mut() {
            request.finish();
        }
    }

    pub fn into_parts(mut self) -> (MerkleBlock, Vec<Transaction>) {
        let transactions = self
            .order
            .iter()
            .filter_map(|txid| self.received.remove(txid))
            .collect();
        (self.block, transactions)
    }
}
