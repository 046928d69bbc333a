//! In-memory streams, network and data transfer for tests and local runs.

use crate::datatransfer::{DataTransfer, TransferVoucher};
use crate::error::{Result, StorageMarketError};
use crate::network::{StorageDealStream, StorageMarketNetwork, StorageReceiver};
use crate::types::{Proposal, SignedResponse};
use async_trait::async_trait;
use market_piecestore::{Blockstore, DagNode};
use market_types::{decode_frame, encode_frame, Cid, Codec, PeerId, Selector};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Deal stream with scripted reads and recorded writes, for unit tests of
/// single state functions.
pub struct TestDealStream {
    peer: PeerId,
    proposals: Mutex<VecDeque<Proposal>>,
    responses: Mutex<VecDeque<SignedResponse>>,
    read_response_error: Option<String>,
    write_proposal_error: Option<String>,
    write_response_error: Option<String>,
    close_error: Option<String>,
    written_proposals: Mutex<Vec<Proposal>>,
    written_responses: Mutex<Vec<SignedResponse>>,
    tags: Mutex<Vec<String>>,
}

impl TestDealStream {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            proposals: Mutex::new(VecDeque::new()),
            responses: Mutex::new(VecDeque::new()),
            read_response_error: None,
            write_proposal_error: None,
            write_response_error: None,
            close_error: None,
            written_proposals: Mutex::new(Vec::new()),
            written_responses: Mutex::new(Vec::new()),
            tags: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(mut self, response: SignedResponse) -> Self {
        self.responses.get_mut().push_back(response);
        self
    }

    pub fn with_read_response_error(mut self, message: &str) -> Self {
        self.read_response_error = Some(message.to_string());
        self
    }

    pub fn with_write_proposal_error(mut self, message: &str) -> Self {
        self.write_proposal_error = Some(message.to_string());
        self
    }

    pub fn with_write_response_error(mut self, message: &str) -> Self {
        self.write_response_error = Some(message.to_string());
        self
    }

    pub fn with_close_error(mut self, message: &str) -> Self {
        self.close_error = Some(message.to_string());
        self
    }

    pub async fn queue_proposal(&self, proposal: Proposal) {
        self.proposals.lock().await.push_back(proposal);
    }

    pub async fn tagged(&self) -> Vec<String> {
        self.tags.lock().await.clone()
    }

    pub async fn written_proposals(&self) -> Vec<Proposal> {
        self.written_proposals.lock().await.clone()
    }

    pub async fn written_responses(&self) -> Vec<SignedResponse> {
        self.written_responses.lock().await.clone()
    }
}

#[async_trait]
impl StorageDealStream for TestDealStream {
    async fn read_deal_proposal(&self) -> Result<Proposal> {
        self.proposals
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| StorageMarketError::Stream("no proposal queued".to_string()))
    }

    async fn write_deal_proposal(&self, proposal: Proposal) -> Result<()> {
        if let Some(message) = &self.write_proposal_error {
            return Err(StorageMarketError::Stream(message.clone()));
        }
        self.written_proposals.lock().await.push(proposal);
        Ok(())
    }

    async fn read_deal_response(&self) -> Result<SignedResponse> {
        if let Some(message) = &self.read_response_error {
            return Err(StorageMarketError::Stream(message.clone()));
        }
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| StorageMarketError::Stream("no response queued".to_string()))
    }

    async fn write_deal_response(&self, response: SignedResponse) -> Result<()> {
        if let Some(message) = &self.write_response_error {
            return Err(StorageMarketError::Stream(message.clone()));
        }
        self.written_responses.lock().await.push(response);
        Ok(())
    }

    fn remote_peer(&self) -> PeerId {
        self.peer
    }

    async fn tag_protected_connection(&self, tag: &str) {
        self.tags.lock().await.push(tag.to_string());
    }

    async fn close(&self) -> Result<()> {
        if let Some(message) = &self.close_error {
            return Err(StorageMarketError::Stream(message.clone()));
        }
        Ok(())
    }
}

/// One end of an in-memory deal stream. Messages cross as length-prefixed
/// frames, so the wire codec is exercised on every exchange.
pub struct ChannelDealStream {
    remote: PeerId,
    proposal_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    proposal_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    response_tx: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
    response_rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    tags: Mutex<Vec<String>>,
}

/// Paired (client half, provider half) of an in-memory deal stream.
pub fn deal_stream_pair(
    client_peer: PeerId,
    provider_peer: PeerId,
) -> (Arc<ChannelDealStream>, Arc<ChannelDealStream>) {
    let (proposal_tx, proposal_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let client = Arc::new(ChannelDealStream {
        remote: provider_peer,
        proposal_tx: Mutex::new(Some(proposal_tx)),
        proposal_rx: Mutex::new(None),
        response_tx: Mutex::new(None),
        response_rx: Mutex::new(Some(response_rx)),
        tags: Mutex::new(Vec::new()),
    });
    let provider = Arc::new(ChannelDealStream {
        remote: client_peer,
        proposal_tx: Mutex::new(None),
        proposal_rx: Mutex::new(Some(proposal_rx)),
        response_tx: Mutex::new(Some(response_tx)),
        response_rx: Mutex::new(None),
        tags: Mutex::new(Vec::new()),
    });
    (client, provider)
}

impl ChannelDealStream {
    async fn send(
        slot: &Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
        frame: Vec<u8>,
    ) -> Result<()> {
        match slot.lock().await.as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| StorageMarketError::Stream("stream closed".to_string())),
            None => Err(StorageMarketError::Stream(
                "not the writing end of this stream".to_string(),
            )),
        }
    }

    async fn receive(
        slot: &Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    ) -> Result<Vec<u8>> {
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(rx) => rx
                .recv()
                .await
                .ok_or_else(|| StorageMarketError::Stream("stream closed".to_string())),
            None => Err(StorageMarketError::Stream(
                "not the reading end of this stream".to_string(),
            )),
        }
    }
}

#[async_trait]
impl StorageDealStream for ChannelDealStream {
    async fn read_deal_proposal(&self) -> Result<Proposal> {
        let frame = Self::receive(&self.proposal_rx).await?;
        decode_frame(&frame).map_err(|e| StorageMarketError::Codec(e.to_string()))
    }

    async fn write_deal_proposal(&self, proposal: Proposal) -> Result<()> {
        let frame =
            encode_frame(&proposal).map_err(|e| StorageMarketError::Codec(e.to_string()))?;
        Self::send(&self.proposal_tx, frame).await
    }

    async fn read_deal_response(&self) -> Result<SignedResponse> {
        let frame = Self::receive(&self.response_rx).await?;
        decode_frame(&frame).map_err(|e| StorageMarketError::Codec(e.to_string()))
    }

    async fn write_deal_response(&self, response: SignedResponse) -> Result<()> {
        let frame =
            encode_frame(&response).map_err(|e| StorageMarketError::Codec(e.to_string()))?;
        Self::send(&self.response_tx, frame).await
    }

    fn remote_peer(&self) -> PeerId {
        self.remote
    }

    async fn tag_protected_connection(&self, tag: &str) {
        self.tags.lock().await.push(tag.to_string());
    }

    async fn close(&self) -> Result<()> {
        *self.proposal_tx.lock().await = None;
        *self.proposal_rx.lock().await = None;
        *self.response_tx.lock().await = None;
        *self.response_rx.lock().await = None;
        Ok(())
    }
}

/// In-memory storage market network: deal streams are channel pairs, the
/// provider's receiver runs in a spawned task per stream.
pub struct InMemoryStorageNetwork {
    local_peer: PeerId,
    delegate: RwLock<Option<Arc<dyn StorageReceiver>>>,
}

impl InMemoryStorageNetwork {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            delegate: RwLock::new(None),
        }
    }
}

#[async_trait]
impl StorageMarketNetwork for InMemoryStorageNetwork {
    async fn new_deal_stream(&self, peer: PeerId) -> Result<Arc<dyn StorageDealStream>> {
        let delegate = self
            .delegate
            .read()
            .await
            .clone()
            .ok_or_else(|| StorageMarketError::Network("protocol not supported".to_string()))?;
        let (client_half, provider_half) = deal_stream_pair(self.local_peer, peer);
        tokio::spawn(async move {
            delegate.handle_deal_stream(provider_half).await;
        });
        Ok(client_half)
    }

    async fn set_delegate(&self, receiver: Arc<dyn StorageReceiver>) -> Result<()> {
        *self.delegate.write().await = Some(receiver);
        Ok(())
    }

    async fn stop_handling_requests(&self) -> Result<()> {
        *self.delegate.write().await = None;
        Ok(())
    }
}

/// Copy the DAG under `root` from one block store into another.
pub async fn copy_dag(
    source: &dyn Blockstore,
    target: &dyn Blockstore,
    root: &Cid,
) -> Result<()> {
    let root_block = source
        .get(root)
        .await
        .map_err(|e| StorageMarketError::Data(e.to_string()))?
        .ok_or_else(|| StorageMarketError::Data(format!("missing block {}", root)))?;
    if root.codec == Codec::Node {
        let node =
            DagNode::decode(&root_block).map_err(|e| StorageMarketError::Data(e.to_string()))?;
        for link in &node.links {
            let leaf = source
                .get(&link.cid)
                .await
                .map_err(|e| StorageMarketError::Data(e.to_string()))?
                .ok_or_else(|| StorageMarketError::Data(format!("missing block {}", link.cid)))?;
            target
                .put(link.cid, leaf)
                .await
                .map_err(|e| StorageMarketError::Data(e.to_string()))?;
        }
    }
    target
        .put(*root, root_block)
        .await
        .map_err(|e| StorageMarketError::Data(e.to_string()))
}

/// Data-transfer stub: records push requests; the test moves the payload
/// and reports completion when it chooses to, keeping ordering
/// deterministic.
pub struct TestDataTransfer {
    fail_with: Option<String>,
    requests: Mutex<Vec<(PeerId, TransferVoucher, Cid)>>,
}

impl TestDataTransfer {
    pub fn new() -> Self {
        Self {
            fail_with: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<(PeerId, TransferVoucher, Cid)> {
        self.requests.lock().await.clone()
    }
}

impl Default for TestDataTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataTransfer for TestDataTransfer {
    async fn open_push_channel(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        _selector: Selector,
    ) -> Result<()> {
        if let Some(message) = &self.fail_with {
            return Err(StorageMarketError::Stream(message.clone()));
        }
        self.requests.lock().await.push((to, voucher, base_cid));
        Ok(())
    }
}
