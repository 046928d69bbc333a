//! In-memory retrieval network: channel-backed query and deal streams.

use crate::error::{Result, RetrievalError};
use crate::network::{
    RetrievalDealStream, RetrievalNetwork, RetrievalQueryStream, RetrievalReceiver,
};
use crate::types::{DealPayment, DealProposal, DealResponse, Query, QueryResponse};
use async_trait::async_trait;
use market_types::{decode_frame, encode_frame, PeerId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

type FrameSender = mpsc::UnboundedSender<Vec<u8>>;
type FrameReceiver = mpsc::UnboundedReceiver<Vec<u8>>;

async fn send_frame<T: Serialize>(
    slot: &Mutex<Option<FrameSender>>,
    message: &T,
) -> Result<()> {
    let frame = encode_frame(message).map_err(|e| RetrievalError::Codec(e.to_string()))?;
    match slot.lock().await.as_ref() {
        Some(tx) => tx
            .send(frame)
            .map_err(|_| RetrievalError::Stream("stream closed".to_string())),
        None => Err(RetrievalError::Stream(
            "not the writing end of this stream".to_string(),
        )),
    }
}

async fn receive_frame<T: DeserializeOwned>(
    slot: &Mutex<Option<FrameReceiver>>,
) -> Result<T> {
    let frame = {
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(rx) => rx
                .recv()
                .await
                .ok_or_else(|| RetrievalError::Stream("stream closed".to_string()))?,
            None => {
                return Err(RetrievalError::Stream(
                    "not the reading end of this stream".to_string(),
                ))
            }
        }
    };
    decode_frame(&frame).map_err(|e| RetrievalError::Codec(e.to_string()))
}

/// One end of an in-memory query stream.
pub struct ChannelQueryStream {
    query_tx: Mutex<Option<FrameSender>>,
    query_rx: Mutex<Option<FrameReceiver>>,
    response_tx: Mutex<Option<FrameSender>>,
    response_rx: Mutex<Option<FrameReceiver>>,
}

/// Paired (client half, provider half) of an in-memory query stream.
pub fn query_stream_pair() -> (Arc<ChannelQueryStream>, Arc<ChannelQueryStream>) {
    let (query_tx, query_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let client = Arc::new(ChannelQueryStream {
        query_tx: Mutex::new(Some(query_tx)),
        query_rx: Mutex::new(None),
        response_tx: Mutex::new(None),
        response_rx: Mutex::new(Some(response_rx)),
    });
    let provider = Arc::new(ChannelQueryStream {
        query_tx: Mutex::new(None),
        query_rx: Mutex::new(Some(query_rx)),
        response_tx: Mutex::new(Some(response_tx)),
        response_rx: Mutex::new(None),
    });
    (client, provider)
}

#[async_trait]
impl RetrievalQueryStream for ChannelQueryStream {
    async fn read_query(&self) -> Result<Query> {
        receive_frame(&self.query_rx).await
    }

    async fn write_query(&self, query: Query) -> Result<()> {
        send_frame(&self.query_tx, &query).await
    }

    async fn read_query_response(&self) -> Result<QueryResponse> {
        receive_frame(&self.response_rx).await
    }

    async fn write_query_response(&self, response: QueryResponse) -> Result<()> {
        send_frame(&self.response_tx, &response).await
    }

    async fn close(&self) -> Result<()> {
        *self.query_tx.lock().await = None;
        *self.query_rx.lock().await = None;
        *self.response_tx.lock().await = None;
        *self.response_rx.lock().await = None;
        Ok(())
    }
}

/// One end of an in-memory deal stream. The client-to-provider channel
/// carries the proposal followed by payments; responses flow back the
/// other way.
pub struct ChannelRetrievalDealStream {
    remote: PeerId,
    outbound_tx: Mutex<Option<FrameSender>>,
    outbound_rx: Mutex<Option<FrameReceiver>>,
    response_tx: Mutex<Option<FrameSender>>,
    response_rx: Mutex<Option<FrameReceiver>>,
}

/// Paired (client half, provider half) of an in-memory deal stream.
pub fn retrieval_deal_stream_pair(
    client_peer: PeerId,
    provider_peer: PeerId,
) -> (
    Arc<ChannelRetrievalDealStream>,
    Arc<ChannelRetrievalDealStream>,
) {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();
    let client = Arc::new(ChannelRetrievalDealStream {
        remote: provider_peer,
        outbound_tx: Mutex::new(Some(outbound_tx)),
        outbound_rx: Mutex::new(None),
        response_tx: Mutex::new(None),
        response_rx: Mutex::new(Some(response_rx)),
    });
    let provider = Arc::new(ChannelRetrievalDealStream {
        remote: client_peer,
        outbound_tx: Mutex::new(None),
        outbound_rx: Mutex::new(Some(outbound_rx)),
        response_tx: Mutex::new(Some(response_tx)),
        response_rx: Mutex::new(None),
    });
    (client, provider)
}

#[async_trait]
impl RetrievalDealStream for ChannelRetrievalDealStream {
    async fn read_deal_proposal(&self) -> Result<DealProposal> {
        receive_frame(&self.outbound_rx).await
    }

    async fn write_deal_proposal(&self, proposal: DealProposal) -> Result<()> {
        send_frame(&self.outbound_tx, &proposal).await
    }

    async fn read_deal_response(&self) -> Result<DealResponse> {
        receive_frame(&self.response_rx).await
    }

    async fn write_deal_response(&self, response: DealResponse) -> Result<()> {
        send_frame(&self.response_tx, &response).await
    }

    async fn read_deal_payment(&self) -> Result<DealPayment> {
        receive_frame(&self.outbound_rx).await
    }

    async fn write_deal_payment(&self, payment: DealPayment) -> Result<()> {
        send_frame(&self.outbound_tx, &payment).await
    }

    fn receiver(&self) -> PeerId {
        self.remote
    }

    async fn close(&self) -> Result<()> {
        *self.outbound_tx.lock().await = None;
        *self.outbound_rx.lock().await = None;
        *self.response_tx.lock().await = None;
        *self.response_rx.lock().await = None;
        Ok(())
    }
}

/// In-memory retrieval network: streams are channel pairs, the provider's
/// receiver runs in a spawned task per stream. With no delegate bound,
/// stream opening fails like an unsupported protocol.
pub struct InMemoryRetrievalNetwork {
    local_peer: PeerId,
    delegate: RwLock<Option<Arc<dyn RetrievalReceiver>>>,
}

impl InMemoryRetrievalNetwork {
    pub fn new(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            delegate: RwLock::new(None),
        }
    }

    async fn delegate(&self) -> Result<Arc<dyn RetrievalReceiver>> {
        self.delegate
            .read()
            .await
            .clone()
            .ok_or_else(|| RetrievalError::Network("protocol not supported".to_string()))
    }
}

#[async_trait]
impl RetrievalNetwork for InMemoryRetrievalNetwork {
    async fn new_query_stream(&self, _peer: PeerId) -> Result<Arc<dyn RetrievalQueryStream>> {
        let delegate = self.delegate().await?;
        let (client_half, provider_half) = query_stream_pair();
        tokio::spawn(async move {
            delegate.handle_query_stream(provider_half).await;
        });
        Ok(client_half)
    }

    async fn new_deal_stream(&self, peer: PeerId) -> Result<Arc<dyn RetrievalDealStream>> {
        let delegate = self.delegate().await?;
        let (client_half, provider_half) = retrieval_deal_stream_pair(self.local_peer, peer);
        tokio::spawn(async move {
            delegate.handle_deal_stream(provider_half).await;
        });
        Ok(client_half)
    }

    async fn set_delegate(&self, receiver: Arc<dyn RetrievalReceiver>) -> Result<()> {
        *self.delegate.write().await = Some(receiver);
        Ok(())
    }

    async fn stop_handling_requests(&self) -> Result<()> {
        *self.delegate.write().await = None;
        Ok(())
    }
}
