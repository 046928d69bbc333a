//! Provider query handling and deal-parameter checks.

use market_fsm::MemoryRecordStore;
use market_piecestore::{
    CidInfo, DealInfo, MemoryBlockstore, MemoryPieceStore, PieceBlockLocation, PieceInfo,
};
use market_retrieval::testnodes::TestRetrievalProviderNode;
use market_retrieval::testutil::{query_stream_pair, InMemoryRetrievalNetwork};
use market_retrieval::{
    Params, Query, QueryItemStatus, QueryResponseStatus, RetrievalError, RetrievalProvider,
    RetrievalProviderConfig, RetrievalQueryStream, RetrievalReceiver,
};
use market_types::{Address, Cid, PeerId, TokenAmount};
use std::sync::Arc;

const PIECE_SIZE: u64 = 1024;

struct QueryFixture {
    provider: Arc<RetrievalProvider>,
    worker_address: Address,
    known_payload: Cid,
    known_piece: Cid,
    missing_payload: Cid,
    failing_payload: Cid,
}

async fn setup() -> QueryFixture {
    let worker_address = Address::dummy(50);
    let known_payload = Cid::dummy(1);
    let known_piece = Cid::dummy(2);
    let missing_payload = Cid::dummy(3);
    let failing_payload = Cid::dummy(4);

    let piece_store = Arc::new(MemoryPieceStore::new());
    piece_store
        .add_cid_info(CidInfo {
            payload_cid: known_payload,
            piece_block_locations: vec![PieceBlockLocation {
                piece_cid: known_piece,
                sector_id: 1,
                offset: 0,
                length: PIECE_SIZE,
            }],
        })
        .await;
    piece_store
        .add_piece_info(PieceInfo {
            piece_cid: known_piece,
            deals: vec![DealInfo {
                deal_id: 9,
                sector_id: 1,
                offset: 0,
                length: PIECE_SIZE,
            }],
        })
        .await;
    piece_store
        .fail_cid_info(failing_payload, "GetCIDInfo failed")
        .await;

    let provider = Arc::new(RetrievalProvider::new(
        Address::dummy(51),
        Arc::new(TestRetrievalProviderNode::new(worker_address)),
        Arc::new(InMemoryRetrievalNetwork::new(PeerId::dummy(2))),
        piece_store,
        Arc::new(MemoryBlockstore::new()),
        RetrievalProviderConfig::default(),
        Arc::new(MemoryRecordStore::new()),
    ));

    QueryFixture {
        provider,
        worker_address,
        known_payload,
        known_piece,
        missing_payload,
        failing_payload,
    }
}

async fn run_query(fixture: &QueryFixture, query: Query) -> market_retrieval::QueryResponse {
    let (client_half, provider_half) = query_stream_pair();
    let provider = fixture.provider.clone();
    tokio::spawn(async move {
        provider.handle_query_stream(provider_half).await;
    });
    client_half.write_query(query).await.unwrap();
    client_half.read_query_response().await.unwrap()
}

#[tokio::test]
async fn test_query_known_payload_is_available() {
    let fixture = setup().await;
    let response = run_query(
        &fixture,
        Query {
            payload_cid: fixture.known_payload,
            piece_cid: None,
        },
    )
    .await;

    assert_eq!(response.status, QueryResponseStatus::Available);
    assert_eq!(response.piece_cid_found, QueryItemStatus::Available);
    assert_eq!(response.size, PIECE_SIZE);
    assert_eq!(response.payment_address, fixture.worker_address);
    assert_eq!(
        response.min_price_per_byte,
        RetrievalProviderConfig::default().price_per_byte
    );
    assert_eq!(
        response.max_payment_interval,
        RetrievalProviderConfig::default().payment_interval
    );
    assert_eq!(response.message, "");
}

#[tokio::test]
async fn test_query_unknown_payload_is_unavailable() {
    let fixture = setup().await;
    let response = run_query(
        &fixture,
        Query {
            payload_cid: fixture.missing_payload,
            piece_cid: None,
        },
    )
    .await;

    assert_eq!(response.status, QueryResponseStatus::Unavailable);
    assert_eq!(response.piece_cid_found, QueryItemStatus::Unavailable);
    assert_eq!(response.size, 0);
}

#[tokio::test]
async fn test_query_lookup_error_is_reported() {
    let fixture = setup().await;
    let response = run_query(
        &fixture,
        Query {
            payload_cid: fixture.failing_payload,
            piece_cid: None,
        },
    )
    .await;

    assert_eq!(response.status, QueryResponseStatus::Error);
    assert_eq!(response.message, "get cid info: GetCIDInfo failed");
}

#[tokio::test]
async fn test_query_with_matching_piece_constraint() {
    let fixture = setup().await;
    let response = run_query(
        &fixture,
        Query {
            payload_cid: fixture.known_payload,
            piece_cid: Some(fixture.known_piece),
        },
    )
    .await;

    assert_eq!(response.status, QueryResponseStatus::Available);
    assert_eq!(response.size, PIECE_SIZE);
}

#[tokio::test]
async fn test_query_with_unmatched_piece_constraint() {
    let fixture = setup().await;
    let response = run_query(
        &fixture,
        Query {
            payload_cid: fixture.known_payload,
            piece_cid: Some(Cid::dummy(77)),
        },
    )
    .await;

    assert_eq!(response.status, QueryResponseStatus::Unavailable);
    assert_eq!(response.piece_cid_found, QueryItemStatus::Unavailable);
}

#[tokio::test]
async fn test_check_deal_params_limits() {
    let fixture = setup().await;
    fixture
        .provider
        .set_price_per_byte(TokenAmount::from_base_units(1_000))
        .await;
    fixture.provider.set_payment_interval(10_000, 1_000).await;

    let ok = Params::new_v0(TokenAmount::from_base_units(1_000), 10_000, 1_000);
    assert!(fixture.provider.check_deal_params(&ok).await.is_ok());

    let cheap = Params::new_v0(TokenAmount::from_base_units(999), 10_000, 1_000);
    let err = fixture.provider.check_deal_params(&cheap).await.unwrap_err();
    assert_eq!(err.to_string(), "Price per byte too low");
    assert!(matches!(err, RetrievalError::Params(_)));

    let wide = Params::new_v0(TokenAmount::from_base_units(1_000), 10_001, 1_000);
    let err = fixture.provider.check_deal_params(&wide).await.unwrap_err();
    assert_eq!(err.to_string(), "Payment interval too large");

    let steep = Params::new_v0(TokenAmount::from_base_units(1_000), 10_000, 1_001);
    let err = fixture.provider.check_deal_params(&steep).await.unwrap_err();
    assert_eq!(err.to_string(), "Payment interval increase too large");
}
