//! Entry functions of the client-side storage deal machine.
//!
//! Each runs once when its state is entered, performs the state's external
//! work through the environment, and finishes by triggering exactly one
//! event (plus a cleanup path). Failures never escape: they become events.

use crate::client::events::ClientEvent;
use crate::client::ClientDealFsm;
use crate::client::ClientDealEnvironment;
use crate::datatransfer::TransferVoucher;
use crate::types::{ClientDeal, Proposal, StorageDealStatus, TransferType};
use market_fsm::Context;
use market_types::Selector;
use tracing::{debug, warn};

fn trigger(ctx: &Context<ClientDealFsm>, event: ClientEvent) {
    if let Err(e) = ctx.trigger(event) {
        debug!(deal = %ctx.id(), error = %e, "dropping event during shutdown");
    }
}

pub async fn ensure_client_funds(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    let node = env.node();
    let token = match node.get_chain_head().await {
        Ok(token) => token,
        Err(e) => {
            trigger(ctx, ClientEvent::EnsureFundsFailed(e.to_string()));
            return;
        }
    };
    let required = match deal.proposal.proposal.client_funds_required() {
        Some(amount) => amount,
        None => {
            trigger(
                ctx,
                ClientEvent::EnsureFundsFailed(
                    "arithmetic overflow computing required funds".to_string(),
                ),
            );
            return;
        }
    };
    match node
        .ensure_funds(deal.proposal.proposal.client, required, &token)
        .await
    {
        Ok(Some(message_cid)) => trigger(ctx, ClientEvent::FundingInitiated(message_cid)),
        Ok(None) => trigger(ctx, ClientEvent::FundsEnsured),
        Err(e) => trigger(ctx, ClientEvent::EnsureFundsFailed(e.to_string())),
    }
}

pub async fn wait_for_funding(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    let add_funds_cid = match deal.add_funds_cid {
        Some(message_cid) => message_cid,
        None => {
            trigger(
                ctx,
                ClientEvent::EnsureFundsFailed("no funding message recorded".to_string()),
            );
            return;
        }
    };
    match env.node().wait_for_message(&add_funds_cid).await {
        Ok(code) if code.is_ok() => trigger(ctx, ClientEvent::FundsEnsured),
        Ok(code) => trigger(
            ctx,
            ClientEvent::EnsureFundsFailed(format!("AddFunds exit code: {}", code)),
        ),
        Err(e) => trigger(ctx, ClientEvent::EnsureFundsFailed(e.to_string())),
    }
}

pub async fn propose_deal(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    let proposal = Proposal {
        deal_proposal: deal.proposal.clone(),
        piece: deal.data_ref,
    };
    if let Err(e) = env
        .write_deal_proposal(deal.miner, deal.proposal_cid, proposal)
        .await
    {
        trigger(ctx, ClientEvent::WriteProposalFailed(e.to_string()));
        return;
    }
    // Protect the connection for the life of the deal; a failed tag is not
    // worth failing the deal over.
    if let Err(e) = env.tag_connection(&deal.proposal_cid).await {
        warn!(deal = %deal.proposal_cid, error = %e, "failed to tag deal connection");
    }
    trigger(ctx, ClientEvent::DealProposed);
}

pub async fn waiting_for_data_request(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    let signed = match env.read_deal_response(&deal.proposal_cid).await {
        Ok(signed) => signed,
        Err(e) => {
            trigger(ctx, ClientEvent::ReadResponseFailed(e.to_string()));
            return;
        }
    };
    if signed.response.state != StorageDealStatus::WaitingForData {
        trigger(
            ctx,
            ClientEvent::UnexpectedDealState(signed.response.state.code()),
        );
        return;
    }
    match deal.data_ref.transfer_type {
        TransferType::Manual => trigger(ctx, ClientEvent::ManualTransferInitiated),
        TransferType::Graphsync => {
            let voucher = TransferVoucher {
                proposal_cid: deal.proposal_cid,
            };
            match env
                .start_data_transfer(deal.miner, voucher, deal.data_ref.root, Selector::All)
                .await
            {
                Ok(()) => trigger(ctx, ClientEvent::DataTransferInitiated),
                Err(e) => trigger(
                    ctx,
                    ClientEvent::DataTransferFailed(format!(
                        "failed to open push data channel: {}",
                        e
                    )),
                ),
            }
        }
    }
}

pub async fn verify_deal_response(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    let signed = match env.read_deal_response(&deal.proposal_cid).await {
        Ok(signed) => signed,
        Err(e) => {
            trigger(ctx, ClientEvent::ReadResponseFailed(e.to_string()));
            return;
        }
    };
    let verified = env
        .node()
        .verify_signature(
            &signed.signature,
            &deal.miner_worker,
            &signed.response.signing_bytes(),
        )
        .await;
    if !verified {
        trigger(ctx, ClientEvent::ResponseVerificationFailed);
        return;
    }
    if signed.response.proposal != deal.proposal_cid {
        trigger(
            ctx,
            ClientEvent::ResponseDealDidNotMatch {
                received: signed.response.proposal,
                expected: deal.proposal_cid,
            },
        );
        return;
    }
    if let Err(e) = env.close_stream(&deal.proposal_cid).await {
        trigger(ctx, ClientEvent::StreamCloseError(e.to_string()));
        return;
    }
    if signed.response.state == StorageDealStatus::ProposalAccepted {
        trigger(
            ctx,
            ClientEvent::DealAccepted {
                publish_message: signed.response.publish_message,
            },
        );
    } else {
        trigger(
            ctx,
            ClientEvent::DealRejected {
                state: signed.response.state.code(),
                message: signed.response.message.clone(),
            },
        );
    }
}

pub async fn validate_deal_published(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    match env.node().validate_published_deal(deal).await {
        Ok(deal_id) => trigger(ctx, ClientEvent::DealPublished(deal_id)),
        Err(e) => trigger(ctx, ClientEvent::DealPublishError(e.to_string())),
    }
}

pub async fn verify_deal_activated(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    let deal_id = match deal.deal_id {
        Some(deal_id) => deal_id,
        None => {
            trigger(
                ctx,
                ClientEvent::DealActivationFailed("no deal id recorded".to_string()),
            );
            return;
        }
    };
    match env
        .node()
        .on_deal_sector_committed(&deal.proposal.proposal.provider, deal_id)
        .await
    {
        Ok(()) => trigger(ctx, ClientEvent::DealActivated),
        Err(e) => trigger(ctx, ClientEvent::DealActivationFailed(e.to_string())),
    }
}

/// Mandatory cleanup on the way to Error: close the stream if this deal
/// still owns one.
pub async fn fail_deal(
    env: &dyn ClientDealEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDeal,
) {
    if !deal.connection_closed {
        if let Err(e) = env.close_stream(&deal.proposal_cid).await {
            trigger(ctx, ClientEvent::StreamCloseError(e.to_string()));
            return;
        }
    }
    trigger(ctx, ClientEvent::Failed);
}
