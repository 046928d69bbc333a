//! Entry functions of the provider-side storage deal machine.

use crate::provider::events::ProviderEvent;
use crate::provider::{ProviderDealEnvironment, ProviderDealFsm};
use crate::types::{ProviderDeal, Response, StorageDealStatus};
use market_fsm::Context;
use tracing::{debug, warn};

fn trigger(ctx: &Context<ProviderDealFsm>, event: ProviderEvent) {
    if let Err(e) = ctx.trigger(event) {
        debug!(deal = %ctx.id(), error = %e, "dropping event during shutdown");
    }
}

pub async fn validate_proposal(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    let proposal = &deal.proposal.proposal;
    let config = env.config();

    let rejection = if proposal.provider != env.provider_address() {
        Some("incorrect provider for deal")
    } else if proposal.piece_size == 0 {
        Some("proposed piece is empty")
    } else if proposal.piece_size < config.min_piece_size {
        Some("piece size too small")
    } else if proposal.storage_price_per_epoch < config.min_storage_price_per_epoch {
        Some("storage price per epoch too low")
    } else if proposal.end_epoch <= proposal.start_epoch {
        Some("proposal duration is empty")
    } else {
        None
    };
    if let Some(reason) = rejection {
        trigger(ctx, ProviderEvent::ProposalRejected(reason.to_string()));
        return;
    }

    let verified = env
        .node()
        .verify_signature(
            &deal.proposal.client_signature,
            &proposal.client,
            &proposal.signing_bytes(),
        )
        .await;
    if !verified {
        trigger(
            ctx,
            ProviderEvent::ProposalRejected("could not verify client signature".to_string()),
        );
        return;
    }
    trigger(ctx, ProviderEvent::ProposalValidated);
}

pub async fn ensure_provider_funds(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    let node = env.node();
    let token = match node.get_chain_head().await {
        Ok(token) => token,
        Err(e) => {
            trigger(ctx, ProviderEvent::EnsureFundsFailed(e.to_string()));
            return;
        }
    };
    match node
        .ensure_funds(
            env.provider_address(),
            deal.proposal.proposal.provider_collateral,
            &token,
        )
        .await
    {
        Ok(Some(message_cid)) => trigger(ctx, ProviderEvent::FundingInitiated(message_cid)),
        Ok(None) => trigger(ctx, ProviderEvent::FundsEnsured),
        Err(e) => trigger(ctx, ProviderEvent::EnsureFundsFailed(e.to_string())),
    }
}

pub async fn wait_for_funding(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    let add_funds_cid = match deal.add_funds_cid {
        Some(message_cid) => message_cid,
        None => {
            trigger(
                ctx,
                ProviderEvent::EnsureFundsFailed("no funding message recorded".to_string()),
            );
            return;
        }
    };
    match env.node().wait_for_message(&add_funds_cid).await {
        Ok(code) if code.is_ok() => trigger(ctx, ProviderEvent::FundsEnsured),
        Ok(code) => trigger(
            ctx,
            ProviderEvent::EnsureFundsFailed(format!("AddFunds exit code: {}", code)),
        ),
        Err(e) => trigger(ctx, ProviderEvent::EnsureFundsFailed(e.to_string())),
    }
}

/// Tell the client we are ready for its payload.
pub async fn send_data_request(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    let response = Response {
        state: StorageDealStatus::WaitingForData,
        proposal: deal.proposal_cid,
        message: String::new(),
        publish_message: None,
    };
    match env.send_deal_response(&deal.proposal_cid, response).await {
        Ok(()) => trigger(ctx, ProviderEvent::DataRequested),
        Err(e) => trigger(ctx, ProviderEvent::SendResponseFailed(e.to_string())),
    }
}

pub async fn verify_data(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    match env
        .verify_data(&deal.proposal_cid, &deal.data_ref.root)
        .await
    {
        Ok(commitment) if commitment == deal.proposal.proposal.piece_cid => {
            trigger(ctx, ProviderEvent::DataVerified)
        }
        Ok(commitment) => trigger(
            ctx,
            ProviderEvent::DataVerificationFailed(format!(
                "proposed piece {} does not match received data {}",
                deal.proposal.proposal.piece_cid, commitment
            )),
        ),
        Err(e) => trigger(ctx, ProviderEvent::DataVerificationFailed(e.to_string())),
    }
}

pub async fn publish_deal(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    match env.node().publish_deal(deal).await {
        Ok(publish_cid) => trigger(ctx, ProviderEvent::DealPublishInitiated(publish_cid)),
        Err(e) => trigger(ctx, ProviderEvent::DealPublishError(e.to_string())),
    }
}

/// Wait for the publish message to land, then report acceptance to the
/// client and release the stream.
pub async fn wait_for_publish(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    let publish_cid = match deal.publish_cid {
        Some(publish_cid) => publish_cid,
        None => {
            trigger(
                ctx,
                ProviderEvent::DealPublishError("no publish message recorded".to_string()),
            );
            return;
        }
    };
    let deal_id = match env.node().wait_for_publish(&publish_cid).await {
        Ok(deal_id) => deal_id,
        Err(e) => {
            trigger(ctx, ProviderEvent::DealPublishError(e.to_string()));
            return;
        }
    };
    let response = Response {
        state: StorageDealStatus::ProposalAccepted,
        proposal: deal.proposal_cid,
        message: String::new(),
        publish_message: Some(publish_cid),
    };
    if let Err(e) = env.send_deal_response(&deal.proposal_cid, response).await {
        trigger(ctx, ProviderEvent::SendResponseFailed(e.to_string()));
        return;
    }
    if let Err(e) = env.close_stream(&deal.proposal_cid).await {
        trigger(ctx, ProviderEvent::StreamCloseError(e.to_string()));
        return;
    }
    trigger(ctx, ProviderEvent::DealPublished(deal_id));
}

pub async fn hand_off_deal(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    match env.node().on_deal_complete(deal).await {
        Ok(()) => trigger(ctx, ProviderEvent::DealHandedOff),
        Err(e) => trigger(ctx, ProviderEvent::DealHandoffFailed(e.to_string())),
    }
}

pub async fn verify_deal_activated(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    let deal_id = match deal.deal_id {
        Some(deal_id) => deal_id,
        None => {
            trigger(
                ctx,
                ProviderEvent::DealActivationFailed("no deal id recorded".to_string()),
            );
            return;
        }
    };
    match env
        .node()
        .on_deal_sector_committed(&env.provider_address(), deal_id)
        .await
    {
        Ok(()) => trigger(ctx, ProviderEvent::DealActivated),
        Err(e) => trigger(ctx, ProviderEvent::DealActivationFailed(e.to_string())),
    }
}

/// Report the failure to the client if the stream is still ours, then
/// finalize.
pub async fn fail_deal(
    env: &dyn ProviderDealEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDeal,
) {
    if !deal.connection_closed {
        let response = Response {
            state: StorageDealStatus::ProposalRejected,
            proposal: deal.proposal_cid,
            message: deal.message.clone(),
            publish_message: None,
        };
        if let Err(e) = env.send_deal_response(&deal.proposal_cid, response).await {
            warn!(deal = %deal.proposal_cid, error = %e, "failed to send rejection response");
        }
        if let Err(e) = env.close_stream(&deal.proposal_cid).await {
            trigger(ctx, ProviderEvent::StreamCloseError(e.to_string()));
            return;
        }
    }
    trigger(ctx, ProviderEvent::Failed);
}
