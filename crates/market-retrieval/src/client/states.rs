//! Entry functions of the client-side retrieval deal machine.

use crate::client::events::ClientEvent;
use crate::client::{ClientDealFsm, RetrievalClientEnvironment};
use crate::types::{ClientDealState, DealPayment, DealStatus};
use market_fsm::Context;
use market_types::TokenAmount;
use tracing::{debug, warn};

fn trigger(ctx: &Context<ClientDealFsm>, event: ClientEvent) {
    if let Err(e) = ctx.trigger(event) {
        debug!(deal = %ctx.id(), error = %e, "dropping event during shutdown");
    }
}

/// Open the deal by sending the proposal.
pub async fn propose_deal(
    env: &dyn RetrievalClientEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    match env
        .write_deal_proposal(deal.id(), deal.proposal.clone())
        .await
    {
        Ok(()) => trigger(ctx, ClientEvent::DealProposed),
        Err(e) => trigger(ctx, ClientEvent::WriteDealProposalErrored(e.to_string())),
    }
}

/// Wait for the provider's verdict on the proposal.
pub async fn await_acceptance(
    env: &dyn RetrievalClientEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    let response = match env.read_deal_response(deal.id()).await {
        Ok(response) => response,
        Err(e) => {
            trigger(ctx, ClientEvent::ReadDealResponseErrored(e.to_string()));
            return;
        }
    };
    match response.status {
        DealStatus::Accepted => trigger(ctx, ClientEvent::DealAccepted),
        DealStatus::Rejected => trigger(ctx, ClientEvent::DealRejected(response.message)),
        DealStatus::DealNotFound => trigger(ctx, ClientEvent::DealNotFound(response.message)),
        DealStatus::Errored => trigger(ctx, ClientEvent::ProviderErrored(response.message)),
        other => trigger(ctx, ClientEvent::UnknownResponseReceived(other.code())),
    }
}

/// Fund the retrieval: payment channel plus a fresh lane.
pub async fn setup_payment_channel(
    env: &dyn RetrievalClientEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    let node = env.node();
    let payment_channel = match node
        .get_or_create_payment_channel(deal.client_wallet, deal.miner_wallet, deal.total_funds)
        .await
    {
        Ok(payment_channel) => payment_channel,
        Err(e) => {
            trigger(ctx, ClientEvent::PaymentChannelErrored(e.to_string()));
            return;
        }
    };
    match node.allocate_lane(payment_channel).await {
        Ok(lane) => trigger(
            ctx,
            ClientEvent::PaymentChannelReady {
                payment_channel,
                lane,
            },
        ),
        Err(e) => trigger(ctx, ClientEvent::PaymentChannelErrored(e.to_string())),
    }
}

/// The block-receive loop: one provider response per entry, verified and
/// counted, with payment checkpoints pausing reception.
pub async fn receive_blocks(
    env: &dyn RetrievalClientEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    let response = match env.read_deal_response(deal.id()).await {
        Ok(response) => response,
        Err(e) => {
            trigger(ctx, ClientEvent::ReadDealResponseErrored(e.to_string()));
            return;
        }
    };
    let bytes_added = match env.ingest_blocks(deal.id(), &response.blocks).await {
        Ok(bytes_added) => bytes_added,
        Err(e) => {
            trigger(ctx, ClientEvent::BlockVerificationFailed(e.to_string()));
            return;
        }
    };
    match response.status {
        DealStatus::FundsNeeded => trigger(
            ctx,
            ClientEvent::PaymentRequested {
                bytes_added,
                payment_owed: response.payment_owed,
            },
        ),
        DealStatus::FundsNeededLastPayment => trigger(
            ctx,
            ClientEvent::LastPaymentRequested {
                bytes_added,
                payment_owed: response.payment_owed,
            },
        ),
        DealStatus::Completed => trigger(ctx, ClientEvent::Completed { bytes_added }),
        DealStatus::Errored => trigger(ctx, ClientEvent::ProviderErrored(response.message)),
        other => trigger(ctx, ClientEvent::UnknownResponseReceived(other.code())),
    }
}

/// Pay for everything received so far, within the deal budget.
pub async fn send_funds(
    env: &dyn RetrievalClientEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    let payment_info = match deal.payment_info {
        Some(payment_info) => payment_info,
        None => {
            trigger(
                ctx,
                ClientEvent::CreateVoucherFailed("no payment channel allocated".to_string()),
            );
            return;
        }
    };
    let total_owed = match deal
        .proposal
        .params
        .price_per_byte
        .checked_mul_u64(deal.total_received)
    {
        Some(total_owed) => total_owed,
        None => {
            trigger(
                ctx,
                ClientEvent::CreateVoucherFailed(
                    "arithmetic overflow computing payment".to_string(),
                ),
            );
            return;
        }
    };
    // Never authorize spending past the budget the retrieval was opened
    // with.
    if total_owed > deal.total_funds {
        trigger(
            ctx,
            ClientEvent::FundsExpended {
                required: total_owed,
                available: deal.total_funds,
            },
        );
        return;
    }
    let owed = total_owed.saturating_sub(deal.paid_so_far);
    if owed.is_zero() {
        trigger(
            ctx,
            ClientEvent::PaymentSent {
                amount: TokenAmount::ZERO,
            },
        );
        return;
    }

    let voucher = match env
        .node()
        .create_payment_voucher(payment_info.payment_channel, owed, payment_info.lane)
        .await
    {
        Ok(voucher) => voucher,
        Err(e) => {
            trigger(ctx, ClientEvent::CreateVoucherFailed(e.to_string()));
            return;
        }
    };
    let payment = DealPayment {
        id: deal.id(),
        payment_channel: payment_info.payment_channel,
        voucher,
    };
    match env.write_deal_payment(deal.id(), payment).await {
        Ok(()) => trigger(ctx, ClientEvent::PaymentSent { amount: owed }),
        Err(e) => trigger(ctx, ClientEvent::WriteDealPaymentErrored(e.to_string())),
    }
}

/// Wait for the provider's completion notice after the last payment.
pub async fn finalize_deal(
    env: &dyn RetrievalClientEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    let response = match env.read_deal_response(deal.id()).await {
        Ok(response) => response,
        Err(e) => {
            trigger(ctx, ClientEvent::ReadDealResponseErrored(e.to_string()));
            return;
        }
    };
    let bytes_added = match env.ingest_blocks(deal.id(), &response.blocks).await {
        Ok(bytes_added) => bytes_added,
        Err(e) => {
            trigger(ctx, ClientEvent::BlockVerificationFailed(e.to_string()));
            return;
        }
    };
    match response.status {
        DealStatus::Completed => trigger(ctx, ClientEvent::Completed { bytes_added }),
        DealStatus::Errored => trigger(ctx, ClientEvent::ProviderErrored(response.message)),
        other => trigger(ctx, ClientEvent::UnknownResponseReceived(other.code())),
    }
}

/// Terminal success: release the stream.
pub async fn complete_deal(
    env: &dyn RetrievalClientEnvironment,
    _ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    if let Err(e) = env.close_stream(deal.id()).await {
        warn!(deal = %deal.id(), error = %e, "failed to close completed deal stream");
    }
}

/// Mandatory cleanup on the way to Errored.
pub async fn fail_deal(
    env: &dyn RetrievalClientEnvironment,
    ctx: &Context<ClientDealFsm>,
    deal: &ClientDealState,
) {
    if let Err(e) = env.close_stream(deal.id()).await {
        warn!(deal = %deal.id(), error = %e, "failed to close failed deal stream");
    }
    trigger(ctx, ClientEvent::Failed);
}
