//! Entry functions of the provider-side retrieval deal machine.

use crate::provider::events::ProviderEvent;
use crate::provider::{ProviderDealFsm, RetrievalProviderEnvironment};
use crate::types::{DealResponse, DealStatus, ProviderDealState};
use market_fsm::Context;
use market_types::TokenAmount;
use tracing::{debug, warn};

fn trigger(ctx: &Context<ProviderDealFsm>, event: ProviderEvent) {
    if let Err(e) = ctx.trigger(event) {
        debug!(deal = %ctx.id(), error = %e, "dropping event during shutdown");
    }
}

/// Decide whether to serve the proposal at all.
pub async fn decide_on_deal(
    env: &dyn RetrievalProviderEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDealState,
) {
    if let Err(e) = env.check_deal_params(&deal.proposal.params).await {
        trigger(ctx, ProviderEvent::DealRejected(e.to_string()));
        return;
    }
    match env
        .get_piece_size(&deal.proposal.payload_cid, deal.proposal.params.piece_cid)
        .await
    {
        Ok(_size) => trigger(ctx, ProviderEvent::DealAccepted),
        Err(crate::error::RetrievalError::NotFound) => trigger(
            ctx,
            ProviderEvent::DealNotFound("payload CID not found".to_string()),
        ),
        Err(e) => trigger(ctx, ProviderEvent::DealRejected(e.to_string())),
    }
}

/// Tell the client the deal is on.
pub async fn send_acceptance(
    env: &dyn RetrievalProviderEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDealState,
) {
    let response = DealResponse {
        status: DealStatus::Accepted,
        id: deal.proposal.id,
        payment_owed: TokenAmount::ZERO,
        message: String::new(),
        blocks: Vec::new(),
    };
    match env.write_deal_response(deal.identifier(), response).await {
        Ok(()) => trigger(ctx, ProviderEvent::AcceptanceSent),
        Err(e) => trigger(ctx, ProviderEvent::SendResponseFailed(e.to_string())),
    }
}

/// Stream blocks until the next payment checkpoint or the end of the
/// traversal, then ship them with the matching status.
pub async fn send_blocks(
    env: &dyn RetrievalProviderEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDealState,
) {
    let threshold = deal.bytes_paid_for + deal.current_interval;
    let mut total_sent = deal.total_sent;
    let mut blocks = Vec::new();
    let mut traversal_done = false;

    while total_sent < threshold {
        match env.next_block(deal.identifier()).await {
            Ok(Some(block)) => {
                total_sent += block.data.len() as u64;
                blocks.push(block);
            }
            Ok(None) => {
                traversal_done = true;
                break;
            }
            Err(e) => {
                trigger(ctx, ProviderEvent::BlockReadFailed(e.to_string()));
                return;
            }
        }
    }

    let owed = match deal
        .proposal
        .params
        .price_per_byte
        .checked_mul_u64(total_sent - deal.bytes_paid_for)
    {
        Some(owed) => owed,
        None => {
            trigger(
                ctx,
                ProviderEvent::BlockReadFailed(
                    "arithmetic overflow computing payment owed".to_string(),
                ),
            );
            return;
        }
    };

    let (status, event) = if !traversal_done {
        (
            DealStatus::FundsNeeded,
            ProviderEvent::PaymentRequested {
                total_sent,
                payment_owed: owed,
            },
        )
    } else if !owed.is_zero() {
        (
            DealStatus::FundsNeededLastPayment,
            ProviderEvent::LastPaymentRequested {
                total_sent,
                payment_owed: owed,
            },
        )
    } else {
        (DealStatus::Completed, ProviderEvent::Completed { total_sent })
    };

    let response = DealResponse {
        status,
        id: deal.proposal.id,
        payment_owed: owed,
        message: String::new(),
        blocks,
    };
    match env.write_deal_response(deal.identifier(), response).await {
        Ok(()) => trigger(ctx, event),
        Err(e) => trigger(ctx, ProviderEvent::SendResponseFailed(e.to_string())),
    }
}

/// Block on the client's voucher for the owed amount.
pub async fn await_payment(
    env: &dyn RetrievalProviderEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDealState,
) {
    let payment = match env.read_deal_payment(deal.identifier()).await {
        Ok(payment) => payment,
        Err(e) => {
            trigger(ctx, ProviderEvent::ReadPaymentFailed(e.to_string()));
            return;
        }
    };
    let received = match env
        .node()
        .save_payment_voucher(
            payment.payment_channel,
            &payment.voucher,
            &[],
            deal.payment_owed,
        )
        .await
    {
        Ok(received) => received,
        Err(e) => {
            trigger(ctx, ProviderEvent::SaveVoucherFailed(e.to_string()));
            return;
        }
    };
    if received < deal.payment_owed {
        trigger(
            ctx,
            ProviderEvent::InsufficientPayment {
                received,
                expected: deal.payment_owed,
            },
        );
        return;
    }
    trigger(ctx, ProviderEvent::PaymentReceived { amount: received });
}

/// Final payment landed: confirm completion to the client.
pub async fn finalize_deal(
    env: &dyn RetrievalProviderEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDealState,
) {
    let response = DealResponse {
        status: DealStatus::Completed,
        id: deal.proposal.id,
        payment_owed: TokenAmount::ZERO,
        message: String::new(),
        blocks: Vec::new(),
    };
    match env.write_deal_response(deal.identifier(), response).await {
        Ok(()) => trigger(
            ctx,
            ProviderEvent::Completed {
                total_sent: deal.total_sent,
            },
        ),
        Err(e) => trigger(ctx, ProviderEvent::SendResponseFailed(e.to_string())),
    }
}

/// Terminal success: release stream and reader.
pub async fn complete_deal(
    env: &dyn RetrievalProviderEnvironment,
    _ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDealState,
) {
    if let Err(e) = env.close_stream(deal.identifier()).await {
        warn!(deal = %deal.identifier(), error = %e, "failed to close completed deal stream");
    }
}

/// Report the failure to the client, then finalize.
pub async fn fail_deal(
    env: &dyn RetrievalProviderEnvironment,
    ctx: &Context<ProviderDealFsm>,
    deal: &ProviderDealState,
) {
    let response = DealResponse {
        status: deal.failure_status,
        id: deal.proposal.id,
        payment_owed: TokenAmount::ZERO,
        message: deal.message.clone(),
        blocks: Vec::new(),
    };
    if let Err(e) = env.write_deal_response(deal.identifier(), response).await {
        warn!(deal = %deal.identifier(), error = %e, "failed to send failure response");
    }
    if let Err(e) = env.close_stream(deal.identifier()).await {
        warn!(deal = %deal.identifier(), error = %e, "failed to close failed deal stream");
    }
    trigger(ctx, ProviderEvent::Failed);
}
