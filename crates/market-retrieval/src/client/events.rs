use crate::types::{ClientDealState, DealStatus};
use market_fsm::FsmError;
use market_types::{Address, TokenAmount};

/// Events of the client-side retrieval deal machine.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    DealProposed,
    WriteDealProposalErrored(String),
    DealAccepted,
    DealRejected(String),
    DealNotFound(String),
    UnknownResponseReceived(u64),
    ReadDealResponseErrored(String),
    PaymentChannelReady { payment_channel: Address, lane: u64 },
    PaymentChannelErrored(String),
    PaymentRequested { bytes_added: u64, payment_owed: TokenAmount },
    LastPaymentRequested { bytes_added: u64, payment_owed: TokenAmount },
    BlockVerificationFailed(String),
    ProviderErrored(String),
    FundsExpended { required: TokenAmount, available: TokenAmount },
    CreateVoucherFailed(String),
    WriteDealPaymentErrored(String),
    PaymentSent { amount: TokenAmount },
    Completed { bytes_added: u64 },
    Failed,
}

pub fn apply(deal: &mut ClientDealState, event: &ClientEvent) -> Result<(), FsmError> {
    use DealStatus as S;
    match event {
        ClientEvent::DealProposed if deal.status == S::New => {
            deal.status = S::AwaitingAcceptance;
        }
        ClientEvent::WriteDealProposalErrored(err) if deal.status == S::New => {
            deal.status = S::Errored;
            deal.message = format!("error writing deal proposal: {}", err);
        }
        ClientEvent::DealAccepted if deal.status == S::AwaitingAcceptance => {
            deal.status = S::Accepted;
        }
        ClientEvent::DealRejected(message) if deal.status == S::AwaitingAcceptance => {
            deal.status = S::Failing;
            deal.message = format!("deal rejected: {}", message);
        }
        ClientEvent::DealNotFound(message) if deal.status == S::AwaitingAcceptance => {
            deal.status = S::Failing;
            deal.message = format!("deal not found: {}", message);
        }
        ClientEvent::UnknownResponseReceived(code)
            if matches!(
                deal.status,
                S::AwaitingAcceptance | S::Ongoing | S::Finalizing
            ) =>
        {
            deal.status = S::Failing;
            deal.message = format!("unexpected deal response status: {}", code);
        }
        ClientEvent::ReadDealResponseErrored(err)
            if matches!(
                deal.status,
                S::AwaitingAcceptance | S::Ongoing | S::Finalizing
            ) =>
        {
            deal.status = S::Errored;
            deal.message = format!("error reading deal response: {}", err);
        }
        ClientEvent::PaymentChannelReady {
            payment_channel,
            lane,
        } if deal.status == S::Accepted => {
            deal.payment_info = Some(crate::types::PaymentInfo {
                payment_channel: *payment_channel,
                lane: *lane,
            });
            deal.status = S::Ongoing;
        }
        ClientEvent::PaymentChannelErrored(err) if deal.status == S::Accepted => {
            deal.status = S::Failing;
            deal.message = format!("error setting up payment channel: {}", err);
        }
        ClientEvent::PaymentRequested {
            bytes_added,
            payment_owed: _,
        } if deal.status == S::Ongoing => {
            deal.total_received += bytes_added;
            deal.status = S::FundsNeeded;
        }
        ClientEvent::LastPaymentRequested {
            bytes_added,
            payment_owed: _,
        } if deal.status == S::Ongoing => {
            deal.total_received += bytes_added;
            deal.status = S::FundsNeededLastPayment;
        }
        ClientEvent::BlockVerificationFailed(err)
            if matches!(deal.status, S::Ongoing | S::Finalizing) =>
        {
            deal.status = S::Failing;
            deal.message = err.clone();
        }
        ClientEvent::ProviderErrored(message)
            if matches!(
                deal.status,
                S::AwaitingAcceptance | S::Ongoing | S::Finalizing
            ) =>
        {
            deal.status = S::Failing;
            deal.message = format!("provider reported error: {}", message);
        }
        ClientEvent::FundsExpended {
            required,
            available,
        } if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) => {
            deal.status = S::Failing;
            deal.message = format!(
                "insufficient funds: deal requires {}, {} available",
                required, available
            );
        }
        ClientEvent::CreateVoucherFailed(err)
            if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) =>
        {
            deal.status = S::Failing;
            deal.message = format!("unable to create payment voucher: {}", err);
        }
        ClientEvent::WriteDealPaymentErrored(err)
            if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) =>
        {
            deal.status = S::Errored;
            deal.message = format!("error writing deal payment: {}", err);
        }
        ClientEvent::PaymentSent { amount }
            if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) =>
        {
            deal.paid_so_far = deal
                .paid_so_far
                .checked_add(*amount)
                .unwrap_or(deal.paid_so_far);
            deal.bytes_paid_for = deal.total_received;
            deal.current_interval += deal.proposal.params.payment_interval_increase;
            deal.status = if deal.status == S::FundsNeeded {
                S::Ongoing
            } else {
                S::Finalizing
            };
        }
        ClientEvent::Completed { bytes_added }
            if matches!(deal.status, S::Ongoing | S::Finalizing) =>
        {
            deal.total_received += bytes_added;
            deal.status = S::Completed;
        }
        ClientEvent::Failed if deal.status == S::Failing => {
            deal.status = S::Errored;
        }
        other => {
            return Err(FsmError::InvalidTransition {
                event: format!("{:?}", other),
                state: format!("{:?}", deal.status),
            })
        }
    }
    Ok(())
}
