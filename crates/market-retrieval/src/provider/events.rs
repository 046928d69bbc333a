use crate::types::{DealStatus, ProviderDealState};
use market_fsm::FsmError;
use market_types::TokenAmount;

/// Events of the provider-side retrieval deal machine.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    DealRejected(String),
    DealNotFound(String),
    DealAccepted,
    AcceptanceSent,
    SendResponseFailed(String),
    BlockReadFailed(String),
    PaymentRequested { total_sent: u64, payment_owed: TokenAmount },
    LastPaymentRequested { total_sent: u64, payment_owed: TokenAmount },
    ReadPaymentFailed(String),
    SaveVoucherFailed(String),
    InsufficientPayment { received: TokenAmount, expected: TokenAmount },
    PaymentReceived { amount: TokenAmount },
    Completed { total_sent: u64 },
    Failed,
    DealSuspended,
    DealResumed,
}

fn is_terminal(status: DealStatus) -> bool {
    matches!(status, DealStatus::Completed | DealStatus::Errored)
}

pub fn apply(deal: &mut ProviderDealState, event: &ProviderEvent) -> Result<(), FsmError> {
    use DealStatus as S;
    match event {
        ProviderEvent::DealRejected(reason) if deal.status == S::New => {
            deal.status = S::Failing;
            deal.failure_status = S::Rejected;
            deal.message = reason.clone();
        }
        ProviderEvent::DealNotFound(message) if deal.status == S::New => {
            deal.status = S::Failing;
            deal.failure_status = S::DealNotFound;
            deal.message = message.clone();
        }
        ProviderEvent::DealAccepted if deal.status == S::New => {
            deal.status = S::Accepted;
        }
        ProviderEvent::AcceptanceSent if deal.status == S::Accepted => {
            deal.status = S::Ongoing;
        }
        ProviderEvent::SendResponseFailed(err)
            if matches!(deal.status, S::Accepted | S::Ongoing | S::Finalizing) =>
        {
            deal.status = S::Errored;
            deal.message = format!("error writing deal response: {}", err);
        }
        ProviderEvent::BlockReadFailed(err) if deal.status == S::Ongoing => {
            deal.status = S::Failing;
            deal.failure_status = S::Errored;
            deal.message = format!("error reading blocks: {}", err);
        }
        ProviderEvent::PaymentRequested {
            total_sent,
            payment_owed,
        } if deal.status == S::Ongoing && *total_sent >= deal.total_sent => {
            deal.total_sent = *total_sent;
            deal.payment_owed = *payment_owed;
            deal.status = S::FundsNeeded;
        }
        ProviderEvent::LastPaymentRequested {
            total_sent,
            payment_owed,
        } if deal.status == S::Ongoing && *total_sent >= deal.total_sent => {
            deal.total_sent = *total_sent;
            deal.payment_owed = *payment_owed;
            deal.status = S::FundsNeededLastPayment;
        }
        ProviderEvent::ReadPaymentFailed(err)
            if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) =>
        {
            deal.status = S::Errored;
            deal.message = format!("error reading deal payment: {}", err);
        }
        ProviderEvent::SaveVoucherFailed(err)
            if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) =>
        {
            deal.status = S::Failing;
            deal.failure_status = S::Errored;
            deal.message = format!("error processing payment: {}", err);
        }
        ProviderEvent::InsufficientPayment { received, expected }
            if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) =>
        {
            deal.status = S::Failing;
            deal.failure_status = S::Errored;
            deal.message = format!(
                "insufficient payment: received {}, expected {}",
                received, expected
            );
        }
        ProviderEvent::PaymentReceived { amount }
            if matches!(deal.status, S::FundsNeeded | S::FundsNeededLastPayment) =>
        {
            deal.funds_received = deal
                .funds_received
                .checked_add(*amount)
                .unwrap_or(deal.funds_received);
            deal.bytes_paid_for = deal.total_sent;
            deal.current_interval += deal.proposal.params.payment_interval_increase;
            deal.payment_owed = TokenAmount::ZERO;
            deal.status = if deal.status == S::FundsNeeded {
                S::Ongoing
            } else {
                S::Finalizing
            };
        }
        ProviderEvent::Completed { total_sent }
            if matches!(deal.status, S::Ongoing | S::Finalizing)
                && *total_sent >= deal.total_sent =>
        {
            deal.total_sent = *total_sent;
            deal.status = S::Completed;
        }
        ProviderEvent::Failed if deal.status == S::Failing => {
            deal.status = S::Errored;
        }
        ProviderEvent::DealSuspended
            if !is_terminal(deal.status) && deal.status != S::Suspended =>
        {
            deal.resume_status = Some(deal.status);
            deal.status = S::Suspended;
        }
        ProviderEvent::DealResumed if deal.status == S::Suspended => {
            match deal.resume_status.take() {
                Some(status) => deal.status = status,
                None => {
                    return Err(FsmError::InvalidTransition {
                        event: "DealResumed".to_string(),
                        state: "Suspended with no resume target".to_string(),
                    })
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DealId, DealProposal, Params};
    use market_types::{Cid, PeerId};

    fn deal_in(status: DealStatus) -> ProviderDealState {
        let mut deal = ProviderDealState::new(
            DealProposal {
                payload_cid: Cid::dummy(1),
                id: DealId(0),
                params: Params::new_v0(TokenAmount::from_base_units(1000), 10_000, 1_000),
            },
            PeerId::dummy(3),
        );
        deal.status = status;
        deal
    }

    #[test]
    fn test_checkpoint_accounting() {
        let mut deal = deal_in(DealStatus::Ongoing);
        apply(
            &mut deal,
            &ProviderEvent::PaymentRequested {
                total_sent: 10_136,
                payment_owed: TokenAmount::from_base_units(10_136_000),
            },
        )
        .unwrap();
        assert_eq!(deal.status, DealStatus::FundsNeeded);
        assert_eq!(deal.total_sent, 10_136);

        apply(
            &mut deal,
            &ProviderEvent::PaymentReceived {
                amount: TokenAmount::from_base_units(10_136_000),
            },
        )
        .unwrap();
        assert_eq!(deal.status, DealStatus::Ongoing);
        assert_eq!(deal.bytes_paid_for, 10_136);
        assert_eq!(deal.current_interval, 11_000);
        assert_eq!(
            deal.funds_received,
            TokenAmount::from_base_units(10_136_000)
        );
    }

    #[test]
    fn test_total_sent_never_regresses() {
        let mut deal = deal_in(DealStatus::Ongoing);
        deal.total_sent = 5_000;
        assert!(apply(
            &mut deal,
            &ProviderEvent::PaymentRequested {
                total_sent: 4_000,
                payment_owed: TokenAmount::ZERO,
            },
        )
        .is_err());
        assert_eq!(deal.total_sent, 5_000);
    }

    #[test]
    fn test_suspend_and_resume_round_trip() {
        let mut deal = deal_in(DealStatus::Ongoing);
        apply(&mut deal, &ProviderEvent::DealSuspended).unwrap();
        assert_eq!(deal.status, DealStatus::Suspended);

        // Suspending twice is rejected, not nested.
        assert!(apply(&mut deal, &ProviderEvent::DealSuspended).is_err());

        apply(&mut deal, &ProviderEvent::DealResumed).unwrap();
        assert_eq!(deal.status, DealStatus::Ongoing);
    }

    #[test]
    fn test_terminal_deals_cannot_suspend() {
        let mut deal = deal_in(DealStatus::Completed);
        assert!(apply(&mut deal, &ProviderEvent::DealSuspended).is_err());
    }
}
