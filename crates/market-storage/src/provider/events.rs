use crate::types::{ProviderDeal, StorageDealStatus};
use market_fsm::FsmError;
use market_types::Cid;

/// Events of the provider-side storage deal machine.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    ProposalRejected(String),
    ProposalValidated,
    FundingInitiated(Cid),
    FundsEnsured,
    EnsureFundsFailed(String),
    DataRequested,
    SendResponseFailed(String),
    DataTransferCompleted,
    DataVerificationFailed(String),
    DataVerified,
    DealPublishInitiated(Cid),
    DealPublishError(String),
    DealPublished(u64),
    DealHandedOff,
    DealHandoffFailed(String),
    DealActivated,
    DealActivationFailed(String),
    StreamCloseError(String),
    Failed,
}

pub fn apply(deal: &mut ProviderDeal, event: &ProviderEvent) -> Result<(), FsmError> {
    use StorageDealStatus as S;
    match event {
        ProviderEvent::ProposalRejected(reason) if deal.state == S::Validating => {
            deal.state = S::Failing;
            deal.message = format!("deal rejected: {}", reason);
        }
        ProviderEvent::ProposalValidated if deal.state == S::Validating => {
            deal.state = S::EnsureProviderFunds;
        }
        ProviderEvent::FundingInitiated(message_cid) if deal.state == S::EnsureProviderFunds => {
            deal.state = S::ProviderFunding;
            deal.add_funds_cid = Some(*message_cid);
        }
        ProviderEvent::FundsEnsured
            if matches!(deal.state, S::EnsureProviderFunds | S::ProviderFunding) =>
        {
            deal.state = S::FundsEnsured;
        }
        ProviderEvent::EnsureFundsFailed(err)
            if matches!(deal.state, S::EnsureProviderFunds | S::ProviderFunding) =>
        {
            deal.state = S::Failing;
            deal.message = format!("error ensuring provider collateral: {}", err);
        }
        ProviderEvent::DataRequested if deal.state == S::FundsEnsured => {
            deal.state = S::WaitingForData;
        }
        ProviderEvent::SendResponseFailed(err)
            if matches!(deal.state, S::FundsEnsured | S::Publishing) =>
        {
            deal.state = S::Error;
            deal.message = format!("error sending deal response: {}", err);
        }
        ProviderEvent::DataTransferCompleted if deal.state == S::WaitingForData => {
            deal.state = S::VerifyData;
        }
        ProviderEvent::DataVerificationFailed(err) if deal.state == S::VerifyData => {
            deal.state = S::Failing;
            deal.message = format!("deal data verification failed: {}", err);
        }
        ProviderEvent::DataVerified if deal.state == S::VerifyData => {
            deal.state = S::Publish;
        }
        ProviderEvent::DealPublishInitiated(publish_cid) if deal.state == S::Publish => {
            // The publish message is recorded exactly once.
            if deal.publish_cid.is_none() {
                deal.publish_cid = Some(*publish_cid);
            }
            deal.state = S::Publishing;
        }
        ProviderEvent::DealPublishError(err)
            if matches!(deal.state, S::Publish | S::Publishing) =>
        {
            deal.state = S::Error;
            deal.message = format!("error publishing deal: {}", err);
        }
        ProviderEvent::DealPublished(deal_id) if deal.state == S::Publishing => {
            if deal.deal_id.is_none() {
                deal.deal_id = Some(*deal_id);
            }
            deal.connection_closed = true;
            deal.state = S::Staged;
        }
        ProviderEvent::DealHandedOff if deal.state == S::Staged => {
            deal.state = S::Sealing;
        }
        ProviderEvent::DealHandoffFailed(err) if deal.state == S::Staged => {
            deal.state = S::Error;
            deal.message = format!("error handing off deal for sealing: {}", err);
        }
        ProviderEvent::DealActivated if deal.state == S::Sealing => {
            deal.state = S::Active;
        }
        ProviderEvent::DealActivationFailed(err) if deal.state == S::Sealing => {
            deal.state = S::Error;
            deal.message = format!("error in deal activation: {}", err);
        }
        ProviderEvent::StreamCloseError(err)
            if !matches!(deal.state, S::Active | S::Error) =>
        {
            if !deal.message.is_empty() {
                deal.cause_chain.push(std::mem::take(&mut deal.message));
            }
            deal.message = format!("error attempting to close stream: {}", err);
            deal.connection_closed = true;
            deal.state = S::Error;
        }
        ProviderEvent::Failed if deal.state == S::Failing => {
            deal.state = S::Error;
        }
        other => {
            return Err(FsmError::InvalidTransition {
                event: format!("{:?}", other),
                state: format!("{:?}", deal.state),
            })
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataRef, DealProposal, SignedProposal, TransferType};
    use market_types::{Address, PeerId, Signature, TokenAmount};

    fn deal_in(state: StorageDealStatus) -> ProviderDeal {
        let mut deal = ProviderDeal::new(
            SignedProposal {
                proposal: DealProposal {
                    piece_cid: Cid::dummy(1),
                    piece_size: 1024,
                    client: Address::dummy(1),
                    provider: Address::dummy(2),
                    start_epoch: 0,
                    end_epoch: 10,
                    storage_price_per_epoch: TokenAmount::from_base_units(1),
                    provider_collateral: TokenAmount::ZERO,
                    client_collateral: TokenAmount::ZERO,
                },
                client_signature: Signature::dummy(1),
            },
            DataRef {
                transfer_type: TransferType::Graphsync,
                root: Cid::dummy(3),
            },
            PeerId::dummy(1),
        );
        deal.state = state;
        deal
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut deal = deal_in(StorageDealStatus::Validating);
        apply(&mut deal, &ProviderEvent::ProposalValidated).unwrap();
        apply(&mut deal, &ProviderEvent::FundsEnsured).unwrap();
        apply(&mut deal, &ProviderEvent::DataRequested).unwrap();
        apply(&mut deal, &ProviderEvent::DataTransferCompleted).unwrap();
        apply(&mut deal, &ProviderEvent::DataVerified).unwrap();
        apply(&mut deal, &ProviderEvent::DealPublishInitiated(Cid::dummy(5))).unwrap();
        apply(&mut deal, &ProviderEvent::DealPublished(12)).unwrap();
        apply(&mut deal, &ProviderEvent::DealHandedOff).unwrap();
        apply(&mut deal, &ProviderEvent::DealActivated).unwrap();

        assert_eq!(deal.state, StorageDealStatus::Active);
        assert_eq!(deal.deal_id, Some(12));
        assert_eq!(deal.publish_cid, Some(Cid::dummy(5)));
        assert!(deal.connection_closed);
    }

    #[test]
    fn test_rejection_sets_message() {
        let mut deal = deal_in(StorageDealStatus::Validating);
        apply(
            &mut deal,
            &ProviderEvent::ProposalRejected("piece size too small".to_string()),
        )
        .unwrap();
        assert_eq!(deal.state, StorageDealStatus::Failing);
        assert_eq!(deal.message, "deal rejected: piece size too small");

        apply(&mut deal, &ProviderEvent::Failed).unwrap();
        assert_eq!(deal.state, StorageDealStatus::Error);
    }

    #[test]
    fn test_cannot_skip_states() {
        let mut deal = deal_in(StorageDealStatus::Validating);
        assert!(apply(&mut deal, &ProviderEvent::DealActivated).is_err());
        assert!(apply(&mut deal, &ProviderEvent::DealPublished(1)).is_err());
        assert_eq!(deal.state, StorageDealStatus::Validating);
    }
}
