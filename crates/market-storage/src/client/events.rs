use crate::types::{ClientDeal, StorageDealStatus};
use market_fsm::FsmError;
use market_types::Cid;

/// Events of the client-side storage deal machine. Each carries the data
/// its mutation needs; guards reject events that are not applicable in the
/// record's current state.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    EnsureFundsFailed(String),
    FundingInitiated(Cid),
    FundsEnsured,
    WriteProposalFailed(String),
    DealProposed,
    ReadResponseFailed(String),
    UnexpectedDealState(u64),
    DataTransferFailed(String),
    DataTransferInitiated,
    ManualTransferInitiated,
    DataTransferComplete,
    ResponseVerificationFailed,
    ResponseDealDidNotMatch { received: Cid, expected: Cid },
    DealRejected { state: u64, message: String },
    DealAccepted { publish_message: Option<Cid> },
    StreamCloseError(String),
    DealPublished(u64),
    DealPublishError(String),
    DealActivated,
    DealActivationFailed(String),
    Failed,
}

pub fn apply(deal: &mut ClientDeal, event: &ClientEvent) -> Result<(), FsmError> {
    use StorageDealStatus as S;
    match event {
        ClientEvent::EnsureFundsFailed(err)
            if matches!(deal.state, S::EnsureClientFunds | S::ClientFunding) =>
        {
            deal.state = S::Failing;
            deal.message = format!("adding market funds failed: {}", err);
        }
        ClientEvent::FundingInitiated(message_cid) if deal.state == S::EnsureClientFunds => {
            deal.state = S::ClientFunding;
            deal.add_funds_cid = Some(*message_cid);
        }
        ClientEvent::FundsEnsured
            if matches!(deal.state, S::EnsureClientFunds | S::ClientFunding) =>
        {
            deal.state = S::FundsEnsured;
        }
        ClientEvent::WriteProposalFailed(err) if deal.state == S::FundsEnsured => {
            deal.state = S::Error;
            deal.message = format!("sending proposal to storage provider failed: {}", err);
        }
        ClientEvent::DealProposed if deal.state == S::FundsEnsured => {
            deal.state = S::WaitingForDataRequest;
        }
        ClientEvent::ReadResponseFailed(err)
            if matches!(deal.state, S::WaitingForDataRequest | S::Validating) =>
        {
            deal.state = S::Error;
            deal.message = format!("error reading Response message: {}", err);
        }
        ClientEvent::UnexpectedDealState(code) if deal.state == S::WaitingForDataRequest => {
            deal.state = S::Failing;
            deal.message = format!(
                "unexpected deal status while waiting for data request: {}",
                code
            );
        }
        ClientEvent::DataTransferFailed(err)
            if matches!(deal.state, S::WaitingForDataRequest | S::Transferring) =>
        {
            deal.state = S::Failing;
            deal.message = format!("failed to initiate data transfer: {}", err);
        }
        ClientEvent::DataTransferInitiated if deal.state == S::WaitingForDataRequest => {
            deal.state = S::Transferring;
        }
        ClientEvent::ManualTransferInitiated if deal.state == S::WaitingForDataRequest => {
            deal.state = S::Validating;
        }
        ClientEvent::DataTransferComplete if deal.state == S::Transferring => {
            deal.state = S::Validating;
        }
        ClientEvent::ResponseVerificationFailed if deal.state == S::Validating => {
            deal.state = S::Failing;
            deal.message = "unable to verify signature on deal response".to_string();
        }
        ClientEvent::ResponseDealDidNotMatch { received, expected }
            if deal.state == S::Validating =>
        {
            deal.state = S::Failing;
            deal.message = format!(
                "miner responded to a wrong proposal: {} != {}",
                received, expected
            );
        }
        ClientEvent::DealRejected { state, message } if deal.state == S::Validating => {
            deal.state = S::Failing;
            deal.connection_closed = true;
            deal.message = format!("deal failed: (State={}) {}", state, message);
        }
        ClientEvent::DealAccepted { publish_message } if deal.state == S::Validating => {
            deal.state = S::ProposalAccepted;
            deal.connection_closed = true;
            deal.publish_message = *publish_message;
        }
        ClientEvent::StreamCloseError(err)
            if !matches!(deal.state, S::Active | S::Error) =>
        {
            // The close error takes over terminal reporting; the semantic
            // cause that got us here is preserved on the chain.
            if !deal.message.is_empty() {
                deal.cause_chain.push(std::mem::take(&mut deal.message));
            }
            deal.message = format!("error attempting to close stream: {}", err);
            deal.connection_closed = true;
            deal.state = S::Error;
        }
        ClientEvent::DealPublished(deal_id) if deal.state == S::ProposalAccepted => {
            // A deal id is assigned exactly once.
            if deal.deal_id.is_none() {
                deal.deal_id = Some(*deal_id);
            }
            deal.state = S::Sealing;
        }
        ClientEvent::DealPublishError(err) if deal.state == S::ProposalAccepted => {
            deal.state = S::Error;
            deal.message = format!("error validating deal published: {}", err);
        }
        ClientEvent::DealActivated if deal.state == S::Sealing => {
            deal.state = S::Active;
        }
        ClientEvent::DealActivationFailed(err) if deal.state == S::Sealing => {
            deal.state = S::Error;
            deal.message = format!("error in deal activation: {}", err);
        }
        ClientEvent::Failed if deal.state == S::Failing => {
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

    fn deal_in(state: StorageDealStatus) -> ClientDeal {
        let mut deal = ClientDeal::new(
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
            PeerId::dummy(1),
            Address::dummy(2),
            DataRef {
                transfer_type: TransferType::Graphsync,
                root: Cid::dummy(3),
            },
        );
        deal.state = state;
        deal
    }

    #[test]
    fn test_deal_id_set_exactly_once() {
        let mut deal = deal_in(StorageDealStatus::ProposalAccepted);
        apply(&mut deal, &ClientEvent::DealPublished(5)).unwrap();
        assert_eq!(deal.deal_id, Some(5));

        deal.state = StorageDealStatus::ProposalAccepted;
        apply(&mut deal, &ClientEvent::DealPublished(9)).unwrap();
        assert_eq!(deal.deal_id, Some(5));
    }

    #[test]
    fn test_stream_close_error_preserves_cause_chain() {
        let mut deal = deal_in(StorageDealStatus::Failing);
        deal.message = "deal failed: (State=2) because reasons".to_string();

        apply(
            &mut deal,
            &ClientEvent::StreamCloseError("unable to close".to_string()),
        )
        .unwrap();

        assert_eq!(deal.state, StorageDealStatus::Error);
        assert_eq!(
            deal.message,
            "error attempting to close stream: unable to close"
        );
        assert_eq!(
            deal.cause_chain,
            vec!["deal failed: (State=2) because reasons".to_string()]
        );
    }

    #[test]
    fn test_guard_rejects_out_of_state_events() {
        let mut deal = deal_in(StorageDealStatus::EnsureClientFunds);
        let err = apply(&mut deal, &ClientEvent::DealActivated).unwrap_err();
        assert!(matches!(err, FsmError::InvalidTransition { .. }));
        assert_eq!(deal.state, StorageDealStatus::EnsureClientFunds);
    }

    #[test]
    fn test_terminal_states_reject_close_error() {
        let mut deal = deal_in(StorageDealStatus::Active);
        assert!(apply(
            &mut deal,
            &ClientEvent::StreamCloseError("late".to_string())
        )
        .is_err());
    }
}
