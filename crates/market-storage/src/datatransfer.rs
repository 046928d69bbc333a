use crate::error::Result;
use async_trait::async_trait;
use market_types::{Cid, PeerId, Selector};
use serde::{Deserialize, Serialize};

/// Voucher identifying which deal a data-transfer channel belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferVoucher {
    pub proposal_cid: Cid,
}

/// Seam to the data-transfer subsystem that moves payload DAGs.
#[async_trait]
pub trait DataTransfer: Send + Sync {
    /// Open a push channel to `to` and start transferring the DAG under
    /// `base_cid`.
    async fn open_push_channel(
        &self,
        to: PeerId,
        voucher: TransferVoucher,
        base_cid: Cid,
        selector: Selector,
    ) -> Result<()>;
}
