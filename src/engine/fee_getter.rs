//! Keeps the exchange fee table fresh

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::spawn_periodic;
use crate::common::errors::Result;
use crate::common::traits::Exchange;

pub struct FeeGetter {
    exchange: Arc<dyn Exchange>,
}

impl FeeGetter {
    pub fn new(exchange: Arc<dyn Exchange>) -> Self {
        Self { exchange }
    }

    pub async fn refresh(&self) -> Result<()> {
        self.exchange.refresh_fees().await
    }

    /// Refresh once before returning, then every `period` in the background
    ///
    /// A failed first refresh is only logged, jumps then fall back to the default fee.
    pub async fn start(self: Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        match self.refresh().await {
            Ok(()) => info!("Loaded trade fees"),
            Err(e) => error!("Failed to load trade fees: {}", e),
        }

        spawn_periodic("fee_getter", period, false, cancel, move || {
            let getter = self.clone();
            async move {
                if let Err(e) = getter.refresh().await {
                    error!("Failed to refresh trade fees: {}", e);
                }
            }
        })
    }
}
