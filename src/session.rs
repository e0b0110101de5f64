//! Provider session: the one object shared by every lifecycle operation.
//!
//! Constructed explicitly once per configured provider and passed by
//! handle into each operation — there is no ambient global. The gate
//! counter is the only state mutated across concurrent operations;
//! everything else here is read-only configuration.

use crate::api::ComputeApi;
use crate::error::RudderError;
use crate::gate::{Gate, Ticket};
use crate::settings::Settings;

pub struct ProviderSession<C> {
    pub client: C,
    pub settings: Settings,
    gate: Gate,
}

impl<C: ComputeApi> ProviderSession<C> {
    pub fn new(client: C, settings: Settings) -> Result<Self, RudderError> {
        settings.validate()?;
        let gate = Gate::new(settings.max_parallel);
        Ok(Self {
            client,
            settings,
            gate,
        })
    }

    /// Admit one operation through the gate. Every external-API-touching
    /// step must run while the returned ticket is held.
    pub async fn begin(&self) -> Ticket {
        self.gate.admit().await
    }

    pub fn gate(&self) -> &Gate {
        &self.gate
    }
}
