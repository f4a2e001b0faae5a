//! Gateway bundle, factory and registry

use std::collections::HashMap;
use std::sync::Arc;

use agora_types::{AgoraError, ChainBackend, ChainMode, Result};
use tracing::{info, warn};

use crate::{
    AttestationChain, ChainAdapter, ChainConfig, ChainReader, EscrowChain, IdentityChain,
    LiveAdapter, PaymentChain, SchedulingChain, StubAdapter, TxLog,
};

/// Every capability of one settlement backend
#[derive(Clone)]
pub struct ChainGateway {
    backend: ChainBackend,
    mode: ChainMode,
    escrow: Arc<dyn EscrowChain>,
    attestation: Arc<dyn AttestationChain>,
    payment: Arc<dyn PaymentChain>,
    identity: Arc<dyn IdentityChain>,
    scheduling: Arc<dyn SchedulingChain>,
    reader: Arc<dyn ChainReader>,
}

impl ChainGateway {
    /// Serve every capability from one adapter
    pub fn from_adapter<A>(backend: ChainBackend, mode: ChainMode, adapter: Arc<A>) -> Self
    where
        A: ChainAdapter + 'static,
    {
        Self {
            backend,
            mode,
            escrow: adapter.clone(),
            attestation: adapter.clone(),
            payment: adapter.clone(),
            identity: adapter.clone(),
            scheduling: adapter.clone(),
            reader: adapter,
        }
    }

    /// A stub gateway with its own transaction log
    pub fn stub(backend: ChainBackend, delay_ms: u64, tx_log: TxLog) -> Self {
        Self::from_adapter(
            backend,
            ChainMode::Stub,
            Arc::new(StubAdapter::new(backend, delay_ms, tx_log)),
        )
    }

    pub fn with_escrow(mut self, escrow: Arc<dyn EscrowChain>) -> Self {
        self.escrow = escrow;
        self
    }

    pub fn with_attestation(mut self, attestation: Arc<dyn AttestationChain>) -> Self {
        self.attestation = attestation;
        self
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityChain>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_payment(mut self, payment: Arc<dyn PaymentChain>) -> Self {
        self.payment = payment;
        self
    }

    pub fn backend(&self) -> ChainBackend {
        self.backend
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == ChainMode::Live
    }

    pub fn escrow(&self) -> &Arc<dyn EscrowChain> {
        &self.escrow
    }

    pub fn attestation(&self) -> &Arc<dyn AttestationChain> {
        &self.attestation
    }

    pub fn payment(&self) -> &Arc<dyn PaymentChain> {
        &self.payment
    }

    pub fn identity(&self) -> &Arc<dyn IdentityChain> {
        &self.identity
    }

    pub fn scheduling(&self) -> &Arc<dyn SchedulingChain> {
        &self.scheduling
    }

    pub fn reader(&self) -> &Arc<dyn ChainReader> {
        &self.reader
    }
}

impl std::fmt::Debug for ChainGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainGateway")
            .field("backend", &self.backend)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Picks live or stub mode per backend, once, at construction
pub struct GatewayFactory;

impl GatewayFactory {
    pub fn build(backend: ChainBackend, config: &ChainConfig, tx_log: TxLog) -> Result<ChainGateway> {
        let backend_config = config.backend(backend);

        if let Some(adapter) = LiveAdapter::new(backend, &backend_config, tx_log.clone()) {
            info!(%backend, mode = %ChainMode::Live, "Chain gateway ready");
            return Ok(ChainGateway::from_adapter(backend, ChainMode::Live, Arc::new(adapter)));
        }

        let missing = backend_config.missing().join(", ");
        if !config.allow_stub_fallback {
            return Err(AgoraError::Configuration {
                message: format!("{} requires live mode but is missing: {}", backend, missing),
            });
        }

        warn!(%backend, missing = %missing, "Backend not configured, using stub adapter");
        Ok(ChainGateway::stub(backend, config.stub_delay_ms, tx_log))
    }
}

/// One gateway per backend, plus the default used for anything unmapped
#[derive(Clone, Debug)]
pub struct GatewayRegistry {
    default: ChainGateway,
    gateways: HashMap<ChainBackend, ChainGateway>,
}

impl GatewayRegistry {
    pub fn new(default: ChainGateway) -> Self {
        let mut gateways = HashMap::new();
        gateways.insert(default.backend(), default.clone());
        Self { default, gateways }
    }

    /// Build a gateway for every supported backend
    pub fn from_config(config: &ChainConfig, tx_log: TxLog) -> Result<Self> {
        let default = GatewayFactory::build(config.default_backend, config, tx_log.clone())?;
        let mut registry = Self::new(default);
        for backend in ChainBackend::ALL {
            if backend != config.default_backend {
                registry.insert(GatewayFactory::build(backend, config, tx_log.clone())?);
            }
        }
        Ok(registry)
    }

    /// Stub gateways for every backend
    pub fn stub(default_backend: ChainBackend, delay_ms: u64, tx_log: TxLog) -> Self {
        let mut registry = Self::new(ChainGateway::stub(default_backend, delay_ms, tx_log.clone()));
        for backend in ChainBackend::ALL {
            if backend != default_backend {
                registry.insert(ChainGateway::stub(backend, delay_ms, tx_log.clone()));
            }
        }
        registry
    }

    pub fn insert(&mut self, gateway: ChainGateway) {
        if gateway.backend() == self.default.backend() {
            self.default = gateway.clone();
        }
        self.gateways.insert(gateway.backend(), gateway);
    }

    pub fn get(&self, backend: ChainBackend) -> Option<&ChainGateway> {
        self.gateways.get(&backend)
    }

    /// Gateway for `backend`, or the default when it is not registered
    pub fn resolve(&self, backend: ChainBackend) -> &ChainGateway {
        self.gateways.get(&backend).unwrap_or(&self.default)
    }

    pub fn default_gateway(&self) -> &ChainGateway {
        &self.default
    }

    /// Backends and their modes, sorted by backend
    pub fn modes(&self) -> Vec<(ChainBackend, ChainMode)> {
        let mut modes: Vec<_> = self.gateways.values().map(|g| (g.backend(), g.mode())).collect();
        modes.sort_by_key(|(backend, _)| *backend);
        modes
    }
}
