//! Solvency Proof Engine
//!
//! Proves `actual_balance >= threshold` without revealing the balance.
//!
//! State: `Uninitialized -> Initializing -> Ready(mode)`. Initialization
//! loads the circuit artifact and builds a proving backend; if either step
//! fails the engine settles on `Simulated` for its whole lifetime.
//!
//! Simulated proofs carry no cryptographic meaning. Verifying one only
//! reads back the embedded `is_solvent` flag, so anyone can forge a passing
//! simulated proof. Callers that need soundness must check the mode on
//! every generated proof, not only after initialization.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{ProofError, ValidationError};
use crate::types::{CircuitInfo, GeneratedProof, ProofMode, PublicInputs, SolvencyProof};

const SIMULATED_DOMAIN: &[u8] = b"prism:simulated-solvency:v1";

/// Default artifact location, relative to the workspace root
const DEFAULT_CIRCUIT_PATH: &str = "target/circuits/solvency-proof.bin";

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Circuit not found: {0}")]
    CircuitNotFound(String),
    #[error("Invalid circuit artifact: {0}")]
    InvalidArtifact(String),
    #[error("Circuit execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Proof generation failed: {0}")]
    GenerationFailed(String),
    #[error("Proof verification failed: {0}")]
    VerificationFailed(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Proving backend unavailable: {0}")]
    Unavailable(String),
}

/// Circuit input (balance private, threshold public)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolvencyInput {
    pub actual_balance: u64,
    pub threshold: u64,
}

/// Opaque witness produced by circuit execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Witness(Vec<u8>);

impl Witness {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Cryptographic proving capability
pub trait ProvingBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run the circuit and derive a witness
    fn execute(&self, input: &SolvencyInput) -> Result<Witness, BackendError>;

    fn prove(&self, witness: &Witness) -> Result<Vec<u8>, BackendError>;

    fn verify(&self, proof: &[u8], public_inputs: &PublicInputs) -> Result<bool, BackendError>;
}

/// Builds a proving backend from compiled circuit bytes
pub trait BackendFactory: Send + Sync {
    fn build(&self, artifact: &[u8]) -> Result<Box<dyn ProvingBackend>, BackendError>;
}

/// Factory for the backend compiled into this binary
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBackendFactory;

impl BackendFactory for DefaultBackendFactory {
    #[cfg(feature = "risc0")]
    fn build(&self, artifact: &[u8]) -> Result<Box<dyn ProvingBackend>, BackendError> {
        crate::services::risc0::Risc0Factory.build(artifact)
    }

    #[cfg(not(feature = "risc0"))]
    fn build(&self, _artifact: &[u8]) -> Result<Box<dyn ProvingBackend>, BackendError> {
        Err(BackendError::Unavailable(
            "built without the `risc0` feature".to_string(),
        ))
    }
}

/// Convert signed request amounts into the engine's unsigned domain
pub fn validate_amounts(actual_balance: i64, threshold: i64) -> Result<(u64, u64), ValidationError> {
    let actual_balance = u64::try_from(actual_balance).map_err(|_| ValidationError::NegativeAmount {
        field: "actual_balance",
        value: actual_balance,
    })?;
    let threshold = u64::try_from(threshold).map_err(|_| ValidationError::NegativeAmount {
        field: "threshold",
        value: threshold,
    })?;
    Ok((actual_balance, threshold))
}

/// Prover configuration
#[derive(Debug, Clone)]
pub struct ProverConfig {
    /// Never load a circuit; always simulate
    pub dev_mode: bool,
    /// Path to the compiled circuit artifact
    pub circuit_path: PathBuf,
    /// Degrade a failing cryptographic call to a simulated proof instead of
    /// returning `ProofError::Backend`
    pub fallback_on_backend_error: bool,
}

impl ProverConfig {
    /// Find the workspace root by walking up the directory tree
    fn find_workspace_root() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;

        loop {
            if current.join("Cargo.toml").exists() && current.join("prism-server").exists() {
                return Some(current);
            }
            if !current.pop() {
                break;
            }
        }

        None
    }

    /// Default artifact path, anchored at the workspace root when found
    pub fn default_circuit_path() -> PathBuf {
        match Self::find_workspace_root() {
            Some(root) => root.join(DEFAULT_CIRCUIT_PATH),
            None => PathBuf::from(DEFAULT_CIRCUIT_PATH),
        }
    }
}

impl Default for ProverConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            circuit_path: Self::default_circuit_path(),
            fallback_on_backend_error: true,
        }
    }
}

/// Backend selected at initialization
enum Backend {
    Cryptographic(Box<dyn ProvingBackend>),
    Simulated,
}

impl Backend {
    fn mode(&self) -> ProofMode {
        match self {
            Backend::Cryptographic(_) => ProofMode::Cryptographic,
            Backend::Simulated => ProofMode::Simulated,
        }
    }
}

enum EngineState {
    Uninitialized,
    Initializing,
    Ready(Arc<Backend>),
}

/// Observable engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Initializing,
    Ready(ProofMode),
}

/// Generates and verifies solvency proofs
pub struct SolvencyProofEngine {
    config: ProverConfig,
    factory: Arc<dyn BackendFactory>,
    state: RwLock<EngineState>,
    init_lock: tokio::sync::Mutex<()>,
    /// Whether the most recent generation fell back to simulation
    last_degraded: AtomicBool,
    /// Generations that fell back to simulation since startup
    degraded_calls: AtomicU64,
    circuit: CircuitInfo,
}

impl SolvencyProofEngine {
    pub fn new(config: ProverConfig) -> Self {
        Self::with_factory(config, Arc::new(DefaultBackendFactory))
    }

    pub fn with_factory(config: ProverConfig, factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            config,
            factory,
            state: RwLock::new(EngineState::Uninitialized),
            init_lock: tokio::sync::Mutex::new(()),
            last_degraded: AtomicBool::new(false),
            degraded_calls: AtomicU64::new(0),
            circuit: CircuitInfo::default(),
        }
    }

    pub fn status(&self) -> EngineStatus {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            EngineState::Uninitialized => EngineStatus::Uninitialized,
            EngineState::Initializing => EngineStatus::Initializing,
            EngineState::Ready(backend) => EngineStatus::Ready(backend.mode()),
        }
    }

    /// Mode selected at initialization, if initialized
    pub fn mode(&self) -> Option<ProofMode> {
        match self.status() {
            EngineStatus::Ready(mode) => Some(mode),
            _ => None,
        }
    }

    /// True in `Simulated` mode, or when the last proof was degraded
    ///
    /// The last-call flag is shared by the whole engine, so a concurrent
    /// successful generation can clear it. The mode on each `GeneratedProof`
    /// is the per-call answer; `degraded_proofs` never decreases.
    pub fn is_mock_mode(&self) -> bool {
        self.mode() == Some(ProofMode::Simulated) || self.last_degraded.load(Ordering::Relaxed)
    }

    /// Number of generations that fell back to a simulated proof
    pub fn degraded_proofs(&self) -> u64 {
        self.degraded_calls.load(Ordering::Relaxed)
    }

    pub fn circuit_info(&self) -> &CircuitInfo {
        &self.circuit
    }

    /// Load the circuit and select the backend; no-op once ready
    pub async fn initialize(&self) -> ProofMode {
        self.ready_backend().await.mode()
    }

    async fn ready_backend(&self) -> Arc<Backend> {
        if let Some(backend) = self.current_backend() {
            return backend;
        }

        let _init = self.init_lock.lock().await;
        if let Some(backend) = self.current_backend() {
            return backend;
        }

        self.set_state(EngineState::Initializing);
        let backend = Arc::new(self.load_backend().await);
        self.set_state(EngineState::Ready(backend.clone()));
        backend
    }

    fn current_backend(&self) -> Option<Arc<Backend>> {
        match &*self.state.read().unwrap_or_else(|e| e.into_inner()) {
            EngineState::Ready(backend) => Some(backend.clone()),
            _ => None,
        }
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = state;
    }

    async fn load_backend(&self) -> Backend {
        if self.config.dev_mode {
            info!("Running in DEVELOPMENT mode - proofs are SIMULATED");
            return Backend::Simulated;
        }

        let path = &self.config.circuit_path;
        info!(?path, "Loading solvency circuit");

        let artifact = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    ?path,
                    error = %BackendError::CircuitNotFound(e.to_string()),
                    "Falling back to SIMULATED proofs; they carry no cryptographic guarantee"
                );
                return Backend::Simulated;
            }
        };

        match self.factory.build(&artifact) {
            Ok(backend) => {
                info!(backend = backend.name(), "Cryptographic proving backend ready");
                Backend::Cryptographic(backend)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Falling back to SIMULATED proofs; they carry no cryptographic guarantee"
                );
                Backend::Simulated
            }
        }
    }

    /// Generate a proof that `actual_balance >= threshold`
    ///
    /// An unsatisfiable claim fails fast with `ProofWouldFail` before any
    /// backend interaction. The returned mode is the one actually used.
    #[instrument(skip(self, actual_balance))]
    pub async fn generate_proof(
        &self,
        actual_balance: u64,
        threshold: u64,
    ) -> Result<GeneratedProof, ProofError> {
        if actual_balance < threshold {
            debug!("Balance below threshold, refusing to prove");
            return Err(ProofError::ProofWouldFail { threshold });
        }

        let backend = self.ready_backend().await;
        let input = SolvencyInput {
            actual_balance,
            threshold,
        };
        let start = Instant::now();

        let generated = match backend.as_ref() {
            Backend::Simulated => {
                self.last_degraded.store(false, Ordering::Relaxed);
                Self::simulated_proof(&input)
            }
            Backend::Cryptographic(prover) => match Self::prove_with(prover.as_ref(), &input) {
                Ok(proof) => {
                    self.last_degraded.store(false, Ordering::Relaxed);
                    GeneratedProof {
                        proof: SolvencyProof {
                            proof,
                            public_inputs: PublicInputs {
                                threshold,
                                is_solvent: true,
                            },
                            timestamp: Self::now_ms(),
                        },
                        mode: ProofMode::Cryptographic,
                    }
                }
                Err(e) if self.config.fallback_on_backend_error => {
                    warn!(
                        error = %e,
                        "Cryptographic proving failed; returning a SIMULATED proof for this call"
                    );
                    self.last_degraded.store(true, Ordering::Relaxed);
                    self.degraded_calls.fetch_add(1, Ordering::Relaxed);
                    Self::simulated_proof(&input)
                }
                Err(e) => {
                    error!(error = %e, "Cryptographic proving failed");
                    return Err(ProofError::Backend(e.to_string()));
                }
            },
        };

        info!(
            mode = generated.mode.as_str(),
            generation_time_ms = start.elapsed().as_millis() as u64,
            proof_size = generated.proof.proof.len(),
            "Solvency proof generated"
        );
        Ok(generated)
    }

    fn prove_with(
        prover: &dyn ProvingBackend,
        input: &SolvencyInput,
    ) -> Result<Vec<u8>, BackendError> {
        let witness = prover.execute(input)?;
        prover.prove(&witness)
    }

    /// Placeholder derived from public data only
    fn simulated_proof(input: &SolvencyInput) -> GeneratedProof {
        let timestamp = Self::now_ms();
        let mut hasher = Sha256::new();
        hasher.update(SIMULATED_DOMAIN);
        hasher.update(input.threshold.to_le_bytes());
        hasher.update(timestamp.to_le_bytes());

        GeneratedProof {
            proof: SolvencyProof {
                proof: hasher.finalize().to_vec(),
                public_inputs: PublicInputs {
                    threshold: input.threshold,
                    is_solvent: input.actual_balance >= input.threshold,
                },
                timestamp,
            },
            mode: ProofMode::Simulated,
        }
    }

    /// Verify a proof against its public inputs
    ///
    /// In `Simulated` mode this returns the embedded `is_solvent` flag and
    /// provides no assurance at all.
    #[instrument(skip(self, proof), fields(threshold = proof.public_inputs.threshold))]
    pub async fn verify_proof(&self, proof: &SolvencyProof) -> bool {
        let backend = self.ready_backend().await;

        match backend.as_ref() {
            Backend::Simulated => {
                debug!("Simulated verification: echoing is_solvent");
                proof.public_inputs.is_solvent
            }
            Backend::Cryptographic(verifier) => {
                match verifier.verify(&proof.proof, &proof.public_inputs) {
                    Ok(valid) => valid && proof.public_inputs.is_solvent,
                    Err(e) => {
                        warn!(error = %e, "Proof rejected by verifier");
                        false
                    }
                }
            }
        }
    }

    fn now_ms() -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}
