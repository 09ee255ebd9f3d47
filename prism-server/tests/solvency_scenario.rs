//! Solvency proofs through the engine with pluggable backends

use std::path::PathBuf;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use prism_server::error::{ProofError, ValidationError};
use prism_server::prover::{
    validate_amounts, BackendError, BackendFactory, EngineStatus, ProverConfig, ProvingBackend,
    SolvencyInput, SolvencyProofEngine, Witness,
};
use prism_server::types::{ProofMode, PublicInputs, SolvencyProof};

/// Accepts only proofs it produced for the claimed threshold
struct MacBackend {
    key: Vec<u8>,
}

impl MacBackend {
    fn mac(&self, threshold: u64) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(&self.key);
        hasher.update(threshold.to_be_bytes());
        hasher.finalize().to_vec()
    }
}

impl ProvingBackend for MacBackend {
    fn name(&self) -> &'static str {
        "mac"
    }

    fn execute(&self, input: &SolvencyInput) -> Result<Witness, BackendError> {
        if input.actual_balance < input.threshold {
            return Err(BackendError::ExecutionFailed("unsatisfied".into()));
        }
        Ok(Witness::new(input.threshold.to_be_bytes().to_vec()))
    }

    fn prove(&self, witness: &Witness) -> Result<Vec<u8>, BackendError> {
        let bytes: [u8; 8] = witness
            .as_bytes()
            .try_into()
            .map_err(|_| BackendError::GenerationFailed("bad witness".into()))?;
        Ok(self.mac(u64::from_be_bytes(bytes)))
    }

    fn verify(&self, proof: &[u8], public_inputs: &PublicInputs) -> Result<bool, BackendError> {
        Ok(proof == self.mac(public_inputs.threshold).as_slice())
    }
}

struct MacFactory;

impl BackendFactory for MacFactory {
    fn build(&self, artifact: &[u8]) -> Result<Box<dyn ProvingBackend>, BackendError> {
        Ok(Box::new(MacBackend {
            key: artifact.to_vec(),
        }))
    }
}

fn circuit_file() -> PathBuf {
    let path = std::env::temp_dir().join(format!("prism-circuit-{}.bin", uuid::Uuid::new_v4()));
    std::fs::write(&path, b"solvency circuit").unwrap();
    path
}

fn cryptographic_engine() -> SolvencyProofEngine {
    SolvencyProofEngine::with_factory(
        ProverConfig {
            dev_mode: false,
            circuit_path: circuit_file(),
            fallback_on_backend_error: true,
        },
        Arc::new(MacFactory),
    )
}

fn simulated_engine() -> SolvencyProofEngine {
    SolvencyProofEngine::with_factory(
        ProverConfig {
            dev_mode: false,
            circuit_path: PathBuf::from("/definitely/missing/solvency-proof.bin"),
            fallback_on_backend_error: true,
        },
        Arc::new(MacFactory),
    )
}

#[tokio::test]
async fn test_cryptographic_proof_survives_transport() {
    let engine = cryptographic_engine();
    assert_eq!(engine.initialize().await, ProofMode::Cryptographic);

    let generated = engine.generate_proof(500_000, 10_000).await.unwrap();
    assert_eq!(generated.mode, ProofMode::Cryptographic);
    assert!(generated.is_cryptographic());
    assert_eq!(generated.proof.public_inputs.threshold, 10_000);

    let bytes = generated.proof.to_bytes().unwrap();
    let received = SolvencyProof::from_bytes(&bytes).unwrap();
    assert!(engine.verify_proof(&received).await);

    // A proof for one threshold does not vouch for a higher one
    let mut inflated = received.clone();
    inflated.public_inputs.threshold = 400_000;
    assert!(!engine.verify_proof(&inflated).await);
}

#[tokio::test]
async fn test_exact_threshold_is_solvent() {
    let engine = cryptographic_engine();
    let generated = engine.generate_proof(10_000, 10_000).await.unwrap();
    assert!(generated.proof.public_inputs.is_solvent);
}

#[tokio::test]
async fn test_insolvent_claim_fails_in_both_modes() {
    for engine in [cryptographic_engine(), simulated_engine()] {
        assert_eq!(
            engine.generate_proof(5_000, 10_000).await.unwrap_err(),
            ProofError::ProofWouldFail { threshold: 10_000 }
        );
    }
}

#[tokio::test]
async fn test_negative_request_amounts_rejected() {
    let err = validate_amounts(-5, 10).unwrap_err();
    assert_eq!(
        ProofError::from(err),
        ProofError::Validation(ValidationError::NegativeAmount {
            field: "actual_balance",
            value: -5
        })
    );
}

#[tokio::test]
async fn test_simulated_mode_reports_itself() {
    let engine = simulated_engine();
    assert_eq!(engine.status(), EngineStatus::Uninitialized);

    let generated = engine.generate_proof(500_000, 10_000).await.unwrap();
    assert_eq!(generated.mode, ProofMode::Simulated);
    assert_eq!(engine.status(), EngineStatus::Ready(ProofMode::Simulated));
    assert!(engine.is_mock_mode());
    assert!(engine.verify_proof(&generated.proof).await);
}

#[tokio::test]
async fn test_simulated_mode_accepts_forged_proofs() {
    let engine = simulated_engine();
    engine.initialize().await;

    let forged = SolvencyProof {
        proof: b"anything at all".to_vec(),
        public_inputs: PublicInputs {
            threshold: 1_000_000_000,
            is_solvent: true,
        },
        timestamp: 1,
    };

    // Documented weakness: simulated verification only echoes `is_solvent`
    assert!(engine.verify_proof(&forged).await);

    // The same forgery is rejected once a real backend is loaded
    let cryptographic = cryptographic_engine();
    assert!(!cryptographic.verify_proof(&forged).await);
}

#[tokio::test]
async fn test_circuit_interface() {
    let info = simulated_engine().circuit_info().clone();
    assert_eq!(info.private_inputs, vec!["actual_balance".to_string()]);
    assert_eq!(info.public_inputs, vec!["threshold".to_string()]);
    assert_eq!(info.outputs, vec!["is_solvent".to_string()]);
}
